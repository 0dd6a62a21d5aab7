//! Rule-based invalidation.
//!
//! A rule links keys matching `pattern` to dependent keys matching any of
//! its `dependencies`. When a matching key is invalidated, the dependents
//! are invalidated too. Expansion is one level deep: dependents do not
//! trigger further rules.
//!
//! The engine only plans. It turns a candidate set into an
//! [`InvalidationPlan`] that the store executes against its tiers.

use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// How matched keys are invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvalidationStrategy {
    /// Delete from every tier now.
    #[default]
    Immediate,
    /// Mark expired in place; removed on the next read or sweep.
    Lazy,
    /// Delete dependents of every matching rule, then the key itself.
    Cascading,
}

/// A key pattern. Strings are compiled as regexes, and fall back to a
/// substring match when they are not valid regex syntax.
#[derive(Debug, Clone)]
pub enum KeyPattern {
    Regex(Regex),
    Literal(String),
}

impl KeyPattern {
    pub fn new(pattern: &str) -> Self {
        match Regex::new(pattern) {
            Ok(re) => Self::Regex(re),
            Err(_) => Self::Literal(pattern.to_string()),
        }
    }

    /// Compile strictly, rejecting invalid regex syntax.
    pub fn strict(pattern: &str) -> Result<Self, regex::Error> {
        Regex::new(pattern).map(Self::Regex)
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Regex(re) => re.is_match(key),
            Self::Literal(literal) => key.contains(literal.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Regex(re) => re.as_str(),
            Self::Literal(literal) => literal,
        }
    }
}

impl From<Regex> for KeyPattern {
    fn from(re: Regex) -> Self {
        Self::Regex(re)
    }
}

impl From<&str> for KeyPattern {
    fn from(pattern: &str) -> Self {
        Self::new(pattern)
    }
}

impl From<String> for KeyPattern {
    fn from(pattern: String) -> Self {
        Self::new(&pattern)
    }
}

/// A declared dependency between keys.
#[derive(Debug, Clone)]
pub struct InvalidationRule {
    pub pattern: KeyPattern,
    pub dependencies: Vec<KeyPattern>,
    pub strategy: InvalidationStrategy,
    /// Lower runs first.
    pub priority: i32,
}

impl InvalidationRule {
    pub fn new(
        pattern: &str,
        dependencies: &[&str],
        strategy: InvalidationStrategy,
        priority: i32,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: KeyPattern::strict(pattern)?,
            dependencies: dependencies
                .iter()
                .map(|d| KeyPattern::strict(d))
                .collect::<Result<_, _>>()?,
            strategy,
            priority,
        })
    }
}

/// Serializable rule description, as accepted over HTTP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub pattern: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub strategy: InvalidationStrategy,
    #[serde(default)]
    pub priority: i32,
}

impl TryFrom<RuleSpec> for InvalidationRule {
    type Error = regex::Error;

    fn try_from(spec: RuleSpec) -> Result<Self, Self::Error> {
        let deps: Vec<&str> = spec.dependencies.iter().map(String::as_str).collect();
        InvalidationRule::new(&spec.pattern, &deps, spec.strategy, spec.priority)
    }
}

/// Keys to delete and keys to mark expired.
#[derive(Debug, Default, PartialEq)]
pub struct InvalidationPlan {
    pub delete: BTreeSet<String>,
    pub expire: BTreeSet<String>,
}

/// Priority-ordered rule set and planner.
#[derive(Debug, Default)]
pub struct InvalidationEngine {
    rules: Vec<InvalidationRule>,
}

impl InvalidationEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a rule after every rule with the same or lower priority.
    pub fn add_rule(&mut self, rule: InvalidationRule) {
        let pos = self
            .rules
            .iter()
            .position(|existing| existing.priority > rule.priority)
            .unwrap_or(self.rules.len());
        tracing::debug!(
            pattern = rule.pattern.as_str(),
            priority = rule.priority,
            position = pos,
            "Added invalidation rule"
        );
        self.rules.insert(pos, rule);
    }

    pub fn rules(&self) -> &[InvalidationRule] {
        &self.rules
    }

    /// Rules whose pattern matches `key`, in priority order.
    pub fn rules_for<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a InvalidationRule> {
        self.rules.iter().filter(move |rule| rule.pattern.matches(key))
    }

    /// Build the plan for invalidating `candidates` with `strategy`.
    ///
    /// `all_keys` is every key currently cached in any tier; dependency
    /// patterns are resolved against it.
    pub fn plan(
        &self,
        candidates: &BTreeSet<String>,
        all_keys: &BTreeSet<String>,
        strategy: InvalidationStrategy,
    ) -> InvalidationPlan {
        let mut plan = InvalidationPlan::default();

        for candidate in candidates {
            for rule in self.rules_for(candidate) {
                let dependents = all_keys
                    .iter()
                    .filter(|key| rule.dependencies.iter().any(|dep| dep.matches(key)));

                let lazy = strategy != InvalidationStrategy::Cascading
                    && rule.strategy == InvalidationStrategy::Lazy;
                for key in dependents {
                    if lazy {
                        plan.expire.insert(key.clone());
                    } else {
                        plan.delete.insert(key.clone());
                    }
                }
            }

            match strategy {
                InvalidationStrategy::Lazy => plan.expire.insert(candidate.clone()),
                _ => plan.delete.insert(candidate.clone()),
            };
        }

        // A key both deleted and expired is simply deleted.
        let deleted = &plan.delete;
        plan.expire.retain(|key| !deleted.contains(key));
        plan
    }
}
