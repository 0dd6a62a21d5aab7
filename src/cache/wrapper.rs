//! Read-through wrapper for async functions.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::cache::codec::ValueCodec;
use crate::cache::store::{SetOptions, TieredCache};

/// Wrap `f` so each call first consults the cache.
///
/// `key_fn` derives the cache key from the call arguments. On a miss `f`
/// runs and an `Ok` result is stored under `options`; errors pass through
/// uncached.
pub fn cached<T, C, A, E, K, F, Fut>(
    cache: Arc<TieredCache<T, C>>,
    key_fn: K,
    options: SetOptions,
    f: F,
) -> impl Fn(A) -> BoxFuture<'static, Result<T, E>> + Send + Sync
where
    T: Clone + Send + Sync + 'static,
    C: ValueCodec<T>,
    A: Send + 'static,
    E: Send + 'static,
    K: Fn(&A) -> String + Send + Sync + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
{
    let f = Arc::new(f);
    move |args: A| {
        let key = key_fn(&args);
        let cache = cache.clone();
        let f = f.clone();
        let options = options.clone();
        async move {
            if let Some(value) = cache.get(&key).await {
                return Ok(value);
            }
            let value = (*f)(args).await?;
            cache.set(&key, value.clone(), options).await;
            Ok(value)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::config::CacheConfig;

    #[tokio::test]
    async fn test_second_call_served_from_cache() {
        let cache = Arc::new(TieredCache::<u64>::new(CacheConfig::default()).unwrap());
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let square = cached(
            cache.clone(),
            |n: &u64| format!("square:{n}"),
            SetOptions::default(),
            move |n: u64| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(n * n)
                }
            },
        );

        assert_eq!(square(7).await, Ok(49));
        assert_eq!(square(7).await, Ok(49));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.get("square:7").await, Some(49));
    }

    #[tokio::test]
    async fn test_errors_not_cached() {
        let cache = Arc::new(TieredCache::<u64>::new(CacheConfig::default()).unwrap());
        let failing = cached(
            cache.clone(),
            |_: &()| "k".to_string(),
            SetOptions::default(),
            |_: ()| async { Err::<u64, _>("backend down") },
        );

        assert_eq!(failing(()).await, Err("backend down"));
        assert_eq!(cache.get("k").await, None);
    }
}
