//! Periodic maintenance: expiry sweep, optimize pass and prefetch worker.
//!
//! Every task is a `tokio::spawn`ed loop selecting between its trigger and a
//! shared `watch` shutdown signal, so `stop()` returns only after all tasks
//! have exited.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cache::codec::ValueCodec;
use crate::cache::store::TieredCache;

/// Handle to the running maintenance tasks.
pub struct MaintenanceScheduler {
    shutdown: watch::Sender<bool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl MaintenanceScheduler {
    /// Spawn the maintenance tasks for `cache`. Must be called inside a
    /// tokio runtime.
    ///
    /// With `warmup_on_start`, L1 is warmed before any task runs.
    pub fn start<T, C>(cache: Arc<TieredCache<T, C>>) -> Self
    where
        T: Clone + Send + Sync + 'static,
        C: ValueCodec<T>,
    {
        let maintenance = cache.maintenance_config().clone();
        if cache.config().warmup_on_start {
            cache.warmup();
        }

        let (shutdown, rx) = watch::channel(false);
        let mut handles = Vec::with_capacity(3);

        let sweep_cache = cache.clone();
        handles.push((
            "sweep",
            spawn_periodic(
                "sweep",
                Duration::from_millis(maintenance.sweep_interval_ms),
                rx.clone(),
                move || {
                    let cache = sweep_cache.clone();
                    async move {
                        cache.sweep_expired().await;
                    }
                },
            ),
        ));

        let optimize_cache = cache.clone();
        handles.push((
            "optimize",
            spawn_periodic(
                "optimize",
                Duration::from_millis(maintenance.optimize_interval_ms),
                rx.clone(),
                move || {
                    let cache = optimize_cache.clone();
                    async move {
                        cache.optimize().await;
                    }
                },
            ),
        ));

        if cache.config().prefetch_enabled {
            handles.push(("prefetch", spawn_prefetch_worker(cache.clone(), rx)));
        }

        info!(
            sweep_interval_ms = maintenance.sweep_interval_ms,
            optimize_interval_ms = maintenance.optimize_interval_ms,
            tasks = handles.len(),
            "Maintenance scheduler started"
        );

        Self { shutdown, handles }
    }

    /// Signal every task to stop and wait for them to exit.
    pub async fn stop(self) {
        // Receivers only disappear once every task has already exited.
        let _ = self.shutdown.send(true);
        for (name, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!(task = name, error = %e, "Maintenance task ended abnormally");
            }
        }
        info!("Maintenance scheduler stopped");
    }

    /// Number of spawned tasks.
    pub fn task_count(&self) -> usize {
        self.handles.len()
    }
}

fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    debug!(task = name, "Running maintenance task");
                    task().await;
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(task = name, "Maintenance task exited");
    })
}

fn spawn_prefetch_worker<T, C>(
    cache: Arc<TieredCache<T, C>>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    C: ValueCodec<T>,
{
    tokio::spawn(async move {
        let batch = cache.config().batch_size;
        loop {
            tokio::select! {
                _ = cache.prefetch_queue().notified() => {
                    while !cache.prefetch_queue().is_empty() {
                        let promoted = cache.process_prefetch(batch).await;
                        debug!(promoted, "Prefetch batch processed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        debug!(task = "prefetch", "Maintenance task exited");
    })
}
