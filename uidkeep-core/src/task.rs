use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Handle to a periodic background loop.
///
/// The loop stops when [`shutdown`](Self::shutdown) is called or when the
/// handle is dropped. A tick that is already running always completes first.
pub struct BackgroundTask {
    name: &'static str,
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl BackgroundTask {
    /// Spawns `tick` every `interval` on the current Tokio runtime.
    ///
    /// With `run_immediately` the first tick fires at once, otherwise the loop
    /// waits one full interval first.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime context.
    pub(crate) fn spawn<F, Fut>(
        name: &'static str,
        interval: Duration,
        run_immediately: bool,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interval = if interval.is_zero() {
            tracing::warn!("{} interval of zero requested, using 1s", name);
            Duration::from_secs(1)
        } else {
            interval
        };
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            if !run_immediately {
                // The first tick of a tokio interval completes immediately
                ticker.tick().await;
            }

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tick().await;
                    }
                    changed = shutdown_rx.changed() => {
                        // Err means the handle was dropped
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("{} loop stopped", name);
        });

        Self {
            name,
            shutdown_tx,
            handle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signals the loop to stop and waits for it, so an in-flight tick
    /// (and any file write inside it) finishes before this returns.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.handle.await {
            tracing::error!("{} loop ended abnormally: {}", self.name, err);
        }
    }
}
