use crate::dispatcher::dispatcher::Dispatcher;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Interval between membership scans when the caller does not pick one.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(5);

/// The background half of membership discovery: one long-lived task that runs
/// a registry scan every `interval` for as long as its dispatcher exists.
///
/// The task holds the dispatcher weakly so it never keeps it alive. When the
/// last strong reference drops, the next tick fails to upgrade and the task
/// exits. That is the whole shutdown protocol; there is no stop signal to
/// lose or forget.
pub(crate) struct DiscoveryTask {
    logger: slog::Logger,
    dispatcher: Weak<Dispatcher>,
    interval: Duration,
}

impl DiscoveryTask {
    pub(crate) fn spawn(logger: slog::Logger, dispatcher: &Arc<Dispatcher>, interval: Duration) {
        let task = DiscoveryTask {
            logger,
            dispatcher: Arc::downgrade(dispatcher),
            interval,
        };

        tokio::task::spawn(task.run());
    }

    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        // An interval's first tick completes immediately. Swallow it so the
        // first scan happens one full interval after startup, the same spacing
        // as every later one.
        ticker.tick().await;

        loop {
            ticker.tick().await;

            // Upgrade only for the scan itself. Holding the Arc across the
            // sleep would keep a dropped dispatcher alive for one extra tick.
            match self.dispatcher.upgrade() {
                Some(dispatcher) => dispatcher.scan_for_new_backups().await,
                None => {
                    slog::info!(self.logger, "Dispatcher is gone, discovery task exiting");
                    return;
                }
            }
        }
    }
}
