use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::model::QueueSnapshot;
use crate::probe::QueueSource;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Periodic queue-status refresh bound to its owner.
///
/// Fetches once immediately, then every `interval`. Fetches never overlap:
/// a slow fetch skips the ticks it spans. A failed fetch keeps the previous
/// snapshot. Dropping the poller stops it.
pub struct QueueStatusPoller {
    rx: watch::Receiver<Option<QueueSnapshot>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl QueueStatusPoller {
    /// Must be called from within a Tokio runtime. A zero `every` is raised to 1 ms.
    pub fn start(source: Arc<dyn QueueSource>, every: Duration) -> Self {
        let every = every.max(MIN_INTERVAL);
        let (tx, rx) = watch::channel(None);
        let token = CancellationToken::new();
        let cancel = token.clone();

        let task = tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let fetched = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    r = source.queue_status() => r,
                };
                match fetched {
                    Ok(snapshot) => {
                        tx.send_replace(Some(snapshot));
                    }
                    Err(e) => {
                        warn!(error = %e, "queue status fetch failed, keeping previous snapshot")
                    }
                }
            }
            debug!("queue status poller stopped");
        });

        Self {
            rx,
            token,
            task: Some(task),
        }
    }

    /// Latest snapshot, `None` until the first successful fetch.
    pub fn snapshot(&self) -> Option<QueueSnapshot> {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<QueueSnapshot>> {
        self.rx.clone()
    }

    /// Cancel the refresh task and wait for it to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for QueueStatusPoller {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
