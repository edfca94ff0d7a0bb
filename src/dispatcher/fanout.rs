use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::fetcher::Fetch;
use crate::notification::NotificationMessage;

/// Receives every message delivered on the subscribed topic.
///
/// The session awaits `handle` before passing on the next message, so an
/// implementation that returns only once its work is done serializes
/// message processing.
#[async_trait]
pub trait NotificationHandler: Send + Sync + 'static {
    async fn handle(&self, topic: &str, payload: &[u8]);
}

/// Outcome of one notification's fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub succeeded: usize,
    pub failed: usize,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.succeeded + self.failed
    }
}

/// Fans a notification's canonical links out to concurrent fetches.
///
/// All notifications share one permit pool, so at most
/// `max_concurrent_fetches` downloads are in flight at any time.
pub struct Dispatcher<F: Fetch> {
    fetcher: Arc<F>,
    permits: Arc<Semaphore>,
}

impl<F: Fetch> Clone for Dispatcher<F> {
    fn clone(&self) -> Self {
        Self {
            fetcher: self.fetcher.clone(),
            permits: self.permits.clone(),
        }
    }
}

impl<F: Fetch> Dispatcher<F> {
    pub fn new(fetcher: Arc<F>, max_concurrent_fetches: usize) -> Self {
        Self {
            fetcher,
            permits: Arc::new(Semaphore::new(max_concurrent_fetches.max(1))),
        }
    }

    /// Fetches every canonical link of `notification` and returns once all
    /// of them have succeeded or failed. Failures are logged, never
    /// propagated.
    pub async fn dispatch(&self, notification: &NotificationMessage) -> DispatchReport {
        let mut tasks = JoinSet::new();

        for link in notification.canonical_links() {
            let fetcher = self.fetcher.clone();
            let permits = self.permits.clone();
            let url = link.href.clone();

            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let outcome = fetcher.fetch(&url).await;
                (url, outcome)
            });
        }

        let mut report = DispatchReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(_))) => report.succeeded += 1,
                Ok((url, Err(e))) => {
                    error!(url = %url, error = %e, "error downloading file");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "download task did not complete");
                    report.failed += 1;
                }
            }
        }
        report
    }
}

#[async_trait]
impl<F: Fetch> NotificationHandler for Dispatcher<F> {
    async fn handle(&self, topic: &str, payload: &[u8]) {
        info!(topic, bytes = payload.len(), "received message on topic");

        let notification = match NotificationMessage::decode(payload) {
            Ok(notification) => notification,
            Err(e) => {
                warn!(topic, error = %e, "dropping message");
                return;
            }
        };

        let report = self.dispatch(&notification).await;
        if report.total() > 0 {
            info!(
                topic,
                succeeded = report.succeeded,
                failed = report.failed,
                "notification processed"
            );
        }
    }
}
