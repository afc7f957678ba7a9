use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info};

use crate::registry::SubscriberRegistry;

#[derive(Error, Debug)]
#[error("failed to deliver to chat {chat_id}: {reason}")]
pub struct SendError {
    pub chat_id: i64,
    pub reason: String,
}

/// Single-recipient delivery capability of the messaging platform.
#[async_trait]
pub trait MessageSender: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> Result<(), SendError>;
}

/// Fans one message out to every active subscriber.
///
/// One attempt per recipient, no retries. A failed recipient is logged and skipped.
pub struct Notifier {
    registry: Arc<SubscriberRegistry>,
    sender: Arc<dyn MessageSender>,
}

impl Notifier {
    pub fn new(registry: Arc<SubscriberRegistry>, sender: Arc<dyn MessageSender>) -> Self {
        Self { registry, sender }
    }

    /// Sends `message` to a snapshot of the active subscribers and returns how many got it.
    pub async fn broadcast(&self, message: &str) -> usize {
        let registry = self.registry.clone();
        let recipients = match tokio::task::spawn_blocking(move || registry.list_active()).await {
            Ok(recipients) => recipients,
            Err(e) => {
                error!("failed to read subscribers: {}", e);
                return 0;
            }
        };
        if recipients.is_empty() {
            info!("no active subscribers, nothing to broadcast");
            return 0;
        }

        let mut delivered = 0;
        for &chat_id in &recipients {
            match self.sender.send(chat_id, message).await {
                Ok(()) => {
                    delivered += 1;
                    metrics::counter!("svitlo_notifications_total", "outcome" => "delivered")
                        .increment(1);
                }
                Err(e) => {
                    error!(chat_id, "{}", e);
                    metrics::counter!("svitlo_notifications_total", "outcome" => "failed")
                        .increment(1);
                }
            }
        }

        info!(
            delivered,
            recipients = recipients.len(),
            "message sent to {}/{} subscribers",
            delivered,
            recipients.len()
        );
        delivered
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriber::SubscriberProfile;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records every delivery and fails for a configured set of chats.
    #[derive(Default)]
    pub struct RecordingSender {
        pub failing: HashSet<i64>,
        pub sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        async fn send(&self, chat_id: i64, text: &str) -> Result<(), SendError> {
            if self.failing.contains(&chat_id) {
                return Err(SendError {
                    chat_id,
                    reason: "chat not found".to_owned(),
                });
            }
            self.sent.lock().unwrap().push((chat_id, text.to_owned()));
            Ok(())
        }
    }

    fn registry_with(ids: &[i64]) -> (TempDir, Arc<SubscriberRegistry>) {
        let dir = TempDir::new().unwrap();
        let registry = SubscriberRegistry::new(dir.path().join("chat_ids.csv"));
        for id in ids {
            registry.add(*id, SubscriberProfile::default());
        }
        (dir, Arc::new(registry))
    }

    #[tokio::test]
    async fn empty_registry_sends_nothing() {
        let (_dir, registry) = registry_with(&[]);
        let sender = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(registry, sender.clone());

        assert_eq!(notifier.broadcast("hello").await, 0);
        assert!(sender.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn one_failure_does_not_stop_the_rest() {
        let (_dir, registry) = registry_with(&[1, 2, 3]);
        let sender = Arc::new(RecordingSender {
            failing: HashSet::from([2]),
            ..Default::default()
        });
        let notifier = Notifier::new(registry, sender.clone());

        assert_eq!(notifier.broadcast("off").await, 2);

        let sent = sender.sent.lock().unwrap();
        assert_eq!(*sent, vec![(1, "off".to_owned()), (3, "off".to_owned())]);
    }

    #[tokio::test]
    async fn all_failures_still_return() {
        let (_dir, registry) = registry_with(&[1, 2]);
        let sender = Arc::new(RecordingSender {
            failing: HashSet::from([1, 2]),
            ..Default::default()
        });
        let notifier = Notifier::new(registry, sender);

        assert_eq!(notifier.broadcast("on").await, 0);
    }

    #[tokio::test]
    async fn skips_inactive_subscribers() {
        let (_dir, registry) = registry_with(&[1, 2]);
        registry.deactivate(1);
        let sender = Arc::new(RecordingSender::default());
        let notifier = Notifier::new(registry, sender.clone());

        assert_eq!(notifier.broadcast("on").await, 1);
        assert_eq!(sender.sent.lock().unwrap()[0].0, 2);
    }
}
