use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use spinwick_cloud::WebhookPayload;
use thiserror::Error;
use tokio::sync::mpsc;

/// How long a delivery task waits on a full subscriber channel before
/// dropping the payload for that subscriber.
pub const DELIVERY_GRACE_PERIOD: Duration = Duration::from_secs(5);

const CHANNEL_CAPACITY: usize = 1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a channel already exists for ID {0}")]
    AlreadyRegistered(String),
}

/// Process-wide registry mapping an installation ID to the single task
/// waiting on its state changes. Channels are registered immediately before
/// a wait begins and must be removed on every exit path; the fan-out in
/// [`dispatch`](Self::dispatch) never blocks on any one subscriber.
#[derive(Debug, Default)]
pub struct WebhookChannelRegistry {
    channels: Mutex<HashMap<String, mpsc::Sender<WebhookPayload>>>,
}

impl WebhookChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_channel(
        &self,
        id: &str,
    ) -> Result<mpsc::Receiver<WebhookPayload>, RegistryError> {
        let mut channels = self
            .channels
            .lock()
            .expect("webhook channel registry lock poisoned");
        if channels.contains_key(id) {
            return Err(RegistryError::AlreadyRegistered(id.to_owned()));
        }

        let (sender, receiver) = mpsc::channel(CHANNEL_CAPACITY);
        channels.insert(id.to_owned(), sender);
        Ok(receiver)
    }

    /// Removing an ID that was never registered (or already removed) is a
    /// no-op.
    pub fn remove_channel(&self, id: &str) {
        self.channels
            .lock()
            .expect("webhook channel registry lock poisoned")
            .remove(id);
    }

    /// Fans the payload out to every registered channel. One fire-and-forget
    /// task per subscriber, each bounded by [`DELIVERY_GRACE_PERIOD`], so a
    /// stuck subscriber only loses its own delivery.
    pub fn dispatch(&self, payload: &WebhookPayload) {
        let senders: Vec<mpsc::Sender<WebhookPayload>> = {
            let channels = self
                .channels
                .lock()
                .expect("webhook channel registry lock poisoned");
            channels.values().cloned().collect()
        };

        for sender in senders {
            let payload = payload.clone();
            tokio::spawn(async move {
                let _ = sender.send_timeout(payload, DELIVERY_GRACE_PERIOD).await;
            });
        }
    }

    pub fn len(&self) -> usize {
        self.channels
            .lock()
            .expect("webhook channel registry lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::timeout;

    const TEST_TIMEOUT: Duration = Duration::from_secs(2);

    fn payload(id: &str, state: &str) -> WebhookPayload {
        WebhookPayload {
            id: id.to_owned(),
            new_state: state.to_owned(),
            old_state: String::new(),
        }
    }

    #[test]
    fn duplicate_registration_fails_fast() {
        let registry = WebhookChannelRegistry::new();
        let _receiver = registry.request_channel("inst-1").unwrap();

        let error = registry
            .request_channel("inst-1")
            .err()
            .expect("second registration for a live ID must fail");
        assert_eq!(error, RegistryError::AlreadyRegistered("inst-1".to_owned()));
    }

    #[test]
    fn removal_is_idempotent_and_frees_the_id() {
        let registry = WebhookChannelRegistry::new();
        let _receiver = registry.request_channel("inst-1").unwrap();

        registry.remove_channel("inst-1");
        registry.remove_channel("inst-1");
        registry.remove_channel("never-registered");

        assert!(registry.is_empty());
        assert!(registry.request_channel("inst-1").is_ok());
    }

    #[tokio::test]
    async fn dispatch_delivers_to_registered_channels() {
        let registry = WebhookChannelRegistry::new();
        let mut receiver = registry.request_channel("inst-1").unwrap();

        registry.dispatch(&payload("inst-1", "stable"));

        let delivered = timeout(TEST_TIMEOUT, receiver.recv())
            .await
            .expect("delivery timed out")
            .expect("channel closed unexpectedly");
        assert_eq!(delivered.id, "inst-1");
        assert_eq!(delivered.new_state, "stable");
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_stall_delivery_to_others() {
        let registry = WebhookChannelRegistry::new();
        let _slow = registry.request_channel("inst-slow").unwrap();
        let mut fast = registry.request_channel("inst-fast").unwrap();

        // First dispatch fills the slow channel's buffer; nothing drains it.
        registry.dispatch(&payload("inst-slow", "creation-in-progress"));
        let first = timeout(TEST_TIMEOUT, fast.recv())
            .await
            .expect("first delivery timed out")
            .unwrap();
        assert_eq!(first.new_state, "creation-in-progress");

        // The slow subscriber's delivery task is now stuck until its grace
        // period elapses; the fast subscriber must still receive promptly.
        registry.dispatch(&payload("inst-fast", "stable"));
        let second = timeout(TEST_TIMEOUT, fast.recv())
            .await
            .expect("second delivery timed out")
            .unwrap();
        assert_eq!(second.new_state, "stable");
    }
}
