//! Fire-and-forget messaging with the service worker that owns the HTTP cache
//!
//! Two messages exist: `{"type":"CLEAR_CACHE","cache":"<name>"|"all"}` and
//! `{"type":"SKIP_WAITING"}`. No reply is ever awaited.

use crate::error::{AssetError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Which service worker cache a `CLEAR_CACHE` targets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum CacheTarget {
    All,
    Named(String),
}

impl From<String> for CacheTarget {
    fn from(value: String) -> Self {
        if value == "all" {
            CacheTarget::All
        } else {
            CacheTarget::Named(value)
        }
    }
}

impl From<CacheTarget> for String {
    fn from(target: CacheTarget) -> Self {
        match target {
            CacheTarget::All => "all".to_string(),
            CacheTarget::Named(name) => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceWorkerMessage {
    ClearCache { cache: CacheTarget },
    SkipWaiting,
}

/// Transport to a service worker
pub trait ServiceWorkerPort: Send + Sync {
    fn post_message(&self, message: &ServiceWorkerMessage) -> Result<()>;
}

/// Port that forwards serialized messages over an in-process channel
pub struct ChannelPort {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelPort {
    /// Create a port and the receiving end the worker host reads from
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ServiceWorkerPort for ChannelPort {
    fn post_message(&self, message: &ServiceWorkerMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.tx
            .send(json)
            .map_err(|_| AssetError::Store("service worker channel closed".to_string()))
    }
}

/// Optional link to a service worker; every call is a no-op when absent
#[derive(Clone, Default)]
pub struct ServiceWorkerBridge {
    port: Option<Arc<dyn ServiceWorkerPort>>,
}

impl ServiceWorkerBridge {
    pub fn new(port: Arc<dyn ServiceWorkerPort>) -> Self {
        Self { port: Some(port) }
    }

    pub fn unavailable() -> Self {
        Self { port: None }
    }

    pub fn is_available(&self) -> bool {
        self.port.is_some()
    }

    /// Post `message` without waiting for any reply; failures are logged
    pub fn post(&self, message: ServiceWorkerMessage) {
        let Some(port) = &self.port else {
            debug!(message = ?message, "No service worker, message dropped");
            return;
        };

        match port.post_message(&message) {
            Ok(()) => debug!(message = ?message, "Posted service worker message"),
            Err(e) => warn!(message = ?message, error = %e, "Failed to post service worker message"),
        }
    }

    pub fn clear_cache(&self, target: CacheTarget) {
        self.post(ServiceWorkerMessage::ClearCache { cache: target });
    }

    pub fn skip_waiting(&self) {
        self.post(ServiceWorkerMessage::SkipWaiting);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let clear = ServiceWorkerMessage::ClearCache {
            cache: CacheTarget::Named("media-assets".to_string()),
        };
        assert_eq!(
            serde_json::to_string(&clear).unwrap(),
            r#"{"type":"CLEAR_CACHE","cache":"media-assets"}"#
        );

        let all = ServiceWorkerMessage::ClearCache {
            cache: CacheTarget::All,
        };
        assert_eq!(
            serde_json::to_string(&all).unwrap(),
            r#"{"type":"CLEAR_CACHE","cache":"all"}"#
        );

        assert_eq!(
            serde_json::to_string(&ServiceWorkerMessage::SkipWaiting).unwrap(),
            r#"{"type":"SKIP_WAITING"}"#
        );
    }

    #[test]
    fn test_message_parsing() {
        let parsed: ServiceWorkerMessage =
            serde_json::from_str(r#"{"type":"CLEAR_CACHE","cache":"all"}"#).unwrap();
        assert_eq!(
            parsed,
            ServiceWorkerMessage::ClearCache {
                cache: CacheTarget::All
            }
        );
    }

    #[tokio::test]
    async fn test_bridge_forwards_over_channel() {
        let (port, mut rx) = ChannelPort::new();
        let bridge = ServiceWorkerBridge::new(Arc::new(port));

        bridge.clear_cache(CacheTarget::All);
        bridge.skip_waiting();

        assert_eq!(
            rx.recv().await.unwrap(),
            r#"{"type":"CLEAR_CACHE","cache":"all"}"#
        );
        assert_eq!(rx.recv().await.unwrap(), r#"{"type":"SKIP_WAITING"}"#);
    }

    #[test]
    fn test_unavailable_bridge_is_noop() {
        let bridge = ServiceWorkerBridge::unavailable();
        assert!(!bridge.is_available());
        bridge.skip_waiting();
    }

    #[test]
    fn test_closed_channel_does_not_panic() {
        let (port, rx) = ChannelPort::new();
        drop(rx);
        let bridge = ServiceWorkerBridge::new(Arc::new(port));
        bridge.clear_cache(CacheTarget::Named("x".to_string()));
    }
}
