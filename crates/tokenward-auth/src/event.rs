//! Security events.
//!
//! Token components publish events through an injected [`EventPublisher`].
//! Publishing is fire-and-forget: there is no return value, no ordering
//! guarantee relative to the caller, and a missing or slow subscriber never
//! affects token generation.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::broadcast;

/// Default buffer size for the broadcast channel.
/// Slow receivers lag and lose the oldest events beyond this limit.
const DEFAULT_BUFFER_SIZE: usize = 1024;

// ============================================================================
// Event Types
// ============================================================================

/// A refresh token was issued.
///
/// Carries identifiers only, never the token itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenGeneratedEvent {
    /// Subject the token was issued to.
    pub principal_id: String,

    /// Key id of the codec that signed the token, if any.
    pub key_id: Option<String>,

    /// `jti` of a signed token, or the SHA-256 hash of an opaque one.
    pub token_id: String,

    /// When the token was issued.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// An access token was issued in exchange for a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRefreshedEvent {
    /// Subject of the refreshed session.
    pub principal_id: String,

    /// `jti` of the refresh token that was presented.
    pub refresh_token_id: String,

    /// When the exchange happened.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Events emitted by token issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SecurityEvent {
    /// See [`RefreshTokenGeneratedEvent`].
    RefreshTokenGenerated(RefreshTokenGeneratedEvent),
    /// See [`TokenRefreshedEvent`].
    TokenRefreshed(TokenRefreshedEvent),
}

impl SecurityEvent {
    /// Returns the event name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::RefreshTokenGenerated(_) => "refresh_token_generated",
            Self::TokenRefreshed(_) => "token_refreshed",
        }
    }

    /// Returns the subject the event concerns.
    #[must_use]
    pub fn principal_id(&self) -> &str {
        match self {
            Self::RefreshTokenGenerated(e) => &e.principal_id,
            Self::TokenRefreshed(e) => &e.principal_id,
        }
    }
}

impl From<RefreshTokenGeneratedEvent> for SecurityEvent {
    fn from(event: RefreshTokenGeneratedEvent) -> Self {
        Self::RefreshTokenGenerated(event)
    }
}

impl From<TokenRefreshedEvent> for SecurityEvent {
    fn from(event: TokenRefreshedEvent) -> Self {
        Self::TokenRefreshed(event)
    }
}

impl fmt::Display for SecurityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.event_type(), self.principal_id())
    }
}

// ============================================================================
// Publishers
// ============================================================================

/// One-way event sink.
pub trait EventPublisher: Send + Sync {
    /// Publishes `event`. Delivery is best effort.
    fn publish(&self, event: SecurityEvent);
}

/// Publisher that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

impl EventPublisher for NoopEventPublisher {
    fn publish(&self, _event: SecurityEvent) {}
}

/// Publisher backed by a tokio broadcast channel.
///
/// Cheap to clone; all clones share the channel.
///
/// ```
/// use tokenward_auth::event::{BroadcastEventPublisher, EventPublisher};
///
/// let publisher = BroadcastEventPublisher::new();
/// let mut receiver = publisher.subscribe();
/// // publisher.publish(event);
/// // let event = receiver.recv().await?;
/// # drop(receiver);
/// ```
#[derive(Clone)]
pub struct BroadcastEventPublisher {
    sender: broadcast::Sender<SecurityEvent>,
}

impl BroadcastEventPublisher {
    /// Creates a publisher with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUFFER_SIZE)
    }

    /// Creates a publisher with a custom buffer size.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a publisher wrapped in an `Arc`.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Subscribes to events published after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SecurityEvent> {
        self.sender.subscribe()
    }

    /// Number of active subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl EventPublisher for BroadcastEventPublisher {
    fn publish(&self, event: SecurityEvent) {
        // Err only means nobody is listening.
        let _ = self.sender.send(event);
    }
}

impl Default for BroadcastEventPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BroadcastEventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BroadcastEventPublisher")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> SecurityEvent {
        RefreshTokenGeneratedEvent {
            principal_id: "alice".to_string(),
            key_id: Some("k1".to_string()),
            token_id: "jti-1".to_string(),
            timestamp: OffsetDateTime::UNIX_EPOCH,
        }
        .into()
    }

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let publisher = BroadcastEventPublisher::new();
        let mut rx1 = publisher.subscribe();
        let mut rx2 = publisher.subscribe();
        assert_eq!(publisher.subscriber_count(), 2);

        publisher.publish(event());

        assert_eq!(rx1.recv().await.unwrap(), event());
        assert_eq!(rx2.recv().await.unwrap(), event());
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let publisher = BroadcastEventPublisher::new();
        publisher.publish(event());
        NoopEventPublisher.publish(event());
    }

    #[test]
    fn test_event_serialization() {
        let json = serde_json::to_value(event()).unwrap();
        assert_eq!(json["type"], "refresh_token_generated");
        assert_eq!(json["principal_id"], "alice");
        assert_eq!(json["timestamp"], "1970-01-01T00:00:00Z");
        assert_eq!(event().to_string(), "refresh_token_generated (alice)");
    }
}
