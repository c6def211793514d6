use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::services::llm::Usage;

/// Published on `events.artifact.analyzed` whenever an artifact finishes
/// analysis, successfully or not (§6 "External interfaces").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactAnalyzed {
    pub event_id: Uuid,
    pub program_id: Uuid,
    pub artifact_id: Uuid,
    pub status: String,
    pub ai_model: Option<String>,
    pub usage: Option<Usage>,
    pub cost_usd: Option<f64>,
    pub duration_ms: i64,
    pub timestamp: DateTime<Utc>,
}

/// Publishes pipeline events to any number of in-process subscribers.
///
/// The teacher's event service is backed by a durable `MsgStore` shared
/// with its SSE layer; that store isn't part of this workspace, so this is
/// a plain broadcast channel instead. Subscribers that lag behind the
/// configured buffer miss old events rather than blocking publishers,
/// which matches the "best-effort, fire-and-forget" framing of §4.H step 8.
#[derive(Clone)]
pub struct EventService {
    sender: broadcast::Sender<ArtifactAnalyzed>,
}

impl EventService {
    pub fn new(buffer: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer);
        EventService { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArtifactAnalyzed> {
        self.sender.subscribe()
    }

    /// Never returns an error to the caller: an event with zero live
    /// subscribers is not a failure, and the analyzer must not fail a
    /// completed analysis because nobody happened to be listening.
    pub fn publish(&self, event: ArtifactAnalyzed) {
        if self.sender.send(event).is_err() {
            tracing::debug!(target: "context_graph::events", "no subscribers for artifact.analyzed event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let service = EventService::new(16);
        let mut rx = service.subscribe();
        let event = ArtifactAnalyzed {
            event_id: Uuid::new_v4(),
            program_id: Uuid::new_v4(),
            artifact_id: Uuid::new_v4(),
            status: "completed".to_string(),
            ai_model: Some("gpt-test".to_string()),
            usage: None,
            cost_usd: Some(0.01),
            duration_ms: 120,
            timestamp: Utc::now(),
        };
        service.publish(event.clone());
        let received = rx.recv().await.unwrap();
        assert_eq!(received.artifact_id, event.artifact_id);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let service = EventService::new(4);
        service.publish(ArtifactAnalyzed {
            event_id: Uuid::new_v4(),
            program_id: Uuid::new_v4(),
            artifact_id: Uuid::new_v4(),
            status: "failed".to_string(),
            ai_model: None,
            usage: None,
            cost_usd: None,
            duration_ms: 5,
            timestamp: Utc::now(),
        });
    }
}
