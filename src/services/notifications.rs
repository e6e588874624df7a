//! Pipeline event notifications
//!
//! Fan-out over a broadcast channel; subscribers come and go freely and a
//! send with no subscribers is not an error.

use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::debug;

const CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the identification pipeline
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// A file was identified and its episode links are in place
    FileMatched {
        video_id: i64,
        location_id: i64,
        /// Lookup attempts made for this file, including this one
        attempts: i64,
        /// Whether the persisted episode links actually changed
        cross_refs_changed: bool,
        /// Active metadata ban window, if any
        banned_until: Option<OffsetDateTime>,
    },
    /// The metadata service does not know this file. Not an error: absence
    /// of metadata is expected for unreleased or obscure content.
    FileNotMatched {
        video_id: i64,
        location_id: i64,
        attempts: i64,
        banned_until: Option<OffsetDateTime>,
    },
    /// A file was moved into the library
    FileRelocated {
        video_id: i64,
        location_id: i64,
        destination: String,
    },
    /// A surplus duplicate copy was deleted
    DuplicateRemoved { video_id: i64, path: String },
    /// The metadata service banned this client
    ServiceBanned { until: OffsetDateTime },
}

/// Broadcast hub for pipeline events
pub struct NotificationService {
    sender: broadcast::Sender<PipelineEvent>,
}

impl Default for NotificationService {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationService {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }

    /// Emit an event to all current subscribers
    pub fn publish(&self, event: PipelineEvent) {
        debug!(event = ?event, "Pipeline event");
        // No subscribers is fine
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let service = NotificationService::new();
        let mut rx = service.subscribe();

        service.publish(PipelineEvent::FileMatched {
            video_id: 7,
            location_id: 3,
            attempts: 1,
            cross_refs_changed: true,
            banned_until: None,
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::FileMatched {
                video_id,
                cross_refs_changed,
                ..
            } => {
                assert_eq!(video_id, 7);
                assert!(cross_refs_changed);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let service = NotificationService::new();
        service.publish(PipelineEvent::DuplicateRemoved {
            video_id: 1,
            path: "x.mkv".to_string(),
        });
    }
}
