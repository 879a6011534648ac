use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

use crate::report::BatchResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub upload_id: i64,
    pub status: ProgressStatus,
    /// 0 to 100.
    pub progress: u8,
    pub current_file: Option<String>,
    pub records_processed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BatchResult>,
}

impl ProgressEvent {
    pub fn is_final(&self) -> bool {
        self.status != ProgressStatus::Processing
    }
}

/// Fan-out of progress events to any number of subscribers.
///
/// Publishing never blocks: a subscriber that falls more than `capacity`
/// events behind loses the oldest ones (`RecvError::Lagged`). The latest
/// event of every upload is also kept for polling.
#[derive(Clone)]
pub struct ProgressChannel {
    sender: broadcast::Sender<ProgressEvent>,
    latest: Arc<Mutex<HashMap<i64, ProgressEvent>>>,
}

impl ProgressChannel {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            latest: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn publish(&self, event: ProgressEvent) {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event.upload_id, event.clone());
        // No subscribers is fine.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn latest(&self, upload_id: i64) -> Option<ProgressEvent> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&upload_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    fn event(upload_id: i64, progress: u8) -> ProgressEvent {
        ProgressEvent {
            upload_id,
            status: ProgressStatus::Processing,
            progress,
            current_file: Some("jan.csv".into()),
            records_processed: 0,
            message: None,
            error: None,
            result: None,
        }
    }

    #[tokio::test]
    async fn slow_subscriber_loses_oldest_events() {
        let channel = ProgressChannel::new(2);
        let mut rx = channel.subscribe();
        for p in 1..=5 {
            channel.publish(event(1, p));
        }

        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(3))));
        assert_eq!(rx.recv().await.unwrap().progress, 4);
        assert_eq!(rx.recv().await.unwrap().progress, 5);
    }

    #[test]
    fn publishing_without_subscribers_keeps_latest() {
        let channel = ProgressChannel::new(4);
        channel.publish(event(1, 10));
        channel.publish(event(1, 20));
        channel.publish(event(2, 5));

        assert_eq!(channel.latest(1).unwrap().progress, 20);
        assert_eq!(channel.latest(2).unwrap().progress, 5);
        assert!(channel.latest(3).is_none());
    }

    #[test]
    fn event_serializes_camel_case() {
        let json = serde_json::to_value(event(7, 50)).unwrap();
        assert_eq!(json["uploadId"], 7);
        assert_eq!(json["status"], "processing");
        assert_eq!(json["currentFile"], "jan.csv");
        assert!(json.get("result").is_none());
    }
}
