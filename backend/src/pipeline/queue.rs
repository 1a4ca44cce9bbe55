//! Dispatch messages and the queue they travel on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::error::QueueError;
use crate::models::{FileFormat, Import, ImportId};

/// Request to run the probe / process protocol for one import.
///
/// ```json
/// { "sourceLocation": "https://…", "fileFormat": "xlsx", "importId": 7, "attempt": 0 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchMessage {
    pub source_location: String,
    pub file_format: FileFormat,
    pub import_id: ImportId,
    /// Probes already made for this import.
    #[serde(default)]
    pub attempt: u32,
}

impl DispatchMessage {
    /// First dispatch of a freshly created import.
    pub fn initial(import: &Import) -> Self {
        Self {
            source_location: import.source_location.clone(),
            file_format: import.file_format,
            import_id: import.id,
            attempt: 0,
        }
    }

    /// The same dispatch, one probe later.
    pub fn next_attempt(&self) -> Self {
        Self {
            attempt: self.attempt + 1,
            ..self.clone()
        }
    }
}

/// At-least-once delivery of dispatch messages.
#[async_trait]
pub trait DispatchQueue: Send + Sync {
    async fn publish(&self, message: DispatchMessage) -> Result<(), QueueError>;

    /// Deliver `message` once `delay` has elapsed.
    async fn publish_delayed(&self, message: DispatchMessage, delay: Duration) -> Result<(), QueueError>;
}

/// In-process queue over an unbounded channel.
///
/// Delayed messages are held by a sleeping task until due.
#[derive(Clone)]
pub struct LocalQueue {
    sender: mpsc::UnboundedSender<DispatchMessage>,
}

impl LocalQueue {
    /// Create the queue and the receiver consumed by the worker pool.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DispatchMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl DispatchQueue for LocalQueue {
    async fn publish(&self, message: DispatchMessage) -> Result<(), QueueError> {
        self.sender.send(message).map_err(|_| QueueError::Closed)
    }

    async fn publish_delayed(&self, message: DispatchMessage, delay: Duration) -> Result<(), QueueError> {
        if self.sender.is_closed() {
            return Err(QueueError::Closed);
        }
        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let import_id = message.import_id;
            if sender.send(message).is_err() {
                tracing::warn!(import_id, "queue closed before delayed dispatch was due");
            }
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> DispatchMessage {
        DispatchMessage {
            source_location: "https://storage/a.xml".into(),
            file_format: FileFormat::Xml,
            import_id: 3,
            attempt: 0,
        }
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(message()).unwrap();
        assert_eq!(json["sourceLocation"], "https://storage/a.xml");
        assert_eq!(json["fileFormat"], "xml");
        assert_eq!(json["importId"], 3);

        let parsed: DispatchMessage = serde_json::from_str(
            r#"{"sourceLocation":"https://storage/a.xml","fileFormat":"xml","importId":3}"#,
        )
        .unwrap();
        assert_eq!(parsed, message());
    }

    #[tokio::test]
    async fn test_publish_delivers_in_order() {
        let (queue, mut rx) = LocalQueue::new();
        queue.publish(message()).await.unwrap();
        queue.publish(message().next_attempt()).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().attempt, 0);
        assert_eq!(rx.recv().await.unwrap().attempt, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_publish_waits() {
        let (queue, mut rx) = LocalQueue::new();
        queue
            .publish_delayed(message(), Duration::from_secs(30))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.try_recv().unwrap(), message());
    }

    #[tokio::test]
    async fn test_closed_queue() {
        let (queue, rx) = LocalQueue::new();
        drop(rx);
        assert!(matches!(queue.publish(message()).await, Err(QueueError::Closed)));
        assert!(queue
            .publish_delayed(message(), Duration::from_secs(1))
            .await
            .is_err());
    }
}
