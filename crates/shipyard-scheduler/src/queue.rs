//! Queue source adapters.
//!
//! Each backend shape gets its own adapter onto [`QueueSource`]. Adapters
//! pass straight through to the backend: no buffering, no retries.

use async_trait::async_trait;
use shipyard_core::{QueueMessage, QueueSource, Result};

/// A message from a message-oriented backend (receive/delete).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMessage {
    /// Handle required to delete this delivery of the message.
    pub receipt_handle: String,
    pub body: String,
}

/// Backends that hand out raw message bodies with receipt handles.
#[async_trait]
pub trait MessageBackend: Send + Sync {
    async fn receive_message(&self) -> Result<Option<RawMessage>>;

    async fn delete_message(&self, receipt_handle: &str) -> Result<()>;
}

/// A job from a job-oriented backend (next/remove).
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedJob {
    pub id: String,
    pub data: serde_json::Value,
}

/// Backends that hand out structured jobs by id.
#[async_trait]
pub trait JobBackend: Send + Sync {
    async fn next_job(&self) -> Result<Option<QueuedJob>>;

    async fn remove_job(&self, job_id: &str) -> Result<()>;
}

/// Adapts a [`MessageBackend`] to [`QueueSource`].
pub struct MessageQueueSource<B> {
    name: String,
    backend: B,
}

impl<B: MessageBackend> MessageQueueSource<B> {
    pub fn new(name: impl Into<String>, backend: B) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }
}

#[async_trait]
impl<B: MessageBackend> QueueSource for MessageQueueSource<B> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll_for_message(&self) -> Result<Option<QueueMessage>> {
        let Some(raw) = self.backend.receive_message().await? else {
            return Ok(None);
        };

        // Bodies that are not JSON are kept as strings and fail extraction later.
        let payload = match serde_json::from_str(&raw.body) {
            Ok(value) => value,
            Err(_) => serde_json::Value::String(raw.body),
        };

        Ok(Some(QueueMessage {
            id: raw.receipt_handle,
            payload,
        }))
    }

    async fn acknowledge(&self, message: &QueueMessage) -> Result<()> {
        self.backend.delete_message(&message.id).await
    }
}

/// Adapts a [`JobBackend`] to [`QueueSource`].
pub struct JobQueueSource<B> {
    name: String,
    backend: B,
}

impl<B: JobBackend> JobQueueSource<B> {
    pub fn new(name: impl Into<String>, backend: B) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }
}

#[async_trait]
impl<B: JobBackend> QueueSource for JobQueueSource<B> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn poll_for_message(&self) -> Result<Option<QueueMessage>> {
        Ok(self.backend.next_job().await?.map(|job| QueueMessage {
            id: job.id,
            payload: job.data,
        }))
    }

    async fn acknowledge(&self, message: &QueueMessage) -> Result<()> {
        self.backend.remove_job(&message.id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipyard_core::Error;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeMessages {
        pending: Mutex<Vec<RawMessage>>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl MessageBackend for FakeMessages {
        async fn receive_message(&self) -> Result<Option<RawMessage>> {
            Ok(self.pending.lock().unwrap().pop())
        }

        async fn delete_message(&self, receipt_handle: &str) -> Result<()> {
            self.deleted.lock().unwrap().push(receipt_handle.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeJobs {
        pending: Mutex<Vec<QueuedJob>>,
        removed: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JobBackend for FakeJobs {
        async fn next_job(&self) -> Result<Option<QueuedJob>> {
            Ok(self.pending.lock().unwrap().pop())
        }

        async fn remove_job(&self, job_id: &str) -> Result<()> {
            self.removed.lock().unwrap().push(job_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_message_source_round_trip() {
        let backend = FakeMessages::default();
        backend.pending.lock().unwrap().push(RawMessage {
            receipt_handle: "receipt-1".to_string(),
            body: r#"{"environment":[{"name":"OVERRIDE_A","value":"Value A"}]}"#.to_string(),
        });
        let source = MessageQueueSource::new("sqs", backend);

        let message = source.poll_for_message().await.unwrap().unwrap();
        assert_eq!(message.id, "receipt-1");

        let payload = source.extract_payload(&message).unwrap();
        assert_eq!(payload.environment[0].name, "OVERRIDE_A");
        assert_eq!(payload.environment[0].value, "Value A");

        source.acknowledge(&message).await.unwrap();
        assert_eq!(*source.backend.deleted.lock().unwrap(), vec!["receipt-1"]);

        assert!(source.poll_for_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_message_source_non_json_body() {
        let backend = FakeMessages::default();
        backend.pending.lock().unwrap().push(RawMessage {
            receipt_handle: "receipt-1".to_string(),
            body: "not json".to_string(),
        });
        let source = MessageQueueSource::new("sqs", backend);

        let message = source.poll_for_message().await.unwrap().unwrap();
        let err = source.extract_payload(&message).unwrap_err();
        assert!(matches!(err, Error::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_job_source_round_trip() {
        let backend = FakeJobs::default();
        backend.pending.lock().unwrap().push(QueuedJob {
            id: "job-1".to_string(),
            data: serde_json::json!({ "environment": [] }),
        });
        let source = JobQueueSource::new("jobs", backend);
        assert_eq!(source.name(), "jobs");

        let message = source.poll_for_message().await.unwrap().unwrap();
        assert_eq!(message.id, "job-1");
        assert!(source.extract_payload(&message).unwrap().environment.is_empty());

        source.acknowledge(&message).await.unwrap();
        assert_eq!(*source.backend.removed.lock().unwrap(), vec!["job-1"]);
    }
}
