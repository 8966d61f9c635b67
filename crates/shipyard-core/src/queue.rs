//! Queue source trait and messages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{Error, JobPayload, Result};

/// A message fetched from a queue source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    /// Backend handle used to acknowledge the message.
    pub id: String,
    pub payload: serde_json::Value,
}

/// Uniform view over a work queue backend.
#[async_trait]
pub trait QueueSource: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Fetch the next available message, if any.
    async fn poll_for_message(&self) -> Result<Option<QueueMessage>>;

    /// Mark `message` as consumed so it is not redelivered.
    async fn acknowledge(&self, message: &QueueMessage) -> Result<()>;

    /// Decode the job specification carried by `message`.
    fn extract_payload(&self, message: &QueueMessage) -> Result<JobPayload> {
        serde_json::from_value(message.payload.clone())
            .map_err(|e| Error::InvalidPayload(e.to_string()))
    }
}
