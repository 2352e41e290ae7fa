use async_trait::async_trait;

use crate::model::{MessageId, QueueMessage};
use crate::StorageResult;

/// A named-queue transport with visibility timeouts.
///
/// A message that is read but neither archived nor deleted becomes visible again once its
/// timeout lapses, so delivery is at least once.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    async fn read(
        &self,
        queue: &str,
        visibility_timeout_secs: u64,
        n: usize,
    ) -> StorageResult<Vec<QueueMessage>>;

    /// Returns `false` when the message was not (or no longer) in the queue.
    async fn archive(&self, queue: &str, msg_id: MessageId) -> StorageResult<bool>;

    async fn delete(&self, queue: &str, msg_id: MessageId) -> StorageResult<bool>;

    async fn send(&self, queue: &str, message: serde_json::Value) -> StorageResult<MessageId>;

    async fn send_batch(
        &self,
        queue: &str,
        messages: Vec<serde_json::Value>,
    ) -> StorageResult<Vec<MessageId>>;
}
