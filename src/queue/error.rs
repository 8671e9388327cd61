use super::operation::OperationType;

/// Errors surfaced by [`SyncQueue::enqueue`](super::SyncQueue::enqueue).
///
/// Everything else the queue does reports failure through its return values
/// and [`SyncState`](super::SyncState).
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
  #[error("Invalid operation type '{0}', expected create, update or delete")]
  InvalidOperationType(String),

  #[error("Invalid operation status '{0}'")]
  InvalidStatus(String),

  #[error("Entity id is required for {0} operations")]
  MissingEntityId(OperationType),

  #[error("Entity type cannot be empty")]
  EmptyEntityType,

  #[error("Failed to serialize operation payload: {0}")]
  Payload(#[from] serde_json::Error),

  #[error("Failed to persist sync queue: {0}")]
  Storage(String),
}
