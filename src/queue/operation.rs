//! Queued mutation records and the status machine that governs them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use super::error::QueueError;

/// Kind of mutation to apply remotely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
  Create,
  Update,
  Delete,
}

impl OperationType {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationType::Create => "create",
      OperationType::Update => "update",
      OperationType::Delete => "delete",
    }
  }

  /// Updates and deletes address an existing entity.
  pub fn requires_entity_id(&self) -> bool {
    matches!(self, OperationType::Update | OperationType::Delete)
  }
}

impl FromStr for OperationType {
  type Err = QueueError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    match value {
      "create" => Ok(OperationType::Create),
      "update" => Ok(OperationType::Update),
      "delete" => Ok(OperationType::Delete),
      other => Err(QueueError::InvalidOperationType(other.to_string())),
    }
  }
}

impl fmt::Display for OperationType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

/// Lifecycle state of a queued operation, also used for the queue as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
  Pending,
  Syncing,
  Completed,
  Failed,
}

impl OperationStatus {
  pub fn as_str(&self) -> &'static str {
    match self {
      OperationStatus::Pending => "pending",
      OperationStatus::Syncing => "syncing",
      OperationStatus::Completed => "completed",
      OperationStatus::Failed => "failed",
    }
  }

  /// Whether an operation in this state may move to `next`.
  ///
  /// `Syncing -> Syncing` covers an attempt that was interrupted before its
  /// outcome was recorded and is started again.
  pub fn can_transition_to(&self, next: OperationStatus) -> bool {
    use OperationStatus::*;
    matches!(
      (*self, next),
      (Pending, Syncing)
        | (Syncing, Syncing)
        | (Syncing, Completed)
        | (Syncing, Failed)
        | (Failed, Syncing)
    )
  }
}

impl FromStr for OperationStatus {
  type Err = QueueError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    match value {
      "pending" => Ok(OperationStatus::Pending),
      "syncing" => Ok(OperationStatus::Syncing),
      "completed" => Ok(OperationStatus::Completed),
      "failed" => Ok(OperationStatus::Failed),
      other => Err(QueueError::InvalidStatus(other.to_string())),
    }
  }
}

impl fmt::Display for OperationStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.pad(self.as_str())
  }
}

/// A local write waiting to reach the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOperation {
  pub id: String,
  /// Target collection (e.g. "customers")
  pub entity_type: String,
  pub operation_type: OperationType,
  /// Present for updates and deletes
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub entity_id: Option<String>,
  pub payload: Value,
  pub enqueued_at: i64,
  pub retry_count: u32,
  pub status: OperationStatus,
  /// Set only while `status` is `Failed`
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub last_error: Option<String>,
}

impl SyncOperation {
  /// Failed and out of retry budget.
  pub fn is_exhausted(&self, max_retries: u32) -> bool {
    self.status == OperationStatus::Failed && self.retry_count >= max_retries
  }
}

/// Aggregate status of the queue, persisted next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
  /// Last time a drain pass ran to the end (ms since epoch)
  #[serde(default)]
  pub last_sync_at: Option<i64>,
  pub status: OperationStatus,
  /// Last pass-level failure, distinct from per-operation errors
  #[serde(default)]
  pub last_error: Option<String>,
}

impl Default for SyncState {
  fn default() -> Self {
    Self {
      last_sync_at: None,
      status: OperationStatus::Completed,
      last_error: None,
    }
  }
}

/// Outcome of [`SyncQueue::drain`](super::SyncQueue::drain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DrainResult {
  pub success: bool,
  pub synced: usize,
  pub failed: usize,
  /// Operations still queued after the pass
  pub pending: usize,
}

/// Outcome of [`SyncQueue::retry_failed_operations`](super::SyncQueue::retry_failed_operations).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetryResult {
  pub success: bool,
  pub retried: usize,
  pub succeeded: usize,
  pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
  pub pending: usize,
  pub syncing: usize,
  pub failed: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TypeCounts {
  pub create: usize,
  pub update: usize,
  pub delete: usize,
}

/// Diagnostic snapshot of the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
  pub total_operations: usize,
  pub by_status: StatusCounts,
  pub by_type: TypeCounts,
  /// Failed operations that will no longer be retried
  pub exhausted: usize,
  pub last_sync_at: Option<i64>,
  pub status: OperationStatus,
}

impl QueueStats {
  pub(crate) fn collect(operations: &[SyncOperation], state: &SyncState, max_retries: u32) -> Self {
    let mut by_status = StatusCounts::default();
    let mut by_type = TypeCounts::default();
    let mut exhausted = 0;

    for op in operations {
      match op.status {
        OperationStatus::Pending => by_status.pending += 1,
        OperationStatus::Syncing => by_status.syncing += 1,
        OperationStatus::Failed => by_status.failed += 1,
        OperationStatus::Completed => {}
      }
      match op.operation_type {
        OperationType::Create => by_type.create += 1,
        OperationType::Update => by_type.update += 1,
        OperationType::Delete => by_type.delete += 1,
      }
      if op.is_exhausted(max_retries) {
        exhausted += 1;
      }
    }

    Self {
      total_operations: operations.len(),
      by_status,
      by_type,
      exhausted,
      last_sync_at: state.last_sync_at,
      status: state.status,
    }
  }
}
