//! Offline mutation queue.
//!
//! Local writes are recorded as [`SyncOperation`]s and replayed against the
//! remote system by a caller-supplied sync function once connectivity allows.
//! Each operation moves through `pending -> syncing -> completed | failed`;
//! completed operations leave the queue, failed ones stay until retried
//! successfully or removed.

mod connectivity;
mod error;
mod operation;
mod sync_queue;

#[cfg(test)]
mod tests;

pub use connectivity::Connectivity;
pub use error::QueueError;
pub use operation::{
  DrainResult, OperationStatus, OperationType, QueueStats, RetryResult, StatusCounts,
  SyncOperation, SyncState, TypeCounts,
};
pub use sync_queue::{SyncQueue, DEFAULT_MAX_RETRIES, QUEUE_STORAGE_KEY, STATE_STORAGE_KEY};
