//! Durable FIFO of pending mutations and the drain/retry passes over it.

use color_eyre::{eyre::eyre, Report, Result};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::connectivity::Connectivity;
use super::error::QueueError;
use super::operation::{
  DrainResult, OperationStatus, OperationType, QueueStats, RetryResult, SyncOperation, SyncState,
};
use crate::clock::{Clock, SystemClock};
use crate::storage::KeyValueStorage;

/// Storage key holding the ordered operation list.
pub const QUEUE_STORAGE_KEY: &str = "erp_sync_queue";

/// Storage key holding the aggregate [`SyncState`].
pub const STATE_STORAGE_KEY: &str = "erp_sync_state";

/// Retry budget used when none is configured.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Result of applying a status change to one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
  Applied,
  Rejected,
  NotFound,
}

/// Per-pass success/failure tally.
#[derive(Debug, Default)]
struct PassTally {
  attempted: usize,
  succeeded: usize,
  failed: usize,
}

/// Durable queue of local mutations awaiting the remote system.
///
/// Operations are drained strictly one at a time in enqueue order: the sync
/// function for one operation is awaited to completion before the next one
/// starts. A failing operation is recorded and skipped, never aborting the
/// pass. Failed operations are only attempted again through
/// [`SyncQueue::retry_failed_operations`].
pub struct SyncQueue<S: KeyValueStorage> {
  storage: Arc<S>,
  clock: Arc<dyn Clock>,
  connectivity: Connectivity,
  max_retries: u32,
}

impl<S: KeyValueStorage> SyncQueue<S> {
  pub fn new(storage: Arc<S>) -> Self {
    Self {
      storage,
      clock: Arc::new(SystemClock),
      connectivity: Connectivity::default(),
      max_retries: DEFAULT_MAX_RETRIES,
    }
  }

  pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
    self.clock = Arc::new(clock);
    self
  }

  pub fn with_connectivity(mut self, connectivity: Connectivity) -> Self {
    self.connectivity = connectivity;
    self
  }

  pub fn with_max_retries(mut self, max_retries: u32) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn max_retries(&self) -> u32 {
    self.max_retries
  }

  /// Record a local write that must reach the remote system.
  ///
  /// Updates and deletes need `entity_id`. Returns the new operation id. This
  /// is the one queue call that fails loudly: a malformed request or a write
  /// that could not be persisted is returned as an error.
  pub fn enqueue<P: Serialize + ?Sized>(
    &self,
    entity_type: &str,
    operation_type: OperationType,
    payload: &P,
    entity_id: Option<&str>,
  ) -> Result<String, QueueError> {
    if entity_type.trim().is_empty() {
      return Err(QueueError::EmptyEntityType);
    }

    let entity_id = entity_id.filter(|id| !id.is_empty());
    if operation_type.requires_entity_id() && entity_id.is_none() {
      return Err(QueueError::MissingEntityId(operation_type));
    }

    let payload = serde_json::to_value(payload)?;
    let operation = SyncOperation {
      id: Uuid::new_v4().to_string(),
      entity_type: entity_type.to_string(),
      operation_type,
      entity_id: entity_id.map(String::from),
      payload,
      enqueued_at: self.clock.now_ms(),
      retry_count: 0,
      status: OperationStatus::Pending,
      last_error: None,
    };
    let id = operation.id.clone();

    let persisted = self.load_queue().and_then(|mut queue| {
      queue.push(operation);
      self.save_queue(&queue)
    });
    if let Err(e) = persisted {
      error!(entity_type, %operation_type, error = %e, "Failed to enqueue operation");
      return Err(QueueError::Storage(e.to_string()));
    }

    match self.load_state() {
      Ok(mut state) if state.status == OperationStatus::Completed => {
        state.status = OperationStatus::Pending;
        if let Err(e) = self.save_state(&state) {
          warn!(error = %e, "Failed to update sync state after enqueue");
        }
      }
      Ok(_) => {}
      Err(e) => warn!(error = %e, "Failed to read sync state after enqueue"),
    }

    debug!(id = %id, entity_type, %operation_type, "Enqueued operation");
    Ok(id)
  }

  /// Move an operation to `status`.
  ///
  /// `Completed` removes the operation; `Failed` records `error` and bumps
  /// the retry count. Changes outside the status machine are logged and
  /// ignored. Returns whether the operation exists.
  pub fn update_operation_status(
    &self,
    id: &str,
    status: OperationStatus,
    error: Option<&str>,
  ) -> bool {
    match self.transition(id, status, error) {
      Ok(Transition::Applied) | Ok(Transition::Rejected) => true,
      Ok(Transition::NotFound) => false,
      Err(e) => {
        warn!(id, %status, error = %e, "Failed to update operation status");
        false
      }
    }
  }

  fn transition(
    &self,
    id: &str,
    status: OperationStatus,
    error: Option<&str>,
  ) -> Result<Transition> {
    let mut queue = self.load_queue()?;

    let Some(index) = queue.iter().position(|op| op.id == id) else {
      return Ok(Transition::NotFound);
    };

    let current = queue[index].status;
    if !current.can_transition_to(status) {
      warn!(id, from = %current, to = %status, "Rejected operation status change");
      return Ok(Transition::Rejected);
    }

    match status {
      OperationStatus::Completed => {
        queue.remove(index);
      }
      OperationStatus::Failed => {
        let op = &mut queue[index];
        op.status = OperationStatus::Failed;
        op.retry_count += 1;
        op.last_error = Some(error.unwrap_or("Unknown error").to_string());
      }
      OperationStatus::Pending | OperationStatus::Syncing => {
        let op = &mut queue[index];
        op.status = status;
        op.last_error = None;
      }
    }

    self.save_queue(&queue)?;
    debug!(id, from = %current, to = %status, "Operation status changed");
    Ok(Transition::Applied)
  }

  /// Push every pending operation through `sync_fn`, oldest first.
  ///
  /// An operation whose sync call returns an error (or panics) is marked
  /// failed and the pass moves on. Storage failures end the pass early and
  /// are recorded in [`SyncState::last_error`]. Never returns an error.
  pub async fn drain<F, Fut>(&self, sync_fn: F) -> DrainResult
  where
    F: Fn(SyncOperation) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    let mut tally = PassTally::default();

    match self.try_drain(&sync_fn, &mut tally).await {
      Ok(result) => result,
      Err(e) => {
        self.record_pass_failure(&e);
        DrainResult {
          success: false,
          synced: tally.succeeded,
          failed: tally.failed,
          pending: self.queued_count(),
        }
      }
    }
  }

  async fn try_drain<F, Fut>(&self, sync_fn: &F, tally: &mut PassTally) -> Result<DrainResult>
  where
    F: Fn(SyncOperation) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    let queue = self.load_queue()?;
    if queue.is_empty() {
      return Ok(DrainResult {
        success: true,
        synced: 0,
        failed: 0,
        pending: 0,
      });
    }

    self.set_aggregate_status(OperationStatus::Syncing)?;

    // Syncing here means a previous pass was interrupted mid-attempt
    let ids: Vec<String> = queue
      .iter()
      .filter(|op| matches!(op.status, OperationStatus::Pending | OperationStatus::Syncing))
      .map(|op| op.id.clone())
      .collect();

    info!(count = ids.len(), queued = queue.len(), "Draining sync queue");
    self.run_pass(&ids, sync_fn, tally).await?;

    let remaining = self.finish_pass(true)?;
    info!(
      synced = tally.succeeded,
      failed = tally.failed,
      remaining,
      "Sync queue drain finished"
    );

    Ok(DrainResult {
      success: tally.failed == 0,
      synced: tally.succeeded,
      failed: tally.failed,
      pending: remaining,
    })
  }

  /// Retry failed operations that still have budget left under the
  /// configured retry limit.
  pub async fn retry_failed<F, Fut>(&self, sync_fn: F) -> RetryResult
  where
    F: Fn(SyncOperation) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    self.retry_failed_operations(sync_fn, self.max_retries).await
  }

  /// Give failed operations with `retry_count < max_retries` another attempt.
  ///
  /// Operations past the limit are left in the queue untouched.
  pub async fn retry_failed_operations<F, Fut>(&self, sync_fn: F, max_retries: u32) -> RetryResult
  where
    F: Fn(SyncOperation) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    let mut tally = PassTally::default();

    match self.try_retry(&sync_fn, max_retries, &mut tally).await {
      Ok(()) => RetryResult {
        success: tally.failed == 0,
        retried: tally.attempted,
        succeeded: tally.succeeded,
        failed: tally.failed,
      },
      Err(e) => {
        self.record_pass_failure(&e);
        RetryResult {
          success: false,
          retried: tally.attempted,
          succeeded: tally.succeeded,
          failed: tally.failed,
        }
      }
    }
  }

  async fn try_retry<F, Fut>(
    &self,
    sync_fn: &F,
    max_retries: u32,
    tally: &mut PassTally,
  ) -> Result<()>
  where
    F: Fn(SyncOperation) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    let ids: Vec<String> = self
      .load_queue()?
      .iter()
      .filter(|op| op.status == OperationStatus::Failed && op.retry_count < max_retries)
      .map(|op| op.id.clone())
      .collect();

    if ids.is_empty() {
      return Ok(());
    }

    info!(count = ids.len(), max_retries, "Retrying failed operations");
    self.run_pass(&ids, sync_fn, tally).await?;
    self.finish_pass(false)?;

    info!(
      succeeded = tally.succeeded,
      failed = tally.failed,
      "Retry pass finished"
    );
    Ok(())
  }

  /// Attempt each operation in `ids` in order.
  async fn run_pass<F, Fut>(&self, ids: &[String], sync_fn: &F, tally: &mut PassTally) -> Result<()>
  where
    F: Fn(SyncOperation) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    for id in ids {
      let Some(outcome) = self.sync_one(id, sync_fn).await? else {
        continue;
      };

      tally.attempted += 1;
      match outcome {
        Ok(()) => tally.succeeded += 1,
        Err(message) => {
          warn!(id = %id, error = %message, "Operation failed to sync");
          tally.failed += 1;
        }
      }
    }
    Ok(())
  }

  /// Run one operation through `sync_fn` and record the outcome.
  ///
  /// `Ok(None)` when the operation is gone or not in a syncable state. The
  /// inner result carries the sync error message.
  async fn sync_one<F, Fut>(
    &self,
    id: &str,
    sync_fn: &F,
  ) -> Result<Option<std::result::Result<(), String>>>
  where
    F: Fn(SyncOperation) -> Fut,
    Fut: Future<Output = Result<()>>,
  {
    if self.transition(id, OperationStatus::Syncing, None)? != Transition::Applied {
      return Ok(None);
    }

    let Some(operation) = self.load_queue()?.into_iter().find(|op| op.id == id) else {
      return Ok(None);
    };

    let outcome = match AssertUnwindSafe(sync_fn(operation)).catch_unwind().await {
      Ok(Ok(())) => Ok(()),
      Ok(Err(e)) => Err(e.to_string()),
      Err(panic) => Err(panic_message(panic.as_ref())),
    };

    match &outcome {
      Ok(()) => self.transition(id, OperationStatus::Completed, None)?,
      Err(message) => self.transition(id, OperationStatus::Failed, Some(message.as_str()))?,
    };

    Ok(Some(outcome))
  }

  /// Recompute the aggregate status from what is left in the queue.
  fn finish_pass(&self, record_sync_time: bool) -> Result<usize> {
    let remaining = self.load_queue()?.len();
    let mut state = self.load_state()?;

    state.status = if remaining == 0 {
      OperationStatus::Completed
    } else {
      OperationStatus::Pending
    };
    state.last_error = None;
    if record_sync_time {
      state.last_sync_at = Some(self.clock.now_ms());
    }

    self.save_state(&state)?;
    Ok(remaining)
  }

  fn record_pass_failure(&self, e: &Report) {
    error!(error = %e, "Sync pass failed");

    let mut state = match self.load_state() {
      Ok(state) => state,
      Err(load_err) => {
        warn!(error = %load_err, "Failed to read sync state, failure not recorded");
        return;
      }
    };
    state.status = OperationStatus::Failed;
    state.last_error = Some(e.to_string());

    if let Err(e) = self.save_state(&state) {
      warn!(error = %e, "Failed to record sync failure");
    }
  }

  fn set_aggregate_status(&self, status: OperationStatus) -> Result<()> {
    let mut state = self.load_state()?;
    state.status = status;
    self.save_state(&state)
  }

  /// Remove an operation regardless of its state. Returns whether it existed.
  pub fn remove_operation(&self, id: &str) -> bool {
    let result = self.load_queue().and_then(|mut queue| {
      let before = queue.len();
      queue.retain(|op| op.id != id);
      if queue.len() == before {
        return Ok(false);
      }
      self.save_queue(&queue)?;
      Ok(true)
    });

    result.unwrap_or_else(|e| {
      warn!(id, error = %e, "Failed to remove operation");
      false
    })
  }

  /// Drop every queued operation and reset the sync state.
  pub fn clear_queue(&self) -> bool {
    let result = self
      .storage
      .remove(QUEUE_STORAGE_KEY)
      .and_then(|()| self.save_state(&SyncState::default()));

    match result {
      Ok(()) => {
        info!("Sync queue cleared");
        true
      }
      Err(e) => {
        warn!(error = %e, "Failed to clear sync queue");
        false
      }
    }
  }

  pub fn get_state(&self) -> SyncState {
    self.load_state().unwrap_or_else(|e| {
      warn!(error = %e, "Failed to read sync state");
      SyncState::default()
    })
  }

  pub fn get_stats(&self) -> QueueStats {
    let operations = self.operations();
    QueueStats::collect(&operations, &self.get_state(), self.max_retries)
  }

  /// Snapshot of all queued operations in enqueue order.
  pub fn operations(&self) -> Vec<SyncOperation> {
    self.load_queue().unwrap_or_else(|e| {
      warn!(error = %e, "Failed to read sync queue");
      Vec::new()
    })
  }

  /// Failed operations that are out of retry budget.
  pub fn exhausted_operations(&self) -> Vec<SyncOperation> {
    self
      .operations()
      .into_iter()
      .filter(|op| op.is_exhausted(self.max_retries))
      .collect()
  }

  /// Last reported connectivity. Advisory: draining does not check it.
  pub fn is_online(&self) -> bool {
    self.connectivity.is_online()
  }

  /// Run callbacks on online/offline transitions, typically to trigger
  /// [`SyncQueue::drain`] when the connection comes back.
  pub fn add_connectivity_listeners<On, Off>(
    &self,
    on_online: On,
    on_offline: Off,
  ) -> JoinHandle<()>
  where
    On: Fn() + Send + 'static,
    Off: Fn() + Send + 'static,
  {
    self.connectivity.add_listeners(on_online, on_offline)
  }

  fn queued_count(&self) -> usize {
    self.load_queue().map(|queue| queue.len()).unwrap_or(0)
  }

  fn load_queue(&self) -> Result<Vec<SyncOperation>> {
    match self.storage.get(QUEUE_STORAGE_KEY)? {
      Some(value) => {
        serde_json::from_value(value).map_err(|e| eyre!("Failed to deserialize sync queue: {}", e))
      }
      None => Ok(Vec::new()),
    }
  }

  fn save_queue(&self, queue: &[SyncOperation]) -> Result<()> {
    let value =
      serde_json::to_value(queue).map_err(|e| eyre!("Failed to serialize sync queue: {}", e))?;
    self.storage.set(QUEUE_STORAGE_KEY, &value)
  }

  fn load_state(&self) -> Result<SyncState> {
    match self.storage.get(STATE_STORAGE_KEY)? {
      Some(value) => {
        serde_json::from_value(value).map_err(|e| eyre!("Failed to deserialize sync state: {}", e))
      }
      None => Ok(SyncState::default()),
    }
  }

  fn save_state(&self, state: &SyncState) -> Result<()> {
    let value =
      serde_json::to_value(state).map_err(|e| eyre!("Failed to serialize sync state: {}", e))?;
    self.storage.set(STATE_STORAGE_KEY, &value)
  }
}

impl<S: KeyValueStorage> Clone for SyncQueue<S> {
  fn clone(&self) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      clock: Arc::clone(&self.clock),
      connectivity: self.connectivity.clone(),
      max_retries: self.max_retries,
    }
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    format!("sync function panicked: {}", message)
  } else if let Some(message) = panic.downcast_ref::<String>() {
    format!("sync function panicked: {}", message)
  } else {
    "sync function panicked".to_string()
  }
}
