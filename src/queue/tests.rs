#[cfg(test)]
#[allow(clippy::module_inception)]
mod tests {
  use super::super::{
    Connectivity, OperationStatus, OperationType, QueueError, SyncOperation, SyncQueue,
    QUEUE_STORAGE_KEY, STATE_STORAGE_KEY,
  };
  use crate::clock::ManualClock;
  use crate::storage::{KeyValueStorage, MemoryStorage, SqliteStorage};
  use color_eyre::{eyre::eyre, Report, Result};
  use serde_json::{json, Value};
  use std::sync::atomic::{AtomicBool, Ordering};
  use std::sync::{Arc, Mutex};

  const START: i64 = 1_700_000_000_000;

  fn setup_queue() -> (SyncQueue<MemoryStorage>, ManualClock) {
    let clock = ManualClock::new(START);
    let queue = SyncQueue::new(Arc::new(MemoryStorage::new())).with_clock(clock.clone());
    (queue, clock)
  }

  async fn always_ok(_op: SyncOperation) -> Result<()> {
    Ok(())
  }

  async fn always_fail(op: SyncOperation) -> Result<()> {
    Err(eyre!("remote rejected {}", op.entity_type))
  }

  /// Fails operations whose payload carries `"fail": true`.
  async fn fail_flagged(op: SyncOperation) -> Result<()> {
    if op.payload["fail"] == json!(true) {
      return Err(eyre!("validation failed for {}", op.entity_type));
    }
    Ok(())
  }

  fn find(queue: &SyncQueue<MemoryStorage>, id: &str) -> Option<SyncOperation> {
    queue.operations().into_iter().find(|op| op.id == id)
  }

  /// Memory storage that can be told to reject queue writes or state reads.
  #[derive(Default)]
  struct FlakyStorage {
    inner: MemoryStorage,
    fail_queue_writes: AtomicBool,
    fail_state_reads: AtomicBool,
  }

  impl KeyValueStorage for FlakyStorage {
    fn get(&self, key: &str) -> Result<Option<Value>> {
      if key == STATE_STORAGE_KEY && self.fail_state_reads.load(Ordering::SeqCst) {
        return Err(eyre!("state unavailable"));
      }
      self.inner.get(key)
    }

    fn set(&self, key: &str, value: &Value) -> Result<()> {
      if key == QUEUE_STORAGE_KEY && self.fail_queue_writes.load(Ordering::SeqCst) {
        return Err(eyre!("quota exceeded"));
      }
      self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
      self.inner.remove(key)
    }
  }

  #[tokio::test]
  async fn test_create_then_drain_empties_queue() {
    let (queue, clock) = setup_queue();

    let id = queue
      .enqueue("customers", OperationType::Create, &json!({"name": "Acme"}), None)
      .unwrap();
    assert!(!id.is_empty());
    assert_eq!(queue.get_state().status, OperationStatus::Pending);

    clock.advance(5_000);
    let result = queue.drain(always_ok).await;

    assert!(result.success);
    assert_eq!(result.synced, 1);
    assert_eq!(result.failed, 0);
    assert_eq!(result.pending, 0);

    let stats = queue.get_stats();
    assert_eq!(stats.total_operations, 0);
    assert_eq!(stats.status, OperationStatus::Completed);
    assert_eq!(stats.last_sync_at, Some(START + 5_000));
  }

  #[tokio::test]
  async fn test_drain_runs_in_enqueue_order() {
    let (queue, _) = setup_queue();
    for entity in ["a", "b", "c"] {
      queue
        .enqueue(entity, OperationType::Create, &json!({}), None)
        .unwrap();
    }

    let seen = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
      let seen = Arc::clone(&seen);
      move |op: SyncOperation| {
        let seen = Arc::clone(&seen);
        async move {
          seen.lock().unwrap().push(op.entity_type);
          Ok::<(), Report>(())
        }
      }
    };

    let result = queue.drain(recorder).await;
    assert_eq!(result.synced, 3);
    assert_eq!(*seen.lock().unwrap(), vec!["a", "b", "c"]);
    assert!(queue.operations().is_empty());
  }

  #[tokio::test]
  async fn test_failures_are_isolated() {
    let (queue, _) = setup_queue();
    let a = queue
      .enqueue("orders", OperationType::Create, &json!({"fail": true}), None)
      .unwrap();
    let b = queue
      .enqueue("orders", OperationType::Update, &json!({"qty": 2}), Some("o-2"))
      .unwrap();
    let c = queue
      .enqueue("orders", OperationType::Delete, &json!({"fail": true}), Some("o-3"))
      .unwrap();

    let result = queue.drain(fail_flagged).await;

    assert!(!result.success);
    assert_eq!(result.synced, 1);
    assert_eq!(result.failed, 2);
    assert_eq!(result.pending, 2);

    assert!(find(&queue, &b).is_none());
    for id in [&a, &c] {
      let op = find(&queue, id).unwrap();
      assert_eq!(op.status, OperationStatus::Failed);
      assert_eq!(op.retry_count, 1);
      assert_eq!(op.last_error.as_deref(), Some("validation failed for orders"));
    }

    // Order of the survivors is preserved
    let ids: Vec<String> = queue.operations().into_iter().map(|op| op.id).collect();
    assert_eq!(ids, vec![a, c]);
    assert_eq!(queue.get_state().status, OperationStatus::Pending);
  }

  #[tokio::test]
  async fn test_drain_leaves_failed_operations_to_retry() {
    let (queue, _) = setup_queue();
    let id = queue
      .enqueue("invoices", OperationType::Create, &json!({}), None)
      .unwrap();

    queue.drain(always_fail).await;
    let result = queue.drain(always_ok).await;

    assert!(result.success);
    assert_eq!(result.synced, 0);
    assert_eq!(result.pending, 1);
    assert_eq!(find(&queue, &id).unwrap().retry_count, 1);
  }

  #[tokio::test]
  async fn test_retry_stops_at_max_retries() {
    let (queue, _) = setup_queue();
    let queue = queue.with_max_retries(3);
    assert_eq!(queue.max_retries(), 3);
    let id = queue
      .enqueue("suppliers", OperationType::Create, &json!({}), None)
      .unwrap();

    queue.drain(always_fail).await;
    assert_eq!(find(&queue, &id).unwrap().retry_count, 1);

    for expected in [2, 3] {
      let result = queue.retry_failed_operations(always_fail, 3).await;
      assert_eq!(result.retried, 1);
      assert_eq!(result.failed, 1);
      assert!(!result.success);
      assert_eq!(find(&queue, &id).unwrap().retry_count, expected);
    }

    let result = queue.retry_failed_operations(always_fail, 3).await;
    assert_eq!(result.retried, 0);
    assert!(result.success);

    let op = find(&queue, &id).unwrap();
    assert_eq!(op.retry_count, 3);
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(queue.get_stats().exhausted, 1);
    assert_eq!(queue.exhausted_operations().len(), 1);
  }

  #[tokio::test]
  async fn test_retry_success_removes_operation() {
    let (queue, _) = setup_queue();
    queue
      .enqueue("products", OperationType::Update, &json!({"price": 10}), Some("p-1"))
      .unwrap();
    queue.drain(always_fail).await;

    let result = queue.retry_failed(always_ok).await;
    assert_eq!(result.retried, 1);
    assert_eq!(result.succeeded, 1);
    assert!(result.success);
    assert!(queue.operations().is_empty());
    assert_eq!(queue.get_state().status, OperationStatus::Completed);
  }

  #[tokio::test]
  async fn test_retry_ignores_pending_operations() {
    let (queue, _) = setup_queue();
    queue
      .enqueue("products", OperationType::Create, &json!({}), None)
      .unwrap();

    let result = queue.retry_failed(always_ok).await;
    assert_eq!(result.retried, 0);
    assert_eq!(queue.operations().len(), 1);
  }

  #[tokio::test]
  async fn test_panicking_sync_function_marks_failed() {
    let (queue, _) = setup_queue();
    let id = queue
      .enqueue("stock", OperationType::Create, &json!({}), None)
      .unwrap();

    let result = queue
      .drain(|_op: SyncOperation| async move {
        if true {
          panic!("connection reset");
        }
        Ok::<(), Report>(())
      })
      .await;

    assert_eq!(result.failed, 1);
    let op = find(&queue, &id).unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert!(op.last_error.unwrap().contains("connection reset"));
  }

  #[tokio::test]
  async fn test_empty_drain_keeps_state() {
    let (queue, _) = setup_queue();
    let result = queue.drain(always_ok).await;

    assert!(result.success);
    assert_eq!((result.synced, result.failed, result.pending), (0, 0, 0));
    assert_eq!(queue.get_state().last_sync_at, None);
  }

  #[tokio::test]
  async fn test_drain_resumes_interrupted_operation() {
    let (queue, _) = setup_queue();
    let id = queue
      .enqueue("orders", OperationType::Create, &json!({}), None)
      .unwrap();
    assert!(queue.update_operation_status(&id, OperationStatus::Syncing, None));

    let result = queue.drain(always_ok).await;
    assert_eq!(result.synced, 1);
    assert!(queue.operations().is_empty());
  }

  #[tokio::test]
  async fn test_storage_failure_is_recorded_in_state() {
    let storage = Arc::new(FlakyStorage::default());
    let queue = SyncQueue::new(Arc::clone(&storage));
    queue
      .enqueue("orders", OperationType::Create, &json!({}), None)
      .unwrap();

    storage.fail_queue_writes.store(true, Ordering::SeqCst);
    let result = queue.drain(always_ok).await;

    assert!(!result.success);
    assert_eq!(result.synced, 0);
    assert_eq!(result.pending, 1);

    let state = queue.get_state();
    assert_eq!(state.status, OperationStatus::Failed);
    assert!(state.last_error.unwrap().contains("quota exceeded"));
  }

  #[tokio::test]
  async fn test_retry_storage_failure_is_recorded_in_state() {
    let storage = Arc::new(FlakyStorage::default());
    let queue = SyncQueue::new(Arc::clone(&storage));
    let id = queue
      .enqueue("invoices", OperationType::Create, &json!({}), None)
      .unwrap();
    queue.drain(always_fail).await;

    storage.fail_queue_writes.store(true, Ordering::SeqCst);
    let result = queue.retry_failed(always_ok).await;

    assert!(!result.success);
    assert_eq!((result.retried, result.succeeded), (0, 0));

    let state = queue.get_state();
    assert_eq!(state.status, OperationStatus::Failed);
    assert!(state.last_error.unwrap().contains("quota exceeded"));

    let op = queue.operations().into_iter().find(|op| op.id == id).unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.retry_count, 1);
  }

  #[tokio::test]
  async fn test_unreadable_state_keeps_last_sync_time() {
    let storage = Arc::new(FlakyStorage::default());
    let clock = ManualClock::new(START);
    let queue = SyncQueue::new(Arc::clone(&storage)).with_clock(clock.clone());

    queue
      .enqueue("orders", OperationType::Create, &json!({}), None)
      .unwrap();
    assert!(queue.drain(always_ok).await.success);

    clock.advance(60_000);
    queue
      .enqueue("orders", OperationType::Create, &json!({}), None)
      .unwrap();

    storage.fail_state_reads.store(true, Ordering::SeqCst);
    let result = queue.drain(always_ok).await;
    assert!(!result.success);
    assert_eq!(result.pending, 1);

    storage.fail_state_reads.store(false, Ordering::SeqCst);
    let state = queue.get_state();
    assert_eq!(state.last_sync_at, Some(START));
    assert_eq!(state.status, OperationStatus::Pending);
    assert_eq!(state.last_error, None);
  }

  #[test]
  fn test_enqueue_validation() {
    let (queue, _) = setup_queue();

    let err = queue
      .enqueue("orders", OperationType::Update, &json!({}), None)
      .unwrap_err();
    assert!(matches!(err, QueueError::MissingEntityId(OperationType::Update)));

    assert!(matches!(
      queue.enqueue("orders", OperationType::Delete, &json!({}), Some("")),
      Err(QueueError::MissingEntityId(OperationType::Delete))
    ));
    assert!(matches!(
      queue.enqueue("  ", OperationType::Create, &json!({}), None),
      Err(QueueError::EmptyEntityType)
    ));
    assert!(queue.operations().is_empty());

    let id = queue
      .enqueue("orders", OperationType::Delete, &json!({}), Some("123"))
      .unwrap();
    let op = find(&queue, &id).unwrap();
    assert_eq!(op.entity_id.as_deref(), Some("123"));
    assert_eq!(op.status, OperationStatus::Pending);
    assert_eq!(op.retry_count, 0);
    assert_eq!(op.enqueued_at, START);
  }

  #[test]
  fn test_enqueue_fails_when_queue_cannot_be_persisted() {
    let storage = Arc::new(FlakyStorage::default());
    storage.fail_queue_writes.store(true, Ordering::SeqCst);
    let queue = SyncQueue::new(storage);

    assert!(matches!(
      queue.enqueue("orders", OperationType::Create, &json!({}), None),
      Err(QueueError::Storage(_))
    ));
  }

  #[test]
  fn test_remove_operation_twice() {
    let (queue, _) = setup_queue();
    let id = queue
      .enqueue("orders", OperationType::Create, &json!({}), None)
      .unwrap();

    assert!(queue.remove_operation(&id));
    assert!(!queue.remove_operation(&id));
  }

  #[test]
  fn test_status_updates_follow_state_machine() {
    let (queue, _) = setup_queue();
    let id = queue
      .enqueue("orders", OperationType::Create, &json!({}), None)
      .unwrap();

    assert!(!queue.update_operation_status("missing", OperationStatus::Syncing, None));

    // Not a legal move from pending, left as is
    assert!(queue.update_operation_status(&id, OperationStatus::Failed, Some("nope")));
    assert_eq!(find(&queue, &id).unwrap().status, OperationStatus::Pending);

    assert!(queue.update_operation_status(&id, OperationStatus::Syncing, None));
    assert!(queue.update_operation_status(&id, OperationStatus::Failed, Some("timeout")));
    let op = find(&queue, &id).unwrap();
    assert_eq!(op.status, OperationStatus::Failed);
    assert_eq!(op.retry_count, 1);
    assert_eq!(op.last_error.as_deref(), Some("timeout"));

    assert!(queue.update_operation_status(&id, OperationStatus::Syncing, None));
    assert_eq!(find(&queue, &id).unwrap().last_error, None);

    assert!(queue.update_operation_status(&id, OperationStatus::Completed, None));
    assert!(find(&queue, &id).is_none());
  }

  #[test]
  fn test_clear_queue_resets_state() {
    let (queue, _) = setup_queue();
    queue
      .enqueue("orders", OperationType::Create, &json!({}), None)
      .unwrap();

    assert!(queue.clear_queue());
    assert!(queue.operations().is_empty());
    let state = queue.get_state();
    assert_eq!(state.status, OperationStatus::Completed);
    assert_eq!(state.last_error, None);
  }

  #[test]
  fn test_stats_count_by_status_and_type() {
    let (queue, _) = setup_queue();
    queue
      .enqueue("customers", OperationType::Create, &json!({}), None)
      .unwrap();
    queue
      .enqueue("customers", OperationType::Create, &json!({}), None)
      .unwrap();
    let update = queue
      .enqueue("customers", OperationType::Update, &json!({}), Some("c-1"))
      .unwrap();
    queue
      .enqueue("customers", OperationType::Delete, &json!({}), Some("c-2"))
      .unwrap();
    queue.update_operation_status(&update, OperationStatus::Syncing, None);

    let stats = queue.get_stats();
    assert_eq!(stats.total_operations, 4);
    assert_eq!(stats.by_status.pending, 3);
    assert_eq!(stats.by_status.syncing, 1);
    assert_eq!(stats.by_status.failed, 0);
    assert_eq!(stats.by_type.create, 2);
    assert_eq!(stats.by_type.update, 1);
    assert_eq!(stats.by_type.delete, 1);
    assert_eq!(stats.status, OperationStatus::Pending);
    assert_eq!(stats.last_sync_at, None);
  }

  #[test]
  fn test_is_online_follows_connectivity() {
    let connectivity = Connectivity::new(true);
    let queue =
      SyncQueue::new(Arc::new(MemoryStorage::new())).with_connectivity(connectivity.clone());

    assert!(queue.is_online());
    connectivity.set_online(false);
    assert!(!queue.is_online());
  }

  #[test]
  fn test_queue_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.db");

    let id = {
      let queue = SyncQueue::new(Arc::new(SqliteStorage::open(&path).unwrap()));
      queue
        .enqueue("orders", OperationType::Update, &json!({"qty": 4}), Some("o-9"))
        .unwrap()
    };

    let queue = SyncQueue::new(Arc::new(SqliteStorage::open(&path).unwrap()));
    let ops = queue.operations();
    assert_eq!(ops.len(), 1);
    assert_eq!(ops[0].id, id);
    assert_eq!(ops[0].payload, json!({"qty": 4}));
    assert_eq!(queue.get_state().status, OperationStatus::Pending);
  }
}
