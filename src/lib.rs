//! Local persistence core for the ERP client.
//!
//! Two components share one durable key-value store:
//! - [`cache::TtlCache`]: best-effort cache for expensive reads with expiry,
//!   per-entry size limits and optional compression
//! - [`queue::SyncQueue`]: durable queue of local writes replayed against the
//!   remote system through a caller-supplied sync function
//!
//! Both are plain values holding an `Arc` to the storage backend; construct
//! them once and pass them where needed.

pub mod cache;
pub mod clock;
pub mod config;
pub mod logging;
pub mod queue;
pub mod storage;

pub use cache::{create_cache_key, CacheOptions, TtlCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use queue::{Connectivity, OperationStatus, OperationType, SyncOperation, SyncQueue};
pub use storage::{KeyValueStorage, MemoryStorage, SqliteStorage};
