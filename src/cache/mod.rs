//! TTL cache for expensive reads.
//!
//! This module provides a best-effort caching layer that:
//! - Expires entries after a per-entry time-to-live
//! - Rejects entries whose serialized form exceeds a size limit
//! - Optionally stores payloads gzip-compressed
//! - Derives stable keys for parameterised requests
//!
//! The cache never fails its caller: any internal error degrades to a miss.

mod codec;
mod entry;
mod keys;
mod store;

pub use entry::{CacheEntry, CacheOptions, CacheStats, DEFAULT_MAX_SIZE_BYTES, DEFAULT_TTL_MS};
pub use keys::create_cache_key;
pub use store::{TtlCache, CACHE_STORAGE_KEY};
