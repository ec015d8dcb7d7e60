//! resident-cache: a segmented, concurrent key/value store for caches that
//! keep every key resident in memory while each value may live in one of
//! several representations.
//!
//! The store is a lock-striped hash table. A value slot never holds the
//! cached element directly; it holds a [`Substitute`] — either the element
//! itself (the identity representation) or an opaque proxy produced by a
//! [`SubstituteFactory`] (for example a pointer into a disk store). Because
//! the key mapping never leaves memory, an entry cannot be missed while its
//! value is in flight between representations; the switch is a single atomic
//! "fault" on the slot.
//!
//! Building blocks:
//!
//! - **Segments**: independently locked stripes, each an open-chained hash
//!   table with lock-free reads and a per-stripe read/write lock for
//!   mutations ([`StoreConfig`] controls stripe count, capacity and load
//!   factor).
//! - **Substitute protocol**: [`SubstituteFactory`] encodes fresh elements,
//!   decodes reads, and is handed every displaced representation exactly
//!   once for resource release. [`ResidentStore::fault`] swaps one
//!   representation for another by identity, race-free.
//! - **Sampling**: [`ResidentStore::get_random_sample`] draws entries across
//!   stripes without locking the whole map, for external eviction policies.
//! - **Observation**: ordered [`StoreEventListener`] notifications, per-tier
//!   hit/miss counters ([`TierMetrics`]), weakly consistent iteration
//!   ([`KeyView`], [`ElementView`]), and per-key lock handles ([`KeyLock`]).
//!
//! # Example
//!
//! ```
//! use resident_cache::{Element, IdentityFactory, ResidentStore};
//!
//! #[derive(Clone, Debug, PartialEq)]
//! struct Entry {
//!     key: String,
//!     payload: u64,
//! }
//!
//! impl Element for Entry {
//!     type Key = String;
//!     fn key(&self) -> &String {
//!         &self.key
//!     }
//! }
//!
//! let store = ResidentStore::new(IdentityFactory);
//! store.put(Entry { key: "a".into(), payload: 1 });
//! assert_eq!(store.get(&"a".into()).unwrap().payload, 1);
//! assert_eq!(store.len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod entry;
mod error;
mod factory;
mod iter;
mod listener;
mod lock;
mod metrics;
mod segment;
mod store;
mod sync;
mod writer;

pub use config::StoreConfig;
pub use error::{StoreError, StoreUpdateError};
pub use factory::{Element, IdentityFactory, NoProxy, StoreHandle, Substitute, SubstituteFactory};
pub use iter::{ElementIter, ElementView, KeyIter, KeyView};
pub use listener::StoreEventListener;
pub use lock::{KeyLock, LockType};
pub use metrics::TierMetrics;
pub use segment::Sampled;
pub use store::{spread_hash, ResidentStore, Status};
pub use writer::{CacheEntry, WriterManager};

// Re-exported so callers can hold read guards across calls that return
// references into the store (raw slot access, sampling, iteration).
pub use crossbeam_epoch::Guard;
