//! Write-behind seam.
//!
//! The store does not queue or schedule writes itself; when a caller routes
//! a mutation through [`ResidentStore::put_with_writer`] or
//! [`ResidentStore::remove_with_writer`](crate::ResidentStore::remove_with_writer),
//! the supplied manager is invoked after the in-core mutation commits.
//!
//! [`ResidentStore::put_with_writer`]: crate::ResidentStore::put_with_writer

use crate::factory::Element;

/// A key/element pair describing a removal for the writer manager.
#[derive(Debug, Clone)]
pub struct CacheEntry<E: Element> {
    /// The removed key.
    pub key: E::Key,
    /// The removed element, when a mapping existed.
    pub element: Option<E>,
}

/// External write-behind collaborator.
///
/// Failures are wrapped by the store in
/// [`StoreUpdateError`](crate::StoreUpdateError); the in-core mutation is
/// never rolled back.
pub trait WriterManager<E: Element>: Send + Sync {
    /// Propagate a put.
    fn put(&self, element: &E) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;

    /// Propagate a removal.
    fn remove(&self, entry: CacheEntry<E>) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}
