//! Error types for store operations.

use thiserror::Error;

/// Errors surfaced by the store's adapter surfaces.
///
/// The hot paths report their outcomes through boolean and `Option` returns;
/// this type only covers the operations whose contract is to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// The operation is not supported by this surface, e.g. querying read
    /// lock ownership on a [`KeyLock`](crate::KeyLock).
    #[error("operation not supported")]
    Unsupported,
}

/// A writer manager failed while propagating a mutation.
///
/// The in-core mutation is never rolled back; `update_succeeded` records
/// whether it took place so callers can reconcile the write-behind state.
#[derive(Debug, Error)]
#[error("writer manager failed (store mutation succeeded: {update_succeeded})")]
pub struct StoreUpdateError {
    /// Whether the in-core mutation committed before the writer failed.
    pub update_succeeded: bool,
    /// The writer manager's failure.
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_update_error_displays_flag() {
        let err = StoreUpdateError {
            update_succeeded: true,
            source: "disk full".into(),
        };
        let text = err.to_string();
        assert!(text.contains("true"), "{text}");
        assert!(std::error::Error::source(&err).is_some());
    }
}
