//! Small synchronization helpers.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_THREAD_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ID: u64 = NEXT_THREAD_ID.fetch_add(1, Ordering::Relaxed);
}

/// A process-local, non-zero identifier for the current thread.
///
/// Used to record write-lock ownership; zero is reserved for "unowned".
pub(crate) fn current_thread_id() -> u64 {
    THREAD_ID.with(|id| *id)
}
