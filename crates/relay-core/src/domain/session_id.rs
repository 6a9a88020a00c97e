//! Thread-safe allocation of session identifiers.
//!
//! Every accepted connection is assigned a [`SessionId`] at accept time.
//! Identifiers are unique for the lifetime of the process, so a log line
//! mentioning session 7 can never refer to two different clients, even
//! long after the first session 7 disconnected.
//!
//! # Thread safety
//!
//! The allocator uses `AtomicU64` internally, so the accept loop and any
//! other task can allocate ids concurrently without a lock and without two
//! callers ever receiving the same value.

use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of one client session, unique for the process lifetime.
///
/// `0` is never handed out by the allocator and can be used by tests as an
/// "unassigned" marker.
pub type SessionId = u64;

/// A thread-safe, monotonically increasing allocator for [`SessionId`]s.
///
/// Ids start at 1 and increment by 1 with each call to [`next`].
///
/// # Examples
///
/// ```rust
/// use relay_core::SessionIdAllocator;
///
/// let alloc = SessionIdAllocator::new();
/// assert_eq!(alloc.next(), 1);
/// assert_eq!(alloc.next(), 2);
/// ```
///
/// [`next`]: SessionIdAllocator::next
pub struct SessionIdAllocator {
    inner: AtomicU64,
}

impl SessionIdAllocator {
    /// Creates a new allocator whose first id is 1.
    pub fn new() -> Self {
        Self {
            inner: AtomicU64::new(1),
        }
    }

    /// Returns the next session id and atomically advances the allocator.
    ///
    /// `Ordering::Relaxed` is sufficient: the id value itself is the only
    /// thing shared, not any memory it guards.
    pub fn next(&self) -> SessionId {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the id the next call to [`next`](Self::next) would produce,
    /// without advancing. Useful for diagnostics only; another task may
    /// have allocated by the time the caller looks at the value.
    pub fn peek(&self) -> SessionId {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SessionIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}
