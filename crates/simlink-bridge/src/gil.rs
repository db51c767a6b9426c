//! Interpreter lock guards.
//!
//! Only one host thread may execute interpreter code at a time, while native
//! work must run without stalling the host. Two scope-bound guards arbitrate
//! the lock:
//!
//! - [`ReleaseGuard`]: taken by a host thread entering a long-running native
//!   call. Gives the lock up for the scope and takes it back on drop.
//! - [`AcquireGuard`]: taken by a native thread about to run host code (a
//!   callback). Holds the lock for the scope and hands it back on drop.
//!
//! Both restore the previous state in `Drop`, so normal return, early return
//! and unwinding all leave the lock as they found it. Guards are `!Send` and
//! borrow the [`HostRuntime`], which makes their drop order LIFO per thread.
//!
//! An `AcquireGuard` nested inside a `ReleaseGuard` on the same thread takes
//! the lock back in full before returning, and hands it back before the outer
//! guard restores the original depth.

use std::marker::PhantomData;

use tracing::trace;

use crate::host::HostRuntime;

// ============================================================================
// ReleaseGuard
// ============================================================================

/// RAII guard that keeps the interpreter lock released.
///
/// # Example
///
/// ```ignore
/// let result = {
///     let _unlocked = host.release();
///     world.tick()          // other host threads run meanwhile
/// };                        // lock held again here
/// ```
#[derive(Debug)]
#[must_use = "the lock is reacquired as soon as the guard drops"]
pub struct ReleaseGuard<'h> {
    host: &'h HostRuntime,
    /// Nesting depth given up on entry; 0 if the lock was not held
    depth: usize,
    _marker: PhantomData<*mut ()>,
}

impl<'h> ReleaseGuard<'h> {
    /// Release the lock held by the calling thread.
    ///
    /// If the thread does not hold the lock the guard is inert, unless
    /// [`BridgeConfig::strict_release`](crate::config::BridgeConfig::strict_release)
    /// is set, in which case this panics.
    pub fn new(host: &'h HostRuntime) -> Self {
        let lock = host.lock();
        if !lock.held_by_current_thread() {
            assert!(
                !host.config().strict_release,
                "interpreter lock released by a thread that does not hold it"
            );
            return Self {
                host,
                depth: 0,
                _marker: PhantomData,
            };
        }

        let depth = lock.suspend();
        trace!(host = %host.config().host_name, depth, "released interpreter lock");
        Self {
            host,
            depth,
            _marker: PhantomData,
        }
    }

    /// Whether this guard actually gave the lock up.
    pub fn is_active(&self) -> bool {
        self.depth > 0
    }

    /// Nesting depth that will be restored on drop.
    pub fn suspended_depth(&self) -> usize {
        self.depth
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if self.depth > 0 {
            self.host.lock().resume(self.depth);
            trace!(host = %self.host.config().host_name, depth = self.depth, "reacquired interpreter lock");
        }
    }
}

// ============================================================================
// AcquireGuard
// ============================================================================

/// RAII guard that holds the interpreter lock.
///
/// Reentrant: taking it on a thread that already owns the lock nests one level.
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard drops"]
pub struct AcquireGuard<'h> {
    host: &'h HostRuntime,
    nested: bool,
    _marker: PhantomData<*mut ()>,
}

impl<'h> AcquireGuard<'h> {
    /// Acquire the lock, blocking until it is available.
    ///
    /// # Panics
    ///
    /// If the interpreter has been finalized. Touching a finalized
    /// interpreter is a precondition violation, not a recoverable error.
    pub fn new(host: &'h HostRuntime) -> Self {
        match Self::try_new(host) {
            Some(guard) => guard,
            None => panic!("interpreter lock acquired after the interpreter was finalized"),
        }
    }

    /// Acquire the lock unless the interpreter has been finalized.
    ///
    /// Finalization is checked exactly once; `None` means the lock was not
    /// touched.
    pub fn try_new(host: &'h HostRuntime) -> Option<Self> {
        let lock = host.lock();
        if lock.is_finalized() {
            return None;
        }

        let nested = lock.held_by_current_thread();
        lock.acquire();
        Some(Self {
            host,
            nested,
            _marker: PhantomData,
        })
    }

    /// Whether the lock was already held when this guard was taken.
    pub fn is_nested(&self) -> bool {
        self.nested
    }
}

impl Drop for AcquireGuard<'_> {
    fn drop(&mut self) {
        self.host.lock().release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    use crate::config::BridgeConfig;
    use crate::lock::InterpreterLock;

    fn host_with(lock: &Arc<InterpreterLock>) -> HostRuntime {
        HostRuntime::new(lock.clone())
    }

    #[test]
    fn test_release_guard_restores_lock() {
        let lock = Arc::new(InterpreterLock::new_held());
        let host = host_with(&lock);

        {
            let guard = host.release();
            assert!(guard.is_active());
            assert_eq!(guard.suspended_depth(), 1);
            assert!(!host.is_held());
        }

        assert!(host.is_held());
        assert_eq!(lock.stats().depth, 1);
    }

    #[test]
    fn test_release_guard_restores_nested_depth() {
        let lock = Arc::new(InterpreterLock::new_held());
        let host = host_with(&lock);

        let _outer = host.acquire();
        assert_eq!(lock.stats().depth, 2);
        {
            let guard = host.release();
            assert_eq!(guard.suspended_depth(), 2);
        }
        assert_eq!(lock.stats().depth, 2);
    }

    #[test]
    fn test_release_guard_inert_without_lock() {
        let lock = Arc::new(InterpreterLock::new());
        let host = host_with(&lock);

        let guard = host.release();
        assert!(!guard.is_active());
        drop(guard);

        assert!(!host.is_held());
        assert_eq!(lock.stats().suspensions, 0);
    }

    #[test]
    #[should_panic(expected = "does not hold it")]
    fn test_strict_release_without_lock_panics() {
        let host = HostRuntime::new(Arc::new(InterpreterLock::new()))
            .with_config(BridgeConfig::new().with_strict_release(true));
        let _guard = host.release();
    }

    #[test]
    fn test_release_guard_restores_on_unwind() {
        let lock = Arc::new(InterpreterLock::new_held());
        let host = host_with(&lock);

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _unlocked = host.release();
            panic!("native fault");
        }));

        assert!(result.is_err());
        assert!(host.is_held());
    }

    #[test]
    fn test_acquire_guard_basic() {
        let lock = Arc::new(InterpreterLock::new());
        let host = host_with(&lock);

        {
            let guard = host.acquire();
            assert!(!guard.is_nested());
            assert!(host.is_held());
        }

        assert!(!host.is_held());
        assert_eq!(lock.stats().acquisitions, 1);
        assert_eq!(lock.stats().releases, 1);
    }

    #[test]
    fn test_acquire_guard_nested() {
        let lock = Arc::new(InterpreterLock::new());
        let host = host_with(&lock);

        let gil1 = host.acquire();
        assert!(!gil1.is_nested());
        {
            let gil2 = host.acquire();
            assert!(gil2.is_nested());
            assert_eq!(lock.stats().depth, 2);
        }
        assert_eq!(lock.stats().depth, 1);
        drop(gil1);
        assert!(!host.is_held());
    }

    #[test]
    fn test_acquire_inside_release() {
        let lock = Arc::new(InterpreterLock::new_held());
        let host = host_with(&lock);

        {
            let _unlocked = host.release();
            assert!(!host.is_held());
            {
                let reentry = host.acquire();
                assert!(!reentry.is_nested());
                assert!(host.is_held());
                assert_eq!(lock.stats().depth, 1);
            }
            assert!(!host.is_held());
        }
        assert!(host.is_held());
    }

    #[test]
    #[should_panic(expected = "finalized")]
    fn test_acquire_after_finalize_panics() {
        let lock = Arc::new(InterpreterLock::new());
        lock.finalize();
        let host = host_with(&lock);
        let _guard = host.acquire();
    }

    #[test]
    fn test_try_acquire_after_finalize_leaves_lock_alone() {
        let lock = Arc::new(InterpreterLock::new());
        let host = host_with(&lock);

        {
            let guard = host.try_acquire();
            assert!(guard.is_some());
            assert!(host.is_held());
        }

        lock.finalize();
        let before = lock.stats();
        assert!(host.try_acquire().is_none());
        assert_eq!(lock.stats(), before);
        assert!(!host.is_held());
    }
}
