//! In-process interpreter lock.
//!
//! [`InterpreterLock`] is a reentrant, owner-tracking mutex that behaves the
//! way a host interpreter lock does: one thread owns it at a time, the owner
//! may take it again (nesting), and the owner may give up every level at once
//! and later restore the same depth. Hosts with their own lock implement
//! [`LockArbiter`] directly; this type serves embedders without one and the
//! test suite.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::host::LockArbiter;

#[derive(Debug, Default)]
struct LockState {
    owner: Option<ThreadId>,
    depth: usize,
}

/// Reentrant interpreter lock built on `parking_lot`.
#[derive(Debug, Default)]
pub struct InterpreterLock {
    state: Mutex<LockState>,
    available: Condvar,
    finalized: AtomicBool,
    acquisitions: AtomicU64,
    releases: AtomicU64,
    suspensions: AtomicU64,
    resumptions: AtomicU64,
}

impl InterpreterLock {
    /// Create a lock nobody holds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a lock already held by the calling thread, as the host's main
    /// thread holds it once the interpreter has started.
    pub fn new_held() -> Self {
        let lock = Self::new();
        lock.acquire();
        lock
    }

    /// Mark the interpreter as finalized. Later acquisitions are fatal.
    pub fn finalize(&self) {
        self.finalized.store(true, Ordering::Release);
    }

    /// Snapshot of the lock's counters.
    pub fn stats(&self) -> LockStats {
        let state = self.state.lock();
        LockStats {
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            suspensions: self.suspensions.load(Ordering::Relaxed),
            resumptions: self.resumptions.load(Ordering::Relaxed),
            held: state.owner.is_some(),
            depth: state.depth,
        }
    }

    /// Block until nobody owns the lock, then take it at `depth`.
    fn take(&self, depth: usize) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        while state.owner.is_some() {
            self.available.wait(&mut state);
        }
        state.owner = Some(me);
        state.depth = depth;
    }

    fn give_up(&self, state: &mut LockState) {
        state.owner = None;
        state.depth = 0;
        self.available.notify_one();
    }
}

impl LockArbiter for InterpreterLock {
    fn acquire(&self) {
        let me = thread::current().id();
        {
            let mut state = self.state.lock();
            if state.owner == Some(me) {
                state.depth += 1;
                return;
            }
        }
        self.take(1);
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&self) {
        let me = thread::current().id();
        let mut state = self.state.lock();
        assert!(
            state.owner == Some(me),
            "interpreter lock released by a thread that does not hold it"
        );
        state.depth -= 1;
        if state.depth == 0 {
            self.give_up(&mut state);
            self.releases.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn suspend(&self) -> usize {
        let me = thread::current().id();
        let mut state = self.state.lock();
        if state.owner != Some(me) {
            return 0;
        }
        let depth = state.depth;
        self.give_up(&mut state);
        self.suspensions.fetch_add(1, Ordering::Relaxed);
        trace!(depth, "interpreter lock suspended");
        depth
    }

    fn resume(&self, depth: usize) {
        if depth == 0 {
            return;
        }
        self.take(depth);
        self.resumptions.fetch_add(1, Ordering::Relaxed);
        trace!(depth, "interpreter lock resumed");
    }

    fn held_by_current_thread(&self) -> bool {
        self.state.lock().owner == Some(thread::current().id())
    }

    fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }
}

/// Lock usage statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStats {
    /// Times the lock was taken while free by [`LockArbiter::acquire`]
    pub acquisitions: u64,
    /// Times the lock was handed back by [`LockArbiter::release`]
    pub releases: u64,
    /// Times an owner gave up every level at once
    pub suspensions: u64,
    /// Times a suspended owner took the lock back
    pub resumptions: u64,
    /// Whether any thread owns the lock right now
    pub held: bool,
    /// Nesting depth of the current owner
    pub depth: usize,
}

impl fmt::Display for LockStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lock stats: acquires={}, releases={}, suspends={}, resumes={}, held={}, depth={}",
            self.acquisitions,
            self.releases,
            self.suspensions,
            self.resumptions,
            self.held,
            self.depth
        )
    }
}
