//! Host runtime seams.
//!
//! The bridge never assumes a particular interpreter. A host supplies:
//!
//! 1. a [`LockArbiter`]: the acquire/release primitive pair of its global lock
//! 2. a [`FaultSink`]: where exceptions contained at the callback boundary go
//!
//! Both are bundled with a [`BridgeConfig`] into a [`HostRuntime`], the handle
//! every guard, dispatch binding and callback is built from.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use smol_str::SmolStr;
use tracing::error;

use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::gil::{AcquireGuard, ReleaseGuard};
use crate::value::HostException;

// ============================================================================
// LockArbiter
// ============================================================================

/// Acquire/release contract of the host's global interpreter lock.
///
/// Implementations track ownership per thread. `acquire` on a thread that
/// already owns the lock nests rather than deadlocking.
pub trait LockArbiter: Send + Sync {
    /// Block until the calling thread owns the lock, or nest one level if it
    /// already does.
    fn acquire(&self);

    /// Undo one `acquire`. The lock is handed back when the last level goes.
    fn release(&self);

    /// Give up every level the calling thread holds and return how many there
    /// were. Returns 0 without effect if the thread does not own the lock.
    fn suspend(&self) -> usize;

    /// Take the lock back at the depth returned by [`LockArbiter::suspend`].
    fn resume(&self, depth: usize);

    /// Whether the calling thread owns the lock.
    fn held_by_current_thread(&self) -> bool;

    /// Whether the interpreter has shut down.
    fn is_finalized(&self) -> bool;
}

// ============================================================================
// Contained faults
// ============================================================================

/// What went wrong inside a host callable.
#[derive(Debug, Clone, PartialEq)]
pub enum FaultCause {
    /// The callable raised a host exception
    Exception(HostException),
    /// The callable panicked
    Panic(String),
}

impl fmt::Display for FaultCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultCause::Exception(exc) => write!(f, "{}", exc),
            FaultCause::Panic(message) => write!(f, "panic: {}", message),
        }
    }
}

/// A fault raised by a host callable during a native-originated invocation,
/// reported instead of propagated.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainedFault {
    /// Host the callback belongs to
    pub host: SmolStr,
    /// Name of the callback that raised
    pub callback: SmolStr,
    /// What it raised
    pub cause: FaultCause,
}

impl ContainedFault {
    /// View this fault as a bridge error.
    pub fn to_error(&self) -> BridgeError {
        BridgeError::contained(self.callback.clone(), self.cause.to_string())
    }
}

impl fmt::Display for ContainedFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] exception in callback '{}': {}",
            self.host, self.callback, self.cause
        )
    }
}

// ============================================================================
// FaultSink
// ============================================================================

/// The host's error-reporting channel for contained faults.
///
/// `report` runs with the interpreter lock held.
pub trait FaultSink: Send + Sync {
    fn report(&self, fault: &ContainedFault);
}

/// Reports contained faults as `tracing` error events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl FaultSink for TracingSink {
    fn report(&self, fault: &ContainedFault) {
        error!(
            host = %fault.host,
            callback = %fault.callback,
            cause = %fault.cause,
            "exception in callback"
        );
    }
}

/// Keeps contained faults in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    faults: Mutex<Vec<ContainedFault>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fault reported so far, oldest first.
    pub fn faults(&self) -> Vec<ContainedFault> {
        self.faults.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.faults.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.faults.lock().is_empty()
    }
}

impl FaultSink for RecordingSink {
    fn report(&self, fault: &ContainedFault) {
        self.faults.lock().push(fault.clone());
    }
}

// ============================================================================
// HostRuntime
// ============================================================================

/// Handle to a host: its lock, its fault sink and the bridge configuration.
///
/// Cloning is cheap; clones share the same lock and sink.
#[derive(Clone)]
pub struct HostRuntime {
    lock: Arc<dyn LockArbiter>,
    sink: Arc<dyn FaultSink>,
    config: Arc<BridgeConfig>,
}

impl HostRuntime {
    /// Create a runtime over `lock`, reporting faults through [`TracingSink`].
    pub fn new(lock: Arc<dyn LockArbiter>) -> Self {
        Self {
            lock,
            sink: Arc::new(TracingSink),
            config: Arc::new(BridgeConfig::default()),
        }
    }

    /// Replace the fault sink.
    pub fn with_sink(mut self, sink: Arc<dyn FaultSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Replace the configuration.
    pub fn with_config(mut self, config: BridgeConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn lock(&self) -> &dyn LockArbiter {
        self.lock.as_ref()
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Whether the calling thread owns the interpreter lock.
    pub fn is_held(&self) -> bool {
        self.lock.held_by_current_thread()
    }

    /// Give up the interpreter lock until the returned guard drops.
    pub fn release(&self) -> ReleaseGuard<'_> {
        ReleaseGuard::new(self)
    }

    /// Hold the interpreter lock until the returned guard drops.
    ///
    /// # Panics
    ///
    /// If the interpreter has been finalized.
    pub fn acquire(&self) -> AcquireGuard<'_> {
        AcquireGuard::new(self)
    }

    /// Hold the interpreter lock until the returned guard drops, or return
    /// `None` without touching the lock if the interpreter has been finalized.
    pub fn try_acquire(&self) -> Option<AcquireGuard<'_>> {
        AcquireGuard::try_new(self)
    }

    /// Run `f` with the interpreter lock released.
    pub fn without_lock<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _unlocked = self.release();
        f()
    }

    /// Run `f` with the interpreter lock held.
    pub fn with_lock<F, T>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _locked = self.acquire();
        f()
    }

    /// Hand a contained fault to the sink. The caller holds the lock.
    pub(crate) fn report(&self, fault: &ContainedFault) {
        self.sink.report(fault);
    }
}

impl fmt::Debug for HostRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostRuntime")
            .field("config", &self.config)
            .field("held", &self.is_held())
            .finish_non_exhaustive()
    }
}
