//! # Simlink Bridge
//!
//! Lock-arbitration and call/callback bridge between a multithreaded native
//! simulation engine and a single-threaded scripting host that enforces a
//! global interpreter lock.
//!
//! ## Overview
//!
//! The bridge keeps three promises at once:
//!
//! - host code never runs without the interpreter lock
//! - native work never runs while holding it
//! - a host callback that outlives its registering scope, or fires on a
//!   foreign thread, is neither leaked nor released without the lock
//!
//! ## Control Flow
//!
//! ```text
//! host thread ── Binding::call ── release lock ── native op ── reacquire ── marshal ──▶ HostValue
//! native thread ── Callback::invoke ── acquire lock ── marshal payload ── host callable ── contain fault
//! ```
//!
//! ## Module Structure
//!
//! - [`host`]: the lock and fault-sink seams and the [`HostRuntime`] handle
//! - [`lock`]: an in-process interpreter lock implementing [`LockArbiter`]
//! - [`gil`]: scope-bound release/acquire guards
//! - [`value`]: host value representations
//! - [`conversion`]: marshaling between native and host values
//! - [`dispatch`]: lock-free dispatch of native operations
//! - [`callback`]: host callables invoked from native threads
//! - [`format`]: diagnostic rendering of native sequences
//! - [`config`]: bridge configuration
//! - [`error`]: error types

pub mod callback;
pub mod config;
pub mod conversion;
pub mod dispatch;
pub mod error;
pub mod format;
pub mod gil;
pub mod host;
pub mod lock;
pub mod value;

// Re-export main types for convenience
pub use callback::{Callback, CallbackMonitor, CallbackState};
pub use config::BridgeConfig;
pub use conversion::{
    duration_from_seconds, returning_copy, returning_copy_1, to_native_vector,
    to_optional_value, to_sequence, FromHost, ToHost,
};
pub use dispatch::{
    AsList, AsListOfOptionals, AsOptional, AsValue, Binding, NativeFn, NativeFnMut, ResultShape,
};
pub use error::{BridgeError, BridgeResult};
pub use format::{display_list, DisplayList, DisplayPair, DisplayShared, DisplaySharedList};
pub use gil::{AcquireGuard, ReleaseGuard};
pub use host::{
    ContainedFault, FaultCause, FaultSink, HostRuntime, LockArbiter, RecordingSink, TracingSink,
};
pub use lock::{InterpreterLock, LockStats};
pub use value::{HostException, HostFunction, HostObject, HostValue};
