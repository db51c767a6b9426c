//! Host callables invoked from native threads.
//!
//! [`HostRuntime::make_callback`] turns a host callable into a [`Callback`]:
//! a reference-counted, `Send + Sync` handle any native thread may invoke.
//!
//! ```text
//! make_callback ──validate──▶ Active ──invoke──▶ Invoking ──▶ Active ──…──▶ Released
//!        │
//!        └── not callable: InvalidCallback, no handle built
//! ```
//!
//! Each invocation takes the interpreter lock, converts the payload, calls
//! the host and contains whatever it raises: the fault goes to the host's
//! [`FaultSink`](crate::host::FaultSink) and the native caller sees a normal
//! return. The callable is checked once, at registration.
//!
//! The callable's captured state belongs to the interpreter, so it is dropped
//! with the lock held, when the last handle goes away.

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use smol_str::SmolStr;
use tracing::debug;

use crate::conversion::ToHost;
use crate::error::{BridgeError, BridgeResult};
use crate::host::{ContainedFault, FaultCause, HostRuntime};
use crate::value::{HostFunction, HostValue};

/// Lifecycle state of a callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackState {
    /// Registered and idle
    Active,
    /// At least one invocation is running
    Invoking,
    /// Every handle dropped and the callable released
    Released,
}

impl fmt::Display for CallbackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackState::Active => write!(f, "Active"),
            CallbackState::Invoking => write!(f, "Invoking"),
            CallbackState::Released => write!(f, "Released"),
        }
    }
}

/// Counters shared by the handles and any monitors of one callback.
#[derive(Debug, Default)]
struct CallbackStatus {
    released: AtomicBool,
    in_flight: AtomicUsize,
    invocations: AtomicU64,
    faults: AtomicU64,
}

impl CallbackStatus {
    fn state(&self) -> CallbackState {
        if self.released.load(Ordering::Acquire) {
            CallbackState::Released
        } else if self.in_flight.load(Ordering::Acquire) > 0 {
            CallbackState::Invoking
        } else {
            CallbackState::Active
        }
    }
}

/// Marks one invocation in flight for as long as it lives.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

struct CallbackInner {
    host: HostRuntime,
    name: SmolStr,
    /// `Some` until the last handle drops
    callable: Option<HostFunction>,
    status: Arc<CallbackStatus>,
}

impl Drop for CallbackInner {
    fn drop(&mut self) {
        let host = &self.host;
        let Some(_locked) = host.try_acquire() else {
            // The interpreter owning the callable is gone; leave it alone.
            std::mem::forget(self.callable.take());
            self.status.released.store(true, Ordering::Release);
            debug!(host = %host.config().host_name, callback = %self.name, "leaked callback after finalization");
            return;
        };
        drop(self.callable.take());
        self.status.released.store(true, Ordering::Release);
        debug!(host = %host.config().host_name, callback = %self.name, "released callback");
    }
}

/// Shared handle to a host callable.
///
/// `P` is the native payload type handed to the callable on each invocation.
pub struct Callback<P> {
    inner: Arc<CallbackInner>,
    _payload: PhantomData<fn(P)>,
}

impl<P> Clone for Callback<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            _payload: PhantomData,
        }
    }
}

impl<P> Callback<P> {
    /// Name of the wrapped callable.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn state(&self) -> CallbackState {
        self.inner.status.state()
    }

    /// Number of invocations started, including ones that faulted.
    pub fn invocation_count(&self) -> u64 {
        self.inner.status.invocations.load(Ordering::Relaxed)
    }

    /// Number of invocations whose fault was contained.
    pub fn fault_count(&self) -> u64 {
        self.inner.status.faults.load(Ordering::Relaxed)
    }

    /// Number of live handles sharing the callable.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Observer that outlives the handles and reports `Released` once the
    /// callable is gone.
    pub fn monitor(&self) -> CallbackMonitor {
        CallbackMonitor {
            name: self.inner.name.clone(),
            status: Arc::clone(&self.inner.status),
        }
    }
}

impl<P: ToHost> Callback<P> {
    /// Invoke the host callable with `payload` from any thread.
    ///
    /// Blocks until the interpreter lock is available. Never fails from the
    /// caller's point of view; faults raised by the callable are reported to
    /// the host's fault sink. A panic while converting `payload` belongs to
    /// the native side and propagates to the caller.
    pub fn invoke(&self, payload: P) {
        let inner = &*self.inner;
        let _locked = inner.host.acquire();
        let _in_flight = InFlight::enter(&inner.status.in_flight);
        inner.status.invocations.fetch_add(1, Ordering::Relaxed);

        if let Err(cause) = self.run(payload) {
            inner.status.faults.fetch_add(1, Ordering::Relaxed);
            let fault = ContainedFault {
                host: inner.host.config().host_name.clone(),
                callback: inner.name.clone(),
                cause,
            };
            inner.host.report(&fault);
        }
    }

    fn run(&self, payload: P) -> Result<(), FaultCause> {
        let Some(callable) = self.inner.callable.as_ref() else {
            return Ok(());
        };
        let args = [payload.to_host()];
        let call = || callable.call(&args);

        let outcome = if self.inner.host.config().catch_panics {
            panic::catch_unwind(AssertUnwindSafe(call))
                .map_err(|panicked| FaultCause::Panic(panic_message(panicked.as_ref())))?
        } else {
            call()
        };
        outcome.map(drop).map_err(FaultCause::Exception)
    }

    /// Turn the handle into a plain closure for native subscription points.
    pub fn into_fn(self) -> impl Fn(P) + Clone + Send + Sync + 'static
    where
        P: 'static,
    {
        move |payload| self.invoke(payload)
    }
}

impl<P> fmt::Debug for Callback<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Callback")
            .field("name", &self.inner.name)
            .field("state", &self.state())
            .field("handles", &self.handle_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Weak observer of a callback's lifecycle.
#[derive(Debug, Clone)]
pub struct CallbackMonitor {
    name: SmolStr,
    status: Arc<CallbackStatus>,
}

impl CallbackMonitor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CallbackState {
        self.status.state()
    }

    pub fn is_released(&self) -> bool {
        self.state() == CallbackState::Released
    }

    pub fn invocation_count(&self) -> u64 {
        self.status.invocations.load(Ordering::Relaxed)
    }

    pub fn fault_count(&self) -> u64 {
        self.status.faults.load(Ordering::Relaxed)
    }
}

impl HostRuntime {
    /// Wrap a host callable for invocation from native threads.
    ///
    /// Fails with [`BridgeError::InvalidCallback`] if `value` is not callable;
    /// no handle is created in that case.
    pub fn make_callback<P>(&self, value: HostValue) -> BridgeResult<Callback<P>> {
        let HostValue::Function(callable) = value else {
            return Err(BridgeError::invalid_callback(value.type_name()));
        };

        let name = SmolStr::new(callable.name());
        debug!(host = %self.config().host_name, callback = %name, "registered callback");
        Ok(Callback {
            inner: Arc::new(CallbackInner {
                host: self.clone(),
                name,
                callable: Some(callable),
                status: Arc::new(CallbackStatus::default()),
            }),
            _payload: PhantomData,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use crate::config::BridgeConfig;
    use crate::host::{LockArbiter, RecordingSink};
    use crate::lock::InterpreterLock;
    use crate::value::HostException;

    fn recording_host(lock: &Arc<InterpreterLock>) -> (HostRuntime, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        let host = HostRuntime::new(lock.clone()).with_sink(sink.clone());
        (host, sink)
    }

    fn recorder(name: &str) -> (HostValue, Arc<Mutex<Vec<HostValue>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let record = seen.clone();
        let func = HostFunction::new(name, move |args| {
            record.lock().extend(args.iter().cloned());
            Ok(HostValue::None)
        });
        (func.into(), seen)
    }

    #[test]
    fn test_rejects_non_callable() {
        let lock = Arc::new(InterpreterLock::new_held());
        let (host, _sink) = recording_host(&lock);

        let err = host.make_callback::<f64>(HostValue::Int(3)).unwrap_err();
        assert_eq!(err, BridgeError::invalid_callback("int"));

        let err = host.make_callback::<f64>(HostValue::None).unwrap_err();
        assert!(err.is_invalid_callback());
    }

    #[test]
    fn test_invoke_converts_payload_under_lock() {
        let lock = Arc::new(InterpreterLock::new());
        let (host, sink) = recording_host(&lock);

        let probe = host.clone();
        let held = Arc::new(AtomicBool::new(false));
        let held_in_call = held.clone();
        let func = HostFunction::new("on_measurement", move |_| {
            held_in_call.store(probe.is_held(), Ordering::SeqCst);
            Ok(HostValue::None)
        });

        let callback = host.make_callback::<Vec<f32>>(func.into()).unwrap();
        callback.invoke(vec![0.5, 1.5]);

        assert!(held.load(Ordering::SeqCst));
        assert!(!host.is_held());
        assert_eq!(callback.invocation_count(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_records_payloads() {
        let lock = Arc::new(InterpreterLock::new());
        let (host, _sink) = recording_host(&lock);
        let (func, seen) = recorder("record");

        let callback = host.make_callback::<(u64, f64)>(func).unwrap();
        callback.invoke((1, 0.05));
        callback.invoke((2, 0.10));

        let seen = seen.lock().clone();
        assert_eq!(
            seen,
            vec![(1u64, 0.05f64).to_host(), (2u64, 0.10f64).to_host()]
        );
    }

    #[test]
    fn test_exception_is_contained() {
        let lock = Arc::new(InterpreterLock::new());
        let (host, sink) = recording_host(&lock);
        let func = HostFunction::new("broken", |_| {
            Err(HostException::new("ZeroDivisionError", "division by zero"))
        });

        let callback = host.make_callback::<i32>(func.into()).unwrap();
        callback.invoke(0);
        callback.invoke(1);

        assert_eq!(callback.state(), CallbackState::Active);
        assert_eq!(callback.invocation_count(), 2);
        assert_eq!(callback.fault_count(), 2);
        assert!(!host.is_held());

        let faults = sink.faults();
        assert_eq!(faults.len(), 2);
        assert_eq!(faults[0].callback, "broken");
        assert_eq!(
            faults[0].cause,
            FaultCause::Exception(HostException::new("ZeroDivisionError", "division by zero"))
        );
    }

    #[test]
    fn test_panic_is_contained() {
        let lock = Arc::new(InterpreterLock::new());
        let (host, sink) = recording_host(&lock);
        let func = HostFunction::new("panicky", |_| panic!("sensor buffer overrun"));

        let callback = host.make_callback::<()>(func.into()).unwrap();
        callback.invoke(());

        assert_eq!(callback.state(), CallbackState::Active);
        assert!(!host.is_held());
        assert_eq!(
            sink.faults()[0].cause,
            FaultCause::Panic("sensor buffer overrun".into())
        );
    }

    #[test]
    fn test_panic_propagates_when_not_caught() {
        let lock = Arc::new(InterpreterLock::new());
        let (host, sink) = recording_host(&lock);
        let host = host.with_config(BridgeConfig::new().with_catch_panics(false));
        let func = HostFunction::new("panicky", |_| panic!("boom"));
        let callback = host.make_callback::<()>(func.into()).unwrap();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback.invoke(())));
        assert!(outcome.is_err());
        // Lock and in-flight marker unwound cleanly
        assert!(!host.is_held());
        assert_eq!(callback.state(), CallbackState::Active);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_state_is_invoking_during_call() {
        let lock = Arc::new(InterpreterLock::new());
        let (host, _sink) = recording_host(&lock);

        let monitor_slot: Arc<Mutex<Option<CallbackMonitor>>> = Arc::new(Mutex::new(None));
        let slot = monitor_slot.clone();
        let observed = Arc::new(Mutex::new(None));
        let observed_in_call = observed.clone();
        let func = HostFunction::new("observe", move |_| {
            let state = slot.lock().as_ref().map(CallbackMonitor::state);
            *observed_in_call.lock() = state;
            Ok(HostValue::None)
        });

        let callback = host.make_callback::<()>(func.into()).unwrap();
        *monitor_slot.lock() = Some(callback.monitor());
        callback.invoke(());

        assert_eq!(*observed.lock(), Some(CallbackState::Invoking));
        assert_eq!(callback.state(), CallbackState::Active);
    }

    #[test]
    fn test_release_happens_once_under_lock() {
        struct DropProbe {
            host: HostRuntime,
            held_on_drop: Arc<Mutex<Vec<bool>>>,
        }

        impl Drop for DropProbe {
            fn drop(&mut self) {
                self.held_on_drop.lock().push(self.host.is_held());
            }
        }

        let lock = Arc::new(InterpreterLock::new());
        let (host, _sink) = recording_host(&lock);
        let held_on_drop = Arc::new(Mutex::new(Vec::new()));
        let probe = DropProbe {
            host: host.clone(),
            held_on_drop: held_on_drop.clone(),
        };
        let func = HostFunction::new("probe", move |_| {
            let _keep = &probe;
            Ok(HostValue::None)
        });

        let callback = host.make_callback::<()>(func.into()).unwrap();
        let second = callback.clone();
        let monitor = callback.monitor();
        assert_eq!(callback.handle_count(), 2);

        drop(callback);
        assert_eq!(monitor.state(), CallbackState::Active);
        assert!(held_on_drop.lock().is_empty());

        let before = lock.stats();
        drop(second);
        let after = lock.stats();

        assert!(monitor.is_released());
        assert_eq!(*held_on_drop.lock(), vec![true]);
        assert_eq!(after.acquisitions - before.acquisitions, 1);
        assert_eq!(after.releases - before.releases, 1);
        assert!(!host.is_held());
    }

    #[test]
    fn test_release_nests_when_lock_already_held() {
        let lock = Arc::new(InterpreterLock::new_held());
        let (host, _sink) = recording_host(&lock);
        let (func, _seen) = recorder("record");

        let callback = host.make_callback::<i32>(func).unwrap();
        let monitor = callback.monitor();
        let before = lock.stats();
        drop(callback);

        assert!(monitor.is_released());
        assert_eq!(lock.stats().acquisitions, before.acquisitions);
        assert!(host.is_held());
    }

    #[test]
    fn test_into_fn_from_native_thread() {
        let lock = Arc::new(InterpreterLock::new_held());
        let (host, _sink) = recording_host(&lock);
        let (func, seen) = recorder("on_tick");

        let callback = host.make_callback::<u64>(func).unwrap();
        let monitor = callback.monitor();
        let listener = callback.into_fn();

        let native = {
            let listener = listener.clone();
            thread::spawn(move || listener(42))
        };

        // The host thread lets the native thread in
        host.without_lock(|| native.join().unwrap());
        drop(listener);

        assert_eq!(*seen.lock(), vec![HostValue::Int(42)]);
        assert_eq!(monitor.invocation_count(), 1);
        assert!(monitor.is_released());
    }

    #[test]
    fn test_drop_after_finalization_leaks_callable() {
        let lock = Arc::new(InterpreterLock::new());
        let (host, _sink) = recording_host(&lock);
        let (func, _seen) = recorder("on_shutdown");

        let callback = host.make_callback::<u32>(func).unwrap();
        let monitor = callback.monitor();
        let before = lock.stats();

        lock.finalize();
        drop(callback);

        assert!(monitor.is_released());
        assert_eq!(lock.stats().acquisitions, before.acquisitions);
    }

    /// Lock that reports finalization from its second check onward.
    struct ShutdownRace {
        lock: InterpreterLock,
        checks: AtomicUsize,
    }

    impl LockArbiter for ShutdownRace {
        fn acquire(&self) {
            self.lock.acquire();
        }

        fn release(&self) {
            self.lock.release();
        }

        fn suspend(&self) -> usize {
            self.lock.suspend()
        }

        fn resume(&self, depth: usize) {
            self.lock.resume(depth);
        }

        fn held_by_current_thread(&self) -> bool {
            self.lock.held_by_current_thread()
        }

        fn is_finalized(&self) -> bool {
            self.checks.fetch_add(1, Ordering::SeqCst) > 0
        }
    }

    #[test]
    fn test_drop_checks_finalization_once() {
        let race = Arc::new(ShutdownRace {
            lock: InterpreterLock::new(),
            checks: AtomicUsize::new(0),
        });
        let host = HostRuntime::new(race.clone());
        let (func, _seen) = recorder("on_shutdown");

        let callback = host.make_callback::<u32>(func).unwrap();
        let monitor = callback.monitor();
        drop(callback);

        assert!(monitor.is_released());
        assert_eq!(race.checks.load(Ordering::SeqCst), 1);
        let stats = race.lock.stats();
        assert_eq!((stats.acquisitions, stats.releases), (1, 1));
        assert!(!stats.held);
    }

    struct CorruptFrame;

    impl ToHost for CorruptFrame {
        fn to_host(&self) -> HostValue {
            panic!("corrupt frame")
        }
    }

    #[test]
    fn test_payload_conversion_panic_is_not_a_host_fault() {
        let lock = Arc::new(InterpreterLock::new());
        let (host, sink) = recording_host(&lock);
        let (func, seen) = recorder("on_frame");
        let callback = host.make_callback::<CorruptFrame>(func).unwrap();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback.invoke(CorruptFrame)));

        assert!(outcome.is_err());
        assert!(sink.is_empty());
        assert_eq!(callback.fault_count(), 0);
        assert!(seen.lock().is_empty());
        assert!(!host.is_held());
        assert_eq!(callback.state(), CallbackState::Active);
    }

    #[test]
    fn test_debug_output() {
        let lock = Arc::new(InterpreterLock::new());
        let (host, _sink) = recording_host(&lock);
        let (func, _seen) = recorder("on_collision");
        let callback = host.make_callback::<i32>(func).unwrap();

        let debug = format!("{:?}", callback);
        assert!(debug.contains("on_collision"));
        assert!(debug.contains("Active"));
        assert_eq!(callback.name(), "on_collision");
        assert_eq!(CallbackState::Released.to_string(), "Released");
    }
}
