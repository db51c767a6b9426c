//! Call dispatch without the interpreter lock.
//!
//! A [`Binding`] wraps a native operation of arity 0–5 so the host can call
//! it without stalling other host threads:
//!
//! 1. the interpreter lock is released for the duration of the native call
//! 2. arguments, passed as a tuple, are moved into the operation exactly once
//! 3. the lock is restored, on unwind too, before the result is marshaled
//! 4. the result is converted by the binding's [`ResultShape`]
//!
//! Operations take `&S` ([`NativeFn`]) or `&mut S` ([`NativeFnMut`]). Their
//! result type may not borrow from the receiver; accessors returning a
//! reference go through [`returning_copy`](crate::conversion::returning_copy)
//! first.

use std::fmt;
use std::marker::PhantomData;

use smol_str::SmolStr;
use tracing::trace;

use crate::conversion::{to_optional_value, to_sequence, ToHost};
use crate::error::{BridgeError, BridgeResult};
use crate::host::HostRuntime;
use crate::value::HostValue;

// ============================================================================
// Native operation traits
// ============================================================================

/// A native operation on an immutable receiver, taking `Args` as a tuple.
pub trait NativeFn<S: ?Sized, Args> {
    type Output;

    fn call_native(&self, receiver: &S, args: Args) -> Self::Output;
}

/// A native operation on a mutable receiver, taking `Args` as a tuple.
pub trait NativeFnMut<S: ?Sized, Args> {
    type Output;

    fn call_native_mut(&self, receiver: &mut S, args: Args) -> Self::Output;
}

macro_rules! impl_native_fn {
    ($($arg:ident),*) => {
        impl<S, F, R, $($arg,)*> NativeFn<S, ($($arg,)*)> for F
        where
            S: ?Sized,
            F: Fn(&S, $($arg),*) -> R,
        {
            type Output = R;

            #[allow(non_snake_case)]
            fn call_native(&self, receiver: &S, ($($arg,)*): ($($arg,)*)) -> R {
                self(receiver, $($arg),*)
            }
        }

        impl<S, F, R, $($arg,)*> NativeFnMut<S, ($($arg,)*)> for F
        where
            S: ?Sized,
            F: Fn(&mut S, $($arg),*) -> R,
        {
            type Output = R;

            #[allow(non_snake_case)]
            fn call_native_mut(&self, receiver: &mut S, ($($arg,)*): ($($arg,)*)) -> R {
                self(receiver, $($arg),*)
            }
        }
    };
}

impl_native_fn!();
impl_native_fn!(A1);
impl_native_fn!(A1, A2);
impl_native_fn!(A1, A2, A3);
impl_native_fn!(A1, A2, A3, A4);
impl_native_fn!(A1, A2, A3, A4, A5);

// ============================================================================
// Result shapes
// ============================================================================

/// How a native result becomes a host value.
pub trait ResultShape<R> {
    fn marshal(result: R) -> HostValue;
}

/// The result converted as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsValue;

/// An iterable result converted to a host list; empty stays an empty list.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsList;

/// An `Option` result; absent becomes the host null.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsOptional;

/// An iterable of `Option`s converted to a host list with nulls for gaps.
#[derive(Debug, Clone, Copy, Default)]
pub struct AsListOfOptionals;

impl<R: ToHost> ResultShape<R> for AsValue {
    fn marshal(result: R) -> HostValue {
        result.to_host()
    }
}

impl<I> ResultShape<I> for AsList
where
    I: IntoIterator,
    I::Item: ToHost,
{
    fn marshal(result: I) -> HostValue {
        to_sequence(result)
    }
}

impl<T: ToHost> ResultShape<Option<T>> for AsOptional {
    fn marshal(result: Option<T>) -> HostValue {
        to_optional_value(&result)
    }
}

impl<I, T> ResultShape<I> for AsListOfOptionals
where
    I: IntoIterator<Item = Option<T>>,
    T: ToHost,
{
    fn marshal(result: I) -> HostValue {
        HostValue::List(
            result
                .into_iter()
                .map(|item| to_optional_value(&item))
                .collect(),
        )
    }
}

// ============================================================================
// Binding
// ============================================================================

/// A native operation bound for lock-free dispatch from the host.
pub struct Binding<F, P> {
    host: HostRuntime,
    name: SmolStr,
    op: F,
    _shape: PhantomData<fn() -> P>,
}

impl<F, P> Binding<F, P> {
    pub fn new(host: HostRuntime, name: impl Into<SmolStr>, op: F) -> Self {
        Self {
            host,
            name: name.into(),
            op,
            _shape: PhantomData,
        }
    }

    /// Name the operation was bound under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call on an immutable receiver.
    pub fn call<S, Args>(&self, receiver: &S, args: Args) -> HostValue
    where
        S: ?Sized,
        F: NativeFn<S, Args>,
        P: ResultShape<F::Output>,
    {
        let result = {
            let _unlocked = self.host.release();
            trace!(operation = %self.name, "calling native operation");
            self.op.call_native(receiver, args)
        };
        P::marshal(result)
    }

    /// Call on a mutable receiver.
    pub fn call_mut<S, Args>(&self, receiver: &mut S, args: Args) -> HostValue
    where
        S: ?Sized,
        F: NativeFnMut<S, Args>,
        P: ResultShape<F::Output>,
    {
        let result = {
            let _unlocked = self.host.release();
            trace!(operation = %self.name, "calling native operation");
            self.op.call_native_mut(receiver, args)
        };
        P::marshal(result)
    }

    /// Call a fallible operation on an immutable receiver.
    ///
    /// A native error becomes [`BridgeError::NativeFault`].
    pub fn try_call<S, Args, R, E>(&self, receiver: &S, args: Args) -> BridgeResult<HostValue>
    where
        S: ?Sized,
        F: NativeFn<S, Args, Output = Result<R, E>>,
        E: fmt::Display,
        P: ResultShape<R>,
    {
        let result = {
            let _unlocked = self.host.release();
            trace!(operation = %self.name, "calling native operation");
            self.op.call_native(receiver, args)
        };
        self.finish(result)
    }

    /// Call a fallible operation on a mutable receiver.
    pub fn try_call_mut<S, Args, R, E>(
        &self,
        receiver: &mut S,
        args: Args,
    ) -> BridgeResult<HostValue>
    where
        S: ?Sized,
        F: NativeFnMut<S, Args, Output = Result<R, E>>,
        E: fmt::Display,
        P: ResultShape<R>,
    {
        let result = {
            let _unlocked = self.host.release();
            trace!(operation = %self.name, "calling native operation");
            self.op.call_native_mut(receiver, args)
        };
        self.finish(result)
    }

    fn finish<R, E>(&self, result: Result<R, E>) -> BridgeResult<HostValue>
    where
        E: fmt::Display,
        P: ResultShape<R>,
    {
        result
            .map(P::marshal)
            .map_err(|err| BridgeError::native_fault(self.name.clone(), err.to_string()))
    }
}

impl<F, P> fmt::Debug for Binding<F, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("shape", &std::any::type_name::<P>())
            .finish_non_exhaustive()
    }
}

impl HostRuntime {
    /// Bind a native operation for lock-free dispatch.
    ///
    /// ```ignore
    /// let get_actors = host.bind("get_actors", World::actors, AsList);
    /// let actors = get_actors.call(&world, ());
    /// ```
    pub fn bind<F, P>(&self, name: impl Into<SmolStr>, op: F, _shape: P) -> Binding<F, P> {
        Binding::new(self.clone(), name, op)
    }
}
