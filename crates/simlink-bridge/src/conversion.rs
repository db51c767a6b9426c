//! Value Marshaling
//!
//! Conversion between native values and [`HostValue`]s.
//!
//! ## Traits
//!
//! - `ToHost`: native → host, infallible
//! - `FromHost`: host → native, fallible with a `TypeMismatch` (or
//!   `NumericOverflow`) naming what was expected
//!
//! ## Adapters
//!
//! - [`to_optional_value`]: absent → host null, present → converted value
//! - [`to_sequence`]: element-wise, order and duplicates preserved, empty
//!   input gives an empty host list, never null
//! - [`to_native_vector`]: host list → `Vec<T>`, all or nothing
//! - [`returning_copy`] / [`returning_copy_1`]: turn a by-reference accessor
//!   into one returning an owned copy, so a result never borrows native
//!   state across a lock release
//!
//! Conversions build host values, so call them with the interpreter lock
//! held. The dispatch and callback layers already do.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use smol_str::SmolStr;

use crate::error::{BridgeError, BridgeResult};
use crate::value::{HostFunction, HostObject, HostValue};

// ============================================================================
// ToHost
// ============================================================================

/// Trait for converting native values to host values.
///
/// Conversion is infallible, and lossy in one place: `u64`, `usize` and
/// `isize` values outside the `i64` range become a [`HostValue::Float`],
/// which loses precision and does not convert back to the integer type.
pub trait ToHost {
    /// Convert this value to a host value.
    fn to_host(&self) -> HostValue;
}

impl ToHost for () {
    fn to_host(&self) -> HostValue {
        HostValue::None
    }
}

impl ToHost for bool {
    fn to_host(&self) -> HostValue {
        HostValue::Bool(*self)
    }
}

macro_rules! int_to_host {
    ($($ty:ty),*) => {$(
        impl ToHost for $ty {
            fn to_host(&self) -> HostValue {
                HostValue::Int(i64::from(*self))
            }
        }
    )*};
}

int_to_host!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! wide_int_to_host {
    ($($ty:ty),*) => {$(
        impl ToHost for $ty {
            fn to_host(&self) -> HostValue {
                // Lossy past i64, see `ToHost`
                match i64::try_from(*self) {
                    Ok(n) => HostValue::Int(n),
                    Err(_) => HostValue::Float(*self as f64),
                }
            }
        }
    )*};
}

wide_int_to_host!(u64, usize, isize);

impl ToHost for f32 {
    fn to_host(&self) -> HostValue {
        HostValue::Float(f64::from(*self))
    }
}

impl ToHost for f64 {
    fn to_host(&self) -> HostValue {
        HostValue::Float(*self)
    }
}

impl ToHost for str {
    fn to_host(&self) -> HostValue {
        HostValue::Str(SmolStr::new(self))
    }
}

impl ToHost for String {
    fn to_host(&self) -> HostValue {
        HostValue::Str(SmolStr::new(self))
    }
}

impl ToHost for SmolStr {
    fn to_host(&self) -> HostValue {
        HostValue::Str(self.clone())
    }
}

impl ToHost for HostValue {
    fn to_host(&self) -> HostValue {
        self.clone()
    }
}

impl ToHost for HostObject {
    fn to_host(&self) -> HostValue {
        HostValue::Object(self.clone())
    }
}

impl ToHost for Duration {
    fn to_host(&self) -> HostValue {
        HostValue::Float(self.as_secs_f64())
    }
}

impl<T: ToHost + ?Sized> ToHost for &T {
    fn to_host(&self) -> HostValue {
        (**self).to_host()
    }
}

impl<T: ToHost + ?Sized> ToHost for Box<T> {
    fn to_host(&self) -> HostValue {
        (**self).to_host()
    }
}

/// Shared native aggregates marshal through the pointee.
impl<T: ToHost + ?Sized> ToHost for Arc<T> {
    fn to_host(&self) -> HostValue {
        (**self).to_host()
    }
}

impl<T: ToHost> ToHost for Option<T> {
    fn to_host(&self) -> HostValue {
        to_optional_value(self)
    }
}

impl<T: ToHost> ToHost for Vec<T> {
    fn to_host(&self) -> HostValue {
        to_sequence(self)
    }
}

impl<T: ToHost> ToHost for [T] {
    fn to_host(&self) -> HostValue {
        to_sequence(self)
    }
}

impl<A: ToHost, B: ToHost> ToHost for (A, B) {
    fn to_host(&self) -> HostValue {
        HostValue::Tuple(vec![self.0.to_host(), self.1.to_host()])
    }
}

impl<A: ToHost, B: ToHost, C: ToHost> ToHost for (A, B, C) {
    fn to_host(&self) -> HostValue {
        HostValue::Tuple(vec![self.0.to_host(), self.1.to_host(), self.2.to_host()])
    }
}

impl<K: AsRef<str>, V: ToHost> ToHost for HashMap<K, V> {
    fn to_host(&self) -> HostValue {
        HostValue::Dict(
            self.iter()
                .map(|(k, v)| (SmolStr::new(k.as_ref()), v.to_host()))
                .collect(),
        )
    }
}

impl<K: AsRef<str>, V: ToHost> ToHost for IndexMap<K, V> {
    fn to_host(&self) -> HostValue {
        HostValue::Dict(
            self.iter()
                .map(|(k, v)| (SmolStr::new(k.as_ref()), v.to_host()))
                .collect(),
        )
    }
}

// ============================================================================
// Adapters
// ============================================================================

/// Convert a native optional: absent becomes the host null.
pub fn to_optional_value<T: ToHost>(optional: &Option<T>) -> HostValue {
    match optional {
        Some(value) => value.to_host(),
        None => HostValue::None,
    }
}

/// Convert a native sequence element-wise into a host list.
pub fn to_sequence<I>(items: I) -> HostValue
where
    I: IntoIterator,
    I::Item: ToHost,
{
    HostValue::List(items.into_iter().map(|item| item.to_host()).collect())
}

/// Extract a host list into a native vector.
///
/// Only lists are accepted, so [`to_sequence`] gives back the same value.
/// Fails at the first element that does not convert to `T`; the error names
/// its index and nothing is returned.
pub fn to_native_vector<T: FromHost>(value: &HostValue) -> BridgeResult<Vec<T>> {
    let HostValue::List(items) = value else {
        return Err(BridgeError::type_mismatch("list", value.type_name()));
    };

    items
        .iter()
        .enumerate()
        .map(|(i, item)| T::from_host(item).map_err(|err| err.at_index(i)))
        .collect()
}

/// Convert host seconds to a native duration, truncated to whole milliseconds.
pub fn duration_from_seconds(seconds: f64) -> BridgeResult<Duration> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(BridgeError::numeric_overflow(seconds.to_string(), "Duration"));
    }
    let millis = (1e3 * seconds) as u64;
    Ok(Duration::from_millis(millis))
}

/// Adapt an accessor returning a reference into one returning an owned copy.
///
/// Bound operations run with the lock released and their result is handed to
/// the host afterwards, by which time the referent may have changed or gone.
pub fn returning_copy<S, T, F>(accessor: F) -> impl Fn(&S) -> T::Owned
where
    S: ?Sized,
    T: ToOwned + ?Sized,
    F: for<'a> Fn(&'a S) -> &'a T,
{
    move |receiver: &S| accessor(receiver).to_owned()
}

/// One-argument form of [`returning_copy`].
pub fn returning_copy_1<S, A, T, F>(accessor: F) -> impl Fn(&S, A) -> T::Owned
where
    S: ?Sized,
    T: ToOwned + ?Sized,
    F: for<'a> Fn(&'a S, A) -> &'a T,
{
    move |receiver: &S, arg: A| accessor(receiver, arg).to_owned()
}

// ============================================================================
// FromHost
// ============================================================================

/// Trait for converting host values to native values.
pub trait FromHost: Sized {
    /// Try to convert a host value to this type.
    fn from_host(value: &HostValue) -> BridgeResult<Self>;
}

impl FromHost for () {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::None => Ok(()),
            _ => Err(BridgeError::type_mismatch("None", value.type_name())),
        }
    }
}

impl FromHost for bool {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Bool(b) => Ok(*b),
            HostValue::Int(n) => Ok(*n != 0),
            _ => Err(BridgeError::type_mismatch("bool", value.type_name())),
        }
    }
}

impl FromHost for i64 {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Int(n) => Ok(*n),
            HostValue::Bool(b) => Ok(i64::from(*b)),
            _ => Err(BridgeError::type_mismatch("int", value.type_name())),
        }
    }
}

macro_rules! int_from_host {
    ($($ty:ty),*) => {$(
        impl FromHost for $ty {
            fn from_host(value: &HostValue) -> BridgeResult<Self> {
                let n = i64::from_host(value)?;
                <$ty>::try_from(n)
                    .map_err(|_| BridgeError::numeric_overflow(n.to_string(), stringify!($ty)))
            }
        }
    )*};
}

int_from_host!(i8, i16, i32, isize, u8, u16, u32, u64, usize);

impl FromHost for f64 {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        value
            .as_float()
            .ok_or_else(|| BridgeError::type_mismatch("float", value.type_name()))
    }
}

impl FromHost for f32 {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        let f = f64::from_host(value)?;
        if f.is_finite() && (f < f32::MIN as f64 || f > f32::MAX as f64) {
            return Err(BridgeError::numeric_overflow(f.to_string(), "f32"));
        }
        Ok(f as f32)
    }
}

impl FromHost for String {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| BridgeError::type_mismatch("str", value.type_name()))
    }
}

impl FromHost for SmolStr {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::Str(s) => Ok(s.clone()),
            _ => Err(BridgeError::type_mismatch("str", value.type_name())),
        }
    }
}

impl FromHost for HostValue {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        Ok(value.clone())
    }
}

impl FromHost for HostFunction {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        value
            .as_function()
            .cloned()
            .ok_or_else(|| BridgeError::type_mismatch("function", value.type_name()))
    }
}

impl FromHost for Duration {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        duration_from_seconds(f64::from_host(value)?)
    }
}

impl<T: FromHost> FromHost for Option<T> {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value {
            HostValue::None => Ok(None),
            _ => T::from_host(value).map(Some),
        }
    }
}

impl<T: FromHost> FromHost for Vec<T> {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        to_native_vector(value)
    }
}

impl<A: FromHost, B: FromHost> FromHost for (A, B) {
    fn from_host(value: &HostValue) -> BridgeResult<Self> {
        match value.as_sequence() {
            Some([a, b]) => Ok((
                A::from_host(a).map_err(|e| e.at_index(0))?,
                B::from_host(b).map_err(|e| e.at_index(1))?,
            )),
            _ => Err(BridgeError::type_mismatch("pair", value.type_name())),
        }
    }
}
