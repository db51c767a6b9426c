//! Host Value Representations
//!
//! The dynamic values the scripting host hands to, and receives from, the
//! bridge.
//!
//! ## Type Hierarchy
//!
//! - `HostValue`: enum covering every host value the bridge marshals
//! - `HostObject`: a native aggregate exposed to the host by attribute
//! - `HostFunction`: a host callable
//! - `HostException`: an exception raised by host code
//!
//! Values are plain owned data so they can be built on a native thread and
//! handed across once the lock is held. Interpreter-owned resources only
//! appear behind `HostFunction`, whose captured state is released by the
//! callback bridge while the lock is held.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use smol_str::SmolStr;

// ============================================================================
// HostValue
// ============================================================================

/// Represents any host value crossing the bridge.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HostValue {
    /// The host's null (`None`)
    #[default]
    None,

    /// Boolean
    Bool(bool),

    /// Integer (arbitrary precision on the host, i64 across the bridge)
    Int(i64),

    /// IEEE 754 double
    Float(f64),

    /// Text
    Str(SmolStr),

    /// Raw bytes
    Bytes(Vec<u8>),

    /// Mutable ordered sequence
    List(Vec<HostValue>),

    /// Immutable ordered sequence
    Tuple(Vec<HostValue>),

    /// String-keyed mapping, insertion ordered
    Dict(IndexMap<SmolStr, HostValue>),

    /// Native aggregate surfaced by attribute
    Object(HostObject),

    /// Host callable
    Function(HostFunction),
}

impl HostValue {
    /// Get the host type name for this value
    pub fn type_name(&self) -> &str {
        match self {
            HostValue::None => "NoneType",
            HostValue::Bool(_) => "bool",
            HostValue::Int(_) => "int",
            HostValue::Float(_) => "float",
            HostValue::Str(_) => "str",
            HostValue::Bytes(_) => "bytes",
            HostValue::List(_) => "list",
            HostValue::Tuple(_) => "tuple",
            HostValue::Dict(_) => "dict",
            HostValue::Object(obj) => obj.type_name(),
            HostValue::Function(_) => "function",
        }
    }

    /// Build a list from anything iterable
    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator<Item = HostValue>,
    {
        HostValue::List(items.into_iter().collect())
    }

    /// Check if this value is the host null
    pub fn is_none(&self) -> bool {
        matches!(self, HostValue::None)
    }

    /// Check if the host may call this value
    pub fn is_callable(&self) -> bool {
        matches!(self, HostValue::Function(_))
    }

    /// Check if this value is truthy (host bool coercion)
    pub fn is_truthy(&self) -> bool {
        match self {
            HostValue::None => false,
            HostValue::Bool(b) => *b,
            HostValue::Int(n) => *n != 0,
            HostValue::Float(f) => *f != 0.0 && !f.is_nan(),
            HostValue::Str(s) => !s.is_empty(),
            HostValue::Bytes(b) => !b.is_empty(),
            HostValue::List(items) | HostValue::Tuple(items) => !items.is_empty(),
            HostValue::Dict(dict) => !dict.is_empty(),
            HostValue::Object(_) | HostValue::Function(_) => true,
        }
    }

    /// Borrow the elements of a list or tuple
    pub fn as_sequence(&self) -> Option<&[HostValue]> {
        match self {
            HostValue::List(items) | HostValue::Tuple(items) => Some(items.as_slice()),
            _ => None,
        }
    }

    /// Try to extract as f64
    pub fn as_float(&self) -> Option<f64> {
        match self {
            HostValue::Float(f) => Some(*f),
            HostValue::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    /// Try to extract as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow the callable, if this is one
    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            HostValue::Function(func) => Some(func),
            _ => None,
        }
    }
}

fn write_items(f: &mut fmt::Formatter<'_>, items: &[HostValue]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{}", item)?;
    }
    Ok(())
}

/// Floats switch to exponent form outside `1e-4 <= |n| < 1e16`.
fn write_float(f: &mut fmt::Formatter<'_>, n: f64) -> fmt::Result {
    if n.is_nan() {
        return write!(f, "nan");
    }
    if n.is_infinite() {
        return write!(f, "{}", if n > 0.0 { "inf" } else { "-inf" });
    }

    let scientific = format!("{:e}", n);
    let parts = scientific
        .split_once('e')
        .and_then(|(mantissa, exp)| Some((mantissa, exp.parse::<i32>().ok()?)));
    match parts {
        Some((mantissa, exp)) if n != 0.0 && !(-4..16).contains(&exp) => {
            let sign = if exp < 0 { '-' } else { '+' };
            write!(f, "{}e{}{:02}", mantissa, sign, exp.abs())
        }
        _ if n.fract() == 0.0 => write!(f, "{:.1}", n),
        _ => write!(f, "{}", n),
    }
}

/// Single quotes unless the text has one and no double quote.
fn pick_quote(has_single: bool, has_double: bool) -> char {
    if has_single && !has_double {
        '"'
    } else {
        '\''
    }
}

fn write_str(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    let quote = pick_quote(s.contains('\''), s.contains('"'));
    write!(f, "{}", quote)?;
    for c in s.chars() {
        match c {
            '\\' => write!(f, "\\\\")?,
            '\n' => write!(f, "\\n")?,
            '\r' => write!(f, "\\r")?,
            '\t' => write!(f, "\\t")?,
            c if c == quote => write!(f, "\\{}", c)?,
            c if c.is_control() && (c as u32) < 0x100 => write!(f, "\\x{:02x}", c as u32)?,
            c => write!(f, "{}", c)?,
        }
    }
    write!(f, "{}", quote)
}

fn write_bytes(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    let quote = pick_quote(bytes.contains(&b'\''), bytes.contains(&b'"'));
    write!(f, "b{}", quote)?;
    for &byte in bytes {
        match byte {
            b'\\' => write!(f, "\\\\")?,
            b'\n' => write!(f, "\\n")?,
            b'\r' => write!(f, "\\r")?,
            b'\t' => write!(f, "\\t")?,
            b if char::from(b) == quote => write!(f, "\\{}", quote)?,
            0x20..=0x7e => write!(f, "{}", char::from(byte))?,
            _ => write!(f, "\\x{:02x}", byte)?,
        }
    }
    write!(f, "{}", quote)
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostValue::None => write!(f, "None"),
            HostValue::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            HostValue::Int(n) => write!(f, "{}", n),
            HostValue::Float(n) => write_float(f, *n),
            HostValue::Str(s) => write_str(f, s),
            HostValue::Bytes(b) => write_bytes(f, b),
            HostValue::List(items) => {
                write!(f, "[")?;
                write_items(f, items)?;
                write!(f, "]")
            }
            HostValue::Tuple(items) => {
                write!(f, "(")?;
                write_items(f, items)?;
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            HostValue::Dict(dict) => {
                write!(f, "{{")?;
                for (i, (key, value)) in dict.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_str(f, key)?;
                    write!(f, ": {}", value)?;
                }
                write!(f, "}}")
            }
            HostValue::Object(obj) => write!(f, "{}", obj),
            HostValue::Function(func) => write!(f, "<function {}>", func.name()),
        }
    }
}

// ============================================================================
// HostObject
// ============================================================================

/// A native aggregate as the host sees it: a type name and its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct HostObject {
    type_name: SmolStr,
    attributes: IndexMap<SmolStr, HostValue>,
}

impl HostObject {
    /// Create an object with no attributes
    pub fn new(type_name: impl Into<SmolStr>) -> Self {
        Self {
            type_name: type_name.into(),
            attributes: IndexMap::new(),
        }
    }

    /// Add an attribute, builder style
    pub fn with_attr(mut self, name: impl Into<SmolStr>, value: HostValue) -> Self {
        self.attributes.insert(name.into(), value);
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn get_attr(&self, name: &str) -> Option<&HostValue> {
        self.attributes.get(name)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &HostValue)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl fmt::Display for HostObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.type_name)?;
        for (i, (name, value)) in self.attributes.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, ")")
    }
}

// ============================================================================
// HostFunction
// ============================================================================

type HostFn = dyn Fn(&[HostValue]) -> Result<HostValue, HostException> + Send + Sync;

/// A host callable.
///
/// Calling it executes host code, so callers must hold the interpreter lock.
/// The bridge's dispatch and callback layers guarantee that; code calling
/// [`HostFunction::call`] directly is responsible for it.
#[derive(Clone)]
pub struct HostFunction {
    name: SmolStr,
    func: Arc<HostFn>,
}

impl HostFunction {
    pub fn new<F>(name: impl Into<SmolStr>, func: F) -> Self
    where
        F: Fn(&[HostValue]) -> Result<HostValue, HostException> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Call with positional arguments.
    pub fn call(&self, args: &[HostValue]) -> Result<HostValue, HostException> {
        (self.func)(args)
    }
}

impl From<HostFunction> for HostValue {
    fn from(func: HostFunction) -> Self {
        HostValue::Function(func)
    }
}

impl PartialEq for HostFunction {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// HostException
// ============================================================================

/// An exception raised by host code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostException {
    /// Exception type, e.g. `TypeError`
    pub kind: SmolStr,
    /// Exception message
    pub message: String,
}

impl HostException {
    pub fn new(kind: impl Into<SmolStr>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }

    pub fn runtime_error(message: impl Into<String>) -> Self {
        Self::new("RuntimeError", message)
    }
}

impl fmt::Display for HostException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for HostException {}
