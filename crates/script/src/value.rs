//! Runtime values of the scripting language.
//!
//! Containers are reference-counted with interior mutability so that
//! aliasing behaves the way script authors expect (`a = b; a.append(1)`
//! changes `b`). Values are single-threaded: a job owns its interpreter
//! and everything the interpreter creates.

use crate::ast::FunctionDef;
use crate::error::{ErrorKind, ScriptError};
use crate::interp::{Interpreter, Scope};
use indexmap::IndexMap;
use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

pub type NativeFn = dyn Fn(&mut Interpreter, Args) -> Result<Value, ScriptError>;

#[derive(Clone)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bytes(Rc<[u8]>),
    List(Rc<RefCell<Vec<Value>>>),
    Tuple(Rc<[Value]>),
    Dict(Rc<RefCell<IndexMap<DictKey, Value>>>),
    Function(Rc<Function>),
    Native(Rc<NativeFunction>),
    Method(Rc<BoundMethod>),
    ExceptionType(ErrorKind),
    Exception(Rc<ExceptionValue>),
    Host(Rc<dyn HostObject>),
}

/// A function defined by script code, closed over its defining scope.
pub struct Function {
    pub def: Rc<FunctionDef>,
    pub defaults: Vec<Option<Value>>,
    pub scope: Rc<Scope>,
}

/// A function implemented by the host and injected into a namespace.
pub struct NativeFunction {
    pub name: String,
    pub func: Box<NativeFn>,
}

/// `receiver.name` captured for a later call.
pub struct BoundMethod {
    pub receiver: Value,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionValue {
    pub kind: ErrorKind,
    pub message: String,
}

/// Hashable subset of values usable as dict keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DictKey {
    None,
    Bool(bool),
    Int(i64),
    Str(Rc<str>),
    Tuple(Rc<[DictKey]>),
}

impl DictKey {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DictKey::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            DictKey::None => Value::None,
            DictKey::Bool(b) => Value::Bool(*b),
            DictKey::Int(n) => Value::Int(*n),
            DictKey::Str(s) => Value::Str(s.clone()),
            DictKey::Tuple(items) => Value::Tuple(items.iter().map(DictKey::to_value).collect()),
        }
    }

    /// Key as it appears in a JSON object.
    pub fn to_json_key(&self) -> String {
        match self {
            DictKey::None => "null".to_owned(),
            DictKey::Bool(b) => b.to_string(),
            DictKey::Int(n) => n.to_string(),
            DictKey::Str(s) => s.to_string(),
            DictKey::Tuple(_) => self.to_value().repr(),
        }
    }
}

impl From<&str> for DictKey {
    fn from(s: &str) -> Self {
        DictKey::Str(Rc::from(s))
    }
}

// ──────────────────────────────────────────────
// Host objects
// ──────────────────────────────────────────────

/// An object owned by the embedding application: configuration views,
/// record handles, link sets. Every capability a script has beyond pure
/// computation reaches it through a host object or a native function.
pub trait HostObject {
    fn type_name(&self) -> &str;

    /// Attribute read. `Ok(None)` means "no such attribute".
    fn get_attr(&self, _name: &str) -> Result<Option<Value>, ScriptError> {
        Ok(None)
    }

    fn set_attr(&self, name: &str, _value: Value) -> Result<(), ScriptError> {
        Err(ScriptError::raised(
            ErrorKind::AttributeError,
            format!("'{}' object attribute '{}' is read-only", self.type_name(), name),
        ))
    }

    fn has_method(&self, _name: &str) -> bool {
        false
    }

    fn call_method(
        &self,
        _interp: &mut Interpreter,
        name: &str,
        _args: Args,
    ) -> Result<Value, ScriptError> {
        Err(ScriptError::raised(
            ErrorKind::AttributeError,
            format!("'{}' object has no attribute '{}'", self.type_name(), name),
        ))
    }

    fn get_item(&self, _key: &Value) -> Result<Value, ScriptError> {
        Err(ScriptError::type_error(format!(
            "'{}' object is not subscriptable",
            self.type_name()
        )))
    }

    fn set_item(&self, _key: Value, _value: Value) -> Result<(), ScriptError> {
        Err(ScriptError::type_error(format!(
            "'{}' object does not support item assignment",
            self.type_name()
        )))
    }

    fn contains(&self, item: &Value) -> Result<bool, ScriptError> {
        Ok(self.iterate()?.iter().any(|v| v.py_eq(item)))
    }

    fn iterate(&self) -> Result<Vec<Value>, ScriptError> {
        Err(ScriptError::type_error(format!(
            "'{}' object is not iterable",
            self.type_name()
        )))
    }

    fn len(&self) -> Option<usize> {
        None
    }

    fn truthy(&self) -> bool {
        self.len().map_or(true, |n| n > 0)
    }

    fn repr(&self) -> String {
        format!("<{}>", self.type_name())
    }

    fn to_json(&self) -> Option<serde_json::Value> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn host_eq(&self, _other: &dyn HostObject) -> bool {
        false
    }
}

// ──────────────────────────────────────────────
// Call arguments
// ──────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keywords: Vec<(String, Value)>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Args {
            positional,
            keywords: Vec::new(),
        }
    }

    pub fn empty() -> Self {
        Args::default()
    }

    pub fn with_keyword(mut self, name: &str, value: Value) -> Self {
        self.keywords.push((name.to_owned(), value));
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len() + self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keywords.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Argument by position, or by keyword when not given positionally.
    pub fn get(&self, index: usize, name: &str) -> Option<&Value> {
        self.positional.get(index).or_else(|| self.keyword(name))
    }

    pub fn required(&self, index: usize, name: &str, func: &str) -> Result<Value, ScriptError> {
        self.get(index, name).cloned().ok_or_else(|| {
            ScriptError::type_error(format!(
                "{}() missing required argument: '{}'",
                func, name
            ))
        })
    }

    /// Optional argument; an explicit `None` counts as absent.
    pub fn optional(&self, index: usize, name: &str) -> Option<Value> {
        match self.get(index, name) {
            None | Some(Value::None) => None,
            Some(v) => Some(v.clone()),
        }
    }

    pub fn flag(&self, index: usize, name: &str) -> bool {
        self.get(index, name).is_some_and(Value::truthy)
    }

    pub fn expect_at_most(&self, n: usize, func: &str) -> Result<(), ScriptError> {
        if self.positional.len() > n {
            return Err(ScriptError::type_error(format!(
                "{}() takes at most {} positional arguments ({} given)",
                func,
                n,
                self.positional.len()
            )));
        }
        Ok(())
    }
}

// ──────────────────────────────────────────────
// Value behaviour
// ──────────────────────────────────────────────

impl Value {
    pub fn str(s: impl AsRef<str>) -> Value {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn tuple(items: Vec<Value>) -> Value {
        Value::Tuple(Rc::from(items))
    }

    pub fn dict(entries: IndexMap<DictKey, Value>) -> Value {
        Value::Dict(Rc::new(RefCell::new(entries)))
    }

    pub fn bytes(data: impl AsRef<[u8]>) -> Value {
        Value::Bytes(Rc::from(data.as_ref()))
    }

    pub fn host<T: HostObject + 'static>(obj: T) -> Value {
        Value::Host(Rc::new(obj))
    }

    /// Wrap a host closure as a callable value.
    pub fn native<F>(name: &str, func: F) -> Value
    where
        F: Fn(&mut Interpreter, Args) -> Result<Value, ScriptError> + 'static,
    {
        Value::Native(Rc::new(NativeFunction {
            name: name.to_owned(),
            func: Box::new(func),
        }))
    }

    pub fn exception(kind: ErrorKind, message: impl Into<String>) -> Value {
        Value::Exception(Rc::new(ExceptionValue {
            kind,
            message: message.into(),
        }))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Function(_) => "function",
            Value::Native(_) => "builtin_function_or_method",
            Value::Method(_) => "method",
            Value::ExceptionType(_) => "type",
            Value::Exception(e) => e.kind.name(),
            Value::Host(h) => h.type_name(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_) | Value::Native(_) | Value::Method(_) | Value::ExceptionType(_)
        )
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(l) => !l.borrow().is_empty(),
            Value::Tuple(t) => !t.is_empty(),
            Value::Dict(d) => !d.borrow().is_empty(),
            Value::Host(h) => h.truthy(),
            _ => true,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(n) => Some(*n as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Downcast a host object to its concrete type.
    pub fn as_host<T: 'static>(&self) -> Option<&T> {
        match self {
            Value::Host(h) => h.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn expect_str(&self, what: &str) -> Result<&str, ScriptError> {
        self.as_str().ok_or_else(|| {
            ScriptError::type_error(format!(
                "{} must be str, not {}",
                what,
                self.type_name()
            ))
        })
    }

    pub fn expect_int(&self, what: &str) -> Result<i64, ScriptError> {
        self.as_int().ok_or_else(|| {
            ScriptError::type_error(format!(
                "{} must be int, not {}",
                what,
                self.type_name()
            ))
        })
    }

    pub fn to_key(&self) -> Result<DictKey, ScriptError> {
        Ok(match self {
            Value::None => DictKey::None,
            Value::Bool(b) => DictKey::Bool(*b),
            Value::Int(n) => DictKey::Int(*n),
            Value::Str(s) => DictKey::Str(s.clone()),
            Value::Tuple(items) => DictKey::Tuple(
                items
                    .iter()
                    .map(Value::to_key)
                    .collect::<Result<Vec<_>, _>>()?
                    .into(),
            ),
            other => {
                return Err(ScriptError::type_error(format!(
                    "unhashable type: '{}'",
                    other.type_name()
                )))
            }
        })
    }

    /// Materialize an iterable into a vector of items.
    pub fn iterate(&self) -> Result<Vec<Value>, ScriptError> {
        match self {
            Value::List(l) => Ok(l.borrow().clone()),
            Value::Tuple(t) => Ok(t.to_vec()),
            Value::Dict(d) => Ok(d.borrow().keys().map(DictKey::to_value).collect()),
            Value::Str(s) => Ok(s.chars().map(|c| Value::str(c.to_string())).collect()),
            Value::Bytes(b) => Ok(b.iter().map(|x| Value::Int(i64::from(*x))).collect()),
            Value::Host(h) => h.iterate(),
            other => Err(ScriptError::type_error(format!(
                "'{}' object is not iterable",
                other.type_name()
            ))),
        }
    }

    pub fn len(&self) -> Result<usize, ScriptError> {
        match self {
            Value::Str(s) => Ok(s.chars().count()),
            Value::Bytes(b) => Ok(b.len()),
            Value::List(l) => Ok(l.borrow().len()),
            Value::Tuple(t) => Ok(t.len()),
            Value::Dict(d) => Ok(d.borrow().len()),
            Value::Host(h) => h.len().ok_or_else(|| {
                ScriptError::type_error(format!("object of type '{}' has no len()", h.type_name()))
            }),
            other => Err(ScriptError::type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ))),
        }
    }

    /// Python `==`.
    pub fn py_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Bytes(a), Value::Bytes(b)) => a == b,
            (Value::Float(_), _) | (_, Value::Float(_)) => {
                match (self.as_float(), other.as_float()) {
                    (Some(a), Some(b)) => a == b,
                    _ => false,
                }
            }
            (Value::Int(_) | Value::Bool(_), Value::Int(_) | Value::Bool(_)) => {
                self.as_int() == other.as_int()
            }
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || seq_eq(&a.borrow(), &b.borrow())
            }
            (Value::Tuple(a), Value::Tuple(b)) => seq_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => {
                if Rc::ptr_eq(a, b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, v)| b.get(k).is_some_and(|w| v.py_eq(w)))
            }
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Rc::ptr_eq(a, b),
            (Value::ExceptionType(a), Value::ExceptionType(b)) => a == b,
            (Value::Exception(a), Value::Exception(b)) => a == b,
            (Value::Host(a), Value::Host(b)) => {
                std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)) || a.host_eq(b.as_ref())
            }
            _ => false,
        }
    }

    /// Python `is`: identity for containers, equality for immutable scalars.
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::List(a), Value::List(b)) => Rc::ptr_eq(a, b),
            (Value::Dict(a), Value::Dict(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            (Value::None, Value::None) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(_) | Value::Dict(_) | Value::Host(_), _)
            | (_, Value::List(_) | Value::Dict(_) | Value::Host(_)) => false,
            _ => self.type_name() == other.type_name() && self.py_eq(other),
        }
    }

    /// Python ordering for `<`, `sorted`, `min`, `max`.
    pub fn compare(&self, other: &Value) -> Result<Ordering, ScriptError> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Ok(a.cmp(b)),
            (Value::List(a), Value::List(b)) => seq_cmp(&a.borrow(), &b.borrow()),
            (Value::Tuple(a), Value::Tuple(b)) => seq_cmp(a, b),
            _ => match (self.as_float(), other.as_float()) {
                (Some(a), Some(b)) => {
                    if let (Some(x), Some(y), false, false) = (
                        self.as_int(),
                        other.as_int(),
                        matches!(self, Value::Float(_)),
                        matches!(other, Value::Float(_)),
                    ) {
                        return Ok(x.cmp(&y));
                    }
                    a.partial_cmp(&b)
                        .ok_or_else(|| ScriptError::value_error("cannot order NaN"))
                }
                _ => Err(ScriptError::type_error(format!(
                    "'<' not supported between instances of '{}' and '{}'",
                    self.type_name(),
                    other.type_name()
                ))),
            },
        }
    }

    /// Python `str()`.
    pub fn to_str(&self) -> String {
        match self {
            Value::Str(s) => s.to_string(),
            Value::Exception(e) => e.message.clone(),
            other => other.repr(),
        }
    }

    /// Python `repr()`.
    pub fn repr(&self) -> String {
        match self {
            Value::None => "None".to_owned(),
            Value::Bool(true) => "True".to_owned(),
            Value::Bool(false) => "False".to_owned(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) => quote_str(s),
            Value::Bytes(b) => {
                let mut out = String::from("b'");
                for byte in b.iter() {
                    match byte {
                        b'\\' => out.push_str("\\\\"),
                        b'\'' => out.push_str("\\'"),
                        b'\n' => out.push_str("\\n"),
                        b'\r' => out.push_str("\\r"),
                        b'\t' => out.push_str("\\t"),
                        0x20..=0x7e => out.push(*byte as char),
                        _ => out.push_str(&format!("\\x{:02x}", byte)),
                    }
                }
                out.push('\'');
                out
            }
            Value::List(l) => {
                let items: Vec<String> = l.borrow().iter().map(Value::repr).collect();
                format!("[{}]", items.join(", "))
            }
            Value::Tuple(t) => {
                let items: Vec<String> = t.iter().map(Value::repr).collect();
                if items.len() == 1 {
                    format!("({},)", items[0])
                } else {
                    format!("({})", items.join(", "))
                }
            }
            Value::Dict(d) => {
                let items: Vec<String> = d
                    .borrow()
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.to_value().repr(), v.repr()))
                    .collect();
                format!("{{{}}}", items.join(", "))
            }
            Value::Function(f) => format!("<function {}>", f.def.name),
            Value::Native(n) => format!("<built-in function {}>", n.name),
            Value::Method(m) => format!("<bound method {}.{}>", m.receiver.type_name(), m.name),
            Value::ExceptionType(k) => format!("<class '{}'>", k.name()),
            Value::Exception(e) => format!("{}({})", e.kind.name(), quote_str(&e.message)),
            Value::Host(h) => h.repr(),
        }
    }

    pub fn to_json(&self) -> Result<serde_json::Value, ScriptError> {
        use serde_json::Value as J;
        Ok(match self {
            Value::None => J::Null,
            Value::Bool(b) => J::Bool(*b),
            Value::Int(n) => J::from(*n),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(J::Number)
                .ok_or_else(|| ScriptError::value_error("Out of range float values are not JSON compliant"))?,
            Value::Str(s) => J::String(s.to_string()),
            Value::List(l) => J::Array(
                l.borrow()
                    .iter()
                    .map(Value::to_json)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Tuple(t) => J::Array(t.iter().map(Value::to_json).collect::<Result<_, _>>()?),
            Value::Dict(d) => {
                let mut map = serde_json::Map::new();
                for (k, v) in d.borrow().iter() {
                    map.insert(k.to_json_key(), v.to_json()?);
                }
                J::Object(map)
            }
            Value::Host(h) => h.to_json().ok_or_else(|| {
                ScriptError::type_error(format!(
                    "Object of type {} is not JSON serializable",
                    h.type_name()
                ))
            })?,
            other => {
                return Err(ScriptError::type_error(format!(
                    "Object of type {} is not JSON serializable",
                    other.type_name()
                )))
            }
        })
    }

    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as J;
        match json {
            J::Null => Value::None,
            J::Bool(b) => Value::Bool(*b),
            J::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            J::String(s) => Value::str(s),
            J::Array(items) => Value::list(items.iter().map(Value::from_json).collect()),
            J::Object(map) => Value::dict(
                map.iter()
                    .map(|(k, v)| (DictKey::from(k.as_str()), Value::from_json(v)))
                    .collect(),
            ),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_str())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(Rc::from(s))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::None, Into::into)
    }
}

fn seq_eq(a: &[Value], b: &[Value]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.py_eq(y))
}

fn seq_cmp(a: &[Value], b: &[Value]) -> Result<Ordering, ScriptError> {
    for (x, y) in a.iter().zip(b) {
        match x.compare(y)? {
            Ordering::Equal => continue,
            other => return Ok(other),
        }
    }
    Ok(a.len().cmp(&b.len()))
}

pub fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_owned()
    } else if f.is_infinite() {
        if f > 0.0 { "inf" } else { "-inf" }.to_owned()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

fn quote_str(s: &str) -> String {
    let quote = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(quote);
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repr_matches_python() {
        assert_eq!(Value::Float(1.0).repr(), "1.0");
        assert_eq!(Value::str("it's").repr(), "\"it's\"");
        assert_eq!(Value::tuple(vec![Value::Int(1)]).repr(), "(1,)");
        let d = Value::dict(IndexMap::from([(DictKey::from("a"), Value::None)]));
        assert_eq!(d.repr(), "{'a': None}");
    }

    #[test]
    fn numeric_equality_crosses_int_and_float() {
        assert!(Value::Int(1).py_eq(&Value::Float(1.0)));
        assert!(Value::Bool(true).py_eq(&Value::Int(1)));
        assert!(!Value::str("1").py_eq(&Value::Int(1)));
    }

    #[test]
    fn floats_are_not_hashable() {
        assert!(Value::Float(1.5).to_key().is_err());
        assert!(Value::tuple(vec![Value::Int(1), Value::str("a")])
            .to_key()
            .is_ok());
    }

    #[test]
    fn json_round_trip_keeps_integers() {
        let json = serde_json::json!({"a": [1, 2.5, null, "x"]});
        let v = Value::from_json(&json);
        assert_eq!(v.to_json().unwrap(), json);
    }
}
