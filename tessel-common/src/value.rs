//! Dynamic scope values.
//!
//! `Object` and `Array` are shared, mutable reference types: cloning a handle does not copy the
//! contents, and two handles are the same value only if they point to the same allocation.
//! Everything else compares by value.
use crate::data::Data;
use indexmap::IndexMap;
use std::{
    any::Any,
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
};

/// Slot holding the observer attached to an object or array (see `tessel::observe`).
type Extension = RefCell<Option<Rc<dyn Any>>>;

////////////////////////////////////////////////////////////////////////////////////////////////////
// Object
////////////////////////////////////////////////////////////////////////////////////////////////////

struct ObjectData {
    props: RefCell<IndexMap<String, Value>>,
    frozen: Cell<bool>,
    extension: Extension,
}

/// A shared, insertion-ordered map of properties.
///
/// The methods on this type read and write the storage directly and never notify observers;
/// writes that should be seen by bindings go through `tessel::observe::Observed`.
#[derive(Clone)]
pub struct Object(Rc<ObjectData>);

impl Default for Object {
    fn default() -> Self {
        Object::new()
    }
}

impl Object {
    /// Creates a new, empty object.
    pub fn new() -> Object {
        Object(Rc::new(ObjectData {
            props: RefCell::new(IndexMap::new()),
            frozen: Cell::new(false),
            extension: RefCell::new(None),
        }))
    }

    /// Creates an object from key/value pairs, in iteration order.
    pub fn from_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Object
    where
        K: Into<String>,
        V: Into<Value>,
    {
        let object = Object::new();
        {
            let mut props = object.0.props.borrow_mut();
            for (k, v) in entries {
                props.insert(k.into(), v.into());
            }
        }
        object
    }

    /// Returns the value of the property, or `Undefined`.
    pub fn get(&self, key: &str) -> Value {
        self.0.props.borrow().get(key).cloned().unwrap_or_default()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.props.borrow().contains_key(key)
    }

    /// Sets a property and returns the previous value (`Undefined` if there was none).
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Value {
        self.0
            .props
            .borrow_mut()
            .insert(key.into(), value.into())
            .unwrap_or_default()
    }

    /// Removes a property, preserving the order of the remaining ones.
    pub fn remove(&self, key: &str) -> Value {
        self.0.props.borrow_mut().shift_remove(key).unwrap_or_default()
    }

    /// Property names in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.0.props.borrow().keys().cloned().collect()
    }

    /// Properties in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .props
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.0.props.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Marks the object as frozen. Frozen objects are never observed.
    pub fn freeze(&self) {
        self.0.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    /// Returns whether both handles refer to the same object.
    pub fn ptr_eq(&self, other: &Object) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Returns the observer attached to this object, if any.
    pub fn extension(&self) -> Option<Rc<dyn Any>> {
        self.0.extension.borrow().clone()
    }

    /// Attaches an observer to this object.
    pub fn set_extension(&self, extension: Rc<dyn Any>) {
        self.0.extension.replace(Some(extension));
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Array
////////////////////////////////////////////////////////////////////////////////////////////////////

struct ArrayData {
    items: RefCell<Vec<Value>>,
    frozen: Cell<bool>,
    extension: Extension,
}

/// A shared, growable list of values.
///
/// Like `Object`, direct writes bypass observers.
#[derive(Clone)]
pub struct Array(Rc<ArrayData>);

impl Default for Array {
    fn default() -> Self {
        Array::new()
    }
}

impl Array {
    pub fn new() -> Array {
        Array::from_vec(Vec::new())
    }

    pub fn from_vec(items: Vec<Value>) -> Array {
        Array(Rc::new(ArrayData {
            items: RefCell::new(items),
            frozen: Cell::new(false),
            extension: RefCell::new(None),
        }))
    }

    /// Returns the element at `index`, or `Undefined`.
    pub fn get(&self, index: usize) -> Value {
        self.0.items.borrow().get(index).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the current elements out.
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.items.borrow().clone()
    }

    /// Returns the index of the first element that is `same` as `value`.
    pub fn position(&self, value: &Value) -> Option<usize> {
        self.0.items.borrow().iter().position(|v| v.same(value))
    }

    /// Removes `remove` elements at `index` and inserts `insert` in their place.
    ///
    /// Both `index` and `remove` are clamped to the length of the array.
    /// Returns the removed elements.
    pub fn splice(&self, index: usize, remove: usize, insert: Vec<Value>) -> Vec<Value> {
        let mut items = self.0.items.borrow_mut();
        let start = index.min(items.len());
        let end = (start + remove).min(items.len());
        items.splice(start..end, insert).collect()
    }

    /// Writes the element at `index`, padding with `Undefined` if the array is too short.
    /// Returns the previous element.
    pub fn set(&self, index: usize, value: Value) -> Value {
        let mut items = self.0.items.borrow_mut();
        if index >= items.len() {
            items.resize(index + 1, Value::Undefined);
        }
        std::mem::replace(&mut items[index], value)
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.0.items.borrow_mut().push(value.into());
    }

    pub fn freeze(&self) {
        self.0.frozen.set(true);
    }

    pub fn is_frozen(&self) -> bool {
        self.0.frozen.get()
    }

    pub fn ptr_eq(&self, other: &Array) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn extension(&self) -> Option<Rc<dyn Any>> {
        self.0.extension.borrow().clone()
    }

    pub fn set_extension(&self, extension: Rc<dyn Any>) {
        self.0.extension.replace(Some(extension));
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Opaque
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A host value (date, node handle, ...) carried through scopes but never observed.
#[derive(Clone)]
pub struct Opaque(Rc<dyn Any>);

impl Opaque {
    pub fn new<T: Any>(value: T) -> Opaque {
        Opaque(Rc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &Opaque) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
// Value
////////////////////////////////////////////////////////////////////////////////////////////////////

/// A scope value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(Object),
    Array(Array),
    Opaque(Opaque),
}

impl Value {
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// `Undefined` or `Null`.
    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    /// Truthiness, as in a boolean context of a script language.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            Value::Object(_) | Value::Array(_) | Value::Opaque(_) => true,
        }
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Converts the value to a number the way a numeric context would.
    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Bool(b) => f64::from(u8::from(*b)),
            Value::Number(n) => *n,
            Value::String(s) => {
                let s = s.trim();
                if s.is_empty() {
                    0.0
                } else {
                    s.parse().unwrap_or(f64::NAN)
                }
            }
            _ => f64::NAN,
        }
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Object(_) => "object",
            Value::Array(_) => "array",
            Value::Opaque(_) => "opaque",
        }
    }

    /// The text rendered for this value. `Undefined` and `Null` render as nothing.
    pub fn to_display_string(&self) -> String {
        match self {
            Value::Undefined | Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => format_number(*n),
            Value::String(s) => s.to_string(),
            Value::Array(a) => a
                .to_vec()
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(","),
            Value::Object(_) => "[object Object]".to_string(),
            Value::Opaque(_) => "[object]".to_string(),
        }
    }

    /// Builds a value tree from JSON. Objects keep the key order of the document.
    pub fn from_json(json: serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::from(s),
            serde_json::Value::Array(items) => {
                Value::Array(Array::from_vec(items.into_iter().map(Value::from_json).collect()))
            }
            serde_json::Value::Object(map) => Value::Object(Object::from_entries(
                map.into_iter().map(|(k, v)| (k, Value::from_json(v))),
            )),
        }
    }

    /// Converts to JSON. `Undefined` and opaque values become `null`; structures nested deeper
    /// than 64 levels (cycles) are cut off.
    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_depth(0)
    }

    fn to_json_depth(&self, depth: usize) -> serde_json::Value {
        if depth > 64 {
            return serde_json::Value::Null;
        }
        match self {
            Value::Undefined | Value::Null | Value::Opaque(_) => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.to_string()),
            Value::Array(a) => {
                serde_json::Value::Array(a.to_vec().iter().map(|v| v.to_json_depth(depth + 1)).collect())
            }
            Value::Object(o) => serde_json::Value::Object(
                o.entries()
                    .into_iter()
                    .map(|(k, v)| (k, v.to_json_depth(depth + 1)))
                    .collect(),
            ),
        }
    }
}

/// Formats a number like a script language would print it (`1`, `1.5`, `NaN`, `Infinity`).
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        let s = if n > 0.0 { "Infinity" } else { "-Infinity" };
        s.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Identity for objects, arrays and opaque values; value comparison for everything else.
/// `NaN` is the same as `NaN`.
impl Data for Value {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Array(a), Value::Array(b)) => a.ptr_eq(b),
            (Value::Opaque(a), Value::Opaque(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same(other)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Number(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Number(f64::from(v))
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Number(f64::from(v))
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Number(v as f64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Rc::from(v))
    }
}

impl From<Object> for Value {
    fn from(v: Object) -> Self {
        Value::Object(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::Array(Array::from_vec(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or_default()
    }
}

//--------------------------------------------------------------------------------------------------

thread_local! {
    // nesting level of the current `Debug` call, to cut off cyclic structures
    static DEBUG_DEPTH: Cell<usize> = const { Cell::new(0) };
}

fn with_debug_depth(f: &mut fmt::Formatter, inner: impl FnOnce(&mut fmt::Formatter) -> fmt::Result) -> fmt::Result {
    let depth = DEBUG_DEPTH.with(|d| d.get());
    if depth > 8 {
        return write!(f, "..");
    }
    DEBUG_DEPTH.with(|d| d.set(depth + 1));
    let r = inner(f);
    DEBUG_DEPTH.with(|d| d.set(depth));
    r
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        with_debug_depth(f, |f| f.debug_map().entries(self.entries()).finish())
    }
}

impl fmt::Debug for Array {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        with_debug_depth(f, |f| f.debug_list().entries(self.to_vec()).finish())
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Opaque({:p})", Rc::as_ptr(&self.0))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::String(s) => write!(f, "{s:?}"),
            Value::Object(o) => fmt::Debug::fmt(o, f),
            Value::Array(a) => fmt::Debug::fmt(a, f),
            Value::Opaque(o) => fmt::Debug::fmt(o, f),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_and_value_comparison() {
        let a = Object::new();
        let b = Object::new();
        assert!(Value::from(a.clone()).same(&Value::from(a.clone())));
        assert!(!Value::from(a).same(&Value::from(b)));
        assert!(Value::from("x").same(&Value::from("x".to_string())));
        assert!(Value::Number(f64::NAN).same(&Value::Number(f64::NAN)));
        assert!(!Value::Null.same(&Value::Undefined));
    }

    #[test]
    fn truthiness() {
        assert!(!Value::Undefined.is_truthy());
        assert!(!Value::from("").is_truthy());
        assert!(!Value::from(0).is_truthy());
        assert!(Value::from("0").is_truthy());
        assert!(Value::from(Array::new()).is_truthy());
    }

    #[test]
    fn display_strings() {
        assert_eq!(Value::from(1).to_display_string(), "1");
        assert_eq!(Value::from(1.5).to_display_string(), "1.5");
        assert_eq!(Value::from(-0.0).to_display_string(), "0");
        assert_eq!(Value::Undefined.to_display_string(), "");
        assert_eq!(Value::from(vec![Value::from(1), Value::from("a")]).to_display_string(), "1,a");
    }

    #[test]
    fn json_keeps_key_order() {
        let v = Value::from_json(json!({"b": 1, "a": [true, null]}));
        let o = v.as_object().unwrap();
        assert_eq!(o.keys(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(v.to_json(), json!({"b": 1.0, "a": [true, null]}));
    }

    #[test]
    fn splice_clamps() {
        let a = Array::from_vec(vec![1.into(), 2.into(), 3.into()]);
        let removed = a.splice(1, 10, vec![Value::from(9)]);
        assert_eq!(removed.len(), 2);
        assert_eq!(a.to_vec(), vec![Value::from(1), Value::from(9)]);
        a.set(3, Value::from(4));
        assert_eq!(a.len(), 4);
        assert!(a.get(2).is_undefined());
    }
}
