//! Value and object model.
//!
//! Execution is single-threaded, so objects are shared with `Rc` and
//! mutated through interior `RefCell`s. Anything that wants to appear as an
//! object to script code (the membrane, the host global, DOM nodes)
//! implements [`ScriptObject`].

use realm_types::PropertyKey;
use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::FunctionDef;
use crate::error::ScriptError;
use crate::interp::{Realm, Scope};

/// Shared handle to any object visible to scripts.
pub type ObjectRef = Rc<dyn ScriptObject>;

/// Shared handle to a function value.
pub type FunctionRef = Rc<Function>;

/// Signature of a host-implemented function: `(this, args) -> result`.
pub type NativeFn = Rc<dyn Fn(Value, &[Value]) -> Result<Value, ScriptError>>;

/// A script value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Rc<str>),
    Object(ObjectRef),
    Function(FunctionRef),
}

impl Value {
    /// Wraps a concrete object.
    pub fn object(object: impl ScriptObject + 'static) -> Self {
        Self::Object(Rc::new(object))
    }

    /// Wraps a native function.
    pub fn native(
        name: impl Into<String>,
        func: impl Fn(Value, &[Value]) -> Result<Value, ScriptError> + 'static,
    ) -> Self {
        Self::Function(Function::native(name, func))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Self::Undefined | Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&FunctionRef> {
        match self {
            Self::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn type_of(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null | Self::Object(_) => "object",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Function(_) => "function",
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::Undefined | Self::Null => false,
            Self::Bool(b) => *b,
            Self::Number(n) => *n != 0.0 && !n.is_nan(),
            Self::String(s) => !s.is_empty(),
            Self::Object(_) | Self::Function(_) => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Self::Undefined => f64::NAN,
            Self::Null => 0.0,
            Self::Bool(b) => f64::from(u8::from(*b)),
            Self::Number(n) => *n,
            Self::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    0.0
                } else {
                    trimmed.parse().unwrap_or(f64::NAN)
                }
            }
            Self::Object(_) | Self::Function(_) => f64::NAN,
        }
    }

    /// JavaScript `ToString`, without invoking user code.
    pub fn to_display_string(&self) -> String {
        match self {
            Self::Undefined => "undefined".into(),
            Self::Null => "null".into(),
            Self::Bool(b) => b.to_string(),
            Self::Number(n) => format_number(*n),
            Self::String(s) => s.to_string(),
            Self::Object(o) => {
                if let Some(array) = o.array_items() {
                    array
                        .iter()
                        .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                        .collect::<Vec<_>>()
                        .join(",")
                } else {
                    match (o.get(&"name".into()), o.get(&"message".into())) {
                        (Some(Value::String(name)), Some(Value::String(message))) => {
                            format!("{name}: {message}")
                        }
                        _ => format!("[object {}]", o.class_name()),
                    }
                }
            }
            Self::Function(f) => format!("function {}() {{ [code] }}", f.name()),
        }
    }

    /// `===`
    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => same_object(a, b),
            (Self::Function(a), Self::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// `==`, restricted to primitive coercions.
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined | Self::Null, Self::Undefined | Self::Null) => true,
            (Self::Undefined | Self::Null, _) | (_, Self::Undefined | Self::Null) => false,
            (Self::Number(_), Self::String(_))
            | (Self::String(_), Self::Number(_))
            | (Self::Bool(_), _)
            | (_, Self::Bool(_)) => {
                if matches!(self, Self::Object(_) | Self::Function(_))
                    || matches!(other, Self::Object(_) | Self::Function(_))
                {
                    return false;
                }
                self.to_number() == other.to_number()
            }
            _ => self.strict_equals(other),
        }
    }

    /// Converts host-side JSON into a script value.
    pub fn from_json(json: &serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::from(s.as_str()),
            serde_json::Value::Array(items) => {
                Self::object(ArrayObject::from_values(items.iter().map(Self::from_json).collect()))
            }
            serde_json::Value::Object(map) => {
                let object = PlainObject::new();
                for (key, value) in map {
                    object.insert(key.as_str(), Self::from_json(value));
                }
                Self::object(object)
            }
        }
    }

    /// Converts a script value into JSON. Functions and `undefined` become `null`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Undefined | Self::Null | Self::Function(_) => serde_json::Value::Null,
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => {
                serde_json::Value::Number((*n as i64).into())
            }
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Self::String(s) => serde_json::Value::String(s.to_string()),
            Self::Object(o) => {
                if let Some(items) = o.array_items() {
                    serde_json::Value::Array(items.iter().map(Value::to_json).collect())
                } else {
                    let mut map = serde_json::Map::new();
                    for key in o.keys() {
                        if let PropertyKey::Name(name) = &key {
                            let value = o.get(&key).unwrap_or_default();
                            map.insert(name.clone(), value.to_json());
                        }
                    }
                    serde_json::Value::Object(map)
                }
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(Rc::from(s))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            Self::Object(o) => write!(f, "[object {}]", o.class_name()),
            other => f.write_str(&other.to_display_string()),
        }
    }
}

/// Pointer identity for trait objects, ignoring vtables.
pub fn same_object(a: &ObjectRef, b: &ObjectRef) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".into()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity".into() } else { "-Infinity".into() }
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ================================================================
// Properties
// ================================================================

/// A data property with its attributes.
#[derive(Debug, Clone)]
pub struct PropertyDescriptor {
    pub value: Value,
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl PropertyDescriptor {
    /// An ordinary writable, enumerable, configurable property.
    pub fn data(value: Value) -> Self {
        Self {
            value,
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// A non-writable, non-configurable property (`undefined`, `NaN`, ...).
    pub fn read_only(value: Value) -> Self {
        Self {
            value,
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Whether the value can never change.
    pub fn is_frozen(&self) -> bool {
        !self.writable && !self.configurable
    }
}

/// Insertion-ordered property storage.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap {
    entries: Vec<(PropertyKey, PropertyDescriptor)>,
    index: HashMap<PropertyKey, usize>,
}

impl PropertyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PropertyKey) -> Option<&PropertyDescriptor> {
        self.index.get(key).map(|&i| &self.entries[i].1)
    }

    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.index.contains_key(key)
    }

    /// Inserts or replaces a property, keeping the original position on replace.
    pub fn define(&mut self, key: PropertyKey, descriptor: PropertyDescriptor) {
        match self.index.get(&key) {
            Some(&i) => self.entries[i].1 = descriptor,
            None => {
                self.index.insert(key.clone(), self.entries.len());
                self.entries.push((key, descriptor));
            }
        }
    }

    /// Assigns a value, honouring `writable`. Returns `false` if the write was refused.
    pub fn assign(&mut self, key: PropertyKey, value: Value) -> bool {
        match self.index.get(&key) {
            Some(&i) => {
                let descriptor = &mut self.entries[i].1;
                if !descriptor.writable {
                    return false;
                }
                descriptor.value = value;
                true
            }
            None => {
                self.define(key, PropertyDescriptor::data(value));
                true
            }
        }
    }

    pub fn remove(&mut self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        let i = self.index.remove(key)?;
        let (_, descriptor) = self.entries.remove(i);
        for slot in self.index.values_mut() {
            if *slot > i {
                *slot -= 1;
            }
        }
        Some(descriptor)
    }

    pub fn keys(&self) -> impl Iterator<Item = &PropertyKey> {
        self.entries.iter().map(|(k, _)| k)
    }

    pub fn enumerable_keys(&self) -> impl Iterator<Item = &PropertyKey> {
        self.entries.iter().filter(|(_, d)| d.enumerable).map(|(k, _)| k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

// ================================================================
// Objects
// ================================================================

/// Behaviour of anything script code can treat as an object.
pub trait ScriptObject {
    /// Reads a property; `None` means the property is absent.
    fn get(&self, key: &PropertyKey) -> Option<Value>;

    fn set(&self, key: PropertyKey, value: Value) -> Result<(), ScriptError>;

    /// Deletes a property. Returns whether the property is gone afterwards.
    fn delete(&self, key: &PropertyKey) -> Result<bool, ScriptError>;

    fn has(&self, key: &PropertyKey) -> bool {
        self.get(key).is_some()
    }

    /// Enumerable own keys, in order.
    fn keys(&self) -> Vec<PropertyKey>;

    fn descriptor(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        self.get(key).map(PropertyDescriptor::data)
    }

    fn class_name(&self) -> &str {
        "Object"
    }

    /// Array contents, for objects that are arrays.
    fn array_items(&self) -> Option<Vec<Value>> {
        None
    }

    /// Concrete type access for host objects that need to recognise their own wrappers.
    fn as_any(&self) -> Option<&dyn Any> {
        None
    }
}

/// An ordinary object created by an object literal or by the host.
#[derive(Default)]
pub struct PlainObject {
    props: RefCell<PropertyMap>,
}

impl PlainObject {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insertion of a data property.
    pub fn with(self, key: impl Into<PropertyKey>, value: Value) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&self, key: impl Into<PropertyKey>, value: Value) {
        self.props.borrow_mut().define(key.into(), PropertyDescriptor::data(value));
    }

    pub fn define(&self, key: impl Into<PropertyKey>, descriptor: PropertyDescriptor) {
        self.props.borrow_mut().define(key.into(), descriptor);
    }
}

impl ScriptObject for PlainObject {
    fn get(&self, key: &PropertyKey) -> Option<Value> {
        self.props.borrow().get(key).map(|d| d.value.clone())
    }

    fn set(&self, key: PropertyKey, value: Value) -> Result<(), ScriptError> {
        if self.props.borrow_mut().assign(key.clone(), value) {
            Ok(())
        } else {
            Err(ScriptError::ReadOnlyProperty(key.to_string()))
        }
    }

    fn delete(&self, key: &PropertyKey) -> Result<bool, ScriptError> {
        let mut props = self.props.borrow_mut();
        if props.get(key).is_some_and(|d| !d.configurable) {
            return Ok(false);
        }
        props.remove(key);
        Ok(true)
    }

    fn keys(&self) -> Vec<PropertyKey> {
        self.props.borrow().enumerable_keys().cloned().collect()
    }

    fn descriptor(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        self.props.borrow().get(key).cloned()
    }
}

/// A dense array.
#[derive(Default)]
pub struct ArrayObject {
    items: Rc<RefCell<Vec<Value>>>,
}

impl ArrayObject {
    pub fn from_values(values: Vec<Value>) -> Self {
        Self {
            items: Rc::new(RefCell::new(values)),
        }
    }

    pub fn len(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }
}

fn array_index(key: &PropertyKey) -> Option<usize> {
    key.as_name()
        .filter(|name| !name.starts_with('+') && (name.len() == 1 || !name.starts_with('0')))
        .and_then(|name| name.parse().ok())
}

impl ScriptObject for ArrayObject {
    fn get(&self, key: &PropertyKey) -> Option<Value> {
        if let Some(i) = array_index(key) {
            return self.items.borrow().get(i).cloned();
        }
        match key.as_name()? {
            "length" => Some(Value::Number(self.len() as f64)),
            "push" => {
                let items = Rc::clone(&self.items);
                Some(Value::native("push", move |_, args| {
                    let mut items = items.borrow_mut();
                    items.extend(args.iter().cloned());
                    Ok(Value::Number(items.len() as f64))
                }))
            }
            "indexOf" => {
                let items = Rc::clone(&self.items);
                Some(Value::native("indexOf", move |_, args| {
                    let needle = args.first().cloned().unwrap_or_default();
                    let position = items.borrow().iter().position(|v| v.strict_equals(&needle));
                    Ok(Value::Number(position.map_or(-1.0, |p| p as f64)))
                }))
            }
            "join" => {
                let items = Rc::clone(&self.items);
                Some(Value::native("join", move |_, args| {
                    let separator = args
                        .first()
                        .filter(|v| !v.is_undefined())
                        .map_or_else(|| ",".to_string(), Value::to_display_string);
                    let joined = items
                        .borrow()
                        .iter()
                        .map(|v| if v.is_nullish() { String::new() } else { v.to_display_string() })
                        .collect::<Vec<_>>()
                        .join(&separator);
                    Ok(Value::from(joined))
                }))
            }
            _ => None,
        }
    }

    fn set(&self, key: PropertyKey, value: Value) -> Result<(), ScriptError> {
        let Some(i) = array_index(&key) else {
            return Err(ScriptError::Type(format!("cannot set property '{key}' on array")));
        };
        let mut items = self.items.borrow_mut();
        if i >= items.len() {
            items.resize(i + 1, Value::Undefined);
        }
        items[i] = value;
        Ok(())
    }

    fn delete(&self, key: &PropertyKey) -> Result<bool, ScriptError> {
        if let Some(i) = array_index(key) {
            if let Some(slot) = self.items.borrow_mut().get_mut(i) {
                *slot = Value::Undefined;
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn keys(&self) -> Vec<PropertyKey> {
        (0..self.len()).map(|i| PropertyKey::Name(i.to_string())).collect()
    }

    fn class_name(&self) -> &str {
        "Array"
    }

    fn array_items(&self) -> Option<Vec<Value>> {
        Some(self.items.borrow().clone())
    }
}

// ================================================================
// Functions
// ================================================================

/// Marks host functions the evaluator treats specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intrinsic {
    /// The dynamic-code-evaluation entry point. Calls through the bare
    /// identifier `eval` evaluate in the caller's realm.
    Eval,
}

pub enum FunctionKind {
    Script(Closure),
    Native(NativeFn),
    Bound { target: FunctionRef, this: Value },
}

/// A function created by script code, remembering where it was created.
pub struct Closure {
    pub(crate) def: Rc<FunctionDef>,
    pub(crate) scope: Option<Rc<Scope>>,
    pub(crate) realm: Rc<Realm>,
}

pub struct Function {
    name: String,
    kind: FunctionKind,
    intrinsic: Option<Intrinsic>,
    props: RefCell<PropertyMap>,
}

impl Function {
    pub fn native(
        name: impl Into<String>,
        func: impl Fn(Value, &[Value]) -> Result<Value, ScriptError> + 'static,
    ) -> FunctionRef {
        Rc::new(Self {
            name: name.into(),
            kind: FunctionKind::Native(Rc::new(func)),
            intrinsic: None,
            props: RefCell::new(PropertyMap::new()),
        })
    }

    pub fn intrinsic(
        name: impl Into<String>,
        intrinsic: Intrinsic,
        func: impl Fn(Value, &[Value]) -> Result<Value, ScriptError> + 'static,
    ) -> FunctionRef {
        Rc::new(Self {
            name: name.into(),
            kind: FunctionKind::Native(Rc::new(func)),
            intrinsic: Some(intrinsic),
            props: RefCell::new(PropertyMap::new()),
        })
    }

    /// Returns a copy of `target` whose receiver is always `this`.
    pub fn bind(target: &FunctionRef, this: Value) -> FunctionRef {
        Rc::new(Self {
            name: format!("bound {}", target.name),
            kind: FunctionKind::Bound {
                target: Rc::clone(target),
                this,
            },
            intrinsic: None,
            props: RefCell::new(PropertyMap::new()),
        })
    }

    pub(crate) fn closure(closure: Closure) -> FunctionRef {
        Rc::new(Self {
            name: closure.def.name.clone().unwrap_or_default(),
            kind: FunctionKind::Script(closure),
            intrinsic: None,
            props: RefCell::new(PropertyMap::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &FunctionKind {
        &self.kind
    }

    pub fn intrinsic_kind(&self) -> Option<Intrinsic> {
        self.intrinsic
    }

    /// Whether this function was written in script code.
    pub fn is_script(&self) -> bool {
        matches!(self.kind, FunctionKind::Script(_))
    }

    /// The realm a script function was created in.
    pub fn realm(&self) -> Option<&Rc<Realm>> {
        match &self.kind {
            FunctionKind::Script(closure) => Some(&closure.realm),
            FunctionKind::Bound { target, .. } => target.realm(),
            FunctionKind::Native(_) => None,
        }
    }

    /// Attaches a static property (`Object.keys`, `console.log`).
    pub fn with_property(self: FunctionRef, key: impl Into<PropertyKey>, value: Value) -> FunctionRef {
        self.props
            .borrow_mut()
            .define(key.into(), PropertyDescriptor::data(value));
        self
    }

    pub fn get_property(&self, key: &PropertyKey) -> Option<Value> {
        if let Some(d) = self.props.borrow().get(key) {
            return Some(d.value.clone());
        }
        match key.as_name() {
            Some("name") => Some(Value::from(self.name.as_str())),
            _ => None,
        }
    }

    pub fn set_property(&self, key: PropertyKey, value: Value) {
        self.props.borrow_mut().assign(key, value);
    }

    pub fn delete_property(&self, key: &PropertyKey) -> bool {
        self.props.borrow_mut().remove(key);
        true
    }

    pub fn property_keys(&self) -> Vec<PropertyKey> {
        self.props.borrow().enumerable_keys().cloned().collect()
    }
}
