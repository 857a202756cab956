//! Script-visible host objects: the page global, `document`, elements,
//! `history`, and the intrinsic functions installed on the global.

use realm_script::{
    ArrayObject, Function, FunctionRef, Intrinsic, ObjectRef, PlainObject, PropertyDescriptor,
    PropertyMap, ScriptError, ScriptObject, Value, same_object,
};
use realm_types::PropertyKey;
use std::any::Any;
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use tracing::{debug, info};

use crate::dom::NodeId;
use crate::env::{HostEnvironment, WeakHost, with_host};
use crate::intercept::{HostCall, HostReply};
use crate::timers::TimerId;

/// Keys that initially refer back to the global object itself.
pub const SELF_REFERENCE_KEYS: [&str; 3] = ["window", "self", "globalThis"];

// ================================================================
// Global object
// ================================================================

/// The page's global object.
pub(crate) struct HostGlobal {
    props: RefCell<PropertyMap>,
    /// Self-reference keys not yet overwritten or deleted.
    self_keys: RefCell<Vec<String>>,
    this: Weak<HostGlobal>,
}

impl HostGlobal {
    fn is_self_key(&self, key: &PropertyKey) -> bool {
        key.as_name()
            .is_some_and(|name| self.self_keys.borrow().iter().any(|k| k == name))
    }

    fn forget_self_key(&self, key: &PropertyKey) {
        if let Some(name) = key.as_name() {
            self.self_keys.borrow_mut().retain(|k| k != name);
        }
    }

    fn self_value(&self) -> Option<Value> {
        let this: ObjectRef = self.this.upgrade()?;
        Some(Value::Object(this))
    }

    fn define(&self, key: &str, descriptor: PropertyDescriptor) {
        self.props.borrow_mut().define(key.into(), descriptor);
    }

    fn data(&self, key: &str, value: Value) {
        self.define(key, PropertyDescriptor::data(value));
    }
}

impl ScriptObject for HostGlobal {
    fn get(&self, key: &PropertyKey) -> Option<Value> {
        if self.is_self_key(key) {
            return self.self_value();
        }
        self.props.borrow().get(key).map(|d| d.value.clone())
    }

    fn set(&self, key: PropertyKey, value: Value) -> Result<(), ScriptError> {
        if !self.props.borrow_mut().assign(key.clone(), value) {
            return Err(ScriptError::ReadOnlyProperty(key.to_string()));
        }
        self.forget_self_key(&key);
        Ok(())
    }

    fn delete(&self, key: &PropertyKey) -> Result<bool, ScriptError> {
        let mut props = self.props.borrow_mut();
        if props.get(key).is_some_and(|d| !d.configurable) {
            return Ok(false);
        }
        props.remove(key);
        drop(props);
        self.forget_self_key(key);
        Ok(true)
    }

    fn has(&self, key: &PropertyKey) -> bool {
        self.props.borrow().contains(key)
    }

    fn keys(&self) -> Vec<PropertyKey> {
        self.props.borrow().enumerable_keys().cloned().collect()
    }

    fn descriptor(&self, key: &PropertyKey) -> Option<PropertyDescriptor> {
        let mut descriptor = self.props.borrow().get(key).cloned()?;
        if self.is_self_key(key) {
            descriptor.value = self.self_value().unwrap_or_default();
        }
        Some(descriptor)
    }

    fn class_name(&self) -> &str {
        "Window"
    }
}

/// Builds the global object and installs every intrinsic on it.
pub(crate) fn install(host: WeakHost) -> Rc<HostGlobal> {
    let global = Rc::new_cyclic(|this| HostGlobal {
        props: RefCell::new(PropertyMap::new()),
        self_keys: RefCell::new(SELF_REFERENCE_KEYS.iter().map(|k| k.to_string()).collect()),
        this: this.clone(),
    });

    global.define("undefined", PropertyDescriptor::read_only(Value::Undefined));
    global.define("NaN", PropertyDescriptor::read_only(Value::Number(f64::NAN)));
    global.define("Infinity", PropertyDescriptor::read_only(Value::Number(f64::INFINITY)));
    for key in SELF_REFERENCE_KEYS {
        global.define(key, PropertyDescriptor::data(Value::Undefined));
    }
    global.define(
        "document",
        PropertyDescriptor::read_only(Value::object(DocumentObject { host: host.clone() })),
    );

    global.data("setTimeout", Value::Function(timer_fn(&host, "setTimeout", false)));
    global.data("setInterval", Value::Function(timer_fn(&host, "setInterval", true)));
    global.data("clearTimeout", Value::Function(clear_timer_fn(&host, "clearTimeout")));
    global.data("clearInterval", Value::Function(clear_timer_fn(&host, "clearInterval")));
    global.data("addEventListener", Value::Function(listener_fn(&host, true)));
    global.data("removeEventListener", Value::Function(listener_fn(&host, false)));
    global.data("history", Value::object(HistoryObject { host: host.clone() }));
    global.data("fetch", Value::Function(fetch_fn(&host)));
    global.data("console", Value::object(console_object(&host)));
    global.data("Object", Value::object(PlainObject::new().with("keys", object_keys_fn())));
    global.data("eval", Value::Function(eval_fn(&host)));
    global
}

// ================================================================
// Intrinsic functions
// ================================================================

fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

fn timer_fn(host: &WeakHost, name: &'static str, repeat: bool) -> FunctionRef {
    let host = host.clone();
    Function::native(name, move |_, args| {
        let Value::Function(callback) = arg(args, 0) else {
            return Err(ScriptError::Type(format!("{name}: callback must be a function")));
        };
        let delay = arg(args, 1).to_number();
        let delay_ms = if delay.is_finite() && delay > 0.0 { delay as u64 } else { 0 };
        let extra = args.iter().skip(2).cloned().collect();
        with_host(&host, |env| {
            let reply = env.dispatch(HostCall::SetTimer {
                callback,
                delay_ms,
                repeat,
                args: extra,
            })?;
            Ok(match reply {
                HostReply::Timer(id) => Value::Number(id.0 as f64),
                _ => Value::Undefined,
            })
        })
    })
}

fn clear_timer_fn(host: &WeakHost, name: &'static str) -> FunctionRef {
    let host = host.clone();
    Function::native(name, move |_, args| {
        let Some(n) = arg(args, 0).as_number() else {
            return Ok(Value::Undefined);
        };
        if n < 1.0 || n.fract() != 0.0 {
            return Ok(Value::Undefined);
        }
        with_host(&host, |env| {
            env.dispatch(HostCall::ClearTimer(TimerId(n as u64)))?;
            Ok(Value::Undefined)
        })
    })
}

fn listener_fn(host: &WeakHost, add: bool) -> FunctionRef {
    let host = host.clone();
    let name = if add { "addEventListener" } else { "removeEventListener" };
    Function::native(name, move |_, args| {
        let event = arg(args, 0).to_display_string();
        let Value::Function(callback) = arg(args, 1) else {
            return Ok(Value::Undefined);
        };
        let call = if add {
            HostCall::AddListener { event, callback }
        } else {
            HostCall::RemoveListener { event, callback }
        };
        with_host(&host, |env| {
            env.dispatch(call)?;
            Ok(Value::Undefined)
        })
    })
}

/// `fetch` only accepts the real global (or no receiver) as `this`.
fn fetch_fn(host: &WeakHost) -> FunctionRef {
    let host = host.clone();
    Function::native("fetch", move |this, args| {
        with_host(&host, |env| {
            let receiver_ok = match &this {
                Value::Undefined | Value::Null => true,
                Value::Object(object) => same_object(object, &env.global()),
                _ => false,
            };
            if !receiver_ok {
                return Err(ScriptError::Type("Illegal invocation".into()));
            }
            let url = arg(args, 0).to_display_string();
            debug!(url = %url, "fetch");
            Ok(Value::object(
                PlainObject::new()
                    .with("url", Value::from(url))
                    .with("status", Value::Number(200.0))
                    .with("ok", Value::Bool(true)),
            ))
        })
    })
}

fn console_object(host: &WeakHost) -> PlainObject {
    let log = |level: &'static str| {
        let host = host.clone();
        Value::native(level, move |_, args| {
            let line = args
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(" ");
            with_host(&host, |env| {
                let sandbox = env.current_sandbox();
                let sandbox_id = sandbox.as_ref().map_or("host", |id| id.as_str());
                info!(target: "realm::console", sandbox_id, level, "{line}");
                env.record_console(line);
                Ok(Value::Undefined)
            })
        })
    };
    PlainObject::new()
        .with("log", log("log"))
        .with("warn", log("warn"))
        .with("error", log("error"))
}

fn object_keys_fn() -> Value {
    Value::native("keys", |_, args| {
        let keys = match arg(args, 0) {
            Value::Object(object) => object.keys(),
            Value::Function(func) => func.property_keys(),
            Value::Undefined | Value::Null => {
                return Err(ScriptError::Type(
                    "Cannot convert undefined or null to object".into(),
                ));
            }
            _ => Vec::new(),
        };
        let names = keys
            .into_iter()
            .filter_map(|k| k.as_name().map(Value::from))
            .collect();
        Ok(Value::object(ArrayObject::from_values(names)))
    })
}

/// The dynamic-evaluation intrinsic. Called indirectly it runs in the page realm.
fn eval_fn(host: &WeakHost) -> FunctionRef {
    let host = host.clone();
    Function::intrinsic("eval", Intrinsic::Eval, move |_, args| match arg(args, 0) {
        Value::String(source) => with_host(&host, |env| env.run_script(&source, "eval")),
        other => Ok(other),
    })
}

// ================================================================
// document
// ================================================================

struct DocumentObject {
    host: WeakHost,
}

impl ScriptObject for DocumentObject {
    fn get(&self, key: &PropertyKey) -> Option<Value> {
        let env = self.host.upgrade()?;
        match key.as_name()? {
            "head" => Some(env.element_value(env.head())),
            "body" => Some(env.element_value(env.body())),
            "documentElement" => Some(env.element_value(env.document().root())),
            "createElement" => {
                let host = self.host.clone();
                Some(Value::native("createElement", move |_, args| {
                    let tag = arg(args, 0).to_display_string();
                    with_host(&host, |env| Ok(env.element_value(env.create_element(&tag))))
                }))
            }
            "getElementById" => {
                let host = self.host.clone();
                Some(Value::native("getElementById", move |_, args| {
                    let id = arg(args, 0).to_display_string();
                    with_host(&host, |env| {
                        let node = env.document().get_element_by_id(&id);
                        Ok(node.map_or(Value::Null, |n| env.element_value(n)))
                    })
                }))
            }
            _ => None,
        }
    }

    fn set(&self, key: PropertyKey, _value: Value) -> Result<(), ScriptError> {
        Err(ScriptError::ReadOnlyProperty(key.to_string()))
    }

    fn delete(&self, _key: &PropertyKey) -> Result<bool, ScriptError> {
        Ok(false)
    }

    fn keys(&self) -> Vec<PropertyKey> {
        Vec::new()
    }

    fn class_name(&self) -> &str {
        "HTMLDocument"
    }
}

// ================================================================
// Elements
// ================================================================

/// Script wrapper around one document node.
pub(crate) struct ElementObject {
    host: WeakHost,
    node: NodeId,
    expando: RefCell<PropertyMap>,
}

impl ElementObject {
    pub(crate) fn new(host: WeakHost, node: NodeId) -> Self {
        Self {
            host,
            node,
            expando: RefCell::new(PropertyMap::new()),
        }
    }

    pub(crate) fn node(&self) -> NodeId {
        self.node
    }

    pub(crate) fn belongs_to(&self, host: &HostEnvironment) -> bool {
        self.host.points_to(host)
    }

    fn child_node(env: &HostEnvironment, value: &Value) -> Result<NodeId, ScriptError> {
        env.node_of(value)
            .ok_or_else(|| ScriptError::Type("parameter 1 is not of type 'Node'".into()))
    }
}

impl ScriptObject for ElementObject {
    fn get(&self, key: &PropertyKey) -> Option<Value> {
        let env = self.host.upgrade()?;
        let node = self.node;
        let name = key.as_name()?;
        match name {
            "tagName" => {
                let tag = env.document().tag(node).ok()?.to_ascii_uppercase();
                Some(Value::from(tag))
            }
            "id" => {
                let doc = env.document();
                Some(Value::from(doc.element_id(node).ok()?.unwrap_or_default()))
            }
            "textContent" => Some(Value::from(env.document().text(node).ok()?)),
            "isConnected" => Some(Value::Bool(env.is_attached(node))),
            "parentNode" => {
                let parent = env.document().parent(node).ok()?;
                Some(parent.map_or(Value::Null, |p| env.element_value(p)))
            }
            "childNodes" => {
                let children = env.document().children(node).ok()?.to_vec();
                let values = children.into_iter().map(|c| env.element_value(c)).collect();
                Some(Value::object(ArrayObject::from_values(values)))
            }
            "appendChild" => {
                let host = self.host.clone();
                Some(Value::native("appendChild", move |_, args| {
                    let child = arg(args, 0);
                    with_host(&host, |env| {
                        let child_node = Self::child_node(env, &child)?;
                        env.dispatch(HostCall::InsertChild {
                            parent: node,
                            child: child_node,
                        })?;
                        Ok(child)
                    })
                }))
            }
            "removeChild" => {
                let host = self.host.clone();
                Some(Value::native("removeChild", move |_, args| {
                    let child = arg(args, 0);
                    with_host(&host, |env| {
                        let child_node = Self::child_node(env, &child)?;
                        env.document_mut().remove_child(node, child_node)?;
                        Ok(child)
                    })
                }))
            }
            "remove" => {
                let host = self.host.clone();
                Some(Value::native("remove", move |_, _| {
                    with_host(&host, |env| {
                        env.detach(node)?;
                        Ok(Value::Undefined)
                    })
                }))
            }
            _ => self.expando.borrow().get(key).map(|d| d.value.clone()),
        }
    }

    fn set(&self, key: PropertyKey, value: Value) -> Result<(), ScriptError> {
        let env = self.host.upgrade().ok_or(crate::HostError::Gone)?;
        match key.as_name() {
            Some("id") => env
                .document_mut()
                .set_element_id(self.node, &value.to_display_string())?,
            Some("textContent") => env
                .document_mut()
                .set_text(self.node, &value.to_display_string())?,
            _ => {
                self.expando.borrow_mut().assign(key, value);
            }
        }
        Ok(())
    }

    fn delete(&self, key: &PropertyKey) -> Result<bool, ScriptError> {
        self.expando.borrow_mut().remove(key);
        Ok(true)
    }

    fn keys(&self) -> Vec<PropertyKey> {
        self.expando.borrow().enumerable_keys().cloned().collect()
    }

    fn class_name(&self) -> &str {
        "HTMLElement"
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

// ================================================================
// history
// ================================================================

struct HistoryObject {
    host: WeakHost,
}

impl HistoryObject {
    fn state_fn(&self, push: bool) -> Value {
        let host = self.host.clone();
        let name = if push { "pushState" } else { "replaceState" };
        Value::native(name, move |_, args| {
            let state = arg(args, 0);
            let url = args
                .get(2)
                .filter(|v| !v.is_nullish())
                .map(Value::to_display_string);
            let call = if push {
                HostCall::PushState { state, url }
            } else {
                HostCall::ReplaceState { state, url }
            };
            with_host(&host, |env| {
                env.dispatch(call)?;
                Ok(Value::Undefined)
            })
        })
    }
}

impl ScriptObject for HistoryObject {
    fn get(&self, key: &PropertyKey) -> Option<Value> {
        match key.as_name()? {
            "pushState" => Some(self.state_fn(true)),
            "replaceState" => Some(self.state_fn(false)),
            "back" => {
                let host = self.host.clone();
                Some(Value::native("back", move |_, _| {
                    with_host(&host, |env| {
                        env.history_back();
                        Ok(Value::Undefined)
                    })
                }))
            }
            "length" => {
                let env = self.host.upgrade()?;
                Some(Value::Number(env.history_entries().len() as f64))
            }
            "state" => {
                let env = self.host.upgrade()?;
                Some(env.current_entry().map(|e| e.state).unwrap_or(Value::Null))
            }
            _ => None,
        }
    }

    fn set(&self, key: PropertyKey, _value: Value) -> Result<(), ScriptError> {
        Err(ScriptError::ReadOnlyProperty(key.to_string()))
    }

    fn delete(&self, _key: &PropertyKey) -> Result<bool, ScriptError> {
        Ok(false)
    }

    fn keys(&self) -> Vec<PropertyKey> {
        Vec::new()
    }

    fn class_name(&self) -> &str {
        "History"
    }
}
