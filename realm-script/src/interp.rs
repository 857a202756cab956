//! Tree-walking evaluator.
//!
//! A [`Realm`] pairs a global object with optional entry hooks. Free
//! identifiers that are not found in a local scope resolve against the
//! realm's global object, and a top-level `this` is that same object, so
//! whoever supplies the global decides what application code can see.

use realm_types::PropertyKey;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;
use tracing::trace;

use crate::ast::*;
use crate::error::ScriptError;
use crate::parser::parse;
use crate::value::{
    ArrayObject, Closure, Function, FunctionKind, FunctionRef, Intrinsic, ObjectRef, PlainObject,
    Value,
};

/// Maximum nesting of function calls before a `RangeError`.
pub const MAX_CALL_DEPTH: usize = 128;

thread_local! {
    static CALL_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Callbacks run around every entry into a realm's code, including
/// callbacks the host invokes later (timers, listeners).
pub trait RealmHooks {
    fn enter(&self);
    fn exit(&self);
}

/// The global environment one piece of code runs against.
pub struct Realm {
    global: ObjectRef,
    hooks: Option<Rc<dyn RealmHooks>>,
}

impl Realm {
    pub fn new(global: ObjectRef) -> Rc<Self> {
        Rc::new(Self {
            global,
            hooks: None,
        })
    }

    pub fn with_hooks(global: ObjectRef, hooks: Rc<dyn RealmHooks>) -> Rc<Self> {
        Rc::new(Self {
            global,
            hooks: Some(hooks),
        })
    }

    pub fn global(&self) -> &ObjectRef {
        &self.global
    }

    /// The global object as a value (what a top-level `this` evaluates to).
    pub fn global_value(&self) -> Value {
        Value::Object(Rc::clone(&self.global))
    }
}

/// Parses and runs `source` in `realm`, returning the completion value.
pub fn run(realm: &Rc<Realm>, source: &str, label: &str) -> Result<Value, ScriptError> {
    let program = parse(source, label)?;
    run_program(realm, &program)
}

/// Runs an already parsed program in `realm`.
pub fn run_program(realm: &Rc<Realm>, program: &Program) -> Result<Value, ScriptError> {
    trace!(label = %program.label, statements = program.body.len(), "running program");
    let _entry = RealmEntry::new(realm);
    let frame = Frame {
        realm: Rc::clone(realm),
        scope: None,
        this: realm.global_value(),
    };
    match exec_block(&frame, &program.body)? {
        Flow::Normal(value) => Ok(value.unwrap_or_default()),
        Flow::Return(value) => Ok(value),
        Flow::Break | Flow::Continue => Ok(Value::Undefined),
    }
}

/// Calls any function value with an explicit receiver.
pub fn call_function(
    func: &FunctionRef,
    this: Value,
    args: Vec<Value>,
) -> Result<Value, ScriptError> {
    let _depth = DepthGuard::enter()?;
    match func.kind() {
        FunctionKind::Native(native) => native(this, &args),
        FunctionKind::Bound { target, this } => call_function(target, this.clone(), args),
        FunctionKind::Script(closure) => {
            let _entry = RealmEntry::new(&closure.realm);
            let scope = Rc::new(Scope::new(closure.scope.clone(), true));
            for (i, param) in closure.def.params.iter().enumerate() {
                scope.define(param, args.get(i).cloned().unwrap_or_default());
            }
            scope.define("arguments", Value::object(ArrayObject::from_values(args)));
            let this = if this.is_nullish() {
                closure.realm.global_value()
            } else {
                this
            };
            let frame = Frame {
                realm: Rc::clone(&closure.realm),
                scope: Some(scope),
                this,
            };
            match exec_block(&frame, &closure.def.body)? {
                Flow::Return(value) => Ok(value),
                _ => Ok(Value::Undefined),
            }
        }
    }
}

// ================================================================
// Scopes and frames
// ================================================================

/// A local variable scope. Globals never live here.
pub struct Scope {
    vars: RefCell<HashMap<String, Value>>,
    parent: Option<Rc<Scope>>,
    function_scope: bool,
}

impl Scope {
    fn new(parent: Option<Rc<Scope>>, function_scope: bool) -> Self {
        Self {
            vars: RefCell::new(HashMap::new()),
            parent,
            function_scope,
        }
    }

    fn define(&self, name: &str, value: Value) {
        self.vars.borrow_mut().insert(name.to_string(), value);
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.vars.borrow().get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    fn assign(&self, name: &str, value: Value) -> Result<(), Value> {
        if let Some(slot) = self.vars.borrow_mut().get_mut(name) {
            *slot = value;
            return Ok(());
        }
        match &self.parent {
            Some(parent) => parent.assign(name, value),
            None => Err(value),
        }
    }

    fn holds(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name) || self.parent.as_ref().is_some_and(|p| p.holds(name))
    }
}

struct Frame {
    realm: Rc<Realm>,
    scope: Option<Rc<Scope>>,
    this: Value,
}

impl Frame {
    fn global(&self) -> &ObjectRef {
        &self.realm.global
    }

    /// Nearest function scope, or `None` for the global scope.
    fn var_scope(&self) -> Option<Rc<Scope>> {
        let mut current = self.scope.clone();
        while let Some(scope) = current {
            if scope.function_scope {
                return Some(scope);
            }
            current = scope.parent.clone();
        }
        None
    }

    fn declare(&self, name: &str, value: Option<Value>) -> Result<(), ScriptError> {
        match self.var_scope() {
            Some(scope) => {
                let exists = scope.vars.borrow().contains_key(name);
                match value {
                    Some(value) => scope.define(name, value),
                    None if !exists => scope.define(name, Value::Undefined),
                    None => {}
                }
                Ok(())
            }
            None => {
                let key = PropertyKey::from(name);
                match value {
                    Some(value) => self.global().set(key, value),
                    None if !self.global().has(&key) => self.global().set(key, Value::Undefined),
                    None => Ok(()),
                }
            }
        }
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = self.scope.as_ref().and_then(|s| s.lookup(name)) {
            return Some(value);
        }
        self.global().get(&PropertyKey::from(name))
    }

    fn resolve(&self, name: &str) -> Result<Value, ScriptError> {
        match self.lookup(name) {
            Some(value) => Ok(value),
            None if name == "undefined" => Ok(Value::Undefined),
            None => Err(ScriptError::Reference(name.to_string())),
        }
    }

    fn assign(&self, name: &str, value: Value) -> Result<(), ScriptError> {
        let value = match &self.scope {
            Some(scope) => match scope.assign(name, value) {
                Ok(()) => return Ok(()),
                Err(value) => value,
            },
            None => value,
        };
        self.global().set(PropertyKey::from(name), value)
    }

    fn is_local(&self, name: &str) -> bool {
        self.scope.as_ref().is_some_and(|s| s.holds(name))
    }

    fn closure(&self, def: &Rc<FunctionDef>) -> Value {
        Value::Function(Function::closure(Closure {
            def: Rc::clone(def),
            scope: self.scope.clone(),
            realm: Rc::clone(&self.realm),
        }))
    }
}

struct RealmEntry<'a>(&'a Realm);

impl<'a> RealmEntry<'a> {
    fn new(realm: &'a Realm) -> Self {
        if let Some(hooks) = &realm.hooks {
            hooks.enter();
        }
        Self(realm)
    }
}

impl Drop for RealmEntry<'_> {
    fn drop(&mut self) {
        if let Some(hooks) = &self.0.hooks {
            hooks.exit();
        }
    }
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> Result<Self, ScriptError> {
        let depth = CALL_DEPTH.with(|d| d.get());
        if depth >= MAX_CALL_DEPTH {
            return Err(ScriptError::Range("Maximum call stack size exceeded".into()));
        }
        CALL_DEPTH.with(|d| d.set(depth + 1));
        Ok(Self)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        CALL_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}

// ================================================================
// Statements
// ================================================================

enum Flow {
    Normal(Option<Value>),
    Return(Value),
    Break,
    Continue,
}

fn hoist(frame: &Frame, body: &[Stmt]) -> Result<(), ScriptError> {
    for stmt in body {
        if let Stmt::Function(def) = stmt {
            if let Some(name) = &def.name {
                frame.declare(name, Some(frame.closure(def)))?;
            }
        }
    }
    Ok(())
}

fn exec_block(frame: &Frame, body: &[Stmt]) -> Result<Flow, ScriptError> {
    hoist(frame, body)?;
    let mut completion = None;
    for stmt in body {
        match exec_stmt(frame, stmt)? {
            Flow::Normal(Some(value)) => completion = Some(value),
            Flow::Normal(None) => {}
            other => return Ok(other),
        }
    }
    Ok(Flow::Normal(completion))
}

fn exec_stmt(frame: &Frame, stmt: &Stmt) -> Result<Flow, ScriptError> {
    match stmt {
        Stmt::Var(declarations) => {
            for (name, init) in declarations {
                let value = init.as_ref().map(|e| eval(frame, e)).transpose()?;
                frame.declare(name, value)?;
            }
            Ok(Flow::Normal(None))
        }
        Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal(None)),
        Stmt::Expr(expr) => Ok(Flow::Normal(Some(eval(frame, expr)?))),
        Stmt::If {
            test,
            consequent,
            alternate,
        } => {
            if eval(frame, test)?.is_truthy() {
                exec_stmt(frame, consequent)
            } else if let Some(alternate) = alternate {
                exec_stmt(frame, alternate)
            } else {
                Ok(Flow::Normal(None))
            }
        }
        Stmt::While { test, body } => {
            while eval(frame, test)?.is_truthy() {
                match exec_stmt(frame, body)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal(_) | Flow::Continue => {}
                }
            }
            Ok(Flow::Normal(None))
        }
        Stmt::For {
            init,
            test,
            update,
            body,
        } => {
            if let Some(init) = init {
                exec_stmt(frame, init)?;
            }
            loop {
                if let Some(test) = test {
                    if !eval(frame, test)?.is_truthy() {
                        break;
                    }
                }
                match exec_stmt(frame, body)? {
                    Flow::Break => break,
                    Flow::Return(value) => return Ok(Flow::Return(value)),
                    Flow::Normal(_) | Flow::Continue => {}
                }
                if let Some(update) = update {
                    eval(frame, update)?;
                }
            }
            Ok(Flow::Normal(None))
        }
        Stmt::Block(body) => exec_block(frame, body),
        Stmt::Return(value) => {
            let value = match value {
                Some(expr) => eval(frame, expr)?,
                None => Value::Undefined,
            };
            Ok(Flow::Return(value))
        }
        Stmt::Break => Ok(Flow::Break),
        Stmt::Continue => Ok(Flow::Continue),
        Stmt::Throw(expr) => Err(ScriptError::Thrown(eval(frame, expr)?)),
        Stmt::Try {
            block,
            param,
            handler,
        } => match exec_block(frame, block) {
            Ok(flow) => Ok(flow),
            Err(error) => {
                let scope = Rc::new(Scope::new(frame.scope.clone(), false));
                if let Some(param) = param {
                    scope.define(param, error.into_value());
                }
                let catch_frame = Frame {
                    realm: Rc::clone(&frame.realm),
                    scope: Some(scope),
                    this: frame.this.clone(),
                };
                exec_block(&catch_frame, handler)
            }
        },
    }
}

// ================================================================
// Expressions
// ================================================================

fn eval(frame: &Frame, expr: &Expr) -> Result<Value, ScriptError> {
    match expr {
        Expr::Literal(literal) => Ok(match literal {
            Literal::Undefined => Value::Undefined,
            Literal::Null => Value::Null,
            Literal::Bool(b) => Value::Bool(*b),
            Literal::Number(n) => Value::Number(*n),
            Literal::String(s) => Value::from(s.as_str()),
        }),
        Expr::Ident(name) => frame.resolve(name),
        Expr::This => Ok(frame.this.clone()),
        Expr::Array(items) => {
            let values = items
                .iter()
                .map(|e| eval(frame, e))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::object(ArrayObject::from_values(values)))
        }
        Expr::Object(props) => {
            let object = PlainObject::new();
            for (key, value) in props {
                object.insert(key.as_str(), eval(frame, value)?);
            }
            Ok(Value::object(object))
        }
        Expr::Function(def) => Ok(frame.closure(def)),
        Expr::Member { object, key } => {
            let object = eval(frame, object)?;
            let key = member_key(frame, key)?;
            get_member(&object, &key)
        }
        Expr::Call { callee, args } => eval_call(frame, callee, args),
        Expr::Assign { op, target, value } => eval_assign(frame, *op, target, value),
        Expr::Binary { op, left, right } => {
            let left = eval(frame, left)?;
            let right = eval(frame, right)?;
            binary(*op, &left, &right)
        }
        Expr::Logical { op, left, right } => {
            let left = eval(frame, left)?;
            match (op, left.is_truthy()) {
                (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                _ => eval(frame, right),
            }
        }
        Expr::Unary { op, operand } => eval_unary(frame, *op, operand),
        Expr::Conditional {
            test,
            consequent,
            alternate,
        } => {
            if eval(frame, test)?.is_truthy() {
                eval(frame, consequent)
            } else {
                eval(frame, alternate)
            }
        }
        Expr::Sequence(items) => {
            let mut last = Value::Undefined;
            for item in items {
                last = eval(frame, item)?;
            }
            Ok(last)
        }
    }
}

fn member_key(frame: &Frame, key: &MemberKey) -> Result<PropertyKey, ScriptError> {
    match key {
        MemberKey::Static(name) => Ok(PropertyKey::from(name.as_str())),
        MemberKey::Computed(expr) => Ok(PropertyKey::from(eval(frame, expr)?.to_display_string())),
    }
}

/// Reads `value[key]` the way a member expression does.
pub fn get_member(value: &Value, key: &PropertyKey) -> Result<Value, ScriptError> {
    match value {
        Value::Object(object) => Ok(object.get(key).unwrap_or_default()),
        Value::Function(func) => Ok(func.get_property(key).unwrap_or_default()),
        Value::String(s) => Ok(match key.as_name() {
            Some("length") => Value::Number(s.chars().count() as f64),
            Some(name) => name
                .parse::<usize>()
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| Value::from(c.to_string()))
                .unwrap_or_default(),
            None => Value::Undefined,
        }),
        Value::Undefined | Value::Null => Err(ScriptError::Type(format!(
            "Cannot read properties of {} (reading '{key}')",
            value.to_display_string()
        ))),
        Value::Bool(_) | Value::Number(_) => Ok(Value::Undefined),
    }
}

fn set_member(target: &Value, key: PropertyKey, value: Value) -> Result<(), ScriptError> {
    match target {
        Value::Object(object) => object.set(key, value),
        Value::Function(func) => {
            func.set_property(key, value);
            Ok(())
        }
        Value::Undefined | Value::Null => Err(ScriptError::Type(format!(
            "Cannot set properties of {} (setting '{key}')",
            target.to_display_string()
        ))),
        _ => Ok(()),
    }
}

fn eval_call(frame: &Frame, callee: &Expr, args: &[Expr]) -> Result<Value, ScriptError> {
    let (func, this) = match callee {
        Expr::Member { object, key } => {
            let object = eval(frame, object)?;
            let key = member_key(frame, key)?;
            (get_member(&object, &key)?, object)
        }
        Expr::Ident(name) => {
            let func = frame.resolve(name)?;
            if name == "eval"
                && func
                    .as_function()
                    .is_some_and(|f| f.intrinsic_kind() == Some(Intrinsic::Eval))
            {
                return direct_eval(frame, args);
            }
            (func, Value::Undefined)
        }
        other => (eval(frame, other)?, Value::Undefined),
    };
    let args = args
        .iter()
        .map(|e| eval(frame, e))
        .collect::<Result<Vec<_>, _>>()?;
    match func {
        Value::Function(func) => call_function(&func, this, args),
        other => Err(ScriptError::Type(format!(
            "{} is not a function",
            describe_callee(callee, &other)
        ))),
    }
}

fn describe_callee(callee: &Expr, value: &Value) -> String {
    match callee {
        Expr::Ident(name) => name.clone(),
        Expr::Member {
            key: MemberKey::Static(name),
            ..
        } => name.clone(),
        _ => value.to_display_string(),
    }
}

/// `eval(src)` through the bare identifier: runs in the caller's scope.
fn direct_eval(frame: &Frame, args: &[Expr]) -> Result<Value, ScriptError> {
    let _depth = DepthGuard::enter()?;
    let mut values = args
        .iter()
        .map(|e| eval(frame, e))
        .collect::<Result<Vec<_>, _>>()?;
    if values.is_empty() {
        return Ok(Value::Undefined);
    }
    let source = values.swap_remove(0);
    let Some(text) = source.as_str() else {
        return Ok(source);
    };
    let program = parse(text, "eval")?;
    match exec_block(frame, &program.body)? {
        Flow::Normal(value) => Ok(value.unwrap_or_default()),
        Flow::Return(value) => Ok(value),
        Flow::Break | Flow::Continue => Ok(Value::Undefined),
    }
}

fn eval_assign(
    frame: &Frame,
    op: AssignOp,
    target: &Expr,
    value: &Expr,
) -> Result<Value, ScriptError> {
    match target {
        Expr::Ident(name) => {
            let rhs = eval(frame, value)?;
            let result = match op {
                AssignOp::Assign => rhs,
                AssignOp::Add => binary(BinaryOp::Add, &frame.resolve(name)?, &rhs)?,
                AssignOp::Sub => binary(BinaryOp::Sub, &frame.resolve(name)?, &rhs)?,
            };
            frame.assign(name, result.clone())?;
            Ok(result)
        }
        Expr::Member { object, key } => {
            let object = eval(frame, object)?;
            let key = member_key(frame, key)?;
            let rhs = eval(frame, value)?;
            let result = match op {
                AssignOp::Assign => rhs,
                AssignOp::Add => binary(BinaryOp::Add, &get_member(&object, &key)?, &rhs)?,
                AssignOp::Sub => binary(BinaryOp::Sub, &get_member(&object, &key)?, &rhs)?,
            };
            set_member(&object, key, result.clone())?;
            Ok(result)
        }
        _ => Err(ScriptError::Type("invalid assignment target".into())),
    }
}

fn eval_unary(frame: &Frame, op: UnaryOp, operand: &Expr) -> Result<Value, ScriptError> {
    match op {
        UnaryOp::TypeOf => {
            let value = match operand {
                Expr::Ident(name) => frame.lookup(name).unwrap_or_default(),
                other => eval(frame, other)?,
            };
            Ok(Value::from(value.type_of()))
        }
        UnaryOp::Delete => match operand {
            Expr::Ident(name) => {
                if frame.is_local(name) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(frame.global().delete(&PropertyKey::from(name.as_str()))?))
            }
            Expr::Member { object, key } => {
                let object = eval(frame, object)?;
                let key = member_key(frame, key)?;
                let deleted = match &object {
                    Value::Object(o) => o.delete(&key)?,
                    Value::Function(f) => f.delete_property(&key),
                    Value::Undefined | Value::Null => {
                        return Err(ScriptError::Type(format!(
                            "Cannot convert undefined or null to object (deleting '{key}')"
                        )));
                    }
                    _ => true,
                };
                Ok(Value::Bool(deleted))
            }
            other => {
                eval(frame, other)?;
                Ok(Value::Bool(true))
            }
        },
        UnaryOp::Not => Ok(Value::Bool(!eval(frame, operand)?.is_truthy())),
        UnaryOp::Neg => Ok(Value::Number(-eval(frame, operand)?.to_number())),
        UnaryOp::Plus => Ok(Value::Number(eval(frame, operand)?.to_number())),
        UnaryOp::Void => {
            eval(frame, operand)?;
            Ok(Value::Undefined)
        }
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ScriptError> {
    Ok(match op {
        BinaryOp::Add => {
            let stringy = |v: &Value| matches!(v, Value::String(_) | Value::Object(_) | Value::Function(_));
            if stringy(left) || stringy(right) {
                Value::from(format!("{}{}", left.to_display_string(), right.to_display_string()))
            } else {
                Value::Number(left.to_number() + right.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let ordering = match (left, right) {
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => left.to_number().partial_cmp(&right.to_number()),
            };
            let Some(ordering) = ordering else {
                return Ok(Value::Bool(false));
            };
            Value::Bool(match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::LtEq => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            })
        }
        BinaryOp::In => {
            let key = PropertyKey::from(left.to_display_string());
            match right {
                Value::Object(object) => Value::Bool(object.has(&key)),
                Value::Function(func) => Value::Bool(func.get_property(&key).is_some()),
                other => {
                    return Err(ScriptError::Type(format!(
                        "Cannot use 'in' operator to search for '{key}' in {}",
                        other.to_display_string()
                    )));
                }
            }
        }
    })
}
