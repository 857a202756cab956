//! Script engine for application code running inside a sandbox.
//!
//! Application units are parsed into a small syntax tree and evaluated
//! against a [`Realm`]. The realm's global object is any [`ScriptObject`],
//! which is the seam the sandbox uses to put its membrane between the
//! application and the host page.
//!
//! The language is a pragmatic subset of ECMAScript: `var`/`let`,
//! functions and closures, objects, arrays, `try`/`catch`, `typeof`,
//! `delete`, `in`, and direct versus indirect `eval`.

pub mod ast;
mod error;
mod interp;
mod lexer;
mod parser;
mod value;

pub use error::ScriptError;
pub use interp::{MAX_CALL_DEPTH, Realm, RealmHooks, call_function, get_member, run, run_program};
pub use parser::{MAX_NESTING, parse};
pub use value::{
    ArrayObject, Closure, Function, FunctionKind, FunctionRef, Intrinsic, NativeFn, ObjectRef,
    PlainObject, PropertyDescriptor, PropertyMap, ScriptObject, Value, same_object,
};
