//! Error types for the script engine.

use thiserror::Error;

use crate::value::{PlainObject, Value};

/// An error raised while parsing or evaluating application code.
///
/// Every variant except `Syntax` corresponds to an exception the script
/// itself could have caught with `try/catch`; `Thrown` carries the exact
/// value the script threw.
#[derive(Debug, Clone, Error)]
pub enum ScriptError {
    #[error("SyntaxError: {message} ({label}:{line}:{column})")]
    Syntax {
        message: String,
        label: String,
        line: u32,
        column: u32,
    },

    #[error("ReferenceError: {0} is not defined")]
    Reference(String),

    #[error("TypeError: {0}")]
    Type(String),

    #[error("RangeError: {0}")]
    Range(String),

    #[error("TypeError: Cannot assign to read only property '{0}' of object")]
    ReadOnlyProperty(String),

    /// A write reached a global object that does not accept writes right now.
    #[error("TypeError: global object is inactive, write to '{0}' refused")]
    Inactive(String),

    #[error("Uncaught {}", .0.to_display_string())]
    Thrown(Value),
}

impl ScriptError {
    /// The JavaScript error name this failure surfaces as.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Syntax { .. } => "SyntaxError",
            Self::Reference(_) => "ReferenceError",
            Self::Type(_) | Self::ReadOnlyProperty(_) | Self::Inactive(_) => "TypeError",
            Self::Range(_) => "RangeError",
            Self::Thrown(_) => "Error",
        }
    }

    /// Converts the error into the value a `catch` clause binds.
    pub fn into_value(self) -> Value {
        match self {
            Self::Thrown(value) => value,
            other => {
                let name = other.name();
                let message = other.message();
                let object = PlainObject::new();
                object.insert("name", Value::from(name));
                object.insert("message", Value::from(message));
                Value::object(object)
            }
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Syntax { message, .. } => message.clone(),
            Self::Reference(name) => format!("{name} is not defined"),
            Self::Type(message) | Self::Range(message) => message.clone(),
            Self::ReadOnlyProperty(key) => {
                format!("Cannot assign to read only property '{key}' of object")
            }
            Self::Inactive(key) => format!("global object is inactive, write to '{key}' refused"),
            Self::Thrown(value) => value.to_display_string(),
        }
    }
}
