//! The host page that sandboxed applications run against.
//!
//! [`HostEnvironment`] owns the real global object and every piece of
//! shared page state an application can change: pending timers, window
//! event listeners, the session history stack and the document tree.
//! Side-effecting calls from scripts are reified as [`HostCall`]s and pass
//! through a chain of [`Interceptor`]s before the host performs them; that
//! chain is where effect patchers attach.
//!
//! Time is virtual. Nothing fires until the embedder calls
//! [`HostEnvironment::advance`].

mod dom;
mod env;
mod error;
mod events;
mod globals;
mod history;
mod intercept;
mod timers;

pub use dom::{Document, NodeId};
pub use env::{HostEnvironment, WeakHost};
pub use error::HostError;
pub use events::ListenerId;
pub use globals::SELF_REFERENCE_KEYS;
pub use history::{EntryId, HistoryEntry};
pub use intercept::{ApiFamily, HostCall, HostReply, Interceptor, InterceptorId, Next};
pub use timers::TimerId;

/// Result type alias using the host error type.
pub type Result<T> = std::result::Result<T, HostError>;
