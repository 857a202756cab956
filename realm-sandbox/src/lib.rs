//! Per-application sandboxes for micro-frontends sharing one host page.
//!
//! A [`Sandbox`] gives one application:
//! - a [`Membrane`] that is its global object, layering its own
//!   [`GlobalRecord`] over the host's [`EndowmentSet`] and the real global;
//! - a [`Compartment`] that runs its code against that membrane;
//! - effect patchers that record the timers, listeners, history entries and
//!   DOM insertions it makes, and reverse them on unmount.
//!
//! [`SandboxManager`] keeps the sandboxes of one host, and [`MicroApp`]
//! drives the asynchronous `bootstrap` / `mount` / `unmount` lifecycle.

mod compartment;
mod config;
mod endowments;
mod error;
mod lifecycle;
mod manager;
mod membrane;
pub mod patchers;
mod record;
mod sandbox;

pub use compartment::{CodeUnit, Compartment};
pub use config::{InactiveWrites, RecoveryMode, SandboxConfig, SandboxOptions};
pub use endowments::EndowmentSet;
pub use error::{AppFailure, Result, SandboxError};
pub use lifecycle::{AppProps, LifecycleHooks, MicroApp, ScriptedApp};
pub use manager::SandboxManager;
pub use membrane::{Described, Layer, Membrane, MembranePolicy};
pub use patchers::{PatchContext, Patcher, PatcherHandle};
pub use record::{GlobalRecord, Slot};
pub use sandbox::Sandbox;
