//! Core type definitions for the realm sandbox.
//!
//! This crate defines the small, engine-agnostic types shared by every
//! other crate in the workspace:
//! - Sandbox identifiers
//! - Global property keys (names and symbols)
//! - Sandbox lifecycle states and phases
//! - Effect patcher kinds and their fixed install order
//!
//! Anything that knows about script values, the host page, or the membrane
//! belongs in its own crate, not here.

mod ids;
mod key;
mod state;

pub use ids::SandboxId;
pub use key::{PropertyKey, Symbol};
pub use state::{LifecyclePhase, PatcherKind, SandboxState};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid sandbox id: {0}")]
    InvalidSandboxId(String),

    #[error("unknown patcher kind: {0}")]
    UnknownPatcherKind(String),
}
