//! Error types for sandboxes.

use realm_host::HostError;
use realm_script::ScriptError;
use realm_types::{LifecyclePhase, PatcherKind, SandboxId, SandboxState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("sandbox '{sandbox_id}' cannot {operation} while {state}")]
    State {
        sandbox_id: SandboxId,
        operation: &'static str,
        state: SandboxState,
    },

    #[error("sandbox '{sandbox_id}': cannot assign to read only global '{key}'")]
    ReadOnlyProperty { sandbox_id: SandboxId, key: String },

    #[error("application error in sandbox '{sandbox_id}' during {phase} ({label}): {source}")]
    ApplicationExecution {
        sandbox_id: SandboxId,
        phase: LifecyclePhase,
        label: String,
        source: AppFailure,
    },

    #[error("sandbox not found: {0}")]
    NotFound(SandboxId),

    #[error("{kind} patcher: {message}")]
    Patcher { kind: PatcherKind, message: String },

    #[error("host error: {0}")]
    Host(#[from] HostError),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Types(#[from] realm_types::Error),
}

impl SandboxError {
    /// The script error behind an application failure, if there is one.
    pub fn script_error(&self) -> Option<&ScriptError> {
        match self {
            Self::ApplicationExecution {
                source: AppFailure::Script(err),
                ..
            } => Some(err),
            _ => None,
        }
    }
}

/// What went wrong inside application code or a lifecycle hook.
#[derive(Debug, Error)]
pub enum AppFailure {
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// A failure from a hook implemented in Rust.
    #[error(transparent)]
    Hook(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
