//! Error types for the host environment.

use realm_script::ScriptError;
use thiserror::Error;

use crate::dom::NodeId;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("unknown node: {0}")]
    UnknownNode(NodeId),

    #[error("node {0} is not attached to the document")]
    Detached(NodeId),

    #[error("cannot insert node {child} into {parent}: the new child is an ancestor of the parent")]
    HierarchyRequest { parent: NodeId, child: NodeId },

    #[error("node {child} is not a child of {parent}")]
    NotAChild { parent: NodeId, child: NodeId },

    #[error("host environment has been dropped")]
    Gone,

    #[error("host call refused: {0}")]
    Refused(String),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Surfaces host failures to script code as exceptions.
impl From<HostError> for ScriptError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Script(inner) => inner,
            other => ScriptError::Type(other.to_string()),
        }
    }
}
