//! Sandbox lifecycle states, phases and patcher kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

/// Lifecycle state of a sandbox controller.
///
/// Effect patchers are installed iff the state is `Mounted`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxState {
    Created,
    Mounted,
    Unmounted,
}

impl SandboxState {
    /// Whether `mount` is a real transition from this state.
    pub fn can_mount(&self) -> bool {
        matches!(self, Self::Created | Self::Unmounted)
    }

    pub fn is_mounted(&self) -> bool {
        matches!(self, Self::Mounted)
    }

    /// Stable string tag for structured logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Mounted => "mounted",
            Self::Unmounted => "unmounted",
        }
    }
}

impl fmt::Display for SandboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The phase an application was in when something went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecyclePhase {
    /// Evaluating the application's script units.
    Load,
    Bootstrap,
    Mount,
    Unmount,
    /// A direct `run` of a code unit by the host.
    Run,
    /// A timer or listener callback fired by the host.
    Callback,
}

impl LifecyclePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Bootstrap => "bootstrap",
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Run => "run",
            Self::Callback => "callback",
        }
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class of global side effect owned by one patcher.
///
/// The derived ordering is the install order: timers before listeners
/// before DOM insertion before history. Uninstall runs in reverse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PatcherKind {
    Timer,
    Listener,
    DomInsertion,
    History,
}

impl PatcherKind {
    /// All kinds, in install order.
    pub const ALL: [PatcherKind; 4] = [
        PatcherKind::Timer,
        PatcherKind::Listener,
        PatcherKind::DomInsertion,
        PatcherKind::History,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Listener => "listener",
            Self::DomInsertion => "dom-insertion",
            Self::History => "history",
        }
    }
}

impl fmt::Display for PatcherKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PatcherKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| Error::UnknownPatcherKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn install_order_follows_ordering() {
        let mut kinds = vec![
            PatcherKind::History,
            PatcherKind::Timer,
            PatcherKind::DomInsertion,
            PatcherKind::Listener,
        ];
        kinds.sort();
        assert_eq!(kinds, PatcherKind::ALL.to_vec());
    }

    #[test]
    fn patcher_kind_parses_kebab_case() {
        assert_eq!("dom-insertion".parse::<PatcherKind>().unwrap(), PatcherKind::DomInsertion);
        assert!("dom_insertion".parse::<PatcherKind>().is_err());
        let json = serde_json::to_string(&PatcherKind::DomInsertion).unwrap();
        assert_eq!(json, "\"dom-insertion\"");
    }

    #[test]
    fn mountable_states() {
        assert!(SandboxState::Created.can_mount());
        assert!(SandboxState::Unmounted.can_mount());
        assert!(!SandboxState::Mounted.can_mount());
        assert!(SandboxState::Mounted.is_mounted());
    }
}
