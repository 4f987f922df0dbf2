//! Tag-encoding session type definitions

use serde::{Deserialize, Serialize};

/// Lifecycle state of a tag-encoding session
///
/// `Waiting → Encoding → {Success | Failure}`; `Cancelled` is reachable from
/// any non-terminal state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncodingState {
    /// Waiting for a tag to be presented
    Waiting,
    /// Tag detected, write in progress
    Encoding,
    Success,
    Failure,
    Cancelled,
}

impl EncodingState {
    /// Terminal states release the encoding slot
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EncodingState::Success | EncodingState::Failure | EncodingState::Cancelled
        )
    }
}

impl std::fmt::Display for EncodingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncodingState::Waiting => write!(f, "waiting"),
            EncodingState::Encoding => write!(f, "encoding"),
            EncodingState::Success => write!(f, "success"),
            EncodingState::Failure => write!(f, "failure"),
            EncodingState::Cancelled => write!(f, "cancelled"),
        }
    }
}
