// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Session connection state.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a provider session.
///
/// A session only advances `Disconnected -> Connecting -> Connected ->
/// Initializing -> Ready`, and returns to `Disconnected` from any state on
/// teardown or failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// No connection.
    #[default]
    Disconnected,

    /// Opening the connection.
    Connecting,

    /// Connection open, handshake not yet run.
    Connected,

    /// Running the handshake.
    Initializing,

    /// Handshake complete; tools may be called.
    Ready,
}

impl SessionState {
    /// Check if `next` is a legal transition from this state.
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Connected)
                | (Connected, Initializing)
                | (Initializing, Ready)
                | (_, Disconnected)
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Initializing => write!(f, "initializing"),
            Self::Ready => write!(f, "ready"),
        }
    }
}
