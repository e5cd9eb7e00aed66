//! Connection state machine for Strata sync.
//!
//! This module provides a pure, side-effect-free state machine for managing
//! the connection to the sync backend. The state machine takes events as
//! input and produces a new state plus a list of actions to execute.
//!
//! The actual I/O (connecting, closing, replaying the offline queue) is
//! performed by sync-client, not by this module.
//!
//! ```text
//! Disconnected ──ConnectRequested──► Connecting ──ConnectSucceeded──► Connected
//!      ▲                                  │                               │
//!      │                           ConnectFailed                  TransportDropped
//!      │                                  ▼                               │
//!      └──────────────────────────────  Error ◄───────────────────────────┘ (to Disconnected)
//! ```
//!
//! There is no automatic retry: leaving `Error` requires an explicit
//! `ConnectRequested`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection state machine - NO I/O, just state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected to the backend.
    #[default]
    Disconnected,
    /// Connection attempt in progress.
    Connecting,
    /// Connected; remote writes are possible.
    Connected,
    /// The last connection attempt failed. Retried only on request.
    Error,
}

impl ConnectionState {
    /// Create a new state machine in the Disconnected state.
    pub fn new() -> Self {
        Self::Disconnected
    }

    /// Process an event and return the new state plus actions to execute.
    ///
    /// This is a pure function - no side effects. The caller (sync-client)
    /// is responsible for executing the returned actions.
    pub fn on_event(self, event: Event) -> (Self, Vec<Action>) {
        match (self, event) {
            // From Disconnected or Error (explicit retry)
            (Self::Disconnected | Self::Error, Event::ConnectRequested) => (
                Self::Connecting,
                vec![
                    Action::Connect,
                    Action::EmitEvent(SyncEvent::StateChanged {
                        from: self,
                        to: Self::Connecting,
                    }),
                ],
            ),

            // Already connected: connect is a no-op
            (Self::Connected, Event::ConnectRequested) => (Self::Connected, vec![]),

            // From Connecting
            (Self::Connecting, Event::ConnectSucceeded) => (
                Self::Connected,
                vec![
                    Action::EmitEvent(SyncEvent::StateChanged {
                        from: Self::Connecting,
                        to: Self::Connected,
                    }),
                    Action::ReplayQueue,
                ],
            ),
            (Self::Connecting, Event::ConnectFailed { error }) => (
                Self::Error,
                vec![
                    Action::EmitEvent(SyncEvent::StateChanged {
                        from: Self::Connecting,
                        to: Self::Error,
                    }),
                    Action::EmitEvent(SyncEvent::ConnectionFailed { error }),
                ],
            ),

            // From Connected
            (Self::Connected, Event::TransportDropped { reason }) => (
                Self::Disconnected,
                vec![
                    Action::EmitEvent(SyncEvent::StateChanged {
                        from: Self::Connected,
                        to: Self::Disconnected,
                    }),
                    Action::EmitEvent(SyncEvent::Disconnected { reason }),
                ],
            ),

            // Caller-driven disconnect
            (Self::Connected | Self::Connecting, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![
                    Action::Disconnect,
                    Action::EmitEvent(SyncEvent::StateChanged {
                        from: self,
                        to: Self::Disconnected,
                    }),
                    Action::EmitEvent(SyncEvent::Disconnected {
                        reason: "user requested".into(),
                    }),
                ],
            ),
            (Self::Error, Event::DisconnectRequested) => (
                Self::Disconnected,
                vec![Action::EmitEvent(SyncEvent::StateChanged {
                    from: Self::Error,
                    to: Self::Disconnected,
                })],
            ),

            // Invalid transitions - stay in current state
            (state, _) => (state, vec![]),
        }
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Check if a connection attempt is in progress.
    pub fn is_connecting(&self) -> bool {
        matches!(self, Self::Connecting)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Events that can occur in the connection lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Caller requested a connection.
    ConnectRequested,
    /// Backend connection succeeded.
    ConnectSucceeded,
    /// Backend connection failed.
    ConnectFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// The transport went away underneath an established connection.
    TransportDropped {
        /// Reason for the drop.
        reason: String,
    },
    /// Caller requested a disconnect.
    DisconnectRequested,
}

/// Actions to be executed by sync-client.
///
/// These are instructions, not side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the backend connection.
    Connect,
    /// Close the backend connection.
    Disconnect,
    /// Replay operations captured while offline.
    ReplayQueue,
    /// Emit an event to the application.
    EmitEvent(SyncEvent),
}

/// Events emitted to the application layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The connection state changed.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// Connection attempt failed.
    ConnectionFailed {
        /// Error message describing the failure.
        error: String,
    },
    /// Disconnected from the backend.
    Disconnected {
        /// Reason for disconnection.
        reason: String,
    },
}

/// Whether a sync cycle is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncActivity {
    /// No sync in progress.
    #[default]
    Idle,
    /// At least one sync cycle is running.
    Syncing,
}

/// Health snapshot delivered to state listeners and status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct StatusSnapshot {
    /// Connection state.
    pub connection: ConnectionState,
    /// Sync activity.
    pub sync: SyncActivity,
}
