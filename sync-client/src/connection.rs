//! Connection lifecycle.
//!
//! [`ConnectionManager`] drives the pure state machine from sync-core and
//! executes its actions against a [`Backend`]. It also tracks whether a sync
//! pass is running, and reports both through state listeners.
//!
//! ```text
//! Application → ConnectionManager → Backend
//!                      ↓
//!          sync-core (pure state machine)
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use sync_core::{
    Action, ConnectionState, Event, ListenerHandle, ListenerSet, StatusSnapshot, SyncActivity,
    SyncEvent,
};
use tokio::sync::Mutex as AsyncMutex;

use crate::backend::Backend;
use crate::error::ConnectionError;

/// Owns the connection state and the backend session.
pub struct ConnectionManager<B: Backend> {
    backend: Arc<B>,
    state: Mutex<ConnectionState>,
    /// Serializes connect and disconnect.
    gate: AsyncMutex<()>,
    /// Set while a connect attempt is running; callers queued behind it
    /// take its outcome instead of trying again.
    attempt_in_flight: AtomicBool,
    last_outcome: Mutex<Result<(), ConnectionError>>,
    active_syncs: AtomicUsize,
    listeners: ListenerSet<StatusSnapshot>,
}

impl<B: Backend> ConnectionManager<B> {
    /// Create a manager in the Disconnected state.
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            state: Mutex::new(ConnectionState::new()),
            gate: AsyncMutex::new(()),
            attempt_in_flight: AtomicBool::new(false),
            last_outcome: Mutex::new(Ok(())),
            active_syncs: AtomicUsize::new(0),
            listeners: ListenerSet::new(),
        }
    }

    /// Connect to the backend.
    ///
    /// A no-op when already connected. Concurrent calls serialize: a caller
    /// that waited behind another attempt returns that attempt's outcome.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        self.connect_inner().await.map(|_| ())
    }

    /// Like [`connect`](Self::connect), but reports whether this call
    /// performed the transition (and the offline queue should be replayed).
    pub(crate) async fn connect_inner(&self) -> Result<bool, ConnectionError> {
        let waited_on_attempt = self.attempt_in_flight.load(Ordering::SeqCst);
        let _gate = self.gate.lock().await;

        if waited_on_attempt {
            return lock(&self.last_outcome).clone().map(|_| false);
        }
        if self.state().is_connected() {
            return Ok(false);
        }

        self.attempt_in_flight.store(true, Ordering::SeqCst);
        let actions = self.transition(Event::ConnectRequested);
        let mut outcome = Ok(false);

        if actions.iter().any(|a| matches!(a, Action::Connect)) {
            tracing::info!("connecting to backend");
            outcome = match self.backend.connect().await {
                Ok(()) => {
                    let actions = self.transition(Event::ConnectSucceeded);
                    Ok(actions.iter().any(|a| matches!(a, Action::ReplayQueue)))
                }
                Err(e) => {
                    self.transition(Event::ConnectFailed {
                        error: e.to_string(),
                    });
                    Err(ConnectionError::Failed(e.to_string()))
                }
            };
        }

        *lock(&self.last_outcome) = outcome.clone().map(|_| ());
        self.attempt_in_flight.store(false, Ordering::SeqCst);
        outcome
    }

    /// Disconnect from the backend. Idempotent.
    pub async fn disconnect(&self) {
        let _gate = self.gate.lock().await;
        let actions = self.transition(Event::DisconnectRequested);
        if actions.iter().any(|a| matches!(a, Action::Disconnect)) {
            if let Err(e) = self.backend.close().await {
                tracing::warn!("error closing backend session: {}", e);
            }
        }
    }

    /// Report that the backend session went away underneath us.
    pub fn transport_dropped(&self, reason: &str) {
        self.transition(Event::TransportDropped {
            reason: reason.to_string(),
        });
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *lock(&self.state)
    }

    /// Check if currently connected.
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Current health snapshot.
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            connection: self.state(),
            sync: self.activity(),
        }
    }

    fn activity(&self) -> SyncActivity {
        if self.active_syncs.load(Ordering::SeqCst) > 0 {
            SyncActivity::Syncing
        } else {
            SyncActivity::Idle
        }
    }

    /// Register a listener for status changes.
    pub fn add_state_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&StatusSnapshot) + Send + Sync + 'static,
    {
        self.listeners.add(listener)
    }

    /// Mark a sync pass as running until the returned guard is dropped.
    pub fn begin_sync(&self) -> SyncActivityGuard<'_, B> {
        if self.active_syncs.fetch_add(1, Ordering::SeqCst) == 0 {
            self.listeners.emit(&self.status());
        }
        SyncActivityGuard { manager: self }
    }

    fn end_sync(&self) {
        if self.active_syncs.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.listeners.emit(&self.status());
        }
    }

    /// Run one event through the state machine and perform the resulting
    /// notifications. Backend actions are returned for the caller.
    fn transition(&self, event: Event) -> Vec<Action> {
        let actions = {
            let mut state = lock(&self.state);
            let (next, actions) = state.on_event(event);
            *state = next;
            actions
        };

        for action in &actions {
            match action {
                Action::EmitEvent(SyncEvent::StateChanged { from, to }) => {
                    tracing::info!("connection state: {} -> {}", from, to);
                    self.listeners.emit(&StatusSnapshot {
                        connection: *to,
                        sync: self.activity(),
                    });
                }
                Action::EmitEvent(SyncEvent::ConnectionFailed { error }) => {
                    tracing::warn!("connection failed: {}", error);
                }
                Action::EmitEvent(SyncEvent::Disconnected { reason }) => {
                    tracing::info!("disconnected: {}", reason);
                }
                Action::ReplayQueue => tracing::debug!("offline queue replay requested"),
                Action::Connect | Action::Disconnect => {}
            }
        }
        actions
    }
}

impl<B: Backend> std::fmt::Debug for ConnectionManager<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("status", &self.status())
            .finish()
    }
}

/// Keeps the manager in the Syncing state while alive.
pub struct SyncActivityGuard<'a, B: Backend> {
    manager: &'a ConnectionManager<B>,
}

impl<B: Backend> Drop for SyncActivityGuard<'_, B> {
    fn drop(&mut self) {
        self.manager.end_sync();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
