//! Per-connection identification state.
//!
//! ```text
//! Unidentified ──register──▶ Device(id) ─┐
//!      │                                  ├──close──▶ Closed
//!      └────────register──▶ Admin ───────┘
//! ```
//!
//! Identification happens once; a new connection always starts over.

use crate::handle::{ConnectionHandle, ConnectionId};

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No valid `register` seen yet.
    Unidentified,
    /// Registered as the given device.
    Device(String),
    /// Registered as an admin console.
    Admin,
    /// Transport closed; no further work is accepted.
    Closed,
}

/// A streaming connection as seen by the router.
#[derive(Debug)]
pub struct Session {
    handle: ConnectionHandle,
    state: SessionState,
}

impl Session {
    /// Start a session for a freshly accepted connection.
    #[must_use]
    pub fn new(handle: ConnectionHandle) -> Self {
        Self {
            handle,
            state: SessionState::Unidentified,
        }
    }

    /// Get the connection's handle.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Get the connection id.
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        self.handle.id()
    }

    /// Get the current state.
    #[must_use]
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The device id, if registered as a device.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Device(id) => Some(id),
            _ => None,
        }
    }

    /// Check if the session is still waiting for `register`.
    #[must_use]
    pub fn is_unidentified(&self) -> bool {
        self.state == SessionState::Unidentified
    }

    /// Check if the session has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }

    pub(crate) fn identify(&mut self, state: SessionState) {
        debug_assert!(self.is_unidentified());
        self.state = state;
    }

    /// Move to `Closed`, returning the state the session was in.
    pub(crate) fn close(&mut self) -> SessionState {
        std::mem::replace(&mut self.state, SessionState::Closed)
    }
}
