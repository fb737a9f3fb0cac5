//! Envelope routing for deskrelay.
//!
//! The router interprets each envelope against the sending connection's
//! session and performs every side effect: registry updates, history
//! appends, and fan-out to devices and admins.

use crate::handle::{ConnectionHandle, ConnectionId};
use crate::registry::{ConnectionRegistry, Reachability};
use crate::session::{Session, SessionState};
use crate::store::{ConversationStore, StoreError};
use deskrelay_protocol::{DeviceInfo, Envelope, Event, MessageRecord, Registration};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Router errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RouterError {
    /// The device has never registered.
    #[error("Device not found: {0}")]
    NotFound(String),

    /// The device is known but has no live connection.
    #[error("Device unreachable: {0}")]
    DeviceUnreachable(String),
}

/// Router configuration.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Name admins speak as.
    pub admin_name: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            admin_name: "IT".to_string(),
        }
    }
}

/// The central message router.
pub struct Router {
    registry: ConnectionRegistry,
    store: Arc<ConversationStore>,
    admin_name: RwLock<String>,
}

impl Router {
    /// Create a router with default configuration.
    #[must_use]
    pub fn new(store: Arc<ConversationStore>) -> Self {
        Self::with_config(store, RouterConfig::default())
    }

    /// Create a router with custom configuration.
    #[must_use]
    pub fn with_config(store: Arc<ConversationStore>, config: RouterConfig) -> Self {
        info!("Creating router with config: {:?}", config);
        Self {
            registry: ConnectionRegistry::new(Arc::clone(&store)),
            store,
            admin_name: RwLock::new(config.admin_name),
        }
    }

    /// Get the connection registry.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Get the current admin display name.
    #[must_use]
    pub fn admin_name(&self) -> String {
        self.admin_name
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Change the admin display name for subsequent messages.
    pub fn set_admin_name(&self, name: impl Into<String>) {
        let name = name.into();
        info!(admin_name = %name, "Admin name changed");
        *self.admin_name.write().unwrap_or_else(PoisonError::into_inner) = name;
    }

    /// Get router statistics.
    #[must_use]
    pub fn stats(&self) -> RouterStats {
        RouterStats {
            device_count: self.registry.device_count(),
            online_count: self.registry.online_count(),
            admin_count: self.registry.admin_count(),
        }
    }

    /// Process one envelope received on `session`.
    pub fn handle(&self, session: &mut Session, envelope: Envelope) {
        let connection = session.connection_id().clone();
        trace!(connection = %connection, kind = envelope.kind().as_str(), "Envelope");

        if session.is_closed() {
            debug!(connection = %connection, "Envelope after close ignored");
            return;
        }

        match envelope {
            Envelope::Register {
                role,
                client_id,
                hostname,
                username,
                platform,
            } => {
                let registration = Registration::resolve(
                    role,
                    client_id.as_deref(),
                    hostname.as_deref(),
                    username.as_deref(),
                    platform.as_deref(),
                );
                self.register(session, registration);
            }

            Envelope::ChatMessage { message, to } => match session.state() {
                SessionState::Device(id) => {
                    let id = id.clone();
                    if self.is_current(&id, &connection) {
                        self.device_message(&id, message);
                    }
                }
                SessionState::Admin => match to {
                    Some(target) => {
                        if let Err(e) = self.send_to_device(&target, message) {
                            warn!(connection = %connection, error = %e, "Admin message not delivered");
                        }
                    }
                    None => warn!(connection = %connection, "Admin message without target dropped"),
                },
                SessionState::Unidentified | SessionState::Closed => {
                    debug!(connection = %connection, "Chat before register ignored");
                }
            },

            Envelope::Typing { is_typing, to } => match session.state() {
                SessionState::Device(id) => {
                    let id = id.clone();
                    if self.is_current(&id, &connection) {
                        self.device_typing(&id, is_typing);
                    }
                }
                SessionState::Admin => match to {
                    Some(target) => {
                        self.admin_typing(&target, is_typing);
                    }
                    None => debug!(connection = %connection, "Admin typing without target dropped"),
                },
                SessionState::Unidentified | SessionState::Closed => {
                    debug!(connection = %connection, "Typing before register ignored");
                }
            },
        }
    }

    /// Tear down a session after its transport closed.
    pub fn disconnect(&self, session: &mut Session) {
        let connection = session.connection_id().clone();
        match session.close() {
            SessionState::Device(id) => {
                self.registry.mark_offline(&id, &connection);
            }
            SessionState::Admin => {
                self.registry.unregister_admin(&connection);
            }
            SessionState::Unidentified | SessionState::Closed => {}
        }
        debug!(connection = %connection, "Session closed");
    }

    /// Whether `connection` still owns `device_id`. A connection superseded by
    /// a re-registration keeps its session but may no longer speak for the device.
    fn is_current(&self, device_id: &str, connection: &ConnectionId) -> bool {
        let current = self.registry.is_current(device_id, connection);
        if !current {
            debug!(device = %device_id, connection = %connection, "Superseded connection ignored");
        }
        current
    }

    fn register(&self, session: &mut Session, registration: Option<Registration>) {
        let connection = session.connection_id().clone();

        if !session.is_unidentified() {
            debug!(connection = %connection, state = ?session.state(), "Repeated register ignored");
            return;
        }

        let handle: ConnectionHandle = session.handle().clone();
        match registration {
            Some(Registration::Admin) => {
                session.identify(SessionState::Admin);
                self.registry.register_admin(handle);
            }
            Some(Registration::Device {
                device_id,
                metadata,
            }) => {
                session.identify(SessionState::Device(device_id.clone()));
                self.registry.register_device(&device_id, metadata, handle);
            }
            None => {
                warn!(connection = %connection, "Register without a usable identity ignored");
            }
        }
    }

    /// Record a device's message and fan it out to every admin.
    ///
    /// Blank messages are dropped and return `None`.
    pub fn device_message(&self, device_id: &str, message: String) -> Option<MessageRecord> {
        if message.trim().is_empty() {
            debug!(device = %device_id, "Blank message dropped");
            return None;
        }

        let record = MessageRecord::from_device(device_id, message);
        let mut recipients = 0;
        self.store.append_with(device_id, record.clone(), |record| {
            recipients = self
                .registry
                .broadcast_to_admins(Arc::new(Event::incoming(record.clone())));
            true
        });

        debug!(device = %device_id, recipients, "Device message");
        Some(record)
    }

    /// Send an admin message to a device and echo it to every admin.
    ///
    /// Delivery, echo, and the history append happen under the device's log
    /// lock, so concurrent sends reach the device, the admins, and history in
    /// one order. A failed delivery never shows up in history.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotFound`] for an unknown device and
    /// [`RouterError::DeviceUnreachable`] if it has no live connection.
    pub fn send_to_device(
        &self,
        device_id: &str,
        message: impl Into<String>,
    ) -> Result<MessageRecord, RouterError> {
        let handle = match self.registry.reachability(device_id) {
            Reachability::Unknown => return Err(RouterError::NotFound(device_id.to_string())),
            Reachability::Offline => {
                return Err(RouterError::DeviceUnreachable(device_id.to_string()))
            }
            Reachability::Online(handle) => handle,
        };

        let record = MessageRecord::from_admin(self.admin_name(), device_id, message);
        let mut recipients = 0;
        let delivered = self.store.append_with(device_id, record.clone(), |record| {
            if !handle.send(Arc::new(Event::incoming(record.without_target()))) {
                return false;
            }
            recipients = self
                .registry
                .broadcast_to_admins(Arc::new(Event::incoming(record.clone())));
            true
        });
        if !delivered {
            return Err(RouterError::DeviceUnreachable(device_id.to_string()));
        }

        debug!(device = %device_id, recipients, "Admin message delivered");
        Ok(record)
    }

    /// Relay a device's typing indicator to every admin. Not persisted.
    pub fn device_typing(&self, device_id: &str, is_typing: bool) -> usize {
        self.registry
            .broadcast_to_admins(Arc::new(Event::typing(device_id, is_typing, None)))
    }

    /// Relay an admin typing indicator to one device.
    ///
    /// Silently dropped if the device is not online. Returns whether it was sent.
    pub fn admin_typing(&self, device_id: &str, is_typing: bool) -> bool {
        match self.registry.reachability(device_id) {
            Reachability::Online(handle) => {
                handle.send(Arc::new(Event::typing(self.admin_name(), is_typing, None)))
            }
            Reachability::Offline | Reachability::Unknown => {
                trace!(device = %device_id, "Typing for unreachable device dropped");
                false
            }
        }
    }

    /// Full history of a device.
    ///
    /// # Errors
    ///
    /// Returns [`RouterError::NotFound`] if the device has never registered.
    pub fn history(&self, device_id: &str) -> Result<Vec<MessageRecord>, RouterError> {
        self.store.history_of(device_id).map_err(|e| match e {
            StoreError::NotFound(id) => RouterError::NotFound(id),
            other => {
                warn!(device = %device_id, error = %other, "History read failed");
                RouterError::NotFound(device_id.to_string())
            }
        })
    }

    /// Current roster.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.registry.snapshot()
    }
}

/// Router statistics.
#[derive(Debug, Clone)]
pub struct RouterStats {
    /// Number of known devices.
    pub device_count: usize,
    /// Number of devices with a live connection.
    pub online_count: usize,
    /// Number of connected admins.
    pub admin_count: usize,
}
