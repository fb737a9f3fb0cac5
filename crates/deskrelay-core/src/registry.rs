//! Who is reachable right now.
//!
//! The registry maps device ids to their live handle and cached roster row,
//! and keeps the set of connected admins. Every mutation pushes a fresh
//! roster to the admins.

use crate::handle::{ConnectionHandle, ConnectionId};
use crate::store::ConversationStore;
use dashmap::DashMap;
use deskrelay_protocol::{DeviceInfo, DeviceMetadata, DeviceStatus, Event};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, trace};

/// Whether a device can be reached.
#[derive(Debug, Clone)]
pub enum Reachability {
    /// Never registered.
    Unknown,
    /// Known, but has no live connection.
    Offline,
    /// Live connection on record.
    Online(ConnectionHandle),
}

/// Device entry: roster row plus the handle that owns it.
struct DeviceSlot {
    info: DeviceInfo,
    handle: Option<ConnectionHandle>,
}

/// Registry of device and admin connections.
pub struct ConnectionRegistry {
    /// Devices indexed by id.
    devices: DashMap<String, DeviceSlot>,
    /// Connected admins.
    admins: DashMap<ConnectionId, ConnectionHandle>,
    /// Durable side of device metadata.
    store: Arc<ConversationStore>,
    /// Serializes roster snapshots so admins never see an older one last.
    roster_lock: Mutex<()>,
}

impl ConnectionRegistry {
    /// Create a registry seeded with every device the store knows, all offline.
    #[must_use]
    pub fn new(store: Arc<ConversationStore>) -> Self {
        let devices = DashMap::new();
        for mut info in store.devices() {
            info.status = DeviceStatus::Offline;
            devices.insert(info.client_id.clone(), DeviceSlot { info, handle: None });
        }

        info!(devices = devices.len(), "Creating connection registry");

        Self {
            devices,
            admins: DashMap::new(),
            store,
            roster_lock: Mutex::new(()),
        }
    }

    /// Register a device connection.
    ///
    /// Creates the device on first sight, otherwise refreshes its metadata.
    /// A previous handle under the same id is superseded and returned.
    pub fn register_device(
        &self,
        device_id: &str,
        metadata: DeviceMetadata,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let connection = handle.id().clone();

        let (info, superseded) = {
            let mut slot = self
                .devices
                .entry(device_id.to_string())
                .or_insert_with(|| {
                    debug!(device = %device_id, "New device");
                    DeviceSlot {
                        info: DeviceInfo::online(device_id, metadata.clone()),
                        handle: None,
                    }
                });
            slot.info.refresh(metadata);
            let superseded = slot.handle.replace(handle);
            (slot.info.clone(), superseded)
        };

        if let Some(old) = &superseded {
            info!(
                device = %device_id,
                old = %old.id(),
                new = %connection,
                "Device re-registered; previous connection superseded"
            );
        } else {
            info!(device = %device_id, connection = %connection, "Device registered");
        }

        self.store.save_device(&info);
        self.broadcast_roster();
        superseded
    }

    /// Register an admin connection and send it the current roster.
    pub fn register_admin(&self, handle: ConnectionHandle) {
        let _guard = self.roster_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let roster = Arc::new(Event::client_list(self.snapshot()));
        handle.send(roster);

        info!(connection = %handle.id(), "Admin registered");
        self.admins.insert(handle.id().clone(), handle);
    }

    /// Mark a device offline after its connection closed.
    ///
    /// Does nothing unless `connection` is the handle currently on record,
    /// so a superseded connection closing late cannot knock its successor
    /// offline. Returns `true` if the device went offline.
    pub fn mark_offline(&self, device_id: &str, connection: &ConnectionId) -> bool {
        let changed = match self.devices.get_mut(device_id) {
            Some(mut slot) if slot.handle.as_ref().is_some_and(|h| h.id() == connection) => {
                slot.handle = None;
                slot.info.status = DeviceStatus::Offline;
                true
            }
            _ => false,
        };

        if changed {
            info!(device = %device_id, connection = %connection, "Device offline");
            self.broadcast_roster();
        } else {
            debug!(device = %device_id, connection = %connection, "Stale close ignored");
        }
        changed
    }

    /// Remove an admin connection.
    pub fn unregister_admin(&self, connection: &ConnectionId) -> bool {
        let removed = self.admins.remove(connection).is_some();
        if removed {
            info!(connection = %connection, "Admin disconnected");
        }
        removed
    }

    /// Roster rows of every known device, ordered by id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<DeviceInfo> {
        let mut roster: Vec<DeviceInfo> = self.devices.iter().map(|e| e.info.clone()).collect();
        roster.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        roster
    }

    /// Look up whether a device can be reached.
    #[must_use]
    pub fn reachability(&self, device_id: &str) -> Reachability {
        match self.devices.get(device_id) {
            None => Reachability::Unknown,
            Some(slot) => match &slot.handle {
                Some(handle) => Reachability::Online(handle.clone()),
                None => Reachability::Offline,
            },
        }
    }

    /// Check if `connection` is the handle on record for a device.
    #[must_use]
    pub fn is_current(&self, device_id: &str, connection: &ConnectionId) -> bool {
        self.devices
            .get(device_id)
            .is_some_and(|slot| slot.handle.as_ref().is_some_and(|h| h.id() == connection))
    }

    /// Check if a device has a live connection.
    #[must_use]
    pub fn is_online(&self, device_id: &str) -> bool {
        matches!(self.reachability(device_id), Reachability::Online(_))
    }

    /// Send an event to every connected admin.
    ///
    /// Admins whose connection is gone are dropped. Returns the number of
    /// admins that received the event.
    pub fn broadcast_to_admins(&self, event: Arc<Event>) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();

        for admin in self.admins.iter() {
            if admin.send(Arc::clone(&event)) {
                delivered += 1;
            } else {
                dead.push(admin.key().clone());
            }
        }

        for id in dead {
            debug!(connection = %id, "Pruning closed admin connection");
            self.admins.remove(&id);
        }

        trace!(recipients = delivered, "Broadcast to admins");
        delivered
    }

    /// Push the current roster to every admin.
    pub fn broadcast_roster(&self) -> usize {
        let _guard = self.roster_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let roster = Arc::new(Event::client_list(self.snapshot()));
        self.broadcast_to_admins(roster)
    }

    /// Number of known devices.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Number of devices with a live connection.
    #[must_use]
    pub fn online_count(&self) -> usize {
        self.devices.iter().filter(|e| e.handle.is_some()).count()
    }

    /// Number of connected admins.
    #[must_use]
    pub fn admin_count(&self) -> usize {
        self.admins.len()
    }
}
