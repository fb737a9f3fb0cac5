//! Device and message records shared by the broker and its clients.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current time as an RFC 3339 UTC string with millisecond precision.
#[must_use]
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Whether a device currently has a live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    #[default]
    Offline,
}

/// Host details a device reports when it registers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceMetadata {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub platform: String,
}

/// One row of the roster: everything about a device except its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Stable device identifier.
    pub client_id: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub status: DeviceStatus,
    /// Time of the most recent registration.
    pub last_seen: String,
}

impl DeviceInfo {
    /// Create an online roster entry stamped with the current time.
    #[must_use]
    pub fn online(client_id: impl Into<String>, metadata: DeviceMetadata) -> Self {
        Self {
            client_id: client_id.into(),
            hostname: metadata.hostname,
            username: metadata.username,
            platform: metadata.platform,
            status: DeviceStatus::Online,
            last_seen: now_timestamp(),
        }
    }

    /// Overwrite metadata and mark online, as on a re-registration.
    pub fn refresh(&mut self, metadata: DeviceMetadata) {
        self.hostname = metadata.hostname;
        self.username = metadata.username;
        self.platform = metadata.platform;
        self.status = DeviceStatus::Online;
        self.last_seen = now_timestamp();
    }

    /// Check if the device is online.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }
}

/// A single chat line in a device's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Device id, or the admin display name.
    pub from: String,
    /// Target device id, only on admin-to-device messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    pub message: String,
    /// Assigned by the broker on receipt.
    pub timestamp: String,
}

impl MessageRecord {
    /// A message sent by a device.
    #[must_use]
    pub fn from_device(device_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            from: device_id.into(),
            to: None,
            message: message.into(),
            timestamp: now_timestamp(),
        }
    }

    /// A message sent by an admin to a device.
    #[must_use]
    pub fn from_admin(
        admin_name: impl Into<String>,
        device_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            from: admin_name.into(),
            to: Some(device_id.into()),
            message: message.into(),
            timestamp: now_timestamp(),
        }
    }

    /// The same record without its `to` field, as delivered to the device itself.
    #[must_use]
    pub fn without_target(&self) -> Self {
        Self {
            to: None,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_format() {
        let ts = now_timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_device_info_wire_shape() {
        let info = DeviceInfo::online(
            "alice@host1",
            DeviceMetadata {
                hostname: "host1".into(),
                username: "alice".into(),
                platform: "linux".into(),
            },
        );
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["clientId"], "alice@host1");
        assert_eq!(json["status"], "online");
        assert!(json["lastSeen"].is_string());
    }

    #[test]
    fn test_refresh_overwrites_metadata() {
        let mut info = DeviceInfo::online("d1", DeviceMetadata::default());
        info.status = DeviceStatus::Offline;
        info.refresh(DeviceMetadata {
            hostname: "new-host".into(),
            username: "carol".into(),
            platform: "darwin".into(),
        });
        assert!(info.is_online());
        assert_eq!(info.hostname, "new-host");
        assert_eq!(info.client_id, "d1");
    }

    #[test]
    fn test_message_record_target() {
        let record = MessageRecord::from_admin("IT", "alice@host1", "hi");
        assert_eq!(record.to.as_deref(), Some("alice@host1"));

        let delivered = record.without_target();
        assert_eq!(delivered.to, None);
        assert_eq!(delivered.timestamp, record.timestamp);

        let json = serde_json::to_value(&delivered).unwrap();
        assert!(json.get("to").is_none());
    }
}
