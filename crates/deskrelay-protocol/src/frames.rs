//! Envelope and event types for the deskrelay protocol.
//!
//! Every streaming frame is a single JSON object discriminated by its `type`
//! field. Inbound frames decode into [`Envelope`], outbound frames are built
//! from [`Event`].

use serde::{Deserialize, Serialize};

use crate::records::{DeviceInfo, DeviceMetadata, MessageRecord};

/// Envelope kind identifiers, used for logging and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Register,
    ChatMessage,
    Typing,
}

impl EnvelopeKind {
    /// Wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::Register => "register",
            EnvelopeKind::ChatMessage => "chat_message",
            EnvelopeKind::Typing => "typing",
        }
    }
}

/// Role announced in a `register` envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Human operator console.
    Admin,
    /// Remote agent.
    Device,
}

/// An inbound frame received on a streaming connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Envelope {
    /// Identify the connection as an admin or a device.
    Register {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<Role>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        hostname: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        username: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        platform: Option<String>,
    },

    /// A chat line. Devices omit `to`; admins name the target device.
    ChatMessage {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },

    /// Ephemeral typing indicator.
    Typing {
        is_typing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },
}

impl Envelope {
    /// Get the envelope kind.
    #[must_use]
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Register { .. } => EnvelopeKind::Register,
            Envelope::ChatMessage { .. } => EnvelopeKind::ChatMessage,
            Envelope::Typing { .. } => EnvelopeKind::Typing,
        }
    }

    /// Create an admin `register` envelope.
    #[must_use]
    pub fn register_admin() -> Self {
        Envelope::Register {
            role: Some(Role::Admin),
            client_id: None,
            hostname: None,
            username: None,
            platform: None,
        }
    }

    /// Create a device `register` envelope.
    #[must_use]
    pub fn register_device(client_id: impl Into<String>, metadata: DeviceMetadata) -> Self {
        Envelope::Register {
            role: None,
            client_id: Some(client_id.into()),
            hostname: Some(metadata.hostname),
            username: Some(metadata.username),
            platform: Some(metadata.platform),
        }
    }

    /// Create a `chat_message` envelope.
    #[must_use]
    pub fn chat(message: impl Into<String>) -> Self {
        Envelope::ChatMessage {
            message: message.into(),
            to: None,
        }
    }

    /// Create a `chat_message` envelope addressed to a device.
    #[must_use]
    pub fn chat_to(to: impl Into<String>, message: impl Into<String>) -> Self {
        Envelope::ChatMessage {
            message: message.into(),
            to: Some(to.into()),
        }
    }

    /// Create a `typing` envelope.
    #[must_use]
    pub fn typing(is_typing: bool, to: Option<String>) -> Self {
        Envelope::Typing { is_typing, to }
    }
}

/// What a `register` envelope asks for, once its fields are resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Admin,
    Device {
        device_id: String,
        metadata: DeviceMetadata,
    },
}

impl Registration {
    /// Resolve the fields of a `register` envelope.
    ///
    /// The device id is `clientId` when given, otherwise `username@hostname`.
    /// Returns `None` when neither is available.
    #[must_use]
    pub fn resolve(
        role: Option<Role>,
        client_id: Option<&str>,
        hostname: Option<&str>,
        username: Option<&str>,
        platform: Option<&str>,
    ) -> Option<Self> {
        if role == Some(Role::Admin) {
            return Some(Registration::Admin);
        }

        let hostname = hostname.unwrap_or_default();
        let username = username.unwrap_or_default();

        let device_id = match client_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ if !hostname.is_empty() && !username.is_empty() => {
                format!("{username}@{hostname}")
            }
            _ => return None,
        };

        Some(Registration::Device {
            device_id,
            metadata: DeviceMetadata {
                hostname: hostname.to_string(),
                username: username.to_string(),
                platform: platform.unwrap_or_default().to_string(),
            },
        })
    }
}

/// An outbound frame pushed to connected devices and admins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Event {
    /// Full roster snapshot.
    ClientList { clients: Vec<DeviceInfo> },

    /// A chat line, either from a device or from an admin.
    IncomingMessage(MessageRecord),

    /// Relayed typing indicator.
    Typing {
        from: String,
        is_typing: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<String>,
    },
}

impl Event {
    /// Wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Event::ClientList { .. } => "client_list",
            Event::IncomingMessage(_) => "incoming_message",
            Event::Typing { .. } => "typing",
        }
    }

    /// Create a roster event.
    #[must_use]
    pub fn client_list(clients: Vec<DeviceInfo>) -> Self {
        Event::ClientList { clients }
    }

    /// Create a chat event from a stored record.
    #[must_use]
    pub fn incoming(record: MessageRecord) -> Self {
        Event::IncomingMessage(record)
    }

    /// Create a typing event.
    #[must_use]
    pub fn typing(from: impl Into<String>, is_typing: bool, to: Option<String>) -> Self {
        Event::Typing {
            from: from.into(),
            is_typing,
            to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_kind() {
        assert_eq!(Envelope::chat("hi").kind(), EnvelopeKind::ChatMessage);
        assert_eq!(Envelope::register_admin().kind(), EnvelopeKind::Register);
        assert_eq!(Envelope::typing(true, None).kind().as_str(), "typing");
    }

    #[test]
    fn test_resolve_admin() {
        let reg = Registration::resolve(Some(Role::Admin), Some("ignored"), None, None, None);
        assert_eq!(reg, Some(Registration::Admin));
    }

    #[test]
    fn test_resolve_device_prefers_client_id() {
        let reg = Registration::resolve(
            None,
            Some("alice@host1"),
            Some("host1"),
            Some("alice"),
            Some("linux"),
        )
        .unwrap();

        match reg {
            Registration::Device {
                device_id,
                metadata,
            } => {
                assert_eq!(device_id, "alice@host1");
                assert_eq!(metadata.platform, "linux");
            }
            Registration::Admin => panic!("expected device"),
        }
    }

    #[test]
    fn test_resolve_device_derives_id() {
        let reg = Registration::resolve(Some(Role::Device), Some("  "), Some("host2"), Some("bob"), None);
        assert!(matches!(
            reg,
            Some(Registration::Device { ref device_id, .. }) if device_id == "bob@host2"
        ));
    }

    #[test]
    fn test_resolve_device_without_identity() {
        assert_eq!(Registration::resolve(None, None, Some("host"), None, None), None);
    }

    #[test]
    fn test_event_typing_omits_absent_target() {
        let json = serde_json::to_value(Event::typing("alice@host1", true, None)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "typing", "from": "alice@host1", "isTyping": true})
        );
    }
}
