//! # deskrelay-protocol
//!
//! Wire schema for the deskrelay help-desk broker.
//!
//! Devices and admins exchange JSON frames over a WebSocket. This crate
//! defines those frames, the records they carry, and the codec that turns
//! text into typed envelopes.
//!
//! ## Frame Types
//!
//! Inbound ([`Envelope`]):
//! - `register` - Identify as a device or an admin
//! - `chat_message` - A chat line
//! - `typing` - Ephemeral typing indicator
//!
//! Outbound ([`Event`]):
//! - `client_list` - Roster snapshot
//! - `incoming_message` - A chat line
//! - `typing` - Relayed typing indicator
//!
//! ## Example
//!
//! ```rust
//! use deskrelay_protocol::{codec, Envelope};
//!
//! let envelope = codec::decode(r#"{"type":"chat_message","message":"printer is on fire"}"#).unwrap();
//! assert_eq!(envelope, Envelope::chat("printer is on fire"));
//! ```

pub mod codec;
pub mod frames;
pub mod records;

pub use codec::{decode, encode, ProtocolError};
pub use frames::{Envelope, EnvelopeKind, Event, Registration, Role};
pub use records::{now_timestamp, DeviceInfo, DeviceMetadata, DeviceStatus, MessageRecord};
