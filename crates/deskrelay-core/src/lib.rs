//! # deskrelay-core
//!
//! Connection registry, conversation store, and message routing for the
//! deskrelay help-desk broker.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **ConversationStore** - Durable per-device history and metadata
//! - **ConnectionRegistry** - Which devices and admins are reachable
//! - **Router** - Interprets envelopes and fans out events
//! - **Session** - Per-connection identification state
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌────────────────────┐
//! │  Connection │────▶│   Router    │────▶│ ConnectionRegistry │
//! └─────────────┘     └─────────────┘     └────────────────────┘
//!                            │                      │
//!                            ▼                      ▼
//!                     ┌───────────────────────────────┐
//!                     │       ConversationStore        │
//!                     └───────────────────────────────┘
//! ```

pub mod handle;
pub mod registry;
pub mod router;
pub mod session;
pub mod store;

pub use handle::{ConnectionHandle, ConnectionId, EventReceiver};
pub use registry::{ConnectionRegistry, Reachability};
pub use router::{Router, RouterConfig, RouterError, RouterStats};
pub use session::{Session, SessionState};
pub use store::{ConversationStore, DeviceRecord, StoreError};
