//! # videohub-engine
//!
//! Protocol engine for controlling Blackmagic Videohub video routers.
//!
//! The crate speaks the router's line-oriented TCP control protocol: it keeps
//! one long-lived session per device, replays the state dump the device
//! pushes on connect, folds incremental updates into an in-memory mirror of
//! the routing and label tables, and fans out change events to any number of
//! subscribers. Commands are optimistic; the local tables change only when
//! the device echoes the new state back.

pub mod client;
pub mod command;
pub mod config;
pub mod events;
pub mod protocol;
pub mod state;

// Re-export the client and commonly used types
pub use client::{ConnectionState, VideohubClient};
pub use command::{CommandEncoder, CommandError, WireCommand};
pub use config::{DefaultLabels, EngineConfig};
pub use events::{EventBus, HubEvent, PortKind};
pub use protocol::{HubFrame, VideohubCodec};
pub use state::LabelTables;
