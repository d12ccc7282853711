//! RTC Debugger - peer connection debugging over a signaling relay.
//!
//! The crate drives a single peer-to-peer session end to end: it connects
//! to a WebSocket relay, negotiates a peer connection with the remote side,
//! opens data channels, and exchanges text, binary payloads and files while
//! sampling connection metrics.
//!
//! # Architecture
//!
//! Everything that mutates session state runs on one event loop:
//!
//! - **Orchestrator** - owns the session, consumes [`orchestrator::SessionEvent`]s
//! - **Signaling** - relay connection and message envelopes
//! - **Engine** - peer transport seam, with a `rustrtc` adapter
//! - **Channels** - channel bookkeeping, active-channel selection, outbound queue
//! - **Transfer** - chunked file sending and inbound reassembly
//! - **Stats** - periodic metrics sampling into bounded history
//! - **Relay** - the broadcast server peers connect through
//!
//! # Modules
//!
//! - [`orchestrator`] - session lifecycle and event dispatch
//! - [`config`] - configuration loading/saving
//! - [`commands`] - operator console parsing

// Library modules
pub mod channels;
pub mod commands;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod inspect;
pub mod orchestrator;
pub mod relay;
pub mod signaling;
pub mod stats;
pub mod transfer;
pub mod ws;

#[cfg(test)]
mod testing;

// Re-export commonly used types
pub use config::Config;
pub use error::SessionError;
pub use orchestrator::{ConnectionOrchestrator, SessionEvent};
pub use relay::{RelayHandle, RelayServer};
