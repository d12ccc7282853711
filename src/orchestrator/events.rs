//! Unified event queue for the session loop.
//!
//! All background producers (relay reader, engine pumps, stats timer,
//! reconnect timers, the console reader, transfer stepping) send events
//! through a single `mpsc::UnboundedSender<SessionEvent>`. The
//! orchestrator consumes them one at a time, so no two handlers ever run
//! concurrently and each handler sees the state left by the previous one.

// Rust guideline compliant 2026-02

use crate::commands::Command;
use crate::engine::EngineEvent;
use crate::signaling::Frame;

/// Event delivered to the session loop.
#[derive(Debug)]
pub enum SessionEvent {
    /// Operator command from the console.
    Command(Command),

    /// Frame received from the relay.
    Signaling {
        /// Connection epoch the frame was read on.
        epoch: u64,
        /// Raw frame.
        frame: Frame,
    },

    /// The relay connection of `epoch` ended.
    SignalingClosed {
        /// Connection epoch.
        epoch: u64,
    },

    /// Event from the engine instance of `epoch`.
    Engine {
        /// Engine epoch.
        epoch: u64,
        /// What happened.
        event: EngineEvent,
    },

    /// Stats timer fired for the session of `epoch`.
    StatsTick {
        /// Session epoch.
        epoch: u64,
    },

    /// Send the next chunk of transfer `id`.
    ///
    /// Posted after each chunk so other events interleave between chunks.
    TransferStep {
        /// Session epoch the transfer belongs to.
        epoch: u64,
        /// Transfer id.
        id: u64,
    },

    /// A delayed reconnect is due.
    ReconnectDue,

    /// Stop the loop.
    Shutdown,
}
