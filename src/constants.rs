//! Session-wide constants for rtc-debugger.
//!
//! Timing, sizing and history limits shared by the orchestrator, the
//! stats sampler and the file-transfer engine live here so they can be
//! found in one place.
//!
//! # Categories
//!
//! - **Signaling**: reconnect delays and relay defaults
//! - **Transfer**: chunking parameters
//! - **Stats**: polling cadence and history depth
//! - **ICE**: candidate retry limits

use std::time::Duration;

// ============================================================================
// Signaling
// ============================================================================

/// Delay before an automatic reconnect after the relay socket closes.
///
/// Only applies when the session had reached `Connected` and
/// auto-reconnect is enabled.
pub const RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Delay between teardown and re-dial for an operator `/reconnect`.
pub const MANUAL_RECONNECT_DELAY: Duration = Duration::from_millis(500);

/// Default relay URL when nothing is configured.
pub const DEFAULT_SIGNALING_URL: &str = "ws://localhost:3000";

/// Default relay listen address.
pub const DEFAULT_RELAY_LISTEN: &str = "0.0.0.0:3000";

/// Default public STUN server.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Label of the channel an offerer creates before sending its offer.
pub const DEFAULT_CHANNEL_LABEL: &str = "chat";

// ============================================================================
// Transfer
// ============================================================================

/// File chunk size in bytes.
///
/// 16 KiB stays below the SCTP message size every browser accepts.
pub const CHUNK_SIZE: usize = 16_384;

// ============================================================================
// Stats
// ============================================================================

/// Polling interval for peer transport metrics.
pub const STATS_INTERVAL: Duration = Duration::from_millis(1000);

/// Number of samples retained per metric series.
pub const HISTORY_CAPACITY: usize = 20;

// ============================================================================
// ICE
// ============================================================================

/// Failed application attempts after which a buffered candidate is dropped.
pub const MAX_ICE_ATTEMPTS: u32 = 3;

// ============================================================================
// Inspection
// ============================================================================

/// Maximum characters of a payload shown in an inspection preview.
pub const PREVIEW_LEN: usize = 100;
