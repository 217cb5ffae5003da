// LOMan - core/model.rs
//
// Core data model types. Pure data definitions with no I/O and no platform
// dependencies. These types are the shared vocabulary across all layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::util::error::SupervisorError;

// =============================================================================
// Tile identity
// =============================================================================

/// Build the string id of a tile: `{identifier}{tile_id}`.
pub fn server_id(identifier: &str, tile_id: usize) -> String {
    format!("{identifier}{tile_id}")
}

/// Parse a `{identifier}{index}` server id back to its tile index.
///
/// The index must be decimal digits only and lie in `0..tile_count`.
/// A malformed id is `InvalidServerId`; a well-formed id with an
/// out-of-range index is `InvalidTile`.
pub fn parse_server_id(
    server_id: &str,
    identifier: &str,
    tile_count: usize,
) -> Result<usize, SupervisorError> {
    let malformed = || SupervisorError::InvalidServerId {
        server_id: server_id.to_string(),
        identifier: identifier.to_string(),
    };

    let index = server_id.strip_prefix(identifier).ok_or_else(malformed)?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed());
    }
    let tile_id: usize = index.parse().map_err(|_| malformed())?;

    if tile_id >= tile_count {
        return Err(SupervisorError::InvalidTile {
            tile_id,
            tile_count,
        });
    }
    Ok(tile_id)
}

// =============================================================================
// Tile phase
// =============================================================================

/// Lifecycle phase of one tile.
///
/// `Stopped -> Starting -> Running -> Stopping -> Stopped`, with `Error`
/// reachable from `Starting`/`Stopping` and left via acknowledgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TilePhase {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
    Error,
}

impl TilePhase {
    /// Human-readable label for display.
    pub fn label(&self) -> &'static str {
        match self {
            TilePhase::Stopped => "Stopped",
            TilePhase::Starting => "Starting",
            TilePhase::Running => "Running",
            TilePhase::Stopping => "Stopping",
            TilePhase::Error => "Error",
        }
    }

    /// Phases in which a slot may hold a live worker.
    pub fn may_hold_process(&self) -> bool {
        matches!(
            self,
            TilePhase::Starting | TilePhase::Running | TilePhase::Stopping
        )
    }
}

impl std::fmt::Display for TilePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Status snapshot
// =============================================================================

/// Cheap, read-only snapshot of one tile for the control plane.
#[derive(Debug, Clone, Serialize)]
pub struct TileStatus {
    pub tile_id: usize,
    pub server_id: String,
    pub phase: TilePhase,
    /// Name from the lookup collaborator, or `server_id` when unknown.
    pub display_name: String,
    /// OS process id of the current server process, if any.
    pub pid: Option<u32>,
    /// When the current process was observed alive.
    pub started_at: Option<DateTime<Utc>>,
    /// Most recent background failure (launch error, crash, hung stop).
    pub last_error: Option<String>,
    /// A delayed start is scheduled for this tile.
    pub restart_pending: bool,
}

impl TileStatus {
    /// Time since the current process came up, measured against `now`.
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.started_at.map(|t| now - t)
    }
}

// =============================================================================
// Commands
// =============================================================================

/// Lifecycle action accepted by the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TileAction {
    Start,
    Stop,
    Restart,
}

impl TileAction {
    /// Parse a case-insensitive action name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "start" => Some(TileAction::Start),
            "stop" => Some(TileAction::Stop),
            "restart" => Some(TileAction::Restart),
            _ => None,
        }
    }
}

/// Outcome of `restart` for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// The tile was running: stop requested, start follows after the delay.
    Restarting,
    /// The tile was already stopped: start follows after the delay.
    StartScheduled,
}

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker exited and the tile is `Stopped`.
    Exited,
    /// The worker did not exit within the stop timeout; the tile is `Error`.
    TimedOut,
}

/// Per-tile result of a batch operation.
#[derive(Debug)]
pub struct TileOutcome<T> {
    pub tile_id: usize,
    pub server_id: String,
    pub result: Result<T, SupervisorError>,
}

/// Results of applying one operation to every configured tile.
///
/// A failure on one tile never prevents the operation on the others.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub outcomes: Vec<TileOutcome<T>>,
}

impl<T> BatchReport<T> {
    /// True when every tile succeeded.
    pub fn is_clean(&self) -> bool {
        self.outcomes.iter().all(|o| o.result.is_ok())
    }

    /// Outcomes that failed.
    pub fn failures(&self) -> impl Iterator<Item = &TileOutcome<T>> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    /// Outcome for one tile.
    pub fn get(&self, tile_id: usize) -> Option<&TileOutcome<T>> {
        self.outcomes.iter().find(|o| o.tile_id == tile_id)
    }
}

// =============================================================================
// Broadcast
// =============================================================================

/// Who receives an admin broadcast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastTarget {
    Tile(usize),
    Tiles(Vec<usize>),
    All,
}

/// On-disk shape of the admin channel file: exactly one `Message` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    #[serde(rename = "Message")]
    pub message: String,
}

/// A broadcast as recorded in the history list.
#[derive(Debug, Clone, Serialize)]
pub struct BroadcastRecord {
    pub sent_at: DateTime<Utc>,
    pub message: String,
    /// Tile ids whose channel accepted the message.
    pub delivered: Vec<usize>,
    /// Tile ids whose channel write failed.
    pub failed: Vec<usize>,
}

// =============================================================================
// Tail
// =============================================================================

/// Newly appended bytes of one watched file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailUpdate {
    pub path: PathBuf,
    /// File offset of the first byte in `bytes`.
    pub offset: u64,
    pub bytes: Vec<u8>,
}

impl TailUpdate {
    /// This chunk alone decoded as UTF-8, invalid sequences replaced.
    /// Streams should go through `core::lines::LineAssembler` instead.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// The last lines of a tile's newest log file.
#[derive(Debug, Clone, Serialize)]
pub struct LogExcerpt {
    pub path: PathBuf,
    pub modified: Option<DateTime<Utc>>,
    pub lines: Vec<String>,
}

/// Timing knobs for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// How long a stop may wait for the worker before the tile goes `Error`.
    pub stop_timeout: Duration,
    /// Worker poll cadence for the stop signal and process exit.
    pub poll_interval: Duration,
    /// Delay before relaunching a crashed tile; `None` disables relaunch.
    pub crash_restart_delay: Option<Duration>,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        use crate::util::constants;
        Self {
            stop_timeout: Duration::from_secs(constants::DEFAULT_STOP_TIMEOUT_SECS),
            poll_interval: Duration::from_millis(constants::WORKER_POLL_INTERVAL_MS),
            crash_restart_delay: None,
        }
    }
}
