// LOMan - util/error.rs
//
// Typed error hierarchy with context-preserving error chains.
// No string-based error propagation: every variant carries the identifiers
// needed to act on it, and I/O failures keep their `source()`.

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Top-level error type for all LOMan operations.
/// Errors are categorised by the subsystem that produced them.
#[derive(Debug)]
pub enum ManagerError {
    /// Tile lifecycle command rejected or failed.
    Supervisor(SupervisorError),

    /// Admin broadcast failed for a target.
    Broadcast(BroadcastError),

    /// Log lookup or tail read failed.
    Tail(TailError),

    /// Configuration loading or validation failed.
    Config(ConfigError),
}

impl fmt::Display for ManagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Supervisor(e) => write!(f, "Supervisor error: {e}"),
            Self::Broadcast(e) => write!(f, "Broadcast error: {e}"),
            Self::Tail(e) => write!(f, "Log error: {e}"),
            Self::Config(e) => write!(f, "Configuration error: {e}"),
        }
    }
}

impl std::error::Error for ManagerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Supervisor(e) => Some(e),
            Self::Broadcast(e) => Some(e),
            Self::Tail(e) => Some(e),
            Self::Config(e) => Some(e),
        }
    }
}

// ---------------------------------------------------------------------------
// Supervisor errors
// ---------------------------------------------------------------------------

/// Errors returned synchronously by tile lifecycle commands.
///
/// Validation and state-conflict errors never mutate the registry.
#[derive(Debug)]
pub enum SupervisorError {
    /// Tile index outside the configured `0..tile_count` range.
    InvalidTile { tile_id: usize, tile_count: usize },

    /// Server id does not match `{identifier}{index}`.
    InvalidServerId { server_id: String, identifier: String },

    /// `start` on a tile whose phase is not `Stopped`.
    AlreadyRunning {
        server_id: String,
        phase: &'static str,
    },

    /// `stop` on a tile whose phase is not `Running`.
    NotRunning {
        server_id: String,
        phase: &'static str,
    },

    /// The background worker thread could not be spawned.
    WorkerSpawn { server_id: String, source: io::Error },
}

impl fmt::Display for SupervisorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTile {
                tile_id,
                tile_count,
            } => write!(
                f,
                "Tile {tile_id} is out of range (configured tiles: 0-{})",
                tile_count.saturating_sub(1)
            ),
            Self::InvalidServerId {
                server_id,
                identifier,
            } => write!(
                f,
                "Invalid server id '{server_id}': expected '{identifier}' followed by a tile index"
            ),
            Self::AlreadyRunning { server_id, phase } => {
                write!(f, "Server '{server_id}' is not stopped (currently {phase})")
            }
            Self::NotRunning { server_id, phase } => {
                write!(f, "Server '{server_id}' is not running (currently {phase})")
            }
            Self::WorkerSpawn { server_id, source } => {
                write!(f, "Cannot spawn worker thread for '{server_id}': {source}")
            }
        }
    }
}

impl std::error::Error for SupervisorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::WorkerSpawn { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<SupervisorError> for ManagerError {
    fn from(e: SupervisorError) -> Self {
        Self::Supervisor(e)
    }
}

// ---------------------------------------------------------------------------
// Broadcast errors
// ---------------------------------------------------------------------------

/// Errors scoped to a single broadcast target.
#[derive(Debug)]
pub enum BroadcastError {
    /// Target tile index outside the configured range.
    InvalidTile { tile_id: usize, tile_count: usize },

    /// Message exceeds the accepted length.
    MessageTooLong { length: usize, max_length: usize },

    /// Quick message number outside `1..=count`.
    UnknownPreset { number: usize, count: usize },

    /// The channel file (or its parent directory) could not be written.
    ChannelWriteFailed {
        tile_id: usize,
        path: PathBuf,
        source: io::Error,
    },
}

impl fmt::Display for BroadcastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTile {
                tile_id,
                tile_count,
            } => write!(
                f,
                "Broadcast target tile {tile_id} is out of range (configured tiles: 0-{})",
                tile_count.saturating_sub(1)
            ),
            Self::MessageTooLong { length, max_length } => write!(
                f,
                "Message is {length} characters, exceeds maximum of {max_length}"
            ),
            Self::UnknownPreset { number, count } => write!(
                f,
                "No quick message #{number} (configured: 1-{count})"
            ),
            Self::ChannelWriteFailed {
                tile_id,
                path,
                source,
            } => write!(
                f,
                "Cannot write admin channel for tile {tile_id} at '{}': {source}",
                path.display()
            ),
        }
    }
}

impl std::error::Error for BroadcastError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ChannelWriteFailed { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<BroadcastError> for ManagerError {
    fn from(e: BroadcastError) -> Self {
        Self::Broadcast(e)
    }
}

// ---------------------------------------------------------------------------
// Tail errors
// ---------------------------------------------------------------------------

/// Errors related to log lookup and tail reads.
#[derive(Debug)]
pub enum TailError {
    /// No log file matching the tile exists in the log directory.
    LogNotFound { server_id: String, log_dir: PathBuf },

    /// Requested line count outside the accepted range.
    LineCountOutOfRange {
        requested: usize,
        min: usize,
        max: usize,
    },

    /// User-provided filter regex is invalid.
    InvalidFilter {
        pattern: String,
        source: regex::Error,
    },

    /// I/O error reading a log file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for TailError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LogNotFound { server_id, log_dir } => write!(
                f,
                "No log file for '{server_id}' in '{}'",
                log_dir.display()
            ),
            Self::LineCountOutOfRange {
                requested,
                min,
                max,
            } => write!(
                f,
                "Line count {requested} is out of range. Expected: {min}-{max}"
            ),
            Self::InvalidFilter { pattern, source } => {
                write!(f, "Invalid filter regex '{pattern}': {source}")
            }
            Self::Io { path, source } => {
                write!(f, "'{}': I/O error: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for TailError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidFilter { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<TailError> for ManagerError {
    fn from(e: TailError) -> Self {
        Self::Tail(e)
    }
}

// ---------------------------------------------------------------------------
// Config errors
// ---------------------------------------------------------------------------

/// Errors related to configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    /// A required key is absent.
    Missing { field: &'static str },

    /// A required folder or file does not exist.
    PathNotFound { field: &'static str, path: PathBuf },

    /// TOML parsing failed.
    TomlParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    /// A required config value is out of the allowed range.
    ValueOutOfRange {
        field: String,
        value: String,
        expected: String,
    },

    /// I/O error reading config file.
    Io { path: PathBuf, source: io::Error },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing { field } => write!(f, "Required config key '{field}' is missing"),
            Self::PathNotFound { field, path } => write!(
                f,
                "Config '{field}' points to '{}', which does not exist",
                path.display()
            ),
            Self::TomlParse { path, source } => {
                write!(f, "Config parse error '{}': {source}", path.display())
            }
            Self::ValueOutOfRange {
                field,
                value,
                expected,
            } => write!(
                f,
                "Config '{field}' = '{value}' is out of range. Expected: {expected}"
            ),
            Self::Io { path, source } => {
                write!(f, "Config I/O error '{}': {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::TomlParse { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<ConfigError> for ManagerError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

/// Convenience type alias for LOMan results.
pub type Result<T> = std::result::Result<T, ManagerError>;
