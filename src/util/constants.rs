// LOMan - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.
// Every bound enforced elsewhere in the crate is declared here so it can be
// audited in one place.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "LOMan";

/// Application identifier used for config/data directories.
pub const APP_ID: &str = "LOMan";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Tile layout
// =============================================================================

/// Hard upper bound on the number of configured tiles.
pub const MAX_TILES: usize = 64;

/// Default server executable, relative to a tile's install directory.
pub const DEFAULT_EXECUTABLE: &str = "Mist/Binaries/Win64/MistServer-Win64-Shipping.exe";

/// Default launch arguments. Placeholders are substituted per tile.
pub const DEFAULT_LAUNCH_ARGS: &[&str] = &[
    "-log",
    "-identifier={server_id}",
    "-port={port}",
    "-QueryPort={query_port}",
];

/// Default first game port; tile N listens on `DEFAULT_PORT_START + N`.
pub const DEFAULT_PORT_START: u16 = 5555;

/// Default first query port; tile N answers on `DEFAULT_QUERY_PORT_START + N`.
pub const DEFAULT_QUERY_PORT_START: u16 = 27015;

/// Log directory relative to the install directory when none is configured.
pub const DEFAULT_LOG_SUBDIR: &[&str] = &["Mist", "Saved", "Logs"];

// =============================================================================
// Supervisor
// =============================================================================

/// Settle delay between stop and start for a control-plane restart (seconds).
pub const DEFAULT_RESTART_DELAY_SECS: u64 = 5;

/// Maximum configurable restart settle delay (seconds).
pub const MAX_RESTART_DELAY_SECS: u64 = 600;

/// How long a stop waits for the worker to exit before the tile is marked
/// `Error` (seconds).
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 60;

/// Bounds for the configurable stop timeout (seconds).
pub const MIN_STOP_TIMEOUT_SECS: u64 = 1;
pub const MAX_STOP_TIMEOUT_SECS: u64 = 3_600;

/// Delay before a crashed tile is relaunched when `restart_on_crash` is set.
pub const DEFAULT_CRASH_RESTART_DELAY_SECS: u64 = 10;

/// How often a tile worker checks its stop signal and process exit (ms).
pub const WORKER_POLL_INTERVAL_MS: u64 = 100;

// =============================================================================
// Admin broadcast
// =============================================================================

/// How long a broadcast message stays in the channel before it is cleared
/// (seconds). Matches the in-game notice duration.
pub const DEFAULT_BROADCAST_HOLD_SECS: u64 = 11;

/// Maximum configurable hold (seconds).
pub const MAX_BROADCAST_HOLD_SECS: u64 = 300;

/// Channel file location relative to a tile's install directory.
pub const CHANNEL_SUBPATH: &[&str] = &["Mist", "Content", "admin.json"];

/// Maximum accepted broadcast message length (characters).
pub const MAX_BROADCAST_MESSAGE_CHARS: usize = 512;

/// Number of past broadcasts kept for the history view.
pub const MAX_BROADCAST_HISTORY: usize = 50;

/// Notice sent to a tile before a control-plane restart.
pub const DEFAULT_RESTART_NOTICE: &str = "Server restart initiated by admin";

/// Quick messages offered by `presets` / `say-preset` when the config
/// names none.
pub const DEFAULT_BROADCAST_PRESETS: &[&str] = &[
    "Server restart in 5 minutes",
    "Server restart in 1 minute",
    "Server maintenance starting soon",
    "Thanks for playing!",
    "Please report bugs on Discord",
    "Welcome to the server!",
];

/// Maximum number of configured quick messages.
pub const MAX_BROADCAST_PRESETS: usize = 20;

// =============================================================================
// Live tail limits
// =============================================================================

/// How often the tail watcher polls each watched file for new content (ms).
pub const TAIL_POLL_INTERVAL_MS: u64 = 500;

/// How often the run flag is checked within each poll sleep interval (ms).
pub const TAIL_CANCEL_CHECK_INTERVAL_MS: u64 = 100;

/// Minimum user-configurable tail poll interval (ms).
pub const MIN_TAIL_POLL_INTERVAL_MS: u64 = 100;

/// Maximum user-configurable tail poll interval (ms).
pub const MAX_TAIL_POLL_INTERVAL_MS: u64 = 10_000; // 10 s

/// Maximum bytes read from a single file in one poll tick.
/// A larger backlog is delivered over the following ticks.
pub const MAX_TAIL_READ_BYTES_PER_TICK: usize = 512 * 1_024; // 512 KiB

/// Maximum number of tail updates drained by the console per wake-up.
pub const MAX_TAIL_UPDATES_PER_DRAIN: usize = 200;

/// Longest unterminated followed-log line held back before it is shown anyway.
pub const MAX_CARRIED_LINE_BYTES: usize = 64 * 1024; // 64 KiB

/// Bounds on the line count accepted by the `tail` operation.
pub const MIN_TAIL_LINES: usize = 1;
pub const MAX_TAIL_LINES: usize = 999;

/// Line count used by the console when none is given.
pub const DEFAULT_TAIL_LINES: usize = 100;

/// Bytes read back from the end of a log file to answer a `tail` request.
pub const MAX_TAIL_SCAN_BYTES: u64 = 4 * 1024 * 1024; // 4 MiB

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// =============================================================================
// Configuration
// =============================================================================

/// Configuration file name.
pub const CONFIG_FILE_NAME: &str = "config.toml";
