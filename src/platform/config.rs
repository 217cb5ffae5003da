// LOMan - platform/config.rs
//
// Platform-specific configuration, data directory resolution, and config.toml
// loading with startup validation.
//
// Uses the `directories` crate for XDG (Linux), AppData (Windows),
// Library (macOS) compliance.

use crate::core::model::{server_id, SupervisorSettings};
use crate::core::naming::StaticNames;
use crate::core::worker::{expand_args, LaunchVars, TileLaunch};
use crate::util::constants;
use crate::util::error::ConfigError;
use directories::ProjectDirs;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Resolved platform paths for LOMan configuration and data.
#[derive(Debug, Clone)]
pub struct PlatformPaths {
    /// Configuration directory (e.g. ~/.config/loman/ or %APPDATA%\LOMan\config\)
    pub config_dir: PathBuf,

    /// Data directory for the optional log file.
    pub data_dir: PathBuf,
}

impl PlatformPaths {
    /// Resolve platform-appropriate paths.
    ///
    /// Falls back to current directory if platform dirs cannot be determined.
    pub fn resolve() -> Self {
        if let Some(proj_dirs) = ProjectDirs::from("", "", constants::APP_ID) {
            let config_dir = proj_dirs.config_dir().to_path_buf();
            let data_dir = proj_dirs.data_dir().to_path_buf();

            tracing::debug!(
                config = %config_dir.display(),
                data = %data_dir.display(),
                "Platform paths resolved"
            );

            Self {
                config_dir,
                data_dir,
            }
        } else {
            tracing::warn!("Could not determine platform directories, using current directory");
            Self {
                config_dir: PathBuf::from("."),
                data_dir: PathBuf::from("."),
            }
        }
    }
}

/// Pick the config file to load.
///
/// Order: explicit path, `./config.toml`, then the platform config directory.
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    let local = PathBuf::from(constants::CONFIG_FILE_NAME);
    if local.is_file() {
        return local;
    }
    PlatformPaths::resolve()
        .config_dir
        .join(constants::CONFIG_FILE_NAME)
}

// =============================================================================
// config.toml loading and validation
// =============================================================================

/// Raw deserialisable shape of config.toml.
///
/// Unknown keys are silently ignored for forward compatibility -- a newer
/// config file can be used with an older binary without crashing.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct RawConfig {
    /// `[tiles]` section.
    pub tiles: TilesSection,
    /// `[supervisor]` section.
    pub supervisor: SupervisorSection,
    /// `[broadcast]` section.
    pub broadcast: BroadcastSection,
    /// `[tail]` section.
    pub tail: TailSection,
    /// `[names]` section: server id -> display name.
    pub names: HashMap<String, String>,
    /// `[logging]` section.
    pub logging: LoggingSection,
}

/// `[tiles]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct TilesSection {
    pub identifier: Option<String>,
    pub count: Option<usize>,
    pub install_dir: Option<String>,
    /// Per-tile install folders, indexed by tile id.
    pub tile_dirs: Option<Vec<String>>,
    pub executable: Option<String>,
    pub args: Option<Vec<String>>,
    pub port_start: Option<u32>,
    pub query_port_start: Option<u32>,
    pub log_dir: Option<String>,
}

/// `[supervisor]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct SupervisorSection {
    pub restart_delay_secs: Option<u64>,
    pub stop_timeout_secs: Option<u64>,
    pub restart_on_crash: Option<bool>,
    pub crash_restart_delay_secs: Option<u64>,
    pub stop_on_exit: Option<bool>,
}

/// `[broadcast]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct BroadcastSection {
    pub hold_secs: Option<u64>,
    /// Sent to a tile before a restart. Empty disables.
    pub restart_notice: Option<String>,
    /// Quick messages for `say-preset`.
    pub presets: Option<Vec<String>>,
}

/// `[tail]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct TailSection {
    pub poll_interval_ms: Option<u64>,
}

/// `[logging]` config section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub level: Option<String>,
    /// Log file path (empty = stderr only).
    pub file: Option<String>,
}

/// Validated configuration derived from `config.toml`.
///
/// Required keys are enforced at load time; optional values are checked
/// against named constants and fall back to defaults with a warning.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    // -- Tiles --
    pub identifier: String,
    pub tile_count: usize,
    pub install_dir: PathBuf,
    /// One entry per tile; defaults to `install_dir`.
    pub tile_dirs: Vec<PathBuf>,
    /// Server executable, relative to the tile dir unless absolute.
    pub executable: PathBuf,
    /// Launch argument templates.
    pub args: Vec<String>,
    pub port_start: u32,
    pub query_port_start: u32,
    pub log_dir: PathBuf,

    // -- Supervisor --
    pub restart_delay: Duration,
    pub stop_timeout: Duration,
    pub restart_on_crash: bool,
    pub crash_restart_delay: Duration,
    pub stop_on_exit: bool,

    // -- Broadcast --
    pub broadcast_hold: Duration,
    pub restart_notice: Option<String>,
    pub presets: Vec<String>,

    // -- Tail --
    pub tail_poll_interval: Duration,

    // -- Names --
    pub names: HashMap<String, String>,

    // -- Logging --
    /// Logging level string (for init before tracing is available).
    pub log_level: Option<String>,
    /// Log file path.
    pub log_file: Option<PathBuf>,
}

impl ManagerConfig {
    /// Config with every optional value at its default.
    pub fn with_defaults(identifier: &str, tile_count: usize, install_dir: PathBuf) -> Self {
        let mut log_dir = install_dir.clone();
        log_dir.extend(constants::DEFAULT_LOG_SUBDIR);
        Self {
            identifier: identifier.to_string(),
            tile_count,
            tile_dirs: vec![install_dir.clone(); tile_count],
            install_dir,
            executable: PathBuf::from(constants::DEFAULT_EXECUTABLE),
            args: constants::DEFAULT_LAUNCH_ARGS
                .iter()
                .map(|a| a.to_string())
                .collect(),
            port_start: u32::from(constants::DEFAULT_PORT_START),
            query_port_start: u32::from(constants::DEFAULT_QUERY_PORT_START),
            log_dir,
            restart_delay: Duration::from_secs(constants::DEFAULT_RESTART_DELAY_SECS),
            stop_timeout: Duration::from_secs(constants::DEFAULT_STOP_TIMEOUT_SECS),
            restart_on_crash: false,
            crash_restart_delay: Duration::from_secs(constants::DEFAULT_CRASH_RESTART_DELAY_SECS),
            stop_on_exit: true,
            broadcast_hold: Duration::from_secs(constants::DEFAULT_BROADCAST_HOLD_SECS),
            restart_notice: Some(constants::DEFAULT_RESTART_NOTICE.to_string()),
            presets: constants::DEFAULT_BROADCAST_PRESETS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            tail_poll_interval: Duration::from_millis(constants::TAIL_POLL_INTERVAL_MS),
            names: HashMap::new(),
            log_level: None,
            log_file: None,
        }
    }

    pub fn server_id(&self, tile_id: usize) -> String {
        server_id(&self.identifier, tile_id)
    }

    /// Install folder of one tile. Callers pass a validated tile id.
    pub fn tile_install_dir(&self, tile_id: usize) -> &Path {
        self.tile_dirs
            .get(tile_id)
            .map(PathBuf::as_path)
            .unwrap_or(&self.install_dir)
    }

    /// `<tile dir>/Mist/Content/admin.json`.
    pub fn channel_path(&self, tile_id: usize) -> PathBuf {
        let mut path = self.tile_install_dir(tile_id).to_path_buf();
        path.extend(constants::CHANNEL_SUBPATH);
        path
    }

    /// Channel path of every tile, indexed by tile id.
    pub fn channel_paths(&self) -> Vec<PathBuf> {
        (0..self.tile_count).map(|t| self.channel_path(t)).collect()
    }

    /// Fully resolved launch description for one tile.
    pub fn launch_for(&self, tile_id: usize) -> TileLaunch {
        let install_dir = self.tile_install_dir(tile_id).to_path_buf();
        let server_id = self.server_id(tile_id);
        let program = if self.executable.is_absolute() {
            self.executable.clone()
        } else {
            install_dir.join(&self.executable)
        };
        let offset = tile_id as u32;
        let args = expand_args(
            &self.args,
            &LaunchVars {
                identifier: &self.identifier,
                server_id: &server_id,
                tile_id,
                port: self.port_start + offset,
                query_port: self.query_port_start + offset,
            },
        );
        TileLaunch {
            tile_id,
            server_id,
            install_dir,
            program,
            args,
        }
    }

    pub fn supervisor_settings(&self) -> SupervisorSettings {
        SupervisorSettings {
            stop_timeout: self.stop_timeout,
            poll_interval: Duration::from_millis(constants::WORKER_POLL_INTERVAL_MS),
            crash_restart_delay: self.restart_on_crash.then_some(self.crash_restart_delay),
        }
    }

    pub fn name_table(&self) -> StaticNames {
        StaticNames::new(self.names.clone())
    }
}

/// Load and validate the config file at `path`.
///
/// Returns the validated config and a list of non-fatal warnings. A missing
/// file, a parse failure, or a missing required key is a hard error: the
/// manager cannot operate without knowing its tiles.
pub fn load_config(path: &Path) -> Result<(ManagerConfig, Vec<String>), ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::PathNotFound {
            field: "config file",
            path: path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;

    let raw: RawConfig = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
        path: path.to_path_buf(),
        source: e,
    })?;

    tracing::info!(path = %path.display(), "Loaded config.toml");

    // Relative paths in the file are relative to the file itself.
    let base_dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    validate(raw, base_dir)
}

/// Parse and validate config text. Relative paths resolve against `base_dir`.
pub fn load_config_str(
    content: &str,
    base_dir: &Path,
) -> Result<(ManagerConfig, Vec<String>), ConfigError> {
    let raw: RawConfig = toml::from_str(content).map_err(|e| ConfigError::TomlParse {
        path: base_dir.join(constants::CONFIG_FILE_NAME),
        source: e,
    })?;
    validate(raw, base_dir)
}

fn resolve_path(base_dir: &Path, value: &str) -> PathBuf {
    let path = PathBuf::from(value);
    if path.is_absolute() {
        path
    } else {
        base_dir.join(path)
    }
}

/// `port..=port + last_offset` lies within 1..=65535.
fn port_range_fits(port: u32, last_offset: u32) -> bool {
    port >= 1
        && port
            .checked_add(last_offset)
            .is_some_and(|last| last <= u32::from(u16::MAX))
}

fn validate(raw: RawConfig, base_dir: &Path) -> Result<(ManagerConfig, Vec<String>), ConfigError> {
    let mut warnings: Vec<String> = Vec::new();

    // -- Tiles: required keys --
    let identifier = raw
        .tiles
        .identifier
        .filter(|s| !s.trim().is_empty())
        .ok_or(ConfigError::Missing {
            field: "tiles.identifier",
        })?;

    let count = raw.tiles.count.ok_or(ConfigError::Missing {
        field: "tiles.count",
    })?;
    if !(1..=constants::MAX_TILES).contains(&count) {
        return Err(ConfigError::ValueOutOfRange {
            field: "tiles.count".to_string(),
            value: count.to_string(),
            expected: format!("1-{}", constants::MAX_TILES),
        });
    }

    let install_dir = raw
        .tiles
        .install_dir
        .filter(|s| !s.trim().is_empty())
        .map(|s| resolve_path(base_dir, &s))
        .ok_or(ConfigError::Missing {
            field: "tiles.install_dir",
        })?;
    if !install_dir.is_dir() {
        return Err(ConfigError::PathNotFound {
            field: "tiles.install_dir",
            path: install_dir,
        });
    }

    let mut config = ManagerConfig::with_defaults(&identifier, count, install_dir);

    // -- Tiles: tile_dirs --
    if let Some(dirs) = raw.tiles.tile_dirs {
        if dirs.len() > count {
            warnings.push(format!(
                "[tiles] tile_dirs has {} entries but count = {count}. Extra entries ignored.",
                dirs.len(),
            ));
        }
        for (tile_id, dir) in dirs.into_iter().take(count).enumerate() {
            if dir.trim().is_empty() {
                continue;
            }
            let dir = resolve_path(base_dir, &dir);
            if !dir.is_dir() {
                warnings.push(format!(
                    "[tiles] tile_dirs[{tile_id}] = '{}' does not exist. \
                     Launches of this tile will fail until it is created.",
                    dir.display(),
                ));
            }
            config.tile_dirs[tile_id] = dir;
        }
    }

    // -- Tiles: executable / args --
    if let Some(exe) = raw.tiles.executable {
        if exe.trim().is_empty() {
            warnings.push(format!(
                "[tiles] executable is empty. Using default ({}).",
                constants::DEFAULT_EXECUTABLE,
            ));
        } else {
            config.executable = PathBuf::from(exe);
        }
    }
    if let Some(args) = raw.tiles.args {
        config.args = args;
    }

    // -- Tiles: ports --
    let last_offset = (count - 1) as u32;
    if let Some(port) = raw.tiles.port_start {
        if port_range_fits(port, last_offset) {
            config.port_start = port;
        } else {
            warnings.push(format!(
                "[tiles] port_start = {port} leaves no room for {count} tiles. Using default ({}).",
                constants::DEFAULT_PORT_START,
            ));
        }
    }
    if let Some(port) = raw.tiles.query_port_start {
        if port_range_fits(port, last_offset) {
            config.query_port_start = port;
        } else {
            warnings.push(format!(
                "[tiles] query_port_start = {port} leaves no room for {count} tiles. Using default ({}).",
                constants::DEFAULT_QUERY_PORT_START,
            ));
        }
    }

    // -- Tiles: log_dir --
    if let Some(ref dir) = raw.tiles.log_dir {
        if !dir.trim().is_empty() {
            config.log_dir = resolve_path(&config.install_dir, dir);
        }
    }
    if !config.log_dir.is_dir() {
        warnings.push(format!(
            "Log directory '{}' does not exist yet. Tail requests will fail until a server writes logs.",
            config.log_dir.display(),
        ));
    }

    // -- Supervisor --
    if let Some(secs) = raw.supervisor.restart_delay_secs {
        if secs <= constants::MAX_RESTART_DELAY_SECS {
            config.restart_delay = Duration::from_secs(secs);
        } else {
            warnings.push(format!(
                "[supervisor] restart_delay_secs = {secs} is out of range (0-{}). Using default ({}).",
                constants::MAX_RESTART_DELAY_SECS,
                constants::DEFAULT_RESTART_DELAY_SECS,
            ));
        }
    }

    if let Some(secs) = raw.supervisor.stop_timeout_secs {
        if (constants::MIN_STOP_TIMEOUT_SECS..=constants::MAX_STOP_TIMEOUT_SECS).contains(&secs) {
            config.stop_timeout = Duration::from_secs(secs);
        } else {
            warnings.push(format!(
                "[supervisor] stop_timeout_secs = {secs} is out of range ({}-{}). Using default ({}).",
                constants::MIN_STOP_TIMEOUT_SECS,
                constants::MAX_STOP_TIMEOUT_SECS,
                constants::DEFAULT_STOP_TIMEOUT_SECS,
            ));
        }
    }

    if let Some(flag) = raw.supervisor.restart_on_crash {
        config.restart_on_crash = flag;
    }

    if let Some(secs) = raw.supervisor.crash_restart_delay_secs {
        if secs <= constants::MAX_RESTART_DELAY_SECS {
            config.crash_restart_delay = Duration::from_secs(secs);
        } else {
            warnings.push(format!(
                "[supervisor] crash_restart_delay_secs = {secs} is out of range (0-{}). Using default ({}).",
                constants::MAX_RESTART_DELAY_SECS,
                constants::DEFAULT_CRASH_RESTART_DELAY_SECS,
            ));
        }
    }

    if let Some(flag) = raw.supervisor.stop_on_exit {
        config.stop_on_exit = flag;
    }

    // -- Broadcast --
    if let Some(secs) = raw.broadcast.hold_secs {
        if (1..=constants::MAX_BROADCAST_HOLD_SECS).contains(&secs) {
            config.broadcast_hold = Duration::from_secs(secs);
        } else {
            warnings.push(format!(
                "[broadcast] hold_secs = {secs} is out of range (1-{}). Using default ({}).",
                constants::MAX_BROADCAST_HOLD_SECS,
                constants::DEFAULT_BROADCAST_HOLD_SECS,
            ));
        }
    }

    if let Some(notice) = raw.broadcast.restart_notice {
        let chars = notice.chars().count();
        if notice.trim().is_empty() {
            config.restart_notice = None;
        } else if chars > constants::MAX_BROADCAST_MESSAGE_CHARS {
            warnings.push(format!(
                "[broadcast] restart_notice is {chars} characters (max {}). Using default.",
                constants::MAX_BROADCAST_MESSAGE_CHARS,
            ));
        } else {
            config.restart_notice = Some(notice);
        }
    }

    if let Some(presets) = raw.broadcast.presets {
        let mut kept = Vec::new();
        for (i, message) in presets.into_iter().enumerate() {
            let chars = message.chars().count();
            if message.trim().is_empty() || chars > constants::MAX_BROADCAST_MESSAGE_CHARS {
                warnings.push(format!(
                    "[broadcast] presets[{i}] is empty or over {} characters. Skipped.",
                    constants::MAX_BROADCAST_MESSAGE_CHARS,
                ));
            } else if kept.len() == constants::MAX_BROADCAST_PRESETS {
                warnings.push(format!(
                    "[broadcast] more than {} presets. Extra entries ignored.",
                    constants::MAX_BROADCAST_PRESETS,
                ));
                break;
            } else {
                kept.push(message);
            }
        }
        config.presets = kept;
    }

    // -- Tail --
    if let Some(ms) = raw.tail.poll_interval_ms {
        if (constants::MIN_TAIL_POLL_INTERVAL_MS..=constants::MAX_TAIL_POLL_INTERVAL_MS)
            .contains(&ms)
        {
            config.tail_poll_interval = Duration::from_millis(ms);
        } else {
            warnings.push(format!(
                "[tail] poll_interval_ms = {ms} is out of range ({}-{}). Using default ({}).",
                constants::MIN_TAIL_POLL_INTERVAL_MS,
                constants::MAX_TAIL_POLL_INTERVAL_MS,
                constants::TAIL_POLL_INTERVAL_MS,
            ));
        }
    }

    // -- Names --
    for id in raw.names.keys() {
        if crate::core::model::parse_server_id(id, &config.identifier, count).is_err() {
            warnings.push(format!(
                "[names] '{id}' does not name a configured tile and will never be shown.",
            ));
        }
    }
    config.names = raw.names;

    // -- Logging: level --
    if let Some(ref level) = raw.logging.level {
        let valid = ["error", "warn", "info", "debug", "trace"];
        if valid.contains(&level.to_lowercase().as_str()) {
            config.log_level = Some(level.clone());
        } else {
            warnings.push(format!(
                "[logging] level = \"{level}\" is not recognised. \
                 Valid values: error, warn, info, debug, trace. Using default ({}).",
                constants::DEFAULT_LOG_LEVEL,
            ));
        }
    }

    // -- Logging: file --
    if let Some(ref file) = raw.logging.file {
        if !file.is_empty() {
            config.log_file = Some(resolve_path(base_dir, file));
        }
    }

    if !warnings.is_empty() {
        tracing::warn!(
            count = warnings.len(),
            "Config validation produced warnings"
        );
    }

    Ok((config, warnings))
}
