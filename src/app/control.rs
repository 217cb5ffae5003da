// LOMan - app/control.rs
//
// Control plane: the one surface the console (or any other front end) talks
// to. Binds the validated config to the supervisor, broadcaster and tail
// watcher and translates server ids to tile indices.
//
// Every operation returns without waiting on a process, a broadcast hold,
// or a tail poll. `shutdown` is the exception and is meant for exit.

use crate::app::broadcast::{AdminBroadcaster, BroadcastReceipt};
use crate::app::supervisor::{StopCompletion, TileSupervisor};
use crate::app::tail::LogTailWatcher;
use crate::core::filter::LogFilter;
use crate::core::model::{
    parse_server_id, BatchReport, BroadcastRecord, BroadcastTarget, LogExcerpt, RestartOutcome,
    TailUpdate, TileAction, TilePhase, TileStatus,
};
use crate::core::naming::NameLookup;
use crate::core::worker::TileLauncher;
use crate::platform::config::ManagerConfig;
use crate::platform::fs;
use crate::platform::process::CommandLauncher;
use crate::util::constants::{MAX_TAIL_LINES, MAX_TAIL_SCAN_BYTES, MIN_TAIL_LINES};
use crate::util::error::{BroadcastError, ManagerError, SupervisorError, TailError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// What `perform` set in motion.
#[derive(Debug)]
pub enum ActionOutcome {
    Started,
    Stopping(StopCompletion),
    Restart(RestartOutcome),
}

pub struct ControlPlane {
    config: ManagerConfig,
    supervisor: TileSupervisor,
    broadcaster: AdminBroadcaster,
    tail: LogTailWatcher,
    /// Tile id -> log file currently followed.
    followed: Mutex<HashMap<usize, PathBuf>>,
}

impl ControlPlane {
    pub fn new(
        config: ManagerConfig,
        launcher: Arc<dyn TileLauncher>,
        names: Arc<dyn NameLookup>,
    ) -> Self {
        let launches = (0..config.tile_count)
            .map(|t| config.launch_for(t))
            .collect();
        let supervisor =
            TileSupervisor::new(launches, launcher, names, config.supervisor_settings());
        let broadcaster = AdminBroadcaster::new(config.channel_paths(), config.broadcast_hold);
        let tail = LogTailWatcher::polling(config.tail_poll_interval);

        tracing::info!(
            identifier = %config.identifier,
            tiles = config.tile_count,
            install_dir = %config.install_dir.display(),
            "Control plane ready"
        );

        Self {
            config,
            supervisor,
            broadcaster,
            tail,
            followed: Mutex::new(HashMap::new()),
        }
    }

    /// Production wiring: OS processes and the `[names]` table.
    pub fn from_config(config: ManagerConfig) -> Self {
        let names = Arc::new(config.name_table());
        Self::new(config, Arc::new(CommandLauncher), names)
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn supervisor(&self) -> &TileSupervisor {
        &self.supervisor
    }

    /// Map a server id to its tile index.
    pub fn resolve(&self, server_id: &str) -> Result<usize, SupervisorError> {
        parse_server_id(server_id.trim(), &self.config.identifier, self.config.tile_count)
    }

    pub fn list_status(&self) -> Vec<TileStatus> {
        self.supervisor.status_all()
    }

    pub fn status(&self, server_id: &str) -> Result<TileStatus, ManagerError> {
        let tile_id = self.resolve(server_id)?;
        Ok(self.supervisor.status(tile_id)?)
    }

    /// Run a lifecycle action. A restart first tells the tile's players, then
    /// waits the configured settle delay before relaunching.
    pub fn perform(&self, server_id: &str, action: TileAction) -> Result<ActionOutcome, ManagerError> {
        let tile_id = self.resolve(server_id)?;
        tracing::info!(tile = tile_id, server = %server_id, ?action, "Action requested");

        match action {
            TileAction::Start => {
                self.supervisor.start(tile_id)?;
                Ok(ActionOutcome::Started)
            }
            TileAction::Stop => Ok(ActionOutcome::Stopping(self.supervisor.stop(tile_id)?)),
            TileAction::Restart => {
                self.announce_restart(tile_id);
                let outcome = self.supervisor.restart(tile_id, self.config.restart_delay)?;
                Ok(ActionOutcome::Restart(outcome))
            }
        }
    }

    fn announce_restart(&self, tile_id: usize) {
        let Some(ref notice) = self.config.restart_notice else {
            return;
        };
        let running = self
            .supervisor
            .status(tile_id)
            .map(|s| s.phase == TilePhase::Running)
            .unwrap_or(false);
        if !running {
            return;
        }
        match self.broadcaster.broadcast(notice, &BroadcastTarget::Tile(tile_id)) {
            Ok(receipts) => {
                for r in receipts.iter().filter(|r| r.result.is_err()) {
                    tracing::warn!(tile = r.tile_id, "Restart notice not delivered");
                }
            }
            Err(e) => tracing::warn!(tile = tile_id, error = %e, "Restart notice rejected"),
        }
    }

    pub fn acknowledge(&self, server_id: &str) -> Result<bool, ManagerError> {
        let tile_id = self.resolve(server_id)?;
        Ok(self.supervisor.acknowledge(tile_id)?)
    }

    pub fn start_all(&self) -> BatchReport<()> {
        self.supervisor.start_all()
    }

    pub fn stop_all(&self) -> BatchReport<StopCompletion> {
        self.supervisor.stop_all()
    }

    pub fn restart_all(&self) -> BatchReport<RestartOutcome> {
        self.supervisor.restart_all(self.config.restart_delay)
    }

    /// Broadcast to the given server ids, or to every tile when empty.
    ///
    /// Ids are validated before anything is written.
    pub fn broadcast(
        &self,
        message: &str,
        server_ids: &[String],
    ) -> Result<Vec<BroadcastReceipt>, ManagerError> {
        let target = if server_ids.is_empty() {
            BroadcastTarget::All
        } else {
            let tiles = server_ids
                .iter()
                .map(|id| self.resolve(id))
                .collect::<Result<Vec<_>, _>>()?;
            BroadcastTarget::Tiles(tiles)
        };
        Ok(self.broadcaster.broadcast(message, &target)?)
    }

    /// Broadcast configured quick message `number` (1-based).
    pub fn broadcast_preset(
        &self,
        number: usize,
        server_ids: &[String],
    ) -> Result<Vec<BroadcastReceipt>, ManagerError> {
        let presets = &self.config.presets;
        let message = number
            .checked_sub(1)
            .and_then(|i| presets.get(i))
            .ok_or(BroadcastError::UnknownPreset {
                number,
                count: presets.len(),
            })?;
        self.broadcast(message, server_ids)
    }

    pub fn broadcast_history(&self) -> Vec<BroadcastRecord> {
        self.broadcaster.history()
    }

    pub fn clear_broadcast_history(&self) -> usize {
        self.broadcaster.clear_history()
    }

    /// Newest log file of a tile.
    pub fn log_path(&self, server_id: &str) -> Result<PathBuf, ManagerError> {
        let tile_id = self.resolve(server_id)?;
        let server_id = self.config.server_id(tile_id);
        fs::newest_matching_log(&self.config.log_dir, &server_id).ok_or_else(|| {
            TailError::LogNotFound {
                server_id,
                log_dir: self.config.log_dir.clone(),
            }
            .into()
        })
    }

    /// Last `max_lines` lines of the tile's newest log, optionally filtered.
    ///
    /// With a filter the whole scan window is searched and the last
    /// `max_lines` matches are returned.
    pub fn tail(
        &self,
        server_id: &str,
        max_lines: usize,
        filter: Option<&LogFilter>,
    ) -> Result<LogExcerpt, ManagerError> {
        if !(MIN_TAIL_LINES..=MAX_TAIL_LINES).contains(&max_lines) {
            return Err(TailError::LineCountOutOfRange {
                requested: max_lines,
                min: MIN_TAIL_LINES,
                max: MAX_TAIL_LINES,
            }
            .into());
        }
        let path = self.log_path(server_id)?;
        let filter = filter.filter(|f| !f.is_empty());

        let read_count = if filter.is_some() { usize::MAX } else { max_lines };
        let mut lines = fs::read_last_lines(&path, read_count, MAX_TAIL_SCAN_BYTES)
            .map_err(|e| TailError::Io {
                path: path.clone(),
                source: e,
            })?;
        if let Some(filter) = filter {
            lines = filter.apply(lines);
            let skip = lines.len().saturating_sub(max_lines);
            lines.drain(..skip);
        }

        tracing::debug!(file = %path.display(), lines = lines.len(), "Tail excerpt read");
        Ok(LogExcerpt {
            modified: fs::modified_utc(&path),
            path,
            lines,
        })
    }

    /// Stream new content of the tile's newest log. Starts the watcher on
    /// first use. Following again switches to the newest file.
    pub fn follow(&self, server_id: &str) -> Result<PathBuf, ManagerError> {
        let tile_id = self.resolve(server_id)?;
        let path = self.log_path(server_id)?;

        if !self.tail.is_active() {
            self.tail.start().map_err(|e| TailError::Io {
                path: path.clone(),
                source: e,
            })?;
        }

        let previous = self.followed().insert(tile_id, path.clone());
        if let Some(old) = previous.filter(|old| *old != path) {
            self.tail.unwatch(&old);
        }
        self.tail.watch(path.clone());
        tracing::info!(tile = tile_id, file = %path.display(), "Following log");
        Ok(path)
    }

    /// Stop following a tile's log. Returns `false` if it was not followed.
    pub fn unfollow(&self, server_id: &str) -> Result<bool, ManagerError> {
        let tile_id = self.resolve(server_id)?;
        match self.followed().remove(&tile_id) {
            Some(path) => {
                self.tail.unwatch(&path);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drain up to `max` queued live-tail updates.
    pub fn poll_tail_updates(&self, max: usize) -> Vec<TailUpdate> {
        self.tail.poll_updates(max)
    }

    /// Stop tiles (when configured), let broadcast holds clear, stop tailing.
    pub fn shutdown(&self) {
        if self.config.stop_on_exit {
            let report = self.supervisor.shutdown();
            for outcome in &report.outcomes {
                if let Ok(ref completion) = outcome.result {
                    let result = completion.wait();
                    tracing::info!(server = %outcome.server_id, ?result, "Tile stop finished");
                }
            }
        }

        let grace = self.broadcaster.hold() + Duration::from_secs(1);
        if !self.broadcaster.drain(grace) {
            tracing::warn!("Exiting with broadcast messages still on screen");
        }

        self.tail.stop();
        tracing::info!("Control plane shut down");
    }

    fn followed(&self) -> MutexGuard<'_, HashMap<usize, PathBuf>> {
        self.followed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
