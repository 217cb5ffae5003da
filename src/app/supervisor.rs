// LOMan - app/supervisor.rs
//
// Tile supervisor: owns the registry of tile slots and runs each tile's
// server process on its own worker thread.
//
// Architecture:
//   - One `Mutex<TileSlot>` per tile, so commands on unrelated tiles never
//     contend. Every check-then-transition happens under the slot's lock.
//   - `start` flips the slot to `Starting` and spawns a worker thread that
//     launches the process, reports `Running`, then polls the slot's
//     `StopSignal` and the process exit every `poll_interval`.
//   - `stop` sets the signal, flips to `Stopping` and returns a
//     `StopCompletion` immediately. The worker performs the final transition.
//     A watchdog bounds the wait: after `stop_timeout` the tile goes `Error`
//     and the worker is detached.
//   - Each slot carries a generation counter. Background completions carry
//     the generation they were started with and are ignored once it moves on.
//
// Commands never block on process I/O. The only blocking calls are
// `StopCompletion::wait*`, which callers opt into.

use crate::core::model::{
    BatchReport, RestartOutcome, StopOutcome, SupervisorSettings, TileOutcome, TilePhase,
    TileStatus,
};
use crate::core::naming::NameLookup;
use crate::core::signal::StopSignal;
use crate::core::worker::{ExitSummary, TileLaunch, TileLauncher, TileProcess};
use crate::util::error::SupervisorError;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

// =============================================================================
// Stop completion
// =============================================================================

#[derive(Default)]
struct CompletionCell {
    outcome: Mutex<Option<StopOutcome>>,
    ready: Condvar,
}

impl CompletionCell {
    /// Record the outcome. The first call wins.
    fn complete(&self, outcome: StopOutcome) -> bool {
        let mut slot = lock_recover(&self.outcome);
        if slot.is_some() {
            return false;
        }
        *slot = Some(outcome);
        self.ready.notify_all();
        true
    }
}

/// Handle on an in-flight stop.
///
/// Resolves to `Exited` once the worker has observed the process exit, or
/// `TimedOut` once the stop timeout elapsed first.
#[derive(Clone)]
pub struct StopCompletion {
    cell: Arc<CompletionCell>,
}

impl StopCompletion {
    fn new() -> Self {
        Self {
            cell: Arc::new(CompletionCell::default()),
        }
    }

    /// Outcome if already known.
    pub fn try_outcome(&self) -> Option<StopOutcome> {
        *lock_recover(&self.cell.outcome)
    }

    /// Block until the stop resolves.
    pub fn wait(&self) -> StopOutcome {
        let mut outcome = lock_recover(&self.cell.outcome);
        loop {
            if let Some(o) = *outcome {
                return o;
            }
            outcome = self
                .cell
                .ready
                .wait(outcome)
                .unwrap_or_else(|p| p.into_inner());
        }
    }

    /// Block for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StopOutcome> {
        let deadline = Instant::now() + timeout;
        let mut outcome = lock_recover(&self.cell.outcome);
        loop {
            if let Some(o) = *outcome {
                return Some(o);
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            outcome = self
                .cell
                .ready
                .wait_timeout(outcome, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|p| p.into_inner().0);
        }
    }
}

impl std::fmt::Debug for StopCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopCompletion")
            .field("outcome", &self.try_outcome())
            .finish()
    }
}

// =============================================================================
// Registry
// =============================================================================

#[derive(Default)]
struct TileSlot {
    phase: TilePhase,
    /// Bumped on every start and on detach; stale background work compares
    /// against it before touching the slot.
    generation: u64,
    /// Present while a worker owns a process for this slot.
    stop_signal: Option<StopSignal>,
    stop_completion: Option<StopCompletion>,
    pid: Option<u32>,
    started_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    restart_pending: bool,
    /// Identifies the most recent scheduled start.
    restart_token: u64,
}

struct Inner {
    slots: Vec<Mutex<TileSlot>>,
    launches: Vec<TileLaunch>,
    launcher: Arc<dyn TileLauncher>,
    names: Arc<dyn NameLookup>,
    settings: SupervisorSettings,
    closing: AtomicBool,
}

fn lock_recover<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Supervisor: lock poisoned, recovering");
        poisoned.into_inner()
    })
}

impl Inner {
    fn check_tile(&self, tile_id: usize) -> Result<(), SupervisorError> {
        if tile_id < self.slots.len() {
            Ok(())
        } else {
            Err(SupervisorError::InvalidTile {
                tile_id,
                tile_count: self.slots.len(),
            })
        }
    }

    fn slot(&self, tile_id: usize) -> MutexGuard<'_, TileSlot> {
        lock_recover(&self.slots[tile_id])
    }

    fn server_id(&self, tile_id: usize) -> &str {
        &self.launches[tile_id].server_id
    }

    /// Sleep for `delay` in poll-sized slices. Returns `false` if the
    /// supervisor started closing meanwhile.
    fn sleep_unless_closing(&self, delay: Duration) -> bool {
        let deadline = Instant::now() + delay;
        loop {
            if self.closing.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(self.settings.poll_interval));
        }
    }
}

// =============================================================================
// TileSupervisor
// =============================================================================

/// Starts, stops and restarts tiles without blocking the caller.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct TileSupervisor {
    inner: Arc<Inner>,
}

impl TileSupervisor {
    /// One slot per entry in `launches`; slot `i` launches `launches[i]`.
    pub fn new(
        launches: Vec<TileLaunch>,
        launcher: Arc<dyn TileLauncher>,
        names: Arc<dyn NameLookup>,
        settings: SupervisorSettings,
    ) -> Self {
        let slots = launches.iter().map(|_| Mutex::default()).collect();
        tracing::debug!(tiles = launches.len(), "Supervisor created");
        Self {
            inner: Arc::new(Inner {
                slots,
                launches,
                launcher,
                names,
                settings,
                closing: AtomicBool::new(false),
            }),
        }
    }

    pub fn tile_count(&self) -> usize {
        self.inner.slots.len()
    }

    /// Start a stopped tile. Returns once the worker is spawned; the tile is
    /// `Starting` until the process is up.
    pub fn start(&self, tile_id: usize) -> Result<(), SupervisorError> {
        self.inner.check_tile(tile_id)?;
        let mut slot = self.inner.slot(tile_id);
        begin_start(&self.inner, tile_id, &mut slot)
    }

    /// Ask a running tile to stop. Returns immediately.
    pub fn stop(&self, tile_id: usize) -> Result<StopCompletion, SupervisorError> {
        self.inner.check_tile(tile_id)?;
        let mut slot = self.inner.slot(tile_id);
        begin_stop(&self.inner, tile_id, &mut slot)
    }

    /// Stop then start after `delay`. A stopped tile just gets a delayed
    /// start. Returns immediately either way.
    pub fn restart(
        &self,
        tile_id: usize,
        delay: Duration,
    ) -> Result<RestartOutcome, SupervisorError> {
        self.inner.check_tile(tile_id)?;
        let inner = &self.inner;
        let mut slot = inner.slot(tile_id);
        let current = slot.phase;

        match current {
            TilePhase::Running => {
                let completion = begin_stop(inner, tile_id, &mut slot)?;
                let token = next_restart_token(&mut slot);

                let worker_inner = Arc::clone(inner);
                let spawned = std::thread::Builder::new()
                    .name(format!("loman-restart-{tile_id}"))
                    .spawn(move || {
                        match completion.wait() {
                            StopOutcome::Exited => {
                                run_scheduled_start(&worker_inner, tile_id, token, delay)
                            }
                            StopOutcome::TimedOut => {
                                let mut slot = worker_inner.slot(tile_id);
                                if slot.restart_token == token {
                                    slot.restart_pending = false;
                                }
                                tracing::warn!(
                                    tile = tile_id,
                                    server = %worker_inner.server_id(tile_id),
                                    "Restart abandoned: stop timed out"
                                );
                            }
                        }
                    });

                if let Err(e) = spawned {
                    slot.restart_pending = false;
                    return Err(SupervisorError::WorkerSpawn {
                        server_id: inner.server_id(tile_id).to_string(),
                        source: e,
                    });
                }

                tracing::info!(
                    tile = tile_id,
                    server = %inner.server_id(tile_id),
                    delay_ms = delay.as_millis() as u64,
                    "Restart requested"
                );
                Ok(RestartOutcome::Restarting)
            }
            TilePhase::Stopped => {
                schedule_start(inner, tile_id, &mut slot, delay)?;
                Ok(RestartOutcome::StartScheduled)
            }
            phase => Err(SupervisorError::NotRunning {
                server_id: inner.server_id(tile_id).to_string(),
                phase: phase.label(),
            }),
        }
    }

    /// Clear an `Error` tile back to `Stopped`. Returns `false` if the tile
    /// was not in `Error`.
    pub fn acknowledge(&self, tile_id: usize) -> Result<bool, SupervisorError> {
        self.inner.check_tile(tile_id)?;
        let mut slot = self.inner.slot(tile_id);
        if slot.phase != TilePhase::Error {
            return Ok(false);
        }
        slot.phase = TilePhase::Stopped;
        slot.last_error = None;
        tracing::info!(
            tile = tile_id,
            server = %self.inner.server_id(tile_id),
            "Error acknowledged"
        );
        Ok(true)
    }

    /// Snapshot of one tile. Never blocks on process I/O.
    pub fn status(&self, tile_id: usize) -> Result<TileStatus, SupervisorError> {
        self.inner.check_tile(tile_id)?;
        let (phase, pid, started_at, last_error, restart_pending) = {
            let slot = self.inner.slot(tile_id);
            debug_assert!(slot.pid.is_none() || slot.phase.may_hold_process());
            (
                slot.phase,
                slot.pid,
                slot.started_at,
                slot.last_error.clone(),
                slot.restart_pending,
            )
        };
        let server_id = self.inner.server_id(tile_id).to_string();
        Ok(TileStatus {
            tile_id,
            display_name: self.inner.names.name_or_id(&server_id),
            server_id,
            phase,
            pid,
            started_at,
            last_error,
            restart_pending,
        })
    }

    pub fn status_all(&self) -> Vec<TileStatus> {
        (0..self.tile_count())
            .filter_map(|t| self.status(t).ok())
            .collect()
    }

    pub fn start_all(&self) -> BatchReport<()> {
        self.for_each_tile(|t| self.start(t))
    }

    pub fn stop_all(&self) -> BatchReport<StopCompletion> {
        self.for_each_tile(|t| self.stop(t))
    }

    pub fn restart_all(&self, delay: Duration) -> BatchReport<RestartOutcome> {
        self.for_each_tile(|t| self.restart(t, delay))
    }

    /// Cancel scheduled starts and stop every running tile. Tiles still
    /// launching are shut down as soon as their process is up.
    pub fn shutdown(&self) -> BatchReport<StopCompletion> {
        self.inner.closing.store(true, Ordering::SeqCst);
        for tile_id in 0..self.tile_count() {
            self.inner.slot(tile_id).restart_pending = false;
        }
        let report = self.stop_all();
        tracing::info!(
            stopping = report.outcomes.iter().filter(|o| o.result.is_ok()).count(),
            "Supervisor shutting down"
        );
        report
    }

    fn for_each_tile<T>(
        &self,
        op: impl Fn(usize) -> Result<T, SupervisorError>,
    ) -> BatchReport<T> {
        let outcomes = (0..self.tile_count())
            .map(|tile_id| TileOutcome {
                tile_id,
                server_id: self.inner.server_id(tile_id).to_string(),
                result: op(tile_id),
            })
            .collect();
        BatchReport { outcomes }
    }
}

// =============================================================================
// Transitions (caller holds the slot lock)
// =============================================================================

fn begin_start(
    inner: &Arc<Inner>,
    tile_id: usize,
    slot: &mut TileSlot,
) -> Result<(), SupervisorError> {
    let server_id = inner.server_id(tile_id);
    if slot.phase != TilePhase::Stopped {
        return Err(SupervisorError::AlreadyRunning {
            server_id: server_id.to_string(),
            phase: slot.phase.label(),
        });
    }

    let signal = StopSignal::new();
    slot.generation += 1;
    let generation = slot.generation;

    let worker_inner = Arc::clone(inner);
    let worker_signal = signal.clone();
    std::thread::Builder::new()
        .name(format!("loman-tile-{tile_id}"))
        .spawn(move || run_worker(worker_inner, tile_id, generation, worker_signal))
        .map_err(|e| SupervisorError::WorkerSpawn {
            server_id: server_id.to_string(),
            source: e,
        })?;

    slot.phase = TilePhase::Starting;
    slot.stop_signal = Some(signal);
    slot.stop_completion = None;
    slot.last_error = None;
    slot.restart_pending = false;

    tracing::info!(tile = tile_id, server = %server_id, "Tile starting");
    Ok(())
}

fn begin_stop(
    inner: &Arc<Inner>,
    tile_id: usize,
    slot: &mut TileSlot,
) -> Result<StopCompletion, SupervisorError> {
    let server_id = inner.server_id(tile_id);
    if slot.phase != TilePhase::Running {
        return Err(SupervisorError::NotRunning {
            server_id: server_id.to_string(),
            phase: slot.phase.label(),
        });
    }

    if let Some(ref signal) = slot.stop_signal {
        signal.set();
    }
    slot.phase = TilePhase::Stopping;
    let completion = StopCompletion::new();
    slot.stop_completion = Some(completion.clone());

    let generation = slot.generation;
    let watchdog_inner = Arc::clone(inner);
    let watched = completion.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("loman-stop-{tile_id}"))
        .spawn(move || run_stop_watchdog(&watchdog_inner, tile_id, generation, &watched));
    if let Err(e) = spawned {
        tracing::error!(
            tile = tile_id,
            server = %server_id,
            error = %e,
            "Cannot spawn stop watchdog; stop wait is unbounded"
        );
    }

    tracing::info!(tile = tile_id, server = %server_id, "Tile stopping");
    Ok(completion)
}

fn next_restart_token(slot: &mut TileSlot) -> u64 {
    slot.restart_token += 1;
    slot.restart_pending = true;
    slot.restart_token
}

/// Mark a delayed start and spawn the thread that performs it.
fn schedule_start(
    inner: &Arc<Inner>,
    tile_id: usize,
    slot: &mut TileSlot,
    delay: Duration,
) -> Result<(), SupervisorError> {
    let token = next_restart_token(slot);
    let worker_inner = Arc::clone(inner);
    let spawned = std::thread::Builder::new()
        .name(format!("loman-restart-{tile_id}"))
        .spawn(move || run_scheduled_start(&worker_inner, tile_id, token, delay));

    if let Err(e) = spawned {
        slot.restart_pending = false;
        return Err(SupervisorError::WorkerSpawn {
            server_id: inner.server_id(tile_id).to_string(),
            source: e,
        });
    }

    tracing::info!(
        tile = tile_id,
        server = %inner.server_id(tile_id),
        delay_ms = delay.as_millis() as u64,
        "Start scheduled"
    );
    Ok(())
}

// =============================================================================
// Background units
// =============================================================================

fn run_scheduled_start(inner: &Arc<Inner>, tile_id: usize, token: u64, delay: Duration) {
    let proceed = inner.sleep_unless_closing(delay);

    let mut slot = inner.slot(tile_id);
    if slot.restart_token != token || !slot.restart_pending {
        // Superseded by a manual start or a newer schedule.
        return;
    }
    slot.restart_pending = false;
    if !proceed {
        tracing::debug!(tile = tile_id, "Scheduled start cancelled by shutdown");
        return;
    }
    if let Err(e) = begin_start(inner, tile_id, &mut slot) {
        tracing::warn!(tile = tile_id, error = %e, "Scheduled start skipped");
    }
}

fn run_stop_watchdog(
    inner: &Arc<Inner>,
    tile_id: usize,
    generation: u64,
    completion: &StopCompletion,
) {
    let timeout = inner.settings.stop_timeout;
    if completion.wait_timeout(timeout).is_some() {
        return;
    }

    let mut slot = inner.slot(tile_id);
    if slot.generation != generation || slot.phase != TilePhase::Stopping {
        return;
    }

    // Detach: the worker keeps waiting on its process but can no longer
    // touch this slot.
    slot.generation += 1;
    slot.phase = TilePhase::Error;
    slot.stop_signal = None;
    slot.stop_completion = None;
    slot.pid = None;
    slot.started_at = None;
    slot.last_error = Some(format!(
        "did not exit within {}s of the stop request",
        timeout.as_secs()
    ));
    completion.cell.complete(StopOutcome::TimedOut);

    tracing::error!(
        tile = tile_id,
        server = %inner.server_id(tile_id),
        timeout_secs = timeout.as_secs(),
        "Tile did not stop in time; marked Error"
    );
}

enum WorkerEnd {
    Requested,
    Crashed(ExitSummary),
}

/// Tile worker: owns the process for one start cycle.
fn run_worker(inner: Arc<Inner>, tile_id: usize, generation: u64, signal: StopSignal) {
    let launch = &inner.launches[tile_id];

    let mut process = match inner.launcher.launch(launch) {
        Ok(p) => p,
        Err(e) => {
            tracing::error!(
                tile = tile_id,
                server = %launch.server_id,
                program = %launch.program.display(),
                error = %e,
                "Launch failed"
            );
            let mut slot = inner.slot(tile_id);
            if slot.generation == generation {
                slot.phase = TilePhase::Error;
                slot.stop_signal = None;
                slot.last_error = Some(format!("launch failed: {e}"));
            }
            return;
        }
    };

    {
        let mut slot = inner.slot(tile_id);
        if slot.generation != generation {
            drop(slot);
            shutdown_process(&mut *process, tile_id, inner.settings.poll_interval);
            return;
        }
        if inner.closing.load(Ordering::SeqCst) {
            // Launched after shutdown began; nobody will stop it otherwise.
            drop(slot);
            shutdown_process(&mut *process, tile_id, inner.settings.poll_interval);
            finish(&inner, tile_id, generation, WorkerEnd::Requested);
            return;
        }
        debug_assert!(slot.phase.may_hold_process(), "live worker in {}", slot.phase);
        slot.phase = TilePhase::Running;
        slot.pid = process.id();
        slot.started_at = Some(Utc::now());
    }
    tracing::info!(
        tile = tile_id,
        server = %launch.server_id,
        pid = ?process.id(),
        "Tile running"
    );

    let end = supervise(&inner, tile_id, &mut *process, &signal);
    finish(&inner, tile_id, generation, end);
}

/// Poll until the process exits, asking it to shut down once the signal is
/// set.
fn supervise(
    inner: &Inner,
    tile_id: usize,
    process: &mut dyn TileProcess,
    signal: &StopSignal,
) -> WorkerEnd {
    let interval = inner.settings.poll_interval;
    loop {
        if signal.is_set() {
            shutdown_process(process, tile_id, interval);
            return WorkerEnd::Requested;
        }
        match process.try_wait() {
            Ok(Some(summary)) => return WorkerEnd::Crashed(summary),
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(tile = tile_id, error = %e, "Cannot poll server process");
            }
        }
        std::thread::sleep(interval);
    }
}

/// Request shutdown and wait for the exit, however long it takes.
fn shutdown_process(process: &mut dyn TileProcess, tile_id: usize, interval: Duration) {
    if let Err(e) = process.request_shutdown() {
        tracing::warn!(tile = tile_id, error = %e, "Shutdown request failed");
    }
    loop {
        match process.try_wait() {
            Ok(Some(summary)) => {
                tracing::debug!(tile = tile_id, exit = %summary, "Server process exited");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(tile = tile_id, error = %e, "Cannot poll server process");
            }
        }
        std::thread::sleep(interval);
    }
}

fn finish(inner: &Arc<Inner>, tile_id: usize, generation: u64, end: WorkerEnd) {
    let server_id = inner.server_id(tile_id);
    let mut slot = inner.slot(tile_id);
    if slot.generation != generation {
        tracing::debug!(tile = tile_id, server = %server_id, "Detached worker finished");
        return;
    }

    debug_assert!(slot.phase.may_hold_process(), "live worker in {}", slot.phase);
    slot.phase = TilePhase::Stopped;
    slot.stop_signal = None;
    slot.pid = None;
    slot.started_at = None;
    // A stop may have raced an unexpected exit; its waiters resolve either way.
    if let Some(completion) = slot.stop_completion.take() {
        completion.cell.complete(StopOutcome::Exited);
    }

    match end {
        WorkerEnd::Requested => {
            tracing::info!(tile = tile_id, server = %server_id, "Tile stopped");
        }
        WorkerEnd::Crashed(summary) => {
            slot.last_error = Some(format!("server exited unexpectedly ({summary})"));
            tracing::warn!(
                tile = tile_id,
                server = %server_id,
                exit = %summary,
                "Server exited unexpectedly"
            );
            let relaunch = inner
                .settings
                .crash_restart_delay
                .filter(|_| !inner.closing.load(Ordering::SeqCst));
            if let Some(delay) = relaunch {
                if let Err(e) = schedule_start(inner, tile_id, &mut slot, delay) {
                    tracing::error!(tile = tile_id, error = %e, "Cannot schedule relaunch");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::naming::StaticNames;
    use std::collections::{HashMap, HashSet};
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicU32;

    // === Fake launcher ===

    #[derive(Default)]
    struct Control {
        exit: Mutex<Option<ExitSummary>>,
        shutdown_requested: AtomicBool,
        ignore_shutdown: bool,
    }

    struct FakeProcess {
        id: u32,
        control: Arc<Control>,
    }

    impl TileProcess for FakeProcess {
        fn id(&self) -> Option<u32> {
            Some(self.id)
        }

        fn try_wait(&mut self) -> io::Result<Option<ExitSummary>> {
            Ok(*self.control.exit.lock().unwrap())
        }

        fn request_shutdown(&mut self) -> io::Result<()> {
            self.control.shutdown_requested.store(true, Ordering::SeqCst);
            if !self.control.ignore_shutdown {
                *self.control.exit.lock().unwrap() = Some(ExitSummary {
                    success: true,
                    code: Some(0),
                });
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeLauncher {
        next_pid: AtomicU32,
        launches: Mutex<Vec<(usize, Instant)>>,
        controls: Mutex<HashMap<usize, Arc<Control>>>,
        fail: HashSet<usize>,
        hang: HashSet<usize>,
    }

    impl FakeLauncher {
        fn launch_count(&self, tile_id: usize) -> usize {
            self.launches
                .lock()
                .unwrap()
                .iter()
                .filter(|(t, _)| *t == tile_id)
                .count()
        }

        fn control(&self, tile_id: usize) -> Arc<Control> {
            Arc::clone(&self.controls.lock().unwrap()[&tile_id])
        }
    }

    impl TileLauncher for FakeLauncher {
        fn launch(&self, launch: &TileLaunch) -> io::Result<Box<dyn TileProcess>> {
            if self.fail.contains(&launch.tile_id) {
                return Err(io::Error::new(io::ErrorKind::NotFound, "no such server"));
            }
            let control = Arc::new(Control {
                ignore_shutdown: self.hang.contains(&launch.tile_id),
                ..Default::default()
            });
            self.controls
                .lock()
                .unwrap()
                .insert(launch.tile_id, Arc::clone(&control));
            self.launches
                .lock()
                .unwrap()
                .push((launch.tile_id, Instant::now()));
            Ok(Box::new(FakeProcess {
                id: 1000 + self.next_pid.fetch_add(1, Ordering::SeqCst),
                control,
            }))
        }
    }

    // === Helpers ===

    fn launches(count: usize) -> Vec<TileLaunch> {
        (0..count)
            .map(|t| TileLaunch {
                tile_id: t,
                server_id: format!("Disc0oasis{t}"),
                install_dir: PathBuf::from("."),
                program: PathBuf::from("server"),
                args: Vec::new(),
            })
            .collect()
    }

    fn fast_settings() -> SupervisorSettings {
        SupervisorSettings {
            stop_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            crash_restart_delay: None,
        }
    }

    fn supervisor_with(
        count: usize,
        launcher: FakeLauncher,
        settings: SupervisorSettings,
    ) -> (TileSupervisor, Arc<FakeLauncher>) {
        let launcher = Arc::new(launcher);
        let mut names = HashMap::new();
        names.insert("Disc0oasis0".to_string(), "Ancient City".to_string());
        let sup = TileSupervisor::new(
            launches(count),
            Arc::clone(&launcher) as Arc<dyn TileLauncher>,
            Arc::new(StaticNames::new(names)),
            settings,
        );
        (sup, launcher)
    }

    fn supervisor(count: usize) -> (TileSupervisor, Arc<FakeLauncher>) {
        supervisor_with(count, FakeLauncher::default(), fast_settings())
    }

    fn phase(sup: &TileSupervisor, tile_id: usize) -> TilePhase {
        sup.status(tile_id).unwrap().phase
    }

    fn wait_for(sup: &TileSupervisor, tile_id: usize, want: TilePhase) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while phase(sup, tile_id) != want {
            assert!(
                Instant::now() < deadline,
                "tile {tile_id} never reached {want}, stuck in {}",
                phase(sup, tile_id)
            );
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn running(count: usize) -> (TileSupervisor, Arc<FakeLauncher>) {
        let (sup, launcher) = supervisor(count);
        for t in 0..count {
            sup.start(t).unwrap();
            wait_for(&sup, t, TilePhase::Running);
        }
        (sup, launcher)
    }

    // === Validation ===

    #[test]
    fn test_out_of_range_tile_rejected_everywhere() {
        let (sup, launcher) = supervisor(3);
        let invalid = |r: Result<(), SupervisorError>| {
            assert!(matches!(
                r,
                Err(SupervisorError::InvalidTile {
                    tile_id: 3,
                    tile_count: 3
                })
            ))
        };
        invalid(sup.start(3));
        invalid(sup.stop(3).map(|_| ()));
        invalid(sup.restart(3, Duration::ZERO).map(|_| ()));
        invalid(sup.acknowledge(3).map(|_| ()));
        invalid(sup.status(3).map(|_| ()));

        assert!(sup.status_all().iter().all(|s| s.phase == TilePhase::Stopped));
        assert_eq!(launcher.launches.lock().unwrap().len(), 0);
    }

    #[test]
    fn test_double_start_is_already_running() {
        let (sup, launcher) = supervisor(1);
        sup.start(0).unwrap();
        let err = sup.start(0).unwrap_err();
        assert!(matches!(err, SupervisorError::AlreadyRunning { .. }));

        wait_for(&sup, 0, TilePhase::Running);
        let pid = sup.status(0).unwrap().pid;
        assert!(sup.start(0).is_err());
        assert_eq!(sup.status(0).unwrap().pid, pid);
        assert_eq!(launcher.launch_count(0), 1);
    }

    #[test]
    fn test_stop_on_stopped_tile_is_not_running() {
        let (sup, _) = supervisor(2);
        let err = sup.stop(1).unwrap_err();
        assert!(matches!(
            err,
            SupervisorError::NotRunning {
                phase: "Stopped",
                ..
            }
        ));
        assert_eq!(phase(&sup, 1), TilePhase::Stopped);
    }

    // === Lifecycle ===

    #[test]
    fn test_start_stop_cycle() {
        let (sup, launcher) = running(1);
        let status = sup.status(0).unwrap();
        assert!(status.pid.is_some());
        assert!(status.started_at.is_some());
        assert_eq!(status.display_name, "Ancient City");

        let completion = sup.stop(0).unwrap();
        assert!(launcher.launch_count(0) == 1);
        assert_eq!(
            completion.wait_timeout(Duration::from_secs(5)),
            Some(StopOutcome::Exited)
        );
        assert!(launcher.control(0).shutdown_requested.load(Ordering::SeqCst));

        let status = sup.status(0).unwrap();
        assert_eq!(status.phase, TilePhase::Stopped);
        assert!(status.pid.is_none());
        assert!(status.last_error.is_none());

        // A fresh cycle gets a fresh process.
        sup.start(0).unwrap();
        wait_for(&sup, 0, TilePhase::Running);
        assert_eq!(launcher.launch_count(0), 2);
    }

    #[test]
    fn test_start_while_stopping_is_rejected() {
        let launcher = FakeLauncher {
            hang: [0].into_iter().collect(),
            ..Default::default()
        };
        let (sup, _) = supervisor_with(1, launcher, fast_settings());
        sup.start(0).unwrap();
        wait_for(&sup, 0, TilePhase::Running);

        let _completion = sup.stop(0).unwrap();
        assert_eq!(phase(&sup, 0), TilePhase::Stopping);
        assert!(matches!(
            sup.start(0),
            Err(SupervisorError::AlreadyRunning {
                phase: "Stopping",
                ..
            })
        ));
    }

    #[test]
    fn test_restart_waits_for_delay_and_never_shows_running_in_between() {
        let (sup, launcher) = running(1);
        let delay = Duration::from_millis(300);

        let requested = Instant::now();
        assert_eq!(sup.restart(0, delay).unwrap(), RestartOutcome::Restarting);
        assert_ne!(phase(&sup, 0), TilePhase::Running);

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let status = sup.status(0).unwrap();
            let count = launcher.launch_count(0);
            if status.phase == TilePhase::Running {
                assert_eq!(count, 2, "Running observed before the new launch");
                break;
            }
            assert!(Instant::now() < deadline, "restart never completed");
            std::thread::sleep(Duration::from_millis(5));
        }

        let relaunched_at = launcher.launches.lock().unwrap()[1].1;
        assert!(relaunched_at.duration_since(requested) >= delay);
        assert!(!sup.status(0).unwrap().restart_pending);
    }

    #[test]
    fn test_restart_on_stopped_tile_schedules_start() {
        let (sup, launcher) = supervisor(1);
        assert_eq!(
            sup.restart(0, Duration::from_millis(20)).unwrap(),
            RestartOutcome::StartScheduled
        );
        assert!(sup.status(0).unwrap().restart_pending);
        wait_for(&sup, 0, TilePhase::Running);
        assert_eq!(launcher.launch_count(0), 1);
    }

    #[test]
    fn test_manual_start_supersedes_scheduled_start() {
        let (sup, launcher) = supervisor(1);
        sup.restart(0, Duration::from_millis(100)).unwrap();
        sup.start(0).unwrap();
        wait_for(&sup, 0, TilePhase::Running);
        std::thread::sleep(Duration::from_millis(200));
        assert_eq!(launcher.launch_count(0), 1);
        assert_eq!(phase(&sup, 0), TilePhase::Running);
    }

    #[test]
    fn test_restart_all_reports_each_tile() {
        let (sup, launcher) = supervisor(3);
        for t in [0, 2] {
            sup.start(t).unwrap();
            wait_for(&sup, t, TilePhase::Running);
        }

        let report = sup.restart_all(Duration::from_millis(20));
        assert!(report.is_clean());
        assert_eq!(report.outcomes.len(), 3);
        assert_eq!(
            report.get(0).unwrap().result.as_ref().unwrap(),
            &RestartOutcome::Restarting
        );
        assert_eq!(
            report.get(1).unwrap().result.as_ref().unwrap(),
            &RestartOutcome::StartScheduled
        );
        assert_eq!(
            report.get(2).unwrap().result.as_ref().unwrap(),
            &RestartOutcome::Restarting
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while launcher.launches.lock().unwrap().len() < 5 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
        for t in 0..3 {
            wait_for(&sup, t, TilePhase::Running);
        }
    }

    #[test]
    fn test_batch_start_and_stop_collect_failures() {
        let (sup, _) = supervisor(3);
        sup.start(1).unwrap();

        let report = sup.start_all();
        assert_eq!(report.failures().count(), 1);
        assert!(matches!(
            report.get(1).unwrap().result,
            Err(SupervisorError::AlreadyRunning { .. })
        ));
        for t in 0..3 {
            wait_for(&sup, t, TilePhase::Running);
        }

        let report = sup.stop_all();
        assert!(report.is_clean());
        for outcome in &report.outcomes {
            let completion = outcome.result.as_ref().unwrap();
            assert_eq!(
                completion.wait_timeout(Duration::from_secs(5)),
                Some(StopOutcome::Exited)
            );
        }
    }

    // === Failures ===

    #[test]
    fn test_stop_timeout_marks_error_until_acknowledged() {
        let launcher = FakeLauncher {
            hang: [0].into_iter().collect(),
            ..Default::default()
        };
        let settings = SupervisorSettings {
            stop_timeout: Duration::from_millis(200),
            ..fast_settings()
        };
        let (sup, _) = supervisor_with(1, launcher, settings);
        sup.start(0).unwrap();
        wait_for(&sup, 0, TilePhase::Running);

        let completion = sup.stop(0).unwrap();
        assert_eq!(completion.wait(), StopOutcome::TimedOut);

        let status = sup.status(0).unwrap();
        assert_eq!(status.phase, TilePhase::Error);
        assert!(status.pid.is_none());
        assert!(status.last_error.unwrap().contains("did not exit"));
        assert!(sup.start(0).is_err());

        assert!(sup.acknowledge(0).unwrap());
        assert_eq!(phase(&sup, 0), TilePhase::Stopped);
        assert!(!sup.acknowledge(0).unwrap());
    }

    #[test]
    fn test_launch_failure_moves_to_error() {
        let launcher = FakeLauncher {
            fail: [1].into_iter().collect(),
            ..Default::default()
        };
        let (sup, _) = supervisor_with(2, launcher, fast_settings());
        sup.start(1).unwrap();
        wait_for(&sup, 1, TilePhase::Error);

        let status = sup.status(1).unwrap();
        assert!(status.last_error.unwrap().contains("launch failed"));
        assert_eq!(phase(&sup, 0), TilePhase::Stopped);
        assert!(sup.acknowledge(1).unwrap());
    }

    #[test]
    fn test_unexpected_exit_is_recorded() {
        let (sup, launcher) = running(1);
        *launcher.control(0).exit.lock().unwrap() = Some(ExitSummary {
            success: false,
            code: Some(3),
        });
        wait_for(&sup, 0, TilePhase::Stopped);

        let status = sup.status(0).unwrap();
        assert!(status.last_error.unwrap().contains("exit code 3"));
        assert!(!status.restart_pending);
        assert_eq!(launcher.launch_count(0), 1);
    }

    #[test]
    fn test_crash_relaunch_when_enabled() {
        let settings = SupervisorSettings {
            crash_restart_delay: Some(Duration::from_millis(50)),
            ..fast_settings()
        };
        let (sup, launcher) = supervisor_with(1, FakeLauncher::default(), settings);
        sup.start(0).unwrap();
        wait_for(&sup, 0, TilePhase::Running);

        *launcher.control(0).exit.lock().unwrap() = Some(ExitSummary {
            success: false,
            code: None,
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while launcher.launch_count(0) < 2 {
            assert!(Instant::now() < deadline, "crashed tile was not relaunched");
            std::thread::sleep(Duration::from_millis(5));
        }
        wait_for(&sup, 0, TilePhase::Running);
    }

    #[test]
    fn test_shutdown_cancels_scheduled_starts() {
        let (sup, launcher) = supervisor(2);
        sup.start(0).unwrap();
        wait_for(&sup, 0, TilePhase::Running);
        sup.restart(1, Duration::from_millis(100)).unwrap();

        let report = sup.shutdown();
        assert!(report.get(0).unwrap().result.is_ok());
        assert!(report.get(1).unwrap().result.is_err());

        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(launcher.launch_count(1), 0);
        assert_eq!(phase(&sup, 0), TilePhase::Stopped);
        assert!(!sup.status(1).unwrap().restart_pending);
    }

    #[test]
    fn test_status_uses_id_when_name_unknown() {
        let (sup, _) = supervisor(2);
        let all = sup.status_all();
        assert_eq!(all[0].display_name, "Ancient City");
        assert_eq!(all[1].display_name, "Disc0oasis1");
    }
}
