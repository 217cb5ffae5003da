// LOMan - tests/e2e_supervisor.rs
//
// End-to-end tests for tile supervision.
//
// These tests load a real config.toml from disk and drive real OS processes
// (`/bin/sh`) through the control plane: no fake launcher. They cover the
// path from an operator command to a process being spawned, observed,
// signalled and reaped.

#![cfg(unix)]

use loman::app::control::{ActionOutcome, ControlPlane};
use loman::core::model::{RestartOutcome, StopOutcome, TileAction, TilePhase};
use loman::platform::config::load_config;
use loman::util::error::{ManagerError, SupervisorError};
use std::path::Path;
use std::time::{Duration, Instant};
use tempfile::TempDir;

// =============================================================================
// Helpers
// =============================================================================

/// Write a config for `count` tiles running `script` under /bin/sh.
fn plane_running(dir: &Path, count: usize, script: &str, extra: &str) -> ControlPlane {
    let config_path = dir.join("config.toml");
    let body = format!(
        r#"[tiles]
identifier = "Disc0oasis"
count = {count}
install_dir = "."
executable = "/bin/sh"
args = ["-c", "{script}"]

[supervisor]
restart_delay_secs = 1
{timeout}{extra}
"#,
        timeout = if extra.contains("stop_timeout_secs") {
            ""
        } else {
            "stop_timeout_secs = 10\n"
        },
    );
    std::fs::write(&config_path, body).unwrap();
    let (config, _warnings) = load_config(&config_path).unwrap();
    ControlPlane::from_config(config)
}

fn wait_for(plane: &ControlPlane, id: &str, want: TilePhase) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let phase = plane.status(id).unwrap().phase;
        if phase == want {
            return;
        }
        assert!(Instant::now() < deadline, "{id} stuck in {phase}, wanted {want}");
        std::thread::sleep(Duration::from_millis(20));
    }
}

// =============================================================================
// Lifecycle E2E
// =============================================================================

/// A started tile runs a real process that a stop request ends.
#[test]
fn e2e_start_then_stop_real_process() {
    let dir = TempDir::new().unwrap();
    let plane = plane_running(dir.path(), 2, "exec sleep 30", "");

    assert!(matches!(
        plane.perform("Disc0oasis1", TileAction::Start).unwrap(),
        ActionOutcome::Started
    ));
    wait_for(&plane, "Disc0oasis1", TilePhase::Running);

    let status = plane.status("Disc0oasis1").unwrap();
    assert!(status.pid.is_some());
    assert_eq!(plane.status("Disc0oasis0").unwrap().phase, TilePhase::Stopped);

    let ActionOutcome::Stopping(completion) =
        plane.perform("Disc0oasis1", TileAction::Stop).unwrap()
    else {
        panic!("expected a stop completion");
    };
    assert_eq!(
        completion.wait_timeout(Duration::from_secs(10)),
        Some(StopOutcome::Exited)
    );
    assert_eq!(plane.status("Disc0oasis1").unwrap().phase, TilePhase::Stopped);
    assert!(plane.status("Disc0oasis1").unwrap().pid.is_none());
}

/// A stop is a request the server can act on: its TERM handler runs and the
/// tile ends Stopped with a clean exit.
#[test]
fn e2e_stop_lets_server_shut_down_cleanly() {
    let dir = TempDir::new().unwrap();
    let plane = plane_running(
        dir.path(),
        1,
        "trap 'echo saved > graceful; exit 0' TERM; touch ready; while true; do sleep 0.05; done",
        "",
    );
    plane.perform("Disc0oasis0", TileAction::Start).unwrap();
    wait_for(&plane, "Disc0oasis0", TilePhase::Running);
    let deadline = Instant::now() + Duration::from_secs(10);
    while !dir.path().join("ready").exists() {
        assert!(Instant::now() < deadline, "server never became ready");
        std::thread::sleep(Duration::from_millis(20));
    }

    let ActionOutcome::Stopping(completion) =
        plane.perform("Disc0oasis0", TileAction::Stop).unwrap()
    else {
        panic!("expected a stop completion");
    };
    assert_eq!(
        completion.wait_timeout(Duration::from_secs(10)),
        Some(StopOutcome::Exited)
    );
    assert_eq!(
        std::fs::read_to_string(dir.path().join("graceful")).unwrap().trim(),
        "saved"
    );
    let status = plane.status("Disc0oasis0").unwrap();
    assert_eq!(status.phase, TilePhase::Stopped);
    assert!(status.last_error.is_none());
}

/// A server that ignores the stop request is not killed; the tile goes to
/// Error once the stop timeout passes.
#[test]
fn e2e_ignored_stop_times_out_into_error() {
    let dir = TempDir::new().unwrap();
    let plane = plane_running(
        dir.path(),
        1,
        "trap '' TERM; touch ready; sleep 4",
        "stop_timeout_secs = 1",
    );
    plane.perform("Disc0oasis0", TileAction::Start).unwrap();
    wait_for(&plane, "Disc0oasis0", TilePhase::Running);
    let deadline = Instant::now() + Duration::from_secs(10);
    while !dir.path().join("ready").exists() {
        assert!(Instant::now() < deadline, "server never became ready");
        std::thread::sleep(Duration::from_millis(20));
    }

    let ActionOutcome::Stopping(completion) =
        plane.perform("Disc0oasis0", TileAction::Stop).unwrap()
    else {
        panic!("expected a stop completion");
    };
    assert_eq!(
        completion.wait_timeout(Duration::from_secs(10)),
        Some(StopOutcome::TimedOut)
    );
    let status = plane.status("Disc0oasis0").unwrap();
    assert_eq!(status.phase, TilePhase::Error);
    assert!(status.last_error.unwrap().contains("did not exit"));
}

/// Commands against the wrong tile or the wrong phase are rejected.
#[test]
fn e2e_rejects_conflicting_commands() {
    let dir = TempDir::new().unwrap();
    let plane = plane_running(dir.path(), 1, "exec sleep 30", "");

    assert!(matches!(
        plane.perform("Disc0oasis0", TileAction::Stop),
        Err(ManagerError::Supervisor(SupervisorError::NotRunning { .. }))
    ));
    plane.perform("Disc0oasis0", TileAction::Start).unwrap();
    assert!(matches!(
        plane.perform("Disc0oasis0", TileAction::Start),
        Err(ManagerError::Supervisor(SupervisorError::AlreadyRunning { .. }))
    ));
    assert!(matches!(
        plane.perform("Disc0oasis1", TileAction::Start),
        Err(ManagerError::Supervisor(SupervisorError::InvalidTile { .. }))
    ));
    plane.shutdown();
}

/// Restart spawns a new process no sooner than the settle delay.
#[test]
fn e2e_restart_relaunches_after_delay() {
    let dir = TempDir::new().unwrap();
    let plane = plane_running(dir.path(), 1, "exec sleep 30", "");
    plane.perform("Disc0oasis0", TileAction::Start).unwrap();
    wait_for(&plane, "Disc0oasis0", TilePhase::Running);
    let first_pid = plane.status("Disc0oasis0").unwrap().pid;

    let requested = Instant::now();
    assert!(matches!(
        plane.perform("Disc0oasis0", TileAction::Restart).unwrap(),
        ActionOutcome::Restart(RestartOutcome::Restarting)
    ));
    assert_ne!(plane.status("Disc0oasis0").unwrap().phase, TilePhase::Running);

    wait_for(&plane, "Disc0oasis0", TilePhase::Running);
    assert!(requested.elapsed() >= Duration::from_secs(1));
    assert_ne!(plane.status("Disc0oasis0").unwrap().pid, first_pid);
    plane.shutdown();
}

/// restart_all restarts running tiles and schedules a start for stopped ones.
#[test]
fn e2e_restart_all_mixed_phases() {
    let dir = TempDir::new().unwrap();
    let plane = plane_running(dir.path(), 3, "exec sleep 30", "");
    for id in ["Disc0oasis0", "Disc0oasis2"] {
        plane.perform(id, TileAction::Start).unwrap();
        wait_for(&plane, id, TilePhase::Running);
    }

    let report = plane.restart_all();
    assert!(report.is_clean());
    assert!(matches!(
        report.get(1).unwrap().result,
        Ok(RestartOutcome::StartScheduled)
    ));
    assert!(matches!(
        report.get(0).unwrap().result,
        Ok(RestartOutcome::Restarting)
    ));

    for id in ["Disc0oasis0", "Disc0oasis1", "Disc0oasis2"] {
        wait_for(&plane, id, TilePhase::Running);
    }
    plane.shutdown();
    for status in plane.list_status() {
        assert_eq!(status.phase, TilePhase::Stopped);
    }
}

// =============================================================================
// Failure E2E
// =============================================================================

/// A server that exits on its own leaves the tile Stopped with the reason.
#[test]
fn e2e_unexpected_exit_is_reported() {
    let dir = TempDir::new().unwrap();
    let plane = plane_running(dir.path(), 1, "exit 3", "");
    plane.perform("Disc0oasis0", TileAction::Start).unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = plane.status("Disc0oasis0").unwrap();
        if let Some(err) = status.last_error {
            assert!(err.contains("exit code 3"), "{err}");
            assert_eq!(status.phase, TilePhase::Stopped);
            break;
        }
        assert!(Instant::now() < deadline, "exit never observed");
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// A crashing server is relaunched when restart_on_crash is enabled.
#[test]
fn e2e_crash_relaunch() {
    let dir = TempDir::new().unwrap();
    let plane = plane_running(
        dir.path(),
        1,
        "sleep 1; exit 1",
        "restart_on_crash = true\ncrash_restart_delay_secs = 0",
    );
    plane.perform("Disc0oasis0", TileAction::Start).unwrap();
    wait_for(&plane, "Disc0oasis0", TilePhase::Running);
    let first_pid = plane.status("Disc0oasis0").unwrap().pid;

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = plane.status("Disc0oasis0").unwrap();
        if status.phase == TilePhase::Running && status.pid != first_pid {
            break;
        }
        assert!(Instant::now() < deadline, "tile was not relaunched");
        std::thread::sleep(Duration::from_millis(20));
    }
    plane.shutdown();
}

/// A missing executable puts the tile in Error until acknowledged.
#[test]
fn e2e_launch_failure_needs_acknowledgement() {
    let dir = TempDir::new().unwrap();
    let config_path = dir.path().join("config.toml");
    std::fs::write(
        &config_path,
        "[tiles]\nidentifier = \"T\"\ncount = 1\ninstall_dir = \".\"\nexecutable = \"missing/server\"\n",
    )
    .unwrap();
    let (config, _) = load_config(&config_path).unwrap();
    let plane = ControlPlane::from_config(config);

    plane.perform("T0", TileAction::Start).unwrap();
    wait_for(&plane, "T0", TilePhase::Error);
    assert!(plane
        .status("T0")
        .unwrap()
        .last_error
        .unwrap()
        .contains("launch failed"));

    assert!(plane.perform("T0", TileAction::Start).is_err());
    assert!(plane.acknowledge("T0").unwrap());
    assert_eq!(plane.status("T0").unwrap().phase, TilePhase::Stopped);
}
