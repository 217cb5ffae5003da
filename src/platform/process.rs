// LOMan - platform/process.rs
//
// Production tile launcher backed by `std::process`.
//
// Stopping is a request, never a kill: SIGTERM on Unix, CTRL_BREAK to the
// server's own process group on Windows. A server that ignores it is left
// to the supervisor's stop timeout.

use crate::core::worker::{ExitSummary, TileLaunch, TileLauncher, TileProcess};
use std::io;
use std::process::{Child, Command, Stdio};

/// Launches each tile's server executable as a child process.
///
/// The working directory is the tile's install folder and all stdio is
/// discarded; servers write their own log files.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandLauncher;

impl TileLauncher for CommandLauncher {
    fn launch(&self, launch: &TileLaunch) -> io::Result<Box<dyn TileProcess>> {
        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .current_dir(&launch.install_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            // Own group, so CTRL_BREAK reaches the server and not us.
            command.creation_flags(windows_sys::Win32::System::Threading::CREATE_NEW_PROCESS_GROUP);
        }
        let child = command.spawn()?;

        tracing::debug!(
            tile = launch.tile_id,
            server = %launch.server_id,
            pid = child.id(),
            program = %launch.program.display(),
            "Server process spawned"
        );

        Ok(Box::new(ChildProcess { child }))
    }
}

/// A spawned server process.
#[derive(Debug)]
pub struct ChildProcess {
    child: Child,
}

impl TileProcess for ChildProcess {
    fn id(&self) -> Option<u32> {
        Some(self.child.id())
    }

    fn try_wait(&mut self) -> io::Result<Option<ExitSummary>> {
        Ok(self.child.try_wait()?.map(|status| ExitSummary {
            success: status.success(),
            code: status.code(),
        }))
    }

    fn request_shutdown(&mut self) -> io::Result<()> {
        // Once reaped the pid may belong to someone else.
        if self.child.try_wait()?.is_some() {
            return Ok(());
        }
        send_stop_request(self.child.id())
    }
}

#[cfg(unix)]
fn send_stop_request(pid: u32) -> io::Result<()> {
    let pid = libc::pid_t::try_from(pid)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        // Exited between the check and the signal.
        Some(libc::ESRCH) => Ok(()),
        _ => Err(err),
    }
}

#[cfg(windows)]
fn send_stop_request(pid: u32) -> io::Result<()> {
    use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_BREAK_EVENT};
    // SAFETY: plain integer arguments; the group id is the child's pid
    // because it was spawned with CREATE_NEW_PROCESS_GROUP.
    let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
    if ok == 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}
