// LOMan - core/worker.rs
//
// Seam between the supervisor and whatever actually runs a tile's server.
// The supervisor only needs to launch, poll for exit, and ask for shutdown;
// the production implementation lives in `platform::process`.

use std::io;
use std::path::PathBuf;

/// Everything a launcher needs to start one tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLaunch {
    pub tile_id: usize,
    pub server_id: String,
    /// Install directory of this tile (also the working directory).
    pub install_dir: PathBuf,
    pub program: PathBuf,
    /// Arguments with placeholders already substituted.
    pub args: Vec<String>,
}

/// How a server process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitSummary {
    pub success: bool,
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
}

impl std::fmt::Display for ExitSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "exit code {code}"),
            None => f.write_str("terminated by signal"),
        }
    }
}

/// A running server process owned by a tile worker.
pub trait TileProcess: Send {
    /// OS process id, if the backend has one.
    fn id(&self) -> Option<u32>;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> io::Result<Option<ExitSummary>>;

    /// Ask the process to shut down. Must not block on the exit itself.
    fn request_shutdown(&mut self) -> io::Result<()>;
}

/// Starts server processes for tiles.
pub trait TileLauncher: Send + Sync {
    fn launch(&self, launch: &TileLaunch) -> io::Result<Box<dyn TileProcess>>;
}

/// Values substituted into launch argument templates.
#[derive(Debug, Clone, Copy)]
pub struct LaunchVars<'a> {
    pub identifier: &'a str,
    pub server_id: &'a str,
    pub tile_id: usize,
    pub port: u32,
    pub query_port: u32,
}

/// Substitute `{server_id}`, `{tile_id}`, `{identifier}`, `{port}` and
/// `{query_port}` in every template. Unknown braces are left untouched.
pub fn expand_args(templates: &[String], vars: &LaunchVars<'_>) -> Vec<String> {
    templates
        .iter()
        .map(|t| {
            t.replace("{server_id}", vars.server_id)
                .replace("{tile_id}", &vars.tile_id.to_string())
                .replace("{identifier}", vars.identifier)
                .replace("{query_port}", &vars.query_port.to_string())
                .replace("{port}", &vars.port.to_string())
        })
        .collect()
}
