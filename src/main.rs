// LOMan - main.rs
//
// Application entry point. Handles:
// 1. CLI argument parsing
// 2. Config loading and validation
// 3. Logging initialisation (debug mode support)
// 4. Control plane wiring and the interactive console loop

use loman::app::console::{self, ConsoleCommand, Flow};
use loman::app::control::ControlPlane;
use loman::core::lines::LineAssembler;
use loman::platform::config;
use loman::util::{self, constants};

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// LOMan - supervisor and admin console for a fleet of game server tiles.
///
/// Starts, stops and restarts each tile's server process, sends timed
/// in-game notices through the admin channel, and tails server logs.
#[derive(Parser, Debug)]
#[command(name = "loman", version, about)]
struct Cli {
    /// Path to config.toml (default: ./config.toml, then the platform config dir).
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Enable debug logging (equivalent to RUST_LOG=debug).
    #[arg(short = 'd', long = "debug")]
    debug: bool,

    /// Start every tile right after loading.
    #[arg(long = "start-all")]
    start_all: bool,
}

/// How often followed-log output is flushed to the terminal.
const FOLLOW_PRINT_INTERVAL: Duration = Duration::from_millis(200);

fn main() {
    let cli = Cli::parse();

    let config_path = config::resolve_config_path(cli.config.as_deref());
    let loaded = config::load_config(&config_path);

    // Logging needs the config's level and file, so it comes up after the
    // load; load failures are reported once the subscriber exists.
    match &loaded {
        Ok((cfg, _)) => util::logging::init(cli.debug, cfg.log_level.as_deref(), cfg.log_file.as_deref()),
        Err(_) => util::logging::init(cli.debug, None, None),
    }

    tracing::info!(
        version = constants::APP_VERSION,
        debug = cli.debug,
        config = %config_path.display(),
        "{} starting",
        constants::APP_NAME
    );

    let (cfg, warnings) = match loaded {
        Ok(pair) => pair,
        Err(e) => {
            tracing::error!(error = %e, "Cannot load configuration");
            eprintln!("Error: {e}");
            eprintln!("See config.example.toml for the expected format.");
            std::process::exit(2);
        }
    };
    for warning in &warnings {
        tracing::warn!("{warning}");
    }

    let plane = Arc::new(ControlPlane::from_config(cfg));

    if cli.start_all {
        let report = plane.start_all();
        for failure in report.failures() {
            if let Err(ref e) = failure.result {
                tracing::warn!(server = %failure.server_id, error = %e, "Start failed");
            }
        }
    }

    let printing = Arc::new(AtomicBool::new(true));
    let printer = {
        let plane = Arc::clone(&plane);
        let printing = Arc::clone(&printing);
        std::thread::Builder::new()
            .name("loman-follow".to_string())
            .spawn(move || print_followed(&plane, &printing))
    };
    let printer = match printer {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot start follow printer; followed logs will not be shown");
            None
        }
    };

    if let Err(e) = run_console(&plane) {
        tracing::error!(error = %e, "Console I/O failed");
    }

    printing.store(false, Ordering::SeqCst);
    if let Some(handle) = printer {
        let _ = handle.join();
    }
    plane.shutdown();
    tracing::info!("{} exited", constants::APP_NAME);
}

fn run_console(plane: &ControlPlane) -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    writeln!(
        stdout,
        "{} v{} managing {} tile(s). Type 'help' for commands.",
        constants::APP_NAME,
        constants::APP_VERSION,
        plane.config().tile_count
    )?;

    let mut line = String::new();
    loop {
        write!(stdout, "loman> ")?;
        stdout.flush()?;

        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            // EOF
            writeln!(stdout)?;
            return Ok(());
        }

        match ConsoleCommand::parse(&line) {
            Ok(cmd) => {
                if console::execute(plane, cmd, &mut stdout)? == Flow::Quit {
                    return Ok(());
                }
            }
            Err(e) => writeln!(stdout, "{e}")?,
        }
    }
}

fn print_followed(plane: &ControlPlane, printing: &AtomicBool) {
    let mut assembler = LineAssembler::new();
    while printing.load(Ordering::SeqCst) {
        let updates = plane.poll_tail_updates(constants::MAX_TAIL_UPDATES_PER_DRAIN);
        if !updates.is_empty() {
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for update in &updates {
                let name = update
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                for line in assembler.push(update) {
                    let _ = writeln!(out, "[{name}] {line}");
                }
            }
            let _ = out.flush();
        }
        std::thread::sleep(FOLLOW_PRINT_INTERVAL);
    }
}
