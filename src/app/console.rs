// LOMan - app/console.rs
//
// Line-based operator console: parses one command per line and renders the
// control plane's answers as text.

use crate::app::broadcast::BroadcastReceipt;
use crate::app::control::{ActionOutcome, ControlPlane};
use crate::core::filter::{LineLevel, LogFilter};
use crate::core::model::{RestartOutcome, StopOutcome, TileAction, TileStatus};
use crate::util::constants::{DEFAULT_TAIL_LINES, MAX_TAIL_LINES, MIN_TAIL_LINES};
use crate::util::error::{ManagerError, TailError};
use chrono::Utc;
use std::fmt;
use std::io::{self, Write};

pub const HELP: &str = "\
Commands:
  status                         show every tile
  start <id> | stop <id>         start or stop one tile
  restart <id>                   notify players, stop, wait, start
  ack <id>                       clear an Error tile back to Stopped
  start-all | stop-all | restart-all
  say <message>                  broadcast to every tile
  say-to <id>[,<id>..] <message> broadcast to some tiles
  presets                        list quick messages
  say-preset <n> [<id>[,<id>..]] broadcast quick message n
  tail <id> [n] [level:<lvl>] [re:<regex>] [text]
                                 last n lines of the tile's newest log
  follow <id> | unfollow <id>    stream new log lines
  history | clear-history        recent broadcasts
  help | quit";

/// A parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Empty,
    Status,
    Action(TileAction, String),
    Ack(String),
    StartAll,
    StopAll,
    RestartAll,
    Say(String),
    SayTo { server_ids: Vec<String>, message: String },
    Presets,
    SayPreset { number: usize, server_ids: Vec<String> },
    Tail(TailRequest),
    Follow(String),
    Unfollow(String),
    History,
    ClearHistory,
    Help,
    Quit,
}

/// Arguments of a `tail` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailRequest {
    pub server_id: String,
    pub lines: usize,
    pub min_level: Option<LineLevel>,
    pub pattern: Option<String>,
    pub text: String,
}

impl TailRequest {
    /// Build the line filter; `None` when no criteria were given.
    pub fn filter(&self) -> Result<Option<LogFilter>, TailError> {
        let mut filter = LogFilter {
            text: self.text.clone(),
            min_level: self.min_level,
            pattern: None,
        };
        if let Some(ref pattern) = self.pattern {
            filter.set_pattern(pattern)?;
        }
        Ok((!filter.is_empty()).then_some(filter))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Unknown(String),
    Usage(&'static str),
    BadLineCount(String),
    BadLevel(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(cmd) => write!(f, "Unknown command '{cmd}'. Type 'help'."),
            Self::Usage(usage) => write!(f, "Usage: {usage}"),
            Self::BadLineCount(n) => write!(
                f,
                "'{n}' is not a line count ({MIN_TAIL_LINES}-{MAX_TAIL_LINES})"
            ),
            Self::BadLevel(l) => write!(
                f,
                "Unknown level '{l}'. Expected DEBUG, INFO, WARNING, ERROR or CRITICAL"
            ),
        }
    }
}

impl std::error::Error for ParseError {}

fn one_id(rest: &str, usage: &'static str) -> Result<String, ParseError> {
    let mut words = rest.split_whitespace();
    match (words.next(), words.next()) {
        (Some(id), None) => Ok(id.to_string()),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn id_list(ids: &str) -> Vec<String> {
    ids.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn non_empty(rest: &str, usage: &'static str) -> Result<String, ParseError> {
    if rest.is_empty() {
        Err(ParseError::Usage(usage))
    } else {
        Ok(rest.to_string())
    }
}

impl ConsoleCommand {
    pub fn parse(line: &str) -> Result<Self, ParseError> {
        let line = line.trim();
        let (verb, rest) = match line.split_once(char::is_whitespace) {
            Some((verb, rest)) => (verb, rest.trim()),
            None => (line, ""),
        };

        let cmd = match verb.to_ascii_lowercase().as_str() {
            "" => Self::Empty,
            "status" | "ls" => Self::Status,
            "start" => Self::Action(TileAction::Start, one_id(rest, "start <id>")?),
            "stop" => Self::Action(TileAction::Stop, one_id(rest, "stop <id>")?),
            "restart" => Self::Action(TileAction::Restart, one_id(rest, "restart <id>")?),
            "ack" => Self::Ack(one_id(rest, "ack <id>")?),
            "start-all" => Self::StartAll,
            "stop-all" => Self::StopAll,
            "restart-all" => Self::RestartAll,
            "say" => Self::Say(non_empty(rest, "say <message>")?),
            "say-to" => {
                const USAGE: &str = "say-to <id>[,<id>..] <message>";
                let (ids, message) = rest.split_once(char::is_whitespace).ok_or(ParseError::Usage(USAGE))?;
                let server_ids = id_list(ids);
                if server_ids.is_empty() {
                    return Err(ParseError::Usage(USAGE));
                }
                Self::SayTo {
                    server_ids,
                    message: non_empty(message.trim(), USAGE)?,
                }
            }
            "presets" => Self::Presets,
            "say-preset" => {
                const USAGE: &str = "say-preset <n> [<id>[,<id>..]]";
                let mut words = rest.split_whitespace();
                let number = words
                    .next()
                    .and_then(|n| n.parse().ok())
                    .ok_or(ParseError::Usage(USAGE))?;
                let server_ids = words.next().map(id_list).unwrap_or_default();
                if words.next().is_some() {
                    return Err(ParseError::Usage(USAGE));
                }
                Self::SayPreset { number, server_ids }
            }
            "tail" => Self::Tail(parse_tail(rest)?),
            "follow" => Self::Follow(one_id(rest, "follow <id>")?),
            "unfollow" => Self::Unfollow(one_id(rest, "unfollow <id>")?),
            "history" => Self::History,
            "clear-history" => Self::ClearHistory,
            "help" | "?" => Self::Help,
            "quit" | "exit" => Self::Quit,
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }
}

fn parse_tail(rest: &str) -> Result<TailRequest, ParseError> {
    const USAGE: &str = "tail <id> [n] [level:<lvl>] [re:<regex>] [text]";
    let mut words = rest.split_whitespace().peekable();
    let server_id = words.next().ok_or(ParseError::Usage(USAGE))?.to_string();

    let mut lines = DEFAULT_TAIL_LINES;
    if let Some(word) = words.peek() {
        if word.bytes().all(|b| b.is_ascii_digit()) {
            lines = word
                .parse()
                .map_err(|_| ParseError::BadLineCount(word.to_string()))?;
            if !(MIN_TAIL_LINES..=MAX_TAIL_LINES).contains(&lines) {
                return Err(ParseError::BadLineCount(word.to_string()));
            }
            words.next();
        }
    }

    let mut request = TailRequest {
        server_id,
        lines,
        min_level: None,
        pattern: None,
        text: String::new(),
    };
    let mut text = Vec::new();
    for word in words {
        if let Some(level) = word.strip_prefix("level:") {
            request.min_level =
                Some(LineLevel::parse(level).ok_or_else(|| ParseError::BadLevel(level.to_string()))?);
        } else if let Some(pattern) = word.strip_prefix("re:") {
            request.pattern = Some(pattern.to_string());
        } else {
            text.push(word);
        }
    }
    request.text = text.join(" ");
    Ok(request)
}

// =============================================================================
// Execution
// =============================================================================

/// Whether the console should keep reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

fn format_uptime(status: &TileStatus) -> String {
    match status.uptime(Utc::now()) {
        Some(d) => {
            let secs = d.num_seconds().max(0);
            format!("{}h{:02}m{:02}s", secs / 3600, (secs / 60) % 60, secs % 60)
        }
        None => "-".to_string(),
    }
}

pub fn write_status(out: &mut impl Write, statuses: &[TileStatus]) -> io::Result<()> {
    writeln!(
        out,
        "{:<16} {:<24} {:<9} {:>7} {:>10}  NOTE",
        "SERVER", "NAME", "PHASE", "PID", "UPTIME"
    )?;
    for s in statuses {
        let pid = s.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
        let mut note = s.last_error.clone().unwrap_or_default();
        if s.restart_pending {
            if !note.is_empty() {
                note.push_str("; ");
            }
            note.push_str("start pending");
        }
        writeln!(
            out,
            "{:<16} {:<24} {:<9} {:>7} {:>10}  {}",
            s.server_id,
            s.display_name,
            s.phase.label(),
            pid,
            format_uptime(s),
            note
        )?;
    }
    Ok(())
}

/// Run one command against the control plane, writing the answer to `out`.
///
/// Command failures are reported on `out`; only write errors are returned.
pub fn execute(plane: &ControlPlane, cmd: ConsoleCommand, out: &mut impl Write) -> io::Result<Flow> {
    match cmd {
        ConsoleCommand::Empty => {}
        ConsoleCommand::Status => write_status(out, &plane.list_status())?,
        ConsoleCommand::Action(action, id) => match plane.perform(&id, action) {
            Ok(ActionOutcome::Started) => writeln!(out, "{id}: starting")?,
            Ok(ActionOutcome::Stopping(completion)) => match completion.try_outcome() {
                Some(StopOutcome::TimedOut) => writeln!(out, "{id}: stop timed out")?,
                _ => writeln!(out, "{id}: stopping")?,
            },
            Ok(ActionOutcome::Restart(RestartOutcome::Restarting)) => writeln!(
                out,
                "{id}: restarting in {}s",
                plane.config().restart_delay.as_secs()
            )?,
            Ok(ActionOutcome::Restart(RestartOutcome::StartScheduled)) => writeln!(
                out,
                "{id}: was stopped, starting in {}s",
                plane.config().restart_delay.as_secs()
            )?,
            Err(e) => writeln!(out, "Error: {e}")?,
        },
        ConsoleCommand::Ack(id) => match plane.acknowledge(&id) {
            Ok(true) => writeln!(out, "{id}: acknowledged")?,
            Ok(false) => writeln!(out, "{id}: not in Error")?,
            Err(e) => writeln!(out, "Error: {e}")?,
        },
        ConsoleCommand::StartAll => {
            let report = plane.start_all();
            for o in &report.outcomes {
                match &o.result {
                    Ok(()) => writeln!(out, "{}: starting", o.server_id)?,
                    Err(e) => writeln!(out, "{}: {e}", o.server_id)?,
                }
            }
        }
        ConsoleCommand::StopAll => {
            let report = plane.stop_all();
            for o in &report.outcomes {
                match &o.result {
                    Ok(_) => writeln!(out, "{}: stopping", o.server_id)?,
                    Err(e) => writeln!(out, "{}: {e}", o.server_id)?,
                }
            }
        }
        ConsoleCommand::RestartAll => {
            let report = plane.restart_all();
            for o in &report.outcomes {
                match &o.result {
                    Ok(RestartOutcome::Restarting) => writeln!(out, "{}: restarting", o.server_id)?,
                    Ok(RestartOutcome::StartScheduled) => {
                        writeln!(out, "{}: was stopped, start scheduled", o.server_id)?
                    }
                    Err(e) => writeln!(out, "{}: {e}", o.server_id)?,
                }
            }
        }
        ConsoleCommand::Say(message) => write_broadcast(out, plane, plane.broadcast(&message, &[]))?,
        ConsoleCommand::SayTo {
            server_ids,
            message,
        } => write_broadcast(out, plane, plane.broadcast(&message, &server_ids))?,
        ConsoleCommand::Presets => {
            for (i, message) in plane.config().presets.iter().enumerate() {
                writeln!(out, "{:>3}. {message}", i + 1)?;
            }
        }
        ConsoleCommand::SayPreset { number, server_ids } => {
            write_broadcast(out, plane, plane.broadcast_preset(number, &server_ids))?
        }
        ConsoleCommand::Tail(request) => {
            let filter = match request.filter() {
                Ok(f) => f,
                Err(e) => {
                    writeln!(out, "Error: {e}")?;
                    return Ok(Flow::Continue);
                }
            };
            match plane.tail(&request.server_id, request.lines, filter.as_ref()) {
                Ok(excerpt) => {
                    writeln!(out, "== {} ==", excerpt.path.display())?;
                    for line in &excerpt.lines {
                        writeln!(out, "{line}")?;
                    }
                }
                Err(e) => writeln!(out, "Error: {e}")?,
            }
        }
        ConsoleCommand::Follow(id) => match plane.follow(&id) {
            Ok(path) => writeln!(out, "{id}: following {}", path.display())?,
            Err(e) => writeln!(out, "Error: {e}")?,
        },
        ConsoleCommand::Unfollow(id) => match plane.unfollow(&id) {
            Ok(true) => writeln!(out, "{id}: no longer followed")?,
            Ok(false) => writeln!(out, "{id}: was not followed")?,
            Err(e) => writeln!(out, "Error: {e}")?,
        },
        ConsoleCommand::History => {
            for record in plane.broadcast_history() {
                writeln!(
                    out,
                    "{}  {:?}  delivered {:?} failed {:?}",
                    record.sent_at.format("%Y-%m-%d %H:%M:%S"),
                    record.message,
                    record.delivered,
                    record.failed
                )?;
            }
        }
        ConsoleCommand::ClearHistory => {
            let dropped = plane.clear_broadcast_history();
            writeln!(out, "Cleared {dropped} broadcast(s) from history")?
        }
        ConsoleCommand::Help => writeln!(out, "{HELP}")?,
        ConsoleCommand::Quit => return Ok(Flow::Quit),
    }
    Ok(Flow::Continue)
}

fn write_broadcast(
    out: &mut impl Write,
    plane: &ControlPlane,
    sent: Result<Vec<BroadcastReceipt>, ManagerError>,
) -> io::Result<()> {
    match sent {
        Ok(receipts) => {
            for r in receipts {
                let id = plane.config().server_id(r.tile_id);
                match r.result {
                    Ok(()) => writeln!(out, "{id}: sent")?,
                    Err(e) => writeln!(out, "{id}: {e}")?,
                }
            }
        }
        Err(e) => writeln!(out, "Error: {e}")?,
    }
    Ok(())
}
