// LOMan - core/filter.rs
//
// Line filter for tail excerpts. All active criteria are AND-combined.
// Core layer: pure logic, no I/O.

use crate::util::error::TailError;
use regex::Regex;

/// Severity words recognised in server log lines, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LineLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LineLevel {
    /// Keyword searched for in a line.
    fn keyword(&self) -> &'static str {
        match self {
            LineLevel::Debug => "DEBUG",
            LineLevel::Info => "INFO",
            LineLevel::Warning => "WARNING",
            LineLevel::Error => "ERROR",
            LineLevel::Critical => "CRITICAL",
        }
    }

    fn all() -> &'static [LineLevel] {
        &[
            LineLevel::Critical,
            LineLevel::Error,
            LineLevel::Warning,
            LineLevel::Info,
            LineLevel::Debug,
        ]
    }

    /// Parse a level name (case-insensitive; `warn` accepted).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(LineLevel::Debug),
            "INFO" => Some(LineLevel::Info),
            "WARN" | "WARNING" => Some(LineLevel::Warning),
            "ERROR" => Some(LineLevel::Error),
            "CRITICAL" => Some(LineLevel::Critical),
            _ => None,
        }
    }

    /// Most severe level whose keyword appears in `line`.
    pub fn detect(line: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|level| line.contains(level.keyword()))
    }
}

/// Filter applied to tail excerpt lines.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    /// Case-insensitive substring. Empty = no filter.
    pub text: String,
    /// Lines must carry at least this level. `None` = all lines.
    pub min_level: Option<LineLevel>,
    /// Compiled regex. `None` = no regex filter.
    pub pattern: Option<Regex>,
}

impl LogFilter {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.min_level.is_none() && self.pattern.is_none()
    }

    /// Set the regex pattern, compiling it. An empty pattern clears it.
    pub fn set_pattern(&mut self, pattern: &str) -> Result<(), TailError> {
        if pattern.is_empty() {
            self.pattern = None;
            return Ok(());
        }
        let regex = Regex::new(pattern).map_err(|e| TailError::InvalidFilter {
            pattern: pattern.to_string(),
            source: e,
        })?;
        self.pattern = Some(regex);
        Ok(())
    }

    pub fn matches(&self, line: &str) -> bool {
        if !self.text.is_empty() && !line.to_lowercase().contains(&self.text.to_lowercase()) {
            return false;
        }

        // Lines without a level keyword never pass a level filter.
        if let Some(min) = self.min_level {
            match LineLevel::detect(line) {
                Some(level) if level >= min => {}
                _ => return false,
            }
        }

        if let Some(ref regex) = self.pattern {
            if !regex.is_match(line) {
                return false;
            }
        }

        true
    }

    /// Keep only matching lines, preserving order.
    pub fn apply(&self, lines: Vec<String>) -> Vec<String> {
        if self.is_empty() {
            return lines;
        }
        lines.into_iter().filter(|l| self.matches(l)).collect()
    }
}
