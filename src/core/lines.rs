// LOMan - core/lines.rs
//
// Reassembles complete text lines from live-tail chunks. Chunk boundaries
// fall wherever a poll happened to read up to, so a line (or a multi-byte
// UTF-8 character) may be split across updates. Bytes after the last
// newline of a file are carried until the rest of the line arrives.
// Core layer: pure logic, no I/O.

use crate::core::model::TailUpdate;
use crate::util::constants::MAX_CARRIED_LINE_BYTES;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Default)]
struct Carry {
    /// Offset the next update for this file is expected to start at.
    next_offset: u64,
    bytes: Vec<u8>,
}

/// Per-file line reassembly for followed logs.
#[derive(Debug, Default)]
pub struct LineAssembler {
    carries: HashMap<PathBuf, Carry>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one update and return the lines it completes, without their
    /// terminators.
    ///
    /// An update that does not continue where the previous one ended
    /// (truncation, a skipped range) discards the carried partial line.
    pub fn push(&mut self, update: &TailUpdate) -> Vec<String> {
        let carry = self.carries.entry(update.path.clone()).or_default();
        if update.offset != carry.next_offset {
            carry.bytes.clear();
        }
        carry.next_offset = update.offset + update.bytes.len() as u64;
        carry.bytes.extend_from_slice(&update.bytes);

        let mut lines = Vec::new();
        if let Some(last_newline) = carry.bytes.iter().rposition(|&b| b == b'\n') {
            let rest = carry.bytes.split_off(last_newline + 1);
            let complete = std::mem::replace(&mut carry.bytes, rest);
            lines.extend(
                complete[..complete.len() - 1]
                    .split(|&b| b == b'\n')
                    .map(decode_line),
            );
        }

        if carry.bytes.len() > MAX_CARRIED_LINE_BYTES {
            // Cut at a character boundary; an incomplete trailing sequence
            // stays carried.
            let cut = match std::str::from_utf8(&carry.bytes) {
                Ok(_) => carry.bytes.len(),
                Err(e) if e.error_len().is_none() => e.valid_up_to(),
                Err(_) => carry.bytes.len(),
            };
            let rest = carry.bytes.split_off(cut);
            let head = std::mem::replace(&mut carry.bytes, rest);
            lines.push(decode_line(&head));
        }
        lines
    }

    /// Emit whatever is carried for `path` as a final line and forget it.
    pub fn flush(&mut self, path: &Path) -> Option<String> {
        let carry = self.carries.remove(path)?;
        (!carry.bytes.is_empty()).then(|| decode_line(&carry.bytes))
    }

    /// Bytes held back for `path`.
    pub fn carried(&self, path: &Path) -> usize {
        self.carries.get(path).map_or(0, |c| c.bytes.len())
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}
