// LOMan - platform/fs.rs
//
// Filesystem helpers shared by the broadcaster and the log views:
// atomic channel writes, newest-log lookup, bounded reads from a file's end.

use chrono::{DateTime, Utc};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

/// Write `contents` to `path` atomically (write temp, rename).
///
/// Creates all parent directories as needed. A reader polling `path` sees
/// either the previous contents or the new contents, never a partial file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp);
        e
    })
}

/// Newest `*{needle}*.log` file directly inside `dir`, by modification time.
///
/// A match followed by another digit is rejected, so `Tile1` never picks up
/// `Tile12.log`. Returns `None` when the directory is missing or nothing
/// matches. Glob metacharacters in `dir` and `needle` are escaped.
pub fn newest_matching_log(dir: &Path, needle: &str) -> Option<PathBuf> {
    let dir = glob::Pattern::escape(&dir.to_string_lossy());
    let pattern = Path::new(&dir).join(format!("*{}*.log", glob::Pattern::escape(needle)));
    let pattern = pattern.to_string_lossy();

    let paths = match glob::glob(&pattern) {
        Ok(paths) => paths,
        Err(e) => {
            tracing::warn!(pattern = %pattern, error = %e, "Invalid log glob pattern");
            return None;
        }
    };

    paths
        .flatten()
        .filter(|p| p.is_file())
        .filter(|p| names_exactly(p, needle))
        .filter_map(|p| {
            let mtime = std::fs::metadata(&p).and_then(|m| m.modified()).ok()?;
            Some((mtime, p))
        })
        .max_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)))
        .map(|(_, p)| p)
}

fn names_exactly(path: &Path, needle: &str) -> bool {
    let Some(name) = path.file_name().map(|n| n.to_string_lossy()) else {
        return false;
    };
    name.match_indices(needle).any(|(at, _)| {
        !name[at + needle.len()..]
            .starts_with(|c: char| c.is_ascii_digit())
    })
}

/// Last-modified time of `path` in UTC, if readable.
pub fn modified_utc(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Return the last `max_lines` lines of `path`.
///
/// At most `max_scan_bytes` are read from the end of the file, so very large
/// logs stay cheap. When the scan starts mid-file the first (partial) line is
/// discarded. Invalid UTF-8 is replaced.
pub fn read_last_lines(path: &Path, max_lines: usize, max_scan_bytes: u64) -> io::Result<Vec<String>> {
    let mut file = std::fs::File::open(path)?;
    let len = file.metadata()?.len();
    let start = len.saturating_sub(max_scan_bytes);

    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;

    let text = String::from_utf8_lossy(&buf);
    let mut lines: Vec<&str> = text.lines().collect();
    if start > 0 && !lines.is_empty() {
        lines.remove(0);
    }

    let skip = lines.len().saturating_sub(max_lines);
    Ok(lines[skip..].iter().map(|l| (*l).to_string()).collect())
}
