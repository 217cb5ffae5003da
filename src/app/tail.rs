// LOMan - app/tail.rs
//
// Live tail: watches server log files for bytes appended after registration
// and streams them to the console.
//
// Architecture:
//   - `PollingTailSource` owns the path -> offset map and performs one poll
//     pass per call. It sits behind the `TailSource` trait so an event-driven
//     backend can replace it without touching callers.
//   - `LogTailWatcher` drives a source on a background thread at a fixed
//     interval. The source is guarded by a mutex so `watch`/`unwatch` from
//     the control plane are safe against the poll loop.
//   - An `Arc<AtomicBool>` run flag stops the loop cooperatively; the loop
//     sleeps in small slices so the flag is seen promptly.
//   - Updates go over an mpsc channel; consumers drain them with
//     `poll_updates`.
//
// Per-file errors are non-fatal: a missing file is skipped until it appears,
// a read error is logged and retried on the next tick. A file that shrinks
// below its offset was truncated or rotated and is re-read from 0.

use crate::core::model::TailUpdate;
use crate::util::constants::{MAX_TAIL_READ_BYTES_PER_TICK, TAIL_CANCEL_CHECK_INTERVAL_MS};
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

// =============================================================================
// TailSource
// =============================================================================

/// Offset-tracking file source polled by `LogTailWatcher`.
pub trait TailSource: Send {
    /// Start watching `path` from its current end. Re-watching keeps the
    /// existing offset.
    fn watch(&mut self, path: PathBuf);

    /// Start watching `path` from byte 0.
    fn watch_from_start(&mut self, path: PathBuf);

    /// Stop watching `path`. Returns `false` if it was not watched.
    fn unwatch(&mut self, path: &Path) -> bool;

    /// One pass over every watched file, returning new content.
    fn poll(&mut self) -> Vec<TailUpdate>;

    /// Currently watched paths.
    fn watched(&self) -> Vec<PathBuf>;
}

struct FileState {
    /// Bytes already delivered. Advances by exactly the number of bytes read.
    offset: u64,
    exists: bool,
}

/// Default `TailSource`: stats each file on every poll.
#[derive(Default)]
pub struct PollingTailSource {
    files: BTreeMap<PathBuf, FileState>,
}

impl PollingTailSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracked offset of `path`, if watched.
    pub fn offset(&self, path: &Path) -> Option<u64> {
        self.files.get(path).map(|s| s.offset)
    }

    fn insert(&mut self, path: PathBuf, offset: u64, exists: bool) {
        tracing::debug!(file = %path.display(), offset, "Tail: watching file");
        self.files.insert(path, FileState { offset, exists });
    }
}

impl TailSource for PollingTailSource {
    fn watch(&mut self, path: PathBuf) {
        if self.files.contains_key(&path) {
            return;
        }
        // Seed to the current end so only content written after
        // registration is delivered.
        let (offset, exists) = match std::fs::metadata(&path) {
            Ok(m) => (m.len(), true),
            Err(_) => (0, false),
        };
        self.insert(path, offset, exists);
    }

    fn watch_from_start(&mut self, path: PathBuf) {
        let exists = path.is_file();
        self.insert(path, 0, exists);
    }

    fn unwatch(&mut self, path: &Path) -> bool {
        let removed = self.files.remove(path).is_some();
        if removed {
            tracing::debug!(file = %path.display(), "Tail: unwatched file");
        }
        removed
    }

    fn poll(&mut self) -> Vec<TailUpdate> {
        let mut updates = Vec::new();

        for (path, state) in self.files.iter_mut() {
            let current_size = match std::fs::metadata(path) {
                Ok(m) => m.len(),
                Err(_) => {
                    if state.exists {
                        tracing::debug!(file = %path.display(), "Tail: file missing, skipping");
                        state.exists = false;
                    }
                    continue;
                }
            };
            state.exists = true;

            if current_size < state.offset {
                tracing::info!(
                    file = %path.display(),
                    old_offset = state.offset,
                    new_size = current_size,
                    "Tail: file truncated or rotated, resetting offset to 0"
                );
                state.offset = 0;
            }

            if current_size == state.offset {
                continue;
            }

            let available = (current_size - state.offset) as usize;
            let limit = available.min(MAX_TAIL_READ_BYTES_PER_TICK);

            let bytes = match read_bytes_at(path, state.offset, limit) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(file = %path.display(), error = %e, "Tail: read error");
                    continue;
                }
            };
            if bytes.is_empty() {
                continue;
            }

            let offset = state.offset;
            state.offset += bytes.len() as u64;
            updates.push(TailUpdate {
                path: path.clone(),
                offset,
                bytes,
            });
        }

        updates
    }

    fn watched(&self) -> Vec<PathBuf> {
        self.files.keys().cloned().collect()
    }
}

/// Read up to `limit` bytes from `path` starting at byte position `offset`.
///
/// Returns fewer bytes than `limit` if the file ends before `limit` is reached.
fn read_bytes_at(path: &Path, offset: u64, limit: usize) -> std::io::Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    file.seek(SeekFrom::Start(offset))?;
    let mut buf = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}

// =============================================================================
// LogTailWatcher
// =============================================================================

#[derive(Default)]
struct LoopHandle {
    update_rx: Option<mpsc::Receiver<TailUpdate>>,
    running: Option<Arc<AtomicBool>>,
    thread: Option<JoinHandle<()>>,
}

/// Runs a `TailSource` on a background poll thread.
pub struct LogTailWatcher {
    source: Arc<Mutex<Box<dyn TailSource>>>,
    poll_interval: Duration,
    handle: Mutex<LoopHandle>,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Tail: lock poisoned, recovering");
        poisoned.into_inner()
    })
}

impl LogTailWatcher {
    pub fn new(source: Box<dyn TailSource>, poll_interval: Duration) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            poll_interval,
            handle: Mutex::new(LoopHandle::default()),
        }
    }

    /// Watcher over a fresh `PollingTailSource`.
    pub fn polling(poll_interval: Duration) -> Self {
        Self::new(Box::new(PollingTailSource::new()), poll_interval)
    }

    /// Start the poll thread. A running loop is stopped first.
    pub fn start(&self) -> std::io::Result<()> {
        self.stop();

        let (tx, rx) = mpsc::channel();
        let running = Arc::new(AtomicBool::new(true));
        let source = Arc::clone(&self.source);
        let interval = self.poll_interval;
        let flag = Arc::clone(&running);

        let thread = std::thread::Builder::new()
            .name("loman-tail".to_string())
            .spawn(move || run_tail_loop(source, tx, flag, interval))?;

        let mut handle = lock(&self.handle);
        handle.update_rx = Some(rx);
        handle.running = Some(running);
        handle.thread = Some(thread);

        tracing::info!(interval_ms = interval.as_millis() as u64, "Live tail started");
        Ok(())
    }

    /// Stop the poll thread and wait for it to exit.
    ///
    /// The thread sees the flag within `TAIL_CANCEL_CHECK_INTERVAL_MS`.
    pub fn stop(&self) {
        let (running, thread) = {
            let mut handle = lock(&self.handle);
            handle.update_rx = None;
            (handle.running.take(), handle.thread.take())
        };
        if let Some(flag) = running {
            flag.store(false, Ordering::SeqCst);
        }
        if let Some(thread) = thread {
            if thread.join().is_err() {
                tracing::error!("Tail: poll thread panicked");
            }
            tracing::info!("Live tail stopped");
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.handle).running.is_some()
    }

    pub fn watch(&self, path: PathBuf) {
        lock(&self.source).watch(path);
    }

    pub fn watch_from_start(&self, path: PathBuf) {
        lock(&self.source).watch_from_start(path);
    }

    pub fn unwatch(&self, path: &Path) -> bool {
        lock(&self.source).unwatch(path)
    }

    pub fn watched(&self) -> Vec<PathBuf> {
        lock(&self.source).watched()
    }

    /// Drain up to `max` queued updates without blocking.
    pub fn poll_updates(&self, max: usize) -> Vec<TailUpdate> {
        let handle = lock(&self.handle);
        let mut updates = Vec::new();
        if let Some(ref rx) = handle.update_rx {
            while updates.len() < max {
                match rx.try_recv() {
                    Ok(update) => updates.push(update),
                    Err(_) => break,
                }
            }
        }
        updates
    }
}

impl Drop for LogTailWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep for `interval`, waking every `TAIL_CANCEL_CHECK_INTERVAL_MS` to
/// check `running`. Returns `false` as soon as it is cleared.
fn sleep_while_running(interval: Duration, running: &AtomicBool) -> bool {
    let deadline = Instant::now() + interval;
    let slice = Duration::from_millis(TAIL_CANCEL_CHECK_INTERVAL_MS);
    loop {
        if !running.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(slice));
    }
}

/// Background poll loop. Polls the source every `interval` and forwards
/// updates over `tx` until `running` is cleared or the receiver is gone.
fn run_tail_loop(
    source: Arc<Mutex<Box<dyn TailSource>>>,
    tx: mpsc::Sender<TailUpdate>,
    running: Arc<AtomicBool>,
    interval: Duration,
) {
    loop {
        if !sleep_while_running(interval, &running) {
            return;
        }

        let updates = lock(&source).poll();
        for update in updates {
            tracing::trace!(
                file = %update.path.display(),
                offset = update.offset,
                bytes = update.bytes.len(),
                "Tail: new content"
            );
            if tx.send(update).is_err() {
                // Consumer gone.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn append(path: &Path, bytes: &[u8]) {
        let mut f = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(bytes).unwrap();
    }

    #[test]
    fn test_growth_delivered_once_in_order() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, b"").unwrap();

        let mut source = PollingTailSource::new();
        source.watch(path.clone());

        let first: Vec<u8> = (0..100u8).collect();
        let second: Vec<u8> = (100..250u8).collect();

        append(&path, &first);
        let u1 = source.poll();
        append(&path, &second);
        let u2 = source.poll();
        assert!(source.poll().is_empty());

        assert_eq!(u1.len(), 1);
        assert_eq!(u2.len(), 1);
        assert_eq!(u1[0].offset, 0);
        assert_eq!(u2[0].offset, 100);

        let mut all = u1[0].bytes.clone();
        all.extend_from_slice(&u2[0].bytes);
        let expected: Vec<u8> = (0..250u8).collect();
        assert_eq!(all, expected);
    }

    #[test]
    fn test_watch_skips_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, b"old line\n").unwrap();

        let mut source = PollingTailSource::new();
        source.watch(path.clone());
        assert_eq!(source.offset(&path), Some(9));
        assert!(source.poll().is_empty());

        append(&path, b"new line\n");
        let updates = source.poll();
        assert_eq!(updates[0].text(), "new line\n");
    }

    #[test]
    fn test_watch_from_start_delivers_existing_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, b"hello").unwrap();

        let mut source = PollingTailSource::new();
        source.watch_from_start(path.clone());
        assert_eq!(source.poll()[0].bytes, b"hello");
    }

    #[test]
    fn test_missing_file_is_skipped_then_picked_up() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("later.log");

        let mut source = PollingTailSource::new();
        source.watch(path.clone());
        assert_eq!(source.offset(&path), Some(0));
        assert!(source.poll().is_empty());

        std::fs::write(&path, b"appeared").unwrap();
        assert_eq!(source.poll()[0].bytes, b"appeared");
    }

    #[test]
    fn test_truncation_resets_offset() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, b"0123456789").unwrap();

        let mut source = PollingTailSource::new();
        source.watch(path.clone());
        std::fs::write(&path, b"abc").unwrap();

        let updates = source.poll();
        assert_eq!(updates[0].offset, 0);
        assert_eq!(updates[0].bytes, b"abc");
        assert_eq!(source.offset(&path), Some(3));
    }

    #[test]
    fn test_large_backlog_is_spread_over_ticks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.log");
        let total = MAX_TAIL_READ_BYTES_PER_TICK + 10;
        std::fs::write(&path, vec![b'x'; total]).unwrap();

        let mut source = PollingTailSource::new();
        source.watch_from_start(path.clone());
        assert_eq!(source.poll()[0].bytes.len(), MAX_TAIL_READ_BYTES_PER_TICK);
        let rest = source.poll();
        assert_eq!(rest[0].bytes.len(), 10);
        assert_eq!(rest[0].offset, MAX_TAIL_READ_BYTES_PER_TICK as u64);
    }

    #[test]
    fn test_unwatch_stops_delivery() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, b"").unwrap();

        let mut source = PollingTailSource::new();
        source.watch(path.clone());
        assert!(source.unwatch(&path));
        assert!(!source.unwatch(&path));

        append(&path, b"ignored");
        assert!(source.poll().is_empty());
        assert!(source.watched().is_empty());
    }

    #[test]
    fn test_interval_is_not_rounded_down_to_whole_checks() {
        let running = AtomicBool::new(true);
        for ms in [150, 250] {
            let started = Instant::now();
            assert!(sleep_while_running(Duration::from_millis(ms), &running));
            assert!(started.elapsed() >= Duration::from_millis(ms));
        }
    }

    #[test]
    fn test_cleared_flag_cuts_the_sleep_short() {
        let running = AtomicBool::new(false);
        let started = Instant::now();
        assert!(!sleep_while_running(Duration::from_secs(10), &running));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_watcher_thread_delivers_and_stops() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.log");
        std::fs::write(&path, b"").unwrap();

        let watcher = LogTailWatcher::polling(Duration::from_millis(50));
        watcher.watch(path.clone());
        watcher.start().unwrap();
        assert!(watcher.is_active());

        append(&path, b"line one\n");

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut received = Vec::new();
        while received.is_empty() && Instant::now() < deadline {
            received.extend(watcher.poll_updates(10));
            std::thread::sleep(Duration::from_millis(20));
        }
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].text(), "line one\n");

        watcher.stop();
        assert!(!watcher.is_active());
        assert!(watcher.poll_updates(10).is_empty());
    }
}
