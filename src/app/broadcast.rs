// LOMan - app/broadcast.rs
//
// Admin broadcast: writes a notice into each target tile's channel file,
// holds it for a fixed time on a background thread, then clears it.
//
// The write happens on the caller's thread so the file already holds the
// message when `broadcast` returns. Only the hold and the clear run in the
// background, one short-lived thread per channel.
//
// Tiles whose install folders coincide share one channel file. A broadcast
// writes each distinct file once. Every successful write bumps that file's
// sequence number; a hold only clears if the number is still its own, so an
// older hold never wipes a newer message.

use crate::core::model::{BroadcastRecord, BroadcastTarget, ChannelMessage};
use crate::platform::fs::write_atomic;
use crate::util::constants::{MAX_BROADCAST_HISTORY, MAX_BROADCAST_MESSAGE_CHARS};
use crate::util::error::BroadcastError;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Result of a broadcast for one target tile.
#[derive(Debug)]
pub struct BroadcastReceipt {
    pub tile_id: usize,
    /// Channel file for this tile; `None` when the tile id is invalid.
    pub channel: Option<PathBuf>,
    pub result: Result<(), BroadcastError>,
}

/// Serialise `message` into the channel file at `path`.
pub fn write_channel(path: &Path, message: &str) -> io::Result<()> {
    let body = serde_json::to_vec(&ChannelMessage {
        message: message.to_string(),
    })?;
    write_atomic(path, &body)
}

struct Inner {
    /// Channel file per tile id.
    channels: Vec<PathBuf>,
    hold: Duration,
    /// Guards every channel write, keyed by channel path.
    sequences: Mutex<HashMap<PathBuf, u64>>,
    pending: Mutex<usize>,
    idle: Condvar,
    history: Mutex<VecDeque<BroadcastRecord>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("Broadcast: lock poisoned, recovering");
        poisoned.into_inner()
    })
}

/// Fire-and-forget admin notices.
#[derive(Clone)]
pub struct AdminBroadcaster {
    inner: Arc<Inner>,
}

impl AdminBroadcaster {
    /// `channels[i]` is the channel file of tile `i`.
    pub fn new(channels: Vec<PathBuf>, hold: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                channels,
                hold,
                sequences: Mutex::new(HashMap::new()),
                pending: Mutex::new(0),
                idle: Condvar::new(),
                history: Mutex::new(VecDeque::new()),
            }),
        }
    }

    pub fn hold(&self) -> Duration {
        self.inner.hold
    }

    pub fn channel_path(&self, tile_id: usize) -> Option<&Path> {
        self.inner.channels.get(tile_id).map(PathBuf::as_path)
    }

    /// Write `message` to every target's channel and schedule the clears.
    ///
    /// A message over the length limit is rejected outright. Otherwise each
    /// target gets its own receipt; one failing target never stops the rest.
    pub fn broadcast(
        &self,
        message: &str,
        target: &BroadcastTarget,
    ) -> Result<Vec<BroadcastReceipt>, BroadcastError> {
        let length = message.chars().count();
        if length > MAX_BROADCAST_MESSAGE_CHARS {
            return Err(BroadcastError::MessageTooLong {
                length,
                max_length: MAX_BROADCAST_MESSAGE_CHARS,
            });
        }

        let tile_count = self.inner.channels.len();
        let mut tiles: Vec<usize> = match target {
            BroadcastTarget::Tile(t) => vec![*t],
            BroadcastTarget::Tiles(ts) => ts.clone(),
            BroadcastTarget::All => (0..tile_count).collect(),
        };
        let mut seen = std::collections::HashSet::new();
        tiles.retain(|t| seen.insert(*t));

        // Write each distinct channel once, remembering the outcome.
        let mut written: HashMap<PathBuf, Result<(), (io::ErrorKind, String)>> = HashMap::new();
        let mut receipts = Vec::with_capacity(tiles.len());

        for tile_id in tiles {
            let Some(channel) = self.inner.channels.get(tile_id) else {
                receipts.push(BroadcastReceipt {
                    tile_id,
                    channel: None,
                    result: Err(BroadcastError::InvalidTile {
                        tile_id,
                        tile_count,
                    }),
                });
                continue;
            };

            let outcome = written
                .entry(channel.clone())
                .or_insert_with(|| self.deliver(channel, message))
                .clone();

            let result = outcome.map_err(|(kind, text)| BroadcastError::ChannelWriteFailed {
                tile_id,
                path: channel.clone(),
                source: io::Error::new(kind, text),
            });
            if let Err(ref e) = result {
                tracing::warn!(tile = tile_id, error = %e, "Broadcast target failed");
            }
            receipts.push(BroadcastReceipt {
                tile_id,
                channel: Some(channel.clone()),
                result,
            });
        }

        let record = BroadcastRecord {
            sent_at: Utc::now(),
            message: message.to_string(),
            delivered: receipts
                .iter()
                .filter(|r| r.result.is_ok())
                .map(|r| r.tile_id)
                .collect(),
            failed: receipts
                .iter()
                .filter(|r| r.result.is_err())
                .map(|r| r.tile_id)
                .collect(),
        };
        tracing::info!(
            delivered = record.delivered.len(),
            failed = record.failed.len(),
            channels = written.len(),
            hold_secs = self.inner.hold.as_secs(),
            "Broadcast sent"
        );

        let mut history = lock(&self.inner.history);
        history.push_back(record);
        while history.len() > MAX_BROADCAST_HISTORY {
            history.pop_front();
        }

        Ok(receipts)
    }

    /// Write one channel and start its hold. The error is flattened so it
    /// can be shared by every tile on this channel.
    fn deliver(&self, channel: &Path, message: &str) -> Result<(), (io::ErrorKind, String)> {
        let sequence = {
            let mut sequences = lock(&self.inner.sequences);
            if let Err(e) = write_channel(channel, message) {
                return Err((e.kind(), e.to_string()));
            }
            let seq = sequences.entry(channel.to_path_buf()).or_insert(0);
            *seq += 1;
            *seq
        };

        *lock(&self.inner.pending) += 1;
        let inner = Arc::clone(&self.inner);
        let path = channel.to_path_buf();
        let spawned = std::thread::Builder::new()
            .name("loman-broadcast-hold".to_string())
            .spawn(move || run_hold(&inner, &path, sequence));

        if let Err(e) = spawned {
            tracing::error!(
                channel = %channel.display(),
                error = %e,
                "Cannot spawn hold thread; message will not be cleared"
            );
            finish_hold(&self.inner);
        }
        Ok(())
    }

    /// Number of holds still waiting to clear.
    pub fn pending(&self) -> usize {
        *lock(&self.inner.pending)
    }

    /// Wait up to `timeout` for every hold to clear. Returns `true` if none
    /// remain.
    pub fn drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut pending = lock(&self.inner.pending);
        while *pending > 0 {
            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(pending = *pending, "Broadcast holds still pending");
                return false;
            }
            pending = self
                .inner
                .idle
                .wait_timeout(pending, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|p| p.into_inner().0);
        }
        true
    }

    /// Past broadcasts, oldest first.
    pub fn history(&self) -> Vec<BroadcastRecord> {
        lock(&self.inner.history).iter().cloned().collect()
    }

    /// Forget past broadcasts. Returns how many were dropped. Pending holds
    /// are unaffected.
    pub fn clear_history(&self) -> usize {
        let mut history = lock(&self.inner.history);
        let dropped = history.len();
        history.clear();
        tracing::info!(dropped, "Broadcast history cleared");
        dropped
    }
}

fn run_hold(inner: &Inner, path: &Path, sequence: u64) {
    std::thread::sleep(inner.hold);

    {
        let sequences = lock(&inner.sequences);
        if sequences.get(path) == Some(&sequence) {
            match write_channel(path, "") {
                Ok(()) => tracing::debug!(channel = %path.display(), "Broadcast cleared"),
                Err(e) => tracing::warn!(
                    channel = %path.display(),
                    error = %e,
                    "Cannot clear broadcast channel"
                ),
            }
        } else {
            tracing::debug!(channel = %path.display(), "Broadcast superseded, skipping clear");
        }
    }

    finish_hold(inner);
}

fn finish_hold(inner: &Inner) {
    let mut pending = lock(&inner.pending);
    *pending = pending.saturating_sub(1);
    if *pending == 0 {
        inner.idle.notify_all();
    }
}
