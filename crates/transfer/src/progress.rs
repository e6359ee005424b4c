use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::types::ChunkDescriptor;

/// A change reported by a transport or commit callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressUpdate {
    /// Client-to-server transfer progress of one chunk, in percent.
    Transfer { chunk_id: u32, percent: f64 },
    /// Server durable-commit progress of one chunk, in percent.
    Commit { chunk_id: u32, percent: f64 },
}

/// Point-in-time view of an upload's progress.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProgressSnapshot {
    /// Two-phase completion in [0, 100].
    pub overall: f64,
    pub total_chunks: u32,
    /// Chunks whose transfer reached 100%.
    pub transferred_chunks: u32,
    /// Chunks the server confirmed as committed.
    pub committed_chunks: u32,
    /// Bytes delivered to the server, estimated from per-chunk percentages.
    pub transferred_bytes: u64,
    pub total_bytes: u64,
}

/// Combines transfer and commit progress into one percentage.
///
/// Each chunk contributes up to 50 points for transfer and 50 for
/// commit, so 100% means every chunk was both sent and durably stored.
/// Per-chunk values only ever increase until [`reset`](Self::reset).
#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    transfer: Vec<f64>,
    commit: Vec<f64>,
    chunk_lens: Vec<u64>,
}

impl ProgressAggregator {
    /// Creates an aggregator for the given chunk plan, all at zero.
    pub fn new(chunks: &[ChunkDescriptor]) -> Self {
        Self {
            transfer: vec![0.0; chunks.len()],
            commit: vec![0.0; chunks.len()],
            chunk_lens: chunks.iter().map(ChunkDescriptor::len).collect(),
        }
    }

    /// Marks chunks from a previous attempt as fully transferred and committed.
    pub fn seed_committed(&mut self, chunk_ids: impl IntoIterator<Item = u32>) {
        for id in chunk_ids {
            self.set_transfer(id, 100.0);
            self.set_commit(id, 100.0);
        }
    }

    /// Applies one update. Returns `true` if anything changed.
    pub fn apply(&mut self, update: ProgressUpdate) -> bool {
        match update {
            ProgressUpdate::Transfer { chunk_id, percent } => self.set_transfer(chunk_id, percent),
            ProgressUpdate::Commit { chunk_id, percent } => self.set_commit(chunk_id, percent),
        }
    }

    /// Raises the transfer percentage of `chunk_id`.
    pub fn set_transfer(&mut self, chunk_id: u32, percent: f64) -> bool {
        slot(&mut self.transfer, chunk_id).is_some_and(|s| raise(s, percent))
    }

    /// Raises the commit percentage of `chunk_id`.
    pub fn set_commit(&mut self, chunk_id: u32, percent: f64) -> bool {
        slot(&mut self.commit, chunk_id).is_some_and(|s| raise(s, percent))
    }

    /// Returns every chunk to zero.
    pub fn reset(&mut self) {
        self.transfer.fill(0.0);
        self.commit.fill(0.0);
    }

    /// Overall completion: `(Σ transfer / 2 + Σ commit / 2) / total_chunks`.
    pub fn overall(&self) -> f64 {
        if self.transfer.is_empty() {
            return 0.0;
        }
        let transfer: f64 = self.transfer.iter().sum();
        let commit: f64 = self.commit.iter().sum();
        (transfer / 2.0 + commit / 2.0) / self.transfer.len() as f64
    }

    /// Transfer percentage of one chunk (0 for unknown ids).
    pub fn transfer_percent(&self, chunk_id: u32) -> f64 {
        get(&self.transfer, chunk_id)
    }

    /// Commit percentage of one chunk (0 for unknown ids).
    pub fn commit_percent(&self, chunk_id: u32) -> f64 {
        get(&self.commit, chunk_id)
    }

    pub fn total_chunks(&self) -> u32 {
        self.transfer.len() as u32
    }

    /// Builds a [`ProgressSnapshot`] of the current state.
    pub fn snapshot(&self) -> ProgressSnapshot {
        let transferred_bytes = self
            .transfer
            .iter()
            .zip(&self.chunk_lens)
            .map(|(pct, len)| (*len as f64 * pct / 100.0) as u64)
            .sum();
        ProgressSnapshot {
            overall: self.overall(),
            total_chunks: self.total_chunks(),
            transferred_chunks: self.transfer.iter().filter(|p| **p >= 100.0).count() as u32,
            committed_chunks: self.commit.iter().filter(|p| **p >= 100.0).count() as u32,
            transferred_bytes,
            total_bytes: self.chunk_lens.iter().sum(),
        }
    }
}

fn slot(values: &mut [f64], chunk_id: u32) -> Option<&mut f64> {
    let idx = (chunk_id as usize).checked_sub(1)?;
    values.get_mut(idx)
}

fn get(values: &[f64], chunk_id: u32) -> f64 {
    (chunk_id as usize)
        .checked_sub(1)
        .and_then(|idx| values.get(idx))
        .copied()
        .unwrap_or(0.0)
}

/// Monotonic, clamped update. NaN never compares greater and is ignored.
fn raise(slot: &mut f64, percent: f64) -> bool {
    let percent = percent.clamp(0.0, 100.0);
    if percent > *slot {
        *slot = percent;
        true
    } else {
        false
    }
}

// ---------------------------------------------------------------------------
// Tracker task
// ---------------------------------------------------------------------------

/// Cloneable sender side of a progress tracker.
///
/// Callbacks never touch the aggregator directly: they post updates here
/// and the tracker task applies them one at a time.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ProgressHandle {
    /// Reports transfer progress for a chunk.
    pub fn transfer(&self, chunk_id: u32, percent: f64) {
        let _ = self.tx.send(ProgressUpdate::Transfer { chunk_id, percent });
    }

    /// Reports commit progress for a chunk.
    pub fn commit(&self, chunk_id: u32, percent: f64) {
        let _ = self.tx.send(ProgressUpdate::Commit { chunk_id, percent });
    }
}

/// Moves `aggregator` into a task that owns it exclusively.
///
/// Returns the update handle, a watch receiver carrying the latest
/// snapshot, and the task handle. The task ends, yielding the final
/// aggregator, once every [`ProgressHandle`] has been dropped.
pub fn spawn_progress_tracker(
    mut aggregator: ProgressAggregator,
) -> (
    ProgressHandle,
    watch::Receiver<ProgressSnapshot>,
    JoinHandle<ProgressAggregator>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let (snapshot_tx, snapshot_rx) = watch::channel(aggregator.snapshot());

    let handle = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if aggregator.apply(update) {
                let snapshot = aggregator.snapshot();
                trace!(overall = snapshot.overall, "progress updated");
                snapshot_tx.send_replace(snapshot);
            }
        }
        aggregator
    });

    (ProgressHandle { tx }, snapshot_rx, handle)
}

// ---------------------------------------------------------------------------
// Transfer rate
// ---------------------------------------------------------------------------

/// Upload speed over a sliding time window.
///
/// Fed with the cumulative byte count from each [`ProgressSnapshot`], so
/// callers never compute deltas. A count lower than the previous one means
/// a new attempt started and the window restarts.
#[derive(Debug, Clone)]
pub struct TransferRate {
    window: Duration,
    samples: VecDeque<(Instant, u64)>,
}

impl Default for TransferRate {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl TransferRate {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            samples: VecDeque::new(),
        }
    }

    /// Records the cumulative `transferred_bytes` observed now.
    pub fn record(&mut self, transferred_bytes: u64) {
        self.record_at(Instant::now(), transferred_bytes);
    }

    fn record_at(&mut self, at: Instant, transferred_bytes: u64) {
        if self
            .samples
            .back()
            .is_some_and(|&(_, last)| transferred_bytes < last)
        {
            self.samples.clear();
        }
        self.samples.push_back((at, transferred_bytes));

        // Keep one sample at or before the window start as the baseline.
        while self.samples.len() > 2
            && self
                .samples
                .get(1)
                .is_some_and(|&(t, _)| at.duration_since(t) >= self.window)
        {
            self.samples.pop_front();
        }
    }

    /// Bytes per second across the window, or 0 before two samples exist.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(&(t0, b0)), Some(&(t1, b1))) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = t1.duration_since(t0).as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        (b1 - b0) as f64 / elapsed
    }

    /// Time left for `remaining_bytes` at the current rate. `None` while stalled.
    pub fn eta(&self, remaining_bytes: u64) -> Option<Duration> {
        let rate = self.bytes_per_second();
        (rate > 0.0).then(|| Duration::from_secs_f64(remaining_bytes as f64 / rate))
    }
}
