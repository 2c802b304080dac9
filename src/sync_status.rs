//! SynchronizationStatus: a rolling window of recent block hashes plus a
//! sparse checkpoint deque at increasing stride, used to resume syncing
//! and detect forks.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::crypto::Hash;

const ROLLING_WINDOW_SIZE: usize = 100;

/// One block hash recorded at a known height, kept for checkpointing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct RecordedHash {
    height: u64,
    hash: Hash,
}

/// Tracks the hashes the synchronizer has already processed, so the
/// downloader can ask the node "send me blocks after the newest of these
/// checkpoints you still recognize" and so a reorg can be detected by
/// comparing an incoming block's height against `last_known_block_height`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynchronizationStatus {
    /// The most recent `ROLLING_WINDOW_SIZE` block hashes, newest last.
    recent: VecDeque<RecordedHash>,
    /// Sparse checkpoints at stride 1, 1, 1, 2, 4, 8, ... from oldest to
    /// newest, so resuming from deep history doesn't require millions of
    /// stored hashes.
    checkpoints: VecDeque<RecordedHash>,
    next_stride: u64,
    since_last_checkpoint: u64,
    last_known_block_height: u64,
}

impl Default for SynchronizationStatus {
    fn default() -> Self {
        SynchronizationStatus {
            recent: VecDeque::new(),
            checkpoints: VecDeque::new(),
            next_stride: 1,
            since_last_checkpoint: 0,
            last_known_block_height: 0,
        }
    }
}

impl SynchronizationStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn height(&self) -> u64 {
        self.last_known_block_height
    }

    /// Idempotent: calling this twice with the same block is a no-op, so a
    /// crash between processing a block and recording it does not corrupt
    /// state on restart.
    pub fn store_block_hash(&mut self, height: u64, hash: Hash) {
        if let Some(last) = self.recent.back() {
            if last.height == height {
                return;
            }
        }

        let recorded = RecordedHash { height, hash };
        self.recent.push_back(recorded);
        while self.recent.len() > ROLLING_WINDOW_SIZE {
            self.recent.pop_front();
        }

        self.since_last_checkpoint += 1;
        if self.since_last_checkpoint >= self.next_stride {
            self.checkpoints.push_back(recorded);
            self.since_last_checkpoint = 0;
            self.advance_stride();
        }

        self.last_known_block_height = height;
    }

    fn advance_stride(&mut self) {
        // 1, 1, 1, 2, 4, 8, ... — the first three checkpoints are dense,
        // then the gap doubles each time.
        if self.checkpoints.len() >= 3 {
            self.next_stride = self.next_stride.saturating_mul(2).max(1);
        }
    }

    /// Hashes to hand the node, newest first, so it can find the highest
    /// one it still recognizes.
    pub fn get_block_hash_checkpoints(&self) -> Vec<Hash> {
        let mut out: Vec<Hash> = self.recent.iter().rev().map(|r| r.hash).collect();
        for cp in self.checkpoints.iter().rev() {
            if !out.contains(&cp.hash) {
                out.push(cp.hash);
            }
        }
        out
    }

    /// True if `incoming_height` is at or below a height we've already
    /// recorded a (possibly different) hash for — the caller is
    /// responsible for comparing hashes to confirm an actual fork.
    pub fn could_be_fork(&self, incoming_height: u64) -> bool {
        incoming_height <= self.last_known_block_height
    }

    /// Drop all recorded state at or above `fork_height`, so the next
    /// `store_block_hash` calls rebuild history past the reorg point.
    pub fn rewind(&mut self, fork_height: u64) {
        self.recent.retain(|r| r.height < fork_height);
        self.checkpoints.retain(|r| r.height < fork_height);
        self.last_known_block_height = self
            .recent
            .back()
            .map(|r| r.height)
            .unwrap_or(0)
            .max(self.checkpoints.back().map(|r| r.height).unwrap_or(0));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn height_is_monotonic_as_blocks_are_stored() {
        let mut status = SynchronizationStatus::new();
        for h in 1..=10u64 {
            status.store_block_hash(h, Hash([h as u8; 32]));
            assert_eq!(status.height(), h);
        }
    }

    #[test]
    fn storing_the_same_height_twice_is_idempotent() {
        let mut status = SynchronizationStatus::new();
        status.store_block_hash(1, Hash([1u8; 32]));
        let before = status.get_block_hash_checkpoints();
        status.store_block_hash(1, Hash([1u8; 32]));
        let after = status.get_block_hash_checkpoints();
        assert_eq!(before, after);
    }

    #[test]
    fn rolling_window_caps_at_100() {
        let mut status = SynchronizationStatus::new();
        for h in 1..=150u64 {
            status.store_block_hash(h, Hash([(h % 255) as u8; 32]));
        }
        assert!(status.recent.len() <= ROLLING_WINDOW_SIZE);
    }

    #[test]
    fn rewind_drops_state_at_or_above_fork_height() {
        let mut status = SynchronizationStatus::new();
        for h in 1..=20u64 {
            status.store_block_hash(h, Hash([h as u8; 32]));
        }
        status.rewind(10);
        assert!(status.height() < 10);
        assert!(status.recent.iter().all(|r| r.height < 10));
    }
}
