//! Chunk observer table.
//!
//! Tracks which sessions have received which chunks, as plain
//! `(chunk, session)` rows instead of cross-owned pointers: session removal
//! deletes every row carrying its id, chunk unload simply stops producing
//! notifications. No cycles, no weak references.

use crate::bus::SessionId;
use cubeland_core::proto::ChunkPos;
use dashmap::DashMap;
use std::collections::HashSet;

#[derive(Debug, Default)]
pub struct ChunkObservers {
    map: DashMap<ChunkPos, HashSet<SessionId>>,
}

impl ChunkObservers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` as an observer of `chunk`. Idempotent.
    pub fn add(&self, chunk: ChunkPos, session: SessionId) {
        self.map.entry(chunk).or_default().insert(session);
    }

    /// Drop one observation. Returns false if it did not exist.
    pub fn remove(&self, chunk: ChunkPos, session: SessionId) -> bool {
        let Some(mut entry) = self.map.get_mut(&chunk) else {
            return false;
        };
        let removed = entry.remove(&session);
        if entry.is_empty() {
            drop(entry);
            self.map.remove_if(&chunk, |_, set| set.is_empty());
        }
        removed
    }

    /// Drop every observation a session holds. Called when the session ends.
    pub fn remove_session(&self, session: SessionId) {
        self.map.retain(|_, set| {
            set.remove(&session);
            !set.is_empty()
        });
    }

    pub fn is_observer(&self, chunk: ChunkPos, session: SessionId) -> bool {
        self.map
            .get(&chunk)
            .map(|set| set.contains(&session))
            .unwrap_or(false)
    }

    /// Sessions observing `chunk`.
    pub fn observers_of(&self, chunk: ChunkPos) -> Vec<SessionId> {
        self.map
            .get(&chunk)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Total observation rows, across all chunks.
    pub fn len(&self) -> usize {
        self.map.iter().map(|entry| entry.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
