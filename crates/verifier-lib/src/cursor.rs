//! Analysis-minute cursors
//!
//! A cursor records the last minute of collected data processed for a
//! (state execution, metric group) pair. Cursors only move forward: every
//! update is a conditional advance that is rejected unless the new minute
//! is strictly greater than the stored one.

use crate::collaborators::async_trait;
use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Identifies one cursor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CursorKey {
    pub state_execution_id: String,
    pub group_name: String,
}

impl CursorKey {
    pub fn new(state_execution_id: impl Into<String>, group_name: impl Into<String>) -> Self {
        Self {
            state_execution_id: state_execution_id.into(),
            group_name: group_name.into(),
        }
    }
}

impl std::fmt::Display for CursorKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.state_execution_id, self.group_name)
    }
}

/// Storage for analysis-minute cursors
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Last processed minute, or None if nothing was processed yet
    async fn current(&self, key: &CursorKey) -> Result<Option<i64>>;

    /// Atomically set the cursor to `minute` if it is ahead of the stored value
    ///
    /// Returns false when the update was stale and nothing changed.
    async fn advance(&self, key: &CursorKey, minute: i64) -> Result<bool>;
}

/// Cursor store backed by a sharded concurrent map
#[derive(Debug, Default)]
pub struct InMemoryCursorStore {
    cursors: DashMap<CursorKey, i64>,
}

impl InMemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursors belonging to one state execution
    pub fn cursors_for(&self, state_execution_id: &str) -> Vec<(String, i64)> {
        let mut cursors: Vec<(String, i64)> = self
            .cursors
            .iter()
            .filter(|entry| entry.key().state_execution_id == state_execution_id)
            .map(|entry| (entry.key().group_name.clone(), *entry.value()))
            .collect();
        cursors.sort();
        cursors
    }
}

#[async_trait]
impl CursorStore for InMemoryCursorStore {
    async fn current(&self, key: &CursorKey) -> Result<Option<i64>> {
        Ok(self.cursors.get(key).map(|minute| *minute))
    }

    async fn advance(&self, key: &CursorKey, minute: i64) -> Result<bool> {
        // The entry holds the shard lock for the whole compare-and-set
        match self.cursors.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() < minute {
                    occupied.insert(minute);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(minute);
                Ok(true)
            }
        }
    }
}
