//! Counters and progress reported by sessions and the engine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Counters for one entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeStatistics {
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
}

impl TypeStatistics {
    pub fn total(&self) -> usize {
        self.added + self.updated + self.deleted + self.skipped
    }
}

/// How a single applied item was accounted for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Added,
    Updated,
    Deleted,
    Skipped,
}

/// Per-type counters accumulated over a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatistics {
    pub types: BTreeMap<String, TypeStatistics>,
}

impl SyncStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, type_name: &str, outcome: ApplyOutcome) {
        let entry = self.types.entry(type_name.to_string()).or_default();
        match outcome {
            ApplyOutcome::Added => entry.added += 1,
            ApplyOutcome::Updated => entry.updated += 1,
            ApplyOutcome::Deleted => entry.deleted += 1,
            ApplyOutcome::Skipped => entry.skipped += 1,
        }
    }

    pub fn get(&self, type_name: &str) -> TypeStatistics {
        self.types.get(type_name).copied().unwrap_or_default()
    }

    /// Adds another set of counters into this one.
    pub fn merge(&mut self, other: &SyncStatistics) {
        for (type_name, stats) in &other.types {
            let entry = self.types.entry(type_name.clone()).or_default();
            entry.added += stats.added;
            entry.updated += stats.updated;
            entry.deleted += stats.deleted;
            entry.skipped += stats.skipped;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.types.values().all(|s| s.total() == 0)
    }

    pub fn total(&self) -> usize {
        self.types.values().map(TypeStatistics::total).sum()
    }
}

/// Lifecycle of one engine run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncEngineStatus {
    #[default]
    Stopped,
    Starting,
    Pulling,
    Pushing,
    Completed,
    Cancelled,
    Failed,
}

impl SyncEngineStatus {
    pub fn is_running(self) -> bool {
        matches!(
            self,
            SyncEngineStatus::Starting | SyncEngineStatus::Pulling | SyncEngineStatus::Pushing
        )
    }

    pub fn is_finished(self) -> bool {
        matches!(
            self,
            SyncEngineStatus::Completed | SyncEngineStatus::Cancelled | SyncEngineStatus::Failed
        )
    }
}

impl std::fmt::Display for SyncEngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncEngineStatus::Stopped => "stopped",
            SyncEngineStatus::Starting => "starting",
            SyncEngineStatus::Pulling => "pulling",
            SyncEngineStatus::Pushing => "pushing",
            SyncEngineStatus::Completed => "completed",
            SyncEngineStatus::Cancelled => "cancelled",
            SyncEngineStatus::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Progress snapshot published by the engine after every batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEngineState {
    pub status: SyncEngineStatus,
    pub count: usize,
    pub total: usize,
}

impl SyncEngineState {
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return if self.status == SyncEngineStatus::Completed { 100 } else { 0 };
        }
        ((self.count.min(self.total) * 100) / self.total) as u8
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_merge() {
        let mut a = SyncStatistics::new();
        a.record("Account", ApplyOutcome::Added);
        a.record("Account", ApplyOutcome::Skipped);

        let mut b = SyncStatistics::new();
        b.record("Account", ApplyOutcome::Updated);
        b.record("Address", ApplyOutcome::Deleted);

        a.merge(&b);
        assert_eq!(
            a.get("Account"),
            TypeStatistics {
                added: 1,
                updated: 1,
                deleted: 0,
                skipped: 1
            }
        );
        assert_eq!(a.get("Address").deleted, 1);
        assert_eq!(a.total(), 4);
        assert_eq!(a.get("Missing"), TypeStatistics::default());
    }

    #[test]
    fn test_state_percent() {
        let mut state = SyncEngineState {
            status: SyncEngineStatus::Pulling,
            count: 1,
            total: 4,
        };
        assert_eq!(state.percent(), 25);
        assert!(state.is_running());

        state.count = 10;
        assert_eq!(state.percent(), 100);

        state = SyncEngineState {
            status: SyncEngineStatus::Completed,
            count: 0,
            total: 0,
        };
        assert_eq!(state.percent(), 100);
        assert!(!state.is_running());
    }

    #[test]
    fn test_running_statuses() {
        assert!(SyncEngineStatus::Starting.is_running());
        assert!(SyncEngineStatus::Pushing.is_running());
        assert!(!SyncEngineStatus::Stopped.is_running());
        assert!(!SyncEngineStatus::Cancelled.is_running());
        assert!(SyncEngineStatus::Failed.is_finished());
    }
}
