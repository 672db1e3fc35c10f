//! Per-run configuration and the request/response shapes of the protocol.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::entity::SyncEntity;
use super::object::SyncObject;

/// Default and maximum number of changes exchanged per request.
pub const DEFAULT_ITEMS_PER_SYNC_REQUEST: usize = 300;

/// Which way data may flow during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SyncDirection {
    /// Server to client only.
    PullDown,
    /// Client to server only.
    PushUp,
    #[default]
    Both,
}

impl SyncDirection {
    pub fn pulls(self) -> bool {
        matches!(self, SyncDirection::PullDown | SyncDirection::Both)
    }

    pub fn pushes(self) -> bool {
        matches!(self, SyncDirection::PushUp | SyncDirection::Both)
    }

    /// Parse from a CLI-friendly name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pull" | "pulldown" => Some(SyncDirection::PullDown),
            "push" | "pushup" => Some(SyncDirection::PushUp),
            "both" => Some(SyncDirection::Both),
            _ => None,
        }
    }
}

/// Selects one entity type, optionally restricted to specific instances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRepositoryFilter {
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_ids: Option<Vec<Uuid>>,
}

impl SyncRepositoryFilter {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            sync_ids: None,
        }
    }

    /// Filter for every instance of `T`.
    pub fn of<T: SyncEntity>() -> Self {
        Self::new(T::TYPE_NAME)
    }

    /// Restrict the filter to the given instances.
    pub fn with_sync_ids(mut self, sync_ids: Vec<Uuid>) -> Self {
        self.sync_ids = Some(sync_ids);
        self
    }
}

/// Configuration for one sync run.
///
/// Client and server clocks are never assumed to agree, so each side keeps
/// its own watermark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SyncOptions {
    pub direction: SyncDirection,
    pub last_synced_on_client: Option<DateTime<Utc>>,
    pub last_synced_on_server: Option<DateTime<Utc>>,
    pub items_per_sync_request: usize,
    pub permanent_deletions: bool,
    pub include_issue_details: bool,
    /// Types to sync, parents before children. Empty means every registered type.
    pub filters: Vec<SyncRepositoryFilter>,
    /// Free-form protocol extensions, e.g. the version handshake.
    pub values: BTreeMap<String, String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            direction: SyncDirection::Both,
            last_synced_on_client: None,
            last_synced_on_server: None,
            items_per_sync_request: DEFAULT_ITEMS_PER_SYNC_REQUEST,
            permanent_deletions: false,
            include_issue_details: true,
            filters: Vec::new(),
            values: BTreeMap::new(),
        }
    }
}

impl SyncOptions {
    pub fn new(direction: SyncDirection) -> Self {
        Self {
            direction,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: SyncRepositoryFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Filter for a type, if the type is part of this run.
    pub fn filter_for(&self, type_name: &str) -> Option<&SyncRepositoryFilter> {
        self.filters.iter().find(|f| f.type_name == type_name)
    }
}

/// The session handle returned by `BeginSync`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSession {
    pub session_id: Uuid,
    /// Clock of the side that created the session; upper bound of its change window.
    pub started_on: DateTime<Utc>,
    /// Options after validation and clamping.
    pub options: SyncOptions,
}

/// Arguments of `GetChanges`: the half-open window `[since, until)` plus paging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    pub since: Option<DateTime<Utc>>,
    pub until: DateTime<Utc>,
    pub skip: usize,
    pub take: usize,
}

/// One page of changes plus the size of the whole window.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncBatch {
    pub objects: Vec<SyncObject>,
    pub total_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_flags() {
        assert!(SyncDirection::PullDown.pulls());
        assert!(!SyncDirection::PullDown.pushes());
        assert!(SyncDirection::PushUp.pushes());
        assert!(!SyncDirection::PushUp.pulls());
        assert!(SyncDirection::Both.pulls() && SyncDirection::Both.pushes());
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!(SyncDirection::parse("pull"), Some(SyncDirection::PullDown));
        assert_eq!(SyncDirection::parse("PushUp"), Some(SyncDirection::PushUp));
        assert_eq!(SyncDirection::parse("both"), Some(SyncDirection::Both));
        assert_eq!(SyncDirection::parse("sideways"), None);
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: SyncOptions = serde_json::from_str(r#"{"direction": "PullDown"}"#).unwrap();
        assert_eq!(options.direction, SyncDirection::PullDown);
        assert_eq!(options.items_per_sync_request, DEFAULT_ITEMS_PER_SYNC_REQUEST);
        assert!(options.filters.is_empty());
        assert!(options.last_synced_on_server.is_none());
    }

    #[test]
    fn test_filter_lookup() {
        let options = SyncOptions::default()
            .with_filter(SyncRepositoryFilter::new("a"))
            .with_filter(SyncRepositoryFilter::new("b").with_sync_ids(vec![Uuid::nil()]));

        assert!(options.filter_for("a").unwrap().sync_ids.is_none());
        assert_eq!(options.filter_for("b").unwrap().sync_ids.as_ref().unwrap().len(), 1);
        assert!(options.filter_for("c").is_none());
    }
}
