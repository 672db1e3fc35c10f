//! Translation between internal entities and the public shapes peers see.
//!
//! Outgoing data comes from our own store and is trusted; the converter only
//! decides which fields to publish. Incoming data comes from a peer and is
//! not trusted: excluded fields are stripped before decoding, sync metadata is
//! handled by the registry, and every change is authorised against the
//! [`Actor`] performing the sync.

use serde::{Deserialize, Serialize};

use crate::model::{SyncEntity, SyncModel, SyncObjectStatus};

/// Role allowed to perform privileged changes such as deletes.
pub const ADMINISTRATOR_ROLE: &str = "Administrator";

/// The identity on whose behalf a session applies changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl Actor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// An actor holding the administrator role, used by the local replica.
    pub fn administrator(id: impl Into<String>) -> Self {
        Self::new(id).with_role(ADMINISTRATOR_ROLE)
    }

    pub fn is_in_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r.eq_ignore_ascii_case(role))
    }
}

/// Outcome of authorising one incoming change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Strategy converting between a public shape `P` and an internal entity `I`.
pub trait Converter<P, I>: Send + Sync + 'static
where
    P: SyncModel,
    I: SyncEntity,
{
    /// Outgoing: internal entity to the public shape. Sync metadata is copied
    /// by the caller afterwards.
    fn to_public(&self, internal: &I) -> P;

    /// Incoming: copy the allowed fields of `public` onto `internal`.
    ///
    /// `status` is `Added` when `internal` is a fresh default entity and
    /// `Modified` when it is the stored copy. Sync metadata must not be
    /// touched here.
    fn update_internal(&self, public: &P, internal: &mut I, status: SyncObjectStatus);

    /// Top-level fields stripped from incoming payloads before decoding.
    fn incoming_exclusions(&self) -> &'static [&'static str] {
        &[]
    }

    /// Authorises an incoming change. A denied delete is a silent no-op; a
    /// denied add or modify is reported as a permission issue.
    fn authorize(&self, _status: SyncObjectStatus, _actor: &Actor) -> Decision {
        Decision::Allow
    }
}
