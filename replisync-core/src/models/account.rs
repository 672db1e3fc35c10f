use serde::{Deserialize, Serialize};
use std::fmt;

use crate::converter::{Actor, Converter, Decision, ADMINISTRATOR_ROLE};
use crate::model::{SyncEntity, SyncMeta, SyncModel, SyncObjectStatus};

/// Stored account. `password_hash` never leaves the replica.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccountEntity {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub name: String,
    pub email_address: String,
    pub roles: Vec<String>,
    pub password_hash: Option<String>,
}

impl AccountEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            meta: SyncMeta::new(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email_address = email.into();
        self
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }
}

impl SyncModel for AccountEntity {
    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }
}

impl SyncEntity for AccountEntity {
    const TYPE_NAME: &'static str = "replisync.Account";

    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("account name is required".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for AccountEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.email_address.is_empty() {
            write!(f, " <{}>", self.email_address)?;
        }
        if self.meta.is_deleted {
            write!(f, " (deleted)")?;
        }
        Ok(())
    }
}

/// Account as exchanged with peers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Account {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub name: String,
    pub email_address: String,
    pub roles: Vec<String>,
}

impl SyncModel for Account {
    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }
}

/// Publishes roles but never accepts them from a peer; only administrators
/// may delete accounts.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountConverter;

impl Converter<Account, AccountEntity> for AccountConverter {
    fn to_public(&self, internal: &AccountEntity) -> Account {
        Account {
            meta: internal.meta.clone(),
            name: internal.name.clone(),
            email_address: internal.email_address.clone(),
            roles: internal.roles.clone(),
        }
    }

    fn update_internal(
        &self,
        public: &Account,
        internal: &mut AccountEntity,
        _status: SyncObjectStatus,
    ) {
        internal.name = public.name.clone();
        internal.email_address = public.email_address.clone();
    }

    fn incoming_exclusions(&self) -> &'static [&'static str] {
        &["roles", "passwordHash"]
    }

    fn authorize(&self, status: SyncObjectStatus, actor: &Actor) -> Decision {
        match status {
            SyncObjectStatus::Deleted if !actor.is_in_role(ADMINISTRATOR_ROLE) => Decision::Deny,
            _ => Decision::Allow,
        }
    }
}
