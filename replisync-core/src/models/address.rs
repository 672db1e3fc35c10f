use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::account::AccountEntity;
use crate::converter::Converter;
use crate::model::{SyncDependency, SyncEntity, SyncMeta, SyncModel, SyncObjectStatus};

/// Stored postal address belonging to an account.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressEntity {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub account_sync_id: Uuid,
    pub line1: String,
    pub line2: String,
    pub city: String,
    pub postal: String,
    pub state: String,
}

impl AddressEntity {
    pub fn new(account_sync_id: Uuid, line1: impl Into<String>) -> Self {
        Self {
            meta: SyncMeta::new(),
            account_sync_id,
            line1: line1.into(),
            ..Self::default()
        }
    }

    pub fn with_city(mut self, city: impl Into<String>) -> Self {
        self.city = city.into();
        self
    }

    pub fn with_postal(mut self, postal: impl Into<String>) -> Self {
        self.postal = postal.into();
        self
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }
}

impl SyncModel for AddressEntity {
    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }
}

impl SyncEntity for AddressEntity {
    const TYPE_NAME: &'static str = "replisync.Address";
    const DEPENDS_ON: &'static [&'static str] = &[AccountEntity::TYPE_NAME];

    fn dependencies(&self) -> Vec<SyncDependency> {
        vec![SyncDependency::new(
            AccountEntity::TYPE_NAME,
            self.account_sync_id,
        )]
    }

    fn validate(&self) -> Result<(), String> {
        if self.line1.trim().is_empty() {
            return Err("address line1 is required".to_string());
        }
        if self.account_sync_id.is_nil() {
            return Err("address must belong to an account".to_string());
        }
        Ok(())
    }
}

impl fmt::Display for AddressEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<&str> = [
            self.line1.as_str(),
            self.line2.as_str(),
            self.city.as_str(),
            self.state.as_str(),
            self.postal.as_str(),
        ]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
        write!(f, "{}", parts.join(", "))
    }
}

/// Address as exchanged with peers.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Address {
    #[serde(flatten)]
    pub meta: SyncMeta,
    pub account_sync_id: Uuid,
    pub line1: String,
    pub line2: String,
    pub city: String,
    pub postal: String,
    pub state: String,
}

impl SyncModel for Address {
    fn meta(&self) -> &SyncMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SyncMeta {
        &mut self.meta
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AddressConverter;

impl Converter<Address, AddressEntity> for AddressConverter {
    fn to_public(&self, internal: &AddressEntity) -> Address {
        Address {
            meta: internal.meta.clone(),
            account_sync_id: internal.account_sync_id,
            line1: internal.line1.clone(),
            line2: internal.line2.clone(),
            city: internal.city.clone(),
            postal: internal.postal.clone(),
            state: internal.state.clone(),
        }
    }

    fn update_internal(
        &self,
        public: &Address,
        internal: &mut AddressEntity,
        _status: SyncObjectStatus,
    ) {
        internal.account_sync_id = public.account_sync_id;
        internal.line1 = public.line1.clone();
        internal.line2 = public.line2.clone();
        internal.city = public.city.clone();
        internal.postal = public.postal.clone();
        internal.state = public.state.clone();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_depends_on_account() {
        let account = Uuid::new_v4();
        let address = AddressEntity::new(account, "Hello World");

        assert_eq!(AddressEntity::DEPENDS_ON, &["replisync.Account"]);
        assert_eq!(
            address.dependencies(),
            vec![SyncDependency::new("replisync.Account", account)]
        );
    }

    #[test]
    fn test_validate() {
        assert!(AddressEntity::new(Uuid::new_v4(), "Hello World")
            .validate()
            .is_ok());
        assert!(AddressEntity::new(Uuid::new_v4(), "").validate().is_err());
        assert!(AddressEntity::new(Uuid::nil(), "Foo Bar").validate().is_err());
    }

    #[test]
    fn test_display_skips_empty_parts() {
        let address = AddressEntity::new(Uuid::new_v4(), "1 Main St")
            .with_city("Springfield")
            .with_postal("12345");
        assert_eq!(address.to_string(), "1 Main St, Springfield, 12345");
    }

    #[test]
    fn test_converter_copies_fields() {
        let entity = AddressEntity::new(Uuid::new_v4(), "Foo Bar").with_state("WI");
        let public = AddressConverter.to_public(&entity);

        let mut copy = AddressEntity::default();
        AddressConverter.update_internal(&public, &mut copy, SyncObjectStatus::Added);
        assert_eq!(copy.line1, "Foo Bar");
        assert_eq!(copy.state, "WI");
        assert_eq!(copy.account_sync_id, entity.account_sync_id);
        assert!(copy.meta.sync_id.is_nil());
    }
}
