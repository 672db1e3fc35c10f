use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::error::ErrorKind;
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

use replisync_core::{
    AccountEntity, AddressEntity, ChangeQuery, EntityStore, RepositoryError, SyncEntity, SyncMeta,
    SyncTombstone, TombstoneStore,
};

/// SQLite-backed replica of every synced type plus its tombstones.
///
/// An authoritative repository stamps `modified_on` itself on every write;
/// a replica keeps the value it is given so pulled changes are not echoed
/// back as new local edits.
#[derive(Clone)]
pub struct SqliteRepository {
    pool: SqlitePool,
    maintain_modified_on: bool,
}

// Row types for database queries
#[derive(sqlx::FromRow)]
struct AccountRow {
    id: i64,
    sync_id: String,
    name: String,
    email_address: String,
    roles: String,
    password_hash: Option<String>,
    created_on: String,
    modified_on: String,
    is_deleted: bool,
}

#[derive(sqlx::FromRow)]
struct AddressRow {
    id: i64,
    sync_id: String,
    account_sync_id: String,
    line1: String,
    line2: String,
    city: String,
    postal: String,
    state: String,
    created_on: String,
    modified_on: String,
    is_deleted: bool,
}

#[derive(sqlx::FromRow)]
struct TombstoneRow {
    sync_id: String,
    type_name: String,
    reference_id: String,
    created_on: String,
}

impl AccountRow {
    fn into_entity(self) -> Result<AccountEntity, RepositoryError> {
        Ok(AccountEntity {
            meta: meta(
                self.id,
                &self.sync_id,
                &self.created_on,
                &self.modified_on,
                self.is_deleted,
            )?,
            name: self.name,
            email_address: self.email_address,
            roles: serde_json::from_str(&self.roles).unwrap_or_default(),
            password_hash: self.password_hash,
        })
    }
}

impl AddressRow {
    fn into_entity(self) -> Result<AddressEntity, RepositoryError> {
        Ok(AddressEntity {
            meta: meta(
                self.id,
                &self.sync_id,
                &self.created_on,
                &self.modified_on,
                self.is_deleted,
            )?,
            account_sync_id: parse_sync_id(&self.account_sync_id)?,
            line1: self.line1,
            line2: self.line2,
            city: self.city,
            postal: self.postal,
            state: self.state,
        })
    }
}

impl TombstoneRow {
    fn into_tombstone(self) -> Result<SyncTombstone, RepositoryError> {
        Ok(SyncTombstone {
            sync_id: parse_sync_id(&self.sync_id)?,
            type_name: self.type_name,
            reference_id: self.reference_id,
            created_on: parse_timestamp(&self.created_on)?,
        })
    }
}

impl SqliteRepository {
    /// A replica that keeps whatever `modified_on` it is given.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            maintain_modified_on: false,
        }
    }

    /// A repository that stamps `modified_on` on every write.
    pub fn authoritative(pool: SqlitePool) -> Self {
        Self {
            pool,
            maintain_modified_on: true,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn list_accounts(
        &self,
        include_deleted: bool,
    ) -> Result<Vec<AccountEntity>, RepositoryError> {
        let rows: Vec<AccountRow> = sqlx::query_as(
            "SELECT * FROM accounts WHERE is_deleted = 0 OR ? ORDER BY LOWER(name), id",
        )
        .bind(include_deleted)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(AccountRow::into_entity).collect()
    }

    /// Looks an account up by sync id or, failing that, by case-insensitive name.
    pub async fn find_account(&self, key: &str) -> Result<Option<AccountEntity>, RepositoryError> {
        if let Ok(sync_id) = Uuid::parse_str(key) {
            if let Some(account) = self.account(sync_id).await? {
                return Ok(Some(account));
            }
        }

        let row: Option<AccountRow> = sqlx::query_as(
            "SELECT * FROM accounts WHERE LOWER(name) = LOWER(?) ORDER BY is_deleted, id LIMIT 1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        row.map(AccountRow::into_entity).transpose()
    }

    pub async fn list_addresses(
        &self,
        account_sync_id: Option<Uuid>,
        include_deleted: bool,
    ) -> Result<Vec<AddressEntity>, RepositoryError> {
        let rows: Vec<AddressRow> = match account_sync_id {
            Some(account) => {
                sqlx::query_as(
                    "SELECT * FROM addresses WHERE account_sync_id = ? AND (is_deleted = 0 OR ?) ORDER BY id",
                )
                .bind(account.to_string())
                .bind(include_deleted)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as("SELECT * FROM addresses WHERE is_deleted = 0 OR ? ORDER BY id")
                    .bind(include_deleted)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(storage)?;

        rows.into_iter().map(AddressRow::into_entity).collect()
    }

    pub async fn account(&self, sync_id: Uuid) -> Result<Option<AccountEntity>, RepositoryError> {
        let row: Option<AccountRow> = sqlx::query_as("SELECT * FROM accounts WHERE sync_id = ?")
            .bind(sync_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(AccountRow::into_entity).transpose()
    }

    pub async fn address(&self, sync_id: Uuid) -> Result<Option<AddressEntity>, RepositoryError> {
        let row: Option<AddressRow> = sqlx::query_as("SELECT * FROM addresses WHERE sync_id = ?")
            .bind(sync_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(AddressRow::into_entity).transpose()
    }

    fn stamp(&self, meta: &mut SyncMeta) {
        if self.maintain_modified_on {
            meta.modified_on = Utc::now();
        }
    }

    async fn count_in(&self, table: &str, query: &ChangeQuery<'_>) -> Result<usize, RepositoryError> {
        let (clause, binds) = window(query);
        let sql = format!("SELECT COUNT(*) FROM {} WHERE {}", table, clause);

        let mut count = sqlx::query_scalar::<_, i64>(&sql);
        for value in &binds {
            count = count.bind(value);
        }
        let count = count.fetch_one(&self.pool).await.map_err(storage)?;
        Ok(count.max(0) as usize)
    }

    async fn fetch_in<T>(&self, table: &str, query: &ChangeQuery<'_>) -> Result<Vec<T>, RepositoryError>
    where
        T: for<'r> FromRow<'r, SqliteRow> + Send + Unpin,
    {
        let (clause, binds) = window(query);
        let sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY modified_on, id LIMIT ? OFFSET ?",
            table, clause
        );

        let mut rows = sqlx::query_as::<_, T>(&sql);
        for value in &binds {
            rows = rows.bind(value);
        }
        rows.bind(to_i64(query.take))
            .bind(to_i64(query.skip))
            .fetch_all(&self.pool)
            .await
            .map_err(storage)
    }

    async fn delete_row(&self, table: &str, sync_id: Uuid) -> Result<(), RepositoryError> {
        let sql = format!("DELETE FROM {} WHERE sync_id = ?", table);
        let result = sqlx::query(&sql)
            .bind(sync_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| write_error(e, || RepositoryError::InUse(sync_id)))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(sync_id));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore<AccountEntity> for SqliteRepository {
    async fn get_by_sync_id(&self, sync_id: Uuid) -> Result<Option<AccountEntity>, RepositoryError> {
        self.account(sync_id).await
    }

    async fn add(&self, mut entity: AccountEntity) -> Result<AccountEntity, RepositoryError> {
        self.stamp(&mut entity.meta);
        let sync_id = entity.meta.sync_id;
        let roles = serde_json::to_string(&entity.roles).unwrap_or_else(|_| "[]".to_string());

        sqlx::query(
            r#"
            INSERT INTO accounts (sync_id, name, email_address, roles, password_hash, created_on, modified_on, is_deleted)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sync_id.to_string())
        .bind(&entity.name)
        .bind(&entity.email_address)
        .bind(&roles)
        .bind(&entity.password_hash)
        .bind(format_timestamp(entity.meta.created_on))
        .bind(format_timestamp(entity.meta.modified_on))
        .bind(entity.meta.is_deleted)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, || RepositoryError::Constraint("account references a missing row".to_string())))?;

        self.account(sync_id)
            .await?
            .ok_or(RepositoryError::NotFound(sync_id))
    }

    async fn update(&self, mut entity: AccountEntity) -> Result<AccountEntity, RepositoryError> {
        self.stamp(&mut entity.meta);
        let sync_id = entity.meta.sync_id;
        let roles = serde_json::to_string(&entity.roles).unwrap_or_else(|_| "[]".to_string());

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET name = ?, email_address = ?, roles = ?, password_hash = ?,
                created_on = ?, modified_on = ?, is_deleted = ?
            WHERE sync_id = ?
            "#,
        )
        .bind(&entity.name)
        .bind(&entity.email_address)
        .bind(&roles)
        .bind(&entity.password_hash)
        .bind(format_timestamp(entity.meta.created_on))
        .bind(format_timestamp(entity.meta.modified_on))
        .bind(entity.meta.is_deleted)
        .bind(sync_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, || RepositoryError::Constraint("account references a missing row".to_string())))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(sync_id));
        }
        self.account(sync_id)
            .await?
            .ok_or(RepositoryError::NotFound(sync_id))
    }

    async fn remove(&self, entity: &AccountEntity) -> Result<(), RepositoryError> {
        self.delete_row("accounts", entity.meta.sync_id).await
    }

    async fn count_changed(&self, query: &ChangeQuery<'_>) -> Result<usize, RepositoryError> {
        self.count_in("accounts", query).await
    }

    async fn query_changed(&self, query: &ChangeQuery<'_>) -> Result<Vec<AccountEntity>, RepositoryError> {
        self.fetch_in::<AccountRow>("accounts", query)
            .await?
            .into_iter()
            .map(AccountRow::into_entity)
            .collect()
    }
}

#[async_trait]
impl EntityStore<AddressEntity> for SqliteRepository {
    async fn get_by_sync_id(&self, sync_id: Uuid) -> Result<Option<AddressEntity>, RepositoryError> {
        self.address(sync_id).await
    }

    async fn add(&self, mut entity: AddressEntity) -> Result<AddressEntity, RepositoryError> {
        self.stamp(&mut entity.meta);
        let sync_id = entity.meta.sync_id;
        let account_sync_id = entity.account_sync_id;

        sqlx::query(
            r#"
            INSERT INTO addresses (sync_id, account_sync_id, line1, line2, city, postal, state, created_on, modified_on, is_deleted)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(sync_id.to_string())
        .bind(account_sync_id.to_string())
        .bind(&entity.line1)
        .bind(&entity.line2)
        .bind(&entity.city)
        .bind(&entity.postal)
        .bind(&entity.state)
        .bind(format_timestamp(entity.meta.created_on))
        .bind(format_timestamp(entity.meta.modified_on))
        .bind(entity.meta.is_deleted)
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, || missing_account(account_sync_id)))?;

        self.address(sync_id)
            .await?
            .ok_or(RepositoryError::NotFound(sync_id))
    }

    async fn update(&self, mut entity: AddressEntity) -> Result<AddressEntity, RepositoryError> {
        self.stamp(&mut entity.meta);
        let sync_id = entity.meta.sync_id;
        let account_sync_id = entity.account_sync_id;

        let result = sqlx::query(
            r#"
            UPDATE addresses
            SET account_sync_id = ?, line1 = ?, line2 = ?, city = ?, postal = ?, state = ?,
                created_on = ?, modified_on = ?, is_deleted = ?
            WHERE sync_id = ?
            "#,
        )
        .bind(account_sync_id.to_string())
        .bind(&entity.line1)
        .bind(&entity.line2)
        .bind(&entity.city)
        .bind(&entity.postal)
        .bind(&entity.state)
        .bind(format_timestamp(entity.meta.created_on))
        .bind(format_timestamp(entity.meta.modified_on))
        .bind(entity.meta.is_deleted)
        .bind(sync_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| write_error(e, || missing_account(account_sync_id)))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(sync_id));
        }
        self.address(sync_id)
            .await?
            .ok_or(RepositoryError::NotFound(sync_id))
    }

    async fn remove(&self, entity: &AddressEntity) -> Result<(), RepositoryError> {
        self.delete_row("addresses", entity.meta.sync_id).await
    }

    async fn count_changed(&self, query: &ChangeQuery<'_>) -> Result<usize, RepositoryError> {
        self.count_in("addresses", query).await
    }

    async fn query_changed(&self, query: &ChangeQuery<'_>) -> Result<Vec<AddressEntity>, RepositoryError> {
        self.fetch_in::<AddressRow>("addresses", query)
            .await?
            .into_iter()
            .map(AddressRow::into_entity)
            .collect()
    }
}

#[async_trait]
impl TombstoneStore for SqliteRepository {
    async fn record_tombstone(&self, tombstone: SyncTombstone) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO tombstones (sync_id, type_name, reference_id, created_on) VALUES (?, ?, ?, ?)",
        )
        .bind(tombstone.sync_id.to_string())
        .bind(&tombstone.type_name)
        .bind(&tombstone.reference_id)
        .bind(format_timestamp(tombstone.created_on))
        .execute(&self.pool)
        .await
        .map_err(storage)?;
        Ok(())
    }

    async fn count_tombstones(
        &self,
        type_name: &str,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
    ) -> Result<usize, RepositoryError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM tombstones WHERE type_name = ? AND created_on >= ? AND created_on < ?",
        )
        .bind(type_name)
        .bind(since.map(format_timestamp).unwrap_or_default())
        .bind(format_timestamp(until))
        .fetch_one(&self.pool)
        .await
        .map_err(storage)?;
        Ok(count.max(0) as usize)
    }

    async fn query_tombstones(
        &self,
        type_name: &str,
        since: Option<DateTime<Utc>>,
        until: DateTime<Utc>,
        skip: usize,
        take: usize,
    ) -> Result<Vec<SyncTombstone>, RepositoryError> {
        let rows: Vec<TombstoneRow> = sqlx::query_as(
            r#"
            SELECT sync_id, type_name, reference_id, created_on FROM tombstones
            WHERE type_name = ? AND created_on >= ? AND created_on < ?
            ORDER BY created_on, id
            LIMIT ? OFFSET ?
            "#,
        )
        .bind(type_name)
        .bind(since.map(format_timestamp).unwrap_or_default())
        .bind(format_timestamp(until))
        .bind(to_i64(take))
        .bind(to_i64(skip))
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.into_iter().map(TombstoneRow::into_tombstone).collect()
    }

    async fn purge_tombstones(&self, before: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let result = sqlx::query("DELETE FROM tombstones WHERE created_on < ?")
            .bind(format_timestamp(before))
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(result.rows_affected() as usize)
    }
}

/// Fixed-width UTC text, so string order is chronological order.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(value)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Storage(format!("invalid timestamp '{}': {}", value, e)))
}

fn parse_sync_id(value: &str) -> Result<Uuid, RepositoryError> {
    Uuid::parse_str(value)
        .map_err(|e| RepositoryError::Storage(format!("invalid sync id '{}': {}", value, e)))
}

fn meta(
    id: i64,
    sync_id: &str,
    created_on: &str,
    modified_on: &str,
    is_deleted: bool,
) -> Result<SyncMeta, RepositoryError> {
    Ok(SyncMeta {
        id,
        sync_id: parse_sync_id(sync_id)?,
        created_on: parse_timestamp(created_on)?,
        modified_on: parse_timestamp(modified_on)?,
        is_deleted,
    })
}

/// `WHERE` clause and its bind values for a change window.
fn window(query: &ChangeQuery<'_>) -> (String, Vec<String>) {
    let mut clause = String::from("modified_on < ?");
    let mut binds = vec![format_timestamp(query.until)];

    if let Some(since) = query.since {
        clause.push_str(" AND modified_on >= ?");
        binds.push(format_timestamp(since));
    }
    if let Some(ids) = query.sync_ids {
        let placeholders = vec!["?"; ids.len()].join(", ");
        clause.push_str(&format!(" AND sync_id IN ({})", placeholders));
        binds.extend(ids.iter().map(Uuid::to_string));
    }
    (clause, binds)
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn storage(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Storage(e.to_string())
}

fn missing_account(account_sync_id: Uuid) -> RepositoryError {
    RepositoryError::RelationshipNotFound {
        type_name: AccountEntity::TYPE_NAME.to_string(),
        sync_id: account_sync_id,
    }
}

/// Maps constraint failures onto item errors; anything else is a storage failure.
fn write_error(e: sqlx::Error, on_foreign_key: impl FnOnce() -> RepositoryError) -> RepositoryError {
    if let sqlx::Error::Database(db) = &e {
        let foreign_key = matches!(db.kind(), ErrorKind::ForeignKeyViolation)
            || db.message().contains("FOREIGN KEY constraint failed");
        if foreign_key {
            return on_foreign_key();
        }
        if matches!(
            db.kind(),
            ErrorKind::UniqueViolation | ErrorKind::CheckViolation | ErrorKind::NotNullViolation
        ) {
            return RepositoryError::Constraint(db.message().to_string());
        }
    }
    storage(e)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use chrono::Duration;
    use replisync_core::{delete_permanently, SyncModel};
    use tempfile::{tempdir, TempDir};

    async fn setup() -> (SqliteRepository, TempDir) {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        (SqliteRepository::new(pool), temp_dir)
    }

    #[tokio::test]
    async fn test_add_and_get_account() {
        let (repo, _temp) = setup().await;
        let mut account = AccountEntity::new("John")
            .with_email("john@example.com")
            .with_roles(vec!["Administrator".to_string()]);
        account.password_hash = Some("hash".to_string());

        let saved = repo.add(account.clone()).await.unwrap();
        assert!(saved.meta.id > 0);
        assert_eq!(saved.name, "John");
        assert_eq!(saved.roles, vec!["Administrator".to_string()]);
        assert_eq!(saved.password_hash.as_deref(), Some("hash"));

        let loaded = repo.account(account.sync_id()).await.unwrap().unwrap();
        assert_eq!(loaded, saved);
    }

    #[tokio::test]
    async fn test_replica_keeps_modified_on() {
        let (repo, _temp) = setup().await;
        let mut account = AccountEntity::new("John");
        account.meta.modified_on = Utc::now() - Duration::days(3);

        let saved = repo.add(account.clone()).await.unwrap();
        assert_eq!(
            format_timestamp(saved.meta.modified_on),
            format_timestamp(account.meta.modified_on)
        );
    }

    #[tokio::test]
    async fn test_authoritative_stamps_modified_on() {
        let (replica, _temp) = setup().await;
        let repo = SqliteRepository::authoritative(replica.pool().clone());
        let mut account = AccountEntity::new("John");
        account.meta.modified_on = Utc::now() - Duration::days(3);

        let saved = repo.add(account).await.unwrap();
        assert!(saved.meta.modified_on > Utc::now() - Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_address_requires_account() {
        let (repo, _temp) = setup().await;
        let missing = Uuid::new_v4();
        let address = AddressEntity::new(missing, "1 Main St");

        let err = repo.add(address).await.unwrap_err();
        assert_eq!(
            err,
            RepositoryError::RelationshipNotFound {
                type_name: AccountEntity::TYPE_NAME.to_string(),
                sync_id: missing,
            }
        );
    }

    #[tokio::test]
    async fn test_referenced_account_is_in_use() {
        let (repo, _temp) = setup().await;
        let account = repo.add(AccountEntity::new("John")).await.unwrap();
        repo.add(AddressEntity::new(account.sync_id(), "1 Main St"))
            .await
            .unwrap();

        let err = EntityStore::<AccountEntity>::remove(&repo, &account)
            .await
            .unwrap_err();
        assert_eq!(err, RepositoryError::InUse(account.sync_id()));
    }

    #[tokio::test]
    async fn test_duplicate_sync_id_is_constraint() {
        let (repo, _temp) = setup().await;
        let account = AccountEntity::new("John");
        repo.add(account.clone()).await.unwrap();

        let err = repo.add(account).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Constraint(_)));
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let (repo, _temp) = setup().await;
        let account = AccountEntity::new("Ghost");

        let err = repo.update(account.clone()).await.unwrap_err();
        assert_eq!(err, RepositoryError::NotFound(account.sync_id()));
    }

    #[tokio::test]
    async fn test_changes_window_and_paging() {
        let (repo, _temp) = setup().await;
        let base = Utc::now() - Duration::hours(1);
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut account = AccountEntity::new(format!("Account {}", i));
            account.meta.modified_on = base + Duration::minutes(i);
            ids.push(account.sync_id());
            repo.add(account).await.unwrap();
        }

        let query = ChangeQuery::new(Some(base + Duration::minutes(1)), base + Duration::minutes(4));
        assert_eq!(EntityStore::<AccountEntity>::count_changed(&repo, &query).await.unwrap(), 3);

        let page: Vec<AccountEntity> = repo.query_changed(&query.page(1, 5)).await.unwrap();
        let names: Vec<&str> = page.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Account 2", "Account 3"]);

        let wanted = [ids[0], ids[3]];
        let restricted = ChangeQuery::new(None, Utc::now()).restrict(Some(&wanted));
        let page: Vec<AccountEntity> = repo.query_changed(&restricted).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].sync_id(), ids[0]);
    }

    #[tokio::test]
    async fn test_tombstones() {
        let (repo, _temp) = setup().await;
        let account = repo.add(AccountEntity::new("John")).await.unwrap();
        delete_permanently(&repo, &account).await.unwrap();

        assert!(repo.account(account.sync_id()).await.unwrap().is_none());

        let later = Utc::now() + Duration::seconds(1);
        let count = repo
            .count_tombstones(AccountEntity::TYPE_NAME, None, later)
            .await
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            repo.count_tombstones(AddressEntity::TYPE_NAME, None, later)
                .await
                .unwrap(),
            0
        );

        let tombstones = repo
            .query_tombstones(AccountEntity::TYPE_NAME, None, later, 0, 10)
            .await
            .unwrap();
        assert_eq!(tombstones[0].sync_id, account.sync_id());
        assert_eq!(tombstones[0].reference_id, account.meta.id.to_string());

        assert_eq!(repo.purge_tombstones(later).await.unwrap(), 1);
        assert_eq!(
            repo.count_tombstones(AccountEntity::TYPE_NAME, None, later)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_list_and_find_accounts() {
        let (repo, _temp) = setup().await;
        let bob = repo.add(AccountEntity::new("bob")).await.unwrap();
        let mut alice = AccountEntity::new("Alice");
        alice.meta.is_deleted = true;
        repo.add(alice).await.unwrap();

        let active = repo.list_accounts(false).await.unwrap();
        assert_eq!(active.len(), 1);
        let all = repo.list_accounts(true).await.unwrap();
        assert_eq!(all[0].name, "Alice");

        let found = repo.find_account("BOB").await.unwrap().unwrap();
        assert_eq!(found.sync_id(), bob.sync_id());
        let found = repo
            .find_account(&bob.sync_id().to_string())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.name, "bob");
        assert!(repo.find_account("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_addresses_by_account() {
        let (repo, _temp) = setup().await;
        let john = repo.add(AccountEntity::new("John")).await.unwrap();
        let jane = repo.add(AccountEntity::new("Jane")).await.unwrap();
        repo.add(AddressEntity::new(john.sync_id(), "1 Main St"))
            .await
            .unwrap();
        repo.add(AddressEntity::new(jane.sync_id(), "2 Side St"))
            .await
            .unwrap();

        let johns = repo
            .list_addresses(Some(john.sync_id()), false)
            .await
            .unwrap();
        assert_eq!(johns.len(), 1);
        assert_eq!(johns[0].line1, "1 Main St");
        assert_eq!(repo.list_addresses(None, false).await.unwrap().len(), 2);
    }
}
