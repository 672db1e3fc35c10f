use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use replisync_core::SyncOptions;

use super::sync_repo::{format_timestamp, parse_timestamp};

/// Persists the watermarks of the last completed run of each sync type.
pub struct SyncStateRepository {
    pool: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct SyncStateRow {
    last_synced_on_client: Option<String>,
    last_synced_on_server: Option<String>,
}

impl SyncStateRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Copies the stored watermarks of `sync_type` into `options`.
    /// Leaves `options` untouched when the type never completed a run.
    pub async fn load_into(&self, sync_type: &str, options: &mut SyncOptions) -> Result<(), sqlx::Error> {
        let row: Option<SyncStateRow> = sqlx::query_as(
            "SELECT last_synced_on_client, last_synced_on_server FROM sync_state WHERE sync_type = ?",
        )
        .bind(sync_type)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = row {
            options.last_synced_on_client = parse_optional(row.last_synced_on_client)?;
            options.last_synced_on_server = parse_optional(row.last_synced_on_server)?;
        }
        Ok(())
    }

    pub async fn save(&self, sync_type: &str, options: &SyncOptions) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO sync_state (sync_type, last_synced_on_client, last_synced_on_server, updated_on)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(sync_type) DO UPDATE SET
                last_synced_on_client = excluded.last_synced_on_client,
                last_synced_on_server = excluded.last_synced_on_server,
                updated_on = excluded.updated_on
            "#,
        )
        .bind(sync_type)
        .bind(options.last_synced_on_client.map(format_timestamp))
        .bind(options.last_synced_on_server.map(format_timestamp))
        .bind(format_timestamp(Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// When each sync type last completed, most recent first.
    pub async fn last_synced(&self) -> Result<Vec<(String, DateTime<Utc>)>, sqlx::Error> {
        let rows: Vec<(String, String)> =
            sqlx::query_as("SELECT sync_type, updated_on FROM sync_state ORDER BY updated_on DESC")
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(sync_type, updated_on)| {
                parse_optional(Some(updated_on)).map(|at| (sync_type, at.unwrap_or_default()))
            })
            .collect()
    }
}

fn parse_optional(value: Option<String>) -> Result<Option<DateTime<Utc>>, sqlx::Error> {
    value
        .map(|v| parse_timestamp(&v).map_err(|e| sqlx::Error::Decode(Box::new(e))))
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use chrono::Duration;
    use replisync_core::SyncDirection;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_unknown_type_leaves_options() {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        let repo = SyncStateRepository::new(pool);

        let mut options = SyncOptions::new(SyncDirection::Both);
        repo.load_into("All", &mut options).await.unwrap();
        assert!(options.last_synced_on_client.is_none());
        assert!(options.last_synced_on_server.is_none());
    }

    #[tokio::test]
    async fn test_save_and_load_watermarks() {
        let temp_dir = tempdir().unwrap();
        let pool = init_db(&temp_dir.path().join("test.db")).await.unwrap();
        let repo = SyncStateRepository::new(pool);

        let client = Utc::now() - Duration::minutes(5);
        let server = Utc::now() - Duration::minutes(2);
        let mut saved = SyncOptions::new(SyncDirection::Both);
        saved.last_synced_on_client = Some(client);
        repo.save("All", &saved).await.unwrap();

        saved.last_synced_on_server = Some(server);
        repo.save("All", &saved).await.unwrap();

        let mut loaded = SyncOptions::new(SyncDirection::Both);
        repo.load_into("All", &mut loaded).await.unwrap();
        assert_eq!(
            loaded.last_synced_on_client.map(format_timestamp),
            Some(format_timestamp(client))
        );
        assert_eq!(
            loaded.last_synced_on_server.map(format_timestamp),
            Some(format_timestamp(server))
        );

        let history = repo.last_synced().await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].0, "All");
    }
}
