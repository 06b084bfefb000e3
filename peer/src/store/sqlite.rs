//! Durable SQLite store.

use super::{new_local_id, now_millis, LocalStore, Result, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::str::FromStr;
use tether_engine::{Metadata, Record, RemoteRecord, Schema, SyncState, Version};

/// Create a connection pool, creating the database file if needed.
pub async fn create_pool(database_url: &str) -> std::result::Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    // Every connection to an in-memory database opens a fresh one
    let max_connections = if database_url.contains(":memory:") {
        1
    } else {
        5
    };

    SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await
}

/// Run database migrations.
pub async fn run_migrations(pool: &SqlitePool) -> std::result::Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

const BY_LOCAL_ID: &str = "SELECT local_id, entity, natural_key, sync_state, remote_id, version, \
     payload, created_at, updated_at FROM records WHERE entity = ? AND local_id = ?";

const BY_NATURAL_KEY: &str = "SELECT local_id, entity, natural_key, sync_state, remote_id, version, \
     payload, created_at, updated_at FROM records WHERE entity = ? AND natural_key = ?";

const BY_REMOTE_ID: &str = "SELECT local_id, entity, natural_key, sync_state, remote_id, version, \
     payload, created_at, updated_at FROM records WHERE entity = ? AND remote_id = ?";

const LIST: &str = "SELECT local_id, entity, natural_key, sync_state, remote_id, version, \
     payload, created_at, updated_at FROM records WHERE entity = ? \
     ORDER BY created_at, local_id";

const PENDING: &str = "SELECT local_id, entity, natural_key, sync_state, remote_id, version, \
     payload, created_at, updated_at FROM records WHERE entity = ? AND sync_state != 'synced' \
     ORDER BY created_at, local_id";

/// A stored record row from the database.
#[derive(Debug)]
struct StoredRecord {
    local_id: String,
    entity: String,
    natural_key: Option<String>,
    sync_state: String,
    remote_id: Option<String>,
    version: i64,
    payload: String,
    created_at: i64,
    updated_at: i64,
}

impl<'r> sqlx::FromRow<'r, SqliteRow> for StoredRecord {
    fn from_row(row: &'r SqliteRow) -> std::result::Result<Self, sqlx::Error> {
        Ok(StoredRecord {
            local_id: row.try_get("local_id")?,
            entity: row.try_get("entity")?,
            natural_key: row.try_get("natural_key")?,
            sync_state: row.try_get("sync_state")?,
            remote_id: row.try_get("remote_id")?,
            version: row.try_get("version")?,
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl StoredRecord {
    /// Convert a database row to an engine Record.
    fn into_record(self) -> Result<Record> {
        let payload = serde_json::from_str(&self.payload).map_err(|e| StoreError::Corrupt {
            local_id: self.local_id.clone(),
            reason: e.to_string(),
        })?;
        let sync_state = SyncState::from_parts(&self.sync_state, self.remote_id)?;

        Ok(Record {
            local_id: self.local_id,
            entity: self.entity,
            natural_key: self.natural_key,
            sync_state,
            version: self.version.max(0) as u64,
            payload,
            metadata: Metadata {
                created_at: self.created_at.max(0) as u64,
                updated_at: self.updated_at.max(0) as u64,
            },
        })
    }
}

async fn fetch_optional(
    conn: &mut SqliteConnection,
    sql: &'static str,
    entity: &str,
    value: &str,
) -> Result<Option<Record>> {
    let row: Option<StoredRecord> = sqlx::query_as(sql)
        .bind(entity)
        .bind(value)
        .fetch_optional(&mut *conn)
        .await?;
    row.map(StoredRecord::into_record).transpose()
}

async fn fetch_all(conn: &mut SqliteConnection, sql: &'static str, entity: &str) -> Result<Vec<Record>> {
    let rows: Vec<StoredRecord> = sqlx::query_as(sql)
        .bind(entity)
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter().map(StoredRecord::into_record).collect()
}

async fn fetch_existing(conn: &mut SqliteConnection, entity: &str, local_id: &str) -> Result<Record> {
    fetch_optional(conn, BY_LOCAL_ID, entity, local_id)
        .await?
        .ok_or_else(|| tether_engine::Error::RecordNotFound(local_id.to_string()).into())
}

/// Fail when `key` is held by a record other than `owner`.
async fn ensure_key_free(
    conn: &mut SqliteConnection,
    entity: &str,
    key: Option<&str>,
    owner: Option<&str>,
) -> Result<()> {
    let Some(key) = key else {
        return Ok(());
    };

    let holder: Option<String> = sqlx::query_scalar(
        "SELECT local_id FROM records WHERE entity = ? AND natural_key = ?",
    )
    .bind(entity)
    .bind(key)
    .fetch_optional(&mut *conn)
    .await?;

    match holder {
        Some(holder) if Some(holder.as_str()) != owner => {
            Err(tether_engine::Error::DuplicateNaturalKey {
                entity: entity.to_string(),
                key: key.to_string(),
            }
            .into())
        }
        _ => Ok(()),
    }
}

/// Insert or update a record row.
async fn write_record(conn: &mut SqliteConnection, record: &Record) -> Result<()> {
    let payload = serde_json::to_string(&record.payload).map_err(|e| StoreError::Corrupt {
        local_id: record.local_id.clone(),
        reason: e.to_string(),
    })?;

    sqlx::query(
        r#"
        INSERT INTO records (
            local_id, entity, natural_key, sync_state, remote_id,
            version, payload, created_at, updated_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (local_id) DO UPDATE SET
            natural_key = excluded.natural_key,
            sync_state = excluded.sync_state,
            remote_id = excluded.remote_id,
            version = excluded.version,
            payload = excluded.payload,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&record.local_id)
    .bind(&record.entity)
    .bind(record.natural_key.as_deref())
    .bind(record.sync_state.as_str())
    .bind(record.remote_id().map(String::as_str))
    .bind(record.version as i64)
    .bind(payload)
    .bind(record.metadata.created_at as i64)
    .bind(record.metadata.updated_at as i64)
    .execute(&mut *conn)
    .await
    .map_err(|e| write_error(e, record))?;

    Ok(())
}

/// Unique index violations surface as the engine's natural key error.
fn write_error(err: sqlx::Error, record: &Record) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() && db.message().contains("natural_key") {
            if let Some(key) = &record.natural_key {
                return tether_engine::Error::DuplicateNaturalKey {
                    entity: record.entity.clone(),
                    key: key.clone(),
                }
                .into();
            }
        }
    }
    err.into()
}

/// [`LocalStore`] backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    schema: Schema,
}

impl SqliteStore {
    /// Wrap a migrated pool.
    pub fn new(pool: SqlitePool, schema: Schema) -> Self {
        Self { pool, schema }
    }

    /// Connect, migrate and wrap in one step.
    pub async fn open(database_url: &str, schema: Schema) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        tracing::info!("Running database migrations...");
        run_migrations(&pool).await?;
        Ok(Self::new(pool, schema))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl LocalStore for SqliteStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, entity: &str, payload: serde_json::Value) -> Result<Record> {
        let natural_key = self.schema.entity(entity)?.validate_payload(&payload)?;

        let mut tx = self.pool.begin().await?;
        ensure_key_free(&mut tx, entity, natural_key.as_deref(), None).await?;

        let record = Record::new_local(new_local_id(), entity, natural_key, payload, now_millis());
        write_record(&mut tx, &record).await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn get(&self, entity: &str, local_id: &str) -> Result<Option<Record>> {
        self.schema.entity(entity)?;
        let mut conn = self.pool.acquire().await?;
        fetch_optional(&mut conn, BY_LOCAL_ID, entity, local_id).await
    }

    async fn list(&self, entity: &str) -> Result<Vec<Record>> {
        self.schema.entity(entity)?;
        let mut conn = self.pool.acquire().await?;
        fetch_all(&mut conn, LIST, entity).await
    }

    async fn pending(&self, entity: &str) -> Result<Vec<Record>> {
        self.schema.entity(entity)?;
        let mut conn = self.pool.acquire().await?;
        fetch_all(&mut conn, PENDING, entity).await
    }

    async fn find_by_natural_key(&self, entity: &str, key: &str) -> Result<Option<Record>> {
        self.schema.entity(entity)?;
        let mut conn = self.pool.acquire().await?;
        fetch_optional(&mut conn, BY_NATURAL_KEY, entity, key).await
    }

    async fn find_by_remote_id(&self, entity: &str, remote_id: &str) -> Result<Option<Record>> {
        self.schema.entity(entity)?;
        let mut conn = self.pool.acquire().await?;
        fetch_optional(&mut conn, BY_REMOTE_ID, entity, remote_id).await
    }

    async fn update(
        &self,
        entity: &str,
        local_id: &str,
        payload: serde_json::Value,
    ) -> Result<Record> {
        let natural_key = self.schema.entity(entity)?.validate_payload(&payload)?;

        let mut tx = self.pool.begin().await?;
        let mut record = fetch_existing(&mut tx, entity, local_id).await?;
        ensure_key_free(&mut tx, entity, natural_key.as_deref(), Some(local_id)).await?;

        record.update_payload(payload, natural_key, now_millis());
        write_record(&mut tx, &record).await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn mark_synced(
        &self,
        entity: &str,
        local_id: &str,
        remote_id: &str,
        pushed_version: Version,
    ) -> Result<Record> {
        self.schema.entity(entity)?;

        let mut tx = self.pool.begin().await?;
        let mut record = fetch_existing(&mut tx, entity, local_id).await?;
        record.mark_synced(remote_id, pushed_version, now_millis());
        write_record(&mut tx, &record).await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn upsert_remote(
        &self,
        entity: &str,
        existing: Option<&str>,
        remote: &RemoteRecord,
    ) -> Result<Record> {
        self.schema.entity(entity)?;

        let mut tx = self.pool.begin().await?;
        let owner = match existing {
            Some(local_id) => Some(fetch_existing(&mut tx, entity, local_id).await?),
            None => fetch_optional(&mut tx, BY_REMOTE_ID, entity, &remote.id).await?,
        };
        ensure_key_free(
            &mut tx,
            entity,
            remote.natural_key.as_deref(),
            owner.as_ref().map(|r| r.local_id.as_str()),
        )
        .await?;

        let timestamp = now_millis();
        let record = match owner {
            Some(mut record) => {
                record.apply_remote(remote, timestamp);
                record
            }
            None => Record::from_remote(new_local_id(), entity, remote, timestamp),
        };
        write_record(&mut tx, &record).await?;
        tx.commit().await?;

        Ok(record)
    }

    async fn remove(&self, entity: &str, local_id: &str) -> Result<Option<Record>> {
        self.schema.entity(entity)?;

        let mut tx = self.pool.begin().await?;
        let record = fetch_optional(&mut tx, BY_LOCAL_ID, entity, local_id).await?;
        if record.is_some() {
            sqlx::query("DELETE FROM records WHERE entity = ? AND local_id = ?")
                .bind(entity)
                .bind(local_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        Ok(record)
    }
}
