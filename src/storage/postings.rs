//! Persistence of evaluated postings
//!
//! Writes are upserts keyed by posting id. Every write stamps a fresh
//! `inserted_at` and resets `processed` to `false`, so a re-evaluated
//! posting shows up for review again.
//!
//! # Usage
//!
//! ```rust,ignore
//! let store = PostgresPostingStore::connect(&config.persistence).await?;
//! store.ensure_schema().await?;
//! store.upsert(&posting).await?;
//! ```

use async_trait::async_trait;
use chrono::Utc;
use deadpool_postgres::{Config as PoolConfig, ManagerConfig, Pool, RecyclingMethod, Runtime};
use std::collections::HashMap;
use std::sync::RwLock;
use tokio_postgres::{NoTls, Row};

use crate::config::PersistenceConfig;
use crate::models::{Posting, StoredPosting};
use crate::utils::error::SinkError;

/// Store of evaluated postings and their review state
#[async_trait]
pub trait PostingStore: Send + Sync {
    /// Insert or replace the record for `posting.id`
    async fn upsert(&self, posting: &Posting) -> Result<(), SinkError>;

    /// Fetch one record
    async fn get(&self, id: &str) -> Result<Option<StoredPosting>, SinkError>;

    /// Records not yet reviewed, newest first
    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<StoredPosting>, SinkError>;

    /// Number of records not yet reviewed
    async fn count_unprocessed(&self) -> Result<u64, SinkError>;

    /// Mark a record reviewed; returns whether it existed
    async fn mark_processed(&self, id: &str) -> Result<bool, SinkError>;
}

// ============================================================================
// PostgreSQL
// ============================================================================

/// [`PostingStore`] backed by PostgreSQL
pub struct PostgresPostingStore {
    pool: Pool,
    table: String,
}

impl PostgresPostingStore {
    /// Create the connection pool (connections are opened lazily)
    pub fn new(config: &PersistenceConfig) -> Result<Self, SinkError> {
        if !is_identifier(&config.table) {
            return Err(SinkError::InvalidConfig(format!(
                "invalid table name '{}'",
                config.table
            )));
        }

        let mut cfg = PoolConfig::new();
        cfg.url = Some(config.postgres_url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(config.pool_size));

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| SinkError::Pool(e.to_string()))?;

        Ok(Self {
            pool,
            table: config.table.clone(),
        })
    }

    /// Create the table if it does not exist
    pub async fn ensure_schema(&self) -> Result<(), SinkError> {
        let client = self.pool.get().await?;
        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT NOT NULL,
                    link TEXT NOT NULL,
                    company TEXT NOT NULL,
                    reasoning TEXT NOT NULL,
                    is_qualified BOOLEAN NOT NULL,
                    inserted_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                    processed BOOLEAN NOT NULL DEFAULT false
                );
                CREATE INDEX IF NOT EXISTS {table}_unprocessed_idx
                    ON {table} (inserted_at DESC) WHERE NOT processed;",
                table = self.table
            ))
            .await?;
        Ok(())
    }

    fn row_to_stored(row: &Row) -> StoredPosting {
        StoredPosting {
            id: row.get("id"),
            title: row.get("title"),
            description: row.get("description"),
            link: row.get("link"),
            company: row.get("company"),
            reasoning: row.get("reasoning"),
            is_qualified: row.get("is_qualified"),
            inserted_at: row.get("inserted_at"),
            processed: row.get("processed"),
        }
    }
}

/// `LIMIT` parameter for a row count, saturating at the largest BIGINT
fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.starts_with(|c: char| c.is_ascii_digit())
}

#[async_trait]
impl PostingStore for PostgresPostingStore {
    async fn upsert(&self, posting: &Posting) -> Result<(), SinkError> {
        let evaluation = posting
            .evaluation
            .as_ref()
            .ok_or_else(|| SinkError::MissingEvaluation(posting.id.clone()))?;

        let client = self.pool.get().await?;
        let sql = format!(
            "INSERT INTO {} (id, title, description, link, company, reasoning, is_qualified, inserted_at, processed)
             VALUES ($1, $2, $3, $4, $5, $6, $7, now(), false)
             ON CONFLICT (id) DO UPDATE SET
                title = EXCLUDED.title,
                description = EXCLUDED.description,
                link = EXCLUDED.link,
                company = EXCLUDED.company,
                reasoning = EXCLUDED.reasoning,
                is_qualified = EXCLUDED.is_qualified,
                inserted_at = now(),
                processed = false",
            self.table
        );

        client
            .execute(
                &sql,
                &[
                    &posting.id,
                    &posting.title,
                    &posting.description,
                    &posting.link,
                    &posting.company,
                    &evaluation.reasoning,
                    &evaluation.is_qualified,
                ],
            )
            .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<StoredPosting>, SinkError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt(&format!("SELECT * FROM {} WHERE id = $1", self.table), &[&id])
            .await?;
        Ok(row.as_ref().map(Self::row_to_stored))
    }

    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<StoredPosting>, SinkError> {
        let client = self.pool.get().await?;
        let limit = sql_limit(limit);
        let rows = client
            .query(
                &format!(
                    "SELECT * FROM {} WHERE NOT processed ORDER BY inserted_at DESC LIMIT $1",
                    self.table
                ),
                &[&limit],
            )
            .await?;
        Ok(rows.iter().map(Self::row_to_stored).collect())
    }

    async fn count_unprocessed(&self) -> Result<u64, SinkError> {
        let client = self.pool.get().await?;
        let row = client
            .query_one(
                &format!("SELECT COUNT(*) FROM {} WHERE NOT processed", self.table),
                &[],
            )
            .await?;
        let count: i64 = row.get(0);
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn mark_processed(&self, id: &str) -> Result<bool, SinkError> {
        let client = self.pool.get().await?;
        let updated = client
            .execute(
                &format!("UPDATE {} SET processed = true WHERE id = $1", self.table),
                &[&id],
            )
            .await?;
        Ok(updated > 0)
    }
}

// ============================================================================
// In-memory
// ============================================================================

/// In-memory [`PostingStore`] for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryPostingStore {
    records: RwLock<HashMap<String, StoredPosting>>,
}

impl MemoryPostingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl PostingStore for MemoryPostingStore {
    async fn upsert(&self, posting: &Posting) -> Result<(), SinkError> {
        let record = StoredPosting::from_posting(posting, Utc::now())
            .ok_or_else(|| SinkError::MissingEvaluation(posting.id.clone()))?;
        let mut records = self
            .records
            .write()
            .map_err(|_| SinkError::Pool("memory store lock poisoned".into()))?;
        records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<StoredPosting>, SinkError> {
        let records = self
            .records
            .read()
            .map_err(|_| SinkError::Pool("memory store lock poisoned".into()))?;
        Ok(records.get(id).cloned())
    }

    async fn list_unprocessed(&self, limit: usize) -> Result<Vec<StoredPosting>, SinkError> {
        let records = self
            .records
            .read()
            .map_err(|_| SinkError::Pool("memory store lock poisoned".into()))?;
        let mut pending: Vec<_> = records.values().filter(|r| !r.processed).cloned().collect();
        pending.sort_by(|a, b| b.inserted_at.cmp(&a.inserted_at));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn count_unprocessed(&self) -> Result<u64, SinkError> {
        let records = self
            .records
            .read()
            .map_err(|_| SinkError::Pool("memory store lock poisoned".into()))?;
        Ok(records.values().filter(|r| !r.processed).count() as u64)
    }

    async fn mark_processed(&self, id: &str) -> Result<bool, SinkError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| SinkError::Pool("memory store lock poisoned".into()))?;
        Ok(records
            .get_mut(id)
            .map(|r| r.processed = true)
            .is_some())
    }
}
