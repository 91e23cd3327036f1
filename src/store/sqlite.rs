//! SQLite-backed message store

use super::MessageStore;
use crate::error::{Error, Result};
use crate::normalize::EmailRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use tracing::info;

const CREATE_EMAILS: &str = r"
    CREATE TABLE IF NOT EXISTS emails (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        subject TEXT NOT NULL,
        from_email TEXT NOT NULL,
        to_email TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
";

/// Stores records as rows of the `emails` table.
///
/// Records without a timestamp are stored with the time of insertion.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `url`, e.g.
    /// `sqlite://migrated.db`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for a malformed URL and
    /// [`Error::Persistence`] if the database cannot be opened.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Config(format!("Invalid database URL: {e}")))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| Error::Persistence(format!("Failed to connect: {e}")))?;

        info!("Opened message store at {}", url);
        Ok(Self { pool })
    }

    /// A private in-memory database, gone when the store is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if SQLite cannot be opened.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Config(e.to_string()))?;

        // Every connection to :memory: is its own database, so keep
        // exactly one alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| Error::Persistence(format!("Failed to connect: {e}")))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool, e.g. one whose schema the caller manages.
    #[must_use]
    pub const fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the `emails` table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the statement fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(CREATE_EMAILS)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Persistence(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the query fails.
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM emails")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Persistence(e.to_string()))
    }

    /// All stored records in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Persistence`] if the query fails or a row
    /// does not decode.
    pub async fn records(&self) -> Result<Vec<EmailRecord>> {
        let rows = sqlx::query(
            "SELECT subject, from_email, to_email, body, created_at FROM emails ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Persistence(e.to_string()))?;

        rows.iter()
            .map(|row| {
                Ok(EmailRecord {
                    subject: row.try_get("subject")?,
                    from_email: row.try_get("from_email")?,
                    to_email: row.try_get("to_email")?,
                    body: row.try_get("body")?,
                    created_at: Some(row.try_get::<DateTime<Utc>, _>("created_at")?),
                })
            })
            .collect::<std::result::Result<_, sqlx::Error>>()
            .map_err(|e| Error::Persistence(e.to_string()))
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert_batch(&self, records: &[EmailRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut builder = QueryBuilder::<Sqlite>::new(
            "INSERT INTO emails (subject, from_email, to_email, body, created_at) ",
        );
        builder.push_values(records, |mut row, record| {
            row.push_bind(record.subject.clone())
                .push_bind(record.from_email.clone())
                .push_bind(record.to_email.clone())
                .push_bind(record.body.clone())
                .push_bind(record.created_at.unwrap_or(now));
        });

        builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Persistence(format!("Bulk insert failed: {e}")))?;
        Ok(())
    }

    async fn insert_one(&self, record: &EmailRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO emails (subject, from_email, to_email, body, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.subject)
        .bind(&record.from_email)
        .bind(&record.to_email)
        .bind(&record.body)
        .bind(record.created_at.unwrap_or_else(Utc::now))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Persistence(format!("Insert failed: {e}")))?;
        Ok(())
    }
}
