//! Persistence of normalized messages
//!
//! Each chunk is written with a single bulk insert. If that fails the
//! records are retried one at a time, so one bad row costs only
//! itself and not the rest of its chunk.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::normalize::EmailRecord;
use async_trait::async_trait;
use tracing::{debug, warn};

/// A durable destination for migrated messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert all records or none of them.
    async fn insert_batch(&self, records: &[EmailRecord]) -> Result<()>;

    /// Insert a single record.
    async fn insert_one(&self, record: &EmailRecord) -> Result<()>;
}

/// Result of committing one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitOutcome {
    pub imported: usize,
    pub failed: usize,
}

/// Write `records`, bulk first and then record by record.
///
/// Without a store nothing is imported and nothing counts as failed.
pub async fn commit(store: Option<&dyn MessageStore>, records: &[EmailRecord]) -> CommitOutcome {
    if records.is_empty() {
        return CommitOutcome::default();
    }
    let Some(store) = store else {
        debug!("No store configured, {} records not imported", records.len());
        return CommitOutcome::default();
    };

    match store.insert_batch(records).await {
        Ok(()) => {
            debug!("Bulk insert of {} records succeeded", records.len());
            return CommitOutcome {
                imported: records.len(),
                failed: 0,
            };
        }
        Err(e) => warn!(
            "Bulk insert of {} records failed, retrying individually: {}",
            records.len(),
            e
        ),
    }

    let mut outcome = CommitOutcome::default();
    for record in records {
        match store.insert_one(record).await {
            Ok(()) => outcome.imported += 1,
            Err(e) => {
                warn!("Failed to insert '{}': {}", record.subject, e);
                outcome.failed += 1;
            }
        }
    }
    outcome
}
