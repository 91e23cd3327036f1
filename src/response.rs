//! Response body returned to the web layer

use crate::error::{Error, Result};
use crate::migrator::{RunCounters, RunOutcome};
use serde::{Deserialize, Serialize};

/// Outcome of a run in its wire shape:
///
/// - test: `{"success": true, "mailboxes": [...]}`
/// - migrate: `{"processed": n, "imported": n, "failed": n}`
/// - failure: `{"error": "..."}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MigrationResponse {
    Mailboxes { success: bool, mailboxes: Vec<String> },
    Counters(RunCounters),
    Error { error: String },
}

impl MigrationResponse {
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl From<Result<RunOutcome>> for MigrationResponse {
    fn from(result: Result<RunOutcome>) -> Self {
        match result {
            Ok(RunOutcome::Tested { mailboxes }) => Self::Mailboxes {
                success: true,
                mailboxes,
            },
            Ok(RunOutcome::Migrated(counters)) => Self::Counters(counters),
            Err(e) => e.into(),
        }
    }
}

impl From<Error> for MigrationResponse {
    fn from(error: Error) -> Self {
        Self::Error {
            error: error.to_string(),
        }
    }
}
