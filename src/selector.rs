//! Folder selection and message search
//!
//! A folder is opened read-only with `EXAMINE`, searched with
//! `UID SEARCH`, and closed again with `CLOSE` once its messages have
//! been fetched. Only one folder is open at a time.

use crate::connection::ImapSession;
use crate::error::{Error, Result};
use crate::folder::Folder;
use chrono::NaiveDate;
use tracing::{debug, info};

/// Date bounds on the messages to select.
///
/// IMAP semantics: SINCE >= date, BEFORE < date. `to` is inclusive,
/// so it is sent as `BEFORE` the following day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DateFilter {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl DateFilter {
    #[must_use]
    pub const fn new(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        Self { from, to }
    }

    /// The `UID SEARCH` criteria for this filter.
    #[must_use]
    pub fn query(&self) -> String {
        let mut terms = Vec::new();
        if let Some(from) = self.from {
            terms.push(format!("SINCE {}", imap_date(from)));
        }
        if let Some(next_day) = self.to.and_then(|to| to.succ_opt()) {
            terms.push(format!("BEFORE {}", imap_date(next_day)));
        }

        if terms.is_empty() {
            "ALL".to_string()
        } else {
            terms.join(" ")
        }
    }
}

fn imap_date(date: NaiveDate) -> String {
    date.format("%-d-%b-%Y").to_string()
}

/// EXAMINE a folder on an existing session.
pub async fn open_folder(session: &mut ImapSession, folder: &Folder) -> Result<()> {
    let mailbox = session.examine(folder.as_str()).await.map_err(|e| Error::Folder {
        folder: folder.to_string(),
        reason: format!("EXAMINE failed: {e}"),
    })?;
    debug!("Opened {} ({} messages)", folder, mailbox.exists);
    Ok(())
}

/// CLOSE the open folder. Best-effort: failures are only logged.
pub async fn close_folder(session: &mut ImapSession, folder: &Folder) {
    if let Err(e) = session.close().await {
        debug!("Closing {} failed: {}", folder, e);
    }
}

/// UIDs in the open folder matching `filter`, in ascending order.
pub async fn search(
    session: &mut ImapSession,
    folder: &Folder,
    filter: &DateFilter,
) -> Result<Vec<u32>> {
    let query = filter.query();
    let uids = session
        .uid_search(&query)
        .await
        .map_err(|e| Error::Folder {
            folder: folder.to_string(),
            reason: format!("Search failed: {e}"),
        })?;

    let mut uid_list: Vec<u32> = uids.into_iter().collect();
    uid_list.sort_unstable();

    info!(
        "Found {} messages in {} matching '{}'",
        uid_list.len(),
        folder,
        query
    );
    Ok(uid_list)
}
