//! Run coordinator
//!
//! Drives one run from connect to close:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Testing   -> Closed
//!                                 \-> Migrating -> Closed
//! ```
//!
//! Migration walks the requested folders one after another. Per
//! folder: EXAMINE, UID SEARCH, then fetch/normalize/commit one chunk
//! at a time, then CLOSE. A folder that fails is skipped; only a
//! failed connect (or, in test mode, a failed LIST) fails the run. If a
//! FETCH response cannot be read to its end the connection is given up
//! and the remaining folders are not visited.

use crate::config::{Action, MigrationRequest};
use crate::connection::{self, DEFAULT_CONNECT_TIMEOUT, MailSession};
use crate::enumerate;
use crate::error::{Error, Result};
use crate::fetch::{self, DEFAULT_CHUNK_SIZE, RawMessage};
use crate::folder::Folder;
use crate::normalize::{self, EmailRecord};
use crate::selector::{self, DateFilter};
use crate::store::{self, CommitOutcome, MessageStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress of a migration run.
///
/// `processed` counts messages handed to the parser; `imported` and
/// `failed` count outcomes, so `imported + failed <= processed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounters {
    pub processed: usize,
    pub imported: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Tested { mailboxes: Vec<String> },
    Migrated(RunCounters),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Idle,
    Connecting,
    Connected,
    Testing,
    Migrating,
    Closed,
}

/// Copies messages from a remote mailbox into a [`MessageStore`].
///
/// Without a store, a migration still connects, selects and parses,
/// but nothing is imported.
#[derive(Clone)]
pub struct Migrator {
    store: Option<Arc<dyn MessageStore>>,
    chunk_size: usize,
    connect_timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl Default for Migrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Migrator {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            store: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            cancel: None,
        }
    }

    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// UIDs fetched per round trip. Zero is treated as one.
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Stop between chunks once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Execute `request` according to its `action`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid, the connection
    /// fails, or (test mode only) the folders cannot be listed.
    /// Failures inside a migration only show up in the counters.
    pub async fn run(&self, request: &MigrationRequest) -> Result<RunOutcome> {
        match request.action {
            Action::Test => self
                .test_connection(request)
                .await
                .map(|mailboxes| RunOutcome::Tested { mailboxes }),
            Action::Migrate => self.migrate(request).await.map(RunOutcome::Migrated),
        }
    }

    /// Authenticate and list all folders. Nothing is selected or
    /// fetched.
    ///
    /// # Errors
    ///
    /// Returns an error if the request is invalid, the connection
    /// fails, or LIST fails.
    pub async fn test_connection(&self, request: &MigrationRequest) -> Result<Vec<String>> {
        let mut run = Run::new(None, None);
        let mut session = self.open(request, &mut run).await?;

        run.advance(RunState::Testing);
        let mailboxes = enumerate::list_mailboxes(&mut session).await;

        Self::finish(session, &mut run).await;
        mailboxes
    }

    /// Copy every selected message of every requested folder.
    ///
    /// # Errors
    ///
    /// Returns an error only if the request is invalid or the
    /// connection fails.
    pub async fn migrate(&self, request: &MigrationRequest) -> Result<RunCounters> {
        let mut run = Run::new(request.max_messages, self.cancel.as_ref());
        let mut session = self.open(request, &mut run).await?;

        run.advance(RunState::Migrating);
        self.migrate_folders(&mut session, request, &mut run).await;
        info!(
            "Migration finished: {} processed, {} imported, {} failed",
            run.counters.processed, run.counters.imported, run.counters.failed
        );

        Self::finish(session, &mut run).await;
        Ok(run.counters)
    }

    async fn open(&self, request: &MigrationRequest, run: &mut Run<'_>) -> Result<MailSession> {
        request.validate()?;

        run.advance(RunState::Connecting);
        match connection::connect(request, self.connect_timeout).await {
            Ok(session) => {
                run.advance(RunState::Connected);
                Ok(session)
            }
            Err(e) => {
                run.advance(RunState::Closed);
                Err(e.into())
            }
        }
    }

    async fn finish(mut session: MailSession, run: &mut Run<'_>) {
        session.close().await;
        run.advance(RunState::Closed);
    }

    async fn migrate_folders(
        &self,
        session: &mut MailSession,
        request: &MigrationRequest,
        run: &mut Run<'_>,
    ) {
        let filter = DateFilter::new(request.date_from, request.date_to);

        for folder in &request.folders {
            if run.should_halt() {
                info!("Stopping before {}: {}", folder, run.halt_reason());
                break;
            }

            let imap = match session.imap() {
                Ok(imap) => imap,
                Err(e) => {
                    warn!("Session unavailable: {}", e);
                    break;
                }
            };

            if let Err(e) = selector::open_folder(imap, folder).await {
                warn!("Skipping {}: {}", folder, e);
                continue;
            }
            let result = self.migrate_folder(session, folder, &filter, run).await;
            if let Ok(imap) = session.imap() {
                selector::close_folder(imap, folder).await;
            }

            if let Err(e) = result {
                warn!("Skipping rest of {}: {}", folder, e);
            }
        }
    }

    /// Process one open folder chunk by chunk.
    async fn migrate_folder(
        &self,
        session: &mut MailSession,
        folder: &Folder,
        filter: &DateFilter,
        run: &mut Run<'_>,
    ) -> Result<()> {
        let uids = selector::search(session.imap()?, folder, filter).await?;
        if uids.is_empty() {
            debug!("Nothing to migrate in {}", folder);
            return Ok(());
        }

        let mut remaining = uids.as_slice();
        while !remaining.is_empty() {
            if run.should_halt() {
                info!("Stopping in {}: {}", folder, run.halt_reason());
                break;
            }

            let len = run.next_chunk_len(self.chunk_size, remaining.len());
            let (chunk, rest) = remaining.split_at(len);
            remaining = rest;

            let mut records = Vec::with_capacity(chunk.len());
            let report = fetch::fetch_chunk(session.imap()?, chunk, |raw| {
                run.normalize(raw, &mut records);
            })
            .await;

            // Whatever was parsed before a fetch error is still committed.
            let outcome = store::commit(self.store.as_deref(), &records).await;
            run.record_commit(outcome);
            run.record_missing(report.missing);

            if !report.drained {
                session.mark_broken();
            }
            if let Some(e) = report.error {
                return Err(Error::Folder {
                    folder: folder.to_string(),
                    reason: e.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// State of one run: counters, cap and cancellation.
struct Run<'a> {
    state: RunState,
    counters: RunCounters,
    max_messages: Option<usize>,
    cancel: Option<&'a CancellationToken>,
}

impl<'a> Run<'a> {
    const fn new(max_messages: Option<usize>, cancel: Option<&'a CancellationToken>) -> Self {
        Self {
            state: RunState::Idle,
            counters: RunCounters {
                processed: 0,
                imported: 0,
                failed: 0,
            },
            max_messages,
            cancel,
        }
    }

    fn advance(&mut self, next: RunState) {
        debug!("Run state {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn cap_reached(&self) -> bool {
        self.max_messages
            .is_some_and(|max| self.counters.processed >= max)
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(CancellationToken::is_cancelled)
    }

    /// The single guard checked before every folder and chunk.
    fn should_halt(&self) -> bool {
        self.cap_reached() || self.cancelled()
    }

    fn halt_reason(&self) -> &'static str {
        if self.cancelled() {
            "run cancelled"
        } else {
            "message cap reached"
        }
    }

    /// How many UIDs the next chunk may request without passing the
    /// message cap.
    fn next_chunk_len(&self, chunk_size: usize, available: usize) -> usize {
        let len = chunk_size.min(available);
        self.max_messages.map_or(len, |max| {
            len.min(max.saturating_sub(self.counters.processed))
        })
    }

    fn normalize(&mut self, raw: RawMessage<'_>, records: &mut Vec<EmailRecord>) {
        if self.cap_reached() {
            debug!("Message cap reached, ignoring UID {:?}", raw.uid);
            return;
        }
        self.counters.processed += 1;

        match normalize::parse(raw.bytes) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("Skipping UID {:?}: {}", raw.uid, e);
                self.counters.failed += 1;
            }
        }
    }

    /// Requested messages the server never delivered count as both
    /// processed and failed.
    const fn record_missing(&mut self, missing: usize) {
        self.counters.processed += missing;
        self.counters.failed += missing;
    }

    const fn record_commit(&mut self, outcome: CommitOutcome) {
        self.counters.imported += outcome.imported;
        self.counters.failed += outcome.failed;
    }
}
