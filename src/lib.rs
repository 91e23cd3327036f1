//! Mailbox migration over IMAP
//!
//! Connects to a remote mailbox, selects messages by folder and date,
//! fetches them in bounded chunks, and writes each one as an
//! [`EmailRecord`] to a [`MessageStore`]. Bulk writes that fail are
//! retried record by record, and the run reports how many messages
//! were processed, imported and lost.
//!
//! ```no_run
//! use mailbox_migrator::{Action, Credentials, MigrationRequest, Migrator, SqliteStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> mailbox_migrator::Result<()> {
//! let store = SqliteStore::connect("sqlite://migrated.db").await?;
//! store.migrate().await?;
//!
//! let credentials = Credentials {
//!     username: "alice@example.com".into(),
//!     password: "app-password".into(),
//! };
//! let request =
//!     MigrationRequest::new("imap.example.com", 993, true, credentials, Action::Migrate);
//!
//! let counters = Migrator::new()
//!     .with_store(Arc::new(store))
//!     .migrate(&request)
//!     .await?;
//! println!("{} of {} imported", counters.imported, counters.processed);
//! # Ok(())
//! # }
//! ```

mod config;
mod connection;
mod enumerate;
mod error;
mod fetch;
mod folder;
mod migrator;
mod normalize;
mod response;
mod selector;
mod store;

pub use config::{Action, Credentials, MigrationRequest};
pub use connection::{DEFAULT_CONNECT_TIMEOUT, MailSession, connect};
pub use enumerate::list_mailboxes;
pub use error::{ConnectError, Error, Result};
pub use fetch::{ChunkReport, DEFAULT_CHUNK_SIZE, RawMessage};
pub use folder::Folder;
pub use migrator::{Migrator, RunCounters, RunOutcome};
pub use normalize::{EmailRecord, NO_SUBJECT, parse};
pub use response::MigrationResponse;
pub use selector::DateFilter;
pub use store::{CommitOutcome, MessageStore, SqliteStore, commit};
pub use tokio_util::sync::CancellationToken;
