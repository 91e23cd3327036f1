//! Fake IMAP server for integration testing
//!
//! This module provides an in-process IMAP server that speaks enough
//! of the protocol to run a migration end-to-end:
//!
//! TCP -> greeting -> [STARTTLS] -> TLS handshake -> LOGIN -> LIST /
//! EXAMINE / UID SEARCH / UID FETCH / CLOSE -> LOGOUT
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and connection dispatch
//! - `handlers/` -- one file per IMAP command (LIST, EXAMINE, etc.)
//! - `mailbox` -- test data model (folders, messages, builder)
//! - `journal` -- record of the commands clients sent
//! - `io` -- shared write helpers

mod server;

pub use handlers::FetchFaults;
pub use journal::Journal;
pub use mailbox::MailboxBuilder;
pub use server::{FakeImapServer, ServerOptions, Transport};
