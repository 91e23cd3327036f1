//! Error types for mailbox-migrator

use thiserror::Error;

/// Why a connection to the remote mailbox could not be established.
///
/// Every variant renders a single stable message meant for end users.
/// The underlying cause of [`ConnectError::Unknown`] is kept for logs
/// but never shown.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("Authentication failed: check the username and password")]
    AuthenticationFailed,

    #[error("Mail server not found: check the hostname")]
    HostUnreachable,

    #[error("Connection refused: check the port and security settings")]
    ConnectionRefused,

    #[error("Connection timed out: the mail server did not respond")]
    Timeout,

    #[error("The mail server's certificate is not trusted")]
    InsecureCertificate,

    #[error("Could not connect to the mail server")]
    Unknown(String),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("Failed to list mailboxes: {0}")]
    Enumeration(String),

    #[error("Folder {folder} failed: {reason}")]
    Folder { folder: String, reason: String },

    #[error("IMAP error: {0}")]
    Imap(String),

    #[error("Email parsing error: {0}")]
    Parse(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error ends a run, as opposed to being absorbed
    /// into the run counters.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Connect(_) | Self::Enumeration(_) | Self::Config(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
