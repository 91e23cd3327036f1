//! Migration request
//!
//! The request is the caller's whole input to one run: where the
//! remote mailbox lives, how to authenticate, and which messages to
//! copy. It deserializes from the camelCase JSON the web layer posts,
//! or can be assembled from environment variables for the CLI.

use crate::error::{Error, Result};
use crate::folder::Folder;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;

/// What a run should do once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Authenticate and list the available folders.
    Test,
    /// Copy the selected messages into the store.
    Migrate,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Caller-supplied parameters of a single run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationRequest {
    #[serde(rename = "hostname")]
    pub host: String,
    pub port: u16,
    /// Implicit TLS when set, opportunistic STARTTLS otherwise.
    #[serde(rename = "useSSL", default)]
    pub use_ssl: bool,
    #[serde(flatten)]
    pub credentials: Credentials,
    #[serde(default = "default_folders")]
    pub folders: Vec<Folder>,
    #[serde(default)]
    pub date_from: Option<NaiveDate>,
    /// Inclusive: messages from the whole day are selected.
    #[serde(default)]
    pub date_to: Option<NaiveDate>,
    #[serde(default)]
    pub max_messages: Option<usize>,
    /// Skip certificate validation. Only for diagnosing servers with
    /// self-signed certificates.
    #[serde(rename = "allowInsecureTLS", default)]
    pub allow_insecure_tls: bool,
    pub action: Action,
}

fn default_folders() -> Vec<Folder> {
    vec![Folder::Inbox]
}

impl MigrationRequest {
    /// A request with default filters: INBOX only, no date bounds,
    /// no cap, certificate validation on.
    #[must_use]
    pub fn new(
        host: impl Into<String>,
        port: u16,
        use_ssl: bool,
        credentials: Credentials,
        action: Action,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            use_ssl,
            credentials,
            folders: default_folders(),
            date_from: None,
            date_to: None,
            max_messages: None,
            allow_insecure_tls: false,
            action,
        }
    }

    /// Load connection settings from environment variables
    ///
    /// Reads from `.env` file if present. Required variables:
    /// - `IMAP_HOST`
    /// - `IMAP_USERNAME`
    /// - `IMAP_PASSWORD`
    ///
    /// Optional (with defaults):
    /// - `IMAP_PORT` (default: `993`)
    /// - `IMAP_USE_SSL` (default: `true`)
    /// - `IMAP_ALLOW_INSECURE_TLS` (default: `false`)
    ///
    /// Filters keep their defaults; callers adjust them afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a required variable is missing or
    /// `IMAP_PORT` is not a port number.
    pub fn from_env(action: Action) -> Result<Self> {
        dotenvy::dotenv().ok();

        let host = env::var("IMAP_HOST").map_err(|_| Error::Config("IMAP_HOST not set".into()))?;
        let port = env::var("IMAP_PORT")
            .unwrap_or_else(|_| "993".to_string())
            .parse()
            .map_err(|e| Error::Config(format!("Invalid IMAP_PORT: {e}")))?;
        let credentials = Credentials {
            username: env::var("IMAP_USERNAME")
                .map_err(|_| Error::Config("IMAP_USERNAME not set".into()))?,
            password: env::var("IMAP_PASSWORD")
                .map_err(|_| Error::Config("IMAP_PASSWORD not set".into()))?,
        };

        let mut request = Self::new(
            host,
            port,
            env_flag("IMAP_USE_SSL", true)?,
            credentials,
            action,
        );
        request.allow_insecure_tls = env_flag("IMAP_ALLOW_INSECURE_TLS", false)?;
        Ok(request)
    }

    /// Reject requests that cannot possibly connect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("hostname is required".into()));
        }
        if self.port == 0 {
            return Err(Error::Config("port is required".into()));
        }
        if self.credentials.username.is_empty() {
            return Err(Error::Config("username is required".into()));
        }
        if let (Some(from), Some(to)) = (self.date_from, self.date_to)
            && from > to
        {
            return Err(Error::Config(format!("dateFrom {from} is after dateTo {to}")));
        }
        Ok(())
    }
}

fn env_flag(name: &str, default: bool) -> Result<bool> {
    match env::var(name) {
        Err(_) => Ok(default),
        Ok(value) => match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(Error::Config(format!("Invalid {name}: {other}"))),
        },
    }
}
