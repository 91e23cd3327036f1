//! Mailbox folder names
//!
//! Migration requests name the folders to copy. Well-known folders
//! get dedicated variants so callers don't have to remember the
//! server's spelling of `INBOX`; anything else is carried verbatim.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A server-side mailbox folder.
///
/// Serialized as its plain IMAP name, so `["INBOX", "Work/2024"]`
/// deserializes into `[Folder::Inbox, Folder::Custom("Work/2024")]`.
///
/// # Examples
///
/// ```
/// use mailbox_migrator::Folder;
///
/// assert_eq!(Folder::from("inbox"), Folder::Inbox);
/// assert_eq!(Folder::custom("Work/2024").as_str(), "Work/2024");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Folder {
    /// The INBOX folder (case-insensitive per RFC 3501).
    #[default]
    Inbox,
    Sent,
    Drafts,
    Trash,
    Spam,
    Archive,
    /// Any other folder path, as the server spells it.
    Custom(String),
}

impl Folder {
    #[must_use]
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }

    /// The folder name as sent in `EXAMINE`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Inbox => "INBOX",
            Self::Sent => "Sent",
            Self::Drafts => "Drafts",
            Self::Trash => "Trash",
            Self::Spam => "Spam",
            Self::Archive => "Archive",
            Self::Custom(name) => name,
        }
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Folder {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("inbox") {
            Self::Inbox
        } else {
            match s {
                "Sent" => Self::Sent,
                "Drafts" => Self::Drafts,
                "Trash" => Self::Trash,
                "Spam" => Self::Spam,
                "Archive" => Self::Archive,
                other => Self::Custom(other.to_string()),
            }
        }
    }
}

impl From<String> for Folder {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<Folder> for String {
    fn from(folder: Folder) -> Self {
        match folder {
            Folder::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}
