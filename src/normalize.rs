//! Raw message → [`EmailRecord`]
//!
//! Parsing is lenient: a message that is only partly readable still
//! yields a record with placeholders for whatever is missing. Only
//! input with no recognizable message structure is rejected.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use mail_parser::{Address, Message, MessageParser, PartType};
use serde::{Deserialize, Serialize};

/// Subject stored for messages that have none.
pub const NO_SUBJECT: &str = "(No Subject)";

/// A message as it is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRecord {
    pub subject: String,
    pub from_email: String,
    /// All `To` addresses, joined with `", "`.
    pub to_email: String,
    /// HTML body when the message has one, otherwise the plain text.
    pub body: String,
    /// From the `Date` header, if present and valid.
    pub created_at: Option<DateTime<Utc>>,
}

/// Parse raw RFC 5322 bytes.
///
/// # Errors
///
/// Returns [`Error::Parse`] if the bytes hold no message headers.
pub fn parse(raw: &[u8]) -> Result<EmailRecord> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| Error::Parse("not a MIME message".into()))?;
    if message.headers().is_empty() {
        return Err(Error::Parse("message has no headers".into()));
    }

    let subject = message
        .subject()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map_or_else(|| NO_SUBJECT.to_string(), ToString::to_string);

    let from_email = message
        .from()
        .and_then(|from| addresses(from).into_iter().next())
        .unwrap_or_default();

    let to_email = message
        .to()
        .map(|to| addresses(to).join(", "))
        .unwrap_or_default();

    let body = html_body(&message)
        .or_else(|| message.body_text(0).map(|text| text.into_owned()))
        .unwrap_or_default();

    let created_at = message
        .date()
        .and_then(|date| DateTime::from_timestamp(date.to_timestamp(), 0));

    Ok(EmailRecord {
        subject,
        from_email,
        to_email,
        body,
        created_at,
    })
}

/// The first genuine `text/html` part. mail-parser converts plain
/// text to HTML on request, so the part type is checked explicitly.
fn html_body(message: &Message<'_>) -> Option<String> {
    message.html_bodies().find_map(|part| match &part.body {
        PartType::Html(html) => Some(html.to_string()),
        _ => None,
    })
}

fn addresses(address: &Address<'_>) -> Vec<String> {
    match address {
        Address::List(list) => list
            .iter()
            .filter_map(|addr| addr.address())
            .map(ToString::to_string)
            .collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|group| group.addresses.iter())
            .filter_map(|addr| addr.address())
            .map(ToString::to_string)
            .collect(),
    }
}
