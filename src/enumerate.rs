//! Folder discovery

use crate::connection::MailSession;
use crate::error::{Error, Result};
use futures::StreamExt;
use tracing::info;

/// List every folder path on the server (`LIST "" "*"`).
///
/// The whole listing is collected before returning; a failure part
/// way through is reported as [`Error::Enumeration`] rather than a
/// truncated list.
///
/// # Errors
///
/// Returns [`Error::Enumeration`] if the session is closed or LIST fails.
pub async fn list_mailboxes(session: &mut MailSession) -> Result<Vec<String>> {
    let imap = session
        .imap()
        .map_err(|e| Error::Enumeration(e.to_string()))?;

    let folder_stream = imap
        .list(Some(""), Some("*"))
        .await
        .map_err(|e| Error::Enumeration(format!("LIST failed: {e}")))?;
    futures::pin_mut!(folder_stream);

    let mut names = Vec::new();
    while let Some(item) = folder_stream.next().await {
        let name = item.map_err(|e| Error::Enumeration(format!("LIST response: {e}")))?;
        names.push(name.name().to_string());
    }

    info!("Found {} folders", names.len());
    Ok(names)
}
