//! Chunked message retrieval
//!
//! Message bodies can be arbitrarily large, so UIDs are fetched in
//! fixed-size chunks and each body is handed on as soon as it arrives.
//! Nothing from a chunk is kept once its response has been drained.

use crate::connection::ImapSession;
use crate::error::Error;
use futures::StreamExt;
use tracing::{debug, warn};

pub const DEFAULT_CHUNK_SIZE: usize = 50;

/// One message as returned by the server, borrowed from the fetch
/// response. `bytes` is empty when the server sent no body.
#[derive(Debug, Clone, Copy)]
pub struct RawMessage<'a> {
    pub uid: Option<u32>,
    pub bytes: &'a [u8],
}

/// What came back for one chunk.
#[derive(Debug, Default)]
pub struct ChunkReport {
    /// Responses handed to the sink, with or without a body.
    pub delivered: usize,
    /// Requested UIDs the server never answered for.
    pub missing: usize,
    /// First error met while reading the response.
    pub error: Option<Error>,
    /// `false` when the response could not be read to its end; the
    /// connection must not be used for further commands.
    pub drained: bool,
}

/// UID set for `UID FETCH`, with consecutive runs collapsed into
/// ranges: `[1, 2, 3, 7, 9, 10]` becomes `1:3,7,9:10`.
#[must_use]
pub fn uid_set(uids: &[u32]) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut iter = uids.iter().copied().peekable();

    while let Some(start) = iter.next() {
        let mut end = start;
        while let Some(&next) = iter.peek() {
            if Some(next) != end.checked_add(1) {
                break;
            }
            end = next;
            iter.next();
        }
        if start == end {
            parts.push(start.to_string());
        } else {
            parts.push(format!("{start}:{end}"));
        }
    }
    parts.join(",")
}

/// Fetch one chunk of UIDs and pass every message to `on_message` in
/// the order the server returns them.
///
/// An unreadable item does not stop the read: the rest of the
/// response is still consumed so the connection stays usable, and the
/// first error is reported. Only if errors keep coming past one per
/// requested UID is the read abandoned and the report marked as not
/// drained.
pub async fn fetch_chunk<F>(
    session: &mut ImapSession,
    uids: &[u32],
    mut on_message: F,
) -> ChunkReport
where
    F: FnMut(RawMessage<'_>),
{
    let mut report = ChunkReport {
        drained: true,
        ..ChunkReport::default()
    };
    if uids.is_empty() {
        return report;
    }

    let messages = match session.uid_fetch(uid_set(uids), "(UID BODY.PEEK[])").await {
        Ok(messages) => messages,
        Err(e) => {
            report.missing = uids.len();
            report.error = Some(Error::Imap(format!("Fetch failed: {e}")));
            report.drained = false;
            return report;
        }
    };
    futures::pin_mut!(messages);

    let mut errors = 0;
    while let Some(msg_result) = messages.next().await {
        let msg = match msg_result {
            Ok(msg) => msg,
            Err(e) => {
                warn!("Fetch error: {}", e);
                errors += 1;
                report
                    .error
                    .get_or_insert_with(|| Error::Imap(format!("Fetch error: {e}")));
                if errors > uids.len() {
                    report.drained = false;
                    break;
                }
                continue;
            }
        };
        if !msg.uid.is_some_and(|uid| uids.contains(&uid)) {
            debug!("Ignoring unsolicited FETCH for UID {:?}", msg.uid);
            continue;
        }
        let bytes = msg.body().unwrap_or_else(|| {
            warn!("No body found for UID {:?}", msg.uid);
            &[][..]
        });
        on_message(RawMessage {
            uid: msg.uid,
            bytes,
        });
        report.delivered += 1;
    }

    report.missing = uids.len().saturating_sub(report.delivered);
    if report.missing > 0 {
        warn!(
            "Server returned {} of {} requested messages",
            report.delivered,
            uids.len()
        );
    } else {
        debug!("Fetched {} messages", report.delivered);
    }
    report
}
