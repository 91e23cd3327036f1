//! In-process fake IMAP server for integration testing
//!
//! # How IMAP works (educational overview)
//!
//! IMAP (Internet Message Access Protocol, RFC 3501) is a text-based
//! protocol for accessing email on a remote server. Messages stay on
//! the server; clients open folders, search them and fetch what they
//! need.
//!
//! ## Connection lifecycle
//!
//! The fake server can greet in three ways, one per [`Transport`]:
//!
//! ```text
//!   StartTls                 ImplicitTls              Plain
//!   --------                 -----------              -----
//!   TCP connect              TCP connect              TCP connect
//!   "* OK ready"             TLS handshake            "* OK ready"
//!   C: STARTTLS              "* OK ready"             C: STARTTLS
//!   S: OK                         |                   S: NO
//!   TLS handshake                 |                   (stays plaintext)
//!        \________________________|_______________________/
//!                                 |
//!                 LOGIN, LIST, EXAMINE, UID SEARCH,
//!                 UID FETCH, CLOSE, ..., LOGOUT
//! ```
//!
//! ## Command format
//!
//! Every client command starts with a **tag** -- an arbitrary string
//! the client chooses (async-imap uses `A0001`, `A0002`, etc.). The
//! server echoes this tag in its completion response so the client can
//! match responses to commands:
//!
//! ```text
//!   Client:  A0001 LOGIN user pass
//!   Server:  A0001 OK LOGIN completed
//! ```
//!
//! Lines prefixed with `*` are **untagged** responses -- data the
//! server sends before the final tagged OK/NO/BAD:
//!
//! ```text
//!   Client:  A0002 LIST "" "*"
//!   Server:  * LIST (\HasNoChildren) "/" "INBOX"
//!   Server:  * LIST (\HasNoChildren) "/" "Sent"
//!   Server:  A0002 OK LIST completed
//! ```
//!
//! ## FETCH and literals
//!
//! Message bodies are sent as **counted literals**: `{bytecount}\r\n`
//! followed by exactly that many raw bytes:
//!
//! ```text
//!   * 1 FETCH (UID 42 BODY[] {1234}
//!   <exactly 1234 bytes of raw RFC 5322 message>
//!   )
//! ```

use super::handlers::{
    FetchFaults, extract_uids, handle_close, handle_examine, handle_list, handle_login,
    handle_logout, handle_uid_fetch, handle_uid_search,
};
use super::io::write_line;
use super::journal::{Journal, SharedJournal};
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;

const GREETING: &str = "* OK IMAP4rev1 Fake server ready\r\n";

/// How the server secures a new connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Transport {
    /// Plaintext greeting, then STARTTLS is required.
    #[default]
    StartTls,
    /// TLS from the first byte (port 993 style).
    ImplicitTls,
    /// STARTTLS is refused with `NO`; the session stays plaintext.
    Plain,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ServerOptions {
    pub transport: Transport,
    /// Answer every LOGIN with a tagged `NO`.
    pub reject_login: bool,
    /// Follow the first LIST line with one no client can parse.
    pub fail_list: bool,
    /// Answer UID SEARCH in this folder with a tagged `NO`.
    pub fail_search: Option<&'static str>,
    pub fetch: FetchFaults,
}

/// A fake IMAP server that runs on localhost with an OS-assigned port.
///
/// The server generates a self-signed TLS certificate at startup using
/// `rcgen`, so no cert files are needed. Clients must therefore either
/// disable certificate validation or expect it to fail.
pub struct FakeImapServer {
    port: u16,
    journal: SharedJournal,
    /// Handle to the background task so it lives as long as the server.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Start a STARTTLS server that accepts any login.
    pub async fn start(mailbox: Mailbox) -> Self {
        Self::start_with(mailbox, ServerOptions::default()).await
    }

    /// Start a new fake IMAP server with the given mailbox state.
    ///
    /// 1. Binds to `127.0.0.1:0` -- the OS picks a free port.
    /// 2. Generates a self-signed TLS certificate via `rcgen`.
    /// 3. Spawns a tokio task that accepts connections and speaks
    ///    IMAP.
    ///
    /// The accept loop runs until the test's runtime shuts down.
    pub async fn start_with(mailbox: Mailbox, options: ServerOptions) -> Self {
        // Several tests may race to install the provider; losing the
        // race is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        // The client connects to "127.0.0.1", so that is the SAN.
        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");

        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(mailbox);
        let journal = SharedJournal::default();

        let handle = tokio::spawn({
            let journal = journal.clone();
            async move {
                loop {
                    let Ok((stream, _addr)) = listener.accept().await else {
                        break;
                    };
                    let connection = Connection {
                        acceptor: acceptor.clone(),
                        mailbox: mailbox.clone(),
                        journal: journal.clone(),
                        options,
                    };
                    tokio::spawn(connection.serve(stream));
                }
            }
        });

        Self {
            port,
            journal,
            _handle: handle,
        }
    }

    /// The port the server is listening on.
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Snapshot of every command recorded so far.
    pub fn journal(&self) -> Journal {
        self.journal.lock().unwrap().clone()
    }

    /// Wait until the journal satisfies `done`, for commands the client
    /// sends without waiting for the reply. Gives up after two seconds
    /// and returns the last snapshot.
    pub async fn journal_when(&self, done: impl Fn(&Journal) -> bool) -> Journal {
        for _ in 0..200 {
            let journal = self.journal();
            if done(&journal) {
                return journal;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        self.journal()
    }
}

/// Everything one client connection needs.
struct Connection {
    acceptor: TlsAcceptor,
    mailbox: Arc<Mailbox>,
    journal: SharedJournal,
    options: ServerOptions,
}

impl Connection {
    async fn serve(self, stream: TcpStream) {
        if self.options.transport == Transport::ImplicitTls {
            let Ok(tls_stream) = self.acceptor.accept(stream).await else {
                return;
            };
            let mut reader = BufReader::new(tls_stream);
            if write_line(&mut reader, GREETING).await.is_err() {
                return;
            }
            self.session(reader).await;
            return;
        }

        // RFC 3501 Section 7.1.1: server greeting, before any TLS.
        let mut reader = BufReader::new(stream);
        if write_line(&mut reader, GREETING).await.is_err() {
            return;
        }

        let mut line = String::new();
        if reader.read_line(&mut line).await.is_err() {
            return;
        }
        let mut parts = line.trim().splitn(2, ' ');
        let tag = parts.next().unwrap_or("*").to_string();
        let command = parts.next().unwrap_or_default().to_uppercase();

        if command != "STARTTLS" {
            let _ = write_line(&mut reader, &format!("{tag} BAD Expected STARTTLS\r\n")).await;
            return;
        }

        if self.options.transport == Transport::Plain {
            let resp = format!("{tag} NO STARTTLS not available\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                return;
            }
            self.session(reader).await;
            return;
        }

        let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
        if write_line(&mut reader, &resp).await.is_err() {
            return;
        }

        let tcp = reader.into_inner();
        let Ok(tls_stream) = self.acceptor.accept(tcp).await else {
            return;
        };
        self.session(BufReader::new(tls_stream)).await;
    }

    fn record(&self, update: impl FnOnce(&mut Journal)) {
        update(&mut self.journal.lock().unwrap());
    }

    /// Run the IMAP command loop over an established stream.
    ///
    /// Uses `imap-codec`'s `CommandCodec` to parse each client command
    /// into a strongly-typed `Command`, then dispatches to the
    /// appropriate handler based on the `CommandBody` variant. Commands
    /// that would modify the mailbox are journaled and refused.
    #[allow(clippy::too_many_lines)]
    async fn session<S: AsyncRead + AsyncWrite + Unpin>(&self, mut reader: BufReader<S>) {
        let mut selected_folder: Option<String> = None;
        let mut served = 0;
        let codec = CommandCodec::default();

        loop {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let Ok((_, command)) = codec.decode(line.as_bytes()) else {
                let tag = trimmed.split_whitespace().next().unwrap_or("*");
                let resp = format!("{tag} BAD Parse error\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
                continue;
            };

            let tag = command.tag.inner();

            match command.body {
                CommandBody::Login { .. } => {
                    self.record(|j| j.logins += 1);
                    if !handle_login(tag, !self.options.reject_login, &mut reader).await {
                        break;
                    }
                }
                CommandBody::List { .. } if self.options.fail_list => {
                    let resp = format!(
                        "* LIST (\\HasNoChildren) \"/\" \"INBOX\"\r\n\
                         * LIST !\r\n\
                         {tag} OK LIST completed\r\n"
                    );
                    if write_line(&mut reader, &resp).await.is_err() {
                        break;
                    }
                }
                CommandBody::List { .. } => {
                    handle_list(tag, &self.mailbox, &mut reader).await;
                }
                CommandBody::Examine { mailbox: mb, .. } => {
                    let name = mailbox_name(&mb);
                    self.record(|j| j.open_attempts.push(name.clone()));
                    selected_folder = handle_examine(tag, &name, &self.mailbox, &mut reader).await;
                    if let Some(opened) = &selected_folder {
                        self.record(|j| j.opened.push(opened.clone()));
                    }
                }
                CommandBody::Search {
                    criteria,
                    uid: true,
                    ..
                } => {
                    let raw = trimmed.splitn(4, ' ').nth(3).unwrap_or_default().to_string();
                    self.record(|j| j.searches.push(raw));
                    let failing = self.options.fail_search;
                    if failing.is_some_and(|name| selected_folder.as_deref() == Some(name)) {
                        let resp = format!("{tag} NO Search failed\r\n");
                        if write_line(&mut reader, &resp).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    handle_uid_search(
                        tag,
                        criteria.as_ref(),
                        &self.mailbox,
                        selected_folder.as_deref(),
                        &mut reader,
                    )
                    .await;
                }
                CommandBody::Fetch {
                    sequence_set,
                    uid: true,
                    ..
                } => {
                    let max_uid = selected_folder
                        .as_deref()
                        .and_then(|name| self.mailbox.get_folder(name))
                        .and_then(|folder| folder.emails.iter().map(|e| e.uid).max())
                        .unwrap_or(0);
                    let uids = extract_uids(&sequence_set, max_uid);
                    self.record(|j| j.fetches.push(uids));
                    handle_uid_fetch(
                        tag,
                        &sequence_set,
                        &self.mailbox,
                        selected_folder.as_deref(),
                        self.options.fetch,
                        &mut served,
                        &mut reader,
                    )
                    .await;
                }
                CommandBody::Close => {
                    if handle_close(tag, selected_folder.as_deref(), &mut reader).await {
                        self.record(|j| j.closes += 1);
                    }
                    selected_folder = None;
                }
                CommandBody::Select { .. } => self.refuse(tag, "SELECT", &mut reader).await,
                CommandBody::Store { .. } => self.refuse(tag, "STORE", &mut reader).await,
                CommandBody::Copy { .. } => self.refuse(tag, "COPY", &mut reader).await,
                CommandBody::Expunge => self.refuse(tag, "EXPUNGE", &mut reader).await,
                CommandBody::Append { .. } => self.refuse(tag, "APPEND", &mut reader).await,
                CommandBody::Delete { .. } => self.refuse(tag, "DELETE", &mut reader).await,
                CommandBody::Logout => {
                    self.record(|j| j.logouts += 1);
                    handle_logout(tag, &mut reader).await;
                    break;
                }
                _ => {
                    let resp = format!("{tag} BAD Unknown command\r\n");
                    if write_line(&mut reader, &resp).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    /// Journal and reject a command that would modify the mailbox.
    async fn refuse<S: AsyncRead + AsyncWrite + Unpin>(
        &self,
        tag: &str,
        name: &str,
        reader: &mut BufReader<S>,
    ) {
        self.record(|j| j.writes.push(name.to_string()));
        let _ = write_line(reader, &format!("{tag} NO Mailbox is read-only\r\n")).await;
    }
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}
