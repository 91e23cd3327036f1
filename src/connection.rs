//! IMAP connection, TLS, and session lifecycle
//!
//! `connect()` turns a [`MigrationRequest`] into an authenticated
//! [`MailSession`], reducing every way that can go wrong to one of the
//! [`ConnectError`] classes. The session is released with
//! [`MailSession::close`], which never fails.

use crate::config::{Credentials, MigrationRequest};
use crate::error::{ConnectError, Error, Result};
use async_imap::Session;
use async_imap::error::Error as ImapError;
use futures::io::{AsyncRead, AsyncWrite};
use rustls::pki_types::ServerName;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpStream, lookup_host};
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

/// Upper bound for resolve + TCP + TLS + LOGIN.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

const LOGOUT_TIMEOUT: Duration = Duration::from_secs(5);

/// Byte stream an IMAP session can run over: plain TCP or TLS.
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

impl<T> Transport for T where T: AsyncRead + AsyncWrite + Unpin + Send + fmt::Debug {}

pub type ImapSession = Session<Box<dyn Transport>>;

type TlsTransport = Compat<tokio_rustls::client::TlsStream<TcpStream>>;

/// An authenticated IMAP session owned by a single run.
pub struct MailSession {
    inner: Option<ImapSession>,
    broken: bool,
}

impl MailSession {
    const fn new(session: ImapSession) -> Self {
        Self {
            inner: Some(session),
            broken: false,
        }
    }

    pub(crate) fn imap(&mut self) -> Result<&mut ImapSession> {
        if self.broken {
            return Err(Error::Imap("connection out of sync".into()));
        }
        self.inner
            .as_mut()
            .ok_or_else(|| Error::Imap("session already closed".into()))
    }

    /// Stop issuing commands on this connection. A later
    /// [`close`](Self::close) drops it without LOGOUT.
    pub(crate) fn mark_broken(&mut self) {
        warn!("IMAP connection is out of sync, no further commands will be sent");
        self.broken = true;
    }

    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// Log out and drop the connection.
    ///
    /// Idempotent. Failures are logged and swallowed; the connection
    /// is dropped either way.
    pub async fn close(&mut self) {
        let Some(mut session) = self.inner.take() else {
            return;
        };
        if self.broken {
            debug!("Dropping out-of-sync connection without logout");
            return;
        }
        match tokio::time::timeout(LOGOUT_TIMEOUT, session.logout()).await {
            Ok(Ok(())) => debug!("Logged out of IMAP server"),
            Ok(Err(e)) => debug!("Logout failed: {e}"),
            Err(_) => debug!("Logout timed out"),
        }
    }
}

impl fmt::Debug for MailSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailSession")
            .field("open", &self.is_open())
            .field("broken", &self.broken)
            .finish()
    }
}

impl Drop for MailSession {
    fn drop(&mut self) {
        if self.inner.is_some() {
            debug!("IMAP session dropped without logout");
        }
    }
}

/// Open an authenticated session for `request`.
///
/// `use_ssl` selects implicit TLS; otherwise STARTTLS is attempted and,
/// if the server refuses it, the session continues unencrypted. The
/// whole sequence must finish within `deadline`.
///
/// # Errors
///
/// Returns the [`ConnectError`] class of the first step that failed.
pub async fn connect(
    request: &MigrationRequest,
    deadline: Duration,
) -> std::result::Result<MailSession, ConnectError> {
    let addr = format!("{}:{}", request.host, request.port);
    debug!("Connecting to IMAP server at {}", addr);

    match tokio::time::timeout(deadline, open(request)).await {
        Ok(Ok(session)) => {
            info!("Connected to IMAP server at {}", addr);
            Ok(session)
        }
        Ok(Err(e)) => {
            warn!("Connection to {} failed: {:?}", addr, e);
            Err(e)
        }
        Err(_) => {
            warn!("Connection to {} timed out after {:?}", addr, deadline);
            Err(ConnectError::Timeout)
        }
    }
}

async fn open(request: &MigrationRequest) -> std::result::Result<MailSession, ConnectError> {
    let addrs = resolve(&request.host, request.port).await?;
    let tcp = TcpStream::connect(addrs.as_slice())
        .await
        .map_err(|e| classify_io(&e))?;

    let connector = tls_connector(request.allow_insecure_tls)?;
    let transport: Box<dyn Transport> = if request.use_ssl {
        Box::new(handshake(&connector, &request.host, tcp).await?)
    } else {
        starttls(&connector, &request.host, tcp).await?
    };

    login(transport, &request.credentials).await
}

async fn resolve(host: &str, port: u16) -> std::result::Result<Vec<SocketAddr>, ConnectError> {
    let addrs: Vec<SocketAddr> = lookup_host((host, port))
        .await
        .map_err(|e| {
            debug!("Name resolution for {} failed: {}", host, e);
            ConnectError::HostUnreachable
        })?
        .collect();

    if addrs.is_empty() {
        return Err(ConnectError::HostUnreachable);
    }
    Ok(addrs)
}

async fn handshake(
    connector: &TlsConnector,
    host: &str,
    tcp: TcpStream,
) -> std::result::Result<TlsTransport, ConnectError> {
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| ConnectError::Unknown(format!("Invalid server name: {e}")))?;

    let tls_stream = connector
        .connect(server_name, tcp)
        .await
        .map_err(|e| classify_io(&e))?;
    Ok(tls_stream.compat())
}

/// Upgrade with STARTTLS when the server allows it.
async fn starttls(
    connector: &TlsConnector,
    host: &str,
    tcp: TcpStream,
) -> std::result::Result<Box<dyn Transport>, ConnectError> {
    let mut client = async_imap::Client::new(tcp.compat());

    match client.run_command_and_check_ok("STARTTLS", None).await {
        Ok(()) => {
            let inner = client.into_inner().into_inner();
            Ok(Box::new(handshake(connector, host, inner).await?))
        }
        Err(ImapError::No(reason) | ImapError::Bad(reason)) => {
            warn!(
                "Server {} refused STARTTLS ({}), continuing without encryption",
                host, reason
            );
            Ok(Box::new(client.into_inner()))
        }
        Err(e) => Err(classify_imap(e)),
    }
}

async fn login(
    transport: Box<dyn Transport>,
    credentials: &Credentials,
) -> std::result::Result<MailSession, ConnectError> {
    let client = async_imap::Client::new(transport);

    match client
        .login(&credentials.username, &credentials.password)
        .await
    {
        Ok(session) => Ok(MailSession::new(session)),
        Err((e, mut client)) => {
            let class = classify_login(e);
            // Not authenticated, but the connection still gets a LOGOUT.
            let logout = client.run_command_and_check_ok("LOGOUT", None);
            if let Ok(Err(e)) = tokio::time::timeout(LOGOUT_TIMEOUT, logout).await {
                debug!("Logout after failed login: {e}");
            }
            Err(class)
        }
    }
}

/// Build a TLS connector, validating certificates against the
/// `webpki-roots` trust anchors unless `allow_insecure` is set.
fn tls_connector(allow_insecure: bool) -> std::result::Result<TlsConnector, ConnectError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| ConnectError::Unknown(format!("TLS setup failed: {e}")))?;

    let config = if allow_insecure {
        warn!("Certificate validation is disabled for this connection");
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth()
    } else {
        let roots = rustls::RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        builder.with_root_certificates(roots).with_no_client_auth()
    };

    Ok(TlsConnector::from(Arc::new(config)))
}

pub(crate) fn classify_io(err: &io::Error) -> ConnectError {
    if let Some(tls) = err
        .get_ref()
        .and_then(|inner| inner.downcast_ref::<rustls::Error>())
    {
        return classify_tls(tls);
    }

    match err.kind() {
        io::ErrorKind::ConnectionRefused => ConnectError::ConnectionRefused,
        io::ErrorKind::TimedOut => ConnectError::Timeout,
        io::ErrorKind::HostUnreachable | io::ErrorKind::NetworkUnreachable => {
            ConnectError::HostUnreachable
        }
        _ => ConnectError::Unknown(err.to_string()),
    }
}

fn classify_tls(err: &rustls::Error) -> ConnectError {
    match err {
        rustls::Error::InvalidCertificate(_) => ConnectError::InsecureCertificate,
        other => ConnectError::Unknown(format!("TLS error: {other}")),
    }
}

fn classify_imap(err: ImapError) -> ConnectError {
    match err {
        ImapError::Io(e) => classify_io(&e),
        other => ConnectError::Unknown(other.to_string()),
    }
}

/// A tagged `NO`/`BAD` in reply to LOGIN means the credentials were
/// rejected.
fn classify_login(err: ImapError) -> ConnectError {
    match err {
        ImapError::No(_) | ImapError::Bad(_) => ConnectError::AuthenticationFailed,
        other => classify_imap(other),
    }
}

/// Certificate verifier that accepts all certificates, used only when
/// the caller opts into `allow_insecure_tls`.
#[derive(Debug)]
struct AcceptAnyCertificate;

impl rustls::client::danger::ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
