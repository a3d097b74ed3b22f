//! Bidirectional, line-oriented byte stream with connect/read/write
//! deadlines and an in-place plaintext→TLS upgrade.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, RootCertStore, SignatureScheme, StreamOwned};

use crate::endpoint::{CaBundle, ConnectionType, Endpoint, TlsPolicy, TlsProtocol};
use crate::error::{Error, Result};
use crate::transcript::Transcript;

/// Default connect timeout (spec.md §4.1).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_millis(3_000);
/// Default read/write timeout (spec.md §4.1).
pub const DEFAULT_RW_TIMEOUT: Duration = Duration::from_millis(15_000);

/// TLS/cipher metadata exposed after a successful handshake.
#[derive(Debug, Clone, Default)]
pub struct CryptoInfo {
    pub protocol: Option<String>,
    pub cipher_name: Option<String>,
    pub cipher_bits: Option<u16>,
    pub cipher_version: Option<String>,
}

/// Metadata `Transport::meta()` exposes.
#[derive(Debug, Clone, Default)]
pub struct TransportMeta {
    pub crypto: CryptoInfo,
}

enum Inner {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
    /// Transient placeholder used only for the instant between taking
    /// ownership of the plaintext socket and installing the TLS-wrapped one.
    Closed,
}

impl Read for Inner {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Inner::Plain(s) => s.read(buf),
            Inner::Tls(s) => s.read(buf),
            Inner::Closed => Ok(0),
        }
    }
}

impl Write for Inner {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Inner::Plain(s) => s.write(buf),
            Inner::Tls(s) => s.write(buf),
            Inner::Closed => Err(io::Error::new(io::ErrorKind::NotConnected, "transport closed")),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Inner::Plain(s) => s.flush(),
            Inner::Tls(s) => s.flush(),
            Inner::Closed => Ok(()),
        }
    }
}

/// The live socket plus its diagnostic transcript.
pub struct Transport {
    stream: BufReader<Inner>,
    meta: TransportMeta,
    transcript: Transcript,
}

impl Transport {
    /// Opens a transport to `endpoint`. For `ConnectionType::Tls` the TLS
    /// handshake happens during connect; otherwise the socket starts
    /// plaintext (callers upgrade later with `start_tls`).
    pub fn open(
        endpoint: &Endpoint,
        connect_timeout: Duration,
        rw_timeout: Duration,
    ) -> Result<Transport> {
        let addrs = endpoint.resolve()?;
        #[cfg(feature = "tracing")]
        tracing::debug!(host = endpoint.host(), port = endpoint.port(), "connecting");
        let tcp = connect_with_timeout(&addrs, connect_timeout)?;
        tcp.set_read_timeout(Some(rw_timeout))
            .map_err(|e| Error::connect(e.to_string(), e.raw_os_error()))?;
        tcp.set_write_timeout(Some(rw_timeout))
            .map_err(|e| Error::connect(e.to_string(), e.raw_os_error()))?;
        tcp.set_nodelay(true).ok();
        #[cfg(feature = "tracing")]
        tracing::debug!("TCP connection established");

        let mut transport = Transport {
            stream: BufReader::new(Inner::Plain(tcp)),
            meta: TransportMeta::default(),
            transcript: Transcript::new(),
        };

        if endpoint.connection_type() == ConnectionType::Tls {
            #[cfg(feature = "tracing")]
            tracing::debug!("connecting with implicit TLS");
            transport.start_tls(endpoint.tls_policy(), endpoint.host())?;
        }

        Ok(transport)
    }

    /// Reads one CRLF- (or bare-LF-) terminated line, with the terminator
    /// stripped.
    pub fn read_line(&mut self) -> Result<String> {
        self.read_line_raw()?
            .ok_or_else(|| Error::ReadFailure("connection closed by peer".into()))
    }

    /// Like `read_line`, but distinguishes a clean EOF (`Ok(None)`) from any
    /// other read failure, so `Session::read_reply` can treat "the peer
    /// closed the socket before sending a terminator line" as spec.md
    /// §4.2's `no_valid_reply` condition rather than a generic `ReadFailure`.
    pub(crate) fn read_line_raw(&mut self) -> Result<Option<String>> {
        let mut raw = String::new();
        let n = self
            .stream
            .read_line(&mut raw)
            .map_err(|e| Error::ReadFailure(e.to_string()))?;
        if n == 0 {
            return Ok(None);
        }
        while raw.ends_with('\n') || raw.ends_with('\r') {
            raw.pop();
        }
        self.transcript.record_server(&raw);
        Ok(Some(raw))
    }

    /// Writes `text` with CRLF appended. Rejects inputs containing CR or LF.
    pub fn write_line(&mut self, text: &str) -> Result<()> {
        self.write_line_impl(text, false)
    }

    /// Same as `write_line`, but the transcript records the redaction
    /// marker instead of `text` (used for SASL payloads while an
    /// `auth_guard` is active).
    pub fn write_line_hidden(&mut self, text: &str) -> Result<()> {
        self.write_line_impl(text, true)
    }

    fn write_line_impl(&mut self, text: &str, hidden: bool) -> Result<()> {
        if text.contains('\r') || text.contains('\n') {
            return Err(Error::WriteFailure(
                "line must not contain CR or LF".into(),
            ));
        }
        let inner = self.stream.get_mut();
        inner
            .write_all(text.as_bytes())
            .and_then(|_| inner.write_all(b"\r\n"))
            .and_then(|_| inner.flush())
            .map_err(|e| Error::WriteFailure(e.to_string()))?;
        self.transcript.record_client(text, hidden);
        Ok(())
    }

    /// Upgrades an established plaintext socket to TLS in place.
    ///
    /// Precondition: no bytes buffered beyond the already-consumed STARTTLS
    /// 220 reply. A well-behaved server never pipelines past that reply, so
    /// any leftover buffered bytes are treated as a protocol violation.
    pub fn start_tls(&mut self, policy: &TlsPolicy, server_name: &str) -> Result<()> {
        if !self.stream.buffer().is_empty() {
            return Err(Error::crypto(
                "server sent data past the STARTTLS reply before handshake",
            ));
        }

        self.transcript.record_marker("-- STARTTLS handshake --");
        #[cfg(feature = "tracing")]
        tracing::debug!(server_name, "starting TLS handshake");

        let config = build_client_config(policy)?;
        let name = ServerName::try_from(server_name.to_string())
            .map_err(|e| Error::crypto(format!("invalid server name for SNI: {e}")))?;
        let conn = ClientConnection::new(config, name)
            .map_err(|e| Error::crypto(format!("TLS setup failed: {e}")))?;

        let tcp = match std::mem::replace(self.stream.get_mut(), Inner::Closed) {
            Inner::Plain(tcp) => tcp,
            Inner::Tls(_) => {
                return Err(Error::domain(
                    "start_tls called on an already-encrypted transport",
                ))
            }
            Inner::Closed => return Err(Error::domain("start_tls called on a closed transport")),
        };

        let mut tls_stream = StreamOwned::new(conn, tcp);
        // Drive the handshake to completion with an explicit 0-byte write/flush;
        // a read would block waiting on the peer's first post-handshake line.
        if let Err(e) = tls_stream.conn.complete_io(&mut tls_stream.sock) {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "TLS handshake failed");
            return Err(Error::crypto(format!("TLS handshake failed: {e}")));
        }

        self.meta.crypto = crypto_info(&tls_stream.conn);
        #[cfg(feature = "tracing")]
        tracing::debug!(
            protocol = ?self.meta.crypto.protocol,
            cipher = ?self.meta.crypto.cipher_name,
            "TLS handshake complete"
        );
        self.stream = BufReader::new(Inner::Tls(Box::new(tls_stream)));
        Ok(())
    }

    pub fn meta(&self) -> &TransportMeta {
        &self.meta
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.stream.get_ref(), Inner::Tls(_))
    }

    /// Idempotent close.
    pub fn close(&mut self) {
        match self.stream.get_mut() {
            Inner::Plain(tcp) => {
                let _ = tcp.shutdown(std::net::Shutdown::Both);
            }
            Inner::Tls(stream) => {
                let _ = stream.sock.shutdown(std::net::Shutdown::Both);
            }
            Inner::Closed => {}
        }
    }
}

/// Connects to the first reachable address in `addrs`, sharing one overall
/// deadline across every candidate rather than re-arming a fresh `timeout`
/// per address (what `TcpStream::connect_timeout` in a loop would do).
/// Built on `socket2::Socket::connect_timeout`, which drives the nonblocking
/// connect/poll itself.
fn connect_with_timeout(addrs: &[SocketAddr], timeout: Duration) -> Result<TcpStream> {
    use socket2::{Domain, Protocol, Socket, Type};

    let deadline = Instant::now() + timeout;
    let mut last_err = None;
    for addr in addrs {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let socket = match Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP)) {
            Ok(s) => s,
            Err(e) => {
                last_err = Some((e, addr.to_string()));
                continue;
            }
        };
        match socket.connect_timeout(&(*addr).into(), remaining) {
            Ok(()) => return Ok(socket.into()),
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%addr, error = %e, "connect attempt failed, trying next address");
                last_err = Some((e, addr.to_string()));
            }
        }
    }
    match last_err {
        Some((err, addr)) => Err(Error::connect(
            format!("could not connect to {addr}: {err}"),
            err.raw_os_error(),
        )),
        None => Err(Error::connect("connect timed out before any address was tried", None)),
    }
}

/// Renders a negotiated protocol version the way the spec's TLS-version
/// checks expect (`"TLSv1"`, `"TLSv1.1"`, `"TLSv1.2"`, `"TLSv1.3"`), rather
/// than `rustls::ProtocolVersion`'s `Debug` spelling.
fn protocol_label(version: rustls::ProtocolVersion) -> String {
    match version {
        rustls::ProtocolVersion::SSLv3 => "SSLv3".to_string(),
        rustls::ProtocolVersion::TLSv1_0 => "TLSv1".to_string(),
        rustls::ProtocolVersion::TLSv1_1 => "TLSv1.1".to_string(),
        rustls::ProtocolVersion::TLSv1_2 => "TLSv1.2".to_string(),
        rustls::ProtocolVersion::TLSv1_3 => "TLSv1.3".to_string(),
        other => format!("{other:?}"),
    }
}

/// rustls does not expose a symmetric-key bit count directly; it is
/// recoverable from the cipher suite name (e.g. `..._AES_256_GCM_...`),
/// which is the best-effort approach the IANA suite names are designed for.
fn cipher_bits_from_name(name: &str) -> Option<u16> {
    for bits in ["256", "128", "192"] {
        if name.contains(bits) {
            return bits.parse().ok();
        }
    }
    None
}

fn crypto_info(conn: &ClientConnection) -> CryptoInfo {
    let protocol = conn.protocol_version().map(protocol_label);
    let suite = conn.negotiated_cipher_suite();
    let cipher_name = suite.map(|s| format!("{:?}", s.suite()));
    let cipher_bits = cipher_name.as_deref().and_then(cipher_bits_from_name);
    CryptoInfo {
        protocol,
        cipher_name,
        cipher_bits,
        cipher_version: suite.map(|s| format!("{:?}", s.version())),
    }
}

/// The concrete `&rustls::SupportedProtocolVersion`s allowed by a policy's
/// `min_protocol..=max_protocol` range. rustls 0.23 with the `ring` provider
/// only ever negotiates TLS 1.2/1.3 regardless of this crate's
/// `TlsProtocol::Tls1_0`/`Tls1_1` variants (kept so `protocol_label` can
/// still render a pre-1.2 result if a future provider ever produced one).
fn protocol_versions(policy: &TlsPolicy) -> Vec<&'static rustls::SupportedProtocolVersion> {
    let mut versions = Vec::with_capacity(2);
    if policy.min_protocol <= TlsProtocol::Tls1_2 && policy.max_protocol >= TlsProtocol::Tls1_2 {
        versions.push(&rustls::version::TLS12);
    }
    if policy.min_protocol <= TlsProtocol::Tls1_3 && policy.max_protocol >= TlsProtocol::Tls1_3 {
        versions.push(&rustls::version::TLS13);
    }
    versions
}

fn build_client_config(policy: &TlsPolicy) -> Result<Arc<ClientConfig>> {
    let skip_chain_verification = !policy.verify_peer || policy.allow_self_signed;
    let versions = protocol_versions(policy);

    let builder = ClientConfig::builder_with_protocol_versions(&versions);
    let config = if skip_chain_verification {
        builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAllVerifier))
            .with_no_client_auth()
    } else {
        let roots = Arc::new(load_roots(&policy.ca_bundle)?);
        if policy.verify_hostname {
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            let inner = WebPkiServerVerifier::builder(roots)
                .build()
                .map_err(|e| Error::crypto(format!("could not build certificate verifier: {e}")))?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(ChainOnlyVerifier { inner }))
                .with_no_client_auth()
        }
    };
    Ok(Arc::new(config))
}

/// Wraps the standard chain/expiry verifier but tolerates a hostname
/// mismatch, for `TlsPolicy { verify_peer: true, verify_hostname: false }`.
#[derive(Debug)]
struct ChainOnlyVerifier {
    inner: Arc<WebPkiServerVerifier>,
}

impl ServerCertVerifier for ChainOnlyVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        match self
            .inner
            .verify_server_cert(end_entity, intermediates, server_name, ocsp_response, now)
        {
            Ok(v) => Ok(v),
            // Chain/expiry are sound, only the hostname didn't match: that's
            // exactly what `verify_hostname: false` asks to ignore.
            Err(rustls::Error::InvalidCertificate(e)) if format!("{e:?}").contains("NotValidForName") => {
                Ok(ServerCertVerified::assertion())
            }
            Err(e) => Err(e),
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

fn load_roots(bundle: &CaBundle) -> Result<RootCertStore> {
    let mut roots = RootCertStore::empty();
    match bundle {
        CaBundle::Bundled => {
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        }
        CaBundle::Path(path) => {
            let pem = std::fs::read(path)
                .map_err(|e| Error::crypto(format!("could not read CA bundle {path:?}: {e}")))?;
            add_pem_certs(&mut roots, &pem)?;
        }
        CaBundle::Bytes(bytes) => {
            add_pem_certs(&mut roots, bytes)?;
        }
    }
    Ok(roots)
}

fn add_pem_certs(roots: &mut RootCertStore, pem: &[u8]) -> Result<()> {
    let mut reader = io::BufReader::new(pem);
    for cert in rustls_pemfile::certs(&mut reader) {
        let cert = cert.map_err(|e| Error::crypto(format!("invalid CA certificate: {e}")))?;
        roots
            .add(cert)
            .map_err(|e| Error::crypto(format!("could not add CA certificate: {e}")))?;
    }
    Ok(())
}

/// Accepts any certificate chain and any hostname. Used only by the
/// `probe:*` commands, whose purpose is observation, never by `validate`.
#[derive(Debug)]
struct AcceptAllVerifier;

impl ServerCertVerifier for AcceptAllVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
        .map(|_| HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(
            message,
            cert,
            dss,
            &rustls::crypto::ring::default_provider().signature_verification_algorithms,
        )
        .map(|_| HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
