//! Endpoint addressing and TLS policy — the data the Session is built from.

use std::fmt;
use std::net::ToSocketAddrs;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::{Error, Result};

/// How the client should establish transport encryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionType {
    /// Use STARTTLS if the server advertises it, otherwise stay in plaintext.
    Auto,
    /// Never attempt encryption.
    PlainText,
    /// Require the server to advertise STARTTLS and upgrade in-band.
    StartTls,
    /// Connect with TLS already established (implicit TLS, e.g. submissions/465).
    Tls,
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionType::Auto => "auto",
            ConnectionType::PlainText => "plain",
            ConnectionType::StartTls => "starttls",
            ConnectionType::Tls => "tls",
        };
        f.write_str(s)
    }
}

/// Where to source the CA bundle consulted during TLS verification.
#[derive(Debug, Clone)]
pub enum CaBundle {
    /// Bundled Mozilla root store (`webpki-roots`), no filesystem access.
    Bundled,
    /// Read PEM certificates from this path (file or directory of files).
    Path(PathBuf),
    /// Already-loaded PEM bytes.
    Bytes(Arc<[u8]>),
}

impl Default for CaBundle {
    fn default() -> Self {
        CaBundle::Bundled
    }
}

/// TLS verification and protocol-version policy.
#[derive(Debug, Clone)]
pub struct TlsPolicy {
    pub verify_peer: bool,
    pub verify_hostname: bool,
    pub allow_self_signed: bool,
    pub ca_bundle: CaBundle,
    pub min_protocol: TlsProtocol,
    pub max_protocol: TlsProtocol,
    pub sni: bool,
}

/// Negotiated/acceptable TLS protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TlsProtocol {
    Tls1_0,
    Tls1_1,
    Tls1_2,
    Tls1_3,
}

impl TlsProtocol {
    pub fn as_str(self) -> &'static str {
        match self {
            TlsProtocol::Tls1_0 => "TLSv1",
            TlsProtocol::Tls1_1 => "TLSv1.1",
            TlsProtocol::Tls1_2 => "TLSv1.2",
            TlsProtocol::Tls1_3 => "TLSv1.3",
        }
    }
}

impl TlsPolicy {
    /// The policy used by `validate`: strict verification, bundled roots.
    pub fn strict() -> TlsPolicy {
        TlsPolicy {
            verify_peer: true,
            verify_hostname: true,
            allow_self_signed: false,
            ca_bundle: CaBundle::Bundled,
            min_protocol: TlsProtocol::Tls1_2,
            max_protocol: TlsProtocol::Tls1_3,
            sni: true,
        }
    }

    /// The relaxed policy used by the `probe:*` commands: observation only.
    pub fn observational() -> TlsPolicy {
        TlsPolicy {
            verify_peer: false,
            verify_hostname: false,
            allow_self_signed: true,
            ca_bundle: CaBundle::Bundled,
            min_protocol: TlsProtocol::Tls1_0,
            max_protocol: TlsProtocol::Tls1_3,
            sni: true,
        }
    }
}

impl Default for TlsPolicy {
    fn default() -> Self {
        TlsPolicy::strict()
    }
}

/// A submission endpoint: host/port plus how to reach it securely.
#[derive(Debug, Clone)]
pub struct Endpoint {
    host: String,
    port: u16,
    connection_type: ConnectionType,
    tls_policy: TlsPolicy,
}

impl Endpoint {
    /// Validates `host`/`port` and builds an `Endpoint`.
    ///
    /// `port` is already a `u16` at the type level (rejecting the literal 0
    /// and anything above 65535 is therefore a parse-time concern for
    /// callers reading untyped input; see `src/cli.rs`). `host` must be a
    /// non-empty string that is either a valid IP literal or resolvable at
    /// construction time; `resolve()` repeats the lookup at connect time
    /// since DNS can change between construction and connect.
    pub fn new(
        host: impl Into<String>,
        port: u16,
        connection_type: ConnectionType,
        tls_policy: TlsPolicy,
    ) -> Result<Endpoint> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(Error::invalid_argument("host must not be empty"));
        }
        if port == 0 {
            return Err(Error::invalid_argument("port must be in [1,65535]"));
        }
        resolve_host(&host, port)?;
        Ok(Endpoint {
            host,
            port,
            connection_type,
            tls_policy,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub fn tls_policy(&self) -> &TlsPolicy {
        &self.tls_policy
    }

    /// Re-resolves `host:port` at connect time. `Endpoint::new` already
    /// rejected an unresolvable host at construction; this repeats the
    /// lookup rather than caching it, since the set of addresses a name
    /// resolves to can change between construction and connect.
    pub fn resolve(&self) -> Result<Vec<std::net::SocketAddr>> {
        resolve_host(&self.host, self.port)
    }
}

/// Shared by `Endpoint::new` (construction-time rejection) and
/// `Endpoint::resolve` (connect-time lookup): resolves `host:port`,
/// rejecting inputs that are neither a literal address nor resolvable to
/// one.
fn resolve_host(host: &str, port: u16) -> Result<Vec<std::net::SocketAddr>> {
    let addrs: Vec<_> = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::invalid_argument(format!("unresolvable host {host}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return Err(Error::invalid_argument(format!(
            "host {host} did not resolve to any address"
        )));
    }
    Ok(addrs)
}
