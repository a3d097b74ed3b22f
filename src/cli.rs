//! `clap`-derived command-line surface (spec.md §6). Thin glue only: parses
//! arguments into the library's own `Endpoint`/`TlsPolicy`/`RunnerConfig`
//! values and hands off to `crate::runner` / `crate::probe`.

use clap::{Parser, Subcommand, ValueEnum};

use crate::endpoint::{ConnectionType, Endpoint, TlsPolicy};
use crate::error::{Error, Result};
use crate::runner::RunnerConfig;

#[derive(Parser)]
#[command(name = "msadoctor", about = "Diagnostic client for Message Submission Agents", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the full compliance battery against an MSA.
    Validate {
        host: String,
        port: u16,
        username: String,
        password: String,
        /// Also run the strict-only tests (e.g. plaintext must not advertise AUTH).
        #[arg(long)]
        strict: bool,
        /// Connect with implicit TLS instead of STARTTLS.
        #[arg(long)]
        tls: bool,
        /// Envelope sender used for the MAIL FROM/RCPT TO probe.
        #[arg(long, default_value = "")]
        sender: String,
    },
    /// Dump the negotiated TLS/cipher metadata.
    #[command(name = "probe:encryption")]
    ProbeEncryption {
        host: String,
        port: u16,
        /// Connect with implicit TLS instead of STARTTLS.
        #[arg(long)]
        tls: bool,
        #[arg(long, value_enum, default_value_t = OutputFormat::Console)]
        format: OutputFormat,
    },
    /// Dump the ESMTP extensions the server advertises after EHLO.
    #[command(name = "probe:extensions")]
    ProbeExtensions {
        host: String,
        port: u16,
        #[arg(long = "encryption-type", value_enum, default_value_t = EncryptionTypeArg::Auto)]
        encryption_type: EncryptionTypeArg,
        #[arg(long, value_enum, default_value_t = OutputFormat::Console)]
        format: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Console,
    Csv,
    Json,
}

/// `--encryption-type` values for `probe:extensions` (spec.md §4.6). `None`
/// and `Plain` are accepted as synonyms for the same plaintext connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum EncryptionTypeArg {
    Auto,
    None,
    Plain,
    Starttls,
    Tls,
}

impl From<EncryptionTypeArg> for ConnectionType {
    fn from(value: EncryptionTypeArg) -> Self {
        match value {
            EncryptionTypeArg::Auto => ConnectionType::Auto,
            EncryptionTypeArg::None | EncryptionTypeArg::Plain => ConnectionType::PlainText,
            EncryptionTypeArg::Starttls => ConnectionType::StartTls,
            EncryptionTypeArg::Tls => ConnectionType::Tls,
        }
    }
}

/// Validates `port` is non-zero (clap's `u16` already rejects >65535) and
/// builds the strict TLS policy `validate`/`probe:*` endpoints use, choosing
/// the TLS policy by whether the caller is `validate` (strict) or a `probe:*`
/// command (observational, spec.md §6).
fn build_endpoint(
    host: String,
    port: u16,
    connection_type: ConnectionType,
    policy: TlsPolicy,
) -> Result<Endpoint> {
    if port == 0 {
        return Err(Error::invalid_argument("port must be in [1,65535]"));
    }
    Endpoint::new(host, port, connection_type, policy)
}

impl Command {
    /// For `validate`, builds the `RunnerConfig` the battery runs against.
    pub fn into_runner_config(self) -> Result<RunnerConfig> {
        match self {
            Command::Validate {
                host,
                port,
                username,
                password,
                strict,
                tls,
                sender,
            } => {
                if port == 0 {
                    return Err(Error::invalid_argument("port must be in [1,65535]"));
                }
                Ok(RunnerConfig {
                    host,
                    port,
                    username,
                    password,
                    sender,
                    strict,
                    connection_type: if tls {
                        ConnectionType::Tls
                    } else {
                        ConnectionType::StartTls
                    },
                })
            }
            _ => Err(Error::invalid_argument("not a validate command")),
        }
    }

    /// For `probe:encryption`, the endpoint to connect/probe.
    pub fn into_encryption_endpoint(self) -> Result<(Endpoint, OutputFormat)> {
        match self {
            Command::ProbeEncryption { host, port, tls, format } => {
                let connection_type = if tls { ConnectionType::Tls } else { ConnectionType::StartTls };
                let endpoint = build_endpoint(host, port, connection_type, TlsPolicy::observational())?;
                Ok((endpoint, format))
            }
            _ => Err(Error::invalid_argument("not a probe:encryption command")),
        }
    }

    /// For `probe:extensions`, the endpoint to connect/probe.
    pub fn into_extensions_endpoint(self) -> Result<(Endpoint, OutputFormat)> {
        match self {
            Command::ProbeExtensions {
                host,
                port,
                encryption_type,
                format,
            } => {
                let endpoint = build_endpoint(
                    host,
                    port,
                    encryption_type.into(),
                    TlsPolicy::observational(),
                )?;
                Ok((endpoint, format))
            }
            _ => Err(Error::invalid_argument("not a probe:extensions command")),
        }
    }
}
