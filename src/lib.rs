//! `msa-doctor`: a diagnostic client for Message Submission Agents.
//!
//! Probes an SMTP/ESMTP endpoint, negotiates STARTTLS or implicit TLS,
//! exercises SASL authentication (CRAM-MD5, LOGIN, PLAIN), and reports
//! whether the server is correctly and securely configured for message
//! submission. This crate is the dialogue engine and compliance-test
//! runner; command-line parsing and output formatting are thin layers on
//! top (`src/cli.rs`, `src/format.rs`, `src/bin/msadoctor.rs`).
//!
//! Not a relay or MTA: there is no DATA phase, no payload delivery, no
//! server-side SMTP.

pub mod cli;
pub mod endpoint;
pub mod error;
pub mod factory;
pub mod format;
pub mod probe;
pub mod reply;
pub mod runner;
pub mod sasl;
pub mod session;
pub mod transcript;
pub mod transport;

pub use endpoint::{CaBundle, ConnectionType, Endpoint, TlsPolicy, TlsProtocol};
pub use error::{Error, Result};
pub use factory::{ConnectionFactory, DefaultFactory};
pub use runner::{run, RunReport, RunnerConfig, TestOutcome};
pub use sasl::Mechanism;
pub use session::{AuthenticationRequired, ExtensionTable, Identity, Session};
