//! Validation Runner: the fixed, ordered compliance battery (spec.md §4.5).
//!
//! Each test gets a fresh `Session` from the `ConnectionFactory` — new TCP
//! connection, new EHLO, possibly new STARTTLS — so no implicit state
//! crosses tests. A failure in one test never skips later ones.

use crate::endpoint::{ConnectionType, Endpoint, TlsPolicy};
use crate::error::{Error, Result};
use crate::factory::ConnectionFactory;
use crate::sasl::{Mechanism, SUPPORTED_PRIORITY};
use crate::session::random_hex;

/// Inputs the fixed battery is run against.
pub struct RunnerConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub sender: String,
    pub strict: bool,
    /// The connection type selected on the CLI: `StartTls` (default) or
    /// `Tls` (with `--tls`). Never `Auto`/`PlainText` here — those are used
    /// internally by specific tests.
    pub connection_type: ConnectionType,
}

/// Outcome of a single test in the battery.
pub struct TestOutcome {
    pub description: &'static str,
    pub passed: bool,
    /// Populated only on failure.
    pub transcript: Option<String>,
    pub error: Option<String>,
}

/// The full report produced by one run of the battery.
pub struct RunReport {
    pub outcomes: Vec<TestOutcome>,
}

impl RunReport {
    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(|o| o.passed)
    }
}

type TestFn = fn(&dyn ConnectionFactory, &RunnerConfig) -> (Result<()>, String);

struct TestSpec {
    description: &'static str,
    strict_only: bool,
    func: TestFn,
}

const TESTS: &[TestSpec] = &[
    TestSpec {
        description: "plaintext connections do not advertise AUTH",
        strict_only: true,
        func: test_plain_text_auth_disallowed,
    },
    TestSpec {
        description: "negotiated TLS protocol is modern (not TLSv1/TLSv1.1)",
        strict_only: false,
        func: test_tls_protocol_modern,
    },
    TestSpec {
        description: "server advertises AUTH",
        strict_only: false,
        func: test_auth_supported,
    },
    TestSpec {
        description: "server advertises a supported AUTH mechanism",
        strict_only: false,
        func: test_auth_mechanism_supported,
    },
    TestSpec {
        description: "submission requires authentication",
        strict_only: false,
        func: test_auth_required_for_submission,
    },
    TestSpec {
        description: "invalid credentials are rejected",
        strict_only: false,
        func: test_invalid_credentials_rejected,
    },
    TestSpec {
        description: "valid credentials are accepted and unlock submission",
        strict_only: false,
        func: test_valid_credentials_accepted_and_submission_unlocked,
    },
];

/// Runs the fixed battery against `config`, producing one outcome per
/// applicable test (strict-only tests are skipped unless `config.strict`).
pub fn run(factory: &dyn ConnectionFactory, config: &RunnerConfig) -> RunReport {
    let mut outcomes = Vec::with_capacity(TESTS.len());
    for spec in TESTS {
        if spec.strict_only && !config.strict {
            #[cfg(feature = "tracing")]
            tracing::debug!(test = spec.description, "skipping strict-only test");
            continue;
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(test = spec.description, "running test");
        let (result, transcript) = (spec.func)(factory, config);
        let passed = result.is_ok();
        #[cfg(feature = "tracing")]
        tracing::debug!(test = spec.description, passed, "test finished");
        outcomes.push(TestOutcome {
            description: spec.description,
            passed,
            transcript: if passed { None } else { Some(transcript) },
            error: result.err().map(|e| e.to_string()),
        });
    }
    RunReport { outcomes }
}

fn endpoint(config: &RunnerConfig, connection_type: ConnectionType, policy: TlsPolicy) -> Result<Endpoint> {
    Endpoint::new(config.host.clone(), config.port, connection_type, policy)
}

/// Every test follows this shape: connect+probe a session, run one
/// assertion against it, and hand back the transcript for the Runner to
/// attach on failure.
fn with_fresh_session<F>(
    factory: &dyn ConnectionFactory,
    config: &RunnerConfig,
    connection_type: ConnectionType,
    policy: TlsPolicy,
    body: F,
) -> (Result<()>, String)
where
    F: FnOnce(&mut crate::session::Session) -> Result<()>,
{
    let endpoint = match endpoint(config, connection_type, policy) {
        Ok(e) => e,
        Err(e) => return (Err(e), String::new()),
    };
    #[cfg(feature = "tracing")]
    tracing::debug!(?connection_type, "opening fresh session for test");
    match factory.connect(endpoint) {
        Ok(mut session) => {
            let result = body(&mut session);
            let transcript = session.debug_transcript();
            session.disconnect();
            (result, transcript)
        }
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::debug!(error = %e, "could not establish session for test");
            (Err(e), String::new())
        }
    }
}

fn test_plain_text_auth_disallowed(
    factory: &dyn ConnectionFactory,
    config: &RunnerConfig,
) -> (Result<()>, String) {
    if config.connection_type == ConnectionType::Tls {
        // Not applicable: the endpoint is implicit-TLS-only, there is no
        // plaintext dialect to probe. Report a vacuous pass.
        return (Ok(()), String::new());
    }
    with_fresh_session(
        factory,
        config,
        ConnectionType::PlainText,
        TlsPolicy::strict(),
        |session| {
            if session.extensions().contains("AUTH") {
                Err(Error::domain(
                    "server advertises AUTH over an unencrypted connection",
                ))
            } else {
                Ok(())
            }
        },
    )
}

fn test_tls_protocol_modern(
    factory: &dyn ConnectionFactory,
    config: &RunnerConfig,
) -> (Result<()>, String) {
    with_fresh_session(
        factory,
        config,
        config.connection_type,
        TlsPolicy::strict(),
        |session| {
            let protocol = session
                .transport_meta()
                .and_then(|m| m.crypto.protocol.as_deref());
            match protocol {
                Some("TLSv1") | Some("TLSv1.1") | None => Err(Error::domain(format!(
                    "negotiated TLS protocol is not modern: {protocol:?}"
                ))),
                Some(_) => Ok(()),
            }
        },
    )
}

fn test_auth_supported(factory: &dyn ConnectionFactory, config: &RunnerConfig) -> (Result<()>, String) {
    with_fresh_session(
        factory,
        config,
        config.connection_type,
        TlsPolicy::strict(),
        |session| {
            if session.extensions().contains("AUTH") {
                Ok(())
            } else {
                Err(Error::domain("server does not advertise AUTH"))
            }
        },
    )
}

fn test_auth_mechanism_supported(
    factory: &dyn ConnectionFactory,
    config: &RunnerConfig,
) -> (Result<()>, String) {
    with_fresh_session(
        factory,
        config,
        config.connection_type,
        TlsPolicy::strict(),
        |session| {
            let offered = session.extensions().get("AUTH").unwrap_or(&[]);
            let supported = offered.iter().any(|m| {
                SUPPORTED_PRIORITY
                    .iter()
                    .any(|s| s.eq_ignore_ascii_case(m))
            });
            if supported {
                Ok(())
            } else {
                Err(Error::domain(
                    "server's AUTH mechanisms do not intersect CRAM-MD5/LOGIN/PLAIN",
                ))
            }
        },
    )
}

fn test_auth_required_for_submission(
    factory: &dyn ConnectionFactory,
    config: &RunnerConfig,
) -> (Result<()>, String) {
    with_fresh_session(
        factory,
        config,
        config.connection_type,
        TlsPolicy::strict(),
        |session| {
            let required = session.is_authentication_required(&config.sender)?;
            if required.0 {
                Ok(())
            } else {
                Err(Error::domain(
                    "server accepted submission without authentication",
                ))
            }
        },
    )
}

fn test_invalid_credentials_rejected(
    factory: &dyn ConnectionFactory,
    config: &RunnerConfig,
) -> (Result<()>, String) {
    with_fresh_session(
        factory,
        config,
        config.connection_type,
        TlsPolicy::strict(),
        |session| {
            let offered = session.extensions().get("AUTH").unwrap_or(&[]).to_vec();
            let bogus_user = random_hex(16);
            let bogus_pass = random_hex(16);
            let mechanism = Mechanism::select(&offered, &bogus_user, &bogus_pass)
                .ok_or_else(|| Error::domain("no compatible AUTH mechanism to test"))?;
            match session.authenticate(mechanism, true) {
                Err(Error::AuthenticationFailure { .. }) => Ok(()),
                Err(other) => Err(other),
                Ok(()) => Err(Error::domain(
                    "server accepted fabricated random credentials",
                )),
            }
        },
    )
}

fn test_valid_credentials_accepted_and_submission_unlocked(
    factory: &dyn ConnectionFactory,
    config: &RunnerConfig,
) -> (Result<()>, String) {
    with_fresh_session(
        factory,
        config,
        config.connection_type,
        TlsPolicy::strict(),
        |session| {
            let offered = session.extensions().get("AUTH").unwrap_or(&[]).to_vec();
            let mechanism = Mechanism::select(&offered, &config.username, &config.password)
                .ok_or_else(|| Error::domain("no compatible AUTH mechanism to use"))?;
            session.authenticate(mechanism, true)?;
            let required = session.is_authentication_required(&config.sender)?;
            if required.0 {
                Err(Error::domain(
                    "submission still required authentication after a successful login",
                ))
            } else {
                Ok(())
            }
        },
    )
}
