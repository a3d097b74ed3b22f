//! Drives the full `Validation Runner` battery (spec.md §4.5, scenario 1 in
//! §8) against a fake MSA that implements the whole dialogue: STARTTLS,
//! CRAM-MD5/LOGIN/PLAIN AUTH, and auth-gated MAIL/RCPT.

mod common;

use msa_doctor::{ConnectionFactory, ConnectionType, Endpoint, Result, Session, TlsPolicy};
use msa_doctor::runner::{run, RunnerConfig};

/// Test-only factory: connects exactly like `DefaultFactory`, but relaxes
/// the endpoint's TLS policy to accept the fake MSA's self-signed
/// certificate. This is the "test injection point" spec.md §4.5 calls the
/// Connection Factory out as.
struct RelaxedTlsFactory;

impl ConnectionFactory for RelaxedTlsFactory {
    fn connect(&self, endpoint: Endpoint) -> Result<Session> {
        let relaxed = Endpoint::new(
            endpoint.host().to_string(),
            endpoint.port(),
            endpoint.connection_type(),
            TlsPolicy::observational(),
        )?;
        let mut session = Session::new(relaxed);
        session.connect()?;
        session.probe()?;
        Ok(session)
    }
}

#[test]
fn full_battery_passes_against_a_compliant_fake_msa() {
    let port = common::spawn_fake_msa("gooduser", "goodpass");

    let config = RunnerConfig {
        host: "127.0.0.1".to_string(),
        port,
        username: "gooduser".to_string(),
        password: "goodpass".to_string(),
        sender: String::new(),
        strict: false,
        connection_type: ConnectionType::StartTls,
    };

    let report = run(&RelaxedTlsFactory, &config);
    for outcome in &report.outcomes {
        assert!(
            outcome.passed,
            "test {:?} failed: {:?}\n{}",
            outcome.description,
            outcome.error,
            outcome.transcript.clone().unwrap_or_default()
        );
    }
    assert!(report.all_passed());
}

#[test]
fn strict_battery_flags_auth_advertised_over_plaintext_without_skipping_later_tests() {
    // The fake MSA advertises AUTH on its very first EHLO, before any
    // STARTTLS upgrade — a real misconfiguration the strict-only
    // `plain_text_auth_disallowed` test exists to catch.
    let port = common::spawn_fake_msa("gooduser", "goodpass");

    let config = RunnerConfig {
        host: "127.0.0.1".to_string(),
        port,
        username: "gooduser".to_string(),
        password: "goodpass".to_string(),
        sender: String::new(),
        strict: true,
        connection_type: ConnectionType::StartTls,
    };

    let report = run(&RelaxedTlsFactory, &config);
    assert_eq!(report.outcomes.len(), 7, "strict mode runs all seven tests");
    assert!(!report.outcomes[0].passed, "plaintext AUTH exposure must FAIL");
    assert!(!report.all_passed());
    // A failure in the first test must not stop the rest of the battery
    // from running against their own fresh sessions.
    assert!(report.outcomes[1..].iter().any(|o| o.passed));
}
