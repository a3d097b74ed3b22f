//! The SMTP protocol state machine: greeting, EHLO/HELO, STARTTLS, AUTH,
//! and the MAIL/RCPT submission probe.

use std::collections::HashMap;
use std::time::Duration;

use rand::RngCore;

use crate::endpoint::{ConnectionType, Endpoint};
use crate::error::{Error, Result};
use crate::reply::{Reply, ReplyParser};
use crate::sasl::Mechanism;
use crate::transport::{Transport, TransportMeta, DEFAULT_CONNECT_TIMEOUT, DEFAULT_RW_TIMEOUT};

/// Fixed HELO/EHLO identity this client presents (spec.md §6).
pub const HELO_DOMAIN: &str = "librarymarket.com";

/// Internal progress marker. Doesn't gate every call with the ceremony a
/// full typestate encoding would (each test in the Runner's battery drives
/// a fresh Session through the same few transitions, and STARTTLS-then-HELO
/// fallback needs to revisit "Extended"), but every public method still
/// checks it and returns the spec's documented error for an out-of-order
/// call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Unconnected,
    Connected,
    Greeted,
    Probed,
    Closed,
}

/// Extensions advertised in an EHLO reply: uppercase keyword → raw
/// parameter tokens, insertion-ordered.
#[derive(Debug, Clone, Default)]
pub struct ExtensionTable {
    order: Vec<String>,
    params: HashMap<String, Vec<String>>,
}

impl ExtensionTable {
    fn insert(&mut self, keyword: String, params: Vec<String>) {
        if !self.params.contains_key(&keyword) {
            self.order.push(keyword.clone());
        }
        self.params.insert(keyword, params);
    }

    pub fn contains(&self, keyword: &str) -> bool {
        self.params.contains_key(&keyword.to_ascii_uppercase())
    }

    pub fn get(&self, keyword: &str) -> Option<&[String]> {
        self.params
            .get(&keyword.to_ascii_uppercase())
            .map(Vec::as_slice)
    }

    pub fn keywords(&self) -> &[String] {
        &self.order
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The server's self-identification, taken from its 220 greeting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity(String);

impl Identity {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Whether authentication is required for submission, per
/// `is_authentication_required`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticationRequired(pub bool);

/// A single connected SMTP dialogue.
pub struct Session {
    endpoint: Endpoint,
    connect_timeout: Duration,
    rw_timeout: Duration,
    transport: Option<Transport>,
    identity: Option<Identity>,
    extensions: ExtensionTable,
    phase: Phase,
    auth_guard: bool,
}

impl Session {
    pub fn new(endpoint: Endpoint) -> Session {
        Session {
            endpoint,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            rw_timeout: DEFAULT_RW_TIMEOUT,
            transport: None,
            identity: None,
            extensions: ExtensionTable::default(),
            phase: Phase::Unconnected,
            auth_guard: false,
        }
    }

    pub fn with_timeouts(mut self, connect_timeout: Duration, rw_timeout: Duration) -> Session {
        self.connect_timeout = connect_timeout;
        self.rw_timeout = rw_timeout;
        self
    }

    /// Opens the underlying Transport. Fails with `DomainError` if called
    /// twice.
    pub fn connect(&mut self) -> Result<()> {
        if self.phase != Phase::Unconnected {
            return Err(Error::domain("session is already connected"));
        }
        let transport = Transport::open(&self.endpoint, self.connect_timeout, self.rw_timeout)?;
        self.transport = Some(transport);
        self.phase = Phase::Connected;
        Ok(())
    }

    fn transport_mut(&mut self) -> Result<&mut Transport> {
        self.transport
            .as_mut()
            .ok_or_else(|| Error::domain("session has no live transport"))
    }

    fn read_reply(&mut self) -> Result<Reply> {
        let transport = self.transport_mut()?;
        let mut parser = ReplyParser::new();
        loop {
            match transport.read_line_raw() {
                Ok(Some(line)) => {
                    if !parser.feed(&line) {
                        break;
                    }
                }
                Ok(None) => {
                    // Stream closed before any terminator line arrived:
                    // spec.md §4.2's `no_valid_reply` condition.
                    let lines = parser.into_reply().lines;
                    self.poison();
                    return Err(Error::no_valid_reply(lines));
                }
                Err(e) => {
                    self.poison();
                    return Err(e);
                }
            }
        }
        Ok(parser.into_reply())
    }

    fn write_command(&mut self, line: &str) -> Result<()> {
        let transport = self.transport_mut()?;
        let result = if self.auth_guard {
            transport.write_line_hidden(line)
        } else {
            transport.write_line(line)
        };
        if result.is_err() {
            self.poison();
        }
        result
    }

    fn poison(&mut self) {
        if let Some(t) = self.transport.as_mut() {
            t.close();
        }
        self.phase = Phase::Closed;
    }

    /// Drives greeting → EHLO/HELO → (STARTTLS) negotiation to completion.
    pub fn probe(&mut self) -> Result<()> {
        if self.phase != Phase::Connected {
            return Err(Error::domain("probe() requires a freshly connected session"));
        }

        let greeting = self.read_reply()?;
        match greeting.code {
            None => {
                self.poison();
                return Err(Error::ServerGreetingFailure {
                    code: None,
                    lines: greeting.lines,
                });
            }
            Some(220) => {}
            Some(code) => {
                self.poison();
                return Err(Error::ServerGreetingFailure {
                    code: Some(code),
                    lines: greeting.lines,
                });
            }
        }
        if self.identity.is_none() {
            if let Some(first_line) = greeting.lines.first() {
                if let Some(token) = first_line.split_whitespace().next() {
                    self.identity = Some(Identity(token.to_string()));
                }
            }
        }
        self.phase = Phase::Greeted;

        self.ehlo_or_helo()?;

        match self.endpoint.connection_type() {
            ConnectionType::StartTls => {
                if !self.extensions.contains("STARTTLS") {
                    self.poison();
                    return Err(Error::crypto("starttls_unsupported"));
                }
                #[cfg(feature = "tracing")]
                tracing::debug!("STARTTLS required and advertised, upgrading");
                self.upgrade_starttls()?;
            }
            ConnectionType::Auto => {
                if self.extensions.contains("STARTTLS") {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("STARTTLS advertised, upgrading opportunistically");
                    self.upgrade_starttls()?;
                } else {
                    #[cfg(feature = "tracing")]
                    tracing::debug!("STARTTLS not advertised, staying plaintext");
                }
            }
            ConnectionType::PlainText | ConnectionType::Tls => {}
        }

        self.phase = Phase::Probed;
        Ok(())
    }

    /// Sends EHLO; on a client-greeting failure, retries with HELO (which
    /// succeeds with an empty extension table rather than failing `probe`).
    fn ehlo_or_helo(&mut self) -> Result<()> {
        self.write_command(&format!("EHLO {HELO_DOMAIN}"))?;
        let reply = self.read_reply()?;
        if reply.code == Some(250) {
            self.extensions = build_extension_table(&reply);
            return Ok(());
        }

        // EHLO rejected or malformed: fall back to HELO.
        #[cfg(feature = "tracing")]
        tracing::debug!(code = ?reply.code, "EHLO rejected, retrying with HELO");
        self.write_command(&format!("HELO {HELO_DOMAIN}"))?;
        let reply = self.read_reply()?;
        if reply.code == Some(250) {
            self.extensions = ExtensionTable::default();
            return Ok(());
        }

        self.poison();
        Err(Error::ClientGreetingFailure {
            code: reply.code,
            lines: reply.lines,
        })
    }

    fn upgrade_starttls(&mut self) -> Result<()> {
        self.write_command("STARTTLS")?;
        let reply = self.read_reply()?;
        match reply.code {
            Some(220) => {}
            _ => {
                self.poison();
                return Err(Error::CryptoFailure {
                    detail: format!("STARTTLS rejected: {:?}", reply.lines),
                });
            }
        }

        let policy = self.endpoint.tls_policy().clone();
        let host = self.endpoint.host().to_string();
        {
            let transport = self.transport_mut()?;
            if let Err(e) = transport.start_tls(&policy, &host) {
                self.poison();
                return Err(e);
            }
        }

        // The extension table from before STARTTLS is fully discarded; a
        // fresh EHLO round replaces it.
        self.ehlo_or_helo()
    }

    /// True once `probe()` has completed successfully.
    pub fn is_probed(&self) -> bool {
        self.phase == Phase::Probed
    }

    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn extensions(&self) -> &ExtensionTable {
        &self.extensions
    }

    pub fn transport_meta(&self) -> Option<&TransportMeta> {
        self.transport.as_ref().map(Transport::meta)
    }

    /// MAIL FROM / RCPT TO submission probe: does this server require
    /// authentication before it will accept mail from `sender`?
    pub fn is_authentication_required(&mut self, sender: &str) -> Result<AuthenticationRequired> {
        if self.phase != Phase::Probed {
            return Err(Error::domain("is_authentication_required requires a probed session"));
        }
        if !sender.is_empty() {
            validate_mailbox(sender)?;
        }

        let mail_cmd = format!("MAIL FROM:<{sender}>");
        self.write_command(&mail_cmd)?;
        let mail_reply = self.read_reply()?;

        let final_reply = if mail_reply.code == Some(250) {
            let recipient = format!("{}@librarymarket.com", random_hex(16));
            self.write_command(&format!("RCPT TO:<{recipient}>"))?;
            self.read_reply()?
        } else {
            mail_reply
        };

        let outcome = match final_reply.code {
            Some(250) | Some(251) => Ok(AuthenticationRequired(false)),
            Some(530) | Some(550) | Some(551) | Some(554) => Ok(AuthenticationRequired(true)),
            Some(501) if sender.is_empty() => {
                Err(Error::invalid_argument("sender_required"))
            }
            _ => Err(Error::ProtocolFailure {
                code: final_reply.code,
                lines: final_reply.lines,
            }),
        };

        // Best-effort RSET regardless of outcome; keeps the session reusable.
        let _ = self.write_command("RSET").and_then(|_| self.read_reply());

        outcome
    }

    /// Authenticates using `mechanism`, provided the server advertised it
    /// under `AUTH`.
    pub fn authenticate(&mut self, mut mechanism: Mechanism, hide_auth_replies: bool) -> Result<()> {
        if self.phase != Phase::Probed {
            return Err(Error::domain("authenticate requires a probed session"));
        }
        let offered = self
            .extensions
            .get("AUTH")
            .ok_or_else(|| Error::AuthenticationFailure {
                reason: "server does not advertise AUTH".into(),
                code: None,
                lines: vec![],
            })?;
        let supported = offered
            .iter()
            .any(|m| m.eq_ignore_ascii_case(mechanism.name()));
        if !supported {
            return Err(Error::AuthenticationFailure {
                reason: format!("{} is not offered by the server", mechanism.name()),
                code: None,
                lines: vec![],
            });
        }

        let result = self.authenticate_inner(&mut mechanism, hide_auth_replies);
        mechanism.reset();
        self.auth_guard = false;
        result
    }

    fn authenticate_inner(&mut self, mechanism: &mut Mechanism, hide_auth_replies: bool) -> Result<()> {
        self.write_command(&format!("AUTH {}", mechanism.name()))?;
        self.auth_guard = hide_auth_replies;

        let mut reply = self.read_reply()?;
        loop {
            match reply.code {
                None => {
                    return Err(Error::AuthenticationFailure {
                        reason: "no response from server".into(),
                        code: None,
                        lines: vec![],
                    })
                }
                Some(334) => {
                    let client_reply = mechanism.process(&reply.lines)?;
                    self.write_command(&client_reply)?;
                    reply = self.read_reply()?;
                }
                Some(235) => return Ok(()),
                Some(code) => {
                    return Err(Error::AuthenticationFailure {
                        reason: format!("server rejected authentication (code {code})"),
                        code: Some(code),
                        lines: reply.lines,
                    })
                }
            }
        }
    }

    /// Best-effort QUIT, then close. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if self.phase == Phase::Closed || self.transport.is_none() {
            self.phase = Phase::Closed;
            return;
        }
        let _ = self.write_command("QUIT").and_then(|_| self.read_reply());
        self.poison();
    }

    pub fn debug_transcript(&self) -> String {
        self.transport
            .as_ref()
            .map(|t| t.transcript().as_str().to_string())
            .unwrap_or_default()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn build_extension_table(reply: &Reply) -> ExtensionTable {
    let mut table = ExtensionTable::default();
    // First line is the EHLO greeting echo, not a feature.
    for line in reply.lines.iter().skip(1) {
        let mut tokens = line.split_whitespace();
        let Some(keyword) = tokens.next() else { continue };
        let params: Vec<String> = tokens.map(str::to_string).collect();
        table.insert(keyword.to_ascii_uppercase(), params);
    }
    table
}

pub(crate) fn random_hex(chars: usize) -> String {
    let mut bytes = vec![0u8; chars / 2];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// A very permissive mailbox syntax check: `local@domain`, no whitespace,
/// exactly one `@`. The spec only requires rejecting obviously-invalid
/// input before it reaches the wire; full RFC 5321 mailbox grammar
/// validation is the server's job.
fn validate_mailbox(address: &str) -> Result<()> {
    let at_count = address.matches('@').count();
    let has_whitespace = address.chars().any(char::is_whitespace);
    if at_count != 1 || has_whitespace || address.starts_with('@') || address.ends_with('@') {
        return Err(Error::invalid_argument(format!(
            "{address:?} is not a syntactically valid mailbox address"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reply::Reply;

    #[test]
    fn extension_table_drops_greeting_echo_and_uppercases_keywords() {
        let reply = Reply {
            code: Some(250),
            lines: vec![
                "mail.example".to_string(),
                "PIPELINING".to_string(),
                "SIZE 10485760".to_string(),
                "auth PLAIN LOGIN".to_string(),
            ],
        };
        let table = build_extension_table(&reply);
        assert!(table.contains("PIPELINING"));
        assert_eq!(table.get("SIZE"), Some(&["10485760".to_string()][..]));
        assert_eq!(
            table.get("AUTH"),
            Some(&["PLAIN".to_string(), "LOGIN".to_string()][..])
        );
        assert!(!table.contains("mail.example"));
    }

    #[test]
    fn mailbox_validation_rejects_malformed_input() {
        assert!(validate_mailbox("not-an-address").is_err());
        assert!(validate_mailbox("two@ats@example.com").is_err());
        assert!(validate_mailbox("has space@example.com").is_err());
        assert!(validate_mailbox("user@example.com").is_ok());
    }

    #[test]
    fn random_hex_is_sixteen_chars() {
        assert_eq!(random_hex(16).len(), 16);
        assert_ne!(random_hex(16), random_hex(16));
    }
}
