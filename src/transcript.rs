//! Append-only record of the client/server byte exchange.

/// The literal marker prefixed to client-originated lines.
pub const CLIENT_MARKER: &str = "~> ";

/// The literal string substituted for a SASL payload line while the
/// auth guard is active.
pub const REDACTED: &str = "(hidden auth reply)";

/// Per-Session transcript. Grows unbounded by design: this is a short-lived
/// diagnostic tool, not a long-running host. A longer-running embedding
/// would want a size cap; not needed here.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    buffer: String,
}

impl Transcript {
    pub fn new() -> Transcript {
        Transcript::default()
    }

    /// Records a line received from the server.
    pub fn record_server(&mut self, line: &str) {
        self.buffer.push_str(line);
        self.buffer.push('\n');
    }

    /// Records a line sent by the client, or the redaction marker when
    /// `hidden` is true.
    pub fn record_client(&mut self, line: &str, hidden: bool) {
        self.buffer.push_str(CLIENT_MARKER);
        if hidden {
            self.buffer.push_str(REDACTED);
        } else {
            self.buffer.push_str(line);
        }
        self.buffer.push('\n');
    }

    /// Records a free-form marker (e.g. "-- STARTTLS handshake --").
    pub fn record_marker(&mut self, marker: &str) {
        self.buffer.push_str(marker);
        self.buffer.push('\n');
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }
}
