use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::{misuse, SaslMechanism};
use crate::error::Result;

/// SASL PLAIN (RFC 4616). Single-shot: one `process` call returns the whole
/// response, a second call is a logic error.
#[derive(Debug, Clone)]
pub struct Plain {
    username: String,
    password: String,
    used: bool,
}

impl Plain {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Plain {
        Plain {
            username: username.into(),
            password: password.into(),
            used: false,
        }
    }
}

impl SaslMechanism for Plain {
    fn name(&self) -> &'static str {
        "PLAIN"
    }

    fn process(&mut self, _server_lines: &[String]) -> Result<String> {
        if self.used {
            return Err(misuse("PLAIN does not expect a second challenge"));
        }
        self.used = true;
        let authzid = &self.username;
        let authcid = &self.username;
        let mut raw = Vec::with_capacity(authzid.len() + authcid.len() + self.password.len() + 2);
        raw.extend_from_slice(authzid.as_bytes());
        raw.push(0);
        raw.extend_from_slice(authcid.as_bytes());
        raw.push(0);
        raw.extend_from_slice(self.password.as_bytes());
        Ok(STANDARD.encode(raw))
    }

    fn reset(&mut self) {
        self.used = false;
    }
}
