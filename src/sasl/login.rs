use base64::{engine::general_purpose::STANDARD, Engine as _};

use super::{misuse, SaslMechanism};
use crate::error::Result;

const USERNAME_PROMPT: &str = "VXNlcm5hbWU6"; // base64("Username:")
const PASSWORD_PROMPT: &str = "UGFzc3dvcmQ6"; // base64("Password:")

/// SASL LOGIN (informational/historical). Two base64-encoded prompts,
/// `Username:` then `Password:`; each answered at most once.
#[derive(Debug, Clone)]
pub struct Login {
    username: String,
    password: String,
    sent_username: bool,
    sent_password: bool,
}

impl Login {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Login {
        Login {
            username: username.into(),
            password: password.into(),
            sent_username: false,
            sent_password: false,
        }
    }
}

impl SaslMechanism for Login {
    fn name(&self) -> &'static str {
        "LOGIN"
    }

    fn process(&mut self, server_lines: &[String]) -> Result<String> {
        let challenge = server_lines
            .first()
            .map(String::as_str)
            .unwrap_or("")
            .trim();

        match challenge {
            USERNAME_PROMPT if !self.sent_username => {
                self.sent_username = true;
                Ok(STANDARD.encode(self.username.as_bytes()))
            }
            PASSWORD_PROMPT if !self.sent_password => {
                self.sent_password = true;
                Ok(STANDARD.encode(self.password.as_bytes()))
            }
            USERNAME_PROMPT => Err(misuse("LOGIN username prompt repeated")),
            PASSWORD_PROMPT => Err(misuse("LOGIN password prompt repeated")),
            other => Err(misuse(format!("LOGIN received unknown prompt {other:?}"))),
        }
    }

    fn reset(&mut self) {
        self.sent_username = false;
        self.sent_password = false;
    }
}
