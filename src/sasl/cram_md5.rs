use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use md5::Md5;

use super::{misuse, SaslMechanism};
use crate::error::Result;

type HmacMd5 = Hmac<Md5>;

/// SASL CRAM-MD5 (RFC 2195). A single base64-encoded nonce challenge,
/// answered with `username SPACE hex(HMAC-MD5(password, nonce))`.
#[derive(Debug, Clone)]
pub struct CramMd5 {
    username: String,
    password: String,
    used: bool,
}

impl CramMd5 {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> CramMd5 {
        CramMd5 {
            username: username.into(),
            password: password.into(),
            used: false,
        }
    }
}

impl SaslMechanism for CramMd5 {
    fn name(&self) -> &'static str {
        "CRAM-MD5"
    }

    fn process(&mut self, server_lines: &[String]) -> Result<String> {
        if self.used {
            return Err(misuse("CRAM-MD5 does not expect a second challenge"));
        }
        let encoded = server_lines.first().map(String::as_str).unwrap_or("");
        if encoded.trim().is_empty() {
            return Err(misuse("CRAM-MD5 challenge was empty"));
        }
        let nonce = STANDARD
            .decode(encoded.trim())
            .map_err(|e| misuse(format!("CRAM-MD5 challenge was not valid base64: {e}")))?;

        self.used = true;

        let mut mac = HmacMd5::new_from_slice(self.password.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(&nonce);
        let digest = mac.finalize().into_bytes();
        let hex_digest = digest.iter().map(|b| format!("{b:02x}")).collect::<String>();

        Ok(STANDARD.encode(format!("{} {}", self.username, hex_digest)))
    }

    fn reset(&mut self) {
        self.used = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// RFC 2195 §3 worked example.
    #[test]
    fn rfc2195_vector() {
        let challenge = "PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+";
        let mut m = CramMd5::new("tim", "tanstaaftanstaaf");
        let reply = m.process(&[challenge.to_string()]).unwrap();
        let decoded = STANDARD.decode(reply).unwrap();
        assert_eq!(
            decoded,
            b"tim b913a602c7eda7a495b4e6e7334d3890".to_vec()
        );
    }

    #[test]
    fn empty_challenge_is_misuse() {
        let mut m = CramMd5::new("tim", "secret");
        assert!(m.process(&["".to_string()]).is_err());
    }

    #[test]
    fn second_call_is_misuse() {
        let challenge = "PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+";
        let mut m = CramMd5::new("tim", "tanstaaftanstaaf");
        m.process(&[challenge.to_string()]).unwrap();
        assert!(m.process(&[challenge.to_string()]).is_err());
    }
}
