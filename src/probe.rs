//! Read-only diagnostic operations: dump advertised extensions, dump
//! negotiated crypto info (spec.md §4.6).

use crate::endpoint::Endpoint;
use crate::error::Result;
use crate::session::Session;

/// One row of `probe:extensions` output.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExtensionRow {
    pub keyword: String,
    pub parameters: Vec<String>,
}

/// Connects, probes, and returns extensions sorted ascending by keyword,
/// then stable-sorted by parameter-list length descending.
pub fn probe_extensions(endpoint: Endpoint) -> Result<Vec<ExtensionRow>> {
    let mut session = Session::new(endpoint);
    session.connect()?;
    session.probe()?;

    let mut rows: Vec<ExtensionRow> = session
        .extensions()
        .keywords()
        .iter()
        .map(|keyword| ExtensionRow {
            keyword: keyword.clone(),
            parameters: session.extensions().get(keyword).unwrap_or(&[]).to_vec(),
        })
        .collect();

    rows.sort_by(|a, b| a.keyword.cmp(&b.keyword));
    rows.sort_by(|a, b| b.parameters.len().cmp(&a.parameters.len()));

    session.disconnect();
    Ok(rows)
}

/// `{protocol, cipher_name, cipher_bits, cipher_version}`, each defaulting
/// to the literal `"Unknown"` when the handshake didn't expose it.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EncryptionInfo {
    pub protocol: String,
    pub cipher_name: String,
    pub cipher_bits: String,
    pub cipher_version: String,
}

pub fn probe_encryption(endpoint: Endpoint) -> Result<EncryptionInfo> {
    let mut session = Session::new(endpoint);
    session.connect()?;
    session.probe()?;

    let crypto = session
        .transport_meta()
        .map(|m| m.crypto.clone())
        .unwrap_or_default();

    let info = EncryptionInfo {
        protocol: crypto.protocol.unwrap_or_else(|| "Unknown".to_string()),
        cipher_name: crypto.cipher_name.unwrap_or_else(|| "Unknown".to_string()),
        cipher_bits: crypto
            .cipher_bits
            .map(|b| b.to_string())
            .unwrap_or_else(|| "Unknown".to_string()),
        cipher_version: crypto.cipher_version.unwrap_or_else(|| "Unknown".to_string()),
    };

    session.disconnect();
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::CryptoInfo;

    #[test]
    fn encryption_info_defaults_to_unknown() {
        let crypto = CryptoInfo::default();
        let info = EncryptionInfo {
            protocol: crypto.protocol.unwrap_or_else(|| "Unknown".to_string()),
            cipher_name: crypto.cipher_name.unwrap_or_else(|| "Unknown".to_string()),
            cipher_bits: crypto
                .cipher_bits
                .map(|b| b.to_string())
                .unwrap_or_else(|| "Unknown".to_string()),
            cipher_version: crypto.cipher_version.unwrap_or_else(|| "Unknown".to_string()),
        };
        assert_eq!(info.protocol, "Unknown");
        assert_eq!(info.cipher_bits, "Unknown");
    }

    #[test]
    fn extension_sort_is_keyword_then_param_length_desc() {
        let mut rows = vec![
            ExtensionRow { keyword: "STARTTLS".into(), parameters: vec![] },
            ExtensionRow { keyword: "AUTH".into(), parameters: vec!["PLAIN".into(), "LOGIN".into()] },
            ExtensionRow { keyword: "SIZE".into(), parameters: vec!["10485760".into()] },
        ];
        rows.sort_by(|a, b| a.keyword.cmp(&b.keyword));
        rows.sort_by(|a, b| b.parameters.len().cmp(&a.parameters.len()));
        assert_eq!(rows[0].keyword, "AUTH");
        assert_eq!(rows[1].keyword, "SIZE");
        assert_eq!(rows[2].keyword, "STARTTLS");
    }
}
