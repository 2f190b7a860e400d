use anyhow::{anyhow, Context, Result};

use crate::checksum::sha256_hex;

/// SHA-256 fingerprint of a DER-encoded signing certificate, lowercase hex.
pub fn certificate_fingerprint(der: &[u8]) -> String {
    sha256_hex(der)
}

/// Canonical form used for comparison: lowercase hex without separators.
///
/// Accepts the `AB:CD:...` form printed by `apksigner` and `keytool` as well as bare hex.
/// Only SHA-1 (20 byte) and SHA-256 (32 byte) digests are accepted.
pub fn normalize_fingerprint(raw: &str) -> Result<String> {
    let compact = raw
        .chars()
        .filter(|ch| !ch.is_whitespace() && *ch != ':')
        .collect::<String>()
        .to_ascii_lowercase();
    if compact.is_empty() {
        return Err(anyhow!("signature fingerprint must not be empty"));
    }

    let bytes = hex::decode(&compact)
        .with_context(|| format!("signature fingerprint is not valid hex: {raw}"))?;
    match bytes.len() {
        20 | 32 => Ok(compact),
        other => Err(anyhow!(
            "signature fingerprint has unexpected length: expected 20 or 32 bytes, got {other}"
        )),
    }
}

pub fn display_fingerprint(normalized: &str) -> String {
    normalized
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).to_ascii_uppercase())
        .collect::<Vec<_>>()
        .join(":")
}
