//! Canonical request hashing (RFC 8785 JSON, SHA-256, hex).

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

#[derive(Serialize)]
struct HashedRequest<'a> {
    tool: &'a str,
    tenant: &'a str,
    body: &'a Value,
}

/// Hex SHA-256 of the canonical JSON form of `value`.
pub fn canonical_hash<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let canonical = serde_jcs::to_string(value)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

/// Hash identifying a write request: tool, tenant and body.
///
/// Key order and whitespace in `body` do not change the hash.
pub fn request_hash(tool: &str, tenant: &str, body: &Value) -> Result<String, serde_json::Error> {
    canonical_hash(&HashedRequest { tool, tenant, body })
}
