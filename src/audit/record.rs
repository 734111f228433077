use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha3::{Digest, Sha3_256};

use super::AuditError;

/// `previous_hash` of the first record in every chain.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// RFC 3339 UTC timestamp, microsecond precision
    pub timestamp: String,
    pub request_id: String,
    /// Decision action (`allow`, `flag`, `block`) or an event kind
    /// such as `policy_reload`, `auth_failure` or `redaction`
    pub action: String,
    /// Empty for administrative events
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub rule_ids: Vec<String>,
    #[serde(default)]
    pub text_excerpt: String,
    pub content_hash: String,
    pub previous_hash: String,
    #[serde(default)]
    pub metadata: Value,
}

/// Fields supplied by the caller of `AuditChain::append`.
#[derive(Debug, Clone, Default)]
pub struct AuditFields {
    pub request_id: String,
    pub action: String,
    pub direction: String,
    pub endpoint: String,
    pub rule_ids: Vec<String>,
    pub text_excerpt: String,
    pub metadata: Value,
}

impl AuditFields {
    /// Administrative or security event with no request payload.
    pub fn event(action: impl Into<String>, request_id: impl Into<String>, metadata: Value) -> Self {
        AuditFields {
            request_id: request_id.into(),
            action: action.into(),
            metadata,
            ..Default::default()
        }
    }
}

/// Everything except the two hash fields, in a fixed shape for hashing.
#[derive(Serialize)]
struct HashInput<'a> {
    timestamp: &'a str,
    request_id: &'a str,
    action: &'a str,
    direction: &'a str,
    endpoint: &'a str,
    rule_ids: &'a [String],
    text_excerpt: &'a str,
    metadata: &'a Value,
}

impl AuditRecord {
    /// Canonical (RFC 8785) bytes of every field except the hashes.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, AuditError> {
        let input = HashInput {
            timestamp: &self.timestamp,
            request_id: &self.request_id,
            action: &self.action,
            direction: &self.direction,
            endpoint: &self.endpoint,
            rule_ids: &self.rule_ids,
            text_excerpt: &self.text_excerpt,
            metadata: &self.metadata,
        };

        serde_jcs::to_vec(&input).map_err(AuditError::Canonicalization)
    }

    /// SHA3-256 over `previous_hash ‖ canonical_bytes`, hex encoded.
    pub fn compute_hash(&self) -> Result<String, AuditError> {
        let bytes = self.canonical_bytes()?;

        let mut hasher = Sha3_256::new();
        hasher.update(self.previous_hash.as_bytes());
        hasher.update(&bytes);

        Ok(hex::encode(hasher.finalize()))
    }

    /// Recompute and store `content_hash`.
    pub fn seal(&mut self) -> Result<(), AuditError> {
        self.content_hash = self.compute_hash()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> AuditRecord {
        AuditRecord {
            timestamp: "2026-10-19T12:00:00.000000Z".to_string(),
            request_id: "req-1".to_string(),
            action: "block".to_string(),
            direction: "outbound".to_string(),
            endpoint: "/lookup".to_string(),
            rule_ids: vec!["SSN-1".to_string()],
            text_excerpt: "SSN [REDACTED:ssn]".to_string(),
            content_hash: String::new(),
            previous_hash: GENESIS_HASH.to_string(),
            metadata: json!({"raw_action": "block", "agent_id": "a1"}),
        }
    }

    #[test]
    fn test_genesis_is_hash_width() {
        assert_eq!(GENESIS_HASH.len(), 64);
        assert!(GENESIS_HASH.chars().all(|c| c == '0'));
    }

    #[test]
    fn test_hash_is_deterministic_and_excludes_hash_fields() {
        let mut a = record();
        a.seal().unwrap();

        let mut b = record();
        b.content_hash = "something else".to_string();
        b.seal().unwrap();

        assert_eq!(a.content_hash, b.content_hash);
        assert_eq!(a.content_hash.len(), 64);
    }

    #[test]
    fn test_metadata_key_order_does_not_matter() {
        let mut a = record();
        a.metadata = serde_json::from_str(r#"{"b": 1, "a": 2}"#).unwrap();
        let mut b = record();
        b.metadata = serde_json::from_str(r#"{"a": 2, "b": 1}"#).unwrap();

        assert_eq!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
    }

    #[test]
    fn test_previous_hash_feeds_the_digest() {
        let a = record();
        let mut b = record();
        b.previous_hash = "f".repeat(64);

        assert_ne!(a.compute_hash().unwrap(), b.compute_hash().unwrap());
    }

    #[test]
    fn test_canonical_bytes_have_no_whitespace_padding() {
        let bytes = record().canonical_bytes().unwrap();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("{\"action\":\"block\""));
        assert!(!text.contains(": "));
    }

    #[test]
    fn test_stored_line_round_trip_keeps_hash() {
        let mut original = record();
        original.seal().unwrap();

        let line = serde_json::to_string(&original).unwrap();
        let parsed: AuditRecord = serde_json::from_str(&line).unwrap();

        assert_eq!(parsed.compute_hash().unwrap(), original.content_hash);
    }
}
