//! Protocol version negotiation.
//!
//! Protocol versions are `YYYY-MM-DD` date strings. The supported set is
//! fixed at build time, newest first; `negotiate` implements the initialize
//! handshake rule from the server side.

use serde_json::json;

use crate::error::ProtocolError;

/// Protocol versions this implementation speaks, newest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", "2025-03-26", "2024-11-05"];

/// The newest supported protocol version.
pub const LATEST_PROTOCOL_VERSION: &str = SUPPORTED_PROTOCOL_VERSIONS[0];

/// Whether `version` is in the supported set.
pub fn is_supported(version: &str) -> bool {
    SUPPORTED_PROTOCOL_VERSIONS.contains(&version)
}

/// Select the protocol version for a session given the client's offer.
///
/// The offered version is used when the server supports it. Otherwise the
/// handshake fails with `INVALID_PARAMS` carrying the supported set in
/// `data.supported`.
pub fn negotiate(client_offered: &str) -> Result<&'static str, ProtocolError> {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|v| **v == client_offered)
        .copied()
        .ok_or_else(|| {
            ProtocolError::invalid_params_with(
                format!("unsupported protocol version '{client_offered}'"),
                json!({ "supported": SUPPORTED_PROTOCOL_VERSIONS }),
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_first_ordering() {
        assert_eq!(LATEST_PROTOCOL_VERSION, "2025-06-18");
        let mut sorted = SUPPORTED_PROTOCOL_VERSIONS.to_vec();
        sorted.sort_unstable_by(|a, b| b.cmp(a));
        assert_eq!(sorted, SUPPORTED_PROTOCOL_VERSIONS);
    }

    #[test]
    fn negotiate_accepts_supported_offer() {
        for v in SUPPORTED_PROTOCOL_VERSIONS {
            assert_eq!(negotiate(v).unwrap(), *v);
        }
    }

    #[test]
    fn negotiate_rejects_unknown_with_supported_list() {
        let err = negotiate("1999-01-01").unwrap_err();
        assert_eq!(err.code, -32602);
        let data = err.data.expect("supported set attached");
        let supported = data["supported"].as_array().unwrap();
        assert_eq!(supported.len(), SUPPORTED_PROTOCOL_VERSIONS.len());
    }
}
