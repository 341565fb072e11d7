//! Initialize handshake payloads.

use serde::{Deserialize, Serialize};

use super::{ClientCapabilities, Implementation, ServerCapabilities};

/// Parameters of the `initialize` request (always request id 0).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequestParams {
    /// Protocol version the client offers (`YYYY-MM-DD`)
    pub protocol_version: String,
    /// Capabilities the client declares
    #[serde(default)]
    pub capabilities: ClientCapabilities,
    /// Client identity
    pub client_info: Implementation,
}

/// Result of the `initialize` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    /// Negotiated protocol version
    pub protocol_version: String,
    /// Server identity
    pub server_info: Implementation,
    /// Capabilities the server declares
    #[serde(default)]
    pub capabilities: ServerCapabilities,
    /// Optional usage instructions for the client's model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_round_trip() {
        let params = InitializeRequestParams {
            protocol_version: "2025-06-18".to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation::new("harbormcp-client", "0.3.0"),
        };
        let json = serde_json::to_string(&params).unwrap();
        assert!(json.contains("\"protocolVersion\":\"2025-06-18\""));
        assert!(json.contains("\"clientInfo\""));
        let parsed: InitializeRequestParams = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, params);
    }

    #[test]
    fn initialize_result_omits_absent_instructions() {
        let result = InitializeResult {
            protocol_version: "2025-06-18".to_string(),
            server_info: Implementation::new("demo", "1.0.0"),
            capabilities: ServerCapabilities::default(),
            instructions: None,
        };
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("instructions"));
    }
}
