//! Content blocks carried by tool results and prompt messages.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One content block, discriminated by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    /// Plain text
    Text {
        /// The text payload
        text: String,
    },
    /// Base64-encoded image
    Image {
        /// Base64 image bytes
        data: String,
        /// Image MIME type
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    /// An embedded resource
    Resource {
        /// The embedded resource contents
        resource: Value,
    },
}

impl Content {
    /// Text content block.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Speaker role in prompt and sampling messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// End user
    User,
    /// Model/assistant
    Assistant,
}
