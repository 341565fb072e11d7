//! Protocol data model: initialize handshake, capability tree, and the
//! tool / resource / prompt / root surfaces with their paginated list
//! results.

mod capabilities;
mod content;
mod elicitation;
mod initialization;
mod notifications;
mod prompts;
mod resources;
mod roots;
mod sampling;
mod tools;

pub use capabilities::*;
pub use content::*;
pub use elicitation::*;
pub use initialization::*;
pub use notifications::*;
pub use prompts::*;
pub use resources::*;
pub use roots::*;
pub use sampling::*;
pub use tools::*;

use serde::{Deserialize, Serialize};

/// Name/version pair identifying one side of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Implementation {
    /// Implementation name
    pub name: String,
    /// Implementation version
    pub version: String,
    /// Optional human-readable title
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Implementation {
    /// Create an implementation descriptor.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            title: None,
        }
    }
}

/// Empty result for operations that acknowledge without data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyResult {}
