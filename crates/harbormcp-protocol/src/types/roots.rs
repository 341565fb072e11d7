//! Workspace roots the client exposes to connected servers.

use serde::{Deserialize, Serialize};

/// A root: one URI the client designates as a logical workspace.
///
/// Roots are unique by URI within a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Root URI
    pub uri: String,
    /// Optional display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Result of the server-initiated `roots/list` request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListRootsResult {
    /// Roots in insertion order
    pub roots: Vec<Root>,
}
