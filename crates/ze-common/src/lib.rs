//! Shared building blocks for the zkelect workspace.

pub mod logging;

use uuid::Uuid;

/// Returns true when the value is empty or only whitespace.
pub fn is_blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Split a comma-joined server list into trimmed, non-blank entries.
///
/// `"zk1:2181, zk2:2181,,"` becomes `["zk1:2181", "zk2:2181"]`.
pub fn split_servers(servers: &str) -> Vec<String> {
    servers
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Generate a fresh 32-character hex GUID (a v4 UUID without hyphens).
pub fn guid() -> String {
    Uuid::new_v4().simple().to_string()
}
