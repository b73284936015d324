//! Key schema shared by every backend
//!
//! Format: `<path>/ids/<id>` holds the member currently standing for `<id>`
//! in the sorted set at `<path>`.

/// Separator between a structure path and an entity id in pointer keys
pub const POINTER_SEGMENT: &str = "/ids/";

/// Pointer record key for an entity in a structure
pub fn pointer_key(path: &str, id: &str) -> String {
    format!("{}{}{}", path, POINTER_SEGMENT, id)
}

/// Recover an entity id from an encoded member.
///
/// Returns `None` when the member is shorter than the prefix.
pub fn strip_prefix(member: &str, prefix_len: usize) -> Option<&str> {
    member.get(prefix_len..)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pointer_key() {
        assert_eq!(pointer_key("lb:global:wins:all", "u1"), "lb:global:wins:all/ids/u1");
    }

    #[test]
    fn test_strip_prefix() {
        assert_eq!(strip_prefix("1700000000000:alice", 14), Some("alice"));
        assert_eq!(strip_prefix("1700000000000:", 14), Some(""));
        assert_eq!(strip_prefix("short", 14), None);
    }
}
