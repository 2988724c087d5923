//! Change detection over schedule fragments.

use sha2::Digest;
use sha2::Sha256;

/// Collapses every run of whitespace to a single space and trims the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 of the whitespace-normalized fragment.
pub fn fingerprint(fragment: &str) -> String {
    let digest = Sha256::digest(normalize_whitespace(fragment).as_bytes());
    format!("{digest:x}")
}

/// A missing baseline always counts as a change.
pub fn has_changed(old: Option<&str>, new: &str) -> bool {
    old != Some(new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a\n\tb   c \r\n"), "a b c");
        assert_eq!(normalize_whitespace(" \n "), "");
    }

    #[test]
    fn test_fingerprint_ignores_incidental_whitespace() {
        assert_eq!(
            fingerprint("10:00-12:00\n\nsome text"),
            fingerprint("10:00-12:00   some text")
        );
        assert_eq!(
            fingerprint("10:00-12:00   some text"),
            "c11929daadcab3d6ecb9ea3f8678d67454c346cee41b9b7e4ae548c76a922e84"
        );
    }

    #[test]
    fn test_fingerprint_detects_visible_changes() {
        assert_eq!(
            fingerprint("08:00-10:00 outage"),
            "820acea21ee0dd8bbae6aed0ea0c9029fddbc61b4c861a7e582fb6a5cf8a926f"
        );
        assert_ne!(fingerprint("08:00-10:00 outage"), fingerprint("08:00-11:00 outage"));
        assert_ne!(fingerprint("ab"), fingerprint("a b"));
    }

    #[test]
    fn test_has_changed() {
        assert!(has_changed(None, "h1"));
        assert!(has_changed(Some("h1"), "h2"));
        assert!(!has_changed(Some("h1"), "h1"));
    }
}
