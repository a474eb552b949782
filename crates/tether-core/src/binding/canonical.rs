//! Member name canonicalization
//!
//! Managed code spells property names in camelCase or snake_case; the native
//! side registers them hyphenated (`label-text`). A lookup name is converted
//! with [`hyphen_from_camel`] followed by [`canonicalize_key`].

use crate::error::{BridgeError, BridgeResult};

/// `labelText` → `label-text`
pub fn hyphen_from_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('-');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Replace every character outside `[-0-9A-Za-z]` with `-`
pub fn canonicalize_key(key: &str) -> String {
    key.chars()
        .map(|c| if c == '-' || c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

/// Canonical property name for a managed-side member name
pub fn canonical_property_name(name: &str) -> String {
    canonicalize_key(&hyphen_from_camel(name))
}

/// `label-text` → `label_text`, the form enumerated to managed code
pub fn hyphen_to_underscore(name: &str) -> String {
    name.replace('-', "_")
}

/// Reject names that can never resolve to a member
pub fn validate_member_name(name: &str) -> BridgeResult<()> {
    if name.is_empty() || name.contains('\0') {
        return Err(BridgeError::InvalidMemberName(name.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hyphen_from_camel() {
        assert_eq!(hyphen_from_camel("labelText"), "label-text");
        assert_eq!(hyphen_from_camel("label"), "label");
        assert_eq!(hyphen_from_camel("useUnderline"), "use-underline");
    }

    #[test]
    fn test_canonicalize_key() {
        assert_eq!(canonicalize_key("label_text"), "label-text");
        assert_eq!(canonicalize_key("a.b c"), "a-b-c");
        assert_eq!(canonicalize_key("Keep-Case9"), "Keep-Case9");
    }

    #[test]
    fn test_canonical_property_name() {
        assert_eq!(canonical_property_name("label_text"), "label-text");
        assert_eq!(canonical_property_name("labelText"), "label-text");
        assert_eq!(canonical_property_name("label-text"), "label-text");
    }

    #[test]
    fn test_hyphen_to_underscore() {
        assert_eq!(hyphen_to_underscore("label-text"), "label_text");
    }

    #[test]
    fn test_validate_member_name() {
        assert!(validate_member_name("show").is_ok());
        assert_eq!(
            validate_member_name(""),
            Err(BridgeError::InvalidMemberName(String::new()))
        );
        assert!(validate_member_name("bad\0name").is_err());
    }
}
