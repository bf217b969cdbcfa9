//! Object key validation

use crate::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// One or more segments separated by `/`. Segments never start with a dot,
/// which rules out `.`/`..` traversal and hidden staging files.
static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_=@-][A-Za-z0-9_.=@-]*(/[A-Za-z0-9_=@-][A-Za-z0-9_.=@-]*)*$")
        .expect("key pattern is valid")
});

/// Maximum key length in bytes
pub const MAX_KEY_LEN: usize = 512;

/// Validate an object key
pub fn validate_key(key: &str) -> Result<()> {
    if key.len() > MAX_KEY_LEN {
        return Err(Error::InvalidKey(format!(
            "key exceeds {MAX_KEY_LEN} bytes"
        )));
    }
    if !KEY_PATTERN.is_match(key) {
        return Err(Error::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_nested_keys() {
        assert!(validate_key("models/credit/v1.json").is_ok());
        assert!(validate_key("cache/0123abcd").is_ok());
        assert!(validate_key("schemas/credit_default@1").is_ok());
    }

    #[test]
    fn test_rejects_traversal_and_empty_segments() {
        for bad in ["", "/abs", "a//b", "a/../b", "../x", ".hidden", "a/", "sp ace"] {
            assert!(
                matches!(validate_key(bad), Err(Error::InvalidKey(_))),
                "{bad} should be rejected"
            );
        }
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }
}
