//! `key=value` files marking repository and cache directories.

use std::collections::HashMap;

/// Layout version written to and expected in marker files.
pub const LAYOUT_VERSION: &str = "1";

/// Parse `key=value` lines, skipping blanks and `#` comments.
pub(crate) fn parse_kv(content: &str) -> HashMap<&str, &str> {
    let mut values = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some((key, value)) = line.split_once('=') {
            values.insert(key.trim(), value.trim());
        }
    }

    values
}

/// Render the marker file content for the current layout.
pub(crate) fn render_version() -> String {
    format!("version={}\n", LAYOUT_VERSION)
}

/// Check that `content` declares the supported layout version.
///
/// Returns a description of the problem when it does not.
pub(crate) fn check_version(content: &str) -> std::result::Result<(), String> {
    match parse_kv(content).get("version") {
        Some(&v) if v == LAYOUT_VERSION => Ok(()),
        Some(v) => Err(format!("unsupported version {}", v)),
        None => Err("missing version".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_kv_skips_comments() {
        let values = parse_kv("# header\n\nversion = 1\nother=x\n");
        assert_eq!(values.get("version"), Some(&"1"));
        assert_eq!(values.get("other"), Some(&"x"));
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn test_check_version() {
        assert!(check_version(&render_version()).is_ok());
        assert_eq!(
            check_version("version=2\n").unwrap_err(),
            "unsupported version 2"
        );
        assert_eq!(check_version("").unwrap_err(), "missing version");
    }
}
