//! Lexical scanner for policy text.
//!
//! Policy and fragment files are Rego source, not JSON. The only structured parts we
//! need are the `containers := [...]` and `fragments := [...]` arrays, so the scanner
//! finds a start marker and walks forward until the opening bracket is balanced.
//! Brackets inside string literals do not count.

use crate::error::{PolicyError, Result};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

pub const CONTAINERS_MARKER: &str = "containers := ";
pub const FRAGMENTS_MARKER: &str = "fragments := ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScanState {
    /// Before the first `[`.
    Start,
    /// Inside the array, `depth` open brackets.
    Open { depth: usize },
    /// Inside a string literal within the array.
    Quoted { depth: usize, escaped: bool },
    /// The opening bracket has been closed.
    Closed,
}

/// Return the bracket-delimited array that follows `marker`, brackets included.
pub fn extract_array<'a>(text: &'a str, marker: &str) -> Result<&'a str> {
    let start = text
        .find(marker)
        .ok_or_else(|| PolicyError::Scan(format!("marker '{}' not found", marker.trim())))?
        + marker.len();
    let rest = &text[start..];

    let mut state = ScanState::Start;
    let mut begin = 0;
    for (idx, ch) in rest.char_indices() {
        state = match (state, ch) {
            (ScanState::Start, '[') => {
                begin = idx;
                ScanState::Open { depth: 1 }
            }
            (ScanState::Start, c) if c.is_whitespace() => ScanState::Start,
            (ScanState::Start, c) => {
                return Err(PolicyError::Scan(format!(
                    "expected '[' after '{}', found '{c}'",
                    marker.trim()
                )))
            }
            (ScanState::Open { depth }, '[') => ScanState::Open { depth: depth + 1 },
            (ScanState::Open { depth: 1 }, ']') => ScanState::Closed,
            (ScanState::Open { depth }, ']') => ScanState::Open { depth: depth - 1 },
            (ScanState::Open { depth }, '"') => ScanState::Quoted {
                depth,
                escaped: false,
            },
            (ScanState::Open { depth }, _) => ScanState::Open { depth },
            (ScanState::Quoted { depth, escaped: false }, '\\') => ScanState::Quoted {
                depth,
                escaped: true,
            },
            (ScanState::Quoted { depth, escaped: false }, '"') => ScanState::Open { depth },
            (ScanState::Quoted { depth, .. }, _) => ScanState::Quoted {
                depth,
                escaped: false,
            },
            (ScanState::Closed, _) => ScanState::Closed,
        };
        if state == ScanState::Closed {
            return Ok(&rest[begin..=idx]);
        }
    }
    Err(PolicyError::Scan(format!(
        "unbalanced brackets after '{}'",
        marker.trim()
    )))
}

/// Parse an extracted array. JSON first; policy text written by hand may carry
/// trailing commas or tabs, which the YAML loader accepts once tabs are expanded.
pub fn parse_array(array_text: &str) -> Result<Vec<Value>> {
    if let Ok(items) = serde_json::from_str::<Vec<Value>>(array_text) {
        return Ok(items);
    }
    let expanded = array_text.replace('\t', "    ");
    Ok(serde_yaml::from_str::<Vec<Value>>(&expanded)?)
}

/// Extract and parse the `containers` array.
pub fn extract_containers(text: &str) -> Result<Vec<Value>> {
    parse_array(extract_array(text, CONTAINERS_MARKER)?)
}

/// Extract and parse the `fragments` array; absent means no imports.
pub fn extract_fragments(text: &str) -> Result<Vec<Value>> {
    if !text.contains(FRAGMENTS_MARKER) {
        return Ok(Vec::new());
    }
    parse_array(extract_array(text, FRAGMENTS_MARKER)?)
}

pub fn extract_containers_and_fragments(text: &str) -> Result<(Vec<Value>, Vec<Value>)> {
    Ok((extract_containers(text)?, extract_fragments(text)?))
}

fn svn_regex() -> Option<&'static Regex> {
    static SVN: OnceLock<Option<Regex>> = OnceLock::new();
    SVN.get_or_init(|| Regex::new(r#"(?m)^\s*svn\s*:=\s*"?([0-9]+)"?"#).ok())
        .as_ref()
}

/// The `svn` a fragment declares, if any.
pub fn extract_svn(text: &str) -> Option<u64> {
    svn_regex()?
        .captures(text)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// The `package` a fragment declares, if any.
pub fn extract_namespace(text: &str) -> Option<&str> {
    text.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("package "))
        .map(str::trim)
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAGMENT: &str = r#"package fragment_ns

svn := "3"
framework_version := "0.2.3"

fragments := [
	{
		"feed": "example.com/infra",
		"includes": ["containers"],
		"issuer": "did:x509:abc",
		"minimum_svn": "1",
	},
]

containers := [{"command":["echo","[not a bracket"],"id":"app:1"}]
"#;

    #[test]
    fn extracts_balanced_array_ignoring_quoted_brackets() {
        let text = extract_array(FRAGMENT, CONTAINERS_MARKER).unwrap();
        assert_eq!(text, r#"[{"command":["echo","[not a bracket"],"id":"app:1"}]"#);
    }

    #[test]
    fn parses_trailing_commas_and_tabs() {
        let (containers, fragments) = extract_containers_and_fragments(FRAGMENT).unwrap();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0]["id"], "app:1");
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0]["feed"], "example.com/infra");
        assert_eq!(fragments[0]["minimum_svn"], "1");
    }

    #[test]
    fn missing_marker_and_unbalanced_input_are_scan_errors() {
        assert!(matches!(
            extract_containers("package x").unwrap_err(),
            PolicyError::Scan(_)
        ));
        assert!(matches!(
            extract_containers("containers := [[1]").unwrap_err(),
            PolicyError::Scan(_)
        ));
        assert!(extract_fragments("package x").unwrap().is_empty());
    }

    #[test]
    fn svn_and_namespace() {
        assert_eq!(extract_svn(FRAGMENT), Some(3));
        assert_eq!(extract_svn("svn := 12\n"), Some(12));
        assert_eq!(extract_svn("package x"), None);
        assert_eq!(extract_namespace(FRAGMENT), Some("fragment_ns"));
    }
}
