//! Key-path field locator for YAML-style configuration documents.
//!
//! The platform keeps host secrets (database encryption key) and the
//! firewall enable flag inside large YAML files maintained by external
//! tooling. Rewriting those files wholesale would destroy their formatting
//! and comments, so this module locates a single `key: value` line by a
//! dotted key path (e.g. `security.firewall.enable`) using indentation to
//! track nesting, and rewrites only that line.

use crate::utils::errors::{EngineError, Result};

struct Located {
    line_index: usize,
    indent: String,
    key: String,
    value: String,
}

/// Read the scalar value at `path` in `doc`.
pub fn read_field(doc: &str, path: &str) -> Result<String> {
    Ok(locate(doc, path)?.value)
}

/// Return `doc` with the scalar at `path` replaced by `new_value`.
/// Indentation and every other line are preserved byte for byte.
pub fn set_field(doc: &str, path: &str, new_value: &str) -> Result<String> {
    let located = locate(doc, path)?;
    let new_line = format!("{}{}: {}", located.indent, located.key, new_value);
    let mut out = String::with_capacity(doc.len() + new_value.len());
    for (idx, line) in doc.split('\n').enumerate() {
        if idx > 0 {
            out.push('\n');
        }
        if idx == located.line_index {
            out.push_str(&new_line);
        } else {
            out.push_str(line);
        }
    }
    Ok(out)
}

fn locate(doc: &str, path: &str) -> Result<Located> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return Err(EngineError::Field("empty key path".into()));
    }

    // Indent of each matched ancestor, plus the expected indent of
    // candidate keys at every open level (None until the first child of
    // that level is seen).
    let mut matched_indents: Vec<usize> = Vec::new();
    let mut child_indents: Vec<Option<usize>> = vec![None];

    for (idx, line) in doc.split('\n').enumerate() {
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let indent = line.len() - trimmed.len();

        while let Some(&parent_indent) = matched_indents.last() {
            if indent <= parent_indent {
                matched_indents.pop();
                child_indents.pop();
            } else {
                break;
            }
        }
        let depth = matched_indents.len();

        match child_indents[depth] {
            None => child_indents[depth] = Some(indent),
            Some(expected) if indent != expected => continue,
            Some(_) => {}
        }

        let Some((raw_key, rest)) = trimmed.split_once(':') else {
            continue;
        };
        let key = raw_key.trim();
        if key != segments[depth] {
            continue;
        }

        if depth == segments.len() - 1 {
            return Ok(Located {
                line_index: idx,
                indent: line[..indent].to_string(),
                key: key.to_string(),
                value: rest.trim().to_string(),
            });
        }
        matched_indents.push(indent);
        child_indents.push(None);
    }

    Err(EngineError::Field(format!("key path not found: {path}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = "\
# platform constants
credentials:
  mysql:
    user: pbx
    key: 0123abcd
  sip:
    key: other
security:
  firewall:
    enable: yes
";

    #[test]
    fn test_read_nested_field() {
        assert_eq!(read_field(DOC, "credentials.mysql.key").unwrap(), "0123abcd");
        assert_eq!(read_field(DOC, "security.firewall.enable").unwrap(), "yes");
    }

    #[test]
    fn test_same_key_under_wrong_parent_is_not_matched() {
        // `sip.key` exists, but `credentials.mysql.key` must resolve to the
        // mysql one even though both are named `key`.
        assert_eq!(read_field(DOC, "credentials.sip.key").unwrap(), "other");
    }

    #[test]
    fn test_missing_path_is_an_error() {
        assert!(matches!(
            read_field(DOC, "credentials.postgres.key"),
            Err(EngineError::Field(_))
        ));
        assert!(matches!(read_field(DOC, "nothing"), Err(EngineError::Field(_))));
    }

    #[test]
    fn test_set_field_rewrites_only_the_target_line() {
        let updated = set_field(DOC, "credentials.mysql.key", "ffff9999").unwrap();

        assert_eq!(read_field(&updated, "credentials.mysql.key").unwrap(), "ffff9999");
        // Everything else, including the comment and sibling key, is intact.
        assert!(updated.starts_with("# platform constants\n"));
        assert_eq!(read_field(&updated, "credentials.sip.key").unwrap(), "other");
        assert_eq!(updated.lines().count(), DOC.lines().count());
        assert!(updated.contains("    key: ffff9999"));
    }

    #[test]
    fn test_set_field_preserves_indentation() {
        let updated = set_field(DOC, "security.firewall.enable", "no").unwrap();
        assert!(updated.contains("    enable: no"));
        assert!(!updated.contains("enable: yes"));
    }

    #[test]
    fn test_deeper_lines_under_unmatched_sibling_are_skipped() {
        let doc = "\
a:
  c:
    b: wrong
  b: right
";
        assert_eq!(read_field(doc, "a.b").unwrap(), "right");
    }

    #[test]
    fn test_top_level_field() {
        let doc = "name: alpha\nrole: master\n";
        assert_eq!(read_field(doc, "role").unwrap(), "master");
        let updated = set_field(doc, "role", "dr").unwrap();
        assert_eq!(updated, "name: alpha\nrole: dr\n");
    }
}
