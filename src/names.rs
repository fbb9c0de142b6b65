//! Domain name validation for certificate identifiers.

use crate::error::{Error, Result};

/// Validate a domain argument before it goes anywhere near the network.
///
/// Accepted: ASCII letters, digits, `.`, `-`, `_`, plus a single leading
/// wildcard label `*.`. The name must not start with `.` and must be
/// non-empty once a leading `*.` is stripped.
pub fn validate(name: &str) -> Result<()> {
    for (i, c) in name.char_indices() {
        match c {
            '.' => {
                if i == 0 {
                    return Err(Error::input(format!(
                        "'.' not allowed at beginning in {name}"
                    )));
                }
            }
            '-' | '_' => {}
            '*' => {
                if i != 0 || name.as_bytes().get(1) != Some(&b'.') {
                    return Err(Error::input(format!(
                        "'*.' only allowed at beginning in {name}"
                    )));
                }
            }
            c if c.is_ascii_alphanumeric() => {}
            c => {
                return Err(Error::input(format!("invalid character '{c}' in {name}")));
            }
        }
    }

    if base_domain(name).is_empty() {
        return Err(Error::input("empty name is not allowed"));
    }

    Ok(())
}

/// The name used for the on-disk directory layout: the identifier with any
/// leading wildcard label removed.
pub fn base_domain(name: &str) -> &str {
    name.strip_prefix("*.").unwrap_or(name)
}
