//! `PostgreSQL` identifier validation.

use blockline_types::ConnectorError;

const MAX_IDENTIFIER_LEN: usize = 63;

/// Reject names that would need quoting tricks or exceed the server limit.
///
/// # Errors
///
/// Returns `ConfigValidation` naming `what` and the offending identifier.
pub(crate) fn validate_pg_identifier(what: &str, name: &str) -> Result<(), ConnectorError> {
    let invalid = |reason: String| ConnectorError::config(format!("{what} '{name}': {reason}"));

    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(invalid(format!(
            "exceeds the {MAX_IDENTIFIER_LEN}-byte identifier limit (got {})",
            name.len()
        )));
    }

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return Err(invalid("must not be empty".to_string()));
    };
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(invalid(format!(
            "must start with a letter or underscore, got '{first}'"
        )));
    }
    if let Some(ch) = chars.find(|ch| !ch.is_ascii_alphanumeric() && *ch != '_') {
        return Err(invalid(format!("contains invalid character '{ch}'")));
    }
    Ok(())
}
