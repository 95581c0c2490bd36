//! Input validation for the driver surface.
//!
//! Carried forward from the teacher's byte-slice key/value validators,
//! adapted to the shapes this engine actually accepts: SQL text and rows
//! of bound column values rather than raw keys and values.

use mvccdb_core::{Error, Result, Value};

/// Validates a SQL statement string before handing it to the parser.
///
/// # Security
///
/// - Prevents empty statements
/// - Prevents oversized statements (>1MB), a cheap guard against resource
///   exhaustion from a pathological client
#[inline]
pub fn validate_query(query: &str) -> Result<()> {
    const MAX_QUERY_LENGTH: usize = 1024 * 1024;

    if query.trim().is_empty() {
        return Err(Error::InvalidArgument("query cannot be empty".to_string()));
    }

    if query.len() > MAX_QUERY_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "query length {} exceeds maximum {}",
            query.len(),
            MAX_QUERY_LENGTH
        )));
    }

    Ok(())
}

/// Validates a row of bound column values before it reaches the tuple
/// store.
///
/// # Security
///
/// - Prevents rows with an unreasonable number of columns
/// - Prevents individual text values from growing unbounded
#[inline]
pub fn validate_row(row: &[Value]) -> Result<()> {
    const MAX_COLUMNS: usize = 1024;
    const MAX_TEXT_LENGTH: usize = 16 * 1024 * 1024;

    if row.len() > MAX_COLUMNS {
        return Err(Error::InvalidArgument(format!(
            "row has {} columns, exceeds maximum {}",
            row.len(),
            MAX_COLUMNS
        )));
    }

    for value in row {
        if let Value::Text(s) = value {
            if s.len() > MAX_TEXT_LENGTH {
                return Err(Error::InvalidArgument(format!(
                    "text value length {} exceeds maximum {}",
                    s.len(),
                    MAX_TEXT_LENGTH
                )));
            }
        }
    }

    Ok(())
}

/// Validates a table or column identifier.
///
/// # Security
///
/// - Prevents empty identifiers
/// - Prevents identifiers that could be mistaken for schema-qualified or
///   path-like input
#[inline]
pub fn validate_identifier(name: &str) -> Result<()> {
    const MAX_IDENTIFIER_LENGTH: usize = 256;

    if name.is_empty() {
        return Err(Error::InvalidArgument("identifier cannot be empty".to_string()));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(Error::InvalidArgument(format!(
            "identifier length {} exceeds maximum {}",
            name.len(),
            MAX_IDENTIFIER_LENGTH
        )));
    }

    if name.contains('/') || name.contains('\\') || name.contains("..") || name.contains('\0') {
        return Err(Error::InvalidArgument(
            "identifier contains a disallowed character".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_query() {
        assert!(validate_query("SELECT * FROM users").is_ok());
        assert!(validate_query("").is_err());
        assert!(validate_query("   ").is_err());

        let long = "a".repeat(2 * 1024 * 1024);
        assert!(validate_query(&long).is_err());
    }

    #[test]
    fn test_validate_row() {
        assert!(validate_row(&[Value::Integer(1), Value::Text("Alice".to_string())]).is_ok());

        let too_wide: Vec<Value> = (0..2000).map(Value::Integer).collect();
        assert!(validate_row(&too_wide).is_err());

        let huge_text = vec![Value::Text("x".repeat(17 * 1024 * 1024))];
        assert!(validate_row(&huge_text).is_err());
    }

    #[test]
    fn test_validate_identifier() {
        assert!(validate_identifier("users").is_ok());
        assert!(validate_identifier("").is_err());
        assert!(validate_identifier("../etc/passwd").is_err());
        assert!(validate_identifier("a/b").is_err());
    }
}
