//! Validated SQL building blocks.
//!
//! Table and column names are interpolated into statement text, so they are
//! validated first. Discriminator values originate in row data and are only
//! ever embedded as quoted literals.

use std::fmt;

/// A name that cannot be used as a SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid SQL identifier: {0:?}")]
pub struct InvalidIdentifier(pub String);

/// A validated, unquoted SQL identifier.
///
/// Accepts `[A-Za-z_][A-Za-z0-9_]*` up to 63 bytes, the limit for unquoted
/// names in Postgres. Anything else is rejected rather than quoted: names
/// reaching this type come from callers or from introspected schema, and a
/// name outside this shape is a sign something other than a schema name is
/// being smuggled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident(String);

impl Ident {
    /// Validates `name` as a plain identifier.
    pub fn new(name: &str) -> Result<Self, InvalidIdentifier> {
        let mut bytes = name.bytes();
        let valid = match bytes.next() {
            Some(b) => {
                (b.is_ascii_alphabetic() || b == b'_')
                    && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
            }
            None => false,
        };
        if valid && name.len() <= 63 {
            Ok(Ident(name.to_string()))
        } else {
            Err(InvalidIdentifier(name.to_string()))
        }
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Quotes a string as a SQL literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_names() {
        for name in ["orders", "line_items", "_hidden", "col2", "a"] {
            assert!(Ident::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn rejects_everything_else() {
        for name in ["", "1abc", "ord ers", "a;b", "a-b", "a.b", "naïve", "a\"b"] {
            assert!(Ident::new(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn rejects_names_over_the_postgres_limit() {
        let long = "a".repeat(64);
        assert!(Ident::new(&long).is_err());
        let just_fits = "a".repeat(63);
        assert!(Ident::new(&just_fits).is_ok());
    }

    #[test]
    fn literals_double_embedded_quotes() {
        assert_eq!(quote_literal("Widget"), "'Widget'");
        assert_eq!(quote_literal("O'Brien"), "'O''Brien'");
    }
}
