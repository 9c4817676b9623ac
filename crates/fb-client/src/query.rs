//! Statement text handed to prepare.

/// SQL text ready to be prepared.
///
/// Text that was rewritten to return generated keys reports so through
/// [`FinalizedQuery::returns_generated_keys`]; the flag is recorded on the
/// statement.
pub trait FinalizedQuery {
    /// The statement text.
    fn sql(&self) -> &str;

    /// Whether executing the statement returns generated keys.
    fn returns_generated_keys(&self) -> bool {
        false
    }
}

impl FinalizedQuery for &str {
    fn sql(&self) -> &str {
        self
    }
}

impl FinalizedQuery for String {
    fn sql(&self) -> &str {
        self
    }
}

impl FinalizedQuery for &String {
    fn sql(&self) -> &str {
        self
    }
}

/// Statement text rewritten to return generated keys, typically an
/// `INSERT ... RETURNING` statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKeysQuery {
    sql: String,
    returns_keys: bool,
}

impl GeneratedKeysQuery {
    /// Wrap rewritten text.
    ///
    /// `returns_keys` is `false` when the rewrite left the text unchanged.
    #[must_use]
    pub fn new(sql: impl Into<String>, returns_keys: bool) -> Self {
        Self {
            sql: sql.into(),
            returns_keys,
        }
    }
}

impl FinalizedQuery for GeneratedKeysQuery {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn returns_generated_keys(&self) -> bool {
        self.returns_keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_returns_no_keys() {
        let sql = "SELECT 1 FROM RDB$DATABASE";
        assert_eq!(sql.sql(), sql);
        assert!(!sql.returns_generated_keys());
        assert!(!sql.to_string().returns_generated_keys());
    }

    #[test]
    fn test_generated_keys_query() {
        let query = GeneratedKeysQuery::new("INSERT INTO T (A) VALUES (?) RETURNING ID", true);
        assert!(query.returns_generated_keys());
        assert!(query.sql().ends_with("RETURNING ID"));
        assert!(!GeneratedKeysQuery::new("DELETE FROM T", false).returns_generated_keys());
    }
}
