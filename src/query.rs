//! Query directive parsing.
//!
//! Query text is a SQL statement optionally prefixed with the `@sql`
//! decorator and optionally carrying a trailing `-- save_as: NAME` comment.
//! Both passes are lexical:
//!
//! - identifiers following `FROM`/`JOIN` inside string literals or comments
//!   are picked up as table references;
//! - every `@sql` occurrence is removed along with the whitespace after it,
//!   including one inside a literal (`'a@sqlhost'` becomes `'ahost'`).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Decorator marking a submission as query text
pub const SQL_DECORATOR: &str = "@sql";

static SAVE_AS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--\s*save_as:\s*(\w+)").expect("valid save_as regex"));

static SAVE_AS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"--\s*save_as:\s*\w+[^\S\n]*(?:\n|$)").expect("valid save_as line regex")
});

static DECORATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@sql\s*").expect("valid decorator regex"));

static TABLE_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(?:FROM|JOIN)\s+(\w+)").expect("valid table regex"));

/// Everything derived from one piece of query text
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QueryDirective {
    /// Query with the decorator and persistence comment removed, trimmed
    pub query_text: String,
    /// Dataset name to persist the result under
    pub persist_as: Option<String>,
    /// Identifiers following `FROM` or `JOIN`
    pub referenced_tables: BTreeSet<String>,
}

impl QueryDirective {
    /// Parse query text. Never fails: missing parts yield empty fields.
    pub fn parse(text: &str) -> Self {
        let persist_as = SAVE_AS
            .captures(text)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string());

        let without_decorator = DECORATOR.replace_all(text, "");
        let query_text = SAVE_AS_LINE
            .replace_all(&without_decorator, "")
            .trim()
            .to_string();

        let referenced_tables = TABLE_REF
            .captures_iter(&query_text)
            .filter_map(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
            .collect();

        Self {
            query_text,
            persist_as,
            referenced_tables,
        }
    }
}

/// Whether a submission should be routed to the query executor
pub fn is_query(text: &str) -> bool {
    text.trim_start().starts_with(SQL_DECORATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(directive: &QueryDirective) -> Vec<&str> {
        directive
            .referenced_tables
            .iter()
            .map(String::as_str)
            .collect()
    }

    #[test]
    fn test_trailing_directive_on_query_line() {
        let directive = QueryDirective::parse("SELECT * FROM orders JOIN items -- save_as: result");
        assert_eq!(directive.persist_as.as_deref(), Some("result"));
        assert_eq!(tables(&directive), ["items", "orders"]);
        assert_eq!(directive.query_text, "SELECT * FROM orders JOIN items");
    }

    #[test]
    fn test_decorator_and_directive_line_removed() {
        let text = "@sql\n-- save_as: top_customers\nSELECT name, SUM(total) AS spend\nFROM orders\nGROUP BY name\n";
        let directive = QueryDirective::parse(text);
        assert_eq!(directive.persist_as.as_deref(), Some("top_customers"));
        assert_eq!(
            directive.query_text,
            "SELECT name, SUM(total) AS spend\nFROM orders\nGROUP BY name"
        );
    }

    #[test]
    fn test_no_directive() {
        let directive = QueryDirective::parse("  select a from t  ");
        assert_eq!(directive.persist_as, None);
        assert_eq!(directive.query_text, "select a from t");
        assert_eq!(tables(&directive), ["t"]);
    }

    #[test]
    fn test_tables_deduplicated_case_insensitively() {
        let directive =
            QueryDirective::parse("SELECT * FROM a join b ON a.id = b.id LEFT JOIN a AS c ON 1=1");
        assert_eq!(tables(&directive), ["a", "b"]);
    }

    #[test]
    fn test_lexical_extraction_sees_string_literals() {
        let directive = QueryDirective::parse("SELECT 'taken from ghosts' AS note FROM real_table");
        assert_eq!(tables(&directive), ["ghosts", "real_table"]);
    }

    #[test]
    fn test_decorator_removed_inside_literals() {
        let directive = QueryDirective::parse("@sql\nSELECT * FROM users WHERE host = 'a@sqlhost'");
        assert_eq!(directive.query_text, "SELECT * FROM users WHERE host = 'ahost'");
    }

    #[test]
    fn test_empty_text() {
        assert_eq!(QueryDirective::parse(""), QueryDirective::default());
    }

    #[test]
    fn test_is_query() {
        assert!(is_query("  @sql\nSELECT 1"));
        assert!(!is_query("print('@sql')"));
    }
}
