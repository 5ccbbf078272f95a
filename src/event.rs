//! Query event model

use std::collections::BTreeSet;

use crate::callsite::StackFrame;

/// One executed query together with its derived cost metrics and the
/// application call sites that triggered it.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryEvent {
    /// SQL text as supplied by the host, placeholders included.
    pub raw_sql: String,
    /// Bound parameter values, in order.
    pub params: Vec<String>,
    /// First whitespace-delimited token of the SQL, verbatim casing.
    pub statement_type: String,
    /// Wall-clock duration of the query in seconds.
    pub duration_seconds: f64,
    /// Tables touched per the plan; 0 when the plan was unavailable.
    pub num_tables: u64,
    /// Estimated rows examined, summed over costed plan rows. 0 when the
    /// plan was unavailable, which is a convention, not a measured zero.
    pub num_rows: u64,
    /// Distinct table names referenced by the plan.
    pub table_names: BTreeSet<String>,
    /// Application frames, innermost to outermost.
    pub call_stack: Vec<StackFrame>,
}

/// First whitespace-delimited token of a SQL statement.
///
/// Deliberately not a SQL lexer: a query is classified by its leading
/// keyword exactly as the host handed it over, casing included.
pub fn statement_type_of(raw_sql: &str) -> &str {
    raw_sql.split_whitespace().next().unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statement_type_select() {
        assert_eq!(statement_type_of("SELECT * FROM users"), "SELECT");
    }

    #[test]
    fn test_statement_type_insert() {
        assert_eq!(
            statement_type_of("INSERT INTO logs (msg) VALUES (%s)"),
            "INSERT"
        );
    }

    #[test]
    fn test_statement_type_leading_whitespace() {
        assert_eq!(statement_type_of("  \n\tUPDATE t SET a = 1"), "UPDATE");
    }

    #[test]
    fn test_statement_type_preserves_casing() {
        // Lowercase input stays a distinct statement type.
        assert_eq!(statement_type_of("select 1"), "select");
    }

    #[test]
    fn test_statement_type_empty_sql() {
        assert_eq!(statement_type_of(""), "");
        assert_eq!(statement_type_of("   "), "");
    }

    #[test]
    fn test_query_event_clone_and_eq() {
        let event = QueryEvent {
            raw_sql: "SELECT 1".to_string(),
            params: vec![],
            statement_type: "SELECT".to_string(),
            duration_seconds: 0.5,
            num_tables: 0,
            num_rows: 0,
            table_names: BTreeSet::new(),
            call_stack: vec![],
        };
        assert_eq!(event.clone(), event);
    }
}
