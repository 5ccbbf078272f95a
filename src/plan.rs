//! Execution-plan introspection and cost analysis
//!
//! For every intercepted query a secondary `EXPLAIN <sql>` query is issued
//! over the same connection. Its tabular result is parsed into [`PlanRow`]s
//! and reduced to three cost metrics: how many tables the plan touches, how
//! many rows the engine estimates it must examine, and which tables are
//! referenced.
//!
//! The engine only supports EXPLAIN for SELECT statements on older servers,
//! so a failing introspection for any other statement type is the expected
//! case and maps to zero-cost metrics. A failing introspection for a SELECT
//! is unexpected and fails the measurement session.

use serde_json::Value;
use tracing::debug;

use crate::error::ProfileError;

/// Plan rows whose `Extra` field carries one of these phrases describe a
/// branch the optimizer proved unreachable or eliminated entirely. They
/// still count as a table in the plan but contribute no examined rows.
pub const ZERO_COST_EXTRAS: [&str; 3] = [
    "Impossible WHERE noticed after reading const tables",
    "Impossible WHERE",
    "Select tables optimized away",
];

/// One row of the EXPLAIN result, positionally typed per the engine's
/// 10-column tabular format:
/// `id, select_type, table, type, possible_keys, key, key_len, ref, rows, Extra`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanRow {
    pub id: u64,
    pub select_type: String,
    pub table: Option<String>,
    pub access_type: Option<String>,
    pub possible_keys: Option<String>,
    pub key: Option<String>,
    pub key_len: Option<String>,
    pub ref_col: Option<String>,
    pub rows_estimate: Option<u64>,
    pub extra: Option<String>,
}

impl PlanRow {
    /// Parse one raw 10-column row as it appears in a recorded capture or
    /// comes back from a driver returning loosely typed columns.
    pub fn from_columns(columns: &[Value]) -> Result<Self, ProfileError> {
        if columns.len() != 10 {
            return Err(ProfileError::MalformedPlanRow(format!(
                "expected 10 columns, got {}",
                columns.len()
            )));
        }

        let id = columns[0].as_u64().ok_or_else(|| {
            ProfileError::MalformedPlanRow(format!("id column is not an integer: {}", columns[0]))
        })?;
        let select_type = required_string(&columns[1], "select_type")?;

        Ok(Self {
            id,
            select_type,
            table: optional_string(&columns[2], "table")?,
            access_type: optional_string(&columns[3], "type")?,
            possible_keys: optional_string(&columns[4], "possible_keys")?,
            key: optional_string(&columns[5], "key")?,
            key_len: optional_string(&columns[6], "key_len")?,
            ref_col: optional_string(&columns[7], "ref")?,
            rows_estimate: optional_u64(&columns[8], "rows")?,
            extra: optional_string(&columns[9], "Extra")?,
        })
    }

    /// Whether this row describes a plan branch with no cost of its own:
    /// either the optimizer flagged it with a zero-cost sentinel, or it is a
    /// set-combination marker (`UNION RESULT` with no `Extra`).
    pub fn is_zero_cost(&self) -> bool {
        if let Some(extra) = &self.extra {
            if ZERO_COST_EXTRAS.contains(&extra.as_str()) {
                return true;
            }
        }
        self.extra.is_none() && self.select_type == "UNION RESULT"
    }
}

fn required_string(value: &Value, column: &str) -> Result<String, ProfileError> {
    value.as_str().map(str::to_string).ok_or_else(|| {
        ProfileError::MalformedPlanRow(format!("{column} column is not a string: {value}"))
    })
}

fn optional_string(value: &Value, column: &str) -> Result<Option<String>, ProfileError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.clone())),
        other => Err(ProfileError::MalformedPlanRow(format!(
            "{column} column is not a string or null: {other}"
        ))),
    }
}

fn optional_u64(value: &Value, column: &str) -> Result<Option<u64>, ProfileError> {
    match value {
        Value::Null => Ok(None),
        other => other.as_u64().map(Some).ok_or_else(|| {
            ProfileError::MalformedPlanRow(format!(
                "{column} column is not an integer or null: {other}"
            ))
        }),
    }
}

/// Normalized cost metrics of one query's execution plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanSummary {
    /// One plan row per joined table.
    pub num_tables: u64,
    /// Estimated rows examined, summed over costed rows.
    pub num_rows: u64,
    /// Distinct table names referenced by the plan.
    pub table_names: std::collections::BTreeSet<String>,
}

impl PlanSummary {
    /// The zero-cost summary used when no plan is available.
    pub fn unavailable() -> Self {
        Self::default()
    }
}

/// Issues the `EXPLAIN` introspection query for a statement.
///
/// Implemented over the same connection that executed the original query.
/// The replay tooling ships [`crate::capture::ScriptedIntrospector`]; a host
/// embedding the profiler implements this over its own database handle.
pub trait PlanIntrospector {
    /// Return the plan rows for `EXPLAIN <raw_sql>`, or the engine's error.
    fn explain(&mut self, raw_sql: &str) -> anyhow::Result<Vec<PlanRow>>;
}

/// Obtain and reduce the execution plan for one query.
///
/// A failing introspection is recovered as [`PlanSummary::unavailable`] for
/// any statement type other than `SELECT`; for a SELECT it is propagated.
pub fn analyze(
    introspector: &mut dyn PlanIntrospector,
    raw_sql: &str,
    statement_type: &str,
) -> Result<PlanSummary, ProfileError> {
    let rows = match introspector.explain(raw_sql) {
        Ok(rows) => rows,
        Err(source) => {
            if statement_type != "SELECT" {
                // The engine cannot EXPLAIN this statement type. Zero
                // metrics keep downstream sums meaningful.
                debug!(statement_type, "plan introspection unsupported, counting zero cost");
                return Ok(PlanSummary::unavailable());
            }
            return Err(ProfileError::ExplainFailed {
                statement_type: statement_type.to_string(),
                source,
            });
        }
    };
    summarize(&rows)
}

/// Reduce parsed plan rows to the cost summary.
pub fn summarize(rows: &[PlanRow]) -> Result<PlanSummary, ProfileError> {
    let num_tables = rows.len() as u64;
    let table_names = rows.iter().filter_map(|row| row.table.clone()).collect();

    let mut num_rows = 0u64;
    for row in rows.iter().filter(|row| !row.is_zero_cost()) {
        let estimate = row
            .rows_estimate
            .ok_or_else(|| ProfileError::MissingRowEstimate {
                table: row.table.clone(),
            })?;
        num_rows += estimate;
    }

    Ok(PlanSummary {
        num_tables,
        num_rows,
        table_names,
    })
}
