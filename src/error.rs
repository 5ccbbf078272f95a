//! Error taxonomy for the profiling engine
//!
//! Every failure is either absorbed as expected (the engine refusing to
//! EXPLAIN a non-SELECT statement) or fatal to the measurement session.
//! There are no retries and no partial-success path: a query gets full
//! metrics or the zero-cost fallback, nothing in between.

use thiserror::Error;

/// Fatal errors surfaced by the interception and analysis pipeline.
#[derive(Error, Debug)]
pub enum ProfileError {
    /// Plan introspection failed for a statement type that supports it.
    #[error("plan introspection failed for {statement_type} statement: {source}")]
    ExplainFailed {
        statement_type: String,
        #[source]
        source: anyhow::Error,
    },

    /// A plan row that survived the zero-cost filter carries no row
    /// estimate. Summing over a missing estimate is undefined, so this is
    /// treated as a broken assumption rather than a zero.
    #[error("plan row for table {table:?} has no row estimate")]
    MissingRowEstimate { table: Option<String> },

    /// The interception gate was not back in its prior state after the
    /// introspection round-trip. A gate stuck disabled silently ends all
    /// further measurement, so this is surfaced rather than repaired.
    #[error("interception gate left in an unexpected state after plan introspection")]
    GateNotRestored,

    /// A raw plan row did not match the 10-column tabular format.
    #[error("malformed plan row: {0}")]
    MalformedPlanRow(String),
}
