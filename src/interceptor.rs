//! Query interception hook
//!
//! The host's query execution subsystem calls [`QueryInterceptor::on_query`]
//! once per completed query. The hook derives the statement type, runs plan
//! introspection with the interception gate closed, attributes the call
//! stack, and records the finished event into the session aggregator.

use std::sync::Mutex;

use tracing::debug;

use crate::aggregator::{Aggregator, Report};
use crate::callsite::{self, FrameFilter, FrameSource};
use crate::error::ProfileError;
use crate::event::{statement_type_of, QueryEvent};
use crate::gate::InterceptGate;
use crate::plan::{self, PlanIntrospector};

pub(crate) const SOURCE_FILE: &str = file!();

/// Shared state of one measurement session: the interception gate and the
/// aggregator. Counter mutation is serialized behind the mutex, so a host
/// that reports queries from several workers is safe by construction.
#[derive(Debug, Default)]
pub struct ProfileSession {
    gate: InterceptGate,
    aggregator: Mutex<Aggregator>,
}

impl ProfileSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self) -> &InterceptGate {
        &self.gate
    }

    /// Ranked report over everything recorded so far.
    pub fn rankings(&self, n: usize) -> Report {
        self.aggregator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .rankings(n)
    }

    /// Consume the session and yield the aggregated state.
    pub fn into_aggregator(self) -> Aggregator {
        self.aggregator
            .into_inner()
            .unwrap_or_else(|e| e.into_inner())
    }
}

/// The per-query event sink wired between the host's execution subsystem
/// and the session.
pub struct QueryInterceptor<'a, I, S> {
    session: &'a ProfileSession,
    introspector: Mutex<I>,
    frames: S,
    filter: FrameFilter,
}

impl<'a, I: PlanIntrospector, S: FrameSource> QueryInterceptor<'a, I, S> {
    pub fn new(session: &'a ProfileSession, introspector: I, frames: S, filter: FrameFilter) -> Self {
        Self {
            session,
            introspector: Mutex::new(introspector),
            frames,
            filter,
        }
    }

    /// Handle one completed query.
    ///
    /// Returns without recording when the gate is closed: that is the
    /// introspection query of another `on_query` call reporting back into
    /// the hook, and processing it would recurse without bound.
    pub fn on_query(
        &self,
        raw_sql: &str,
        params: &[String],
        duration_seconds: f64,
    ) -> Result<(), ProfileError> {
        if !self.session.gate.is_enabled() {
            return Ok(());
        }

        let statement_type = statement_type_of(raw_sql).to_string();

        let summary = self.session.gate.while_disabled(|| {
            let mut introspector = self
                .introspector
                .lock()
                .unwrap_or_else(|e| e.into_inner());
            plan::analyze(&mut *introspector, raw_sql, &statement_type)
        })??;

        let raw_frames = self.frames.capture();
        let call_stack = callsite::attribute(&raw_frames, &self.filter);

        for frame in &call_stack {
            debug!(
                "{:>30} @ {:>40}:L{:<5} (function starts at L{:<5})",
                frame.function, frame.file, frame.line, frame.function_start_line
            );
        }
        debug!(
            "query used {:>5} tables in {:8.2} sec and needed to look at {:>5} rows",
            summary.num_tables, duration_seconds, summary.num_rows
        );
        debug!(
            "query used {:>5} tables: {}",
            summary.num_tables,
            summary
                .table_names
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        );
        debug!("{} {:?}", raw_sql, params);

        let event = QueryEvent {
            raw_sql: raw_sql.to_string(),
            params: params.to_vec(),
            statement_type,
            duration_seconds,
            num_tables: summary.num_tables,
            num_rows: summary.num_rows,
            table_names: summary.table_names,
            call_stack,
        };

        self.session
            .aggregator
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{PlanOutcome, ReplaySource, ScriptedIntrospector};
    use crate::callsite::RawFrame;
    use serde_json::json;

    fn plan_row(table: &str, rows: u64) -> Vec<serde_json::Value> {
        vec![
            json!(1),
            json!("SIMPLE"),
            json!(table),
            json!("ALL"),
            json!(null),
            json!(null),
            json!(null),
            json!(null),
            json!(rows),
            json!("Using where"),
        ]
    }

    fn app_frame(file: &str, line: u32) -> RawFrame {
        RawFrame {
            file: Some(file.to_string()),
            line: Some(line),
            function: Some("handler".to_string()),
            function_start_line: Some(1),
        }
    }

    #[test]
    fn test_on_query_records_event_with_plan_metrics() {
        let session = ProfileSession::new();
        let introspector = ScriptedIntrospector::new([PlanOutcome::Rows {
            rows: vec![plan_row("a", 100), plan_row("b", 50)],
        }]);
        let frames = ReplaySource::default();
        frames.set(vec![app_frame("/app/src/views.rs", 12)]);
        let interceptor = QueryInterceptor::new(
            &session,
            introspector,
            &frames,
            FrameFilter::app_root("/app"),
        );

        interceptor
            .on_query("SELECT * FROM a JOIN b", &[], 0.5)
            .unwrap();

        let agg = session.into_aggregator();
        assert_eq!(agg.totals().queries, 1);
        assert_eq!(agg.totals().rows, 150);
        assert_eq!(agg.totals().tables, 2);
        let event = &agg.events()[0];
        assert_eq!(event.statement_type, "SELECT");
        assert!(event.table_names.contains("a"));
        assert!(event.table_names.contains("b"));
        assert_eq!(event.call_stack.len(), 1);
    }

    #[test]
    fn test_on_query_skips_when_gate_closed() {
        let session = ProfileSession::new();
        let introspector = ScriptedIntrospector::default();
        let frames = ReplaySource::default();
        let interceptor = QueryInterceptor::new(
            &session,
            introspector,
            &frames,
            FrameFilter::app_root("/app"),
        );

        session
            .gate()
            .while_disabled(|| interceptor.on_query("SELECT 1", &[], 0.1))
            .unwrap()
            .unwrap();

        assert_eq!(session.rankings(20), Report::NoQueries);
    }

    #[test]
    fn test_on_query_absorbs_explain_failure_for_insert() {
        let session = ProfileSession::new();
        let introspector = ScriptedIntrospector::new([PlanOutcome::Error {
            error: "EXPLAIN not supported".to_string(),
        }]);
        let frames = ReplaySource::default();
        let interceptor = QueryInterceptor::new(
            &session,
            introspector,
            &frames,
            FrameFilter::app_root("/app"),
        );

        interceptor
            .on_query("INSERT INTO t VALUES (1)", &["1".to_string()], 0.01)
            .unwrap();

        let agg = session.into_aggregator();
        let event = &agg.events()[0];
        assert_eq!(event.num_tables, 0);
        assert_eq!(event.num_rows, 0);
        assert!(event.table_names.is_empty());
    }

    #[test]
    fn test_on_query_propagates_explain_failure_for_select() {
        let session = ProfileSession::new();
        let introspector = ScriptedIntrospector::new([PlanOutcome::Error {
            error: "connection reset".to_string(),
        }]);
        let frames = ReplaySource::default();
        let interceptor = QueryInterceptor::new(
            &session,
            introspector,
            &frames,
            FrameFilter::app_root("/app"),
        );

        let err = interceptor.on_query("SELECT 1", &[], 0.1).unwrap_err();
        assert!(matches!(err, ProfileError::ExplainFailed { .. }));
        // The gate is back open even though introspection failed.
        assert!(session.gate().is_enabled());
        assert_eq!(session.rankings(20), Report::NoQueries);
    }

    #[test]
    fn test_gate_restored_after_successful_query() {
        let session = ProfileSession::new();
        let introspector = ScriptedIntrospector::new([PlanOutcome::Rows {
            rows: vec![plan_row("t", 1)],
        }]);
        let frames = ReplaySource::default();
        let interceptor = QueryInterceptor::new(
            &session,
            introspector,
            &frames,
            FrameFilter::app_root("/app"),
        );

        assert!(session.gate().is_enabled());
        interceptor.on_query("SELECT * FROM t", &[], 0.0).unwrap();
        assert!(session.gate().is_enabled());
    }

    #[test]
    fn test_statement_type_casing_preserved_in_counts() {
        let session = ProfileSession::new();
        let introspector = ScriptedIntrospector::new([
            PlanOutcome::Error {
                error: "nope".to_string(),
            },
            PlanOutcome::Rows {
                rows: vec![plan_row("t", 1)],
            },
        ]);
        let frames = ReplaySource::default();
        let interceptor = QueryInterceptor::new(
            &session,
            introspector,
            &frames,
            FrameFilter::app_root("/app"),
        );

        // Lowercase "select" is a distinct statement type and its EXPLAIN
        // failure is the absorbed case.
        interceptor.on_query("select 1", &[], 0.0).unwrap();
        interceptor.on_query("SELECT * FROM t", &[], 0.0).unwrap();

        let Report::Summary(data) = session.rankings(20) else {
            panic!("expected a summary");
        };
        let types: Vec<_> = data
            .statement_types
            .iter()
            .map(|e| e.key.as_str())
            .collect();
        assert!(types.contains(&"select"));
        assert!(types.contains(&"SELECT"));
    }
}
