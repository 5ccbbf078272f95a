//! Multi-key aggregation of query events
//!
//! The aggregator owns every observed [`QueryEvent`] for one measurement
//! session plus derived counters keyed by file, line, function, and
//! statement type. Each key granularity carries two counter families: hit
//! count and summed rows examined, since "hottest by call frequency" and
//! "hottest by rows examined" are different rankings over the same keys.
//!
//! Counters live in `BTreeMap`s so iteration is in the key's natural order;
//! rankings use a stable descending sort on the metric, which makes ties
//! resolve to that natural order deterministically.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::event::QueryEvent;

/// Hit and row counters for one aggregation key.
#[derive(Debug, Clone, Copy, Default)]
struct KeyCounters {
    hits: u64,
    rows: u64,
}

/// File and line of one call site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct LineKey {
    file: String,
    line: u32,
}

/// File, function name, and function start line of one call site.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct FunctionKey {
    file: String,
    function: String,
    start_line: u32,
}

/// One entry of a count-keyed ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedCount {
    pub count: u64,
    pub key: String,
}

/// One entry of an individual-query ranking with an integer metric.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedQuery {
    pub metric: u64,
    pub sql: String,
    pub params: Vec<String>,
}

/// One entry of the by-duration individual-query ranking.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedDuration {
    pub seconds: f64,
    pub sql: String,
    pub params: Vec<String>,
}

/// Session grand totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Totals {
    pub queries: u64,
    pub rows: u64,
    pub tables: u64,
    pub duration_seconds: f64,
}

/// The full ranked report of one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportData {
    /// Ranking cap every section was produced with.
    pub top: usize,
    pub files_by_hits: Vec<RankedCount>,
    pub lines_by_hits: Vec<RankedCount>,
    pub functions_by_hits: Vec<RankedCount>,
    pub statement_types: Vec<RankedCount>,
    pub queries_by_rows: Vec<RankedQuery>,
    pub queries_by_tables: Vec<RankedQuery>,
    pub queries_by_duration: Vec<RankedDuration>,
    pub files_by_rows: Vec<RankedCount>,
    pub functions_by_rows: Vec<RankedCount>,
    pub lines_by_rows: Vec<RankedCount>,
    pub totals: Totals,
}

/// Ranked report, with an explicit no-data state for a session that never
/// recorded a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Report {
    NoQueries,
    Summary(ReportData),
}

/// Accumulates all observed query events and their derived counters.
#[derive(Debug, Default)]
pub struct Aggregator {
    totals: Totals,
    statement_types: BTreeMap<String, u64>,
    files: BTreeMap<String, KeyCounters>,
    lines: BTreeMap<LineKey, KeyCounters>,
    functions: BTreeMap<FunctionKey, KeyCounters>,
    events: Vec<QueryEvent>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the counters. Structurally identical events both
    /// count; there is no deduplication.
    pub fn record(&mut self, event: QueryEvent) {
        self.totals.queries += 1;
        self.totals.rows += event.num_rows;
        self.totals.tables += event.num_tables;
        self.totals.duration_seconds += event.duration_seconds;

        *self
            .statement_types
            .entry(event.statement_type.clone())
            .or_default() += 1;

        // Every frame of the stack gets one hit and the query's row cost at
        // each key granularity.
        for frame in &event.call_stack {
            let by_file = self.files.entry(frame.file.clone()).or_default();
            by_file.hits += 1;
            by_file.rows += event.num_rows;

            let by_line = self
                .lines
                .entry(LineKey {
                    file: frame.file.clone(),
                    line: frame.line,
                })
                .or_default();
            by_line.hits += 1;
            by_line.rows += event.num_rows;

            let by_function = self
                .functions
                .entry(FunctionKey {
                    file: frame.file.clone(),
                    function: frame.function.clone(),
                    start_line: frame.function_start_line,
                })
                .or_default();
            by_function.hits += 1;
            by_function.rows += event.num_rows;
        }

        self.events.push(event);
    }

    pub fn totals(&self) -> Totals {
        self.totals
    }

    pub fn events(&self) -> &[QueryEvent] {
        &self.events
    }

    /// Produce the ranked report, every section capped at `n`. Reads only;
    /// calling it twice without an intervening `record` yields identical
    /// output.
    pub fn rankings(&self, n: usize) -> Report {
        if self.events.is_empty() {
            return Report::NoQueries;
        }

        Report::Summary(ReportData {
            top: n,
            files_by_hits: ranked(&self.files, n, |c| c.hits, |file| file.clone()),
            lines_by_hits: ranked(&self.lines, n, |c| c.hits, line_label),
            functions_by_hits: ranked(&self.functions, n, |c| c.hits, |key| {
                format!("{} in {} (L{})", key.function, key.file, key.start_line)
            }),
            statement_types: ranked(&self.statement_types, n, |&c| c, |name| name.clone()),
            queries_by_rows: self.ranked_queries(n, |event| event.num_rows),
            queries_by_tables: self.ranked_queries(n, |event| event.num_tables),
            queries_by_duration: self.ranked_durations(n),
            files_by_rows: ranked(&self.files, n, |c| c.rows, |file| file.clone()),
            functions_by_rows: ranked(&self.functions, n, |c| c.rows, |key| {
                format!("{}:{}:L{}", key.file, key.function, key.start_line)
            }),
            lines_by_rows: ranked(&self.lines, n, |c| c.rows, line_label),
            totals: self.totals,
        })
    }

    fn ranked_queries(&self, n: usize, metric: impl Fn(&QueryEvent) -> u64) -> Vec<RankedQuery> {
        let mut entries: Vec<RankedQuery> = self
            .events
            .iter()
            .map(|event| RankedQuery {
                metric: metric(event),
                sql: event.raw_sql.clone(),
                params: event.params.clone(),
            })
            .collect();
        entries.sort_by(|a, b| {
            b.metric
                .cmp(&a.metric)
                .then_with(|| (&a.sql, &a.params).cmp(&(&b.sql, &b.params)))
        });
        entries.truncate(n);
        entries
    }

    fn ranked_durations(&self, n: usize) -> Vec<RankedDuration> {
        let mut entries: Vec<RankedDuration> = self
            .events
            .iter()
            .map(|event| RankedDuration {
                seconds: event.duration_seconds,
                sql: event.raw_sql.clone(),
                params: event.params.clone(),
            })
            .collect();
        entries.sort_by(|a, b| {
            b.seconds
                .total_cmp(&a.seconds)
                .then_with(|| (&a.sql, &a.params).cmp(&(&b.sql, &b.params)))
        });
        entries.truncate(n);
        entries
    }
}

fn line_label(key: &LineKey) -> String {
    format!("{}:L{}", key.file, key.line)
}

/// Descending stable sort over a key-ordered map: ties keep the map's
/// natural key order.
fn ranked<K: Ord, V>(
    map: &BTreeMap<K, V>,
    n: usize,
    metric: impl Fn(&V) -> u64,
    label: impl Fn(&K) -> String,
) -> Vec<RankedCount> {
    let mut entries: Vec<RankedCount> = map
        .iter()
        .map(|(key, value)| RankedCount {
            count: metric(value),
            key: label(key),
        })
        .collect();
    entries.sort_by(|a, b| b.count.cmp(&a.count));
    entries.truncate(n);
    entries
}
