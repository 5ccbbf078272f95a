//! Text rendering of the session report
//!
//! Section order matches the profiler's classic dump: hottest files, lines,
//! and functions by hit count; statement-type totals; individual queries by
//! rows examined, table joins, and duration; files, functions, and lines by
//! rows examined; grand totals. A session with no recorded queries prints a
//! single notice and no ranking sections.

use std::fmt::Write;

use crate::aggregator::{RankedCount, RankedDuration, RankedQuery, Report, ReportData};

/// Displayed SQL is cut to this many characters; the aggregated data keeps
/// the full text.
const SQL_DISPLAY_CHARS: usize = 100;

/// Prefix of a SQL statement safe to display in one report line.
pub fn sql_prefix(sql: &str) -> String {
    sql.chars().take(SQL_DISPLAY_CHARS).collect()
}

/// Render the report as the plain-text dump.
pub fn render(report: &Report) -> String {
    match report {
        Report::NoQueries => "(no sql queries logged)\n".to_string(),
        Report::Summary(data) => render_summary(data),
    }
}

fn render_summary(data: &ReportData) -> String {
    let mut out = String::new();
    let n = data.top;

    let _ = writeln!(out, "Aggregate statistics:");

    count_section(&mut out, &format!("Top {n} files:"), &data.files_by_hits, 5);
    count_section(&mut out, &format!("Top {n} lines:"), &data.lines_by_hits, 5);
    count_section(
        &mut out,
        &format!("Top {n} functions:"),
        &data.functions_by_hits,
        5,
    );
    count_section(&mut out, "Top SQL statement types:", &data.statement_types, 5);

    query_section(
        &mut out,
        &format!("Top {n} queries by number of rows looked at:"),
        &data.queries_by_rows,
    );
    query_section(
        &mut out,
        &format!("Top {n} queries by number of table joins:"),
        &data.queries_by_tables,
    );
    duration_section(
        &mut out,
        &format!("Top {n} queries by SQL duration:"),
        &data.queries_by_duration,
    );

    count_section(
        &mut out,
        &format!("Top {n} files by number of rows looked at:"),
        &data.files_by_rows,
        7,
    );
    count_section(
        &mut out,
        &format!("Top {n} functions by number of rows looked at:"),
        &data.functions_by_rows,
        7,
    );
    count_section(
        &mut out,
        &format!("Top {n} lines by number of rows looked at:"),
        &data.lines_by_rows,
        7,
    );

    let _ = writeln!(out);
    let _ = writeln!(out, "{:>12} queries in total", data.totals.queries);
    let _ = writeln!(out, "{:>12} rows looked at in total", data.totals.rows);
    let _ = writeln!(out, "{:>12} tables joined in total", data.totals.tables);
    let _ = writeln!(
        out,
        "{:>12.4}s spent in the database",
        data.totals.duration_seconds
    );

    out
}

fn count_section(out: &mut String, title: &str, entries: &[RankedCount], width: usize) {
    let _ = writeln!(out, "\n{title}");
    for entry in entries {
        let _ = writeln!(out, "{:>width$} {}", entry.count, entry.key);
    }
}

fn query_section(out: &mut String, title: &str, entries: &[RankedQuery]) {
    let _ = writeln!(out, "\n{title}");
    for entry in entries {
        let _ = writeln!(
            out,
            "{:>7} {} {:?}",
            entry.metric,
            sql_prefix(&entry.sql),
            entry.params
        );
    }
}

fn duration_section(out: &mut String, title: &str, entries: &[RankedDuration]) {
    let _ = writeln!(out, "\n{title}");
    for entry in entries {
        let _ = writeln!(
            out,
            "{:>10.4} {} {:?}",
            entry.seconds,
            sql_prefix(&entry.sql),
            entry.params
        );
    }
}

/// Print the report to stdout.
pub fn print(report: &Report) {
    print!("{}", render(report));
}
