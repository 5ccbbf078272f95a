//! Sqlprof - SQL query profiler with call-site attribution
//!
//! This library instruments a host application's query execution: each
//! executed query is reported to an interception hook, its execution plan is
//! obtained through a secondary EXPLAIN query, the call stack is mapped onto
//! application source locations, and everything is aggregated into ranked
//! hot-spot reports (hottest files, lines, functions, statement types, and
//! individual queries by rows examined, table joins, and duration).
//!
//! It is a developer-facing tool for a test or exercise pass, not a
//! production monitor. The host supplies the query events and the EXPLAIN
//! capability; the companion binary replays recorded sessions instead.

pub mod aggregator;
pub mod callsite;
pub mod capture;
pub mod cli;
pub mod error;
pub mod event;
pub mod gate;
pub mod interceptor;
pub mod plan;
pub mod report;
