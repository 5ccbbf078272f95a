use anyhow::{Context, Result};
use clap::Parser;
use sqlprof::callsite::FrameFilter;
use sqlprof::capture::{ReplaySource, ScriptedIntrospector, SessionCapture};
use sqlprof::cli::{Cli, OutputFormat};
use sqlprof::interceptor::{ProfileSession, QueryInterceptor};
use sqlprof::report;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for per-query diagnostics
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::DEBUG.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let capture = SessionCapture::load(&cli.capture)?;
    let filter = match &cli.app_root {
        Some(root) => FrameFilter::app_root(root),
        None => FrameFilter::from_current_dir().context("cannot resolve application root")?,
    };

    let session = ProfileSession::new();
    let introspector = ScriptedIntrospector::new(capture.queries.iter().map(|q| q.plan.clone()));
    let frames = ReplaySource::default();
    let interceptor = QueryInterceptor::new(&session, introspector, &frames, filter);

    for query in &capture.queries {
        frames.set(query.stack.clone());
        interceptor
            .on_query(&query.sql, &query.params, query.duration_seconds)
            .with_context(|| format!("replaying query: {}", report::sql_prefix(&query.sql)))?;
    }

    let rankings = session.rankings(cli.top);
    match cli.format {
        OutputFormat::Text => report::print(&rankings),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rankings)?),
    }

    Ok(())
}
