//! `route` command implementation.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use contracts::ChangeRecord;
use routing::{CancellationToken, RoutingEngine, RoutingError};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use crate::cli::RouteArgs;
use crate::error::CliError;
use crate::report::RouteReport;

/// One input line: a change record plus an optional table name
#[derive(Deserialize)]
struct ChangeLine {
    #[serde(default)]
    table: Option<String>,
    #[serde(flatten)]
    change: ChangeRecord,
}

/// Execute the `route` command
pub async fn run_route(args: &RouteArgs) -> Result<()> {
    info!(config = %args.config.display(), input = %args.input.display(), "Loading configuration");

    if !args.config.exists() {
        return Err(CliError::config_not_found(&args.config).into());
    }
    if !args.input.exists() {
        return Err(CliError::input_not_found(&args.input).into());
    }

    let config = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    info!(
        destinations = config.destinations.len(),
        rules = config.rules.len(),
        "Configuration loaded"
    );

    if args.metrics_port != 0 {
        observability::init_metrics_only(args.metrics_port)?;
    }

    let engine = routing::create_engine(&config)
        .await
        .map_err(CliError::from)?;

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_shutdown_signal(cancel.clone()));

    info!("Routing changes...");
    let outcome = route_file(&engine, &args.input, args.table.as_deref(), &cancel).await;

    engine.dispose().await;
    // Stops the signal listener
    cancel.cancel();

    let mut report = outcome?;
    report.overall = engine.get_overall_stats();
    report.destinations = engine.all_destination_stats();

    info!(
        changes = report.changes_read,
        routed = report.changes_routed,
        failed = report.changes_failed,
        cancelled = report.cancelled,
        duration_secs = report.duration.as_secs_f64(),
        "Routing finished"
    );

    if args.json {
        let json = serde_json::to_string_pretty(&report.to_json())
            .context("Failed to serialize route report")?;
        println!("{}", json);
    } else {
        report.print_summary();
    }

    Ok(())
}

/// Route every change line in `path`, in file order
async fn route_file(
    engine: &RoutingEngine,
    path: &Path,
    default_table: Option<&str>,
    cancel: &CancellationToken,
) -> Result<RouteReport, CliError> {
    let started = Instant::now();
    let mut report = RouteReport::default();
    let mut lines = BufReader::new(File::open(path).await?).lines();
    let mut line_no = 0;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if cancel.is_cancelled() {
            report.cancelled = true;
            break;
        }
        let Some((change, table)) = parse_line(line_no, &line, default_table)? else {
            continue;
        };
        report.changes_read += 1;

        match engine.route_change_with_cancel(&change, &table, cancel).await {
            Ok(result) => {
                debug!(
                    change_id = %result.change_id,
                    routed = ?result.routed_destinations,
                    errors = result.errors.len(),
                    "Change routed"
                );
                report.record(&result);
            }
            Err(RoutingError::Cancelled) => {
                report.cancelled = true;
                break;
            }
            Err(e) => return Err(e.into()),
        }
    }

    report.duration = started.elapsed();
    Ok(report)
}

/// Parse one input line, `None` for blank lines
fn parse_line(
    line_no: usize,
    line: &str,
    default_table: Option<&str>,
) -> Result<Option<(ChangeRecord, String)>, CliError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }

    let parsed: ChangeLine = serde_json::from_str(trimmed)
        .map_err(|e| CliError::invalid_change(line_no, e.to_string()))?;

    let table = parsed
        .table
        .filter(|t| !t.is_empty())
        .or_else(|| default_table.map(str::to_string))
        .ok_or(CliError::MissingTable { line: line_no })?;

    Ok(Some((parsed.change, table)))
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn cancel_on_shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = token.cancelled() => return,
    }

    warn!("Received shutdown signal, finishing the current change...");
    token.cancel();
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::ChangeOperation;

    #[test]
    fn test_parse_line_with_table() {
        let line = r#"{"table":"orders","id":"c1","operation":"insert","position":"0/1","metadata":{"amount":10}}"#;
        let (change, table) = parse_line(1, line, None).unwrap().unwrap();

        assert_eq!(table, "orders");
        assert_eq!(change.id, "c1");
        assert_eq!(change.operation, ChangeOperation::Insert);
        assert!(change.metadata.contains_key("amount"));
    }

    #[test]
    fn test_parse_line_falls_back_to_default_table() {
        let line = r#"{"id":"c1","operation":"delete"}"#;
        let (_, table) = parse_line(3, line, Some("users")).unwrap().unwrap();
        assert_eq!(table, "users");

        let err = parse_line(3, line, None).unwrap_err();
        assert!(matches!(err, CliError::MissingTable { line: 3 }));
    }

    #[test]
    fn test_parse_line_blank_and_invalid() {
        assert!(parse_line(1, "   ", None).unwrap().is_none());

        let err = parse_line(7, "{not json", Some("t")).unwrap_err();
        assert!(matches!(err, CliError::InvalidChange { line: 7, .. }));
    }

    #[tokio::test]
    async fn test_route_file_counts_changes() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("changes.jsonl");
        std::fs::write(
            &input,
            concat!(
                r#"{"table":"orders","id":"c1","operation":"insert"}"#,
                "\n\n",
                r#"{"id":"c2","operation":"update"}"#,
                "\n",
            ),
        )
        .unwrap();

        let engine = RoutingEngine::default();
        let cancel = CancellationToken::new();
        let report = route_file(&engine, &input, Some("users"), &cancel)
            .await
            .unwrap();

        assert_eq!(report.changes_read, 2);
        assert_eq!(report.changes_unrouted, 2);
        assert!(!report.cancelled);
        engine.dispose().await;
    }

    #[tokio::test]
    async fn test_route_file_stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("changes.jsonl");
        std::fs::write(&input, r#"{"table":"orders","id":"c1","operation":"insert"}"#).unwrap();

        let engine = RoutingEngine::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = route_file(&engine, &input, None, &cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.changes_read, 0);
        engine.dispose().await;
    }
}
