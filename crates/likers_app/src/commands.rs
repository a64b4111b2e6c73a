use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use engine_logging::{engine_info, engine_warn};
use likers_core::{Checkpoint, Cursor, PostId};
use likers_engine::{
    ensure_output_dir, export_likers, inspect, inspect_all, ApiSettings, BearerToken,
    ExportSettings, NoopProgressSink, PagerSettings, ReqwestLikesApi, Session, SessionConfig,
    SessionDeps, SqliteStore, StatusReport, StopReason, Store, SystemClock,
};
use tokio_util::sync::CancellationToken;

use crate::cli::{ExportArgs, RunArgs, StatusArgs};
use crate::exit::UsageError;

pub async fn run(args: RunArgs) -> Result<()> {
    let post_id = parse_post_id(&args.post_id)?;
    if args.bearer_token.trim().is_empty() {
        return Err(UsageError("bearer token must not be empty".into()).into());
    }
    ensure_output_dir(&args.out_dir)
        .with_context(|| format!("preparing output directory {:?}", args.out_dir))?;

    let store: Arc<dyn Store> = Arc::new(open_store(&args.store.db_path)?);
    let api = ReqwestLikesApi::new(
        ApiSettings {
            base_url: args.api_base.clone(),
            ..ApiSettings::default()
        },
        Arc::new(BearerToken::new(args.bearer_token.trim())),
    )
    .map_err(|err| UsageError(err.to_string()))?;

    let config = SessionConfig {
        post_id: post_id.clone(),
        pager: PagerSettings {
            page_size: args.page_size,
            page_delay: Duration::from_millis(args.page_delay_ms),
            max_pages: args.max_pages,
            ..PagerSettings::default()
        },
        export: ExportSettings {
            output_dir: args.out_dir.clone(),
            mode: args.export_mode,
            interval: Duration::from_secs(args.export_every_secs.max(1)),
            write_manifest: !args.no_manifest,
        },
    };
    let deps = SessionDeps {
        api: Arc::new(api),
        store,
        clock: Arc::new(SystemClock),
        sink: Arc::new(NoopProgressSink),
        uploader: None,
    };

    engine_info!(
        "Collecting likers of post {} (page size {}, export {})",
        post_id,
        args.page_size.get(),
        args.export_mode
    );
    let cancel = CancellationToken::new();
    cancel_on_shutdown(cancel.clone());

    let report = Session::new(config, deps).run(&cancel).await;
    if let Some(export) = &report.final_export {
        println!("exported {} likers to {}", export.rows, export.csv_path.display());
    }
    let pager = report
        .pager
        .with_context(|| format!("collecting likers of post {post_id}"))?;

    let checkpoint = &pager.checkpoint;
    match pager.stop {
        StopReason::Completed | StopReason::AlreadyComplete => println!(
            "post {}: complete, {} likers",
            post_id, checkpoint.total_users_found
        ),
        StopReason::Cancelled | StopReason::PageLimit => println!(
            "post {}: paused after {} pages, {} likers so far; rerun to resume",
            post_id, pager.pages_fetched, checkpoint.total_users_found
        ),
    }
    Ok(())
}

pub fn status(args: StatusArgs) -> Result<()> {
    let store = open_existing_store(&args.store.db_path)?;
    let reports = match &args.post_id {
        Some(post_id) => vec![inspect(&store, &parse_post_id(post_id)?)?],
        None => inspect_all(&store)?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
        return Ok(());
    }
    if reports.is_empty() {
        println!("no posts recorded in {}", args.store.db_path.display());
    }
    for report in &reports {
        println!("{}", describe(report));
    }
    Ok(())
}

pub fn export(args: ExportArgs) -> Result<()> {
    let post_id = parse_post_id(&args.post_id)?;
    let store = open_existing_store(&args.store.db_path)?;
    let summary = export_likers(&store, &post_id, &args.out_dir, Utc::now(), !args.no_manifest)
        .with_context(|| format!("exporting likers of post {post_id}"))?;

    match summary {
        Some(summary) => println!(
            "exported {} likers to {} (sha256 {})",
            summary.rows,
            summary.csv_path.display(),
            summary.sha256
        ),
        None => println!("post {post_id}: no likers stored yet; nothing exported"),
    }
    Ok(())
}

fn describe(report: &StatusReport) -> String {
    let Some(checkpoint) = &report.checkpoint else {
        return format!("post {}: not started", report.post_id);
    };
    let Checkpoint {
        done,
        total_users_found,
        next_cursor,
        last_updated_at,
        ..
    } = checkpoint;
    let state = if *done { "complete" } else { "in progress" };
    let updated = last_updated_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    let exported = report
        .last_export_at
        .map(|at| at.to_rfc3339())
        .unwrap_or_else(|| "never".to_string());
    format!(
        "post {}: {}, {} likers recorded ({} stored), cursor {}, updated {}, last export {}",
        report.post_id,
        state,
        total_users_found,
        report.liker_count,
        next_cursor.as_ref().map(Cursor::as_str).unwrap_or("-"),
        updated,
        exported
    )
}

fn parse_post_id(raw: &str) -> Result<PostId> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(UsageError("post id must not be empty".into()).into());
    }
    Ok(PostId::new(trimmed))
}

fn open_store(path: &Path) -> Result<SqliteStore> {
    SqliteStore::open(path).with_context(|| format!("opening state database {}", path.display()))
}

/// Read-only commands never create a database as a side effect.
fn open_existing_store(path: &Path) -> Result<SqliteStore> {
    if !path.is_file() {
        return Err(UsageError(format!("no state database at {}", path.display())).into());
    }
    open_store(path)
}

fn cancel_on_shutdown(cancel: CancellationToken) {
    tokio::spawn(async move {
        shutdown_signal().await;
        engine_warn!("Shutdown requested; stopping at the next safe point");
        cancel.cancel();
    });
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut terminate) => {
            tokio::select! {
                _ = ctrl_c() => {}
                _ = terminate.recv() => {}
            }
        }
        Err(err) => {
            engine_warn!("SIGTERM handler unavailable: {}", err);
            ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    ctrl_c().await;
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        engine_warn!("Ctrl-C handler unavailable: {}", err);
        std::future::pending::<()>().await;
    }
}
