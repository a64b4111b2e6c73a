use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use likers_core::{ExportMode, PageSize};
use log::LevelFilter;

/// Resumable collector for the accounts that liked a post.
#[derive(Parser, Debug)]
#[command(name = "likers")]
#[command(version)]
#[command(about = "Fetch, store and export the accounts that liked a post", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub logging: LogArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch likers until the post is complete, resuming from the checkpoint
    Run(RunArgs),

    /// Show checkpoint progress for one post or every known post
    Status(StatusArgs),

    /// Write a CSV snapshot of the stored likers now
    Export(ExportArgs),
}

#[derive(Args, Debug)]
pub struct LogArgs {
    /// Also write logs to this file
    #[arg(long, env = "LOG_FILE", global = true)]
    pub log_file: Option<PathBuf>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: LevelFilter,
}

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// SQLite database holding checkpoints and likers
    #[arg(long, env = "DB_PATH", default_value = "state.db")]
    pub db_path: PathBuf,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Identifier of the post whose likers are collected
    #[arg(long, env = "POST_ID")]
    pub post_id: String,

    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, env = "OUT_DIR", default_value = ".")]
    pub out_dir: PathBuf,

    /// `final` exports once the post is complete; `continuous` also
    /// snapshots on a timer
    #[arg(long, env = "EXPORT_MODE", default_value = "final")]
    pub export_mode: ExportMode,

    #[arg(long, env = "EXPORT_EVERY_SECS", default_value_t = 300)]
    pub export_every_secs: u64,

    /// Users requested per page (1-100)
    #[arg(long, env = "PAGE_SIZE", default_value = "100", value_parser = parse_page_size)]
    pub page_size: PageSize,

    #[arg(long, env = "API_BEARER_TOKEN", hide_env_values = true)]
    pub bearer_token: String,

    #[arg(long, env = "API_BASE", default_value = likers_engine::DEFAULT_API_BASE)]
    pub api_base: String,

    /// Pause between pages
    #[arg(long, env = "PAGE_DELAY_MS", default_value_t = 2000)]
    pub page_delay_ms: u64,

    /// Stop after this many pages; the next run resumes
    #[arg(long, env = "MAX_PAGES")]
    pub max_pages: Option<u32>,

    /// Skip the JSON manifest next to each CSV
    #[arg(long)]
    pub no_manifest: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Limit the report to one post
    #[arg(long, env = "POST_ID")]
    pub post_id: Option<String>,

    #[command(flatten)]
    pub store: StoreArgs,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ExportArgs {
    #[arg(long, env = "POST_ID")]
    pub post_id: String,

    #[command(flatten)]
    pub store: StoreArgs,

    #[arg(long, env = "OUT_DIR", default_value = ".")]
    pub out_dir: PathBuf,

    #[arg(long)]
    pub no_manifest: bool,
}

fn parse_page_size(value: &str) -> Result<PageSize, String> {
    let size: u32 = value
        .parse()
        .map_err(|_| format!("{value:?} is not a whole number"))?;
    PageSize::new(size).map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Cli, clap::Error> {
        Cli::try_parse_from(std::iter::once("likers").chain(args.iter().copied()))
    }

    #[test]
    fn run_defaults() {
        let cli = parse(&["run", "--post-id", "123", "--bearer-token", "t"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.post_id, "123");
        assert_eq!(args.store.db_path, PathBuf::from("state.db"));
        assert_eq!(args.out_dir, PathBuf::from("."));
        assert_eq!(args.export_mode, ExportMode::Final);
        assert_eq!(args.export_every_secs, 300);
        assert_eq!(args.page_size.get(), 100);
        assert_eq!(args.page_delay_ms, 2000);
        assert_eq!(args.max_pages, None);
        assert_eq!(cli.logging.log_level, LevelFilter::Info);
    }

    #[test]
    fn periodic_is_accepted_as_continuous() {
        let cli = parse(&[
            "run",
            "--post-id",
            "1",
            "--bearer-token",
            "t",
            "--export-mode",
            "periodic",
        ])
        .unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.export_mode, ExportMode::Continuous);
    }

    #[test]
    fn page_size_above_limit_is_rejected() {
        let err = parse(&[
            "run",
            "--post-id",
            "1",
            "--bearer-token",
            "t",
            "--page-size",
            "101",
        ])
        .unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn status_post_is_optional() {
        let cli = parse(&["status", "--json", "--log-level", "warn"]).unwrap();
        let Commands::Status(args) = cli.command else {
            panic!("expected status");
        };
        assert!(args.json);
        assert_eq!(cli.logging.log_level, LevelFilter::Warn);
    }
}
