use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use booksync_core::config::{ConfigInputs, SyncConfig, resolve_from_process};
use booksync_core::sync::{SyncOptions, SyncReport, run_sync};
use booksync_core::upsert::{PageAction, UpdateFailurePolicy};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "booksync",
    version,
    about = "Create or update BookStack pages from local Markdown files"
)]
struct Cli {
    #[arg(long, value_name = "URL", help = "BookStack base URL")]
    url: Option<String>,
    #[arg(long, value_name = "ID", help = "API token id")]
    token_id: Option<String>,
    #[arg(long, value_name = "SECRET", help = "API token secret")]
    token_secret: Option<String>,
    #[arg(long, value_name = "ID", help = "Target book id")]
    book_id: Option<String>,
    #[arg(long, value_name = "ID", help = "Target chapter id (wins over --book-id for listing)")]
    chapter_id: Option<String>,
    #[arg(long, value_name = "PATH", help = "Markdown file or glob pattern")]
    path: Option<String>,
    #[arg(long, value_name = "TAGS", help = "Comma-separated page tags")]
    tags: Option<String>,
    #[arg(long, value_name = "MS", help = "HTTP timeout in milliseconds")]
    timeout_ms: Option<String>,
    #[arg(long, value_name = "PATH", help = "TOML config file (default: ./booksync.toml)")]
    config: Option<PathBuf>,
    #[arg(long, help = "Fetch the inventory but do not create or update pages")]
    dry_run: bool,
    #[arg(long, help = "Send --tags with every created or updated page")]
    attach_tags: bool,
    #[arg(long, help = "Fail the run when a page update fails")]
    abort_on_update_failure: bool,
    #[arg(long, help = "Print the sync report as JSON")]
    json: bool,
    #[arg(long, help = "Print resolved configuration and where each value came from")]
    diagnostics: bool,
}

impl Cli {
    fn config_inputs(&self) -> ConfigInputs {
        ConfigInputs {
            url: self.url.clone(),
            token_id: self.token_id.clone(),
            token_secret: self.token_secret.clone(),
            book_id: self.book_id.clone(),
            chapter_id: self.chapter_id.clone(),
            path: self.path.clone(),
            tags: self.tags.clone(),
            timeout_ms: self.timeout_ms.clone(),
        }
    }

    fn sync_options(&self) -> SyncOptions {
        SyncOptions {
            dry_run: self.dry_run,
            attach_tags: self.attach_tags,
            update_failure_policy: if self.abort_on_update_failure {
                UpdateFailurePolicy::Abort
            } else {
                UpdateFailurePolicy::Continue
            },
        }
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            let message = error.to_string();
            eprintln!("error: {message}");
            if running_in_github_actions() {
                println!("::error::{}", escape_annotation(&message));
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let config = resolve_from_process(&cli.config_inputs(), cli.config.as_deref())?;
    if cli.diagnostics {
        print_diagnostics(cli, &config);
    }

    if cli.dry_run {
        info!("Dry run: pages will not be created or updated");
    }
    let report = run_sync(&config, &cli.sync_options())?;
    if running_in_github_actions() {
        for annotation in warning_annotations(&report) {
            if cli.json {
                eprintln!("{annotation}");
            } else {
                println!("{annotation}");
            }
        }
    }
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_diagnostics(cli: &Cli, config: &SyncConfig) {
    let rendered = format!("[diagnostics]\n{}\n", config.diagnostics());
    if cli.json {
        eprintln!("{rendered}");
    } else {
        println!("{rendered}");
    }
}

fn print_report(report: &SyncReport) {
    println!("booksync");
    println!("dry_run: {}", format_flag(report.dry_run));
    println!("files.found: {}", report.files_found);
    println!("files.read: {}", report.files_read);
    println!("pages.parsed: {}", report.pages_parsed);
    println!("inventory.pages: {}", report.upsert.inventory_size);
    println!("pages.created: {}", report.upsert.created);
    println!("pages.updated: {}", report.upsert.updated);
    println!("pages.update_failed: {}", report.upsert.update_failures);
    for page in &report.upsert.pages {
        match &page.detail {
            Some(detail) => println!("page.{}: {} ({detail})", page.action.as_str(), page.name),
            None => println!("page.{}: {}", page.action.as_str(), page.name),
        }
    }
    if report.tags.is_empty() {
        println!("tags: <none>");
    } else {
        println!(
            "tags: {} (attached: {})",
            report.tags.join(","),
            format_flag(report.tags_attached)
        );
    }
    println!("requests: {}", report.request_count);
    if !report.skipped.is_empty() {
        println!("skipped:");
        for skipped in &report.skipped {
            println!("  - {} ({})", skipped.path, skipped.reason);
        }
    }
}

fn running_in_github_actions() -> bool {
    env::var("GITHUB_ACTIONS").is_ok_and(|value| value == "true")
}

/// `::warning::` workflow commands for files that were skipped and page
/// updates that failed without ending the run.
fn warning_annotations(report: &SyncReport) -> Vec<String> {
    let skipped = report.skipped.iter().map(|skipped| {
        format!("Skipped file \"{}\": {}", skipped.path, skipped.reason)
    });
    let failed = report
        .upsert
        .pages
        .iter()
        .filter(|page| page.action == PageAction::UpdateFailed)
        .map(|page| match &page.detail {
            Some(detail) => format!("Failed to update page: {} - {detail}", page.name),
            None => format!("Failed to update page: {}", page.name),
        });
    skipped
        .chain(failed)
        .map(|message| format!("::warning::{}", escape_annotation(&message)))
        .collect()
}

/// Workflow commands treat `%`, CR and LF specially in messages.
fn escape_annotation(message: &str) -> String {
    message
        .replace('%', "%25")
        .replace('\r', "%0D")
        .replace('\n', "%0A")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
