use serde::Serialize;
use tracing::info;

use crate::client::{BookStackApi, BookStackClient, BookStackClientConfig};
use crate::config::SyncConfig;
use crate::discover::resolve;
use crate::error::{Result, SyncError};
use crate::parser::parse_all;
use crate::upsert::{UpdateFailurePolicy, UpsertOptions, UpsertReport, upsert_pages};

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    pub dry_run: bool,
    pub attach_tags: bool,
    pub update_failure_policy: UpdateFailurePolicy,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub dry_run: bool,
    pub files_found: usize,
    pub files_read: usize,
    pub pages_parsed: usize,
    pub skipped: Vec<SkippedFile>,
    pub tags: Vec<String>,
    pub tags_attached: bool,
    pub upsert: UpsertReport,
    pub request_count: usize,
}

pub fn run_sync(config: &SyncConfig, options: &SyncOptions) -> Result<SyncReport> {
    let mut client = BookStackClient::new(BookStackClientConfig::from_config(config))
        .map_err(|error| SyncError::configuration(error.to_string()))?;
    run_sync_with_api(config, options, &mut client)
}

/// Discover, parse and upsert against `api`. Discovery failures surface
/// before `api` sees any request.
pub fn run_sync_with_api<A: BookStackApi>(
    config: &SyncConfig,
    options: &SyncOptions,
    api: &mut A,
) -> Result<SyncReport> {
    let files = resolve(&config.path)?;
    let parsed = parse_all(&files);

    let mut skipped = Vec::new();
    for failure in &parsed.read_failures {
        if let SyncError::FileRead { path, source } = failure {
            skipped.push(SkippedFile {
                path: path.display().to_string(),
                reason: source.to_string(),
            });
        }
    }
    for path in &parsed.without_heading {
        skipped.push(SkippedFile {
            path: path.display().to_string(),
            reason: "no level-1 heading".to_string(),
        });
    }

    let tags = if options.attach_tags {
        config.tags.clone()
    } else {
        if !config.tags.is_empty() {
            info!(
                "Tags parsed but not attached (use --attach-tags): {}",
                config.tags.join(", ")
            );
        }
        Vec::new()
    };

    let upsert = upsert_pages(
        api,
        &config.target,
        &parsed.pages,
        &UpsertOptions {
            update_failure_policy: options.update_failure_policy,
            dry_run: options.dry_run,
            tags,
        },
    )?;

    Ok(SyncReport {
        success: upsert.update_failures == 0,
        dry_run: options.dry_run,
        files_found: files.len(),
        files_read: parsed.files_read,
        pages_parsed: parsed.pages.len(),
        skipped,
        tags: config.tags.clone(),
        tags_attached: options.attach_tags,
        upsert,
        request_count: api.request_count(),
    })
}
