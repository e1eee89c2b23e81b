use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::client::ApiError;

/// Failures a sync run can hit. Only some of them are fatal; see
/// `upsert::UpdateFailurePolicy` and `parser::read_page_files`.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("no files found matching path \"{0}\"")]
    NoFilesFound(String),

    #[error("could not read file \"{}\": {source}", path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to retrieve existing pages from {container}: {source}")]
    RemoteFetch {
        container: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to create page \"{name}\": {source}")]
    PageCreate {
        name: String,
        #[source]
        source: ApiError,
    },

    #[error("failed to update page \"{name}\" (id {id}): {source}")]
    PageUpdate {
        name: String,
        id: u64,
        #[source]
        source: ApiError,
    },
}

impl SyncError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn missing_input(name: &str) -> Self {
        Self::Configuration(format!("missing input: {name}"))
    }

    /// True for errors that are logged and skipped instead of ending the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::FileRead { .. } | Self::PageUpdate { .. })
    }
}

pub type Result<T, E = SyncError> = std::result::Result<T, E>;
