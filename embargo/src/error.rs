use std::{io, path::PathBuf};

use blob_store::BlobError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhitelistError {
    #[error("failed to fetch site list from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("site list from {url} is not a JSON array of sites: {source}")]
    Parse {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to read whitelist file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("archive exceeds {limit} bytes")]
    TooLarge { limit: u64 },

    #[error("malformed archive: {0}")]
    Archive(#[from] io::Error),

    #[error("split task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum EmbargoError {
    #[error("whitelist has not been loaded")]
    WhitelistNotLoaded,

    #[error("invalid date: {0}")]
    InvalidDate(String),

    #[error("'{0}' is not an archive this pipeline processes")]
    NotAnArchive(String),

    #[error(transparent)]
    Whitelist(#[from] WhitelistError),

    #[error("failed to split {key}: {source}")]
    Split {
        key: String,
        #[source]
        source: SplitError,
    },

    #[error(transparent)]
    Blob(#[from] BlobError),
}

pub type Result<T, E = EmbargoError> = std::result::Result<T, E>;
