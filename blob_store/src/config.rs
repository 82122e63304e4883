//! Blob storage configuration.

use std::{env, time::Duration};

use serde::{Deserialize, Serialize};

/// Configuration for blob storage.
///
/// `path` is the root every container hangs off:
/// - `gs://` or `s3://` maps a container to a bucket of the same name
/// - `file:///some/dir` maps a container to `/some/dir/<container>`
/// - `memory://` keeps every container in process memory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobStorageConfig {
    #[serde(default = "default_blob_store_path")]
    pub path: String,

    /// Deadline applied to every list/get/put/delete call.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,

    /// Number of keys returned per listing page.
    #[serde(default = "default_list_page_size")]
    pub list_page_size: usize,
}

impl BlobStorageConfig {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            ..Default::default()
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}

impl Default for BlobStorageConfig {
    fn default() -> Self {
        Self {
            path: default_blob_store_path(),
            operation_timeout_secs: default_operation_timeout_secs(),
            list_page_size: default_list_page_size(),
        }
    }
}

/// Default blob store path (local filesystem).
pub fn default_blob_store_path() -> String {
    format!(
        "file://{}",
        env::current_dir()
            .unwrap_or_else(|_| std::path::PathBuf::from("."))
            .join("embargo_storage/buckets")
            .to_str()
            .unwrap_or("./embargo_storage/buckets")
    )
}

fn default_operation_timeout_secs() -> u64 {
    300
}

fn default_list_page_size() -> usize {
    1000
}
