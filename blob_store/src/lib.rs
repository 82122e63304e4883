//! Container/key blob storage used by the embargo pipeline.
//!
//! The pipeline talks to three containers (source, private, public) through
//! the [`BlobStore`] trait. [`ObjectStoreBlobStore`] implements it on top of
//! the `object_store` crate and resolves container names against a single
//! root URI (see [`BlobStorageConfig`]).
//!
//! Errors are never retried here; retry policy belongs to whoever schedules
//! the work.

mod config;
mod error;
mod metrics;
mod storage;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{stream::BoxStream, StreamExt};

pub use config::{default_blob_store_path, BlobStorageConfig};
pub use error::{BlobError, BlobResult};
pub use metrics::{BlobMetrics, Timer};
pub use storage::ObjectStoreBlobStore;

/// Stream of blob content chunks.
pub type BlobStream = BoxStream<'static, BlobResult<Bytes>>;

/// One page of a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Keys in lexicographic order.
    pub keys: Vec<String>,

    /// Token for the next page, `None` when this was the last one.
    pub next_page_token: Option<String>,
}

/// Result of a PUT operation.
#[derive(Debug, Clone)]
pub struct PutResult {
    pub key: String,
    pub size_bytes: u64,
    pub sha256_hash: String,
}

/// Core blob store operations, addressed by container and key.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List keys under `prefix`, one page at a time.
    ///
    /// `page_token` is the `next_page_token` of the previous page.
    async fn list(
        &self,
        container: &str,
        prefix: &str,
        page_token: Option<&str>,
    ) -> BlobResult<ListPage>;

    /// Stream the content of a blob.
    ///
    /// Returns `BlobError::NotFound` if the blob doesn't exist.
    async fn get(&self, container: &str, key: &str) -> BlobResult<BlobStream>;

    /// Upload a blob from a stream of chunks, replacing any existing blob.
    async fn put(&self, container: &str, key: &str, data: BlobStream) -> BlobResult<PutResult>;

    async fn delete(&self, container: &str, key: &str) -> BlobResult<()>;

    /// Follow every page of a listing.
    async fn list_all(&self, container: &str, prefix: &str) -> BlobResult<Vec<String>> {
        let mut keys = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self.list(container, prefix, page_token.as_deref()).await?;
            keys.extend(page.keys);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(keys)
    }

    /// Read a whole blob into memory, refusing blobs larger than `limit`.
    async fn read_bytes(&self, container: &str, key: &str, limit: u64) -> BlobResult<Bytes> {
        let mut stream = self.get(container, key).await?;
        let mut bytes = BytesMut::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if (bytes.len() + chunk.len()) as u64 > limit {
                return Err(BlobError::TooLarge {
                    container: container.to_string(),
                    key: key.to_string(),
                    limit,
                });
            }
            bytes.extend_from_slice(&chunk);
        }
        Ok(bytes.freeze())
    }

    async fn put_bytes(&self, container: &str, key: &str, data: Bytes) -> BlobResult<PutResult> {
        let stream = futures::stream::once(async move { Ok::<_, BlobError>(data) }).boxed();
        self.put(container, key, stream).await
    }
}
