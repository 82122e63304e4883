//! `object_store` backed implementation of [`BlobStore`].

use std::{env, future::Future, path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{Stream, StreamExt, TryStreamExt};
use object_store::{
    aws::AmazonS3Builder,
    gcp::GoogleCloudStorageBuilder,
    local::LocalFileSystem,
    memory::InMemory,
    path::Path,
    ObjectStore,
    WriteMultipart,
};
use opentelemetry::KeyValue;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use url::Url;

use crate::{
    BlobError,
    BlobMetrics,
    BlobResult,
    BlobStorageConfig,
    BlobStore,
    BlobStream,
    ListPage,
    PutResult,
    Timer,
};

#[derive(Debug, Clone)]
enum StorageRoot {
    Gcs,
    S3,
    Local(PathBuf),
    Memory,
}

impl StorageRoot {
    fn parse(uri: &str) -> BlobResult<Self> {
        let url = uri.parse::<Url>().map_err(|e| BlobError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        match url.scheme() {
            "gs" => Ok(StorageRoot::Gcs),
            "s3" => Ok(StorageRoot::S3),
            "memory" => Ok(StorageRoot::Memory),
            "file" => {
                let path = url.to_file_path().map_err(|_| BlobError::InvalidUri {
                    uri: uri.to_string(),
                    reason: "file uri must hold an absolute path".to_string(),
                })?;
                Ok(StorageRoot::Local(path))
            }
            scheme => Err(BlobError::InvalidUri {
                uri: uri.to_string(),
                reason: format!("unsupported scheme {scheme}"),
            }),
        }
    }
}

/// Blob store resolving each container to its own `object_store` client.
///
/// Clients are built on first use and cached for the life of the store.
pub struct ObjectStoreBlobStore {
    root: StorageRoot,
    stores: DashMap<String, Arc<dyn ObjectStore>>,
    timeout: Duration,
    page_size: usize,
    metrics: BlobMetrics,
}

impl ObjectStoreBlobStore {
    pub fn new(config: &BlobStorageConfig) -> BlobResult<Self> {
        let root = StorageRoot::parse(&config.path)?;
        info!(path = %config.path, "using blob storage root");
        let meter = opentelemetry::global::meter("blob_store");
        Ok(Self {
            root,
            stores: DashMap::new(),
            timeout: config.operation_timeout(),
            page_size: config.list_page_size.max(1),
            metrics: BlobMetrics::new(&meter),
        })
    }

    fn store_for(&self, container: &str) -> BlobResult<Arc<dyn ObjectStore>> {
        if container.is_empty() || container.contains('/') {
            return Err(BlobError::InvalidUri {
                uri: container.to_string(),
                reason: "container names must be non-empty and contain no '/'".to_string(),
            });
        }
        if let Some(store) = self.stores.get(container) {
            return Ok(store.clone());
        }

        let store: Arc<dyn ObjectStore> = match &self.root {
            StorageRoot::Gcs => Arc::new(
                GoogleCloudStorageBuilder::from_env()
                    .with_bucket_name(container)
                    .build()
                    .map_err(BlobError::Store)?,
            ),
            StorageRoot::S3 => {
                let mut builder = AmazonS3Builder::from_env().with_bucket_name(container);
                // For supporting localstack/minio for testing
                if let Ok(endpoint) = env::var("AWS_ENDPOINT_URL") {
                    if endpoint.starts_with("http://") {
                        builder = builder.with_allow_http(true);
                    }
                    builder = builder.with_endpoint(endpoint);
                }
                Arc::new(builder.build().map_err(BlobError::Store)?)
            }
            StorageRoot::Local(root) => {
                let dir = root.join(container);
                std::fs::create_dir_all(&dir)?;
                Arc::new(LocalFileSystem::new_with_prefix(dir).map_err(BlobError::Store)?)
            }
            StorageRoot::Memory => Arc::new(InMemory::new()),
        };
        debug!(container, "created object store client");

        Ok(self
            .stores
            .entry(container.to_string())
            .or_insert(store)
            .clone())
    }

    async fn with_deadline<T, F>(
        &self,
        op: &'static str,
        container: &str,
        key: &str,
        fut: F,
    ) -> BlobResult<T>
    where
        F: Future<Output = BlobResult<T>>,
    {
        let _timer = Timer::start_with_labels(&self.metrics.operations, &[KeyValue::new("op", op)]);
        let result = match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(BlobError::Timeout {
                op,
                container: container.to_string(),
                key: key.to_string(),
                timeout: self.timeout,
            }),
        };
        if result.is_err() {
            self.metrics.error(op);
        }
        result
    }
}

fn prefix_path(prefix: &str) -> Option<Path> {
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        None
    } else {
        Some(Path::from(prefix))
    }
}

/// Cut one page out of a key listing. An ordered listing is read only up to
/// one key past the page; an unordered one has to be read whole and sorted.
async fn page_of<S, E>(keys: S, page_size: usize, ordered: bool) -> Result<ListPage, E>
where
    S: Stream<Item = Result<String, E>>,
{
    let mut keys: Vec<String> = if ordered {
        keys.take(page_size + 1).try_collect().await?
    } else {
        let mut all: Vec<String> = keys.try_collect().await?;
        all.sort();
        all
    };

    let next_page_token = if keys.len() > page_size {
        keys.truncate(page_size);
        keys.last().cloned()
    } else {
        None
    };
    Ok(ListPage {
        keys,
        next_page_token,
    })
}

#[async_trait]
impl BlobStore for ObjectStoreBlobStore {
    async fn list(
        &self,
        container: &str,
        prefix: &str,
        page_token: Option<&str>,
    ) -> BlobResult<ListPage> {
        let store = self.store_for(container)?;
        let prefix_path = prefix_path(prefix);
        // The local walk is unordered; cloud listings and InMemory are
        // already lexicographic.
        let ordered = !matches!(self.root, StorageRoot::Local(_));
        self.with_deadline("list", container, prefix, async {
            let listing = match page_token {
                Some(token) => store.list_with_offset(prefix_path.as_ref(), &Path::from(token)),
                None => store.list(prefix_path.as_ref()),
            };
            page_of(
                listing.map_ok(|meta| meta.location.to_string()),
                self.page_size,
                ordered,
            )
            .await
            .map_err(|e| BlobError::from_store(e, container, prefix))
        })
        .await
    }

    async fn get(&self, container: &str, key: &str) -> BlobResult<BlobStream> {
        let store = self.store_for(container)?;
        let path = Path::from(key);
        let result = self
            .with_deadline("get", container, key, async {
                store
                    .get(&path)
                    .await
                    .map_err(|e| BlobError::from_store(e, container, key))
            })
            .await?;

        let container = container.to_string();
        let key = key.to_string();
        Ok(result
            .into_stream()
            .map_err(move |e| BlobError::from_store(e, &container, &key))
            .boxed())
    }

    async fn put(&self, container: &str, key: &str, data: BlobStream) -> BlobResult<PutResult> {
        let store = self.store_for(container)?;
        let path = Path::from(key);
        self.with_deadline("put", container, key, async {
            let multipart = store
                .put_multipart(&path)
                .await
                .map_err(|e| BlobError::from_store(e, container, key))?;
            let mut writer = WriteMultipart::new(multipart);
            let mut hasher = Sha256::new();
            let mut size_bytes = 0;
            let mut data = data;

            while let Some(chunk) = data.next().await {
                let chunk: Bytes = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = writer.abort().await;
                        return Err(e);
                    }
                };
                writer
                    .wait_for_capacity(1)
                    .await
                    .map_err(|e| BlobError::from_store(e, container, key))?;
                hasher.update(&chunk);
                size_bytes += chunk.len() as u64;
                writer.write(&chunk);
            }
            writer
                .finish()
                .await
                .map_err(|e| BlobError::from_store(e, container, key))?;

            Ok(PutResult {
                key: key.to_string(),
                size_bytes,
                sha256_hash: format!("{:x}", hasher.finalize()),
            })
        })
        .await
    }

    async fn delete(&self, container: &str, key: &str) -> BlobResult<()> {
        let store = self.store_for(container)?;
        let path = Path::from(key);
        self.with_deadline("delete", container, key, async {
            store
                .delete(&path)
                .await
                .map_err(|e| BlobError::from_store(e, container, key))
        })
        .await
    }

    async fn read_bytes(&self, container: &str, key: &str, limit: u64) -> BlobResult<Bytes> {
        let store = self.store_for(container)?;
        let path = Path::from(key);
        self.with_deadline("get", container, key, async {
            let result = store
                .get(&path)
                .await
                .map_err(|e| BlobError::from_store(e, container, key))?;
            if result.meta.size as u64 > limit {
                return Err(BlobError::TooLarge {
                    container: container.to_string(),
                    key: key.to_string(),
                    limit,
                });
            }
            result
                .bytes()
                .await
                .map_err(|e| BlobError::from_store(e, container, key))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures::stream;
    use tempfile::TempDir;

    use super::*;

    fn memory_store(page_size: usize) -> ObjectStoreBlobStore {
        let config = BlobStorageConfig {
            path: "memory://".to_string(),
            list_page_size: page_size,
            ..Default::default()
        };
        ObjectStoreBlobStore::new(&config).unwrap()
    }

    #[tokio::test]
    async fn test_put_get_streams() {
        let store = memory_store(10);
        let data = vec![Ok(Bytes::from("hello ")), Ok(Bytes::from("world"))];
        let result = store
            .put("bucket", "a/b.txt", stream::iter(data).boxed())
            .await
            .unwrap();
        assert_eq!(result.size_bytes, 11);
        assert!(!result.sha256_hash.is_empty());

        let mut download = store.get("bucket", "a/b.txt").await.unwrap();
        let mut downloaded = Vec::new();
        while let Some(chunk) = download.next().await {
            downloaded.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(downloaded, b"hello world");
    }

    #[tokio::test]
    async fn test_containers_are_isolated() {
        let store = memory_store(10);
        store
            .put_bytes("one", "key", Bytes::from("1"))
            .await
            .unwrap();
        let err = store.read_bytes("two", "key", 10).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_list_pages_follow_tokens() {
        let store = memory_store(2);
        for i in 0..5 {
            store
                .put_bytes("bucket", &format!("day/{i}.tgz"), Bytes::from("x"))
                .await
                .unwrap();
        }
        store
            .put_bytes("bucket", "other/9.tgz", Bytes::from("x"))
            .await
            .unwrap();

        let first = store.list("bucket", "day", None).await.unwrap();
        assert_eq!(first.keys, vec!["day/0.tgz", "day/1.tgz"]);
        assert_eq!(first.next_page_token.as_deref(), Some("day/1.tgz"));

        let second = store
            .list("bucket", "day", first.next_page_token.as_deref())
            .await
            .unwrap();
        assert_eq!(second.keys, vec!["day/2.tgz", "day/3.tgz"]);

        let all = store.list_all("bucket", "day").await.unwrap();
        assert_eq!(
            all,
            vec!["day/0.tgz", "day/1.tgz", "day/2.tgz", "day/3.tgz", "day/4.tgz"]
        );
    }

    #[tokio::test]
    async fn test_ordered_page_reads_one_key_past_the_page() {
        let fetched = AtomicUsize::new(0);
        let keys = stream::iter((0..100).map(|i| Ok::<_, BlobError>(format!("day/{i:03}.tgz"))))
            .inspect(|_| {
                fetched.fetch_add(1, Ordering::SeqCst);
            });

        let page = page_of(keys, 10, true).await.unwrap();
        assert_eq!(page.keys.len(), 10);
        assert_eq!(page.next_page_token.as_deref(), Some("day/009.tgz"));
        assert_eq!(fetched.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_unordered_page_is_sorted() {
        let keys = stream::iter(["b", "c", "a"].map(|k| Ok::<_, BlobError>(k.to_string())));
        let page = page_of(keys, 2, false).await.unwrap();
        assert_eq!(page.keys, vec!["a", "b"]);
        assert_eq!(page.next_page_token.as_deref(), Some("b"));

        let last = page_of(stream::iter(vec![Ok::<_, BlobError>("c".to_string())]), 2, true)
            .await
            .unwrap();
        assert_eq!(last.next_page_token, None);
    }

    #[tokio::test]
    async fn test_local_listing_pages_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let config = BlobStorageConfig {
            path: format!("file://{}", temp_dir.path().display()),
            list_page_size: 2,
            ..Default::default()
        };
        let store = ObjectStoreBlobStore::new(&config).unwrap();
        for name in ["c", "a", "e", "b", "d"] {
            store
                .put_bytes("bucket", &format!("day/{name}.tgz"), Bytes::from("x"))
                .await
                .unwrap();
        }
        assert_eq!(
            store.list_all("bucket", "day").await.unwrap(),
            vec!["day/a.tgz", "day/b.tgz", "day/c.tgz", "day/d.tgz", "day/e.tgz"]
        );
    }

    #[tokio::test]
    async fn test_delete_and_not_found() {
        let store = memory_store(10);
        store
            .put_bytes("bucket", "k", Bytes::from("v"))
            .await
            .unwrap();
        store.delete("bucket", "k").await.unwrap();
        assert!(store.get("bucket", "k").await.err().unwrap().is_not_found());
    }

    #[tokio::test]
    async fn test_read_bytes_limit() {
        let store = memory_store(10);
        store
            .put_bytes("bucket", "big", Bytes::from(vec![0u8; 64]))
            .await
            .unwrap();
        let err = store.read_bytes("bucket", "big", 10).await.unwrap_err();
        assert!(matches!(err, BlobError::TooLarge { limit: 10, .. }));
        assert_eq!(store.read_bytes("bucket", "big", 64).await.unwrap().len(), 64);
    }

    #[tokio::test]
    async fn test_local_filesystem_container() {
        let temp_dir = TempDir::new().unwrap();
        let config = BlobStorageConfig::new(&format!("file://{}", temp_dir.path().display()));
        let store = ObjectStoreBlobStore::new(&config).unwrap();

        store
            .put_bytes("public", "sidestream/2017/05/16/a.tgz", Bytes::from("abc"))
            .await
            .unwrap();
        assert!(temp_dir
            .path()
            .join("public/sidestream/2017/05/16/a.tgz")
            .exists());
        let keys = store.list_all("public", "sidestream/2017").await.unwrap();
        assert_eq!(keys, vec!["sidestream/2017/05/16/a.tgz"]);
    }

    #[test]
    fn test_rejects_unknown_scheme_and_bad_container() {
        let config = BlobStorageConfig::new("ftp://somewhere");
        assert!(ObjectStoreBlobStore::new(&config).is_err());

        let store = memory_store(1);
        assert!(store.store_for("").is_err());
        assert!(store.store_for("a/b").is_err());
    }
}
