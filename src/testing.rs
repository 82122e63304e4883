use std::{io::Write, sync::Arc};

use anyhow::Result;
use blob_store::{BlobStorageConfig, BlobStore, ObjectStoreBlobStore};
use flate2::{write::GzEncoder, Compression};
use tar::{Builder, EntryType, Header};
use tempfile::TempDir;
use tracing::subscriber;
use tracing_subscriber::{layer::SubscriberExt, Layer};

use crate::{
    config::{ServerConfig, WhitelistConfig},
    routes::create_routes,
    service::Service,
};

pub struct TestService {
    pub service: Service,
    pub blob_store: Arc<dyn BlobStore>,
    pub base_url: String,
    pub client: reqwest::Client,
    _temp_dir: TempDir,
}

impl TestService {
    /// Service over a filesystem blob store in a temp dir, with a whitelist
    /// file holding `whitelist`, listening on an ephemeral port.
    pub async fn new(whitelist: &str) -> Result<Self> {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        let _ = subscriber::set_global_default(
            tracing_subscriber::registry()
                .with(tracing_subscriber::fmt::layer().with_filter(env_filter)),
        );

        let temp_dir = tempfile::tempdir()?;
        let whitelist_path = temp_dir.path().join("whitelist.txt");
        std::fs::write(&whitelist_path, whitelist)?;

        let cfg = ServerConfig {
            blob_storage: BlobStorageConfig::new(&format!(
                "file://{}",
                temp_dir.path().join("buckets").display()
            )),
            whitelist: WhitelistConfig {
                file: Some(whitelist_path),
                ..Default::default()
            },
            cutoff_override: Some(20160516),
            ..Default::default()
        };
        let blob_store: Arc<dyn BlobStore> =
            Arc::new(ObjectStoreBlobStore::new(&cfg.blob_storage)?);
        let service = Service::with_store(cfg, blob_store.clone())?;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let base_url = format!("http://{}", listener.local_addr()?);
        let routes = create_routes(service.route_state());
        tokio::spawn(async move {
            let _ = axum::serve(listener, routes).await;
        });

        Ok(Self {
            service,
            blob_store,
            base_url,
            client: reqwest::Client::new(),
            _temp_dir: temp_dir,
        })
    }

    pub async fn get(&self, path_and_query: &str) -> Result<(u16, String)> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path_and_query))
            .send()
            .await?;
        let status = resp.status().as_u16();
        Ok((status, resp.text().await?))
    }
}

/// tar+gzip archive of regular files.
pub fn archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = Builder::new(Vec::new());
    for (name, content) in members {
        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_494_892_800);
        builder.append_data(&mut header, name, *content).unwrap();
    }
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&builder.into_inner().unwrap()).unwrap();
    encoder.finish().unwrap()
}
