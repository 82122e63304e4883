use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use axum_server::Handle;
use blob_store::{BlobStore, ObjectStoreBlobStore};
use embargo::{DayBatchRunner, SiteWhitelist, UnembargoMigrator};
use tokio::signal;
use tracing::{error, info, warn};

use crate::{
    config::ServerConfig,
    routes::{create_routes, RouteState},
};

const WHITELIST_FETCH_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct Service {
    pub config: Arc<ServerConfig>,
    pub whitelist: Arc<SiteWhitelist>,
    pub runner: DayBatchRunner,
    pub migrator: Arc<UnembargoMigrator>,
    pub http_client: reqwest::Client,
}

impl Service {
    pub fn new(config: ServerConfig) -> Result<Self> {
        let blob_store: Arc<dyn BlobStore> = Arc::new(
            ObjectStoreBlobStore::new(&config.blob_storage)
                .context("error initializing blob storage")?,
        );
        Self::with_store(config, blob_store)
    }

    pub fn with_store(config: ServerConfig, blob_store: Arc<dyn BlobStore>) -> Result<Self> {
        let whitelist = Arc::new(SiteWhitelist::new(&config.whitelist.excluded_host_marker));
        let runner = DayBatchRunner::new(
            blob_store.clone(),
            whitelist.clone(),
            config.batch_settings(),
        );
        let migrator = Arc::new(UnembargoMigrator::new(
            blob_store.clone(),
            &config.buckets.private,
            &config.buckets.public,
            config.naming.clone(),
        ));
        let http_client = reqwest::Client::builder()
            .timeout(WHITELIST_FETCH_TIMEOUT)
            .build()
            .context("error building http client")?;

        Ok(Self {
            config: Arc::new(config),
            whitelist,
            runner,
            migrator,
            http_client,
        })
    }

    pub fn route_state(&self) -> RouteState {
        RouteState {
            config: self.config.clone(),
            runner: self.runner.clone(),
            migrator: self.migrator.clone(),
            whitelist: self.whitelist.clone(),
            http_client: self.http_client.clone(),
        }
    }

    /// Initial whitelist load. Runs refuse to start until one succeeds, so a
    /// failure here only delays work until the next reload.
    pub async fn load_whitelist(&self) {
        let source = self.config.whitelist_source();
        if let Err(err) = self.whitelist.load(&self.http_client, &source).await {
            warn!(error = %err, ?source, "initial whitelist load failed, waiting for a reload");
        }
    }

    pub async fn start(&self) -> Result<()> {
        self.load_whitelist().await;

        let handle = Handle::new();
        let handle_sh = handle.clone();
        tokio::spawn(async move {
            shutdown_signal(handle_sh).await;
            info!("graceful shutdown signal received, shutting down server gracefully");
        });

        let addr: SocketAddr = self.config.listen_addr.parse()?;
        info!("server api listening on {}", self.config.listen_addr);
        let routes = create_routes(self.route_state());
        axum_server::bind(addr)
            .handle(handle)
            .serve(routes.into_make_service())
            .await?;

        Ok(())
    }
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {:?}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                error!("failed to install signal handler: {:?}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
        },
        _ = terminate => {
        },
    }
    handle.shutdown();
    info!("signal received, shutting down server gracefully");
}
