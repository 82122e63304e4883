use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use blob_store::BlobStorageConfig;
use data_model::{ArchiveNaming, CutoffDate, EmbargoBuckets};
use embargo::{
    day_batch::{BatchSettings, DEFAULT_MAX_ARCHIVE_BYTES},
    whitelist::{WhitelistSource, DEFAULT_EXCLUDED_HOST_MARKER},
};
use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use serde_inline_default::serde_inline_default;
use uuid::Uuid;

const LOCAL_ENV: &str = "local";

#[serde_inline_default]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde_inline_default(LOCAL_ENV.to_string())]
    pub env: String,
    #[serde_inline_default("0.0.0.0:8080".to_string())]
    pub listen_addr: String,
    #[serde(default)]
    pub blob_storage: BlobStorageConfig,
    #[serde(default = "default_buckets")]
    pub buckets: EmbargoBuckets,
    #[serde(default)]
    pub naming: ArchiveNaming,
    #[serde(default)]
    pub whitelist: WhitelistConfig,
    /// Upper bound on an archive, compressed or not.
    #[serde_inline_default(DEFAULT_MAX_ARCHIVE_BYTES)]
    pub max_archive_bytes: u64,
    #[serde_inline_default(1)]
    pub archive_concurrency: usize,
    /// Fixed `YYYYMMDD` cutoff. Defaults to one year before today.
    #[serde(default)]
    pub cutoff_override: Option<u32>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            env: LOCAL_ENV.to_string(),
            listen_addr: "0.0.0.0:8080".to_string(),
            blob_storage: Default::default(),
            buckets: default_buckets(),
            naming: Default::default(),
            whitelist: Default::default(),
            max_archive_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
            archive_concurrency: 1,
            cutoff_override: None,
            telemetry: Default::default(),
        }
    }
}

fn default_buckets() -> EmbargoBuckets {
    EmbargoBuckets {
        source: "sidestream-raw".to_string(),
        private: "mlab-private-data".to_string(),
        public: "sidestream-public".to_string(),
    }
}

impl ServerConfig {
    /// Load from a YAML file, then apply `EMBARGO_` environment overrides.
    ///
    /// Nested keys use a double underscore: `EMBARGO_BUCKETS__PUBLIC`.
    pub fn from_path(path: &Path) -> Result<ServerConfig> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("error reading config file {}", path.display()))?;
        Self::extract(Self::figment().merge(Yaml::string(&config_str)).merge(Self::env()))
    }

    /// Defaults plus environment overrides, used when no file is given.
    pub fn from_env() -> Result<ServerConfig> {
        Self::extract(Self::figment().merge(Self::env()))
    }

    #[cfg(test)]
    fn from_yaml_str(config_str: &str) -> Result<ServerConfig> {
        Self::extract(Self::figment().merge(Yaml::string(config_str)))
    }

    fn figment() -> Figment {
        Figment::from(Serialized::defaults(ServerConfig::default()))
    }

    fn env() -> Env {
        Env::prefixed("EMBARGO_").split("__")
    }

    fn extract(figment: Figment) -> Result<ServerConfig> {
        let config: ServerConfig = figment.extract().context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(anyhow::anyhow!(
                "invalid listen address: {}",
                self.listen_addr
            ));
        }
        for (role, name) in [
            ("source", &self.buckets.source),
            ("private", &self.buckets.private),
            ("public", &self.buckets.public),
        ] {
            if name.is_empty() {
                return Err(anyhow::anyhow!("{role} bucket name must not be empty"));
            }
        }
        if self.buckets.private == self.buckets.public {
            return Err(anyhow::anyhow!(
                "private and public buckets must differ: {}",
                self.buckets.public
            ));
        }
        if self.archive_concurrency == 0 {
            return Err(anyhow::anyhow!("archive_concurrency must be at least 1"));
        }
        if self.max_archive_bytes == 0 {
            return Err(anyhow::anyhow!("max_archive_bytes must be positive"));
        }
        if let Some(cutoff) = self.cutoff_override {
            if !(10000101..=99991231).contains(&cutoff) {
                return Err(anyhow::anyhow!("invalid cutoff_override: {cutoff}"));
            }
        }
        Ok(())
    }

    pub fn structured_logging(&self) -> bool {
        self.env != LOCAL_ENV
    }

    pub fn instance_id(&self) -> String {
        self.telemetry
            .instance_id
            .clone()
            .unwrap_or_else(|| format!("{}-{}", self.env, Uuid::new_v4()))
    }

    pub fn cutoff(&self) -> CutoffDate {
        self.cutoff_override
            .map(CutoffDate::new)
            .unwrap_or_else(CutoffDate::from_today)
    }

    pub fn batch_settings(&self) -> BatchSettings {
        BatchSettings {
            buckets: self.buckets.clone(),
            naming: self.naming.clone(),
            max_archive_bytes: self.max_archive_bytes,
            archive_concurrency: self.archive_concurrency,
        }
    }

    pub fn whitelist_source(&self) -> WhitelistSource {
        self.whitelist.source(&self.env)
    }
}

#[serde_inline_default]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistConfig {
    /// JSON site list. Ignored when `file` is set.
    #[serde(default)]
    pub url: Option<String>,
    /// Newline separated addresses, for local runs.
    #[serde(default)]
    pub file: Option<PathBuf>,
    #[serde_inline_default(DEFAULT_EXCLUDED_HOST_MARKER.to_string())]
    pub excluded_host_marker: String,
}

impl Default for WhitelistConfig {
    fn default() -> Self {
        Self {
            url: None,
            file: None,
            excluded_host_marker: DEFAULT_EXCLUDED_HOST_MARKER.to_string(),
        }
    }
}

impl WhitelistConfig {
    pub fn source(&self, env: &str) -> WhitelistSource {
        if let Some(file) = &self.file {
            return WhitelistSource::File(file.clone());
        }
        match &self.url {
            Some(url) => WhitelistSource::Url(url.clone()),
            None => WhitelistSource::default_for_env(env),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TracingExporter {
    Otlp,
}

#[serde_inline_default]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    // Enable metrics.
    #[serde(default)]
    pub enable_metrics: bool,
    // OpenTelemetry collector grpc endpoint for both traces and metrics.
    // Defaults to OTEL_EXPORTER_OTLP_ENDPOINT or localhost:4317 if empty.
    #[serde(default)]
    pub endpoint: Option<String>,
    // If not specified, traces are not exported.
    #[serde(default)]
    pub tracing_exporter: Option<TracingExporter>,
    // Metrics export interval. Defaults to 10 seconds.
    #[serde(with = "duration_serde")]
    #[serde_inline_default(Duration::from_secs(10))]
    pub metrics_interval: Duration,
    // Used as the metric attribute "embargo.instance.id".
    #[serde(default)]
    pub instance_id: Option<String>,
}

impl TelemetryConfig {
    pub fn tracing_enabled(&self) -> bool {
        self.tracing_exporter.is_some()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            endpoint: None,
            tracing_exporter: None,
            metrics_interval: Duration::from_secs(10),
            instance_id: None,
        }
    }
}

mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(seconds))
    }
}
