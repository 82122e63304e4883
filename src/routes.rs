use std::sync::Arc;

use axum::{
    extract::{Query, State},
    routing::get,
    Router,
};
use chrono::Utc;
use data_model::{DateParseError, EmbargoBuckets, RecordDate};
use embargo::{DayBatchRunner, SiteWhitelist, UnembargoMigrator};
use tower_http::trace::TraceLayer;
use tracing::info;
use url::Url;

use crate::{
    config::ServerConfig,
    http_objects::{EmbargoApiError, SubmitParams, UnembargoParams},
};

#[derive(Clone)]
pub struct RouteState {
    pub config: Arc<ServerConfig>,
    pub runner: DayBatchRunner,
    pub migrator: Arc<UnembargoMigrator>,
    pub whitelist: Arc<SiteWhitelist>,
    pub http_client: reqwest::Client,
}

pub fn create_routes(route_state: RouteState) -> Router {
    Router::new()
        .route("/submit", get(submit))
        .route("/_ah/health", get(health))
        .route("/health", get(health))
        .route("/cron/reload_whitelist", get(reload_whitelist))
        .route("/cron/unembargo", get(unembargo))
        .layer(TraceLayer::new_for_http())
        .with_state(route_state)
}

async fn health() -> &'static str {
    "ok"
}

/// Embargo one day of archives, or a single archive.
async fn submit(
    State(state): State<RouteState>,
    Query(params): Query<SubmitParams>,
) -> Result<String, EmbargoApiError> {
    let mut buckets = state.runner.buckets().clone();
    if let Some(public) = params.public_bucket.filter(|b| !b.is_empty()) {
        buckets.public = public;
    }
    if let Some(private) = params.private_bucket.filter(|b| !b.is_empty()) {
        buckets.private = private;
    }
    let cutoff = state.config.cutoff();

    match (params.file.as_deref(), params.date.as_deref()) {
        (Some(file), _) if !file.is_empty() => {
            let (source, key) = parse_object_url(file)?;
            buckets.source = source;
            check_buckets(&buckets)?;
            let report = state.runner.with_buckets(buckets).run_file(&key, cutoff).await?;
            info!(file, "embargoed single archive");
            Ok(format!("Done with embargo single file {file}\n{report}\n"))
        }
        (_, Some(date)) if !date.is_empty() => {
            let date: RecordDate = date
                .parse()
                .map_err(|e: DateParseError| EmbargoApiError::bad_request(&e.to_string()))?;
            check_buckets(&buckets)?;
            let report = state.runner.with_buckets(buckets).run_day(date, cutoff).await?;
            if !report.is_success() {
                return Err(EmbargoApiError::internal_error_str(&report.to_string()));
            }
            Ok(format!("Done with embargo for date {date}\n{report}\n"))
        }
        _ => Err(EmbargoApiError::bad_request("missing date or file")),
    }
}

async fn reload_whitelist(State(state): State<RouteState>) -> Result<String, EmbargoApiError> {
    let source = state.config.whitelist_source();
    let loaded = state
        .whitelist
        .load(&state.http_client, &source)
        .await
        .map_err(|e| EmbargoApiError::internal_error(e.into()))?;
    Ok(format!("whitelist reloaded with {loaded} addresses\n"))
}

async fn unembargo(
    State(state): State<RouteState>,
    Query(params): Query<UnembargoParams>,
) -> Result<String, EmbargoApiError> {
    let date = match params.date.as_deref().filter(|d| !d.is_empty()) {
        Some(date) => date
            .parse::<u32>()
            .map_err(|_| EmbargoApiError::bad_request(&format!("invalid date: {date}")))?,
        None => state
            .config
            .cutoff()
            .last_eligible_day()
            .ok_or_else(|| EmbargoApiError::internal_error_str("no day is out of embargo"))?
            .as_u32(),
    };
    let report = state
        .migrator
        .unembargo_day(date, Utc::now().date_naive())
        .await?;
    Ok(format!(
        "unembargo of {} done: {} objects copied, {} replaced\n",
        report.prefix, report.copied, report.replaced
    ))
}

/// Split `gs://bucket/key` into its bucket and key.
fn parse_object_url(file: &str) -> Result<(String, String), EmbargoApiError> {
    let invalid = || EmbargoApiError::bad_request(&format!("invalid file url: {file}"));
    let url = Url::parse(file).map_err(|_| invalid())?;
    let bucket = url.host_str().filter(|b| !b.is_empty()).ok_or_else(invalid)?;
    let key = url.path().trim_start_matches('/');
    if key.is_empty() {
        return Err(invalid());
    }
    Ok((bucket.to_string(), key.to_string()))
}

fn check_buckets(buckets: &EmbargoBuckets) -> Result<(), EmbargoApiError> {
    if buckets.private == buckets.public || buckets.source == buckets.public {
        return Err(EmbargoApiError::bad_request(
            "public bucket must differ from the source and private buckets",
        ));
    }
    Ok(())
}
