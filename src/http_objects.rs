use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use embargo::EmbargoError;
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Debug)]
pub struct EmbargoApiError {
    status_code: StatusCode,
    message: String,
}

impl EmbargoApiError {
    pub fn new(status_code: StatusCode, message: &str) -> Self {
        Self {
            status_code,
            message: message.to_string(),
        }
    }

    pub fn bad_request(message: &str) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn internal_error(e: anyhow::Error) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, &format!("{e:#}"))
    }

    pub fn internal_error_str(e: &str) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, e)
    }
}

impl IntoResponse for EmbargoApiError {
    fn into_response(self) -> Response {
        error!("API Error: {} - {}", self.status_code, self.message);
        (self.status_code, self.message).into_response()
    }
}

impl From<EmbargoError> for EmbargoApiError {
    fn from(e: EmbargoError) -> Self {
        match e {
            EmbargoError::InvalidDate(_) | EmbargoError::NotAnArchive(_) => {
                Self::bad_request(&e.to_string())
            }
            e => Self::internal_error(e.into()),
        }
    }
}

/// Query of `/submit`. Exactly one of `date` and `file` is expected.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SubmitParams {
    /// `YYYYMMDD`
    pub date: Option<String>,
    /// `gs://<source bucket>/<key>`
    pub file: Option<String>,
    #[serde(alias = "destinationBucket")]
    pub public_bucket: Option<String>,
    pub private_bucket: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct UnembargoParams {
    /// `YYYYMMDD`, defaults to the most recent day out of embargo.
    pub date: Option<String>,
}
