pub mod types;

use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};
use types::{ErrorEnvelope, Operation, PredictRequest};

use crate::error::{preview, ServiceError};
use crate::settings::{HttpPolicy, Settings};

const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct VeoClient {
    base_url: String,
    api_key: String,
    model: String,
    http: Client,
}

/// Raw artifact bytes as served by the download endpoint.
#[derive(Debug)]
pub struct Artifact {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl VeoClient {
    pub fn new(base_url: String, api_key: String, model: String, limits: &HttpPolicy) -> Self {
        let http = Client::builder()
            .connect_timeout(limits.connect_timeout())
            .timeout(limits.request_timeout())
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "HTTP client with timeouts unavailable, using defaults");
                Client::new()
            });

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            http,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.base_url.clone(),
            settings.api_key.clone(),
            settings.model.clone(),
            &settings.policy.http,
        )
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// POST /models/{model}:predictLongRunning, returns the operation handle.
    pub async fn start_generation(&self, req: &PredictRequest) -> Result<Operation, ServiceError> {
        let url = format!("{}/models/{}:predictLongRunning", self.base_url, self.model);
        let resp = self
            .http
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(req)
            .send()
            .await?;

        let op: Operation = read_json(resp).await?;
        if op.name.is_empty() {
            return Err(ServiceError::Decode(
                "no operation name in start response".to_string(),
            ));
        }
        Ok(op)
    }

    /// GET /{operation_name}, latest snapshot of the operation.
    pub async fn get_operation(&self, name: &str) -> Result<Operation, ServiceError> {
        let url = format!("{}/{}", self.base_url, name.trim_start_matches('/'));
        let resp = self
            .http
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;

        read_json(resp).await
    }

    /// GET the artifact URI with the credential appended as `key=`.
    pub async fn download(&self, uri: &str) -> Result<Artifact, ServiceError> {
        debug!(uri = %uri, "downloading artifact");
        let resp = self
            .http
            .get(uri)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(redact)?;
        let resp = check_status(resp).await?;

        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);
        let bytes = resp.bytes().await.map_err(redact)?;

        Ok(Artifact {
            bytes: bytes.to_vec(),
            content_type,
        })
    }
}

/// The download URL carries the credential as a query parameter; it must not
/// survive into error text.
fn redact(err: reqwest::Error) -> ServiceError {
    ServiceError::Transport(err.without_url())
}

async fn check_status(resp: Response) -> Result<Response, ServiceError> {
    if resp.status().is_success() {
        return Ok(resp);
    }

    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    let envelope = serde_json::from_str::<ErrorEnvelope>(&body).ok();
    let (code, message) = match envelope {
        Some(ErrorEnvelope { error }) => (
            Some(error.status).filter(|s| !s.is_empty()),
            Some(error.message).filter(|m| !m.is_empty()),
        ),
        None => (None, None),
    };

    Err(ServiceError::Status {
        status,
        code,
        message,
        body,
    })
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, ServiceError> {
    let resp = check_status(resp).await?;
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| {
        ServiceError::Decode(format!(
            "{e}: {}",
            preview(&String::from_utf8_lossy(&bytes))
        ))
    })
}
