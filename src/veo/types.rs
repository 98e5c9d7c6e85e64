use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Video generation via long-running operations
// POST {baseURL}/models/{model}:predictLongRunning  → operation
// GET  {baseURL}/{operation.name}                    → operation snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct PredictRequest {
    pub instances: Vec<VideoInstance>,
    pub parameters: VideoParameters,
}

#[derive(Debug, Serialize)]
pub struct VideoInstance {
    pub prompt: String,
    pub image: InlineImage,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineImage {
    pub bytes_base64_encoded: String,
    pub mime_type: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoParameters {
    /// One video per request.
    pub sample_count: u32,
}

/// Server-side handle to the generation job. Each poll yields a fresh
/// snapshot that replaces the previous one; nothing patches it locally.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    pub error: Option<RpcStatus>,
    pub response: Option<OperationResponse>,
}

impl Operation {
    pub fn video_response(&self) -> Option<&GenerateVideoResponse> {
        self.response
            .as_ref()
            .and_then(|r| r.generate_video_response.as_ref())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RpcStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationResponse {
    pub generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateVideoResponse {
    pub generated_samples: Option<Vec<GeneratedSample>>,
    pub rai_media_filtered_count: Option<u32>,
    #[serde(default)]
    pub rai_media_filtered_reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct GeneratedSample {
    pub video: Option<VideoRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRef {
    pub uri: Option<String>,
    pub mime_type: Option<String>,
}

/// `{"error": {...}}` body sent with non-2xx replies.
#[derive(Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: RpcStatus,
}
