use std::path::Path;
use tracing::{error, info};

use super::{emit, Progress, ProgressCallback, VideoHandle};
use crate::error::{mentions_safety, preview, ClassifiedError, ErrorKind, ServiceError};
use crate::veo::types::Operation;
use crate::veo::VeoClient;

const NO_OUTPUT_MESSAGE: &str = "The AI produced no video. This is usually caused by safety \
     filtering or an unclear request; try a different image or prompt.";

/// Pick the download URI out of a completed operation, or explain why there is none.
pub fn artifact_uri(operation: &Operation) -> Result<&str, ClassifiedError> {
    if let Some(status) = &operation.error {
        let message = if status.message.trim().is_empty() {
            "Video generation failed without an error message.".to_string()
        } else {
            status.message.clone()
        };
        let kind = if mentions_safety(&message) {
            ErrorKind::Safety
        } else {
            ErrorKind::Unknown
        };
        return Err(ClassifiedError::new(kind, message));
    }

    let response = operation.video_response();
    let samples = response
        .and_then(|r| r.generated_samples.as_deref())
        .unwrap_or_default();

    let Some(first) = samples.first() else {
        let reasons = response
            .map(|r| r.rai_media_filtered_reasons.join(" "))
            .unwrap_or_default();
        let message = if reasons.trim().is_empty() {
            NO_OUTPUT_MESSAGE.to_string()
        } else {
            format!("{NO_OUTPUT_MESSAGE} Reason: {}", reasons.trim())
        };
        return Err(ClassifiedError::malformed(message));
    };

    first
        .video
        .as_ref()
        .and_then(|v| v.uri.as_deref())
        .filter(|uri| !uri.trim().is_empty())
        .ok_or_else(|| {
            ClassifiedError::malformed("Video generation succeeded, but no download link was provided.")
        })
}

/// Turn a completed operation into a playable, locally stored video.
pub async fn resolve(
    client: &VeoClient,
    operation: &Operation,
    output_dir: &Path,
    on_progress: Option<&ProgressCallback>,
) -> Result<VideoHandle, ClassifiedError> {
    let uri = artifact_uri(operation)?;

    emit(on_progress, Progress::Downloading);
    let artifact = client.download(uri).await.map_err(|e| classify_download_failure(&e))?;
    info!(bytes = artifact.bytes.len(), "video downloaded");

    let size = artifact.bytes.len();
    let handle = VideoHandle::materialize(output_dir, artifact.bytes, artifact.content_type.as_deref())
        .await
        .map_err(|e| {
            error!(dir = %output_dir.display(), "failed to store video: {e}");
            ClassifiedError::new(ErrorKind::Unknown, format!("Failed to store the downloaded video: {e}"))
        })?;

    emit(on_progress, Progress::Completed { bytes: size });
    Ok(handle)
}

fn classify_download_failure(err: &ServiceError) -> ClassifiedError {
    match err {
        ServiceError::Status { status, body, .. } => ClassifiedError::new(
            ErrorKind::Network,
            format!(
                "Failed to download the generated video. Status: {}",
                status.as_u16()
            ),
        )
        .with_status(*status)
        .with_body(Some(preview(body)).filter(|b| !b.is_empty())),
        ServiceError::Transport(e) => {
            let reason = if e.is_timeout() {
                "the request timed out"
            } else if e.is_connect() {
                "could not connect"
            } else {
                "the connection failed"
            };
            ClassifiedError::new(
                ErrorKind::Network,
                format!("Failed to download the generated video: {reason}."),
            )
        }
        ServiceError::Decode(detail) => ClassifiedError::new(
            ErrorKind::Network,
            format!("Failed to download the generated video: {detail}"),
        ),
    }
}
