use tracing::{error, info};

use super::{emit, poll, resolve, submit, GenerationRequest, Progress, ProgressCallback, VideoHandle};
use crate::error::ClassifiedError;
use crate::settings::Settings;
use crate::veo::VeoClient;

/// Execute video generation: start the operation, poll until done, download the video.
pub async fn run_video_task(
    client: &VeoClient,
    settings: &Settings,
    request: &GenerationRequest,
    on_progress: Option<&ProgressCallback>,
) -> Result<VideoHandle, ClassifiedError> {
    match execute(client, settings, request, on_progress).await {
        Ok(handle) => {
            info!(
                url = %handle.playable_url(),
                bytes = handle.raw_data().len(),
                "video generation completed"
            );
            Ok(handle)
        }
        Err(e) => {
            error!(kind = %e.kind, status = ?e.status, "video generation failed: {e}");
            Err(e)
        }
    }
}

async fn execute(
    client: &VeoClient,
    settings: &Settings,
    request: &GenerationRequest,
    on_progress: Option<&ProgressCallback>,
) -> Result<VideoHandle, ClassifiedError> {
    info!(
        mime_type = %request.mime_type(),
        image_bytes = request.image_bytes().len(),
        "starting video generation"
    );

    // Step 1: start the long-running operation
    let operation = submit::submit(client, settings, request).await?;
    emit(
        on_progress,
        Progress::Submitted {
            operation: operation.name.clone(),
        },
    );

    // Step 2: poll for completion
    let operation = poll::poll_until_done(client, operation, &settings.policy.poll, on_progress).await?;

    // Step 3: inspect the result, download the video
    resolve::resolve(client, &operation, &settings.output_dir, on_progress).await
}
