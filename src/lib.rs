//! Animate a still image: submit it with a prompt to a long-running video
//! generation service, poll the operation, and download the result.

pub mod error;
pub mod settings;
pub mod tasks;
pub mod veo;

pub use error::{ClassifiedError, ErrorKind};
pub use settings::Settings;
pub use tasks::{GenerationRequest, Progress, ProgressCallback, VideoGenerator, VideoHandle};

/// One-shot entry point. Prefer [`VideoGenerator`] when generating more than once.
pub async fn generate_video(
    settings: &Settings,
    image_bytes: impl Into<Vec<u8>>,
    mime_type: &str,
    prompt: &str,
) -> Result<VideoHandle, ClassifiedError> {
    let request = GenerationRequest::new(image_bytes, mime_type, prompt)?;
    let client = veo::VeoClient::from_settings(settings);
    tasks::video::run_video_task(&client, settings, &request, None).await
}
