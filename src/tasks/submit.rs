use base64::Engine;
use tracing::info;

use super::retry;
use super::GenerationRequest;
use crate::error::{classify_service_error, ClassifiedError, IsRetryable, ServiceError, BUSY_MESSAGE};
use crate::settings::Settings;
use crate::veo::types::{InlineImage, Operation, PredictRequest, VideoInstance, VideoParameters};
use crate::veo::VeoClient;

pub fn build_request(request: &GenerationRequest, settings: &Settings) -> PredictRequest {
    PredictRequest {
        instances: vec![VideoInstance {
            prompt: settings.augment_prompt(request.prompt()),
            image: InlineImage {
                bytes_base64_encoded: base64::engine::general_purpose::STANDARD
                    .encode(request.image_bytes()),
                mime_type: request.mime_type().to_string(),
            },
        }],
        parameters: VideoParameters { sample_count: 1 },
    }
}

/// Start the generation, retrying rate-limit and transient server failures.
/// The returned operation may already be done.
pub async fn submit(
    client: &VeoClient,
    settings: &Settings,
    request: &GenerationRequest,
) -> Result<Operation, ClassifiedError> {
    let body = build_request(request, settings);
    let body = &body;

    let operation = retry::with_backoff(
        "start generation",
        &settings.policy.submit,
        move || client.start_generation(body),
        |e: &ServiceError| e.is_retryable(),
    )
    .await
    .map_err(|e| classify_service_error(&e, BUSY_MESSAGE))?;

    info!(
        operation = %operation.name,
        model = %client.model(),
        done = operation.done,
        "generation started"
    );
    Ok(operation)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_carries_augmented_prompt_and_encoded_image() {
        let req = GenerationRequest::new(vec![0xff, 0x00, 0x10], "image/png", "the lake ripples").unwrap();
        let body = build_request(&req, &Settings::default());
        let instance = &body.instances[0];
        assert_eq!(
            instance.prompt,
            "the lake ripples, photorealistic, cinematic, high detail, 15 second video"
        );
        assert_eq!(instance.image.bytes_base64_encoded, "/wAQ");
        assert_eq!(instance.image.mime_type, "image/png");
        assert_eq!(body.parameters.sample_count, 1);
    }
}
