pub mod poll;
pub mod resolve;
pub mod retry;
pub mod submit;
pub mod video;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::error::ClassifiedError;
use crate::settings::Settings;
use crate::veo::VeoClient;

/// Callback invoked as a generation moves through its phases.
pub type ProgressCallback = Arc<dyn Fn(Progress) + Send + Sync>;

pub const ACCEPTED_MIME_TYPES: &[&str] = &["image/png", "image/jpeg", "image/webp", "image/gif"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    Submitted { operation: String },
    Polling { checks: u32, done: bool },
    Backoff { failures: u32, delay: Duration },
    Downloading,
    Completed { bytes: usize },
}

// ---------------------------------------------------------------------------
// GenerationRequest: validated once, immutable afterwards
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct GenerationRequest {
    image_bytes: Vec<u8>,
    mime_type: String,
    prompt: String,
}

impl GenerationRequest {
    /// `image_bytes` must be raw image data, not base64 or a data URL.
    pub fn new(
        image_bytes: impl Into<Vec<u8>>,
        mime_type: &str,
        prompt: &str,
    ) -> Result<Self, ClassifiedError> {
        let image_bytes = image_bytes.into();
        if image_bytes.is_empty() {
            return Err(ClassifiedError::invalid_input("image must not be empty"));
        }
        if image_bytes.starts_with(b"data:") {
            return Err(ClassifiedError::invalid_input(
                "image must be raw bytes, not a data URL",
            ));
        }

        let mime_type = match mime_type.trim().to_ascii_lowercase().as_str() {
            "image/jpg" => "image/jpeg".to_string(),
            other => other.to_string(),
        };
        if !ACCEPTED_MIME_TYPES.contains(&mime_type.as_str()) {
            return Err(ClassifiedError::invalid_input(format!(
                "unsupported image type \"{mime_type}\". Valid: {}",
                ACCEPTED_MIME_TYPES.join(", ")
            )));
        }

        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ClassifiedError::invalid_input("prompt must not be empty"));
        }

        Ok(Self {
            image_bytes,
            mime_type,
            prompt: prompt.to_string(),
        })
    }

    pub fn image_bytes(&self) -> &[u8] {
        &self.image_bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

impl fmt::Debug for GenerationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationRequest")
            .field("image_bytes", &format_args!("<{} bytes>", self.image_bytes.len()))
            .field("mime_type", &self.mime_type)
            .field("prompt", &self.prompt)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// VideoHandle: owned by the caller once returned
// ---------------------------------------------------------------------------

/// A generated video: its bytes plus a local file the caller can play.
/// The caller releases the file with [`VideoHandle::release`] when done.
pub struct VideoHandle {
    playable_url: String,
    path: PathBuf,
    mime_type: String,
    raw_data: Vec<u8>,
}

impl VideoHandle {
    /// Write `bytes` to a fresh file under `dir` and wrap it.
    pub(crate) async fn materialize(
        dir: &Path,
        bytes: Vec<u8>,
        content_type: Option<&str>,
    ) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let dir = if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(dir)
        };

        let mime_type = content_type
            .and_then(|ct| ct.split(';').next())
            .map(|ct| ct.trim().to_ascii_lowercase())
            .filter(|ct| ct.starts_with("video/"))
            .unwrap_or_else(|| "video/mp4".to_string());

        let filename = format!("{}.{}", uuid::Uuid::new_v4(), extension_for(&mime_type));
        let path = dir.join(filename);
        tokio::fs::write(&path, &bytes).await?;

        Ok(Self {
            playable_url: format!("file://{}", path.display()),
            path,
            mime_type,
            raw_data: bytes,
        })
    }

    pub fn playable_url(&self) -> &str {
        &self.playable_url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn raw_data(&self) -> &[u8] {
        &self.raw_data
    }

    pub fn into_raw_data(self) -> Vec<u8> {
        self.raw_data
    }

    /// Delete the local file. Calling it again is a no-op.
    pub async fn release(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for VideoHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VideoHandle")
            .field("playable_url", &self.playable_url)
            .field("mime_type", &self.mime_type)
            .field("raw_data", &format_args!("<{} bytes>", self.raw_data.len()))
            .finish()
    }
}

fn extension_for(mime_type: &str) -> &'static str {
    match mime_type {
        "video/webm" => "webm",
        "video/quicktime" => "mov",
        _ => "mp4",
    }
}

// ---------------------------------------------------------------------------
// VideoGenerator: owns the client and settings
// ---------------------------------------------------------------------------

pub struct VideoGenerator {
    client: VeoClient,
    settings: Settings,
    on_progress: Option<ProgressCallback>,
}

impl VideoGenerator {
    pub fn new(settings: Settings) -> Self {
        Self {
            client: VeoClient::from_settings(&settings),
            settings,
            on_progress: None,
        }
    }

    pub fn set_on_progress(&mut self, cb: ProgressCallback) {
        self.on_progress = Some(cb);
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Validate inputs, then submit, poll, and download.
    pub async fn generate_video(
        &self,
        image_bytes: impl Into<Vec<u8>>,
        mime_type: &str,
        prompt: &str,
    ) -> Result<VideoHandle, ClassifiedError> {
        let request = GenerationRequest::new(image_bytes, mime_type, prompt)?;
        self.generate(&request).await
    }

    pub async fn generate(&self, request: &GenerationRequest) -> Result<VideoHandle, ClassifiedError> {
        video::run_video_task(
            &self.client,
            &self.settings,
            request,
            self.on_progress.as_ref(),
        )
        .await
    }
}

pub(crate) fn emit(on_progress: Option<&ProgressCallback>, progress: Progress) {
    if let Some(cb) = on_progress {
        cb(progress);
    }
}
