use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_VIDEO_MODEL: &str = "veo-2.0-generate-001";
pub const DEFAULT_PROMPT_MODIFIERS: &str = "photorealistic, cinematic, high detail, 15 second video";

/// Checked in order; the first non-empty one supplies the credential.
pub const API_KEY_ENV_VARS: &[&str] = &["API_KEY", "GEMINI_API_KEY"];

// ---------------------------------------------------------------------------
// Settings: optional {config_dir}/stillmotion/settings.json, then env
// ---------------------------------------------------------------------------

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default = "default_base_url")]
    #[serde(alias = "baseURL")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Appended to every user prompt. Not user-editable at request time.
    #[serde(default = "default_prompt_modifiers")]
    pub prompt_modifiers: String,
    /// Where downloaded videos are materialised for the session.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub policy: Policy,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_VIDEO_MODEL.to_string()
}

fn default_prompt_modifiers() -> String {
    DEFAULT_PROMPT_MODIFIERS.to_string()
}

fn default_output_dir() -> PathBuf {
    std::env::temp_dir().join("stillmotion")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            model: default_model(),
            prompt_modifiers: default_prompt_modifiers(),
            output_dir: default_output_dir(),
            policy: Policy::default(),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("prompt_modifiers", &self.prompt_modifiers)
            .field("output_dir", &self.output_dir)
            .field("policy", &self.policy)
            .finish()
    }
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("stillmotion").join("settings.json"))
    }

    /// Read settings from `path` (or the default location if it exists),
    /// take the credential from the environment, and validate.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::read_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::read_file(&path)?,
                _ => Self::default(),
            },
        };
        settings.apply_env();
        settings.validate()?;
        Ok(settings)
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("invalid settings JSON in {}", path.display()))
    }

    pub fn apply_env(&mut self) {
        let from_env = API_KEY_ENV_VARS
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .map(|value| value.trim().to_string())
            .find(|value| !value.is_empty());
        if let Some(key) = from_env {
            self.api_key = key;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.api_key.trim().is_empty() {
            bail!("API_KEY environment variable not set");
        }
        if self.base_url.trim().is_empty() {
            bail!("baseUrl must not be empty");
        }
        if self.model.trim().is_empty() {
            bail!("model must not be empty");
        }
        if self.policy.submit.max_attempts == 0 {
            bail!("policy.submit.maxAttempts must be at least 1");
        }
        if self.policy.http.connect_timeout_ms == 0 || self.policy.http.request_timeout_ms == 0 {
            bail!("policy.http timeouts must be greater than zero");
        }
        Ok(())
    }

    /// The prompt actually sent: user text followed by the fixed modifiers.
    pub fn augment_prompt(&self, prompt: &str) -> String {
        let modifiers = self.prompt_modifiers.trim();
        if modifiers.is_empty() {
            prompt.to_string()
        } else {
            format!("{prompt}, {modifiers}")
        }
    }
}

// ---------------------------------------------------------------------------
// Retry / polling policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Policy {
    #[serde(default)]
    pub submit: RetryPolicy,
    #[serde(default)]
    pub poll: PollPolicy,
    #[serde(default)]
    pub http: HttpPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Total calls allowed, including the first.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    /// Upper bound of the uniform jitter added to every delay.
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            base_delay_ms: 4_000,
            jitter_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollPolicy {
    pub interval_ms: u64,
    /// Consecutive retryable failures tolerated before giving up.
    pub max_failures: u32,
    pub jitter_ms: u64,
    /// Budget for polling a responsive service. Time spent backing off after
    /// failures does not count; `max_failures` bounds that. `None` waits forever.
    pub timeout_ms: Option<u64>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            max_failures: 8,
            jitter_ms: 1_000,
            timeout_ms: Some(900_000),
        }
    }
}

impl PollPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Per-request limits for the HTTP client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HttpPolicy {
    pub connect_timeout_ms: u64,
    /// Covers the whole request, body included.
    pub request_timeout_ms: u64,
}

impl Default for HttpPolicy {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 10_000,
            request_timeout_ms: 300_000,
        }
    }
}

impl HttpPolicy {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let s: Settings = serde_json::from_str(
            r#"{ "model": "veo-3.0-generate-preview", "policy": { "poll": { "intervalMs": 2500 } } }"#,
        )
        .unwrap();
        assert_eq!(s.model, "veo-3.0-generate-preview");
        assert_eq!(s.base_url, DEFAULT_BASE_URL);
        assert_eq!(s.policy.poll.interval_ms, 2500);
        assert_eq!(s.policy.poll.max_failures, 8);
        assert_eq!(s.policy.submit, RetryPolicy::default());
        assert_eq!(s.policy.http, HttpPolicy::default());
    }

    #[test]
    fn policy_defaults_and_http_overrides() {
        let poll = PollPolicy::default();
        assert_eq!(poll.max_failures, 8);
        assert_eq!(poll.timeout(), Some(Duration::from_secs(900)));

        let http: HttpPolicy =
            serde_json::from_str(r#"{ "requestTimeoutMs": 500 }"#).unwrap();
        assert_eq!(http.request_timeout(), Duration::from_millis(500));
        assert_eq!(http.connect_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn base_url_alias() {
        let s: Settings = serde_json::from_str(r#"{ "baseURL": "http://localhost:9" }"#).unwrap();
        assert_eq!(s.base_url, "http://localhost:9");
    }

    #[test]
    fn augment_prompt_appends_modifiers() {
        let s = Settings::default();
        assert_eq!(
            s.augment_prompt("a cat waves"),
            "a cat waves, photorealistic, cinematic, high detail, 15 second video"
        );
        let bare = Settings {
            prompt_modifiers: "  ".into(),
            ..Settings::default()
        };
        assert_eq!(bare.augment_prompt("a cat waves"), "a cat waves");
    }

    #[test]
    fn validate_requires_credential() {
        let err = Settings::default().validate().unwrap_err();
        assert!(err.to_string().contains("API_KEY"));

        let ok = Settings {
            api_key: "k".into(),
            ..Settings::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn api_key_is_never_serialized_or_debugged() {
        let s = Settings {
            api_key: "super-secret".into(),
            ..Settings::default()
        };
        assert!(!serde_json::to_string(&s).unwrap().contains("super-secret"));
        assert!(!format!("{s:?}").contains("super-secret"));
    }
}
