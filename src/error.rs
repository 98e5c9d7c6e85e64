use reqwest::StatusCode;
use std::fmt;
use thiserror::Error;

/// Upstream bodies are truncated to this many characters before being kept on an error.
pub const BODY_PREVIEW_CHARS: usize = 200;

/// Phrases the service uses when it refuses a request on content-policy grounds.
/// Matched case-insensitively as substrings.
pub const SAFETY_PHRASES: &[&str] = &[
    "sensitive",
    "responsible ai practices",
    "safety policies",
    "usage guidelines",
];

pub const BUSY_MESSAGE: &str = "The service is currently busy. Please try again in a moment.";
pub const STILL_BUSY_MESSAGE: &str =
    "The service is still busy after several attempts. Please wait a few minutes and try again.";
pub const QUOTA_MESSAGE: &str =
    "The service's usage limit has been reached. Please wait a few minutes and try again.";
pub const POLL_FALLBACK_MESSAGE: &str =
    "An unexpected error occurred while checking the video status.";

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}

// ---------------------------------------------------------------------------
// Raw remote failures
// ---------------------------------------------------------------------------

/// A failed call to the video-generation service, before classification.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Non-2xx reply. `code` is the RPC status string from the error envelope
    /// (e.g. `RESOURCE_EXHAUSTED`) when the body carried one.
    #[error("upstream status {status}: {}", .message.as_deref().unwrap_or("<no message>"))]
    Status {
        status: StatusCode,
        code: Option<String>,
        message: Option<String>,
        body: String,
    },

    /// Transport-level failure (DNS, connect, timeouts, etc).
    #[error("HTTP request error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 2xx reply whose body could not be understood.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl ServiceError {
    /// Rate limit or resource exhaustion.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            ServiceError::Status { status, code, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS
                    || code.as_deref() == Some("RESOURCE_EXHAUSTED")
            }
            _ => false,
        }
    }

    /// Server-side instability that may clear on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Status { status, code, .. } => {
                status.is_server_error()
                    || matches!(code.as_deref(), Some("INTERNAL" | "UNKNOWN" | "UNAVAILABLE"))
            }
            ServiceError::Transport(e) => e.is_connect() || e.is_timeout(),
            ServiceError::Decode(_) => false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ServiceError::Status { status, .. } => Some(*status),
            ServiceError::Transport(e) => e.status(),
            ServiceError::Decode(_) => None,
        }
    }

    /// Human-readable message supplied by the server, if any.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            ServiceError::Status { message, .. } => {
                message.as_deref().filter(|m| !m.trim().is_empty())
            }
            _ => None,
        }
    }

    fn body_preview(&self) -> Option<String> {
        match self {
            ServiceError::Status { body, .. } if !body.is_empty() => Some(preview(body)),
            _ => None,
        }
    }

    fn mentions_safety(&self) -> bool {
        match self {
            ServiceError::Status { message, body, .. } => {
                message.as_deref().is_some_and(mentions_safety) || mentions_safety(body)
            }
            _ => false,
        }
    }
}

impl IsRetryable for ServiceError {
    fn is_retryable(&self) -> bool {
        self.is_rate_limited() || self.is_transient()
    }
}

pub fn mentions_safety(text: &str) -> bool {
    let lower = text.to_lowercase();
    SAFETY_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

pub(crate) fn preview(body: &str) -> String {
    format!("{:.len$}", body, len = BODY_PREVIEW_CHARS)
}

// ---------------------------------------------------------------------------
// Classified outcome returned to callers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Content-policy rejection; the input has to change.
    Safety,
    /// Rate or usage limit still exhausted after retries.
    Quota,
    /// Server instability outlasted the retry budget.
    TransientExhausted,
    /// Success-shaped response without a usable artifact.
    MalformedResult,
    /// Artifact download failed.
    Network,
    /// Request rejected locally before anything was sent.
    InvalidInput,
    Unknown,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Safety => "safety",
            ErrorKind::Quota => "quota",
            ErrorKind::TransientExhausted => "transient_exhausted",
            ErrorKind::MalformedResult => "malformed_result",
            ErrorKind::Network => "network",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unknown => "unknown",
        }
    }

    /// Default user-facing hint. Collaborators may localise their own.
    pub fn hint(self) -> &'static str {
        match self {
            ErrorKind::Safety => "Try a different image or rephrase the prompt.",
            ErrorKind::Quota => "Wait a few minutes before trying again.",
            ErrorKind::TransientExhausted => "The service is unstable right now; try again later.",
            ErrorKind::MalformedResult => {
                "The AI produced no video. Try a clearer prompt or another image."
            }
            ErrorKind::Network => "Downloading the video failed; try again.",
            ErrorKind::InvalidInput => "Provide an image and a non-empty prompt.",
            ErrorKind::Unknown => "Something went wrong; try again.",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status of the failing call, when there was one.
    pub status: Option<u16>,
    /// Truncated upstream body, for diagnostics only.
    pub body: Option<String>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            body: None,
        }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status.as_u16());
        self
    }

    pub fn with_body(mut self, body: Option<String>) -> Self {
        self.body = body;
        self
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedResult, message)
    }

    fn attach(mut self, err: &ServiceError) -> Self {
        self.status = err.status().map(|s| s.as_u16());
        self.body = err.body_preview();
        self
    }
}

/// Classify the error that ended a remote call, once retries (if any) are spent.
///
/// Safety phrasing wins over everything else; a rate-limit signal becomes
/// `Quota`; a transient server signal becomes `TransientExhausted`; anything
/// else is `Unknown` carrying the server's message or `fallback`.
pub fn classify_service_error(err: &ServiceError, fallback: &str) -> ClassifiedError {
    let message = err.server_message().map(str::to_owned);
    let classified = if err.mentions_safety() {
        ClassifiedError::new(
            ErrorKind::Safety,
            message.unwrap_or_else(|| "The request was rejected by the service's safety filters.".into()),
        )
    } else if err.is_rate_limited() {
        ClassifiedError::new(ErrorKind::Quota, message.unwrap_or_else(|| QUOTA_MESSAGE.into()))
    } else if err.is_transient() {
        ClassifiedError::new(
            ErrorKind::TransientExhausted,
            message.unwrap_or_else(|| BUSY_MESSAGE.into()),
        )
    } else {
        ClassifiedError::new(ErrorKind::Unknown, message.unwrap_or_else(|| fallback.into()))
    };
    classified.attach(err)
}

/// Classify a polling failure that kept recurring past the consecutive-failure bound.
pub fn classify_poll_exhaustion(err: &ServiceError) -> ClassifiedError {
    let kind = if err.is_rate_limited() {
        ErrorKind::Quota
    } else {
        ErrorKind::TransientExhausted
    };
    ClassifiedError::new(kind, STILL_BUSY_MESSAGE).attach(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_err(status: u16, code: Option<&str>, message: Option<&str>) -> ServiceError {
        ServiceError::Status {
            status: StatusCode::from_u16(status).unwrap(),
            code: code.map(String::from),
            message: message.map(String::from),
            body: String::new(),
        }
    }

    #[test]
    fn safety_phrases_match_any_case() {
        assert!(mentions_safety("Violates our SAFETY POLICIES."));
        assert!(mentions_safety("flagged as Sensitive content"));
        assert!(mentions_safety("see Responsible AI practices"));
        assert!(!mentions_safety("quota exceeded"));
    }

    #[test]
    fn retryable_signals() {
        assert!(status_err(429, None, None).is_retryable());
        assert!(status_err(400, Some("RESOURCE_EXHAUSTED"), None).is_retryable());
        assert!(status_err(500, None, None).is_retryable());
        assert!(status_err(503, Some("UNAVAILABLE"), None).is_retryable());
        assert!(!status_err(400, Some("INVALID_ARGUMENT"), None).is_retryable());
        assert!(!status_err(403, Some("PERMISSION_DENIED"), None).is_retryable());
        assert!(!ServiceError::Decode("garbage".into()).is_retryable());
    }

    #[test]
    fn safety_wins_over_rate_limit() {
        let err = status_err(429, None, Some("Prompt touches on sensitive topics"));
        let c = classify_service_error(&err, BUSY_MESSAGE);
        assert_eq!(c.kind, ErrorKind::Safety);
        assert_eq!(c.status, Some(429));
    }

    #[test]
    fn rate_limit_becomes_quota() {
        let err = status_err(429, Some("RESOURCE_EXHAUSTED"), None);
        let c = classify_service_error(&err, BUSY_MESSAGE);
        assert_eq!(c.kind, ErrorKind::Quota);
        assert_eq!(c.message, QUOTA_MESSAGE);
    }

    #[test]
    fn server_failure_becomes_transient_exhausted() {
        let c = classify_service_error(&status_err(500, Some("INTERNAL"), None), BUSY_MESSAGE);
        assert_eq!(c.kind, ErrorKind::TransientExhausted);
    }

    #[test]
    fn other_errors_pass_message_through() {
        let err = status_err(400, Some("INVALID_ARGUMENT"), Some("image too large"));
        let c = classify_service_error(&err, BUSY_MESSAGE);
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert_eq!(c.message, "image too large");

        let c = classify_service_error(&status_err(401, None, None), BUSY_MESSAGE);
        assert_eq!(c.message, BUSY_MESSAGE);
    }

    #[test]
    fn poll_exhaustion_kind_follows_last_error() {
        let c = classify_poll_exhaustion(&status_err(429, None, None));
        assert_eq!(c.kind, ErrorKind::Quota);
        assert_eq!(c.message, STILL_BUSY_MESSAGE);
        let c = classify_poll_exhaustion(&status_err(502, None, None));
        assert_eq!(c.kind, ErrorKind::TransientExhausted);
    }

    #[test]
    fn body_preview_is_truncated() {
        let err = ServiceError::Status {
            status: StatusCode::BAD_REQUEST,
            code: None,
            message: None,
            body: "x".repeat(1000),
        };
        let c = classify_service_error(&err, "bad");
        assert_eq!(c.body.map(|b| b.len()), Some(BODY_PREVIEW_CHARS));
    }
}
