use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),
    #[error("rate limited by provider")]
    RateLimited { retry_after: Option<Duration> },
    #[error("provider error (status {status}): {message}")]
    Server { status: u16, message: String },
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("content policy violation: {0}")]
    ContentPolicy(String),
    #[error("quota exceeded: {0}")]
    Quota(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("failed to decode provider response: {0}")]
    Decode(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("LLM generation failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: Box<LlmError> },
}

impl LlmError {
    /// Transient failures worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::Network(_) | LlmError::RateLimited { .. } | LlmError::Server { .. }
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Maps a non-success HTTP status and body onto the error taxonomy.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        let lower = body.to_lowercase();
        let message = summarize_body(body);
        match status {
            401 | 403 => LlmError::Auth(message),
            402 => LlmError::Quota(message),
            404 => LlmError::InvalidModel(message),
            429 if lower.contains("quota") => LlmError::Quota(message),
            429 => LlmError::RateLimited { retry_after },
            400 if ["safety", "policy", "blocked"]
                .iter()
                .any(|marker| lower.contains(marker)) =>
            {
                LlmError::ContentPolicy(message)
            }
            500..=599 => LlmError::Server { status, message },
            _ => LlmError::InvalidRequest(format!("status {status}: {message}")),
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            LlmError::Decode(value.to_string())
        } else {
            LlmError::Network(value.to_string())
        }
    }
}

fn summarize_body(body: &str) -> String {
    const LIMIT: usize = 300;
    let trimmed = body.trim();
    if trimmed.chars().count() <= LIMIT {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(LIMIT).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_are_classified() {
        assert!(matches!(LlmError::from_status(401, "", None), LlmError::Auth(_)));
        assert!(matches!(
            LlmError::from_status(404, "model not found", None),
            LlmError::InvalidModel(_)
        ));
        assert!(matches!(
            LlmError::from_status(429, "You exceeded your current quota", None),
            LlmError::Quota(_)
        ));
        assert!(matches!(
            LlmError::from_status(400, "Response blocked by SAFETY filters", None),
            LlmError::ContentPolicy(_)
        ));
        assert!(matches!(
            LlmError::from_status(400, "bad field", None),
            LlmError::InvalidRequest(_)
        ));
        let limited = LlmError::from_status(429, "slow down", Some(Duration::from_secs(3)));
        assert!(limited.is_retryable());
        assert_eq!(limited.retry_after(), Some(Duration::from_secs(3)));
        assert!(LlmError::from_status(503, "overloaded", None).is_retryable());
    }

    #[test]
    fn only_transient_errors_retry() {
        assert!(LlmError::Network("reset".into()).is_retryable());
        assert!(!LlmError::Auth("no".into()).is_retryable());
        assert!(!LlmError::Quota("no".into()).is_retryable());
        assert!(!LlmError::ContentPolicy("no".into()).is_retryable());
        let exhausted = LlmError::RetriesExhausted {
            attempts: 3,
            last: Box::new(LlmError::Network("timeout".into())),
        };
        assert!(!exhausted.is_retryable());
        assert_eq!(
            exhausted.to_string(),
            "LLM generation failed after 3 attempts: network error: timeout"
        );
    }
}
