use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

pub type PageResult<T> = Result<T, PageError>;

/// Outcome of a single page interaction.
#[derive(Debug, Error)]
pub enum PageError {
    #[error("element not found: {selector}")]
    NotFound { selector: String },
    #[error("captcha challenge detected at {url}")]
    Captcha { url: String },
    #[error("timed out after {timeout:?} waiting for {key}")]
    Timeout { key: String, timeout: Duration },
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("chromium launch failed: {0}")]
    Launch(String),
    #[error("cdp error: {0}")]
    Cdp(#[from] chromiumoxide::error::CdpError),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("publish not confirmed: {0}")]
    Unconfirmed(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl PageError {
    pub fn is_captcha(&self) -> bool {
        matches!(self, PageError::Captcha { .. })
    }

    /// Failures worth another attempt under the retry budget.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            PageError::Captcha { .. }
                | PageError::Cancelled
                | PageError::Configuration(_)
                | PageError::Launch(_)
        )
    }

    pub fn category(&self) -> FailureCategory {
        ErrorCategorizer::categorize(self)
    }
}

impl From<tokio::task::JoinError> for PageError {
    fn from(err: tokio::task::JoinError) -> Self {
        PageError::Unexpected(err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    ElementMissing,
    Captcha,
    Timeout,
    Navigation,
    Unconfirmed,
    Cancelled,
    Unexpected,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::ElementMissing => "element_missing",
            FailureCategory::Captcha => "captcha",
            FailureCategory::Timeout => "timeout",
            FailureCategory::Navigation => "navigation",
            FailureCategory::Unconfirmed => "unconfirmed",
            FailureCategory::Cancelled => "cancelled",
            FailureCategory::Unexpected => "unexpected",
        }
    }
}

pub struct ErrorCategorizer;

impl ErrorCategorizer {
    pub fn categorize(error: &PageError) -> FailureCategory {
        match error {
            PageError::NotFound { .. } => FailureCategory::ElementMissing,
            PageError::Captcha { .. } => FailureCategory::Captcha,
            PageError::Timeout { .. } => FailureCategory::Timeout,
            PageError::Navigation(message) => {
                if message.to_lowercase().contains("timeout") {
                    FailureCategory::Timeout
                } else {
                    FailureCategory::Navigation
                }
            }
            PageError::Cdp(err) => {
                let text = err.to_string().to_lowercase();
                if text.contains("timeout") {
                    FailureCategory::Timeout
                } else if text.contains("captcha") {
                    FailureCategory::Captcha
                } else {
                    FailureCategory::Unexpected
                }
            }
            PageError::Unconfirmed(_) => FailureCategory::Unconfirmed,
            PageError::Cancelled => FailureCategory::Cancelled,
            PageError::Launch(_) | PageError::Configuration(_) | PageError::Unexpected(_) => {
                FailureCategory::Unexpected
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categorize_navigation_timeouts() {
        let err = PageError::Navigation("Request timeout while loading".into());
        assert_eq!(ErrorCategorizer::categorize(&err), FailureCategory::Timeout);
        let err = PageError::Navigation("net::ERR_NAME_NOT_RESOLVED".into());
        assert_eq!(err.category(), FailureCategory::Navigation);
    }

    #[test]
    fn captcha_is_not_retryable() {
        let err = PageError::Captcha {
            url: "https://example.com".into(),
        };
        assert!(err.is_captcha());
        assert!(!err.is_retryable());
        assert!(PageError::NotFound {
            selector: "#x".into()
        }
        .is_retryable());
    }
}
