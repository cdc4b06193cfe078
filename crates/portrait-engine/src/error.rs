use thiserror::Error;

use crate::retry::RetrySignal;

/// Body marker the service uses when a quota bucket is drained.
pub const RESOURCE_EXHAUSTED_MARKER: &str = "RESOURCE_EXHAUSTED";

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("generation quota reached ({used}/{ceiling}); upgrade to continue")]
    QuotaExceeded { used: u64, ceiling: u64 },

    #[error("API key or access token is missing")]
    MissingCredential,

    #[error("image service request failed ({status}): {body}")]
    Transport { status: u16, body: String },

    #[error("image service request could not be sent: {0}")]
    Request(#[from] reqwest::Error),

    #[error("image service returned an unreadable response: {0}")]
    InvalidResponse(String),

    #[error("no candidates returned from the image service")]
    NoCandidate,

    #[error("no image data found in the image service response")]
    NoImageData,

    #[error("edit failed: the image service returned no image")]
    EditFailed,

    #[error("request cancelled")]
    Cancelled,

    #[error("no version to edit; generate a portrait first")]
    EmptyHistory,

    #[error("no version '{0}' in this session")]
    UnknownVersion(String),

    #[error("{0}")]
    DuplicateVersion(#[from] portrait_contracts::history::DuplicateVersion),
}

impl StudioError {
    /// Whether the failure is the service asking us to slow down.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            StudioError::Transport { status, body } => {
                *status == 429 || body.contains(RESOURCE_EXHAUSTED_MARKER)
            }
            StudioError::Request(err) => err
                .status()
                .map(|status| status.as_u16() == 429)
                .unwrap_or(false),
            _ => false,
        }
    }

    /// Short machine-readable name, used in the event log.
    pub fn kind(&self) -> &'static str {
        match self {
            StudioError::QuotaExceeded { .. } => "quota_exceeded",
            StudioError::MissingCredential => "missing_credential",
            StudioError::Transport { .. } => "transport",
            StudioError::Request(_) => "request",
            StudioError::InvalidResponse(_) => "invalid_response",
            StudioError::NoCandidate => "no_candidate",
            StudioError::NoImageData => "no_image_data",
            StudioError::EditFailed => "edit_failed",
            StudioError::Cancelled => "cancelled",
            StudioError::EmptyHistory => "empty_history",
            StudioError::UnknownVersion(_) => "unknown_version",
            StudioError::DuplicateVersion(_) => "duplicate_version",
        }
    }
}

impl RetrySignal for StudioError {
    fn is_rate_limited(&self) -> bool {
        StudioError::is_rate_limited(self)
    }

    fn cancelled() -> Self {
        StudioError::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::StudioError;

    #[test]
    fn rate_limit_classification() {
        assert!(StudioError::Transport {
            status: 429,
            body: String::new()
        }
        .is_rate_limited());
        assert!(StudioError::Transport {
            status: 400,
            body: r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#.to_string()
        }
        .is_rate_limited());
        assert!(!StudioError::Transport {
            status: 500,
            body: "internal".to_string()
        }
        .is_rate_limited());
        assert!(!StudioError::NoCandidate.is_rate_limited());
        assert!(!StudioError::Cancelled.is_rate_limited());
    }

    #[test]
    fn transport_error_message_carries_status_and_body() {
        let err = StudioError::Transport {
            status: 403,
            body: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "image service request failed (403): permission denied"
        );
        assert_eq!(err.kind(), "transport");
    }
}
