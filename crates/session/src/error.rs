use wb_transport::TransportError;

use crate::rate_limit::{Denial, DenialReason};

/// Every failure a session operation can report to its caller.
///
/// Cloneable so one outcome can be fanned out to several waiters.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("WhatsApp is not connected")]
    NotConnected,

    #[error("WhatsApp is already connected; no QR is needed")]
    AlreadyConnected,

    #[error("a QR code is already active; retry in {retry_after}s")]
    CredentialActive { retry_after: u64 },

    #[error("hourly QR limit reached; retry in {retry_after}s")]
    HourlyLimitExceeded { retry_after: u64 },

    #[error("QR requested too frequently; retry in {retry_after}s")]
    TooFrequent { retry_after: u64 },

    #[error("timed out waiting for the transport")]
    Timeout,

    #[error("reconnection gave up after too many failed attempts")]
    MaxRetriesExceeded,

    #[error("unrecoverable transport failure: {0}")]
    Fatal(String),

    #[error("pending QR request invalidated: {0}")]
    Invalidated(String),

    #[error("invalid destination: {0}")]
    InvalidDestination(String),

    #[error("session controller is not running")]
    Unavailable,
}

impl SessionError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Transport(_) => "TRANSPORT_ERROR",
            Self::NotConnected => "NOT_CONNECTED",
            Self::AlreadyConnected => "ALREADY_CONNECTED",
            Self::CredentialActive { .. } => "CREDENTIAL_ACTIVE",
            Self::HourlyLimitExceeded { .. } => "HOURLY_LIMIT_EXCEEDED",
            Self::TooFrequent { .. } => "TOO_FREQUENT",
            Self::Timeout => "TIMEOUT",
            Self::MaxRetriesExceeded => "MAX_RETRIES_EXCEEDED",
            Self::Fatal(_) => "FATAL_ERROR",
            Self::Invalidated(_) => "INVALIDATED",
            Self::InvalidDestination(_) => "INVALID_DESTINATION",
            Self::Unavailable => "UNAVAILABLE",
        }
    }

    /// Seconds the caller should wait before retrying, for time-based denials.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            Self::CredentialActive { retry_after }
            | Self::HourlyLimitExceeded { retry_after }
            | Self::TooFrequent { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => Self::NotConnected,
            TransportError::Timeout => Self::Timeout,
            other => Self::Transport(other.to_string()),
        }
    }
}

impl From<Denial> for SessionError {
    fn from(d: Denial) -> Self {
        let retry_after = d.retry_after_secs;
        match d.reason {
            DenialReason::CredentialActive => Self::CredentialActive { retry_after },
            DenialReason::HourlyLimitExceeded => Self::HourlyLimitExceeded { retry_after },
            DenialReason::TooFrequent => Self::TooFrequent { retry_after },
        }
    }
}
