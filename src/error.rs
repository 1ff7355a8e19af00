//! Error types for the Party Lookup Relayer

use crate::party::{ErrorInformation, PartyIdentifier};

use thiserror::Error;

/// Main error type for the relayer
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No participant owns party {id_type}/{id_value}")]
    DirectoryResolution { id_type: String, id_value: String },

    #[error("No tenant owns party {id_type}/{id_value}")]
    TenantResolution { id_type: String, id_value: String },

    #[error("No live transaction context for party {identifier}")]
    CorrelationMiss { identifier: PartyIdentifier },

    #[error("Malformed request: {0}")]
    MalformedRequest(String),

    #[error("Delivery to {url} failed: {message}")]
    NetworkDelivery { url: String, message: String },

    #[error("Timeout waiting for {operation}")]
    Timeout { operation: String },

    #[error("Workflow engine error: {0}")]
    Workflow(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl LookupError {
    /// Check if error is retryable by the transport layer.
    ///
    /// The relayer itself never retries; this only classifies the failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LookupError::NetworkDelivery { .. } | LookupError::Timeout { .. }
        )
    }

    /// Check if the peer should be told about this error.
    ///
    /// A correlation miss is silent: the peer relies on its own timeout.
    pub fn is_peer_visible(&self) -> bool {
        !matches!(self, LookupError::CorrelationMiss { .. })
    }

    /// Protocol error code reported to a waiting peer
    pub fn error_code(&self) -> &'static str {
        match self {
            LookupError::DirectoryResolution { .. } | LookupError::TenantResolution { .. } => {
                "3204"
            }
            LookupError::MalformedRequest(_) => "3100",
            LookupError::Timeout { .. } => "2004",
            _ => "2001",
        }
    }

    /// Translate into the protocol error body sent through the dispatcher
    pub fn to_error_information(&self) -> ErrorInformation {
        ErrorInformation::new(self.error_code(), self.to_string())
    }
}

impl From<reqwest::Error> for LookupError {
    fn from(e: reqwest::Error) -> Self {
        let url = e
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        if e.is_timeout() {
            LookupError::Timeout {
                operation: format!("request to {}", url),
            }
        } else {
            LookupError::NetworkDelivery {
                url,
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_json::Error> for LookupError {
    fn from(e: serde_json::Error) -> Self {
        LookupError::MalformedRequest(e.to_string())
    }
}

/// Result type for relayer operations
pub type LookupResult<T> = Result<T, LookupError>;

/// Wrap foreign errors from server plumbing as internal errors
pub trait ResultExt<T> {
    fn internal(self, operation: &str) -> LookupResult<T>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn internal(self, operation: &str) -> LookupResult<T> {
        self.map_err(|e| LookupError::Internal(format!("{}: {}", operation, e)))
    }
}
