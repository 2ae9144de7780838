use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified failure kinds reported by the data-acquisition layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchErrorKind {
    /// Transient transport failure
    Network,
    /// Invalid credential
    Auth,
    /// Credential lacks entitlement for the requested data tier
    Permission,
    /// Upstream returned an empty result for a valid request
    NoData,
    /// Upstream returned a structured error
    Api,
    Unknown,
    /// Caller abandoned the request before its result was committed
    Cancelled,
}

impl FetchErrorKind {
    /// Whether the retry layer may try again after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FetchErrorKind::Network | FetchErrorKind::Api | FetchErrorKind::Unknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FetchErrorKind::Network => "network",
            FetchErrorKind::Auth => "auth",
            FetchErrorKind::Permission => "permission",
            FetchErrorKind::NoData => "nodata",
            FetchErrorKind::Api => "api",
            FetchErrorKind::Unknown => "unknown",
            FetchErrorKind::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified fetch failure. Cloneable so coalesced waiters can share it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} error: {message}")]
pub struct FetchError {
    pub kind: FetchErrorKind,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Auth, message)
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Permission, message)
    }

    pub fn no_data(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::NoData, message)
    }

    pub fn api(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Api, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unknown, message)
    }

    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Cancelled, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}
