// src/errors.rs
// Crate-wide error taxonomy for throttled operations and device probing

use thiserror::Error;

/// Errors surfaced to callers of the throttled execution layer.
#[derive(Error, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum KairoError {
    /// Operation was gated off: concurrency limit, policy denial, or an
    /// external cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    /// The circuit breaker refused the call.
    #[error("circuit breaker is open")]
    CircuitOpen,

    /// The network request failed after the retry loop completed.
    #[error("network request failed: {0}")]
    Network(NetworkErrorKind),

    /// Invalid configuration rejected at construction time.
    #[error("configuration error: {0}")]
    Config(ConfigError),
}

impl KairoError {
    /// Stable error code for logging and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            KairoError::Cancelled => "KAIRO_CANCELLED",
            KairoError::CircuitOpen => "KAIRO_CIRCUIT_OPEN",
            KairoError::Network(kind) => kind.code(),
            KairoError::Config(_) => "KAIRO_CONFIG",
        }
    }

    /// Whether the error is an admission refusal rather than a transport
    /// fault. Admission refusals are never retried.
    pub fn is_admission_refusal(&self) -> bool {
        matches!(self, KairoError::Cancelled | KairoError::CircuitOpen)
    }
}

/// Classified network failure kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NetworkErrorKind {
    #[error("request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("response could not be interpreted")]
    InvalidResponse,

    #[error("request timed out")]
    Timeout,

    #[error("no network connection available")]
    NoConnection,

    #[error("server error: HTTP {0}")]
    ServerError(u16),

    #[error("client error: HTTP {0}")]
    ClientError(u16),

    #[error("unknown network failure")]
    Unknown,
}

impl NetworkErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            NetworkErrorKind::RequestFailed { .. } => "NET_REQUEST_FAILED",
            NetworkErrorKind::InvalidResponse => "NET_INVALID_RESPONSE",
            NetworkErrorKind::Timeout => "NET_TIMEOUT",
            NetworkErrorKind::NoConnection => "NET_NO_CONNECTION",
            NetworkErrorKind::ServerError(_) => "NET_SERVER_ERROR",
            NetworkErrorKind::ClientError(_) => "NET_CLIENT_ERROR",
            NetworkErrorKind::Unknown => "NET_UNKNOWN",
        }
    }

    /// Transport faults, timeouts, and 5xx responses feed the retry loop.
    /// 4xx responses are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkErrorKind::RequestFailed { .. }
                | NetworkErrorKind::Timeout
                | NetworkErrorKind::NoConnection
                | NetworkErrorKind::ServerError(_)
        )
    }
}

impl From<NetworkErrorKind> for KairoError {
    fn from(kind: NetworkErrorKind) -> Self {
        KairoError::Network(kind)
    }
}

/// Failure of the underlying device probe. Never surfaced to callers;
/// the monitor logs it and keeps the previous snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ProbeError {
    #[error("probe read failed: {reason}")]
    ReadFailed { reason: String },

    #[error("probe read exceeded deadline of {deadline_ms}ms")]
    DeadlineExceeded { deadline_ms: u64 },

    #[error("probe is unavailable: {reason}")]
    Unavailable { reason: String },
}

impl ProbeError {
    pub fn code(&self) -> &'static str {
        match self {
            ProbeError::ReadFailed { .. } => "PROBE_READ_FAILED",
            ProbeError::DeadlineExceeded { .. } => "PROBE_DEADLINE",
            ProbeError::Unavailable { .. } => "PROBE_UNAVAILABLE",
        }
    }
}

/// Faults reported by the HTTP transport binding.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TransportError {
    #[error("I/O error: {reason}")]
    Io { reason: String },

    #[error("transport timed out")]
    Timeout,

    #[error("TLS negotiation failed: {reason}")]
    Tls { reason: String },

    #[error("transport cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::Io { .. } => "TRANSPORT_IO",
            TransportError::Timeout => "TRANSPORT_TIMEOUT",
            TransportError::Tls { .. } => "TRANSPORT_TLS",
            TransportError::Cancelled => "TRANSPORT_CANCELLED",
        }
    }
}

impl From<TransportError> for NetworkErrorKind {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Io { reason } => NetworkErrorKind::RequestFailed { reason },
            TransportError::Timeout => NetworkErrorKind::Timeout,
            TransportError::Tls { reason } => NetworkErrorKind::RequestFailed { reason },
            // Cancellation is mapped back to KairoError::Cancelled by the
            // client before it reaches this conversion.
            TransportError::Cancelled => NetworkErrorKind::Unknown,
        }
    }
}

/// Configuration validation failures.
#[derive(Error, Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ConfigError {
    #[error("network_max_concurrent must be at least 1, got {value}")]
    ZeroConcurrency { value: u32 },

    #[error("{field} must be within [0, 1], got {value}")]
    FractionOutOfRange { field: String, value: f64 },

    #[error("{field} must be non-zero")]
    ZeroDuration { field: String },

    #[error("breaker {field} must be at least 1")]
    ZeroThreshold { field: String },
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::ZeroConcurrency { .. } => "CFG_ZERO_CONCURRENCY",
            ConfigError::FractionOutOfRange { .. } => "CFG_FRACTION_RANGE",
            ConfigError::ZeroDuration { .. } => "CFG_ZERO_DURATION",
            ConfigError::ZeroThreshold { .. } => "CFG_ZERO_THRESHOLD",
        }
    }
}

impl From<ConfigError> for KairoError {
    fn from(err: ConfigError) -> Self {
        KairoError::Config(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KairoError::Network(NetworkErrorKind::ServerError(503));
        assert_eq!(format!("{}", err), "network request failed: server error: HTTP 503");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(KairoError::Cancelled.code(), "KAIRO_CANCELLED");
        assert_eq!(KairoError::CircuitOpen.code(), "KAIRO_CIRCUIT_OPEN");
        assert_eq!(
            KairoError::Network(NetworkErrorKind::Timeout).code(),
            "NET_TIMEOUT"
        );
    }

    #[test]
    fn test_retryability_classification() {
        assert!(NetworkErrorKind::Timeout.is_retryable());
        assert!(NetworkErrorKind::ServerError(500).is_retryable());
        assert!(NetworkErrorKind::NoConnection.is_retryable());
        assert!(!NetworkErrorKind::ClientError(404).is_retryable());
        assert!(!NetworkErrorKind::InvalidResponse.is_retryable());
    }

    #[test]
    fn test_admission_refusals_not_retryable() {
        assert!(KairoError::Cancelled.is_admission_refusal());
        assert!(KairoError::CircuitOpen.is_admission_refusal());
        assert!(!KairoError::Network(NetworkErrorKind::Timeout).is_admission_refusal());
    }

    #[test]
    fn test_transport_error_conversion() {
        assert_eq!(
            NetworkErrorKind::from(TransportError::Timeout),
            NetworkErrorKind::Timeout
        );
        let io = TransportError::Io {
            reason: "connection reset".into(),
        };
        assert!(matches!(
            NetworkErrorKind::from(io),
            NetworkErrorKind::RequestFailed { .. }
        ));
    }
}
