//! Exchange error taxonomy.
//!
//! Adapters map every failure exactly once, at their edge, into one of two kinds:
//! `NotAvailable` (exchange not configured, operator can fix) and `Api`
//! (network, auth, rate limit, insufficient balance; the next poll retries).

use reqwest::StatusCode;
use serde::Serialize;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    Network,
    Authentication,
    InsufficientBalance,
    RateLimit,
    Generic,
}

impl fmt::Display for ApiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ApiErrorKind::Network => "network",
            ApiErrorKind::Authentication => "authentication",
            ApiErrorKind::InsufficientBalance => "insufficient balance",
            ApiErrorKind::RateLimit => "rate limit",
            ApiErrorKind::Generic => "api",
        })
    }
}

#[derive(Error, Debug)]
pub enum ExchangeError {
    #[error("Exchange {exchange} is not available: {reason}")]
    NotAvailable { exchange: String, reason: String },

    #[error("Exchange {exchange} {kind} error: {message}")]
    Api {
        exchange: String,
        kind: ApiErrorKind,
        message: String,
    },
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;

impl ExchangeError {
    pub fn not_configured(exchange: impl fmt::Display) -> Self {
        ExchangeError::NotAvailable {
            exchange: exchange.to_string(),
            reason: "API credentials not configured".into(),
        }
    }

    pub fn not_available(exchange: impl fmt::Display, reason: impl Into<String>) -> Self {
        ExchangeError::NotAvailable {
            exchange: exchange.to_string(),
            reason: reason.into(),
        }
    }

    pub fn api(exchange: impl fmt::Display, kind: ApiErrorKind, message: impl Into<String>) -> Self {
        ExchangeError::Api {
            exchange: exchange.to_string(),
            kind,
            message: message.into(),
        }
    }

    /// Transport-level failure from reqwest
    pub fn from_transport(exchange: impl fmt::Display, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() || err.is_request() {
            ApiErrorKind::Network
        } else if let Some(status) = err.status() {
            kind_for_status(status).unwrap_or(ApiErrorKind::Generic)
        } else if err.is_decode() {
            ApiErrorKind::Generic
        } else {
            classify_message(&err.to_string())
        };
        Self::api(exchange, kind, err.to_string())
    }

    /// Non-2xx HTTP response
    pub fn from_status(exchange: impl fmt::Display, status: StatusCode, body: &str) -> Self {
        let kind = kind_for_status(status).unwrap_or_else(|| classify_message(body));
        Self::api(exchange, kind, format!("HTTP {}: {}", status, truncate(body, 300)))
    }

    /// Error carried inside a 200 response envelope (`code != 0`, `error: [...]`)
    pub fn from_payload(exchange: impl fmt::Display, code: impl fmt::Display, msg: &str) -> Self {
        Self::api(exchange, classify_message(msg), format!("code {}: {}", code, msg))
    }

    pub fn exchange(&self) -> &str {
        match self {
            ExchangeError::NotAvailable { exchange, .. } | ExchangeError::Api { exchange, .. } => {
                exchange
            }
        }
    }

    pub fn kind(&self) -> Option<ApiErrorKind> {
        match self {
            ExchangeError::NotAvailable { .. } => None,
            ExchangeError::Api { kind, .. } => Some(*kind),
        }
    }

    /// Operator-recoverable (configuration) as opposed to an API failure
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ExchangeError::NotAvailable { .. })
    }
}

fn kind_for_status(status: StatusCode) -> Option<ApiErrorKind> {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Some(ApiErrorKind::Authentication),
        StatusCode::TOO_MANY_REQUESTS => Some(ApiErrorKind::RateLimit),
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            Some(ApiErrorKind::Network)
        }
        _ => None,
    }
}

/// Substring classifier for free-text exchange messages.
///
/// Only used when no typed signal (status code, transport kind) is available.
/// Misclassification is possible; the result is never used to fail closed.
pub fn classify_message(message: &str) -> ApiErrorKind {
    let msg = message.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| msg.contains(n));

    if has(&["network", "timeout", "timed out", "connection"]) {
        ApiErrorKind::Network
    } else if has(&["rate limit", "too many requests", "too frequent"]) {
        ApiErrorKind::RateLimit
    } else if has(&["insufficient", "balance not enough"]) {
        ApiErrorKind::InsufficientBalance
    } else if has(&[
        "authentication",
        "permission",
        "signature",
        "invalid key",
        "api key",
        "apikey",
        "passphrase",
        "unauthorized",
    ]) {
        ApiErrorKind::Authentication
    } else {
        ApiErrorKind::Generic
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// JSON error body returned by the HTTP surface
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error_type: &'static str,
    pub message: String,
    pub exchange: Option<String>,
    pub recoverable: bool,
}

impl ErrorResponse {
    pub fn unknown(message: impl Into<String>, exchange: Option<String>) -> Self {
        Self {
            error_type: "unknown_error",
            message: message.into(),
            exchange,
            recoverable: false,
        }
    }
}

impl From<&ExchangeError> for ErrorResponse {
    fn from(err: &ExchangeError) -> Self {
        let error_type = match err {
            ExchangeError::NotAvailable { .. } => "exchange_unavailable",
            ExchangeError::Api { .. } => "api_error",
        };
        Self {
            error_type,
            message: err.to_string(),
            exchange: Some(err.exchange().to_string()),
            recoverable: err.is_recoverable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_message_reaches_every_kind() {
        assert_eq!(classify_message("Connection reset by peer"), ApiErrorKind::Network);
        assert_eq!(classify_message("request timed out"), ApiErrorKind::Network);
        assert_eq!(classify_message("Too Many Requests"), ApiErrorKind::RateLimit);
        assert_eq!(
            classify_message("Insufficient margin for order"),
            ApiErrorKind::InsufficientBalance
        );
        assert_eq!(
            classify_message("Signature verification failed"),
            ApiErrorKind::Authentication
        );
        assert_eq!(classify_message("something odd"), ApiErrorKind::Generic);
    }

    #[test]
    fn test_rate_limit_wins_over_api_key_wording() {
        assert_eq!(
            classify_message("API key rate limit exceeded"),
            ApiErrorKind::RateLimit
        );
    }

    #[test]
    fn test_status_mapping_beats_body_text() {
        let err = ExchangeError::from_status("bingx", StatusCode::TOO_MANY_REQUESTS, "insufficient");
        assert_eq!(err.kind(), Some(ApiErrorKind::RateLimit));

        let err = ExchangeError::from_status("bingx", StatusCode::BAD_REQUEST, "Insufficient balance");
        assert_eq!(err.kind(), Some(ApiErrorKind::InsufficientBalance));
    }

    #[test]
    fn test_both_error_classes_reachable() {
        let unavailable = ExchangeError::not_configured("kraken");
        assert!(unavailable.is_recoverable());
        assert_eq!(unavailable.kind(), None);

        let api = ExchangeError::from_payload("kraken", "EAPI", "EAPI:Invalid key");
        assert!(!api.is_recoverable());
        assert_eq!(api.kind(), Some(ApiErrorKind::Authentication));
    }

    #[test]
    fn test_error_response_shape() {
        let resp = ErrorResponse::from(&ExchangeError::not_configured("blofin"));
        assert_eq!(resp.error_type, "exchange_unavailable");
        assert!(resp.recoverable);
        assert_eq!(resp.exchange.as_deref(), Some("blofin"));

        let resp = ErrorResponse::from(&ExchangeError::api("blofin", ApiErrorKind::Network, "down"));
        assert_eq!(resp.error_type, "api_error");
        assert!(!resp.recoverable);
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("ok", 10), "ok");
    }
}
