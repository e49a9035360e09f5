//! Client error types

use reqwest::StatusCode;
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Message used when the request never reached the server
pub const NETWORK_FAILURE_MESSAGE: &str =
    "Unable to reach the server. Check your connection and try again.";

/// Field name to list of validation messages, as returned with HTTP 422
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// Normalized failure surfaced by every gateway call
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request never reached the server (offline, DNS, timeout)
    #[error("{message}")]
    Network {
        message: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP 422 with per-field messages
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        errors: FieldErrors,
        payload: Option<Value>,
    },

    /// HTTP 401 or 403
    #[error("Authentication failed ({status}): {message}")]
    Auth {
        status: u16,
        message: String,
        payload: Option<Value>,
    },

    /// HTTP 5xx and any other unexpected status
    #[error("Server error {status}: {message}")]
    Server {
        status: u16,
        message: String,
        payload: Option<Value>,
    },

    /// A successful response whose body did not match the expected shape
    #[error("Unexpected response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// Local I/O while preparing a request (e.g. reading an upload)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Configuration(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(source: reqwest::Error) -> Self {
        Self::Network {
            message: NETWORK_FAILURE_MESSAGE.to_string(),
            source,
        }
    }
}

impl ApiError {
    /// Create an error from a non-success HTTP status and its raw body
    pub fn from_response(status: StatusCode, body: &[u8]) -> Self {
        let payload = serde_json::from_slice::<Value>(body).ok();
        let message = payload
            .as_ref()
            .and_then(server_message)
            .or_else(|| {
                let text = String::from_utf8_lossy(body).trim().to_string();
                (!text.is_empty() && payload.is_none()).then_some(text)
            })
            .unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("Unexpected server response")
                    .to_string()
            });

        match status.as_u16() {
            401 | 403 => Self::Auth {
                status: status.as_u16(),
                message,
                payload,
            },
            422 => Self::Validation {
                errors: payload.as_ref().map(field_errors).unwrap_or_default(),
                message,
                payload,
            },
            code => Self::Server {
                status: code,
                message,
                payload,
            },
        }
    }

    /// HTTP status, if the server responded
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::Validation { .. } => Some(422),
            Self::Auth { status, .. } | Self::Server { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Human-readable message suitable for a banner
    pub fn message(&self) -> String {
        match self {
            Self::Network { message, .. }
            | Self::Validation { message, .. }
            | Self::Auth { message, .. }
            | Self::Server { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Raw server payload, if one was returned and parsed as JSON
    pub const fn payload(&self) -> Option<&Value> {
        match self {
            Self::Validation { payload, .. }
            | Self::Auth { payload, .. }
            | Self::Server { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }

    /// Per-field validation messages (empty for non-validation errors)
    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            Self::Validation { errors, .. } => Some(errors),
            _ => None,
        }
    }

    /// Whether this error should end the current session
    pub const fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

fn server_message(payload: &Value) -> Option<String> {
    ["message", "error"].iter().find_map(|key| {
        payload
            .get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    })
}

fn field_errors(payload: &Value) -> FieldErrors {
    let Some(errors) = payload.get("errors").and_then(Value::as_object) else {
        return FieldErrors::new();
    };

    errors
        .iter()
        .map(|(field, messages)| {
            let messages = match messages {
                Value::Array(items) => items
                    .iter()
                    .filter_map(|m| m.as_str().map(str::to_string))
                    .collect(),
                Value::String(single) => vec![single.clone()],
                _ => Vec::new(),
            };
            (field.clone(), messages)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: &Value) -> Vec<u8> {
        serde_json::to_vec(value).unwrap()
    }

    #[test]
    fn test_validation_errors_are_mapped_per_field() {
        let err = ApiError::from_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            &body(&json!({
                "message": "The given data was invalid.",
                "errors": { "email": ["already taken"], "phone": "required" }
            })),
        );

        let errors = err.field_errors().unwrap();
        assert_eq!(errors["email"], vec!["already taken".to_string()]);
        assert_eq!(errors["phone"], vec!["required".to_string()]);
        assert_eq!(err.status(), Some(422));
        assert_eq!(err.message(), "The given data was invalid.");
    }

    #[test]
    fn test_auth_statuses() {
        for status in [StatusCode::UNAUTHORIZED, StatusCode::FORBIDDEN] {
            let err = ApiError::from_response(status, b"");
            assert!(err.is_auth_failure());
            assert_eq!(err.status(), Some(status.as_u16()));
        }
    }

    #[test]
    fn test_message_falls_back_to_reason_phrase() {
        let err = ApiError::from_response(StatusCode::INTERNAL_SERVER_ERROR, b"");
        assert_eq!(err.message(), "Internal Server Error");
        assert!(err.payload().is_none());
    }

    #[test]
    fn test_plain_text_body_becomes_message() {
        let err = ApiError::from_response(StatusCode::BAD_GATEWAY, b"upstream down");
        assert!(matches!(err, ApiError::Server { status: 502, .. }));
        assert_eq!(err.message(), "upstream down");
    }

    #[test]
    fn test_error_key_used_when_message_missing() {
        let err =
            ApiError::from_response(StatusCode::NOT_FOUND, &body(&json!({ "error": "no file" })));
        assert!(matches!(err, ApiError::Server { status: 404, .. }));
        assert_eq!(err.message(), "no file");
        assert_eq!(err.payload().unwrap()["error"], "no file");
    }
}
