use std::collections::HashMap;

use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// 422 with per-field messages.
    #[error("validation failed")]
    Validation(HashMap<String, String>),

    #[error("server returned {status}: {message}")]
    Status { status: StatusCode, message: String },

    #[error("not signed in")]
    NotAuthenticated,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    errors: Option<HashMap<String, String>>,
}

impl ClientError {
    /// Build an error from a non-success response body.
    pub(crate) fn from_body(status: StatusCode, body: &str) -> Self {
        let parsed: Option<ErrorBody> = serde_json::from_str(body).ok();
        match parsed {
            Some(ErrorBody {
                errors: Some(errors),
                ..
            }) if status == StatusCode::UNPROCESSABLE_ENTITY => Self::Validation(errors),
            Some(ErrorBody {
                error: Some(message),
                ..
            }) => Self::Status { status, message },
            _ => Self::Status {
                status,
                message: body.to_string(),
            },
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http(e) => e.status(),
            Self::Validation(_) => Some(StatusCode::UNPROCESSABLE_ENTITY),
            Self::Status { status, .. } => Some(*status),
            Self::NotAuthenticated => None,
        }
    }

    /// The caller may not see this resource; render the not-authorized page.
    pub fn is_forbidden(&self) -> bool {
        self.status() == Some(StatusCode::FORBIDDEN)
    }

    pub fn field_error(&self, field: &str) -> Option<&str> {
        match self {
            Self::Validation(errors) => errors.get(field).map(String::as_str),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_error_shapes() {
        let e = ClientError::from_body(
            StatusCode::UNPROCESSABLE_ENTITY,
            r#"{"errors":{"content":"message cannot be empty"}}"#,
        );
        assert_eq!(e.field_error("content"), Some("message cannot be empty"));

        let e = ClientError::from_body(StatusCode::FORBIDDEN, r#"{"error":"not authorized"}"#);
        assert!(e.is_forbidden());
        assert_eq!(e.to_string(), "server returned 403 Forbidden: not authorized");

        let e = ClientError::from_body(StatusCode::BAD_GATEWAY, "upstream down");
        assert_eq!(e.status(), Some(StatusCode::BAD_GATEWAY));
        assert_eq!(e.field_error("content"), None);
    }
}
