//! Proxy error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use thiserror::Error;
use tokfence_core::ErrorKind;

/// An error surfaced to a proxy or control client.
///
/// Carries the wire kind, a human message, and optional extra JSON fields
/// merged into the body (budget limits, rpm caps).
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct ProxyError {
    /// Wire error kind.
    pub kind: ErrorKind,
    /// Human-readable detail. Never contains credentials.
    pub message: String,
    /// Extra top-level JSON fields for the body.
    pub extra: Option<Value>,
}

impl ProxyError {
    /// A plain error.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            extra: None,
        }
    }

    /// An error with extra body fields.
    #[must_use]
    pub fn with_extra(kind: ErrorKind, message: impl Into<String>, extra: Value) -> Self {
        Self {
            kind,
            message: message.into(),
            extra: Some(extra),
        }
    }

    /// Render the JSON body.
    #[must_use]
    pub fn body(&self) -> Value {
        let mut body = json!({
            "error": self.kind.as_str(),
            "message": self.message,
        });
        if let (Some(obj), Some(Value::Object(extra))) = (body.as_object_mut(), &self.extra) {
            for (key, value) in extra {
                obj.insert(key.clone(), value.clone());
            }
        }
        body
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.body())).into_response()
    }
}

impl From<tokfence_vault::VaultError> for ProxyError {
    fn from(e: tokfence_vault::VaultError) -> Self {
        use tokfence_vault::VaultError;
        // Backend detail stays out of client-visible messages.
        match e {
            VaultError::NotFound { provider } => Self::new(
                ErrorKind::VaultNotFound,
                format!("no credential stored for provider {provider:?}"),
            ),
            VaultError::Corrupt(_) => Self::new(ErrorKind::VaultCorrupt, "vault data is corrupt"),
            VaultError::Locked
            | VaultError::EmptyCredential
            | VaultError::MissingPassphrase { .. }
            | VaultError::Io(_)
            | VaultError::Backend(_) => {
                Self::new(ErrorKind::VaultLocked, "vault is unavailable")
            },
        }
    }
}

impl From<tokfence_store::StoreError> for ProxyError {
    fn from(e: tokfence_store::StoreError) -> Self {
        Self::new(ErrorKind::LocalStoreError, e.to_string())
    }
}

impl From<tokfence_engine::EngineError> for ProxyError {
    fn from(e: tokfence_engine::EngineError) -> Self {
        use tokfence_engine::EngineError;
        match e {
            EngineError::BudgetExceeded {
                ref scope,
                period,
                limit_cents,
                current_spend_cents,
            } => Self::with_extra(
                ErrorKind::BudgetExceeded,
                format!("budget exceeded for {scope} ({period})"),
                serde_json::json!({
                    "scope": scope,
                    "period": period.as_str(),
                    "limit_cents": limit_cents,
                    "current_spend_cents": current_spend_cents,
                }),
            ),
            EngineError::InvalidArgument(message) => {
                Self::new(ErrorKind::InvalidArgument, message)
            },
            EngineError::Store(e) => e.into(),
        }
    }
}
