//! Three-way result of handling one webhook request, and its HTTP mapping.
//!
//! `Ok` covers everything the platform should treat as delivered (including duplicates and
//! status callbacks), `Recoverable` is a rejection of the request itself (4xx), and `Fatal`
//! is an unexpected internal failure (500, details logged only).

use crate::store::StoreError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug)]
pub enum Outcome<T> {
    Ok(T),
    Recoverable(Rejection),
    Fatal(DispatchError),
}

/// Why a request that passed authentication and validation was acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// A reply was produced and handed to the sender.
    Processed,
    /// Message id already seen within the dedup window.
    Duplicate,
    /// Delivery-status callback, not a user message.
    StatusUpdate,
    /// A message with no text body (media, reactions, ...).
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    MissingSignature,
    InvalidSignature,
    InvalidJson,
    NotAMessageEvent,
    InvalidMessageFormat,
    MissingParameters,
    VerificationFailed,
}

impl Rejection {
    pub fn status(&self) -> StatusCode {
        match self {
            Rejection::MissingSignature
            | Rejection::InvalidSignature
            | Rejection::VerificationFailed => StatusCode::FORBIDDEN,
            Rejection::InvalidJson
            | Rejection::InvalidMessageFormat
            | Rejection::MissingParameters => StatusCode::BAD_REQUEST,
            Rejection::NotAMessageEvent => StatusCode::NOT_FOUND,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Rejection::MissingSignature => "No signature provided",
            Rejection::InvalidSignature => "Invalid signature",
            Rejection::InvalidJson => "Invalid JSON provided",
            Rejection::NotAMessageEvent => "Not a WhatsApp API event",
            Rejection::InvalidMessageFormat => "Invalid message format",
            Rejection::MissingParameters => "Missing parameters",
            Rejection::VerificationFailed => "Verification failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("conversation store: {0}")]
    Store(#[from] StoreError),
}

impl<T> Outcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Outcome::Recoverable(r) => Some(*r),
            _ => None,
        }
    }
}

impl IntoResponse for Ack {
    fn into_response(self) -> Response {
        Json(json!({ "status": "ok" })).into_response()
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        (
            self.status(),
            Json(json!({ "status": "error", "message": self.message() })),
        )
            .into_response()
    }
}

impl<T: IntoResponse> IntoResponse for Outcome<T> {
    fn into_response(self) -> Response {
        match self {
            Outcome::Ok(v) => v.into_response(),
            Outcome::Recoverable(r) => r.into_response(),
            Outcome::Fatal(e) => {
                log::error!("webhook: internal failure: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "status": "error", "message": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_status_codes() {
        assert_eq!(Rejection::MissingSignature.status(), StatusCode::FORBIDDEN);
        assert_eq!(Rejection::InvalidSignature.status(), StatusCode::FORBIDDEN);
        assert_eq!(Rejection::InvalidJson.status(), StatusCode::BAD_REQUEST);
        assert_eq!(Rejection::NotAMessageEvent.status(), StatusCode::NOT_FOUND);
        assert_eq!(Rejection::MissingParameters.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn fatal_maps_to_500() {
        let out: Outcome<Ack> =
            Outcome::Fatal(DispatchError::Store(StoreError::NotFound("x".to_string())));
        assert_eq!(out.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
