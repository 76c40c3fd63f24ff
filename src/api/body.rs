//! Raw message bodies for publish and direct-send endpoints.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
};

use crate::error::AppError;

/// Request body forwarded verbatim to subscribers.
///
/// Buffering failures, including the configured size limit, come back as
/// JSON error lines instead of axum's plain-text rejections.
pub struct MessageBody(pub Bytes);

impl<S> FromRequest<S> for MessageBody
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Bytes::from_request(req, state).await {
            Ok(body) => Ok(Self(body)),
            Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
                Err(AppError::PayloadTooLarge)
            }
            Err(rejection) => Err(AppError::InvalidPayload(rejection.body_text())),
        }
    }
}
