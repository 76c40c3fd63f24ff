//! JSON line responses: one JSON object followed by a newline.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;

/// Serialize `body` as a single JSON line with the given status
pub fn json_line<T: Serialize + ?Sized>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_string(body) {
        Ok(mut text) => {
            text.push('\n');
            (status, [(header::CONTENT_TYPE, "application/json")], text).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize response body");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error\n").into_response()
        }
    }
}

/// `{"status":"ok", ...body}`
#[derive(Debug, Serialize)]
pub struct OkResponse<T: Serialize> {
    status: &'static str,
    #[serde(flatten)]
    body: T,
}

pub fn ok<T: Serialize>(body: T) -> OkResponse<T> {
    OkResponse { status: "ok", body }
}

impl<T: Serialize> IntoResponse for OkResponse<T> {
    fn into_response(self) -> Response {
        json_line(StatusCode::OK, &self)
    }
}

#[derive(Debug, Serialize)]
pub struct CountBody {
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ChannelUsersBody {
    pub count: usize,
    pub users: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct OnlineBody {
    pub online: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_body_is_flattened_after_status() {
        let text = serde_json::to_string(&ok(CountBody { count: 3 })).unwrap();
        assert_eq!(text, r#"{"status":"ok","count":3}"#);
    }

    #[tokio::test]
    async fn test_json_line_appends_newline() {
        let response = json_line(StatusCode::UNAUTHORIZED, &serde_json::json!({"status": "error"}));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"{\"status\":\"error\"}\n");
    }
}
