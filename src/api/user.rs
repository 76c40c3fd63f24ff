//! User endpoints: online count, presence, direct messages, forced logout.

use axum::{
    extract::Path,
    http::StatusCode,
    response::{IntoResponse, Response},
    Extension,
};
use serde::Deserialize;

use crate::error::{AppError, Result};
use crate::server::AuthContext;

use super::body::MessageBody;
use super::response::{ok, CountBody, OkResponse, OnlineBody};

#[derive(Debug, Deserialize)]
pub struct UserPath {
    pub user: String,
}

/// GET /{apikey}/count/ - number of connected clients
pub async fn user_count(Extension(auth): Extension<AuthContext>) -> OkResponse<CountBody> {
    ok(CountBody {
        count: auth.messenger.get_user_count(),
    })
}

/// GET /{apikey}/user/{user}/ - whether the user has a live connection
pub async fn user_online(
    Extension(auth): Extension<AuthContext>,
    Path(path): Path<UserPath>,
) -> OkResponse<OnlineBody> {
    ok(OnlineBody {
        online: auth.messenger.is_user_online(&path.user),
    })
}

/// POST /{apikey}/user/{user}/ - send the raw body to every connection of a user
pub async fn send_to_user(
    Extension(auth): Extension<AuthContext>,
    Path(path): Path<UserPath>,
    MessageBody(body): MessageBody,
) -> Result<OkResponse<CountBody>> {
    let count = auth.messenger.send_to_user(&path.user, body).await?;
    Ok(ok(CountBody { count }))
}

/// DELETE /{apikey}/user/{user}/ - drop every connection of a user
pub async fn disconnect_user(
    Extension(auth): Extension<AuthContext>,
    Path(path): Path<UserPath>,
) -> Result<Response> {
    if auth.messenger.disconnect_user(&path.user).await == 0 {
        return Err(AppError::NotFound("User not online.".to_string()));
    }
    Ok(StatusCode::NO_CONTENT.into_response())
}
