//! Channel endpoints: publish and membership.

use axum::{extract::Path, Extension};
use serde::Deserialize;

use crate::error::Result;
use crate::server::AuthContext;

use super::body::MessageBody;
use super::response::{ok, ChannelUsersBody, CountBody, OkResponse};

#[derive(Debug, Deserialize)]
pub struct ChannelPath {
    pub channel: String,
}

/// POST /{apikey}/channel/{channel}/ - publish the raw body to a channel
pub async fn publish_to_channel(
    Extension(auth): Extension<AuthContext>,
    Path(path): Path<ChannelPath>,
    MessageBody(body): MessageBody,
) -> Result<OkResponse<CountBody>> {
    let count = auth.messenger.send_to_channel(&path.channel, body).await?;

    tracing::debug!(channel = %path.channel, count, "Message has been sent to channel members");

    Ok(ok(CountBody { count }))
}

/// GET /{apikey}/channel/{channel}/ - users currently in a channel
pub async fn channel_users(
    Extension(auth): Extension<AuthContext>,
    Path(path): Path<ChannelPath>,
) -> OkResponse<ChannelUsersBody> {
    ok(ChannelUsersBody {
        count: auth.messenger.get_channel_member_count(&path.channel),
        users: auth.messenger.get_users_in_channel(&path.channel),
    })
}
