//! API layer - HTTP control surface for backends.

mod body;
mod channel;
mod health;
mod metrics;
mod response;
mod routes;
mod user;

pub use body::MessageBody;
pub use channel::{channel_users, publish_to_channel};
pub use health::health;
pub use metrics::prometheus_metrics;
pub use response::{json_line, ok, ChannelUsersBody, CountBody, OkResponse, OnlineBody};
pub use routes::api_routes;
pub use user::{disconnect_user, send_to_user, user_count, user_online};
