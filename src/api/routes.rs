use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};

use crate::server::{secret_key_auth, AppState};

use super::channel::{channel_users, publish_to_channel};
use super::health::health;
use super::metrics::prometheus_metrics;
use super::user::{disconnect_user, send_to_user, user_count, user_online};

pub fn api_routes(state: AppState) -> Router<AppState> {
    let body_limit = DefaultBodyLimit::max(state.settings.api.max_body_bytes);

    // Every route under /{apikey}/ requires the secret key header; the body
    // limit is only enforced once the handler reads the body, after auth
    let authenticated = Router::new()
        .route(
            "/{apikey}/channel/{channel}/",
            post(publish_to_channel).get(channel_users),
        )
        .route("/{apikey}/count/", get(user_count))
        .route(
            "/{apikey}/user/{user}/",
            get(user_online).post(send_to_user).delete(disconnect_user),
        )
        .route_layer(middleware::from_fn_with_state(state, secret_key_auth))
        .layer(body_limit);

    Router::new()
        // Health & Metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .merge(authenticated)
}
