use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use serde::Deserialize;

use super::AppState;
use crate::error::AppError;
use crate::messenger::Messenger;
use crate::sorting_station::SortingStation;

/// Header carrying the application's apisecret
pub const SECRET_KEY_HEADER: &str = "X-Thunder-Secret-Key";

/// Resolved caller identity, inserted into request extensions by [`secret_key_auth`]
#[derive(Clone)]
pub struct AuthContext {
    pub messenger: Arc<Messenger>,
}

#[derive(Debug, Deserialize)]
pub struct ApiKeyPath {
    pub apikey: String,
}

/// Secret key authentication middleware.
///
/// Runs on every `/{apikey}/...` route: header present, apikey known,
/// secret matches. Any failed step answers with the error response and the
/// handler never runs.
pub async fn secret_key_auth(
    State(state): State<AppState>,
    Path(path): Path<ApiKeyPath>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let context = authorize(&state.sorting_station, &path.apikey, req.headers())?;
    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

/// Unknown apikeys and wrong secrets produce the same error
pub fn authorize(
    station: &SortingStation,
    apikey: &str,
    headers: &HeaderMap,
) -> Result<AuthContext, AppError> {
    let provided = headers
        .get(SECRET_KEY_HEADER)
        .ok_or(AppError::MissingSecret)?
        .to_str()
        .map_err(|_| AppError::Unauthorized)?;

    let messenger = station
        .get_messenger_by_apikey(apikey)
        .ok_or(AppError::Unauthorized)?;

    if !messenger.matches_secret(provided) {
        return Err(AppError::Unauthorized);
    }

    Ok(AuthContext { messenger })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeliveryConfig;
    use axum::http::HeaderValue;

    fn station() -> SortingStation {
        let station = SortingStation::new(DeliveryConfig::default());
        station.create_messenger("abc", "s3cret").unwrap();
        station
    }

    fn headers(secret: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(secret) = secret {
            headers.insert(SECRET_KEY_HEADER, HeaderValue::from_str(secret).unwrap());
        }
        headers
    }

    #[test]
    fn test_authorize_success() {
        let context = authorize(&station(), "abc", &headers(Some("s3cret"))).unwrap();
        assert_eq!(context.messenger.apikey(), "abc");
    }

    #[test]
    fn test_missing_header_wins_over_unknown_apikey() {
        let result = authorize(&station(), "unknown", &headers(None));
        assert!(matches!(result, Err(AppError::MissingSecret)));
    }

    #[test]
    fn test_unknown_apikey_and_wrong_secret_look_alike() {
        let station = station();
        assert!(matches!(
            authorize(&station, "unknown", &headers(Some("s3cret"))),
            Err(AppError::Unauthorized)
        ));
        assert!(matches!(
            authorize(&station, "abc", &headers(Some("wrong"))),
            Err(AppError::Unauthorized)
        ));
    }

    #[test]
    fn test_header_name_is_case_insensitive() {
        let mut headers = HeaderMap::new();
        headers.insert("x-thunder-secret-key", HeaderValue::from_static("s3cret"));
        assert!(authorize(&station(), "abc", &headers).is_ok());
    }
}
