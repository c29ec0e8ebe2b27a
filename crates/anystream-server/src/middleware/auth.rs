//! API-key authentication.
//!
//! With auth disabled every request runs as the anonymous user. With it
//! enabled the configured key must arrive as `Authorization: Bearer <key>`
//! or an `api_key` query parameter (browsers cannot set headers on
//! WebSocket upgrades). The resolved [`UserId`] is inserted into request
//! extensions.

use anystream_core::config::AuthConfig;
use anystream_core::{Error, UserId};
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;

/// Resolve the caller from the raw header and query values.
pub fn authenticate(
    auth: &AuthConfig,
    authorization: Option<&str>,
    query: Option<&str>,
) -> Option<UserId> {
    if !auth.enabled {
        return Some(UserId::anonymous());
    }
    let expected = auth.api_key.as_deref().filter(|k| !k.is_empty())?;

    let bearer = authorization.and_then(|v| v.strip_prefix("Bearer "));
    let from_query = query.and_then(api_key_param);

    let matched = [bearer, from_query.as_deref()]
        .into_iter()
        .flatten()
        .any(|presented| presented == expected);
    matched.then(UserId::anonymous)
}

fn api_key_param(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == "api_key").then(|| value.to_string())
    })
}

/// Applied to every protected route.
pub async fn auth_middleware(
    State(ctx): State<AppContext>,
    mut request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let authorization = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let user = authenticate(&ctx.config.auth, authorization, request.uri().query());
    match user {
        Some(user_id) => {
            request.extensions_mut().insert(user_id);
            next.run(request).await
        }
        None => {
            let mut error = AppError::new(Error::Unauthorized("authentication required".into()));
            if let Some(RequestId(id)) = request.extensions().get::<RequestId>() {
                error = error.with_request_id(id.clone());
            }
            error.into_response()
        }
    }
}
