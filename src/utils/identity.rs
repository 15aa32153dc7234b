// src/utils/identity.rs

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::Response,
};

use crate::error::AppError;

/// Header carrying the authenticated user id, set by the gateway in front
/// of this service.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Opaque identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentUser {
    pub id: String,
}

/// Axum Middleware: Identity.
///
/// Reads the user id header and injects `CurrentUser` into the request
/// extensions for handlers to use. Missing or blank ids get 401.
pub async fn identity_middleware(mut req: Request<Body>, next: Next) -> Result<Response, AppError> {
    let user_id = req
        .headers()
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .ok_or_else(|| AppError::AuthError("Missing or invalid user id".to_string()))?
        .to_string();

    req.extensions_mut().insert(CurrentUser { id: user_id });
    Ok(next.run(req).await)
}
