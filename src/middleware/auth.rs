use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::db::{queries, AppState};
use crate::models::User;
use crate::util::extract_bearer_token;

/// Authenticated user attached to the request by the auth middleware.
#[derive(Clone)]
pub struct UserContext {
    pub user: User,
}

/// Authenticate from the bearer session token.
fn authenticate_from_request(state: &AppState, headers: &HeaderMap) -> Result<User, StatusCode> {
    let token = extract_bearer_token(headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let conn = state
        .db
        .get()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    queries::get_user_by_session_token(&conn, token)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::UNAUTHORIZED)
}

pub async fn user_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let user = authenticate_from_request(&state, request.headers())?;

    request.extensions_mut().insert(UserContext { user });
    Ok(next.run(request).await)
}

pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let user = authenticate_from_request(&state, request.headers())?;

    if !user.is_admin {
        return Err(StatusCode::FORBIDDEN);
    }

    request.extensions_mut().insert(UserContext { user });
    Ok(next.run(request).await)
}
