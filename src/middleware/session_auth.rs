use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::User;
use crate::session::SESSION_COOKIE;

/// The signed-in user, inserted into request extensions by `require_session`.
#[derive(Debug, Clone)]
pub struct SessionUser {
    pub user: User,
}

pub async fn require_session(
    State(state): State<AppState>,
    jar: CookieJar,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let token = jar
        .get(SESSION_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or_else(|| AppError::Unauthorized("Unauthorized".into()))?;

    let user_id = state
        .sessions
        .verify(&token)
        .ok_or_else(|| AppError::Unauthorized("Unauthorized".into()))?;

    // Scoped so the connection is back in the pool before the handler runs
    let user = {
        let conn = state.db.get()?;
        queries::get_user_by_id(&conn, &user_id)?
    }
    .ok_or_else(|| AppError::Unauthorized("Unauthorized".into()))?;

    request.extensions_mut().insert(SessionUser { user });

    Ok(next.run(request).await)
}
