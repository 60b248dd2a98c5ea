//! Seeding endpoints, mounted only when `UNIMARKET_ENV=dev`.

use axum::{Router, extract::State, routing::post};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::models::{CreateProduct, CreateUser, Product, User};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dev/users", post(create_dev_user))
        .route("/dev/products", post(create_dev_product))
        .route("/dev/session", post(create_dev_session))
}

pub async fn create_dev_user(
    State(state): State<AppState>,
    Json(input): Json<CreateUser>,
) -> Result<Json<User>> {
    if input.email.trim().is_empty() {
        return Err(AppError::BadRequest("email is required".into()));
    }
    let conn = state.db.get()?;
    let user = queries::create_user(&conn, &input)?;
    tracing::info!("DEV: Created {} {} ({})", user.role.as_ref(), user.id, user.email);
    Ok(Json(user))
}

pub async fn create_dev_product(
    State(state): State<AppState>,
    Json(input): Json<CreateProduct>,
) -> Result<Json<Product>> {
    let conn = state.db.get()?;
    queries::get_user_by_id(&conn, &input.seller_id)?
        .ok_or_else(|| AppError::NotFound("Seller not found".into()))?;
    let product = queries::create_product(&conn, &input)?;
    tracing::info!(
        "DEV: Created product {} ({}, {} cents) for seller {}",
        product.id,
        product.title,
        product.price_cents,
        product.seller_id
    );
    Ok(Json(product))
}

#[derive(Debug, Deserialize)]
pub struct DevSessionRequest {
    pub user_id: String,
}

/// Sign in as any existing user by setting the session cookie.
pub async fn create_dev_session(
    State(state): State<AppState>,
    jar: CookieJar,
    Json(input): Json<DevSessionRequest>,
) -> Result<(CookieJar, Json<User>)> {
    let user = {
        let conn = state.db.get()?;
        queries::get_user_by_id(&conn, &input.user_id)?
    }
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let cookie = state.sessions.cookie(&user.id)?;
    tracing::info!("DEV: Signed in as {}", user.id);
    Ok((jar.add(cookie), Json(user)))
}
