//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicUsize, Ordering},
};

use axum::{
    Json, Router,
    body::Body,
    http::{Request, StatusCode, header},
    routing::post,
};
use hmac::{Hmac, Mac};
use serde_json::{Value, json};
use sha2::Sha256;
use tower::ServiceExt;

pub use unimarket::db::{AppState, DbPool, create_memory_pool, queries};
pub use unimarket::models::*;
use unimarket::payments::{StripeClient, StripeConfig};
use unimarket::session::{SESSION_COOKIE, SessionKeys};

pub const BASE_URL: &str = "http://shop.test";
pub const WEBHOOK_SECRET: &str = "whsec_test_secret";
pub const SESSION_SECRET: &str = "test-session-secret";

/// Local stand-in for the Stripe API.
pub struct FakeStripe {
    pub base_url: String,
    requests: Arc<AtomicUsize>,
    last_form: Arc<Mutex<Option<String>>>,
}

impl FakeStripe {
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Raw form body of the most recent session request.
    pub fn last_form(&self) -> Option<String> {
        self.last_form.lock().unwrap().clone()
    }
}

/// Start a fake `POST /v1/checkout/sessions` on an ephemeral port. With
/// `fail` set every request answers 500.
pub async fn spawn_fake_stripe(fail: bool) -> FakeStripe {
    let requests = Arc::new(AtomicUsize::new(0));
    let last_form = Arc::new(Mutex::new(None));

    let counter = requests.clone();
    let recorder = last_form.clone();
    let app = Router::new().route(
        "/v1/checkout/sessions",
        post(move |body: String| {
            let counter = counter.clone();
            let recorder = recorder.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                *recorder.lock().unwrap() = Some(body);
                if fail {
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        Json(json!({ "error": { "message": "simulated outage" } })),
                    )
                } else {
                    (
                        StatusCode::OK,
                        Json(json!({
                            "id": format!("cs_test_{}", n),
                            "url": format!("https://checkout.stripe.test/pay/cs_test_{}", n),
                        })),
                    )
                }
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    FakeStripe {
        base_url: format!("http://{}", addr),
        requests,
        last_form,
    }
}

pub fn create_test_app_state_with(db: DbPool, stripe_api_base: &str) -> AppState {
    AppState {
        db,
        base_url: BASE_URL.to_string(),
        stripe: StripeClient::new(&StripeConfig {
            secret_key: "sk_test_123".to_string(),
            webhook_secret: WEBHOOK_SECRET.to_string(),
            api_base: stripe_api_base.to_string(),
        }),
        sessions: SessionKeys::new(SESSION_SECRET),
        dev_mode: false,
    }
}

/// State over a fresh in-memory database. Stripe calls go nowhere unless a
/// fake is passed via `create_test_app_state_with`.
pub fn create_test_app_state() -> AppState {
    create_test_app_state_with(create_memory_pool().unwrap(), "http://127.0.0.1:9")
}

pub fn app(state: AppState) -> Router {
    unimarket::app(state)
}

// ============ Fixtures ============

pub fn create_test_user(state: &AppState, name: &str, role: UserRole) -> User {
    let conn = state.db.get().unwrap();
    queries::create_user(
        &conn,
        &CreateUser {
            email: format!("{}@uni.test", name.to_lowercase()),
            name: name.to_string(),
            role,
        },
    )
    .unwrap()
}

pub fn create_test_product(state: &AppState, seller_id: &str, title: &str, price_cents: i64) -> Product {
    let conn = state.db.get().unwrap();
    queries::create_product(
        &conn,
        &CreateProduct {
            seller_id: seller_id.to_string(),
            title: title.to_string(),
            price_cents,
            images: vec![format!("/uploads/{}.jpg", title.to_lowercase())],
            status: ProductStatus::Approved,
        },
    )
    .unwrap()
}

/// `Cookie` header value signing in `user_id`.
pub fn session_cookie(state: &AppState, user_id: &str) -> String {
    format!("{}={}", SESSION_COOKIE, state.sessions.issue(user_id).unwrap())
}

pub fn count_orders(state: &AppState) -> i64 {
    let conn = state.db.get().unwrap();
    queries::count_orders(&conn).unwrap()
}

// ============ Webhooks ============

pub fn sign_webhook_at(payload: &str, timestamp: i64, secret: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

pub fn sign_webhook(payload: &str) -> String {
    sign_webhook_at(payload, chrono::Utc::now().timestamp(), WEBHOOK_SECRET)
}

pub fn checkout_event(event_type: &str, session: Value) -> String {
    json!({
        "id": format!("evt_{}", uuid::Uuid::new_v4().simple()),
        "type": event_type,
        "data": { "object": session },
    })
    .to_string()
}

pub async fn post_webhook(state: &AppState, payload: String, signature: Option<String>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(sig) = signature {
        builder = builder.header("stripe-signature", sig);
    }
    send(state, builder.body(Body::from(payload)).unwrap()).await
}

// ============ Requests ============

pub async fn send(state: &AppState, request: Request<Body>) -> (StatusCode, Value) {
    let response = app(state.clone()).oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

pub async fn get_json(state: &AppState, uri: &str) -> (StatusCode, Value) {
    send(
        state,
        Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap(),
    )
    .await
}

pub async fn post_json(state: &AppState, uri: &str, body: Value, cookie: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    send(state, builder.body(Body::from(body.to_string())).unwrap()).await
}
