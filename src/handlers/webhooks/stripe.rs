use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::db::queries::{self, Materialization, PaidCheckout};
use crate::db::AppState;
use crate::models::NewOrderItem;
use crate::payments::{PAYMENT_METHOD_STRIPE, StripeCheckoutSession, StripeWebhookEvent};

/// Outcome of processing one event: either acknowledge it or refuse it as malformed.
enum Outcome {
    Received,
    Rejected(&'static str),
}

impl IntoResponse for Outcome {
    fn into_response(self) -> Response {
        match self {
            Outcome::Received => (StatusCode::OK, Json(json!({ "received": true }))).into_response(),
            Outcome::Rejected(reason) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": reason }))).into_response()
            }
        }
    }
}

/// Receives Stripe events. Only signed events are processed; once an event is
/// verified it is acknowledged even if recording it fails, so persistence
/// errors are logged rather than retried by Stripe.
pub async fn handle_stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = match headers.get("stripe-signature") {
        Some(sig) => match sig.to_str() {
            Ok(s) => s.to_string(),
            Err(_) => return Outcome::Rejected("Invalid signature header").into_response(),
        },
        None => return Outcome::Rejected("Missing stripe-signature header").into_response(),
    };

    match state.stripe.verify_webhook_signature(&body, &signature) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("Rejected Stripe webhook with invalid signature");
            return Outcome::Rejected("Invalid signature").into_response();
        }
        Err(e) => {
            tracing::warn!("Rejected Stripe webhook with malformed signature header: {}", e);
            return Outcome::Rejected("Invalid signature").into_response();
        }
    }

    let event: StripeWebhookEvent = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Failed to parse Stripe webhook: {}", e);
            return Outcome::Rejected("Invalid JSON").into_response();
        }
    };

    let outcome = match event.event_type.as_str() {
        "checkout.session.completed" | "checkout.session.async_payment_succeeded" => {
            handle_checkout_paid(&state, &event)
        }
        "checkout.session.expired" | "checkout.session.async_payment_failed" => {
            handle_checkout_abandoned(&state, &event)
        }
        other => {
            tracing::debug!("Ignoring Stripe event {:?} ({})", event.id, other);
            Outcome::Received
        }
    };

    outcome.into_response()
}

fn parse_session(event: &StripeWebhookEvent) -> Result<StripeCheckoutSession, Outcome> {
    serde_json::from_value(event.data.object.clone()).map_err(|e| {
        tracing::error!("Failed to parse checkout session in event {:?}: {}", event.id, e);
        Outcome::Rejected("Invalid checkout session")
    })
}

/// Record a paid checkout as exactly one completed order.
fn handle_checkout_paid(state: &AppState, event: &StripeWebhookEvent) -> Outcome {
    let session = match parse_session(event) {
        Ok(s) => s,
        Err(outcome) => return outcome,
    };

    if !session.is_paid() {
        tracing::info!(
            "Checkout session {} completed with payment status {:?}, waiting for payment",
            session.id,
            session.payment_status
        );
        return Outcome::Received;
    }

    let metadata = session.metadata();
    let Some(buyer_id) = metadata.buyer_id.clone().filter(|id| !id.is_empty()) else {
        tracing::error!("Checkout session {} is missing buyerId metadata", session.id);
        return Outcome::Rejected("Missing required metadata");
    };
    let order_id = metadata
        .order_id
        .clone()
        .or_else(|| session.client_reference_id.clone())
        .filter(|id| !id.is_empty());

    let items: Vec<NewOrderItem> = match metadata.cart_entries() {
        None => Vec::new(),
        Some(Ok(entries)) => {
            match entries.iter().map(|e| e.to_order_item()).collect::<Option<Vec<_>>>() {
                Some(items) => items,
                None => {
                    tracing::error!("Checkout session {} carries an invalid cart line", session.id);
                    return Outcome::Rejected("Invalid cartData");
                }
            }
        }
        Some(Err(e)) => {
            tracing::error!("Checkout session {} has unreadable cartData: {}", session.id, e);
            return Outcome::Rejected("Invalid cartData");
        }
    };

    let overflows = items
        .iter()
        .try_fold(0i64, |acc, item| acc.checked_add(item.line_total_cents()?))
        .is_none();
    if overflows {
        tracing::error!("Checkout session {} carries cart lines whose total overflows", session.id);
        return Outcome::Rejected("Invalid cartData");
    }

    if order_id.is_none() && items.is_empty() {
        tracing::error!(
            "Checkout session {} names neither an order nor cart contents",
            session.id
        );
        return Outcome::Rejected("Missing required metadata");
    }

    let paid = PaidCheckout {
        session_id: session.id.clone(),
        buyer_id,
        order_id,
        items,
        amount_total_cents: session.amount_total,
        payment_method: PAYMENT_METHOD_STRIPE.to_string(),
    };

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error recording session {}: {}", session.id, e);
            return Outcome::Received;
        }
    };

    match queries::materialize_paid_checkout(&mut conn, &paid) {
        Ok(Materialization::Completed(order)) => tracing::info!(
            "Order {} completed by checkout session {} ({} cents)",
            order.id,
            session.id,
            order.total_cents
        ),
        Ok(Materialization::Created(order)) => tracing::info!(
            "Order {} created from checkout session {} ({} cents)",
            order.id,
            session.id,
            order.total_cents
        ),
        Ok(Materialization::AlreadyProcessed(order)) => tracing::info!(
            "Checkout session {} already recorded as order {}",
            session.id,
            order.id
        ),
        Ok(Materialization::Rejected(reason)) => {
            tracing::warn!("Ignoring checkout session {}: {}", session.id, reason)
        }
        Err(e) => tracing::error!("Failed to record checkout session {}: {}", session.id, e),
    }

    Outcome::Received
}

/// Cancel the pending order behind an expired or failed checkout.
fn handle_checkout_abandoned(state: &AppState, event: &StripeWebhookEvent) -> Outcome {
    let session = match parse_session(event) {
        Ok(s) => s,
        Err(outcome) => return outcome,
    };

    let conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error cancelling session {}: {}", session.id, e);
            return Outcome::Received;
        }
    };

    let metadata = session.metadata();
    let order_id = match metadata.order_id.or_else(|| session.client_reference_id.clone()) {
        Some(id) => Some(id),
        None => match queries::get_order_by_session(&conn, &session.id) {
            Ok(order) => order.map(|o| o.id),
            Err(e) => {
                tracing::error!("Failed to look up order for session {}: {}", session.id, e);
                return Outcome::Received;
            }
        },
    };

    let Some(order_id) = order_id else {
        tracing::debug!("No order recorded for abandoned session {}", session.id);
        return Outcome::Received;
    };

    match queries::cancel_pending_order(&conn, &order_id) {
        Ok(true) => tracing::info!(
            "Order {} cancelled after {} for session {}",
            order_id,
            event.event_type,
            session.id
        ),
        Ok(false) => tracing::debug!("Order {} was not pending, nothing to cancel", order_id),
        Err(e) => tracing::warn!("Could not cancel order {}: {}", order_id, e),
    }

    Outcome::Received
}
