use axum::{Extension, extract::State};
use serde::{Deserialize, Serialize};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::SessionUser;
use crate::models::{
    CheckoutLineItem, CreateOrder, NewOrderItem, OrderStatus, PaymentSessionMetadata,
    ProductStatus, encode_cart_data,
};
use crate::payments::{CheckoutSessionRequest, PAYMENT_METHOD_STRIPE, StripeLineItem};
use crate::util::{append_query_params, dollars_to_cents};

/// Cart snapshot submitted by the storefront.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(default)]
    pub items: Vec<CheckoutLineItem>,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    /// Hosted payment page to redirect the buyer to
    pub url: String,
    pub order_id: String,
}

/// Merge repeated product lines and reject quantities below 1.
fn normalize_lines(items: Vec<CheckoutLineItem>) -> Result<Vec<CheckoutLineItem>> {
    if items.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let mut merged: Vec<CheckoutLineItem> = Vec::with_capacity(items.len());
    for item in items {
        if item.product_id.trim().is_empty() {
            return Err(AppError::BadRequest("Cart item is missing a product id".into()));
        }
        if item.quantity < 1 {
            return Err(AppError::BadRequest(format!(
                "Invalid quantity {} for product {}",
                item.quantity, item.product_id
            )));
        }
        match merged.iter_mut().find(|m| m.product_id == item.product_id) {
            Some(existing) => {
                existing.quantity = existing.quantity.checked_add(item.quantity).ok_or_else(|| {
                    AppError::BadRequest(format!("Quantity too large for product {}", item.product_id))
                })?;
            }
            None => merged.push(item),
        }
    }
    Ok(merged)
}

/// Stripe only accepts absolute image URLs; uploads are stored site-relative.
fn absolute_url(base_url: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("{}/{}", base_url, path.trim_start_matches('/'))
    }
}

/// Create a pending order for the cart and open a Stripe Checkout Session for it.
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Extension(session): Extension<SessionUser>,
    Json(request): Json<CheckoutRequest>,
) -> Result<Json<CheckoutResponse>> {
    let buyer = session.user;
    let lines = normalize_lines(request.items)?;

    // Resolve every line against the catalogue and record the pending order.
    // The connection is released before talking to Stripe.
    let (order, order_items, line_items) = {
        let mut conn = state.db.get()?;

        let mut order_items = Vec::with_capacity(lines.len());
        let mut line_items = Vec::with_capacity(lines.len());
        for line in &lines {
            let product = queries::get_product_by_id(&conn, &line.product_id)?
                .filter(|p| p.status == ProductStatus::Approved)
                .ok_or_else(|| {
                    AppError::BadRequest(format!("Product {} is not available", line.product_id))
                })?;

            if dollars_to_cents(line.unit_price) != Some(product.price_cents) {
                tracing::warn!(
                    "Cart price {} for product {} differs from catalogue price {} cents, charging catalogue price",
                    line.unit_price,
                    product.id,
                    product.price_cents
                );
            }

            order_items.push(NewOrderItem {
                product_id: product.id.clone(),
                seller_id: product.seller_id.clone(),
                quantity: line.quantity,
                price_cents: product.price_cents,
            });
            line_items.push(StripeLineItem {
                name: product.title.clone(),
                image_url: product
                    .images
                    .first()
                    .map(String::as_str)
                    .or_else(|| line.image_url())
                    .map(|img| absolute_url(&state.base_url, img)),
                unit_amount_cents: product.price_cents,
                quantity: line.quantity,
            });
        }

        let input = CreateOrder::from_items(
            buyer.id.clone(),
            OrderStatus::Pending,
            PAYMENT_METHOD_STRIPE,
            order_items.clone(),
        )
        .ok_or_else(|| AppError::BadRequest("Quantity too large for the order total".into()))?;
        let order = queries::create_order(&mut conn, &input)?;
        (order, order_items, line_items)
    };

    let checkout = CheckoutSessionRequest {
        line_items,
        success_url: append_query_params(
            &format!("{}/orders/{}", state.base_url, order.id),
            &[("success", "true")],
        ),
        cancel_url: append_query_params(
            &format!("{}/cart", state.base_url),
            &[("canceled", "true")],
        ),
        customer_email: Some(buyer.email.clone()),
        client_reference_id: Some(order.id.clone()),
        metadata: PaymentSessionMetadata {
            order_id: Some(order.id.clone()),
            buyer_id: Some(buyer.id.clone()),
            cart_data: encode_cart_data(&order_items),
        },
        idempotency_key: Some(format!("checkout-{}", order.id)),
    };

    let stripe_session = match state.stripe.create_checkout_session(&checkout).await {
        Ok(s) => s,
        Err(e) => {
            // Leave no pending order behind for a session that never existed
            match state.db.get() {
                Ok(conn) => {
                    if let Err(err) = queries::cancel_pending_order(&conn, &order.id) {
                        tracing::error!("Failed to cancel order {}: {}", order.id, err);
                    }
                }
                Err(err) => tracing::error!("DB connection error cancelling order {}: {}", order.id, err),
            }
            return Err(e);
        }
    };

    // The webhook can still find the order through metadata if this fails
    match state.db.get() {
        Ok(conn) => match queries::attach_checkout_session(&conn, &order.id, &stripe_session.id) {
            Ok(true) => {}
            Ok(false) => tracing::warn!(
                "Order {} left pending state before session {} was attached",
                order.id,
                stripe_session.id
            ),
            Err(e) => tracing::error!(
                "Failed to attach session {} to order {}: {}",
                stripe_session.id,
                order.id,
                e
            ),
        },
        Err(e) => tracing::error!("DB connection error attaching session to order {}: {}", order.id, e),
    }

    tracing::info!(
        "Opened checkout session {} for order {} ({} cents, buyer {})",
        stripe_session.id,
        order.id,
        order.total_cents,
        buyer.id
    );

    Ok(Json(CheckoutResponse {
        url: stripe_session.url,
        order_id: order.id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, quantity: i64) -> CheckoutLineItem {
        CheckoutLineItem {
            product_id: id.to_string(),
            title: id.to_uppercase(),
            unit_price: 10.0,
            quantity,
            images: Vec::new(),
        }
    }

    #[test]
    fn relative_images_are_made_absolute() {
        assert_eq!(absolute_url("https://shop.test", "/uploads/a.jpg"), "https://shop.test/uploads/a.jpg");
        assert_eq!(absolute_url("https://shop.test", "https://cdn.test/a.jpg"), "https://cdn.test/a.jpg");
    }

    #[test]
    fn empty_cart_is_rejected() {
        let err = normalize_lines(Vec::new()).unwrap_err();
        assert_eq!(err.to_string(), "Cart is empty");
    }

    #[test]
    fn repeated_products_are_merged() {
        let merged = normalize_lines(vec![line("p1", 1), line("p2", 2), line("p1", 3)]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].product_id, "p1");
        assert_eq!(merged[0].quantity, 4);
        assert_eq!(merged[1].quantity, 2);
    }

    #[test]
    fn non_positive_quantities_are_rejected() {
        assert!(matches!(
            normalize_lines(vec![line("p1", 0)]),
            Err(AppError::BadRequest(_))
        ));
        assert!(matches!(
            normalize_lines(vec![line("p1", 2), line("p2", -1)]),
            Err(AppError::BadRequest(_))
        ));
    }
}
