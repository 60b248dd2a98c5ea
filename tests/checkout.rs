//! POST /api/checkout_session

use serde_json::json;

mod common;
use common::*;

fn cart_line(product: &Product, quantity: i64) -> serde_json::Value {
    json!({
        "id": product.id,
        "title": product.title,
        "price": product.price_cents as f64 / 100.0,
        "quantity": quantity,
        "images": product.images,
    })
}

#[tokio::test]
async fn checkout_requires_a_session() {
    let stripe = spawn_fake_stripe(false).await;
    let state = create_test_app_state_with(create_memory_pool().unwrap(), &stripe.base_url);
    let seller = create_test_user(&state, "Sam", UserRole::Seller);
    let product = create_test_product(&state, &seller.id, "Lamp", 1000);

    let (status, body) = post_json(
        &state,
        "/api/checkout_session",
        json!({ "items": [cart_line(&product, 1)] }),
        None,
    )
    .await;
    assert_eq!(status, 401);
    assert_eq!(body["error"], "Unauthorized");

    let (status, _) = post_json(
        &state,
        "/api/checkout_session",
        json!({ "items": [cart_line(&product, 1)] }),
        Some("marketplace_session=forged.token.value"),
    )
    .await;
    assert_eq!(status, 401);

    assert_eq!(count_orders(&state), 0);
    assert_eq!(stripe.request_count(), 0);
}

#[tokio::test]
async fn empty_cart_is_rejected_without_writes() {
    let stripe = spawn_fake_stripe(false).await;
    let state = create_test_app_state_with(create_memory_pool().unwrap(), &stripe.base_url);
    let buyer = create_test_user(&state, "Bea", UserRole::Buyer);
    let cookie = session_cookie(&state, &buyer.id);

    let (status, body) =
        post_json(&state, "/api/checkout_session", json!({ "items": [] }), Some(&cookie)).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "Cart is empty");
    assert_eq!(count_orders(&state), 0);
    assert_eq!(stripe.request_count(), 0);
}

#[tokio::test]
async fn checkout_creates_pending_order_and_returns_redirect() {
    let stripe = spawn_fake_stripe(false).await;
    let state = create_test_app_state_with(create_memory_pool().unwrap(), &stripe.base_url);
    let seller = create_test_user(&state, "Sam", UserRole::Seller);
    let other_seller = create_test_user(&state, "Sue", UserRole::Seller);
    let buyer = create_test_user(&state, "Bea", UserRole::Buyer);
    let lamp = create_test_product(&state, &seller.id, "Lamp", 1000);
    let desk = create_test_product(&state, &other_seller.id, "Desk", 4550);
    let cookie = session_cookie(&state, &buyer.id);

    let (status, body) = post_json(
        &state,
        "/api/checkout_session",
        json!({ "items": [cart_line(&lamp, 2), cart_line(&desk, 1)] }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["url"], "https://checkout.stripe.test/pay/cs_test_1");
    assert_eq!(stripe.request_count(), 1);

    let order_id = body["order_id"].as_str().unwrap();
    let conn = state.db.get().unwrap();
    let order = queries::get_order_by_id(&conn, order_id).unwrap().unwrap();
    assert_eq!(order.buyer_id, buyer.id);
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.total_cents, 2 * 1000 + 4550);
    assert_eq!(order.payment_method, "stripe");
    assert_eq!(order.stripe_session_id.as_deref(), Some("cs_test_1"));

    let items = queries::list_order_items(&conn, order_id).unwrap();
    assert_eq!(items.len(), 2);
    let lamp_item = items.iter().find(|i| i.product_id == lamp.id).unwrap();
    assert_eq!(lamp_item.seller_id, seller.id);
    assert_eq!(lamp_item.quantity, 2);
    assert_eq!(lamp_item.price_cents, 1000);
    let desk_item = items.iter().find(|i| i.product_id == desk.id).unwrap();
    assert_eq!(desk_item.seller_id, other_seller.id);

    let form = stripe.last_form().unwrap();
    assert!(form.contains("mode=payment"));
    assert!(form.contains(&format!("metadata%5BorderId%5D={}", order_id)));
    assert!(form.contains(&format!("metadata%5BbuyerId%5D={}", buyer.id)));
    assert!(form.contains("unit_amount%5D=4550"));
    assert!(form.contains("canceled%3Dtrue"));
}

#[tokio::test]
async fn checkout_charges_catalogue_price() {
    let stripe = spawn_fake_stripe(false).await;
    let state = create_test_app_state_with(create_memory_pool().unwrap(), &stripe.base_url);
    let seller = create_test_user(&state, "Sam", UserRole::Seller);
    let buyer = create_test_user(&state, "Bea", UserRole::Buyer);
    let lamp = create_test_product(&state, &seller.id, "Lamp", 1000);
    let cookie = session_cookie(&state, &buyer.id);

    let mut tampered = cart_line(&lamp, 1);
    tampered["price"] = json!(0.01);
    let (status, body) = post_json(
        &state,
        "/api/checkout_session",
        json!({ "items": [tampered] }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, 200, "{}", body);

    let conn = state.db.get().unwrap();
    let order = queries::get_order_by_id(&conn, body["order_id"].as_str().unwrap())
        .unwrap()
        .unwrap();
    assert_eq!(order.total_cents, 1000);
}

#[tokio::test]
async fn unknown_or_unapproved_products_are_rejected() {
    let stripe = spawn_fake_stripe(false).await;
    let state = create_test_app_state_with(create_memory_pool().unwrap(), &stripe.base_url);
    let seller = create_test_user(&state, "Sam", UserRole::Seller);
    let buyer = create_test_user(&state, "Bea", UserRole::Buyer);
    let cookie = session_cookie(&state, &buyer.id);

    let pending = {
        let conn = state.db.get().unwrap();
        queries::create_product(
            &conn,
            &CreateProduct {
                seller_id: seller.id.clone(),
                title: "Unreviewed".into(),
                price_cents: 500,
                images: Vec::new(),
                status: ProductStatus::Pending,
            },
        )
        .unwrap()
    };

    let (status, _) = post_json(
        &state,
        "/api/checkout_session",
        json!({ "items": [cart_line(&pending, 1)] }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, 400);

    let (status, _) = post_json(
        &state,
        "/api/checkout_session",
        json!({ "items": [{ "id": "missing", "title": "Ghost", "price": 1.0, "quantity": 1 }] }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, 400);

    assert_eq!(count_orders(&state), 0);
    assert_eq!(stripe.request_count(), 0);
}

#[tokio::test]
async fn stripe_failure_cancels_the_pending_order() {
    let stripe = spawn_fake_stripe(true).await;
    let state = create_test_app_state_with(create_memory_pool().unwrap(), &stripe.base_url);
    let seller = create_test_user(&state, "Sam", UserRole::Seller);
    let buyer = create_test_user(&state, "Bea", UserRole::Buyer);
    let lamp = create_test_product(&state, &seller.id, "Lamp", 1000);
    let cookie = session_cookie(&state, &buyer.id);

    let (status, body) = post_json(
        &state,
        "/api/checkout_session",
        json!({ "items": [cart_line(&lamp, 1)] }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, 500);
    assert_eq!(body["error"], "Could not create the payment session");
    assert_eq!(stripe.request_count(), 1);

    let orders = {
        let conn = state.db.get().unwrap();
        queries::list_order_details(&conn, &OrderFilter::default()).unwrap()
    };
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].order.status, OrderStatus::Cancelled);
    assert!(orders[0].order.stripe_session_id.is_none());
}

#[tokio::test]
async fn quantity_overflowing_the_total_is_rejected() {
    let stripe = spawn_fake_stripe(false).await;
    let state = create_test_app_state_with(create_memory_pool().unwrap(), &stripe.base_url);
    let seller = create_test_user(&state, "Sam", UserRole::Seller);
    let buyer = create_test_user(&state, "Bea", UserRole::Buyer);
    let lamp = create_test_product(&state, &seller.id, "Lamp", 1000);
    let desk = create_test_product(&state, &seller.id, "Desk", 1);
    let cookie = session_cookie(&state, &buyer.id);

    // 1000 * (2^61 + 1) does not fit in i64
    let (status, body) = post_json(
        &state,
        "/api/checkout_session",
        json!({ "items": [cart_line(&lamp, 2_305_843_009_213_693_953_i64)] }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, 400, "{}", body);

    // Each line fits on its own, the sum does not
    let (status, _) = post_json(
        &state,
        "/api/checkout_session",
        json!({ "items": [cart_line(&desk, i64::MAX), cart_line(&lamp, 1)] }),
        Some(&cookie),
    )
    .await;
    assert_eq!(status, 400);

    assert_eq!(count_orders(&state), 0);
    assert_eq!(stripe.request_count(), 0);
}
