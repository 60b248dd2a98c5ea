use axum::{Router, extract::State, routing::get};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::models::{OrderDetail, OrderFilter};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/orders", get(list_orders))
        .route("/api/orders/{id}", get(get_order))
}

/// Order with its buyer, items, products and sellers.
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderDetail>> {
    let conn = state.db.get()?;
    let order = queries::get_order_detail(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;
    Ok(Json(order))
}

/// Orders newest first, filtered by `buyerId` and/or `sellerId`.
pub async fn list_orders(
    State(state): State<AppState>,
    Query(filter): Query<OrderFilter>,
) -> Result<Json<Vec<OrderDetail>>> {
    // `?buyerId=` means no filter, not "buyer with an empty id"
    let filter = OrderFilter {
        buyer_id: filter.buyer_id.filter(|v| !v.is_empty()),
        seller_id: filter.seller_id.filter(|v| !v.is_empty()),
    };
    let conn = state.db.get()?;
    let orders = queries::list_order_details(&conn, &filter)?;
    Ok(Json(orders))
}
