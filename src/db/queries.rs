use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior, params, params_from_iter, types::Value};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::*;

use super::from_row::{
    ORDER_COLS, ORDER_DETAIL_COLS, ORDER_ITEM_COLS, ORDER_ITEM_DETAIL_COLS, PRODUCT_COLS,
    USER_COLS, query_all, query_one,
};

fn now() -> i64 {
    Utc::now().timestamp()
}

fn gen_id() -> String {
    Uuid::new_v4().to_string()
}

/// Builder for dynamic UPDATE statements with optional fields and guards.
struct UpdateBuilder {
    table: &'static str,
    id: String,
    fields: Vec<(&'static str, Value)>,
    guards: Vec<(&'static str, Value)>,
    track_updated_at: bool,
}

impl UpdateBuilder {
    fn new(table: &'static str, id: &str) -> Self {
        Self {
            table,
            id: id.to_string(),
            fields: Vec::new(),
            guards: Vec::new(),
            track_updated_at: false,
        }
    }

    fn with_updated_at(mut self) -> Self {
        self.track_updated_at = true;
        self
    }

    fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.fields.push((column, value.into()));
        self
    }

    fn set_opt<V: Into<Value>>(self, column: &'static str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.set(column, v),
            None => self,
        }
    }

    /// Only update the row while `column` still equals `value`.
    fn where_eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.guards.push((column, value.into()));
        self
    }

    fn execute(mut self, conn: &Connection) -> Result<bool> {
        if self.fields.is_empty() {
            return Ok(false);
        }
        if self.track_updated_at {
            self.fields.push(("updated_at", now().into()));
        }
        let sets: Vec<String> = self
            .fields
            .iter()
            .map(|(col, _)| format!("{} = ?", col))
            .collect();
        let mut conditions = vec!["id = ?".to_string()];
        conditions.extend(self.guards.iter().map(|(col, _)| format!("{} = ?", col)));

        let mut values: Vec<Value> = self.fields.into_iter().map(|(_, v)| v).collect();
        values.push(self.id.into());
        values.extend(self.guards.into_iter().map(|(_, v)| v));

        let sql = format!(
            "UPDATE {} SET {} WHERE {}",
            self.table,
            sets.join(", "),
            conditions.join(" AND ")
        );
        let affected = conn.execute(&sql, params_from_iter(values))?;
        Ok(affected > 0)
    }
}

// ============ Users ============

pub fn create_user(conn: &Connection, input: &CreateUser) -> Result<User> {
    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO users (id, email, name, role, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![&id, &input.email, &input.name, input.role.as_ref(), now, now],
    )?;

    Ok(User {
        id,
        email: input.email.clone(),
        name: input.name.clone(),
        role: input.role,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_user_by_id(conn: &Connection, id: &str) -> Result<Option<User>> {
    query_one(
        conn,
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLS),
        [id],
    )
}

// ============ Products ============

pub fn create_product(conn: &Connection, input: &CreateProduct) -> Result<Product> {
    if input.price_cents < 0 {
        return Err(AppError::BadRequest("price_cents must not be negative".into()));
    }

    let id = gen_id();
    let now = now();
    let images = serde_json::to_string(&input.images)?;

    conn.execute(
        "INSERT INTO products (id, seller_id, title, price_cents, images, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            &input.seller_id,
            &input.title,
            input.price_cents,
            &images,
            input.status.as_ref(),
            now,
            now
        ],
    )?;

    Ok(Product {
        id,
        seller_id: input.seller_id.clone(),
        title: input.title.clone(),
        price_cents: input.price_cents,
        images: input.images.clone(),
        status: input.status,
        created_at: now,
        updated_at: now,
    })
}

pub fn get_product_by_id(conn: &Connection, id: &str) -> Result<Option<Product>> {
    query_one(
        conn,
        &format!("SELECT {} FROM products WHERE id = ?1", PRODUCT_COLS),
        [id],
    )
}

// ============ Orders ============

/// Insert an order and its items on whatever connection or transaction is given.
fn insert_order(conn: &Connection, input: &CreateOrder) -> Result<Order> {
    if input.items.is_empty() {
        return Err(AppError::BadRequest("An order needs at least one item".into()));
    }
    if let Some(bad) = input.items.iter().find(|i| i.quantity < 1) {
        return Err(AppError::BadRequest(format!(
            "Invalid quantity {} for product {}",
            bad.quantity, bad.product_id
        )));
    }
    if let Some(bad) = input.items.iter().find(|i| i.line_total_cents().is_none()) {
        return Err(AppError::BadRequest(format!(
            "Quantity too large for product {}",
            bad.product_id
        )));
    }

    let id = gen_id();
    let now = now();

    conn.execute(
        "INSERT INTO orders (id, buyer_id, total_cents, status, payment_method, stripe_session_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            &id,
            &input.buyer_id,
            input.total_cents,
            input.status.as_ref(),
            &input.payment_method,
            &input.stripe_session_id,
            now,
            now
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO order_items (id, order_id, product_id, seller_id, quantity, price_cents, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )?;
    for item in &input.items {
        stmt.execute(params![
            gen_id(),
            &id,
            &item.product_id,
            &item.seller_id,
            item.quantity,
            item.price_cents,
            now
        ])?;
    }

    Ok(Order {
        id,
        buyer_id: input.buyer_id.clone(),
        total_cents: input.total_cents,
        status: input.status,
        payment_method: input.payment_method.clone(),
        stripe_session_id: input.stripe_session_id.clone(),
        created_at: now,
        updated_at: now,
    })
}

/// Create an order together with all of its items. Either every row is
/// written or none is.
pub fn create_order(conn: &mut Connection, input: &CreateOrder) -> Result<Order> {
    let tx = conn.transaction()?;
    let order = insert_order(&tx, input)?;
    tx.commit()?;
    Ok(order)
}

pub fn get_order_by_id(conn: &Connection, id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE id = ?1", ORDER_COLS),
        [id],
    )
}

pub fn get_order_by_session(conn: &Connection, session_id: &str) -> Result<Option<Order>> {
    query_one(
        conn,
        &format!("SELECT {} FROM orders WHERE stripe_session_id = ?1", ORDER_COLS),
        [session_id],
    )
}

pub fn list_order_items(conn: &Connection, order_id: &str) -> Result<Vec<OrderItem>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_items WHERE order_id = ?1 ORDER BY created_at, id",
            ORDER_ITEM_COLS
        ),
        [order_id],
    )
}

pub fn count_orders(conn: &Connection) -> Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM orders", [], |row| row.get(0))?)
}

/// Record the Checkout Session created for a pending order.
pub fn attach_checkout_session(conn: &Connection, order_id: &str, session_id: &str) -> Result<bool> {
    UpdateBuilder::new("orders", order_id)
        .with_updated_at()
        .set("stripe_session_id", session_id.to_string())
        .where_eq("status", OrderStatus::Pending.as_ref().to_string())
        .execute(conn)
}

/// Move an order from `from` to `to`. Returns false if the order was not in
/// `from` any more (someone else moved it first).
pub fn transition_order_status(
    conn: &Connection,
    order_id: &str,
    from: OrderStatus,
    to: OrderStatus,
) -> Result<bool> {
    if !from.can_transition_to(to) {
        return Err(AppError::Conflict(format!(
            "Order status cannot change from {} to {}",
            from.as_ref(),
            to.as_ref()
        )));
    }
    UpdateBuilder::new("orders", order_id)
        .with_updated_at()
        .set("status", to.as_ref().to_string())
        .where_eq("status", from.as_ref().to_string())
        .execute(conn)
}

pub fn cancel_pending_order(conn: &Connection, order_id: &str) -> Result<bool> {
    transition_order_status(conn, order_id, OrderStatus::Pending, OrderStatus::Cancelled)
}

// ============ Checkout materialization ============

/// A paid Checkout Session as reported by the payment webhook.
#[derive(Debug, Clone)]
pub struct PaidCheckout {
    pub session_id: String,
    pub buyer_id: String,
    /// Pending order created at checkout, if the session metadata named one
    pub order_id: Option<String>,
    /// Cart lines carried in the session metadata (may be empty)
    pub items: Vec<NewOrderItem>,
    /// Amount the processor actually charged
    pub amount_total_cents: Option<i64>,
    pub payment_method: String,
}

#[derive(Debug, Clone)]
pub enum Materialization {
    /// The pending order from checkout was marked completed
    Completed(Order),
    /// No pending order existed; a completed order was created from the cart lines
    Created(Order),
    /// This session already produced a completed order
    AlreadyProcessed(Order),
    /// Nothing was written; the reason is safe to log
    Rejected(String),
}

/// Turn a paid Checkout Session into exactly one completed order.
///
/// Runs in a single IMMEDIATE transaction so concurrent deliveries of the same
/// event serialize and the second one observes the first one's order.
pub fn materialize_paid_checkout(conn: &mut Connection, paid: &PaidCheckout) -> Result<Materialization> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let by_session = get_order_by_session(&tx, &paid.session_id)?;
    if let Some(existing) = &by_session {
        match existing.status {
            OrderStatus::Completed => return Ok(Materialization::AlreadyProcessed(existing.clone())),
            OrderStatus::Cancelled => {
                return Ok(Materialization::Rejected(format!(
                    "order {} for session {} was already cancelled",
                    existing.id, paid.session_id
                )));
            }
            OrderStatus::Pending => {}
        }
    }

    // Metadata may omit the order id; checkout also recorded the session on it
    let target_id = paid.order_id.clone().or_else(|| by_session.map(|o| o.id));

    if let Some(order_id) = &target_id {
        if let Some(order) = get_order_by_id(&tx, order_id)? {
            if order.buyer_id != paid.buyer_id {
                return Ok(Materialization::Rejected(format!(
                    "order {} belongs to {}, session names buyer {}",
                    order.id, order.buyer_id, paid.buyer_id
                )));
            }
            match order.status {
                OrderStatus::Completed => return Ok(Materialization::AlreadyProcessed(order)),
                OrderStatus::Cancelled => {
                    return Ok(Materialization::Rejected(format!(
                        "order {} was cancelled before payment completed",
                        order.id
                    )));
                }
                OrderStatus::Pending => {
                    let updated = UpdateBuilder::new("orders", &order.id)
                        .with_updated_at()
                        .set("status", OrderStatus::Completed.as_ref().to_string())
                        .set("stripe_session_id", paid.session_id.clone())
                        .set_opt(
                            "payment_method",
                            Some(paid.payment_method.clone()).filter(|m| !m.is_empty()),
                        )
                        .where_eq("status", OrderStatus::Pending.as_ref().to_string())
                        .execute(&tx)?;
                    if !updated {
                        return Err(AppError::Conflict(format!(
                            "order {} changed while completing it",
                            order.id
                        )));
                    }
                    let completed = get_order_by_id(&tx, &order.id)?.ok_or_else(|| {
                        AppError::Internal(format!("order {} vanished while completing", order.id))
                    })?;
                    tx.commit()?;
                    return Ok(Materialization::Completed(completed));
                }
            }
        }
        tracing::warn!(
            "Order {} named by session {} does not exist, falling back to cart data",
            order_id,
            paid.session_id
        );
    }

    if paid.items.is_empty() {
        return Ok(Materialization::Rejected(format!(
            "session {} carries neither a known order nor cart data",
            paid.session_id
        )));
    }

    let Some(mut input) = CreateOrder::from_items(
        paid.buyer_id.clone(),
        OrderStatus::Completed,
        paid.payment_method.clone(),
        paid.items.clone(),
    ) else {
        return Ok(Materialization::Rejected(format!(
            "cart data of session {} overflows the order total",
            paid.session_id
        )));
    };
    input.stripe_session_id = Some(paid.session_id.clone());
    if let Some(charged) = paid.amount_total_cents {
        input.total_cents = charged;
    }

    let order = insert_order(&tx, &input)?;
    tx.commit()?;
    Ok(Materialization::Created(order))
}

// ============ Order reads ============

fn load_item_details(conn: &Connection, order_id: &str) -> Result<Vec<OrderItemDetail>> {
    query_all(
        conn,
        &format!(
            "SELECT {} FROM order_items oi
             LEFT JOIN products p ON p.id = oi.product_id
             LEFT JOIN users s ON s.id = oi.seller_id
             WHERE oi.order_id = ?1
             ORDER BY oi.created_at, oi.id",
            ORDER_ITEM_DETAIL_COLS
        ),
        [order_id],
    )
}

/// Order with buyer name/email and every item joined with product and seller.
pub fn get_order_detail(conn: &Connection, id: &str) -> Result<Option<OrderDetail>> {
    let detail: Option<OrderDetail> = query_one(
        conn,
        &format!(
            "SELECT {} FROM orders o LEFT JOIN users u ON u.id = o.buyer_id WHERE o.id = ?1",
            ORDER_DETAIL_COLS
        ),
        [id],
    )?;

    let Some(mut detail) = detail else {
        return Ok(None);
    };
    detail.items = load_item_details(conn, &detail.order.id)?;
    Ok(Some(detail))
}

/// Orders newest first, optionally restricted to a buyer and/or to orders that
/// contain at least one item sold by a seller.
pub fn list_order_details(conn: &Connection, filter: &OrderFilter) -> Result<Vec<OrderDetail>> {
    let mut sql = format!(
        "SELECT {} FROM orders o LEFT JOIN users u ON u.id = o.buyer_id WHERE 1=1",
        ORDER_DETAIL_COLS
    );
    let mut values: Vec<Value> = Vec::new();

    if let Some(buyer_id) = &filter.buyer_id {
        sql.push_str(" AND o.buyer_id = ?");
        values.push(buyer_id.clone().into());
    }
    if let Some(seller_id) = &filter.seller_id {
        sql.push_str(" AND o.id IN (SELECT DISTINCT order_id FROM order_items WHERE seller_id = ?)");
        values.push(seller_id.clone().into());
    }
    sql.push_str(" ORDER BY o.created_at DESC, o.id");

    let mut orders: Vec<OrderDetail> = query_all(conn, &sql, params_from_iter(values))?;
    for order in &mut orders {
        order.items = load_item_details(conn, &order.order.id)?;
    }
    Ok(orders)
}
