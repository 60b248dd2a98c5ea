//! Row mapping for the query helpers in `queries`.
//!
//! Each `*_COLS` constant lists columns in exactly the order the matching
//! `FromRow` impl reads them, so SELECTs must use the constant verbatim.

use rusqlite::{Connection, OptionalExtension, Params, Row, types::Type};

use crate::error::Result;
use crate::models::*;
use crate::util::{cents_to_dollars, parse_image_list};

pub trait FromRow: Sized {
    fn from_row(row: &Row) -> rusqlite::Result<Self>;
}

pub fn query_one<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Option<T>> {
    Ok(conn.query_row(sql, params, |row| T::from_row(row)).optional()?)
}

pub fn query_all<T: FromRow>(conn: &Connection, sql: &str, params: impl Params) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, |row| T::from_row(row))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Read a text column into a strum-parsed enum.
fn parse_col<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    row.get::<_, String>(idx)?
        .parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub const USER_COLS: &str = "id, email, name, role, created_at, updated_at";

impl FromRow for User {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(User {
            id: row.get(0)?,
            email: row.get(1)?,
            name: row.get(2)?,
            role: parse_col(row, 3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

pub const PRODUCT_COLS: &str =
    "id, seller_id, title, price_cents, images, status, created_at, updated_at";

impl FromRow for Product {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let images: Option<String> = row.get(4)?;
        Ok(Product {
            id: row.get(0)?,
            seller_id: row.get(1)?,
            title: row.get(2)?,
            price_cents: row.get(3)?,
            images: parse_image_list(images.as_deref()),
            status: parse_col(row, 5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

pub const ORDER_COLS: &str =
    "id, buyer_id, total_cents, status, payment_method, stripe_session_id, created_at, updated_at";

impl FromRow for Order {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Order {
            id: row.get(0)?,
            buyer_id: row.get(1)?,
            total_cents: row.get(2)?,
            status: parse_col(row, 3)?,
            payment_method: row.get(4)?,
            stripe_session_id: row.get(5)?,
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        })
    }
}

pub const ORDER_ITEM_COLS: &str =
    "id, order_id, product_id, seller_id, quantity, price_cents, created_at";

impl FromRow for OrderItem {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(OrderItem {
            id: row.get(0)?,
            order_id: row.get(1)?,
            product_id: row.get(2)?,
            seller_id: row.get(3)?,
            quantity: row.get(4)?,
            price_cents: row.get(5)?,
            created_at: row.get(6)?,
        })
    }
}

/// `orders o LEFT JOIN users u ON u.id = o.buyer_id`
pub const ORDER_DETAIL_COLS: &str = "o.id, o.buyer_id, o.total_cents, o.status, o.payment_method, \
     o.stripe_session_id, o.created_at, o.updated_at, u.name, u.email";

/// Items are filled in by a second query.
impl FromRow for OrderDetail {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let order = Order::from_row(row)?;
        Ok(OrderDetail {
            total: cents_to_dollars(order.total_cents),
            order,
            buyer_name: row.get(8)?,
            buyer_email: row.get(9)?,
            items: Vec::new(),
        })
    }
}

/// `order_items oi LEFT JOIN products p ON p.id = oi.product_id
///  LEFT JOIN users s ON s.id = oi.seller_id`
pub const ORDER_ITEM_DETAIL_COLS: &str = "oi.id, oi.order_id, oi.product_id, oi.seller_id, \
     oi.quantity, oi.price_cents, oi.created_at, p.title, p.images, s.name";

impl FromRow for OrderItemDetail {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let item = OrderItem::from_row(row)?;
        let images: Option<String> = row.get(8)?;
        Ok(OrderItemDetail {
            price: cents_to_dollars(item.price_cents),
            item,
            product_title: row.get(7)?,
            product_images: parse_image_list(images.as_deref()),
            seller_name: row.get(9)?,
        })
    }
}
