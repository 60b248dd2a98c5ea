use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Completed,
    Cancelled,
}

impl OrderStatus {
    /// Orders only ever leave `pending`; `completed` and `cancelled` are terminal.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Completed)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub buyer_id: String,
    pub total_cents: i64,
    pub status: OrderStatus,
    pub payment_method: String,
    /// Checkout Session that paid (or will pay) for this order
    pub stripe_session_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    /// Seller of the product at purchase time
    pub seller_id: String,
    pub quantity: i64,
    /// Unit price at purchase time
    pub price_cents: i64,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrderItem {
    pub product_id: String,
    pub seller_id: String,
    pub quantity: i64,
    pub price_cents: i64,
}

impl NewOrderItem {
    /// `None` if price × quantity does not fit in an `i64`.
    pub fn line_total_cents(&self) -> Option<i64> {
        self.price_cents.checked_mul(self.quantity)
    }
}

#[derive(Debug, Clone)]
pub struct CreateOrder {
    pub buyer_id: String,
    pub status: OrderStatus,
    pub payment_method: String,
    pub stripe_session_id: Option<String>,
    pub total_cents: i64,
    pub items: Vec<NewOrderItem>,
}

impl CreateOrder {
    /// Build an order whose total is the sum of its line totals. Returns
    /// `None` when that sum overflows.
    pub fn from_items(
        buyer_id: impl Into<String>,
        status: OrderStatus,
        payment_method: impl Into<String>,
        items: Vec<NewOrderItem>,
    ) -> Option<Self> {
        let total_cents = items
            .iter()
            .try_fold(0i64, |acc, item| acc.checked_add(item.line_total_cents()?))?;
        Some(Self {
            buyer_id: buyer_id.into(),
            status,
            payment_method: payment_method.into(),
            stripe_session_id: None,
            total_cents,
            items,
        })
    }
}

/// An order item joined with the product and seller it refers to.
#[derive(Debug, Clone, Serialize)]
pub struct OrderItemDetail {
    #[serde(flatten)]
    pub item: OrderItem,
    /// Unit price in dollars
    pub price: f64,
    pub product_title: Option<String>,
    pub product_images: Vec<String>,
    pub seller_name: Option<String>,
}

/// An order with buyer details and every line item, as shown to buyers and sellers.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetail {
    #[serde(flatten)]
    pub order: Order,
    /// Total in dollars
    pub total: f64,
    pub buyer_name: Option<String>,
    pub buyer_email: Option<String>,
    pub items: Vec<OrderItemDetail>,
}

/// Filters for listing orders. Both filters combine with AND.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFilter {
    #[serde(default)]
    pub buyer_id: Option<String>,
    #[serde(default)]
    pub seller_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_pending_orders_move() {
        use OrderStatus::*;
        assert!(Pending.can_transition_to(Completed));
        assert!(Pending.can_transition_to(Cancelled));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Completed));
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn status_round_trips_through_its_column_text() {
        assert_eq!(OrderStatus::Completed.as_ref(), "completed");
        assert_eq!("cancelled".parse::<OrderStatus>().unwrap(), OrderStatus::Cancelled);
        assert!("processing".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn order_total_is_sum_of_lines() {
        let order = CreateOrder::from_items(
            "u1",
            OrderStatus::Pending,
            "stripe",
            vec![
                NewOrderItem {
                    product_id: "p1".into(),
                    seller_id: "s1".into(),
                    quantity: 2,
                    price_cents: 1000,
                },
                NewOrderItem {
                    product_id: "p2".into(),
                    seller_id: "s2".into(),
                    quantity: 3,
                    price_cents: 250,
                },
            ],
        )
        .unwrap();
        assert_eq!(order.total_cents, 2750);
    }

    #[test]
    fn overflowing_totals_are_refused() {
        let line = |quantity: i64, price_cents: i64| NewOrderItem {
            product_id: "p1".into(),
            seller_id: "s1".into(),
            quantity,
            price_cents,
        };
        assert_eq!(line(2_305_843_009_213_693_953, 1000).line_total_cents(), None);
        assert!(
            CreateOrder::from_items("u1", OrderStatus::Pending, "stripe", vec![line(2_305_843_009_213_693_953, 1000)])
                .is_none()
        );
        // Each line fits, their sum does not
        assert!(
            CreateOrder::from_items(
                "u1",
                OrderStatus::Pending,
                "stripe",
                vec![line(1, i64::MAX), line(1, 1)],
            )
            .is_none()
        );
    }
}
