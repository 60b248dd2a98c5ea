use serde::{Deserialize, Serialize};

use crate::util::{cents_to_dollars, dollars_to_cents};

use super::NewOrderItem;

/// One cart line as submitted by the storefront at checkout time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutLineItem {
    #[serde(rename = "id")]
    pub product_id: String,
    pub title: String,
    /// Unit price in dollars
    #[serde(rename = "price")]
    pub unit_price: f64,
    pub quantity: i64,
    #[serde(default)]
    pub images: Vec<String>,
}

impl CheckoutLineItem {
    pub fn image_url(&self) -> Option<&str> {
        self.images.first().map(String::as_str)
    }
}

/// Key-value bag attached to a Checkout Session so the webhook can find its way
/// back to the buyer and the order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentSessionMetadata {
    #[serde(rename = "orderId", default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(
        rename = "buyerId",
        alias = "userId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub buyer_id: Option<String>,
    /// Serialized `[CartDataEntry]`, present when it fits in a metadata value
    #[serde(rename = "cartData", default, skip_serializing_if = "Option::is_none")]
    pub cart_data: Option<String>,
}

/// Stripe caps each metadata value at this many characters.
pub const METADATA_VALUE_LIMIT: usize = 500;

impl PaymentSessionMetadata {
    pub fn cart_entries(&self) -> Option<Result<Vec<CartDataEntry>, serde_json::Error>> {
        self.cart_data.as_deref().map(serde_json::from_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartDataProduct {
    pub id: String,
    /// Unit price in dollars
    pub price: f64,
    #[serde(rename = "sellerId", alias = "seller_id")]
    pub seller_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartDataEntry {
    pub product: CartDataProduct,
    pub quantity: i64,
}

impl CartDataEntry {
    pub fn from_order_item(item: &NewOrderItem) -> Self {
        Self {
            product: CartDataProduct {
                id: item.product_id.clone(),
                price: cents_to_dollars(item.price_cents),
                seller_id: item.seller_id.clone(),
            },
            quantity: item.quantity,
        }
    }

    /// Convert back into an order line, rejecting non-positive quantities and
    /// unrepresentable prices.
    pub fn to_order_item(&self) -> Option<NewOrderItem> {
        if self.quantity < 1 {
            return None;
        }
        Some(NewOrderItem {
            product_id: self.product.id.clone(),
            seller_id: self.product.seller_id.clone(),
            quantity: self.quantity,
            price_cents: dollars_to_cents(self.product.price)?,
        })
    }
}

/// Serialize order lines as `cartData`, or `None` if the result would not fit
/// in a single metadata value.
pub fn encode_cart_data(items: &[NewOrderItem]) -> Option<String> {
    let entries: Vec<CartDataEntry> = items.iter().map(CartDataEntry::from_order_item).collect();
    let encoded = serde_json::to_string(&entries).ok()?;
    (encoded.len() <= METADATA_VALUE_LIMIT).then_some(encoded)
}
