mod stripe;

pub use stripe::*;

use serde::{Deserialize, Serialize};

/// Label stored on orders paid through the hosted checkout page.
pub const PAYMENT_METHOD_STRIPE: &str = "stripe";

/// The only currency the marketplace sells in.
pub const CURRENCY: &str = "usd";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}
