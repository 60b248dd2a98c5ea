//! Buyer cart kept entirely on the client side.
//!
//! The cart lives in a cookie (`marketplace_cart`) so it survives reloads
//! without a server round-trip. The server never reads it; the storefront
//! submits `Cart::to_checkout_items` when the buyer checks out.

use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::models::CheckoutLineItem;
use crate::util::cents_to_dollars;

pub const CART_COOKIE: &str = "marketplace_cart";

/// Cart cookie lifetime, refreshed on every write.
pub const CART_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// What the cart remembers about a product when it was added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub id: String,
    pub title: String,
    pub price_cents: i64,
    pub seller_id: String,
    #[serde(default)]
    pub images: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartItem {
    pub product: ProductSnapshot,
    pub quantity: i64,
}

impl CartItem {
    /// `None` if price × quantity does not fit in an `i64`.
    pub fn line_total_cents(&self) -> Option<i64> {
        self.product.price_cents.checked_mul(self.quantity)
    }
}

/// Cart entries, at most one per product, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cart {
    items: Vec<CartItem>,
}

impl Cart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add `quantity` of a product, merging into an existing entry. Quantities
    /// below 1, and additions that would push the cart total past `i64`, are
    /// ignored. Returns whether the cart changed.
    pub fn add(&mut self, product: ProductSnapshot, quantity: i64) -> bool {
        if quantity < 1 {
            return false;
        }
        let mut next = self.clone();
        match next.items.iter_mut().find(|i| i.product.id == product.id) {
            Some(existing) => match existing.quantity.checked_add(quantity) {
                Some(q) => existing.quantity = q,
                None => return false,
            },
            None => next.items.push(CartItem { product, quantity }),
        }
        if next.checked_total_cents().is_none() {
            return false;
        }
        *self = next;
        true
    }

    pub fn remove(&mut self, product_id: &str) -> bool {
        let before = self.items.len();
        self.items.retain(|i| i.product.id != product_id);
        self.items.len() != before
    }

    /// Overwrite the quantity of an existing entry. Quantities below 1,
    /// unknown products and totals past `i64` leave the cart untouched.
    pub fn update_quantity(&mut self, product_id: &str, quantity: i64) -> bool {
        if quantity < 1 {
            return false;
        }
        let mut next = self.clone();
        match next.items.iter_mut().find(|i| i.product.id == product_id) {
            Some(item) if item.quantity != quantity => item.quantity = quantity,
            _ => return false,
        }
        if next.checked_total_cents().is_none() {
            return false;
        }
        *self = next;
        true
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.items.is_empty();
        self.items.clear();
        changed
    }

    fn checked_total_cents(&self) -> Option<i64> {
        self.items
            .iter()
            .try_fold(0i64, |acc, item| acc.checked_add(item.line_total_cents()?))
    }

    /// Mutations and cookie decoding keep this within `i64`.
    pub fn total_cents(&self) -> i64 {
        self.checked_total_cents().unwrap_or(i64::MAX)
    }

    pub fn item_count(&self) -> i64 {
        self.items
            .iter()
            .fold(0i64, |acc, item| acc.saturating_add(item.quantity))
    }

    pub fn summary(&self) -> CartSummary {
        CartSummary {
            item_count: self.item_count(),
            total_cents: self.total_cents(),
        }
    }

    /// Snapshot submitted to the checkout endpoint.
    pub fn to_checkout_items(&self) -> Vec<CheckoutLineItem> {
        self.items
            .iter()
            .map(|i| CheckoutLineItem {
                product_id: i.product.id.clone(),
                title: i.product.title.clone(),
                unit_price: cents_to_dollars(i.product.price_cents),
                quantity: i.quantity,
                images: i.product.images.clone(),
            })
            .collect()
    }

    /// URL-encoded JSON, safe to place in a cookie value.
    pub fn to_cookie_value(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| "[]".to_string());
        urlencoding::encode(&json).into_owned()
    }

    /// Decode a cookie value. Anything unreadable yields an empty cart, and
    /// entries with a quantity below 1 are dropped.
    pub fn from_cookie_value(value: &str) -> Self {
        let decoded = match urlencoding::decode(value) {
            Ok(d) => d,
            Err(_) => return Self::default(),
        };
        let mut cart: Cart = serde_json::from_str(&decoded).unwrap_or_default();
        cart.items.retain(|i| i.quantity >= 1);
        if cart.checked_total_cents().is_none() {
            return Self::default();
        }
        cart
    }
}

/// Published to observers (header badge, cart page) after every change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CartSummary {
    pub item_count: i64,
    pub total_cents: i64,
}

/// A cart bound to its cookie, with change notifications.
pub struct CartStore {
    cart: Cart,
    changes: watch::Sender<CartSummary>,
}

impl Default for CartStore {
    fn default() -> Self {
        Self::with_cart(Cart::default())
    }
}

impl CartStore {
    pub fn with_cart(cart: Cart) -> Self {
        let (changes, _) = watch::channel(cart.summary());
        Self { cart, changes }
    }

    pub fn from_jar(jar: &CookieJar) -> Self {
        let cart = jar
            .get(CART_COOKIE)
            .map(|c| Cart::from_cookie_value(c.value()))
            .unwrap_or_default();
        Self::with_cart(cart)
    }

    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    pub fn subscribe(&self) -> watch::Receiver<CartSummary> {
        self.changes.subscribe()
    }

    pub fn add(&mut self, product: ProductSnapshot, quantity: i64) {
        if self.cart.add(product, quantity) {
            self.notify();
        }
    }

    pub fn remove(&mut self, product_id: &str) {
        if self.cart.remove(product_id) {
            self.notify();
        }
    }

    pub fn update_quantity(&mut self, product_id: &str, quantity: i64) {
        if self.cart.update_quantity(product_id, quantity) {
            self.notify();
        }
    }

    pub fn clear(&mut self) {
        if self.cart.clear() {
            self.notify();
        }
    }

    pub fn total_cents(&self) -> i64 {
        self.cart.total_cents()
    }

    pub fn item_count(&self) -> i64 {
        self.cart.item_count()
    }

    /// The cookie to write back after a change. An empty cart expires the cookie.
    pub fn to_cookie(&self) -> Cookie<'static> {
        let (value, max_age) = if self.cart.is_empty() {
            (String::new(), 0)
        } else {
            (self.cart.to_cookie_value(), CART_TTL_SECS)
        };
        Cookie::parse(format!(
            "{}={}; Max-Age={}; Path=/; SameSite=Lax",
            CART_COOKIE, value, max_age
        ))
        .unwrap_or_else(|_| Cookie::new(CART_COOKIE, ""))
    }

    /// Store the cart cookie in a jar, ready to be returned from a handler.
    pub fn save(&self, jar: CookieJar) -> CookieJar {
        jar.add(self.to_cookie())
    }

    fn notify(&self) {
        self.changes.send_replace(self.cart.summary());
    }
}
