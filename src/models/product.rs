use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

/// Moderation state of a listing. Only approved listings can be checked out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProductStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub seller_id: String,
    pub title: String,
    pub price_cents: i64,
    pub images: Vec<String>,
    pub status: ProductStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub seller_id: String,
    pub title: String,
    pub price_cents: i64,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default = "default_status")]
    pub status: ProductStatus,
}

fn default_status() -> ProductStatus {
    ProductStatus::Approved
}
