use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Shop catalog entry. Stock is decremented when the webhook completes an
/// order; variations carry their own attribute-keyed sub-stock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub price_cents: i64,
    pub currency: String,
    pub stock: i64,
    pub image_url: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    /// Soft delete timestamp (None = active)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<i64>,
}

/// Attribute-keyed sub-stock (e.g. shirt sizes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductVariation {
    pub id: String,
    pub product_id: String,
    pub attribute: String,
    pub stock: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateProduct {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub price_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub image_url: Option<String>,
    /// attribute -> stock
    #[serde(default)]
    pub variations: Vec<CreateVariation>,
}

#[derive(Debug, Deserialize)]
pub struct CreateVariation {
    pub attribute: String,
    pub stock: i64,
}

fn default_currency() -> String {
    "eur".to_string()
}

impl CreateProduct {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(AppError::BadRequest("Product name must not be empty".into()));
        }
        if self.price_cents <= 0 {
            return Err(AppError::BadRequest("Product price must be positive".into()));
        }
        if self.stock < 0 {
            return Err(AppError::BadRequest("Product stock must not be negative".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateProduct {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price_cents: Option<i64>,
    pub currency: Option<String>,
    pub stock: Option<i64>,
    pub image_url: Option<String>,
}

impl UpdateProduct {
    pub fn validate(&self) -> Result<()> {
        if let Some(ref name) = self.name {
            if name.trim().is_empty() {
                return Err(AppError::BadRequest("Product name must not be empty".into()));
            }
        }
        if let Some(price) = self.price_cents {
            if price <= 0 {
                return Err(AppError::BadRequest("Product price must be positive".into()));
            }
        }
        if let Some(stock) = self.stock {
            if stock < 0 {
                return Err(AppError::BadRequest("Product stock must not be negative".into()));
            }
        }
        Ok(())
    }
}
