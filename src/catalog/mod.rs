use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use uuid::Uuid;

use crate::database::DatabaseError;
use crate::security::sanitize::{sanitize_line, sanitize_slug, sanitize_text};

pub const DEFAULT_PAGE_SIZE: i64 = 24;
pub const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("product not found: {0}")]
    NotFound(String),
    #[error("product '{0}' is unavailable")]
    Unavailable(String),
    #[error("invalid {field}: {message}")]
    Invalid { field: String, message: String },
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl CatalogError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        CatalogError::Invalid {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: Uuid,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub category: String,
    pub price_cents: i64,
    pub image_url: Option<String>,
    pub is_available: bool,
    /// Catering items are sold in bulk and carry a minimum order quantity
    pub is_catering: bool,
    pub min_quantity: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Query-string filter for product listings
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductFilter {
    pub category: Option<String>,
    pub catering: Option<bool>,
    /// Admins may see unavailable products; the public listing never does
    #[serde(skip)]
    pub include_unavailable: bool,
    pub q: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ProductFilter {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    /// Search text reduced to something safe to place in an ILIKE pattern
    pub fn search_pattern(&self) -> Option<String> {
        let q = sanitize_line(self.q.as_deref()?, 80);
        let escaped: String = q
            .chars()
            .filter(|c| !c.is_control())
            .flat_map(|c| match c {
                '%' | '_' | '\\' => vec!['\\', c],
                _ => vec![c],
            })
            .collect();
        if escaped.is_empty() {
            None
        } else {
            Some(format!("%{}%", escaped))
        }
    }

    pub fn category(&self) -> Option<String> {
        self.category
            .as_deref()
            .map(sanitize_slug)
            .filter(|c| !c.is_empty())
    }
}

/// Admin payload for creating a product
#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub slug: Option<String>,
    #[serde(default)]
    pub description: String,
    pub category: String,
    pub price_cents: i64,
    pub image_url: Option<String>,
    #[serde(default)]
    pub is_catering: bool,
    pub min_quantity: Option<i32>,
}

impl NewProduct {
    /// Sanitize and check every field, deriving the slug from the name when absent
    pub fn validate(self) -> Result<NewProduct, CatalogError> {
        let name = sanitize_line(&self.name, 120);
        if name.is_empty() {
            return Err(CatalogError::invalid("name", "is required"));
        }
        let slug = sanitize_slug(self.slug.as_deref().unwrap_or(&name));
        if slug.is_empty() {
            return Err(CatalogError::invalid("slug", "must contain letters or digits"));
        }
        let category = sanitize_slug(&self.category);
        if category.is_empty() {
            return Err(CatalogError::invalid("category", "is required"));
        }
        validate_price(self.price_cents)?;
        let min_quantity = self.min_quantity.unwrap_or(if self.is_catering { 10 } else { 1 });
        validate_min_quantity(min_quantity)?;
        let image_url = self.image_url.map(|u| validate_image_url(&u)).transpose()?;

        Ok(NewProduct {
            name,
            slug: Some(slug),
            description: sanitize_text(&self.description, 2000),
            category,
            price_cents: self.price_cents,
            image_url,
            is_catering: self.is_catering,
            min_quantity: Some(min_quantity),
        })
    }
}

/// Admin payload for partial product updates
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub price_cents: Option<i64>,
    pub image_url: Option<String>,
    pub is_available: Option<bool>,
    pub min_quantity: Option<i32>,
}

impl ProductUpdate {
    /// Apply onto an existing product after validation
    pub fn apply(self, mut product: Product) -> Result<Product, CatalogError> {
        if let Some(name) = self.name {
            let name = sanitize_line(&name, 120);
            if name.is_empty() {
                return Err(CatalogError::invalid("name", "cannot be empty"));
            }
            product.name = name;
        }
        if let Some(description) = self.description {
            product.description = sanitize_text(&description, 2000);
        }
        if let Some(category) = self.category {
            let category = sanitize_slug(&category);
            if category.is_empty() {
                return Err(CatalogError::invalid("category", "cannot be empty"));
            }
            product.category = category;
        }
        if let Some(price) = self.price_cents {
            validate_price(price)?;
            product.price_cents = price;
        }
        if let Some(url) = self.image_url {
            product.image_url = if url.trim().is_empty() { None } else { Some(validate_image_url(&url)?) };
        }
        if let Some(available) = self.is_available {
            product.is_available = available;
        }
        if let Some(min) = self.min_quantity {
            validate_min_quantity(min)?;
            product.min_quantity = min;
        }
        product.updated_at = Utc::now();
        Ok(product)
    }
}

fn validate_price(price_cents: i64) -> Result<(), CatalogError> {
    if !(0..=10_000_000).contains(&price_cents) {
        return Err(CatalogError::invalid("price_cents", "must be between 0 and 10000000"));
    }
    Ok(())
}

fn validate_min_quantity(min: i32) -> Result<(), CatalogError> {
    if !(1..=crate::cart::MAX_LINE_QUANTITY).contains(&min) {
        return Err(CatalogError::invalid("min_quantity", "must be between 1 and 99"));
    }
    Ok(())
}

fn validate_image_url(raw: &str) -> Result<String, CatalogError> {
    let trimmed = raw.trim();
    if trimmed.starts_with('/') && !trimmed.starts_with("//") {
        return Ok(trimmed.to_string());
    }
    let parsed = url::Url::parse(trimmed).map_err(|_| CatalogError::invalid("image_url", "is not a valid URL"))?;
    if parsed.scheme() != "https" {
        return Err(CatalogError::invalid("image_url", "must use https"));
    }
    Ok(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_product() -> NewProduct {
        NewProduct {
            name: "  Smoked <b>Brisket</b> Tray ".to_string(),
            slug: None,
            description: "Feeds 10".to_string(),
            category: "Catering Trays".to_string(),
            price_cents: 8900,
            image_url: Some("https://cdn.example.com/brisket.jpg".to_string()),
            is_catering: true,
            min_quantity: None,
        }
    }

    #[test]
    fn validates_and_derives_slug() {
        let product = new_product().validate().unwrap();
        assert_eq!(product.name, "Smoked Brisket Tray");
        assert_eq!(product.slug.as_deref(), Some("smoked-brisket-tray"));
        assert_eq!(product.category, "catering-trays");
        assert_eq!(product.min_quantity, Some(10));
    }

    #[test]
    fn rejects_bad_fields() {
        let mut p = new_product();
        p.price_cents = -1;
        assert!(matches!(p.validate(), Err(CatalogError::Invalid { field, .. }) if field == "price_cents"));

        let mut p = new_product();
        p.image_url = Some("javascript:alert(1)".to_string());
        assert!(matches!(p.validate(), Err(CatalogError::Invalid { field, .. }) if field == "image_url"));

        let mut p = new_product();
        p.name = "<i></i>".to_string();
        assert!(p.validate().is_err());
    }

    #[test]
    fn clamps_pagination() {
        let filter = ProductFilter {
            limit: Some(1000),
            offset: Some(-5),
            ..Default::default()
        };
        assert_eq!(filter.limit(), MAX_PAGE_SIZE);
        assert_eq!(filter.offset(), 0);
        assert_eq!(ProductFilter::default().limit(), DEFAULT_PAGE_SIZE);
    }

    #[test]
    fn escapes_like_wildcards() {
        let filter = ProductFilter {
            q: Some("100%_taco".to_string()),
            ..Default::default()
        };
        assert_eq!(filter.search_pattern().as_deref(), Some("%100\\%\\_taco%"));
        let blank = ProductFilter {
            q: Some("   ".to_string()),
            ..Default::default()
        };
        assert_eq!(blank.search_pattern(), None);
    }
}
