//! Shopping cart model and pricing.
//!
//! Prices held in the cart are a display copy; checkout re-reads them from
//! the catalog before charging.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{CatalogError, Product};
use crate::database::DatabaseError;
use crate::types::Fulfilment;

pub const MAX_LINES: usize = 50;
pub const MAX_LINE_QUANTITY: i32 = 99;

#[derive(Debug, Error)]
pub enum CartError {
    #[error("A cart can hold at most 50 different items")]
    LineLimit,
    #[error("Quantity must be between 1 and 99")]
    QuantityOutOfRange,
    #[error("'{name}' must be ordered in quantities of at least {min}")]
    BelowMinimum { name: String, min: i32 },
    #[error("Item {0} is not in the cart")]
    UnknownItem(Uuid),
    #[error("Cart is empty")]
    Empty,
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub product_id: Uuid,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i32,
    pub min_quantity: i32,
    #[serde(default)]
    pub notes: String,
}

impl CartItem {
    pub fn line_total_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cart {
    pub session_id: Uuid,
    pub items: Vec<CartItem>,
    pub updated_at: DateTime<Utc>,
}

/// Tax and delivery settings applied to a cart
#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub tax_rate: Decimal,
    pub delivery_fee_cents: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CartTotals {
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub delivery_fee_cents: i64,
    pub total_cents: i64,
    pub item_count: i64,
}

/// Multiply cents by a rate and round half away from zero to whole cents
pub fn apply_rate(cents: i64, rate: Decimal) -> i64 {
    (Decimal::from(cents) * rate)
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .unwrap_or(0)
}

fn check_quantity(quantity: i32, name: &str, min: i32) -> Result<(), CartError> {
    if !(1..=MAX_LINE_QUANTITY).contains(&quantity) {
        return Err(CartError::QuantityOutOfRange);
    }
    if quantity < min {
        return Err(CartError::BelowMinimum {
            name: name.to_string(),
            min,
        });
    }
    Ok(())
}

impl Cart {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            items: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add a product, merging with an existing line for the same product
    pub fn add_item(&mut self, product: &Product, quantity: i32, notes: Option<String>) -> Result<(), CartError> {
        if !product.is_available {
            return Err(CartError::Catalog(CatalogError::Unavailable(product.name.clone())));
        }

        if let Some(line) = self.items.iter_mut().find(|l| l.product_id == product.id) {
            let merged = line.quantity.saturating_add(quantity);
            check_quantity(merged, &product.name, product.min_quantity)?;
            line.quantity = merged;
            line.unit_price_cents = product.price_cents;
            if let Some(notes) = notes {
                line.notes = notes;
            }
        } else {
            if self.items.len() >= MAX_LINES {
                return Err(CartError::LineLimit);
            }
            check_quantity(quantity, &product.name, product.min_quantity)?;
            self.items.push(CartItem {
                product_id: product.id,
                name: product.name.clone(),
                unit_price_cents: product.price_cents,
                quantity,
                min_quantity: product.min_quantity,
                notes: notes.unwrap_or_default(),
            });
        }

        self.updated_at = Utc::now();
        Ok(())
    }

    /// Set a line's quantity; zero removes the line
    pub fn update_quantity(&mut self, product_id: Uuid, quantity: i32) -> Result<(), CartError> {
        if quantity == 0 {
            return self.remove_item(product_id);
        }
        let line = self
            .items
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or(CartError::UnknownItem(product_id))?;
        check_quantity(quantity, &line.name, line.min_quantity)?;
        line.quantity = quantity;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove_item(&mut self, product_id: Uuid) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|l| l.product_id != product_id);
        if self.items.len() == before {
            return Err(CartError::UnknownItem(product_id));
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.updated_at = Utc::now();
    }

    pub fn totals(&self, pricing: &Pricing, fulfilment: Fulfilment) -> CartTotals {
        totals_for(&self.items, pricing, fulfilment)
    }
}

pub fn totals_for(items: &[CartItem], pricing: &Pricing, fulfilment: Fulfilment) -> CartTotals {
    let subtotal_cents: i64 = items.iter().map(CartItem::line_total_cents).sum();
    let tax_cents = apply_rate(subtotal_cents, pricing.tax_rate);
    let delivery_fee_cents = match fulfilment {
        Fulfilment::Delivery if !items.is_empty() => pricing.delivery_fee_cents,
        _ => 0,
    };
    CartTotals {
        subtotal_cents,
        tax_cents,
        delivery_fee_cents,
        total_cents: subtotal_cents + tax_cents + delivery_fee_cents,
        item_count: items.iter().map(|l| i64::from(l.quantity)).sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn product(name: &str, price_cents: i64, min_quantity: i32) -> Product {
        Product {
            id: Uuid::new_v4(),
            slug: name.to_lowercase().replace(' ', "-"),
            name: name.to_string(),
            description: String::new(),
            category: "mains".to_string(),
            price_cents,
            image_url: None,
            is_available: true,
            is_catering: min_quantity > 1,
            min_quantity,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn pricing() -> Pricing {
        Pricing {
            tax_rate: Decimal::new(825, 4), // 8.25%
            delivery_fee_cents: 599,
        }
    }

    #[test]
    fn merges_lines_for_same_product() {
        let taco = product("Taco", 350, 1);
        let mut cart = Cart::new(Uuid::new_v4());
        cart.add_item(&taco, 2, None).unwrap();
        cart.add_item(&taco, 3, Some("no cilantro".into())).unwrap();
        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 5);
        assert_eq!(cart.items[0].notes, "no cilantro");
    }

    #[test]
    fn enforces_quantity_bounds_and_minimums() {
        let tray = product("Brisket Tray", 8900, 10);
        let mut cart = Cart::new(Uuid::new_v4());
        assert!(matches!(cart.add_item(&tray, 5, None), Err(CartError::BelowMinimum { min: 10, .. })));
        cart.add_item(&tray, 10, None).unwrap();
        assert!(matches!(cart.update_quantity(tray.id, 100), Err(CartError::QuantityOutOfRange)));
        assert!(matches!(cart.update_quantity(tray.id, 9), Err(CartError::BelowMinimum { .. })));
        assert!(matches!(cart.add_item(&tray, 95, None), Err(CartError::QuantityOutOfRange)));
    }

    #[test]
    fn rejects_unavailable_products() {
        let mut soup = product("Soup", 500, 1);
        soup.is_available = false;
        let mut cart = Cart::new(Uuid::new_v4());
        assert!(matches!(cart.add_item(&soup, 1, None), Err(CartError::Catalog(CatalogError::Unavailable(_)))));
    }

    #[test]
    fn zero_quantity_removes_line() {
        let taco = product("Taco", 350, 1);
        let mut cart = Cart::new(Uuid::new_v4());
        cart.add_item(&taco, 1, None).unwrap();
        cart.update_quantity(taco.id, 0).unwrap();
        assert!(cart.is_empty());
        assert!(matches!(cart.remove_item(taco.id), Err(CartError::UnknownItem(_))));
    }

    #[test]
    fn caps_distinct_lines() {
        let mut cart = Cart::new(Uuid::new_v4());
        for i in 0..MAX_LINES {
            cart.add_item(&product(&format!("Item {}", i), 100, 1), 1, None).unwrap();
        }
        assert!(matches!(cart.add_item(&product("One more", 100, 1), 1, None), Err(CartError::LineLimit)));
    }

    #[test]
    fn computes_totals_with_rounding() {
        let mut cart = Cart::new(Uuid::new_v4());
        cart.add_item(&product("Taco", 350, 1), 3, None).unwrap(); // 1050
        cart.add_item(&product("Horchata", 275, 1), 2, None).unwrap(); // 550

        let pickup = cart.totals(&pricing(), Fulfilment::Pickup);
        // 1600 * 0.0825 = 132.0
        assert_eq!(pickup.subtotal_cents, 1600);
        assert_eq!(pickup.tax_cents, 132);
        assert_eq!(pickup.delivery_fee_cents, 0);
        assert_eq!(pickup.total_cents, 1732);
        assert_eq!(pickup.item_count, 5);

        let delivery = cart.totals(&pricing(), Fulfilment::Delivery);
        assert_eq!(delivery.total_cents, 1732 + 599);
    }

    #[test]
    fn rounds_half_away_from_zero() {
        // 10 * 0.05 = 0.5 -> 1
        assert_eq!(apply_rate(10, Decimal::new(5, 2)), 1);
        // 1010 * 0.0825 = 83.325 -> 83
        assert_eq!(apply_rate(1010, Decimal::new(825, 4)), 83);
    }

    #[test]
    fn empty_cart_has_no_delivery_fee() {
        let cart = Cart::new(Uuid::new_v4());
        assert_eq!(cart.totals(&pricing(), Fulfilment::Delivery).total_cents, 0);
    }
}
