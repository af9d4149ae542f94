use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Most units of one product/variant a single cart line may hold.
pub const MAX_LINE_QUANTITY: u32 = 999;

/// Highest tax-inclusive unit price accepted, in whole pesos.
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

/// Size/color combination chosen for a product.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VariantSelection {
    pub size: Option<String>,
    pub color: Option<String>,
}

/// A product in the cart. `unit_price` is tax-inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: String,
    pub name: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub variant: VariantSelection,
    pub unit_price: Decimal,
    pub quantity: u32,
}

impl CartLine {
    /// Price times quantity; fails instead of overflowing.
    pub fn line_total(&self) -> Result<Decimal, ServiceError> {
        self.unit_price
            .checked_mul(Decimal::from(self.quantity))
            .ok_or_else(|| {
                ServiceError::InvalidInput(format!(
                    "Line total for {} is out of range",
                    self.product_id
                ))
            })
    }

    fn same_item(&self, product_id: &str, variant: &VariantSelection) -> bool {
        self.product_id == product_id && &self.variant == variant
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
}

impl Cart {
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn item_count(&self) -> u32 {
        self.lines
            .iter()
            .fold(0u32, |count, line| count.saturating_add(line.quantity))
    }

    /// Adds a line, merging it into an existing line for the same product and variant.
    pub fn add(&mut self, line: CartLine) -> Result<(), ServiceError> {
        check_quantity(line.quantity)?;
        if line.unit_price < Decimal::ZERO {
            return Err(ServiceError::InvalidInput(
                "Unit price cannot be negative".to_string(),
            ));
        }
        if line.unit_price > MAX_UNIT_PRICE {
            return Err(ServiceError::InvalidInput(format!(
                "Unit price cannot exceed {MAX_UNIT_PRICE}"
            )));
        }

        match self
            .lines
            .iter_mut()
            .find(|existing| existing.same_item(&line.product_id, &line.variant))
        {
            Some(existing) => {
                let merged = existing
                    .quantity
                    .checked_add(line.quantity)
                    .unwrap_or(u32::MAX);
                check_quantity(merged)?;
                existing.quantity = merged;
            }
            None => self.lines.push(line),
        }
        Ok(())
    }

    pub fn remove(
        &mut self,
        product_id: &str,
        variant: &VariantSelection,
    ) -> Result<CartLine, ServiceError> {
        let index = self.position(product_id, variant)?;
        Ok(self.lines.remove(index))
    }

    pub fn update_quantity(
        &mut self,
        product_id: &str,
        variant: &VariantSelection,
        quantity: u32,
    ) -> Result<(), ServiceError> {
        check_quantity(quantity)?;
        let index = self.position(product_id, variant)?;
        self.lines[index].quantity = quantity;
        Ok(())
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    fn position(&self, product_id: &str, variant: &VariantSelection) -> Result<usize, ServiceError> {
        self.lines
            .iter()
            .position(|line| line.same_item(product_id, variant))
            .ok_or_else(|| ServiceError::NotFound(format!("Product {product_id} is not in the cart")))
    }
}

fn check_quantity(quantity: u32) -> Result<(), ServiceError> {
    if quantity < 1 {
        return Err(ServiceError::InvalidInput(
            "Quantity must be at least 1".to_string(),
        ));
    }
    if quantity > MAX_LINE_QUANTITY {
        return Err(ServiceError::InvalidInput(format!(
            "Quantity cannot exceed {MAX_LINE_QUANTITY}"
        )));
    }
    Ok(())
}
