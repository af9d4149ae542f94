use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::config::PricingConfig;
use crate::errors::ServiceError;
use crate::models::cart::CartLine;
use crate::services::shipping::ShippingZone;

/// A volume discount tier: carts at or above `threshold` get `rate` off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountTier {
    pub threshold: Decimal,
    pub rate: Decimal,
}

/// Pricing rules for the store currency. All amounts are tax-inclusive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingPolicy {
    pub tax_rate: Decimal,
    pub minor_units: u32,
    /// Sorted by ascending threshold
    pub discount_tiers: Vec<DiscountTier>,
    pub free_shipping_threshold: Decimal,
    pub regional_shipping_fee: Decimal,
    pub nationwide_shipping_fee: Decimal,
}

impl From<&PricingConfig> for PricingPolicy {
    fn from(cfg: &PricingConfig) -> Self {
        let mut discount_tiers: Vec<DiscountTier> = cfg
            .discount_tiers
            .iter()
            .map(|tier| DiscountTier {
                threshold: Decimal::from(tier.threshold),
                rate: Decimal::from(tier.percent) / Decimal::ONE_HUNDRED,
            })
            .collect();
        discount_tiers.sort_by_key(|tier| tier.threshold);

        Self {
            tax_rate: Decimal::from(cfg.tax_rate_percent) / Decimal::ONE_HUNDRED,
            minor_units: cfg.minor_units,
            discount_tiers,
            free_shipping_threshold: Decimal::from(cfg.free_shipping_threshold),
            regional_shipping_fee: Decimal::from(cfg.regional_shipping_fee),
            nationwide_shipping_fee: Decimal::from(cfg.nationwide_shipping_fee),
        }
    }
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self::from(&PricingConfig::default())
    }
}

/// Tax-exclusive base and tax portion of a tax-inclusive amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub base: Decimal,
    pub tax: Decimal,
}

/// Totals for a cart and destination, computed fresh on every call.
///
/// `subtotal + tax_amount == subtotal_with_tax` and
/// `subtotal_with_tax - discount_amount + shipping_cost == total` hold exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingSnapshot {
    /// Tax-exclusive base
    pub subtotal: Decimal,
    pub tax_amount: Decimal,
    pub subtotal_with_tax: Decimal,
    pub discount_rate: Decimal,
    pub discount_amount: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
}

impl PricingSnapshot {
    pub fn empty() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            tax_amount: Decimal::ZERO,
            subtotal_with_tax: Decimal::ZERO,
            discount_rate: Decimal::ZERO,
            discount_amount: Decimal::ZERO,
            shipping_cost: Decimal::ZERO,
            total: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PricingEngine {
    policy: PricingPolicy,
}

impl PricingEngine {
    pub fn new(policy: PricingPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    fn round(&self, value: Decimal) -> Decimal {
        value.round_dp_with_strategy(
            self.policy.minor_units,
            RoundingStrategy::MidpointAwayFromZero,
        )
    }

    /// Splits a tax-inclusive amount into its base and tax.
    pub fn back_calculate(&self, price: Decimal) -> TaxBreakdown {
        let base = self.round(price / (Decimal::ONE + self.policy.tax_rate));
        TaxBreakdown {
            base,
            tax: price - base,
        }
    }

    pub fn discount_rate(&self, subtotal_with_tax: Decimal) -> Decimal {
        self.policy
            .discount_tiers
            .iter()
            .filter(|tier| subtotal_with_tax >= tier.threshold)
            .map(|tier| tier.rate)
            .last()
            .unwrap_or(Decimal::ZERO)
    }

    /// Shipping fee for a destination zone, judged on the pre-discount subtotal.
    pub fn shipping_fee(&self, subtotal_with_tax: Decimal, zone: ShippingZone) -> Decimal {
        if subtotal_with_tax > self.policy.free_shipping_threshold {
            return Decimal::ZERO;
        }
        match zone {
            ShippingZone::RegionalCod => self.policy.regional_shipping_fee,
            ShippingZone::Nationwide => self.policy.nationwide_shipping_fee,
        }
    }

    /// Prices a cart. Tax is back-calculated per line and then summed.
    ///
    /// Fails with `InvalidInput` when a line or running total leaves the
    /// representable range.
    #[instrument(skip(self, lines), fields(lines = lines.len()))]
    pub fn quote(
        &self,
        lines: &[CartLine],
        zone: ShippingZone,
    ) -> Result<PricingSnapshot, ServiceError> {
        if lines.is_empty() {
            return Ok(PricingSnapshot::empty());
        }

        let (subtotal, tax_amount, subtotal_with_tax) = lines.iter().try_fold(
            (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
            |(base_sum, tax_sum, gross_sum), line| {
                let gross = line.line_total()?;
                let breakdown = self.back_calculate(gross);
                Ok::<_, ServiceError>((
                    checked_sum(base_sum, breakdown.base)?,
                    checked_sum(tax_sum, breakdown.tax)?,
                    checked_sum(gross_sum, gross)?,
                ))
            },
        )?;

        let discount_rate = self.discount_rate(subtotal_with_tax);
        let discount_amount = self.round(
            subtotal_with_tax
                .checked_mul(discount_rate)
                .ok_or_else(out_of_range)?,
        );
        let shipping_cost = self.shipping_fee(subtotal_with_tax, zone);

        Ok(PricingSnapshot {
            subtotal,
            tax_amount,
            subtotal_with_tax,
            discount_rate,
            discount_amount,
            shipping_cost,
            total: checked_sum(subtotal_with_tax - discount_amount, shipping_cost)?,
        })
    }
}

fn checked_sum(a: Decimal, b: Decimal) -> Result<Decimal, ServiceError> {
    a.checked_add(b).ok_or_else(out_of_range)
}

fn out_of_range() -> ServiceError {
    ServiceError::InvalidInput("Cart total is out of range".to_string())
}
