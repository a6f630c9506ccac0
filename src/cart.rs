//! Cart

use std::num::NonZeroU32;

use rusty_money::{Money, iso::Currency};
use thiserror::Error;

use crate::{
    coupons::Coupon,
    ids::PlanUuid,
    ports::catalog::Plan,
    pricing::{Amount, TotalsError, line_total},
};

/// Errors related to cart mutation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CartError {
    /// Quantities must be at least one.
    #[error("quantity must be at least 1")]
    InvalidQuantity,

    /// A plan's currency differs from the cart currency.
    #[error("plan {plan} is priced in {actual}, but the cart is in {expected}")]
    CurrencyMismatch {
        /// Offending plan
        plan: PlanUuid,
        /// Cart currency code
        expected: &'static str,
        /// Plan currency code
        actual: &'static str,
    },
}

/// A plan line in the cart.
#[derive(Debug, Clone, PartialEq)]
pub struct CartItem {
    /// Plan this line is for
    pub plan: PlanUuid,

    /// Plan name at the time it was added
    pub name: String,

    /// Unit price at the time it was added
    pub unit_price: Amount,

    /// Number of units
    pub quantity: NonZeroU32,

    /// Plan image
    pub image_ref: Option<String>,
}

impl CartItem {
    /// Unit price multiplied by quantity.
    ///
    /// # Errors
    ///
    /// Returns [`TotalsError::Overflow`] if the line total does not fit in minor units.
    pub fn line_total(&self) -> Result<Amount, TotalsError> {
        line_total(self.unit_price, self.quantity.get())
    }
}

/// A customer's in-progress selection of plans.
#[derive(Debug, Clone)]
pub struct Cart {
    items: Vec<CartItem>,
    currency: &'static Currency,
    coupon: Option<Coupon>,
}

impl Cart {
    /// Create an empty cart priced in `currency`.
    pub fn new(currency: &'static Currency) -> Self {
        Self {
            items: Vec::new(),
            currency,
            coupon: None,
        }
    }

    /// Add `quantity` units of `plan`, merging into an existing line for the same plan.
    ///
    /// # Errors
    ///
    /// - [`CartError::InvalidQuantity`]: `quantity` is zero.
    /// - [`CartError::CurrencyMismatch`]: the plan is priced in another currency.
    pub fn add_item(&mut self, plan: &Plan, quantity: u32) -> Result<(), CartError> {
        let quantity = NonZeroU32::new(quantity).ok_or(CartError::InvalidQuantity)?;

        if plan.price.currency() != self.currency {
            return Err(CartError::CurrencyMismatch {
                plan: plan.uuid,
                expected: self.currency.iso_alpha_code,
                actual: plan.price.currency().iso_alpha_code,
            });
        }

        if let Some(existing) = self.items.iter_mut().find(|item| item.plan == plan.uuid) {
            existing.quantity = existing.quantity.saturating_add(quantity.get());

            return Ok(());
        }

        self.items.push(CartItem {
            plan: plan.uuid,
            name: plan.name.clone(),
            unit_price: plan.price,
            quantity,
            image_ref: plan.image_ref.clone(),
        });

        Ok(())
    }

    /// Remove the line for `plan`. Returns whether a line was removed.
    pub fn remove_item(&mut self, plan: PlanUuid) -> bool {
        let before = self.items.len();

        self.items.retain(|item| item.plan != plan);

        self.items.len() != before
    }

    /// Adjust the quantity of `plan` by `delta`, never going below one.
    ///
    /// Returns the new quantity, or `None` if the plan is not in the cart.
    pub fn change_quantity(&mut self, plan: PlanUuid, delta: i64) -> Option<NonZeroU32> {
        let item = self.items.iter_mut().find(|item| item.plan == plan)?;

        let target = i64::from(item.quantity.get())
            .saturating_add(delta)
            .clamp(1, i64::from(u32::MAX));

        let quantity = u32::try_from(target)
            .ok()
            .and_then(NonZeroU32::new)
            .unwrap_or(NonZeroU32::MIN);

        item.quantity = quantity;

        Some(quantity)
    }

    /// Apply `coupon`, returning any coupon it replaced.
    pub fn apply_coupon(&mut self, coupon: Coupon) -> Option<Coupon> {
        self.coupon.replace(coupon)
    }

    /// Remove the applied coupon.
    pub fn remove_coupon(&mut self) -> Option<Coupon> {
        self.coupon.take()
    }

    /// Remove all lines and the applied coupon.
    pub fn clear(&mut self) {
        self.items.clear();
        self.coupon = None;
    }

    /// Sum of all line totals.
    ///
    /// # Errors
    ///
    /// Returns a [`TotalsError`] if a line overflows.
    pub fn subtotal(&self) -> Result<Amount, TotalsError> {
        self.items.iter().try_fold(
            Money::from_minor(0, self.currency),
            |acc, item| Ok(acc.add(item.line_total()?)?),
        )
    }

    /// Cart lines in insertion order.
    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    /// The line for `plan`, if present.
    pub fn item(&self, plan: PlanUuid) -> Option<&CartItem> {
        self.items.iter().find(|item| item.plan == plan)
    }

    /// Applied coupon, if any.
    pub fn coupon(&self) -> Option<&Coupon> {
        self.coupon.as_ref()
    }

    /// Cart currency.
    pub fn currency(&self) -> &'static Currency {
        self.currency
    }

    /// Number of lines.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the cart has no lines.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units across all lines.
    pub fn item_count(&self) -> u64 {
        self.items
            .iter()
            .map(|item| u64::from(item.quantity.get()))
            .sum()
    }
}
