//! Discounts
//!
//! Coupon discount values and the arithmetic that turns them into an amount
//! off a cart subtotal.

use decimal_percentage::Percentage;
use rust_decimal::{
    Decimal, RoundingStrategy,
    prelude::{FromPrimitive, ToPrimitive},
};
use rusty_money::Money;
use thiserror::Error;

use crate::pricing::Amount;

/// Errors specific to discount calculations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DiscountError {
    /// Percentage calculation could not be safely converted.
    #[error("percentage conversion overflowed or was not finite")]
    PercentConversion,

    /// A fixed amount coupon is priced in a different currency to the cart.
    #[error("coupon currency {actual} does not match cart currency {expected}")]
    CurrencyMismatch {
        /// Cart currency code
        expected: &'static str,
        /// Coupon currency code
        actual: &'static str,
    },
}

/// The value a coupon takes off a cart.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum CouponDiscount {
    /// Percentage of the subtotal (e.g., "10% off")
    PercentageOff(Percentage),

    /// Fixed amount off the subtotal (e.g., "$5 off")
    AmountOff(Amount),
}

impl CouponDiscount {
    /// Discount this coupon grants on `subtotal`.
    ///
    /// The result is clamped to `[0, subtotal]`, so a coupon can never make a
    /// cart negative.
    ///
    /// # Errors
    ///
    /// - [`DiscountError::PercentConversion`]: the percentage could not be applied in minor units.
    /// - [`DiscountError::CurrencyMismatch`]: a fixed amount is in another currency.
    pub fn amount_for(&self, subtotal: Amount) -> Result<Amount, DiscountError> {
        let subtotal_minor = subtotal.to_minor_units().max(0);

        let discount_minor = match self {
            CouponDiscount::PercentageOff(percent) => percent_of_minor(percent, subtotal_minor)?,
            CouponDiscount::AmountOff(amount) => {
                if amount.currency() != subtotal.currency() {
                    return Err(DiscountError::CurrencyMismatch {
                        expected: subtotal.currency().iso_alpha_code,
                        actual: amount.currency().iso_alpha_code,
                    });
                }

                amount.to_minor_units()
            }
        };

        Ok(Money::from_minor(
            discount_minor.clamp(0, subtotal_minor),
            subtotal.currency(),
        ))
    }
}

/// Calculate a percentage of a minor unit amount, rounding half away from zero.
///
/// # Errors
///
/// Returns [`DiscountError::PercentConversion`] if the calculation overflows.
pub fn percent_of_minor(percent: &Percentage, minor: i64) -> Result<i64, DiscountError> {
    let minor = Decimal::from_i64(minor).ok_or(DiscountError::PercentConversion)?;

    // decimal_percentage does not expose its inner value; multiplying by one
    // yields it as a plain Decimal.
    ((*percent) * Decimal::ONE)
        .checked_mul(minor)
        .ok_or(DiscountError::PercentConversion)?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .ok_or(DiscountError::PercentConversion)
}
