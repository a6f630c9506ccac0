//! Pricing
//!
//! Pure total computation for a cart. Nothing here performs I/O; the tax
//! amount is supplied by the caller so the same inputs always produce the
//! same totals.

use rusty_money::{Money, MoneyError, iso::Currency};
use thiserror::Error;

use crate::{
    cart::Cart,
    discounts::{CouponDiscount, DiscountError},
};

/// Money in a fixed ISO currency.
pub type Amount = Money<'static, Currency>;

/// Errors that can occur while computing totals.
#[derive(Debug, Error)]
pub enum TotalsError {
    /// A line total overflowed minor units.
    #[error("line total overflowed")]
    Overflow,

    /// Tax was negative.
    #[error("tax amount must not be negative")]
    NegativeTax,

    /// Tax was supplied in another currency.
    #[error("tax currency {actual} does not match cart currency {expected}")]
    TaxCurrencyMismatch {
        /// Cart currency code
        expected: &'static str,
        /// Tax currency code
        actual: &'static str,
    },

    /// Wrapped discount error.
    #[error(transparent)]
    Discount(#[from] DiscountError),

    /// Wrapped money arithmetic or currency mismatch error.
    #[error(transparent)]
    Money(#[from] MoneyError),
}

/// Totals shown to the customer and charged at payment.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct CheckoutTotals {
    /// Sum of all line totals
    pub subtotal: Amount,

    /// Coupon discount, between zero and the subtotal
    pub discount: Amount,

    /// Tax on the discounted subtotal
    pub tax: Amount,

    /// `subtotal - discount + tax`
    pub grand_total: Amount,
}

impl CheckoutTotals {
    /// All-zero totals in `currency`.
    pub fn zero(currency: &'static Currency) -> Self {
        let zero = Money::from_minor(0, currency);

        Self {
            subtotal: zero,
            discount: zero,
            tax: zero,
            grand_total: zero,
        }
    }
}

/// Subtotal and discount of a cart, before tax.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct PriceBreakdown {
    /// Sum of all line totals
    pub subtotal: Amount,

    /// Coupon discount
    pub discount: Amount,

    /// Amount tax is charged on
    pub taxable: Amount,
}

impl PriceBreakdown {
    /// Price the cart's lines and applied coupon.
    ///
    /// # Errors
    ///
    /// Returns a [`TotalsError`] if a line overflows or the coupon cannot be applied.
    pub fn for_cart(cart: &Cart) -> Result<Self, TotalsError> {
        let subtotal = cart.subtotal()?;

        let discount = match cart.coupon() {
            Some(coupon) => coupon.discount.amount_for(subtotal)?,
            None => Money::from_minor(0, cart.currency()),
        };

        Self::new(subtotal, discount)
    }

    /// Breakdown for a known subtotal and discount.
    ///
    /// The discount is clamped to `[0, subtotal]`.
    ///
    /// # Errors
    ///
    /// Returns [`TotalsError::Discount`] if the discount is in another currency.
    pub fn new(subtotal: Amount, discount: Amount) -> Result<Self, TotalsError> {
        if discount.currency() != subtotal.currency() {
            return Err(DiscountError::CurrencyMismatch {
                expected: subtotal.currency().iso_alpha_code,
                actual: discount.currency().iso_alpha_code,
            }
            .into());
        }

        let ceiling = subtotal.to_minor_units().max(0);
        let discount = Money::from_minor(
            discount.to_minor_units().clamp(0, ceiling),
            subtotal.currency(),
        );
        let taxable = subtotal.sub(discount)?;

        Ok(Self {
            subtotal,
            discount,
            taxable,
        })
    }

    /// Breakdown for a subtotal and a coupon discount value.
    ///
    /// # Errors
    ///
    /// Returns a [`TotalsError`] if the coupon cannot be applied.
    pub fn with_coupon(subtotal: Amount, coupon: &CouponDiscount) -> Result<Self, TotalsError> {
        let discount = coupon.amount_for(subtotal)?;

        Self::new(subtotal, discount)
    }

    /// Complete the breakdown with a tax amount.
    ///
    /// # Errors
    ///
    /// - [`TotalsError::NegativeTax`]: tax is below zero.
    /// - [`TotalsError::TaxCurrencyMismatch`]: tax is in another currency.
    pub fn with_tax(self, tax: Amount) -> Result<CheckoutTotals, TotalsError> {
        if tax.currency() != self.subtotal.currency() {
            return Err(TotalsError::TaxCurrencyMismatch {
                expected: self.subtotal.currency().iso_alpha_code,
                actual: tax.currency().iso_alpha_code,
            });
        }

        if tax.to_minor_units() < 0 {
            return Err(TotalsError::NegativeTax);
        }

        Ok(CheckoutTotals {
            subtotal: self.subtotal,
            discount: self.discount,
            tax,
            grand_total: self.taxable.add(tax)?,
        })
    }
}

/// Compute the totals for a cart given the tax on its discounted subtotal.
///
/// # Errors
///
/// Returns a [`TotalsError`] if the breakdown or tax is invalid.
pub fn compute_totals(cart: &Cart, tax: Amount) -> Result<CheckoutTotals, TotalsError> {
    PriceBreakdown::for_cart(cart)?.with_tax(tax)
}

/// Multiply a unit price by a quantity.
///
/// # Errors
///
/// Returns [`TotalsError::Overflow`] if the result does not fit in minor units.
pub fn line_total(unit_price: Amount, quantity: u32) -> Result<Amount, TotalsError> {
    let minor = unit_price
        .to_minor_units()
        .checked_mul(i64::from(quantity))
        .ok_or(TotalsError::Overflow)?;

    Ok(Money::from_minor(minor, unit_price.currency()))
}
