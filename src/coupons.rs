//! Coupons

use std::fmt;

use jiff::Timestamp;
use thiserror::Error;

use crate::discounts::CouponDiscount;

/// Errors raised while looking up or validating a coupon.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CouponError {
    /// No coupon exists with this code.
    #[error("coupon {0} not found")]
    NotFound(CouponCode),

    /// The coupon's validity window has ended.
    #[error("coupon {0} has expired")]
    Expired(CouponCode),

    /// The coupon's validity window has not started yet.
    #[error("coupon {0} is not valid yet")]
    NotYetValid(CouponCode),

    /// The coupon store could not be reached.
    #[error("coupon service unavailable: {0}")]
    Unavailable(String),
}

/// A malformed coupon code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("coupon code must not be empty")]
pub struct EmptyCouponCode;

/// Normalised coupon code (trimmed and upper-cased).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CouponCode(String);

impl CouponCode {
    /// Parse a customer-entered code.
    ///
    /// # Errors
    ///
    /// Returns [`EmptyCouponCode`] if nothing but whitespace was entered.
    pub fn parse(raw: &str) -> Result<Self, EmptyCouponCode> {
        let trimmed = raw.trim();

        if trimmed.is_empty() {
            return Err(EmptyCouponCode);
        }

        Ok(Self(trimmed.to_uppercase()))
    }

    /// The normalised code.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CouponCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A discount code together with its validity window.
#[derive(Debug, Clone, PartialEq)]
pub struct Coupon {
    /// Unique code
    pub code: CouponCode,

    /// What the coupon takes off
    pub discount: CouponDiscount,

    /// First instant the coupon may be used
    pub valid_from: Option<Timestamp>,

    /// Instant from which the coupon is expired
    pub valid_until: Option<Timestamp>,
}

impl Coupon {
    /// Create a coupon with no validity window.
    pub fn new(code: CouponCode, discount: CouponDiscount) -> Self {
        Self {
            code,
            discount,
            valid_from: None,
            valid_until: None,
        }
    }

    /// Restrict the coupon to `[from, until)`.
    #[must_use]
    pub fn with_window(mut self, from: Option<Timestamp>, until: Option<Timestamp>) -> Self {
        self.valid_from = from;
        self.valid_until = until;
        self
    }

    /// Check the coupon can be used at `at`.
    ///
    /// # Errors
    ///
    /// - [`CouponError::NotYetValid`]: `at` is before `valid_from`.
    /// - [`CouponError::Expired`]: `at` is at or after `valid_until`.
    pub fn check_window(&self, at: Timestamp) -> Result<(), CouponError> {
        if self.valid_from.is_some_and(|from| at < from) {
            return Err(CouponError::NotYetValid(self.code.clone()));
        }

        if self.valid_until.is_some_and(|until| at >= until) {
            return Err(CouponError::Expired(self.code.clone()));
        }

        Ok(())
    }
}
