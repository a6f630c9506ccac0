//! Coupon Lookup

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::coupons::{Coupon, CouponCode, CouponError};

/// Source of coupon definitions.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CouponService: Send + Sync {
    /// Look up and validate a coupon by code.
    ///
    /// Implementations return [`CouponError::NotFound`] for unknown codes and
    /// may reject expired coupons themselves; the checkout re-checks the
    /// validity window either way.
    async fn find_coupon(&self, code: &CouponCode) -> Result<Coupon, CouponError>;
}
