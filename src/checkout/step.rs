//! Checkout Steps

use std::fmt;

use serde::{Deserialize, Serialize};

/// Position in the linear checkout.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStep {
    /// Reviewing cart lines and coupon
    CartReview = 1,
    /// Entering billing details
    Billing = 2,
    /// Choosing a method and paying
    Payment = 3,
    /// Order placed
    Confirmation = 4,
}

impl CheckoutStep {
    /// One-based step number.
    pub const fn number(self) -> u8 {
        self as u8
    }

    /// The step after this one, if any.
    pub const fn next(self) -> Option<Self> {
        match self {
            CheckoutStep::CartReview => Some(CheckoutStep::Billing),
            CheckoutStep::Billing => Some(CheckoutStep::Payment),
            CheckoutStep::Payment => Some(CheckoutStep::Confirmation),
            CheckoutStep::Confirmation => None,
        }
    }

    /// The step before this one, if any.
    pub const fn previous(self) -> Option<Self> {
        match self {
            CheckoutStep::CartReview => None,
            CheckoutStep::Billing => Some(CheckoutStep::CartReview),
            CheckoutStep::Payment => Some(CheckoutStep::Billing),
            CheckoutStep::Confirmation => Some(CheckoutStep::Payment),
        }
    }

    /// Snake-case step name.
    pub const fn as_str(self) -> &'static str {
        match self {
            CheckoutStep::CartReview => "cart_review",
            CheckoutStep::Billing => "billing",
            CheckoutStep::Payment => "payment",
            CheckoutStep::Confirmation => "confirmation",
        }
    }
}

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steps_are_numbered_from_one() {
        assert_eq!(CheckoutStep::CartReview.number(), 1);
        assert_eq!(CheckoutStep::Confirmation.number(), 4);
    }

    #[test]
    fn next_and_previous_are_bounded() {
        assert_eq!(CheckoutStep::CartReview.previous(), None);
        assert_eq!(CheckoutStep::Confirmation.next(), None);
        assert_eq!(
            CheckoutStep::Billing.next().and_then(CheckoutStep::previous),
            Some(CheckoutStep::Billing)
        );
    }
}
