//! Orders
//!
//! The order snapshot frozen at payment submission and the lifecycle an
//! order moves through once created.

use std::fmt;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

use crate::{
    billing::BillingDetails,
    cart::{Cart, CartItem},
    coupons::CouponCode,
    ids::{PaymentReference, PlanUuid},
    ports::payments::PaymentMethod,
    pricing::{Amount, CheckoutTotals, TotalsError},
};

/// Lifecycle of a persisted order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Created, awaiting fulfilment
    Pending,
    /// Being provisioned
    Processing,
    /// Provisioned
    Completed,
    /// Abandoned or refused
    Failed,
}

impl OrderStatus {
    /// Whether an order may move from `self` to `next`.
    pub const fn can_transition_to(self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Processing | OrderStatus::Failed)
                | (
                    OrderStatus::Processing,
                    OrderStatus::Completed | OrderStatus::Failed
                )
        )
    }

    /// Whether no further transitions are possible.
    pub const fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Failed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Failed => "failed",
        })
    }
}

/// A cart line as ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderLine {
    /// Plan ordered
    pub plan: PlanUuid,

    /// Plan name at submission
    pub name: String,

    /// Unit price at submission
    pub unit_price: Amount,

    /// Units ordered
    pub quantity: u32,

    /// `unit_price * quantity`
    pub line_total: Amount,
}

impl OrderLine {
    fn from_item(item: &CartItem) -> Result<Self, TotalsError> {
        Ok(Self {
            plan: item.plan,
            name: item.name.clone(),
            unit_price: item.unit_price,
            quantity: item.quantity.get(),
            line_total: item.line_total()?,
        })
    }
}

/// Everything an order needs, captured when payment is submitted.
///
/// Later cart edits never reach a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderSnapshot {
    /// Customer placing the order
    pub customer: String,

    /// Idempotency key shared with the payment gateway
    pub reference: PaymentReference,

    /// Lines in cart order
    pub lines: Vec<OrderLine>,

    /// Applied coupon code
    pub coupon: Option<CouponCode>,

    /// Totals charged
    pub totals: CheckoutTotals,

    /// Billing details
    pub billing: BillingDetails,

    /// Payment method used
    pub payment_method: PaymentMethod,

    /// Gateway transaction, once known
    pub transaction: Option<String>,

    /// When payment was submitted
    pub submitted_at: Timestamp,
}

impl OrderSnapshot {
    /// Freeze the cart, totals and billing details for submission.
    ///
    /// # Errors
    ///
    /// Returns a [`TotalsError`] if a line total overflows.
    pub fn freeze(
        customer: &str,
        reference: PaymentReference,
        cart: &Cart,
        totals: CheckoutTotals,
        billing: &BillingDetails,
        payment_method: PaymentMethod,
        submitted_at: Timestamp,
    ) -> Result<Self, TotalsError> {
        let lines = cart
            .items()
            .iter()
            .map(OrderLine::from_item)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            customer: customer.to_string(),
            reference,
            lines,
            coupon: cart.coupon().map(|coupon| coupon.code.clone()),
            totals,
            billing: billing.clone(),
            payment_method,
            transaction: None,
            submitted_at,
        })
    }

    /// Record the gateway transaction that paid for this order.
    #[must_use]
    pub fn with_transaction(mut self, transaction: impl Into<String>) -> Self {
        self.transaction = Some(transaction.into());
        self
    }
}
