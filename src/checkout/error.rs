//! Checkout Errors

use thiserror::Error;

use crate::{
    billing::{Field, ValidationErrors},
    cart::CartError,
    checkout::step::CheckoutStep,
    coupons::{CouponCode, CouponError, EmptyCouponCode},
    ids::{PaymentReference, PlanUuid},
    ports::{
        catalog::CatalogError, orders::OrderServiceError, payments::GatewayError,
        payments::PaymentMethod, tax::TaxError,
    },
    pricing::TotalsError,
};

/// Errors returned by checkout operations.
///
/// Every variant is reported at the operation that caused it; none of them
/// ends the session.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// Required fields are missing or malformed.
    #[error(transparent)]
    Validation(#[from] ValidationErrors),

    /// Quantities must be at least one.
    #[error("quantity must be at least 1")]
    InvalidQuantity,

    /// The catalog has no such plan.
    #[error("plan {0} not found")]
    PlanNotFound(PlanUuid),

    /// The plan is priced in another currency.
    #[error(transparent)]
    CurrencyMismatch(CartError),

    /// No coupon exists with this code.
    #[error("coupon {0} not found")]
    CouponNotFound(CouponCode),

    /// The coupon has expired.
    #[error("coupon {0} has expired")]
    CouponExpired(CouponCode),

    /// The coupon cannot be used yet.
    #[error("coupon {0} is not valid yet")]
    CouponNotYetValid(CouponCode),

    /// Nothing usable was entered as a coupon code.
    #[error(transparent)]
    InvalidCouponCode(#[from] EmptyCouponCode),

    /// The gateway declined or rejected the charge.
    #[error("payment failed: {reason}")]
    PaymentFailed {
        /// Reason from the gateway
        reason: String,
    },

    /// The gateway did not answer in time. The charge may still succeed and
    /// must be reconciled.
    #[error("payment {reference} timed out awaiting the gateway")]
    PaymentTimeout {
        /// Unresolved charge
        reference: PaymentReference,
    },

    /// The gateway call failed without saying whether the charge was taken.
    /// The payment stays pending until reconciled.
    #[error("payment {reference} could not be confirmed: {reason}")]
    PaymentUnconfirmed {
        /// Unresolved charge
        reference: PaymentReference,
        /// Transport failure reported by the gateway
        reason: String,
    },

    /// A previous submission has not been resolved yet.
    #[error("payment {reference} is still in flight")]
    PaymentInFlight {
        /// Unresolved charge
        reference: PaymentReference,
    },

    /// The payment step is only left by submitting payment.
    #[error("submit payment to complete checkout")]
    PaymentRequired,

    /// No gateway is registered for this method.
    #[error("payment method {0} is not supported")]
    UnsupportedPaymentMethod(PaymentMethod),

    /// The operation is not allowed on the current step.
    #[error("expected the {expected} step, but the checkout is on {actual}")]
    WrongStep {
        /// Step the operation needs
        expected: CheckoutStep,
        /// Current step
        actual: CheckoutStep,
    },

    /// The order was placed; the session accepts no further changes.
    #[error("checkout already completed")]
    SessionCompleted,

    /// Totals could not be computed.
    #[error(transparent)]
    Totals(#[from] TotalsError),

    /// The catalog could not be reached.
    #[error("catalog unavailable: {0}")]
    CatalogUnavailable(String),

    /// The coupon service could not be reached.
    #[error("coupon service unavailable: {0}")]
    CouponServiceUnavailable(String),

    /// Tax could not be calculated.
    #[error(transparent)]
    Tax(#[from] TaxError),

    /// The gateway could not be queried.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// The order service rejected or failed the request.
    #[error(transparent)]
    Orders(#[from] OrderServiceError),
}

impl CheckoutError {
    /// Whether the customer can correct or retry within the same session.
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            CheckoutError::SessionCompleted
                | CheckoutError::CurrencyMismatch(_)
                | CheckoutError::Totals(_)
        )
    }

    /// Message suitable for showing to the customer.
    pub fn user_message(&self) -> String {
        match self {
            CheckoutError::Validation(errors) => {
                let fields = errors
                    .missing_fields()
                    .iter()
                    .chain(errors.malformed_fields())
                    .map(|field| field_label(*field))
                    .collect::<Vec<_>>();

                format!("Please check the following: {}.", fields.join(", "))
            }
            CheckoutError::InvalidQuantity => "Quantity must be at least 1.".to_string(),
            CheckoutError::PlanNotFound(_) => "That plan is no longer available.".to_string(),
            CheckoutError::CurrencyMismatch(_) => {
                "That plan cannot be bought together with your cart.".to_string()
            }
            CheckoutError::CouponNotFound(code) => format!("Coupon {code} does not exist."),
            CheckoutError::CouponExpired(code) => format!("Coupon {code} has expired."),
            CheckoutError::CouponNotYetValid(code) => format!("Coupon {code} is not active yet."),
            CheckoutError::InvalidCouponCode(_) => "Please enter a coupon code.".to_string(),
            CheckoutError::PaymentFailed { reason } => format!("Payment failed: {reason}."),
            CheckoutError::PaymentTimeout { .. } => {
                "Your payment is taking longer than expected. We will confirm it shortly."
                    .to_string()
            }
            CheckoutError::PaymentUnconfirmed { .. } => {
                "We could not confirm your payment. Please check its status before paying again."
                    .to_string()
            }
            CheckoutError::PaymentInFlight { .. } => {
                "Your previous payment is still being processed.".to_string()
            }
            CheckoutError::PaymentRequired => "Please complete payment to continue.".to_string(),
            CheckoutError::UnsupportedPaymentMethod(method) => {
                format!("Paying by {} is not available.", method_label(*method))
            }
            CheckoutError::WrongStep { expected, .. } => {
                format!("Please return to the {} step.", step_label(*expected))
            }
            CheckoutError::SessionCompleted => "Your order has already been placed.".to_string(),
            CheckoutError::Totals(_) => "Your cart total could not be calculated.".to_string(),
            CheckoutError::CatalogUnavailable(_)
            | CheckoutError::CouponServiceUnavailable(_)
            | CheckoutError::Tax(_)
            | CheckoutError::Gateway(_)
            | CheckoutError::Orders(_) => {
                "Something went wrong on our side. Please try again.".to_string()
            }
        }
    }
}

impl From<CatalogError> for CheckoutError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::NotFound(plan) => CheckoutError::PlanNotFound(plan),
            CatalogError::Unavailable(reason) => CheckoutError::CatalogUnavailable(reason),
        }
    }
}

impl From<CouponError> for CheckoutError {
    fn from(error: CouponError) -> Self {
        match error {
            CouponError::NotFound(code) => CheckoutError::CouponNotFound(code),
            CouponError::Expired(code) => CheckoutError::CouponExpired(code),
            CouponError::NotYetValid(code) => CheckoutError::CouponNotYetValid(code),
            CouponError::Unavailable(reason) => CheckoutError::CouponServiceUnavailable(reason),
        }
    }
}

impl From<CartError> for CheckoutError {
    fn from(error: CartError) -> Self {
        match error {
            CartError::InvalidQuantity => CheckoutError::InvalidQuantity,
            mismatch @ CartError::CurrencyMismatch { .. } => {
                CheckoutError::CurrencyMismatch(mismatch)
            }
        }
    }
}

fn field_label(field: Field) -> &'static str {
    match field {
        Field::Cart => "your cart is empty",
        Field::FirstName => "first name",
        Field::LastName => "last name",
        Field::Email => "email address",
        Field::Address => "address",
        Field::City => "city",
        Field::PostalCode => "postal code",
        Field::Country => "country",
        Field::PaymentMethod => "payment method",
    }
}

fn method_label(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Card => "card",
        PaymentMethod::PayPal => "PayPal",
        PaymentMethod::Crypto => "crypto",
        PaymentMethod::WalletBalance => "wallet balance",
    }
}

fn step_label(step: CheckoutStep) -> &'static str {
    match step {
        CheckoutStep::CartReview => "cart",
        CheckoutStep::Billing => "billing",
        CheckoutStep::Payment => "payment",
        CheckoutStep::Confirmation => "confirmation",
    }
}
