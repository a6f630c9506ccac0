//! Tollgate prelude.
//!
//! Convenience exports for common library consumers.

pub use crate::{
    billing::{BillingDetails, Field, ValidationErrors},
    cart::{Cart, CartError, CartItem},
    checkout::{
        CheckoutConfig, CheckoutError, CheckoutEvent, CheckoutFlow, CheckoutObserver,
        CheckoutStep, NoopObserver, ReconcileOutcome, RecordingObserver,
    },
    coupons::{Coupon, CouponCode, CouponError},
    discounts::{CouponDiscount, DiscountError},
    ids::{OrderUuid, PaymentReference, PlanUuid},
    memory::{
        FlatRateTax, InMemoryCatalog, InMemoryCoupons, InMemoryOrders, ScriptedGateway,
        WalletGateway,
    },
    orders::{OrderSnapshot, OrderStatus},
    ports::{
        CheckoutServices, Plan, PaymentDetails, PaymentGateways, PaymentMethod,
    },
    pricing::{Amount, CheckoutTotals, PriceBreakdown, TotalsError, compute_totals},
    summary::{CheckoutSummary, SummaryError},
};
