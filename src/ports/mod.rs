//! Ports
//!
//! Traits for the services a checkout depends on but does not own.

use std::{fmt, sync::Arc};

pub mod catalog;
pub mod coupons;
pub mod orders;
pub mod payments;
pub mod tax;

pub use catalog::{CatalogError, Plan, PlanCatalog};
pub use coupons::CouponService;
pub use orders::{OrderService, OrderServiceError};
pub use payments::{
    ChargeOutcome, ChargeRequest, ChargeStatus, GatewayError, PaymentDetails, PaymentGateway,
    PaymentGateways, PaymentMethod,
};
pub use tax::{TaxError, TaxService};

/// Shared handles to every collaborator a checkout session talks to.
#[derive(Clone)]
pub struct CheckoutServices {
    /// Plan lookup
    pub catalog: Arc<dyn PlanCatalog>,

    /// Coupon lookup
    pub coupons: Arc<dyn CouponService>,

    /// Tax calculation
    pub tax: Arc<dyn TaxService>,

    /// Gateways by payment method
    pub gateways: PaymentGateways,

    /// Order creation
    pub orders: Arc<dyn OrderService>,
}

impl fmt::Debug for CheckoutServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckoutServices")
            .field("gateways", &self.gateways)
            .finish_non_exhaustive()
    }
}
