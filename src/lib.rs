//! Tollgate
//!
//! Tollgate is the checkout core of a proxy and VPN storefront: cart state,
//! coupon discounts, a step-by-step checkout and payment submission, kept
//! independent of any web framework. Catalog, coupons, tax, payment
//! gateways and order storage are reached through the traits in [`ports`].

pub mod billing;
pub mod cart;
pub mod checkout;
pub mod coupons;
pub mod discounts;
pub mod ids;
pub mod memory;
pub mod orders;
pub mod ports;
pub mod prelude;
pub mod pricing;
pub mod summary;
