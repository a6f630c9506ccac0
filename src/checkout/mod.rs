//! Checkout
//!
//! [`CheckoutFlow`] owns one customer's cart and checkout session and moves
//! it through cart review, billing and payment to confirmation.
//!
//! Forward motion is gated by validation; backward motion is not. The
//! confirmation step is only reached by a successful [`CheckoutFlow::submit_payment`]
//! or [`CheckoutFlow::reconcile_payment`].

mod error;
mod events;
mod step;

use std::{num::NonZeroU32, time::Duration};

use jiff::Timestamp;
use rusty_money::iso::{self, Currency};
use tokio::{
    task::{JoinError, JoinHandle},
    time,
};
use tracing::{Span, debug, info, warn};

pub use error::CheckoutError;
pub use events::{CheckoutEvent, CheckoutObserver, NoopObserver, RecordingObserver};
pub use step::CheckoutStep;

use crate::{
    billing::{BillingDetails, Field, ValidationErrors},
    cart::Cart,
    coupons::{Coupon, CouponCode},
    ids::{OrderUuid, PaymentReference, PlanUuid},
    orders::OrderSnapshot,
    ports::{
        CheckoutServices,
        payments::{
            ChargeOutcome, ChargeRequest, ChargeStatus, GatewayError, PaymentDetails,
            PaymentMethod,
        },
    },
    pricing::{CheckoutTotals, PriceBreakdown},
};

/// How long to wait for a gateway before a charge is left for reconciliation.
pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-session settings.
#[derive(Debug, Copy, Clone)]
pub struct CheckoutConfig {
    /// Time allowed for a gateway to answer a charge
    pub gateway_timeout: Duration,

    /// Currency new carts are priced in
    pub currency: &'static Currency,

    /// Fixed session clock; the wall clock when unset
    pub point_in_time: Option<Timestamp>,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            gateway_timeout: DEFAULT_GATEWAY_TIMEOUT,
            currency: iso::USD,
            point_in_time: None,
        }
    }
}

impl CheckoutConfig {
    /// Override the gateway timeout.
    #[must_use]
    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    /// Override the cart currency.
    #[must_use]
    pub fn with_currency(mut self, currency: &'static Currency) -> Self {
        self.currency = currency;
        self
    }

    /// Pin the session clock, e.g. to check coupons as of a past instant.
    #[must_use]
    pub fn with_point_in_time(mut self, at: Timestamp) -> Self {
        self.point_in_time = Some(at);
        self
    }

    /// Current time on the session clock.
    pub fn now(&self) -> Timestamp {
        self.point_in_time.unwrap_or_else(Timestamp::now)
    }
}

/// Result of asking for the outcome of an unresolved payment.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// No payment was awaiting an outcome.
    NothingPending,

    /// The gateway is still processing the charge.
    Pending {
        /// Unresolved charge
        reference: PaymentReference,
    },

    /// The charge succeeded and the order was created.
    Completed {
        /// Created order
        order: OrderUuid,
    },

    /// The gateway never received the charge; the customer may pay again.
    Cleared {
        /// Discarded charge
        reference: PaymentReference,
    },
}

type ChargeResult = Result<ChargeOutcome, GatewayError>;

/// A submitted charge whose outcome has not been applied to the session.
#[derive(Debug)]
struct PendingPayment {
    snapshot: OrderSnapshot,

    /// Gateway call, kept running if the submitting caller gives up on it
    task: Option<JoinHandle<ChargeResult>>,

    /// Set once the gateway approved, so a failed order write can be retried
    transaction: Option<String>,
}

impl PendingPayment {
    fn new(snapshot: OrderSnapshot, task: JoinHandle<ChargeResult>) -> Self {
        Self {
            snapshot,
            task: Some(task),
            transaction: None,
        }
    }

    fn reference(&self) -> PaymentReference {
        self.snapshot.reference
    }

    /// Wait up to `limit` for the gateway call. `None` on timeout.
    async fn settle(&mut self, limit: Duration) -> Option<Result<ChargeResult, JoinError>> {
        let task = self.task.as_mut()?;
        let joined = time::timeout(limit, task).await.ok()?;

        self.task = None;

        Some(joined)
    }

    fn take_finished(&mut self) -> Option<JoinHandle<ChargeResult>> {
        self.task.take_if(|task| task.is_finished())
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn approve(&mut self, transaction: String) -> OrderSnapshot {
        self.transaction = Some(transaction.clone());
        self.snapshot.clone().with_transaction(transaction)
    }
}

/// One customer's checkout session.
#[derive(Debug)]
pub struct CheckoutFlow<O = NoopObserver> {
    customer: String,
    services: CheckoutServices,
    config: CheckoutConfig,
    cart: Cart,
    step: CheckoutStep,
    billing: BillingDetails,
    payment_method: Option<PaymentMethod>,
    pending: Option<PendingPayment>,
    order: Option<OrderUuid>,
    observer: O,
}

impl CheckoutFlow<NoopObserver> {
    /// Start a session with an empty cart.
    pub fn new(
        customer: impl Into<String>,
        services: CheckoutServices,
        config: CheckoutConfig,
    ) -> Self {
        let cart = Cart::new(config.currency);

        Self::resume(customer, cart, services, config)
    }

    /// Start a session from a cart kept by an earlier, abandoned session.
    pub fn resume(
        customer: impl Into<String>,
        cart: Cart,
        services: CheckoutServices,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            customer: customer.into(),
            services,
            config,
            cart,
            step: CheckoutStep::CartReview,
            billing: BillingDetails::default(),
            payment_method: None,
            pending: None,
            order: None,
            observer: NoopObserver,
        }
    }
}

impl<O: CheckoutObserver> CheckoutFlow<O> {
    /// Replace the observer notified of session changes.
    pub fn with_observer<P: CheckoutObserver>(self, observer: P) -> CheckoutFlow<P> {
        CheckoutFlow {
            customer: self.customer,
            services: self.services,
            config: self.config,
            cart: self.cart,
            step: self.step,
            billing: self.billing,
            payment_method: self.payment_method,
            pending: self.pending,
            order: self.order,
            observer,
        }
    }

    /// Add `quantity` units of a catalog plan, merging with an existing line.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::InvalidQuantity`]: `quantity` is zero.
    /// - [`CheckoutError::PlanNotFound`]: the catalog has no such plan.
    /// - [`CheckoutError::PaymentInFlight`]: a payment is awaiting its outcome.
    /// - [`CheckoutError::SessionCompleted`]: the order was already placed.
    #[tracing::instrument(
        name = "checkout.add_item",
        skip(self),
        fields(customer = %self.customer),
        err
    )]
    pub async fn add_item(&mut self, plan: PlanUuid, quantity: u32) -> Result<(), CheckoutError> {
        self.ensure_unlocked()?;

        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity);
        }

        let plan = self.services.catalog.get_plan(plan).await?;

        self.cart.add_item(&plan, quantity)?;

        debug!(plan = %plan.uuid, name = %plan.name, quantity, "added to cart");

        self.emit_cart_changed();

        Ok(())
    }

    /// Remove the line for `plan`. Returns whether a line was removed.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::PaymentInFlight`]: a payment is awaiting its outcome.
    /// - [`CheckoutError::SessionCompleted`]: the order was already placed.
    pub fn remove_item(&mut self, plan: PlanUuid) -> Result<bool, CheckoutError> {
        self.ensure_unlocked()?;

        let removed = self.cart.remove_item(plan);

        if removed {
            debug!(%plan, "removed from cart");
            self.emit_cart_changed();
        }

        Ok(removed)
    }

    /// Adjust the quantity of `plan` by `delta`, never going below one.
    ///
    /// Returns the new quantity, or `None` when the plan is not in the cart.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::PaymentInFlight`]: a payment is awaiting its outcome.
    /// - [`CheckoutError::SessionCompleted`]: the order was already placed.
    pub fn change_quantity(
        &mut self,
        plan: PlanUuid,
        delta: i64,
    ) -> Result<Option<NonZeroU32>, CheckoutError> {
        self.ensure_unlocked()?;

        let quantity = self.cart.change_quantity(plan, delta);

        if quantity.is_some() {
            self.emit_cart_changed();
        }

        Ok(quantity)
    }

    /// Look up and apply a coupon, replacing any applied one.
    ///
    /// On failure the cart and its discount are left as they were.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::InvalidCouponCode`]: `code` is blank.
    /// - [`CheckoutError::CouponNotFound`]: no such coupon.
    /// - [`CheckoutError::CouponExpired`] / [`CheckoutError::CouponNotYetValid`]: outside its window.
    /// - [`CheckoutError::PaymentInFlight`]: a payment is awaiting its outcome.
    /// - [`CheckoutError::SessionCompleted`]: the order was already placed.
    #[tracing::instrument(
        name = "checkout.apply_coupon",
        skip(self),
        fields(customer = %self.customer),
        err
    )]
    pub async fn apply_coupon(&mut self, code: &str) -> Result<(), CheckoutError> {
        self.ensure_unlocked()?;

        let code = CouponCode::parse(code)?;
        let coupon = self.services.coupons.find_coupon(&code).await?;

        coupon.check_window(self.config.now())?;

        let code = coupon.code.clone();

        if let Some(replaced) = self.cart.apply_coupon(coupon) {
            debug!(replaced = %replaced.code, "coupon replaced");
        }

        info!(%code, "coupon applied");

        self.observer.on_event(&CheckoutEvent::CouponApplied { code });

        Ok(())
    }

    /// Remove the applied coupon, returning it.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::PaymentInFlight`]: a payment is awaiting its outcome.
    /// - [`CheckoutError::SessionCompleted`]: the order was already placed.
    pub fn remove_coupon(&mut self) -> Result<Option<Coupon>, CheckoutError> {
        self.ensure_unlocked()?;

        let removed = self.cart.remove_coupon();

        if let Some(coupon) = &removed {
            self.observer.on_event(&CheckoutEvent::CouponRemoved {
                code: coupon.code.clone(),
            });
        }

        Ok(removed)
    }

    /// Replace the billing details. Validation happens when advancing.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::PaymentInFlight`]: a payment is awaiting its outcome.
    /// - [`CheckoutError::SessionCompleted`]: the order was already placed.
    pub fn set_billing(&mut self, billing: BillingDetails) -> Result<(), CheckoutError> {
        self.ensure_unlocked()?;

        self.billing = billing;

        Ok(())
    }

    /// Choose how to pay.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::UnsupportedPaymentMethod`]: no gateway serves `method`.
    /// - [`CheckoutError::PaymentInFlight`]: a payment is awaiting its outcome.
    /// - [`CheckoutError::SessionCompleted`]: the order was already placed.
    pub fn select_payment_method(&mut self, method: PaymentMethod) -> Result<(), CheckoutError> {
        self.ensure_unlocked()?;

        if !self.services.gateways.supports(method) {
            return Err(CheckoutError::UnsupportedPaymentMethod(method));
        }

        self.payment_method = Some(method);

        Ok(())
    }

    /// Validate the current step and move to the next one.
    ///
    /// Leaving the payment step requires submitting payment, so a valid
    /// payment step reports [`CheckoutError::PaymentRequired`]. On the
    /// confirmation step this is a no-op.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::Validation`]: the current step is incomplete; the step is unchanged.
    /// - [`CheckoutError::PaymentRequired`]: the payment step is complete but unpaid.
    #[tracing::instrument(
        name = "checkout.advance_step",
        skip(self),
        fields(customer = %self.customer, step = %self.step),
        err
    )]
    pub fn advance_step(&mut self) -> Result<CheckoutStep, CheckoutError> {
        let next = match self.step {
            CheckoutStep::CartReview => {
                self.cart_errors().into_result()?;
                CheckoutStep::Billing
            }
            CheckoutStep::Billing => {
                self.billing_errors().into_result()?;
                CheckoutStep::Payment
            }
            CheckoutStep::Payment => {
                if self.payment_method.is_none() {
                    return Err(ValidationErrors::missing(Field::PaymentMethod).into());
                }

                return Err(CheckoutError::PaymentRequired);
            }
            CheckoutStep::Confirmation => return Ok(CheckoutStep::Confirmation),
        };

        self.set_step(next);

        Ok(next)
    }

    /// Move back one step, stopping at cart review.
    ///
    /// A completed session stays on confirmation.
    ///
    /// # Errors
    ///
    /// Returns [`CheckoutError::PaymentInFlight`] while a payment is awaiting
    /// its outcome; the session stays on the payment step.
    pub fn retreat_step(&mut self) -> Result<CheckoutStep, CheckoutError> {
        if self.step == CheckoutStep::Confirmation {
            return Ok(self.step);
        }

        self.ensure_unlocked()?;

        if let Some(previous) = self.step.previous() {
            self.set_step(previous);
        }

        Ok(self.step)
    }

    /// Current totals, with tax for the billing country.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::Totals`]: the cart could not be priced.
    /// - [`CheckoutError::Tax`]: the tax service failed.
    #[tracing::instrument(
        name = "checkout.compute_totals",
        skip(self),
        fields(customer = %self.customer),
        err
    )]
    pub async fn compute_totals(&self) -> Result<CheckoutTotals, CheckoutError> {
        let breakdown = PriceBreakdown::for_cart(&self.cart)?;

        let tax = self
            .services
            .tax
            .compute_tax(breakdown.taxable, self.billing.region())
            .await?;

        Ok(breakdown.with_tax(tax)?)
    }

    /// Charge the customer and, on approval, place the order.
    ///
    /// The order snapshot and payment reference are recorded before the
    /// gateway is called, so a second submission is refused until the first
    /// is resolved even if this future is dropped. The gateway call itself
    /// runs to completion in the background.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::PaymentInFlight`]: an earlier submission is unresolved.
    /// - [`CheckoutError::WrongStep`]: the session is not on the payment step.
    /// - [`CheckoutError::Validation`]: the cart is empty or billing is incomplete.
    /// - [`CheckoutError::UnsupportedPaymentMethod`]: no gateway serves `method`.
    /// - [`CheckoutError::PaymentFailed`]: the gateway declined or rejected the charge; the cart is kept.
    /// - [`CheckoutError::PaymentTimeout`]: no answer in time; call [`Self::reconcile_payment`].
    /// - [`CheckoutError::PaymentUnconfirmed`]: the gateway call failed; call [`Self::reconcile_payment`].
    /// - [`CheckoutError::Orders`]: paid, but the order was not recorded; call [`Self::reconcile_payment`].
    /// - [`CheckoutError::SessionCompleted`]: the order was already placed.
    #[tracing::instrument(
        name = "checkout.submit_payment",
        skip(self, details),
        fields(
            customer = %self.customer,
            %method,
            reference = tracing::field::Empty
        ),
        err
    )]
    pub async fn submit_payment(
        &mut self,
        method: PaymentMethod,
        details: PaymentDetails,
    ) -> Result<OrderUuid, CheckoutError> {
        self.ensure_open()?;

        if let Some(pending) = &self.pending {
            warn!(reference = %pending.reference(), "rejected duplicate payment submission");

            return Err(CheckoutError::PaymentInFlight {
                reference: pending.reference(),
            });
        }

        if self.step != CheckoutStep::Payment {
            return Err(CheckoutError::WrongStep {
                expected: CheckoutStep::Payment,
                actual: self.step,
            });
        }

        self.billing_errors().into_result()?;

        let gateway = self
            .services
            .gateways
            .get(method)
            .ok_or(CheckoutError::UnsupportedPaymentMethod(method))?;

        self.payment_method = Some(method);

        let totals = self.compute_totals().await?;
        let reference = PaymentReference::now_v7();

        Span::current().record("reference", tracing::field::display(reference));

        let snapshot = OrderSnapshot::freeze(
            &self.customer,
            reference,
            &self.cart,
            totals,
            &self.billing,
            method,
            self.config.now(),
        )?;

        let request = ChargeRequest {
            reference,
            method,
            amount: totals.grand_total,
            customer: self.customer.clone(),
            details,
        };

        info!(amount = %totals.grand_total, "submitting payment");

        self.observer.on_event(&CheckoutEvent::PaymentSubmitted {
            reference,
            method,
            amount: totals.grand_total,
        });

        let task = tokio::spawn(async move { gateway.charge(request).await });
        let limit = self.config.gateway_timeout;
        let pending = self.pending.insert(PendingPayment::new(snapshot, task));
        let settled = pending.settle(limit).await;

        match settled {
            Some(Ok(Ok(ChargeOutcome::Approved { transaction }))) => {
                let snapshot = pending.approve(transaction);

                self.finalize(snapshot).await
            }
            Some(Ok(Ok(ChargeOutcome::Declined { reason }))) => {
                Err(self.fail_payment(reference, reason))
            }
            Some(Ok(Err(GatewayError::Unavailable(reason)))) => {
                warn!(%reason, "gateway call failed; charge outcome unknown");

                self.observer.on_event(&CheckoutEvent::PaymentPending { reference });

                Err(CheckoutError::PaymentUnconfirmed { reference, reason })
            }
            Some(Ok(Err(error @ GatewayError::Rejected(_)))) => {
                Err(self.fail_payment(reference, error.to_string()))
            }
            Some(Err(error)) => {
                warn!(%error, "payment task ended without an outcome");

                Err(GatewayError::Unavailable(error.to_string()).into())
            }
            None => {
                warn!(timeout = ?limit, "gateway did not answer in time");

                self.observer.on_event(&CheckoutEvent::PaymentPending { reference });

                Err(CheckoutError::PaymentTimeout { reference })
            }
        }
    }

    /// Resolve an unresolved payment.
    ///
    /// Uses the background gateway call if it has finished, otherwise asks
    /// the gateway for the outcome of the payment reference. Order creation
    /// is keyed on that reference, so repeating this never creates a second
    /// order.
    ///
    /// # Errors
    ///
    /// - [`CheckoutError::PaymentFailed`]: the charge was declined; the cart is kept.
    /// - [`CheckoutError::Gateway`]: the gateway could not be queried; try again later.
    /// - [`CheckoutError::Orders`]: the order could not be recorded; try again later.
    #[tracing::instrument(
        name = "checkout.reconcile_payment",
        skip(self),
        fields(customer = %self.customer),
        err
    )]
    pub async fn reconcile_payment(&mut self) -> Result<ReconcileOutcome, CheckoutError> {
        let Some(pending) = self.pending.as_mut() else {
            return Ok(ReconcileOutcome::NothingPending);
        };

        let reference = pending.reference();

        if let Some(transaction) = pending.transaction.clone() {
            let snapshot = pending.approve(transaction);

            return self.finalize_reconciled(snapshot).await;
        }

        if let Some(task) = pending.take_finished() {
            match task.await {
                Ok(Ok(ChargeOutcome::Approved { transaction })) => {
                    let snapshot = pending.approve(transaction);

                    return self.finalize_reconciled(snapshot).await;
                }
                Ok(Ok(ChargeOutcome::Declined { reason })) => {
                    return Err(self.fail_payment(reference, reason));
                }
                Ok(Err(error @ GatewayError::Rejected(_))) => {
                    return Err(self.fail_payment(reference, error.to_string()));
                }
                Ok(Err(error @ GatewayError::Unavailable(_))) => {
                    warn!(%error, "gateway call failed; asking for the charge status");
                }
                Err(error) => warn!(%error, "payment task ended without an outcome"),
            }
        }

        let method = pending.snapshot.payment_method;
        let gateway = self
            .services
            .gateways
            .get(method)
            .ok_or(CheckoutError::UnsupportedPaymentMethod(method))?;

        let status = gateway.lookup(reference).await?;

        debug!(%reference, ?status, "gateway lookup");

        match status {
            ChargeStatus::Approved { transaction } => {
                pending.abort();

                let snapshot = pending.approve(transaction);

                self.finalize_reconciled(snapshot).await
            }
            ChargeStatus::Declined { reason } => {
                pending.abort();

                Err(self.fail_payment(reference, reason))
            }
            ChargeStatus::Processing => Ok(ReconcileOutcome::Pending { reference }),
            ChargeStatus::NotReceived if pending.task.is_some() => {
                Ok(ReconcileOutcome::Pending { reference })
            }
            ChargeStatus::NotReceived => {
                info!(%reference, "gateway never received payment; clearing");

                self.pending = None;

                Ok(ReconcileOutcome::Cleared { reference })
            }
        }
    }

    /// End the session, handing back the cart for a later [`CheckoutFlow::resume`].
    pub fn abandon(self) -> Cart {
        if let Some(pending) = &self.pending {
            warn!(
                customer = %self.customer,
                reference = %pending.reference(),
                "abandoning checkout with an unresolved payment"
            );
        }

        self.cart
    }

    /// Customer this session belongs to.
    pub fn customer(&self) -> &str {
        &self.customer
    }

    /// Current step.
    pub fn step(&self) -> CheckoutStep {
        self.step
    }

    /// The cart.
    pub fn cart(&self) -> &Cart {
        &self.cart
    }

    /// Billing details entered so far.
    pub fn billing(&self) -> &BillingDetails {
        &self.billing
    }

    /// Selected payment method.
    pub fn payment_method(&self) -> Option<PaymentMethod> {
        self.payment_method
    }

    /// The placed order, once checkout completed.
    pub fn order(&self) -> Option<OrderUuid> {
        self.order
    }

    /// Reference of a payment awaiting its outcome.
    pub fn pending_payment(&self) -> Option<PaymentReference> {
        self.pending.as_ref().map(PendingPayment::reference)
    }

    /// Session settings.
    pub fn config(&self) -> &CheckoutConfig {
        &self.config
    }

    /// The observer.
    pub fn observer(&self) -> &O {
        &self.observer
    }

    /// The observer, mutably.
    pub fn observer_mut(&mut self) -> &mut O {
        &mut self.observer
    }

    fn ensure_open(&self) -> Result<(), CheckoutError> {
        if self.order.is_some() {
            return Err(CheckoutError::SessionCompleted);
        }

        Ok(())
    }

    fn ensure_unlocked(&self) -> Result<(), CheckoutError> {
        self.ensure_open()?;

        match &self.pending {
            Some(pending) => Err(CheckoutError::PaymentInFlight {
                reference: pending.reference(),
            }),
            None => Ok(()),
        }
    }

    fn cart_errors(&self) -> ValidationErrors {
        let mut errors = ValidationErrors::default();

        if self.cart.is_empty() {
            errors.push_missing(Field::Cart);
        }

        errors
    }

    fn billing_errors(&self) -> ValidationErrors {
        let mut errors = self.cart_errors();

        if let Err(billing) = self.billing.validate() {
            for field in billing.missing_fields() {
                errors.push_missing(*field);
            }

            for field in billing.malformed_fields() {
                errors.push_malformed(*field);
            }
        }

        errors
    }

    fn set_step(&mut self, to: CheckoutStep) {
        let from = self.step;

        if from == to {
            return;
        }

        self.step = to;

        debug!(%from, %to, "checkout step changed");

        self.observer.on_event(&CheckoutEvent::StepChanged { from, to });
    }

    fn emit_cart_changed(&mut self) {
        self.observer.on_event(&CheckoutEvent::CartChanged {
            lines: self.cart.len(),
            units: self.cart.item_count(),
        });
    }

    fn fail_payment(&mut self, reference: PaymentReference, reason: String) -> CheckoutError {
        warn!(%reference, %reason, "payment failed");

        self.pending = None;

        self.observer.on_event(&CheckoutEvent::PaymentFailed {
            reference,
            reason: reason.clone(),
        });

        CheckoutError::PaymentFailed { reason }
    }

    async fn finalize_reconciled(
        &mut self,
        snapshot: OrderSnapshot,
    ) -> Result<ReconcileOutcome, CheckoutError> {
        let order = self.finalize(snapshot).await?;

        Ok(ReconcileOutcome::Completed { order })
    }

    /// Record the order for an approved charge and complete the session.
    ///
    /// If the order service fails the payment stays pending with its
    /// transaction, ready for reconciliation.
    async fn finalize(&mut self, snapshot: OrderSnapshot) -> Result<OrderUuid, CheckoutError> {
        let reference = snapshot.reference;

        let order = match self.services.orders.create_order(snapshot).await {
            Ok(order) => order,
            Err(error) => {
                warn!(%reference, %error, "payment taken but order not recorded");

                return Err(error.into());
            }
        };

        self.pending = None;
        self.order = Some(order);
        self.cart.clear();

        info!(%order, %reference, "order placed");

        self.emit_cart_changed();
        self.set_step(CheckoutStep::Confirmation);
        self.observer.on_event(&CheckoutEvent::OrderPlaced { order, reference });

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use decimal_percentage::Percentage;
    use mockall::predicate::eq;
    use rusty_money::{Money, iso::USD};
    use testresult::TestResult;
    use uuid::Uuid;

    use crate::{
        coupons::CouponError,
        discounts::CouponDiscount,
        ports::{
            catalog::{CatalogError, MockPlanCatalog, Plan},
            coupons::MockCouponService,
            orders::{MockOrderService, OrderServiceError},
            payments::{MockPaymentGateway, PaymentGateways},
            tax::MockTaxService,
        },
    };

    use super::*;

    const RESIDENTIAL: PlanUuid = PlanUuid::from_uuid(Uuid::from_u128(0x01));
    const ORDER: OrderUuid = OrderUuid::from_uuid(Uuid::from_u128(0xA1));

    struct Mocks {
        catalog: MockPlanCatalog,
        coupons: MockCouponService,
        tax: MockTaxService,
        gateway: MockPaymentGateway,
        orders: MockOrderService,
    }

    impl Mocks {
        fn new() -> Self {
            let mut catalog = MockPlanCatalog::new();

            catalog
                .expect_get_plan()
                .with(eq(RESIDENTIAL))
                .returning(|uuid| {
                    Ok(Plan::new(uuid, "Residential 5GB", Money::from_minor(29_99, USD)))
                });

            let mut tax = MockTaxService::new();

            tax.expect_compute_tax()
                .returning(|_, _| Ok(Money::from_minor(4_80, USD)));

            Self {
                catalog,
                coupons: MockCouponService::new(),
                tax,
                gateway: MockPaymentGateway::new(),
                orders: MockOrderService::new(),
            }
        }

        fn services(self) -> CheckoutServices {
            CheckoutServices {
                catalog: Arc::new(self.catalog),
                coupons: Arc::new(self.coupons),
                tax: Arc::new(self.tax),
                gateways: PaymentGateways::new()
                    .with(PaymentMethod::Card, Arc::new(self.gateway)),
                orders: Arc::new(self.orders),
            }
        }

        fn flow(self) -> CheckoutFlow<RecordingObserver> {
            CheckoutFlow::new("customer-1", self.services(), CheckoutConfig::default())
                .with_observer(RecordingObserver::new())
        }
    }

    fn billing() -> BillingDetails {
        BillingDetails {
            first_name: "Ada".to_string(),
            last_name: "Byron".to_string(),
            email: "ada@example.com".to_string(),
            address: "12 St James's Square".to_string(),
            city: "London".to_string(),
            postal_code: "SW1Y 4JH".to_string(),
            country: "GB".to_string(),
            ..BillingDetails::default()
        }
    }

    fn coupon(code: &str) -> TestResult<Coupon> {
        Ok(Coupon::new(
            CouponCode::parse(code)?,
            CouponDiscount::PercentageOff(Percentage::from(0.1)),
        ))
    }

    async fn at_payment(mocks: Mocks) -> TestResult<CheckoutFlow<RecordingObserver>> {
        let mut flow = mocks.flow();

        flow.add_item(RESIDENTIAL, 2).await?;
        flow.advance_step()?;
        flow.set_billing(billing())?;
        flow.advance_step()?;
        flow.select_payment_method(PaymentMethod::Card)?;

        Ok(flow)
    }

    #[tokio::test]
    async fn adding_zero_quantity_never_reaches_the_catalog() {
        let mut mocks = Mocks::new();
        mocks.catalog = MockPlanCatalog::new();
        mocks.catalog.expect_get_plan().never();

        let mut flow = mocks.flow();

        let result = flow.add_item(RESIDENTIAL, 0).await;

        assert!(matches!(result, Err(CheckoutError::InvalidQuantity)));
        assert!(flow.cart().is_empty());
    }

    #[tokio::test]
    async fn unknown_plan_leaves_cart_unchanged() -> TestResult {
        let missing = PlanUuid::now_v7();
        let mut mocks = Mocks::new();
        mocks
            .catalog
            .expect_get_plan()
            .with(eq(missing))
            .returning(|uuid| Err(CatalogError::NotFound(uuid)));

        let mut flow = mocks.flow();
        flow.add_item(RESIDENTIAL, 1).await?;

        let result = flow.add_item(missing, 1).await;

        assert!(matches!(result, Err(CheckoutError::PlanNotFound(p)) if p == missing));
        assert_eq!(flow.cart().len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn adding_the_same_plan_twice_increments_quantity() -> TestResult {
        let mut flow = Mocks::new().flow();

        flow.add_item(RESIDENTIAL, 1).await?;
        flow.add_item(RESIDENTIAL, 1).await?;

        assert_eq!(flow.cart().len(), 1);
        assert_eq!(flow.cart().item_count(), 2);
        assert_eq!(
            flow.observer().events().last(),
            Some(&CheckoutEvent::CartChanged { lines: 1, units: 2 })
        );

        Ok(())
    }

    #[tokio::test]
    async fn scenario_totals_match_the_storefront() -> TestResult {
        let mut mocks = Mocks::new();
        mocks
            .coupons
            .expect_find_coupon()
            .returning(|code| {
                Ok(Coupon::new(
                    code.clone(),
                    CouponDiscount::PercentageOff(Percentage::from(0.1)),
                ))
            });

        let mut flow = mocks.flow();
        flow.add_item(RESIDENTIAL, 2).await?;
        flow.apply_coupon("save10").await?;

        let totals = flow.compute_totals().await?;

        assert_eq!(totals.subtotal, Money::from_minor(59_98, USD));
        assert_eq!(totals.discount, Money::from_minor(6_00, USD));
        assert_eq!(totals.tax, Money::from_minor(4_80, USD));
        assert_eq!(totals.grand_total, Money::from_minor(58_78, USD));
        assert_eq!(flow.compute_totals().await?, totals, "totals must not drift");

        Ok(())
    }

    #[tokio::test]
    async fn expired_coupon_leaves_discount_unchanged() -> TestResult {
        let expired = coupon("OLD")?.with_window(None, Some("2020-01-01T00:00:00Z".parse()?));
        let current = coupon("SAVE10")?;

        let mut mocks = Mocks::new();
        mocks
            .coupons
            .expect_find_coupon()
            .returning(move |code| match code.as_str() {
                "OLD" => Ok(expired.clone()),
                "SAVE10" => Ok(current.clone()),
                _ => Err(CouponError::NotFound(code.clone())),
            });

        let mut flow = mocks.flow();
        flow.add_item(RESIDENTIAL, 2).await?;
        flow.apply_coupon("SAVE10").await?;

        let before = flow.compute_totals().await?;
        let result = flow.apply_coupon("old").await;

        assert!(matches!(result, Err(CheckoutError::CouponExpired(_))));
        assert_eq!(flow.cart().coupon().map(|c| c.code.as_str()), Some("SAVE10"));
        assert_eq!(flow.compute_totals().await?.discount, before.discount);

        Ok(())
    }

    #[tokio::test]
    async fn coupon_window_follows_the_session_clock() -> TestResult {
        let from: Timestamp = "2026-03-01T00:00:00Z".parse()?;
        let until: Timestamp = "2026-04-01T00:00:00Z".parse()?;
        let spring = coupon("SPRING")?.with_window(Some(from), Some(until));

        let at = |clock: Timestamp| {
            let spring = spring.clone();
            let mut mocks = Mocks::new();
            mocks
                .coupons
                .expect_find_coupon()
                .returning(move |_| Ok(spring.clone()));

            CheckoutFlow::new(
                "customer-1",
                mocks.services(),
                CheckoutConfig::default().with_point_in_time(clock),
            )
        };

        let second = jiff::SignedDuration::from_secs(1);

        let mut early = at(from.checked_sub(second)?);
        early.add_item(RESIDENTIAL, 1).await?;
        assert!(matches!(
            early.apply_coupon("spring").await,
            Err(CheckoutError::CouponNotYetValid(_))
        ));

        let mut opening = at(from);
        opening.add_item(RESIDENTIAL, 1).await?;
        opening.apply_coupon("spring").await?;

        let mut last_moment = at(until.checked_sub(second)?);
        last_moment.add_item(RESIDENTIAL, 1).await?;
        last_moment.apply_coupon("spring").await?;
        assert!(last_moment.cart().coupon().is_some());

        let mut closing = at(until);
        closing.add_item(RESIDENTIAL, 1).await?;
        assert!(matches!(
            closing.apply_coupon("spring").await,
            Err(CheckoutError::CouponExpired(_))
        ));
        assert!(closing.cart().coupon().is_none());

        Ok(())
    }

    #[test]
    fn session_clock_is_pinned_when_set() -> TestResult {
        let at: Timestamp = "2026-10-15T09:30:00Z".parse()?;

        assert_eq!(CheckoutConfig::default().with_point_in_time(at).now(), at);
        let a_year_earlier = at.checked_sub(jiff::SignedDuration::from_hours(24 * 365))?;

        assert!(CheckoutConfig::default().now() > a_year_earlier);

        Ok(())
    }

    #[tokio::test]
    async fn order_snapshot_is_stamped_with_the_session_clock() -> TestResult {
        let at: Timestamp = "2026-10-15T09:30:00Z".parse()?;

        let mut mocks = Mocks::new();
        mocks.gateway.expect_charge().returning(|_| {
            Ok(ChargeOutcome::Approved {
                transaction: "txn_9".to_string(),
            })
        });
        mocks
            .orders
            .expect_create_order()
            .times(1)
            .withf(move |snapshot| snapshot.submitted_at == at)
            .returning(|_| Ok(ORDER));

        let mut flow = CheckoutFlow::new(
            "customer-1",
            mocks.services(),
            CheckoutConfig::default().with_point_in_time(at),
        );

        flow.add_item(RESIDENTIAL, 2).await?;
        flow.advance_step()?;
        flow.set_billing(billing())?;
        flow.advance_step()?;

        assert_eq!(
            flow.submit_payment(PaymentMethod::Card, PaymentDetails::default())
                .await?,
            ORDER
        );

        Ok(())
    }

    #[tokio::test]
    async fn unknown_coupon_is_reported() -> TestResult {
        let mut mocks = Mocks::new();
        mocks
            .coupons
            .expect_find_coupon()
            .returning(|code| Err(CouponError::NotFound(code.clone())));

        let mut flow = mocks.flow();

        let result = flow.apply_coupon("NOPE").await;

        assert!(matches!(result, Err(CheckoutError::CouponNotFound(_))));
        assert!(flow.cart().coupon().is_none());

        Ok(())
    }

    #[tokio::test]
    async fn blank_coupon_code_is_rejected_locally() {
        let mut mocks = Mocks::new();
        mocks.coupons.expect_find_coupon().never();

        let mut flow = mocks.flow();

        let result = flow.apply_coupon("   ").await;

        assert!(matches!(result, Err(CheckoutError::InvalidCouponCode(_))));
    }

    #[tokio::test]
    async fn empty_cart_cannot_leave_review() {
        let mut flow = Mocks::new().flow();

        let result = flow.advance_step();

        assert!(matches!(
            result,
            Err(CheckoutError::Validation(ref errors)) if errors.contains(Field::Cart)
        ));
        assert_eq!(flow.step(), CheckoutStep::CartReview);
    }

    #[tokio::test]
    async fn billing_with_empty_email_stays_on_billing() -> TestResult {
        let mut flow = Mocks::new().flow();
        flow.add_item(RESIDENTIAL, 1).await?;
        flow.advance_step()?;
        flow.set_billing(BillingDetails {
            email: String::new(),
            ..billing()
        })?;

        let result = flow.advance_step();

        assert!(matches!(
            result,
            Err(CheckoutError::Validation(ref errors))
                if errors.missing_fields() == [Field::Email]
        ));
        assert_eq!(flow.step(), CheckoutStep::Billing);

        Ok(())
    }

    #[tokio::test]
    async fn payment_step_needs_a_method_then_payment() -> TestResult {
        let mut flow = Mocks::new().flow();
        flow.add_item(RESIDENTIAL, 1).await?;
        flow.advance_step()?;
        flow.set_billing(billing())?;

        assert_eq!(flow.advance_step()?, CheckoutStep::Payment);
        assert!(matches!(
            flow.advance_step(),
            Err(CheckoutError::Validation(ref errors)) if errors.contains(Field::PaymentMethod)
        ));

        flow.select_payment_method(PaymentMethod::Card)?;

        assert!(matches!(flow.advance_step(), Err(CheckoutError::PaymentRequired)));
        assert_eq!(flow.step(), CheckoutStep::Payment);

        Ok(())
    }

    #[tokio::test]
    async fn unsupported_method_cannot_be_selected() {
        let mut flow = Mocks::new().flow();

        let result = flow.select_payment_method(PaymentMethod::Crypto);

        assert!(matches!(
            result,
            Err(CheckoutError::UnsupportedPaymentMethod(PaymentMethod::Crypto))
        ));
        assert_eq!(flow.payment_method(), None);
    }

    #[tokio::test]
    async fn retreat_is_floored_at_cart_review() -> TestResult {
        let mut flow = Mocks::new().flow();
        flow.add_item(RESIDENTIAL, 1).await?;
        flow.advance_step()?;

        assert_eq!(flow.retreat_step()?, CheckoutStep::CartReview);
        assert_eq!(flow.retreat_step()?, CheckoutStep::CartReview);

        Ok(())
    }

    #[tokio::test]
    async fn payment_outside_payment_step_is_rejected() -> TestResult {
        let mut mocks = Mocks::new();
        mocks.gateway.expect_charge().never();

        let mut flow = mocks.flow();
        flow.add_item(RESIDENTIAL, 1).await?;

        let result = flow
            .submit_payment(PaymentMethod::Card, PaymentDetails::default())
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::WrongStep {
                expected: CheckoutStep::Payment,
                actual: CheckoutStep::CartReview
            })
        ));

        Ok(())
    }

    #[tokio::test]
    async fn declined_payment_keeps_cart_and_step() -> TestResult {
        let mut mocks = Mocks::new();
        mocks.gateway.expect_charge().times(1).returning(|_| {
            Ok(ChargeOutcome::Declined {
                reason: "insufficient funds".to_string(),
            })
        });
        mocks.orders.expect_create_order().never();

        let mut flow = at_payment(mocks).await?;

        let result = flow
            .submit_payment(PaymentMethod::Card, PaymentDetails::with_token("tok_visa"))
            .await;

        assert!(matches!(
            result,
            Err(CheckoutError::PaymentFailed { ref reason }) if reason == "insufficient funds"
        ));
        assert_eq!(flow.step(), CheckoutStep::Payment);
        assert_eq!(flow.cart().item_count(), 2);
        assert_eq!(flow.pending_payment(), None, "a declined payment can be retried");

        Ok(())
    }

    #[tokio::test]
    async fn rejected_charge_is_a_payment_failure() -> TestResult {
        let mut mocks = Mocks::new();
        mocks
            .gateway
            .expect_charge()
            .returning(|_| Err(GatewayError::Rejected("missing token".to_string())));

        let mut flow = at_payment(mocks).await?;

        let result = flow
            .submit_payment(PaymentMethod::Card, PaymentDetails::default())
            .await;

        assert!(matches!(result, Err(CheckoutError::PaymentFailed { .. })));
        assert!(result.is_err_and(|error| error.is_recoverable()));
        assert_eq!(flow.pending_payment(), None);

        Ok(())
    }

    #[tokio::test]
    async fn unreachable_gateway_keeps_the_payment_for_reconciliation() -> TestResult {
        let mut mocks = Mocks::new();
        mocks
            .gateway
            .expect_charge()
            .times(1)
            .returning(|_| Err(GatewayError::Unavailable("connection reset".to_string())));
        mocks.gateway.expect_lookup().times(1).returning(|_| {
            Ok(ChargeStatus::Approved {
                transaction: "txn_3".to_string(),
            })
        });
        mocks
            .orders
            .expect_create_order()
            .times(1)
            .withf(|snapshot| snapshot.transaction.as_deref() == Some("txn_3"))
            .returning(|_| Ok(ORDER));

        let mut flow = at_payment(mocks).await?;

        let result = flow
            .submit_payment(PaymentMethod::Card, PaymentDetails::default())
            .await;

        let Err(CheckoutError::PaymentUnconfirmed { reference, .. }) = result else {
            return Err(format!("expected an unconfirmed payment, got {result:?}").into());
        };

        assert_eq!(flow.pending_payment(), Some(reference));

        let retry = flow
            .submit_payment(PaymentMethod::Card, PaymentDetails::default())
            .await;

        assert!(matches!(retry, Err(CheckoutError::PaymentInFlight { .. })));
        assert_eq!(
            flow.reconcile_payment().await?,
            ReconcileOutcome::Completed { order: ORDER }
        );

        Ok(())
    }

    #[tokio::test]
    async fn unreachable_gateway_that_never_saw_the_charge_is_cleared() -> TestResult {
        let mut mocks = Mocks::new();
        mocks
            .gateway
            .expect_charge()
            .returning(|_| Err(GatewayError::Unavailable("503".to_string())));
        mocks
            .gateway
            .expect_lookup()
            .returning(|_| Ok(ChargeStatus::NotReceived));

        let mut flow = at_payment(mocks).await?;

        let result = flow
            .submit_payment(PaymentMethod::Card, PaymentDetails::default())
            .await;

        assert!(matches!(result, Err(CheckoutError::PaymentUnconfirmed { .. })));

        let outcome = flow.reconcile_payment().await?;

        assert!(matches!(outcome, ReconcileOutcome::Cleared { .. }));
        assert_eq!(flow.pending_payment(), None);
        assert_eq!(flow.step(), CheckoutStep::Payment);

        Ok(())
    }

    #[tokio::test]
    async fn pending_payment_freezes_billing_and_navigation() -> TestResult {
        let mut mocks = Mocks::new();
        mocks
            .gateway
            .expect_charge()
            .returning(|_| Err(GatewayError::Unavailable("503".to_string())));

        let mut flow = at_payment(mocks).await?;

        let _unconfirmed = flow
            .submit_payment(PaymentMethod::Card, PaymentDetails::default())
            .await;

        let changed = BillingDetails {
            email: "other@example.com".to_string(),
            ..billing()
        };

        assert!(matches!(
            flow.retreat_step(),
            Err(CheckoutError::PaymentInFlight { .. })
        ));
        assert!(matches!(
            flow.set_billing(changed),
            Err(CheckoutError::PaymentInFlight { .. })
        ));
        assert!(matches!(
            flow.select_payment_method(PaymentMethod::Card),
            Err(CheckoutError::PaymentInFlight { .. })
        ));
        assert_eq!(flow.step(), CheckoutStep::Payment);
        assert_eq!(flow.billing().email, "ada@example.com");

        Ok(())
    }

    #[tokio::test]
    async fn approved_payment_places_the_order_once() -> TestResult {
        let mut mocks = Mocks::new();
        mocks.gateway.expect_charge().times(1).returning(|request| {
            assert_eq!(request.amount, Money::from_minor(64_78, USD));

            Ok(ChargeOutcome::Approved {
                transaction: "txn_1".to_string(),
            })
        });
        mocks
            .orders
            .expect_create_order()
            .times(1)
            .withf(|snapshot| {
                snapshot.transaction.as_deref() == Some("txn_1")
                    && snapshot.customer == "customer-1"
                    && snapshot.lines.len() == 1
            })
            .returning(|_| Ok(ORDER));

        let mut flow = at_payment(mocks).await?;

        let order = flow
            .submit_payment(PaymentMethod::Card, PaymentDetails::with_token("tok_visa"))
            .await?;

        assert_eq!(order, ORDER);
        assert_eq!(flow.order(), Some(ORDER));
        assert_eq!(flow.step(), CheckoutStep::Confirmation);
        assert!(flow.cart().is_empty());
        assert!(matches!(
            flow.observer().events().last(),
            Some(CheckoutEvent::OrderPlaced { order, .. }) if *order == ORDER
        ));

        let again = flow
            .submit_payment(PaymentMethod::Card, PaymentDetails::default())
            .await;

        assert!(matches!(again, Err(CheckoutError::SessionCompleted)));
        assert_eq!(flow.retreat_step()?, CheckoutStep::Confirmation);

        Ok(())
    }

    #[tokio::test]
    async fn failed_order_write_is_retried_by_reconciliation() -> TestResult {
        let mut mocks = Mocks::new();
        mocks.gateway.expect_charge().times(1).returning(|_| {
            Ok(ChargeOutcome::Approved {
                transaction: "txn_2".to_string(),
            })
        });

        let mut attempts = 0;
        mocks
            .orders
            .expect_create_order()
            .times(2)
            .returning(move |_| {
                attempts += 1;

                if attempts == 1 {
                    Err(OrderServiceError::Unavailable("db down".to_string()))
                } else {
                    Ok(ORDER)
                }
            });
        mocks.gateway.expect_lookup().never();

        let mut flow = at_payment(mocks).await?;

        let result = flow
            .submit_payment(PaymentMethod::Card, PaymentDetails::default())
            .await;

        assert!(matches!(result, Err(CheckoutError::Orders(_))));
        assert!(flow.pending_payment().is_some());
        assert_eq!(flow.cart().item_count(), 2);

        let outcome = flow.reconcile_payment().await?;

        assert_eq!(outcome, ReconcileOutcome::Completed { order: ORDER });
        assert!(flow.cart().is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn reconcile_without_pending_payment_is_a_no_op() -> TestResult {
        let mut flow = Mocks::new().flow();

        assert_eq!(flow.reconcile_payment().await?, ReconcileOutcome::NothingPending);

        Ok(())
    }

    #[tokio::test]
    async fn abandon_returns_the_cart_for_resumption() -> TestResult {
        let mut flow = Mocks::new().flow();
        flow.add_item(RESIDENTIAL, 3).await?;

        let cart = flow.abandon();

        let resumed = CheckoutFlow::resume(
            "customer-1",
            cart,
            Mocks::new().services(),
            CheckoutConfig::default(),
        );

        assert_eq!(resumed.cart().item_count(), 3);
        assert_eq!(resumed.step(), CheckoutStep::CartReview);

        Ok(())
    }
}
