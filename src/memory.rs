//! In-Memory Services
//!
//! Process-local implementations of every port, used by the command-line
//! runner and the test suite.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use decimal_percentage::Percentage;
use rusty_money::Money;
use rustc_hash::FxHashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    coupons::{Coupon, CouponCode, CouponError},
    discounts::percent_of_minor,
    ids::{OrderUuid, PaymentReference, PlanUuid},
    orders::{OrderSnapshot, OrderStatus},
    ports::{
        catalog::{CatalogError, Plan, PlanCatalog},
        coupons::CouponService,
        orders::{OrderService, OrderServiceError},
        payments::{ChargeOutcome, ChargeRequest, ChargeStatus, GatewayError, PaymentGateway},
        tax::{TaxError, TaxService},
    },
    pricing::Amount,
};

/// Plans held in a map.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCatalog {
    plans: FxHashMap<PlanUuid, Plan>,
}

impl InMemoryCatalog {
    /// An empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a plan.
    #[must_use]
    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.insert(plan);
        self
    }

    /// Add or replace a plan.
    pub fn insert(&mut self, plan: Plan) {
        self.plans.insert(plan.uuid, plan);
    }
}

#[async_trait]
impl PlanCatalog for InMemoryCatalog {
    async fn get_plan(&self, uuid: PlanUuid) -> Result<Plan, CatalogError> {
        self.plans
            .get(&uuid)
            .cloned()
            .ok_or(CatalogError::NotFound(uuid))
    }
}

/// Coupons held in a map, keyed by normalised code.
#[derive(Debug, Default, Clone)]
pub struct InMemoryCoupons {
    coupons: FxHashMap<CouponCode, Coupon>,
}

impl InMemoryCoupons {
    /// No coupons.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a coupon.
    #[must_use]
    pub fn with_coupon(mut self, coupon: Coupon) -> Self {
        self.insert(coupon);
        self
    }

    /// Add or replace a coupon.
    pub fn insert(&mut self, coupon: Coupon) {
        self.coupons.insert(coupon.code.clone(), coupon);
    }
}

#[async_trait]
impl CouponService for InMemoryCoupons {
    async fn find_coupon(&self, code: &CouponCode) -> Result<Coupon, CouponError> {
        self.coupons
            .get(code)
            .cloned()
            .ok_or_else(|| CouponError::NotFound(code.clone()))
    }
}

/// Percentage tax per region, with an optional fallback rate.
#[derive(Debug, Default, Clone)]
pub struct FlatRateTax {
    default_rate: Option<Percentage>,
    regions: FxHashMap<String, Percentage>,
}

impl FlatRateTax {
    /// Charge `rate` wherever no regional rate applies.
    pub fn new(rate: Percentage) -> Self {
        Self {
            default_rate: Some(rate),
            regions: FxHashMap::default(),
        }
    }

    /// Only charge tax in regions given a rate; others are unsupported.
    pub fn regional_only() -> Self {
        Self::default()
    }

    /// Set the rate for a region (country code, case-insensitive).
    #[must_use]
    pub fn with_region(mut self, region: &str, rate: Percentage) -> Self {
        self.regions.insert(region.trim().to_uppercase(), rate);
        self
    }

    fn rate_for(&self, region: Option<&str>) -> Result<Percentage, TaxError> {
        let regional = region.and_then(|region| self.regions.get(region)).copied();

        regional
            .or(self.default_rate)
            .ok_or_else(|| TaxError::UnsupportedRegion(region.unwrap_or("none").to_string()))
    }
}

#[async_trait]
impl TaxService for FlatRateTax {
    async fn compute_tax(
        &self,
        taxable: Amount,
        region: Option<String>,
    ) -> Result<Amount, TaxError> {
        let rate = self.rate_for(region.as_deref())?;

        let minor = percent_of_minor(&rate, taxable.to_minor_units())
            .map_err(|error| TaxError::Unavailable(error.to_string()))?;

        Ok(Money::from_minor(minor, taxable.currency()))
    }
}

/// Gateway whose answers are scripted by the payment token.
///
/// | token              | behaviour                                        |
/// |--------------------|--------------------------------------------------|
/// | none or other      | approved                                         |
/// | `decline[:reason]` | declined                                         |
/// | `unavailable`      | gateway error, nothing charged                   |
/// | `lost`             | approved, but the charge call fails with an error |
/// | `timeout`          | approved, but the charge call never returns      |
/// | `stall`            | processing forever, the charge call never returns |
#[derive(Debug, Default)]
pub struct ScriptedGateway {
    charges: Mutex<FxHashMap<PaymentReference, ChargeStatus>>,
    attempts: AtomicUsize,
}

impl ScriptedGateway {
    /// A gateway with no recorded charges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of charge calls received, including repeats of a reference.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Number of distinct references charged.
    pub async fn charged(&self) -> usize {
        self.charges.lock().await.len()
    }
}

/// How the scripted gateway answers a charge it has recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delivery {
    Answer,
    Lost,
    Hang,
}

fn transaction_for(prefix: &str, reference: PaymentReference) -> String {
    format!("{prefix}_{}", reference.into_uuid().simple())
}

fn outcome_of(status: &ChargeStatus) -> Option<ChargeOutcome> {
    match status {
        ChargeStatus::Approved { transaction } => Some(ChargeOutcome::Approved {
            transaction: transaction.clone(),
        }),
        ChargeStatus::Declined { reason } => Some(ChargeOutcome::Declined {
            reason: reason.clone(),
        }),
        ChargeStatus::Processing | ChargeStatus::NotReceived => None,
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, GatewayError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let token = request.details.token.as_deref().unwrap_or_default();

        let (status, delivery) = {
            let mut charges = self.charges.lock().await;

            if let Some(outcome) = charges.get(&request.reference).and_then(outcome_of) {
                debug!(reference = %request.reference, "repeated charge; returning recorded outcome");

                return Ok(outcome);
            }

            let (kind, reason) = token
                .split_once(':')
                .map_or((token, None), |(kind, reason)| (kind, Some(reason)));

            let (status, delivery) = match (kind, reason) {
                ("decline", reason) => (
                    ChargeStatus::Declined {
                        reason: reason.unwrap_or("card declined").to_string(),
                    },
                    Delivery::Answer,
                ),
                ("unavailable", _) => {
                    return Err(GatewayError::Unavailable(
                        "scripted gateway outage".to_string(),
                    ));
                }
                ("lost", _) => (
                    ChargeStatus::Approved {
                        transaction: transaction_for("txn", request.reference),
                    },
                    Delivery::Lost,
                ),
                ("timeout", _) => (
                    ChargeStatus::Approved {
                        transaction: transaction_for("txn", request.reference),
                    },
                    Delivery::Hang,
                ),
                ("stall", _) => (ChargeStatus::Processing, Delivery::Hang),
                _ => (
                    ChargeStatus::Approved {
                        transaction: transaction_for("txn", request.reference),
                    },
                    Delivery::Answer,
                ),
            };

            charges.insert(request.reference, status.clone());

            (status, delivery)
        };

        match delivery {
            Delivery::Answer => {}
            Delivery::Lost => {
                return Err(GatewayError::Unavailable("connection reset".to_string()));
            }
            Delivery::Hang => std::future::pending::<()>().await,
        }

        outcome_of(&status)
            .ok_or_else(|| GatewayError::Unavailable("charge still processing".to_string()))
    }

    async fn lookup(&self, reference: PaymentReference) -> Result<ChargeStatus, GatewayError> {
        Ok(self
            .charges
            .lock()
            .await
            .get(&reference)
            .cloned()
            .unwrap_or(ChargeStatus::NotReceived))
    }
}

#[derive(Debug, Default)]
struct WalletLedger {
    balances: FxHashMap<String, Amount>,
    charges: FxHashMap<PaymentReference, ChargeOutcome>,
}

/// Store-credit wallets keyed by payer.
///
/// The payer is [`PaymentDetails::payer_reference`](crate::ports::payments::PaymentDetails)
/// when given, otherwise the customer.
#[derive(Debug, Default)]
pub struct WalletGateway {
    ledger: Mutex<WalletLedger>,
}

impl WalletGateway {
    /// No wallets.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a wallet holding `balance`.
    #[must_use]
    pub fn with_balance(mut self, payer: impl Into<String>, balance: Amount) -> Self {
        self.ledger.get_mut().balances.insert(payer.into(), balance);
        self
    }

    /// Current balance of `payer`.
    pub async fn balance(&self, payer: &str) -> Option<Amount> {
        self.ledger.lock().await.balances.get(payer).copied()
    }
}

#[async_trait]
impl PaymentGateway for WalletGateway {
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, GatewayError> {
        let mut ledger = self.ledger.lock().await;

        if let Some(outcome) = ledger.charges.get(&request.reference) {
            return Ok(outcome.clone());
        }

        let payer = request
            .details
            .payer_reference
            .as_deref()
            .unwrap_or(&request.customer);

        let outcome = match ledger.balances.get_mut(payer) {
            None => ChargeOutcome::Declined {
                reason: "no wallet for this account".to_string(),
            },
            Some(balance) if balance.currency() != request.amount.currency() => {
                ChargeOutcome::Declined {
                    reason: "wallet currency does not match".to_string(),
                }
            }
            Some(balance) if balance.to_minor_units() < request.amount.to_minor_units() => {
                ChargeOutcome::Declined {
                    reason: "insufficient wallet balance".to_string(),
                }
            }
            Some(balance) => {
                *balance = balance
                    .sub(request.amount)
                    .map_err(|error| GatewayError::Rejected(error.to_string()))?;

                ChargeOutcome::Approved {
                    transaction: transaction_for("wallet", request.reference),
                }
            }
        };

        debug!(reference = %request.reference, %payer, ?outcome, "wallet charge");

        ledger.charges.insert(request.reference, outcome.clone());

        Ok(outcome)
    }

    async fn lookup(&self, reference: PaymentReference) -> Result<ChargeStatus, GatewayError> {
        let ledger = self.ledger.lock().await;

        Ok(match ledger.charges.get(&reference) {
            Some(ChargeOutcome::Approved { transaction }) => ChargeStatus::Approved {
                transaction: transaction.clone(),
            },
            Some(ChargeOutcome::Declined { reason }) => ChargeStatus::Declined {
                reason: reason.clone(),
            },
            None => ChargeStatus::NotReceived,
        })
    }
}

/// An order held by [`InMemoryOrders`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredOrder {
    /// Order identifier
    pub uuid: OrderUuid,

    /// Snapshot it was created from
    pub snapshot: OrderSnapshot,

    /// Current status
    pub status: OrderStatus,
}

#[derive(Debug, Default)]
struct OrderBook {
    orders: Vec<StoredOrder>,
    by_reference: FxHashMap<PaymentReference, OrderUuid>,
}

impl OrderBook {
    fn get_mut(&mut self, uuid: OrderUuid) -> Option<&mut StoredOrder> {
        self.orders.iter_mut().find(|order| order.uuid == uuid)
    }
}

/// Orders held in memory, deduplicated by payment reference.
#[derive(Debug, Default)]
pub struct InMemoryOrders {
    book: Mutex<OrderBook>,
}

impl InMemoryOrders {
    /// No orders.
    pub fn new() -> Self {
        Self::default()
    }

    /// All orders in creation order.
    pub async fn orders(&self) -> Vec<StoredOrder> {
        self.book.lock().await.orders.clone()
    }

    /// A single order.
    pub async fn get(&self, uuid: OrderUuid) -> Option<StoredOrder> {
        self.book
            .lock()
            .await
            .orders
            .iter()
            .find(|order| order.uuid == uuid)
            .cloned()
    }
}

#[async_trait]
impl OrderService for InMemoryOrders {
    async fn create_order(&self, snapshot: OrderSnapshot) -> Result<OrderUuid, OrderServiceError> {
        let mut book = self.book.lock().await;

        if let Some(existing) = book.by_reference.get(&snapshot.reference) {
            debug!(order = %existing, reference = %snapshot.reference, "order already exists");

            return Ok(*existing);
        }

        let uuid = OrderUuid::now_v7();

        book.by_reference.insert(snapshot.reference, uuid);
        book.orders.push(StoredOrder {
            uuid,
            snapshot,
            status: OrderStatus::Pending,
        });

        Ok(uuid)
    }

    async fn update_status(
        &self,
        order: OrderUuid,
        status: OrderStatus,
    ) -> Result<(), OrderServiceError> {
        let mut book = self.book.lock().await;

        let stored = book
            .get_mut(order)
            .ok_or(OrderServiceError::NotFound(order))?;

        if !stored.status.can_transition_to(status) {
            return Err(OrderServiceError::InvalidTransition {
                from: stored.status,
                to: status,
            });
        }

        stored.status = status;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use jiff::Timestamp;
    use rusty_money::iso::USD;
    use testresult::TestResult;

    use crate::{
        billing::BillingDetails,
        cart::Cart,
        discounts::CouponDiscount,
        ports::payments::{PaymentDetails, PaymentMethod},
        pricing::compute_totals,
    };

    use super::*;

    fn request(token: Option<&str>, amount_minor: i64) -> ChargeRequest {
        ChargeRequest {
            reference: PaymentReference::now_v7(),
            method: PaymentMethod::Card,
            amount: Money::from_minor(amount_minor, USD),
            customer: "customer-1".to_string(),
            details: PaymentDetails {
                token: token.map(str::to_string),
                payer_reference: None,
            },
        }
    }

    fn snapshot() -> TestResult<OrderSnapshot> {
        let cart = Cart::new(USD);

        Ok(OrderSnapshot::freeze(
            "customer-1",
            PaymentReference::now_v7(),
            &cart,
            compute_totals(&cart, Money::from_minor(0, USD))?,
            &BillingDetails::default(),
            PaymentMethod::Card,
            Timestamp::now(),
        )?)
    }

    #[tokio::test]
    async fn catalog_reports_missing_plans() {
        let catalog = InMemoryCatalog::new();
        let uuid = PlanUuid::now_v7();

        assert_eq!(catalog.get_plan(uuid).await, Err(CatalogError::NotFound(uuid)));
    }

    #[tokio::test]
    async fn coupons_are_found_by_normalised_code() -> TestResult {
        let coupons = InMemoryCoupons::new().with_coupon(Coupon::new(
            CouponCode::parse("save10")?,
            CouponDiscount::PercentageOff(Percentage::from(0.1)),
        ));

        let found = coupons.find_coupon(&CouponCode::parse(" SAVE10 ")?).await?;

        assert_eq!(found.code.as_str(), "SAVE10");

        Ok(())
    }

    #[tokio::test]
    async fn regional_rate_overrides_default() -> TestResult {
        let tax = FlatRateTax::new(Percentage::from(0.1)).with_region("gb", Percentage::from(0.2));

        let gb = tax
            .compute_tax(Money::from_minor(10_00, USD), Some("GB".to_string()))
            .await?;
        let elsewhere = tax.compute_tax(Money::from_minor(10_00, USD), None).await?;

        assert_eq!(gb, Money::from_minor(2_00, USD));
        assert_eq!(elsewhere, Money::from_minor(1_00, USD));

        Ok(())
    }

    #[tokio::test]
    async fn regional_only_tax_rejects_unknown_regions() {
        let tax = FlatRateTax::regional_only().with_region("DE", Percentage::from(0.19));

        let result = tax
            .compute_tax(Money::from_minor(10_00, USD), Some("FR".to_string()))
            .await;

        assert_eq!(result, Err(TaxError::UnsupportedRegion("FR".to_string())));
    }

    #[tokio::test]
    async fn scripted_decline_carries_reason() -> TestResult {
        let gateway = ScriptedGateway::new();

        let outcome = gateway
            .charge(request(Some("decline:card expired"), 10_00))
            .await?;

        assert_eq!(
            outcome,
            ChargeOutcome::Declined {
                reason: "card expired".to_string()
            }
        );

        Ok(())
    }

    #[tokio::test]
    async fn scripted_charges_are_idempotent_per_reference() -> TestResult {
        let gateway = ScriptedGateway::new();
        let request = request(None, 10_00);

        let first = gateway.charge(request.clone()).await?;
        let second = gateway.charge(request).await?;

        assert_eq!(first, second);
        assert_eq!(gateway.attempts(), 2);
        assert_eq!(gateway.charged().await, 1);

        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_token_hangs_but_is_recorded_as_approved() -> TestResult {
        let gateway = ScriptedGateway::new();
        let request = request(Some("timeout"), 10_00);
        let reference = request.reference;

        let hung = tokio::time::timeout(Duration::from_secs(60), gateway.charge(request)).await;

        assert!(hung.is_err(), "charge should never return");
        assert!(matches!(
            gateway.lookup(reference).await?,
            ChargeStatus::Approved { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn lost_token_charges_but_reports_an_error() -> TestResult {
        let gateway = ScriptedGateway::new();
        let request = request(Some("lost"), 10_00);
        let reference = request.reference;

        let result = gateway.charge(request).await;

        assert!(matches!(result, Err(GatewayError::Unavailable(_))));
        assert_eq!(gateway.charged().await, 1);
        assert!(matches!(
            gateway.lookup(reference).await?,
            ChargeStatus::Approved { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn unknown_reference_was_not_received() -> TestResult {
        let gateway = ScriptedGateway::new();

        let status = gateway.lookup(PaymentReference::now_v7()).await?;

        assert_eq!(status, ChargeStatus::NotReceived);

        Ok(())
    }

    #[tokio::test]
    async fn wallet_debits_on_approval_and_declines_when_short() -> TestResult {
        let gateway = WalletGateway::new().with_balance("customer-1", Money::from_minor(50_00, USD));

        let approved = gateway.charge(request(None, 30_00)).await?;
        let declined = gateway.charge(request(None, 30_00)).await?;

        assert!(matches!(approved, ChargeOutcome::Approved { .. }));
        assert_eq!(
            declined,
            ChargeOutcome::Declined {
                reason: "insufficient wallet balance".to_string()
            }
        );
        assert_eq!(
            gateway.balance("customer-1").await,
            Some(Money::from_minor(20_00, USD))
        );

        Ok(())
    }

    #[tokio::test]
    async fn wallet_charges_once_per_reference() -> TestResult {
        let gateway = WalletGateway::new().with_balance("customer-1", Money::from_minor(50_00, USD));
        let request = request(None, 30_00);

        gateway.charge(request.clone()).await?;
        gateway.charge(request.clone()).await?;

        assert_eq!(
            gateway.balance("customer-1").await,
            Some(Money::from_minor(20_00, USD))
        );
        assert!(matches!(
            gateway.lookup(request.reference).await?,
            ChargeStatus::Approved { .. }
        ));

        Ok(())
    }

    #[tokio::test]
    async fn orders_are_deduplicated_by_reference() -> TestResult {
        let orders = InMemoryOrders::new();
        let snapshot = snapshot()?;

        let first = orders.create_order(snapshot.clone()).await?;
        let second = orders.create_order(snapshot).await?;

        assert_eq!(first, second);
        assert_eq!(orders.orders().await.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn order_status_transitions_are_enforced() -> TestResult {
        let orders = InMemoryOrders::new();
        let uuid = orders.create_order(snapshot()?).await?;

        orders.update_status(uuid, OrderStatus::Processing).await?;

        let backwards = orders.update_status(uuid, OrderStatus::Pending).await;

        assert_eq!(
            backwards,
            Err(OrderServiceError::InvalidTransition {
                from: OrderStatus::Processing,
                to: OrderStatus::Pending,
            })
        );

        orders.update_status(uuid, OrderStatus::Completed).await?;

        assert_eq!(
            orders.get(uuid).await.map(|order| order.status),
            Some(OrderStatus::Completed)
        );

        Ok(())
    }

    #[tokio::test]
    async fn updating_unknown_order_fails() {
        let orders = InMemoryOrders::new();
        let uuid = OrderUuid::now_v7();

        let result = orders.update_status(uuid, OrderStatus::Failed).await;

        assert_eq!(result, Err(OrderServiceError::NotFound(uuid)));
    }
}
