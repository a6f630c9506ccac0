//! Scenarios
//!
//! A scenario file describes the storefront a checkout runs against (plans,
//! coupons, tax rates and wallet balances) and the ordered actions a customer
//! takes.
//!
//! ```yaml
//! currency: USD
//! tax:
//!   rate: 8.9%
//! plans:
//!   residential:
//!     name: Residential 5GB
//!     price: 29.99 USD
//! coupons:
//!   SAVE10:
//!     type: percentage_off
//!     value: 10%
//! steps:
//!   - action: add
//!     plan: residential
//!     quantity: 2
//!   - action: coupon
//!     code: save10
//!   - action: advance
//! ```

use std::{fs, path::Path, str::FromStr, sync::Arc};

use decimal_percentage::Percentage;
use jiff::Timestamp;
use rust_decimal::Decimal;
use rustc_hash::FxHashMap;
use rusty_money::{
    Money,
    iso::{Currency, EUR, GBP, USD},
};
use serde::Deserialize;
use thiserror::Error;

use tollgate::{
    coupons::EmptyCouponCode,
    prelude::*,
};

/// Scenario loading errors
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// IO error reading the scenario file
    #[error("Failed to read scenario file: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_norway::Error),

    /// Invalid price format
    #[error("Invalid price format: {0}")]
    InvalidPrice(String),

    /// Invalid percentage format
    #[error("Invalid percentage format: {0}")]
    InvalidPercentage(String),

    /// Unknown currency code
    #[error("Unknown currency code: {0}")]
    UnknownCurrency(String),

    /// A price is not in the scenario currency
    #[error("Currency mismatch: expected {0}, found {1}")]
    CurrencyMismatch(String, String),

    /// A step names a plan key the scenario does not define
    #[error("Plan not found: {0}")]
    PlanNotFound(String),

    /// A coupon key is not a usable code
    #[error("Invalid coupon code: {0}")]
    InvalidCouponCode(#[from] EmptyCouponCode),
}

/// Tax rates.
#[derive(Debug, Default, Deserialize)]
pub struct TaxFixture {
    /// Rate charged where no regional rate applies; without one, other
    /// regions are unsupported
    pub rate: Option<String>,

    /// Rates by country code
    #[serde(default)]
    pub regions: FxHashMap<String, String>,
}

/// A catalog plan.
#[derive(Debug, Deserialize)]
pub struct PlanFixture {
    /// Display name
    pub name: String,

    /// Unit price, e.g. `29.99 USD`
    pub price: String,

    /// Image reference
    pub image: Option<String>,
}

/// What a coupon takes off.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscountFixture {
    /// Percentage off the subtotal, e.g. `10%`
    PercentageOff {
        /// Percentage
        value: String,
    },

    /// Fixed amount off the subtotal, e.g. `5.00 USD`
    AmountOff {
        /// Amount
        value: String,
    },
}

/// A coupon with an optional validity window.
#[derive(Debug, Deserialize)]
pub struct CouponFixture {
    /// Discount
    #[serde(flatten)]
    pub discount: DiscountFixture,

    /// First instant the coupon is valid (RFC 3339)
    pub valid_from: Option<Timestamp>,

    /// Instant the coupon expires (RFC 3339)
    pub valid_until: Option<Timestamp>,
}

/// One customer action.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Add units of a plan
    Add {
        /// Plan key
        plan: String,

        /// Units to add
        #[serde(default = "one")]
        quantity: u32,
    },

    /// Remove a plan's line
    Remove {
        /// Plan key
        plan: String,
    },

    /// Change a line's quantity by a signed delta
    Quantity {
        /// Plan key
        plan: String,

        /// Units to add (positive) or take away (negative)
        delta: i64,
    },

    /// Apply a coupon code
    Coupon {
        /// Code as the customer typed it
        code: String,
    },

    /// Remove the applied coupon
    RemoveCoupon,

    /// Enter billing details
    Billing(BillingDetails),

    /// Choose a payment method
    Method {
        /// Method
        method: PaymentMethod,
    },

    /// Move to the next checkout step
    Advance,

    /// Move to the previous checkout step
    Retreat,

    /// Submit payment
    Pay {
        /// Method to pay with; defaults to the selected method
        method: Option<PaymentMethod>,

        /// Token and payer passed to the gateway
        #[serde(flatten)]
        details: PaymentDetails,
    },

    /// Ask for the outcome of an unresolved payment
    Reconcile,
}

const fn one() -> u32 {
    1
}

impl Step {
    /// Action name as written in scenario files.
    pub const fn action(&self) -> &'static str {
        match self {
            Step::Add { .. } => "add",
            Step::Remove { .. } => "remove",
            Step::Quantity { .. } => "quantity",
            Step::Coupon { .. } => "coupon",
            Step::RemoveCoupon => "remove_coupon",
            Step::Billing(_) => "billing",
            Step::Method { .. } => "method",
            Step::Advance => "advance",
            Step::Retreat => "retreat",
            Step::Pay { .. } => "pay",
            Step::Reconcile => "reconcile",
        }
    }

    fn plan_key(&self) -> Option<&str> {
        match self {
            Step::Add { plan, .. } | Step::Remove { plan } | Step::Quantity { plan, .. } => {
                Some(plan.as_str())
            }
            _ => None,
        }
    }
}

/// A parsed scenario file.
#[derive(Debug, Deserialize)]
pub struct Scenario {
    /// Currency the cart is priced in
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Tax rates
    #[serde(default)]
    pub tax: TaxFixture,

    /// Plans by key
    #[serde(default)]
    pub plans: FxHashMap<String, PlanFixture>,

    /// Coupons by code
    #[serde(default)]
    pub coupons: FxHashMap<String, CouponFixture>,

    /// Wallet balances by payer, e.g. `10.00 USD`
    #[serde(default)]
    pub wallets: FxHashMap<String, String>,

    /// Customer actions, in order
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl FromStr for Scenario {
    type Err = ScenarioError;

    fn from_str(yaml: &str) -> Result<Self, Self::Err> {
        Ok(serde_norway::from_str(yaml)?)
    }
}

impl Scenario {
    /// Read and parse a scenario file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a valid scenario.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        fs::read_to_string(path)?.parse()
    }

    /// Build in-memory services for this scenario.
    ///
    /// # Errors
    ///
    /// Returns an error if a price, percentage or coupon code is malformed,
    /// a price is in another currency, or a step names an unknown plan.
    pub fn storefront(&self) -> Result<Storefront, ScenarioError> {
        let currency = parse_currency(&self.currency)?;

        let mut catalog = InMemoryCatalog::new();
        let mut plans = FxHashMap::default();

        for (key, fixture) in &self.plans {
            let mut plan = Plan::new(
                PlanUuid::now_v7(),
                fixture.name.clone(),
                parse_price_in(&fixture.price, currency)?,
            );

            if let Some(image) = &fixture.image {
                plan = plan.with_image(image.clone());
            }

            plans.insert(key.clone(), plan.uuid);
            catalog.insert(plan);
        }

        if let Some(unknown) = self
            .steps
            .iter()
            .filter_map(Step::plan_key)
            .find(|key| !plans.contains_key(*key))
        {
            return Err(ScenarioError::PlanNotFound(unknown.to_string()));
        }

        let mut coupons = InMemoryCoupons::new();

        for (code, fixture) in &self.coupons {
            let discount = match &fixture.discount {
                DiscountFixture::PercentageOff { value } => {
                    CouponDiscount::PercentageOff(parse_percentage(value)?)
                }
                DiscountFixture::AmountOff { value } => {
                    CouponDiscount::AmountOff(parse_price_in(value, currency)?)
                }
            };

            coupons.insert(
                Coupon::new(CouponCode::parse(code)?, discount)
                    .with_window(fixture.valid_from, fixture.valid_until),
            );
        }

        let mut tax = match &self.tax.rate {
            Some(rate) => FlatRateTax::new(parse_percentage(rate)?),
            None => FlatRateTax::regional_only(),
        };

        for (region, rate) in &self.tax.regions {
            tax = tax.with_region(region, parse_percentage(rate)?);
        }

        let mut wallet = WalletGateway::new();

        for (payer, balance) in &self.wallets {
            wallet = wallet.with_balance(payer.clone(), parse_price(balance)?);
        }

        let gateway = Arc::new(ScriptedGateway::new());
        let wallet = Arc::new(wallet);
        let orders = Arc::new(InMemoryOrders::new());

        let services = CheckoutServices {
            catalog: Arc::new(catalog),
            coupons: Arc::new(coupons),
            tax: Arc::new(tax),
            gateways: PaymentGateways::new()
                .with(PaymentMethod::Card, gateway.clone())
                .with(PaymentMethod::PayPal, gateway.clone())
                .with(PaymentMethod::Crypto, gateway.clone())
                .with(PaymentMethod::WalletBalance, wallet.clone()),
            orders: orders.clone(),
        };

        Ok(Storefront {
            currency,
            plans,
            gateway,
            wallet,
            orders,
            services,
        })
    }
}

/// In-memory services built from a scenario.
#[derive(Debug, Clone)]
pub struct Storefront {
    /// Scenario currency
    pub currency: &'static Currency,

    /// Plan identifiers by scenario key
    pub plans: FxHashMap<String, PlanUuid>,

    /// Gateway serving card, `PayPal` and crypto payments
    pub gateway: Arc<ScriptedGateway>,

    /// Gateway serving wallet payments
    pub wallet: Arc<WalletGateway>,

    /// Placed orders
    pub orders: Arc<InMemoryOrders>,

    /// Handles passed to the checkout session
    pub services: CheckoutServices,
}

impl Storefront {
    /// Identifier of the plan with scenario key `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ScenarioError::PlanNotFound`] if no plan has this key.
    pub fn plan(&self, key: &str) -> Result<PlanUuid, ScenarioError> {
        self.plans
            .get(key)
            .copied()
            .ok_or_else(|| ScenarioError::PlanNotFound(key.to_string()))
    }
}

/// Resolve an ISO currency code.
///
/// # Errors
///
/// Returns [`ScenarioError::UnknownCurrency`] for codes other than GBP, USD
/// and EUR.
pub fn parse_currency(code: &str) -> Result<&'static Currency, ScenarioError> {
    match code.trim() {
        "GBP" => Ok(GBP),
        "USD" => Ok(USD),
        "EUR" => Ok(EUR),
        other => Err(ScenarioError::UnknownCurrency(other.to_string())),
    }
}

/// Parse a price string like "2.99 GBP".
///
/// # Errors
///
/// Returns an error if the format is invalid, the currency is unknown, or the
/// amount is more precise than the currency's minor unit.
pub fn parse_price(s: &str) -> Result<Amount, ScenarioError> {
    let parts: Vec<&str> = s.split_whitespace().collect();

    let [amount, currency_code] = parts.as_slice() else {
        return Err(ScenarioError::InvalidPrice(format!(
            "Expected format 'AMOUNT CURRENCY', got: {s}"
        )));
    };

    let currency = parse_currency(currency_code)?;

    let mut amount = amount
        .parse::<Decimal>()
        .map_err(|_err| ScenarioError::InvalidPrice(s.to_string()))?;

    if amount.scale() > currency.exponent {
        return Err(ScenarioError::InvalidPrice(format!(
            "{s} has more decimal places than {} allows",
            currency.iso_alpha_code
        )));
    }

    amount.rescale(currency.exponent);

    let minor_units = i64::try_from(amount.mantissa())
        .map_err(|_err| ScenarioError::InvalidPrice(s.to_string()))?;

    Ok(Money::from_minor(minor_units, currency))
}

fn parse_price_in(s: &str, currency: &'static Currency) -> Result<Amount, ScenarioError> {
    let price = parse_price(s)?;

    if price.currency() != currency {
        return Err(ScenarioError::CurrencyMismatch(
            currency.iso_alpha_code.to_string(),
            price.currency().iso_alpha_code.to_string(),
        ));
    }

    Ok(price)
}

/// Parse a percentage string like "15%" or "0.15".
///
/// # Errors
///
/// Returns an error if the value cannot be parsed as a number.
pub fn parse_percentage(s: &str) -> Result<Percentage, ScenarioError> {
    let trimmed = s.trim();

    if let Some(percent_str) = trimmed.strip_suffix('%') {
        let value = percent_str
            .trim()
            .parse::<f64>()
            .map_err(|_err| ScenarioError::InvalidPercentage(s.to_string()))?;

        Ok(Percentage::from(value / 100.0))
    } else {
        let value = trimmed
            .parse::<f64>()
            .map_err(|_err| ScenarioError::InvalidPercentage(s.to_string()))?;

        Ok(Percentage::from(value))
    }
}
