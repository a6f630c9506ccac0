//! Payment Gateways

use std::{fmt, sync::Arc};

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{ids::PaymentReference, pricing::Amount};

/// How the customer pays.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Credit or debit card
    Card,
    /// `PayPal` account
    #[serde(rename = "paypal")]
    PayPal,
    /// Cryptocurrency processor
    Crypto,
    /// Pre-funded storefront wallet
    WalletBalance,
}

impl PaymentMethod {
    /// Snake-case method name.
    pub const fn as_str(self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::PayPal => "paypal",
            PaymentMethod::Crypto => "crypto",
            PaymentMethod::WalletBalance => "wallet_balance",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Method-specific payment data, passed through to the gateway untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentDetails {
    /// Tokenised card, `PayPal` approval or crypto invoice token
    pub token: Option<String>,

    /// Account the payment is drawn from, e.g. a wallet owner
    pub payer_reference: Option<String>,
}

impl PaymentDetails {
    /// Details carrying only a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            payer_reference: None,
        }
    }
}

/// A request to take payment.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeRequest {
    /// Idempotency key; gateways must not charge the same reference twice
    pub reference: PaymentReference,

    /// Payment method
    pub method: PaymentMethod,

    /// Amount to charge
    pub amount: Amount,

    /// Customer being charged
    pub customer: String,

    /// Method-specific data
    pub details: PaymentDetails,
}

/// Gateway response to a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Payment taken
    Approved {
        /// Gateway transaction reference
        transaction: String,
    },

    /// Payment refused
    Declined {
        /// Reason given by the gateway
        reason: String,
    },
}

/// What a gateway knows about an earlier charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeStatus {
    /// Payment taken
    Approved {
        /// Gateway transaction reference
        transaction: String,
    },

    /// Payment refused
    Declined {
        /// Reason given by the gateway
        reason: String,
    },

    /// Still being processed
    Processing,

    /// The gateway never received this reference
    NotReceived,
}

/// Errors talking to a gateway.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// The gateway could not be reached.
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),

    /// The gateway refused the request as malformed.
    #[error("payment request rejected: {0}")]
    Rejected(String),
}

/// An external payment processor.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge the customer.
    async fn charge(&self, request: ChargeRequest) -> Result<ChargeOutcome, GatewayError>;

    /// Query the outcome of a charge by its reference.
    async fn lookup(&self, reference: PaymentReference) -> Result<ChargeStatus, GatewayError>;
}

/// Gateways keyed by the payment method they serve.
#[derive(Clone, Default)]
pub struct PaymentGateways {
    gateways: FxHashMap<PaymentMethod, Arc<dyn PaymentGateway>>,
}

impl PaymentGateways {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `gateway` for `method`, replacing any previous one.
    #[must_use]
    pub fn with(mut self, method: PaymentMethod, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateways.insert(method, gateway);
        self
    }

    /// Gateway for `method`.
    pub fn get(&self, method: PaymentMethod) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(&method).cloned()
    }

    /// Whether a gateway is registered for `method`.
    pub fn supports(&self, method: PaymentMethod) -> bool {
        self.gateways.contains_key(&method)
    }
}

impl fmt::Debug for PaymentGateways {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.gateways.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use testresult::TestResult;

    use super::*;

    #[test]
    fn registry_resolves_registered_methods_only() {
        let gateways = PaymentGateways::new().with(
            PaymentMethod::Card,
            Arc::new(MockPaymentGateway::new()),
        );

        assert!(gateways.supports(PaymentMethod::Card));
        assert!(gateways.get(PaymentMethod::Card).is_some());
        assert!(!gateways.supports(PaymentMethod::Crypto));
        assert!(gateways.get(PaymentMethod::Crypto).is_none());
    }

    #[test]
    fn methods_use_storefront_names() -> TestResult {
        let method: PaymentMethod = serde_norway::from_str("paypal")?;

        assert_eq!(method, PaymentMethod::PayPal);
        assert_eq!(PaymentMethod::WalletBalance.to_string(), "wallet_balance");

        Ok(())
    }
}
