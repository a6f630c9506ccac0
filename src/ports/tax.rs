//! Tax

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::pricing::Amount;

/// Errors returned by a tax service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TaxError {
    /// Tax cannot be calculated for this region.
    #[error("unsupported tax region: {0}")]
    UnsupportedRegion(String),

    /// The tax service could not be reached.
    #[error("tax service unavailable: {0}")]
    Unavailable(String),
}

/// Calculates tax owed on a discounted subtotal.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TaxService: Send + Sync {
    /// Tax owed on `taxable` for `region` (an upper-case country code).
    async fn compute_tax(&self, taxable: Amount, region: Option<String>)
    -> Result<Amount, TaxError>;
}
