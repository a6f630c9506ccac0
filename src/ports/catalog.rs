//! Plan Catalog

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::{ids::PlanUuid, pricing::Amount};

/// Errors returned by a plan catalog.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CatalogError {
    /// No plan with this identifier exists.
    #[error("plan {0} not found")]
    NotFound(PlanUuid),

    /// The catalog could not be reached.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// A purchasable proxy or server plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    /// Plan identifier
    pub uuid: PlanUuid,

    /// Display name
    pub name: String,

    /// Unit price
    pub price: Amount,

    /// Image shown next to the cart line
    pub image_ref: Option<String>,
}

impl Plan {
    /// Create a plan without an image.
    pub fn new(uuid: PlanUuid, name: impl Into<String>, price: Amount) -> Self {
        Self {
            uuid,
            name: name.into(),
            price,
            image_ref: None,
        }
    }

    /// Attach an image reference.
    #[must_use]
    pub fn with_image(mut self, image_ref: impl Into<String>) -> Self {
        self.image_ref = Some(image_ref.into());
        self
    }
}

/// Source of plan names, prices and images.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PlanCatalog: Send + Sync {
    /// Look up a single plan.
    async fn get_plan(&self, uuid: PlanUuid) -> Result<Plan, CatalogError>;
}
