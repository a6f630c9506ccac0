//! Order Service

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

use crate::{
    ids::OrderUuid,
    orders::{OrderSnapshot, OrderStatus},
};

/// Errors returned by the order service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderServiceError {
    /// No order with this identifier exists.
    #[error("order {0} not found")]
    NotFound(OrderUuid),

    /// The requested status change is not allowed.
    #[error("invalid order status transition from {from} to {to}")]
    InvalidTransition {
        /// Current status
        from: OrderStatus,
        /// Requested status
        to: OrderStatus,
    },

    /// The order store could not be reached.
    #[error("order service unavailable: {0}")]
    Unavailable(String),
}

/// The sole writer of persisted orders.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Create an order from a paid checkout.
    ///
    /// Must be idempotent on [`OrderSnapshot::reference`]: a second call with
    /// the same payment reference returns the existing order.
    async fn create_order(&self, snapshot: OrderSnapshot) -> Result<OrderUuid, OrderServiceError>;

    /// Move an order to a new status.
    async fn update_status(
        &self,
        order: OrderUuid,
        status: OrderStatus,
    ) -> Result<(), OrderServiceError>;
}
