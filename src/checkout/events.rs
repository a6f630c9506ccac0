//! Checkout Events
//!
//! Notifications emitted as a session changes, so a front end can refresh
//! without polling.

use crate::{
    checkout::step::CheckoutStep,
    coupons::CouponCode,
    ids::{OrderUuid, PaymentReference},
    ports::payments::PaymentMethod,
    pricing::Amount,
};

/// Something observable happened to a checkout session.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckoutEvent {
    /// Lines or quantities changed.
    CartChanged {
        /// Number of lines
        lines: usize,
        /// Total units across lines
        units: u64,
    },

    /// A coupon was applied, replacing any previous one.
    CouponApplied {
        /// Applied code
        code: CouponCode,
    },

    /// The applied coupon was removed.
    CouponRemoved {
        /// Removed code
        code: CouponCode,
    },

    /// The session moved to another step.
    StepChanged {
        /// Previous step
        from: CheckoutStep,
        /// Current step
        to: CheckoutStep,
    },

    /// A charge was sent to a gateway.
    PaymentSubmitted {
        /// Idempotency key for the charge
        reference: PaymentReference,
        /// Method charged
        method: PaymentMethod,
        /// Amount charged
        amount: Amount,
    },

    /// The gateway did not answer in time; the charge awaits reconciliation.
    PaymentPending {
        /// Unresolved charge
        reference: PaymentReference,
    },

    /// The charge was declined or could not be made.
    PaymentFailed {
        /// Failed charge
        reference: PaymentReference,
        /// Reason shown to the customer
        reason: String,
    },

    /// The order was created and the cart cleared.
    OrderPlaced {
        /// Created order
        order: OrderUuid,
        /// Charge that paid for it
        reference: PaymentReference,
    },
}

/// Receives checkout events as they happen.
pub trait CheckoutObserver: Send {
    /// Called after each state change.
    fn on_event(&mut self, event: &CheckoutEvent);
}

/// Observer that ignores every event.
#[derive(Debug, Default)]
pub struct NoopObserver;

impl CheckoutObserver for NoopObserver {
    fn on_event(&mut self, _: &CheckoutEvent) {}
}

/// Observer that keeps every event in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    events: Vec<CheckoutEvent>,
}

impl RecordingObserver {
    /// Create an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received so far, oldest first.
    pub fn events(&self) -> &[CheckoutEvent] {
        &self.events
    }

    /// Take the received events, leaving the recorder empty.
    pub fn drain(&mut self) -> Vec<CheckoutEvent> {
        std::mem::take(&mut self.events)
    }
}

impl CheckoutObserver for RecordingObserver {
    fn on_event(&mut self, event: &CheckoutEvent) {
        self.events.push(event.clone());
    }
}

impl<F> CheckoutObserver for F
where
    F: FnMut(&CheckoutEvent) + Send,
{
    fn on_event(&mut self, event: &CheckoutEvent) {
        self(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_observer_keeps_order() {
        let mut observer = RecordingObserver::new();

        observer.on_event(&CheckoutEvent::CartChanged { lines: 1, units: 2 });
        observer.on_event(&CheckoutEvent::StepChanged {
            from: CheckoutStep::CartReview,
            to: CheckoutStep::Billing,
        });

        let events = observer.drain();

        assert_eq!(events.len(), 2);
        assert!(matches!(events.first(), Some(CheckoutEvent::CartChanged { .. })));
        assert!(observer.events().is_empty());
    }

    #[test]
    fn closures_are_observers() {
        let mut seen = 0_usize;

        {
            let mut observer = |_: &CheckoutEvent| seen += 1;
            observer.on_event(&CheckoutEvent::CartChanged { lines: 0, units: 0 });
            observer.on_event(&CheckoutEvent::CartChanged { lines: 1, units: 1 });
        }

        assert_eq!(seen, 2);
    }
}
