//! Scenario runner
//!
//! Plays a scenario's steps against one checkout session. A step that fails
//! is logged and recorded and the run carries on with the next step, the way
//! a customer would after seeing an error message.

use std::{io, time::Duration};

use thiserror::Error;
use tracing::{debug, info, warn};

use tollgate::prelude::*;

use crate::{
    config::RunArgs,
    scenario::{Scenario, ScenarioError, Step, Storefront},
};

/// Session settings for a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Customer the session belongs to
    pub customer: String,

    /// Time allowed for a gateway to answer a charge
    pub gateway_timeout: Duration,
}

impl From<&RunArgs> for RunOptions {
    fn from(args: &RunArgs) -> Self {
        Self {
            customer: args.customer.clone(),
            gateway_timeout: args.gateway_timeout(),
        }
    }
}

/// What happened when a step was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step succeeded.
    Done(String),

    /// The step was rejected.
    Failed {
        /// Message shown to the customer
        message: String,

        /// Whether the customer can carry on after this error
        recoverable: bool,
    },
}

/// One applied step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    /// 1-based position in the scenario
    pub number: usize,

    /// Action name
    pub action: &'static str,

    /// Result
    pub outcome: StepOutcome,
}

/// Everything a run produced.
#[derive(Debug)]
pub struct RunReport {
    /// Steps in the order they were applied
    pub steps: Vec<StepRecord>,

    /// Checkout step the session finished on
    pub final_step: CheckoutStep,

    /// Order placed by the session, if any
    pub order: Option<OrderUuid>,

    /// Payment still awaiting an outcome, if any
    pub pending: Option<PaymentReference>,

    /// Every event the session emitted
    pub events: Vec<CheckoutEvent>,

    /// Placed order, or the cart under review when no order was placed
    pub summary: Option<CheckoutSummary>,
}

impl RunReport {
    /// Number of rejected steps.
    pub fn failures(&self) -> usize {
        self.steps
            .iter()
            .filter(|record| matches!(record.outcome, StepOutcome::Failed { .. }))
            .count()
    }

    /// Write the step transcript followed by the checkout summary.
    ///
    /// # Errors
    ///
    /// Returns [`SummaryError::IO`] if `out` cannot be written.
    pub fn write_to(&self, mut out: impl io::Write) -> Result<(), SummaryError> {
        let width = self
            .steps
            .iter()
            .map(|record| record.action.len())
            .max()
            .unwrap_or(0);

        for record in &self.steps {
            let (status, detail) = match &record.outcome {
                StepOutcome::Done(detail) => ("ok", detail),
                StepOutcome::Failed { message, .. } => ("failed", message),
            };

            writeln!(
                out,
                " {:>3}. {:<width$}  {status}: {detail}",
                record.number, record.action
            )
            .map_err(SummaryError::IO)?;
        }

        writeln!(out, "\n Finished on: {}", self.final_step).map_err(SummaryError::IO)?;

        if let Some(reference) = self.pending {
            writeln!(out, " Awaiting payment outcome: {reference}").map_err(SummaryError::IO)?;
        }

        match &self.summary {
            Some(summary) => summary.write_to(out),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
enum StepError {
    #[error(transparent)]
    Checkout(#[from] CheckoutError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

/// Run every step of `scenario` in a fresh session.
///
/// # Errors
///
/// Returns a [`ScenarioError`] if the scenario's storefront cannot be built.
/// Checkout errors raised by individual steps are recorded in the report.
pub async fn run(scenario: &Scenario, options: &RunOptions) -> Result<RunReport, ScenarioError> {
    let storefront = scenario.storefront()?;

    let config = CheckoutConfig::default()
        .with_currency(storefront.currency)
        .with_gateway_timeout(options.gateway_timeout);

    let mut flow = CheckoutFlow::new(options.customer.clone(), storefront.services.clone(), config)
        .with_observer(RecordingObserver::new());

    info!(
        customer = %options.customer,
        steps = scenario.steps.len(),
        "running checkout scenario"
    );

    let mut steps = Vec::with_capacity(scenario.steps.len());
    let mut events = Vec::new();

    for (index, step) in scenario.steps.iter().enumerate() {
        let number = index + 1;

        let outcome = match apply(&mut flow, &storefront, step).await {
            Ok(detail) => {
                debug!(number, action = step.action(), %detail, "step applied");

                StepOutcome::Done(detail)
            }
            Err(StepError::Checkout(error)) => {
                warn!(number, action = step.action(), %error, "step rejected");

                StepOutcome::Failed {
                    message: error.user_message(),
                    recoverable: error.is_recoverable(),
                }
            }
            Err(StepError::Scenario(error)) => return Err(error),
        };

        for event in flow.observer_mut().drain() {
            debug!(?event, "checkout event");
            events.push(event);
        }

        steps.push(StepRecord {
            number,
            action: step.action(),
            outcome,
        });
    }

    if let Some(reference) = flow.pending_payment() {
        warn!(%reference, "scenario finished with a payment awaiting its outcome");
    }

    let summary = summarise(&flow, &storefront).await;

    Ok(RunReport {
        steps,
        final_step: flow.step(),
        order: flow.order(),
        pending: flow.pending_payment(),
        events,
        summary,
    })
}

async fn apply(
    flow: &mut CheckoutFlow<RecordingObserver>,
    storefront: &Storefront,
    step: &Step,
) -> Result<String, StepError> {
    let detail = match step {
        Step::Add { plan, quantity } => {
            flow.add_item(storefront.plan(plan)?, *quantity).await?;

            format!("{quantity} x {plan}")
        }
        Step::Remove { plan } => {
            if flow.remove_item(storefront.plan(plan)?)? {
                format!("removed {plan}")
            } else {
                format!("{plan} was not in the cart")
            }
        }
        Step::Quantity { plan, delta } => {
            match flow.change_quantity(storefront.plan(plan)?, *delta)? {
                Some(quantity) => format!("{plan} now {quantity}"),
                None => format!("{plan} removed"),
            }
        }
        Step::Coupon { code } => {
            flow.apply_coupon(code).await?;

            match flow.cart().coupon() {
                Some(coupon) => format!("applied {}", coupon.code),
                None => format!("applied {code}"),
            }
        }
        Step::RemoveCoupon => match flow.remove_coupon()? {
            Some(coupon) => format!("removed {}", coupon.code),
            None => "no coupon applied".to_string(),
        },
        Step::Billing(details) => {
            flow.set_billing(details.clone())?;

            format!("billing details for {}", details.full_name())
        }
        Step::Method { method } => {
            flow.select_payment_method(*method)?;

            format!("selected {method}")
        }
        Step::Advance => format!("at {}", flow.advance_step()?),
        Step::Retreat => format!("at {}", flow.retreat_step()?),
        Step::Pay { method, details } => {
            let method = method
                .or_else(|| flow.payment_method())
                .ok_or(CheckoutError::PaymentRequired)?;

            let order = flow.submit_payment(method, details.clone()).await?;

            format!("order {order} placed")
        }
        Step::Reconcile => match flow.reconcile_payment().await? {
            ReconcileOutcome::NothingPending => "no payment pending".to_string(),
            ReconcileOutcome::Pending { reference } => format!("{reference} still processing"),
            ReconcileOutcome::Completed { order } => format!("order {order} placed"),
            ReconcileOutcome::Cleared { reference } => {
                format!("{reference} never reached the gateway; pay again")
            }
        },
    };

    Ok(detail)
}

async fn summarise(
    flow: &CheckoutFlow<RecordingObserver>,
    storefront: &Storefront,
) -> Option<CheckoutSummary> {
    if let Some(order) = flow.order() {
        let stored = storefront.orders.get(order).await?;

        return Some(CheckoutSummary::from_order(order, &stored.snapshot));
    }

    if flow.cart().is_empty() {
        return None;
    }

    let totals = match flow.compute_totals().await {
        Ok(totals) => totals,
        Err(error) => {
            warn!(%error, "could not price the cart for the summary");

            return None;
        }
    };

    match CheckoutSummary::from_cart(flow.cart(), totals) {
        Ok(summary) => Some(summary),
        Err(error) => {
            warn!(%error, "could not summarise the cart");

            None
        }
    }
}
