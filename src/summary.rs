//! Checkout Summary
//!
//! Renders cart lines and totals as a table for review and confirmation.

use std::io;

use tabled::{
    builder::Builder,
    grid::config::HorizontalLine,
    settings::{Alignment, Style, Theme, object::Columns},
};
use thiserror::Error;

use crate::{
    cart::Cart,
    coupons::CouponCode,
    ids::OrderUuid,
    orders::OrderSnapshot,
    pricing::{Amount, CheckoutTotals, TotalsError},
};

/// Errors that can occur when building or writing a summary.
#[derive(Debug, Error)]
pub enum SummaryError {
    /// A line total could not be computed.
    #[error(transparent)]
    Totals(#[from] TotalsError),

    /// Writing failed.
    #[error("failed to write checkout summary")]
    IO(#[source] io::Error),
}

/// One table row.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryLine {
    /// Plan name
    pub name: String,

    /// Units
    pub quantity: u32,

    /// Price per unit
    pub unit_price: Amount,

    /// `unit_price * quantity`
    pub line_total: Amount,
}

/// Lines and totals ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSummary {
    lines: Vec<SummaryLine>,
    coupon: Option<CouponCode>,
    totals: CheckoutTotals,
    order: Option<OrderUuid>,
}

impl CheckoutSummary {
    /// Summarise a cart under review.
    ///
    /// # Errors
    ///
    /// Returns a [`TotalsError`] if a line total overflows.
    pub fn from_cart(cart: &Cart, totals: CheckoutTotals) -> Result<Self, TotalsError> {
        let lines = cart
            .items()
            .iter()
            .map(|item| {
                Ok(SummaryLine {
                    name: item.name.clone(),
                    quantity: item.quantity.get(),
                    unit_price: item.unit_price,
                    line_total: item.line_total()?,
                })
            })
            .collect::<Result<Vec<_>, TotalsError>>()?;

        Ok(Self {
            lines,
            coupon: cart.coupon().map(|coupon| coupon.code.clone()),
            totals,
            order: None,
        })
    }

    /// Summarise a placed order.
    pub fn from_order(order: OrderUuid, snapshot: &OrderSnapshot) -> Self {
        Self {
            lines: snapshot
                .lines
                .iter()
                .map(|line| SummaryLine {
                    name: line.name.clone(),
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                    line_total: line.line_total,
                })
                .collect(),
            coupon: snapshot.coupon.clone(),
            totals: snapshot.totals,
            order: Some(order),
        }
    }

    /// Table rows.
    pub fn lines(&self) -> &[SummaryLine] {
        &self.lines
    }

    /// Totals shown beneath the table.
    pub fn totals(&self) -> &CheckoutTotals {
        &self.totals
    }

    /// Writes the table and totals.
    ///
    /// # Errors
    ///
    /// Returns [`SummaryError::IO`] if `out` cannot be written.
    pub fn write_to(&self, mut out: impl io::Write) -> Result<(), SummaryError> {
        let mut builder = Builder::default();

        builder.push_record(["Plan", "Qty", "Unit Price", "Line Total"]);

        for line in &self.lines {
            builder.push_record([
                line.name.clone(),
                line.quantity.to_string(),
                line.unit_price.to_string(),
                line.line_total.to_string(),
            ]);
        }

        let mut table = builder.build();
        let mut theme = Theme::from(Style::modern_rounded());

        theme.remove_horizontal_lines();
        theme.insert_horizontal_line(
            1,
            HorizontalLine::new(Some('─'), Some('┼'), Some('├'), Some('┤')),
        );

        table.with(theme);
        table.modify(Columns::new(1..4), Alignment::right());

        writeln!(out, "\n{table}").map_err(SummaryError::IO)?;

        if let Some(order) = self.order {
            writeln!(out, " Order: {order}").map_err(SummaryError::IO)?;
        }

        let discount_label = match &self.coupon {
            Some(code) => format!("Discount ({code}):"),
            None => "Discount:".to_string(),
        };

        let rows = [
            ("Subtotal:".to_string(), self.totals.subtotal.to_string()),
            (discount_label, format!("-{}", self.totals.discount)),
            ("Tax:".to_string(), self.totals.tax.to_string()),
            ("Total:".to_string(), self.totals.grand_total.to_string()),
        ];

        let label_width = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        let value_width = rows.iter().map(|(_, value)| value.len()).max().unwrap_or(0);

        for (label, value) in rows {
            writeln!(out, " {label:>label_width$}  {value:>value_width$}")
                .map_err(SummaryError::IO)?;
        }

        writeln!(out).map_err(SummaryError::IO)
    }
}
