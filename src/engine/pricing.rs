//! Booking price rules and the GST breakdown applied at invoice time.

use chrono::Datelike;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::calendar::Calendar;
use crate::model::*;

use super::EngineError;

/// `ceil(n / d)` for `n >= 0`, `d > 0`.
fn ceil_div(n: Ms, d: Ms) -> Ms {
    (n + d - 1) / d
}

/// Inclusive day count: a same-day booking is one day, exactly 24h is two.
pub fn billable_days(span: &Span) -> i64 {
    ceil_div(span.duration_ms(), DAY_MS) + 1
}

pub fn billable_weeks(span: &Span) -> i64 {
    ceil_div(span.duration_ms(), WEEK_MS).max(1)
}

/// Calendar months touched, counted in server-local time.
/// Jan 15 → Feb 3 is two months.
pub fn billable_months(calendar: &Calendar, span: &Span) -> Result<i64, EngineError> {
    let from = calendar
        .local(span.start)
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
    let to = calendar
        .local(span.end)
        .ok_or(EngineError::LimitExceeded("timestamp out of range"))?;
    let years = i64::from(to.year() - from.year());
    let months = i64::from(to.month()) - i64::from(from.month());
    Ok(years * 12 + months + 1)
}

/// Pre-tax amount for a booking on a resolved span.
pub fn quote(
    calendar: &Calendar,
    kind: SpaceKind,
    price: Decimal,
    plan: PlanType,
    span: &Span,
) -> Result<Decimal, EngineError> {
    let units = match (kind, plan) {
        (SpaceKind::Conference, PlanType::Daily) => return Ok(price),
        (SpaceKind::Conference, other) => return Err(EngineError::invalid_plan(kind, other)),
        (_, PlanType::Daily) => billable_days(span),
        (_, PlanType::Weekly) => billable_weeks(span),
        (_, PlanType::Monthly) => billable_months(calendar, span)?,
    };
    price
        .checked_mul(Decimal::from(units))
        .ok_or(EngineError::LimitExceeded("amount too large"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaxBreakdown {
    pub amount: Decimal,
    pub gst: Decimal,
    pub total: Decimal,
}

/// `gst = round(amount * rate)` to whole units, halves away from zero.
pub fn with_gst(amount: Decimal, rate: Decimal) -> Result<TaxBreakdown, EngineError> {
    let gst = amount
        .checked_mul(rate)
        .ok_or(EngineError::LimitExceeded("amount too large"))?
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
    let total = amount
        .checked_add(gst)
        .ok_or(EngineError::LimitExceeded("amount too large"))?;
    Ok(TaxBreakdown { amount, gst, total })
}

pub fn issue_invoice(booking: &Booking, rate: Decimal, at: Ms) -> Result<Invoice, EngineError> {
    let tax = with_gst(booking.total_amount, rate)?;
    Ok(Invoice {
        number: format!("INV-{}", booking.id),
        amount: tax.amount,
        gst_rate: rate,
        gst: tax.gst,
        total: tax.total,
        issued_at: at,
    })
}
