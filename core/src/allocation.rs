//! Allocation engine: how overdue is a loan, given its schedule.
//!
//! Two ways in, one answer out (`ArrearsTotals`):
//!
//!   - Original-schedule replay: the loan's lifetime consumed totals are
//!     poured over the as-disbursed installments oldest first (FIFO
//!     waterfall). Whatever is not covered is outstanding.
//!   - Live schedule: every live installment already carries what was
//!     paid, waived and written off against it. Outstanding is read off
//!     directly.
//!
//! RULES:
//!   - Pure functions. No I/O, no clock, no randomness.
//!   - Only installments due strictly before the overdue cutoff
//!     (business date minus grace days) count as overdue.
//!   - `overdue_since_date` is the oldest counted installment that still
//!     has principal outstanding.

use crate::{
    error::{ArrearsError, ArrearsResult},
    types::{BusinessDate, Buckets, LoanId, Money},
};
use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One installment of the schedule as originally disbursed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledInstallment {
    pub installment: u32,
    pub due_date: NaiveDate,
    pub due: Buckets,
}

/// One installment of the live (possibly restructured) schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveInstallment {
    pub installment: u32,
    pub due_date: NaiveDate,
    pub due: Buckets,
    /// Completed + waived + written off, per bucket.
    pub consumed: Buckets,
    pub completed: bool,
}

/// Lifetime consumed totals for a loan.
///
/// principal = repaid + written off;
/// interest, fee, penalty = repaid + waived + written off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanSummary {
    pub loan_id: LoanId,
    pub consumed: Buckets,
}

impl LoanSummary {
    pub fn validate(&self) -> ArrearsResult<()> {
        if self.consumed.any_negative() {
            return Err(ArrearsError::InvalidLoanData {
                loan_id: self.loan_id,
                reason: format!("negative lifetime totals in summary: {:?}", self.consumed),
            });
        }
        Ok(())
    }
}

/// Result of the waterfall for one installment. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedInstallment {
    pub installment: u32,
    pub due_date: NaiveDate,
    pub due: Buckets,
    pub paid: Buckets,
    pub complete: bool,
}

impl AllocatedInstallment {
    pub fn outstanding(&self) -> Buckets {
        self.due.saturating_sub(&self.paid)
    }
}

/// Aggregated overdue position of one loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ArrearsTotals {
    pub overdue: Buckets,
    pub overdue_since_date: Option<NaiveDate>,
}

impl ArrearsTotals {
    pub fn total_overdue(&self) -> Money {
        self.overdue.total()
    }

    /// A loan is in arrears only while principal is overdue.
    pub fn in_arrears(&self) -> bool {
        self.overdue.principal > Decimal::ZERO && self.overdue_since_date.is_some()
    }

    fn absorb(&mut self, due_date: NaiveDate, outstanding: Buckets) {
        self.overdue += outstanding;
        if outstanding.principal > Decimal::ZERO {
            self.overdue_since_date = Some(match self.overdue_since_date {
                Some(since) => since.min(due_date),
                None => due_date,
            });
        }
    }
}

/// Installments due before this date are overdue.
pub fn overdue_cutoff(business_date: BusinessDate, grace_days: u32) -> NaiveDate {
    business_date - Duration::days(i64::from(grace_days))
}

/// Reject schedules the waterfall cannot be run over.
pub fn validate_installments(loan_id: LoanId, installments: &[ScheduledInstallment]) -> ArrearsResult<()> {
    if installments.is_empty() {
        return Err(ArrearsError::InvalidLoanData {
            loan_id,
            reason: "no installments to allocate against".into(),
        });
    }
    for pair in installments.windows(2) {
        if pair[1].due_date < pair[0].due_date {
            return Err(ArrearsError::InvalidLoanData {
                loan_id,
                reason: format!(
                    "installment {} due {} precedes installment {} due {}",
                    pair[1].installment, pair[1].due_date, pair[0].installment, pair[0].due_date
                ),
            });
        }
    }
    if let Some(bad) = installments.iter().find(|i| i.due.any_negative()) {
        return Err(ArrearsError::InvalidLoanData {
            loan_id,
            reason: format!("installment {} has a negative due amount", bad.installment),
        });
    }
    Ok(())
}

/// Pour one pool over one bucket. Returns (paid, fully covered).
fn allocate_bucket(due: Money, pool: &mut Money) -> (Money, bool) {
    if due <= *pool {
        *pool -= due;
        (due, true)
    } else {
        let partial = *pool;
        *pool = Decimal::ZERO;
        (partial, false)
    }
}

/// FIFO waterfall of lifetime consumed totals over installments in
/// due-date order.
pub fn allocate(installments: &[ScheduledInstallment], consumed: Buckets) -> Vec<AllocatedInstallment> {
    let mut pool = consumed;
    installments
        .iter()
        .map(|inst| {
            let (principal, p_ok) = allocate_bucket(inst.due.principal, &mut pool.principal);
            let (interest, i_ok) = allocate_bucket(inst.due.interest, &mut pool.interest);
            let (fee, f_ok) = allocate_bucket(inst.due.fee, &mut pool.fee);
            let (penalty, pen_ok) = allocate_bucket(inst.due.penalty, &mut pool.penalty);
            AllocatedInstallment {
                installment: inst.installment,
                due_date: inst.due_date,
                due: inst.due,
                paid: Buckets::new(principal, interest, fee, penalty),
                complete: p_ok && i_ok && f_ok && pen_ok,
            }
        })
        .collect()
}

/// Overdue totals of a replayed schedule as of `cutoff`.
pub fn arrears_from_allocation(allocated: &[AllocatedInstallment], cutoff: NaiveDate) -> ArrearsTotals {
    let mut totals = ArrearsTotals::default();
    for inst in allocated.iter().filter(|i| i.due_date < cutoff && !i.complete) {
        totals.absorb(inst.due_date, inst.outstanding());
    }
    totals
}

/// Overdue totals read directly off the live schedule as of `cutoff`.
pub fn arrears_from_live_schedule(rows: &[LiveInstallment], cutoff: NaiveDate) -> ArrearsTotals {
    let mut totals = ArrearsTotals::default();
    for row in rows.iter().filter(|r| r.due_date < cutoff && !r.completed) {
        totals.absorb(row.due_date, row.due.saturating_sub(&row.consumed));
    }
    totals
}
