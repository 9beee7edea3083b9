//! Incremental recompute: bring one loan's aggregate row up to date
//! after a business operation touched it.
//!
//! RULES:
//!   - Runs on the caller's connection, inside the caller's transaction.
//!     Errors propagate; nothing is swallowed here.
//!   - A loan that is no longer Active loses its row.
//!   - Products flagged to age against the original schedule replay the
//!     earliest schedule-history version. Loans of such products without
//!     any history fall back to the live schedule.

use crate::{
    aggregate_writer::AggregateWrite,
    allocation::{
        allocate, arrears_from_allocation, arrears_from_live_schedule, overdue_cutoff,
        validate_installments, ArrearsTotals,
    },
    clock::BusinessClock,
    error::ArrearsResult,
    store::{AggregateStore, LoanBook, LoanContext},
    types::{BusinessDate, LoanId},
};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecomputeMode {
    /// Follow the product's configuration.
    Auto,
    /// Read the live schedule regardless of the product flag.
    ForceLiveSchedule,
}

/// Replay the original schedule. `None` when the loan has no history.
pub fn original_schedule_arrears<B: LoanBook + ?Sized>(
    book: &B,
    ctx: &LoanContext,
    business_date: BusinessDate,
) -> ArrearsResult<Option<ArrearsTotals>> {
    if !ctx.has_schedule_history {
        return Ok(None);
    }
    let installments = book.load_original_installments(ctx.loan_id)?;
    if installments.is_empty() {
        return Ok(None);
    }
    validate_installments(ctx.loan_id, &installments)?;
    let summary = book.load_loan_summary(ctx.loan_id)?;
    summary.validate()?;

    let allocated = allocate(&installments, summary.consumed);
    let cutoff = overdue_cutoff(business_date, ctx.grace_days);
    Ok(Some(arrears_from_allocation(&allocated, cutoff)))
}

pub fn live_schedule_arrears<B: LoanBook + ?Sized>(
    book: &B,
    ctx: &LoanContext,
    business_date: BusinessDate,
) -> ArrearsResult<ArrearsTotals> {
    let rows = book.load_live_installments(ctx.loan_id)?;
    let cutoff = overdue_cutoff(business_date, ctx.grace_days);
    Ok(arrears_from_live_schedule(&rows, cutoff))
}

/// The write that makes the aggregate table agree with the loan book
/// for `loan_id` as of `business_date`. Shared by the batch poster and
/// the incremental handler.
pub fn compute_aggregate_write<B: LoanBook + ?Sized>(
    book: &B,
    loan_id: LoanId,
    business_date: BusinessDate,
    mode: RecomputeMode,
) -> ArrearsResult<AggregateWrite> {
    let ctx = book.load_loan_context(loan_id)?;
    if !ctx.status.is_active() {
        return Ok(AggregateWrite::Delete { loan_id });
    }

    let replayed = match mode {
        RecomputeMode::Auto if ctx.replays_original_schedule() => {
            original_schedule_arrears(book, &ctx, business_date)?
        }
        _ => None,
    };
    let totals = match replayed {
        Some(totals) => totals,
        None => live_schedule_arrears(book, &ctx, business_date)?,
    };
    Ok(AggregateWrite::for_loan(loan_id, &totals))
}

/// Synchronous recompute of a single loan, driven by business events.
pub struct IncrementalRecompute {
    clock: Arc<dyn BusinessClock>,
}

impl IncrementalRecompute {
    pub fn new(clock: Arc<dyn BusinessClock>) -> Self {
        Self { clock }
    }

    pub fn recompute<S>(&self, store: &S, loan_id: LoanId, mode: RecomputeMode) -> ArrearsResult<AggregateWrite>
    where
        S: LoanBook + AggregateStore + ?Sized,
    {
        let business_date = self.clock.business_date();
        let write = compute_aggregate_write(store, loan_id, business_date, mode)?;
        store.execute_aggregate_write(&write)?;
        log::debug!(
            "Loan {loan_id} arrears recomputed as of {business_date} ({mode:?}): {}",
            if write.is_upsert() { "upsert" } else { "delete" }
        );
        Ok(write)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        allocation::{LiveInstallment, LoanSummary, ScheduledInstallment},
        clock::ManualBusinessDate,
        error::ArrearsError,
        types::{Buckets, LoanStatus},
    };
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use std::cell::RefCell;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    /// One loan held in memory; records the writes it receives.
    struct OneLoanBook {
        ctx: LoanContext,
        original: Vec<ScheduledInstallment>,
        live: Vec<LiveInstallment>,
        consumed: Buckets,
        writes: RefCell<Vec<AggregateWrite>>,
    }

    impl OneLoanBook {
        fn new(original_flag: bool, has_history: bool) -> Self {
            Self {
                ctx: LoanContext {
                    loan_id: 1,
                    status: LoanStatus::Active,
                    product_id: 1,
                    arrears_based_on_original_schedule: original_flag,
                    grace_days: 0,
                    has_schedule_history: has_history,
                },
                // Original: 100 due on the 1st and 100 due on the 10th.
                original: vec![
                    ScheduledInstallment {
                        installment: 1,
                        due_date: day(1),
                        due: Buckets::principal_only(dec!(100)),
                    },
                    ScheduledInstallment {
                        installment: 2,
                        due_date: day(10),
                        due: Buckets::principal_only(dec!(100)),
                    },
                ],
                // Live: rescheduled into one 200 installment due on the 20th.
                live: vec![LiveInstallment {
                    installment: 1,
                    due_date: day(20),
                    due: Buckets::principal_only(dec!(200)),
                    consumed: Buckets::ZERO,
                    completed: false,
                }],
                consumed: Buckets::principal_only(dec!(100)),
                writes: RefCell::new(Vec::new()),
            }
        }
    }

    impl LoanBook for OneLoanBook {
        fn fetch_candidate_loan_ids(&self, _: LoanId, _: usize, _: BusinessDate) -> ArrearsResult<Vec<LoanId>> {
            Ok(vec![self.ctx.loan_id])
        }
        fn load_original_installments(&self, _: LoanId) -> ArrearsResult<Vec<ScheduledInstallment>> {
            Ok(if self.ctx.has_schedule_history { self.original.clone() } else { Vec::new() })
        }
        fn load_live_installments(&self, _: LoanId) -> ArrearsResult<Vec<LiveInstallment>> {
            Ok(self.live.clone())
        }
        fn load_loan_summary(&self, loan_id: LoanId) -> ArrearsResult<LoanSummary> {
            Ok(LoanSummary { loan_id, consumed: self.consumed })
        }
        fn load_loan_context(&self, loan_id: LoanId) -> ArrearsResult<LoanContext> {
            if loan_id == self.ctx.loan_id {
                Ok(self.ctx.clone())
            } else {
                Err(ArrearsError::LoanNotFound { loan_id })
            }
        }
    }

    impl AggregateStore for OneLoanBook {
        fn reset_aggregates(&self) -> ArrearsResult<usize> {
            Ok(0)
        }
        fn bulk_insert_live_schedule_arrears(&self, _: BusinessDate) -> ArrearsResult<usize> {
            Ok(0)
        }
        fn execute_aggregate_batch(&self, writes: &[AggregateWrite]) -> ArrearsResult<()> {
            self.writes.borrow_mut().extend_from_slice(writes);
            Ok(())
        }
        fn execute_aggregate_write(&self, write: &AggregateWrite) -> ArrearsResult<()> {
            self.writes.borrow_mut().push(write.clone());
            Ok(())
        }
    }

    fn handler(date: NaiveDate) -> IncrementalRecompute {
        IncrementalRecompute::new(Arc::new(ManualBusinessDate::new(date)))
    }

    #[test]
    fn original_flag_replays_history() {
        let book = OneLoanBook::new(true, true);
        let write = handler(day(15)).recompute(&book, 1, RecomputeMode::Auto).unwrap();
        match write {
            AggregateWrite::Upsert(agg) => {
                assert_eq!(agg.principal_overdue(), dec!(100));
                assert_eq!(agg.overdue_since_date, day(10));
            }
            other => panic!("expected upsert from the original schedule, got {other:?}"),
        }
        assert_eq!(book.writes.borrow().len(), 1);
    }

    #[test]
    fn forced_live_path_ignores_history() {
        let book = OneLoanBook::new(true, true);
        let write = handler(day(15))
            .recompute(&book, 1, RecomputeMode::ForceLiveSchedule)
            .unwrap();
        assert_eq!(write, AggregateWrite::Delete { loan_id: 1 }, "live installment is not yet due");
    }

    #[test]
    fn original_flag_without_history_uses_live_schedule() {
        let book = OneLoanBook::new(true, false);
        let write = handler(day(25)).recompute(&book, 1, RecomputeMode::Auto).unwrap();
        match write {
            AggregateWrite::Upsert(agg) => {
                assert_eq!(agg.principal_overdue(), dec!(200));
                assert_eq!(agg.overdue_since_date, day(20));
            }
            other => panic!("expected live-schedule upsert, got {other:?}"),
        }
    }

    #[test]
    fn inactive_loan_is_deleted() {
        let mut book = OneLoanBook::new(true, true);
        book.ctx.status = LoanStatus::ClosedObligationsMet;
        let write = handler(day(15)).recompute(&book, 1, RecomputeMode::Auto).unwrap();
        assert_eq!(write, AggregateWrite::Delete { loan_id: 1 });
    }

    #[test]
    fn negative_summary_is_a_data_error() {
        let mut book = OneLoanBook::new(true, true);
        book.consumed = Buckets::principal_only(dec!(-1));
        let err = handler(day(15)).recompute(&book, 1, RecomputeMode::Auto).unwrap_err();
        assert!(matches!(err, ArrearsError::InvalidLoanData { loan_id: 1, .. }), "got {err:?}");
        assert!(book.writes.borrow().is_empty(), "no write after a failed computation");
    }
}
