//! The two seams between the engine and the database.
//!
//! `ArrearsStore` implements both. Tests wrap it to inject lock
//! timeouts or record which loans were touched.

use super::LoanContext;
use crate::{
    aggregate_writer::AggregateWrite,
    allocation::{LiveInstallment, LoanSummary, ScheduledInstallment},
    error::ArrearsResult,
    types::{BusinessDate, LoanId},
};

/// Read side: the loan book.
pub trait LoanBook {
    /// Active loans past `min_id` whose product ages against the
    /// original schedule and that have an installment overdue beyond
    /// grace as of `business_date`. Ascending, at most `page_size`.
    fn fetch_candidate_loan_ids(
        &self,
        min_id: LoanId,
        page_size: usize,
        business_date: BusinessDate,
    ) -> ArrearsResult<Vec<LoanId>>;

    /// Earliest schedule-history version, in due-date order.
    /// Empty when the loan has never been rescheduled.
    fn load_original_installments(&self, loan_id: LoanId) -> ArrearsResult<Vec<ScheduledInstallment>>;

    /// Live schedule, in due-date order.
    fn load_live_installments(&self, loan_id: LoanId) -> ArrearsResult<Vec<LiveInstallment>>;

    fn load_loan_summary(&self, loan_id: LoanId) -> ArrearsResult<LoanSummary>;

    fn load_loan_context(&self, loan_id: LoanId) -> ArrearsResult<LoanContext>;
}

/// Write side: the materialized aggregate table.
pub trait AggregateStore {
    /// Delete every aggregate row. Returns rows removed.
    fn reset_aggregates(&self) -> ArrearsResult<usize>;

    /// One `INSERT .. SELECT` for every loan aged off the live schedule.
    /// Returns rows inserted.
    fn bulk_insert_live_schedule_arrears(&self, business_date: BusinessDate) -> ArrearsResult<usize>;

    /// All writes in one immediate transaction: either all land or none.
    fn execute_aggregate_batch(&self, writes: &[AggregateWrite]) -> ArrearsResult<()>;

    /// One write on the current connection, inside whatever transaction
    /// the caller has open.
    fn execute_aggregate_write(&self, write: &AggregateWrite) -> ArrearsResult<()>;
}
