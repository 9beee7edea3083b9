//! Shared fixtures for the integration tests: a migrated file-backed
//! loan book, seeding shorthands, and an instrumented store that can
//! fake lock timeouts, failed page fetches, rejected writes and panics,
//! and count how often each loan was read.

#![allow(dead_code)]

use arrears_core::{
    aggregate_writer::AggregateWrite,
    allocation::{LiveInstallment, LoanSummary, ScheduledInstallment},
    config::ArrearsJobConfig,
    error::{ArrearsError, ArrearsResult},
    orchestrator::{JobReport, RecomputeJob},
    store::{
        AggregateStore, ArrearsStore, LoanBook, LoanContext, LoanProductRow, LoanRow, LoanTotals,
        ScheduleHistoryRow, ScheduleRow,
    },
    types::{BusinessDate, Buckets, LoanId, LoanStatus, Money},
};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
};
use tempfile::TempDir;

pub const LIVE_PRODUCT: i64 = 1;
pub const ORIGINAL_PRODUCT: i64 = 2;

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
}

/// A migrated SQLite file in a temp dir, plus both standard products.
/// Keep the `TempDir` alive for as long as the store is used.
pub fn build() -> (TempDir, ArrearsStore) {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("arrears.db");
    let store = ArrearsStore::open(path.to_str().unwrap()).expect("open store");
    store.migrate().expect("migration");
    product(&store, LIVE_PRODUCT, false, 0);
    product(&store, ORIGINAL_PRODUCT, true, 0);
    (dir, store)
}

pub fn product(store: &ArrearsStore, id: i64, original_schedule: bool, grace: u32) {
    store
        .insert_product(&LoanProductRow {
            id,
            name: format!("product-{id}"),
            arrears_based_on_original_schedule: original_schedule,
            grace_on_arrears_ageing: grace,
        })
        .unwrap();
}

/// Active loan with `principal_repaid` as its only lifetime total.
pub fn loan(store: &ArrearsStore, id: LoanId, product_id: i64, principal_repaid: Money) {
    store
        .insert_loan(&LoanRow {
            id,
            product_id,
            status: LoanStatus::Active,
            grace_on_arrears_ageing: None,
            totals: LoanTotals {
                repaid: Buckets::principal_only(principal_repaid),
                ..LoanTotals::default()
            },
        })
        .unwrap();
}

/// Live installment with `paid` already completed against it.
pub fn live(store: &ArrearsStore, loan_id: LoanId, n: u32, due_day: u32, due: Buckets, paid: Buckets) {
    let mut row = ScheduleRow::unpaid(loan_id, n, day(due_day), due);
    row.completed = paid;
    row.fully_completed = due.saturating_sub(&paid).is_zero();
    store.insert_schedule_row(&row).unwrap();
}

pub fn history(store: &ArrearsStore, loan_id: LoanId, version: u32, n: u32, due_day: u32, due: Buckets) {
    store
        .insert_schedule_history_row(&ScheduleHistoryRow {
            loan_id,
            version,
            installment: n,
            due_date: day(due_day),
            due,
        })
        .unwrap();
}

pub fn p(amount: Money) -> Buckets {
    Buckets::principal_only(amount)
}

pub fn pi(principal: Money, interest: Money) -> Buckets {
    Buckets::new(principal, interest, Decimal::ZERO, Decimal::ZERO)
}

/// An original-schedule loan: 100 due on the 1st (paid) and 100 due on
/// the 10th (unpaid), both in history and in the live schedule.
pub fn original_loan_overdue_since_tenth(store: &ArrearsStore, id: LoanId) {
    loan(store, id, ORIGINAL_PRODUCT, Decimal::ONE_HUNDRED);
    history(store, id, 1, 1, 1, p(Decimal::ONE_HUNDRED));
    history(store, id, 1, 2, 10, p(Decimal::ONE_HUNDRED));
    live(store, id, 1, 1, p(Decimal::ONE_HUNDRED), p(Decimal::ONE_HUNDRED));
    live(store, id, 2, 10, p(Decimal::ONE_HUNDRED), Buckets::ZERO);
}

pub fn path_of(store: &ArrearsStore) -> String {
    store.path().expect("file-backed store").to_string()
}

pub fn run_job(store: &ArrearsStore, config: ArrearsJobConfig, business_date: BusinessDate) -> ArrearsResult<JobReport> {
    let mut job = RecomputeJob::new(config, business_date, ArrearsStore::connector(&path_of(store)))?;
    job.run()
}

// ── Instrumented store ──────────────────────────────────────────────

#[derive(Default)]
pub struct Probe {
    /// Batches still to be refused with SQLITE_BUSY.
    pub busy_batches: AtomicU32,
    /// Any batch containing this loan is always refused.
    pub always_busy_loan: Mutex<Option<LoanId>>,
    /// Writes touching this loan fail with a CHECK constraint violation.
    pub rejected_loan: Mutex<Option<LoanId>>,
    /// Reading this loan's context panics.
    pub panicking_loan: Mutex<Option<LoanId>>,
    /// Page fetches allowed before every further fetch fails.
    pub fetches_before_failure: Mutex<Option<u32>>,
    pub fetches: AtomicU32,
    pub batch_attempts: AtomicU32,
    pub batches_committed: AtomicU32,
    pub loads: Mutex<HashMap<LoanId, usize>>,
}

impl Probe {
    pub fn loads_of(&self, loan_id: LoanId) -> usize {
        self.loads.lock().unwrap().get(&loan_id).copied().unwrap_or(0)
    }
}

pub fn busy() -> ArrearsError {
    ArrearsError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        Some("database is locked".into()),
    ))
}

pub fn constraint_violation() -> ArrearsError {
    ArrearsError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_CONSTRAINT),
        Some("CHECK constraint failed: loan_arrears_aging".into()),
    ))
}

pub fn disk_io_error() -> ArrearsError {
    ArrearsError::Database(rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_IOERR),
        Some("disk I/O error".into()),
    ))
}

pub struct Instrumented {
    inner: ArrearsStore,
    probe: Arc<Probe>,
}

pub fn instrumented_connector(
    path: String,
    probe: Arc<Probe>,
) -> impl Fn() -> ArrearsResult<Instrumented> {
    move || {
        Ok(Instrumented {
            inner: ArrearsStore::open(&path)?,
            probe: Arc::clone(&probe),
        })
    }
}

impl LoanBook for Instrumented {
    fn fetch_candidate_loan_ids(
        &self,
        min_id: LoanId,
        page_size: usize,
        business_date: BusinessDate,
    ) -> ArrearsResult<Vec<LoanId>> {
        let done = self.probe.fetches.fetch_add(1, Ordering::SeqCst);
        let limit = *self.probe.fetches_before_failure.lock().unwrap();
        if limit.is_some_and(|limit| done >= limit) {
            return Err(disk_io_error());
        }
        self.inner.fetch_candidate_loan_ids(min_id, page_size, business_date)
    }

    fn load_original_installments(&self, loan_id: LoanId) -> ArrearsResult<Vec<ScheduledInstallment>> {
        *self.probe.loads.lock().unwrap().entry(loan_id).or_default() += 1;
        self.inner.load_original_installments(loan_id)
    }

    fn load_live_installments(&self, loan_id: LoanId) -> ArrearsResult<Vec<LiveInstallment>> {
        self.inner.load_live_installments(loan_id)
    }

    fn load_loan_summary(&self, loan_id: LoanId) -> ArrearsResult<LoanSummary> {
        self.inner.load_loan_summary(loan_id)
    }

    fn load_loan_context(&self, loan_id: LoanId) -> ArrearsResult<LoanContext> {
        let panicking = *self.probe.panicking_loan.lock().unwrap();
        if panicking == Some(loan_id) {
            panic!("loan {loan_id} cannot be read");
        }
        self.inner.load_loan_context(loan_id)
    }
}

impl AggregateStore for Instrumented {
    fn reset_aggregates(&self) -> ArrearsResult<usize> {
        self.inner.reset_aggregates()
    }

    fn bulk_insert_live_schedule_arrears(&self, business_date: BusinessDate) -> ArrearsResult<usize> {
        self.inner.bulk_insert_live_schedule_arrears(business_date)
    }

    fn execute_aggregate_batch(&self, writes: &[AggregateWrite]) -> ArrearsResult<()> {
        self.probe.batch_attempts.fetch_add(1, Ordering::SeqCst);
        let rejected = *self.probe.rejected_loan.lock().unwrap();
        if let Some(loan_id) = rejected {
            if writes.iter().any(|w| w.loan_id() == loan_id) {
                return Err(constraint_violation());
            }
        }
        let blocked = *self.probe.always_busy_loan.lock().unwrap();
        if let Some(loan_id) = blocked {
            if writes.iter().any(|w| w.loan_id() == loan_id) {
                return Err(busy());
            }
        }
        let refused = self
            .probe
            .busy_batches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(busy());
        }
        self.inner.execute_aggregate_batch(writes)?;
        self.probe.batches_committed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn execute_aggregate_write(&self, write: &AggregateWrite) -> ArrearsResult<()> {
        let rejected = *self.probe.rejected_loan.lock().unwrap();
        if rejected == Some(write.loan_id()) {
            return Err(constraint_violation());
        }
        self.inner.execute_aggregate_write(write)
    }
}
