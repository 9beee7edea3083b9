//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! The engine reads the loan book through `LoanBook` and writes the
//! aggregate table through `AggregateStore`; it never executes SQL
//! directly.

use crate::{
    error::ArrearsResult,
    types::{Buckets, LoanId, LoanStatus, Money},
};
use chrono::NaiveDate;
use rusqlite::{Connection, OpenFlags};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod arrears;
mod loan;
mod source;

pub use source::{AggregateStore, LoanBook};

/// How long a connection waits on another writer before reporting
/// `SQLITE_BUSY`.
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct ArrearsStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl ArrearsStore {
    pub fn open(path: &str) -> ArrearsResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    /// Private to this connection: the recompute job cannot use it.
    pub fn in_memory() -> ArrearsResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Connection factory for the recompute job: one fresh connection
    /// per call, all to the same file.
    pub fn connector(path: &str) -> impl Fn() -> ArrearsResult<ArrearsStore> + Sync {
        let path = path.to_string();
        move || ArrearsStore::open(&path)
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> ArrearsResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_loan_book.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_arrears_aging.sql"))?;
        Ok(())
    }

    /// Run `f` inside one transaction on this connection.
    /// Commits when `f` succeeds; any error rolls everything back,
    /// including arrears writes made by event listeners inside `f`.
    pub fn in_transaction<T>(&self, f: impl FnOnce(&Self) -> ArrearsResult<T>) -> ArrearsResult<T> {
        let tx = self.conn.unchecked_transaction()?;
        let value = f(self)?;
        tx.commit()?;
        Ok(value)
    }
}

// ── Loan book rows ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanProductRow {
    pub id: i64,
    pub name: String,
    pub arrears_based_on_original_schedule: bool,
    pub grace_on_arrears_ageing: u32,
}

/// Lifetime totals as stored on the loan, per bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTotals {
    pub repaid: Buckets,
    pub waived: Buckets,
    pub written_off: Buckets,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoanRow {
    pub id: LoanId,
    pub product_id: i64,
    pub status: LoanStatus,
    pub grace_on_arrears_ageing: Option<u32>,
    pub totals: LoanTotals,
}

/// A live schedule installment as written by the loan module.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleRow {
    pub loan_id: LoanId,
    pub installment: u32,
    pub due_date: NaiveDate,
    pub due: Buckets,
    pub completed: Buckets,
    pub waived: Buckets,
    pub written_off: Buckets,
    pub fully_completed: bool,
}

impl ScheduleRow {
    /// A fresh, untouched installment.
    pub fn unpaid(loan_id: LoanId, installment: u32, due_date: NaiveDate, due: Buckets) -> Self {
        Self {
            loan_id,
            installment,
            due_date,
            due,
            completed: Buckets::ZERO,
            waived: Buckets::ZERO,
            written_off: Buckets::ZERO,
            fully_completed: due.is_zero(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleHistoryRow {
    pub loan_id: LoanId,
    pub version: u32,
    pub installment: u32,
    pub due_date: NaiveDate,
    pub due: Buckets,
}

/// Everything the engine needs to know about a loan besides its schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanContext {
    pub loan_id: LoanId,
    pub status: LoanStatus,
    pub product_id: i64,
    pub arrears_based_on_original_schedule: bool,
    /// Loan override, else product setting, else zero.
    pub grace_days: u32,
    pub has_schedule_history: bool,
}

impl LoanContext {
    /// True when overdue amounts come from replaying the original schedule.
    pub fn replays_original_schedule(&self) -> bool {
        self.arrears_based_on_original_schedule && self.has_schedule_history
    }
}

/// A row of `loan_arrears_aging` as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrearsAgingRow {
    pub loan_id: LoanId,
    pub principal_overdue: Money,
    pub interest_overdue: Money,
    pub fee_overdue: Money,
    pub penalty_overdue: Money,
    pub total_overdue: Money,
    pub overdue_since_date: NaiveDate,
}
