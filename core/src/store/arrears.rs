use super::{AggregateStore, ArrearsAgingRow, ArrearsStore};
use crate::{
    aggregate_writer::AggregateWrite,
    error::ArrearsResult,
    types::{money_from_minor, money_to_minor, BusinessDate, LoanId, LoanStatus},
};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

const UPSERT_SQL: &str = "INSERT INTO loan_arrears_aging
     (loan_id, principal_overdue, interest_overdue, fee_overdue, penalty_overdue,
      total_overdue, overdue_since_date)
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT(loan_id) DO UPDATE SET
        principal_overdue  = excluded.principal_overdue,
        interest_overdue   = excluded.interest_overdue,
        fee_overdue        = excluded.fee_overdue,
        penalty_overdue    = excluded.penalty_overdue,
        total_overdue      = excluded.total_overdue,
        overdue_since_date = excluded.overdue_since_date";

const DELETE_SQL: &str = "DELETE FROM loan_arrears_aging WHERE loan_id = ?1";

/// Live-schedule arrears for every active loan that is not replayed
/// against its original schedule. Mirrors
/// `allocation::arrears_from_live_schedule` row for row.
const BULK_INSERT_SQL: &str = "INSERT INTO loan_arrears_aging
     (loan_id, principal_overdue, interest_overdue, fee_overdue, penalty_overdue,
      total_overdue, overdue_since_date)
     SELECT loan_id, principal_overdue, interest_overdue, fee_overdue, penalty_overdue,
            principal_overdue + interest_overdue + fee_overdue + penalty_overdue,
            overdue_since_date
     FROM (
        SELECT l.id AS loan_id,
               SUM(MAX(s.principal_amount - s.principal_completed
                       - s.principal_waived - s.principal_writtenoff, 0)) AS principal_overdue,
               SUM(MAX(s.interest_amount - s.interest_completed
                       - s.interest_waived - s.interest_writtenoff, 0)) AS interest_overdue,
               SUM(MAX(s.fee_charges_amount - s.fee_charges_completed
                       - s.fee_charges_waived - s.fee_charges_writtenoff, 0)) AS fee_overdue,
               SUM(MAX(s.penalty_charges_amount - s.penalty_charges_completed
                       - s.penalty_charges_waived - s.penalty_charges_writtenoff, 0)) AS penalty_overdue,
               MIN(CASE WHEN s.principal_amount - s.principal_completed
                             - s.principal_waived - s.principal_writtenoff > 0
                        THEN s.due_date END) AS overdue_since_date
        FROM loan l
        JOIN loan_product lp ON lp.id = l.product_id
        JOIN loan_repayment_schedule s ON s.loan_id = l.id
        WHERE l.loan_status_id = ?2
          AND s.completed = 0
          AND s.due_date < date(?1, printf('-%d days',
                COALESCE(l.grace_on_arrears_ageing, lp.grace_on_arrears_ageing, 0)))
          AND (lp.arrears_based_on_original_schedule = 0
               OR NOT EXISTS (SELECT 1 FROM loan_repayment_schedule_history h
                              WHERE h.loan_id = l.id))
        GROUP BY l.id
     )
     WHERE principal_overdue > 0";

/// Execute one aggregate write on `conn`.
fn apply_write(conn: &Connection, write: &AggregateWrite) -> ArrearsResult<()> {
    match write {
        AggregateWrite::Upsert(agg) => {
            let [principal, interest, fee, penalty] = agg.overdue.to_minor()?;
            let total = money_to_minor(agg.total_overdue())?;
            let mut stmt = conn.prepare_cached(UPSERT_SQL)?;
            stmt.execute(params![
                agg.loan_id,
                principal,
                interest,
                fee,
                penalty,
                total,
                agg.overdue_since_date,
            ])?;
        }
        AggregateWrite::Delete { loan_id } => {
            let mut stmt = conn.prepare_cached(DELETE_SQL)?;
            stmt.execute(params![loan_id])?;
        }
    }
    Ok(())
}

impl AggregateStore for ArrearsStore {
    fn reset_aggregates(&self) -> ArrearsResult<usize> {
        Ok(self.conn.execute("DELETE FROM loan_arrears_aging", [])?)
    }

    fn bulk_insert_live_schedule_arrears(&self, business_date: BusinessDate) -> ArrearsResult<usize> {
        Ok(self
            .conn
            .execute(BULK_INSERT_SQL, params![business_date, LoanStatus::Active.code()])?)
    }

    fn execute_aggregate_batch(&self, writes: &[AggregateWrite]) -> ArrearsResult<()> {
        // IMMEDIATE takes the write lock up front, so lock waits surface
        // here as SQLITE_BUSY instead of half-way through the batch.
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        for write in writes {
            apply_write(&tx, write)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn execute_aggregate_write(&self, write: &AggregateWrite) -> ArrearsResult<()> {
        apply_write(&self.conn, write)
    }
}

impl ArrearsStore {
    // ── Aggregate queries ──────────────────────────────────────────

    pub fn aggregate_for(&self, loan_id: LoanId) -> ArrearsResult<Option<ArrearsAgingRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT loan_id, principal_overdue, interest_overdue, fee_overdue,
                        penalty_overdue, total_overdue, overdue_since_date
                 FROM loan_arrears_aging WHERE loan_id = ?1",
                params![loan_id],
                map_aging_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn all_aggregates(&self) -> ArrearsResult<Vec<ArrearsAgingRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT loan_id, principal_overdue, interest_overdue, fee_overdue,
                    penalty_overdue, total_overdue, overdue_since_date
             FROM loan_arrears_aging
             ORDER BY loan_id ASC",
        )?;
        let rows = stmt
            .query_map([], map_aging_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn aggregate_count(&self) -> ArrearsResult<i64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM loan_arrears_aging", [], |r| r.get(0))?)
    }
}

fn map_aging_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ArrearsAgingRow> {
    Ok(ArrearsAgingRow {
        loan_id: row.get(0)?,
        principal_overdue: money_from_minor(row.get(1)?),
        interest_overdue: money_from_minor(row.get(2)?),
        fee_overdue: money_from_minor(row.get(3)?),
        penalty_overdue: money_from_minor(row.get(4)?),
        total_overdue: money_from_minor(row.get(5)?),
        overdue_since_date: row.get(6)?,
    })
}
