use super::{
    ArrearsStore, LoanBook, LoanContext, LoanProductRow, LoanRow, ScheduleHistoryRow, ScheduleRow,
};
use crate::{
    allocation::{LiveInstallment, LoanSummary, ScheduledInstallment},
    error::{ArrearsError, ArrearsResult},
    types::{BusinessDate, Buckets, LoanId, LoanStatus},
};
use rusqlite::{params, OptionalExtension};

impl LoanBook for ArrearsStore {
    fn fetch_candidate_loan_ids(
        &self,
        min_id: LoanId,
        page_size: usize,
        business_date: BusinessDate,
    ) -> ArrearsResult<Vec<LoanId>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT l.id
             FROM loan l
             JOIN loan_product lp ON lp.id = l.product_id
             WHERE l.id > ?1
               AND l.loan_status_id = ?2
               AND lp.arrears_based_on_original_schedule = 1
               AND EXISTS (
                   SELECT 1 FROM loan_repayment_schedule_history h
                   WHERE h.loan_id = l.id
                     AND h.version = (SELECT MIN(version) FROM loan_repayment_schedule_history
                                      WHERE loan_id = l.id)
                     AND h.due_date < date(?3, printf('-%d days',
                           COALESCE(l.grace_on_arrears_ageing, lp.grace_on_arrears_ageing, 0))))
             ORDER BY l.id ASC
             LIMIT ?4",
        )?;
        let ids = stmt
            .query_map(
                params![min_id, LoanStatus::Active.code(), business_date, page_size as i64],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<LoanId>, _>>()?;
        Ok(ids)
    }

    fn load_original_installments(&self, loan_id: LoanId) -> ArrearsResult<Vec<ScheduledInstallment>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT installment, due_date, principal_amount, interest_amount,
                    fee_charges_amount, penalty_charges_amount
             FROM loan_repayment_schedule_history
             WHERE loan_id = ?1
               AND version = (SELECT MIN(version) FROM loan_repayment_schedule_history
                              WHERE loan_id = ?1)
             ORDER BY due_date ASC, installment ASC",
        )?;
        let rows = stmt
            .query_map(params![loan_id], |row| {
                Ok(ScheduledInstallment {
                    installment: row.get(0)?,
                    due_date: row.get(1)?,
                    due: Buckets::from_minor(row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_live_installments(&self, loan_id: LoanId) -> ArrearsResult<Vec<LiveInstallment>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT installment, due_date,
                    principal_amount, interest_amount, fee_charges_amount, penalty_charges_amount,
                    principal_completed + principal_waived + principal_writtenoff,
                    interest_completed + interest_waived + interest_writtenoff,
                    fee_charges_completed + fee_charges_waived + fee_charges_writtenoff,
                    penalty_charges_completed + penalty_charges_waived + penalty_charges_writtenoff,
                    completed
             FROM loan_repayment_schedule
             WHERE loan_id = ?1
             ORDER BY due_date ASC, installment ASC",
        )?;
        let rows = stmt
            .query_map(params![loan_id], |row| {
                Ok(LiveInstallment {
                    installment: row.get(0)?,
                    due_date: row.get(1)?,
                    due: Buckets::from_minor(row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?),
                    consumed: Buckets::from_minor(row.get(6)?, row.get(7)?, row.get(8)?, row.get(9)?),
                    completed: row.get::<_, i32>(10)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn load_loan_summary(&self, loan_id: LoanId) -> ArrearsResult<LoanSummary> {
        let consumed = self
            .conn
            .prepare_cached(
                "SELECT principal_repaid + principal_writtenoff,
                        interest_repaid + interest_waived + interest_writtenoff,
                        fee_charges_repaid + fee_charges_waived + fee_charges_writtenoff,
                        penalty_charges_repaid + penalty_charges_waived + penalty_charges_writtenoff
                 FROM loan WHERE id = ?1",
            )?
            .query_row(params![loan_id], |row| {
                Ok(Buckets::from_minor(row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .optional()?
            .ok_or(ArrearsError::LoanNotFound { loan_id })?;
        Ok(LoanSummary { loan_id, consumed })
    }

    fn load_loan_context(&self, loan_id: LoanId) -> ArrearsResult<LoanContext> {
        let raw = self
            .conn
            .prepare_cached(
                "SELECT l.loan_status_id, l.product_id, lp.arrears_based_on_original_schedule,
                        COALESCE(l.grace_on_arrears_ageing, lp.grace_on_arrears_ageing, 0),
                        EXISTS (SELECT 1 FROM loan_repayment_schedule_history h
                                WHERE h.loan_id = l.id)
                 FROM loan l
                 JOIN loan_product lp ON lp.id = l.product_id
                 WHERE l.id = ?1",
            )?
            .query_row(params![loan_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i32>(2)? != 0,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i32>(4)? != 0,
                ))
            })
            .optional()?
            .ok_or(ArrearsError::LoanNotFound { loan_id })?;
        let (status_code, product_id, original_schedule, grace, has_history) = raw;

        let status = LoanStatus::from_code(status_code).ok_or_else(|| ArrearsError::InvalidLoanData {
            loan_id,
            reason: format!("unknown loan status {status_code}"),
        })?;
        let grace_days = u32::try_from(grace).map_err(|_| ArrearsError::InvalidLoanData {
            loan_id,
            reason: format!("grace on arrears ageing out of range: {grace}"),
        })?;

        Ok(LoanContext {
            loan_id,
            status,
            product_id,
            arrears_based_on_original_schedule: original_schedule,
            grace_days,
            has_schedule_history: has_history,
        })
    }
}

impl ArrearsStore {
    // ── Loan book writes ───────────────────────────────────────────
    //
    // The loan module owns these tables. The engine never writes them;
    // these exist so tests and the runner can build a loan book and
    // post the business operations whose events trigger recompute.

    pub fn insert_product(&self, p: &LoanProductRow) -> ArrearsResult<()> {
        self.conn.execute(
            "INSERT INTO loan_product (id, name, arrears_based_on_original_schedule, grace_on_arrears_ageing)
             VALUES (?1, ?2, ?3, ?4)",
            params![p.id, p.name, p.arrears_based_on_original_schedule, p.grace_on_arrears_ageing],
        )?;
        Ok(())
    }

    pub fn insert_loan(&self, l: &LoanRow) -> ArrearsResult<()> {
        let [p_rep, i_rep, f_rep, pen_rep] = l.totals.repaid.to_minor()?;
        let [p_wv, i_wv, f_wv, pen_wv] = l.totals.waived.to_minor()?;
        let [p_wo, i_wo, f_wo, pen_wo] = l.totals.written_off.to_minor()?;
        self.conn.execute(
            "INSERT INTO loan (
                id, product_id, loan_status_id, grace_on_arrears_ageing,
                principal_repaid, principal_waived, principal_writtenoff,
                interest_repaid, interest_waived, interest_writtenoff,
                fee_charges_repaid, fee_charges_waived, fee_charges_writtenoff,
                penalty_charges_repaid, penalty_charges_waived, penalty_charges_writtenoff
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16)",
            params![
                l.id,
                l.product_id,
                l.status.code(),
                l.grace_on_arrears_ageing,
                p_rep, p_wv, p_wo,
                i_rep, i_wv, i_wo,
                f_rep, f_wv, f_wo,
                pen_rep, pen_wv, pen_wo,
            ],
        )?;
        Ok(())
    }

    pub fn insert_schedule_row(&self, s: &ScheduleRow) -> ArrearsResult<()> {
        let [p_due, i_due, f_due, pen_due] = s.due.to_minor()?;
        let [p_done, i_done, f_done, pen_done] = s.completed.to_minor()?;
        let [p_wv, i_wv, f_wv, pen_wv] = s.waived.to_minor()?;
        let [p_wo, i_wo, f_wo, pen_wo] = s.written_off.to_minor()?;
        self.conn.execute(
            "INSERT INTO loan_repayment_schedule (
                loan_id, installment, due_date,
                principal_amount, principal_completed, principal_waived, principal_writtenoff,
                interest_amount, interest_completed, interest_waived, interest_writtenoff,
                fee_charges_amount, fee_charges_completed, fee_charges_waived, fee_charges_writtenoff,
                penalty_charges_amount, penalty_charges_completed, penalty_charges_waived,
                penalty_charges_writtenoff, completed
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20)",
            params![
                s.loan_id,
                s.installment,
                s.due_date,
                p_due, p_done, p_wv, p_wo,
                i_due, i_done, i_wv, i_wo,
                f_due, f_done, f_wv, f_wo,
                pen_due, pen_done, pen_wv, pen_wo,
                s.fully_completed,
            ],
        )?;
        Ok(())
    }

    pub fn insert_schedule_history_row(&self, h: &ScheduleHistoryRow) -> ArrearsResult<()> {
        let [p, i, f, pen] = h.due.to_minor()?;
        self.conn.execute(
            "INSERT INTO loan_repayment_schedule_history (
                loan_id, version, installment, due_date,
                principal_amount, interest_amount, fee_charges_amount, penalty_charges_amount
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![h.loan_id, h.version, h.installment, h.due_date, p, i, f, pen],
        )?;
        Ok(())
    }

    /// Post a repayment against one live installment and the loan's
    /// lifetime totals. Marks the installment completed once every
    /// bucket is covered.
    pub fn post_installment_repayment(
        &self,
        loan_id: LoanId,
        installment: u32,
        amount: &Buckets,
    ) -> ArrearsResult<()> {
        let [p, i, f, pen] = amount.to_minor()?;
        let updated = self.conn.execute(
            "UPDATE loan_repayment_schedule SET
                principal_completed       = principal_completed + ?3,
                interest_completed        = interest_completed + ?4,
                fee_charges_completed     = fee_charges_completed + ?5,
                penalty_charges_completed = penalty_charges_completed + ?6
             WHERE loan_id = ?1 AND installment = ?2",
            params![loan_id, installment, p, i, f, pen],
        )?;
        if updated == 0 {
            return Err(ArrearsError::InvalidLoanData {
                loan_id,
                reason: format!("no live installment {installment}"),
            });
        }
        self.conn.execute(
            "UPDATE loan_repayment_schedule SET completed = 1
             WHERE loan_id = ?1 AND installment = ?2
               AND principal_completed + principal_waived + principal_writtenoff >= principal_amount
               AND interest_completed + interest_waived + interest_writtenoff >= interest_amount
               AND fee_charges_completed + fee_charges_waived + fee_charges_writtenoff >= fee_charges_amount
               AND penalty_charges_completed + penalty_charges_waived
                   + penalty_charges_writtenoff >= penalty_charges_amount",
            params![loan_id, installment],
        )?;
        self.conn.execute(
            "UPDATE loan SET
                principal_repaid       = principal_repaid + ?2,
                interest_repaid        = interest_repaid + ?3,
                fee_charges_repaid     = fee_charges_repaid + ?4,
                penalty_charges_repaid = penalty_charges_repaid + ?5
             WHERE id = ?1",
            params![loan_id, p, i, f, pen],
        )?;
        Ok(())
    }

    pub fn set_loan_status(&self, loan_id: LoanId, status: LoanStatus) -> ArrearsResult<()> {
        let updated = self.conn.execute(
            "UPDATE loan SET loan_status_id = ?2 WHERE id = ?1",
            params![loan_id, status.code()],
        )?;
        if updated == 0 {
            return Err(ArrearsError::LoanNotFound { loan_id });
        }
        Ok(())
    }

    /// Write a raw status code. Lets tests reproduce corrupt rows.
    pub fn set_loan_status_code(&self, loan_id: LoanId, code: i64) -> ArrearsResult<()> {
        self.conn.execute(
            "UPDATE loan SET loan_status_id = ?2 WHERE id = ?1",
            params![loan_id, code],
        )?;
        Ok(())
    }

    pub fn get_product(&self, product_id: i64) -> ArrearsResult<Option<LoanProductRow>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, arrears_based_on_original_schedule, grace_on_arrears_ageing
                 FROM loan_product WHERE id = ?1",
                params![product_id],
                |row| {
                    Ok(LoanProductRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        arrears_based_on_original_schedule: row.get::<_, i32>(2)? != 0,
                        grace_on_arrears_ageing: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }

    // ── Test / summary helpers ─────────────────────────────────────

    pub fn loan_count(&self) -> ArrearsResult<i64> {
        Ok(self.conn.query_row("SELECT COUNT(*) FROM loan", [], |r| r.get(0))?)
    }

    pub fn active_loan_count(&self) -> ArrearsResult<i64> {
        Ok(self.conn.query_row(
            "SELECT COUNT(*) FROM loan WHERE loan_status_id = ?1",
            params![LoanStatus::Active.code()],
            |r| r.get(0),
        )?)
    }
}
