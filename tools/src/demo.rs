//! Synthetic loan book for demo runs.
//!
//! Same seed, same book: every amount, date and status comes from one
//! seeded PCG stream.

use anyhow::Result;
use arrears_core::{
    store::{ArrearsStore, LoanProductRow, LoanRow, LoanTotals, ScheduleHistoryRow, ScheduleRow},
    types::{BusinessDate, Buckets, LoanId, LoanStatus},
};
use chrono::Duration;
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64Mcg;
use rust_decimal::Decimal;

const LIVE_PRODUCT: i64 = 1;
const ORIGINAL_PRODUCT: i64 = 2;
const GRACE_PRODUCT: i64 = 3;
const DAYS_PER_PERIOD: i64 = 30;

pub struct DemoBook {
    pub loans: usize,
    pub rescheduled: usize,
    pub closed: usize,
}

fn cents(rng: &mut Pcg64Mcg, low: i64, high: i64) -> Decimal {
    Decimal::new(rng.gen_range(low..=high), 2)
}

fn products() -> [LoanProductRow; 3] {
    [
        LoanProductRow {
            id: LIVE_PRODUCT,
            name: "Personal loan".into(),
            arrears_based_on_original_schedule: false,
            grace_on_arrears_ageing: 0,
        },
        LoanProductRow {
            id: ORIGINAL_PRODUCT,
            name: "Restructurable SME loan".into(),
            arrears_based_on_original_schedule: true,
            grace_on_arrears_ageing: 0,
        },
        LoanProductRow {
            id: GRACE_PRODUCT,
            name: "Payroll loan".into(),
            arrears_based_on_original_schedule: false,
            grace_on_arrears_ageing: 5,
        },
    ]
}

/// Write `count` loans into an empty loan book, disbursed so that
/// some installments fall due before `business_date`.
pub fn populate(store: &ArrearsStore, count: usize, seed: u64, business_date: BusinessDate) -> Result<DemoBook> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let mut book = DemoBook {
        loans: 0,
        rescheduled: 0,
        closed: 0,
    };

    store.in_transaction(|s| {
        for product in products() {
            if s.get_product(product.id)?.is_none() {
                s.insert_product(&product)?;
            }
        }
        for loan_id in 1..=count as LoanId {
            let outcome = demo_loan(s, &mut rng, loan_id, business_date)?;
            book.loans += 1;
            book.rescheduled += usize::from(outcome.rescheduled);
            book.closed += usize::from(outcome.closed);
        }
        Ok(())
    })?;

    log::info!(
        "Demo book: {} loan(s), {} rescheduled, {} closed",
        book.loans,
        book.rescheduled,
        book.closed
    );
    Ok(book)
}

struct LoanOutcome {
    rescheduled: bool,
    closed: bool,
}

fn demo_loan(
    store: &ArrearsStore,
    rng: &mut Pcg64Mcg,
    loan_id: LoanId,
    business_date: BusinessDate,
) -> arrears_core::error::ArrearsResult<LoanOutcome> {
    let product_id = match rng.gen_range(0..10) {
        0..=4 => LIVE_PRODUCT,
        5..=7 => ORIGINAL_PRODUCT,
        _ => GRACE_PRODUCT,
    };
    let periods: u32 = rng.gen_range(3..=12);
    let elapsed: i64 = rng.gen_range(0..=i64::from(periods));
    let disbursed = business_date - Duration::days(elapsed * DAYS_PER_PERIOD + rng.gen_range(0..DAYS_PER_PERIOD));

    let schedule: Vec<(u32, BusinessDate, Buckets)> = (1..=periods)
        .map(|n| {
            let due_date = disbursed + Duration::days(i64::from(n) * DAYS_PER_PERIOD);
            let due = Buckets::new(
                cents(rng, 5_000, 50_000),
                cents(rng, 500, 5_000),
                if rng.gen_bool(0.2) { cents(rng, 100, 2_500) } else { Decimal::ZERO },
                Decimal::ZERO,
            );
            (n, due_date, due)
        })
        .collect();

    // Borrowers pay the first `paid_in_full` installments, and a part
    // of the next one.
    let paid_in_full = rng.gen_range(0..=periods) as usize;
    let partial_share = Decimal::new(rng.gen_range(0..=100), 2);

    let closed = paid_in_full == schedule.len() && rng.gen_bool(0.5);
    let status = if closed { LoanStatus::ClosedObligationsMet } else { LoanStatus::Active };
    let rescheduled = product_id == ORIGINAL_PRODUCT && !closed && rng.gen_bool(0.6);

    let mut live_rows = Vec::with_capacity(schedule.len());
    let mut repaid = Buckets::ZERO;
    for (idx, (n, due_date, due)) in schedule.iter().enumerate() {
        let paid = match idx.cmp(&paid_in_full) {
            std::cmp::Ordering::Less => *due,
            std::cmp::Ordering::Equal => Buckets::new(
                (due.principal * partial_share).round_dp(2),
                (due.interest * partial_share).round_dp(2),
                Decimal::ZERO,
                Decimal::ZERO,
            ),
            std::cmp::Ordering::Greater => Buckets::ZERO,
        };
        repaid += paid;
        let mut row = ScheduleRow::unpaid(loan_id, *n, *due_date, *due);
        row.completed = paid;
        row.fully_completed = due.saturating_sub(&paid).is_zero();
        // A reschedule pushes every open installment two periods out.
        if rescheduled && !row.fully_completed {
            row.due_date = *due_date + Duration::days(2 * DAYS_PER_PERIOD);
        }
        live_rows.push(row);
    }

    store.insert_loan(&LoanRow {
        id: loan_id,
        product_id,
        status,
        grace_on_arrears_ageing: None,
        totals: LoanTotals {
            repaid,
            ..LoanTotals::default()
        },
    })?;
    for row in &live_rows {
        store.insert_schedule_row(row)?;
    }
    if rescheduled {
        for (n, due_date, due) in &schedule {
            store.insert_schedule_history_row(&ScheduleHistoryRow {
                loan_id,
                version: 1,
                installment: *n,
                due_date: *due_date,
                due: *due,
            })?;
        }
    }
    Ok(LoanOutcome { rescheduled, closed })
}
