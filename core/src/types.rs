//! Shared primitive types used across the arrears engine.

use crate::error::{ArrearsError, ArrearsResult};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign};

/// Primary key of a loan in the loan book.
pub type LoanId = i64;

/// The bank's business date. Arrears are always aged against it,
/// never against wall-clock time.
pub type BusinessDate = NaiveDate;

/// Monetary amount. Persisted as integer minor units.
pub type Money = Decimal;

/// Number of decimal places kept in the database.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// Convert stored minor units (cents) into a `Money` value.
pub fn money_from_minor(units: i64) -> Money {
    Decimal::new(units, MINOR_UNIT_SCALE)
}

/// Convert a `Money` value into minor units for storage.
/// Rounds half-even to `MINOR_UNIT_SCALE` places first.
pub fn money_to_minor(amount: Money) -> ArrearsResult<i64> {
    let mut scaled = amount.round_dp(MINOR_UNIT_SCALE);
    scaled.rescale(MINOR_UNIT_SCALE);
    i64::try_from(scaled.mantissa()).map_err(|_| ArrearsError::AmountOutOfRange { amount })
}

/// One amount per repayment bucket.
///
/// Every schedule figure in the engine (dues, consumed totals,
/// outstanding and overdue amounts) is split the same four ways.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Buckets {
    pub principal: Money,
    pub interest: Money,
    pub fee: Money,
    pub penalty: Money,
}

impl Buckets {
    pub const ZERO: Buckets = Buckets {
        principal: Decimal::ZERO,
        interest: Decimal::ZERO,
        fee: Decimal::ZERO,
        penalty: Decimal::ZERO,
    };

    pub fn new(principal: Money, interest: Money, fee: Money, penalty: Money) -> Self {
        Self { principal, interest, fee, penalty }
    }

    /// Only principal, everything else zero.
    pub fn principal_only(principal: Money) -> Self {
        Self { principal, ..Self::ZERO }
    }

    pub fn from_minor(principal: i64, interest: i64, fee: i64, penalty: i64) -> Self {
        Self::new(
            money_from_minor(principal),
            money_from_minor(interest),
            money_from_minor(fee),
            money_from_minor(penalty),
        )
    }

    pub fn total(&self) -> Money {
        self.principal + self.interest + self.fee + self.penalty
    }

    pub fn is_zero(&self) -> bool {
        self.principal.is_zero() && self.interest.is_zero() && self.fee.is_zero() && self.penalty.is_zero()
    }

    pub fn any_negative(&self) -> bool {
        [self.principal, self.interest, self.fee, self.penalty]
            .iter()
            .any(|amount| *amount < Decimal::ZERO)
    }

    /// Per-bucket `self - other`, floored at zero.
    pub fn saturating_sub(&self, other: &Buckets) -> Buckets {
        let floor = |a: Money, b: Money| (a - b).max(Decimal::ZERO);
        Buckets {
            principal: floor(self.principal, other.principal),
            interest: floor(self.interest, other.interest),
            fee: floor(self.fee, other.fee),
            penalty: floor(self.penalty, other.penalty),
        }
    }

    /// All four buckets as minor units, in column order.
    pub fn to_minor(&self) -> ArrearsResult<[i64; 4]> {
        Ok([
            money_to_minor(self.principal)?,
            money_to_minor(self.interest)?,
            money_to_minor(self.fee)?,
            money_to_minor(self.penalty)?,
        ])
    }
}

impl Add for Buckets {
    type Output = Buckets;

    fn add(self, rhs: Buckets) -> Buckets {
        Buckets {
            principal: self.principal + rhs.principal,
            interest: self.interest + rhs.interest,
            fee: self.fee + rhs.fee,
            penalty: self.penalty + rhs.penalty,
        }
    }
}

impl AddAssign for Buckets {
    fn add_assign(&mut self, rhs: Buckets) {
        *self = *self + rhs;
    }
}

/// Loan life-cycle status as stored in `loan.loan_status_id`.
///
/// The declared codes are authoritative; any other stored value is
/// rejected rather than guessed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    SubmittedAndPendingApproval,
    Approved,
    Active,
    WithdrawnByClient,
    Rejected,
    ClosedObligationsMet,
    ClosedWrittenOff,
    ClosedRescheduled,
    Overpaid,
}

impl LoanStatus {
    pub fn code(&self) -> i64 {
        match self {
            Self::SubmittedAndPendingApproval => 100,
            Self::Approved => 200,
            Self::Active => 300,
            Self::WithdrawnByClient => 400,
            Self::Rejected => 500,
            Self::ClosedObligationsMet => 600,
            Self::ClosedWrittenOff => 601,
            Self::ClosedRescheduled => 602,
            Self::Overpaid => 700,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            100 => Some(Self::SubmittedAndPendingApproval),
            200 => Some(Self::Approved),
            300 => Some(Self::Active),
            400 => Some(Self::WithdrawnByClient),
            500 => Some(Self::Rejected),
            600 => Some(Self::ClosedObligationsMet),
            601 => Some(Self::ClosedWrittenOff),
            602 => Some(Self::ClosedRescheduled),
            700 => Some(Self::Overpaid),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}
