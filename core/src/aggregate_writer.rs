//! Aggregate writer: turns an arrears computation into the one
//! statement that makes `loan_arrears_aging` agree with it.
//!
//! RULES:
//!   - Principal overdue > 0 → upsert keyed by loan_id.
//!   - Anything else → unconditional delete. Never a zeroed row.
//!   - Every write is idempotent, so a batch of them can be replayed
//!     wholesale after a lock timeout.
//!
//! The SQL itself lives in store/arrears.rs.

use crate::{
    allocation::ArrearsTotals,
    types::{Buckets, LoanId, Money},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One loan's arrears position. `total_overdue` is derived, never stored
/// independently of its four components.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanArrearsAggregate {
    pub loan_id: LoanId,
    pub overdue: Buckets,
    pub overdue_since_date: NaiveDate,
}

impl LoanArrearsAggregate {
    pub fn principal_overdue(&self) -> Money {
        self.overdue.principal
    }

    pub fn total_overdue(&self) -> Money {
        self.overdue.total()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AggregateWrite {
    Upsert(LoanArrearsAggregate),
    Delete { loan_id: LoanId },
}

impl AggregateWrite {
    pub fn for_loan(loan_id: LoanId, totals: &ArrearsTotals) -> Self {
        match totals.overdue_since_date {
            Some(since) if totals.in_arrears() => Self::Upsert(LoanArrearsAggregate {
                loan_id,
                overdue: totals.overdue,
                overdue_since_date: since,
            }),
            _ => Self::Delete { loan_id },
        }
    }

    pub fn loan_id(&self) -> LoanId {
        match self {
            Self::Upsert(agg) => agg.loan_id,
            Self::Delete { loan_id } => *loan_id,
        }
    }

    pub fn is_upsert(&self) -> bool {
        matches!(self, Self::Upsert(_))
    }
}

/// Writes accumulated for one sub-batch, in loan order.
#[derive(Debug, Default)]
pub struct WriteBatch {
    writes: Vec<AggregateWrite>,
}

impl WriteBatch {
    pub fn with_capacity(n: usize) -> Self {
        Self {
            writes: Vec::with_capacity(n),
        }
    }

    pub fn push(&mut self, write: AggregateWrite) {
        self.writes.push(write);
    }

    pub fn writes(&self) -> &[AggregateWrite] {
        &self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn upserts(&self) -> usize {
        self.writes.iter().filter(|w| w.is_upsert()).count()
    }

    pub fn deletes(&self) -> usize {
        self.writes.len() - self.upserts()
    }
}
