//! Business events published by the loan module.
//!
//! RULE: the arrears engine learns about loan changes ONLY through these
//! events. It never hooks into the operations themselves.
//! Variants are appended, never removed or reordered.

use crate::types::LoanId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusinessEvent {
    // ── Transactions ───────────────────────────────
    RepaymentPosted {
        loan_id: LoanId,
        transaction_id: i64,
    },
    TransactionAdjusted {
        loan_id: LoanId,
        transaction_id: i64,
    },
    InterestWaived {
        loan_id: LoanId,
        transaction_id: i64,
    },
    WriteOffUndone {
        loan_id: LoanId,
        transaction_id: i64,
    },
    Disbursed {
        loan_id: LoanId,
        transaction_id: i64,
    },
    Foreclosed {
        loan_id: LoanId,
        transaction_id: i64,
    },

    // ── Charges ────────────────────────────────────
    ChargeAdded {
        loan_id: LoanId,
        charge_id: i64,
    },
    ChargeWaived {
        loan_id: LoanId,
        charge_id: i64,
    },
    ChargePaid {
        loan_id: LoanId,
        charge_id: i64,
        transaction_id: i64,
    },
    OverdueChargeApplied {
        loan_id: LoanId,
        charge_id: i64,
    },

    // ── Life cycle ─────────────────────────────────
    LoanApproved {
        loan_id: LoanId,
    },
    LoanRejected {
        loan_id: LoanId,
    },
}

/// Payload-free discriminant, used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    RepaymentPosted,
    TransactionAdjusted,
    InterestWaived,
    WriteOffUndone,
    Disbursed,
    Foreclosed,
    ChargeAdded,
    ChargeWaived,
    ChargePaid,
    OverdueChargeApplied,
    LoanApproved,
    LoanRejected,
}

/// Events after which a loan's arrears position may have changed.
pub const ARREARS_TRIGGERS: [EventKind; 10] = [
    EventKind::RepaymentPosted,
    EventKind::TransactionAdjusted,
    EventKind::ChargeAdded,
    EventKind::ChargeWaived,
    EventKind::ChargePaid,
    EventKind::InterestWaived,
    EventKind::WriteOffUndone,
    EventKind::Disbursed,
    EventKind::Foreclosed,
    EventKind::OverdueChargeApplied,
];

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::RepaymentPosted => "repayment_posted",
            Self::TransactionAdjusted => "transaction_adjusted",
            Self::InterestWaived => "interest_waived",
            Self::WriteOffUndone => "write_off_undone",
            Self::Disbursed => "disbursed",
            Self::Foreclosed => "foreclosed",
            Self::ChargeAdded => "charge_added",
            Self::ChargeWaived => "charge_waived",
            Self::ChargePaid => "charge_paid",
            Self::OverdueChargeApplied => "overdue_charge_applied",
            Self::LoanApproved => "loan_approved",
            Self::LoanRejected => "loan_rejected",
        }
    }
}

impl BusinessEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::RepaymentPosted { .. } => EventKind::RepaymentPosted,
            Self::TransactionAdjusted { .. } => EventKind::TransactionAdjusted,
            Self::InterestWaived { .. } => EventKind::InterestWaived,
            Self::WriteOffUndone { .. } => EventKind::WriteOffUndone,
            Self::Disbursed { .. } => EventKind::Disbursed,
            Self::Foreclosed { .. } => EventKind::Foreclosed,
            Self::ChargeAdded { .. } => EventKind::ChargeAdded,
            Self::ChargeWaived { .. } => EventKind::ChargeWaived,
            Self::ChargePaid { .. } => EventKind::ChargePaid,
            Self::OverdueChargeApplied { .. } => EventKind::OverdueChargeApplied,
            Self::LoanApproved { .. } => EventKind::LoanApproved,
            Self::LoanRejected { .. } => EventKind::LoanRejected,
        }
    }

    pub fn loan_id(&self) -> LoanId {
        match self {
            Self::RepaymentPosted { loan_id, .. }
            | Self::TransactionAdjusted { loan_id, .. }
            | Self::InterestWaived { loan_id, .. }
            | Self::WriteOffUndone { loan_id, .. }
            | Self::Disbursed { loan_id, .. }
            | Self::Foreclosed { loan_id, .. }
            | Self::ChargeAdded { loan_id, .. }
            | Self::ChargeWaived { loan_id, .. }
            | Self::ChargePaid { loan_id, .. }
            | Self::OverdueChargeApplied { loan_id, .. }
            | Self::LoanApproved { loan_id }
            | Self::LoanRejected { loan_id } => *loan_id,
        }
    }
}
