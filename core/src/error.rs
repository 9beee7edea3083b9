use crate::types::{LoanId, Money};
use rusqlite::ErrorCode;
use thiserror::Error;

/// How a failure should be handled by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Lock wait, busy database, optimistic conflict. Safe to retry.
    Transient,
    /// Bad input for a single loan. Skip the loan, never retry.
    Data,
    /// Anything else. Abort the job.
    Fatal,
}

#[derive(Error, Debug)]
pub enum ArrearsError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Concurrency conflict: {reason}")]
    ConcurrencyConflict { reason: String },

    #[error("Loan {loan_id} not found")]
    LoanNotFound { loan_id: LoanId },

    #[error("Invalid data for loan {loan_id}: {reason}")]
    InvalidLoanData { loan_id: LoanId, reason: String },

    #[error("Amount {amount} does not fit in minor units")]
    AmountOutOfRange { amount: Money },

    #[error("Invalid job parameter '{name}': {value}")]
    InvalidJobParameter { name: &'static str, value: String },

    #[error("Worker pool failure: {0}")]
    WorkerPool(String),

    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        attempts: u32,
        last_error: Box<ArrearsError>,
    },

    #[error("Arrears job failed with {error_count} error(s): {}", .errors.join("; "))]
    JobFailed {
        error_count: usize,
        errors: Vec<String>,
        report: Box<crate::orchestrator::JobReport>,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ArrearsError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Database(e) => classify_sqlite(e),
            Self::ConcurrencyConflict { .. } => ErrorClass::Transient,
            Self::LoanNotFound { .. }
            | Self::InvalidLoanData { .. }
            | Self::AmountOutOfRange { .. }
            | Self::Serialization(_) => ErrorClass::Data,
            Self::InvalidJobParameter { .. }
            | Self::WorkerPool(_)
            | Self::RetriesExhausted { .. }
            | Self::JobFailed { .. }
            | Self::Other(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

fn classify_sqlite(e: &rusqlite::Error) -> ErrorClass {
    match e {
        rusqlite::Error::SqliteFailure(failure, _) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => ErrorClass::Transient,
            ErrorCode::ConstraintViolation | ErrorCode::TypeMismatch => ErrorClass::Data,
            _ => ErrorClass::Fatal,
        },
        rusqlite::Error::FromSqlConversionFailure(..)
        | rusqlite::Error::IntegralValueOutOfRange(..)
        | rusqlite::Error::InvalidColumnType(..)
        | rusqlite::Error::QueryReturnedNoRows => ErrorClass::Data,
        _ => ErrorClass::Fatal,
    }
}

pub type ArrearsResult<T> = Result<T, ArrearsError>;
