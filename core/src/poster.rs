//! Batch poster: recompute one sub-batch and write it in one transaction.
//!
//! A poster is built per sub-batch by the worker thread that runs it and
//! borrows that thread's connection and jitter stream. It never returns
//! an error: everything that went wrong is in the `BatchOutcome`.
//!
//! Failure handling, in order:
//!   - a loan whose data cannot be aged is skipped and recorded;
//!   - a transient batch failure retries the whole batch with backoff;
//!   - a data failure of the batch falls back to one statement per loan
//!     so the offending loans can be isolated;
//!   - anything else marks the sub-batch failed.

use crate::{
    aggregate_writer::{AggregateWrite, WriteBatch},
    error::ErrorClass,
    incremental::{compute_aggregate_write, RecomputeMode},
    partition::SubBatch,
    retry::{retry_with_backoff, RetryPolicy},
    rng::JitterRng,
    store::{AggregateStore, LoanBook},
    types::{BusinessDate, LoanId},
};
use serde::{Deserialize, Serialize};

/// A loan left out of the aggregate table, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanFailure {
    pub loan_id: LoanId,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub sub_batch: usize,
    pub worker: usize,
    pub first_id: Option<LoanId>,
    pub last_id: Option<LoanId>,
    pub loans: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub skipped: Vec<LoanFailure>,
    pub retries: u32,
    /// Set when the sub-batch could not be written.
    pub failure: Option<String>,
}

impl BatchOutcome {
    pub fn for_batch(batch: &SubBatch, worker: usize) -> Self {
        Self {
            sub_batch: batch.index,
            worker,
            first_id: batch.first_id(),
            last_id: batch.last_id(),
            loans: batch.len(),
            ..Self::default()
        }
    }

    fn fail(&mut self, reason: String) {
        log::error!(
            "Sub-batch {} (loans {:?}..={:?}) failed: {reason}",
            self.sub_batch,
            self.first_id,
            self.last_id
        );
        self.failure = Some(reason);
    }

    fn skip(&mut self, loan_id: LoanId, reason: String) {
        log::warn!("Loan {loan_id} skipped in sub-batch {}: {reason}", self.sub_batch);
        self.skipped.push(LoanFailure { loan_id, reason });
    }

    fn count(&mut self, write: &AggregateWrite) {
        if write.is_upsert() {
            self.upserted += 1;
        } else {
            self.deleted += 1;
        }
    }
}

pub struct BatchPoster<'a, S: LoanBook + AggregateStore + ?Sized> {
    store: &'a S,
    business_date: BusinessDate,
    retry: &'a RetryPolicy,
    rng: &'a mut JitterRng,
    worker: usize,
}

impl<'a, S: LoanBook + AggregateStore + ?Sized> BatchPoster<'a, S> {
    pub fn new(
        store: &'a S,
        business_date: BusinessDate,
        retry: &'a RetryPolicy,
        rng: &'a mut JitterRng,
        worker: usize,
    ) -> Self {
        Self {
            store,
            business_date,
            retry,
            rng,
            worker,
        }
    }

    pub fn post(mut self, batch: &SubBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::for_batch(batch, self.worker);
        let mut writes = WriteBatch::with_capacity(batch.len());

        for &loan_id in &batch.loan_ids {
            let label = format!("loan {loan_id}");
            let computed = retry_with_backoff(self.retry, self.rng, &label, || {
                compute_aggregate_write(self.store, loan_id, self.business_date, RecomputeMode::Auto)
            });
            match computed {
                Ok(done) => {
                    outcome.retries += done.retries;
                    writes.push(done.value);
                }
                Err(f) if f.error.class() == ErrorClass::Data => {
                    outcome.retries += f.retries;
                    outcome.skip(loan_id, f.error.to_string());
                }
                Err(f) => {
                    outcome.retries += f.retries;
                    outcome.fail(format!("reading loan {loan_id}: {}", f.error));
                    return outcome;
                }
            }
        }

        if writes.is_empty() {
            return outcome;
        }

        let label = format!("sub-batch {}", batch.index);
        let written = retry_with_backoff(self.retry, self.rng, &label, || {
            self.store.execute_aggregate_batch(writes.writes())
        });
        match written {
            Ok(done) => {
                outcome.retries += done.retries;
                outcome.upserted += writes.upserts();
                outcome.deleted += writes.deletes();
                log::debug!(
                    "Sub-batch {} written by worker {}: {} upsert(s), {} delete(s)",
                    batch.index,
                    self.worker,
                    writes.upserts(),
                    writes.deletes()
                );
            }
            Err(f) if f.error.class() == ErrorClass::Data => {
                outcome.retries += f.retries;
                log::warn!(
                    "Sub-batch {} rejected ({}); writing loans one at a time",
                    batch.index,
                    f.error
                );
                self.write_one_by_one(&writes, &mut outcome);
            }
            Err(f) => {
                outcome.retries += f.retries;
                outcome.fail(f.error.to_string());
            }
        }
        outcome
    }

    fn write_one_by_one(mut self, writes: &WriteBatch, outcome: &mut BatchOutcome) {
        for write in writes.writes() {
            let label = format!("loan {}", write.loan_id());
            match retry_with_backoff(self.retry, self.rng, &label, || {
                self.store.execute_aggregate_write(write)
            }) {
                Ok(done) => {
                    outcome.retries += done.retries;
                    outcome.count(write);
                }
                Err(f) if f.error.class() == ErrorClass::Data => {
                    outcome.retries += f.retries;
                    outcome.skip(write.loan_id(), f.error.to_string());
                }
                Err(f) => {
                    outcome.retries += f.retries;
                    outcome.fail(format!("writing loan {}: {}", write.loan_id(), f.error));
                    return;
                }
            }
        }
    }
}
