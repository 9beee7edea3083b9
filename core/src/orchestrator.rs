//! Recompute orchestrator: the nightly full rebuild of
//! `loan_arrears_aging`.
//!
//! Phases:
//!   Idle → BulkPass → StreamingPass → Draining → Idle
//!
//! BulkPass clears the table and ages every live-schedule loan in one
//! INSERT .. SELECT. StreamingPass pages through the original-schedule
//! population with the keyset producer: a prefetch thread keeps one page
//! queued ahead, each page is split into at most `thread_pool_size`
//! sub-batches, and the fixed worker pool posts them. The next page is
//! only fanned out once every sub-batch of the current one reported.
//!
//! RULE: every thread owns its own connection, opened up front through
//! the job's connection factory. Nothing database-related crosses a
//! channel; only loan IDs and outcomes do.

use crate::{
    config::ArrearsJobConfig,
    error::{ArrearsError, ArrearsResult},
    partition::{partition_page, SubBatch},
    poster::{BatchOutcome, BatchPoster, LoanFailure},
    producer::KeysetProducer,
    rng::RngBank,
    store::{AggregateStore, LoanBook},
    types::{BusinessDate, LoanId},
};
use crossbeam_channel::{bounded, unbounded};
use serde::Serialize;
use std::{
    marker::PhantomData,
    panic::{self, AssertUnwindSafe},
    thread,
    time::Instant,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JobPhase {
    Idle,
    BulkPass,
    StreamingPass,
    Draining,
}

/// A sub-batch that could not be written.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub sub_batch: usize,
    pub first_id: Option<LoanId>,
    pub last_id: Option<LoanId>,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub run_id: Uuid,
    pub business_date: BusinessDate,
    pub rows_cleared: usize,
    pub bulk_rows: usize,
    pub pages: usize,
    pub sub_batches: usize,
    pub loans_streamed: usize,
    pub upserted: usize,
    pub deleted: usize,
    pub retries: u32,
    pub skipped_loans: Vec<LoanFailure>,
    pub failed_batches: Vec<BatchFailure>,
    pub elapsed_ms: u64,
}

impl JobReport {
    fn new(run_id: Uuid, business_date: BusinessDate) -> Self {
        Self {
            run_id,
            business_date,
            rows_cleared: 0,
            bulk_rows: 0,
            pages: 0,
            sub_batches: 0,
            loans_streamed: 0,
            upserted: 0,
            deleted: 0,
            retries: 0,
            skipped_loans: Vec::new(),
            failed_batches: Vec::new(),
            elapsed_ms: 0,
        }
    }

    /// Sub-batches that exhausted their retries or failed outright.
    pub fn error_count(&self) -> usize {
        self.failed_batches.len()
    }

    pub fn succeeded(&self) -> bool {
        self.failed_batches.is_empty()
    }

    fn absorb(&mut self, outcome: BatchOutcome) {
        self.loans_streamed += outcome.loans;
        self.upserted += outcome.upserted;
        self.deleted += outcome.deleted;
        self.retries += outcome.retries;
        self.skipped_loans.extend(outcome.skipped);
        if let Some(error) = outcome.failure {
            self.failed_batches.push(BatchFailure {
                sub_batch: outcome.sub_batch,
                first_id: outcome.first_id,
                last_id: outcome.last_id,
                error,
            });
        }
    }
}

/// One full recompute run over the store reached by `connect`.
pub struct RecomputeJob<S, F> {
    config: ArrearsJobConfig,
    business_date: BusinessDate,
    connect: F,
    phase: JobPhase,
    _store: PhantomData<fn() -> S>,
}

impl<S, F> RecomputeJob<S, F>
where
    S: LoanBook + AggregateStore + Send,
    F: Fn() -> ArrearsResult<S>,
{
    /// Validates the job parameters before anything touches the database.
    pub fn new(config: ArrearsJobConfig, business_date: BusinessDate, connect: F) -> ArrearsResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            business_date,
            connect,
            phase: JobPhase::Idle,
            _store: PhantomData,
        })
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn run(&mut self) -> ArrearsResult<JobReport> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let mut report = JobReport::new(run_id, self.business_date);
        log::info!(
            "[{run_id}] Arrears recompute for {}: {} worker(s), batch size {}, page size {}",
            self.business_date,
            self.config.thread_pool_size,
            self.config.batch_size,
            self.config.page_size()
        );

        let result = self
            .bulk_pass(&mut report)
            .and_then(|()| self.streaming_pass(&mut report));
        self.phase = JobPhase::Idle;
        report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        result?;

        if !report.succeeded() {
            let errors: Vec<String> = report
                .failed_batches
                .iter()
                .map(|f| format!("sub-batch {} ({:?}..={:?}): {}", f.sub_batch, f.first_id, f.last_id, f.error))
                .collect();
            log::error!("[{run_id}] Arrears recompute failed: {} sub-batch(es)", errors.len());
            return Err(ArrearsError::JobFailed {
                error_count: errors.len(),
                errors,
                report: Box::new(report),
            });
        }

        log::info!(
            "[{run_id}] Arrears recompute done in {} ms: {} bulk row(s), {} loan(s) streamed, \
             {} upsert(s), {} delete(s), {} skipped, {} retries",
            report.elapsed_ms,
            report.bulk_rows,
            report.loans_streamed,
            report.upserted,
            report.deleted,
            report.skipped_loans.len(),
            report.retries
        );
        Ok(report)
    }

    fn bulk_pass(&mut self, report: &mut JobReport) -> ArrearsResult<()> {
        self.phase = JobPhase::BulkPass;
        let store = (self.connect)()?;
        report.rows_cleared = store.reset_aggregates()?;
        report.bulk_rows = store.bulk_insert_live_schedule_arrears(self.business_date)?;
        log::info!(
            "[{}] Bulk pass: cleared {} row(s), inserted {} live-schedule row(s)",
            report.run_id,
            report.rows_cleared,
            report.bulk_rows
        );
        Ok(())
    }

    fn streaming_pass(&mut self, report: &mut JobReport) -> ArrearsResult<()> {
        self.phase = JobPhase::StreamingPass;
        let workers = self.config.thread_pool_size;
        let batch_size = self.config.batch_size;
        let page_size = self.config.page_size();
        let business_date = self.business_date;
        let retry = &self.config.retry;
        let rng_bank = RngBank::new(self.config.jitter_seed);
        let phase = &mut self.phase;

        let open = |role: String| {
            (self.connect)().map_err(|e| ArrearsError::WorkerPool(format!("{role} could not connect: {e}")))
        };
        let prefetch_store = open("prefetch".to_string())?;
        let worker_stores = (0..workers)
            .map(|i| open(format!("worker {i}")))
            .collect::<ArrearsResult<Vec<S>>>()?;

        thread::scope(|scope| -> ArrearsResult<()> {
            // Created inside the scope: an early return drops the
            // receivers and senders, which lets every thread exit.
            let (page_tx, page_rx) = bounded::<ArrearsResult<Vec<LoanId>>>(1);
            let (work_tx, work_rx) = unbounded::<SubBatch>();
            let (outcome_tx, outcome_rx) = unbounded::<BatchOutcome>();

            thread::Builder::new()
                .name("arrears-prefetch".into())
                .spawn_scoped(scope, move || {
                    let mut producer = KeysetProducer::new(&prefetch_store, business_date, page_size);
                    loop {
                        let next = match producer.next_page() {
                            Ok(Some(page)) => Ok(page),
                            Ok(None) => break,
                            Err(e) => Err(e),
                        };
                        let stop = next.is_err();
                        if page_tx.send(next).is_err() || stop {
                            break;
                        }
                    }
                    log::debug!(
                        "Prefetch finished: {} page(s), {} id(s)",
                        producer.pages_fetched(),
                        producer.ids_fetched()
                    );
                })
                .map_err(|e| ArrearsError::WorkerPool(format!("cannot spawn prefetch thread: {e}")))?;

            for (worker, store) in worker_stores.into_iter().enumerate() {
                let work_rx = work_rx.clone();
                let outcome_tx = outcome_tx.clone();
                let mut rng = rng_bank.for_worker(worker);
                thread::Builder::new()
                    .name(format!("arrears-worker-{worker}"))
                    .spawn_scoped(scope, move || {
                        for batch in work_rx.iter() {
                            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                                BatchPoster::new(&store, business_date, retry, &mut rng, worker).post(&batch)
                            }))
                            .unwrap_or_else(|_| {
                                let mut failed = BatchOutcome::for_batch(&batch, worker);
                                failed.failure = Some(format!("worker {worker} panicked"));
                                failed
                            });
                            if outcome_tx.send(outcome).is_err() {
                                break;
                            }
                        }
                    })
                    .map_err(|e| ArrearsError::WorkerPool(format!("cannot spawn worker {worker}: {e}")))?;
            }
            drop(work_rx);
            drop(outcome_tx);

            for page in page_rx.iter() {
                let page = page?;
                report.pages += 1;
                let wave = partition_page(&page, workers, batch_size);
                let in_flight = wave.len();
                report.sub_batches += in_flight;
                log::debug!(
                    "[{}] Page {}: {} loan(s) in {} sub-batch(es)",
                    report.run_id,
                    report.pages,
                    page.len(),
                    in_flight
                );
                for batch in wave {
                    work_tx
                        .send(batch)
                        .map_err(|_| ArrearsError::WorkerPool("all workers have exited".into()))?;
                }
                for _ in 0..in_flight {
                    let outcome = outcome_rx
                        .recv()
                        .map_err(|_| ArrearsError::WorkerPool("worker outcome channel closed".into()))?;
                    report.absorb(outcome);
                }
            }

            *phase = JobPhase::Draining;
            log::debug!("[{}] Draining worker pool", report.run_id);
            drop(work_tx);
            Ok(())
        })
    }
}
