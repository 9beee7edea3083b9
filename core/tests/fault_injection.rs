//! Fault injection through an instrumented store.
//!
//! Verifies:
//!   - A lock timeout on the first batch write is retried once and the
//!     row lands exactly once (scenario D)
//!   - A sub-batch that never gets the lock fails the job, but every
//!     other sub-batch is still written
//!   - Workers never see the same loan twice
//!   - A failed page fetch aborts the job after the pages already posted
//!   - A batch rejected for one loan's data is written loan by loan, and
//!     only that loan is skipped
//!   - A panicking worker fails its own sub-batch and nothing else

mod common;

use arrears_core::{
    config::ArrearsJobConfig,
    error::{ArrearsError, ErrorClass},
    orchestrator::{JobPhase, RecomputeJob},
    retry::RetryPolicy,
};
use common::*;
use std::sync::{atomic::Ordering, Arc};

#[test]
fn lock_timeout_then_success_retries_exactly_once() {
    let (_dir, store) = build();
    original_loan_overdue_since_tenth(&store, 1);

    let probe = Arc::new(Probe::default());
    probe.busy_batches.store(1, Ordering::SeqCst);
    let mut job = RecomputeJob::new(
        ArrearsJobConfig::default_test(),
        day(15),
        instrumented_connector(path_of(&store), probe.clone()),
    )
    .unwrap();

    let report = job.run().unwrap();

    assert_eq!(report.retries, 1);
    assert_eq!(probe.batch_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(probe.batches_committed.load(Ordering::SeqCst), 1);
    assert_eq!(store.aggregate_count().unwrap(), 1);
    let row = store.aggregate_for(1).unwrap().unwrap();
    assert_eq!(row.overdue_since_date, day(10));
}

#[test]
fn exhausted_sub_batch_fails_job_but_not_its_neighbours() {
    let (_dir, store) = build();
    for id in 1..=4 {
        original_loan_overdue_since_tenth(&store, id);
    }

    let probe = Arc::new(Probe::default());
    *probe.always_busy_loan.lock().unwrap() = Some(3);
    let config = ArrearsJobConfig {
        retry: RetryPolicy::immediate(2),
        ..ArrearsJobConfig::default_test()
    };
    let mut job = RecomputeJob::new(config, day(15), instrumented_connector(path_of(&store), probe.clone())).unwrap();

    match job.run() {
        Err(ArrearsError::JobFailed { error_count, errors, report }) => {
            assert_eq!(error_count, 1);
            assert!(errors[0].contains("Retries exhausted after 3 attempts"), "got {errors:?}");
            assert_eq!(report.failed_batches.len(), 1);
            assert_eq!(report.failed_batches[0].first_id, Some(3));
            assert_eq!(report.failed_batches[0].last_id, Some(4));
            assert_eq!(report.upserted, 2);
        }
        other => panic!("expected JobFailed, got {other:?}"),
    }

    assert!(store.aggregate_for(1).unwrap().is_some());
    assert!(store.aggregate_for(2).unwrap().is_some());
    assert!(store.aggregate_for(3).unwrap().is_none());
    assert!(store.aggregate_for(4).unwrap().is_none());
}

#[test]
fn every_candidate_is_processed_by_exactly_one_worker() {
    let (_dir, store) = build();
    for id in 1..=40 {
        original_loan_overdue_since_tenth(&store, id);
    }

    let probe = Arc::new(Probe::default());
    let config = ArrearsJobConfig {
        thread_pool_size: 3,
        batch_size: 3,
        ..ArrearsJobConfig::default_test()
    };
    let mut job = RecomputeJob::new(config, day(15), instrumented_connector(path_of(&store), probe.clone())).unwrap();
    let report = job.run().unwrap();

    assert_eq!(report.loans_streamed, 40);
    for id in 1..=40 {
        assert_eq!(probe.loads_of(id), 1, "loan {id} loaded {} times", probe.loads_of(id));
    }
    assert_eq!(store.aggregate_count().unwrap(), 40);
}

// ── Aborts and isolation ────────────────────────────────────────────

#[test]
fn failed_page_fetch_aborts_the_job() {
    let (_dir, store) = build();
    for id in 1..=8 {
        original_loan_overdue_since_tenth(&store, id);
    }

    let probe = Arc::new(Probe::default());
    *probe.fetches_before_failure.lock().unwrap() = Some(1);
    let mut job = RecomputeJob::new(
        ArrearsJobConfig::default_test(),
        day(15),
        instrumented_connector(path_of(&store), probe.clone()),
    )
    .unwrap();

    let err = job.run().expect_err("a failed fetch must abort the job");
    assert!(matches!(err, ArrearsError::Database(_)), "got {err:?}");
    assert_eq!(err.class(), ErrorClass::Fatal);
    assert_eq!(job.phase(), JobPhase::Idle);

    // The first page of four was posted before the second fetch failed.
    for id in 1..=4 {
        assert!(store.aggregate_for(id).unwrap().is_some(), "loan {id} missing");
    }
    for id in 5..=8 {
        assert!(store.aggregate_for(id).unwrap().is_none(), "loan {id} written after the abort");
    }
}

#[test]
fn rejected_batch_falls_back_to_single_writes() {
    let (_dir, store) = build();
    for id in 1..=4 {
        original_loan_overdue_since_tenth(&store, id);
    }

    let probe = Arc::new(Probe::default());
    *probe.rejected_loan.lock().unwrap() = Some(3);
    let mut job = RecomputeJob::new(
        ArrearsJobConfig::default_test(),
        day(15),
        instrumented_connector(path_of(&store), probe.clone()),
    )
    .unwrap();

    let report = job.run().unwrap();

    assert!(report.succeeded(), "a data rejection never fails the job");
    assert_eq!(report.retries, 0, "data errors are not retried");
    assert_eq!(report.upserted, 3);
    assert_eq!(report.skipped_loans.len(), 1);
    assert_eq!(report.skipped_loans[0].loan_id, 3);
    assert!(report.skipped_loans[0].reason.contains("CHECK constraint failed"));
    assert_eq!(probe.batches_committed.load(Ordering::SeqCst), 1, "only [1, 2] commits as a batch");

    assert!(store.aggregate_for(3).unwrap().is_none());
    for id in [1, 2, 4] {
        assert!(store.aggregate_for(id).unwrap().is_some(), "loan {id} missing");
    }
}

#[test]
fn worker_panic_fails_only_its_sub_batch() {
    let (_dir, store) = build();
    for id in 1..=4 {
        original_loan_overdue_since_tenth(&store, id);
    }

    let probe = Arc::new(Probe::default());
    *probe.panicking_loan.lock().unwrap() = Some(2);
    let mut job = RecomputeJob::new(
        ArrearsJobConfig::default_test(),
        day(15),
        instrumented_connector(path_of(&store), probe.clone()),
    )
    .unwrap();

    match job.run() {
        Err(ArrearsError::JobFailed { error_count, errors, report }) => {
            assert_eq!(error_count, 1);
            assert!(errors[0].contains("panicked"), "got {errors:?}");
            assert_eq!(report.failed_batches[0].first_id, Some(1));
            assert_eq!(report.failed_batches[0].last_id, Some(2));
            assert_eq!(report.sub_batches, 2);
            assert_eq!(report.upserted, 2);
        }
        other => panic!("expected JobFailed, got {other:?}"),
    }
    assert_eq!(job.phase(), JobPhase::Idle);

    assert!(store.aggregate_for(1).unwrap().is_none(), "sub-batch [1, 2] never reached its write");
    assert!(store.aggregate_for(2).unwrap().is_none());
    assert!(store.aggregate_for(3).unwrap().is_some());
    assert!(store.aggregate_for(4).unwrap().is_some());
}
