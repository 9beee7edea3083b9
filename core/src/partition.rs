//! Splits one page of loan IDs into contiguous sub-batches, one per
//! worker at most.
//!
//! RULES:
//!   - Sub-batches are disjoint and cover the page exactly.
//!   - A run of equal IDs is never split across two sub-batches.
//!   - Order inside a sub-batch is the page order (ascending).

use crate::types::LoanId;

/// One unit of work for a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubBatch {
    pub index: usize,
    pub loan_ids: Vec<LoanId>,
}

impl SubBatch {
    pub fn first_id(&self) -> Option<LoanId> {
        self.loan_ids.first().copied()
    }

    pub fn last_id(&self) -> Option<LoanId> {
        self.loan_ids.last().copied()
    }

    pub fn len(&self) -> usize {
        self.loan_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loan_ids.is_empty()
    }
}

/// Partition an ascending `page` into at most `workers` sub-batches.
///
/// Chunks aim for `batch_size` IDs, grown to `ceil(len / workers)` when
/// the page holds more than `workers * batch_size`. Each boundary is then
/// pushed forward past any duplicate of the ID it would cut through.
pub fn partition_page(page: &[LoanId], workers: usize, batch_size: usize) -> Vec<SubBatch> {
    if page.is_empty() {
        return Vec::new();
    }
    let workers = workers.max(1);
    let even_split = page.len().div_ceil(workers);
    let chunk = batch_size.max(1).max(even_split);

    let mut batches = Vec::with_capacity(workers);
    let mut start = 0;
    while start < page.len() {
        let mut end = (start + chunk).min(page.len());
        while end < page.len() && page[end] == page[end - 1] {
            end += 1;
        }
        batches.push(SubBatch {
            index: batches.len(),
            loan_ids: page[start..end].to_vec(),
        });
        start = end;
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_loans_two_workers_split_between_five_and_seven() {
        let batches = partition_page(&[5, 7], 2, 1);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].loan_ids, vec![5]);
        assert_eq!(batches[1].loan_ids, vec![7]);
    }

    #[test]
    fn never_more_batches_than_workers() {
        let page: Vec<LoanId> = (1..=103).collect();
        let batches = partition_page(&page, 4, 10);
        assert!(batches.len() <= 4, "got {} batches", batches.len());
        let covered: Vec<LoanId> = batches.iter().flat_map(|b| b.loan_ids.clone()).collect();
        assert_eq!(covered, page, "sub-batches must cover the page exactly, in order");
    }

    #[test]
    fn batches_are_disjoint_and_ordered() {
        let page: Vec<LoanId> = (10..40).step_by(3).collect();
        let batches = partition_page(&page, 3, 2);
        for pair in batches.windows(2) {
            assert!(
                pair[0].last_id() < pair[1].first_id(),
                "batch {} overlaps batch {}",
                pair[0].index,
                pair[1].index
            );
        }
    }

    #[test]
    fn run_of_equal_ids_stays_together() {
        let batches = partition_page(&[1, 2, 2, 2, 3, 4], 3, 2);
        let holding_two: Vec<_> = batches.iter().filter(|b| b.loan_ids.contains(&2)).collect();
        assert_eq!(holding_two.len(), 1, "id 2 split across batches: {batches:?}");
        assert_eq!(batches.iter().map(SubBatch::len).sum::<usize>(), 6);
    }

    #[test]
    fn empty_page_gives_no_batches() {
        assert!(partition_page(&[], 4, 100).is_empty());
    }
}
