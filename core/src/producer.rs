//! Keyset producer: pages of candidate loan IDs for the streaming pass.
//!
//! RULE: the cursor is the highest ID already handed out, never an
//! offset. Rows inserted or deleted behind the cursor while the job runs
//! cannot shift later pages.

use crate::{
    error::ArrearsResult,
    store::LoanBook,
    types::{BusinessDate, LoanId},
};

pub struct KeysetProducer<'a, B: LoanBook + ?Sized> {
    book: &'a B,
    business_date: BusinessDate,
    page_size: usize,
    cursor: LoanId,
    exhausted: bool,
    pages_fetched: usize,
    ids_fetched: usize,
}

impl<'a, B: LoanBook + ?Sized> KeysetProducer<'a, B> {
    pub fn new(book: &'a B, business_date: BusinessDate, page_size: usize) -> Self {
        Self {
            book,
            business_date,
            page_size: page_size.max(1),
            cursor: 0,
            exhausted: false,
            pages_fetched: 0,
            ids_fetched: 0,
        }
    }

    /// Stateless page fetch: sorted candidate IDs strictly greater than
    /// `last_seen`.
    pub fn next_batch(&self, last_seen: LoanId, page_size: usize) -> ArrearsResult<Vec<LoanId>> {
        let mut ids = self
            .book
            .fetch_candidate_loan_ids(last_seen, page_size, self.business_date)?;
        ids.sort_unstable();
        ids.dedup();
        ids.retain(|id| *id > last_seen);
        Ok(ids)
    }

    /// Next page, advancing the cursor. `None` once a short page has been
    /// seen or the book has nothing left past the cursor.
    pub fn next_page(&mut self) -> ArrearsResult<Option<Vec<LoanId>>> {
        if self.exhausted {
            return Ok(None);
        }
        let page = self.next_batch(self.cursor, self.page_size)?;
        if page.len() < self.page_size {
            self.exhausted = true;
        }
        let Some(&last) = page.last() else {
            return Ok(None);
        };
        self.cursor = last;
        self.pages_fetched += 1;
        self.ids_fetched += page.len();
        log::debug!(
            "Keyset page {} fetched: {} id(s), cursor now {}",
            self.pages_fetched,
            page.len(),
            self.cursor
        );
        Ok(Some(page))
    }

    pub fn cursor(&self) -> LoanId {
        self.cursor
    }

    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched
    }

    pub fn ids_fetched(&self) -> usize {
        self.ids_fetched
    }
}
