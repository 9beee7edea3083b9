//! Business date sources.
//!
//! The incremental handler ages arrears against the bank's business
//! date, which is owned by whoever runs the bank's day (end-of-day job,
//! tests, the runner), not by the handler itself.

use crate::types::BusinessDate;
use chrono::Local;
use std::sync::RwLock;

pub trait BusinessClock: Send + Sync {
    fn business_date(&self) -> BusinessDate;
}

/// Business date equal to the local calendar date.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBusinessDate;

impl BusinessClock for SystemBusinessDate {
    fn business_date(&self) -> BusinessDate {
        Local::now().date_naive()
    }
}

/// Business date set explicitly and moved forward by end-of-day.
#[derive(Debug)]
pub struct ManualBusinessDate {
    current: RwLock<BusinessDate>,
}

impl ManualBusinessDate {
    pub fn new(date: BusinessDate) -> Self {
        Self { current: RwLock::new(date) }
    }

    pub fn set(&self, date: BusinessDate) {
        // A poisoned lock still holds a valid date.
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = date;
    }
}

impl BusinessClock for ManualBusinessDate {
    fn business_date(&self) -> BusinessDate {
        *self.current.read().unwrap_or_else(|e| e.into_inner())
    }
}
