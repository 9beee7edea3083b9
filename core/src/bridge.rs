//! Event bridge: routes business events to the listeners subscribed to
//! them.
//!
//! The subscription table is built once, at start-up, and handed to the
//! bridge by reference. There is no runtime subscribe/unsubscribe.
//! Dispatch is synchronous on the caller's connection; the first
//! listener error stops dispatch and is returned to the caller, whose
//! transaction it is expected to roll back.

use crate::{
    clock::BusinessClock,
    error::ArrearsResult,
    event::{BusinessEvent, EventKind, ARREARS_TRIGGERS},
    incremental::{IncrementalRecompute, RecomputeMode},
    store::ArrearsStore,
};
use std::{collections::HashMap, sync::Arc};

pub trait BusinessEventListener: Send + Sync {
    fn name(&self) -> &str;

    fn on_event(&self, store: &ArrearsStore, event: &BusinessEvent) -> ArrearsResult<()>;
}

/// Keeps `loan_arrears_aging` current as loans change.
pub struct ArrearsAgingListener {
    handler: IncrementalRecompute,
}

impl ArrearsAgingListener {
    pub fn new(clock: Arc<dyn BusinessClock>) -> Self {
        Self {
            handler: IncrementalRecompute::new(clock),
        }
    }
}

impl BusinessEventListener for ArrearsAgingListener {
    fn name(&self) -> &str {
        "arrears_aging"
    }

    fn on_event(&self, store: &ArrearsStore, event: &BusinessEvent) -> ArrearsResult<()> {
        // A fresh disbursement has nothing to diverge from yet.
        let mode = match event.kind() {
            EventKind::Disbursed => RecomputeMode::ForceLiveSchedule,
            _ => RecomputeMode::Auto,
        };
        self.handler.recompute(store, event.loan_id(), mode)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct SubscriptionTable {
    routes: HashMap<EventKind, Vec<Arc<dyn BusinessEventListener>>>,
}

impl SubscriptionTable {
    pub fn builder() -> SubscriptionTableBuilder {
        SubscriptionTableBuilder::default()
    }

    /// The production table: the arrears listener on every trigger event.
    pub fn with_arrears_aging(clock: Arc<dyn BusinessClock>) -> Self {
        Self::builder()
            .subscribe(&ARREARS_TRIGGERS, Arc::new(ArrearsAgingListener::new(clock)))
            .build()
    }

    pub fn listeners_for(&self, kind: EventKind) -> &[Arc<dyn BusinessEventListener>] {
        self.routes.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_subscribed(&self, kind: EventKind) -> bool {
        !self.listeners_for(kind).is_empty()
    }
}

#[derive(Default)]
pub struct SubscriptionTableBuilder {
    routes: HashMap<EventKind, Vec<Arc<dyn BusinessEventListener>>>,
}

impl SubscriptionTableBuilder {
    pub fn subscribe(mut self, kinds: &[EventKind], listener: Arc<dyn BusinessEventListener>) -> Self {
        for kind in kinds {
            self.routes.entry(*kind).or_default().push(Arc::clone(&listener));
        }
        self
    }

    pub fn build(self) -> SubscriptionTable {
        SubscriptionTable { routes: self.routes }
    }
}

pub struct EventBridge<'a> {
    table: &'a SubscriptionTable,
}

impl<'a> EventBridge<'a> {
    pub fn new(table: &'a SubscriptionTable) -> Self {
        Self { table }
    }

    /// Deliver `event` to its listeners in subscription order.
    /// Returns how many listeners ran.
    pub fn dispatch(&self, store: &ArrearsStore, event: &BusinessEvent) -> ArrearsResult<usize> {
        let listeners = self.table.listeners_for(event.kind());
        if listeners.is_empty() {
            log::trace!("No listener for {}", event.kind().name());
            return Ok(0);
        }
        for listener in listeners {
            listener.on_event(store, event).map_err(|e| {
                log::warn!(
                    "Listener {} failed on {} for loan {}: {e}",
                    listener.name(),
                    event.kind().name(),
                    event.loan_id()
                );
                e
            })?;
        }
        Ok(listeners.len())
    }

    /// Run a business operation and dispatch the events it produced in
    /// one transaction. Any failure rolls back the operation as well.
    pub fn apply<T>(
        &self,
        store: &ArrearsStore,
        operation: impl FnOnce(&ArrearsStore) -> ArrearsResult<(T, Vec<BusinessEvent>)>,
    ) -> ArrearsResult<T> {
        store.in_transaction(|s| {
            let (value, events) = operation(s)?;
            for event in &events {
                self.dispatch(s, event)?;
            }
            Ok(value)
        })
    }
}
