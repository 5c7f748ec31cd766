//! The state & history store: durable record of completed runs per stack.

use crate::driver::ExecutionRecord;
use sentinel_core::StackId;
use std::collections::HashMap;
use std::sync::Mutex;

/// A seam for persisting `ExecutionRecord`s. A real deployment would swap
/// this for a database-backed implementation; the engine only depends on
/// the trait.
pub trait HistoryStore: Send + Sync {
    /// Persist a completed run's record.
    fn record(&self, stack_id: StackId, record: ExecutionRecord);

    /// All records for `stack_id`, newest first.
    fn history(&self, stack_id: StackId) -> Vec<ExecutionRecord>;
}

/// An in-memory `HistoryStore`, bounded per stack, suitable for tests and
/// the demo CLI.
pub struct InMemoryHistoryStore {
    max_per_stack: usize,
    records: Mutex<HashMap<StackId, Vec<ExecutionRecord>>>,
}

impl InMemoryHistoryStore {
    /// Build a store retaining at most `max_per_stack` records per stack,
    /// evicting the oldest once the bound is exceeded.
    #[must_use]
    pub fn new(max_per_stack: usize) -> Self {
        Self {
            max_per_stack,
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new(100)
    }
}

impl HistoryStore for InMemoryHistoryStore {
    fn record(&self, stack_id: StackId, record: ExecutionRecord) {
        let mut records = self.records.lock().expect("history store mutex poisoned");
        let entries = records.entry(stack_id).or_default();
        entries.insert(0, record);
        entries.truncate(self.max_per_stack);
    }

    fn history(&self, stack_id: StackId) -> Vec<ExecutionRecord> {
        let records = self.records.lock().expect("history store mutex poisoned");
        records.get(&stack_id).cloned().unwrap_or_default()
    }
}
