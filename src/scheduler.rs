//! Scheduler module.
//!
//! This module contains the cooperative task queue of the engine.
//! Long operations are split into tasks identified by a key: posting
//! a key already pending supersedes the previous request instead of
//! queuing the work twice.

use log::trace;
use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use crate::view::ViewId;

/// Represents the deferred operations of the engine.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum TaskKey {
    /// Reads the next block of the store.
    StoreLoad,
    /// Writes the queued store changes.
    StoreCommit,
    /// Matches the next message of the running searches.
    ContinueSearch,
    /// Loads the members of a view.
    PreFetch(ViewId),
    /// Writes the queued lexicon changes.
    LexiconCommit,
    /// Collects the results of the lexicon worker.
    LexiconPoll,
}

#[derive(Clone, Copy, Debug)]
struct Task {
    due: Instant,
    seq: u64,
}

#[derive(Debug, Default)]
pub struct Scheduler {
    tasks: HashMap<TaskKey, Task>,
    seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Posts a task ready to run now.
    pub fn post(&mut self, key: TaskKey) {
        self.post_at(key, Instant::now())
    }

    /// Posts a task ready to run once the delay elapsed. Posting a
    /// pending key again moves its due time.
    pub fn post_delayed(&mut self, key: TaskKey, delay: Duration) {
        self.post_at(key, Instant::now() + delay)
    }

    pub fn post_at(&mut self, key: TaskKey, due: Instant) {
        self.seq += 1;
        let seq = self.seq;
        if self.tasks.insert(key, Task { due, seq }).is_some() {
            trace!("task {:?} superseded", key);
        }
    }

    pub fn is_pending(&self, key: TaskKey) -> bool {
        self.tasks.contains_key(&key)
    }

    /// Cancels a pending task.
    pub fn cancel(&mut self, key: TaskKey) -> bool {
        self.tasks.remove(&key).is_some()
    }

    /// Takes the task due first at the given time. Tasks due at the
    /// same time run in the order they were posted.
    pub fn next_ready(&mut self, now: Instant) -> Option<TaskKey> {
        let key = self
            .tasks
            .iter()
            .filter(|(_, task)| task.due <= now)
            .min_by_key(|(_, task)| (task.due, task.seq))
            .map(|(key, _)| *key)?;
        self.tasks.remove(&key);
        Some(key)
    }

    /// Gets the earliest due time of the pending tasks.
    pub fn next_due(&self) -> Option<Instant> {
        self.tasks.values().map(|task| task.due).min()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_run_in_due_order() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.post_at(TaskKey::LexiconCommit, now + Duration::from_secs(2));
        scheduler.post_at(TaskKey::StoreLoad, now);
        scheduler.post_at(TaskKey::ContinueSearch, now);

        assert_eq!(Some(TaskKey::StoreLoad), scheduler.next_ready(now));
        assert_eq!(Some(TaskKey::ContinueSearch), scheduler.next_ready(now));
        assert_eq!(None, scheduler.next_ready(now));
        assert_eq!(
            Some(TaskKey::LexiconCommit),
            scheduler.next_ready(now + Duration::from_secs(2))
        );
        assert!(scheduler.is_empty());
    }

    #[test]
    fn reposting_supersedes() {
        let now = Instant::now();
        let mut scheduler = Scheduler::new();
        scheduler.post_at(TaskKey::PreFetch(42), now);
        scheduler.post_at(TaskKey::PreFetch(42), now + Duration::from_secs(1));

        assert_eq!(1, scheduler.len());
        assert!(scheduler.is_pending(TaskKey::PreFetch(42)));
        assert_eq!(None, scheduler.next_ready(now));
        assert_eq!(
            Some(TaskKey::PreFetch(42)),
            scheduler.next_ready(now + Duration::from_secs(1))
        );
    }

    #[test]
    fn cancel_pending_task() {
        let mut scheduler = Scheduler::new();
        scheduler.post(TaskKey::StoreCommit);
        assert!(scheduler.cancel(TaskKey::StoreCommit));
        assert!(!scheduler.cancel(TaskKey::StoreCommit));
    }
}
