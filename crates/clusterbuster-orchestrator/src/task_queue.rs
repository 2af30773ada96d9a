use crate::types::QueueEntry;
use chrono::Utc;
use clusterbuster_core::{Priority, Task};
use std::cmp::Reverse;
use uuid::Uuid;

/// Holding area for submitted, not-yet-assigned tasks.
///
/// Entries are kept in arrival order and sorted on drain: every `high` entry
/// precedes every `normal` one, and each tier is FIFO by enqueue sequence.
/// Callers share it behind a lock so a drain is one snapshot-and-clear.
pub struct TaskQueue {
    entries: Vec<QueueEntry>,
    next_seq: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
        }
    }

    /// Append a task at the given priority. No deduplication is performed.
    pub fn enqueue(&mut self, mut task: Task, priority: Priority) -> Uuid {
        task.priority = priority;
        let id = task.id;
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(QueueEntry {
            task,
            priority,
            enqueued_at: Utc::now(),
            seq,
        });
        id
    }

    /// Take every queued entry in dispatch order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<QueueEntry> {
        let mut drained = std::mem::take(&mut self.entries);
        sort_for_dispatch(&mut drained);
        drained
    }

    /// Put entries back without restamping them, so they keep their place
    /// relative to anything enqueued since.
    pub fn requeue(&mut self, entries: impl IntoIterator<Item = QueueEntry>) {
        self.entries.extend(entries);
    }

    /// Remove every entry for `task_id`. Returns how many were removed.
    pub fn remove(&mut self, task_id: Uuid) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.task.id != task_id);
        before - self.entries.len()
    }

    pub fn contains(&self, task_id: Uuid) -> bool {
        self.entries.iter().any(|e| e.task.id == task_id)
    }

    /// Queued entries in the order the next drain would produce.
    pub fn pending(&self) -> Vec<QueueEntry> {
        let mut view = self.entries.clone();
        sort_for_dispatch(&mut view);
        view
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn sort_for_dispatch(entries: &mut [QueueEntry]) {
    entries.sort_by_key(|e| (Reverse(e.priority), e.seq));
}
