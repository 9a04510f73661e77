//! Priority tiers and the render task queue
//!
//! Tasks are ordered by tier (higher tier first), then by insertion order so
//! that tasks within a tier are served first-scheduled, first-served.
//! Requesting an index that is already pending does not add a second task:
//! the pending task keeps the higher of the two tiers.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

/// Priority tiers around the focus index
///
/// Higher numeric values have higher priority and are processed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Beyond the LOW radius; only touched by the progressive loader
    Background = 0,

    /// Outer ring of the warm window
    Low = 1,

    /// Middle ring of the warm window
    Normal = 2,

    /// Direct neighbors of the focus
    High = 3,

    /// The focus item itself
    Critical = 4,
}

/// Lifecycle of a queued task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Loading,
    Done,
    Cancelled,
    Failed,
}

/// A scheduled decode of one item
#[derive(Debug, Clone)]
pub struct QueueTask {
    /// Item index
    pub index: usize,

    /// Priority tier
    pub tier: Tier,

    /// Generation the task was scheduled under
    pub generation: u64,

    /// Insertion order (used for FIFO within the same tier)
    insertion_order: u64,
}

impl PartialEq for QueueTask {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.insertion_order == other.insertion_order
    }
}

impl Eq for QueueTask {}

impl PartialOrd for QueueTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueTask {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.tier.cmp(&other.tier) {
            // BinaryHeap is a max heap, so earlier insertions must compare greater
            Ordering::Equal => other.insertion_order.cmp(&self.insertion_order),
            other => other,
        }
    }
}

/// What happened to a pushed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// A new task was queued
    Queued,
    /// An existing pending task was raised to the higher tier
    Upgraded,
    /// An equal or higher tier task for the index is already pending
    Duplicate,
}

/// Priority queue of render tasks, at most one pending task per index
///
/// Not synchronized; the render queue keeps it behind its own lock.
#[derive(Debug, Default)]
pub struct TaskQueue {
    /// Binary heap for priority-ordered tasks (max heap); may hold superseded
    /// entries, which are skipped on pop
    heap: BinaryHeap<QueueTask>,

    /// The live task per index
    pending: HashMap<usize, QueueTask>,

    /// Insertion counter (for FIFO ordering within the same tier)
    insertion_counter: u64,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `index` at `tier` for `generation`
    ///
    /// A pending task for the same index and generation is kept if its tier
    /// is at least `tier`, and raised otherwise. A pending task from an older
    /// generation is replaced.
    pub fn push(&mut self, index: usize, tier: Tier, generation: u64) -> PushOutcome {
        let outcome = match self.pending.get(&index) {
            Some(existing) if existing.generation == generation && existing.tier >= tier => {
                return PushOutcome::Duplicate;
            }
            Some(existing) if existing.generation == generation => PushOutcome::Upgraded,
            _ => PushOutcome::Queued,
        };

        let task = QueueTask {
            index,
            tier,
            generation,
            insertion_order: self.insertion_counter,
        };
        self.insertion_counter += 1;

        self.pending.insert(index, task.clone());
        self.heap.push(task);
        outcome
    }

    /// Pop the highest priority task
    ///
    /// Returns `None` if no task is pending.
    pub fn pop(&mut self) -> Option<QueueTask> {
        while let Some(task) = self.heap.pop() {
            let live = matches!(
                self.pending.get(&task.index),
                Some(current) if current.insertion_order == task.insertion_order
            );
            if live {
                self.pending.remove(&task.index);
                return Some(task);
            }
        }
        None
    }

    /// Tier of the pending task for `index`
    pub fn tier_of(&self, index: usize) -> Option<Tier> {
        self.pending.get(&index).map(|task| task.tier)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.pending.contains_key(&index)
    }

    /// Number of pending tasks
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Remove and return every pending task
    pub fn drain(&mut self) -> Vec<QueueTask> {
        self.heap.clear();
        self.pending.drain().map(|(_, task)| task).collect()
    }
}
