//! Two-tier deferred task queues.
//!
//! # Responsibility
//! - Hold pending tasks per tier in insertion order.
//! - Track each tier through `Pending -> Draining -> Drained`.
//!
//! # Invariants
//! - Tasks leave a queue only through `next`/`next_immediate`, front first.
//! - A tier never returns to `Pending` or `Draining` once `Drained`.
//! - Draining reads the live queue, so tasks appended mid-drain are not lost.

use crate::extension::declaration::Tier;
use serde::Serialize;
use std::collections::VecDeque;

/// Drain state of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierState {
    Pending,
    Draining,
    /// Terminal. New tasks for this tier run immediately.
    Drained,
}

impl TierState {
    /// Same names the report serializes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Draining => "draining",
            Self::Drained => "drained",
        }
    }
}

#[derive(Debug)]
struct TierQueue<T> {
    state: TierState,
    tasks: VecDeque<T>,
}

impl<T> TierQueue<T> {
    fn new() -> Self {
        Self {
            state: TierState::Pending,
            tasks: VecDeque::new(),
        }
    }
}

/// NOW and LATER task queues with their drain states.
#[derive(Debug)]
pub struct Scheduler<T> {
    now: TierQueue<T>,
    later: TierQueue<T>,
}

impl<T> Default for Scheduler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Scheduler<T> {
    pub fn new() -> Self {
        Self {
            now: TierQueue::new(),
            later: TierQueue::new(),
        }
    }

    pub fn state(&self, tier: Tier) -> TierState {
        self.queue(tier).state
    }

    /// Number of tasks still waiting in `tier`.
    pub fn pending(&self, tier: Tier) -> usize {
        self.queue(tier).tasks.len()
    }

    /// Appends a task and returns the tier state it was appended under.
    ///
    /// `Drained` tells the caller the task must be run right away.
    pub fn enqueue(&mut self, tier: Tier, task: T) -> TierState {
        let queue = self.queue_mut(tier);
        queue.tasks.push_back(task);
        queue.state
    }

    /// Moves `tier` from `Pending` to `Draining`. Returns false in any other state.
    pub fn begin_drain(&mut self, tier: Tier) -> bool {
        let queue = self.queue_mut(tier);
        if queue.state != TierState::Pending {
            return false;
        }
        queue.state = TierState::Draining;
        true
    }

    /// Pops the next task of a draining tier.
    pub fn next(&mut self, tier: Tier) -> Option<T> {
        let queue = self.queue_mut(tier);
        if queue.state != TierState::Draining {
            return None;
        }
        queue.tasks.pop_front()
    }

    /// Marks a draining tier as drained once its queue is empty.
    pub fn finish_drain(&mut self, tier: Tier) {
        let queue = self.queue_mut(tier);
        if queue.state == TierState::Draining && queue.tasks.is_empty() {
            queue.state = TierState::Drained;
        }
    }

    /// Pops a task that was queued after its tier drained. NOW goes first.
    pub fn next_immediate(&mut self) -> Option<(Tier, T)> {
        for tier in [Tier::Now, Tier::Later] {
            let queue = self.queue_mut(tier);
            if queue.state == TierState::Drained {
                if let Some(task) = queue.tasks.pop_front() {
                    return Some((tier, task));
                }
            }
        }
        None
    }

    fn queue(&self, tier: Tier) -> &TierQueue<T> {
        match tier {
            Tier::Now => &self.now,
            Tier::Later => &self.later,
        }
    }

    fn queue_mut(&mut self, tier: Tier) -> &mut TierQueue<T> {
        match tier {
            Tier::Now => &mut self.now,
            Tier::Later => &mut self.later,
        }
    }
}
