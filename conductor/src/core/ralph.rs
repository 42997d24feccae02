//! Ralph workflow record and its pure transitions.
//!
//! The record exists only while Ralph is active; deleting it is how the
//! controller completes or cancels a story. Iteration limits scale with the
//! declared task size and can be extended one window at a time by an explicit
//! continuation grant.

use serde::{Deserialize, Serialize};

use crate::core::types::{TaskSize, Timestamp};

/// Per-size iteration limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IterationLimits {
    pub small: u32,
    pub medium: u32,
    pub large: u32,
}

impl Default for IterationLimits {
    fn default() -> Self {
        Self {
            small: 10,
            medium: 30,
            large: 50,
        }
    }
}

impl IterationLimits {
    pub fn for_size(&self, size: TaskSize) -> u32 {
        match size {
            TaskSize::Small => self.small,
            TaskSize::Medium => self.medium,
            TaskSize::Large => self.large,
        }
    }
}

/// Persisted Ralph state for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RalphState {
    pub active: bool,
    pub story_id: String,
    pub activated_at: Timestamp,
    pub last_activity: Timestamp,
    pub iteration_count: u32,
    pub task_size: TaskSize,
    /// Iteration limit reached; ticks are rejected until a continuation is granted.
    #[serde(default)]
    pub blocked: bool,
    /// Number of continuation windows granted so far.
    #[serde(default)]
    pub continuations: u32,
}

/// Result of counting one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TickOutcome {
    Counted { count: u32, limit: u32 },
    /// This tick crossed the limit; the controller is now blocked.
    LimitReached { count: u32, limit: u32 },
    /// Already blocked; the tick was not counted.
    Rejected { count: u32, limit: u32 },
    /// No live record to count against.
    Inactive,
}

impl RalphState {
    pub fn activate(story_id: &str, task_size: TaskSize, now: Timestamp) -> Self {
        Self {
            active: true,
            story_id: story_id.to_string(),
            activated_at: now,
            last_activity: now,
            iteration_count: 0,
            task_size,
            blocked: false,
            continuations: 0,
        }
    }

    /// Refresh `last_activity`; never moves it backwards.
    pub fn heartbeat(&mut self, now: Timestamp) {
        if now > self.last_activity {
            self.last_activity = now;
        }
    }

    pub fn effective_limit(&self, limits: &IterationLimits) -> u32 {
        limits
            .for_size(self.task_size)
            .saturating_mul(self.continuations.saturating_add(1))
    }

    pub fn over_limit(&self, limits: &IterationLimits) -> bool {
        self.iteration_count > self.effective_limit(limits)
    }

    pub fn tick(&mut self, limits: &IterationLimits, now: Timestamp) -> TickOutcome {
        self.heartbeat(now);
        let limit = self.effective_limit(limits);
        if self.blocked {
            return TickOutcome::Rejected {
                count: self.iteration_count,
                limit,
            };
        }
        self.iteration_count = self.iteration_count.saturating_add(1);
        if self.iteration_count > limit {
            self.blocked = true;
            return TickOutcome::LimitReached {
                count: self.iteration_count,
                limit,
            };
        }
        TickOutcome::Counted {
            count: self.iteration_count,
            limit,
        }
    }

    /// Lift an iteration-limit block. Returns false when nothing was blocked.
    pub fn grant_continuation(&mut self, now: Timestamp) -> bool {
        if !self.blocked {
            return false;
        }
        self.blocked = false;
        self.continuations = self.continuations.saturating_add(1);
        self.heartbeat(now);
        true
    }
}
