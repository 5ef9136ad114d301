//! Block Production Scheduler State Machine
//!
//! Decides whether a trigger (new tx, new atomic tx, idle timeout, timer
//! fire) justifies asking consensus for a block now.
//!
//! ## States
//!
//! - **Min**: a block was just built; never propose
//! - **Max**: propose only once a full batch is pending
//! - **Long**: propose whenever anything is pending
//!
//! ## Transitions
//!
//! | From | Event | To | Timer |
//! |------|-------|----|-------|
//! | any | block built (ok or failed) | Min | arm `min` |
//! | Min | timer fired | Max | arm `max - min` (floored at 0) |
//! | Max | timer fired | Long | none |
//! | Long | timer fired | Long | none |
//!
//! The state carries no locking; callers hold one mutex around it.

use std::time::Duration;

/// Timer state of the block delay
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimerState {
    /// Inside the minimum interval
    Min,
    /// Between minimum and maximum interval
    Max,
    /// Past the maximum interval
    Long,
}

/// Outcome of evaluating a proposal attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProposalDecision {
    /// A notification already went out this round
    AlreadyGenerating,
    /// Neither pool has work
    NoPendingWork,
    /// Inside the minimum interval
    TooSoon,
    /// Between intervals without a full batch
    BelowBatch,
    /// Send the build notification
    Propose,
}

/// What the timer dispatcher must do after a fire
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimerFired {
    /// Re-arm after this long, if any
    pub rearm: Option<Duration>,
    /// Retry a proposal immediately
    pub retry: bool,
}

/// Scheduler state guarded by the scheduler lock
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerState {
    timer: TimerState,
    wait_requested: bool,
    generating: bool,
}

impl Default for SchedulerState {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerState {
    /// Initial state: Long, with a wait pending so the first timer fire retries
    pub fn new() -> Self {
        Self {
            timer: TimerState::Long,
            wait_requested: true,
            generating: false,
        }
    }

    /// Current timer state
    pub fn timer(&self) -> TimerState {
        self.timer
    }

    /// A proposal attempt is waiting for the next opportunity
    pub fn wait_requested(&self) -> bool {
        self.wait_requested
    }

    /// A build notification went out and no block has been built since
    pub fn generating(&self) -> bool {
        self.generating
    }

    /// Evaluate a proposal attempt.
    ///
    /// Unless a notification is already out, marks a wait as requested so a
    /// later timer fire retries.
    pub fn attempt(&mut self, pending_txs: usize, pending_atomic: usize, batch_size: usize) -> ProposalDecision {
        if self.generating {
            return ProposalDecision::AlreadyGenerating;
        }
        self.wait_requested = true;

        if pending_txs == 0 && pending_atomic == 0 {
            return ProposalDecision::NoPendingWork;
        }
        match self.timer {
            TimerState::Min => ProposalDecision::TooSoon,
            TimerState::Max if pending_txs < batch_size => ProposalDecision::BelowBatch,
            TimerState::Max | TimerState::Long => ProposalDecision::Propose,
        }
    }

    /// The build notification was delivered
    pub fn proposal_sent(&mut self) {
        self.generating = true;
    }

    /// Advance on a timer fire
    pub fn on_timer_fired(&mut self, min: Duration, max: Duration) -> TimerFired {
        let rearm = match self.timer {
            TimerState::Min => {
                self.timer = TimerState::Max;
                Some(max.saturating_sub(min))
            }
            TimerState::Max => {
                self.timer = TimerState::Long;
                None
            }
            TimerState::Long => None,
        };
        TimerFired {
            rearm,
            retry: self.wait_requested,
        }
    }

    /// A build finished, successfully or not; the caller arms the `min` timer
    pub fn on_block_built(&mut self) {
        self.timer = TimerState::Min;
        self.wait_requested = false;
        self.generating = false;
    }
}
