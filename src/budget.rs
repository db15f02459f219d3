//! Request-scoped time budgets and cancellation

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AgentError;
use crate::Result;

/// A deadline plus the helpers stages need to split it
#[derive(Debug, Clone, Copy)]
pub struct TimeBudget {
    deadline: Instant,
}

impl TimeBudget {
    pub fn new(total: Duration) -> Self {
        Self {
            deadline: Instant::now() + total,
        }
    }

    pub fn until(deadline: Instant) -> Self {
        Self { deadline }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Equal slice of what is left for each of `outstanding` consumers
    pub fn share(&self, outstanding: usize) -> Duration {
        self.remaining() / outstanding.max(1) as u32
    }

    /// Narrower budget that never outlives this one
    pub fn sub_budget(&self, slice: Duration) -> TimeBudget {
        let candidate = Instant::now() + slice;
        TimeBudget {
            deadline: candidate.min(self.deadline),
        }
    }
}

/// Pipeline stages in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Resolve,
    Execute,
    Synthesize,
}

impl Stage {
    fn index(&self) -> usize {
        match self {
            Stage::Resolve => 0,
            Stage::Execute => 1,
            Stage::Synthesize => 2,
        }
    }
}

/// Splits an end-to-end budget across stages by weight.
///
/// A stage receives the *remaining* total scaled by its weight over the
/// weights of itself and all later stages, so time an earlier stage did not
/// use flows forward.
#[derive(Debug, Clone, Copy)]
pub struct StageAllocator {
    total: TimeBudget,
    weights: [u32; 3],
}

impl StageAllocator {
    pub const DEFAULT_WEIGHTS: [u32; 3] = [15, 55, 30];

    pub fn new(total: TimeBudget) -> Self {
        Self::with_weights(total, Self::DEFAULT_WEIGHTS)
    }

    pub fn with_weights(total: TimeBudget, weights: [u32; 3]) -> Self {
        Self { total, weights }
    }

    pub fn total(&self) -> TimeBudget {
        self.total
    }

    pub fn budget_for(&self, stage: Stage) -> TimeBudget {
        let idx = stage.index();
        let remaining_weight: u32 = self.weights[idx..].iter().sum();

        if remaining_weight == 0 {
            return self.total;
        }

        let fraction = self.weights[idx] as f64 / remaining_weight as f64;
        let slice = self.total.remaining().mul_f64(fraction);
        self.total.sub_budget(slice)
    }
}

/// Identity and cancellation handle of one `handle` call
#[derive(Debug, Clone)]
pub struct RequestScope {
    pub request_id: Uuid,
    pub cancel: CancellationToken,
}

impl RequestScope {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            cancel,
        }
    }

    pub fn detached() -> Self {
        Self::new(CancellationToken::new())
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::Cancelled);
        }
        Ok(())
    }
}
