//! Adaptive multi-constraint admission scheduling
//!
//! The scheduler gates admission of locally queued work. It never runs a task:
//! it answers "execute now", "defer to a later tick" or "skip" from the task's
//! estimates and the current [`ResourceSnapshot`].
//!
//! ## Cost model
//!
//! Weights are recomputed from the snapshot on every call:
//!
//! ```text
//! α = 0.4·(1 − battery)
//! β = 0.4·(1 + (1 − network))
//! γ = 0.2
//! (α, β, γ) /= α + β + γ
//!
//! cost = α·energy_n + β·latency_n − γ·priority_bonus
//! ```
//!
//! All tunables live in a caller-owned [`SchedulerConfig`]; there is no global
//! state, so two schedulers with different configs can coexist.

use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::resource::ResourceSnapshot;
use crate::traits::TaskId;
use crate::{Error, Result};

/// Task priority, ordered `Critical > High > Normal > Low > Background`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskPriority {
    /// Opportunistic work
    Background,
    /// Low priority
    Low,
    /// Default priority
    Normal,
    /// High priority
    High,
    /// Safety-critical work, always admitted
    Critical,
}

impl TaskPriority {
    /// Bonus subtracted (weighted by γ) from a task's cost.
    pub const fn bonus(self) -> f64 {
        match self {
            TaskPriority::Critical => 1.0,
            TaskPriority::High => 0.75,
            TaskPriority::Normal => 0.5,
            TaskPriority::Low => 0.25,
            TaskPriority::Background => 0.0,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskState {
    /// Waiting for an admission decision
    Pending,
    /// Admitted; handed to the caller for execution
    Executed,
    /// Postponed to a later tick
    Deferred,
    /// Dropped
    Skipped,
}

impl TaskState {
    /// Whether the task has left the queue for good
    pub const fn is_terminal(self) -> bool {
        matches!(self, TaskState::Executed | TaskState::Skipped)
    }
}

/// A unit of local work awaiting admission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Caller-assigned identifier
    pub id: TaskId,
    /// Priority class
    pub priority: TaskPriority,
    /// Estimated energy cost (same unit as `SchedulerConfig::energy_reference`)
    pub energy_cost: f64,
    /// Estimated duration in seconds
    pub est_duration: f64,
    /// Optional deadline (unix millis)
    pub deadline: Option<u64>,
    /// Current state; only the scheduler moves it
    pub state: TaskState,
}

impl Task {
    /// Create a pending task without a deadline
    pub fn new(id: u64, priority: TaskPriority, energy_cost: f64, est_duration: f64) -> Self {
        Self {
            id: TaskId(id),
            priority,
            energy_cost,
            est_duration,
            deadline: None,
            state: TaskState::Pending,
        }
    }

    /// Set the deadline (unix millis)
    pub fn with_deadline(mut self, deadline_ms: u64) -> Self {
        self.deadline = Some(deadline_ms);
        self
    }
}

/// Admission outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    /// Run now
    Execute,
    /// Retry on a later tick
    Defer,
    /// Drop the task
    Skip,
}

/// Why an action was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DecisionReason {
    /// Critical tasks bypass every constraint
    CriticalOverride,
    /// Battery below `min_battery`
    LowBattery,
    /// Network below `min_network`
    PoorNetwork,
    /// Deadline passed before admission
    DeadlineExpired,
    /// Cost above `admission_threshold`
    ResourceContention,
    /// Cost within budget
    Admitted,
}

impl DecisionReason {
    /// Human-readable reason
    pub const fn as_str(self) -> &'static str {
        match self {
            DecisionReason::CriticalOverride => "critical override",
            DecisionReason::LowBattery => "low battery",
            DecisionReason::PoorNetwork => "poor network",
            DecisionReason::DeadlineExpired => "deadline expired",
            DecisionReason::ResourceContention => "resource contention",
            DecisionReason::Admitted => "admitted",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission decision for one task
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    /// Task the decision is for
    pub task_id: TaskId,
    /// Chosen action
    pub action: Action,
    /// Why
    pub reason: DecisionReason,
    /// Weighted cost at decision time
    pub cost: f64,
}

/// Scheduler tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Below this battery fraction, tasks worse than HIGH are skipped
    pub min_battery: f64,
    /// Below this network quality, tasks worse than NORMAL are skipped
    pub min_network: f64,
    /// Cost above which a task is deferred
    pub admission_threshold: f64,
    /// Energy cost that normalizes to 1.0
    pub energy_reference: f64,
    /// Duration (seconds) that normalizes to 1.0
    pub latency_reference_secs: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_battery: 0.15,
            min_network: 0.25,
            admission_threshold: 0.5,
            energy_reference: 10.0,
            latency_reference_secs: 1.0,
        }
    }
}

impl SchedulerConfig {
    /// Check ranges
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_battery) {
            return Err(Error::InvalidConfig("min_battery must be in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.min_network) {
            return Err(Error::InvalidConfig("min_network must be in [0, 1]"));
        }
        if !self.admission_threshold.is_finite() {
            return Err(Error::InvalidConfig("admission_threshold must be finite"));
        }
        if !(self.energy_reference.is_finite() && self.energy_reference > 0.0) {
            return Err(Error::InvalidConfig("energy_reference must be positive"));
        }
        if !(self.latency_reference_secs.is_finite() && self.latency_reference_secs > 0.0) {
            return Err(Error::InvalidConfig("latency_reference_secs must be positive"));
        }
        Ok(())
    }
}

/// Normalized cost weights derived from a snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostWeights {
    /// Energy weight
    pub alpha: f64,
    /// Latency weight
    pub beta: f64,
    /// Priority weight
    pub gamma: f64,
}

impl CostWeights {
    /// Recompute weights for the given resource state. Always sums to 1.
    pub fn from_snapshot(snapshot: &ResourceSnapshot) -> Self {
        let alpha = 0.4 * (1.0 - snapshot.battery);
        let beta = 0.4 * (1.0 + (1.0 - snapshot.network));
        let gamma = 0.2;
        // beta >= 0.4 for any valid snapshot, so the sum is never zero
        let sum = alpha + beta + gamma;
        Self {
            alpha: alpha / sum,
            beta: beta / sum,
            gamma: gamma / sum,
        }
    }
}

fn normalized(name: &'static str, task: &Task, raw: f64, reference: f64) -> f64 {
    if raw.is_finite() && raw >= 0.0 {
        raw / reference
    } else {
        tracing::warn!(task = %task.id, estimate = name, raw, "invalid task estimate, using reference");
        1.0
    }
}

/// Weighted admission cost of `task` under `weights`.
pub fn admission_cost(config: &SchedulerConfig, weights: &CostWeights, task: &Task) -> f64 {
    let energy = normalized("energy_cost", task, task.energy_cost, config.energy_reference);
    let latency = normalized(
        "est_duration",
        task,
        task.est_duration,
        config.latency_reference_secs,
    );
    weights.alpha * energy + weights.beta * latency - weights.gamma * task.priority.bonus()
}

/// Pure admission policy. Identical inputs always yield identical decisions.
pub fn decide_with(config: &SchedulerConfig, task: &Task, snapshot: &ResourceSnapshot) -> Decision {
    let weights = CostWeights::from_snapshot(snapshot);
    let cost = admission_cost(config, &weights, task);

    let (action, reason) = if task.priority == TaskPriority::Critical {
        (Action::Execute, DecisionReason::CriticalOverride)
    } else if snapshot.battery < config.min_battery && task.priority < TaskPriority::High {
        (Action::Skip, DecisionReason::LowBattery)
    } else if snapshot.network < config.min_network && task.priority < TaskPriority::Normal {
        (Action::Skip, DecisionReason::PoorNetwork)
    } else if task.deadline.is_some_and(|d| d < snapshot.timestamp_ms) {
        (Action::Skip, DecisionReason::DeadlineExpired)
    } else if cost > config.admission_threshold {
        (Action::Defer, DecisionReason::ResourceContention)
    } else {
        (Action::Execute, DecisionReason::Admitted)
    };

    Decision {
        task_id: task.id,
        action,
        reason,
        cost,
    }
}

/// Read-only scheduler statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Tasks admitted
    pub executed: u64,
    /// Tasks deferred
    pub deferred: u64,
    /// Tasks skipped
    pub skipped: u64,
    /// Sum of estimated energy of skipped tasks
    pub energy_saved: f64,
}

#[derive(Debug, Default)]
struct SchedulerCounters {
    executed: AtomicU64,
    deferred: AtomicU64,
    skipped: AtomicU64,
    // f64 bits
    energy_saved: AtomicU64,
}

impl SchedulerCounters {
    fn record(&self, decision: &Decision, task: &Task) {
        match decision.action {
            Action::Execute => {
                self.executed.fetch_add(1, Ordering::Relaxed);
            }
            Action::Defer => {
                self.deferred.fetch_add(1, Ordering::Relaxed);
            }
            Action::Skip => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                if task.energy_cost.is_finite() && task.energy_cost > 0.0 {
                    let _ = self
                        .energy_saved
                        .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |bits| {
                            Some((f64::from_bits(bits) + task.energy_cost).to_bits())
                        });
                }
            }
        }
    }

    fn snapshot(&self) -> SchedulerStats {
        SchedulerStats {
            executed: self.executed.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            energy_saved: f64::from_bits(self.energy_saved.load(Ordering::Relaxed)),
        }
    }
}

/// Admission scheduler owning its configuration and statistics.
///
/// Decisions take `&self`, so one scheduler can be shared across threads; the
/// task queues it is applied to stay owned by their callers.
#[derive(Debug, Default)]
pub struct AdaptiveScheduler {
    config: SchedulerConfig,
    counters: SchedulerCounters,
}

impl AdaptiveScheduler {
    /// Create a scheduler, rejecting out-of-range configuration
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            counters: SchedulerCounters::default(),
        })
    }

    /// Active configuration
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Decide admission for `task` without touching its state.
    pub fn decide(&self, task: &Task, snapshot: &ResourceSnapshot) -> Decision {
        let decision = decide_with(&self.config, task, snapshot);
        self.counters.record(&decision, task);
        tracing::debug!(
            task = %task.id,
            priority = ?task.priority,
            action = ?decision.action,
            reason = %decision.reason,
            cost = decision.cost,
            "admission decision"
        );
        decision
    }

    /// Decide and transition the task's state accordingly.
    pub fn admit(&self, task: &mut Task, snapshot: &ResourceSnapshot) -> Decision {
        let decision = self.decide(task, snapshot);
        task.state = match decision.action {
            Action::Execute => TaskState::Executed,
            Action::Defer => TaskState::Deferred,
            Action::Skip => TaskState::Skipped,
        };
        decision
    }

    /// Counters since construction
    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot()
    }
}
