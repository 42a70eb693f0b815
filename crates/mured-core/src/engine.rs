//! # Execution Engine
//!
//! Drives one value through a projection set and watches for closure.
//!
//! ## States
//!
//! ```text
//!            step made no progress
//!   ACTIVE ------------------------> STALLED
//!     ^                                 |
//!     +------------ fix ----------------+
//!
//!   ACTIVE | STALLED --terminate--> TERMINAL
//! ```
//!
//! The engine never invents a fix; only the caller leaves STALLED.
//!
//! ## Closure
//!
//! Every stall is remembered as `pattern_id -> value_hash`. A stall for a
//! pattern whose remembered hash equals the current one is a second
//! independent encounter and is recorded as [`ClosureEvidence`]. Any change
//! of value clears the memory. Evidence is observational: it never changes
//! the state.
//!
//! All of this lives in the [`Execution`] context. Nothing is shared between
//! executions apart from the read-only projection set.

use crate::kernel::{ProjectionKernel, ProjectionSet, StepOutcome};
use crate::primitives::MAX_TRACE_ENTRIES;
use crate::types::{
    ClosureEvidence, ExecutionStatus, Halt, MuredError, ProjectionId, Resource, StallReason,
    TraceEvent, ValueHash,
};
use crate::value::{Limits, MuValue};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Current value and status of an execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionState {
    pub value: MuValue,
    pub status: ExecutionStatus,
    /// Set while STALLED.
    pub stall_reason: Option<StallReason>,
}

/// Append-only record of what happened to an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// A kernel step (rewrite or stall).
    Step(TraceEvent),
    /// The execution entered STALLED.
    Stall {
        index: u64,
        value_hash: ValueHash,
        pattern_id: ProjectionId,
    },
    /// The caller replaced the value.
    Fix {
        index: u64,
        before: ValueHash,
        after: ValueHash,
    },
    /// A second independent stall was observed.
    Closure(ClosureEvidence),
    /// A budget ran out; the execution stays ACTIVE.
    Exhausted { index: u64, resource: Resource },
    /// The caller closed the execution.
    Terminal { value_hash: ValueHash },
}

/// What a single `advance` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The value was rewritten.
    Reduced { projection: ProjectionId },
    /// No progress; the execution is now STALLED.
    Stalled {
        reason: StallReason,
        evidence: Option<ClosureEvidence>,
    },
    /// The result would break a bound; the value is unchanged.
    Exhausted(Resource),
}

/// A single execution context.
#[derive(Debug)]
pub struct Execution<'p> {
    kernel: ProjectionKernel<'p>,
    state: ExecutionState,
    hash: ValueHash,
    steps: u64,
    stall_memory: BTreeMap<ProjectionId, ValueHash>,
    evidence: Vec<ClosureEvidence>,
    events: Vec<ExecutionEvent>,
    dropped_events: u64,
}

impl<'p> Execution<'p> {
    /// Start an execution with default limits.
    pub fn new(projections: &'p ProjectionSet, value: MuValue) -> Result<Self, MuredError> {
        Self::with_limits(projections, value, Limits::default())
    }

    /// Start an execution with custom limits.
    ///
    /// The initial value passes the same entry boundary as a kernel step.
    pub fn with_limits(
        projections: &'p ProjectionSet,
        value: MuValue,
        limits: Limits,
    ) -> Result<Self, MuredError> {
        let kernel = ProjectionKernel::with_limits(projections, limits);
        kernel.admit(&value)?;
        let hash = value.content_hash();
        Ok(Self {
            kernel,
            state: ExecutionState {
                value,
                status: ExecutionStatus::Active,
                stall_reason: None,
            },
            hash,
            steps: 0,
            stall_memory: BTreeMap::new(),
            evidence: Vec::new(),
            events: Vec::new(),
            dropped_events: 0,
        })
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn value(&self) -> &MuValue {
        &self.state.value
    }

    pub fn status(&self) -> ExecutionStatus {
        self.state.status
    }

    /// Content hash of the current value.
    pub fn hash(&self) -> ValueHash {
        self.hash
    }

    /// Kernel steps taken so far.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Closure evidence, oldest first.
    pub fn evidence(&self) -> &[ClosureEvidence] {
        &self.evidence
    }

    /// Event log, oldest first. Capped at [`MAX_TRACE_ENTRIES`].
    pub fn events(&self) -> &[ExecutionEvent] {
        &self.events
    }

    /// Events discarded after the log filled up.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events
    }

    /// Kernel step events only.
    pub fn trace(&self) -> Vec<TraceEvent> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ExecutionEvent::Step(step) => Some(step.clone()),
                _ => None,
            })
            .collect()
    }

    // =========================================================================
    // TRANSITIONS
    // =========================================================================

    /// Take one kernel step. Only valid while ACTIVE.
    pub fn advance(&mut self) -> Result<Transition, MuredError> {
        self.require("advance", ExecutionStatus::Active)?;

        let index = self.steps;
        self.steps += 1;
        let before = self.hash;

        match self.kernel.apply(&self.state.value, before) {
            StepOutcome::Rewrote {
                projection,
                value,
                hash,
            } => {
                debug!(step = index, projection = %projection, after = %hash.short(), "reduced");
                self.record(ExecutionEvent::Step(TraceEvent {
                    index,
                    before,
                    after: hash,
                    projection: Some(projection.clone()),
                }));
                self.replace_value(value, hash);
                Ok(Transition::Reduced { projection })
            }
            StepOutcome::Stalled(reason) => {
                self.record(ExecutionEvent::Step(TraceEvent {
                    index,
                    before,
                    after: before,
                    projection: reason.fired(),
                }));
                let evidence = self.enter_stall(reason.clone());
                Ok(Transition::Stalled { reason, evidence })
            }
            StepOutcome::Exhausted {
                resource,
                projection,
            } => {
                debug!(step = index, projection = %projection, %resource, "result out of bounds");
                self.record(ExecutionEvent::Exhausted { index, resource });
                Ok(Transition::Exhausted(resource))
            }
        }
    }

    /// Advance until a stall or until a budget runs out.
    ///
    /// `max_steps` counts steps of this call only.
    pub fn run(&mut self, max_steps: usize) -> Result<Halt, MuredError> {
        self.require("run", ExecutionStatus::Active)?;

        for _ in 0..max_steps {
            match self.advance()? {
                Transition::Reduced { .. } => {}
                Transition::Stalled { reason, .. } => return Ok(Halt::Stalled(reason)),
                Transition::Exhausted(resource) => return Ok(Halt::Exhausted(resource)),
            }
        }

        self.record(ExecutionEvent::Exhausted {
            index: self.steps,
            resource: Resource::Steps,
        });
        Ok(Halt::Exhausted(Resource::Steps))
    }

    /// Report a stall observed by the caller for `pattern_id`.
    ///
    /// Only valid while ACTIVE; the execution becomes STALLED.
    pub fn stall(
        &mut self,
        pattern_id: impl Into<ProjectionId>,
    ) -> Result<Option<ClosureEvidence>, MuredError> {
        self.require("stall", ExecutionStatus::Active)?;
        Ok(self.enter_stall(StallReason::External {
            pattern: pattern_id.into(),
        }))
    }

    /// Replace the value of a STALLED execution and resume.
    ///
    /// The replacement passes the entry boundary. Stall memory is cleared only
    /// if the value actually changed.
    pub fn fix(&mut self, replacement: MuValue) -> Result<(), MuredError> {
        self.require("fix", ExecutionStatus::Stalled)?;
        self.kernel.admit(&replacement)?;

        let before = self.hash;
        let after = replacement.content_hash();
        info!(before = %before.short(), after = %after.short(), "fix applied");
        self.record(ExecutionEvent::Fix {
            index: self.steps,
            before,
            after,
        });

        if after != before {
            self.replace_value(replacement, after);
        }
        self.state.status = ExecutionStatus::Active;
        self.state.stall_reason = None;
        Ok(())
    }

    /// Like [`Execution::fix`], but only if the current value hashes to `expected`.
    pub fn fix_checked(
        &mut self,
        expected: ValueHash,
        replacement: MuValue,
    ) -> Result<(), MuredError> {
        self.require("fix", ExecutionStatus::Stalled)?;
        if expected != self.hash {
            return Err(MuredError::FixTargetMismatch {
                expected,
                actual: self.hash,
            });
        }
        self.fix(replacement)
    }

    /// Close the execution. Nothing is valid afterwards.
    pub fn terminate(&mut self) -> Result<(), MuredError> {
        if self.state.status == ExecutionStatus::Terminal {
            return Err(MuredError::InvalidTransition {
                operation: "terminate",
                status: self.state.status,
            });
        }
        self.state.status = ExecutionStatus::Terminal;
        self.record(ExecutionEvent::Terminal {
            value_hash: self.hash,
        });
        Ok(())
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn require(
        &self,
        operation: &'static str,
        status: ExecutionStatus,
    ) -> Result<(), MuredError> {
        if self.state.status == status {
            Ok(())
        } else {
            Err(MuredError::InvalidTransition {
                operation,
                status: self.state.status,
            })
        }
    }

    fn replace_value(&mut self, value: MuValue, hash: ValueHash) {
        self.state.value = value;
        self.hash = hash;
        self.stall_memory.clear();
    }

    fn enter_stall(&mut self, reason: StallReason) -> Option<ClosureEvidence> {
        let pattern_id = reason.pattern_id();
        let value_hash = self.hash;

        self.state.status = ExecutionStatus::Stalled;
        self.state.stall_reason = Some(reason);
        self.record(ExecutionEvent::Stall {
            index: self.steps,
            value_hash,
            pattern_id: pattern_id.clone(),
        });

        let repeated = self.stall_memory.get(&pattern_id) == Some(&value_hash);
        self.stall_memory.insert(pattern_id.clone(), value_hash);
        if !repeated {
            debug!(pattern = %pattern_id, value = %value_hash.short(), "stall recorded");
            return None;
        }

        warn!(
            pattern = %pattern_id,
            value = %value_hash.short(),
            "closure evidence: second independent stall"
        );
        let evidence = ClosureEvidence::second_stall(value_hash, pattern_id);
        self.evidence.push(evidence.clone());
        self.record(ExecutionEvent::Closure(evidence.clone()));
        Some(evidence)
    }

    fn record(&mut self, event: ExecutionEvent) {
        if self.events.len() < MAX_TRACE_ENTRIES {
            self.events.push(event);
        } else {
            self.dropped_events += 1;
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
