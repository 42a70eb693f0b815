//! # Projection Kernel
//!
//! First-match-wins rewriting over an ordered projection set.
//!
//! A [`ProjectionSet`] is a singly-linked head/rest chain of projections. A
//! step walks the chain from the head: the first projection whose pattern
//! matches is applied, and the walk never looks past it. The remaining
//! projections are always a chain suffix, never an index into a vector.
//!
//! Each step runs as a small phase machine:
//!
//! ```text
//! Select { remaining } --match--> Apply { projection, bindings } --> Done(outcome)
//!        |                                                              ^
//!        +--no projection left------------------------------------------+
//! ```
//!
//! Every phase can be rendered as a Mu value carrying the reserved control
//! fields (`_mode`, `_step`, `_projs`, `_match`, `_bindings`). Those fields
//! are refused in caller data by [`ProjectionKernel::admit`], so a value can
//! never pose as kernel state.

use crate::matcher::Matcher;
use crate::primitives::{MAX_PROJECTIONS, MAX_RUN_STEPS};
use crate::substitute::{Substitution, substitute};
use crate::types::{
    Bindings, Halt, MatchResult, Projection, ProjectionId, Resource, StallReason, TraceEvent,
    ValidationError, ValueHash,
};
use crate::value::{Limits, MuValue};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace};

// =============================================================================
// PROJECTION CHAIN
// =============================================================================

struct ChainLink {
    head: Projection,
    rest: ProjectionChain,
}

/// Ordered projections as a shared head/rest chain.
///
/// Cloning shares the links. Suffixes of a chain are chains themselves.
#[derive(Clone, Default)]
pub struct ProjectionChain(Option<Arc<ChainLink>>);

impl ProjectionChain {
    fn from_vec(projections: Vec<Projection>) -> Self {
        let mut chain = Self(None);
        for head in projections.into_iter().rev() {
            chain = Self(Some(Arc::new(ChainLink { head, rest: chain })));
        }
        chain
    }

    /// The first projection and the chain after it.
    #[must_use]
    pub fn split(&self) -> Option<(&Projection, &ProjectionChain)> {
        self.0.as_deref().map(|link| (&link.head, &link.rest))
    }

    /// True for the empty chain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_none()
    }

    /// Iterate projections from the head.
    pub fn iter(&self) -> ChainIter<'_> {
        ChainIter { cursor: self }
    }

    /// Render as nested `{"head": projection, "rest": chain}` maps ending in null.
    #[must_use]
    pub fn to_mu(&self) -> MuValue {
        let links: Vec<&Projection> = self.iter().collect();
        let mut rendered = MuValue::Null;
        for projection in links.into_iter().rev() {
            rendered = MuValue::map([("head", projection.to_mu()), ("rest", rendered)]);
        }
        rendered
    }
}

impl Drop for ProjectionChain {
    fn drop(&mut self) {
        let mut next = self.0.take();
        while let Some(link) = next {
            match Arc::try_unwrap(link) {
                Ok(mut link) => next = link.rest.0.take(),
                Err(_) => break,
            }
        }
    }
}

impl fmt::Debug for ProjectionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|p| p.id.as_str()))
            .finish()
    }
}

/// Iterator over a [`ProjectionChain`].
pub struct ChainIter<'a> {
    cursor: &'a ProjectionChain,
}

impl<'a> Iterator for ChainIter<'a> {
    type Item = &'a Projection;

    fn next(&mut self) -> Option<Self::Item> {
        let (head, rest) = self.cursor.split()?;
        self.cursor = rest;
        Some(head)
    }
}

// =============================================================================
// PROJECTION SET
// =============================================================================

/// Where a loaded set came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedOrigin {
    pub name: String,
    pub version: String,
    pub checksum: String,
}

/// An immutable, ordered set of projections with unique ids.
///
/// Order is part of the set's identity. Cheap to clone and safe to share
/// across threads.
#[derive(Debug, Clone)]
pub struct ProjectionSet {
    chain: ProjectionChain,
    len: usize,
    origin: Option<SeedOrigin>,
}

impl ProjectionSet {
    /// Build a set, validating each projection under default limits.
    pub fn new(projections: Vec<Projection>) -> Result<Self, ValidationError> {
        Self::with_limits(projections, &Limits::default())
    }

    /// Build a set, validating each projection under `limits`.
    ///
    /// Fails on the first invalid projection, on a repeated id, or when the
    /// set is larger than [`MAX_PROJECTIONS`].
    pub fn with_limits(
        projections: Vec<Projection>,
        limits: &Limits,
    ) -> Result<Self, ValidationError> {
        if projections.len() > MAX_PROJECTIONS {
            return Err(ValidationError::TooManyProjections {
                count: projections.len(),
                limit: MAX_PROJECTIONS,
            });
        }

        let mut seen = BTreeSet::new();
        for projection in &projections {
            projection.validate(limits)?;
            if !seen.insert(projection.id.as_str()) {
                return Err(ValidationError::DuplicateProjectionId(
                    projection.id.as_str().to_string(),
                ));
            }
        }

        let len = projections.len();
        Ok(Self {
            chain: ProjectionChain::from_vec(projections),
            len,
            origin: None,
        })
    }

    pub(crate) fn with_origin(mut self, origin: SeedOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    /// The head/rest chain, in declared order.
    #[must_use]
    pub fn chain(&self) -> &ProjectionChain {
        &self.chain
    }

    /// Number of projections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if the set holds no projection.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Projections in declared order.
    pub fn iter(&self) -> ChainIter<'_> {
        self.chain.iter()
    }

    /// Ids in declared order.
    #[must_use]
    pub fn ids(&self) -> Vec<&ProjectionId> {
        self.iter().map(|p| &p.id).collect()
    }

    /// Look up a projection by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Projection> {
        self.iter().find(|p| p.id.as_str() == id)
    }

    /// Seed metadata, if the set was loaded from a seed.
    #[must_use]
    pub fn origin(&self) -> Option<&SeedOrigin> {
        self.origin.as_ref()
    }
}

// =============================================================================
// PHASES & OUTCOMES
// =============================================================================

/// Result of one kernel step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// A projection fired and produced a different value.
    Rewrote {
        projection: ProjectionId,
        value: MuValue,
        hash: ValueHash,
    },
    /// No progress was made.
    Stalled(StallReason),
    /// A projection fired but its result is out of bounds; nothing was committed.
    Exhausted {
        resource: Resource,
        projection: ProjectionId,
    },
}

/// A phase of one kernel step.
#[derive(Debug)]
pub enum KernelPhase<'p> {
    /// Looking for the first matching projection in `remaining`.
    Select { remaining: &'p ProjectionChain },
    /// Instantiating the body of the projection that matched.
    Apply {
        projection: &'p Projection,
        bindings: Bindings,
    },
    /// The step is decided.
    Done(StepOutcome),
}

impl KernelPhase<'_> {
    /// Name of the phase as carried in `_mode`.
    #[must_use]
    pub fn mode(&self) -> &'static str {
        match self {
            Self::Select { .. } => "select",
            Self::Apply { .. } => "apply",
            Self::Done(_) => "done",
        }
    }

    /// Render the phase as kernel control state around `value`.
    #[must_use]
    pub fn to_mu(&self, value: &MuValue) -> MuValue {
        let mut fields = vec![
            ("_mode", MuValue::from(self.mode())),
            ("_step", value.clone()),
        ];
        match self {
            Self::Select { remaining } => fields.push(("_projs", remaining.to_mu())),
            Self::Apply {
                projection,
                bindings,
            } => {
                fields.push(("_match", projection.to_mu()));
                fields.push(("_bindings", MuValue::Map(bindings.clone())));
            }
            Self::Done(outcome) => {
                let fired = match outcome {
                    StepOutcome::Rewrote { projection, .. }
                    | StepOutcome::Exhausted { projection, .. } => Some(projection.clone()),
                    StepOutcome::Stalled(reason) => reason.fired(),
                };
                let fired = fired.map_or(MuValue::Null, |id| MuValue::from(id.as_str()));
                fields.push(("_match", fired));
            }
        }
        MuValue::map(fields)
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// The last in-bounds value.
    pub value: MuValue,
    /// One event per attempted step, indices contiguous from zero.
    pub trace: Vec<TraceEvent>,
    /// Why the run ended.
    pub halt: Halt,
}

impl RunOutcome {
    /// True if the run ended at a fixed point rather than an exhausted budget.
    #[must_use]
    pub fn stalled(&self) -> bool {
        matches!(self.halt, Halt::Stalled(_))
    }

    /// Number of attempted steps.
    #[must_use]
    pub fn steps(&self) -> usize {
        self.trace.len()
    }
}

// =============================================================================
// KERNEL
// =============================================================================

/// Steps values through a borrowed projection set.
#[derive(Debug, Clone, Copy)]
pub struct ProjectionKernel<'p> {
    projections: &'p ProjectionSet,
    matcher: Matcher,
    limits: Limits,
}

impl<'p> ProjectionKernel<'p> {
    /// Kernel with default limits.
    #[must_use]
    pub fn new(projections: &'p ProjectionSet) -> Self {
        Self::with_limits(projections, Limits::default())
    }

    /// Kernel with custom limits.
    #[must_use]
    pub fn with_limits(projections: &'p ProjectionSet, limits: Limits) -> Self {
        Self {
            projections,
            matcher: Matcher::new(limits),
            limits,
        }
    }

    /// The projection set.
    #[must_use]
    pub fn projections(&self) -> &'p ProjectionSet {
        self.projections
    }

    /// The limits values are held to.
    #[must_use]
    pub fn limits(&self) -> &Limits {
        &self.limits
    }

    /// Entry boundary for caller-supplied values.
    ///
    /// Rejects out-of-bounds values and any reserved control field.
    pub fn admit(&self, value: &MuValue) -> Result<(), ValidationError> {
        value.validate(&self.limits)?;
        value.ensure_no_reserved()
    }

    /// One step. A stall or an out-of-bounds result returns `value` unchanged.
    pub fn step(&self, value: &MuValue) -> Result<MuValue, ValidationError> {
        Ok(match self.step_outcome(value)? {
            StepOutcome::Rewrote { value, .. } => value,
            StepOutcome::Stalled(_) | StepOutcome::Exhausted { .. } => value.clone(),
        })
    }

    /// One step, reporting what happened.
    pub fn step_outcome(&self, value: &MuValue) -> Result<StepOutcome, ValidationError> {
        self.admit(value)?;
        Ok(self.apply(value, value.content_hash()))
    }

    /// Run the phase machine once over an admitted value.
    pub(crate) fn apply(&self, value: &MuValue, before: ValueHash) -> StepOutcome {
        let mut phase = KernelPhase::Select {
            remaining: self.projections.chain(),
        };

        loop {
            if tracing::enabled!(tracing::Level::TRACE) {
                trace!(phase = %phase.to_mu(value), "kernel phase");
            }

            phase = match phase {
                KernelPhase::Select { remaining } => match remaining.split() {
                    None => KernelPhase::Done(StepOutcome::Stalled(StallReason::NoMatch)),
                    Some((head, rest)) => match self.matcher.match_pattern(&head.pattern, value) {
                        MatchResult::Success(bindings) => KernelPhase::Apply {
                            projection: head,
                            bindings,
                        },
                        MatchResult::Failure => KernelPhase::Select { remaining: rest },
                    },
                },
                KernelPhase::Apply {
                    projection,
                    bindings,
                } => KernelPhase::Done(self.commit(projection, &bindings, before)),
                KernelPhase::Done(outcome) => return outcome,
            };
        }
    }

    fn commit(
        &self,
        projection: &Projection,
        bindings: &Bindings,
        before: ValueHash,
    ) -> StepOutcome {
        let id = projection.id.clone();
        let next = match substitute(&projection.body, bindings) {
            Substitution::Complete(next) => next,
            Substitution::Unbound(variable) => {
                return StepOutcome::Stalled(StallReason::Unbound {
                    projection: id,
                    variable,
                });
            }
        };

        if let Some(resource) = next.exceeds(&self.limits) {
            return StepOutcome::Exhausted {
                resource,
                projection: id,
            };
        }

        let hash = next.content_hash();
        if hash == before {
            StepOutcome::Stalled(StallReason::FixedPoint { projection: id })
        } else {
            StepOutcome::Rewrote {
                projection: id,
                value: next,
                hash,
            }
        }
    }

    /// Step until a stall or until a budget runs out.
    ///
    /// `max_steps` is clamped to [`MAX_RUN_STEPS`]. Stalled and exhausted
    /// steps are traced too, with `after == before`.
    pub fn run(&self, value: MuValue, max_steps: usize) -> Result<RunOutcome, ValidationError> {
        self.admit(&value)?;
        let budget = max_steps.min(MAX_RUN_STEPS);
        let mut current = value;
        let mut hash = current.content_hash();
        let mut trace: Vec<TraceEvent> = Vec::new();

        let halt = loop {
            if trace.len() >= budget {
                break Halt::Exhausted(Resource::Steps);
            }
            let index = trace.len() as u64;

            match self.apply(&current, hash) {
                StepOutcome::Rewrote {
                    projection,
                    value,
                    hash: after,
                } => {
                    debug!(
                        step = index,
                        projection = %projection,
                        before = %hash.short(),
                        after = %after.short(),
                        "rewrote"
                    );
                    trace.push(TraceEvent {
                        index,
                        before: hash,
                        after,
                        projection: Some(projection),
                    });
                    current = value;
                    hash = after;
                }
                StepOutcome::Stalled(reason) => {
                    debug!(step = index, reason = reason.tag(), "stalled");
                    trace.push(TraceEvent {
                        index,
                        before: hash,
                        after: hash,
                        projection: reason.fired(),
                    });
                    break Halt::Stalled(reason);
                }
                StepOutcome::Exhausted {
                    resource,
                    projection,
                } => {
                    debug!(step = index, projection = %projection, %resource, "result out of bounds");
                    trace.push(TraceEvent {
                        index,
                        before: hash,
                        after: hash,
                        projection: Some(projection),
                    });
                    break Halt::Exhausted(resource);
                }
            }
        };

        info!(steps = trace.len(), halt = %halt, "run complete");
        Ok(RunOutcome {
            value: current,
            trace,
            halt,
        })
    }
}

/// One step of `value` through `projections` with default limits.
pub fn step(projections: &ProjectionSet, value: &MuValue) -> Result<MuValue, ValidationError> {
    ProjectionKernel::new(projections).step(value)
}

/// Run `value` through `projections` with default limits.
pub fn run(
    projections: &ProjectionSet,
    value: MuValue,
    max_steps: usize,
) -> Result<RunOutcome, ValidationError> {
    ProjectionKernel::new(projections).run(value, max_steps)
}

// =============================================================================
// TESTS
// =============================================================================
