//! Filter/extractor compiler
//!
//! Turns a validated [`ListenerSpec`] into a [`CompiledFilter`]: a pure,
//! thread-safe function from an event to the ordered tuple of extracted
//! parameter values, or `None` when the event does not match. The cheap
//! whole-event checks run first and short-circuit; extraction steps run in
//! declared order, threading already-resolved values so data directives can
//! look at an earlier parameter.

use crate::cause::ContextObject;
use crate::event::GameEvent;
use crate::filter::directive::{CancellationRequirement, SubtypeFilter};
use crate::filter::resolver::{ExtractionStep, ListenerSpec};
use crate::lattice::{EventLattice, TypeToken};
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::warn;

/// One resolved listener argument.
#[derive(Clone, Debug)]
pub enum ExtractedValue {
    Single(Arc<dyn ContextObject>),
    Sequence(Vec<Arc<dyn ContextObject>>),
}

impl ExtractedValue {
    pub fn as_single(&self) -> Option<&Arc<dyn ContextObject>> {
        match self {
            Self::Single(value) => Some(value),
            Self::Sequence(_) => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[Arc<dyn ContextObject>]> {
        match self {
            Self::Single(_) => None,
            Self::Sequence(values) => Some(values),
        }
    }

    /// Downcast convenience for single values.
    pub fn downcast_ref<T: ContextObject>(&self) -> Option<&T> {
        self.as_single()?.as_any().downcast_ref::<T>()
    }
}

/// Ordered extracted arguments for parameters 1..n. Parameter 0 (the event
/// itself) is supplied by the adapter, not the filter.
pub type ExtractedArgs = SmallVec<[ExtractedValue; 4]>;

/// Compiled form of one listener spec: an immutable pipeline shared across
/// registrations of the same captureless handler, safe to run from any
/// number of dispatch threads at once.
pub struct CompiledFilter {
    lattice: Arc<EventLattice>,
    spec: Arc<ListenerSpec>,
}

impl CompiledFilter {
    /// Compiles a spec. The resolver has already rejected everything that
    /// cannot be resolved statically, so compilation itself cannot fail.
    pub fn compile(lattice: Arc<EventLattice>, spec: Arc<ListenerSpec>) -> Self {
        Self { lattice, spec }
    }

    pub fn spec(&self) -> &ListenerSpec {
        &self.spec
    }

    /// Runs the filter. `None` is an expected, frequent non-match; `Some`
    /// carries the argument tuple in declared parameter order.
    pub fn apply(&self, event: &dyn GameEvent) -> Option<ExtractedArgs> {
        let lattice = &*self.lattice;
        let concrete = event.token();

        // Whole-event gate first: cheapest checks, exclude wins over include.
        if !self.spec.include.is_empty()
            && !self
                .spec
                .include
                .iter()
                .any(|t| lattice.is_assignable(concrete, *t))
        {
            return None;
        }
        if self
            .spec
            .exclude
            .iter()
            .any(|t| lattice.is_assignable(concrete, *t))
        {
            return None;
        }

        if let Some(requirement) = self.spec.cancellation {
            let Some(cancellable) = event.as_cancellable() else {
                // The lattice says this type is cancellable but the concrete
                // value does not expose the capability. Treat as non-match.
                warn!(
                    "⚠️ Event {} declared cancellable in the lattice but exposes no cancellation capability",
                    concrete
                );
                return None;
            };
            let matched = match requirement {
                CancellationRequirement::MustBeCancelled => cancellable.is_cancelled(),
                CancellationRequirement::MustNotBeCancelled => !cancellable.is_cancelled(),
                CancellationRequirement::Any => true,
            };
            if !matched {
                return None;
            }
        }

        let mut args: ExtractedArgs = SmallVec::with_capacity(self.spec.steps.len());
        for step in &self.spec.steps {
            let value = match step {
                ExtractionStep::CauseFirst { target, narrow } => single(
                    event
                        .cause()
                        .iter()
                        .find(|f| frame_matches(lattice, f.token(), *target, narrow)),
                )?,
                ExtractionStep::CauseLast { target, narrow } => single(
                    event
                        .cause()
                        .iter()
                        .collect::<SmallVec<[_; 8]>>()
                        .into_iter()
                        .rev()
                        .find(|f| frame_matches(lattice, f.token(), *target, narrow)),
                )?,
                ExtractionStep::CauseRoot { target, narrow } => single(
                    event
                        .cause()
                        .iter()
                        .next()
                        .filter(|f| frame_matches(lattice, f.token(), *target, narrow)),
                )?,
                ExtractionStep::CauseBefore {
                    marker,
                    target,
                    narrow,
                } => {
                    let frames: SmallVec<[_; 8]> = event.cause().iter().collect();
                    let marker_idx = frames
                        .iter()
                        .position(|f| lattice.is_assignable(f.token(), *marker))?;
                    single(
                        frames[..marker_idx]
                            .iter()
                            .rev()
                            .find(|f| frame_matches(lattice, f.token(), *target, narrow))
                            .copied(),
                    )?
                }
                ExtractionStep::CauseAfter {
                    marker,
                    target,
                    narrow,
                } => {
                    let frames: SmallVec<[_; 8]> = event.cause().iter().collect();
                    let marker_idx = frames
                        .iter()
                        .position(|f| lattice.is_assignable(f.token(), *marker))?;
                    single(
                        frames[marker_idx + 1..]
                            .iter()
                            .find(|f| frame_matches(lattice, f.token(), *target, narrow))
                            .copied(),
                    )?
                }
                ExtractionStep::CauseAll {
                    target,
                    narrow,
                    ignore_empty,
                } => {
                    let values: Vec<Arc<dyn ContextObject>> = event
                        .cause()
                        .iter()
                        .filter(|f| frame_matches(lattice, f.token(), *target, narrow))
                        .map(|f| f.value().clone())
                        .collect();
                    if values.is_empty() && !ignore_empty {
                        return None;
                    }
                    ExtractedValue::Sequence(values)
                }
                ExtractionStep::Getter { accessor, .. } => {
                    ExtractedValue::Single(accessor(event)?)
                }
                ExtractionStep::DataSupports {
                    param,
                    key,
                    inverse,
                } => {
                    // The resolver only admits backward references to
                    // single-valued parameters.
                    let value = args[*param].as_single()?.clone();
                    let supported = value
                        .data()
                        .map(|d| d.supports(key))
                        .unwrap_or(false);
                    if supported == *inverse {
                        return None;
                    }
                    ExtractedValue::Single(value)
                }
                ExtractionStep::DataHas { param, key, inverse } => {
                    let value = args[*param].as_single()?.clone();
                    let present = value
                        .data()
                        .and_then(|d| d.get(key))
                        .is_some();
                    if present == *inverse {
                        return None;
                    }
                    ExtractedValue::Single(value)
                }
            };
            args.push(value);
        }

        Some(args)
    }
}

impl std::fmt::Debug for CompiledFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledFilter")
            .field("event", &self.spec.event)
            .field("steps", &self.spec.steps)
            .finish()
    }
}

#[inline]
fn frame_matches(
    lattice: &EventLattice,
    frame: TypeToken,
    target: TypeToken,
    narrow: &SubtypeFilter,
) -> bool {
    lattice.is_assignable(frame, target) && narrow.matches(lattice, frame)
}

#[inline]
fn single(frame: Option<&crate::cause::CauseFrame>) -> Option<ExtractedValue> {
    frame.map(|f| ExtractedValue::Single(f.value().clone()))
}
