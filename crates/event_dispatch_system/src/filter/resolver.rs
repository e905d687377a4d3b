//! Filter specification resolver
//!
//! Validates a [`ListenerDescriptor`] against the event lattice and produces
//! an immutable [`ListenerSpec`] the compiler can turn into a filter. Every
//! directive combination that cannot be statically resolved is a hard
//! [`FilterError`] here; registration failures are never downgraded into a
//! silently-matching or silently-dropping filter.

use crate::cause::DataKey;
use crate::error::FilterError;
use crate::filter::directive::{
    CancellationRequirement, FilterKind, ListenerDescriptor, SubtypeFilter,
};
use crate::lattice::{AccessorFn, EventLattice, TypeToken};
use std::sync::Arc;
use tracing::warn;

/// One fully resolved extraction step. Steps run in parameter order; data
/// steps reference the value a previous step produced.
#[derive(Clone)]
pub enum ExtractionStep {
    CauseFirst {
        target: TypeToken,
        narrow: SubtypeFilter,
    },
    CauseLast {
        target: TypeToken,
        narrow: SubtypeFilter,
    },
    CauseRoot {
        target: TypeToken,
        narrow: SubtypeFilter,
    },
    CauseBefore {
        marker: TypeToken,
        target: TypeToken,
        narrow: SubtypeFilter,
    },
    CauseAfter {
        marker: TypeToken,
        target: TypeToken,
        narrow: SubtypeFilter,
    },
    CauseAll {
        target: TypeToken,
        narrow: SubtypeFilter,
        ignore_empty: bool,
    },
    Getter {
        accessor: AccessorFn,
        accessor_name: &'static str,
    },
    DataSupports {
        param: usize,
        key: DataKey,
        inverse: bool,
    },
    DataHas {
        param: usize,
        key: DataKey,
        inverse: bool,
    },
}

impl std::fmt::Debug for ExtractionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CauseFirst { target, .. } => write!(f, "CauseFirst({})", target),
            Self::CauseLast { target, .. } => write!(f, "CauseLast({})", target),
            Self::CauseRoot { target, .. } => write!(f, "CauseRoot({})", target),
            Self::CauseBefore { marker, target, .. } => {
                write!(f, "CauseBefore({} before {})", target, marker)
            }
            Self::CauseAfter { marker, target, .. } => {
                write!(f, "CauseAfter({} after {})", target, marker)
            }
            Self::CauseAll { target, .. } => write!(f, "CauseAll({})", target),
            Self::Getter { accessor_name, .. } => write!(f, "Getter({})", accessor_name),
            Self::DataSupports { param, key, .. } => {
                write!(f, "DataSupports(#{}, {})", param, key)
            }
            Self::DataHas { param, key, .. } => write!(f, "DataHas(#{}, {})", param, key),
        }
    }
}

impl ExtractionStep {
    /// True for steps that bind a sequence rather than a single value.
    pub fn is_sequence(&self) -> bool {
        matches!(self, Self::CauseAll { .. })
    }
}

// Getter steps compare by accessor identity; everything else is plain data.
impl PartialEq for ExtractionStep {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                Self::CauseFirst { target: a, narrow: na },
                Self::CauseFirst { target: b, narrow: nb },
            )
            | (
                Self::CauseLast { target: a, narrow: na },
                Self::CauseLast { target: b, narrow: nb },
            )
            | (
                Self::CauseRoot { target: a, narrow: na },
                Self::CauseRoot { target: b, narrow: nb },
            ) => a == b && na == nb,
            (
                Self::CauseBefore { marker: ma, target: a, narrow: na },
                Self::CauseBefore { marker: mb, target: b, narrow: nb },
            )
            | (
                Self::CauseAfter { marker: ma, target: a, narrow: na },
                Self::CauseAfter { marker: mb, target: b, narrow: nb },
            ) => ma == mb && a == b && na == nb,
            (
                Self::CauseAll { target: a, narrow: na, ignore_empty: ia },
                Self::CauseAll { target: b, narrow: nb, ignore_empty: ib },
            ) => a == b && na == nb && ia == ib,
            (
                Self::Getter { accessor: fa, accessor_name: na },
                Self::Getter { accessor: fb, accessor_name: nb },
            ) => na == nb && Arc::ptr_eq(fa, fb),
            (
                Self::DataSupports { param: pa, key: ka, inverse: ia },
                Self::DataSupports { param: pb, key: kb, inverse: ib },
            )
            | (
                Self::DataHas { param: pa, key: ka, inverse: ia },
                Self::DataHas { param: pb, key: kb, inverse: ib },
            ) => pa == pb && ka == kb && ia == ib,
            _ => false,
        }
    }
}

/// Validated, language-neutral description of one listener method: the event
/// gate plus the ordered extraction steps for its extra parameters.
///
/// Built once per listener method and shared (via the compiled-filter cache)
/// across registrations of the same captureless handler; equality decides
/// whether a cached adapter may serve a new registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerSpec {
    pub event: TypeToken,
    pub include: Vec<TypeToken>,
    pub exclude: Vec<TypeToken>,
    pub cancellation: Option<CancellationRequirement>,
    pub steps: Vec<ExtractionStep>,
}

impl ListenerSpec {
    /// An empty spec needs no compiled filter at all; the adapter
    /// short-circuits straight to invocation.
    pub fn is_empty(&self) -> bool {
        self.include.is_empty()
            && self.exclude.is_empty()
            && self.cancellation.is_none()
            && self.steps.is_empty()
    }
}

/// Resolves a descriptor into a spec, or fails with the first invalid
/// directive found.
pub fn resolve(
    lattice: &EventLattice,
    descriptor: &ListenerDescriptor,
) -> Result<ListenerSpec, FilterError> {
    let event = descriptor.event;
    if !lattice.contains(event) {
        return Err(FilterError::UnknownType(event.name()));
    }

    let include = match &descriptor.include {
        Some(types) if types.is_empty() => {
            return Err(FilterError::EmptyIncludeSet(event.name()));
        }
        Some(types) => {
            for t in types {
                check_gate_type(lattice, event, *t)?;
            }
            types.clone()
        }
        None => Vec::new(),
    };
    for t in &descriptor.exclude {
        check_gate_type(lattice, event, *t)?;
    }

    if descriptor.cancellation.is_some() && !lattice.is_cancellable(event) {
        return Err(FilterError::NotCancellable(event.name()));
    }

    let mut steps = Vec::with_capacity(descriptor.params.len());
    for (index, param) in descriptor.params.iter().enumerate() {
        let step = match &param.kind {
            FilterKind::CauseFirst => ExtractionStep::CauseFirst {
                target: param.target,
                narrow: param.narrow.clone(),
            },
            FilterKind::CauseLast => ExtractionStep::CauseLast {
                target: param.target,
                narrow: param.narrow.clone(),
            },
            FilterKind::CauseRoot => ExtractionStep::CauseRoot {
                target: param.target,
                narrow: param.narrow.clone(),
            },
            FilterKind::CauseBeforeMarker(marker) => {
                check_marker(lattice, *marker)?;
                ExtractionStep::CauseBefore {
                    marker: *marker,
                    target: param.target,
                    narrow: param.narrow.clone(),
                }
            }
            FilterKind::CauseAfterMarker(marker) => {
                check_marker(lattice, *marker)?;
                ExtractionStep::CauseAfter {
                    marker: *marker,
                    target: param.target,
                    narrow: param.narrow.clone(),
                }
            }
            FilterKind::CauseAll { ignore_empty } => ExtractionStep::CauseAll {
                target: param.target,
                narrow: param.narrow.clone(),
                ignore_empty: *ignore_empty,
            },
            FilterKind::Getter(name) => resolve_getter(lattice, event, param.target, *name)?,
            FilterKind::DataSupports {
                param: referenced,
                key,
                inverse,
            } => {
                check_data_reference(&steps, index, *referenced)?;
                ExtractionStep::DataSupports {
                    param: *referenced,
                    key: key.clone(),
                    inverse: *inverse,
                }
            }
            FilterKind::DataHas {
                param: referenced,
                key,
                inverse,
            } => {
                check_data_reference(&steps, index, *referenced)?;
                ExtractionStep::DataHas {
                    param: *referenced,
                    key: key.clone(),
                    inverse: *inverse,
                }
            }
        };
        steps.push(step);
    }

    Ok(ListenerSpec {
        event,
        include,
        exclude: descriptor.exclude.clone(),
        cancellation: descriptor.cancellation,
        steps,
    })
}

/// Whole-event include/exclude members must be registered. A member that is
/// not a subtype of the declared event can never match a dispatched concrete
/// type, which is almost certainly a mistake; it is allowed but logged.
fn check_gate_type(
    lattice: &EventLattice,
    event: TypeToken,
    member: TypeToken,
) -> Result<(), FilterError> {
    if !lattice.contains(member) {
        return Err(FilterError::UnknownType(member.name()));
    }
    if !lattice.is_assignable(member, event) {
        warn!(
            "⚠️ Include/exclude member {} is not a subtype of {}; it will never match",
            member, event
        );
    }
    Ok(())
}

fn check_marker(lattice: &EventLattice, marker: TypeToken) -> Result<(), FilterError> {
    if !lattice.contains(marker) {
        return Err(FilterError::UnknownType(marker.name()));
    }
    Ok(())
}

/// A data directive may only look at a single-valued parameter resolved
/// before it.
fn check_data_reference(
    steps: &[ExtractionStep],
    index: usize,
    referenced: usize,
) -> Result<(), FilterError> {
    if referenced >= index {
        return Err(FilterError::BadDataReference {
            param: index,
            referenced,
            reason: "data directives may only reference an earlier parameter",
        });
    }
    if steps[referenced].is_sequence() {
        return Err(FilterError::BadDataReference {
            param: index,
            referenced,
            reason: "data directives cannot reference a sequence-valued parameter",
        });
    }
    Ok(())
}

/// Binds a getter parameter to an accessor on the event.
///
/// Covariant narrowing is allowed in both directions of interest: an accessor
/// declared to return a subtype of the parameter type satisfies it (the event
/// narrowed its return type), but an accessor returning an unrelated or wider
/// type does not.
fn resolve_getter(
    lattice: &EventLattice,
    event: TypeToken,
    target: TypeToken,
    name: Option<&'static str>,
) -> Result<ExtractionStep, FilterError> {
    let accessors = lattice.accessors_for(event);
    match name {
        Some(name) => {
            let def = accessors
                .iter()
                .find(|a| a.name == name)
                .ok_or(FilterError::NoSuchAccessor {
                    event: event.name(),
                    param: target.name(),
                })?;
            if !lattice.is_assignable(def.returns, target) {
                return Err(FilterError::AccessorNotAssignable {
                    event: event.name(),
                    accessor: def.name,
                    returns: def.returns.name(),
                    param: target.name(),
                });
            }
            Ok(ExtractionStep::Getter {
                accessor: def.func.clone(),
                accessor_name: def.name,
            })
        }
        None => {
            let mut candidates = accessors
                .iter()
                .filter(|a| lattice.is_assignable(a.returns, target));
            let first = candidates.next().ok_or(FilterError::NoSuchAccessor {
                event: event.name(),
                param: target.name(),
            })?;
            if let Some(second) = candidates.next() {
                return Err(FilterError::AmbiguousAccessor {
                    event: event.name(),
                    param: target.name(),
                    first: first.name,
                    second: second.name,
                });
            }
            Ok(ExtractionStep::Getter {
                accessor: first.func.clone(),
                accessor_name: first.name,
            })
        }
    }
}
