//! Declarative filter surface
//!
//! This is the only configuration surface of the engine: the directives a
//! plugin author attaches to a listener to say which events it wants and how
//! each extra parameter is extracted from them. Everything here is plain
//! data; validation happens in the resolver.

use crate::cause::DataKey;
use crate::lattice::TypeToken;

/// Listener invocation order. Listeners run in ascending order; ties are
/// broken by registration sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Order {
    First,
    Early,
    #[default]
    Normal,
    Late,
    Last,
}

/// Method-level cancellation requirement.
///
/// `Any` accepts both states but still requires the event type to carry the
/// cancellation capability; applying any variant to a non-cancellable event
/// type is a hard registration failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationRequirement {
    MustBeCancelled,
    MustNotBeCancelled,
    Any,
}

/// Include/exclude narrowing applied to an extracted cause frame.
///
/// A present include set means the frame's declared type must be assignable
/// to at least one member; the exclude set is checked afterwards and always
/// wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubtypeFilter {
    pub include: Vec<TypeToken>,
    pub exclude: Vec<TypeToken>,
}

impl SubtypeFilter {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Applies the narrowing to a frame token against the lattice.
    pub fn matches(&self, lattice: &crate::lattice::EventLattice, token: TypeToken) -> bool {
        if !self.include.is_empty()
            && !self.include.iter().any(|t| lattice.is_assignable(token, *t))
        {
            return false;
        }
        !self.exclude.iter().any(|t| lattice.is_assignable(token, *t))
    }
}

/// Extraction kind of one listener parameter (index >= 1; parameter 0 is the
/// event itself and is governed by the whole-event include/exclude sets).
#[derive(Debug, Clone)]
pub enum FilterKind {
    /// First cause frame assignable to the parameter type
    CauseFirst,
    /// Last cause frame assignable to the parameter type
    CauseLast,
    /// The frame at position 0, if assignable; never searches further
    CauseRoot,
    /// Nearest predecessor of a frame assignable to the marker type
    CauseBeforeMarker(TypeToken),
    /// Nearest successor of a frame assignable to the marker type
    CauseAfterMarker(TypeToken),
    /// Every assignable frame, in insertion order; the parameter binds a
    /// sequence. `ignore_empty` decides whether an empty result still counts
    /// as a match.
    CauseAll { ignore_empty: bool },
    /// Zero-argument accessor on the event. `None` picks the unique accessor
    /// whose declared return type satisfies the parameter type; `Some(name)`
    /// picks by name.
    Getter(Option<&'static str>),
    /// `supports(key)` query against an earlier parameter's resolved value
    DataSupports {
        param: usize,
        key: DataKey,
        inverse: bool,
    },
    /// `get(key)` presence query against an earlier parameter's resolved value
    DataHas {
        param: usize,
        key: DataKey,
        inverse: bool,
    },
}

/// One extra listener parameter: its declared type, how it is extracted, and
/// an optional include/exclude narrowing on the extracted frame.
#[derive(Debug, Clone)]
pub struct ParamDirective {
    pub target: TypeToken,
    pub kind: FilterKind,
    pub narrow: SubtypeFilter,
}

impl ParamDirective {
    pub fn new<T: ?Sized + 'static>(kind: FilterKind) -> Self {
        Self {
            target: TypeToken::of::<T>(),
            kind,
            narrow: SubtypeFilter::none(),
        }
    }

    pub fn getter<T: ?Sized + 'static>() -> Self {
        Self::new::<T>(FilterKind::Getter(None))
    }

    pub fn named_getter<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self::new::<T>(FilterKind::Getter(Some(name)))
    }

    pub fn cause_first<T: ?Sized + 'static>() -> Self {
        Self::new::<T>(FilterKind::CauseFirst)
    }

    pub fn cause_last<T: ?Sized + 'static>() -> Self {
        Self::new::<T>(FilterKind::CauseLast)
    }

    pub fn cause_root<T: ?Sized + 'static>() -> Self {
        Self::new::<T>(FilterKind::CauseRoot)
    }

    pub fn cause_before<T: ?Sized + 'static, M: ?Sized + 'static>() -> Self {
        Self::new::<T>(FilterKind::CauseBeforeMarker(TypeToken::of::<M>()))
    }

    pub fn cause_after<T: ?Sized + 'static, M: ?Sized + 'static>() -> Self {
        Self::new::<T>(FilterKind::CauseAfterMarker(TypeToken::of::<M>()))
    }

    pub fn cause_all<T: ?Sized + 'static>(ignore_empty: bool) -> Self {
        Self::new::<T>(FilterKind::CauseAll { ignore_empty })
    }

    pub fn data_supports<T: ?Sized + 'static>(param: usize, key: DataKey) -> Self {
        Self::new::<T>(FilterKind::DataSupports {
            param,
            key,
            inverse: false,
        })
    }

    pub fn data_has<T: ?Sized + 'static>(param: usize, key: DataKey) -> Self {
        Self::new::<T>(FilterKind::DataHas {
            param,
            key,
            inverse: false,
        })
    }

    /// Flips the polarity of a supports/has directive.
    pub fn inverse(mut self) -> Self {
        match &mut self.kind {
            FilterKind::DataSupports { inverse, .. } | FilterKind::DataHas { inverse, .. } => {
                *inverse = !*inverse;
            }
            _ => {}
        }
        self
    }

    /// Narrows the extracted frame to the given subtype.
    pub fn including<S: ?Sized + 'static>(mut self) -> Self {
        self.narrow.include.push(TypeToken::of::<S>());
        self
    }

    /// Excludes frames of the given subtype.
    pub fn excluding<S: ?Sized + 'static>(mut self) -> Self {
        self.narrow.exclude.push(TypeToken::of::<S>());
        self
    }
}

/// Everything a plugin declares about one listener: the event type, ordering,
/// whole-event include/exclude sets, cancellation requirement, and the
/// per-parameter extraction directives.
#[derive(Debug, Clone)]
pub struct ListenerDescriptor {
    pub event: TypeToken,
    pub order: Order,
    /// `Some` means "must be assignable to at least one member"; `Some` with
    /// an empty vec is rejected at resolve time.
    pub include: Option<Vec<TypeToken>>,
    pub exclude: Vec<TypeToken>,
    pub cancellation: Option<CancellationRequirement>,
    pub params: Vec<ParamDirective>,
}

impl ListenerDescriptor {
    pub fn for_event<E: ?Sized + 'static>() -> Self {
        Self {
            event: TypeToken::of::<E>(),
            order: Order::Normal,
            include: None,
            exclude: Vec::new(),
            cancellation: None,
            params: Vec::new(),
        }
    }

    pub fn order(mut self, order: Order) -> Self {
        self.order = order;
        self
    }

    /// Restricts dispatch to concrete events assignable to `S`.
    pub fn include<S: ?Sized + 'static>(mut self) -> Self {
        self.include
            .get_or_insert_with(Vec::new)
            .push(TypeToken::of::<S>());
        self
    }

    /// Installs an explicit include set; an empty one fails at resolve time.
    pub fn include_types(mut self, types: Vec<TypeToken>) -> Self {
        self.include = Some(types);
        self
    }

    /// Excludes concrete events assignable to `S`. Exclude wins over include.
    pub fn exclude<S: ?Sized + 'static>(mut self) -> Self {
        self.exclude.push(TypeToken::of::<S>());
        self
    }

    pub fn require_cancellation(mut self, requirement: CancellationRequirement) -> Self {
        self.cancellation = Some(requirement);
        self
    }

    pub fn param(mut self, param: ParamDirective) -> Self {
        self.params.push(param);
        self
    }
}
