//! Cause trails
//!
//! Every event carries a [`Cause`]: an ordered, immutable sequence of context
//! frames describing why the event is happening (the player that clicked, the
//! block that moved, the plugin that scheduled the task). Filter extraction
//! pulls listener parameters out of this trail by position and type.

use crate::lattice::{EventLattice, TypeToken};
use smallvec::SmallVec;
use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

/// Key into an object's optional data store, used by the supports/has
/// filter directives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DataKey(std::borrow::Cow<'static, str>);

impl DataKey {
    pub const fn new(key: &'static str) -> Self {
        Self(std::borrow::Cow::Borrowed(key))
    }

    pub fn owned(key: String) -> Self {
        Self(std::borrow::Cow::Owned(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optional keyed-data capability of a context object.
pub trait DataQuery: Send + Sync {
    /// Whether this object could ever hold a value for the key
    fn supports(&self, key: &DataKey) -> bool;

    /// The current value for the key, if present
    fn get(&self, key: &DataKey) -> Option<Arc<dyn Any + Send + Sync>>;
}

/// Trait every value placed in a Cause implements.
///
/// `data()` opts an object into the supports/has filter directives; the
/// default implementation reports no data capability.
pub trait ContextObject: Send + Sync + Debug + 'static {
    fn as_any(&self) -> &dyn Any;

    fn data(&self) -> Option<&dyn DataQuery> {
        None
    }
}

macro_rules! impl_context_object {
    ($($ty:ty),* $(,)?) => {
        $(impl ContextObject for $ty {
            fn as_any(&self) -> &dyn Any {
                self
            }
        })*
    };
}

// Common plain values show up in causes (names, ids, counters)
impl_context_object!(String, &'static str, char, bool, i32, i64, u32, u64, f32, f64);

/// One frame of a cause: the value plus the type it was declared as when the
/// cause was built.
#[derive(Clone)]
pub struct CauseFrame {
    value: Arc<dyn ContextObject>,
    token: TypeToken,
}

impl CauseFrame {
    #[inline]
    pub fn value(&self) -> &Arc<dyn ContextObject> {
        &self.value
    }

    #[inline]
    pub fn token(&self) -> TypeToken {
        self.token
    }
}

impl Debug for CauseFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {:?}", self.token.name(), self.value)
    }
}

/// Ordered, immutable context trail attached to an event.
///
/// Insertion order is meaningful and duplicates are allowed. Once built a
/// cause is never mutated; it is owned by the event that carries it.
#[derive(Clone, Debug, Default)]
pub struct Cause {
    frames: SmallVec<[CauseFrame; 4]>,
}

impl Cause {
    pub fn builder() -> CauseBuilder {
        CauseBuilder {
            frames: SmallVec::new(),
        }
    }

    /// Single-frame convenience constructor.
    pub fn of<T: ContextObject>(value: T) -> Self {
        Self::builder().push(value).build()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CauseFrame> {
        self.frames.iter()
    }

    /// First frame assignable to `target`.
    pub fn first(&self, lattice: &EventLattice, target: TypeToken) -> Option<&CauseFrame> {
        self.frames
            .iter()
            .find(|f| lattice.is_assignable(f.token, target))
    }

    /// Last frame assignable to `target`.
    pub fn last(&self, lattice: &EventLattice, target: TypeToken) -> Option<&CauseFrame> {
        self.frames
            .iter()
            .rev()
            .find(|f| lattice.is_assignable(f.token, target))
    }

    /// The frame at position 0, if it is assignable to `target`. Never
    /// searches past the first element.
    pub fn root(&self, lattice: &EventLattice, target: TypeToken) -> Option<&CauseFrame> {
        self.frames
            .first()
            .filter(|f| lattice.is_assignable(f.token, target))
    }

    /// Nearest predecessor of the first frame assignable to `marker` that is
    /// itself assignable to `target`.
    pub fn before(
        &self,
        lattice: &EventLattice,
        marker: TypeToken,
        target: TypeToken,
    ) -> Option<&CauseFrame> {
        let marker_idx = self
            .frames
            .iter()
            .position(|f| lattice.is_assignable(f.token, marker))?;
        self.frames[..marker_idx]
            .iter()
            .rev()
            .find(|f| lattice.is_assignable(f.token, target))
    }

    /// Nearest successor of the first frame assignable to `marker` that is
    /// itself assignable to `target`.
    pub fn after(
        &self,
        lattice: &EventLattice,
        marker: TypeToken,
        target: TypeToken,
    ) -> Option<&CauseFrame> {
        let marker_idx = self
            .frames
            .iter()
            .position(|f| lattice.is_assignable(f.token, marker))?;
        self.frames[marker_idx + 1..]
            .iter()
            .find(|f| lattice.is_assignable(f.token, target))
    }

    /// Every frame assignable to `target`, in insertion order.
    pub fn all(&self, lattice: &EventLattice, target: TypeToken) -> SmallVec<[&CauseFrame; 4]> {
        self.frames
            .iter()
            .filter(|f| lattice.is_assignable(f.token, target))
            .collect()
    }

    /// Typed convenience: first frame holding exactly a `T`. A frame whose
    /// declared type is a subtype of `T` holds some other concrete value and
    /// is passed over, so this agrees with [`Cause::all_of`].
    pub fn first_of<T: ContextObject>(&self, lattice: &EventLattice) -> Option<&T> {
        self.all(lattice, TypeToken::of::<T>())
            .into_iter()
            .find_map(|f| f.value.as_any().downcast_ref::<T>())
    }

    /// Typed convenience: last frame holding exactly a `T`.
    pub fn last_of<T: ContextObject>(&self, lattice: &EventLattice) -> Option<&T> {
        self.all(lattice, TypeToken::of::<T>())
            .into_iter()
            .rev()
            .find_map(|f| f.value.as_any().downcast_ref::<T>())
    }

    /// Typed convenience: every `T` in the trail, in insertion order.
    pub fn all_of<T: ContextObject>(&self, lattice: &EventLattice) -> Vec<&T> {
        self.all(lattice, TypeToken::of::<T>())
            .into_iter()
            .filter_map(|f| f.value.as_any().downcast_ref::<T>())
            .collect()
    }

    /// Whether any frame is assignable to `T`.
    pub fn contains<T: ContextObject>(&self, lattice: &EventLattice) -> bool {
        self.first(lattice, TypeToken::of::<T>()).is_some()
    }
}

/// Builder for [`Cause`]. Frames keep the order they were pushed in.
pub struct CauseBuilder {
    frames: SmallVec<[CauseFrame; 4]>,
}

impl CauseBuilder {
    /// Appends a value, tagged with its own concrete type.
    pub fn push<T: ContextObject>(mut self, value: T) -> Self {
        self.frames.push(CauseFrame {
            value: Arc::new(value),
            token: TypeToken::of::<T>(),
        });
        self
    }

    /// Appends a shared value under an explicit declared type, for callers
    /// that hand the same object to several events.
    pub fn push_arc(mut self, value: Arc<dyn ContextObject>, declared: TypeToken) -> Self {
        self.frames.push(CauseFrame {
            value,
            token: declared,
        });
        self
    }

    pub fn build(self) -> Cause {
        Cause {
            frames: self.frames,
        }
    }
}
