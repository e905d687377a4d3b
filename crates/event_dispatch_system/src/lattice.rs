//! Event type lattice
//!
//! Rust has no runtime subtype relation, so the lattice the game's event
//! taxonomy forms (with multiple inheritance between event interfaces) is
//! declared explicitly at startup: every event and context value type is
//! registered with its parents, its optional cancellation capability, and the
//! zero-argument accessors the filter resolver can bind getter parameters to.
//!
//! Supertype closures are computed once per type and memoized; the dispatch
//! hot path and the activation registry both read them as plain lookups.

use crate::cause::ContextObject;
use crate::error::FilterError;
use crate::event::GameEvent;
use dashmap::DashMap;
use smallvec::SmallVec;
use std::any::TypeId;
use std::sync::Arc;
use tracing::debug;

/// Tag identifying a registered type: its `TypeId` plus a display name.
///
/// Equality and hashing consider only the `TypeId`; the name exists for
/// diagnostics and error messages.
#[derive(Clone, Copy, Debug)]
pub struct TypeToken {
    id: TypeId,
    name: &'static str,
}

impl TypeToken {
    /// Creates the token for a concrete Rust type.
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for TypeToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeToken {}

impl std::hash::Hash for TypeToken {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl std::fmt::Display for TypeToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

/// Zero-argument accessor on an event, usable as a getter extraction source.
pub type AccessorFn =
    Arc<dyn Fn(&dyn GameEvent) -> Option<Arc<dyn ContextObject>> + Send + Sync>;

/// A named accessor with its declared return type.
#[derive(Clone)]
pub struct AccessorDef {
    pub name: &'static str,
    pub returns: TypeToken,
    pub func: AccessorFn,
}

impl std::fmt::Debug for AccessorDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessorDef")
            .field("name", &self.name)
            .field("returns", &self.returns)
            .finish()
    }
}

/// Registered node: parents, capabilities, and accessor surface of one type.
#[derive(Debug)]
struct TypeNode {
    token: TypeToken,
    parents: SmallVec<[TypeToken; 2]>,
    cancellable: bool,
    accessors: Vec<AccessorDef>,
}

/// The process-wide event/value type lattice.
///
/// Registration happens during startup (before any dispatcher or activation
/// registry is built over it); afterwards the lattice is read-only.
pub struct EventLattice {
    nodes: DashMap<TypeId, Arc<TypeNode>>,
    /// Memoized reflexive-transitive supertype closures, in BFS order with
    /// the type itself first. Kept as a Vec: closures are small and the
    /// resolver needs a deterministic iteration order.
    closures: DashMap<TypeId, Arc<Vec<TypeId>>>,
}

impl EventLattice {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
            closures: DashMap::new(),
        }
    }

    /// Starts registering a type. Parents, capabilities and accessors are
    /// added on the returned builder; nothing is recorded until `finish`.
    pub fn register<T: ?Sized + 'static>(&self) -> TypeRegistration<'_> {
        TypeRegistration {
            lattice: self,
            node: TypeNode {
                token: TypeToken::of::<T>(),
                parents: SmallVec::new(),
                cancellable: false,
                accessors: Vec::new(),
            },
        }
    }

    /// True if the token has been registered.
    pub fn contains(&self, token: TypeToken) -> bool {
        self.nodes.contains_key(&token.id)
    }

    /// True if the registered type carries the cancellation capability,
    /// either directly or through any ancestor.
    pub fn is_cancellable(&self, token: TypeToken) -> bool {
        match self.supertype_closure(token) {
            Some(closure) => closure.iter().any(|id| {
                self.nodes
                    .get(id)
                    .map(|n| n.cancellable)
                    .unwrap_or(false)
            }),
            None => false,
        }
    }

    /// Reflexive-transitive supertype closure of a registered type, the type
    /// itself first, ancestors in BFS order. `None` for unregistered types.
    pub fn supertype_closure(&self, token: TypeToken) -> Option<Arc<Vec<TypeId>>> {
        if let Some(cached) = self.closures.get(&token.id) {
            return Some(cached.clone());
        }
        if !self.nodes.contains_key(&token.id) {
            return None;
        }

        let mut closure: Vec<TypeId> = Vec::new();
        let mut queue: SmallVec<[TypeId; 8]> = SmallVec::new();
        queue.push(token.id);
        while let Some(id) = queue.pop() {
            if closure.contains(&id) {
                continue;
            }
            closure.push(id);
            if let Some(node) = self.nodes.get(&id) {
                // Parents are registered before children, so the walk always
                // terminates.
                for parent in node.parents.iter() {
                    queue.insert(0, parent.id);
                }
            }
        }

        let closure = Arc::new(closure);
        self.closures.insert(token.id, closure.clone());
        Some(closure)
    }

    /// True if a value tagged `from` satisfies a parameter declared as `to`:
    /// either the tokens are identical, or `to` appears in `from`'s
    /// registered supertype closure. Unregistered types only match exactly.
    pub fn is_assignable(&self, from: TypeToken, to: TypeToken) -> bool {
        if from.id == to.id {
            return true;
        }
        match self.supertype_closure(from) {
            Some(closure) => closure.contains(&to.id),
            None => false,
        }
    }

    /// All accessors visible on a type: its own first, then inherited ones in
    /// ancestor BFS order. Deterministic, so ambiguity detection is stable.
    pub fn accessors_for(&self, token: TypeToken) -> Vec<AccessorDef> {
        let mut result = Vec::new();
        let Some(closure) = self.supertype_closure(token) else {
            return result;
        };
        for id in closure.iter() {
            if let Some(node) = self.nodes.get(id) {
                for acc in &node.accessors {
                    // An accessor shadowed by name in a subtype wins
                    if !result.iter().any(|a: &AccessorDef| a.name == acc.name) {
                        result.push(acc.clone());
                    }
                }
            }
        }
        result
    }

    /// Every registered type token, in no particular order. The activation
    /// registry snapshots this as its fixed tracked-flag table.
    pub fn registered_types(&self) -> Vec<TypeToken> {
        self.nodes.iter().map(|entry| entry.value().token).collect()
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for EventLattice {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLattice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLattice")
            .field("types", &self.nodes.len())
            .finish()
    }
}

/// Builder for one lattice node.
pub struct TypeRegistration<'a> {
    lattice: &'a EventLattice,
    node: TypeNode,
}

impl<'a> TypeRegistration<'a> {
    /// Declares a supertype. The parent must already be registered.
    pub fn parent<P: ?Sized + 'static>(mut self) -> Self {
        self.node.parents.push(TypeToken::of::<P>());
        self
    }

    /// Marks the type as carrying the cancellation capability.
    pub fn cancellable(mut self) -> Self {
        self.node.cancellable = true;
        self
    }

    /// Registers a zero-argument accessor with an explicit return token.
    ///
    /// The declared return token may be a subtype of what listeners ask for;
    /// the resolver honours that covariance when binding getter parameters.
    pub fn accessor<F>(mut self, name: &'static str, returns: TypeToken, func: F) -> Self
    where
        F: Fn(&dyn GameEvent) -> Option<Arc<dyn ContextObject>> + Send + Sync + 'static,
    {
        self.node.accessors.push(AccessorDef {
            name,
            returns,
            func: Arc::new(func),
        });
        self
    }

    /// Accessor convenience where the return token is just `R`.
    pub fn accessor_of<R, F>(self, name: &'static str, func: F) -> Self
    where
        R: ContextObject,
        F: Fn(&dyn GameEvent) -> Option<Arc<dyn ContextObject>> + Send + Sync + 'static,
    {
        self.accessor(name, TypeToken::of::<R>(), func)
    }

    /// Records the node, failing on duplicates or unregistered parents.
    pub fn finish(self) -> Result<TypeToken, FilterError> {
        let token = self.node.token;
        if self.lattice.nodes.contains_key(&token.id) {
            return Err(FilterError::DuplicateType(token.name));
        }
        for parent in self.node.parents.iter() {
            if !self.lattice.nodes.contains_key(&parent.id) {
                return Err(FilterError::UnknownType(parent.name));
            }
        }
        debug!(
            "Registered lattice type {} ({} parents, cancellable: {})",
            token.name,
            self.node.parents.len(),
            self.node.cancellable
        );
        self.lattice.nodes.insert(token.id, Arc::new(self.node));
        Ok(token)
    }
}
