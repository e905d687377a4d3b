//! Error types for the listener dispatch engine


/// Hard registration-time failures raised while resolving or compiling a
/// listener's filter directives.
///
/// These are never downgraded to an "always match" or "never match" filter:
/// a listener whose directives cannot be statically resolved against the
/// declared event and parameter types registers nothing at all.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    /// A type named by the descriptor is not registered in the event lattice
    #[error("Unknown type in listener descriptor: {0}")]
    UnknownType(&'static str),

    /// Cancellation requirement applied to an event type without the
    /// cancellation capability
    #[error("Cancellation requirement on non-cancellable event type: {0}")]
    NotCancellable(&'static str),

    /// Whole-event include directive present but empty
    #[error("Include directive on {0} names no subtypes; a present include set must name at least one")]
    EmptyIncludeSet(&'static str),

    /// No registered accessor satisfies a getter parameter
    #[error("No accessor on {event} is assignable to parameter type {param}")]
    NoSuchAccessor {
        event: &'static str,
        param: &'static str,
    },

    /// More than one registered accessor satisfies an unnamed getter parameter
    #[error("Ambiguous getter for parameter type {param} on {event}: both {first} and {second} are assignable")]
    AmbiguousAccessor {
        event: &'static str,
        param: &'static str,
        first: &'static str,
        second: &'static str,
    },

    /// A named accessor exists but its declared return type does not satisfy
    /// the parameter type
    #[error("Accessor '{accessor}' on {event} returns {returns}, which is not assignable to parameter type {param}")]
    AccessorNotAssignable {
        event: &'static str,
        accessor: &'static str,
        returns: &'static str,
        param: &'static str,
    },

    /// A data supports/has directive references an unusable earlier parameter
    #[error("Data directive on parameter {param} references parameter {referenced}: {reason}")]
    BadDataReference {
        param: usize,
        referenced: usize,
        reason: &'static str,
    },

    /// Event type registered twice in the lattice
    #[error("Type {0} is already registered in the event lattice")]
    DuplicateType(&'static str),
}

/// Failures produced by listener code during dispatch.
///
/// These are expected to happen in a live server and are isolated per
/// listener: one listener failing never prevents its siblings from running
/// and is reported through [`DispatchResult`](crate::dispatch::DispatchResult)
/// rather than raised to the caller of `raise`.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// Listener returned an error
    #[error("Listener failed: {0}")]
    ListenerFailed(String),

    /// Listener panicked; the panic was caught at the dispatch boundary
    #[error("Listener panicked: {0}")]
    ListenerPanicked(String),
}
