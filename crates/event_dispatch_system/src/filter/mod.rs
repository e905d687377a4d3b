//! The filter/extraction language
//!
//! A listener declares, through [`directive`]s, which events it wants and how
//! each extra parameter is pulled out of them. The [`resolver`] validates
//! those directives against the event lattice, the [`compiler`] turns the
//! result into a reusable pure pipeline, and the [`cache`] shares compiled
//! pipelines across registrations of the same captureless handler.

pub mod cache;
pub mod compiler;
pub mod directive;
pub mod resolver;

pub use cache::MethodCache;
pub use compiler::{CompiledFilter, ExtractedArgs, ExtractedValue};
pub use directive::{
    CancellationRequirement, FilterKind, ListenerDescriptor, Order, ParamDirective, SubtypeFilter,
};
pub use resolver::{resolve, ExtractionStep, ListenerSpec};
