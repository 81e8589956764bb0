//! Reference resolution: descriptors, path walking, the reference-table
//! capability and the resolver itself.

mod descriptor;
mod path;
mod resolver;
mod table;

pub use descriptor::{default_descriptors, FieldDescriptor, RefTarget};
pub use path::FieldPath;
pub use resolver::{
    FailureReason, IdentifierPolicy, ReferenceResolver, Resolution, ResolutionFailure,
};
pub use table::{
    invalidate_category, invalidate_entity, CachedReferenceTable, PreviewTable, ReferenceTable,
};
