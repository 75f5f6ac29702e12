//! # Relationships
//!
//! Edge tables (friendships and the like) that predicates consult through
//! existence checks, and the storage boundary edges are loaded from.

pub mod index;
pub mod source;

pub use index::{Edge, RelationLookup, RelationshipIndex};
pub use source::{MemoryRelationshipSource, RelationshipSource};
