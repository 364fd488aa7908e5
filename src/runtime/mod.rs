//! Runtime data model: class versions, lineages, the loaded-class registry,
//! the heap the migrator operates on, and the collaborator seams.
//!
//! # Key Components
//!
//! - [`version::ClassVersion`] - One generation of a class's shape
//! - [`lineage::Lineage`] - The ordered version chain of one identity
//! - [`registry::ClassRegistry`] - All currently loaded lineages
//! - [`heap::Heap`] - Live objects, reference visitor, safepoint witness
//! - [`flags::RedefinitionFlags`] - Diff result bitset
//! - [`collaborators`] - Loader, verifier, GC, stack scanner, comparator seams

pub mod collaborators;
pub mod flags;
pub mod heap;
pub mod lineage;
pub mod registry;
pub mod version;
