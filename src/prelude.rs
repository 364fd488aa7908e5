//! # hotswap Prelude
//!
//! This module provides a convenient prelude for the most commonly used
//! types and traits of the crate. Import it to get quick access to the
//! essentials for driving and embedding class redefinition.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all redefinition operations
pub use crate::Error;

/// The result type used throughout the crate
pub use crate::Result;

/// Loader/verifier failure sub-codes
pub use crate::ParseFailure;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// Drives redefinition transactions to commit or rollback
pub use crate::redefine::coordinator::RedefineCoordinator;

/// Phase and outcome reporting for transactions
pub use crate::redefine::coordinator::{Phase, RedefinitionOutcome};

/// Per-transaction mutable state threaded through the engine
pub use crate::redefine::session::RedefineSession;

// ================================================================================================
// Class Model
// ================================================================================================

/// Stable identities and generations
pub use crate::runtime::version::{ClassId, Generation, MethodSlot};

/// Class shape metadata
pub use crate::runtime::version::{
    ClassKind, ClassVersion, FieldDef, FieldType, MethodDef, VersionState, Visibility,
};

/// Version chains and resolution caches
pub use crate::runtime::lineage::{Lineage, ResolutionCache, ResolvedMember};

/// The loaded-class registry
pub use crate::runtime::registry::ClassRegistry;

/// Diff classification flags
pub use crate::runtime::flags::RedefinitionFlags;

// ================================================================================================
// Heap Model
// ================================================================================================

/// The heap, its objects and the safepoint witness
pub use crate::runtime::heap::{
    Barrier, Heap, HeapObject, MemberKind, ObjRef, ObjectBody, ResolvedTarget, Safepoint,
};

// ================================================================================================
// Collaborator Seams
// ================================================================================================

/// Traits the embedder implements
pub use crate::runtime::collaborators::{
    BodyComparator, ClassLoader, GcDelegate, RedefinitionSink, StackScanner,
};

/// Request envelope and replacement bytes
pub use crate::runtime::collaborators::{RedefinitionRequest, ReplacementBytes};

/// In-crate default collaborators
pub use crate::runtime::collaborators::{HeapGc, NullSink, TokenComparator};

// ================================================================================================
// Migration Programs
// ================================================================================================

/// Field-migration planning output
pub use crate::redefine::layout::{LayoutPlan, MigrationProgram, MigrationRecord};
