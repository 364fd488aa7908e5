//! External collaborator seams.
//!
//! The engine performs no parsing, verification, collection or stack walking
//! itself; those capabilities are consumed through the traits below. Tests
//! and embedders supply implementations; [`HeapGc`], [`TokenComparator`] and
//! [`NullSink`] are the in-crate defaults for the collaborators whose model
//! lives entirely inside this crate.

use std::collections::HashSet;

use crate::{
    runtime::{
        heap::{Heap, ObjRef, ObjectBody},
        registry::ClassRegistry,
        version::{ClassId, ClassVersion, FieldType, MethodDef, MethodSlot},
    },
    Result,
};

/// Opaque replacement class-file bytes, produced by the debugger front end
/// and consumed only by the [`ClassLoader`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementBytes(Vec<u8>);

impl ReplacementBytes {
    /// Wraps raw class-file bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        ReplacementBytes(bytes)
    }

    /// The raw bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Whether the buffer is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One entry of a redefinition request: an existing class identity plus the
/// replacement class-file bytes.
#[derive(Debug)]
pub struct RedefinitionRequest {
    /// Identity of the class to redefine
    pub target: ClassId,
    /// Replacement class-file buffer
    pub bytes: ReplacementBytes,
}

/// Class-file loader and verifier.
///
/// Loading a replacement may recursively trigger ordinary class loading,
/// which can allocate and block; the coordinator therefore only calls into
/// this trait before the safepoint.
pub trait ClassLoader {
    /// Parses replacement bytes into a candidate version for `old`.
    ///
    /// The candidate must carry `old`'s identity; generation and lifecycle
    /// state are assigned by the coordinator.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ParseFailure`] mapped through [`crate::Error`] on
    /// malformed input, or [`crate::Error::OutOfMemory`].
    fn parse(
        &self,
        old: &ClassVersion,
        bytes: &ReplacementBytes,
        registry: &ClassRegistry,
    ) -> Result<ClassVersion>;

    /// Reconstitutes the class-file bytes of a class that is only
    /// indirectly affected, so it can be re-parsed against the new
    /// hierarchy.
    ///
    /// # Errors
    ///
    /// Returns an error if the current definition cannot be reconstituted.
    fn reconstitute(&self, current: &ClassVersion) -> Result<ReplacementBytes>;

    /// Verifies a candidate version.
    ///
    /// # Errors
    ///
    /// Returns [`crate::ParseFailure::VerificationFailed`] mapped through
    /// [`crate::Error`] when bytecode verification rejects the candidate.
    fn verify(&self, candidate: &ClassVersion) -> Result<()>;
}

/// The two collector capabilities the migrator consumes: whole-heap object
/// iteration and the relocate-and-fixup pass for grown instances.
pub trait GcDelegate {
    /// Visits every live object exactly once.
    fn for_each_live_object(&self, heap: &Heap, visit: &mut dyn FnMut(ObjRef));

    /// Relocates every object in `grown` into storage sized for its newest
    /// class version, applying the pending migration program, then fixes up
    /// the root set.
    fn relocate_and_fixup_roots(&self, heap: &Heap, grown: &[ObjRef], registry: &ClassRegistry);
}

/// Scans parked mutator stacks for methods whose owning versions must stay
/// alive through the migration pass.
pub trait StackScanner {
    /// Every (class, slot) pair currently reachable from a parked frame.
    fn pin_reachable_methods(&self) -> HashSet<(ClassId, MethodSlot)>;
}

/// Decides whether two method bodies are behaviorally equivalent modulo
/// constant-pool indices.
pub trait BodyComparator {
    /// True when in-flight calls may keep running the old body under the
    /// same stable slot.
    fn equivalent(&self, old: &MethodDef, new: &MethodDef) -> bool;
}

/// Notification sink informed which classes were redefined on success.
pub trait RedefinitionSink {
    /// Called once per committed transaction with the affected identities.
    fn classes_redefined(&self, classes: &[ClassId]);
}

/// Default collector delegate backed by the in-crate [`Heap`].
#[derive(Debug, Default)]
pub struct HeapGc;

impl GcDelegate for HeapGc {
    fn for_each_live_object(&self, heap: &Heap, visit: &mut dyn FnMut(ObjRef)) {
        heap.for_each_object(|obj| visit(obj));
    }

    fn relocate_and_fixup_roots(&self, heap: &Heap, grown: &[ObjRef], registry: &ClassRegistry) {
        for &obj in grown {
            let class = heap.with_object(obj, |o| o.class);
            let Some(newest) = registry.newest(class) else {
                continue;
            };
            let Some(program) = newest.migration() else {
                continue;
            };

            let old_data = heap.with_object(obj, |o| match &o.body {
                ObjectBody::Instance { data, .. } => data.clone(),
                _ => Vec::new(),
            });
            let new_data = program.apply_staged(&old_data, newest.instance_size);
            let ref_offsets: Vec<u32> = newest
                .fields
                .iter()
                .filter(|f| !f.is_static && f.ty == FieldType::Reference)
                .map(|f| f.offset)
                .collect();

            heap.with_object_mut(obj, |o| {
                o.generation = newest.generation;
                o.body = ObjectBody::Instance {
                    data: new_data,
                    ref_offsets,
                };
            });
        }

        // Identity is index-based, so relocation does not move references;
        // the fixup pass is still driven for barrier-state completeness.
        heap.rewrite_roots(&mut |_| None);
    }
}

/// Default body comparator: bodies are equivalent when their tokens match.
///
/// Real embedders compare bytecode streams modulo constant-pool indices;
/// the token models the outcome of that comparison.
#[derive(Debug, Default)]
pub struct TokenComparator;

impl BodyComparator for TokenComparator {
    fn equivalent(&self, old: &MethodDef, new: &MethodDef) -> bool {
        old.body_token == new.body_token
    }
}

/// Sink that discards notifications.
#[derive(Debug, Default)]
pub struct NullSink;

impl RedefinitionSink for NullSink {
    fn classes_redefined(&self, classes: &[ClassId]) {
        tracing::trace!(count = classes.len(), "redefinition committed");
    }
}
