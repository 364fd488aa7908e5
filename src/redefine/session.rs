//! Per-transaction bookkeeping.
//!
//! All mutable state of a redefinition transaction lives in one explicit
//! [`RedefineSession`] threaded through every component call - created at
//! transaction start, torn down at commit or rollback. There are no
//! process-wide singletons to reset after a failure.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    redefine::diff::MethodChanges,
    runtime::{
        flags::RedefinitionFlags,
        heap::{Heap, ObjRef},
        registry::ClassRegistry,
        version::{ClassId, ClassVersion, MethodSlot},
    },
};

/// Mutable state of one submit-to-commit/rollback cycle.
pub struct RedefineSession<'a> {
    /// The loaded-class registry the transaction runs against
    pub registry: &'a ClassRegistry,
    /// The heap the migration pass will walk
    pub heap: &'a Heap,

    affected: Vec<ClassId>,
    candidates: HashMap<ClassId, Arc<ClassVersion>>,
    checkpoints: Vec<(ClassId, usize)>,
    method_changes: HashMap<ClassId, MethodChanges>,
    max_flags: RedefinitionFlags,
    pinned: HashSet<(ClassId, MethodSlot)>,
    grown: Vec<ObjRef>,
}

impl<'a> RedefineSession<'a> {
    /// Opens a session for one transaction.
    #[must_use]
    pub fn begin(registry: &'a ClassRegistry, heap: &'a Heap) -> Self {
        RedefineSession {
            registry,
            heap,
            affected: Vec::new(),
            candidates: HashMap::new(),
            checkpoints: Vec::new(),
            method_changes: HashMap::new(),
            max_flags: RedefinitionFlags::empty(),
            pinned: HashSet::new(),
            grown: Vec::new(),
        }
    }

    /// Records the topologically ordered affected set.
    pub fn set_affected(&mut self, affected: Vec<ClassId>) {
        self.affected = affected;
    }

    /// The affected identities in topological order (ancestors first).
    #[must_use]
    pub fn affected(&self) -> &[ClassId] {
        &self.affected
    }

    /// Attaches a candidate to its lineage and remembers the rollback
    /// checkpoint.
    pub fn attach_candidate(&mut self, candidate: Arc<ClassVersion>) {
        let id = candidate.id;
        if let Some(lineage) = self.registry.lineage(id) {
            let checkpoint = lineage.append(candidate.clone());
            self.checkpoints.push((id, checkpoint));
        }
        self.candidates.insert(id, candidate);
    }

    /// The candidate version for `id`, if one was loaded this transaction.
    #[must_use]
    pub fn candidate(&self, id: ClassId) -> Option<Arc<ClassVersion>> {
        self.candidates.get(&id).cloned()
    }

    /// Withdraws a candidate whose diff proved it byte-identical: the
    /// lineage is truncated back immediately and the class drops out of the
    /// migration set.
    pub fn withdraw_candidate(&mut self, id: ClassId) {
        if let Some(position) = self.checkpoints.iter().position(|(c, _)| *c == id) {
            let (_, checkpoint) = self.checkpoints.remove(position);
            if let Some(lineage) = self.registry.lineage(id) {
                lineage.truncate(checkpoint);
            }
        }
        self.candidates.remove(&id);
        self.method_changes.remove(&id);
        self.affected.retain(|c| *c != id);
    }

    /// Stashes the diff's method-slot verdict for the migration pass.
    pub fn record_method_changes(&mut self, id: ClassId, changes: MethodChanges) {
        self.method_changes.insert(id, changes);
    }

    /// The recorded method changes for `id`, if any.
    #[must_use]
    pub fn method_changes(&self, id: ClassId) -> Option<&MethodChanges> {
        self.method_changes.get(&id)
    }

    /// The candidates that remain in the transaction, in affected order.
    #[must_use]
    pub fn remaining_candidates(&self) -> Vec<Arc<ClassVersion>> {
        self.affected
            .iter()
            .filter_map(|id| self.candidates.get(id).cloned())
            .collect()
    }

    /// Unions flags into the transaction-wide maximum.
    pub fn union_max_flags(&mut self, flags: RedefinitionFlags) {
        self.max_flags |= flags;
    }

    /// Union of every candidate's flags seen so far.
    #[must_use]
    pub fn max_flags(&self) -> RedefinitionFlags {
        self.max_flags
    }

    /// Records the stack-pinned method set for the migration pass.
    pub fn set_pinned(&mut self, pinned: HashSet<(ClassId, MethodSlot)>) {
        self.pinned = pinned;
    }

    /// Whether any method of `class` is pinned by a parked frame.
    #[must_use]
    pub fn is_pinned(&self, class: ClassId) -> bool {
        self.pinned.iter().any(|(c, _)| *c == class)
    }

    /// Defers a grown object to the relocation pass.
    pub fn defer_grown(&mut self, obj: ObjRef) {
        self.grown.push(obj);
    }

    /// Objects whose size change requires relocation.
    #[must_use]
    pub fn grown(&self) -> &[ObjRef] {
        &self.grown
    }

    /// Rolls the transaction back: every candidate appended this session is
    /// detached from its lineage and discarded, and transient affected
    /// marks are cleared. No heap mutation has occurred before the
    /// safepoint, so nothing else is required.
    pub fn rollback(&mut self) {
        tracing::info!(
            candidates = self.checkpoints.len(),
            "rolling back redefinition"
        );
        for (id, checkpoint) in self.checkpoints.drain(..) {
            if let Some(lineage) = self.registry.lineage(id) {
                lineage.truncate(checkpoint);
            }
        }
        self.candidates.clear();
        self.method_changes.clear();
        self.affected.clear();
        self.registry.for_each_lineage(|lineage| {
            lineage.newest().clear_affected_mark();
        });
    }
}
