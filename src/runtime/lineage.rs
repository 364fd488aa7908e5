//! Version chains - the ordered history of one class identity.
//!
//! A [`Lineage`] owns every [`ClassVersion`] sharing one original identity,
//! oldest first. Links only run forward (a version is found through the
//! chain, never through a back-pointer on a newer version), which keeps the
//! version graph acyclic and lets superseded versions be reclaimed once
//! nothing executes their methods.

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc, RwLock,
};

use crate::runtime::version::{ClassId, ClassVersion, Generation, MethodSlot};

/// A resolved member constant cached by a class's resolution cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMember {
    /// Owner class of the resolved member
    pub owner: ClassId,
    /// Generation the entry was resolved against
    pub generation: Generation,
    /// Resolved method slot
    pub slot: MethodSlot,
    /// Whether the call site was rewritten to its quickened form
    pub quickened: bool,
}

/// Per-class cache of resolved constants (class references and member
/// call sites).
///
/// Link repair invalidates these wholesale after a commit: resolved class
/// entries are redirected to the newest generation and member entries are
/// cleared so the next use re-resolves.
#[derive(Debug, Default)]
pub struct ResolutionCache {
    /// Resolved class constants as (identity, generation) pairs
    pub classes: Vec<(ClassId, Generation)>,
    /// Resolved member constants, `None` when not yet (re-)resolved
    pub members: Vec<Option<ResolvedMember>>,
}

/// The ordered chain of [`ClassVersion`]s sharing one original identity.
///
/// Exactly one "newest" version exists at any time. Candidate versions are
/// appended while a redefinition transaction is loading; on rollback the
/// chain is truncated back to its pre-transaction length, so a failed batch
/// leaves no trace.
pub struct Lineage {
    id: ClassId,
    versions: RwLock<Vec<Arc<ClassVersion>>>,
    redefined_count: AtomicU32,
    resolution_cache: RwLock<ResolutionCache>,
    implementor_hint: RwLock<Option<(ClassId, Generation)>>,
}

impl Lineage {
    /// Creates a lineage from its first loaded version.
    #[must_use]
    pub fn new(first: Arc<ClassVersion>) -> Self {
        Lineage {
            id: first.id,
            versions: RwLock::new(vec![first]),
            redefined_count: AtomicU32::new(0),
            resolution_cache: RwLock::new(ResolutionCache::default()),
            implementor_hint: RwLock::new(None),
        }
    }

    /// Stable identity of this lineage.
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// The newest version - the one every new resolution observes.
    ///
    /// # Panics
    ///
    /// Panics if the lineage is empty, which the registry never allows.
    #[must_use]
    pub fn newest(&self) -> Arc<ClassVersion> {
        read_lock!(self.versions)
            .last()
            .cloned()
            .expect("lineage cannot be empty")
    }

    /// The version with the given generation, if still retained.
    #[must_use]
    pub fn version(&self, generation: Generation) -> Option<Arc<ClassVersion>> {
        read_lock!(self.versions)
            .iter()
            .find(|v| v.generation == generation)
            .cloned()
    }

    /// Number of versions currently chained.
    #[must_use]
    pub fn len(&self) -> usize {
        read_lock!(self.versions).len()
    }

    /// Whether the chain holds no versions. Always false for registered
    /// lineages; present for API completeness.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        read_lock!(self.versions).is_empty()
    }

    /// Appends a candidate version, returning the pre-append length as the
    /// rollback checkpoint.
    pub fn append(&self, version: Arc<ClassVersion>) -> usize {
        let mut versions = write_lock!(self.versions);
        let checkpoint = versions.len();
        versions.push(version);
        checkpoint
    }

    /// Discards every version appended after `checkpoint` (rollback).
    pub fn truncate(&self, checkpoint: usize) {
        write_lock!(self.versions).truncate(checkpoint);
    }

    /// How many redefinitions have committed against this identity.
    #[must_use]
    pub fn redefined_count(&self) -> u32 {
        self.redefined_count.load(Ordering::Acquire)
    }

    /// Bumps the redefinition counter at commit.
    pub fn increment_redefined_count(&self) {
        self.redefined_count.fetch_add(1, Ordering::AcqRel);
    }

    /// Mutable access to the resolution cache, for link repair and for the
    /// runtime's resolution paths.
    pub fn with_cache<R>(&self, f: impl FnOnce(&mut ResolutionCache) -> R) -> R {
        f(&mut write_lock!(self.resolution_cache))
    }

    /// The single-implementor hint for interface lineages, if any.
    #[must_use]
    pub fn implementor_hint(&self) -> Option<(ClassId, Generation)> {
        *read_lock!(self.implementor_hint)
    }

    /// Replaces the single-implementor hint.
    pub fn set_implementor_hint(&self, hint: Option<(ClassId, Generation)>) {
        *write_lock!(self.implementor_hint) = hint;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::version::ClassKind;

    fn version(id: u32, generation: u32) -> Arc<ClassVersion> {
        Arc::new(ClassVersion::new(
            ClassId(id),
            Generation(generation),
            ClassKind::Instance,
            "T",
            vec![],
            vec![],
            None,
            vec![],
            0,
            0,
        ))
    }

    #[test]
    fn newest_follows_appends() {
        let lineage = Lineage::new(version(1, 0));
        assert_eq!(lineage.newest().generation, Generation(0));

        let checkpoint = lineage.append(version(1, 1));
        assert_eq!(checkpoint, 1);
        assert_eq!(lineage.newest().generation, Generation(1));
        assert_eq!(lineage.len(), 2);
    }

    #[test]
    fn truncate_restores_pre_transaction_state() {
        let lineage = Lineage::new(version(1, 0));
        let checkpoint = lineage.append(version(1, 1));
        lineage.append(version(1, 2));
        lineage.truncate(checkpoint);
        assert_eq!(lineage.len(), 1);
        assert_eq!(lineage.newest().generation, Generation(0));
    }
}
