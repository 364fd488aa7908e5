//! Global registry of loaded classes, keyed by stable [`ClassId`].

use std::sync::{
    atomic::{AtomicU32, Ordering},
    Arc,
};

use dashmap::DashMap;

use crate::{
    runtime::{
        lineage::Lineage,
        version::{ClassId, ClassVersion, VersionState},
    },
    Result,
};

/// The registry of every currently loaded class lineage.
///
/// Reads are lock-free per-shard via `DashMap`; the redefinition transaction
/// holds no global lock while scanning, matching the model in which version
/// installation happens under a safepoint and everything else only appends.
pub struct ClassRegistry {
    classes: DashMap<ClassId, Arc<Lineage>>,
    next_id: AtomicU32,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        ClassRegistry {
            classes: DashMap::new(),
            next_id: AtomicU32::new(1),
        }
    }

    /// Allocates a fresh stable identity for a first-time load.
    #[must_use]
    pub fn allocate_id(&self) -> ClassId {
        ClassId(self.next_id.fetch_add(1, Ordering::AcqRel))
    }

    /// Registers the first version of a class and returns its lineage.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if the identity is already
    /// registered.
    pub fn register(&self, version: Arc<ClassVersion>) -> Result<Arc<Lineage>> {
        let id = version.id;
        version.set_state(VersionState::Linked);
        let lineage = Arc::new(Lineage::new(version));
        if self.classes.insert(id, lineage.clone()).is_some() {
            return Err(internal_error!("class {id} registered twice"));
        }
        Ok(lineage)
    }

    /// The lineage for `id`, if loaded.
    #[must_use]
    pub fn lineage(&self, id: ClassId) -> Option<Arc<Lineage>> {
        self.classes.get(&id).map(|entry| entry.value().clone())
    }

    /// The newest version of `id`, if loaded.
    #[must_use]
    pub fn newest(&self, id: ClassId) -> Option<Arc<ClassVersion>> {
        self.lineage(id).map(|l| l.newest())
    }

    /// Number of loaded lineages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether no classes are loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Visits every loaded lineage. Iteration order is unspecified.
    pub fn for_each_lineage(&self, mut f: impl FnMut(&Arc<Lineage>)) {
        for entry in self.classes.iter() {
            f(entry.value());
        }
    }
}
