//! Post-commit link repair.
//!
//! After the heap pass has installed new versions, every loaded class - not
//! only the affected set - may hold resolved constants that name superseded
//! generations, and call sites may have been rewritten to quickened forms
//! that assume the old resolution. Repair is wholesale: resolved class
//! entries are redirected to the newest generation, resolved member entries
//! are dropped so the next use re-resolves against the new version, and
//! interface single-implementor hints are refreshed.
//!
//! This phase runs inside the safepoint after the point of no return, so it
//! cannot fail recoverably. A cache entry naming an unloaded class is an
//! engine invariant violation and panics.

use crate::runtime::{heap::Safepoint, registry::ClassRegistry};

/// Repairs resolution state across every loaded class.
pub fn repair_links(registry: &ClassRegistry, _safepoint: &Safepoint) {
    let mut repaired = 0usize;
    registry.for_each_lineage(|lineage| {
        lineage.with_cache(|cache| {
            for entry in &mut cache.classes {
                let newest = registry
                    .newest(entry.0)
                    .unwrap_or_else(|| panic!("resolved class {} not loaded", entry.0));
                entry.1 = newest.generation;
            }
            // Dropping the entry both forgets the stale resolution and
            // reverts any quickened call-site form derived from it.
            for member in &mut cache.members {
                *member = None;
            }
        });

        if let Some((implementor, _)) = lineage.implementor_hint() {
            let newest = registry
                .newest(implementor)
                .unwrap_or_else(|| panic!("implementor {implementor} not loaded"));
            lineage.set_implementor_hint(Some((implementor, newest.generation)));
        }
        repaired += 1;
    });
    tracing::debug!(lineages = repaired, "link repair complete");
}
