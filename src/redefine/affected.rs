//! Affected-class computation and topological ordering.
//!
//! A redefinition of one class impacts every loaded class whose correctness
//! depends on it: all descendants and all implementors, transitively. The
//! finder marks the explicitly requested classes, runs the hierarchy scan to
//! a fixed point (interface webs can require more than one pass), then
//! orders the set so each class's supertype and interfaces precede it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    redefine::session::RedefineSession,
    runtime::{
        flags::RedefinitionFlags,
        version::{ClassId, ClassVersion},
    },
    Error, Result,
};

/// Computes the topologically sorted affected set for the session's
/// transaction.
///
/// `requested` is the explicit request order; `parsed` holds the pre-parsed
/// candidate versions of the requested classes so dependency edges reflect
/// the *new* hierarchy where one exists.
///
/// # Errors
///
/// Returns [`Error::CircularClassDefinition`] if the set cannot be
/// topologically ordered - a defensive check, since well-formed loaded
/// hierarchies cannot cycle.
pub fn find_sorted_affected(
    session: &RedefineSession<'_>,
    requested: &[ClassId],
    parsed: &HashMap<ClassId, Arc<ClassVersion>>,
) -> Result<Vec<ClassId>> {
    let mut affected: Vec<ClassId> = Vec::new();
    let mut member: HashSet<ClassId> = HashSet::new();

    for &id in requested {
        if let Some(newest) = session.registry.newest(id) {
            newest.union_flags(RedefinitionFlags::MARKED_AS_AFFECTED);
        }
        affected.push(id);
        member.insert(id);
    }

    // Fixed point: a class is affected when its direct supertype or any of
    // its transitive interfaces is already affected.
    loop {
        let mut discovered: Vec<ClassId> = Vec::new();
        session.registry.for_each_lineage(|lineage| {
            let id = lineage.id();
            if member.contains(&id) {
                return;
            }
            let newest = lineage.newest();
            let hit = newest
                .super_id
                .map(|s| member.contains(&s))
                .unwrap_or(false)
                || newest.interfaces.iter().any(|i| member.contains(i));
            if hit {
                discovered.push(id);
            }
        });
        if discovered.is_empty() {
            break;
        }
        discovered.sort();
        for id in discovered {
            if let Some(newest) = session.registry.newest(id) {
                newest.union_flags(RedefinitionFlags::MARKED_AS_AFFECTED);
                tracing::trace!(class = %id, name = %newest.name, "found affected class");
            }
            affected.push(id);
            member.insert(id);
        }
    }

    let sorted = topological_sort(session, &affected, &member, parsed);

    // The transient mark has served its purpose regardless of the outcome.
    for &id in &affected {
        if let Some(newest) = session.registry.newest(id) {
            newest.clear_affected_mark();
        }
    }

    sorted
}

/// Orders `affected` so that for any pair (A, B) where A is an ancestor of
/// B, A precedes B. Dependency edges of explicitly requested classes come
/// from their parsed candidates; everything else uses its current newest
/// version.
fn topological_sort(
    session: &RedefineSession<'_>,
    affected: &[ClassId],
    member: &HashSet<ClassId>,
    parsed: &HashMap<ClassId, Arc<ClassVersion>>,
) -> Result<Vec<ClassId>> {
    let dependencies_of = |id: ClassId| -> Vec<ClassId> {
        let version = parsed
            .get(&id)
            .cloned()
            .or_else(|| session.registry.newest(id));
        let Some(version) = version else {
            return Vec::new();
        };
        let mut deps: Vec<ClassId> = Vec::new();
        if let Some(super_id) = version.super_id {
            if member.contains(&super_id) {
                deps.push(super_id);
            }
        }
        for &iface in &version.interfaces {
            if member.contains(&iface) && !deps.contains(&iface) {
                deps.push(iface);
            }
        }
        deps
    };

    let mut order: Vec<ClassId> = Vec::new();
    let mut placed: HashSet<ClassId> = HashSet::new();
    let mut unplaced: Vec<ClassId> = affected.to_vec();

    while !unplaced.is_empty() {
        let mut ready: Vec<ClassId> = unplaced
            .iter()
            .copied()
            .filter(|&id| dependencies_of(id).iter().all(|d| placed.contains(d)))
            .collect();

        if ready.is_empty() {
            // Remaining classes but no emittable node: a cycle.
            return Err(Error::CircularClassDefinition);
        }

        ready.sort();
        for id in &ready {
            placed.insert(*id);
            order.push(*id);
        }
        unplaced.retain(|id| !placed.contains(id));
    }

    tracing::debug!(count = order.len(), "affected classes sorted");
    Ok(order)
}
