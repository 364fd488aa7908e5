//! Safepoint-bound heap migration.
//!
//! Everything in this module runs past the point of no return: the
//! transaction has committed to its candidates, every mutator is parked,
//! and no step may fail recoverably. Integrity violations panic.
//!
//! The pass over the heap is single: each live object is visited once and
//! all three concerns (mirror forwarding, member-handle re-resolution,
//! instance data migration) are handled in that one visit. Objects whose
//! storage must grow are deferred to one extra relocation pass supplied by
//! the collector.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{
    redefine::session::RedefineSession,
    runtime::{
        collaborators::{GcDelegate, StackScanner},
        heap::{Barrier, Heap, MemberKind, ObjRef, ObjectBody, ResolvedTarget, Safepoint},
        version::{ClassId, ClassVersion, FieldType, VersionState},
    },
};

/// Runs the heap migration for every remaining candidate in the session.
///
/// The `Safepoint` witness is demanded by reference so the caller keeps the
/// stop-the-world window open across migration and link repair.
pub fn migrate_heap(
    session: &mut RedefineSession<'_>,
    _safepoint: &Safepoint,
    gc: &dyn GcDelegate,
    scanner: &dyn StackScanner,
) {
    session.set_pinned(scanner.pin_reachable_methods());

    let candidates = session.remaining_candidates();
    let pairs: Vec<(Arc<ClassVersion>, Arc<ClassVersion>)> = candidates
        .iter()
        .filter_map(|new| previous_version(session, new).map(|old| (old, new.clone())))
        .collect();

    // Mirror forwarding map: every reference to an old mirror is redirected
    // to the candidate's mirror.
    let mut forward: HashMap<ObjRef, ObjRef> = HashMap::new();
    for (old, new) in &pairs {
        if let (Some(from), Some(to)) = (old.mirror(), new.mirror()) {
            forward.insert(from, to);
        }
    }

    let heap = session.heap;
    let mut grown: Vec<ObjRef> = Vec::new();

    gc.for_each_live_object(heap, &mut |obj| {
        let (class, is_instance) = heap.with_object(obj, |o| {
            (o.class, matches!(o.body, ObjectBody::Instance { .. }))
        });

        retag_non_instance(session, heap, obj);

        if is_instance {
            // Reference fields first so migrated data is not re-read.
            heap.rewrite_object_references(obj, Barrier::Record, &mut |r| {
                forward.get(&r).copied()
            });
            if let Some(new) = session.candidate(class) {
                if !migrate_instance(heap, obj, &new) {
                    grown.push(obj);
                }
            }
        }
    });

    for obj in grown {
        session.defer_grown(obj);
    }
    if !session.grown().is_empty() {
        tracing::debug!(
            count = session.grown().len(),
            "relocating grown instances"
        );
        gc.relocate_and_fixup_roots(heap, session.grown(), session.registry);
    }

    // Root slots referencing old mirrors are raw stores; no mutator-visible
    // holder exists to remember.
    heap.rewrite_roots(&mut |r| forward.get(&r).copied());

    for (old, new) in &pairs {
        finalize_pair(session, old, new);
    }
}

/// The version a candidate supersedes.
fn previous_version(
    session: &RedefineSession<'_>,
    candidate: &ClassVersion,
) -> Option<Arc<ClassVersion>> {
    let lineage = session.registry.lineage(candidate.id)?;
    let prior = candidate.generation.0.checked_sub(1)?;
    lineage.version(crate::runtime::version::Generation(prior))
}

/// Applies the pending migration program to one instance in place.
///
/// Returns false when the instance must grow, leaving it untouched for the
/// relocation pass.
fn migrate_instance(heap: &Heap, obj: ObjRef, new: &ClassVersion) -> bool {
    let Some(program) = new.migration() else {
        // Method-only change: the shape is identical, only the tag moves.
        heap.with_object_mut(obj, |o| o.generation = new.generation);
        return true;
    };

    let fits = heap.with_object(obj, |o| match &o.body {
        ObjectBody::Instance { data, .. } => new.instance_size as usize <= data.len(),
        _ => true,
    });
    if !fits {
        return false;
    }

    let ref_offsets: Vec<u32> = new
        .fields
        .iter()
        .filter(|f| !f.is_static && f.ty == FieldType::Reference)
        .map(|f| f.offset)
        .collect();

    heap.with_object_mut(obj, |o| {
        if let ObjectBody::Instance { data, ref_offsets: offsets } = &mut o.body {
            if new.copies_backwards() {
                // Self-overlapping program: stage through a fresh buffer.
                *data = program.apply_staged(data, new.instance_size);
            } else {
                program.apply_in_place(data, new.instance_size);
            }
            *offsets = ref_offsets;
        }
        o.generation = new.generation;
    });
    true
}

/// Retags mirrors and re-resolves member handles of redefined classes.
fn retag_non_instance(session: &RedefineSession<'_>, heap: &Heap, obj: ObjRef) {
    enum Action {
        None,
        Retag(ClassId),
        Reresolve {
            owner: ClassId,
            name: String,
            signature: String,
            kind: MemberKind,
        },
    }

    let action = heap.with_object(obj, |o| match &o.body {
        ObjectBody::Mirror { of, .. } if session.candidate(*of).is_some() => Action::Retag(*of),
        ObjectBody::MemberHandle {
            owner,
            name,
            signature,
            kind,
            ..
        } if session.candidate(*owner).is_some() => Action::Reresolve {
            owner: *owner,
            name: name.clone(),
            signature: signature.clone(),
            kind: *kind,
        },
        _ => Action::None,
    });

    match action {
        Action::None => {}
        Action::Retag(of) => {
            let new = session.candidate(of).expect("candidate vanished mid-pass");
            heap.with_object_mut(obj, |o| {
                o.generation = new.generation;
                if let ObjectBody::Mirror { of_generation, .. } = &mut o.body {
                    *of_generation = new.generation;
                }
            });
        }
        Action::Reresolve {
            owner,
            name,
            signature,
            kind,
        } => {
            let new = session
                .candidate(owner)
                .expect("candidate vanished mid-pass");
            let target = match kind {
                MemberKind::Method => new
                    .find_method(&name, &signature)
                    .filter(|m| !m.is_deleted())
                    .map(|m| ResolvedTarget::Method(new.generation, m.slot())),
                MemberKind::Field => new
                    .fields
                    .iter()
                    .find(|f| f.name == name && f.ty.descriptor() == signature)
                    .map(|f| ResolvedTarget::Field(new.generation, f.offset)),
            };
            if target.is_none() {
                tracing::debug!(class = %owner, member = %name, "member handle target gone");
            }
            heap.with_object_mut(obj, |o| {
                o.generation = new.generation;
                if let ObjectBody::MemberHandle { resolved, .. } = &mut o.body {
                    *resolved = target;
                }
            });
        }
    }
}

/// Post-pass per-class finalization: identity swap, static transfer, method
/// marks, lifecycle transitions.
fn finalize_pair(session: &RedefineSession<'_>, old: &ClassVersion, new: &ClassVersion) {
    new.swap_identity_token(old);
    transfer_statics(old, new);
    new.set_initialized(old.is_initialized());

    if let Some(changes) = session.method_changes(new.id) {
        for &slot in &changes.obsolete {
            if let Some(method) = old.method_with_slot(slot) {
                method.mark_obsolete();
            }
        }
        for &slot in &changes.deleted {
            if let Some(method) = old.method_with_slot(slot) {
                method.mark_deleted();
            }
        }
    }

    new.clear_migration();
    new.set_state(VersionState::Linked);
    if session.is_pinned(old.id) {
        tracing::debug!(class = %old.id, "old version pinned by parked frames");
    } else {
        old.set_state(VersionState::Retired);
    }
}

/// Copies every static field that survives the redefinition by (name, type)
/// into the candidate's default-initialized static storage. Dropped statics
/// vanish; added statics keep their default value.
fn transfer_statics(old: &ClassVersion, new: &ClassVersion) {
    for field in new.fields.iter().filter(|f| f.is_static) {
        if let Some(prior) = old.find_field(&field.name, field.ty, true) {
            let bytes = old.static_bytes(prior.offset, prior.ty.width());
            new.write_static_bytes(field.offset, &bytes);
        }
    }
}
