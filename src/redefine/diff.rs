//! Class-pair diffing: classifies the distance between a class's current
//! version and its replacement candidate as a [`RedefinitionFlags`] word.
//!
//! The diff also carries out the method merge: matched methods keep their
//! stable slot ids (swapping away any colliding loader-assigned slot),
//! additions receive fresh slots, and the slots of superseded or deleted
//! old methods are recorded so the migrator can mark them once the
//! transaction is past the point of no return. Nothing on the *old* version
//! is mutated here; everything the diff touches lives on the candidate and
//! is discarded wholesale on rollback.

use std::sync::Arc;

use crate::{
    redefine::session::RedefineSession,
    runtime::{
        collaborators::BodyComparator,
        flags::RedefinitionFlags,
        version::{ClassId, ClassVersion, MethodSlot, Visibility},
    },
    Error, Result,
};

/// Old-version method slots the migrator must mark during commit.
#[derive(Debug, Default, Clone)]
pub struct MethodChanges {
    /// Matched methods whose new body is not equivalent; old body stays
    /// callable to completion but new call sites must not resolve it
    pub obsolete: Vec<MethodSlot>,
    /// Methods with no counterpart in the candidate
    pub deleted: Vec<MethodSlot>,
}

impl MethodChanges {
    /// Whether the candidate changes no method at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.obsolete.is_empty() && self.deleted.is_empty()
    }
}

/// Result of diffing one (old, new) pair.
#[derive(Debug)]
pub struct DiffOutcome {
    /// Shape-change classification, ancestor flags already unioned in
    pub flags: RedefinitionFlags,
    /// Slots to mark on the old version at commit
    pub method_changes: MethodChanges,
}

/// Diffs `old` against its candidate `new`, classifying the change and
/// performing the slot merge on the candidate.
///
/// Ancestors must already have been diffed (topological order); their flags
/// are unioned into the result so a layout change high in the hierarchy
/// reshapes every descendant processed after it.
///
/// # Errors
///
/// Returns [`Error::UnsupportedHierarchyChange`] when the candidate drops a
/// supertype or interface the current version satisfies. Live instances
/// would stop satisfying is-instance-of, so the whole batch is rejected.
pub fn diff_class(
    session: &RedefineSession<'_>,
    old: &ClassVersion,
    new: &ClassVersion,
    comparator: &dyn BodyComparator,
) -> Result<DiffOutcome> {
    let mut flags = RedefinitionFlags::empty();

    diff_hierarchy(session, old, new, &mut flags)?;
    diff_fields(old, new, &mut flags);
    let method_changes = merge_methods(old, new, comparator, &mut flags);

    if old.instance_size != new.instance_size {
        flags |= RedefinitionFlags::MODIFY_INSTANCE_SIZE;
    }
    if old.static_size != new.static_size {
        flags |= RedefinitionFlags::MODIFY_CLASS_SIZE;
    }

    // Ancestor union. Candidates for ancestors were diffed earlier in the
    // transaction and carry their final flags.
    let mut ancestors: Vec<ClassId> = Vec::new();
    ancestors.extend(new.super_id);
    ancestors.extend(new.interfaces.iter().copied());
    for ancestor in ancestors {
        if let Some(candidate) = session.candidate(ancestor) {
            flags |= candidate.flags().shape_changes();
        }
    }

    if flags.is_unsupported() {
        // Reachable only through an ancestor's union; a direct removal has
        // already errored out of diff_hierarchy.
        return Err(Error::UnsupportedHierarchyChange {
            class: old.id,
            removed: old.super_id.unwrap_or(old.id),
        });
    }

    tracing::debug!(class = %old.id, name = %old.name, ?flags, "class diff complete");
    Ok(DiffOutcome {
        flags,
        method_changes,
    })
}

/// Walks both supertype chains and compares transitive interface sets.
fn diff_hierarchy(
    session: &RedefineSession<'_>,
    old: &ClassVersion,
    new: &ClassVersion,
    flags: &mut RedefinitionFlags,
) -> Result<()> {
    let old_chain = super_chain(session, old);
    let new_chain = super_chain(session, new);

    for ancestor in &old_chain {
        if !new_chain.contains(ancestor) {
            return Err(Error::UnsupportedHierarchyChange {
                class: old.id,
                removed: *ancestor,
            });
        }
    }
    if new_chain.iter().any(|a| !old_chain.contains(a)) {
        *flags |= RedefinitionFlags::MODIFY_CLASS | RedefinitionFlags::MODIFY_INSTANCES;
    }

    for iface in &old.interfaces {
        if !new.interfaces.contains(iface) {
            return Err(Error::UnsupportedHierarchyChange {
                class: old.id,
                removed: *iface,
            });
        }
    }
    if new.interfaces.iter().any(|i| !old.interfaces.contains(i)) {
        *flags |= RedefinitionFlags::MODIFY_CLASS;
    }

    Ok(())
}

/// The full supertype chain of `version`, nearest ancestor first. Links
/// resolve through in-transaction candidates so a candidate that changed
/// its own supertype contributes the new chain.
fn super_chain(session: &RedefineSession<'_>, version: &ClassVersion) -> Vec<ClassId> {
    let mut chain = Vec::new();
    let mut cursor = version.super_id;
    while let Some(ancestor) = cursor {
        if chain.contains(&ancestor) {
            break;
        }
        chain.push(ancestor);
        let resolved: Option<Arc<ClassVersion>> = session
            .candidate(ancestor)
            .or_else(|| session.registry.newest(ancestor));
        cursor = resolved.and_then(|v| v.super_id);
    }
    chain
}

/// Positional field comparison, instance and static sides separately.
fn diff_fields(old: &ClassVersion, new: &ClassVersion, flags: &mut RedefinitionFlags) {
    let instance = |v: &ClassVersion| -> Vec<_> {
        v.fields.iter().filter(|f| !f.is_static).cloned().collect()
    };
    let statics = |v: &ClassVersion| -> Vec<_> {
        v.fields.iter().filter(|f| f.is_static).cloned().collect()
    };

    if instance(old) != instance(new) {
        *flags |= RedefinitionFlags::MODIFY_INSTANCES;
    }
    if statics(old) != statics(new) {
        *flags |= RedefinitionFlags::MODIFY_CLASS;
    }
}

/// Merges the two (name, signature)-sorted method lists.
///
/// For each old method the same-name run of the candidate list is searched
/// forward for a signature match. Matched methods carry the old slot onto
/// the candidate; if another candidate method already holds that slot the
/// two swap, so slot ids stay unique without renumbering.
fn merge_methods(
    old: &ClassVersion,
    new: &ClassVersion,
    comparator: &dyn BodyComparator,
    flags: &mut RedefinitionFlags,
) -> MethodChanges {
    let mut changes = MethodChanges::default();
    let mut matched_new = vec![false; new.methods.len()];
    let mut next_free = old
        .next_method_slot()
        .0
        .max(new.next_method_slot().0);

    let mut ni = 0;
    for old_method in &old.methods {
        // Advance past candidate names that sort before the old name.
        while ni < new.methods.len() && new.methods[ni].name.as_str() < old_method.name.as_str() {
            ni += 1;
        }
        // Forward search across the same-name overload run.
        let mut found = None;
        let mut probe = ni;
        while probe < new.methods.len() && new.methods[probe].name == old_method.name {
            if !matched_new[probe] && new.methods[probe].signature == old_method.signature {
                found = Some(probe);
                break;
            }
            probe += 1;
        }

        match found {
            Some(index) => {
                matched_new[index] = true;
                let target = old_method.slot();
                let current = new.methods[index].slot();
                if current != target {
                    if let Some(collider) = new.method_with_slot(target) {
                        collider.set_slot(current);
                    }
                    new.methods[index].set_slot(target);
                }
                if !comparator.equivalent(old_method, &new.methods[index]) {
                    changes.obsolete.push(target);
                }
            }
            None => {
                changes.deleted.push(old_method.slot());
                if old_method.visibility != Visibility::Private {
                    *flags |= RedefinitionFlags::MODIFY_CLASS;
                }
            }
        }
    }

    for (index, method) in new.methods.iter().enumerate() {
        if matched_new[index] {
            continue;
        }
        method.set_slot(MethodSlot(next_free));
        next_free += 1;
        if method.visibility != Visibility::Private {
            *flags |= RedefinitionFlags::MODIFY_CLASS;
        }
    }

    changes
}
