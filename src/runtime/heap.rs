//! Minimal heap model the migrator operates on.
//!
//! The heap owns every live allocation and exposes exactly the two
//! capabilities the redefinition engine consumes from the collector: visit
//! every object, and visit/rewrite every reference field. The same reference
//! visitor backs both the class-identity forwarding step and the root-scan
//! fixup, so heap traversal logic exists once.
//!
//! Objects are addressed by stable [`ObjRef`] indices, never by raw
//! pointers; growing an object's storage during relocation does not change
//! its identity.

use std::collections::HashSet;
use std::fmt;
use std::sync::RwLock;

use crate::runtime::version::{ClassId, ClassVersion, FieldType, Generation, MethodSlot};

/// Index-based reference to a heap object. `ObjRef::NULL` is the null
/// reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjRef(pub u32);

impl ObjRef {
    /// The null reference.
    pub const NULL: ObjRef = ObjRef(0);

    /// Whether this is the null reference.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0 == 0
    }

    fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    fn from_index(index: usize) -> ObjRef {
        ObjRef(u32::try_from(index).expect("heap index overflow") + 1)
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "Obj(null)")
        } else {
            write!(f, "Obj(#{})", self.0)
        }
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Which kind of member a resolved indirection record points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// A method handle
    Method,
    /// A field handle
    Field,
}

/// Resolution state of a member handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTarget {
    /// Resolved to a method slot in a specific generation
    Method(Generation, MethodSlot),
    /// Resolved to a field offset in a specific generation
    Field(Generation, u32),
}

/// Payload of a heap object - the closed set of object kinds the migrator
/// handles exhaustively.
#[derive(Debug)]
pub enum ObjectBody {
    /// Ordinary instance: inline field storage plus the offsets of its
    /// reference-typed fields
    Instance {
        /// Raw non-header field bytes
        data: Vec<u8>,
        /// Offsets within `data` that hold [`ObjRef`] values
        ref_offsets: Vec<u32>,
    },
    /// Reflective mirror for one version of a class
    Mirror {
        /// Identity of the mirrored class
        of: ClassId,
        /// Generation the mirror currently represents
        of_generation: Generation,
    },
    /// Resolved method/field indirection record (member handle)
    MemberHandle {
        /// Class that declared the member
        owner: ClassId,
        /// Member name
        name: String,
        /// Member signature or type descriptor
        signature: String,
        /// Method or field handle
        kind: MemberKind,
        /// Current resolution, `None` once invalidated
        resolved: Option<ResolvedTarget>,
    },
}

/// A live allocation: a mutable class-identity tag plus inline storage.
#[derive(Debug)]
pub struct HeapObject {
    /// Identity of the object's class
    pub class: ClassId,
    /// Generation of the class this object was shaped by
    pub generation: Generation,
    /// Object payload
    pub body: ObjectBody,
}

/// Write-barrier discipline for reference rewriting.
///
/// Inside the safepoint the first mirror-forwarding store happens ahead of
/// normal barrier bookkeeping; stores on behalf of mutator-visible objects
/// must record the holder in the remembered set so card state stays correct.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    /// Record the holding object in the remembered set on change
    Record,
    /// Raw store, no bookkeeping (root scan)
    Skip,
}

/// Witness that every mutator thread is parked and the heap is quiescent.
///
/// The migrator and link repair demand a `&Safepoint`; constructing one is
/// the caller's assertion that no allocation, reference publication or
/// concurrent heap mutation can happen until it is dropped.
pub struct Safepoint {
    _priv: (),
}

impl Safepoint {
    /// Parks all mutators and enters the stop-the-world window.
    #[must_use]
    pub fn take() -> Safepoint {
        tracing::debug!("safepoint reached, mutators parked");
        Safepoint { _priv: () }
    }
}

impl Drop for Safepoint {
    fn drop(&mut self) {
        tracing::debug!("safepoint released, mutators resumed");
    }
}

/// The heap: an append-only store of [`HeapObject`]s plus a root set and a
/// remembered set for barrier bookkeeping.
#[derive(Default)]
pub struct Heap {
    objects: boxcar::Vec<RwLock<HeapObject>>,
    roots: RwLock<Vec<ObjRef>>,
    remembered: RwLock<HashSet<ObjRef>>,
}

impl Heap {
    /// Creates an empty heap.
    #[must_use]
    pub fn new() -> Self {
        Heap::default()
    }

    /// Allocates an instance of `class`, zero-initialized. Reference field
    /// offsets are captured from the class's non-static reference fields.
    #[must_use]
    pub fn alloc_instance(&self, class: &ClassVersion) -> ObjRef {
        let ref_offsets = class
            .fields
            .iter()
            .filter(|f| !f.is_static && f.ty == FieldType::Reference)
            .map(|f| f.offset)
            .collect();
        let index = self.objects.push(RwLock::new(HeapObject {
            class: class.id,
            generation: class.generation,
            body: ObjectBody::Instance {
                data: vec![0; class.instance_size as usize],
                ref_offsets,
            },
        }));
        ObjRef::from_index(index)
    }

    /// Allocates the reflective mirror for one class version.
    #[must_use]
    pub fn alloc_mirror(&self, of: ClassId, of_generation: Generation) -> ObjRef {
        let index = self.objects.push(RwLock::new(HeapObject {
            class: of,
            generation: of_generation,
            body: ObjectBody::Mirror { of, of_generation },
        }));
        ObjRef::from_index(index)
    }

    /// Allocates a resolved member handle.
    #[must_use]
    pub fn alloc_member_handle(
        &self,
        owner: ClassId,
        name: impl Into<String>,
        signature: impl Into<String>,
        kind: MemberKind,
        resolved: Option<ResolvedTarget>,
    ) -> ObjRef {
        let index = self.objects.push(RwLock::new(HeapObject {
            class: owner,
            generation: Generation::INITIAL,
            body: ObjectBody::MemberHandle {
                owner,
                name: name.into(),
                signature: signature.into(),
                kind,
                resolved,
            },
        }));
        ObjRef::from_index(index)
    }

    /// Number of allocated objects (nothing is ever deallocated here; the
    /// collector is out of scope).
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.count()
    }

    /// Whether the heap holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.count() == 0
    }

    /// Registers a GC root.
    pub fn add_root(&self, root: ObjRef) {
        write_lock!(self.roots).push(root);
    }

    /// Read access to one object.
    pub fn with_object<R>(&self, obj: ObjRef, f: impl FnOnce(&HeapObject) -> R) -> R {
        let slot = &self.objects[obj.index()];
        f(&read_lock!(slot))
    }

    /// Write access to one object.
    pub fn with_object_mut<R>(&self, obj: ObjRef, f: impl FnOnce(&mut HeapObject) -> R) -> R {
        let slot = &self.objects[obj.index()];
        f(&mut write_lock!(slot))
    }

    /// Visits every object index in allocation order.
    pub fn for_each_object(&self, mut f: impl FnMut(ObjRef)) {
        for (index, _) in self.objects.iter() {
            f(ObjRef::from_index(index));
        }
    }

    /// Reads raw field bytes from an instance.
    ///
    /// # Panics
    ///
    /// Panics if the object is not an instance or the range is out of
    /// bounds; both indicate a broken migration program.
    #[must_use]
    pub fn read_bytes(&self, obj: ObjRef, offset: u32, len: u32) -> Vec<u8> {
        self.with_object(obj, |o| match &o.body {
            ObjectBody::Instance { data, .. } => {
                data[offset as usize..(offset + len) as usize].to_vec()
            }
            _ => panic!("read_bytes on non-instance object {obj}"),
        })
    }

    /// Writes raw field bytes into an instance.
    pub fn write_bytes(&self, obj: ObjRef, offset: u32, bytes: &[u8]) {
        self.with_object_mut(obj, |o| match &mut o.body {
            ObjectBody::Instance { data, .. } => {
                data[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
            }
            _ => panic!("write_bytes on non-instance object {obj}"),
        });
    }

    /// Reads a 4-byte little-endian field.
    #[must_use]
    pub fn read_u32(&self, obj: ObjRef, offset: u32) -> u32 {
        let bytes = self.read_bytes(obj, offset, 4);
        u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
    }

    /// Writes a 4-byte little-endian field.
    pub fn write_u32(&self, obj: ObjRef, offset: u32, value: u32) {
        self.write_bytes(obj, offset, &value.to_le_bytes());
    }

    /// Reads an 8-byte little-endian field.
    #[must_use]
    pub fn read_u64(&self, obj: ObjRef, offset: u32) -> u64 {
        let bytes = self.read_bytes(obj, offset, 8);
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes);
        u64::from_le_bytes(raw)
    }

    /// Writes an 8-byte little-endian field.
    pub fn write_u64(&self, obj: ObjRef, offset: u32, value: u64) {
        self.write_bytes(obj, offset, &value.to_le_bytes());
    }

    /// Reads a reference field.
    #[must_use]
    pub fn read_ref(&self, obj: ObjRef, offset: u32) -> ObjRef {
        ObjRef(self.read_u32(obj, offset))
    }

    /// Writes a reference field through the barrier discipline.
    pub fn write_ref(&self, obj: ObjRef, offset: u32, value: ObjRef, barrier: Barrier) {
        self.write_u32(obj, offset, value.0);
        if barrier == Barrier::Record {
            write_lock!(self.remembered).insert(obj);
        }
    }

    /// Applies `rewrite` to every reference field of `obj`. Stores go
    /// through the given barrier discipline.
    ///
    /// This is the single reusable reference-visitor capability shared by
    /// class-identity forwarding and the general root scan.
    pub fn rewrite_object_references(
        &self,
        obj: ObjRef,
        barrier: Barrier,
        rewrite: &mut dyn FnMut(ObjRef) -> Option<ObjRef>,
    ) {
        let ref_offsets: Vec<u32> = self.with_object(obj, |o| match &o.body {
            ObjectBody::Instance { ref_offsets, .. } => ref_offsets.clone(),
            _ => Vec::new(),
        });
        for offset in ref_offsets {
            let current = self.read_ref(obj, offset);
            if current.is_null() {
                continue;
            }
            if let Some(next) = rewrite(current) {
                if next != current {
                    self.write_ref(obj, offset, next, barrier);
                }
            }
        }
    }

    /// Applies `rewrite` to every root slot. Root stores bypass the barrier.
    pub fn rewrite_roots(&self, rewrite: &mut dyn FnMut(ObjRef) -> Option<ObjRef>) {
        let mut roots = write_lock!(self.roots);
        for slot in roots.iter_mut() {
            if slot.is_null() {
                continue;
            }
            if let Some(next) = rewrite(*slot) {
                *slot = next;
            }
        }
    }

    /// Snapshot of the current root set.
    #[must_use]
    pub fn roots(&self) -> Vec<ObjRef> {
        read_lock!(self.roots).clone()
    }

    /// Snapshot of the remembered set accumulated by barrier-recorded
    /// stores.
    #[must_use]
    pub fn remembered_set(&self) -> HashSet<ObjRef> {
        read_lock!(self.remembered).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::version::{ClassKind, FieldDef};

    fn class_with_ref_field() -> ClassVersion {
        ClassVersion::new(
            ClassId(7),
            Generation::INITIAL,
            ClassKind::Instance,
            "Holder",
            vec![
                FieldDef {
                    name: "value".into(),
                    ty: FieldType::Int,
                    offset: 0,
                    is_static: false,
                },
                FieldDef {
                    name: "next".into(),
                    ty: FieldType::Reference,
                    offset: 4,
                    is_static: false,
                },
            ],
            vec![],
            None,
            vec![],
            8,
            0,
        )
    }

    #[test]
    fn instance_fields_round_trip() {
        let heap = Heap::new();
        let class = class_with_ref_field();
        let obj = heap.alloc_instance(&class);

        heap.write_u32(obj, 0, 0xDEAD_BEEF);
        assert_eq!(heap.read_u32(obj, 0), 0xDEAD_BEEF);
        assert!(heap.read_ref(obj, 4).is_null());
    }

    #[test]
    fn reference_rewrite_respects_barrier() {
        let heap = Heap::new();
        let class = class_with_ref_field();
        let a = heap.alloc_instance(&class);
        let b = heap.alloc_instance(&class);
        let c = heap.alloc_instance(&class);
        heap.write_ref(a, 4, b, Barrier::Skip);

        heap.rewrite_object_references(a, Barrier::Record, &mut |r| (r == b).then_some(c));
        assert_eq!(heap.read_ref(a, 4), c);
        assert!(heap.remembered_set().contains(&a));

        // Unchanged rewrites do not dirty the holder
        let heap2 = Heap::new();
        let x = heap2.alloc_instance(&class);
        let y = heap2.alloc_instance(&class);
        heap2.write_ref(x, 4, y, Barrier::Skip);
        heap2.rewrite_object_references(x, Barrier::Record, &mut |_| None);
        assert!(heap2.remembered_set().is_empty());
    }

    #[test]
    fn roots_are_rewritten_without_barrier() {
        let heap = Heap::new();
        let class = class_with_ref_field();
        let a = heap.alloc_instance(&class);
        let b = heap.alloc_instance(&class);
        heap.add_root(a);

        heap.rewrite_roots(&mut |r| (r == a).then_some(b));
        assert_eq!(heap.roots(), vec![b]);
        assert!(heap.remembered_set().is_empty());
    }
}
