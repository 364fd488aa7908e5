//! Class shape metadata - one [`ClassVersion`] per generation of a loaded class.
//!
//! A class that has never been redefined has exactly one `ClassVersion`. Each
//! successful redefinition appends a new generation to the class's
//! [`crate::runtime::lineage::Lineage`] while the stable [`ClassId`] stays the
//! same, so every raw reference in the system can be expressed as
//! "id + generation" and migration becomes index redirection instead of
//! pointer surgery.

use std::fmt;
use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering},
    OnceLock, RwLock,
};

use crate::runtime::{flags::RedefinitionFlags, heap::ObjRef};

/// Stable identity of a class, shared by every version in its lineage.
///
/// Assigned once at first load and never reused. All cross-class references
/// inside the engine (supertypes, interfaces, resolution caches, heap object
/// class tags) are expressed through `ClassId` so that installing a new
/// version never requires rewriting them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Class(0x{:08X})", self.0)
    }
}

impl fmt::Debug for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Class(0x{:08X})", self.0)
    }
}

/// Generation counter within a lineage, starting at 0 for the first load.
///
/// Strictly increasing; there is never a new-to-old link, so version chains
/// cannot form reference cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Generation(pub u32);

impl Generation {
    /// The generation assigned at first load.
    pub const INITIAL: Generation = Generation(0);

    /// The generation following this one.
    #[must_use]
    pub fn next(self) -> Generation {
        Generation(self.0 + 1)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen{}", self.0)
    }
}

/// Stable slot id of a method, preserved across matched redefinitions.
///
/// Identity handles (debugger method ids, member handles) reference methods
/// by slot; the diff keeps slots stable for matched methods and assigns fresh
/// slots to additions so those handles stay valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MethodSlot(pub u32);

impl fmt::Display for MethodSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Closed set of class kinds the migrator has to handle.
///
/// Kept as a small tagged variant set with exhaustive matching instead of
/// dispatching across specialized subclasses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassKind {
    /// Ordinary instance class
    Instance,
    /// Interface
    Interface,
    /// Array class
    Array,
    /// Primitive pseudo-class
    Primitive,
    /// Reflective mirror class
    Mirror,
}

impl ClassKind {
    /// Whether classes of this kind can be targets of a redefinition request.
    #[must_use]
    pub fn is_modifiable(&self) -> bool {
        matches!(self, ClassKind::Instance | ClassKind::Interface)
    }
}

/// Field value type, carrying its storage width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// 1-byte boolean
    Boolean,
    /// 1-byte signed integer
    Byte,
    /// 2-byte character
    Char,
    /// 2-byte signed integer
    Short,
    /// 4-byte signed integer
    Int,
    /// 8-byte signed integer
    Long,
    /// 4-byte float
    Float,
    /// 8-byte float
    Double,
    /// Object reference (stored as a 4-byte [`ObjRef`] index)
    Reference,
}

impl FieldType {
    /// Storage width in bytes.
    #[must_use]
    pub fn width(&self) -> u32 {
        match self {
            FieldType::Boolean | FieldType::Byte => 1,
            FieldType::Char | FieldType::Short => 2,
            FieldType::Int | FieldType::Float | FieldType::Reference => 4,
            FieldType::Long | FieldType::Double => 8,
        }
    }

    /// The type descriptor string used by member handles and signatures.
    #[must_use]
    pub fn descriptor(&self) -> &'static str {
        match self {
            FieldType::Boolean => "Z",
            FieldType::Byte => "B",
            FieldType::Char => "C",
            FieldType::Short => "S",
            FieldType::Int => "I",
            FieldType::Long => "J",
            FieldType::Float => "F",
            FieldType::Double => "D",
            FieldType::Reference => "L",
        }
    }
}

/// Method visibility, reduced to what the compatibility policy needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Not visible outside the class; additions/removals do not reshape dispatch
    Private,
    /// Anything visible to other classes
    Visible,
}

/// One field declaration within a [`ClassVersion`].
///
/// Fields are stored superclass-first, then in declared order, matching the
/// positional comparison the diff performs. `offset` is relative to the start
/// of the non-header instance data (or the static storage for statics).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// Field name
    pub name: String,
    /// Value type (also determines width)
    pub ty: FieldType,
    /// Byte offset within instance data or static storage
    pub offset: u32,
    /// Whether this is a static field
    pub is_static: bool,
}

/// One method declaration within a [`ClassVersion`].
///
/// The slot id and the obsolete/deleted marks are interior-mutable because
/// the diff reassigns slots on candidate versions and marks *old* methods
/// obsolete while both versions are already shared behind `Arc`.
#[derive(Debug)]
pub struct MethodDef {
    /// Method name
    pub name: String,
    /// Method signature (type descriptor string)
    pub signature: String,
    /// Visibility class for the added/deleted-method policy
    pub visibility: Visibility,
    /// Opaque identity of the bytecode body, compared by the external
    /// equivalence comparator
    pub body_token: u64,
    slot: AtomicU32,
    obsolete: AtomicBool,
    deleted: AtomicBool,
}

impl MethodDef {
    /// Creates a new method definition with the given slot id.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        signature: impl Into<String>,
        visibility: Visibility,
        body_token: u64,
        slot: MethodSlot,
    ) -> Self {
        MethodDef {
            name: name.into(),
            signature: signature.into(),
            visibility,
            body_token,
            slot: AtomicU32::new(slot.0),
            obsolete: AtomicBool::new(false),
            deleted: AtomicBool::new(false),
        }
    }

    /// The method's current stable slot id.
    #[must_use]
    pub fn slot(&self) -> MethodSlot {
        MethodSlot(self.slot.load(Ordering::Acquire))
    }

    /// Reassigns the slot id (diff phase only).
    pub fn set_slot(&self, slot: MethodSlot) {
        self.slot.store(slot.0, Ordering::Release);
    }

    /// Whether the method has been superseded by a non-equivalent body.
    ///
    /// Obsolete methods remain callable to completion by frames already
    /// executing them but are never resolved by new call sites.
    #[must_use]
    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }

    /// Marks the method obsolete.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    /// Whether the method was deleted by a redefinition.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    /// Marks the method as deleted (implies obsolete).
    pub fn mark_deleted(&self) {
        self.obsolete.store(true, Ordering::Release);
        self.deleted.store(true, Ordering::Release);
    }
}

/// Lifecycle state of a [`ClassVersion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum VersionState {
    /// Storage allocated, metadata not yet populated
    Allocated = 0,
    /// Being populated by the loader
    Loading = 1,
    /// Fully linked into the hierarchy
    Linked = 2,
    /// Candidate version under an active redefinition transaction
    Redefining = 3,
    /// Superseded and no longer reachable from any execution stack
    Retired = 4,
}

impl VersionState {
    fn from_u8(v: u8) -> VersionState {
        match v {
            0 => VersionState::Allocated,
            1 => VersionState::Loading,
            2 => VersionState::Linked,
            3 => VersionState::Redefining,
            _ => VersionState::Retired,
        }
    }
}

/// One generation of a class's shape.
///
/// Created by the loader, consulted read-only while diffing and planning,
/// mutated only by the heap migrator's finalize step after commit, and
/// retired once no execution stack references any of its methods.
///
/// The structural metadata (fields, methods, hierarchy, sizes) is immutable
/// after construction; everything a redefinition transaction touches lives
/// in interior-mutable cells so versions can be shared behind `Arc`.
pub struct ClassVersion {
    /// Stable identity shared by the whole lineage
    pub id: ClassId,
    /// Generation of this version within its lineage
    pub generation: Generation,
    /// Class kind
    pub kind: ClassKind,
    /// Fully qualified class name
    pub name: String,
    /// Fields, superclass-first then declared order (instance and static)
    pub fields: Vec<FieldDef>,
    /// Methods, pre-sorted by (name, signature)
    pub methods: Vec<MethodDef>,
    /// Direct supertype, `None` for roots and interfaces without one
    pub super_id: Option<ClassId>,
    /// Transitive interface set
    pub interfaces: Vec<ClassId>,
    /// Non-header instance byte size
    pub instance_size: u32,
    /// Static storage byte size
    pub static_size: u32,

    flags: AtomicU32,
    state: AtomicU8,
    initialized: AtomicBool,
    identity_token: AtomicU64,
    migration: RwLock<Option<crate::redefine::layout::MigrationProgram>>,
    copies_backwards: AtomicBool,
    mirror: OnceLock<ObjRef>,
    statics: RwLock<Vec<u8>>,
}

impl ClassVersion {
    /// Creates a new version. Static storage is default-initialized to zero,
    /// matching the guest language's default-value semantics.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        id: ClassId,
        generation: Generation,
        kind: ClassKind,
        name: impl Into<String>,
        fields: Vec<FieldDef>,
        methods: Vec<MethodDef>,
        super_id: Option<ClassId>,
        interfaces: Vec<ClassId>,
        instance_size: u32,
        static_size: u32,
    ) -> Self {
        ClassVersion {
            id,
            generation,
            kind,
            name: name.into(),
            fields,
            methods,
            super_id,
            interfaces,
            instance_size,
            static_size,
            flags: AtomicU32::new(RedefinitionFlags::empty().bits()),
            state: AtomicU8::new(VersionState::Allocated as u8),
            initialized: AtomicBool::new(false),
            identity_token: AtomicU64::new(((id.0 as u64) << 32) | generation.0 as u64),
            migration: RwLock::new(None),
            copies_backwards: AtomicBool::new(false),
            mirror: OnceLock::new(),
            statics: RwLock::new(vec![0; static_size as usize]),
        }
    }

    /// Rebuilds this version under the given identity and generation,
    /// resetting all interior transaction state. The coordinator stamps
    /// loader output with the lineage's next generation this way.
    #[must_use]
    pub fn adopt_identity(self, id: ClassId, generation: Generation) -> ClassVersion {
        ClassVersion::new(
            id,
            generation,
            self.kind,
            self.name,
            self.fields,
            self.methods,
            self.super_id,
            self.interfaces,
            self.instance_size,
            self.static_size,
        )
    }

    /// Current redefinition flags of this version.
    #[must_use]
    pub fn flags(&self) -> RedefinitionFlags {
        RedefinitionFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    /// Replaces the redefinition flags.
    pub fn set_flags(&self, flags: RedefinitionFlags) {
        self.flags.store(flags.bits(), Ordering::Release);
    }

    /// Unions the given flags into this version's flags.
    pub fn union_flags(&self, flags: RedefinitionFlags) {
        self.flags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    /// Clears the transient affected mark left behind by the search phase.
    pub fn clear_affected_mark(&self) {
        self.flags.fetch_and(
            !RedefinitionFlags::MARKED_AS_AFFECTED.bits(),
            Ordering::AcqRel,
        );
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> VersionState {
        VersionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Advances the lifecycle state.
    pub fn set_state(&self, state: VersionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Whether static initialization has already run for this lineage.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Marks static initialization as complete (carried forward across
    /// redefinition so initializers are not re-run).
    pub fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Release);
    }

    /// The identity/hash token used by identity-keyed structures.
    #[must_use]
    pub fn identity_token(&self) -> u64 {
        self.identity_token.load(Ordering::Acquire)
    }

    /// Swaps identity tokens between this version and `other` so weak maps
    /// and monitor tables keyed on identity keep resolving after commit.
    pub fn swap_identity_token(&self, other: &ClassVersion) {
        let mine = self.identity_token.load(Ordering::Acquire);
        let theirs = other.identity_token.swap(mine, Ordering::AcqRel);
        self.identity_token.store(theirs, Ordering::Release);
    }

    /// Installs the pending field-migration program for this candidate.
    pub fn set_migration(
        &self,
        program: crate::redefine::layout::MigrationProgram,
        copies_backwards: bool,
    ) {
        *write_lock!(self.migration) = Some(program);
        self.copies_backwards
            .store(copies_backwards, Ordering::Release);
    }

    /// The pending migration program, if instance layout changed.
    #[must_use]
    pub fn migration(&self) -> Option<crate::redefine::layout::MigrationProgram> {
        read_lock!(self.migration).clone()
    }

    /// Releases the migration program after commit.
    pub fn clear_migration(&self) {
        *write_lock!(self.migration) = None;
        self.copies_backwards.store(false, Ordering::Release);
    }

    /// Whether the migration program must run through a staging copy.
    #[must_use]
    pub fn copies_backwards(&self) -> bool {
        self.copies_backwards.load(Ordering::Acquire)
    }

    /// The reflective mirror object for this version, once allocated.
    #[must_use]
    pub fn mirror(&self) -> Option<ObjRef> {
        self.mirror.get().copied()
    }

    /// Records the mirror object. Set once by the coordinator after loading.
    pub fn set_mirror(&self, mirror: ObjRef) {
        let _ = self.mirror.set(mirror);
    }

    /// Reads a static field's raw bytes.
    #[must_use]
    pub fn static_bytes(&self, offset: u32, len: u32) -> Vec<u8> {
        let data = read_lock!(self.statics);
        data[offset as usize..(offset + len) as usize].to_vec()
    }

    /// Writes a static field's raw bytes.
    pub fn write_static_bytes(&self, offset: u32, bytes: &[u8]) {
        let mut data = write_lock!(self.statics);
        data[offset as usize..offset as usize + bytes.len()].copy_from_slice(bytes);
    }

    /// Looks up a field by name and type.
    #[must_use]
    pub fn find_field(&self, name: &str, ty: FieldType, is_static: bool) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|f| f.is_static == is_static && f.ty == ty && f.name == name)
    }

    /// Looks up a method by name and signature.
    #[must_use]
    pub fn find_method(&self, name: &str, signature: &str) -> Option<&MethodDef> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.signature == signature)
    }

    /// Looks up a method by its stable slot id.
    #[must_use]
    pub fn method_with_slot(&self, slot: MethodSlot) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.slot() == slot)
    }

    /// The next free slot id for method additions.
    #[must_use]
    pub fn next_method_slot(&self) -> MethodSlot {
        MethodSlot(
            self.methods
                .iter()
                .map(|m| m.slot().0 + 1)
                .max()
                .unwrap_or(0),
        )
    }

    /// Structural equality of the externally visible shape, used to detect
    /// byte-identical (no-op) redefinitions.
    #[must_use]
    pub fn same_shape(&self, other: &ClassVersion) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && self.super_id == other.super_id
            && self.interfaces == other.interfaces
            && self.instance_size == other.instance_size
            && self.static_size == other.static_size
            && self.fields == other.fields
            && self.methods.len() == other.methods.len()
            && self
                .methods
                .iter()
                .zip(other.methods.iter())
                .all(|(a, b)| {
                    a.name == b.name
                        && a.signature == b.signature
                        && a.visibility == b.visibility
                        && a.body_token == b.body_token
                })
    }
}

impl fmt::Debug for ClassVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassVersion")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}
