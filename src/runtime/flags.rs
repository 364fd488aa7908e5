//! Redefinition flag bitset computed by the class diff.

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Result of diffing one class pair, unioned with all ancestor flags
    /// within the same transaction.
    ///
    /// The union is monotonic: once a flag is set on a class it is inherited
    /// by every descendant processed later in the topological order, because
    /// an ancestor's layout or dispatch-table change reshapes the descendant
    /// as well.
    pub struct RedefinitionFlags: u32 {
        /// Class-side structures changed (dispatch table, hierarchy)
        const MODIFY_CLASS = 0x0001;
        /// Instance field layout changed; a migration program is required
        const MODIFY_INSTANCES = 0x0002;
        /// Class (static) byte size differs - diagnostic only
        const MODIFY_CLASS_SIZE = 0x0004;
        /// Instance byte size differs - diagnostic only
        const MODIFY_INSTANCE_SIZE = 0x0008;
        /// A supertype or interface was removed; unsupported, fails the batch
        const REMOVE_SUPER_TYPE = 0x0010;
        /// Transient mark used while computing the affected set
        const MARKED_AS_AFFECTED = 0x8000;
    }
}

impl RedefinitionFlags {
    /// The flags that describe an actual shape change (excludes the
    /// transient affected mark).
    #[must_use]
    pub fn shape_changes(self) -> RedefinitionFlags {
        self & !RedefinitionFlags::MARKED_AS_AFFECTED
    }

    /// Whether this diff result blocks the transaction.
    #[must_use]
    pub fn is_unsupported(self) -> bool {
        self.contains(RedefinitionFlags::REMOVE_SUPER_TYPE)
    }
}
