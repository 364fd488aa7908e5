//! Instance layout planning - computing the field-migration program.
//!
//! When a diff sets `MODIFY_INSTANCES` the planner walks the new non-static
//! field list in declared order (inherited fields first) and emits a compact
//! program of copy and fill records that transforms an old instance's bytes
//! into the new layout. Fields found by (name, type) in the old shape are
//! copied; new fields are zero-filled, matching the guest language's
//! default-value semantics.

use crate::{runtime::version::ClassVersion, Result};

/// One record of a [`MigrationProgram`].
///
/// Destinations are implicit: records are applied in order, each advancing
/// the write position by its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationRecord {
    /// Copy `len` bytes from `src_offset` in the old instance
    Copy {
        /// Byte offset in the old instance data
        src_offset: u32,
        /// Number of bytes to copy
        len: u32,
    },
    /// Zero-fill `len` bytes
    Fill {
        /// Number of bytes to fill
        len: u32,
    },
}

impl MigrationRecord {
    /// The number of destination bytes this record produces.
    #[must_use]
    pub fn len(&self) -> u32 {
        match self {
            MigrationRecord::Copy { len, .. } | MigrationRecord::Fill { len } => *len,
        }
    }

    /// Whether the record produces no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The ordered copy/fill instruction list transforming an old instance's
/// bytes into the new layout.
///
/// Invariants, validated at planning time:
/// - the record lengths sum to the new non-header instance size
/// - every copy source range lies within the old instance's bounds
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationProgram {
    records: Vec<MigrationRecord>,
}

impl MigrationProgram {
    /// The program's records in application order.
    #[must_use]
    pub fn records(&self) -> &[MigrationRecord] {
        &self.records
    }

    /// Total number of destination bytes the program produces.
    #[must_use]
    pub fn total_len(&self) -> u32 {
        self.records.iter().map(MigrationRecord::len).sum()
    }

    /// Applies the program reading from a staging snapshot of the old
    /// instance, producing fresh storage of `new_size` bytes.
    ///
    /// Used when the program copies backwards or the instance grows.
    #[must_use]
    pub fn apply_staged(&self, old: &[u8], new_size: u32) -> Vec<u8> {
        let mut out = vec![0u8; new_size as usize];
        let mut position = 0usize;
        for record in &self.records {
            match *record {
                MigrationRecord::Copy { src_offset, len } => {
                    let src = src_offset as usize;
                    out[position..position + len as usize]
                        .copy_from_slice(&old[src..src + len as usize]);
                    position += len as usize;
                }
                MigrationRecord::Fill { len } => {
                    // Destination is pre-zeroed
                    position += len as usize;
                }
            }
        }
        out
    }

    /// Applies the program in place when the instance size is unchanged or
    /// shrinking and no copy runs backwards.
    pub fn apply_in_place(&self, data: &mut Vec<u8>, new_size: u32) {
        let mut position = 0usize;
        for record in &self.records {
            match *record {
                MigrationRecord::Copy { src_offset, len } => {
                    let src = src_offset as usize;
                    data.copy_within(src..src + len as usize, position);
                    position += len as usize;
                }
                MigrationRecord::Fill { len } => {
                    data[position..position + len as usize].fill(0);
                    position += len as usize;
                }
            }
        }
        data.truncate(new_size as usize);
    }

    fn push_copy(&mut self, src_offset: u32, len: u32) {
        // Destinations are sequential, so source contiguity with the
        // previous copy is the only merge condition.
        if let Some(MigrationRecord::Copy {
            src_offset: prev_src,
            len: prev_len,
        }) = self.records.last_mut()
        {
            if *prev_src + *prev_len == src_offset {
                *prev_len += len;
                return;
            }
        }
        self.records.push(MigrationRecord::Copy { src_offset, len });
    }

    fn push_fill(&mut self, len: u32) {
        if let Some(MigrationRecord::Fill { len: prev_len }) = self.records.last_mut() {
            *prev_len += len;
            return;
        }
        self.records.push(MigrationRecord::Fill { len });
    }
}

/// Planner output: the program plus whether migration must run through a
/// staging copy.
#[derive(Debug, Clone)]
pub struct LayoutPlan {
    /// The migration program
    pub program: MigrationProgram,
    /// True when some copy could read bytes an earlier write already
    /// clobbered if applied in place
    pub copies_backwards: bool,
}

/// Computes the migration program for one (old, new) pair whose instance
/// layout changed.
///
/// # Errors
///
/// Returns [`crate::Error::Internal`] when the produced program violates its
/// own invariants; this indicates inconsistent field metadata from the
/// loader rather than an expected failure.
pub fn plan_migration(old: &ClassVersion, new: &ClassVersion) -> Result<LayoutPlan> {
    let mut program = MigrationProgram::default();
    let mut copies_backwards = false;
    let mut position: u32 = 0;

    let mut new_fields: Vec<_> = new.fields.iter().filter(|f| !f.is_static).collect();
    new_fields.sort_by_key(|f| f.offset);

    for field in new_fields {
        if field.offset < position {
            return Err(internal_error!(
                "overlapping field {} at offset {} in {}",
                field.name,
                field.offset,
                new.name
            ));
        }
        // Alignment gap before this field
        if field.offset > position {
            program.push_fill(field.offset - position);
            position = field.offset;
        }

        let width = field.ty.width();
        if let Some(old_field) = old.find_field(&field.name, field.ty, false) {
            let src = old_field.offset;
            let dst = position;
            // A copy whose source precedes its destination can be clobbered
            // by an earlier write; one whose destination precedes an
            // overlapping source clobbers itself. Either forces staging.
            if src < dst || (dst < src && dst + width > src) {
                copies_backwards = true;
            }
            program.push_copy(src, width);
        } else {
            program.push_fill(width);
        }
        position += width;
    }

    // Trailing padding up to the new instance size
    if position < new.instance_size {
        program.push_fill(new.instance_size - position);
    }

    validate(&program, old, new)?;
    tracing::trace!(
        class = %new.id,
        records = program.records().len(),
        copies_backwards,
        "instance update information computed"
    );
    Ok(LayoutPlan {
        program,
        copies_backwards,
    })
}

fn validate(program: &MigrationProgram, old: &ClassVersion, new: &ClassVersion) -> Result<()> {
    if program.total_len() != new.instance_size {
        return Err(internal_error!(
            "migration program for {} covers {} bytes, instance size is {}",
            new.name,
            program.total_len(),
            new.instance_size
        ));
    }
    for record in program.records() {
        if let MigrationRecord::Copy { src_offset, len } = record {
            if src_offset + len > old.instance_size {
                return Err(internal_error!(
                    "copy source {}..{} outside old instance of {} bytes in {}",
                    src_offset,
                    src_offset + len,
                    old.instance_size,
                    new.name
                ));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::version::{
        ClassId, ClassKind, ClassVersion, FieldDef, FieldType, Generation,
    };

    fn shape(name: &str, generation: u32, fields: &[(&str, FieldType, u32)]) -> ClassVersion {
        let defs: Vec<FieldDef> = fields
            .iter()
            .map(|(n, ty, offset)| FieldDef {
                name: (*n).to_string(),
                ty: *ty,
                offset: *offset,
                is_static: false,
            })
            .collect();
        let size = defs.iter().map(|f| f.offset + f.ty.width()).max().unwrap_or(0);
        ClassVersion::new(
            ClassId(1),
            Generation(generation),
            ClassKind::Instance,
            name,
            defs,
            vec![],
            None,
            vec![],
            size,
            0,
        )
    }

    #[test]
    fn added_field_appends_fill() {
        let old = shape("A", 0, &[("x", FieldType::Int, 0)]);
        let new = shape("A", 1, &[("x", FieldType::Int, 0), ("y", FieldType::Int, 4)]);

        let plan = plan_migration(&old, &new).unwrap();
        assert_eq!(
            plan.program.records(),
            &[
                MigrationRecord::Copy {
                    src_offset: 0,
                    len: 4
                },
                MigrationRecord::Fill { len: 4 },
            ]
        );
        assert!(!plan.copies_backwards);
    }

    #[test]
    fn swapped_fields_copy_with_swapped_offsets() {
        let old = shape("B", 0, &[("x", FieldType::Int, 0), ("y", FieldType::Int, 4)]);
        let new = shape("B", 1, &[("y", FieldType::Int, 0), ("x", FieldType::Int, 4)]);

        let plan = plan_migration(&old, &new).unwrap();
        assert_eq!(
            plan.program.records(),
            &[
                MigrationRecord::Copy {
                    src_offset: 4,
                    len: 4
                },
                MigrationRecord::Copy {
                    src_offset: 0,
                    len: 4
                },
            ]
        );
        assert!(plan.copies_backwards);
    }

    #[test]
    fn contiguous_copies_merge() {
        let old = shape("C", 0, &[("x", FieldType::Int, 0), ("y", FieldType::Int, 4)]);
        let new = shape("C", 1, &[("x", FieldType::Int, 0), ("y", FieldType::Int, 4)]);

        let plan = plan_migration(&old, &new).unwrap();
        assert_eq!(
            plan.program.records(),
            &[MigrationRecord::Copy {
                src_offset: 0,
                len: 8
            }]
        );
        assert!(!plan.copies_backwards);
    }

    #[test]
    fn alignment_gaps_become_fills() {
        let old = shape("D", 0, &[("b", FieldType::Byte, 0)]);
        // byte at 0, long aligned to 8
        let new = shape(
            "D",
            1,
            &[("b", FieldType::Byte, 0), ("l", FieldType::Long, 8)],
        );

        let plan = plan_migration(&old, &new).unwrap();
        assert_eq!(
            plan.program.records(),
            &[
                MigrationRecord::Copy {
                    src_offset: 0,
                    len: 1
                },
                MigrationRecord::Fill { len: 15 },
            ]
        );
        assert_eq!(plan.program.total_len(), new.instance_size);
    }

    #[test]
    fn staged_and_in_place_agree_when_no_backwards_copy() {
        let old = shape("E", 0, &[("x", FieldType::Int, 0), ("y", FieldType::Int, 4)]);
        let new = shape("E", 1, &[("x", FieldType::Int, 0)]);

        let plan = plan_migration(&old, &new).unwrap();
        assert!(!plan.copies_backwards);

        let old_bytes = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let staged = plan.program.apply_staged(&old_bytes, new.instance_size);

        let mut in_place = old_bytes.clone();
        plan.program.apply_in_place(&mut in_place, new.instance_size);

        assert_eq!(staged, in_place);
        assert_eq!(staged, vec![1, 2, 3, 4]);
    }

    #[test]
    fn staged_apply_handles_swapped_fields() {
        let old = shape("F", 0, &[("x", FieldType::Int, 0), ("y", FieldType::Int, 4)]);
        let new = shape("F", 1, &[("y", FieldType::Int, 0), ("x", FieldType::Int, 4)]);

        let plan = plan_migration(&old, &new).unwrap();
        let old_bytes = vec![1, 2, 3, 4, 9, 9, 9, 9];
        let migrated = plan.program.apply_staged(&old_bytes, new.instance_size);
        assert_eq!(migrated, vec![9, 9, 9, 9, 1, 2, 3, 4]);
    }

    #[test]
    fn copy_source_outside_old_bounds_is_rejected() {
        let new = shape("G", 1, &[("x", FieldType::Int, 0)]);
        // Old shape claims x at offset 8 but only 4 bytes of storage
        let bad_old = ClassVersion::new(
            ClassId(1),
            Generation(0),
            ClassKind::Instance,
            "G",
            vec![FieldDef {
                name: "x".into(),
                ty: FieldType::Int,
                offset: 8,
                is_static: false,
            }],
            vec![],
            None,
            vec![],
            4,
            0,
        );
        assert!(plan_migration(&bad_old, &new).is_err());
    }
}
