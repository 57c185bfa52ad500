//! The reflective value layer: a [`Dso`] wraps a single DIE (a variable,
//! member or formal parameter) together with the address of the memory it
//! describes, and lets a caller navigate fields and array elements the way
//! a debugger's expression evaluator would, reading bytes out of an
//! [`AddressSpace`] only when a caller actually asks for a value.
//!
//! Grounded on `data_structures.py`'s `PyDie`/`DataStructureObject` pair:
//! the split there between a DIE wrapper (`PyDie`) and its memory-bound
//! sibling (`DataStructureObject`) collapses here into `Dso` alone, since
//! `postmortem-dwarf::Die` already plays the `PyDie` role. `Dso` only adds
//! what `Die` cannot express on its own: a composed byte offset, a
//! resolved address, and an optional type override used to represent "one
//! element of an array" without mutating the type graph.

mod error;

pub use error::{ValueError, ValueErrorKind};

use postmortem_common::RegisterMap;
use postmortem_dwarf::{CompilationUnit, Die, DieOffset};
use postmortem_expr::{decode_die_expression, truncation_mask};
use postmortem_memory::{AddressSpace, Backing};

/// A value-typed DIE (variable, member, or formal parameter) bound to an
/// address in a target's memory.
///
/// `byte_offset` is the DIE's offset accumulated from whatever root object
/// this value was navigated from — `spec.md` §4.6's composition rule,
/// carried forward on every [`Dso::field`]/[`Dso::index`] call so
/// `offsetof` always reports the distance from the root, not just the
/// immediate parent.
#[derive(Debug)]
pub struct Dso<'a, B> {
    unit: &'a CompilationUnit,
    die: DieOffset,
    type_override: Option<DieOffset>,
    byte_offset: u64,
    address: Option<u64>,
    aspace: &'a AddressSpace<B>,
    object_data: &'a [u8],
    register_map: RegisterMap,
}

impl<'a, B: Backing> Dso<'a, B> {
    /// Wraps `die` (found in `unit`) at `address`, if known.
    ///
    /// `object_data` and `register_map` back the address self-resolution
    /// [`Dso::address`] falls back to when `address` is `None`: a bare
    /// named variable looked up without a frame in hand still needs its
    /// own `DW_AT_location` evaluated to find out where it lives.
    pub fn new(
        unit: &'a CompilationUnit,
        die: DieOffset,
        address: Option<u64>,
        aspace: &'a AddressSpace<B>,
        object_data: &'a [u8],
        register_map: RegisterMap,
    ) -> Result<Self, ValueError> {
        if !unit.dies_by_offset.contains_key(&die) {
            return Err(ValueErrorKind::DanglingDie.into());
        }
        Ok(Dso {
            unit,
            die,
            type_override: None,
            byte_offset: 0,
            address,
            aspace,
            object_data,
            register_map,
        })
    }

    fn die(&self) -> Result<&'a Die, ValueError> {
        self.unit
            .dies_by_offset
            .get(&self.die)
            .ok_or_else(|| ValueErrorKind::DanglingDie.into())
    }

    fn resolve(&self, offset: DieOffset) -> Result<&'a Die, ValueError> {
        self.unit
            .dies_by_offset
            .get(&offset)
            .ok_or_else(|| ValueErrorKind::DanglingDie.into())
    }

    /// This value's declared type, or the override installed by
    /// [`Dso::index`] when this `Dso` represents one element of an array.
    fn type_offset(&self) -> Result<Option<DieOffset>, ValueError> {
        if self.type_override.is_some() {
            return Ok(self.type_override);
        }
        Ok(self.die()?.base_type_offset)
    }

    /// Strips `const`/`volatile` qualifiers, pointer indirection and
    /// `typedef` aliasing down to the nearest `struct`/`union`, the way
    /// `get_dso`'s qualifier loop and `_get_member`'s pointer-stripping and
    /// typedef-forwarding do together in the source.
    fn resolve_container(&self) -> Result<Option<DieOffset>, ValueError> {
        let Some(mut current) = self.type_offset()? else {
            return Ok(None);
        };
        loop {
            let die = self.resolve(current)?;
            if die.is_struct() || die.is_union() {
                return Ok(Some(current));
            }
            if die.is_const() || die.is_volatile() || die.is_pointer() || die.is_typedef() {
                match die.base_type_offset {
                    Some(next) => current = next,
                    None => return Ok(None),
                }
            } else {
                return Ok(None);
            }
        }
    }

    /// This value's own name (its declaration DIE's `DW_AT_name`), or the
    /// anonymous placeholder a caller would have navigated here by.
    pub fn name(&self) -> Result<String, ValueError> {
        Ok(self.die()?.name.clone().unwrap_or_default())
    }

    /// Finds a named field on this value's (container-resolved) type.
    /// Anonymous members are addressable as `_1`, `_2`, ... in declaration
    /// order, matching the source's disambiguation of anonymous unions and
    /// structs.
    pub fn field(&self, name: &str) -> Result<Option<Dso<'a, B>>, ValueError> {
        let Some(container_offset) = self.resolve_container()? else {
            return Ok(None);
        };
        let container = self.resolve(container_offset)?;

        let mut anonymous_index = 0usize;
        for child_offset in &container.children {
            let child = self.resolve(*child_offset)?;
            if !child.is_member() {
                continue;
            }
            let child_name = match &child.name {
                Some(n) if !n.is_empty() => n.clone(),
                _ => {
                    anonymous_index += 1;
                    format!("_{anonymous_index}")
                }
            };
            if child_name == name {
                let child_byte_offset = child.byte_offset.unwrap_or(0);
                return Ok(Some(Dso {
                    unit: self.unit,
                    die: *child_offset,
                    type_override: None,
                    byte_offset: self.byte_offset + child_byte_offset,
                    address: self.address.map(|a| a + child_byte_offset),
                    aspace: self.aspace,
                    object_data: self.object_data,
                    register_map: self.register_map,
                }));
            }
        }
        Ok(None)
    }

    /// The element at array index `i`. `i` must fall within the array
    /// type's `[0, upper_bound]` range (`spec.md` §8's array-bounds
    /// invariant), else [`ValueErrorKind::IndexOutOfRange`].
    pub fn index(&self, i: u64) -> Result<Dso<'a, B>, ValueError> {
        let type_offset = self
            .type_offset()?
            .ok_or(ValueErrorKind::IndexOutOfRange)?;
        let array_die = self.resolve(type_offset)?;
        if !array_die.is_array() {
            return Err(ValueErrorKind::IndexOutOfRange.into());
        }

        let upper_bound = postmortem_dwarf::array_element_count(self.unit, array_die)
            .map(|count| count.saturating_sub(1));
        if let Some(upper_bound) = upper_bound {
            if i > upper_bound {
                return Err(ValueErrorKind::IndexOutOfRange.into());
            }
        }

        let element_type = array_die
            .base_type_offset
            .ok_or(ValueErrorKind::IndexOutOfRange)?;
        let element_size = self.size_of_type(element_type)?;
        let delta = i * element_size;

        Ok(Dso {
            unit: self.unit,
            die: self.die,
            type_override: Some(element_type),
            byte_offset: self.byte_offset + delta,
            address: self.address.map(|a| a + delta),
            aspace: self.aspace,
            object_data: self.object_data,
            register_map: self.register_map,
        })
    }

    /// The size in bytes of this value's type.
    pub fn sizeof(&self) -> Result<u64, ValueError> {
        if let Ok(die) = self.die() {
            if let Some(size) = die.size {
                if size != 0 {
                    return Ok(size);
                }
            }
        }
        match self.type_offset()? {
            Some(offset) => self.size_of_type(offset),
            None => Ok(0),
        }
    }

    fn size_of_type(&self, offset: DieOffset) -> Result<u64, ValueError> {
        let die = self.resolve(offset)?;
        if let Some(size) = die.size {
            if size != 0 {
                return Ok(size);
            }
        }
        if die.is_pointer() {
            return Ok(8);
        }
        match die.base_type_offset {
            Some(base) => self.size_of_type(base),
            None => Ok(0),
        }
    }

    /// The byte offset of `name` from the root object this value was
    /// navigated from.
    pub fn offsetof(&self, name: &str) -> Result<u64, ValueError> {
        self.field(name)?
            .map(|field| field.byte_offset)
            .ok_or_else(|| ValueErrorKind::FieldNotFound.into())
    }

    /// This value's cumulative offset from the root object it was
    /// navigated from.
    pub fn byte_offset(&self) -> u64 {
        self.byte_offset
    }

    /// This value's resolved address.
    ///
    /// Falls back to `spec.md` §4.6's `get_address()` when no address was
    /// supplied at construction (or propagated from a parent field/index):
    /// if this value's own DIE is a `variable`, its `DW_AT_location` is
    /// evaluated with no frame base (a global/static variable's location
    /// does not depend on a frame); otherwise the same resolution is tried
    /// on each DIE ancestor in turn, and the found base has this value's
    /// accumulated `byte_offset` added back on.
    pub fn address(&self) -> Option<u64> {
        if let Some(address) = self.address {
            return Some(address);
        }
        self.resolve_address_from_die()
            .map(|base| base + self.byte_offset)
    }

    fn resolve_address_from_die(&self) -> Option<u64> {
        let mut current = self.die().ok()?;
        loop {
            if current.is_variable() {
                if let Some(address) = self.evaluate_own_location(current) {
                    return Some(address);
                }
            }
            current = self.resolve(current.parent?).ok()?;
        }
    }

    fn evaluate_own_location(&self, die: &Die) -> Option<u64> {
        decode_die_expression(
            die.location.as_ref(),
            self.unit,
            self.object_data,
            0,
            self.aspace,
            None,
            None,
            &self.register_map,
        )
        .ok()
        .flatten()
    }

    /// Reads this value's raw bytes from the target's address space.
    pub fn value(&self) -> Result<Vec<u8>, ValueError> {
        let address = self.address().ok_or(ValueErrorKind::MissingAddress)?;
        let size = self.sizeof()? as usize;
        Ok(self.aspace.read_required(address, size)?)
    }

    /// This value interpreted as a little-endian unsigned integer, masked
    /// to its declared size.
    pub fn as_u64(&self) -> Result<u64, ValueError> {
        let bytes = self.value()?;
        let mut buf = [0u8; 8];
        let n = bytes.len().min(8);
        buf[..n].copy_from_slice(&bytes[..n]);
        let raw = u64::from_le_bytes(buf);
        Ok(raw & truncation_mask(n.max(1) as u32))
    }

    /// A source-style rendering of this value's type, `spec.md` §4.5's
    /// `describe_type` exposed through the value layer for convenience.
    pub fn describe(&self) -> Result<String, ValueError> {
        match self.type_offset()? {
            Some(offset) => Ok(postmortem_dwarf::describe_type(self.unit, offset, 0)),
            None => Ok(postmortem_dwarf::describe_type(self.unit, self.die, 0)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_common::Arch;
    use postmortem_dwarf::{ExprSource, Tag};
    use std::collections::HashMap;

    fn fixture_register_map() -> RegisterMap {
        RegisterMap::new(Arch::Amd64)
    }

    #[derive(Debug)]
    struct VecBacking(Vec<u8>);
    impl Backing for VecBacking {
        fn read_at(&self, offset: u64, len: usize) -> std::io::Result<Vec<u8>> {
            let start = offset as usize;
            self.0
                .get(start..start + len)
                .map(|s| s.to_vec())
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::UnexpectedEof))
        }
    }

    fn fixture_space() -> AddressSpace<VecBacking> {
        let mut mem = vec![0u8; 0x1000];
        // struct instance at 0x100: { int first; int second[4]; }
        mem[0x100..0x104].copy_from_slice(&7i32.to_le_bytes());
        mem[0x104..0x108].copy_from_slice(&10i32.to_le_bytes());
        mem[0x108..0x10c].copy_from_slice(&20i32.to_le_bytes());
        mem[0x10c..0x110].copy_from_slice(&30i32.to_le_bytes());
        mem[0x110..0x114].copy_from_slice(&40i32.to_le_bytes());
        AddressSpace::new(
            vec![postmortem_memory::LoadSegment::new(0, 0x1000, 0)],
            VecBacking(mem),
        )
    }

    fn plain_die(offset: u64, tag: Tag) -> Die {
        Die {
            offset: DieOffset(offset),
            tag,
            name: None,
            base_type_offset: None,
            size: None,
            bit_size: None,
            bit_offset: None,
            byte_offset: None,
            upper_bound: None,
            file_name: None,
            line_number: None,
            encoding: None,
            location: None::<ExprSource>,
            frame_base: None,
            pc_range: None,
            parent: None,
            children: Vec::new(),
        }
    }

    /// struct S { int first; int second[4]; } s;
    fn fixture_unit() -> CompilationUnit {
        let int_ty = {
            let mut d = plain_die(1, Tag::BaseType);
            d.name = Some("int".into());
            d.size = Some(4);
            d
        };
        let subrange = {
            let mut d = plain_die(2, Tag::Subrange);
            d.upper_bound = Some(3);
            d
        };
        let array_ty = {
            let mut d = plain_die(3, Tag::Array);
            d.base_type_offset = Some(DieOffset(1));
            d.children = vec![DieOffset(2)];
            d
        };
        let member_first = {
            let mut d = plain_die(4, Tag::Member);
            d.name = Some("first".into());
            d.base_type_offset = Some(DieOffset(1));
            d.byte_offset = Some(0);
            d
        };
        let member_second = {
            let mut d = plain_die(5, Tag::Member);
            d.name = Some("second".into());
            d.base_type_offset = Some(DieOffset(3));
            d.byte_offset = Some(4);
            d
        };
        let structure = {
            let mut d = plain_die(6, Tag::Struct);
            d.name = Some("S".into());
            d.children = vec![DieOffset(4), DieOffset(5)];
            d
        };
        let variable = {
            let mut d = plain_die(7, Tag::Variable);
            d.name = Some("s".into());
            d.base_type_offset = Some(DieOffset(6));
            d
        };

        let mut dies_by_offset = HashMap::new();
        for die in [int_ty, subrange, array_ty, member_first, member_second, structure, variable] {
            dies_by_offset.insert(die.offset, die);
        }

        CompilationUnit {
            unit_offset: 0,
            root: DieOffset(7),
            dies_by_offset,
            dies_by_name: HashMap::new(),
            low_pc: 0,
            high_pc: 0,
            comp_dir: None,
            name: None,
            file_names: Vec::new(),
            include_dirs: Vec::new(),
            line_rows: Vec::new(),
        }
    }

    #[test]
    fn field_composes_byte_offset_from_the_root() {
        let unit = fixture_unit();
        let space = fixture_space();
        let s = Dso::new(&unit, DieOffset(7), Some(0x100), &space, &[], fixture_register_map()).unwrap();

        let first = s.field("first").unwrap().unwrap();
        assert_eq!(first.byte_offset(), 0);
        assert_eq!(first.as_u64().unwrap(), 7);

        let second = s.field("second").unwrap().unwrap();
        assert_eq!(second.byte_offset(), 4);
        assert_eq!(second.address(), Some(0x104));
    }

    #[test]
    fn index_reads_the_right_array_element_and_checks_bounds() {
        let unit = fixture_unit();
        let space = fixture_space();
        let s = Dso::new(&unit, DieOffset(7), Some(0x100), &space, &[], fixture_register_map()).unwrap();
        let second = s.field("second").unwrap().unwrap();

        let elem2 = second.index(2).unwrap();
        assert_eq!(elem2.as_u64().unwrap(), 30);

        let err = second.index(4).unwrap_err();
        assert_eq!(err.kind(), ValueErrorKind::IndexOutOfRange);
    }

    #[test]
    fn sizeof_and_offsetof_match_the_declared_layout() {
        let unit = fixture_unit();
        let space = fixture_space();
        let s = Dso::new(&unit, DieOffset(7), Some(0x100), &space, &[], fixture_register_map()).unwrap();

        assert_eq!(s.offsetof("second").unwrap(), 4);
        assert_eq!(s.field("first").unwrap().unwrap().sizeof().unwrap(), 4);
    }

    #[test]
    fn missing_field_is_none_not_an_error() {
        let unit = fixture_unit();
        let space = fixture_space();
        let s = Dso::new(&unit, DieOffset(7), Some(0x100), &space, &[], fixture_register_map()).unwrap();
        assert!(s.field("nonexistent").unwrap().is_none());
    }

    #[test]
    fn address_falls_back_to_evaluating_a_bare_variables_own_location() {
        let mut unit = fixture_unit();
        let variable = unit.dies_by_offset.get_mut(&DieOffset(7)).unwrap();
        // DW_OP_addr 0x100
        let mut expr = vec![0x03u8];
        expr.extend_from_slice(&0x100u64.to_le_bytes());
        variable.location = Some(ExprSource::Inline(expr));

        let space = fixture_space();
        let s = Dso::new(&unit, DieOffset(7), None, &space, &[], fixture_register_map()).unwrap();
        assert_eq!(s.address(), Some(0x100));
    }
}
