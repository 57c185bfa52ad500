//! The type graph: a cross-referenced, deduplicated DIE object model built
//! once per compilation unit of an ELF object's DWARF debugging information.
//!
//! [`TypeGraph::parse`] walks every compilation unit's DIE tree exactly once
//! and materialises fully owned [`Die`] records (see `die`), so the graph
//! does not borrow from the object file bytes it was parsed from — only the
//! parse step itself holds a transient `gimli::Dwarf` over the input slice.
//! Raw DWARF sections that must be consulted again later by value (location
//! lists looked up by instruction pointer, call-frame information) are
//! re-read from the caller-owned bytes on demand via [`find_raw_section`],
//! rather than kept alive behind a self-referential cell — see `DESIGN.md`.

mod die;
mod error;
mod pretty;
mod sections;
mod unit;

pub use die::{Die, DieOffset, ExprSource, Tag};
pub use error::{DwarfError, DwarfErrorKind};
pub use pretty::{array_element_count, describe_type, type_name};
pub use sections::find_raw_section;
pub use unit::{CompilationUnit, LineRow};

use fallible_iterator::FallibleIterator;

/// The parsed type graph over every compilation unit of one ELF object.
#[derive(Debug)]
pub struct TypeGraph {
    units: Vec<CompilationUnit>,
}

impl TypeGraph {
    /// Parses every compilation unit's DWARF debug information out of an
    /// ELF object's bytes.
    pub fn parse(object_data: &[u8]) -> Result<Self, DwarfError> {
        let dwarf = sections::load_dwarf(object_data)?;

        let mut units = Vec::new();
        let mut headers = dwarf.units();
        while let Some(header) = headers.next()? {
            let unit_offset = header
                .offset()
                .as_debug_info_offset()
                .map(|o| o.0 as u64)
                .unwrap_or_default();
            let unit = dwarf.unit(header)?;
            units.push(unit::build_unit(&dwarf, &unit, unit_offset)?);
        }

        Ok(TypeGraph { units })
    }

    /// Every compilation unit, in the order they appear in `.debug_info`.
    pub fn units(&self) -> &[CompilationUnit] {
        &self.units
    }

    /// Finds the compilation unit whose `[low_pc, high_pc)` range covers
    /// `address`.
    pub fn unit_for_address(&self, address: u64) -> Option<&CompilationUnit> {
        self.units.iter().find(|u| u.contains(address))
    }

    /// Finds the `DW_TAG_subprogram` DIE named `name` in any unit.
    pub fn subprogram_named(&self, name: &str) -> Option<(&CompilationUnit, &Die)> {
        for unit in &self.units {
            if let Some(offsets) = unit.dies_by_name.get(name) {
                for offset in offsets {
                    if let Some(die) = unit.dies_by_offset.get(offset) {
                        if die.is_subprogram() {
                            return Some((unit, die));
                        }
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_rejects_non_elf_input() {
        let err = TypeGraph::parse(b"not an elf file").unwrap_err();
        assert_eq!(err.kind(), DwarfErrorKind::MalformedObject);
    }
}
