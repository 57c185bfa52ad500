//! Loading DWARF sections out of an ELF object via `goblin`.

use gimli::{EndianSlice, RunTimeEndian};
use goblin::elf::Elf;

use crate::error::{DwarfError, DwarfErrorKind};

type Slice<'d> = EndianSlice<'d, RunTimeEndian>;

/// Parses `data` as an ELF object and loads every DWARF section gimli knows
/// about into a `gimli::Dwarf`, borrowing directly from `data`.
///
/// Missing sections resolve to an empty slice, which is how `gimli::Dwarf`
/// represents "this object carries no such section" — callers never see a
/// section-not-found error, only absent data once they try to read from it.
pub fn load_dwarf(data: &[u8]) -> Result<gimli::Dwarf<Slice<'_>>, DwarfError> {
    let elf = Elf::parse(data)
        .map_err(|e| DwarfError::with_source(DwarfErrorKind::MalformedObject, ElfErr(e)))?;

    let endian = if elf.little_endian {
        RunTimeEndian::Little
    } else {
        RunTimeEndian::Big
    };

    let dwarf = gimli::Dwarf::load(|id| -> Result<Slice<'_>, DwarfError> {
        Ok(find_section(&elf, data, id.name())
            .map(|bytes| EndianSlice::new(bytes, endian))
            .unwrap_or_else(|| EndianSlice::new(&[], endian)))
    })?;

    Ok(dwarf)
}

/// Also exposes the raw `.eh_frame`/`.debug_frame` bytes and the ELF's load
/// segments, needed by `postmortem-unwind` and `postmortem-memory`
/// respectively; kept next to `load_dwarf` since both walk the same section
/// table.
pub fn find_raw_section<'d>(data: &'d [u8], name: &str) -> Option<&'d [u8]> {
    let elf = Elf::parse(data).ok()?;
    find_section(&elf, data, name)
}

fn find_section<'d>(elf: &Elf<'_>, data: &'d [u8], name: &str) -> Option<&'d [u8]> {
    let want = name.trim_start_matches('.');
    for header in &elf.section_headers {
        let Some(Ok(section_name)) = elf.shdr_strtab.get(header.sh_name) else {
            continue;
        };
        if section_name.trim_start_matches('.') == want {
            let start = header.sh_offset as usize;
            let end = start.checked_add(header.sh_size as usize)?;
            return data.get(start..end);
        }
    }
    None
}

#[derive(Debug)]
struct ElfErr(goblin::error::Error);

impl std::fmt::Display for ElfErr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ElfErr {}
