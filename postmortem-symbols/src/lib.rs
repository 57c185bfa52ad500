//! The symbol index: nearest-symbol and name lookups over an ELF symbol
//! table, and `address -> (file, line, dir)` resolution through a
//! compilation unit's line-number program.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use goblin::elf::Elf;
use postmortem_dwarf::TypeGraph;

/// One entry of a symbol table: name, value (address) and size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Symbol {
    /// The symbol's (demangled-or-not, the core never demangles) name.
    pub name: String,
    /// The symbol's address.
    pub value: u64,
    /// The symbol's size in bytes, `0` if unknown.
    pub size: u64,
}

/// `address -> (file, line, dir)` resolution result, per `spec.md` §3.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Addr2Line {
    /// Source file name.
    pub file: String,
    /// Source line number.
    pub line: u64,
    /// Include-directory component, empty if the composed path could not
    /// be confirmed readable.
    pub dir: String,
    /// The compilation unit's compilation directory.
    pub compilation_dir: String,
}

/// A symbol table held in address-sorted order, plus a name index built
/// lazily alongside it.
#[derive(Debug, Default)]
pub struct SymbolSection {
    by_address: Vec<Symbol>,
    by_name: HashMap<String, usize>,
}

impl SymbolSection {
    /// Builds a symbol section from an unsorted list of symbols.
    pub fn new(mut symbols: Vec<Symbol>) -> Self {
        symbols.sort_by_key(|s| s.value);
        let by_name = symbols
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        SymbolSection {
            by_address: symbols,
            by_name,
        }
    }

    /// Parses the `.symtab` (falling back to `.dynsym`) of an ELF object
    /// into a [`SymbolSection`], keeping only function symbols (`STT_FUNC`).
    pub fn from_elf_bytes(data: &[u8]) -> Result<Self, goblin::error::Error> {
        let elf = Elf::parse(data)?;
        let syms = if !elf.syms.is_empty() {
            (&elf.syms, &elf.strtab)
        } else {
            (&elf.dynsyms, &elf.dynstrtab)
        };

        let symbols = syms
            .0
            .iter()
            .filter(|sym| sym.is_function() && sym.st_value != 0)
            .filter_map(|sym| {
                let name = syms.1.get_at(sym.st_name)?.to_string();
                Some(Symbol {
                    name,
                    value: sym.st_value,
                    size: sym.st_size,
                })
            })
            .collect();

        Ok(SymbolSection::new(symbols))
    }

    /// Binary-searches for the greatest symbol `<= address`; `offset` is
    /// `address - symbol.value`. With `only_exact`, any non-zero offset is
    /// rejected.
    pub fn find_symbol(&self, address: u64, only_exact: bool) -> Option<(&str, u64)> {
        let idx = self
            .by_address
            .partition_point(|s| s.value <= address)
            .checked_sub(1)?;
        let symbol = &self.by_address[idx];
        let offset = address - symbol.value;
        if only_exact && offset != 0 {
            return None;
        }
        Some((symbol.name.as_str(), offset))
    }

    /// Looks up a symbol's address by name.
    pub fn find_address(&self, name: &str) -> Option<u64> {
        self.by_name
            .get(name)
            .map(|&idx| self.by_address[idx].value)
    }

    /// Every symbol, sorted by address.
    pub fn symbols(&self) -> &[Symbol] {
        &self.by_address
    }
}

/// Resolves `ip` through `graph`'s compilation units to `(file, line, dir,
/// compilation_dir)`, per `spec.md` §4.3.
///
/// Missing CUs or line programs are absorbed as `None` and logged at debug
/// level, matching the "missing debug info is a warning, not an error"
/// propagation policy.
pub fn addr2line(graph: &TypeGraph, ip: u64) -> Option<Addr2Line> {
    let unit = graph.unit_for_address(ip).or_else(|| {
        tracing::debug!(ip, "no compilation unit covers this address");
        None
    })?;

    let row = unit.line_row_for(ip).or_else(|| {
        tracing::debug!(ip, "no line program entry covers this address");
        None
    })?;

    let (file, dir_index) = unit
        .file_names
        .get(row.file_index)
        .cloned()
        .unwrap_or_default();
    let compilation_dir = unit.comp_dir.clone().unwrap_or_default();
    let include_dir = dir_index
        .and_then(|i| unit.include_dirs.get(i))
        .cloned()
        .unwrap_or_default();

    let candidate = compose_path(&compilation_dir, &include_dir, &file);
    let dir = if candidate
        .as_ref()
        .map(|p| p.is_file())
        .unwrap_or(false)
    {
        include_dir
    } else {
        String::new()
    };

    Some(Addr2Line {
        file,
        line: row.line,
        dir,
        compilation_dir,
    })
}

fn compose_path(compilation_dir: &str, include_dir: &str, file: &str) -> Option<PathBuf> {
    if file.is_empty() {
        return None;
    }
    let mut path = PathBuf::from(compilation_dir);
    if !include_dir.is_empty() {
        path.push(include_dir);
    }
    path.push(file);
    Some(path)
}

/// Whether `path` exists and is readable; used by callers wanting the same
/// probing `addr2line` performs internally, exposed so the CLI collaborator
/// can reuse it against candidate source roots.
pub fn path_is_readable(path: &Path) -> bool {
    path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn syms() -> SymbolSection {
        SymbolSection::new(vec![
            Symbol {
                name: "foo".into(),
                value: 0x400000,
                size: 0x10,
            },
            Symbol {
                name: "bar".into(),
                value: 0x400100,
                size: 0x20,
            },
        ])
    }

    #[test]
    fn finds_the_greatest_symbol_not_exceeding_the_address() {
        let section = syms();
        assert_eq!(section.find_symbol(0x400008, false), Some(("foo", 8)));
        assert_eq!(section.find_symbol(0x400100, false), Some(("bar", 0)));
    }

    #[test]
    fn only_exact_rejects_nonzero_offsets() {
        let section = syms();
        assert_eq!(section.find_symbol(0x400008, true), None);
        assert_eq!(section.find_symbol(0x400100, true), Some(("bar", 0)));
    }

    #[test]
    fn find_address_is_the_inverse_of_find_symbol() {
        let section = syms();
        let (name, _) = section.find_symbol(0x400008, false).unwrap();
        assert!(section.find_address(name).unwrap() <= 0x400008);
    }
}
