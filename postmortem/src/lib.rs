//! A post-mortem native-binary debugger core: wires the type graph, symbol
//! index, address space, expression evaluator, stack unwinder and process
//! model into one [`DebuggerSession`] over a symbol file and, optionally, a
//! core image.
//!
//! `spec.md` §9 flags the original's module-level "current thread"/"current
//! frame" globals for replacement; [`DebuggerSession`] is that replacement —
//! an owned, non-global handle an embedder can hold more than one of.

#![warn(missing_docs)]

mod error;

pub use error::{SessionError, SessionErrorKind};

pub use postmortem_common::{Arch, ByteView, CpuFamily, RawRegisters, RegisterMap, RegisterTable};
pub use postmortem_dwarf::{self as dwarf, CompilationUnit, Die, DieOffset, DwarfError, ExprSource, Tag, TypeGraph};
pub use postmortem_expr::{self as expr, Evaluator, ExpressionError};
pub use postmortem_memory::{self as memory, AddressSpace, Backing, LoadSegment, MemoryError};
pub use postmortem_process::{self as process, CoreDump, LiveAttach, Process, ProcessError, Thread};
pub use postmortem_symbols::{self as symbols, addr2line, Addr2Line, Symbol, SymbolSection};
pub use postmortem_unwind::{self as unwind, Frame, UnwindError, Unwinder};
pub use postmortem_value::{self as value, Dso, ValueError};

#[cfg(feature = "tracing-subscriber")]
/// Installs a `tracing-subscriber` `fmt` layer reading `RUST_LOG`, for
/// embedders that want the library's `tracing` output without wiring up
/// their own subscriber. A no-op if a global subscriber is already set.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

use std::path::Path;

/// A debugging session over one symbol file, optionally paired with a core
/// image: the type graph, symbol index, address space and thread set an
/// embedder needs to resolve frames and read typed values.
pub struct DebuggerSession {
    symbol_data: ByteView<'static>,
    type_graph: TypeGraph,
    symbols: SymbolSection,
    address_space: AddressSpace<ByteView<'static>>,
    register_map: RegisterMap,
    threads: Vec<Thread>,
    load_address_diff: i64,
}

impl DebuggerSession {
    /// Opens a symbol file and, optionally, a core image.
    ///
    /// When `core_path` is `None`, the address space is backed by the
    /// symbol file's own `PT_LOAD` segments (its as-linked static image)
    /// rather than a captured process's memory, and no threads are
    /// available to unwind.
    pub fn open(
        symbol_path: impl AsRef<Path>,
        core_path: Option<impl AsRef<Path>>,
        arch: Arch,
    ) -> Result<Self, SessionError> {
        let symbol_data = ByteView::open(symbol_path)?;
        let type_graph = TypeGraph::parse(&symbol_data)?;
        let symbols = SymbolSection::from_elf_bytes(&symbol_data)?;
        let register_map = RegisterMap::new(arch);

        let (memory_data, threads, load_address_diff) = match core_path {
            Some(core_path) => {
                let core_data = ByteView::open(core_path)?;
                let sym_elf = goblin::elf::Elf::parse(&symbol_data)?;
                let core_dump = CoreDump::parse(&core_data, Some(sym_elf.header.e_entry))?;
                (core_data, core_dump.threads, core_dump.load_address_diff)
            }
            None => (symbol_data.clone(), Vec::new(), 0),
        };

        let segments = load_segments(&memory_data)?;
        let address_space = AddressSpace::new(segments, memory_data);

        Ok(DebuggerSession {
            symbol_data,
            type_graph,
            symbols,
            address_space,
            register_map,
            threads,
            load_address_diff,
        })
    }

    /// The parsed DWARF type graph.
    pub fn type_graph(&self) -> &TypeGraph {
        &self.type_graph
    }

    /// The symbol table index.
    pub fn symbols(&self) -> &SymbolSection {
        &self.symbols
    }

    /// The address space backing this session's reads.
    pub fn address_space(&self) -> &AddressSpace<ByteView<'static>> {
        &self.address_space
    }

    /// Every thread this session knows about (empty unless opened with a
    /// core image).
    pub fn threads(&self) -> &[Thread] {
        &self.threads
    }

    /// Builds an unwinder bound to this session's symbol file and address
    /// space.
    pub fn unwinder(&self) -> Unwinder<'_, ByteView<'static>> {
        Unwinder::new(
            self.symbol_data.as_slice(),
            &self.address_space,
            self.register_map,
            self.load_address_diff,
        )
    }

    /// Unwinds the `index`-th thread's stack and resolves every frame's
    /// function, source location and subprogram DIE.
    pub fn unwind_thread(&self, index: usize) -> Option<Vec<Frame>> {
        let thread = self.threads.get(index)?;
        let mut frames = self.unwinder().unwind(&thread.registers);
        for frame in &mut frames {
            frame.populate(&self.type_graph, &self.symbols);
        }
        Some(frames)
    }

    /// Wraps a DIE as an addressable [`Dso`] over this session's address
    /// space.
    pub fn value<'s>(
        &'s self,
        unit: &'s CompilationUnit,
        die: DieOffset,
        address: Option<u64>,
    ) -> Result<Dso<'s, ByteView<'static>>, ValueError> {
        Dso::new(
            unit,
            die,
            address,
            &self.address_space,
            self.symbol_data.as_slice(),
            self.register_map,
        )
    }
}

fn load_segments(data: &[u8]) -> Result<Vec<LoadSegment>, SessionError> {
    let elf = goblin::elf::Elf::parse(data)?;
    Ok(elf
        .program_headers
        .iter()
        .filter(|ph| ph.p_type == goblin::elf::program_header::PT_LOAD)
        .map(|ph| LoadSegment::new(ph.p_vaddr, ph.p_vaddr + ph.p_filesz, ph.p_offset))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_segments_reads_pt_load_headers_of_a_minimal_elf() {
        // A from-scratch 64-bit ELF header plus one PT_LOAD program header
        // mapping file offset 0 to virtual address 0x400000, just enough
        // for goblin to parse program headers without a .dynamic/.symtab.
        let mut data = vec![0u8; 0x78 + 0x38];
        data[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        data[4] = 2; // ELFCLASS64
        data[5] = 1; // little-endian
        data[6] = 1; // EI_VERSION
        data[16..18].copy_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        data[18..20].copy_from_slice(&62u16.to_le_bytes()); // EM_X86_64
        data[20..24].copy_from_slice(&1u32.to_le_bytes());
        data[24..32].copy_from_slice(&0x400000u64.to_le_bytes()); // e_entry
        data[32..40].copy_from_slice(&0u64.to_le_bytes()); // e_phoff placeholder, fixed below
        data[40..48].copy_from_slice(&0u64.to_le_bytes()); // e_shoff
        data[52..54].copy_from_slice(&64u16.to_le_bytes()); // e_ehsize
        data[54..56].copy_from_slice(&56u16.to_le_bytes()); // e_phentsize
        data[56..58].copy_from_slice(&1u16.to_le_bytes()); // e_phnum
        data[32..40].copy_from_slice(&0x40u64.to_le_bytes()); // e_phoff

        let ph_off = 0x40;
        data[ph_off..ph_off + 4].copy_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        data[ph_off + 4..ph_off + 8].copy_from_slice(&5u32.to_le_bytes()); // p_flags
        data[ph_off + 8..ph_off + 16].copy_from_slice(&0u64.to_le_bytes()); // p_offset
        data[ph_off + 16..ph_off + 24].copy_from_slice(&0x400000u64.to_le_bytes()); // p_vaddr
        data[ph_off + 24..ph_off + 32].copy_from_slice(&0x400000u64.to_le_bytes()); // p_paddr
        let data_len = data.len() as u64;
        data[ph_off + 32..ph_off + 40].copy_from_slice(&data_len.to_le_bytes()); // p_filesz
        data[ph_off + 40..ph_off + 48].copy_from_slice(&data_len.to_le_bytes()); // p_memsz
        data[ph_off + 48..ph_off + 56].copy_from_slice(&0x1000u64.to_le_bytes()); // p_align

        let segments = load_segments(&data).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].va_start, 0x400000);
        assert_eq!(segments[0].file_offset, 0);
    }
}
