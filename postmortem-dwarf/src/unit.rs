//! Building a [`CompilationUnit`] (the source's `PyCU`) by walking a single
//! compilation unit's DIE tree once.

use std::collections::HashMap;

use fallible_iterator::FallibleIterator;
use gimli::{AttributeValue, EndianSlice, Reader, RunTimeEndian};

use crate::die::{Die, DieOffset, ExprSource, Tag};
use crate::error::DwarfError;

type Slice<'d> = EndianSlice<'d, RunTimeEndian>;
type GimliUnit<'d> = gimli::Unit<Slice<'d>>;

/// One entry of a resolved source-line program row: the address at which it
/// starts applying, the index into `file_names`, and the line number.
#[derive(Clone, Debug)]
pub struct LineRow {
    /// Address at which this row starts applying.
    pub address: u64,
    /// Index into the owning [`CompilationUnit`]'s `file_names`.
    pub file_index: usize,
    /// Source line number, `0` if unknown.
    pub line: u64,
}

/// A compilation unit's DIE tree, parsed once and cached by the owning type
/// graph, plus its line-number program resolved into `(address, file, line)`
/// rows sorted by address.
#[derive(Debug)]
pub struct CompilationUnit {
    /// Offset of this unit's header in `.debug_info`, used as its identity.
    pub unit_offset: u64,
    /// The root `DW_TAG_compile_unit` DIE.
    pub root: DieOffset,
    /// Every DIE in this unit, keyed by its offset. Injective by construction.
    pub dies_by_offset: HashMap<DieOffset, Die>,
    /// DIEs by name; collisions keep every match in declaration order.
    pub dies_by_name: HashMap<String, Vec<DieOffset>>,
    /// `DW_AT_low_pc` of the root DIE.
    pub low_pc: u64,
    /// `DW_AT_low_pc + DW_AT_high_pc` (or the literal high_pc if it is
    /// already an address) of the root DIE.
    pub high_pc: u64,
    /// `DW_AT_comp_dir`.
    pub comp_dir: Option<String>,
    /// `DW_AT_name` of the root DIE (the compiled source file).
    pub name: Option<String>,
    /// The line program's resolved file table (name, directory index).
    pub file_names: Vec<(String, Option<usize>)>,
    /// The line program's include-directory table.
    pub include_dirs: Vec<String>,
    /// Resolved line rows, sorted by address.
    pub line_rows: Vec<LineRow>,
}

impl CompilationUnit {
    /// Whether `address` falls within this unit's `[low_pc, high_pc)` range.
    pub fn contains(&self, address: u64) -> bool {
        self.low_pc != 0 && address >= self.low_pc && address < self.high_pc
    }

    /// Looks up the line-program row covering `address`, or the next one if
    /// none covers it exactly — matching `spec.md` §4.3's addr2line
    /// fallback ("fetch the entry covering `ip`, or the next one if missing").
    pub fn line_row_for(&self, address: u64) -> Option<&LineRow> {
        let idx = self.line_rows.partition_point(|r| r.address <= address);
        if idx > 0 && self.line_rows[idx - 1].address <= address {
            self.line_rows.get(idx - 1)
        } else {
            self.line_rows.get(idx)
        }
    }
}

/// Walks `unit`'s DIE tree once, building an owned [`CompilationUnit`].
pub(crate) fn build_unit(
    dwarf: &gimli::Dwarf<Slice<'_>>,
    unit: &GimliUnit<'_>,
    unit_offset: u64,
) -> Result<CompilationUnit, DwarfError> {
    let mut dies_by_offset = HashMap::new();
    let mut dies_by_name: HashMap<String, Vec<DieOffset>> = HashMap::new();
    let mut children_stack: Vec<Vec<DieOffset>> = Vec::new();
    let mut parent_stack: Vec<DieOffset> = Vec::new();
    let mut root = None;

    // Resolved ahead of the entries walk below so each DIE's `DW_AT_decl_file`
    // can be looked up against `file_names` as it is read.
    let (file_names, include_dirs, line_rows, file_base) = build_line_program(dwarf, unit)?;

    let mut cursor = unit.entries();
    while let Some((delta_depth, entry)) = cursor.next_dfs()? {
        if delta_depth <= 0 {
            for _ in delta_depth..1 {
                if let Some(finished) = children_stack.pop() {
                    if let Some(parent_offset) = parent_stack.pop() {
                        if let Some(parent) = dies_by_offset.get_mut(&parent_offset) {
                            let parent: &mut Die = parent;
                            parent.children = finished;
                        }
                    }
                }
            }
        }

        let offset = DieOffset(entry.offset().0 as u64);
        let tag = Tag::from_gimli(entry.tag());
        let name = attr_string(dwarf, unit, entry, gimli::constants::DW_AT_name);
        let base_type_offset = attr_ref(unit, entry, gimli::constants::DW_AT_type);
        let size = attr_u64(entry, gimli::constants::DW_AT_byte_size);
        let bit_size = attr_u64(entry, gimli::constants::DW_AT_bit_size);
        let bit_offset = attr_u64(entry, gimli::constants::DW_AT_data_bit_offset)
            .or_else(|| attr_u64(entry, gimli::constants::DW_AT_bit_offset));
        let upper_bound = attr_u64(entry, gimli::constants::DW_AT_upper_bound);
        let line_number = attr_u64(entry, gimli::constants::DW_AT_decl_line);
        let encoding = attr_u64(entry, gimli::constants::DW_AT_encoding);
        let file_name = attr_u64(entry, gimli::constants::DW_AT_decl_file).and_then(|idx| {
            idx.checked_sub(file_base)
                .and_then(|i| file_names.get(i as usize))
                .map(|(name, _)| name.clone())
        });

        let byte_offset = entry
            .attr_value(gimli::constants::DW_AT_data_member_location)
            .ok()
            .flatten()
            .and_then(|value| decode_member_location(&value));

        let location = expr_source(entry, gimli::constants::DW_AT_location);
        let frame_base = expr_source(entry, gimli::constants::DW_AT_frame_base);

        let low_pc = attr_u64(entry, gimli::constants::DW_AT_low_pc);
        let high_pc_attr = entry
            .attr_value(gimli::constants::DW_AT_high_pc)
            .ok()
            .flatten();
        let pc_range = low_pc.map(|lo| {
            let hi = match high_pc_attr {
                Some(AttributeValue::Udata(off)) => lo + off,
                Some(AttributeValue::Addr(addr)) => addr,
                _ => lo,
            };
            (lo, hi)
        });

        let parent = parent_stack.last().copied();

        let die = Die {
            offset,
            tag,
            name: name.clone(),
            base_type_offset,
            size,
            bit_size,
            bit_offset,
            byte_offset,
            upper_bound,
            file_name,
            line_number,
            encoding,
            location,
            frame_base,
            pc_range,
            parent,
            children: Vec::new(),
        };

        if root.is_none() {
            root = Some(offset);
        } else if let Some(siblings) = children_stack.last_mut() {
            siblings.push(offset);
        }

        if let Some(name) = name {
            dies_by_name.entry(name).or_default().push(offset);
        }

        dies_by_offset.insert(offset, die);

        if delta_depth >= 0 {
            children_stack.push(Vec::new());
            parent_stack.push(offset);
        }
    }

    while let Some(finished) = children_stack.pop() {
        if let Some(parent_offset) = parent_stack.pop() {
            if let Some(parent) = dies_by_offset.get_mut(&parent_offset) {
                parent.children = finished;
            }
        }
    }

    let root = root.ok_or(crate::error::DwarfErrorKind::CorruptedData)?;

    let (comp_dir, name) = {
        let root_die = dies_by_offset.get(&root);
        (unit.comp_dir.map(|s| s.to_string_lossy().into_owned()), root_die.and_then(|d| d.name.clone()))
    };

    let (low_pc, high_pc) = dies_by_offset
        .get(&root)
        .and_then(|d| d.pc_range)
        .unwrap_or((0, 0));

    Ok(CompilationUnit {
        unit_offset,
        root,
        dies_by_offset,
        dies_by_name,
        low_pc,
        high_pc,
        comp_dir,
        name,
        file_names,
        include_dirs,
        line_rows,
    })
}

fn attr_string(
    dwarf: &gimli::Dwarf<Slice<'_>>,
    unit: &GimliUnit<'_>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, Slice<'_>>,
    at: gimli::DwAt,
) -> Option<String> {
    let value = entry.attr_value(at).ok().flatten()?;
    dwarf
        .attr_string(unit, value)
        .ok()
        .map(|s| s.to_string_lossy().into_owned())
}

fn attr_u64(
    entry: &gimli::DebuggingInformationEntry<'_, '_, Slice<'_>>,
    at: gimli::DwAt,
) -> Option<u64> {
    entry.attr_value(at).ok().flatten().and_then(|v| v.udata_value())
}

fn attr_ref(
    unit: &GimliUnit<'_>,
    entry: &gimli::DebuggingInformationEntry<'_, '_, Slice<'_>>,
    at: gimli::DwAt,
) -> Option<DieOffset> {
    let value = entry.attr_value(at).ok().flatten()?;
    match value {
        AttributeValue::UnitRef(off) => off.to_unit_section_offset(unit).as_debug_info_offset(),
        AttributeValue::DebugInfoRef(off) => Some(off),
        _ => None,
    }
    .map(|off| DieOffset(off.0 as u64))
}

fn expr_source(
    entry: &gimli::DebuggingInformationEntry<'_, '_, Slice<'_>>,
    at: gimli::DwAt,
) -> Option<ExprSource> {
    let value = entry.attr_value(at).ok().flatten()?;
    match value {
        AttributeValue::Exprloc(expr) => Some(ExprSource::Inline(expr.0.to_vec())),
        AttributeValue::Block(block) => Some(ExprSource::Inline(block.to_vec())),
        AttributeValue::LocationListsRef(offset) => Some(ExprSource::ListOffset(offset.0 as u64)),
        AttributeValue::SecOffset(offset) => Some(ExprSource::ListOffset(offset as u64)),
        AttributeValue::Udata(offset) => Some(ExprSource::ListOffset(offset)),
        _ => None,
    }
}

/// Decodes `DW_AT_data_member_location` restricted to `DW_OP_plus_uconst`,
/// per `spec.md` §4.5: "other opcodes in member-location expressions are a
/// logged error."
fn decode_member_location(value: &AttributeValue<Slice<'_>>) -> Option<u64> {
    let bytes = match value {
        AttributeValue::Exprloc(expr) => expr.0.to_vec(),
        AttributeValue::Udata(n) => return Some(*n),
        _ => return None,
    };

    let mut reader = EndianSlice::new(&bytes, RunTimeEndian::Little);
    let opcode = reader.read_u8().ok()?;
    if opcode != gimli::constants::DW_OP_plus_uconst.0 {
        tracing::warn!(opcode, "unsupported opcode in data_member_location, expected plus_uconst");
        return None;
    }
    gimli::read::Reader::read_uleb128(&mut reader).ok()
}

/// Resolves the line-number program's file/include-directory tables and
/// every row, plus the file-index base (`0` for DWARF 5, `1` for earlier
/// versions — see `DW_AT_decl_file`'s and `DW_LNCT_path`'s version-dependent
/// indexing in DWARF 5 §6.2.4) callers need to turn a raw file index into a
/// `file_names` slot.
fn build_line_program(
    dwarf: &gimli::Dwarf<Slice<'_>>,
    unit: &GimliUnit<'_>,
) -> Result<(Vec<(String, Option<usize>)>, Vec<String>, Vec<LineRow>, u64), DwarfError> {
    let Some(program) = unit.line_program.clone() else {
        return Ok((Vec::new(), Vec::new(), Vec::new(), 1));
    };

    let header = program.header().clone();
    let include_dirs: Vec<String> = header
        .include_directories()
        .iter()
        .map(|dir| {
            dwarf
                .attr_string(unit, dir.clone())
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default()
        })
        .collect();

    let file_names: Vec<(String, Option<usize>)> = header
        .file_names()
        .iter()
        .map(|file| {
            let name = dwarf
                .attr_string(unit, file.path_name())
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let dir_index = usize::try_from(file.directory_index()).ok();
            (name, dir_index)
        })
        .collect();

    // DWARF 5 indexes the file table from 0; earlier versions from 1. The
    // `file_names` vec above is the raw, as-stored table (gimli's
    // `file_names()` slice), so the row's raw index needs that same
    // version-dependent shift applied before it indexes into it.
    let file_base = if header.encoding().version >= 5 { 0 } else { 1 };

    let mut rows = Vec::new();
    let mut state_machine = program.rows();
    while let Some((_, row)) = state_machine.next_row()? {
        if row.end_sequence() {
            continue;
        }
        let file_index = row.file_index().saturating_sub(file_base) as usize;
        rows.push(LineRow {
            address: row.address(),
            file_index,
            line: row.line().map(|l| l.get()).unwrap_or(0),
        });
    }
    rows.sort_by_key(|r| r.address);

    Ok((file_names, include_dirs, rows, file_base))
}
