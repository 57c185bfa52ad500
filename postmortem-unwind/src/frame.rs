//! A single unwound stack frame and its symbol/source/variable resolution.

use postmortem_common::{RegisterMap, RegisterTable};
use postmortem_dwarf::{CompilationUnit, Die, DieOffset, Tag, TypeGraph};
use postmortem_memory::{AddressSpace, Backing};
use postmortem_symbols::SymbolSection;
use postmortem_value::Dso;

use crate::error::UnwindError;

/// One frame of an unwound stack: the register state the unwinder had at
/// that point, plus whatever symbol/source/subprogram information
/// [`Frame::populate`] could resolve for its instruction pointer.
#[derive(Clone, Debug)]
pub struct Frame {
    /// Instruction pointer this frame was captured at (after relocation
    /// adjustment, per `spec.md` §4.7).
    pub ip: u64,
    /// Stack pointer this frame was captured at.
    pub sp: u64,
    /// A snapshot of every register known at this point in the walk.
    /// Never mutated after capture (`spec.md` §5's ordering guarantee).
    pub registers: RegisterTable,
    /// The enclosing function's name, if `ip` resolved to one.
    pub function: Option<String>,
    /// `ip`'s byte offset from the start of `function`.
    pub function_offset: u64,
    /// Source file name covering `ip`.
    pub filename: Option<String>,
    /// Source line number covering `ip`, `0` if unknown.
    pub line: u64,
    /// The `DW_TAG_subprogram` DIE matching `function`'s name, if found.
    pub subprogram: Option<DieOffset>,
}

impl Frame {
    pub(crate) fn new(ip: u64, sp: u64, registers: RegisterTable) -> Self {
        Frame {
            ip,
            sp,
            registers,
            function: None,
            function_offset: 0,
            filename: None,
            line: 0,
            subprogram: None,
        }
    }

    /// Resolves this frame's function, source location and subprogram DIE.
    /// Every lookup is absorbed as absent on a miss, per `spec.md` §7 —
    /// `populate` never fails.
    pub fn populate(&mut self, graph: &TypeGraph, symbols: &SymbolSection) {
        if let Some((name, offset)) = symbols.find_symbol(self.ip, false) {
            self.function = Some(name.to_string());
            self.function_offset = offset;
        } else {
            tracing::debug!(ip = self.ip, "no symbol covers this instruction pointer");
        }

        let Some(unit) = graph.unit_for_address(self.ip) else {
            tracing::debug!(ip = self.ip, "no compilation unit covers this instruction pointer");
            return;
        };

        if let Some(row) = unit.line_row_for(self.ip) {
            self.filename = unit.file_names.get(row.file_index).map(|(name, _)| name.clone());
            self.line = row.line;
        } else {
            self.filename = unit.name.clone();
            self.line = 0;
        }

        if let Some(function) = &self.function {
            if let Some(offsets) = unit.dies_by_name.get(function) {
                self.subprogram = offsets
                    .iter()
                    .find(|offset| unit.dies_by_offset.get(offset).is_some_and(Die::is_subprogram))
                    .copied();
            }
        }
    }

    /// This frame's formal parameters and local variables, resolved to
    /// addressable [`Dso`] values through its subprogram DIE's children.
    ///
    /// Supplements `spec.md`'s core model with `frames.py`'s argument/local
    /// resolution, scoped to what the type graph already exposes: each
    /// `DW_TAG_formal_parameter`/`DW_TAG_variable` child of the subprogram
    /// is resolved via its own `DW_AT_location`, evaluated against this
    /// frame's captured registers.
    pub fn variables<'u, B: Backing>(
        &self,
        unit: &'u CompilationUnit,
        object_data: &'u [u8],
        aspace: &'u AddressSpace<B>,
        register_map: &RegisterMap,
    ) -> Result<Vec<(String, Dso<'u, B>)>, UnwindError> {
        self.resolve_children(unit, object_data, aspace, register_map, |die| {
            matches!(die.tag, Tag::FormalParameter) || die.is_variable()
        })
    }

    /// This frame's formal parameters only, in declaration order.
    pub fn arguments<'u, B: Backing>(
        &self,
        unit: &'u CompilationUnit,
        object_data: &'u [u8],
        aspace: &'u AddressSpace<B>,
        register_map: &RegisterMap,
    ) -> Result<Vec<(String, Dso<'u, B>)>, UnwindError> {
        self.resolve_children(unit, object_data, aspace, register_map, |die| {
            matches!(die.tag, Tag::FormalParameter)
        })
    }

    /// This frame's local variables only (excluding formal parameters), in
    /// declaration order.
    pub fn locals<'u, B: Backing>(
        &self,
        unit: &'u CompilationUnit,
        object_data: &'u [u8],
        aspace: &'u AddressSpace<B>,
        register_map: &RegisterMap,
    ) -> Result<Vec<(String, Dso<'u, B>)>, UnwindError> {
        self.resolve_children(unit, object_data, aspace, register_map, Die::is_variable)
    }

    fn resolve_children<'u, B: Backing>(
        &self,
        unit: &'u CompilationUnit,
        object_data: &'u [u8],
        aspace: &'u AddressSpace<B>,
        register_map: &RegisterMap,
        matches_kind: impl Fn(&Die) -> bool,
    ) -> Result<Vec<(String, Dso<'u, B>)>, UnwindError> {
        let Some(subprogram_offset) = self.subprogram else {
            return Ok(Vec::new());
        };
        let Some(subprogram) = unit.dies_by_offset.get(&subprogram_offset) else {
            return Ok(Vec::new());
        };

        let frame_base = postmortem_expr::function_frame_base(
            subprogram,
            unit,
            object_data,
            self.ip,
            aspace,
            Some(&self.registers),
            register_map,
        )?;

        let mut out = Vec::new();
        for child_offset in &subprogram.children {
            let Some(child) = unit.dies_by_offset.get(child_offset) else {
                continue;
            };
            if !matches_kind(child) {
                continue;
            }
            let Some(name) = child.name.clone() else { continue };

            let address = postmortem_expr::decode_die_expression(
                child.location.as_ref(),
                unit,
                object_data,
                self.ip,
                aspace,
                Some(&self.registers),
                frame_base,
                register_map,
            )?;

            if let Some(address) = address {
                if let Ok(dso) = Dso::new(unit, *child_offset, Some(address), aspace, object_data, *register_map) {
                    out.push((name, dso));
                }
            }
        }
        Ok(out)
    }
}
