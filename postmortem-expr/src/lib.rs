//! The expression evaluator: a stack machine over 64-bit integers that
//! interprets DWARF location and frame-base expressions (DWARF 4 §2.5).

mod error;
mod loclist;

pub use error::{ExpressionError, ExpressionErrorKind};

use gimli::read::Reader;
use gimli::{EndianSlice, LittleEndian};

use postmortem_common::{RegisterMap, RegisterTable};
use postmortem_dwarf::{CompilationUnit, Die, ExprSource};
use postmortem_memory::{AddressSpace, Backing};

/// Mask truncating a 64-bit value to `size` bytes (`size` in `1..=8`).
///
/// `spec.md` §9 flags the source's `BYTE_MASK[size - 1]` lookup table as
/// off-by-one for `size == 8`: this computes the mask directly instead,
/// handling the full-width case without indexing out of bounds.
pub fn truncation_mask(size: u32) -> u64 {
    debug_assert!((1..=8).contains(&size));
    if size >= 8 {
        u64::MAX
    } else {
        (1u64 << (8 * size)) - 1
    }
}

/// Interprets a DWARF expression byte stream as a stack machine over 64-bit
/// integers. See `spec.md` §4.4 for the opcode contract.
pub struct Evaluator<'a, B> {
    aspace: &'a AddressSpace<B>,
    registers: RegisterTable,
    stack: Vec<u64>,
}

impl<'a, B: Backing> Evaluator<'a, B> {
    /// Builds an evaluator. `registers` is copied, never mutated in place —
    /// callers that need the frame-base installed get a fresh table back
    /// from [`Self::into_registers`] if they need it afterward.
    ///
    /// If `frame_base` is supplied, it is installed into the register slot
    /// identified by `register_map`'s frame-pointer register number so that
    /// `DW_OP_fbreg` reads work uniformly through the normal register table.
    pub fn new(
        aspace: &'a AddressSpace<B>,
        registers: Option<&RegisterTable>,
        frame_base: Option<u64>,
        register_map: &RegisterMap,
    ) -> Self {
        let mut registers = registers.cloned().unwrap_or_default();
        if let Some(fb) = frame_base {
            registers.set(register_map.frame_pointer_register_number(), fb);
        }
        Evaluator {
            aspace,
            registers,
            stack: vec![0],
        }
    }

    fn push(&mut self, value: u64) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> u64 {
        self.stack.pop().unwrap_or(0)
    }

    fn top(&self) -> u64 {
        self.stack.last().copied().unwrap_or(0)
    }

    /// Runs `bytes` to completion and returns the top of stack.
    ///
    /// An empty stack is seeded with a single `0` at construction so a
    /// no-op expression evaluates to `0`. Unknown opcodes are logged and
    /// terminate evaluation at the current top of stack, since their
    /// operand width cannot be assumed.
    pub fn evaluate(&mut self, bytes: &[u8]) -> Result<u64, ExpressionError> {
        let mut reader = EndianSlice::new(bytes, LittleEndian);

        while !reader.is_empty() {
            let opcode = reader
                .read_u8()
                .map_err(|_| ExpressionErrorKind::MalformedStream)?;

            match opcode {
                0x03 => {
                    let addr = reader
                        .read_u64()
                        .map_err(|_| ExpressionErrorKind::MalformedStream)?;
                    self.push(addr);
                }
                0x08 => self.push(read_u8(&mut reader)? as u64),
                0x09 => self.push(read_i8(&mut reader)? as i64 as u64),
                0x0a => self.push(read_u16(&mut reader)? as u64),
                0x0b => self.push(read_i16(&mut reader)? as i64 as u64),
                0x0c => self.push(read_u32(&mut reader)? as u64),
                0x0d => self.push(read_i32(&mut reader)? as i64 as u64),
                0x0e => self.push(read_u64(&mut reader)?),
                0x0f => self.push(read_i64(&mut reader)? as u64),
                0x10 => self.push(read_uleb(&mut reader)?),
                0x11 => self.push(read_sleb(&mut reader)? as u64),

                // Stack ops. §9 flags these as mistyped in the source
                // (`self.push` instead of the internal push helper); these
                // are their intended semantics.
                0x12 => self.push(self.top()),
                0x13 => {
                    self.pop();
                }
                0x14 => {
                    let second = *self.stack.get(self.stack.len().wrapping_sub(2)).unwrap_or(&0);
                    self.push(second);
                }
                0x15 => {
                    let n = read_u8(&mut reader)? as usize;
                    let len = self.stack.len();
                    let value = len
                        .checked_sub(n + 1)
                        .and_then(|i| self.stack.get(i))
                        .copied()
                        .unwrap_or(0);
                    self.push(value);
                }
                0x16 => {
                    let len = self.stack.len();
                    if len >= 2 {
                        self.stack.swap(len - 1, len - 2);
                    }
                }
                0x17 => {
                    let len = self.stack.len();
                    if len >= 3 {
                        self.stack.swap(len - 1, len - 2);
                        self.stack.swap(len - 2, len - 3);
                    }
                }

                0x06 => {
                    let addr = self.pop();
                    let value = self.aspace.read_int_required(addr, 8)?;
                    self.push(value);
                }
                0x94 => {
                    let size = read_u8(&mut reader)? as usize;
                    let addr = self.pop();
                    let value = self.aspace.read_int_required(addr, size)?;
                    self.push(value);
                }

                0x19 => {
                    let value = self.pop() as i64;
                    self.push(value.unsigned_abs());
                }
                0x1f => {
                    let value = self.pop() as i64;
                    self.push(value.wrapping_neg() as u64);
                }
                0x20 => {
                    let value = self.pop();
                    self.push(!value);
                }
                0x1a => self.binop(|a, b| a & b),
                0x21 => self.binop(|a, b| a | b),
                0x27 => self.binop(|a, b| a ^ b),
                0x22 => self.binop(|a, b| a.wrapping_add(b)),
                0x1c => self.binop(|a, b| a.wrapping_sub(b)),
                0x1e => self.binop(|a, b| a.wrapping_mul(b)),
                0x1b => self.binop(|a, b| if b == 0 { 0 } else { a.wrapping_div(b) }),
                0x1d => self.binop(|a, b| if b == 0 { 0 } else { a.wrapping_rem(b) }),
                0x24 => self.binop(|a, b| a.wrapping_shl(b as u32)),
                0x25 => self.binop(|a, b| a.wrapping_shr(b as u32)),
                0x23 => {
                    let n = read_uleb(&mut reader)?;
                    let top = self.pop();
                    self.push(top.wrapping_add(n));
                }

                0x29 => self.binop(|a, b| (a == b) as u64),
                0x2e => self.binop(|a, b| (a != b) as u64),
                0x2d => self.binop(|a, b| ((a as i64) < (b as i64)) as u64),
                0x2c => self.binop(|a, b| ((a as i64) <= (b as i64)) as u64),
                0x2b => self.binop(|a, b| ((a as i64) > (b as i64)) as u64),
                0x2a => self.binop(|a, b| ((a as i64) >= (b as i64)) as u64),

                0x30..=0x4f => self.push((opcode - 0x30) as u64),
                0x50..=0x6f => {
                    let reg = (opcode - 0x50) as u16;
                    self.push(self.registers.get(reg).unwrap_or(0));
                }
                0x90 => {
                    let reg = read_uleb(&mut reader)? as u16;
                    self.push(self.registers.get(reg).unwrap_or(0));
                }
                0x70..=0x8f => {
                    let reg = (opcode - 0x70) as u16;
                    let offs = read_sleb(&mut reader)?;
                    let base = self.registers.get(reg).unwrap_or(0) as i64;
                    self.push(base.wrapping_add(offs) as u64);
                }
                0x92 => {
                    let reg = read_uleb(&mut reader)? as u16;
                    let offs = read_sleb(&mut reader)?;
                    let base = self.registers.get(reg).unwrap_or(0) as i64;
                    self.push(base.wrapping_add(offs) as u64);
                }

                0x91 => {
                    let offs = read_sleb(&mut reader)?;
                    let frame_base = self.registers.get(6).unwrap_or(0) as i64;
                    let addr = frame_base.wrapping_add(offs) as u64;
                    let value = self.aspace.read_int_required(addr, 8)?;
                    self.push(value);
                }

                0x96 => {}

                other => {
                    tracing::warn!(opcode = other, "unsupported DWARF expression opcode");
                    break;
                }
            }
        }

        Ok(self.top())
    }

    fn binop(&mut self, f: impl FnOnce(u64, u64) -> u64) {
        let b = self.pop();
        let a = self.pop();
        self.push(f(a, b));
    }

    /// Consumes the evaluator, returning its (possibly frame-base-seeded)
    /// register table.
    pub fn into_registers(self) -> RegisterTable {
        self.registers
    }
}

fn read_u8(r: &mut EndianSlice<'_, LittleEndian>) -> Result<u8, ExpressionErrorKind> {
    r.read_u8().map_err(|_| ExpressionErrorKind::MalformedStream)
}
fn read_i8(r: &mut EndianSlice<'_, LittleEndian>) -> Result<i8, ExpressionErrorKind> {
    Ok(read_u8(r)? as i8)
}
fn read_u16(r: &mut EndianSlice<'_, LittleEndian>) -> Result<u16, ExpressionErrorKind> {
    r.read_u16().map_err(|_| ExpressionErrorKind::MalformedStream)
}
fn read_i16(r: &mut EndianSlice<'_, LittleEndian>) -> Result<i16, ExpressionErrorKind> {
    Ok(read_u16(r)? as i16)
}
fn read_u32(r: &mut EndianSlice<'_, LittleEndian>) -> Result<u32, ExpressionErrorKind> {
    r.read_u32().map_err(|_| ExpressionErrorKind::MalformedStream)
}
fn read_i32(r: &mut EndianSlice<'_, LittleEndian>) -> Result<i32, ExpressionErrorKind> {
    Ok(read_u32(r)? as i32)
}
fn read_u64(r: &mut EndianSlice<'_, LittleEndian>) -> Result<u64, ExpressionErrorKind> {
    r.read_u64().map_err(|_| ExpressionErrorKind::MalformedStream)
}
fn read_i64(r: &mut EndianSlice<'_, LittleEndian>) -> Result<i64, ExpressionErrorKind> {
    Ok(read_u64(r)? as i64)
}
fn read_uleb(r: &mut EndianSlice<'_, LittleEndian>) -> Result<u64, ExpressionErrorKind> {
    r.read_uleb128().map_err(|_| ExpressionErrorKind::MalformedStream)
}
fn read_sleb(r: &mut EndianSlice<'_, LittleEndian>) -> Result<i64, ExpressionErrorKind> {
    r.read_sleb128().map_err(|_| ExpressionErrorKind::MalformedStream)
}

/// Resolves the expression source of `die`'s attribute in two modes: an
/// inline expression is run as-is; a location-list offset is resolved to
/// the entry covering `ip` (using `unit`'s low-pc as the list base) before
/// being run. Returns `Ok(None)` if the attribute is absent or no
/// location-list entry covers `ip` — both "absent", not errors.
pub fn decode_die_expression<B: Backing>(
    source: Option<&ExprSource>,
    unit: &CompilationUnit,
    object_data: &[u8],
    ip: u64,
    aspace: &'_ AddressSpace<B>,
    registers: Option<&RegisterTable>,
    frame_base: Option<u64>,
    register_map: &RegisterMap,
) -> Result<Option<u64>, ExpressionError> {
    let Some(source) = source else {
        return Ok(None);
    };

    let bytes = match source {
        ExprSource::Inline(bytes) => bytes.clone(),
        ExprSource::ListOffset(offset) => {
            match loclist::find_entry(object_data, *offset, unit.low_pc, ip)? {
                Some(bytes) => bytes,
                None => return Ok(None),
            }
        }
    };

    let mut evaluator = Evaluator::new(aspace, registers, frame_base, register_map);
    Ok(Some(evaluator.evaluate(&bytes)?))
}

/// The frame-base routine applied to a frame's subprogram DIE
/// (`DW_AT_frame_base`), per `spec.md` §4.4.
pub fn function_frame_base<B: Backing>(
    subprogram: &Die,
    unit: &CompilationUnit,
    object_data: &[u8],
    ip: u64,
    aspace: &'_ AddressSpace<B>,
    registers: Option<&RegisterTable>,
    register_map: &RegisterMap,
) -> Result<Option<u64>, ExpressionError> {
    decode_die_expression(
        subprogram.frame_base.as_ref(),
        unit,
        object_data,
        ip,
        aspace,
        registers,
        None,
        register_map,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use postmortem_common::Arch;

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

    fn fixture() -> AddressSpace<VecBacking> {
        let mut mem = vec![0u8; 0x10000];
        mem[0xdff8..0xe000].copy_from_slice(&0xdead_beef_0000u64.to_le_bytes());
        AddressSpace::new(
            vec![postmortem_memory::LoadSegment::new(0x7fff_0000, 0x7fff_ffff, 0)],
            VecBacking(mem),
        )
    }

    #[test]
    fn breg_then_deref_reads_the_pointed_at_value() {
        let space = fixture();
        let map = RegisterMap::new(Arch::Amd64);
        let mut registers = RegisterTable::new();
        registers.set(map.frame_pointer_register_number(), 0x7fff_e000);

        // DW_OP_breg6 -8; DW_OP_deref
        let bytes = [0x76u8, 0x78, 0x06];
        let mut evaluator = Evaluator::new(&space, Some(&registers), None, &map);
        let value = evaluator.evaluate(&bytes).unwrap();
        assert_eq!(value, 0xdead_beef_0000);
    }

    #[test]
    fn empty_expression_evaluates_to_zero() {
        let space = fixture();
        let map = RegisterMap::new(Arch::Amd64);
        let mut evaluator = Evaluator::new(&space, None, None, &map);
        assert_eq!(evaluator.evaluate(&[]).unwrap(), 0);
    }

    #[test]
    fn dup_duplicates_the_top_of_stack() {
        let space = fixture();
        let map = RegisterMap::new(Arch::Amd64);
        // DW_OP_lit5 ; DW_OP_dup ; DW_OP_plus -> 10
        let bytes = [0x35u8, 0x12, 0x22];
        let mut evaluator = Evaluator::new(&space, None, None, &map);
        assert_eq!(evaluator.evaluate(&bytes).unwrap(), 10);
    }

    #[test]
    fn swap_exchanges_the_top_two_values() {
        let space = fixture();
        let map = RegisterMap::new(Arch::Amd64);
        // DW_OP_lit2 ; DW_OP_lit5 ; DW_OP_swap ; DW_OP_minus -> 5 - 2 = 3
        let bytes = [0x32u8, 0x35, 0x16, 0x1c];
        let mut evaluator = Evaluator::new(&space, None, None, &map);
        assert_eq!(evaluator.evaluate(&bytes).unwrap(), 3);
    }

    #[test]
    fn drop_discards_the_top_of_stack() {
        let space = fixture();
        let map = RegisterMap::new(Arch::Amd64);
        // DW_OP_lit5 ; DW_OP_lit3 ; DW_OP_drop -> 3 is discarded, top is 5
        let bytes = [0x35u8, 0x33, 0x13];
        let mut evaluator = Evaluator::new(&space, None, None, &map);
        assert_eq!(evaluator.evaluate(&bytes).unwrap(), 5);
    }

    #[test]
    fn over_copies_the_second_entry_to_the_top() {
        let space = fixture();
        let map = RegisterMap::new(Arch::Amd64);
        // DW_OP_lit5 ; DW_OP_lit7 ; DW_OP_over -> pushes a copy of 5
        let bytes = [0x35u8, 0x37, 0x14];
        let mut evaluator = Evaluator::new(&space, None, None, &map);
        assert_eq!(evaluator.evaluate(&bytes).unwrap(), 5);
    }

    #[test]
    fn pick_copies_the_nth_entry_from_the_top() {
        let space = fixture();
        let map = RegisterMap::new(Arch::Amd64);
        // DW_OP_lit5 ; DW_OP_lit7 ; DW_OP_lit9 ; DW_OP_pick 1 -> pushes a
        // copy of the second entry from the top (7)
        let bytes = [0x35u8, 0x37, 0x39, 0x15, 0x01];
        let mut evaluator = Evaluator::new(&space, None, None, &map);
        assert_eq!(evaluator.evaluate(&bytes).unwrap(), 7);
    }

    #[test]
    fn rot_rotates_the_top_three_values() {
        let space = fixture();
        let map = RegisterMap::new(Arch::Amd64);
        // DW_OP_lit10 ; DW_OP_lit20 ; DW_OP_lit30 ; DW_OP_rot: old top (30)
        // becomes new third, old second (20) becomes new top, old third
        // (10) becomes new second.
        let bytes = [0x3au8, 0x44, 0x4e, 0x17];
        let mut evaluator = Evaluator::new(&space, None, None, &map);
        assert_eq!(evaluator.evaluate(&bytes).unwrap(), 20);
    }

    #[test]
    fn truncation_mask_handles_full_width() {
        assert_eq!(truncation_mask(1), 0xff);
        assert_eq!(truncation_mask(8), u64::MAX);
    }
}
