//! The stack unwinder: walks a thread's register snapshot outward into an
//! ordered list of [`Frame`]s, preferring call-frame information and
//! falling back to a frame-pointer walk where no CFI row covers the
//! current instruction pointer.

mod error;
mod frame;

pub use error::{UnwindError, UnwindErrorKind};
pub use frame::Frame;

use gimli::{BaseAddresses, CfaRule, EhFrame, EndianSlice, Register, RegisterRule, RunTimeEndian, UnwindContext, UnwindSection};

use postmortem_common::{RawRegisters, RegisterMap, RegisterTable};
use postmortem_memory::{AddressSpace, Backing};

/// Hard cap on unwound frames, guarding against a corrupt stack whose
/// frame-pointer chain loops or drifts without ever failing a read.
const MAX_FRAMES: usize = 4096;

/// Every DWARF register number this workspace's register maps assign a
/// canonical name to; the range swept when applying a CFI row's rules.
const SWEEP_RANGE: std::ops::RangeInclusive<u16> = 0..=63;

/// Unwinds a thread's register snapshot using an object's `.eh_frame` call
/// frame information, falling back to a frame-pointer walk.
pub struct Unwinder<'a, B> {
    aspace: &'a AddressSpace<B>,
    register_map: RegisterMap,
    eh_frame: Option<EhFrame<EndianSlice<'a, RunTimeEndian>>>,
    bases: BaseAddresses,
    load_address_diff: i64,
}

impl<'a, B: Backing> Unwinder<'a, B> {
    /// Builds an unwinder. `object_data` is the symbol file's bytes (its
    /// `.eh_frame` section is read directly, borrowed for the unwinder's
    /// lifetime); `load_address_diff` is `spec.md` §4.8's `sym_file.entry -
    /// core_entry` delta.
    pub fn new(
        object_data: &'a [u8],
        aspace: &'a AddressSpace<B>,
        register_map: RegisterMap,
        load_address_diff: i64,
    ) -> Self {
        let eh_frame = postmortem_dwarf::find_raw_section(object_data, ".eh_frame")
            .map(|bytes| EhFrame::new(bytes, RunTimeEndian::Little));

        Unwinder {
            aspace,
            register_map,
            eh_frame,
            bases: BaseAddresses::default(),
            load_address_diff,
        }
    }

    /// Unwinds from `raw`'s register snapshot to the outermost frame this
    /// unwinder can reach. Never fails: CFI misses, a frame-pointer-walk
    /// regression and a non-positive return address are all normal
    /// end-of-stack conditions that simply stop the walk (`spec.md` §7).
    pub fn unwind(&self, raw: &RawRegisters) -> Vec<Frame> {
        let mut table = self.register_map.create_register_table(raw);
        let mut frames = Vec::new();
        let ra_num = self.register_map.ra_register_number();
        let sp_num = self.register_map.sp_register_number();

        for _ in 0..MAX_FRAMES {
            let adjusted_ra = table.get(ra_num).map(|ra| {
                (ra as i64).wrapping_add(self.load_address_diff) as u64
            });
            let Some(ra) = adjusted_ra else { break };
            table.set(ra_num, ra);

            let ip = ra;
            if (ip as i64) <= 0 {
                break;
            }

            let sp = table.get(sp_num).unwrap_or(0);
            frames.push(Frame::new(ip, sp, table.clone()));

            table = match self.step_cfi(&table, ip) {
                Some(next) => next,
                None => match self.step_frame_pointer(&table) {
                    Some(next) => next,
                    None => break,
                },
            };
        }

        if frames.len() == MAX_FRAMES {
            tracing::warn!(MAX_FRAMES, "unwind hit the frame cap, stack may be corrupt");
        }

        frames
    }

    fn step_cfi(&self, table: &RegisterTable, ip: u64) -> Option<RegisterTable> {
        let eh_frame = self.eh_frame.as_ref()?;
        let mut ctx = UnwindContext::new();
        let fde = eh_frame
            .fde_for_address(&self.bases, ip, EhFrame::cie_from_offset)
            .ok()?;
        let row = fde
            .unwind_info_for_address(eh_frame, &self.bases, &mut ctx, ip)
            .ok()?;

        let cfa = match row.cfa() {
            CfaRule::RegisterAndOffset { register, offset } => {
                let base = table.get(register.0)? as i64;
                (base + offset) as u64
            }
            CfaRule::Expression(expr) => {
                self.evaluate_cfi_expression(expr.get(eh_frame).ok()?, table, 0)?
            }
        };

        let mut new_table = RegisterTable::new();
        new_table.set_cfa(cfa);

        for reg_num in SWEEP_RANGE {
            let rule = row.register(Register(reg_num));
            let value = match rule {
                RegisterRule::Undefined => continue,
                RegisterRule::SameValue => table.get(reg_num),
                RegisterRule::Offset(offset) => {
                    self.aspace.read_int((cfa as i64 + offset) as u64, 8).ok().flatten()
                }
                RegisterRule::ValOffset(offset) => Some((cfa as i64 + offset) as u64),
                RegisterRule::Register(r) => table.get(r.0),
                RegisterRule::Expression(expr) => expr
                    .get(eh_frame)
                    .ok()
                    .and_then(|expr| self.evaluate_cfi_expression(expr, table, cfa))
                    .and_then(|addr| self.aspace.read_int(addr, 8).ok().flatten()),
                RegisterRule::ValExpression(expr) => expr
                    .get(eh_frame)
                    .ok()
                    .and_then(|expr| self.evaluate_cfi_expression(expr, table, cfa)),
                RegisterRule::Architectural => None,
                _ => None,
            };
            if let Some(value) = value {
                new_table.set(reg_num, value);
            }
        }

        new_table.set_pc(ip);
        new_table.set(self.register_map.sp_register_number(), cfa);
        Some(new_table)
    }

    /// DWARF call-frame expressions implicitly start with the CFA already
    /// on the stack (DWARF 4 §6.4.2); this is not a register lookup, so
    /// rather than reconstruct that as a special case, the CFA is pushed
    /// with a synthetic leading `DW_OP_constu` and the result run through
    /// the same stack-machine evaluator location expressions use.
    fn evaluate_cfi_expression(
        &self,
        expr: gimli::Expression<EndianSlice<'a, RunTimeEndian>>,
        table: &RegisterTable,
        cfa: u64,
    ) -> Option<u64> {
        use gimli::Reader;
        let tail = expr.0.to_slice().ok()?.into_owned();

        let mut bytes = vec![0x10u8];
        encode_uleb128(cfa, &mut bytes);
        bytes.extend_from_slice(&tail);

        let mut evaluator = postmortem_expr::Evaluator::new(self.aspace, Some(table), None, &self.register_map);
        evaluator.evaluate(&bytes).ok()
    }

    fn step_frame_pointer(&self, table: &RegisterTable) -> Option<RegisterTable> {
        let fp_num = self.register_map.frame_pointer_register_number();
        let ra_num = self.register_map.ra_register_number();
        let sp_num = self.register_map.sp_register_number();

        let old_fp = table.get(fp_num)?;
        let new_ra = self.aspace.read_int(old_fp + 8, 8).ok().flatten()?;
        let new_fp = self.aspace.read_int(old_fp, 8).ok().flatten()?;

        let progressed = if self.register_map.stack_grows_down() {
            new_fp > old_fp
        } else {
            new_fp < old_fp
        };
        if !progressed {
            return None;
        }

        let mut new_table = table.clone();
        new_table.set(ra_num, new_ra);
        new_table.set(fp_num, new_fp);
        new_table.set(sp_num, old_fp + 16);
        Some(new_table)
    }
}

fn encode_uleb128(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        out.push(byte);
        if value == 0 {
            break;
        }
    }
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
        // old RBP = 0x7fffe000; [RBP] = saved RBP 0x7fffe040; [RBP+8] = saved RA 0x400abc
        mem[0xe000..0xe008].copy_from_slice(&0x7fffe040u64.to_le_bytes());
        mem[0xe008..0xe010].copy_from_slice(&0x400abcu64.to_le_bytes());
        AddressSpace::new(
            vec![postmortem_memory::LoadSegment::new(0x7fff_0000, 0x7fff_ffff, 0x7fff_0000)],
            VecBacking(mem),
        )
    }

    #[test]
    fn frame_pointer_fallback_unwinds_one_frame() {
        let space = fixture();
        let map = RegisterMap::new(Arch::Amd64);
        let unwinder = Unwinder::new(&[], &space, map, 0);

        let mut raw = RawRegisters::new();
        raw.set("rip", 0x0040_1000)
            .set("rsp", 0x7fff_e000)
            .set("rbp", 0x7fff_e000);

        let frames = unwinder.unwind(&raw);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].ip, 0x0040_1000);
        assert_eq!(frames[1].ip, 0x400abc);
        assert_eq!(frames[1].sp, 0x7fffe010);
    }

    #[test]
    fn frame_pointer_regression_terminates_the_walk() {
        let mut mem = vec![0u8; 0x10000];
        // saved RBP equal to current RBP: no progress.
        mem[0xe000..0xe008].copy_from_slice(&0x7fffe000u64.to_le_bytes());
        mem[0xe008..0xe010].copy_from_slice(&0x400abcu64.to_le_bytes());
        let space = AddressSpace::new(
            vec![postmortem_memory::LoadSegment::new(0x7fff_0000, 0x7fff_ffff, 0x7fff_0000)],
            VecBacking(mem),
        );
        let map = RegisterMap::new(Arch::Amd64);
        let unwinder = Unwinder::new(&[], &space, map, 0);

        let mut raw = RawRegisters::new();
        raw.set("rip", 0x0040_1000)
            .set("rsp", 0x7fff_e000)
            .set("rbp", 0x7fff_e000);

        let frames = unwinder.unwind(&raw);
        assert_eq!(frames.len(), 1);
    }
}
