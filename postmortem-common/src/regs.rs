//! Architectural register maps and the register table that flows between the
//! unwinder and the expression evaluator.
//!
//! A [`RegisterMap`] translates between canonical register names, ABI
//! register numbers and DWARF register numbers for one architecture, and
//! knows which number holds the return address, stack pointer and frame
//! pointer. [`RegisterTable`] is the runtime currency built from a map plus a
//! raw register snapshot: a DWARF-number-keyed table of 64-bit values, plus
//! the two synthetic `cfa`/`pc` slots.

use std::collections::HashMap;

use crate::types::Arch;

/// DWARF register numbers for `x86-64`, per the System V AMD64 ABI.
///
/// Mirrors `register_map.py`'s `x86_64` table in the original implementation,
/// keyed by canonical name instead of a bespoke string.
pub const X86_64_DWARF_NUMBERS: &[(&str, u16)] = &[
    ("rax", 0),
    ("rdx", 1),
    ("rcx", 2),
    ("rbx", 3),
    ("rsi", 4),
    ("rdi", 5),
    ("rbp", 6),
    ("rsp", 7),
    ("r8", 8),
    ("r9", 9),
    ("r10", 10),
    ("r11", 11),
    ("r12", 12),
    ("r13", 13),
    ("r14", 14),
    ("r15", 15),
    ("ra", 16),
    ("rip", 16),
    ("xmm0", 17),
    ("xmm1", 18),
    ("xmm2", 19),
    ("xmm3", 20),
    ("xmm4", 21),
    ("xmm5", 22),
    ("xmm6", 23),
    ("xmm7", 24),
    ("xmm8", 25),
    ("xmm9", 26),
    ("xmm10", 27),
    ("xmm11", 28),
    ("xmm12", 29),
    ("xmm13", 30),
    ("xmm14", 31),
    ("xmm15", 32),
    ("st0", 33),
    ("st1", 34),
    ("st2", 35),
    ("st3", 36),
    ("st4", 37),
    ("st5", 38),
    ("st6", 39),
    ("st7", 40),
    ("mm0", 41),
    ("mm1", 42),
    ("mm2", 43),
    ("mm3", 44),
    ("mm4", 45),
    ("mm5", 46),
    ("mm6", 47),
    ("mm7", 48),
    ("rflags", 49),
    ("es", 50),
    ("cs", 51),
    ("ss", 52),
    ("ds", 53),
    ("fs", 54),
    ("gs", 55),
    ("fs_base", 58),
    ("gs_base", 59),
];

/// The raw register values captured from a thread snapshot (`PRSTATUS`, a
/// live `ptrace` `GETREGS` call, ...), keyed by canonical lower-case name.
#[derive(Clone, Debug, Default)]
pub struct RawRegisters {
    values: HashMap<String, u64>,
}

impl RawRegisters {
    /// Creates an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a register value. Names are matched case-insensitively
    /// against the register map, per `spec.md`'s live-attach interface.
    pub fn set(&mut self, name: &str, value: u64) -> &mut Self {
        self.values.insert(name.to_ascii_lowercase(), value);
        self
    }

    /// Looks up a raw value by canonical name.
    pub fn get(&self, name: &str) -> Option<u64> {
        self.values.get(&name.to_ascii_lowercase()).copied()
    }
}

/// A table of register values keyed by DWARF register number, the currency
/// shared by the unwinder and the expression evaluator.
///
/// Carries two synthetic slots beyond the architectural registers: `cfa`
/// (the Canonical Frame Address) and `pc` (the instruction pointer at which
/// the table is valid).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterTable {
    by_number: HashMap<u16, u64>,
    cfa: Option<u64>,
    pc: Option<u64>,
}

impl RegisterTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the value of a DWARF-numbered register.
    pub fn get(&self, number: u16) -> Option<u64> {
        self.by_number.get(&number).copied()
    }

    /// Writes the value of a DWARF-numbered register.
    pub fn set(&mut self, number: u16, value: u64) {
        self.by_number.insert(number, value);
    }

    /// Returns the Canonical Frame Address slot.
    pub fn cfa(&self) -> Option<u64> {
        self.cfa
    }

    /// Sets the Canonical Frame Address slot.
    pub fn set_cfa(&mut self, value: u64) {
        self.cfa = Some(value);
    }

    /// Returns the synthetic `pc` slot.
    pub fn pc(&self) -> Option<u64> {
        self.pc
    }

    /// Sets the synthetic `pc` slot.
    pub fn set_pc(&mut self, value: u64) {
        self.pc = Some(value);
    }
}

/// Translates between canonical register names, DWARF register numbers and
/// architectural roles for one [`Arch`].
#[derive(Clone, Copy, Debug)]
pub struct RegisterMap {
    arch: Arch,
}

impl RegisterMap {
    /// Builds a register map for `arch`.
    ///
    /// Only `x86-64` is populated at present; `spec.md` frames this as a
    /// Non-goal at launch with an explicit note that the map is pluggable,
    /// so the table lookup is architecture-keyed rather than hardcoded.
    pub fn new(arch: Arch) -> Self {
        RegisterMap { arch }
    }

    fn table(&self) -> &'static [(&'static str, u16)] {
        match self.arch {
            Arch::Amd64 | Arch::Amd64h | Arch::Amd64Unknown => X86_64_DWARF_NUMBERS,
            _ => &[],
        }
    }

    /// Resolves a canonical register name to its DWARF register number.
    pub fn number_for_name(&self, name: &str) -> Option<u16> {
        let needle = name.to_ascii_lowercase();
        self.table()
            .iter()
            .find(|(n, _)| *n == needle)
            .map(|(_, num)| *num)
    }

    /// The DWARF number of the return-address register (`RA`/`RIP` alias on x86-64).
    pub fn ra_register_number(&self) -> u16 {
        16
    }

    /// The DWARF number of the stack-pointer register (`RSP` on x86-64).
    pub fn sp_register_number(&self) -> u16 {
        7
    }

    /// The DWARF number of the frame-pointer register (`RBP` on x86-64).
    pub fn frame_pointer_register_number(&self) -> u16 {
        6
    }

    /// Whether the stack grows toward lower addresses on this architecture.
    ///
    /// `spec.md` §9 flags the frame-pointer fallback's `new_rbp < rbp`
    /// regression check as architecture-specific; this ties that check to
    /// the register map instead of hardcoding it. `true` for every
    /// architecture this map currently supports.
    pub fn stack_grows_down(&self) -> bool {
        true
    }

    /// Builds the universal [`RegisterTable`] from a raw snapshot: copies
    /// every known register by name, then seeds `cfa` from the stack
    /// pointer and `pc`/`RA` from the instruction pointer.
    pub fn create_register_table(&self, raw: &RawRegisters) -> RegisterTable {
        let mut table = RegisterTable::new();
        for (name, number) in self.table() {
            if let Some(value) = raw.get(name) {
                table.set(*number, value);
            }
        }

        if let Some(sp) = table.get(self.sp_register_number()) {
            table.set_cfa(sp);
        }
        if let Some(ip) = raw.get("rip") {
            table.set(self.ra_register_number(), ip);
            table.set_pc(ip);
        }

        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_canonical_roles() {
        let map = RegisterMap::new(Arch::Amd64);
        assert_eq!(map.ra_register_number(), 16);
        assert_eq!(map.sp_register_number(), 7);
        assert_eq!(map.frame_pointer_register_number(), 6);
        assert_eq!(map.number_for_name("RBP"), Some(6));
        assert_eq!(map.number_for_name("rip"), Some(16));
    }

    #[test]
    fn seeds_cfa_and_pc_from_raw_snapshot() {
        let map = RegisterMap::new(Arch::Amd64);
        let mut raw = RawRegisters::new();
        raw.set("rsp", 0x7fff_e000).set("rip", 0x0040_1000);

        let table = map.create_register_table(&raw);
        assert_eq!(table.cfa(), Some(0x7fff_e000));
        assert_eq!(table.pc(), Some(0x0040_1000));
        assert_eq!(table.get(map.ra_register_number()), Some(0x0040_1000));
    }
}
