//! Field layouts for the `x86-64` Linux `NT_PRSTATUS`/`NT_PRPSINFO`/`NT_AUXV`
//! note descriptors, per `struct elf_prstatus`/`elf_prpsinfo` (`linux/elfcore.h`)
//! and the kernel's `user_regs_struct` (`sys/user.h`).
//!
//! These structs are not re-derived from any example in this workspace —
//! they are the stable, documented Linux core-dump ABI — but the note
//! *iteration* around them (`get_next_note`'s forward scan for the
//! `PRPSINFO`/`FPREGSET` following each `PRSTATUS`) is grounded on
//! `process_coredump.py`.

use postmortem_common::RawRegisters;

use crate::error::{ProcessError, ProcessErrorKind};

const PR_PID_OFFSET: usize = 32;
const PR_REG_OFFSET: usize = 112;
const PR_FNAME_OFFSET: usize = 40;
const PR_FNAME_LEN: usize = 16;

/// `user_regs_struct`'s field order, the same order `elf_gregset_t` stores
/// its 27 general-purpose registers in on `x86-64`.
const GPREG_NAMES: [&str; 27] = [
    "r15", "r14", "r13", "r12", "rbp", "rbx", "r11", "r10", "r9", "r8", "rax", "rcx", "rdx", "rsi",
    "rdi", "orig_rax", "rip", "cs", "eflags", "rsp", "ss", "fs_base", "gs_base", "ds", "es", "fs",
    "gs",
];

fn read_u64(desc: &[u8], offset: usize) -> Option<u64> {
    desc.get(offset..offset + 8)
        .map(|s| u64::from_le_bytes(s.try_into().unwrap()))
}

fn read_i32(desc: &[u8], offset: usize) -> Option<i32> {
    desc.get(offset..offset + 4)
        .map(|s| i32::from_le_bytes(s.try_into().unwrap()))
}

/// Extracts the thread id (`pr_pid`) from a `PRSTATUS` descriptor.
pub(crate) fn prstatus_pid(desc: &[u8]) -> Result<i32, ProcessError> {
    read_i32(desc, PR_PID_OFFSET).ok_or(ProcessError::new(ProcessErrorKind::MalformedCore))
}

/// Decodes a `PRSTATUS` descriptor's embedded register file into
/// [`RawRegisters`], keyed the same way a live `ptrace` `GETREGS` snapshot
/// would be.
pub(crate) fn prstatus_registers(desc: &[u8]) -> Result<RawRegisters, ProcessError> {
    let mut raw = RawRegisters::new();
    for (i, name) in GPREG_NAMES.iter().enumerate() {
        let offset = PR_REG_OFFSET + i * 8;
        let value = read_u64(desc, offset).ok_or(ProcessError::new(ProcessErrorKind::MalformedCore))?;
        raw.set(name, value);
    }
    Ok(raw)
}

/// Extracts the NUL-trimmed `pr_fname` (command name) from a `PRPSINFO`
/// descriptor.
pub(crate) fn prpsinfo_name(desc: &[u8]) -> Option<String> {
    let bytes = desc.get(PR_FNAME_OFFSET..PR_FNAME_OFFSET + PR_FNAME_LEN)?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

/// `AT_ENTRY`: the auxiliary-vector entry carrying the process's original
/// entry point address.
const AT_ENTRY: u64 = 9;
/// `AT_NULL`: the auxiliary vector's terminating entry.
const AT_NULL: u64 = 0;

/// Scans an `AUXV` descriptor (a sequence of `(a_type, a_val)` pairs) for
/// `AT_ENTRY`.
pub(crate) fn auxv_entry_point(desc: &[u8]) -> Option<u64> {
    let mut offset = 0;
    while offset + 16 <= desc.len() {
        let a_type = read_u64(desc, offset)?;
        let a_val = read_u64(desc, offset + 8)?;
        if a_type == AT_NULL {
            break;
        }
        if a_type == AT_ENTRY {
            return Some(a_val);
        }
        offset += 16;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prstatus_fixture(pid: i32, rip: u64, rsp: u64, rbp: u64) -> Vec<u8> {
        let mut desc = vec![0u8; 336];
        desc[PR_PID_OFFSET..PR_PID_OFFSET + 4].copy_from_slice(&pid.to_le_bytes());
        let reg_index = |name: &str| GPREG_NAMES.iter().position(|n| *n == name).unwrap();
        let set_reg = |desc: &mut Vec<u8>, name: &str, value: u64| {
            let offset = PR_REG_OFFSET + reg_index(name) * 8;
            desc[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        };
        set_reg(&mut desc, "rip", rip);
        set_reg(&mut desc, "rsp", rsp);
        set_reg(&mut desc, "rbp", rbp);
        desc
    }

    #[test]
    fn decodes_pid_and_registers_from_a_prstatus_descriptor() {
        let desc = prstatus_fixture(4242, 0x0040_1000, 0x7fff_e000, 0x7fff_e100);
        assert_eq!(prstatus_pid(&desc).unwrap(), 4242);

        let raw = prstatus_registers(&desc).unwrap();
        assert_eq!(raw.get("rip"), Some(0x0040_1000));
        assert_eq!(raw.get("rsp"), Some(0x7fff_e000));
        assert_eq!(raw.get("rbp"), Some(0x7fff_e100));
    }

    #[test]
    fn decodes_the_trimmed_command_name_from_a_prpsinfo_descriptor() {
        let mut desc = vec![0u8; 136];
        desc[PR_FNAME_OFFSET..PR_FNAME_OFFSET + 5].copy_from_slice(b"crash");
        assert_eq!(prpsinfo_name(&desc), Some("crash".to_string()));
    }

    #[test]
    fn finds_at_entry_in_an_auxv_descriptor() {
        let mut desc = Vec::new();
        desc.extend_from_slice(&3u64.to_le_bytes());
        desc.extend_from_slice(&0x0020_0000u64.to_le_bytes());
        desc.extend_from_slice(&AT_ENTRY.to_le_bytes());
        desc.extend_from_slice(&0x0040_1000u64.to_le_bytes());
        desc.extend_from_slice(&AT_NULL.to_le_bytes());
        desc.extend_from_slice(&0u64.to_le_bytes());

        assert_eq!(auxv_entry_point(&desc), Some(0x0040_1000));
    }

    #[test]
    fn missing_at_entry_yields_none() {
        let mut desc = Vec::new();
        desc.extend_from_slice(&3u64.to_le_bytes());
        desc.extend_from_slice(&0x0020_0000u64.to_le_bytes());
        desc.extend_from_slice(&AT_NULL.to_le_bytes());
        desc.extend_from_slice(&0u64.to_le_bytes());

        assert_eq!(auxv_entry_point(&desc), None);
    }
}
