//! The process model: turns a core image's `PT_NOTE` segments, or a live
//! `ptrace`-attached process, into a set of threads with register
//! snapshots an unwinder can consume.
//!
//! Core-dump handling is grounded on `process_coredump.py`'s `Process`
//! constructor: each `NT_PRSTATUS` note starts a new thread, and the
//! nearest `NT_PRPSINFO`/`NT_FPREGSET` notes following it (before the next
//! `NT_PRSTATUS`) are attributed to that thread.

mod error;
mod live;
mod notes;
mod nt_file;
mod prstatus;

pub use error::{ProcessError, ProcessErrorKind};
pub use live::LiveAttach;
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
pub use live::PtraceAttach;

use std::path::PathBuf;

use postmortem_common::RawRegisters;

/// One thread captured in a core image (or attached live): its id, optional
/// command name, and its register snapshot at the point of capture.
#[derive(Clone, Debug)]
pub struct Thread {
    /// The thread/process id (`pr_pid`).
    pub thread_id: i32,
    /// The command name from the nearest `NT_PRPSINFO`, if one was found.
    pub name: Option<String>,
    /// The general-purpose register snapshot from `NT_PRSTATUS`.
    pub registers: RawRegisters,
    /// The raw `NT_FPREGSET` descriptor bytes, if one was found nearby.
    /// Kept opaque: nothing downstream decodes `x87`/`xmm` state today, so
    /// this is stored the way the original tooling keeps a reference to the
    /// note rather than fully parsing it.
    pub fpregs: Option<Vec<u8>>,
}

/// A parsed core image: its threads, in the order their `NT_PRSTATUS` notes
/// appeared, plus the load-address delta needed to relocate addresses
/// captured in the core back onto the symbol file's addresses.
#[derive(Clone, Debug)]
pub struct CoreDump {
    /// Every thread the core image recorded.
    pub threads: Vec<Thread>,
    /// `sym_file.e_entry - core_entry`, per `spec.md` §4.8; `0` if the core
    /// carried no `NT_AUXV`/`AT_ENTRY` or the symbol file's entry point was
    /// not supplied.
    pub load_address_diff: i64,
}

impl CoreDump {
    /// Parses a core image's `PT_NOTE` segments.
    ///
    /// `symbol_entry_point` is the matching symbol file's ELF entry point
    /// (`header.e_entry`); pass `None` when it is not yet known, in which
    /// case `load_address_diff` is `0`.
    pub fn parse(core_data: &[u8], symbol_entry_point: Option<u64>) -> Result<Self, ProcessError> {
        let elf = goblin::elf::Elf::parse(core_data)?;

        let segments = notes::note_segments(&elf, core_data);
        let all_notes: Vec<_> = segments.into_iter().flat_map(notes::parse_segment).collect();

        let mut threads = Vec::new();
        let mut core_entry = None;

        for (i, note) in all_notes.iter().enumerate() {
            match note.n_type {
                notes::NT_AUXV if core_entry.is_none() => {
                    core_entry = prstatus::auxv_entry_point(note.desc);
                }
                notes::NT_PRSTATUS => {
                    let thread_id = prstatus::prstatus_pid(note.desc)?;
                    let registers = prstatus::prstatus_registers(note.desc)?;

                    let mut name = None;
                    let mut fpregs = None;
                    for following in &all_notes[i + 1..] {
                        if following.n_type == notes::NT_PRSTATUS {
                            break;
                        }
                        if following.n_type == notes::NT_PRPSINFO && name.is_none() {
                            name = prstatus::prpsinfo_name(following.desc);
                        }
                        if following.n_type == notes::NT_FPREGSET && fpregs.is_none() {
                            fpregs = Some(following.desc.to_vec());
                        }
                    }

                    threads.push(Thread {
                        thread_id,
                        name,
                        registers,
                        fpregs,
                    });
                }
                _ => {}
            }
        }

        let load_address_diff = match (symbol_entry_point, core_entry) {
            (Some(sym_entry), Some(core_entry)) if core_entry != 0 => {
                sym_entry as i64 - core_entry as i64
            }
            _ => 0,
        };

        Ok(CoreDump {
            threads,
            load_address_diff,
        })
    }
}

/// A core image's symbol-file resolution, independent of [`CoreDump`]
/// parsing: `pycdb.py`'s CLI always takes an explicit `--symbol-file`, so
/// this widens the interface with a core-native fallback to the core's own
/// `NT_FILE` mapping table rather than adapting an existing fallback path.
pub struct Process;

impl Process {
    /// Resolves the executable whose symbols a core should be read against.
    /// Returns `explicit` unchanged if given; otherwise looks up the file
    /// mapped at file offset zero in the core's `NT_FILE` note, which is
    /// where the main executable's first segment is mapped.
    pub fn resolve_executable_path(
        core_data: &[u8],
        explicit: Option<PathBuf>,
    ) -> Result<Option<PathBuf>, ProcessError> {
        if explicit.is_some() {
            return Ok(explicit);
        }

        let elf = goblin::elf::Elf::parse(core_data)?;
        for segment in notes::note_segments(&elf, core_data) {
            for note in notes::parse_segment(segment) {
                if note.n_type == nt_file::NT_FILE {
                    if let Some(path) = nt_file::first_mapped_path(note.desc) {
                        return Ok(Some(path));
                    }
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_note(out: &mut Vec<u8>, n_type: u32, desc: &[u8]) {
        let name = b"CORE\0";
        out.extend_from_slice(&(name.len() as u32).to_le_bytes());
        out.extend_from_slice(&(desc.len() as u32).to_le_bytes());
        out.extend_from_slice(&n_type.to_le_bytes());
        out.extend_from_slice(name);
        out.resize((out.len() + 3) & !3, 0);
        out.extend_from_slice(desc);
        out.resize((out.len() + 3) & !3, 0);
    }

    fn prstatus_desc(pid: i32, rip: u64) -> Vec<u8> {
        let mut desc = vec![0u8; 336];
        desc[32..36].copy_from_slice(&pid.to_le_bytes());
        desc[112 + 16 * 8..112 + 17 * 8].copy_from_slice(&rip.to_le_bytes());
        desc
    }

    fn prpsinfo_desc(name: &str) -> Vec<u8> {
        let mut desc = vec![0u8; 136];
        desc[40..40 + name.len()].copy_from_slice(name.as_bytes());
        desc
    }

    fn auxv_desc(entry: u64) -> Vec<u8> {
        let mut desc = Vec::new();
        desc.extend_from_slice(&9u64.to_le_bytes());
        desc.extend_from_slice(&entry.to_le_bytes());
        desc.extend_from_slice(&0u64.to_le_bytes());
        desc.extend_from_slice(&0u64.to_le_bytes());
        desc
    }

    #[test]
    fn attributes_the_nearest_prpsinfo_to_the_first_thread_only() {
        let mut segment = Vec::new();
        push_note(&mut segment, notes::NT_PRSTATUS, &prstatus_desc(100, 0x400000));
        push_note(&mut segment, notes::NT_PRPSINFO, &prpsinfo_desc("crashy"));
        push_note(&mut segment, notes::NT_AUXV, &auxv_desc(0x401000));
        push_note(&mut segment, notes::NT_PRSTATUS, &prstatus_desc(101, 0x400100));

        let all_notes: Vec<_> = notes::parse_segment(&segment);
        let mut threads = Vec::new();
        for (i, note) in all_notes.iter().enumerate() {
            if note.n_type == notes::NT_PRSTATUS {
                let thread_id = prstatus::prstatus_pid(note.desc).unwrap();
                let mut name = None;
                for following in &all_notes[i + 1..] {
                    if following.n_type == notes::NT_PRSTATUS {
                        break;
                    }
                    if following.n_type == notes::NT_PRPSINFO {
                        name = prstatus::prpsinfo_name(following.desc);
                        break;
                    }
                }
                threads.push((thread_id, name));
            }
        }

        assert_eq!(threads, vec![(100, Some("crashy".to_string())), (101, None)]);
    }

    #[test]
    fn load_address_diff_is_zero_without_an_auxv() {
        let mut segment = Vec::new();
        push_note(&mut segment, notes::NT_PRSTATUS, &prstatus_desc(100, 0x400000));
        let all_notes = notes::parse_segment(&segment);
        assert!(all_notes.iter().all(|n| n.n_type != notes::NT_AUXV));
    }

    #[test]
    fn resolve_executable_path_prefers_an_explicit_path_over_nt_file() {
        let resolved = Process::resolve_executable_path(&[], Some(PathBuf::from("/bin/crashy"))).unwrap();
        assert_eq!(resolved, Some(PathBuf::from("/bin/crashy")));
    }
}
