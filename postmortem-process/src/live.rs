//! Live-attach backend: the pluggable counterpart to core-dump parsing,
//! per `spec.md` §4.8's live variant — attach to a running thread, read its
//! general-purpose registers and auxiliary vector the same way
//! [`crate::CoreDump`] reads them out of a core image.

use postmortem_common::RawRegisters;

use crate::error::{ProcessError, ProcessErrorKind};

/// A backend capable of reading a live thread's register state.
///
/// Kept as a trait, not a concrete `ptrace` call site, so a non-Linux host
/// or a remote-debugging transport can supply its own implementation;
/// [`PtraceAttach`] is the only implementation this workspace ships.
pub trait LiveAttach {
    /// Attaches to `pid`, stopping it if it is running.
    fn attach(&self, pid: i32) -> Result<(), ProcessError>;

    /// Detaches from `pid`, resuming it.
    fn detach(&self, pid: i32) -> Result<(), ProcessError>;

    /// Reads `pid`'s general-purpose registers.
    fn registers(&self, pid: i32) -> Result<RawRegisters, ProcessError>;

    /// Reads `pid`'s auxiliary vector as `(a_type, a_val)` pairs, stopping
    /// at `AT_NULL`.
    fn auxv(&self, pid: i32) -> Result<Vec<(u64, u64)>, ProcessError>;
}

/// A [`LiveAttach`] backend built on Linux's `ptrace(2)` and `/proc`.
#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
#[derive(Clone, Copy, Debug, Default)]
pub struct PtraceAttach;

#[cfg(all(target_os = "linux", target_arch = "x86_64"))]
impl LiveAttach for PtraceAttach {
    fn attach(&self, pid: i32) -> Result<(), ProcessError> {
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_ATTACH,
                pid,
                std::ptr::null_mut::<libc::c_void>(),
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if ret != 0 {
            return Err(ProcessError::with_source(
                ProcessErrorKind::AttachFailure,
                std::io::Error::last_os_error(),
            ));
        }
        let mut status = 0;
        unsafe { libc::waitpid(pid, &mut status, 0) };
        Ok(())
    }

    fn detach(&self, pid: i32) -> Result<(), ProcessError> {
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_DETACH,
                pid,
                std::ptr::null_mut::<libc::c_void>(),
                std::ptr::null_mut::<libc::c_void>(),
            )
        };
        if ret != 0 {
            return Err(ProcessError::with_source(
                ProcessErrorKind::AttachFailure,
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    fn registers(&self, pid: i32) -> Result<RawRegisters, ProcessError> {
        let mut regs: libc::user_regs_struct = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_GETREGS,
                pid,
                std::ptr::null_mut::<libc::c_void>(),
                &mut regs as *mut libc::user_regs_struct as *mut libc::c_void,
            )
        };
        if ret != 0 {
            return Err(ProcessError::with_source(
                ProcessErrorKind::AttachFailure,
                std::io::Error::last_os_error(),
            ));
        }

        let mut raw = RawRegisters::new();
        raw.set("r15", regs.r15)
            .set("r14", regs.r14)
            .set("r13", regs.r13)
            .set("r12", regs.r12)
            .set("rbp", regs.rbp)
            .set("rbx", regs.rbx)
            .set("r11", regs.r11)
            .set("r10", regs.r10)
            .set("r9", regs.r9)
            .set("r8", regs.r8)
            .set("rax", regs.rax)
            .set("rcx", regs.rcx)
            .set("rdx", regs.rdx)
            .set("rsi", regs.rsi)
            .set("rdi", regs.rdi)
            .set("rip", regs.rip)
            .set("rsp", regs.rsp)
            .set("cs", regs.cs)
            .set("ss", regs.ss)
            .set("ds", regs.ds)
            .set("es", regs.es)
            .set("fs", regs.fs)
            .set("gs", regs.gs)
            .set("fs_base", regs.fs_base)
            .set("gs_base", regs.gs_base)
            .set("rflags", regs.eflags);
        Ok(raw)
    }

    fn auxv(&self, pid: i32) -> Result<Vec<(u64, u64)>, ProcessError> {
        let bytes = std::fs::read(format!("/proc/{pid}/auxv"))?;
        let mut out = Vec::new();
        let mut offset = 0;
        while offset + 16 <= bytes.len() {
            let a_type = u64::from_le_bytes(bytes[offset..offset + 8].try_into().unwrap());
            let a_val = u64::from_le_bytes(bytes[offset + 8..offset + 16].try_into().unwrap());
            offset += 16;
            if a_type == 0 {
                break;
            }
            out.push((a_type, a_val));
        }
        Ok(out)
    }
}

#[cfg(all(test, target_os = "linux", target_arch = "x86_64"))]
mod tests {
    use super::*;

    struct FakeAttach {
        registers: RawRegisters,
    }

    impl LiveAttach for FakeAttach {
        fn attach(&self, _pid: i32) -> Result<(), ProcessError> {
            Ok(())
        }
        fn detach(&self, _pid: i32) -> Result<(), ProcessError> {
            Ok(())
        }
        fn registers(&self, _pid: i32) -> Result<RawRegisters, ProcessError> {
            Ok(self.registers.clone())
        }
        fn auxv(&self, _pid: i32) -> Result<Vec<(u64, u64)>, ProcessError> {
            Ok(vec![(9, 0x0040_1000), (0, 0)])
        }
    }

    #[test]
    fn a_fake_backend_satisfies_the_trait_contract() {
        let mut registers = RawRegisters::new();
        registers.set("rip", 0x0040_1000);
        let backend = FakeAttach { registers };

        backend.attach(1234).unwrap();
        assert_eq!(backend.registers(1234).unwrap().get("rip"), Some(0x0040_1000));
        assert_eq!(backend.auxv(1234).unwrap(), vec![(9, 0x0040_1000), (0, 0)]);
    }
}
