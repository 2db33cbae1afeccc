//! User Trap Handling
//!
//! Entry point for traps taken from user mode. The low-level vector saves
//! user registers into the process's `TrapFrame` and calls `user_trap` with
//! the trap cause and value.
//!
//! # Trap Types
//! - Environment call: a system call, number in `a7`, arguments in `a0`..`a5`
//! - Page faults: resolved against the process's file mappings
//!
//! Anything else, and any fault that cannot be resolved, kills the process.

use log::{trace, warn};

use crate::kernel::Kernel;
use crate::proc::Process;
use crate::syscall;
use crate::vm::handle_mapping_fault;

/// User registers saved at trap entry.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct TrapFrame {
    /// Argument registers `a0`..`a7`.
    pub a: [u64; 8],
    /// User program counter.
    pub epc: u64,
}

/// Trap cause decoded from `scause`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    EnvCallFromUser,
    InstructionPageFault,
    LoadPageFault,
    StorePageFault,
    Other(u64),
}

impl From<u64> for TrapCause {
    fn from(scause: u64) -> Self {
        match scause {
            8 => TrapCause::EnvCallFromUser,
            12 => TrapCause::InstructionPageFault,
            13 => TrapCause::LoadPageFault,
            15 => TrapCause::StorePageFault,
            other => TrapCause::Other(other),
        }
    }
}

/// Handle a trap from user mode.
///
/// On return the process either resumes at `trapframe.epc` or has
/// `killed` set, in which case the caller must terminate it.
pub fn user_trap(kernel: &Kernel, proc: &mut Process, scause: u64, stval: u64) {
    match TrapCause::from(scause) {
        TrapCause::EnvCallFromUser => {
            // Resume after the ecall instruction.
            proc.trapframe.epc += 4;
            let ret = syscall::dispatch(kernel, proc);
            proc.trapframe.a[0] = ret;
        }
        TrapCause::InstructionPageFault | TrapCause::LoadPageFault | TrapCause::StorePageFault => {
            match handle_mapping_fault(kernel, proc, scause, stval as usize) {
                Ok(()) => trace!("[TRAP] pid {}: fault at {:#x} resolved", proc.pid, stval),
                Err(e) => {
                    warn!(
                        "[TRAP] pid {}: page fault at {:#x} (scause {}): {}, killing",
                        proc.pid, stval, scause, e
                    );
                    proc.killed = true;
                }
            }
        }
        TrapCause::Other(cause) => {
            warn!(
                "[TRAP] pid {}: unexpected scause {:#x} stval {:#x} epc {:#x}, killing",
                proc.pid, cause, stval, proc.trapframe.epc
            );
            proc.killed = true;
        }
    }
}
