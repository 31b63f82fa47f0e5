//! One synchronous call into a sandboxed entry point.
//!
//! The host's stack and frame pointers are saved, `rsp` is switched to the
//! sandbox stack, the entry address is pushed into the slot the trampoline
//! reads, and control goes through the trampoline. On return both pointers
//! are restored and the raw `rax` is handed back for the caller to interpret.
//!
//! Nothing here can detect or recover from a sandboxed function that faults,
//! never returns, or scribbles over host memory through an absolute address.
//! Any of those takes the whole process down or hangs the calling thread.

use serde::Serialize;
use std::arch::asm;

/// Addresses a single call needs, all absolute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallFrame {
    /// Region base, handed to sandboxed code in [`super::trampoline::BASE_REGISTER`].
    pub base: usize,
    pub stack_top: usize,
    pub trampoline: usize,
    pub entry: usize,
}

/// How the caller interprets the entry point's return register. The image
/// cannot declare this; it is part of the caller's contract with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnContract {
    /// Sandbox-relative offset of a NUL-terminated string, 0 for no result.
    #[default]
    String,
    /// Plain 32-bit integer in `eax`.
    Integer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum CallOutcome {
    Text(Option<String>),
    Integer(i32),
}

/// Calls `frame.entry` through the trampoline on the sandbox stack and
/// returns the raw value left in `rax`.
///
/// # Safety
///
/// `frame` must describe a live, executable sandbox region: the trampoline
/// installed at `frame.trampoline`, `frame.stack_top` pointing into writable
/// memory with room below it for the entry function's stack, and
/// `frame.entry` the address of a zero-argument function that follows the
/// System V calling convention. The region must not be touched by anything
/// else for the duration of the call.
pub unsafe fn invoke(frame: &CallFrame) -> u64 {
    let result: u64;
    asm!(
        "push rbp",
        "mov rbp, rsp",
        "mov rsp, {stack_top}",
        "push {entry}",
        "call {trampoline}",
        "mov rsp, rbp",
        "pop rbp",
        stack_top = in(reg) frame.stack_top,
        entry = in(reg) frame.entry,
        trampoline = in(reg) frame.trampoline,
        inout("r15") frame.base => _,
        out("rax") result,
        clobber_abi("C"),
    );
    result
}

/// Low 32 bits of a raw return value, as an `int`-returning entry leaves them.
pub fn as_integer(raw: u64) -> i32 {
    raw as u32 as i32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_truncates_to_eax() {
        assert_eq!(as_integer(6765), 6765);
        assert_eq!(as_integer(0xffff_ffff), -1);
        assert_eq!(as_integer(0xdead_0000_0000_002a), 42);
    }

    #[test]
    fn test_string_is_the_default_contract() {
        assert_eq!(ReturnContract::default(), ReturnContract::String);
    }
}
