//! The fixed x86-64 stub every call into the sandbox goes through.
//!
//! The caller pushes the entry address, then calls the trampoline. The
//! trampoline builds a frame on whatever stack is active, calls through the
//! pushed slot, tears the frame down and returns with the callee's `rax`
//! untouched. Because the target travels on the stack, one trampoline body
//! serves any entry address and never has to be rebuilt per image.
//!
//! ```text
//! push rbp                  55
//! mov  rbp, rsp             48 89 e5
//! nop × 24                  90 …
//! call qword [rsp + 0x10]   ff 54 24 10
//! pop  rbp                  5d
//! ret                       c3
//! ```

use log::debug;

use super::layout::SandboxLayout;
use super::region::SandboxRegion;
use crate::error::Result;

/// Register that carries the region base into sandboxed code.
pub const BASE_REGISTER: &str = "r15";

/// Distance from `rsp` to the entry slot once the trampoline has pushed its
/// frame pointer: saved `rbp` (8) plus the return address into the host (8).
pub const ENTRY_SLOT_DISPLACEMENT: u8 = 0x10;

/// Padding between the prologue and the indirect call.
const NOP_PADDING: usize = 24;

const PUSH_RBP: u8 = 0x55;
const MOV_RBP_RSP: [u8; 3] = [0x48, 0x89, 0xe5];
const NOP: u8 = 0x90;
/// `call qword [rsp + disp8]`: opcode, ModRM (/2, SIB follows), SIB (base rsp).
const CALL_RSP_DISP8: [u8; 3] = [0xff, 0x54, 0x24];
const POP_RBP: u8 = 0x5d;
const RET: u8 = 0xc3;

pub const TRAMPOLINE_LEN: usize = 1 + MOV_RBP_RSP.len() + NOP_PADDING + CALL_RSP_DISP8.len() + 1 + 1 + 1;

/// Machine code for the trampoline.
pub fn trampoline_code() -> [u8; TRAMPOLINE_LEN] {
    let mut code = [NOP; TRAMPOLINE_LEN];
    let mut at = 0;
    let mut put = |bytes: &[u8]| {
        code[at..at + bytes.len()].copy_from_slice(bytes);
        at += bytes.len();
    };

    put(&[PUSH_RBP]);
    put(&MOV_RBP_RSP);
    put(&[NOP; NOP_PADDING]);
    put(&CALL_RSP_DISP8);
    put(&[ENTRY_SLOT_DISPLACEMENT]);
    put(&[POP_RBP]);
    put(&[RET]);
    code
}

/// Writes the trampoline at the layout's trampoline offset and returns its
/// absolute address.
pub fn install(region: &mut SandboxRegion, layout: &SandboxLayout) -> Result<usize> {
    let offset = layout.trampoline_offset();
    region.write(offset, &trampoline_code())?;

    let address = region.address_of(offset);
    debug!("Installed trampoline at {:#x}", address);
    Ok(address)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::region::testing::CountingMapper;
    use std::sync::Arc;

    #[test]
    fn test_trampoline_bytes() {
        let code = trampoline_code();
        assert_eq!(code.len(), 34);
        assert_eq!(&code[..4], &[0x55, 0x48, 0x89, 0xe5]);
        assert!(code[4..28].iter().all(|&b| b == 0x90));
        assert_eq!(&code[28..], &[0xff, 0x54, 0x24, 0x10, 0x5d, 0xc3]);
    }

    #[test]
    fn test_install_writes_at_trampoline_offset() {
        let layout = SandboxLayout::new(0x7500_0000_0000, 0x10_0000, 16, 0x1000).unwrap();
        let mut region =
            SandboxRegion::acquire_with(&layout, Arc::new(CountingMapper::default())).unwrap();

        let address = install(&mut region, &layout).unwrap();
        assert_eq!(address, region.address_of(layout.trampoline_offset()));
        assert!(layout.trampoline_offset() + TRAMPOLINE_LEN <= region.len());
    }
}
