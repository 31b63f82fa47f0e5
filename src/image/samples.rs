//! Hand-assembled x86-64 entry functions and the images that carry them.
//!
//! Every sample follows the sandbox ABI: `f` takes no arguments, runs as if
//! the image were loaded at address 0, and returns either a plain integer or
//! the image address (sandbox-relative offset) of a NUL-terminated string.

use super::builder::{ImageBuilder, SymbolSection};

pub const TEXT_ADDRESS: u64 = 0x1000;
pub const DATA_ADDRESS: u64 = 0x2000;
pub const BSS_ADDRESS: u64 = 0x3000;
pub const BSS_SIZE: u64 = 0x100;

/// Size of the digit buffer the fib sample renders into, terminator included.
const DIGIT_BUFFER_LEN: u8 = 32;

const COMMENT: &str = "naclbox sample image";

/// Minimal emitter with backpatched rel8/rel32 branches.
#[derive(Default)]
struct Code {
    bytes: Vec<u8>,
}

impl Code {
    fn emit(&mut self, bytes: &[u8]) -> &mut Self {
        self.bytes.extend_from_slice(bytes);
        self
    }

    fn here(&self) -> usize {
        self.bytes.len()
    }

    /// Emits `opcode` followed by a zeroed rel32; returns the field position.
    fn rel32(&mut self, opcode: &[u8]) -> usize {
        self.emit(opcode);
        let at = self.here();
        self.emit(&[0; 4]);
        at
    }

    fn rel8(&mut self, opcode: u8) -> usize {
        self.emit(&[opcode, 0]);
        self.here() - 1
    }

    fn patch_rel32(&mut self, at: usize, target: usize) {
        let rel = target as i64 - (at as i64 + 4);
        self.bytes[at..at + 4].copy_from_slice(&(rel as i32).to_le_bytes());
    }

    fn patch_rel8(&mut self, at: usize, target: usize) {
        let rel = target as i64 - (at as i64 + 1);
        self.bytes[at] = rel as i8 as u8;
    }
}

fn image_with_entry(code: Vec<u8>, entry_size: usize, data: Vec<u8>) -> ImageBuilder {
    let len = entry_size as u64;
    ImageBuilder::new()
        .text(TEXT_ADDRESS, code)
        .data(DATA_ADDRESS, data)
        .bss(BSS_ADDRESS, BSS_SIZE)
        .comment(COMMENT)
        .function("f", TEXT_ADDRESS, len, true)
}

/// `f` returns the offset of `text` stored in `.data`.
pub fn text_image(text: &str) -> ImageBuilder {
    let mut code = Code::default();
    // mov eax, DATA_ADDRESS ; ret
    code.emit(&[0xb8])
        .emit(&(DATA_ADDRESS as u32).to_le_bytes())
        .emit(&[0xc3]);

    let mut data = text.as_bytes().to_vec();
    data.push(0);
    let len = code.here();
    image_with_entry(code.bytes, len, data).object(
        "message",
        SymbolSection::Data,
        DATA_ADDRESS,
        text.len() as u64 + 1,
    )
}

/// `f` returns the null offset.
pub fn null_image() -> ImageBuilder {
    // xor eax, eax ; ret
    image_with_entry(vec![0x31, 0xc0, 0xc3], 3, vec![0; 8])
}

/// `f` returns `value` as a plain integer.
pub fn integer_image(value: i32) -> ImageBuilder {
    let mut code = Code::default();
    // mov eax, imm32 ; ret
    code.emit(&[0xb8]).emit(&value.to_le_bytes()).emit(&[0xc3]);
    let len = code.here();
    image_with_entry(code.bytes, len, vec![0; 8])
}

/// `f` computes `fib(n)` recursively, renders it in decimal into a buffer in
/// `.data` and returns the offset of the first digit.
pub fn fib_image(n: u32) -> ImageBuilder {
    let mut code = Code::default();
    let last = DIGIT_BUFFER_LEN - 1;

    // f:
    code.emit(&[0xbf]).emit(&n.to_le_bytes()); // mov edi, n
    let call_fib = code.rel32(&[0xe8]); // call fib
    let lea = code.rel32(&[0x48, 0x8d, 0x35]); // lea rsi, [rip + buffer]
    let rip = TEXT_ADDRESS as i64 + code.here() as i64;
    let disp = (DATA_ADDRESS as i64 - rip) as i32;
    code.bytes[lea..lea + 4].copy_from_slice(&disp.to_le_bytes());
    code.emit(&[0xb9, last, 0, 0, 0]); // mov ecx, last
    code.emit(&[0xc6, 0x04, 0x0e, 0x00]); // mov byte [rsi + rcx], 0
    code.emit(&[0x41, 0xb8, 10, 0, 0, 0]); // mov r8d, 10
    let digit_loop = code.here();
    code.emit(&[0x31, 0xd2]); // xor edx, edx
    code.emit(&[0x41, 0xf7, 0xf0]); // div r8d
    code.emit(&[0x80, 0xc2, b'0']); // add dl, '0'
    code.emit(&[0xff, 0xc9]); // dec ecx
    code.emit(&[0x88, 0x14, 0x0e]); // mov [rsi + rcx], dl
    code.emit(&[0x85, 0xc0]); // test eax, eax
    let next_digit = code.rel8(0x75); // jnz digit_loop
    code.patch_rel8(next_digit, digit_loop);
    code.emit(&[0xb8]).emit(&(DATA_ADDRESS as u32).to_le_bytes()); // mov eax, DATA_ADDRESS
    code.emit(&[0x01, 0xc8]); // add eax, ecx
    code.emit(&[0xc3]); // ret
    let f_len = code.here();

    // fib(edi) -> eax
    let fib = code.here();
    code.patch_rel32(call_fib, fib);
    code.emit(&[0x83, 0xff, 0x02]); // cmp edi, 2
    let to_base = code.rel8(0x7c); // jl base
    code.emit(&[0x53]); // push rbx
    code.emit(&[0x55]); // push rbp
    code.emit(&[0x89, 0xfb]); // mov ebx, edi
    code.emit(&[0x8d, 0x7b, 0xfe]); // lea edi, [rbx - 2]
    let first = code.rel32(&[0xe8]); // call fib
    code.patch_rel32(first, fib);
    code.emit(&[0x89, 0xc5]); // mov ebp, eax
    code.emit(&[0x8d, 0x7b, 0xff]); // lea edi, [rbx - 1]
    let second = code.rel32(&[0xe8]); // call fib
    code.patch_rel32(second, fib);
    code.emit(&[0x01, 0xe8]); // add eax, ebp
    code.emit(&[0x5d]); // pop rbp
    code.emit(&[0x5b]); // pop rbx
    code.emit(&[0xc3]); // ret
    let base = code.here();
    code.patch_rel8(to_base, base);
    code.emit(&[0x89, 0xf8]); // mov eax, edi
    code.emit(&[0xc3]); // ret
    let fib_len = code.here() - fib;

    image_with_entry(code.bytes, f_len, vec![0; DIGIT_BUFFER_LEN as usize])
        .function("fib", TEXT_ADDRESS + fib as u64, fib_len as u64, false)
        .object(
            "digits",
            SymbolSection::Data,
            DATA_ADDRESS,
            u64::from(DIGIT_BUFFER_LEN),
        )
}
