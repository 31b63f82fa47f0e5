//! Geometry of the sandbox region and the one place where sandbox-relative
//! offsets become region offsets.
//!
//! # Layout
//!
//! ```text
//! base                                                  base + region_size
//! │                                                                      │
//! ▼                                                                      ▼
//! ┌──────────────┬───────────────────┬────────────┬──────────┬──────────┐
//! │ image        │ free              │ call stack │ headroom │tramp│ top│
//! │ sections     │                   │ (grows ↓)  │          │     │    │
//! └──────────────┴───────────────────┴────────────┴──────────┴──────────┘
//!                                    ▲            ▲          ▲
//!                         placement_limit   stack_top   trampoline_offset
//! ```
//!
//! Sections are copied at `base + declared address`, so the image runs as if
//! it had been loaded at address 0. Every placed section must end strictly
//! below [`SandboxLayout::placement_limit`], which sits below the reserved
//! call stack and therefore below the trampoline.
//!
//! # Fixed base
//!
//! The base address is chosen by the host, not randomized. The trampoline and
//! the image's own internal offsets are computed against a known base; this
//! gives up ASLR for the sandboxed code and is not a security property.

use crate::error::{Error, Result};

/// Default region base: the first page above 4 GiB.
pub const DEFAULT_BASE_ADDRESS: usize = 0xffff_ffff / PAGE_SIZE * PAGE_SIZE + PAGE_SIZE;

/// Default region size: a 32-bit address space, so any 32-bit image offset
/// is representable.
pub const DEFAULT_REGION_SIZE: usize = 0xffff_ffff;

/// Bytes between the initial stack pointer and the trampoline.
pub const DEFAULT_STACK_HEADROOM: usize = 16;

/// Bytes reserved for the entry function's stack.
pub const DEFAULT_STACK_SIZE: usize = 64 * 1024;

pub const PAGE_SIZE: usize = 4096;

/// Trampoline placement: `align_down(region_size, TRAMPOLINE_ALIGN) - TRAMPOLINE_TOP_GAP`.
const TRAMPOLINE_ALIGN: usize = 32;
const TRAMPOLINE_TOP_GAP: usize = 64;

/// The entry function must see `rsp ≡ 8 (mod 16)` on entry. Between the
/// initial stack pointer and the entry function there are three 8-byte
/// pushes (entry slot, return into the host, saved frame pointer) and one
/// call, so the initial stack pointer itself must be `8 (mod 16)`.
const ENTRY_STACK_BIAS: usize = 8;

/// Only constructed through [`SandboxLayout::new`] or `Default`, so every
/// instance satisfies the checks `new` performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLayout {
    base_address: usize,
    region_size: usize,
    stack_headroom: usize,
    stack_size: usize,
}

impl Default for SandboxLayout {
    fn default() -> Self {
        Self {
            base_address: DEFAULT_BASE_ADDRESS,
            region_size: DEFAULT_REGION_SIZE,
            stack_headroom: DEFAULT_STACK_HEADROOM,
            stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl SandboxLayout {
    /// Builds and validates a layout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLayout`] if the base is zero or not page
    /// aligned, if the region cannot hold the trampoline, or if the stack
    /// reservation does not fit below the trampoline.
    pub fn new(
        base_address: usize,
        region_size: usize,
        stack_headroom: usize,
        stack_size: usize,
    ) -> Result<Self> {
        if base_address == 0 || base_address % PAGE_SIZE != 0 {
            return Err(Error::InvalidLayout(format!(
                "base address {base_address:#x} must be a non-zero multiple of {PAGE_SIZE:#x}"
            )));
        }
        if base_address.checked_add(region_size).is_none() {
            return Err(Error::InvalidLayout(format!(
                "region {base_address:#x}+{region_size:#x} wraps the address space"
            )));
        }
        if region_size < TRAMPOLINE_ALIGN + TRAMPOLINE_TOP_GAP + PAGE_SIZE {
            return Err(Error::InvalidLayout(format!(
                "region size {region_size:#x} is too small to hold a trampoline"
            )));
        }

        let layout = Self {
            base_address,
            region_size,
            stack_headroom,
            stack_size,
        };

        let reserved = stack_headroom
            .checked_add(stack_size)
            .and_then(|r| r.checked_add(ENTRY_STACK_BIAS + 16));
        match reserved {
            Some(reserved) if reserved < layout.trampoline_offset() => Ok(layout),
            _ => Err(Error::InvalidLayout(format!(
                "stack reservation ({stack_headroom:#x} headroom + {stack_size:#x} stack) \
                 does not fit below the trampoline at {:#x}",
                layout.trampoline_offset()
            ))),
        }
    }

    pub fn base_address(&self) -> usize {
        self.base_address
    }

    pub fn region_size(&self) -> usize {
        self.region_size
    }

    pub fn stack_headroom(&self) -> usize {
        self.stack_headroom
    }

    pub fn stack_size(&self) -> usize {
        self.stack_size
    }

    /// Offset of the trampoline, near but below the top of the region.
    pub fn trampoline_offset(&self) -> usize {
        self.region_size / TRAMPOLINE_ALIGN * TRAMPOLINE_ALIGN - TRAMPOLINE_TOP_GAP
    }

    /// Offset of the initial stack pointer for a call.
    pub fn stack_top_offset(&self) -> usize {
        let top = self.trampoline_offset() - self.stack_headroom;
        top / 16 * 16 - ENTRY_STACK_BIAS
    }

    /// Exclusive upper bound for any placed section.
    pub fn placement_limit(&self) -> u64 {
        (self.stack_top_offset() - self.stack_size) as u64
    }

    /// Translates a sandbox-relative offset returned by sandboxed code into an
    /// offset inside the region.
    ///
    /// Sandboxed code addresses memory as if it were loaded at 0, so a pointer
    /// it hands back is an offset from the region base, never an absolute host
    /// address. The null offset means "no result".
    ///
    /// # Errors
    ///
    /// Returns [`Error::ResultOutOfRegion`] for offsets at or past the end of
    /// the region.
    pub fn translate_offset(&self, offset: u64) -> Result<Option<usize>> {
        if offset == 0 {
            return Ok(None);
        }
        match usize::try_from(offset) {
            Ok(offset) if offset < self.region_size => Ok(Some(offset)),
            _ => Err(Error::ResultOutOfRegion {
                offset,
                len: self.region_size,
            }),
        }
    }
}
