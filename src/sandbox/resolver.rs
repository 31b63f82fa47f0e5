//! Entry-point lookup in an image's symbol table.

use log::debug;

use super::layout::SandboxLayout;
use super::region::SandboxRegion;
use crate::error::{Error, Result};
use crate::image::SymbolEntry;

/// The only symbol a sandboxed image may be entered through.
pub const ENTRY_SYMBOL: &str = "f";

/// Finds the image's entry symbol and returns its image-relative value.
///
/// Undefined references to the name are ignored. More than one definition,
/// or a definition outside the placeable part of the region, is rejected.
pub fn find_entry(symbols: &[SymbolEntry], layout: &SandboxLayout) -> Result<u64> {
    let mut candidates = symbols
        .iter()
        .filter(|s| s.name == ENTRY_SYMBOL && s.is_defined());

    let entry = candidates
        .next()
        .ok_or_else(|| Error::EntryPointMissing(ENTRY_SYMBOL.to_string()))?;

    if let Some(duplicate) = candidates.next() {
        return Err(Error::InvalidEntryPoint {
            name: ENTRY_SYMBOL.to_string(),
            value: duplicate.value,
            reason: "the image defines the entry symbol more than once".into(),
        });
    }

    if entry.value >= layout.placement_limit() {
        return Err(Error::InvalidEntryPoint {
            name: ENTRY_SYMBOL.to_string(),
            value: entry.value,
            reason: format!(
                "it lies past the placement limit {:#x}",
                layout.placement_limit()
            ),
        });
    }

    Ok(entry.value)
}

/// Absolute host address of the entry function inside `region`.
pub fn resolve_entry(
    symbols: &[SymbolEntry],
    layout: &SandboxLayout,
    region: &SandboxRegion,
) -> Result<usize> {
    let value = find_entry(symbols, layout)?;
    let address = region.address_of(value as usize);
    debug!("Resolved entry '{}' at {:#x}", ENTRY_SYMBOL, address);
    Ok(address)
}
