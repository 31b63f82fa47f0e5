//! Copies an image's runtime sections into the region.

use log::debug;

use super::layout::SandboxLayout;
use super::region::SandboxRegion;
use crate::error::{Error, Result};
use crate::image::{SectionDescriptor, SectionKind};

/// Sections that are never copied, whatever their flags say.
pub const EXCLUDED_SECTIONS: &[&str] = &[
    ".shstrtab",
    ".symtab",
    ".strtab",
    ".comment",
    ".init",
    ".rela.text",
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PlacementReport {
    /// Sections whose bytes were copied into the region.
    pub placed: Vec<String>,
    /// Zero-initialized sections; the fresh region already holds their bytes.
    pub zero_filled: Vec<String>,
    /// Metadata and other sections with no runtime presence.
    pub excluded: Vec<String>,
}

/// Whether a section has to exist in sandbox memory at runtime.
pub fn is_runtime_section(section: &SectionDescriptor) -> bool {
    if EXCLUDED_SECTIONS.contains(&section.name.as_str()) {
        return false;
    }
    match section.kind {
        SectionKind::SymbolTable
        | SectionKind::StringTable
        | SectionKind::Relocation
        | SectionKind::Debug => false,
        _ => section.allocated,
    }
}

/// Copies every runtime section to `base + declared address`.
///
/// Each section is checked against the layout's placement limit before
/// anything is copied for it; one oversized section aborts the whole load.
pub fn place_sections(
    region: &mut SandboxRegion,
    layout: &SandboxLayout,
    sections: &[SectionDescriptor],
) -> Result<PlacementReport> {
    let limit = layout.placement_limit();
    let mut report = PlacementReport::default();

    for section in sections {
        if !is_runtime_section(section) {
            debug!("Skipping section {}", section.name);
            report.excluded.push(section.name.clone());
            continue;
        }

        let end = section.address.checked_add(section.size);
        match end {
            Some(end) if end < limit => {}
            _ => {
                return Err(Error::SectionOverflow {
                    section: section.name.clone(),
                    end: end.unwrap_or(u64::MAX),
                    limit,
                })
            }
        }

        match &section.data {
            Some(data) => {
                // `end < limit` bounds the address well inside the region.
                region.write(section.address as usize, data)?;
                debug!(
                    "Placed {} at {:#x} ({:#x} bytes)",
                    section.name,
                    region.address_of(section.address as usize),
                    data.len()
                );
                report.placed.push(section.name.clone());
            }
            None => report.zero_filled.push(section.name.clone()),
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::region::testing::CountingMapper;
    use std::sync::Arc;

    fn layout() -> SandboxLayout {
        SandboxLayout::new(0x7300_0000_0000, 0x10_0000, 16, 0x1000).unwrap()
    }

    fn section(name: &str, kind: SectionKind, address: u64, data: Option<Vec<u8>>) -> SectionDescriptor {
        let size = data.as_ref().map_or(0x40, |d| d.len() as u64);
        SectionDescriptor {
            index: 1,
            name: name.to_string(),
            kind,
            address,
            size,
            allocated: matches!(
                kind,
                SectionKind::Code | SectionKind::Data | SectionKind::Uninitialized
            ),
            data,
        }
    }

    fn region() -> SandboxRegion {
        SandboxRegion::acquire_with(&layout(), Arc::new(CountingMapper::default())).unwrap()
    }

    #[test]
    fn test_places_code_and_data() {
        let mut region = region();
        let sections = vec![
            section(".text", SectionKind::Code, 0x1000, Some(vec![0x90, 0xc3])),
            section(".data", SectionKind::Data, 0x2000, Some(b"hi\0".to_vec())),
            section(".bss", SectionKind::Uninitialized, 0x3000, None),
        ];

        let report = place_sections(&mut region, &layout(), &sections).unwrap();
        assert_eq!(report.placed, vec![".text", ".data"]);
        assert_eq!(report.zero_filled, vec![".bss"]);
        assert_eq!(region.read_c_string(0x2000).as_deref(), Some("hi"));
    }

    #[test]
    fn test_metadata_sections_are_excluded() {
        let mut region = region();
        let mut comment = section(".comment", SectionKind::Other, 0, Some(b"gcc\0".to_vec()));
        // Even an allocated section named in the exclusion set stays out.
        let mut init = section(".init", SectionKind::Code, 0x4000, Some(vec![0xcc]));
        comment.allocated = false;
        init.allocated = true;
        let sections = vec![
            section(".symtab", SectionKind::SymbolTable, 0, Some(vec![1; 24])),
            section(".strtab", SectionKind::StringTable, 0, Some(b"\0f\0".to_vec())),
            section(".rela.text", SectionKind::Relocation, 0, Some(vec![2; 24])),
            section(".debug_info", SectionKind::Debug, 0, Some(vec![3; 8])),
            comment,
            init,
        ];

        let report = place_sections(&mut region, &layout(), &sections).unwrap();
        assert!(report.placed.is_empty());
        assert_eq!(report.excluded.len(), 6);
        assert_eq!(region.read_c_string(0x4000).as_deref(), Some(""));
    }

    #[test]
    fn test_section_reaching_trampoline_fails() {
        let layout = layout();
        let mut region = region();
        let address = layout.trampoline_offset() as u64 - 8;
        let sections = vec![section(".data", SectionKind::Data, address, Some(vec![0xff; 16]))];

        let result = place_sections(&mut region, &layout, &sections);
        assert!(matches!(result, Err(Error::SectionOverflow { .. })));
        // Nothing was written over the trampoline area.
        assert_eq!(region.read_c_string(address as usize).as_deref(), Some(""));
    }

    #[test]
    fn test_section_ending_at_limit_fails() {
        let layout = layout();
        let mut region = region();
        let limit = layout.placement_limit();
        let sections = vec![section(".data", SectionKind::Data, limit - 4, Some(vec![1; 4]))];

        match place_sections(&mut region, &layout, &sections) {
            Err(Error::SectionOverflow { end, limit: l, .. }) => {
                assert_eq!(end, limit);
                assert_eq!(l, limit);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
    }

    #[test]
    fn test_section_just_below_limit_fits() {
        let layout = layout();
        let mut region = region();
        let limit = layout.placement_limit();
        let sections = vec![section(".data", SectionKind::Data, limit - 5, Some(b"ok!\0".to_vec()))];

        assert!(place_sections(&mut region, &layout, &sections).is_ok());
        assert_eq!(region.read_c_string(limit as usize - 5).as_deref(), Some("ok!"));
    }

    #[test]
    fn test_zero_filled_section_is_bounds_checked_too() {
        let layout = layout();
        let mut region = region();
        let mut bss = section(".bss", SectionKind::Uninitialized, 0x1000, None);
        bss.size = layout.trampoline_offset() as u64;

        let result = place_sections(&mut region, &layout, &[bss]);
        assert!(matches!(result, Err(Error::SectionOverflow { .. })));
    }

    #[test]
    fn test_wrapping_section_fails() {
        let mut region = region();
        let mut wrap = section(".data", SectionKind::Data, u64::MAX - 1, None);
        wrap.size = 16;
        let result = place_sections(&mut region, &layout(), &[wrap]);
        assert!(matches!(
            result,
            Err(Error::SectionOverflow { end: u64::MAX, .. })
        ));
    }
}
