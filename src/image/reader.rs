use log::debug;
use object::elf;
use object::read::elf::{ElfFile64, SectionHeader};
use object::{Architecture, Endianness, Object, ObjectSection, ObjectSymbol};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::Path;

use crate::error::{Error, Result};

/// What a section holds, as far as placement is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Code,
    Data,
    Uninitialized,
    SymbolTable,
    StringTable,
    Relocation,
    Debug,
    Other,
}

#[derive(Debug, Clone, Serialize)]
pub struct SectionDescriptor {
    pub index: usize,
    pub name: String,
    pub kind: SectionKind,
    /// Declared load offset, relative to an image base of 0.
    pub address: u64,
    pub size: u64,
    /// Set for `SHF_ALLOC` sections, the only ones that exist at runtime.
    pub allocated: bool,
    /// `None` for zero-initialized (`SHT_NOBITS`) sections.
    #[serde(skip)]
    pub data: Option<Vec<u8>>,
}

impl SectionDescriptor {
    pub fn end(&self) -> u64 {
        self.address.saturating_add(self.size)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolKind {
    Function,
    Object,
    Section,
    File,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SymbolBinding {
    Local,
    Global,
    Weak,
}

#[derive(Debug, Clone, Serialize)]
pub struct SymbolEntry {
    pub name: String,
    pub value: u64,
    pub size: u64,
    /// `None` for undefined symbols.
    pub section_index: Option<usize>,
    pub kind: SymbolKind,
    pub binding: SymbolBinding,
}

impl SymbolEntry {
    pub fn is_defined(&self) -> bool {
        self.section_index.is_some()
    }
}

/// Parses the section table and symbol table of an untrusted image.
///
/// Only ELF64 images for x86-64 are accepted. Parsing never touches sandbox
/// memory; the descriptors it produces are handed to the placer and resolver.
#[derive(Debug)]
pub struct ImageReader {
    image_data: Vec<u8>,
    sections: Vec<SectionDescriptor>,
    symbols: Vec<SymbolEntry>,
}

impl ImageReader {
    pub fn from_path(path: &Path) -> Result<Self> {
        let image_data = std::fs::read(path).map_err(|e| {
            Error::ImageParse(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_bytes(image_data)
    }

    pub fn from_bytes(image_data: Vec<u8>) -> Result<Self> {
        let (sections, symbols) = parse(&image_data)?;
        debug!(
            "Parsed image: {} sections, {} symbols",
            sections.len(),
            symbols.len()
        );

        Ok(ImageReader {
            image_data,
            sections,
            symbols,
        })
    }

    pub fn sections(&self) -> &[SectionDescriptor] {
        &self.sections
    }

    pub fn symbols(&self) -> &[SymbolEntry] {
        &self.symbols
    }

    pub fn section_by_name(&self, name: &str) -> Option<&SectionDescriptor> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn len(&self) -> usize {
        self.image_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_data.is_empty()
    }

    /// Hex-encoded SHA-256 of the raw image bytes.
    pub fn digest(&self) -> String {
        let hash = Sha256::digest(&self.image_data);
        hash.iter().map(|b| format!("{b:02x}")).collect()
    }
}

fn parse(image_data: &[u8]) -> Result<(Vec<SectionDescriptor>, Vec<SymbolEntry>)> {
    let file = ElfFile64::<Endianness>::parse(image_data)
        .map_err(|e| Error::ImageParse(format!("not a 64-bit ELF image: {e}")))?;

    if file.architecture() != Architecture::X86_64 {
        return Err(Error::ImageParse(format!(
            "unsupported architecture {:?}, only x86_64 images can be loaded",
            file.architecture()
        )));
    }

    let endian = file.endian();
    let mut sections = Vec::new();

    for section in file.sections() {
        let name = section
            .name()
            .map_err(|e| Error::ImageParse(format!("bad section name: {e}")))?;
        // The null section has no name and no content.
        if name.is_empty() {
            continue;
        }

        let header = section.elf_section_header();
        let sh_type = header.sh_type(endian);
        let sh_flags = header.sh_flags(endian);
        let kind = classify(name, sh_type, sh_flags);

        let data = if sh_type == elf::SHT_NOBITS {
            None
        } else {
            Some(
                section
                    .data()
                    .map_err(|e| {
                        Error::ImageParse(format!("section {name} is truncated: {e}"))
                    })?
                    .to_vec(),
            )
        };

        sections.push(SectionDescriptor {
            index: section.index().0,
            name: name.to_string(),
            kind,
            address: section.address(),
            size: section.size(),
            allocated: sh_flags & u64::from(elf::SHF_ALLOC) != 0,
            data,
        });
    }

    let mut symbols = Vec::new();
    for symbol in file.symbols() {
        let name = symbol
            .name()
            .map_err(|e| Error::ImageParse(format!("bad symbol name: {e}")))?;

        let kind = match symbol.kind() {
            object::SymbolKind::Text => SymbolKind::Function,
            object::SymbolKind::Data | object::SymbolKind::Tls => SymbolKind::Object,
            object::SymbolKind::Section => SymbolKind::Section,
            object::SymbolKind::File => SymbolKind::File,
            _ => SymbolKind::Other,
        };
        let binding = if symbol.is_weak() {
            SymbolBinding::Weak
        } else if symbol.is_global() {
            SymbolBinding::Global
        } else {
            SymbolBinding::Local
        };
        let section_index = if symbol.is_undefined() {
            None
        } else {
            symbol.section_index().map(|index| index.0)
        };

        symbols.push(SymbolEntry {
            name: name.to_string(),
            value: symbol.address(),
            size: symbol.size(),
            section_index,
            kind,
            binding,
        });
    }

    Ok((sections, symbols))
}

fn classify(name: &str, sh_type: u32, sh_flags: u64) -> SectionKind {
    match sh_type {
        elf::SHT_SYMTAB | elf::SHT_DYNSYM => return SectionKind::SymbolTable,
        elf::SHT_STRTAB => return SectionKind::StringTable,
        elf::SHT_RELA | elf::SHT_REL => return SectionKind::Relocation,
        elf::SHT_NOBITS => return SectionKind::Uninitialized,
        _ => {}
    }

    if name.starts_with(".debug") {
        SectionKind::Debug
    } else if sh_flags & u64::from(elf::SHF_EXECINSTR) != 0 {
        SectionKind::Code
    } else if sh_flags & u64::from(elf::SHF_ALLOC) != 0 {
        SectionKind::Data
    } else {
        SectionKind::Other
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::samples;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_sample() -> NamedTempFile {
        let bytes = samples::text_image("hello").build().unwrap();
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(&bytes).unwrap();
        temp.flush().unwrap();
        temp
    }

    #[test]
    fn test_reader_from_path() {
        let temp = write_sample();
        let reader = ImageReader::from_path(temp.path());
        assert!(reader.is_ok());
    }

    #[test]
    fn test_missing_file_is_parse_error() {
        let result = ImageReader::from_path(Path::new("/nonexistent/image.elf"));
        assert!(matches!(result, Err(Error::ImageParse(_))));
    }

    #[test]
    fn test_garbage_is_rejected() {
        let result = ImageReader::from_bytes(b"definitely not an ELF file".to_vec());
        assert!(matches!(result, Err(Error::ImageParse(_))));
    }

    #[test]
    fn test_truncated_section_table_is_rejected() {
        let mut bytes = samples::text_image("hello").build().unwrap();
        bytes.truncate(bytes.len() - 40);
        let result = ImageReader::from_bytes(bytes);
        assert!(matches!(result, Err(Error::ImageParse(_))));
    }

    #[test]
    fn test_section_kinds() {
        let temp = write_sample();
        let reader = ImageReader::from_path(temp.path()).unwrap();

        let text = reader.section_by_name(".text").unwrap();
        assert_eq!(text.kind, SectionKind::Code);
        assert!(text.allocated);
        assert_eq!(text.address, samples::TEXT_ADDRESS);
        assert!(text.data.as_ref().is_some_and(|d| !d.is_empty()));

        let data = reader.section_by_name(".data").unwrap();
        assert_eq!(data.kind, SectionKind::Data);
        assert_eq!(data.address, samples::DATA_ADDRESS);
        assert!(data.data.as_ref().unwrap().starts_with(b"hello\0"));

        let bss = reader.section_by_name(".bss").unwrap();
        assert_eq!(bss.kind, SectionKind::Uninitialized);
        assert!(bss.data.is_none());

        assert_eq!(
            reader.section_by_name(".symtab").unwrap().kind,
            SectionKind::SymbolTable
        );
        assert_eq!(
            reader.section_by_name(".strtab").unwrap().kind,
            SectionKind::StringTable
        );
        assert!(!reader.section_by_name(".comment").unwrap().allocated);
    }

    #[test]
    fn test_entry_symbol_is_listed() {
        let temp = write_sample();
        let reader = ImageReader::from_path(temp.path()).unwrap();

        let f = reader.symbols().iter().find(|s| s.name == "f").unwrap();
        assert_eq!(f.kind, SymbolKind::Function);
        assert_eq!(f.binding, SymbolBinding::Global);
        assert_eq!(f.value, samples::TEXT_ADDRESS);
        assert!(f.is_defined());
    }

    #[test]
    fn test_digest_is_stable() {
        let bytes = samples::text_image("hello").build().unwrap();
        let a = ImageReader::from_bytes(bytes.clone()).unwrap();
        let b = ImageReader::from_bytes(bytes).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 64);
    }
}
