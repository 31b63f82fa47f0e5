//! Writer for small ELF64 x86-64 images.
//!
//! The loader never links anything, so the images produced here only carry
//! what it consumes: a section table with declared addresses and a symbol
//! table. There are no program headers and no relocations.

use object::elf;
use object::write::elf::{FileHeader, SectionHeader, Sym, Writer};
use object::write::StringId;
use object::Endianness;
use std::path::Path;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolSection {
    Text,
    Data,
    Bss,
}

#[derive(Debug, Clone)]
struct BuilderSymbol {
    name: String,
    section: SymbolSection,
    value: u64,
    size: u64,
    global: bool,
    function: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ImageBuilder {
    text: Option<(u64, Vec<u8>)>,
    data: Option<(u64, Vec<u8>)>,
    bss: Option<(u64, u64)>,
    comment: Option<String>,
    symbols: Vec<BuilderSymbol>,
}

impl ImageBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, address: u64, code: Vec<u8>) -> Self {
        self.text = Some((address, code));
        self
    }

    pub fn data(mut self, address: u64, bytes: Vec<u8>) -> Self {
        self.data = Some((address, bytes));
        self
    }

    pub fn bss(mut self, address: u64, size: u64) -> Self {
        self.bss = Some((address, size));
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    /// Adds a function symbol. `value` is an absolute image address.
    pub fn function(mut self, name: &str, value: u64, size: u64, global: bool) -> Self {
        self.symbols.push(BuilderSymbol {
            name: name.to_string(),
            section: SymbolSection::Text,
            value,
            size,
            global,
            function: true,
        });
        self
    }

    /// Adds a data object symbol. `value` is an absolute image address.
    pub fn object(mut self, name: &str, section: SymbolSection, value: u64, size: u64) -> Self {
        self.symbols.push(BuilderSymbol {
            name: name.to_string(),
            section,
            value,
            size,
            global: false,
            function: false,
        });
        self
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let bytes = self.build()?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        let mut writer = Writer::new(Endianness::Little, true, &mut buffer);

        // Locals must precede globals in an ELF symbol table.
        let mut symbols: Vec<&BuilderSymbol> = self.symbols.iter().collect();
        symbols.sort_by_key(|s| s.global);
        let num_local = 1 + symbols.iter().filter(|s| !s.global).count() as u32;

        writer.reserve_file_header();
        writer.reserve_null_section_index();

        let text = self.text.as_ref().map(|(address, code)| {
            let name = writer.add_section_name(b".text");
            let index = writer.reserve_section_index();
            let offset = writer.reserve(code.len(), 16);
            (name, index, offset, *address, code)
        });
        let data = self.data.as_ref().map(|(address, bytes)| {
            let name = writer.add_section_name(b".data");
            let index = writer.reserve_section_index();
            let offset = writer.reserve(bytes.len(), 8);
            (name, index, offset, *address, bytes)
        });
        let bss = self.bss.map(|(address, size)| {
            let name = writer.add_section_name(b".bss");
            let index = writer.reserve_section_index();
            (name, index, address, size)
        });
        let comment = self.comment.as_ref().map(|comment| {
            let mut bytes = comment.as_bytes().to_vec();
            bytes.push(0);
            let name = writer.add_section_name(b".comment");
            let index = writer.reserve_section_index();
            let offset = writer.reserve(bytes.len(), 1);
            (name, index, offset, bytes)
        });

        writer.reserve_null_symbol_index();
        let mut symbol_names: Vec<StringId> = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            let section_index = match symbol.section {
                SymbolSection::Text => text.as_ref().map(|t| t.1),
                SymbolSection::Data => data.as_ref().map(|d| d.1),
                SymbolSection::Bss => bss.as_ref().map(|b| b.1),
            }
            .ok_or_else(|| {
                Error::ImageParse(format!(
                    "symbol {} refers to a section the image does not have",
                    symbol.name
                ))
            })?;
            symbol_names.push(writer.add_string(symbol.name.as_bytes()));
            writer.reserve_symbol_index(Some(section_index));
        }
        writer.reserve_symtab_section_index();
        writer.reserve_symtab();
        writer.reserve_strtab_section_index();
        writer.reserve_strtab();
        writer.reserve_shstrtab_section_index();
        writer.reserve_shstrtab();
        writer.reserve_section_headers();

        writer
            .write_file_header(&FileHeader {
                os_abi: elf::ELFOSABI_NONE,
                abi_version: 0,
                e_type: elf::ET_EXEC,
                e_machine: elf::EM_X86_64,
                e_entry: 0,
                e_flags: 0,
            })
            .map_err(|e| Error::ImageParse(e.to_string()))?;

        if let Some((_, _, offset, _, code)) = &text {
            writer.pad_until(*offset);
            writer.write(code);
        }
        if let Some((_, _, offset, _, bytes)) = &data {
            writer.pad_until(*offset);
            writer.write(bytes);
        }
        if let Some((_, _, offset, bytes)) = &comment {
            writer.pad_until(*offset);
            writer.write(bytes);
        }

        writer.write_null_symbol();
        for (symbol, name) in symbols.iter().zip(&symbol_names) {
            let bind = if symbol.global {
                elf::STB_GLOBAL
            } else {
                elf::STB_LOCAL
            };
            let kind = if symbol.function {
                elf::STT_FUNC
            } else {
                elf::STT_OBJECT
            };
            let section = match symbol.section {
                SymbolSection::Text => text.as_ref().map(|t| t.1),
                SymbolSection::Data => data.as_ref().map(|d| d.1),
                SymbolSection::Bss => bss.as_ref().map(|b| b.1),
            };
            writer.write_symbol(&Sym {
                name: Some(*name),
                section,
                st_info: (bind << 4) | kind,
                st_other: elf::STV_DEFAULT,
                st_shndx: 0,
                st_value: symbol.value,
                st_size: symbol.size,
            });
        }
        writer.write_strtab();
        writer.write_shstrtab();

        writer.write_null_section_header();
        if let Some((name, _, offset, address, code)) = &text {
            writer.write_section_header(&SectionHeader {
                name: Some(*name),
                sh_type: elf::SHT_PROGBITS,
                sh_flags: u64::from(elf::SHF_ALLOC | elf::SHF_EXECINSTR),
                sh_addr: *address,
                sh_offset: *offset as u64,
                sh_size: code.len() as u64,
                sh_link: 0,
                sh_info: 0,
                sh_addralign: 16,
                sh_entsize: 0,
            });
        }
        if let Some((name, _, offset, address, bytes)) = &data {
            writer.write_section_header(&SectionHeader {
                name: Some(*name),
                sh_type: elf::SHT_PROGBITS,
                sh_flags: u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
                sh_addr: *address,
                sh_offset: *offset as u64,
                sh_size: bytes.len() as u64,
                sh_link: 0,
                sh_info: 0,
                sh_addralign: 8,
                sh_entsize: 0,
            });
        }
        if let Some((name, _, address, size)) = &bss {
            writer.write_section_header(&SectionHeader {
                name: Some(*name),
                sh_type: elf::SHT_NOBITS,
                sh_flags: u64::from(elf::SHF_ALLOC | elf::SHF_WRITE),
                sh_addr: *address,
                sh_offset: 0,
                sh_size: *size,
                sh_link: 0,
                sh_info: 0,
                sh_addralign: 8,
                sh_entsize: 0,
            });
        }
        if let Some((name, _, offset, bytes)) = &comment {
            writer.write_section_header(&SectionHeader {
                name: Some(*name),
                sh_type: elf::SHT_PROGBITS,
                sh_flags: u64::from(elf::SHF_MERGE | elf::SHF_STRINGS),
                sh_addr: 0,
                sh_offset: *offset as u64,
                sh_size: bytes.len() as u64,
                sh_link: 0,
                sh_info: 0,
                sh_addralign: 1,
                sh_entsize: 1,
            });
        }
        writer.write_symtab_section_header(num_local);
        writer.write_strtab_section_header();
        writer.write_shstrtab_section_header();

        Ok(buffer)
    }
}
