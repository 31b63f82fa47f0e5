use anyhow::{anyhow, Result};
use capstone::prelude::*;
use clap::Args;
use console::style;
use serde::Serialize;
use std::ops::Range;
use std::path::PathBuf;

use naclbox::image::{ImageReader, SectionDescriptor, SymbolEntry};
use naclbox::sandbox::{placer, resolver, SandboxLayout, ENTRY_SYMBOL};

use super::load_config;

#[derive(Args)]
#[command(about = "Show what the loader sees in an image")]
pub struct InspectCommand {
    #[arg(help = "Path to an ELF image")]
    image: PathBuf,

    #[arg(long, help = "Output as JSON")]
    json: bool,

    #[arg(long, help = "Disassemble the entry function")]
    disasm: bool,

    #[arg(short, long, help = "Configuration file to use instead of the default")]
    config: Option<PathBuf>,
}

#[derive(Serialize)]
struct InspectReport<'a> {
    path: String,
    sha256: String,
    sections: &'a [SectionDescriptor],
    runtime_sections: Vec<&'a str>,
    symbols: &'a [SymbolEntry],
    entry: Option<u64>,
    entry_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disassembly: Option<Vec<String>>,
}

impl InspectCommand {
    pub fn execute(self) -> Result<()> {
        let image = ImageReader::from_path(&self.image).map_err(|e| {
            anyhow!(
                "{}\n\n\
                 Suggestions:\n\
                 • The loader accepts statically linked x86-64 ELF images\n\
                 • Generate a known-good image: naclbox sample fib -o fib.elf",
                e
            )
        })?;
        let layout = load_config(self.config.as_deref())?.sandbox.layout()?;

        let entry = resolver::find_entry(image.symbols(), &layout);
        let disassembly = match (&entry, self.disasm) {
            (Ok(value), true) => Some(self.disassemble(&image, *value)?),
            _ => None,
        };

        let report = InspectReport {
            path: self.image.display().to_string(),
            sha256: image.digest(),
            sections: image.sections(),
            runtime_sections: image
                .sections()
                .iter()
                .filter(|s| placer::is_runtime_section(s))
                .map(|s| s.name.as_str())
                .collect(),
            symbols: image.symbols(),
            entry: entry.as_ref().ok().copied(),
            entry_error: entry.as_ref().err().map(|e| e.to_string()),
            disassembly,
        };

        if self.json {
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_report(&report, &layout);
        }
        Ok(())
    }

    /// Disassembles the entry function. A zero-sized symbol runs to the end
    /// of its section.
    fn disassemble(&self, image: &ImageReader, entry: u64) -> Result<Vec<String>> {
        let symbol = image
            .symbols()
            .iter()
            .find(|s| s.name == ENTRY_SYMBOL && s.is_defined())
            .ok_or_else(|| anyhow!("Entry symbol '{}' not found", ENTRY_SYMBOL))?;
        let section = image
            .sections()
            .iter()
            .find(|s| s.allocated && s.address <= entry && entry < s.end())
            .ok_or_else(|| anyhow!("Entry {:#x} is not inside any section", entry))?;
        let data = section
            .data
            .as_deref()
            .ok_or_else(|| anyhow!("Section {} has no file contents", section.name))?;

        let range = entry_range(entry - section.address, symbol.size, data.len());

        let cs = Capstone::new()
            .x86()
            .mode(arch::x86::ArchMode::Mode64)
            .syntax(arch::x86::ArchSyntax::Intel)
            .build()
            .map_err(|e| anyhow!("Failed to create disassembler: {}", e))?;
        let insns = cs
            .disasm_all(&data[range], entry)
            .map_err(|e| anyhow!("Disassembly failed: {}", e))?;

        Ok(insns
            .iter()
            .map(|insn| {
                format!(
                    "0x{:08x}  {} {}",
                    insn.address(),
                    insn.mnemonic().unwrap_or("???"),
                    insn.op_str().unwrap_or("")
                )
                .trim_end()
                .to_string()
            })
            .collect())
    }
}

/// Byte range of the entry function inside its section's data. Both values
/// come from the image, so the range is clamped to the data.
fn entry_range(offset: u64, size: u64, len: usize) -> Range<usize> {
    let start = usize::try_from(offset).unwrap_or(usize::MAX).min(len);
    let end = match size {
        0 => len,
        size => start
            .saturating_add(usize::try_from(size).unwrap_or(usize::MAX))
            .min(len),
    };
    start..end
}

fn print_report(report: &InspectReport, layout: &SandboxLayout) {
    println!("{}", style(&report.path).bold().cyan());
    println!("  SHA-256: {}", style(&report.sha256).dim());
    println!();

    println!("{}", style("Sections").bold().underlined());
    for section in report.sections {
        let placed = report.runtime_sections.contains(&section.name.as_str());
        let marker = if placed {
            style("placed ").green()
        } else {
            style("skipped").dim()
        };
        println!(
            "  {} {:<12} {:?} {} - {} ({} bytes)",
            marker,
            section.name,
            section.kind,
            style(format!("0x{:08x}", section.address)).yellow(),
            style(format!("0x{:08x}", section.end())).yellow(),
            section.size
        );
    }
    println!(
        "  Sections must end below {}",
        style(format!("0x{:x}", layout.placement_limit())).yellow()
    );
    println!();

    match (&report.entry, &report.entry_error) {
        (Some(entry), _) => println!(
            "{} {} at {}",
            style("Entry").bold(),
            ENTRY_SYMBOL,
            style(format!("0x{:08x}", entry)).yellow()
        ),
        (None, Some(error)) => println!("{} {}", style("✗").red(), error),
        (None, None) => {}
    }

    if let Some(lines) = &report.disassembly {
        println!();
        println!("{}", style("Disassembly").bold().underlined());
        println!("{}", style("─".repeat(60)).dim());
        for line in lines {
            println!("  {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_range_within_section() {
        assert_eq!(entry_range(0, 4, 16), 0..4);
        assert_eq!(entry_range(4, 8, 16), 4..12);
    }

    #[test]
    fn test_zero_size_runs_to_section_end() {
        assert_eq!(entry_range(3, 0, 16), 3..16);
    }

    #[test]
    fn test_oversized_symbol_is_clamped() {
        assert_eq!(entry_range(1, u64::MAX, 16), 1..16);
        assert_eq!(entry_range(8, 100, 16), 8..16);
    }

    #[test]
    fn test_offset_past_data_is_empty() {
        assert_eq!(entry_range(32, 4, 16), 16..16);
        assert_eq!(entry_range(u64::MAX, u64::MAX, 16), 16..16);
    }

    #[test]
    fn test_disassemble_image_with_oversized_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.elf");
        naclbox::image::ImageBuilder::new()
            .text(0x1000, vec![0x90, 0x31, 0xc0, 0xc3])
            .function("f", 0x1001, u64::MAX, true)
            .write_to(&path)
            .unwrap();

        let command = InspectCommand {
            image: path.clone(),
            json: true,
            disasm: true,
            config: None,
        };
        let image = ImageReader::from_path(&path).unwrap();
        let lines = command.disassemble(&image, 0x1001).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("xor"));
        assert!(lines[1].contains("ret"));
    }
}
