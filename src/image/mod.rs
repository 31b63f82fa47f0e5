//! Untrusted image handling: parsing, plus a writer for sample images.

pub mod builder;
pub mod reader;
pub mod samples;

pub use builder::{ImageBuilder, SymbolSection};
pub use reader::{
    ImageReader, SectionDescriptor, SectionKind, SymbolBinding, SymbolEntry, SymbolKind,
};
