use thiserror::Error;

#[derive(Error, Debug)]
pub enum NaclboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image parsing error: {0}")]
    ImageParse(String),

    #[error("Could not map sandbox region at {base:#x} ({len:#x} bytes): {source}")]
    RegionAcquisition {
        base: usize,
        len: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid sandbox layout: {0}")]
    InvalidLayout(String),

    #[error("Section {section} ends at {end:#x}, past the placement limit {limit:#x}")]
    SectionOverflow {
        section: String,
        end: u64,
        limit: u64,
    },

    #[error("Entry point '{0}' is missing from the image")]
    EntryPointMissing(String),

    #[error("Entry point '{name}' at {value:#x} is unusable: {reason}")]
    InvalidEntryPoint {
        name: String,
        value: u64,
        reason: String,
    },

    #[error("Returned offset {offset:#x} lies outside the sandbox region ({len:#x} bytes)")]
    ResultOutOfRegion { offset: u64, len: usize },

    #[error("Native library error: {0}")]
    Library(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Error = NaclboxError;
pub type Result<T> = std::result::Result<T, Error>;
