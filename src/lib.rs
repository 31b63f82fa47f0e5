//! naclbox loads a statically linked x86-64 ELF image into a fixed-address
//! region of the host process and calls its `f` entry point on a private
//! stack, with the region base in `r15`.

#[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
compile_error!("naclbox only supports Linux on x86-64");

pub mod config;
pub mod error;
pub mod image;
pub mod sandbox;
pub mod server;

pub use error::{NaclboxError, Result};
pub use sandbox::SandboxContext;
