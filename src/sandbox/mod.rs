//! Loading an untrusted image into a fixed-address region and calling it.
//!
//! A [`SandboxContext`] is assembled in a fixed order:
//!
//! 1. [`ImageReader`] parses the image's section and symbol tables.
//! 2. [`SandboxRegion`] maps one read/write/execute region at the layout's base.
//! 3. [`placer`] copies runtime sections to `base + declared address`.
//! 4. [`resolver`] locates the `f` entry symbol.
//! 5. [`trampoline`] installs the call stub near the top of the region.
//!
//! The first failure aborts the sequence and the partially built region is
//! released before the error is returned. A context that exists is always
//! ready to call.
//!
//! # Limitations
//!
//! This is a loading mechanism, not an isolation boundary. There is no
//! instruction validation and no syscall interception, and nothing stops
//! sandboxed code from reaching host memory through absolute addresses. A
//! sandboxed function that faults or loops forever takes the calling thread
//! (or the process) with it.
//!
//! # Concurrency
//!
//! Every call reuses the region's stack, so calls on one context must never
//! overlap. [`SandboxContext::call`] takes `&mut self`, and the context is
//! neither `Send` nor `Sync`; callers that serve concurrent work keep one
//! context per worker.

pub mod invoke;
pub mod layout;
pub mod placer;
pub mod region;
pub mod resolver;
pub mod trampoline;

use log::{debug, info};
use std::path::Path;
use std::sync::Arc;

pub use invoke::{CallFrame, CallOutcome, ReturnContract};
pub use layout::SandboxLayout;
pub use placer::{PlacementReport, EXCLUDED_SECTIONS};
pub use region::{HostMapper, MemoryMapper, SandboxRegion};
pub use resolver::ENTRY_SYMBOL;

use crate::error::Result;
use crate::image::ImageReader;

/// A loaded image, ready to be called any number of times.
#[derive(Debug)]
pub struct SandboxContext {
    region: SandboxRegion,
    layout: SandboxLayout,
    entry: usize,
    trampoline: usize,
    placement: PlacementReport,
}

impl SandboxContext {
    /// Loads the image at `path` with the default layout.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_layout(path, SandboxLayout::default())
    }

    pub fn create_with_layout(path: impl AsRef<Path>, layout: SandboxLayout) -> Result<Self> {
        let image = ImageReader::from_path(path.as_ref())?;
        info!(
            "Loading {} (sha256 {})",
            path.as_ref().display(),
            image.digest()
        );
        Self::from_image(&image, layout, Arc::new(HostMapper))
    }

    /// Builds a context from an already parsed image on a caller-chosen
    /// mapping primitive.
    pub fn from_image(
        image: &ImageReader,
        layout: SandboxLayout,
        mapper: Arc<dyn MemoryMapper>,
    ) -> Result<Self> {
        let mut region = SandboxRegion::acquire_with(&layout, mapper)?;
        let placement = placer::place_sections(&mut region, &layout, image.sections())?;
        let entry = resolver::resolve_entry(image.symbols(), &layout, &region)?;
        let trampoline = trampoline::install(&mut region, &layout)?;

        info!(
            "Sandbox ready at {:#x}: entry {:#x}, trampoline {:#x}",
            region.base_address(),
            entry,
            trampoline
        );

        Ok(Self {
            region,
            layout,
            entry,
            trampoline,
            placement,
        })
    }

    pub fn base_address(&self) -> usize {
        self.region.base_address()
    }

    pub fn entry_address(&self) -> usize {
        self.entry
    }

    pub fn trampoline_address(&self) -> usize {
        self.trampoline
    }

    pub fn layout(&self) -> &SandboxLayout {
        &self.layout
    }

    pub fn placement(&self) -> &PlacementReport {
        &self.placement
    }

    fn frame(&self) -> CallFrame {
        CallFrame {
            base: self.region.base_address(),
            stack_top: self.region.address_of(self.layout.stack_top_offset()),
            trampoline: self.trampoline,
            entry: self.entry,
        }
    }

    fn call_raw(&mut self) -> u64 {
        let frame = self.frame();
        debug!(
            "Calling entry {:#x} via {:#x}, stack {:#x}, base in {}",
            frame.entry,
            frame.trampoline,
            frame.stack_top,
            trampoline::BASE_REGISTER
        );
        // SAFETY: the region is mapped executable for the lifetime of `self`,
        // the trampoline and entry were installed by `from_image`, and
        // `&mut self` rules out a concurrent call on the same stack.
        unsafe { invoke::invoke(&frame) }
    }

    /// Calls the entry point under the string contract.
    ///
    /// Returns `None` when the entry returns the null offset; otherwise the
    /// string at `base + offset`.
    pub fn call(&mut self) -> Result<Option<String>> {
        let raw = self.call_raw();
        match self.layout.translate_offset(raw)? {
            Some(offset) => Ok(self.region.read_c_string(offset)),
            None => Ok(None),
        }
    }

    /// Calls the entry point under the integer contract.
    pub fn call_integer(&mut self) -> i32 {
        invoke::as_integer(self.call_raw())
    }

    pub fn call_with(&mut self, contract: ReturnContract) -> Result<CallOutcome> {
        match contract {
            ReturnContract::String => self.call().map(CallOutcome::Text),
            ReturnContract::Integer => Ok(CallOutcome::Integer(self.call_integer())),
        }
    }
}

impl Drop for SandboxContext {
    fn drop(&mut self) {
        debug!("Dropping sandbox at {:#x}", self.region.base_address());
    }
}

#[cfg(test)]
mod tests {
    use super::region::testing::CountingMapper;
    use super::*;
    use crate::error::Error;
    use crate::image::{samples, ImageBuilder};

    fn layout() -> SandboxLayout {
        SandboxLayout::new(0x7600_0000_0000, 0x10_0000, 16, 0x1000).unwrap()
    }

    fn reader(builder: ImageBuilder) -> ImageReader {
        ImageReader::from_bytes(builder.build().unwrap()).unwrap()
    }

    #[test]
    fn test_successful_load_releases_once_on_drop() {
        let mapper = Arc::new(CountingMapper::default());
        let context =
            SandboxContext::from_image(&reader(samples::fib_image(20)), layout(), mapper.clone())
                .unwrap();

        assert_eq!(context.entry_address(), context.base_address() + 0x1000);
        assert_eq!(
            context.trampoline_address(),
            context.base_address() + layout().trampoline_offset()
        );
        assert_eq!(context.placement().placed, vec![".text", ".data"]);
        assert_eq!(context.placement().zero_filled, vec![".bss"]);
        assert_eq!(mapper.unmaps(), 0);

        drop(context);
        assert_eq!(mapper.maps(), 1);
        assert_eq!(mapper.unmaps(), 1);
    }

    #[test]
    fn test_missing_entry_releases_region() {
        let mapper = Arc::new(CountingMapper::default());
        let image = ImageBuilder::new()
            .text(0x1000, vec![0xc3])
            .function("main", 0x1000, 1, true);

        let result = SandboxContext::from_image(&reader(image), layout(), mapper.clone());
        assert!(matches!(result, Err(Error::EntryPointMissing(_))));
        assert_eq!(mapper.maps(), 1);
        assert_eq!(mapper.unmaps(), 1);
    }

    #[test]
    fn test_overflowing_section_releases_region() {
        let mapper = Arc::new(CountingMapper::default());
        let layout = layout();
        let image = samples::text_image("x").data(layout.trampoline_offset() as u64 - 2, vec![1; 8]);

        let result = SandboxContext::from_image(&reader(image), layout, mapper.clone());
        assert!(matches!(result, Err(Error::SectionOverflow { .. })));
        assert_eq!(mapper.maps(), 1);
        assert_eq!(mapper.unmaps(), 1);
    }

    #[test]
    fn test_failed_mapping_releases_nothing() {
        let mapper = Arc::new(CountingMapper::failing());
        let result =
            SandboxContext::from_image(&reader(samples::null_image()), layout(), mapper.clone());
        assert!(matches!(result, Err(Error::RegionAcquisition { .. })));
        assert_eq!(mapper.maps(), 0);
        assert_eq!(mapper.unmaps(), 0);
    }

    #[test]
    fn test_unreadable_image_never_maps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.elf");
        let result = SandboxContext::create_with_layout(&path, layout());
        assert!(matches!(result, Err(Error::ImageParse(_))));
    }
}
