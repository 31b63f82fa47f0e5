//! The executable memory region a sandbox lives in.

use log::{debug, warn};
use std::io;
use std::ptr::NonNull;
use std::sync::Arc;

use super::layout::SandboxLayout;
use crate::error::{Error, Result};

/// Primitive that establishes and tears down the region's mapping.
///
/// [`HostMapper`] is the real implementation; tests substitute doubles that
/// count calls to prove every region is released exactly once.
pub trait MemoryMapper {
    /// Maps `len` bytes of zero-filled read/write/execute memory at `addr`.
    fn map(&self, addr: usize, len: usize) -> io::Result<NonNull<u8>>;

    /// Releases a mapping previously returned by [`MemoryMapper::map`].
    ///
    /// # Safety
    ///
    /// `ptr` and `len` must describe a live mapping from `map` on this
    /// mapper, and nothing may access it afterwards.
    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> io::Result<()>;
}

/// Anonymous private `mmap` at a fixed address.
///
/// `MAP_FIXED_NOREPLACE` makes an occupied address an error instead of
/// silently replacing whatever was mapped there. `MAP_NORESERVE` keeps a
/// 4 GiB region from being charged against the commit limit up front.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostMapper;

impl MemoryMapper for HostMapper {
    fn map(&self, addr: usize, len: usize) -> io::Result<NonNull<u8>> {
        // SAFETY: anonymous mapping with MAP_FIXED_NOREPLACE never touches
        // existing mappings.
        let ptr = unsafe {
            libc::mmap(
                addr as *mut libc::c_void,
                len,
                libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
                libc::MAP_PRIVATE
                    | libc::MAP_ANONYMOUS
                    | libc::MAP_FIXED_NOREPLACE
                    | libc::MAP_NORESERVE,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(io::Error::last_os_error());
        }

        // Kernels before 4.17 treat MAP_FIXED_NOREPLACE as a hint.
        if ptr as usize != addr {
            // SAFETY: `ptr` is the mapping that was just created.
            unsafe { libc::munmap(ptr, len) };
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("kernel placed the mapping at {:#x}", ptr as usize),
            ));
        }

        NonNull::new(ptr.cast::<u8>())
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "mmap returned null"))
    }

    unsafe fn unmap(&self, ptr: NonNull<u8>, len: usize) -> io::Result<()> {
        if libc::munmap(ptr.as_ptr().cast(), len) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Exclusive owner of one mapped sandbox region.
///
/// The mapping is released when the region is dropped and at no other time.
/// There is no `Clone`, and moving a region moves the only handle to it, so
/// double release is impossible. The raw base pointer also makes the type
/// neither `Send` nor `Sync`.
pub struct SandboxRegion {
    base: NonNull<u8>,
    len: usize,
    mapper: Arc<dyn MemoryMapper>,
}

impl std::fmt::Debug for SandboxRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxRegion")
            .field("base", &format_args!("{:#x}", self.base_address()))
            .field("len", &format_args!("{:#x}", self.len))
            .finish()
    }
}

impl SandboxRegion {
    pub fn acquire(layout: &SandboxLayout) -> Result<Self> {
        Self::acquire_with(layout, Arc::new(HostMapper))
    }

    pub fn acquire_with(layout: &SandboxLayout, mapper: Arc<dyn MemoryMapper>) -> Result<Self> {
        let addr = layout.base_address();
        let len = layout.region_size();

        let base = mapper
            .map(addr, len)
            .map_err(|source| Error::RegionAcquisition {
                base: addr,
                len,
                source,
            })?;
        debug!("Mapped sandbox region at {:#x} ({:#x} bytes)", base.as_ptr() as usize, len);

        Ok(Self { base, len, mapper })
    }

    pub fn base(&self) -> NonNull<u8> {
        self.base
    }

    pub fn base_address(&self) -> usize {
        self.base.as_ptr() as usize
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute host address of `offset`.
    pub fn address_of(&self, offset: usize) -> usize {
        self.base_address() + offset
    }

    /// Copies `bytes` to `offset`, refusing writes that would leave the region.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        let in_bounds = offset
            .checked_add(bytes.len())
            .is_some_and(|end| end <= self.len);
        if !in_bounds {
            return Err(Error::InvalidLayout(format!(
                "write of {:#x} bytes at {offset:#x} leaves the region ({:#x} bytes)",
                bytes.len(),
                self.len
            )));
        }

        // SAFETY: the destination range was checked against the mapping and
        // `&mut self` guarantees no other access to it.
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.base.as_ptr().add(offset),
                bytes.len(),
            );
        }
        Ok(())
    }

    /// Reads a NUL-terminated string at `offset`, stopping at the region end.
    pub fn read_c_string(&self, offset: usize) -> Option<String> {
        if offset >= self.len {
            return None;
        }

        // SAFETY: the whole region is mapped readable for as long as `self`
        // lives, and sandboxed code only runs while `&mut self` is held by
        // the context, never concurrently with this borrow.
        let tail = unsafe {
            std::slice::from_raw_parts(self.base.as_ptr().add(offset), self.len - offset)
        };
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        Some(String::from_utf8_lossy(&tail[..end]).into_owned())
    }
}

impl Drop for SandboxRegion {
    fn drop(&mut self) {
        // SAFETY: `base`/`len` came from `map` on this mapper and this is the
        // region's only handle.
        match unsafe { self.mapper.unmap(self.base, self.len) } {
            Ok(()) => debug!("Released sandbox region at {:#x}", self.base_address()),
            Err(e) => warn!(
                "Failed to release sandbox region at {:#x}: {}",
                self.base_address(),
                e
            ),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::CountingMapper;
    use super::*;

    fn layout() -> SandboxLayout {
        SandboxLayout::new(0x7100_0000_0000, 0x10_0000, 16, 0x1000).unwrap()
    }

    #[test]
    fn test_drop_releases_once() {
        let mapper = Arc::new(CountingMapper::default());
        {
            let region = SandboxRegion::acquire_with(&layout(), mapper.clone()).unwrap();
            assert_eq!(region.len(), 0x10_0000);
            assert_eq!(mapper.maps(), 1);
            assert_eq!(mapper.unmaps(), 0);
        }
        assert_eq!(mapper.unmaps(), 1);
    }

    #[test]
    fn test_move_does_not_release() {
        let mapper = Arc::new(CountingMapper::default());
        let region = SandboxRegion::acquire_with(&layout(), mapper.clone()).unwrap();
        let moved = region;
        assert_eq!(mapper.unmaps(), 0);
        drop(moved);
        assert_eq!(mapper.unmaps(), 1);
    }

    #[test]
    fn test_failed_map_is_region_acquisition_error() {
        let mapper = Arc::new(CountingMapper::failing());
        let result = SandboxRegion::acquire_with(&layout(), mapper.clone());
        assert!(matches!(result, Err(Error::RegionAcquisition { .. })));
        assert_eq!(mapper.unmaps(), 0);
    }

    #[test]
    fn test_write_and_read_string() {
        let mapper = Arc::new(CountingMapper::default());
        let mut region = SandboxRegion::acquire_with(&layout(), mapper).unwrap();
        region.write(0x2000, b"hello\0world").unwrap();
        assert_eq!(region.read_c_string(0x2000).as_deref(), Some("hello"));
        assert_eq!(region.read_c_string(0x2006).as_deref(), Some("world"));
        assert_eq!(region.read_c_string(0x10_0000), None);
    }

    #[test]
    fn test_unterminated_string_stops_at_region_end() {
        let mapper = Arc::new(CountingMapper::default());
        let mut region = SandboxRegion::acquire_with(&layout(), mapper).unwrap();
        let end = region.len() - 3;
        region.write(end, b"abc").unwrap();
        assert_eq!(region.read_c_string(end).as_deref(), Some("abc"));
    }

    #[test]
    fn test_write_out_of_bounds_is_rejected() {
        let mapper = Arc::new(CountingMapper::default());
        let mut region = SandboxRegion::acquire_with(&layout(), mapper).unwrap();
        let len = region.len();
        assert!(region.write(len - 2, b"abc").is_err());
        assert!(region.write(usize::MAX, b"a").is_err());
    }

    #[test]
    fn test_host_mapper_refuses_occupied_address() {
        let layout = SandboxLayout::new(0x7200_0000_0000, 0x10_0000, 16, 0x1000).unwrap();
        let first = SandboxRegion::acquire(&layout).unwrap();
        assert_eq!(first.base_address(), 0x7200_0000_0000);

        let second = SandboxRegion::acquire(&layout);
        assert!(matches!(second, Err(Error::RegionAcquisition { .. })));

        drop(first);
        assert!(SandboxRegion::acquire(&layout).is_ok());
    }
}
