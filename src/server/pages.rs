//! Page producers the server can dispatch a resource name to.

use log::{debug, warn};
use std::collections::BTreeMap;
use std::ffi::{c_char, c_void, CStr, CString};
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use super::request::Response;
use crate::error::{Error, Result};
use crate::sandbox::SandboxContext;

/// Symbol every native page library exports.
pub const LIBRARY_ENTRY: &str = "http_main";

type LibraryEntry = unsafe extern "C" fn() -> *const c_char;

/// A shared library loaded into the host process. Unlike a sandbox, its code
/// runs with the server's full privileges.
#[derive(Debug)]
pub struct NativeLibrary {
    name: String,
    handle: *mut c_void,
}

fn last_dl_error() -> String {
    // SAFETY: dlerror returns null or a pointer to a thread-local string that
    // stays valid until the next dl* call on this thread.
    let message = unsafe { libc::dlerror() };
    if message.is_null() {
        "unknown dynamic loader error".to_string()
    } else {
        // SAFETY: non-null dlerror results are NUL-terminated.
        unsafe { CStr::from_ptr(message) }
            .to_string_lossy()
            .into_owned()
    }
}

impl NativeLibrary {
    pub fn open(path: &Path) -> Result<Self> {
        let c_path = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| Error::Library(format!("{}: path contains NUL", path.display())))?;

        // SAFETY: c_path is a valid C string for the duration of the call.
        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW) };
        if handle.is_null() {
            return Err(Error::Library(format!(
                "Unable to load {}: {}",
                path.display(),
                last_dl_error()
            )));
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        debug!("Loaded native library {} as page '{}'", path.display(), name);
        Ok(Self { name, handle })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn entry(&self) -> Result<LibraryEntry> {
        let symbol = CString::new(LIBRARY_ENTRY)
            .map_err(|_| Error::Library(format!("invalid symbol name {LIBRARY_ENTRY}")))?;
        // SAFETY: handle came from a successful dlopen and is closed only in Drop.
        let address = unsafe { libc::dlsym(self.handle, symbol.as_ptr()) };
        if address.is_null() {
            return Err(Error::Library(format!(
                "{} does not export {}",
                self.name, LIBRARY_ENTRY
            )));
        }
        // SAFETY: page libraries export `http_main` as
        // `const char *http_main(void)`.
        Ok(unsafe { std::mem::transmute::<*mut c_void, LibraryEntry>(address) })
    }

    /// Calls `http_main` and copies the string it returns.
    pub fn call(&self) -> Result<String> {
        let entry = self.entry()?;
        // SAFETY: see `entry`.
        let body = unsafe { entry() };
        if body.is_null() {
            return Err(Error::Library(format!(
                "{} returned a null page",
                self.name
            )));
        }
        // SAFETY: non-null results are NUL-terminated strings owned by the library.
        Ok(unsafe { CStr::from_ptr(body) }
            .to_string_lossy()
            .into_owned())
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        // SAFETY: handle came from dlopen and is closed exactly once.
        if unsafe { libc::dlclose(self.handle) } != 0 {
            warn!("Failed to unload {}: {}", self.name, last_dl_error());
        }
    }
}

/// Every page the server knows, keyed by resource name.
#[derive(Debug, Default)]
pub struct PageRegistry {
    libraries: BTreeMap<String, NativeLibrary>,
    sandboxes: BTreeMap<String, SandboxContext>,
}

impl PageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens every regular file in `dir` as a native page library.
    ///
    /// A missing directory contributes no pages; a file that fails to load
    /// is an error.
    pub fn load_library_dir(&mut self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            debug!("Library directory {} not present", dir.display());
            return Ok(0);
        }

        let mut loaded = 0;
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                self.add_library(NativeLibrary::open(&path)?);
                loaded += 1;
            }
        }
        Ok(loaded)
    }

    pub fn add_library(&mut self, library: NativeLibrary) {
        self.libraries.insert(library.name().to_string(), library);
    }

    pub fn add_sandbox(&mut self, name: impl Into<String>, context: SandboxContext) {
        self.sandboxes.insert(name.into(), context);
    }

    pub fn sandboxes_mut(&mut self) -> impl Iterator<Item = (&String, &mut SandboxContext)> {
        self.sandboxes.iter_mut()
    }

    pub fn names(&self) -> impl Iterator<Item = &String> {
        self.libraries.keys().chain(self.sandboxes.keys())
    }

    pub fn len(&self) -> usize {
        self.libraries.len() + self.sandboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Produces the response for `resource`. Libraries shadow sandboxes of
    /// the same name.
    pub fn respond(&mut self, resource: &str) -> Response {
        if let Some(library) = self.libraries.get(resource) {
            return match library.call() {
                Ok(body) => Response::Ok(body),
                Err(e) => {
                    warn!("Page '{}' failed: {}", resource, e);
                    Response::InternalError
                }
            };
        }

        if let Some(sandbox) = self.sandboxes.get_mut(resource) {
            return match sandbox.call() {
                Ok(Some(body)) => Response::Ok(body),
                Ok(None) => {
                    warn!("Sandbox page '{}' produced no result", resource);
                    Response::InternalError
                }
                Err(e) => {
                    warn!("Sandbox page '{}' failed: {}", resource, e);
                    Response::InternalError
                }
            };
        }

        Response::NotFound
    }
}
