//! Dynamic-loading capability.
//!
//! The host only needs four things from the platform: open an image by
//! path, resolve a symbol by name, close the image, and map an address
//! back to the name of the symbol containing it. The traits keep those
//! seams explicit; `DylibLoader` and `DladdrLookup` are the production
//! implementations.

use crate::error::LoadError;
use core::ffi::c_void;
use libloading::Library;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A mapped code image.
pub trait ModuleImage {
    /// Address of the exported symbol `name`, if present.
    fn symbol(&self, name: &str) -> Option<*const c_void>;

    /// Unmap the image. Addresses resolved from it become invalid.
    fn close(self) -> Result<(), LoadError>
    where
        Self: Sized;
}

/// Opens images by path.
pub trait ModuleLoader {
    type Image: ModuleImage;

    fn open(&mut self, path: &Path) -> Result<Self::Image, LoadError>;
}

/// Reverse lookup from a code address to its defining symbol's name.
pub trait SymbolLookup {
    fn symbol_name(&self, address: *const c_void) -> Option<String>;
}

/// `libloading`-backed loader (`RTLD_LAZY | RTLD_LOCAL` on unix).
#[derive(Debug, Default, Clone, Copy)]
pub struct DylibLoader;

pub struct DylibImage {
    path: PathBuf,
    library: Library,
}

impl DylibImage {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ModuleLoader for DylibLoader {
    type Image = DylibImage;

    fn open(&mut self, path: &Path) -> Result<DylibImage, LoadError> {
        // SAFETY: loading runs the image's initialisers. The host's contract
        // with its client module is that those are sound to run repeatedly.
        let library = unsafe { Library::new(path) }.map_err(|e| LoadError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "opened module image");
        Ok(DylibImage {
            path: path.to_path_buf(),
            library,
        })
    }
}

impl ModuleImage for DylibImage {
    fn symbol(&self, name: &str) -> Option<*const c_void> {
        // SAFETY: the symbol is read as a bare address and never called or
        // dereferenced here.
        let sym = unsafe { self.library.get::<*const c_void>(name.as_bytes()) }.ok()?;
        let address = *sym;
        (!address.is_null()).then_some(address)
    }

    fn close(self) -> Result<(), LoadError> {
        let path = self.path;
        self.library.close().map_err(|e| LoadError::Close {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        debug!(path = %path.display(), "closed module image");
        Ok(())
    }
}

/// Reverse lookup through `dladdr`. Only symbols in a loaded image's
/// dynamic symbol table are visible, so client modules must export the
/// functions they register.
#[derive(Debug, Default, Clone, Copy)]
pub struct DladdrLookup;

#[cfg(unix)]
impl SymbolLookup for DladdrLookup {
    fn symbol_name(&self, address: *const c_void) -> Option<String> {
        if address.is_null() {
            return None;
        }
        // SAFETY: `Dl_info` is plain pointers; all-zero is a valid value.
        let mut info: libc::Dl_info = unsafe { core::mem::zeroed() };
        // SAFETY: dladdr only inspects the address and fills `info`.
        if unsafe { libc::dladdr(address, &mut info) } == 0 || info.dli_sname.is_null() {
            return None;
        }
        // SAFETY: a non-null `dli_sname` points at a NUL-terminated string
        // owned by the loaded image.
        let name = unsafe { core::ffi::CStr::from_ptr(info.dli_sname) };
        Some(name.to_string_lossy().into_owned())
    }
}

#[cfg(not(unix))]
impl SymbolLookup for DladdrLookup {
    fn symbol_name(&self, _address: *const c_void) -> Option<String> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_a_missing_file_fails() {
        let mut loader = DylibLoader;
        let err = loader
            .open(Path::new("/nonexistent/libnothing-here.so"))
            .err()
            .expect("open must fail");
        assert!(matches!(err, LoadError::Open { .. }));
    }

    #[test]
    fn null_address_has_no_name() {
        assert_eq!(DladdrLookup.symbol_name(core::ptr::null()), None);
    }

    /// Invariant: the platform loader opens a real image, resolves an
    /// exported function, and closes cleanly.
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn system_c_library_round_trip() {
        let mut loader = DylibLoader;
        let image = loader.open(Path::new("libc.so.6")).expect("open libc");
        assert_eq!(image.path(), Path::new("libc.so.6"));
        let malloc = image.symbol("malloc").expect("libc exports malloc");
        assert!(image.symbol("rh_no_such_symbol").is_none());

        // Reverse lookup lands on a name the image resolves to the same
        // address (glibc may report an alias of `malloc`).
        let name = DladdrLookup.symbol_name(malloc).expect("dladdr names malloc");
        assert_eq!(image.symbol(&name), Some(malloc));
        image.close().expect("close libc");
    }

    /// Invariant: reverse lookup names a function the process links
    /// against.
    #[cfg(all(target_os = "linux", target_env = "gnu"))]
    #[test]
    fn dladdr_names_a_linked_function() {
        let address = libc::getpid as *const () as *const c_void;
        let name = DladdrLookup.symbol_name(address).expect("getpid resolves");
        assert!(name.contains("getpid"), "{name}");
    }
}
