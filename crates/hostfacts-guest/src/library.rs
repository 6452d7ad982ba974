//! Locating and opening the guest engine library

use std::ffi::c_void;
use std::path::PathBuf;
use std::ptr::NonNull;

use libloading::Library;
use tracing::debug;

use crate::abi::SymbolSource;
use crate::error::GuestError;

/// Environment variable naming an explicit engine library
pub const LIBRARY_ENV: &str = "HOSTFACTS_GUEST_LIBRARY";

/// Symbol used to recognize an engine already present in the process
const ENGINE_MARKER: &[u8] = b"ruby_init\0";

#[cfg(target_os = "linux")]
const CANDIDATES: &[&str] = &[
    "libruby.so",
    "libruby.so.3.4",
    "libruby.so.3.3",
    "libruby.so.3.2",
    "libruby.so.3.1",
    "libruby.so.3.0",
    "libruby.so.2.7",
];

#[cfg(target_os = "macos")]
const CANDIDATES: &[&str] = &["libruby.dylib"];

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const CANDIDATES: &[&str] = &[];

/// Where to look for the engine library
#[derive(Debug, Clone, Default)]
pub struct LibrarySearch {
    /// Explicit library path, tried before the conventional names
    pub library: Option<PathBuf>,
}

impl LibrarySearch {
    /// Search using `HOSTFACTS_GUEST_LIBRARY` when set
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            library: std::env::var_os(LIBRARY_ENV).map(PathBuf::from),
        }
    }

    /// Set an explicit library path
    #[must_use]
    pub fn with_library(mut self, path: impl Into<PathBuf>) -> Self {
        self.library = Some(path.into());
        self
    }
}

/// An opened engine library
pub struct DynamicLibrary {
    library: Library,
    name: String,
    first_load: bool,
}

impl DynamicLibrary {
    /// Find the engine library
    ///
    /// An engine already linked into the process wins; in that case this
    /// process did not load it and must not tear it down.
    ///
    /// # Errors
    /// Returns `GuestError::LibraryLoad` if an explicit library cannot be opened,
    /// or `GuestError::LibraryNotFound` if nothing could be found.
    pub fn locate(search: &LibrarySearch) -> Result<Self, GuestError> {
        if let Some(library) = loaded_in_process() {
            return Ok(Self {
                library,
                name: "<process>".to_string(),
                first_load: false,
            });
        }

        if let Some(path) = &search.library {
            return Self::open(&path.display().to_string());
        }

        for candidate in CANDIDATES {
            match Self::open(candidate) {
                Ok(library) => return Ok(library),
                Err(e) => debug!(library = candidate, error = %e, "candidate not loadable"),
            }
        }

        Err(GuestError::LibraryNotFound(format!(
            "tried {} (set {LIBRARY_ENV} to override)",
            CANDIDATES.join(", ")
        )))
    }

    fn open(name: &str) -> Result<Self, GuestError> {
        // SAFETY: loading the engine runs its initializers, which have no
        // preconditions beyond being loaded once per process
        let library = unsafe { Library::new(name) }.map_err(|e| GuestError::LibraryLoad {
            path: name.to_string(),
            message: e.to_string(),
        })?;
        Ok(Self {
            library,
            name: name.to_string(),
            first_load: true,
        })
    }

    /// Path or name the library was opened from
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this process loaded the engine (as opposed to finding it resident)
    #[must_use]
    pub fn first_load(&self) -> bool {
        self.first_load
    }
}

impl SymbolSource for DynamicLibrary {
    fn find(&self, name: &str) -> Option<NonNull<c_void>> {
        // SAFETY: the symbol is only read as an address here; its type is applied by the ABI table
        let symbol = unsafe { self.library.get::<*mut c_void>(name.as_bytes()) }.ok()?;
        NonNull::new(*symbol)
    }
}

fn loaded_in_process() -> Option<Library> {
    #[cfg(unix)]
    let library: Library = libloading::os::unix::Library::this().into();
    #[cfg(windows)]
    let library: Library = libloading::os::windows::Library::this().ok()?.into();

    // SAFETY: only probing for the presence of a symbol
    let found = unsafe { library.get::<*mut c_void>(ENGINE_MARKER) }.is_ok();
    found.then_some(library)
}
