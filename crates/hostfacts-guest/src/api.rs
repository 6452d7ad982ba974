//! Process-wide handle to the guest engine
//!
//! The handle is created once per process ([`GuestApi::instance`]) and the
//! engine VM is brought up separately by [`GuestApi::initialize`], which must
//! run on the stack frame that will host the VM.

use std::ffi::{CStr, c_char};
use std::marker::PhantomData;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, instrument, warn};

use crate::abi::{ID, SymbolSource, Symbols, VALUE};
use crate::error::GuestError;
use crate::handle::GuestHandle;
use crate::library::{DynamicLibrary, LibrarySearch};

/// Environment variable consulted by the engine for extra options
const RUBYOPT: &str = "RUBYOPT";

/// The only engine option passed through from the environment
const BUNDLER_SETUP: &str = "-rbundler/setup";

static INSTANCE: OnceLock<Option<GuestApi>> = OnceLock::new();

/// An unrooted reference to a guest object
///
/// Only valid inside the protected call that produced it, which the `'s`
/// lifetime enforces: a value handed out by a [`Scope`](crate::Scope) cannot
/// be returned from the call. Objects needed for longer are retained with a
/// [`GuestHandle`](crate::GuestHandle).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct GuestRef<'s> {
    value: VALUE,
    _scope: PhantomData<&'s ()>,
}

impl GuestRef<'_> {
    pub(crate) fn new(value: VALUE) -> Self {
        Self {
            value,
            _scope: PhantomData,
        }
    }

    pub(crate) fn as_raw(self) -> VALUE {
        self.value
    }
}

/// Guest nil/true/false identities, captured after bring-up
#[derive(Debug, Clone, Copy)]
pub(crate) struct Sentinels {
    pub(crate) nil: VALUE,
    pub(crate) true_: VALUE,
    pub(crate) false_: VALUE,
}

/// Bound guest engine
///
/// Not internally synchronized: the engine runs on a single native thread
/// and callers must serialize all access.
pub struct GuestApi {
    symbols: Symbols,
    // Keeps the library mapped for as long as the bound symbols are used
    _source: Box<dyn SymbolSource>,
    first_load: bool,
    sentinels: OnceLock<Sentinels>,
    cleaned_up: AtomicBool,
}

impl std::fmt::Debug for GuestApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuestApi")
            .field("first_load", &self.first_load)
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

impl GuestApi {
    /// Get the process-wide handle, searching for the engine on first use
    ///
    /// Returns `None` when no usable engine was found; the reason is logged
    /// once and custom facts are simply not resolved.
    #[must_use]
    pub fn instance() -> Option<&'static GuestApi> {
        Self::instance_with(&LibrarySearch::from_env())
    }

    /// Like [`GuestApi::instance`], with an explicit search configuration
    ///
    /// Only the first call in a process performs the search.
    #[must_use]
    pub fn instance_with(search: &LibrarySearch) -> Option<&'static GuestApi> {
        INSTANCE
            .get_or_init(|| match Self::load(search) {
                Ok(api) => Some(api),
                Err(e) => {
                    warn!("{e}: custom facts will not be resolved");
                    None
                }
            })
            .as_ref()
    }

    /// Locate the engine library and bind its symbol table
    ///
    /// # Errors
    /// Returns an error for which [`GuestError::is_unavailable`] holds if the
    /// library cannot be found or lacks a required symbol.
    #[instrument]
    pub fn load(search: &LibrarySearch) -> Result<Self, GuestError> {
        let library = DynamicLibrary::locate(search)?;
        if library.first_load() {
            info!(library = library.name(), "guest engine loaded");
        } else {
            info!("guest engine was already loaded");
        }
        let first_load = library.first_load();
        Self::bind(Box::new(library), first_load)
    }

    /// Bind the symbol table against an arbitrary symbol source
    ///
    /// `first_load` records whether this process brings the VM up, and so
    /// whether it is responsible for tearing it down.
    ///
    /// # Errors
    /// Returns `GuestError::MissingSymbol` naming the first required symbol
    /// the source does not export.
    pub fn bind(source: Box<dyn SymbolSource>, first_load: bool) -> Result<Self, GuestError> {
        let symbols = Symbols::bind(source.as_ref())?;
        Ok(Self {
            symbols,
            _source: source,
            first_load,
            sentinels: OnceLock::new(),
            cleaned_up: AtomicBool::new(false),
        })
    }

    /// Bring the engine VM up and capture the nil/true/false sentinels
    ///
    /// Idempotent. If the engine was already running in this process the
    /// engine's own setup call is a no-op and options are left alone.
    #[instrument(skip(self))]
    pub fn initialize(&self) {
        if self.sentinels.get().is_some() {
            return;
        }

        let s = &self.symbols;
        // SAFETY: bring-up entry points take no arguments and tolerate an
        // already running VM
        unsafe {
            match s.ruby_setup {
                Some(setup) => {
                    let status = setup();
                    if status != 0 {
                        warn!(status, "guest engine setup reported a failure");
                    }
                }
                None => (s.ruby_init)(),
            }
        }

        if self.first_load {
            let current = std::env::var(RUBYOPT).ok();
            let filtered = filtered_rubyopt(current.as_deref());
            debug!(rubyopt = filtered, "guest engine options");
            // SAFETY: bring-up runs before the engine or any fact resolution
            // starts other threads
            unsafe { std::env::set_var(RUBYOPT, filtered) };

            let mut argv: [*mut c_char; 3] = [
                c"ruby".as_ptr().cast_mut(),
                c"-e".as_ptr().cast_mut(),
                c"".as_ptr().cast_mut(),
            ];
            // SAFETY: argv holds NUL-terminated strings that outlive the call;
            // the engine does not write through them for an inline script
            unsafe { (s.ruby_options)(3, argv.as_mut_ptr()) };
        }

        // SAFETY: the VM is live; an unset instance variable reads as nil
        let sentinels = unsafe {
            let nil = (s.rb_ivar_get)(s.rb_cObject.get(), (s.rb_intern)(c"@hostfacts_nil".as_ptr()));
            let nil_p = (s.rb_intern)(c"nil?".as_ptr());
            let true_ = (s.rb_funcallv)(nil, nil_p, 0, std::ptr::null());
            let false_ = (s.rb_funcallv)(true_, nil_p, 0, std::ptr::null());
            Sentinels { nil, true_, false_ }
        };
        let _ = self.sentinels.set(sentinels);

        let version = self.protect(|scope| -> Result<String, GuestError> {
            let version = scope.lookup(&["RUBY_VERSION"])?;
            scope.try_to_string(version)
        });
        match version.and_then(|version| version) {
            Ok(version) => info!(version = %version, "using guest engine to resolve custom facts"),
            Err(e) => debug!(error = %e, "could not read guest engine version"),
        }
    }

    /// Check whether the VM is up and has not been torn down
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.sentinels.get().is_some() && !self.cleaned_up.load(Ordering::Acquire)
    }

    /// Whether this process loaded the engine (and owns its teardown)
    #[must_use]
    pub fn first_load(&self) -> bool {
        self.first_load
    }

    pub(crate) fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    pub(crate) fn sentinels(&self) -> Result<Sentinels, GuestError> {
        if self.cleaned_up.load(Ordering::Acquire) {
            return Err(GuestError::NotInitialized);
        }
        self.sentinels.get().copied().ok_or(GuestError::NotInitialized)
    }

    /// Tear the VM down if this process brought it up
    ///
    /// Safe to call more than once; later calls do nothing.
    pub fn cleanup(&self) {
        if !self.first_load || self.sentinels.get().is_none() {
            return;
        }
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("tearing down guest engine");
        // SAFETY: the VM was brought up by this process and is torn down once
        unsafe { (self.symbols.ruby_cleanup)(0) };
    }

    /// Check for the guest nil object
    #[must_use]
    pub fn is_nil(&self, value: GuestRef<'_>) -> bool {
        self.sentinels().is_ok_and(|s| value.as_raw() == s.nil)
    }

    /// Check for the guest true object
    #[must_use]
    pub fn is_true(&self, value: GuestRef<'_>) -> bool {
        self.sentinels().is_ok_and(|s| value.as_raw() == s.true_)
    }

    /// Check for the guest false object
    #[must_use]
    pub fn is_false(&self, value: GuestRef<'_>) -> bool {
        self.sentinels().is_ok_and(|s| value.as_raw() == s.false_)
    }

    /// The guest nil object
    ///
    /// nil, true and false are immediate values the guest never collects, so
    /// they are not tied to a protected call.
    ///
    /// # Errors
    /// Returns `GuestError::NotInitialized` before bring-up.
    pub fn nil_value(&self) -> Result<GuestRef<'static>, GuestError> {
        self.sentinels().map(|s| GuestRef::new(s.nil))
    }

    /// The guest true object
    ///
    /// # Errors
    /// Returns `GuestError::NotInitialized` before bring-up.
    pub fn true_value(&self) -> Result<GuestRef<'static>, GuestError> {
        self.sentinels().map(|s| GuestRef::new(s.true_))
    }

    /// The guest false object
    ///
    /// # Errors
    /// Returns `GuestError::NotInitialized` before bring-up.
    pub fn false_value(&self) -> Result<GuestRef<'static>, GuestError> {
        self.sentinels().map(|s| GuestRef::new(s.false_))
    }

    /// Resolve a qualified constant such as `["RbConfig", "CONFIG"]`
    ///
    /// The constant is retained for as long as the returned handle lives.
    ///
    /// # Errors
    /// Returns `GuestError::Lookup` if a segment is undefined, or the fault
    /// raised for any other failure (such as a segment that is not a module).
    pub fn lookup(&'static self, names: &[&str]) -> Result<GuestHandle, GuestError> {
        self.protect(|scope| {
            scope
                .lookup(names)
                .map(|value| GuestHandle::new(self, value))
        })?
    }

    /// Intern a method or constant name
    ///
    /// # Errors
    /// Returns `GuestError::NotInitialized` before bring-up.
    pub fn intern(&self, name: &CStr) -> Result<ID, GuestError> {
        self.sentinels()?;
        // SAFETY: the VM is live and `name` is NUL-terminated
        Ok(unsafe { (self.symbols.rb_intern)(name.as_ptr()) })
    }
}

impl Drop for GuestApi {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Value of `RUBYOPT` to run the engine with
///
/// Bundler setup is the only option honored; anything else is cleared so the
/// engine runs with our options only.
pub(crate) fn filtered_rubyopt(current: Option<&str>) -> &'static str {
    match current {
        Some(opt) if opt.starts_with(BUNDLER_SETUP) => BUNDLER_SETUP,
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rubyopt_keeps_bundler() {
        assert_eq!(filtered_rubyopt(Some("-rbundler/setup")), "-rbundler/setup");
        assert_eq!(
            filtered_rubyopt(Some("-rbundler/setup -w")),
            "-rbundler/setup"
        );
    }

    #[test]
    fn test_rubyopt_cleared() {
        assert_eq!(filtered_rubyopt(None), "");
        assert_eq!(filtered_rubyopt(Some("-w")), "");
        assert_eq!(filtered_rubyopt(Some("")), "");
    }

    #[test]
    fn test_guest_ref_raw() {
        let value = GuestRef::new(0x42);
        assert_eq!(value.as_raw(), 0x42);
        assert_eq!(value, GuestRef::new(0x42));
    }
}
