//! Protected calls into guest code
//!
//! Anything that can raise a guest exception is only reachable through a
//! [`Scope`], and a scope only exists inside [`GuestApi::protect`] or
//! [`GuestApi::rescue`]. Guest exceptions therefore always land at one of
//! those two boundaries and never unwind through native frames uncontrolled.
//!
//! The engine accepts plain function pointers plus one opaque word of
//! context, so each adapter parks its closure in a stack slot and passes the
//! slot's address to a trampoline instantiated for the closure's type.
//!
//! Compound operations that build native values (conversions, backtraces,
//! constant lookups) run every engine step through its own protected call: a
//! raise then lands in a boundary whose only frames are the engine's own, a
//! `Copy` closure and its trampoline, and comes back as a `Result` before any
//! native value is dropped.

use std::any::Any;
use std::ffi::{CStr, CString, c_char, c_int, c_long};
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};

use tracing::debug;

use crate::abi::{GlobalRef, ID, ST_CONTINUE, ST_STOP, VALUE};
use crate::api::{GuestApi, GuestRef, Sentinels};
use crate::error::{GuestError, RaiseKind};
use crate::handle::GuestHandle;

type Panic = Box<dyn Any + Send + 'static>;

/// Access to guest operations that may raise
///
/// The plain methods (`call`, `to_string`, `is_a` ...) jump straight back to
/// the enclosing protected call when the guest raises; code using them should
/// not hold native values that need dropping across such calls. The methods
/// returning `Result` trap the raise themselves and are safe to mix with
/// native state.
#[derive(Clone, Copy)]
pub struct Scope<'a> {
    pub(crate) api: &'a GuestApi,
    pub(crate) sentinels: Sentinels,
}

impl Deref for Scope<'_> {
    type Target = GuestApi;

    fn deref(&self) -> &GuestApi {
        self.api
    }
}

/// A guest fault caught at a boundary, before it is described
#[derive(Debug, Clone, Copy)]
pub(crate) struct Raised {
    pub(crate) tag: c_int,
    pub(crate) exception: VALUE,
}

struct ProtectSlot<'a, F, T> {
    scope: Scope<'a>,
    callback: Option<F>,
    output: Option<T>,
    panic: Option<Panic>,
}

// Both fields are `Copy`, so the slot has no drop glue.
struct GuardedSlot<F, R> {
    operation: F,
    output: Option<R>,
}

struct ForeachSlot<F> {
    callback: F,
    panic: Option<Panic>,
}

#[derive(Clone, Copy)]
struct PairSink {
    push: unsafe extern "C" fn(VALUE, VALUE) -> VALUE,
    pairs: VALUE,
}

unsafe extern "C" fn protect_thunk<F, T>(data: VALUE) -> VALUE
where
    F: FnOnce(&Scope<'_>) -> T,
{
    // SAFETY: `data` is the address of the slot `protect_raw` set up for exactly these types
    let slot = unsafe { &mut *(data as *mut ProtectSlot<'_, F, T>) };
    let scope = slot.scope;
    if let Some(callback) = slot.callback.take() {
        match panic::catch_unwind(AssertUnwindSafe(|| callback(&scope))) {
            Ok(output) => slot.output = Some(output),
            Err(payload) => slot.panic = Some(payload),
        }
    }
    scope.sentinels.nil
}

unsafe extern "C" fn guarded_thunk<F, R>(data: VALUE) -> VALUE
where
    F: Fn() -> R + Copy,
    R: Copy,
{
    // SAFETY: `data` is the address of the slot `guarded` set up for exactly these types
    let slot = unsafe { &mut *(data as *mut GuardedSlot<F, R>) };
    slot.output = Some((slot.operation)());
    0
}

unsafe extern "C" fn hash_thunk<F>(key: VALUE, value: VALUE, data: VALUE) -> c_int
where
    F: FnMut(VALUE, VALUE) -> bool,
{
    // SAFETY: `data` is the address of the slot `hash_for_each` set up for `F`
    let slot = unsafe { &mut *(data as *mut ForeachSlot<F>) };
    if slot.panic.is_some() {
        return ST_STOP;
    }
    match panic::catch_unwind(AssertUnwindSafe(|| (slot.callback)(key, value))) {
        Ok(true) => ST_CONTINUE,
        Ok(false) => ST_STOP,
        Err(payload) => {
            slot.panic = Some(payload);
            ST_STOP
        }
    }
}

unsafe extern "C" fn pair_thunk(key: VALUE, value: VALUE, data: VALUE) -> c_int {
    // SAFETY: `data` is the address of the sink `hash_pairs` set up
    let sink = unsafe { *(data as *const PairSink) };
    // SAFETY: the sink's array is a live guest Array
    unsafe {
        (sink.push)(sink.pairs, key);
        (sink.push)(sink.pairs, value);
    }
    ST_CONTINUE
}

impl GuestApi {
    /// Run `callback` with guest exceptions trapped
    ///
    /// A panic inside `callback` is carried across the engine and resumed
    /// once control is back on the native side.
    ///
    /// # Errors
    /// Returns `GuestError::NotInitialized` before bring-up, or
    /// `GuestError::Fault` describing the exception the guest raised.
    pub fn protect<F, T>(&self, callback: F) -> Result<T, GuestError>
    where
        F: FnOnce(&Scope<'_>) -> T,
    {
        let sentinels = self.sentinels()?;
        self.protect_raw(sentinels, callback)
            .map_err(|raised| self.describe(sentinels, raised))
    }

    /// Run `body`, handing any guest exception it raises to `fallback`
    ///
    /// Only exceptions are rescued. Other non-local exits, and anything
    /// `fallback` raises in turn, are reported as faults.
    ///
    /// # Errors
    /// Returns `GuestError::NotInitialized` before bring-up, or
    /// `GuestError::Fault` for a fault that was not rescued.
    pub fn rescue<B, R, T>(&self, body: B, fallback: R) -> Result<T, GuestError>
    where
        B: FnOnce(&Scope<'_>) -> T,
        R: for<'s> FnOnce(&Scope<'s>, GuestRef<'s>) -> T,
    {
        let sentinels = self.sentinels()?;
        let raised = match self.protect_raw(sentinels, body) {
            Ok(output) => return Ok(output),
            Err(raised) => raised,
        };
        if !self.is_exception(sentinels, raised.exception) {
            return Err(self.describe(sentinels, raised));
        }
        let exception = raised.exception;
        debug!(tag = raised.tag, "rescuing guest exception");
        self.protect_raw(sentinels, |scope| fallback(scope, GuestRef::new(exception)))
            .map_err(|raised| self.describe(sentinels, raised))
    }

    fn protect_raw<F, T>(&self, sentinels: Sentinels, callback: F) -> Result<T, Raised>
    where
        F: FnOnce(&Scope<'_>) -> T,
    {
        let mut slot = ProtectSlot {
            scope: Scope {
                api: self,
                sentinels,
            },
            callback: Some(callback),
            output: None,
            panic: None,
        };
        let mut tag: c_int = 0;
        let s = self.symbols();
        // SAFETY: the slot outlives the call and the trampoline is instantiated for its exact type
        unsafe { (s.rb_protect)(protect_thunk::<F, T>, (&raw mut slot) as VALUE, &mut tag) };
        if let Some(payload) = slot.panic.take() {
            panic::resume_unwind(payload);
        }
        match (tag, slot.output.take()) {
            (0, Some(output)) => Ok(output),
            _ => Err(self.take_raised(sentinels, tag)),
        }
    }

    /// Run a single engine operation under its own protected call
    ///
    /// `operation` must only call engine entry points: it is `Copy` and
    /// returns a `Copy` value, so a raise inside it skips no native drops.
    pub(crate) fn guarded<F, R>(&self, sentinels: Sentinels, operation: F) -> Result<R, Raised>
    where
        F: Fn() -> R + Copy,
        R: Copy,
    {
        let mut slot = GuardedSlot {
            operation,
            output: None,
        };
        let mut tag: c_int = 0;
        let s = self.symbols();
        // SAFETY: the slot outlives the call and the trampoline is instantiated for its exact type
        unsafe { (s.rb_protect)(guarded_thunk::<F, R>, (&raw mut slot) as VALUE, &mut tag) };
        match (tag, slot.output) {
            (0, Some(output)) => Ok(output),
            _ => Err(self.take_raised(sentinels, tag)),
        }
    }

    fn take_raised(&self, sentinels: Sentinels, tag: c_int) -> Raised {
        let s = self.symbols();
        // SAFETY: the VM is live; clearing errinfo keeps the fault from resurfacing later
        let exception = unsafe {
            let exception = (s.rb_errinfo)();
            (s.rb_set_errinfo)(sentinels.nil);
            exception
        };
        Raised { tag, exception }
    }

    /// Call `method` on `receiver` under its own protected call
    pub(crate) fn call_guarded(
        &self,
        sentinels: Sentinels,
        receiver: VALUE,
        method: &CStr,
        args: &[VALUE],
    ) -> Result<VALUE, Raised> {
        let s = self.symbols();
        let (intern, funcallv) = (s.rb_intern, s.rb_funcallv);
        let name = method.as_ptr();
        // Never more than `args.len()`, so the engine reads within the slice
        let argc = c_int::try_from(args.len()).unwrap_or(c_int::MAX);
        let argv = args.as_ptr();
        // SAFETY: `name` is NUL-terminated and `argv` holds `argc` live guest objects
        self.guarded(sentinels, move || unsafe { funcallv(receiver, intern(name), argc, argv) })
    }

    /// Create a guest String from raw bytes under its own protected call
    pub(crate) fn string_guarded(&self, sentinels: Sentinels, bytes: &[u8]) -> Result<VALUE, Raised> {
        let str_new = self.symbols().rb_str_new;
        let ptr = bytes.as_ptr().cast::<c_char>();
        let len = c_long::try_from(bytes.len()).unwrap_or(c_long::MAX);
        // SAFETY: `ptr` covers at least `len` bytes; the engine copies them
        self.guarded(sentinels, move || unsafe { str_new(ptr, len) })
    }

    /// Text of `value.to_s`, every engine step protected
    pub(crate) fn text_guarded(&self, sentinels: Sentinels, value: VALUE) -> Result<String, Raised> {
        let s = self.symbols();
        let mut string = self.call_guarded(sentinels, value, c"to_s", &[])?;
        let size = self.call_guarded(sentinels, string, c"bytesize", &[])?;
        let num2ulong = s.rb_num2ulong;
        // SAFETY: converting a guest Integer
        let len = self.guarded(sentinels, move || unsafe { num2ulong(size) })?;
        let value_ptr = s.rb_string_value_ptr;
        let string_slot = &raw mut string;
        // SAFETY: `string_slot` points at a live VALUE for the duration of the call
        let ptr = self.guarded(sentinels, move || unsafe { value_ptr(string_slot) })?;
        let len = usize::try_from(len).unwrap_or(0);
        if ptr.is_null() || len == 0 {
            return Ok(String::new());
        }
        // SAFETY: `ptr` addresses the `len` bytes of the guest String, read
        // before any further guest call
        let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) };
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Check `value.is_a?(class)` under protection
    pub(crate) fn is_a_guarded(
        &self,
        sentinels: Sentinels,
        value: VALUE,
        class: GlobalRef,
    ) -> Result<bool, Raised> {
        // SAFETY: the VM is live so the engine's globals are populated
        let class = unsafe { class.get() };
        self.call_guarded(sentinels, value, c"is_a?", &[class])
            .map(|result| result == sentinels.true_)
    }

    /// Length of a guest Array through `size`
    pub(crate) fn array_len_guarded(&self, sentinels: Sentinels, array: VALUE) -> Result<c_long, Raised> {
        let size = self.call_guarded(sentinels, array, c"size", &[])?;
        let num2long = self.symbols().rb_num2long;
        // SAFETY: converting a guest Integer
        self.guarded(sentinels, move || unsafe { num2long(size) })
    }

    /// Element `index` of a guest Array
    pub(crate) fn entry_guarded(
        &self,
        sentinels: Sentinels,
        array: VALUE,
        index: c_long,
    ) -> Result<VALUE, Raised> {
        let entry = self.symbols().rb_ary_entry;
        // SAFETY: `array` is a live guest Array
        self.guarded(sentinels, move || unsafe { entry(array, index) })
    }

    /// Flatten a guest Hash into a guest Array of alternating keys and values
    ///
    /// The pairs are collected by the engine itself, so no native state is
    /// built up while the guest iterates.
    pub(crate) fn hash_pairs(&self, sentinels: Sentinels, hash: VALUE) -> Result<VALUE, Raised> {
        let s = self.symbols();
        let ary_new = s.rb_ary_new_capa;
        // SAFETY: allocating a fresh guest array
        let pairs = self.guarded(sentinels, move || unsafe { ary_new(0) })?;
        let sink = PairSink {
            push: s.rb_ary_push,
            pairs,
        };
        let data = (&raw const sink) as VALUE;
        let foreach = s.rb_hash_foreach;
        // SAFETY: `sink` outlives the iteration and `pair_thunk` reads it as a PairSink
        self.guarded(sentinels, move || unsafe { foreach(hash, pair_thunk, data) })?;
        Ok(pairs)
    }

    /// Render a guest backtrace, one frame per line
    fn backtrace_guarded(&self, sentinels: Sentinels, exception: VALUE) -> Result<String, Raised> {
        let backtrace = self.call_guarded(sentinels, exception, c"backtrace", &[])?;
        if backtrace == sentinels.nil {
            return Ok(String::new());
        }
        let separator = self.string_guarded(sentinels, b"\n")?;
        let joined = self.call_guarded(sentinels, backtrace, c"join", &[separator])?;
        self.text_guarded(sentinels, joined)
    }

    fn is_exception(&self, sentinels: Sentinels, value: VALUE) -> bool {
        value != sentinels.nil
            && self
                .is_a_guarded(sentinels, value, self.symbols().rb_eException)
                .unwrap_or(false)
    }

    /// Turn a caught fault into an error carrying the exception's details
    ///
    /// A failure while reading the details leaves that detail empty rather
    /// than describing the new fault in turn.
    pub(crate) fn describe(&self, sentinels: Sentinels, raised: Raised) -> GuestError {
        let Raised { tag, exception } = raised;
        let (class, message, backtrace) = if exception == sentinels.nil {
            (
                String::new(),
                "non-local exit from guest code".to_string(),
                String::new(),
            )
        } else {
            let detail = |method: &CStr| {
                self.call_guarded(sentinels, exception, method, &[])
                    .and_then(|value| self.text_guarded(sentinels, value))
                    .unwrap_or_default()
            };
            (
                detail(c"class"),
                detail(c"message"),
                self.backtrace_guarded(sentinels, exception)
                    .unwrap_or_default(),
            )
        };
        debug!(tag, class = %class, message = %message, "guest call faulted");
        GuestError::Fault {
            tag,
            class,
            message,
            backtrace,
        }
    }
}

impl<'a> Scope<'a> {
    /// The guest nil object
    #[must_use]
    pub fn nil(&self) -> GuestRef<'a> {
        GuestRef::new(self.sentinels.nil)
    }

    /// The guest true or false object
    #[must_use]
    pub fn boolean(&self, value: bool) -> GuestRef<'a> {
        GuestRef::new(if value {
            self.sentinels.true_
        } else {
            self.sentinels.false_
        })
    }

    /// Intern a method or constant name
    #[must_use]
    pub fn intern(&self, name: &CStr) -> ID {
        // SAFETY: the VM is live and `name` is NUL-terminated
        unsafe { (self.symbols().rb_intern)(name.as_ptr()) }
    }

    /// Read one of the engine's global class objects
    #[must_use]
    pub(crate) fn global(&self, global: GlobalRef) -> GuestRef<'a> {
        // SAFETY: the VM is live so the engine's globals are populated
        GuestRef::new(unsafe { global.get() })
    }

    /// The object retained by `handle`, for use within this call
    #[must_use]
    pub fn retained(&self, handle: &GuestHandle) -> GuestRef<'a> {
        GuestRef::new(handle.raw())
    }

    /// Call `method` on `receiver`
    pub fn call(&self, receiver: GuestRef<'a>, method: &CStr, args: &[GuestRef<'a>]) -> GuestRef<'a> {
        let Ok(argc) = c_int::try_from(args.len()) else {
            self.raise(RaiseKind::Argument, "too many arguments for a guest call")
        };
        let id = self.intern(method);
        // SAFETY: GuestRef is a transparent VALUE, so the slice is a VALUE array of `argc` items
        GuestRef::new(unsafe {
            (self.symbols().rb_funcallv)(receiver.as_raw(), id, argc, args.as_ptr().cast::<VALUE>())
        })
    }

    /// Call `method` on `receiver`, returning any fault instead of raising
    ///
    /// # Errors
    /// Returns `GuestError::Fault` for the exception the call raised.
    pub fn try_call(
        &self,
        receiver: GuestRef<'a>,
        method: &CStr,
        args: &[GuestRef<'a>],
    ) -> Result<GuestRef<'a>, GuestError> {
        let args: Vec<VALUE> = args.iter().map(|arg| arg.as_raw()).collect();
        self.api
            .call_guarded(self.sentinels, receiver.as_raw(), method, &args)
            .map(GuestRef::new)
            .map_err(|raised| self.describe(self.sentinels, raised))
    }

    /// Convert any guest object to native text through its `to_s`
    ///
    /// The byte length is taken from the guest so embedded NULs survive.
    #[must_use]
    pub fn to_string(&self, value: GuestRef<'a>) -> String {
        let mut string = self.call(value, c"to_s", &[]).as_raw();
        let size = self.call(GuestRef::new(string), c"bytesize", &[]);
        let s = self.symbols();
        // SAFETY: `string` is a guest String; the pointer covers `len` bytes
        // and is only read before any further guest call
        unsafe {
            let len = usize::try_from((s.rb_num2ulong)(size.as_raw())).unwrap_or(0);
            let ptr = (s.rb_string_value_ptr)(&mut string);
            if ptr.is_null() || len == 0 {
                return String::new();
            }
            String::from_utf8_lossy(std::slice::from_raw_parts(ptr.cast::<u8>(), len)).into_owned()
        }
    }

    /// Like [`Scope::to_string`], returning any fault instead of raising
    ///
    /// # Errors
    /// Returns `GuestError::Fault` if `to_s` or reading its result raised.
    pub fn try_to_string(&self, value: GuestRef<'a>) -> Result<String, GuestError> {
        self.api
            .text_guarded(self.sentinels, value.as_raw())
            .map_err(|raised| self.describe(self.sentinels, raised))
    }

    /// Check `value.is_a?(class)`
    #[must_use]
    pub fn is_a(&self, value: GuestRef<'a>, class: GuestRef<'a>) -> bool {
        let result = self.call(value, c"is_a?", &[class]);
        self.is_true(result)
    }

    /// Check for a guest Hash
    #[must_use]
    pub fn is_hash(&self, value: GuestRef<'a>) -> bool {
        self.is_a(value, self.global(self.symbols().rb_cHash))
    }

    /// Check for a guest Array
    #[must_use]
    pub fn is_array(&self, value: GuestRef<'a>) -> bool {
        self.is_a(value, self.global(self.symbols().rb_cArray))
    }

    /// Check for a guest String
    #[must_use]
    pub fn is_string(&self, value: GuestRef<'a>) -> bool {
        self.is_a(value, self.global(self.symbols().rb_cString))
    }

    /// Check for a guest Symbol
    #[must_use]
    pub fn is_symbol(&self, value: GuestRef<'a>) -> bool {
        self.is_a(value, self.global(self.symbols().rb_cSymbol))
    }

    /// Check for a guest Integer
    #[must_use]
    pub fn is_integer(&self, value: GuestRef<'a>) -> bool {
        self.is_a(value, self.global(self.symbols().rb_cInteger))
    }

    /// Check for a guest Float
    #[must_use]
    pub fn is_float(&self, value: GuestRef<'a>) -> bool {
        self.is_a(value, self.global(self.symbols().rb_cFloat))
    }

    /// Compare two guest objects with `eql?`
    #[must_use]
    pub fn equals(&self, first: GuestRef<'a>, second: GuestRef<'a>) -> bool {
        let result = self.call(first, c"eql?", &[second]);
        self.is_true(result)
    }

    /// Resolve a constant chain from the root namespace
    ///
    /// # Errors
    /// Returns `GuestError::Lookup` when a segment is undefined (the guest
    /// raised `NameError`), or `GuestError::Fault` for any other exception.
    pub fn lookup(&self, names: &[&str]) -> Result<GuestRef<'a>, GuestError> {
        let s = self.symbols();
        let (intern, const_get) = (s.rb_intern, s.rb_const_get);
        let mut current = self.global(s.rb_cObject).as_raw();
        for name in names {
            let name = CString::new(*name).map_err(|_| GuestError::Lookup {
                name: names.join("::"),
                message: "constant name contains a nul byte".to_string(),
            })?;
            let (module, ptr) = (current, name.as_ptr());
            // SAFETY: `module` is a live module and `ptr` a NUL-terminated name
            current = self
                .api
                .guarded(self.sentinels, move || unsafe { const_get(module, intern(ptr)) })
                .map_err(|raised| match self.describe(self.sentinels, raised) {
                    GuestError::Fault { class, message, .. } if class == "NameError" => {
                        GuestError::Lookup {
                            name: names.join("::"),
                            message,
                        }
                    }
                    other => other,
                })?;
        }
        Ok(GuestRef::new(current))
    }

    /// Render an exception's backtrace, one frame per line
    #[must_use]
    pub fn exception_backtrace(&self, exception: GuestRef<'a>) -> String {
        let backtrace = self.call(exception, c"backtrace", &[]);
        if self.is_nil(backtrace) {
            return String::new();
        }
        let separator = self.string("\n");
        let joined = self.call(backtrace, c"join", &[separator]);
        self.to_string(joined)
    }

    /// Visit the elements of a guest array until `callback` returns false
    pub fn array_for_each<F>(&self, array: GuestRef<'a>, mut callback: F)
    where
        F: FnMut(GuestRef<'a>) -> bool,
    {
        let size = self.call(array, c"size", &[]);
        let s = self.symbols();
        // SAFETY: `size` is the guest Integer returned by Array#size
        let len = unsafe { (s.rb_num2long)(size.as_raw()) };
        for index in 0..len {
            // SAFETY: `index` is in bounds for `array`
            let element = unsafe { (s.rb_ary_entry)(array.as_raw(), index) };
            if !callback(GuestRef::new(element)) {
                break;
            }
        }
    }

    /// Visit the entries of a guest hash until `callback` returns false
    ///
    /// The guest drives the iteration and calls back once per entry.
    pub fn hash_for_each<F>(&self, hash: GuestRef<'a>, mut callback: F)
    where
        F: FnMut(GuestRef<'a>, GuestRef<'a>) -> bool,
    {
        let mut slot = ForeachSlot {
            callback: |key: VALUE, value: VALUE| callback(GuestRef::new(key), GuestRef::new(value)),
            panic: None,
        };
        let data = (&raw mut slot) as VALUE;
        // SAFETY: the slot outlives the iteration and the trampoline is instantiated for its type
        unsafe { (self.symbols().rb_hash_foreach)(hash.as_raw(), hash_thunk_for(&slot), data) };
        if let Some(payload) = slot.panic.take() {
            panic::resume_unwind(payload);
        }
    }

    /// Look `key` up in a guest hash, nil when absent
    ///
    /// # Errors
    /// Returns `GuestError::Fault` if hashing or comparing the key raised.
    pub fn hash_lookup(&self, hash: GuestRef<'a>, key: GuestRef<'a>) -> Result<GuestRef<'a>, GuestError> {
        let hash_lookup = self.symbols().rb_hash_lookup;
        let (hash, key) = (hash.as_raw(), key.as_raw());
        // SAFETY: both are live guest objects
        self.api
            .guarded(self.sentinels, move || unsafe { hash_lookup(hash, key) })
            .map(GuestRef::new)
            .map_err(|raised| self.describe(self.sentinels, raised))
    }

    /// The guest `$LOAD_PATH`, without the current directory entry
    ///
    /// # Errors
    /// Returns `GuestError::Fault` if reading an entry raised.
    pub fn load_path(&self) -> Result<Vec<String>, GuestError> {
        let sentinels = self.sentinels;
        let gv_get = self.symbols().rb_gv_get;
        let read = || -> Result<Vec<String>, Raised> {
            let name = c"$LOAD_PATH".as_ptr();
            // SAFETY: reading a global variable by NUL-terminated name
            let load_path = self.api.guarded(sentinels, move || unsafe { gv_get(name) })?;
            let len = self.api.array_len_guarded(sentinels, load_path)?;
            let mut directories = Vec::new();
            for index in 0..len {
                let entry = self.api.entry_guarded(sentinels, load_path, index)?;
                let path = self.api.text_guarded(sentinels, entry)?;
                if path != "." {
                    directories.push(path);
                }
            }
            Ok(directories)
        };
        read().map_err(|raised| self.describe(sentinels, raised))
    }

    /// Raise a guest exception of the given kind
    ///
    /// Control returns to the enclosing protected call.
    pub fn raise(&self, kind: RaiseKind, message: &str) -> ! {
        let s = self.symbols();
        let class = match kind {
            RaiseKind::Argument => s.rb_eArgError,
            RaiseKind::Type => s.rb_eTypeError,
            RaiseKind::Standard => s.rb_eStandardError,
            RaiseKind::Runtime => s.rb_eRuntimeError,
        };
        let class = self.global(class);
        // Copy into a guest string first so nothing native is left to drop after the jump
        let mut text = self.string(message).as_raw();
        // SAFETY: `text` is a guest String and the format consumes exactly one C string
        unsafe {
            let ptr = (s.rb_string_value_ptr)(&mut text);
            (s.rb_raise)(class.as_raw(), c"%s".as_ptr(), ptr)
        }
    }
}

/// The trampoline instantiated for the slot's callback type
fn hash_thunk_for<F>(_slot: &ForeachSlot<F>) -> unsafe extern "C" fn(VALUE, VALUE, VALUE) -> c_int
where
    F: FnMut(VALUE, VALUE) -> bool,
{
    hash_thunk::<F>
}

impl GuestApi {
    /// The guest `$LOAD_PATH`, without the current directory entry
    ///
    /// # Errors
    /// Returns `GuestError::NotInitialized` before bring-up, or the fault
    /// raised while reading an entry.
    pub fn load_path(&self) -> Result<Vec<String>, GuestError> {
        self.protect(|scope| scope.load_path())?
    }
}
