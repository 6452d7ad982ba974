//! Native entry points of the guest engine
//!
//! The table below is the compatibility contract with the engine's C ABI.
//! Each entry is bound by name (falling back to older aliases) when the
//! library is loaded; a missing required entry fails the whole bind.

#![allow(non_snake_case, non_camel_case_types)]

use std::ffi::{c_char, c_double, c_int, c_long, c_ulong, c_void};
use std::ptr::NonNull;

use crate::error::GuestError;

/// A guest object reference (`VALUE`)
pub type VALUE = usize;
/// An interned guest symbol (`ID`)
pub type ID = usize;
/// Signed counterpart of [`VALUE`]
pub type SIGNED_VALUE = isize;

/// Method body registered with the engine; the real arity depends on the registration
pub type MethodFn = unsafe extern "C" fn() -> VALUE;
/// Callback invoked by `rb_protect`
pub type CallbackFn = unsafe extern "C" fn(VALUE) -> VALUE;
/// Rescue clause of `rb_rescue2`, receives the exception
pub type RescueFn = unsafe extern "C" fn(VALUE, VALUE) -> VALUE;
/// Per-entry callback of `rb_hash_foreach`
pub type HashForeachFn = unsafe extern "C" fn(VALUE, VALUE, VALUE) -> c_int;
/// Block body used by `rb_proc_new`
pub type BlockFn = unsafe extern "C" fn(VALUE, VALUE, c_int, *const VALUE, VALUE) -> VALUE;
/// Allocator registered with `rb_define_alloc_func`
pub type AllocFn = unsafe extern "C" fn(VALUE) -> VALUE;
/// Mark / free callback of wrapped native data
pub type DataFn = unsafe extern "C" fn(*mut c_void);

/// `rb_hash_foreach` callback result: keep going
pub const ST_CONTINUE: c_int = 0;
/// `rb_hash_foreach` callback result: stop
pub const ST_STOP: c_int = 1;

/// Address of a `VALUE` variable exported by the engine (`rb_cObject` and friends)
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct GlobalRef(*const VALUE);

// SAFETY: the engine's global class and exception slots are written once during VM
// bring-up and only read afterwards; access to the engine is serialized by callers.
unsafe impl Send for GlobalRef {}
// SAFETY: see above.
unsafe impl Sync for GlobalRef {}

impl GlobalRef {
    /// Read the current value of the global
    ///
    /// # Safety
    /// The engine VM must be initialized.
    #[must_use]
    pub unsafe fn get(self) -> VALUE {
        // SAFETY: the address was exported by the engine for a VALUE variable
        unsafe { *self.0 }
    }
}

/// A platform-neutral source of symbol addresses
pub trait SymbolSource: Send + Sync {
    /// Look up the address of an exported symbol
    fn find(&self, name: &str) -> Option<NonNull<c_void>>;
}

/// Description of one table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolSpec {
    /// Preferred symbol name
    pub name: &'static str,
    /// Older names tried when the preferred one is absent
    pub aliases: &'static [&'static str],
    /// Whether binding fails without this symbol
    pub required: bool,
}

fn find_symbol(
    source: &dyn SymbolSource,
    name: &'static str,
    aliases: &'static [&'static str],
) -> Option<NonNull<c_void>> {
    std::iter::once(name)
        .chain(aliases.iter().copied())
        .find_map(|n| source.find(n))
}

macro_rules! guest_abi {
    (@field required $ty:ty) => { $ty };
    (@field optional $ty:ty) => { Option<$ty> };
    (@required required) => { true };
    (@required optional) => { false };
    (@bind required $source:ident, $name:expr, $aliases:expr, $ty:ty) => {{
        let ptr = find_symbol($source, $name, $aliases)
            .ok_or(GuestError::MissingSymbol { symbol: $name })?;
        // SAFETY: the table declares the exported type of this symbol
        unsafe { std::mem::transmute::<*mut c_void, $ty>(ptr.as_ptr()) }
    }};
    (@bind optional $source:ident, $name:expr, $aliases:expr, $ty:ty) => {
        find_symbol($source, $name, $aliases)
            // SAFETY: the table declares the exported type of this symbol
            .map(|ptr| unsafe { std::mem::transmute::<*mut c_void, $ty>(ptr.as_ptr()) })
    };
    ($( $kind:ident $name:ident $(| $alias:ident)* : $ty:ty; )*) => {
        /// Bound entry points of the guest engine
        ///
        /// Calling any of these is `unsafe`: arguments must be valid guest
        /// objects and the VM must be running. Entries the bridge does not call
        /// yet are still bound so the whole contract is checked at load time.
        #[allow(dead_code)]
        pub(crate) struct Symbols {
            $( pub(crate) $name: guest_abi!(@field $kind $ty), )*
        }

        /// Every entry of the symbol table
        pub const SYMBOLS: &[SymbolSpec] = &[
            $( SymbolSpec {
                name: stringify!($name),
                aliases: &[$(stringify!($alias)),*],
                required: guest_abi!(@required $kind),
            }, )*
        ];

        impl Symbols {
            /// Resolve the table against a symbol source
            pub(crate) fn bind(source: &dyn SymbolSource) -> Result<Self, GuestError> {
                Ok(Self {
                    $( $name: guest_abi!(
                        @bind $kind source, stringify!($name), &[$(stringify!($alias)),*], $ty
                    ), )*
                })
            }
        }
    };
}

guest_abi! {
    required rb_intern: unsafe extern "C" fn(*const c_char) -> ID;
    required rb_const_get: unsafe extern "C" fn(VALUE, ID) -> VALUE;
    required rb_const_set: unsafe extern "C" fn(VALUE, ID, VALUE);
    required rb_const_remove: unsafe extern "C" fn(VALUE, ID) -> VALUE;
    required rb_const_defined: unsafe extern "C" fn(VALUE, ID) -> c_int;
    required rb_define_module: unsafe extern "C" fn(*const c_char) -> VALUE;
    required rb_define_module_under: unsafe extern "C" fn(VALUE, *const c_char) -> VALUE;
    required rb_define_class_under: unsafe extern "C" fn(VALUE, *const c_char, VALUE) -> VALUE;
    required rb_define_method: unsafe extern "C" fn(VALUE, *const c_char, MethodFn, c_int);
    required rb_define_singleton_method: unsafe extern "C" fn(VALUE, *const c_char, MethodFn, c_int);
    required rb_class_new_instance: unsafe extern "C" fn(c_int, *const VALUE, VALUE) -> VALUE;
    required rb_gv_get: unsafe extern "C" fn(*const c_char) -> VALUE;
    required rb_funcall: unsafe extern "C" fn(VALUE, ID, c_int, ...) -> VALUE;
    required rb_funcallv | rb_funcall2: unsafe extern "C" fn(VALUE, ID, c_int, *const VALUE) -> VALUE;
    required rb_proc_new: unsafe extern "C" fn(BlockFn, VALUE) -> VALUE;
    required rb_funcall_with_block: unsafe extern "C" fn(VALUE, ID, c_int, *const VALUE, VALUE) -> VALUE;
    required rb_funcall_passing_block: unsafe extern "C" fn(VALUE, ID, c_int, *const VALUE) -> VALUE;
    required rb_num2ulong: unsafe extern "C" fn(VALUE) -> c_ulong;
    required rb_num2long: unsafe extern "C" fn(VALUE) -> c_long;
    required rb_num2dbl: unsafe extern "C" fn(VALUE) -> c_double;
    required rb_string_value_ptr: unsafe extern "C" fn(*mut VALUE) -> *const c_char;
    required rb_rescue2: unsafe extern "C" fn(CallbackFn, VALUE, RescueFn, VALUE, ...) -> VALUE;
    required rb_protect: unsafe extern "C" fn(CallbackFn, VALUE, *mut c_int) -> VALUE;
    required rb_jump_tag: unsafe extern "C" fn(c_int) -> !;
    required rb_errinfo: unsafe extern "C" fn() -> VALUE;
    required rb_set_errinfo: unsafe extern "C" fn(VALUE);
    required rb_int2inum: unsafe extern "C" fn(SIGNED_VALUE) -> VALUE;
    required rb_str_new_cstr | rb_str_new2: unsafe extern "C" fn(*const c_char) -> VALUE;
    required rb_str_new: unsafe extern "C" fn(*const c_char, c_long) -> VALUE;
    required rb_load: unsafe extern "C" fn(VALUE, c_int);
    required rb_raise: unsafe extern "C" fn(VALUE, *const c_char, ...) -> !;
    required rb_block_proc: unsafe extern "C" fn() -> VALUE;
    required rb_block_given_p: unsafe extern "C" fn() -> c_int;
    required rb_gc_register_address: unsafe extern "C" fn(*mut VALUE);
    required rb_gc_unregister_address: unsafe extern "C" fn(*mut VALUE);
    required rb_hash_foreach: unsafe extern "C" fn(VALUE, HashForeachFn, VALUE);
    required rb_define_attr: unsafe extern "C" fn(VALUE, *const c_char, c_int, c_int);
    required rb_ivar_set: unsafe extern "C" fn(VALUE, ID, VALUE) -> VALUE;
    required rb_ivar_get: unsafe extern "C" fn(VALUE, ID) -> VALUE;
    required rb_float_new_in_heap | rb_float_new: unsafe extern "C" fn(c_double) -> VALUE;
    required rb_ary_new_capa | rb_ary_new2: unsafe extern "C" fn(c_long) -> VALUE;
    required rb_ary_push: unsafe extern "C" fn(VALUE, VALUE) -> VALUE;
    required rb_ary_entry: unsafe extern "C" fn(VALUE, c_long) -> VALUE;
    required rb_hash_new: unsafe extern "C" fn() -> VALUE;
    required rb_hash_aset: unsafe extern "C" fn(VALUE, VALUE, VALUE) -> VALUE;
    required rb_hash_lookup: unsafe extern "C" fn(VALUE, VALUE) -> VALUE;
    required rb_obj_freeze: unsafe extern "C" fn(VALUE) -> VALUE;
    required rb_sym_to_s: unsafe extern "C" fn(VALUE) -> VALUE;
    required rb_to_id: unsafe extern "C" fn(VALUE) -> ID;
    required rb_id2name: unsafe extern "C" fn(ID) -> *const c_char;
    required rb_define_alloc_func: unsafe extern "C" fn(VALUE, AllocFn);
    required rb_data_object_wrap | rb_data_object_alloc: unsafe extern "C" fn(VALUE, *mut c_void, Option<DataFn>, Option<DataFn>) -> VALUE;
    required rb_gc_mark: unsafe extern "C" fn(VALUE);
    required rb_yield_values: unsafe extern "C" fn(c_int, ...) -> VALUE;

    required rb_cObject: GlobalRef;
    required rb_cArray: GlobalRef;
    required rb_cHash: GlobalRef;
    required rb_cString: GlobalRef;
    required rb_cSymbol: GlobalRef;
    required rb_cInteger | rb_cFixnum: GlobalRef;
    required rb_cFloat: GlobalRef;
    required rb_eException: GlobalRef;
    required rb_eArgError: GlobalRef;
    required rb_eTypeError: GlobalRef;
    required rb_eStandardError: GlobalRef;
    required rb_eRuntimeError: GlobalRef;

    optional ruby_setup: unsafe extern "C" fn() -> c_int;
    required ruby_init: unsafe extern "C" fn();
    required ruby_options: unsafe extern "C" fn(c_int, *mut *mut c_char) -> *mut c_void;
    required ruby_cleanup: unsafe extern "C" fn(c_int) -> c_int;
}
