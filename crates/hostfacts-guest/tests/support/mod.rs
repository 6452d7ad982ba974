//! In-process mock of the guest engine ABI
//!
//! Objects live in a per-thread heap, so every test thread gets a fresh
//! engine. Raising is modeled with a pending-exception flag that the mock
//! `rb_protect` turns into a non-zero tag.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, c_char, c_double, c_int, c_long, c_ulong, c_void};
use std::ptr::NonNull;

use hostfacts_guest::raw::{CallbackFn, HashForeachFn, ID, ST_STOP, SYMBOLS, VALUE};
use hostfacts_guest::{GuestApi, GuestError, SymbolSource};

pub const NIL: VALUE = 0x08;
pub const TRUE: VALUE = 0x14;
pub const FALSE: VALUE = 0x00;

const OBJECT: VALUE = 0x100;
const ARRAY: VALUE = 0x108;
const HASH: VALUE = 0x110;
const STRING: VALUE = 0x118;
const SYMBOL: VALUE = 0x120;
const INTEGER: VALUE = 0x128;
const FLOAT: VALUE = 0x130;
const EXCEPTION: VALUE = 0x138;
const ARG_ERROR: VALUE = 0x140;
const TYPE_ERROR: VALUE = 0x148;
const STANDARD_ERROR: VALUE = 0x150;
const RUNTIME_ERROR: VALUE = 0x158;
const NAME_ERROR: VALUE = 0x160;
const NO_METHOD_ERROR: VALUE = 0x168;
const RBCONFIG: VALUE = 0x170;
const NIL_CLASS: VALUE = 0x178;
const TRUE_CLASS: VALUE = 0x180;
const FALSE_CLASS: VALUE = 0x188;

const HEAP_BASE: VALUE = 0x10000;

/// Tag reported for a raised exception
pub const TAG_RAISE: c_int = 6;

static C_OBJECT: VALUE = OBJECT;
static C_ARRAY: VALUE = ARRAY;
static C_HASH: VALUE = HASH;
static C_STRING: VALUE = STRING;
static C_SYMBOL: VALUE = SYMBOL;
static C_INTEGER: VALUE = INTEGER;
static C_FLOAT: VALUE = FLOAT;
static E_EXCEPTION: VALUE = EXCEPTION;
static E_ARG_ERROR: VALUE = ARG_ERROR;
static E_TYPE_ERROR: VALUE = TYPE_ERROR;
static E_STANDARD_ERROR: VALUE = STANDARD_ERROR;
static E_RUNTIME_ERROR: VALUE = RUNTIME_ERROR;

#[derive(Debug, Clone)]
enum Object {
    Str(Vec<u8>),
    Int(i64),
    Float(f64),
    Array(Vec<VALUE>),
    Hash(Vec<(VALUE, VALUE)>),
    Symbol(String),
    Exception { class: VALUE, message: VALUE },
    /// An object whose `to_s` raises
    Broken,
}

/// Counters of lifecycle calls made by the bridge
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Calls {
    pub setup: usize,
    pub init: usize,
    pub options: usize,
    pub cleanup: usize,
}

struct State {
    heap: Vec<Object>,
    ids: Vec<String>,
    errinfo: VALUE,
    pending: Option<VALUE>,
    roots: Vec<usize>,
    calls: Calls,
    config: Option<VALUE>,
    undefined: Vec<String>,
}

impl State {
    fn new() -> Self {
        Self {
            heap: Vec::new(),
            ids: Vec::new(),
            errinfo: NIL,
            pending: None,
            roots: Vec::new(),
            calls: Calls::default(),
            config: None,
            undefined: Vec::new(),
        }
    }
}

thread_local! {
    static STATE: RefCell<State> = RefCell::new(State::new());
}

fn with<R>(f: impl FnOnce(&mut State) -> R) -> R {
    STATE.with(|state| f(&mut state.borrow_mut()))
}

fn alloc(object: Object) -> VALUE {
    with(|s| {
        s.heap.push(object);
        HEAP_BASE + (s.heap.len() - 1) * 8
    })
}

fn object(value: VALUE) -> Option<Object> {
    if value < HEAP_BASE {
        return None;
    }
    with(|s| s.heap.get((value - HEAP_BASE) / 8).cloned())
}

fn string(text: &str) -> VALUE {
    alloc(Object::Str(text.as_bytes().to_vec()))
}

fn integer(n: i64) -> VALUE {
    alloc(Object::Int(n))
}

fn boolean(b: bool) -> VALUE {
    if b { TRUE } else { FALSE }
}

fn text(value: VALUE) -> String {
    match object(value) {
        Some(Object::Str(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
        _ => String::new(),
    }
}

fn name_of(id: ID) -> String {
    with(|s| s.ids.get(id.wrapping_sub(1)).cloned().unwrap_or_default())
}

fn raise(class: VALUE, message: &str) -> VALUE {
    let message = string(message);
    let exception = alloc(Object::Exception { class, message });
    with(|s| {
        if s.pending.is_none() {
            s.pending = Some(exception);
        }
    });
    NIL
}

fn class_name(class: VALUE) -> Option<&'static str> {
    Some(match class {
        OBJECT => "Object",
        ARRAY => "Array",
        HASH => "Hash",
        STRING => "String",
        SYMBOL => "Symbol",
        INTEGER => "Integer",
        FLOAT => "Float",
        EXCEPTION => "Exception",
        ARG_ERROR => "ArgumentError",
        TYPE_ERROR => "TypeError",
        STANDARD_ERROR => "StandardError",
        RUNTIME_ERROR => "RuntimeError",
        NAME_ERROR => "NameError",
        NO_METHOD_ERROR => "NoMethodError",
        RBCONFIG => "RbConfig",
        NIL_CLASS => "NilClass",
        TRUE_CLASS => "TrueClass",
        FALSE_CLASS => "FalseClass",
        _ => return None,
    })
}

fn class_of(value: VALUE) -> VALUE {
    match value {
        NIL => NIL_CLASS,
        TRUE => TRUE_CLASS,
        FALSE => FALSE_CLASS,
        v if class_name(v).is_some() => OBJECT,
        v => match object(v) {
            Some(Object::Str(_)) => STRING,
            Some(Object::Int(_)) => INTEGER,
            Some(Object::Float(_)) => FLOAT,
            Some(Object::Array(_)) => ARRAY,
            Some(Object::Hash(_)) => HASH,
            Some(Object::Symbol(_)) => SYMBOL,
            Some(Object::Exception { class, .. }) => class,
            Some(Object::Broken) | None => OBJECT,
        },
    }
}

fn is_a(value: VALUE, class: VALUE) -> bool {
    let own = class_of(value);
    own == class
        || class == OBJECT
        || (matches!(object(value), Some(Object::Exception { .. }))
            && (class == EXCEPTION || class == STANDARD_ERROR))
}

fn eql(first: VALUE, second: VALUE) -> bool {
    match (object(first), object(second)) {
        (Some(Object::Str(a)), Some(Object::Str(b))) => a == b,
        (Some(Object::Int(a)), Some(Object::Int(b))) => a == b,
        _ => first == second,
    }
}

fn to_s(value: VALUE) -> VALUE {
    if let Some(name) = class_name(value) {
        return string(name);
    }
    match value {
        NIL => return string(""),
        TRUE => return string("true"),
        FALSE => return string("false"),
        _ => {}
    }
    match object(value) {
        Some(Object::Str(_)) => value,
        Some(Object::Int(n)) => string(&n.to_string()),
        Some(Object::Float(f)) => string(&f.to_string()),
        Some(Object::Symbol(name)) => string(&name),
        Some(Object::Exception { message, .. }) => message,
        Some(Object::Array(_)) => string("[...]"),
        Some(Object::Hash(_)) => string("{...}"),
        Some(Object::Broken) => raise(RUNTIME_ERROR, "cannot render"),
        None => string("#<Object>"),
    }
}

fn length(value: VALUE) -> Option<usize> {
    match object(value)? {
        Object::Str(bytes) => Some(bytes.len()),
        Object::Array(items) => Some(items.len()),
        Object::Hash(entries) => Some(entries.len()),
        _ => None,
    }
}

fn sitelib_config() -> VALUE {
    if let Some(config) = with(|s| s.config) {
        return config;
    }
    let key = string("sitelibdir");
    let value = string("/usr/lib/ruby/site_ruby/3.3.0");
    let config = alloc(Object::Hash(vec![(key, value)]));
    with(|s| s.config = Some(config));
    config
}

// Entry points

extern "C" fn rb_intern(name: *const c_char) -> ID {
    // SAFETY: the bridge passes NUL-terminated names
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    with(|s| match s.ids.iter().position(|n| *n == name) {
        Some(index) => index + 1,
        None => {
            s.ids.push(name);
            s.ids.len()
        }
    })
}

extern "C" fn rb_const_get(module: VALUE, id: ID) -> VALUE {
    let name = name_of(id);
    if with(|s| s.undefined.contains(&name)) {
        return raise(NAME_ERROR, &format!("uninitialized constant {name}"));
    }
    match (module, name.as_str()) {
        (OBJECT, "RUBY_VERSION") => string("3.3.0"),
        (OBJECT, "RUBY_PLATFORM") => string("x86_64-linux"),
        (OBJECT, "RbConfig") => RBCONFIG,
        (RBCONFIG, "CONFIG") => sitelib_config(),
        (OBJECT, "Broken") => alloc(Object::Broken),
        (module, _) if class_name(module).is_none() => {
            let shown = text(to_s(module));
            raise(TYPE_ERROR, &format!("{shown} is not a class/module"))
        }
        _ => raise(NAME_ERROR, &format!("uninitialized constant {name}")),
    }
}

extern "C" fn rb_funcallv(receiver: VALUE, id: ID, argc: c_int, argv: *const VALUE) -> VALUE {
    let args: Vec<VALUE> = match usize::try_from(argc) {
        Ok(len) if len > 0 && !argv.is_null() => {
            // SAFETY: the bridge passes `argc` values
            unsafe { std::slice::from_raw_parts(argv, len) }.to_vec()
        }
        _ => Vec::new(),
    };
    let method = name_of(id);
    let arg = |index: usize| args.get(index).copied().unwrap_or(NIL);

    match method.as_str() {
        "nil?" => boolean(receiver == NIL),
        "to_s" => to_s(receiver),
        "bytesize" | "size" => match length(receiver) {
            Some(len) => integer(len as i64),
            None => raise(NO_METHOD_ERROR, &format!("undefined method `{method}'")),
        },
        "is_a?" => boolean(is_a(receiver, arg(0))),
        "eql?" => boolean(eql(receiver, arg(0))),
        "class" => class_of(receiver),
        "message" => match object(receiver) {
            Some(Object::Exception { message, .. }) => message,
            _ => raise(NO_METHOD_ERROR, "undefined method `message'"),
        },
        "backtrace" => match object(receiver) {
            Some(Object::Exception { .. }) => {
                let frames = vec![string("mock.rb:1:in `fail'"), string("mock.rb:5:in `<main>'")];
                alloc(Object::Array(frames))
            }
            _ => NIL,
        },
        "join" => match object(receiver) {
            Some(Object::Array(items)) => {
                let separator = text(arg(0));
                let parts: Vec<String> = items.iter().map(|item| text(to_s(*item))).collect();
                string(&parts.join(&separator))
            }
            _ => raise(NO_METHOD_ERROR, "undefined method `join'"),
        },
        "fail" => raise(RUNTIME_ERROR, "boom"),
        _ => raise(NO_METHOD_ERROR, &format!("undefined method `{method}'")),
    }
}

extern "C" fn rb_num2ulong(value: VALUE) -> c_ulong {
    match object(value) {
        Some(Object::Int(n)) => n as c_ulong,
        _ => 0,
    }
}

extern "C" fn rb_num2long(value: VALUE) -> c_long {
    match object(value) {
        Some(Object::Int(n)) => n as c_long,
        _ => 0,
    }
}

extern "C" fn rb_num2dbl(value: VALUE) -> c_double {
    match object(value) {
        Some(Object::Float(f)) => f,
        Some(Object::Int(n)) => n as f64,
        _ => 0.0,
    }
}

extern "C" fn rb_string_value_ptr(value: *mut VALUE) -> *const c_char {
    // SAFETY: the bridge passes the address of a live VALUE
    let value = unsafe { *value };
    if value < HEAP_BASE {
        return std::ptr::null();
    }
    with(|s| match s.heap.get((value - HEAP_BASE) / 8) {
        Some(Object::Str(bytes)) => bytes.as_ptr().cast::<c_char>(),
        _ => std::ptr::null(),
    })
}

extern "C" fn rb_protect(callback: CallbackFn, data: VALUE, state: *mut c_int) -> VALUE {
    let outer = with(|s| s.pending.take());
    // SAFETY: the bridge hands over one of its trampolines with its own slot
    let result = unsafe { callback(data) };
    let raised = with(|s| {
        let raised = s.pending.take();
        s.pending = outer;
        if let Some(exception) = raised {
            s.errinfo = exception;
        }
        raised
    });
    // SAFETY: the bridge passes a valid out-pointer
    unsafe { *state = if raised.is_some() { TAG_RAISE } else { 0 } };
    if raised.is_some() { NIL } else { result }
}

extern "C" fn rb_errinfo() -> VALUE {
    with(|s| s.errinfo)
}

extern "C" fn rb_set_errinfo(value: VALUE) {
    with(|s| s.errinfo = value);
}

extern "C" fn rb_int2inum(n: isize) -> VALUE {
    integer(n as i64)
}

extern "C" fn rb_str_new_cstr(ptr: *const c_char) -> VALUE {
    // SAFETY: the bridge passes NUL-terminated text
    let bytes = unsafe { CStr::from_ptr(ptr) }.to_bytes().to_vec();
    alloc(Object::Str(bytes))
}

extern "C" fn rb_str_new(ptr: *const c_char, len: c_long) -> VALUE {
    let len = usize::try_from(len).unwrap_or(0);
    // SAFETY: the bridge passes a pointer covering `len` bytes
    let bytes = unsafe { std::slice::from_raw_parts(ptr.cast::<u8>(), len) }.to_vec();
    alloc(Object::Str(bytes))
}

extern "C" fn rb_float_new_in_heap(f: c_double) -> VALUE {
    alloc(Object::Float(f))
}

extern "C" fn rb_ary_new_capa(capacity: c_long) -> VALUE {
    alloc(Object::Array(Vec::with_capacity(usize::try_from(capacity).unwrap_or(0))))
}

extern "C" fn rb_ary_push(array: VALUE, element: VALUE) -> VALUE {
    with(|s| {
        if let Some(Object::Array(items)) = s.heap.get_mut(array.wrapping_sub(HEAP_BASE) / 8) {
            items.push(element);
        }
    });
    array
}

extern "C" fn rb_ary_entry(array: VALUE, index: c_long) -> VALUE {
    match object(array) {
        Some(Object::Array(items)) => usize::try_from(index)
            .ok()
            .and_then(|i| items.get(i).copied())
            .unwrap_or(NIL),
        _ => NIL,
    }
}

extern "C" fn rb_hash_new() -> VALUE {
    alloc(Object::Hash(Vec::new()))
}

extern "C" fn rb_hash_aset(hash: VALUE, key: VALUE, value: VALUE) -> VALUE {
    let existing = match object(hash) {
        Some(Object::Hash(entries)) => entries.iter().position(|(k, _)| eql(*k, key)),
        _ => return value,
    };
    with(|s| {
        if let Some(Object::Hash(entries)) = s.heap.get_mut((hash - HEAP_BASE) / 8) {
            match existing {
                Some(index) => entries[index].1 = value,
                None => entries.push((key, value)),
            }
        }
    });
    value
}

extern "C" fn rb_hash_lookup(hash: VALUE, key: VALUE) -> VALUE {
    match object(hash) {
        Some(Object::Hash(entries)) => entries
            .iter()
            .find(|(k, _)| eql(*k, key))
            .map_or(NIL, |(_, v)| *v),
        _ => NIL,
    }
}

extern "C" fn rb_hash_foreach(hash: VALUE, callback: HashForeachFn, arg: VALUE) {
    let Some(Object::Hash(entries)) = object(hash) else {
        return;
    };
    for (key, value) in entries {
        // SAFETY: the bridge hands over its trampoline with its own slot
        if unsafe { callback(key, value, arg) } == ST_STOP {
            break;
        }
    }
}

extern "C" fn rb_gv_get(name: *const c_char) -> VALUE {
    // SAFETY: the bridge passes NUL-terminated names
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    if name == "$LOAD_PATH" {
        let entries = vec![
            string("/usr/lib/ruby/3.3.0"),
            string("."),
            string("/usr/lib/ruby/site_ruby"),
        ];
        alloc(Object::Array(entries))
    } else {
        NIL
    }
}

extern "C" fn rb_ivar_get(_object: VALUE, _id: ID) -> VALUE {
    NIL
}

extern "C" fn rb_sym_to_s(value: VALUE) -> VALUE {
    match object(value) {
        Some(Object::Symbol(name)) => string(&name),
        _ => NIL,
    }
}

extern "C" fn rb_gc_register_address(address: *mut VALUE) {
    with(|s| s.roots.push(address as usize));
}

extern "C" fn rb_gc_unregister_address(address: *mut VALUE) {
    with(|s| s.roots.retain(|root| *root != address as usize));
}

extern "C" fn ruby_setup() -> c_int {
    with(|s| s.calls.setup += 1);
    0
}

extern "C" fn ruby_init() {
    with(|s| s.calls.init += 1);
}

extern "C" fn ruby_options(_argc: c_int, _argv: *mut *mut c_char) -> *mut c_void {
    with(|s| s.calls.options += 1);
    std::ptr::null_mut()
}

extern "C" fn ruby_cleanup(_status: c_int) -> c_int {
    with(|s| s.calls.cleanup += 1);
    0
}

extern "C" fn unsupported() {
    std::process::abort();
}

fn implemented() -> HashMap<&'static str, usize> {
    let functions: Vec<(&'static str, *const ())> = vec![
        ("rb_intern", rb_intern as *const ()),
        ("rb_const_get", rb_const_get as *const ()),
        ("rb_funcallv", rb_funcallv as *const ()),
        ("rb_num2ulong", rb_num2ulong as *const ()),
        ("rb_num2long", rb_num2long as *const ()),
        ("rb_num2dbl", rb_num2dbl as *const ()),
        ("rb_string_value_ptr", rb_string_value_ptr as *const ()),
        ("rb_protect", rb_protect as *const ()),
        ("rb_errinfo", rb_errinfo as *const ()),
        ("rb_set_errinfo", rb_set_errinfo as *const ()),
        ("rb_int2inum", rb_int2inum as *const ()),
        ("rb_str_new_cstr", rb_str_new_cstr as *const ()),
        ("rb_str_new", rb_str_new as *const ()),
        ("rb_float_new_in_heap", rb_float_new_in_heap as *const ()),
        ("rb_ary_new_capa", rb_ary_new_capa as *const ()),
        ("rb_ary_push", rb_ary_push as *const ()),
        ("rb_ary_entry", rb_ary_entry as *const ()),
        ("rb_hash_new", rb_hash_new as *const ()),
        ("rb_hash_aset", rb_hash_aset as *const ()),
        ("rb_hash_lookup", rb_hash_lookup as *const ()),
        ("rb_hash_foreach", rb_hash_foreach as *const ()),
        ("rb_gv_get", rb_gv_get as *const ()),
        ("rb_ivar_get", rb_ivar_get as *const ()),
        ("rb_sym_to_s", rb_sym_to_s as *const ()),
        ("rb_gc_register_address", rb_gc_register_address as *const ()),
        ("rb_gc_unregister_address", rb_gc_unregister_address as *const ()),
        ("ruby_setup", ruby_setup as *const ()),
        ("ruby_init", ruby_init as *const ()),
        ("ruby_options", ruby_options as *const ()),
        ("ruby_cleanup", ruby_cleanup as *const ()),
    ];
    let globals: [(&'static str, *const VALUE); 12] = [
        ("rb_cObject", &raw const C_OBJECT),
        ("rb_cArray", &raw const C_ARRAY),
        ("rb_cHash", &raw const C_HASH),
        ("rb_cString", &raw const C_STRING),
        ("rb_cSymbol", &raw const C_SYMBOL),
        ("rb_cInteger", &raw const C_INTEGER),
        ("rb_cFloat", &raw const C_FLOAT),
        ("rb_eException", &raw const E_EXCEPTION),
        ("rb_eArgError", &raw const E_ARG_ERROR),
        ("rb_eTypeError", &raw const E_TYPE_ERROR),
        ("rb_eStandardError", &raw const E_STANDARD_ERROR),
        ("rb_eRuntimeError", &raw const E_RUNTIME_ERROR),
    ];
    functions
        .into_iter()
        .map(|(name, address)| (name, address as usize))
        .chain(globals.into_iter().map(|(name, address)| (name, address as usize)))
        .collect()
}

/// A symbol table built from the mock entry points
pub struct MockEngine {
    symbols: HashMap<String, usize>,
}

impl MockEngine {
    /// Export every symbol of the ABI table under its preferred name
    pub fn new() -> Self {
        let implemented = implemented();
        let symbols = SYMBOLS
            .iter()
            .map(|symbol| {
                let address = implemented
                    .get(symbol.name)
                    .copied()
                    .unwrap_or(unsupported as *const () as usize);
                (symbol.name.to_string(), address)
            })
            .collect();
        Self { symbols }
    }

    /// Stop exporting `name`
    pub fn without(mut self, name: &str) -> Self {
        self.symbols.remove(name);
        self
    }

    /// Export `from` under the name `to` instead
    pub fn renamed(mut self, from: &str, to: &str) -> Self {
        if let Some(address) = self.symbols.remove(from) {
            self.symbols.insert(to.to_string(), address);
        }
        self
    }

    /// Bind a bridge against this engine
    pub fn bind(self, first_load: bool) -> Result<GuestApi, GuestError> {
        GuestApi::bind(Box::new(self), first_load)
    }
}

impl SymbolSource for MockEngine {
    fn find(&self, name: &str) -> Option<NonNull<c_void>> {
        self.symbols
            .get(name)
            .and_then(|address| NonNull::new(*address as *mut c_void))
    }
}

/// A bridge bound to the mock engine and brought up, living for the whole test
pub fn engine() -> &'static GuestApi {
    let api = MockEngine::new().bind(false).unwrap();
    api.initialize();
    Box::leak(Box::new(api))
}

/// Lifecycle calls made on this thread's engine
pub fn calls() -> Calls {
    with(|s| s.calls.clone())
}

/// Make a constant undefined on this thread's engine
pub fn undefine(name: &str) {
    with(|s| s.undefined.push(name.to_string()));
}

/// Number of currently registered GC roots on this thread's engine
pub fn roots() -> usize {
    with(|s| s.roots.len())
}
