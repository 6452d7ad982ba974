//! Conversion between fact values and guest objects
//!
//! Conversions build native collections while they walk the guest side, so
//! every engine step runs under its own protected call and a guest fault comes
//! back as an error instead of jumping over the partly built value.

use std::collections::BTreeMap;
use std::ffi::{c_char, c_long};

use hostfacts_core::Value;

use crate::abi::VALUE;
use crate::api::{GuestApi, GuestRef, Sentinels};
use crate::call::{Raised, Scope};
use crate::error::GuestError;
use crate::handle::GuestHandle;

impl GuestApi {
    /// Convert a fact value into a guest object retained by the returned handle
    ///
    /// # Errors
    /// Returns `GuestError::NotInitialized` before bring-up, or the fault
    /// raised while building the object.
    pub fn to_guest(&'static self, value: &Value) -> Result<GuestHandle, GuestError> {
        self.protect(|scope| {
            scope
                .to_guest(value)
                .map(|object| GuestHandle::new(self, object))
        })?
    }

    /// Convert a retained guest object into a fact value
    ///
    /// # Errors
    /// Returns `GuestError::NotInitialized` before bring-up, or the fault
    /// raised while reading the object.
    pub fn to_native(&self, handle: &GuestHandle) -> Result<Option<Value>, GuestError> {
        self.protect(|scope| scope.to_native(scope.retained(handle)))?
    }

    fn guest_value(&self, sentinels: Sentinels, value: &Value) -> Result<VALUE, Raised> {
        let s = self.symbols();
        match value {
            Value::String(text) => self.string_guarded(sentinels, text.as_bytes()),
            Value::Integer(n) => {
                let (int2inum, n) = (s.rb_int2inum, *n as isize);
                // SAFETY: plain numeric conversion
                self.guarded(sentinels, move || unsafe { int2inum(n) })
            }
            Value::Boolean(b) => Ok(if *b { sentinels.true_ } else { sentinels.false_ }),
            Value::Double(d) => {
                let (float_new, d) = (s.rb_float_new_in_heap, *d);
                // SAFETY: plain numeric conversion
                self.guarded(sentinels, move || unsafe { float_new(d) })
            }
            Value::Array(elements) => {
                let (ary_new, push) = (s.rb_ary_new_capa, s.rb_ary_push);
                let capacity = c_long::try_from(elements.len()).unwrap_or(c_long::MAX);
                // SAFETY: allocating a fresh guest array
                let array = self.guarded(sentinels, move || unsafe { ary_new(capacity) })?;
                for element in elements {
                    let element = self.guest_value(sentinels, element)?;
                    // SAFETY: both are live guest objects
                    self.guarded(sentinels, move || unsafe { push(array, element) })?;
                }
                Ok(array)
            }
            Value::Map(entries) => {
                let (hash_new, aset) = (s.rb_hash_new, s.rb_hash_aset);
                // SAFETY: allocating a fresh guest hash
                let hash = self.guarded(sentinels, move || unsafe { hash_new() })?;
                for (key, element) in entries {
                    let key = self.string_guarded(sentinels, key.as_bytes())?;
                    let element = self.guest_value(sentinels, element)?;
                    // SAFETY: all three are live guest objects
                    self.guarded(sentinels, move || unsafe { aset(hash, key, element) })?;
                }
                Ok(hash)
            }
            Value::Foreign(foreign) => match foreign.as_any().downcast_ref::<GuestHandle>() {
                Some(handle) => Ok(handle.raw()),
                None => match foreign.materialize() {
                    Some(value) => self.guest_value(sentinels, &value),
                    None => Ok(sentinels.nil),
                },
            },
        }
    }

    fn native_value(&self, sentinels: Sentinels, value: VALUE) -> Result<Option<Value>, Raised> {
        let s = self.symbols();
        if value == sentinels.nil {
            return Ok(None);
        }
        if value == sentinels.true_ {
            return Ok(Some(Value::Boolean(true)));
        }
        if value == sentinels.false_ {
            return Ok(Some(Value::Boolean(false)));
        }
        if self.is_a_guarded(sentinels, value, s.rb_cInteger)? {
            let num2long = s.rb_num2long;
            // SAFETY: `value` is a guest Integer
            let n = self.guarded(sentinels, move || unsafe { num2long(value) })?;
            return Ok(Some(Value::Integer(i64::from(n))));
        }
        if self.is_a_guarded(sentinels, value, s.rb_cFloat)? {
            let num2dbl = s.rb_num2dbl;
            // SAFETY: `value` is a guest Float
            let d = self.guarded(sentinels, move || unsafe { num2dbl(value) })?;
            return Ok(Some(Value::Double(d)));
        }
        if self.is_a_guarded(sentinels, value, s.rb_cArray)? {
            let len = self.array_len_guarded(sentinels, value)?;
            let mut elements = Vec::new();
            for index in 0..len {
                let element = self.entry_guarded(sentinels, value, index)?;
                if let Some(element) = self.native_value(sentinels, element)? {
                    elements.push(element);
                }
            }
            return Ok(Some(Value::Array(elements)));
        }
        if self.is_a_guarded(sentinels, value, s.rb_cHash)? {
            let pairs = self.hash_pairs(sentinels, value)?;
            let len = self.array_len_guarded(sentinels, pairs)?;
            let mut entries = BTreeMap::new();
            for index in (0..len).step_by(2) {
                let key = self.entry_guarded(sentinels, pairs, index)?;
                let element = self.entry_guarded(sentinels, pairs, index + 1)?;
                if let Some(element) = self.native_value(sentinels, element)? {
                    entries.insert(self.text_guarded(sentinels, key)?, element);
                }
            }
            return Ok(Some(Value::Map(entries)));
        }
        if self.is_a_guarded(sentinels, value, s.rb_cSymbol)? {
            let sym_to_s = s.rb_sym_to_s;
            // SAFETY: `value` is a guest Symbol
            let name = self.guarded(sentinels, move || unsafe { sym_to_s(value) })?;
            return self.text_guarded(sentinels, name).map(|name| Some(Value::String(name)));
        }
        self.text_guarded(sentinels, value)
            .map(|text| Some(Value::String(text)))
    }
}

impl<'a> Scope<'a> {
    /// Create a guest String
    ///
    /// The length is passed explicitly, so embedded NUL bytes are kept.
    #[must_use]
    pub fn string(&self, text: &str) -> GuestRef<'a> {
        let len = c_long::try_from(text.len()).unwrap_or(c_long::MAX);
        // SAFETY: the pointer covers at least `len` bytes, copied by the engine
        GuestRef::new(unsafe {
            (self.symbols().rb_str_new)(text.as_ptr().cast::<c_char>(), len)
        })
    }

    /// Create a guest Integer
    #[must_use]
    pub fn integer(&self, value: i64) -> GuestRef<'a> {
        // SAFETY: plain numeric conversion
        GuestRef::new(unsafe { (self.symbols().rb_int2inum)(value as isize) })
    }

    /// Create a guest Float
    #[must_use]
    pub fn float(&self, value: f64) -> GuestRef<'a> {
        // SAFETY: plain numeric conversion
        GuestRef::new(unsafe { (self.symbols().rb_float_new_in_heap)(value) })
    }

    /// Convert a fact value into a guest object
    ///
    /// Arrays and maps are converted depth-first; a value already owned by
    /// the guest is handed back as is.
    ///
    /// # Errors
    /// Returns `GuestError::Fault` for an exception raised while building.
    pub fn to_guest(&self, value: &Value) -> Result<GuestRef<'a>, GuestError> {
        self.api
            .guest_value(self.sentinels, value)
            .map(GuestRef::new)
            .map_err(|raised| self.describe(self.sentinels, raised))
    }

    /// Convert a guest object into a fact value
    ///
    /// Nil converts to no value. Symbols and objects of other classes are
    /// converted through their string form.
    ///
    /// # Errors
    /// Returns `GuestError::Fault` if the guest raised while being read, for
    /// example from a user-defined `to_s`.
    pub fn to_native(&self, value: GuestRef<'a>) -> Result<Option<Value>, GuestError> {
        self.api
            .native_value(self.sentinels, value.as_raw())
            .map_err(|raised| self.describe(self.sentinels, raised))
    }
}
