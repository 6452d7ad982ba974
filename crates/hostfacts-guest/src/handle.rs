//! Guest objects retained beyond a protected call

use std::any::Any;
use std::fmt;

use hostfacts_core::{ForeignValue, Value};
use tracing::debug;

use crate::abi::VALUE;
use crate::api::{GuestApi, GuestRef};

/// A guest object kept alive across guest garbage collections
///
/// The object is registered as a GC root for as long as the handle lives and
/// unregistered when it is dropped. Stored in the fact collection as a
/// foreign value, it is only converted to a native value when rendered.
pub struct GuestHandle {
    api: &'static GuestApi,
    // Boxed so the registered root address stays put when the handle moves
    root: Box<VALUE>,
}

impl GuestHandle {
    /// Root `value` for the lifetime of the handle
    ///
    /// Typically called inside a protected call to keep an object past it.
    #[must_use]
    pub fn new(api: &'static GuestApi, value: GuestRef<'_>) -> Self {
        let mut root = Box::new(value.as_raw());
        // SAFETY: the root address is stable and unregistered on drop
        unsafe { (api.symbols().rb_gc_register_address)(&mut *root) };
        Self { api, root }
    }

    /// The retained object; read it in a protected call with [`Scope::retained`](crate::Scope::retained)
    pub(crate) fn raw(&self) -> VALUE {
        *self.root
    }

    /// Compare the identity of two retained objects
    #[must_use]
    pub fn same_object(&self, other: &GuestHandle) -> bool {
        *self.root == *other.root
    }
}

impl Drop for GuestHandle {
    fn drop(&mut self) {
        if !self.api.is_initialized() {
            return;
        }
        // SAFETY: the address was registered in `new`
        unsafe { (self.api.symbols().rb_gc_unregister_address)(&mut *self.root) };
    }
}

impl fmt::Debug for GuestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GuestHandle({:#x})", *self.root)
    }
}

impl ForeignValue for GuestHandle {
    fn materialize(&self) -> Option<Value> {
        match self.api.to_native(self) {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "could not convert guest value");
                None
            }
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl From<GuestHandle> for Value {
    fn from(handle: GuestHandle) -> Self {
        Value::Foreign(Box::new(handle))
    }
}
