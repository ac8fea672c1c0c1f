//! Address plumbing shared across the engine.

use std::{ffi::c_void, fmt};

/// A raw code or data address inside the process.
///
/// Function entries, module bases and vtable slots all travel through the
/// engine as `Address`es. The engine itself never calls through one; it only
/// compares, records and patches them. Calling a resolved trampoline is the
/// caller's business, after transmuting it back to the right signature.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address(*mut c_void);

impl Address {
    pub const NULL: Address = Address(std::ptr::null_mut());

    pub fn new(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub fn is_null(self) -> bool {
        self.0.is_null()
    }

    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }

    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

// Addresses are shared under the registry lock; they are plain values, the
// engine never dereferences them outside explicit unsafe slot writes.
unsafe impl Send for Address {}
unsafe impl Sync for Address {}

impl From<usize> for Address {
    fn from(value: usize) -> Self {
        Self(value as *mut c_void)
    }
}

impl From<*mut c_void> for Address {
    fn from(ptr: *mut c_void) -> Self {
        Self(ptr)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&format!("0x{:x}", self.as_usize()))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
