//! Managed runtime seam
//!
//! The garbage-collected side is consumed through [`ManagedRuntime`]. All of
//! its methods are called from the owning thread only, so implementations
//! need not be thread-safe.
//!
//! The runtime drives the bridge in the other direction by calling the
//! [`Context`](crate::Context) hooks: `on_gc_begin` before marking,
//! `trace_wrapper` while marking, `update_weak_pointers` after marking and
//! `finalize_wrapper` for every dead wrapper.

use crate::error::BridgeResult;
use crate::native::NativeType;
use std::fmt;
use std::num::NonZeroU64;

/// Handle to an object in the managed heap
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagedObject(NonZeroU64);

impl ManagedObject {
    /// Wrap a raw handle, `None` for null
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(ManagedObject)
    }

    /// Get the raw handle
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ManagedObject({})", self.0)
    }
}

impl fmt::Display for ManagedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The garbage-collected runtime
pub trait ManagedRuntime {
    /// Create a wrapper object whose prototype corresponds to `ty`
    fn new_wrapper(&self, ty: NativeType, type_name: &str) -> BridgeResult<ManagedObject>;

    /// Make the object strongly reachable (a GC root)
    fn root(&self, obj: ManagedObject);

    /// Remove the GC root added by [`ManagedRuntime::root`]
    fn unroot(&self, obj: ManagedObject);

    /// Request a collection at the runtime's next opportunity
    fn schedule_gc(&self);

    /// During the weak-pointer callback: will this unrooted object be finalized?
    fn is_about_to_be_finalized(&self, obj: ManagedObject) -> bool;
}
