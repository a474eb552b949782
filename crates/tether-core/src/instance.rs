//! Wrapped instance records

use crate::binding::BindingId;
use crate::closure::ClosureSet;
use crate::error::{BridgeError, BridgeResult};
use crate::lifecycle::Lifecycle;
use crate::managed::ManagedObject;
use crate::native::{NativePtr, NativeType};

/// Pairs one native object with at most one managed wrapper
///
/// Records live in the context's [`Directory`](crate::Directory). The native
/// pointer is cleared once the bridge releases its reference; the wrapper is
/// cleared once it is discarded.
#[derive(Debug)]
pub struct WrappedInstance {
    ptr: Option<NativePtr>,
    address: NativePtr,
    native_type: NativeType,
    type_name: String,
    binding: BindingId,
    wrapper: Option<ManagedObject>,
    custom: bool,
    pub(crate) lifecycle: Lifecycle,
    pub(crate) closures: ClosureSet,
}

impl WrappedInstance {
    pub(crate) fn new(
        ptr: NativePtr,
        native_type: NativeType,
        type_name: String,
        binding: BindingId,
        wrapper: ManagedObject,
        custom: bool,
    ) -> Self {
        Self {
            ptr: Some(ptr),
            address: ptr,
            native_type,
            type_name,
            binding,
            wrapper: Some(wrapper),
            custom,
            lifecycle: Lifecycle::new(),
            closures: ClosureSet::new(),
        }
    }

    /// Native object, `None` once released
    pub fn ptr(&self) -> Option<NativePtr> {
        self.ptr
    }

    /// Dynamic native type
    pub fn native_type(&self) -> NativeType {
        self.native_type
    }

    /// Registered native type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Binding of the native type
    pub fn binding(&self) -> BindingId {
        self.binding
    }

    /// Managed wrapper, `None` once discarded
    pub fn wrapper(&self) -> Option<ManagedObject> {
        self.wrapper
    }

    /// Created for a managed-side subclass without introspection data
    pub fn is_custom(&self) -> bool {
        self.custom
    }

    /// Lifecycle state
    pub fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    /// Closure bridges owned by this instance
    pub fn closures(&self) -> &ClosureSet {
        &self.closures
    }

    /// The native pointer, or a disposed-object error.
    ///
    /// `action` completes "impossible to ... it" in the diagnostic.
    pub fn checked_ptr(&self, action: &'static str) -> BridgeResult<NativePtr> {
        if let Some(ptr) = self.ptr.filter(|_| !self.lifecycle.native_disposed()) {
            return Ok(ptr);
        }
        tracing::error!(
            target: "tether::lifecycle",
            type_name = %self.type_name,
            ptr = %self.address,
            action,
            "object has already been deallocated; it might have been destroyed from native code \
             using something such as destroy(), dispose(), or remove()"
        );
        Err(BridgeError::ObjectDisposed {
            type_name: self.type_name.clone(),
            ptr: self.address,
            action,
        })
    }

    /// Address the record was created for, kept after release for diagnostics
    pub fn address(&self) -> NativePtr {
        self.address
    }

    pub(crate) fn take_ptr(&mut self) -> Option<NativePtr> {
        self.ptr.take()
    }

    pub(crate) fn take_wrapper(&mut self) -> Option<ManagedObject> {
        self.wrapper.take()
    }
}
