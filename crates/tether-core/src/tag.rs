//! Associative tag store
//!
//! The native side offers one opaque word of storage on every object and on
//! every type descriptor. The bridge keeps the directory handle of the
//! object's [`WrappedInstance`](crate::WrappedInstance) in the former and the
//! [`BindingId`] of the type's binding in the latter, so both directions of
//! the mapping are O(1).

use crate::binding::BindingId;
use crate::directory::Handle;
use crate::native::{NativePtr, NativeSystem, NativeType};
use std::fmt;
use std::sync::Arc;

/// Back-reference stored on a native object
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceTag(Handle);

impl InstanceTag {
    /// Tag pointing at a directory slot
    pub fn new(handle: Handle) -> Self {
        Self(handle)
    }

    /// The directory slot
    pub fn handle(self) -> Handle {
        self.0
    }

    /// Encode for the native tag slot
    pub fn encode(self) -> u64 {
        self.0.to_bits()
    }

    /// Decode a native tag slot value
    pub fn decode(bits: u64) -> Self {
        Self(Handle::from_bits(bits))
    }
}

impl fmt::Debug for InstanceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InstanceTag({:?})", self.0)
    }
}

/// Owner-thread access to the native tag slots
#[derive(Clone)]
pub struct TagStore {
    native: Arc<dyn NativeSystem>,
}

impl TagStore {
    /// Create a tag store over a native system
    pub fn new(native: Arc<dyn NativeSystem>) -> Self {
        Self { native }
    }

    /// Point an object's tag at an instance record
    pub fn attach(&self, ptr: NativePtr, tag: InstanceTag) {
        self.native.set_object_tag(ptr, Some(tag.encode()));
    }

    /// Clear an object's tag
    pub fn detach(&self, ptr: NativePtr) {
        self.native.set_object_tag(ptr, None);
    }

    /// Read an object's tag
    pub fn lookup(&self, ptr: NativePtr) -> Option<InstanceTag> {
        self.native.object_tag(ptr).map(InstanceTag::decode)
    }

    /// Point a type's tag at its binding
    pub fn attach_type(&self, ty: NativeType, binding: BindingId) {
        self.native.set_type_tag(ty, Some(binding.encode()));
    }

    /// Clear a type's tag
    pub fn detach_type(&self, ty: NativeType) {
        self.native.set_type_tag(ty, None);
    }

    /// Read a type's tag
    pub fn lookup_type(&self, ty: NativeType) -> Option<BindingId> {
        self.native.type_tag(ty).and_then(BindingId::decode)
    }
}

impl fmt::Debug for TagStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TagStore").finish_non_exhaustive()
    }
}
