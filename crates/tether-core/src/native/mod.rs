//! Native object system seam
//!
//! Everything the bridge needs from the reference-counted side goes through
//! [`NativeSystem`]: refcount primitives, toggle references, disposal
//! watching, opaque tag slots, introspection, and member access. Refcount
//! changes may happen on any thread, so implementations must be
//! `Send + Sync`; the bridge itself only calls in from its owning thread.
//!
//! Notifications flow back through [`NativeEvents`], which the bridge hands
//! to the native side when it installs a toggle reference or a disposal
//! watch.

pub mod info;

pub use info::{
    FieldFlags, FieldInfo, FunctionFlags, FunctionInfo, InterfaceInfo, ObjectInfo, ParamFlags,
    PropertyInfo, SignalInfo, TypeTag, VFuncInfo,
};

use crate::closure::ClosureBridge;
use crate::error::NativeError;
use std::fmt;
use std::num::NonZeroU64;
use std::sync::Arc;

/// Address of a native object
///
/// Never null; the bridge models "no pointer" as `Option<NativePtr>`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativePtr(NonZeroU64);

impl NativePtr {
    /// Wrap a raw address, `None` for null
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(NativePtr)
    }

    /// Get the raw address
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePtr({:#x})", self.0)
    }
}

impl fmt::Display for NativePtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Identifier of a native type descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeType(NonZeroU64);

impl NativeType {
    /// Wrap a raw type id, `None` for the invalid type
    pub fn from_raw(raw: u64) -> Option<Self> {
        NonZeroU64::new(raw).map(NativeType)
    }

    /// Get the raw type id
    pub fn as_u64(self) -> u64 {
        self.0.get()
    }
}

/// Value crossing the bridge
///
/// Argument marshaling lives outside the bridge; this is the already
/// marshaled form exchanged with the native side.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// No value
    Undefined,
    /// Explicit null
    Null,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Floating point
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Another native object
    Object(NativePtr),
}

impl Value {
    /// Check for [`Value::Undefined`]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }
}

/// Notifications delivered by the native side
///
/// `toggle_notify` may arrive on any thread. `dispose_notify` is delivered
/// while the object is being torn down.
pub trait NativeEvents: Send + Sync {
    /// Refcount crossed the 1↔2 boundary on an object with a toggle reference.
    ///
    /// `is_last_ref` is true for 2 → 1 (only the toggle reference remains).
    fn toggle_notify(&self, ptr: NativePtr, is_last_ref: bool);

    /// A watched object is being disposed.
    fn dispose_notify(&self, ptr: NativePtr);
}

/// The reference-counted native object system
pub trait NativeSystem: Send + Sync {
    // ===== Reference counting =====

    /// Take a strong reference
    fn ref_object(&self, ptr: NativePtr);

    /// Drop a strong reference; the object is disposed at zero
    fn unref_object(&self, ptr: NativePtr);

    /// Take ownership of a floating reference (or a normal one if not floating)
    fn ref_sink(&self, ptr: NativePtr);

    /// Whether the object still carries a floating reference
    fn is_floating(&self, ptr: NativePtr) -> bool;

    /// Current reference count (0 once freed)
    fn ref_count(&self, ptr: NativePtr) -> u32;

    /// Install a toggle reference; counts as one strong reference
    fn add_toggle_ref(&self, ptr: NativePtr, events: Arc<dyn NativeEvents>);

    /// Remove the toggle reference, releasing the reference it held
    fn remove_toggle_ref(&self, ptr: NativePtr);

    /// Ask for [`NativeEvents::dispose_notify`] when the object is disposed
    fn watch_dispose(&self, ptr: NativePtr, events: Arc<dyn NativeEvents>);

    /// Cancel a disposal watch
    fn unwatch_dispose(&self, ptr: NativePtr);

    // ===== Opaque tag slots =====

    /// Read the bridge's tag slot on an object
    fn object_tag(&self, ptr: NativePtr) -> Option<u64>;

    /// Write (or clear) the bridge's tag slot on an object
    fn set_object_tag(&self, ptr: NativePtr, tag: Option<u64>);

    /// Read the bridge's tag slot on a type descriptor
    fn type_tag(&self, ty: NativeType) -> Option<u64>;

    /// Write (or clear) the bridge's tag slot on a type descriptor
    fn set_type_tag(&self, ty: NativeType, tag: Option<u64>);

    // ===== Type system and introspection =====

    /// Dynamic type of an object
    fn type_of(&self, ptr: NativePtr) -> NativeType;

    /// Registered name of a type
    fn type_name(&self, ty: NativeType) -> String;

    /// Parent type, `None` for a fundamental type
    fn type_parent(&self, ty: NativeType) -> Option<NativeType>;

    /// Interfaces implemented by a type at runtime
    fn type_interfaces(&self, ty: NativeType) -> Vec<NativeType>;

    /// Whether a type is abstract
    fn is_abstract(&self, ty: NativeType) -> bool;

    /// Introspection data for a class, `None` for types registered without it
    fn object_info(&self, ty: NativeType) -> Option<Arc<ObjectInfo>>;

    /// Introspection data for an interface
    fn interface_info(&self, ty: NativeType) -> Option<Arc<InterfaceInfo>>;

    /// Address a type installs for a virtual function slot
    fn vfunc_address(&self, vfunc: &VFuncInfo, ty: NativeType) -> Option<usize>;

    /// Find a property by canonical name on a class, its ancestors and interfaces
    fn find_property(&self, ty: NativeType, canonical_name: &str) -> Option<Arc<PropertyInfo>>;

    /// Parse a signal name (`name` or `name::detail`) against a type
    fn lookup_signal(&self, ty: NativeType, name: &str) -> Option<SignalInfo>;

    // ===== Member access =====

    /// Construct an object with initial property values
    fn new_object(&self, ty: NativeType, props: &[(String, Value)]) -> Result<NativePtr, NativeError>;

    /// Read a property by canonical name
    fn get_property(&self, ptr: NativePtr, name: &str) -> Result<Value, NativeError>;

    /// Write a property by canonical name
    fn set_property(&self, ptr: NativePtr, name: &str, value: Value) -> Result<(), NativeError>;

    /// Read an instance field
    fn get_field(&self, ptr: NativePtr, field: &FieldInfo) -> Result<Value, NativeError>;

    /// Call a method (or virtual function) on an object
    fn invoke(&self, ptr: NativePtr, function: &FunctionInfo, args: &[Value]) -> Result<Value, NativeError>;

    /// Connect a closure bridge to a signal, returning the handler id
    fn connect(
        &self,
        ptr: NativePtr,
        signal: &SignalInfo,
        closure: Arc<ClosureBridge>,
        after: bool,
    ) -> Result<u64, NativeError>;

    /// Emit a signal
    fn emit(&self, ptr: NativePtr, signal: &SignalInfo, args: &[Value]) -> Result<Value, NativeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_ptr_null() {
        assert!(NativePtr::from_raw(0).is_none());
        let ptr = NativePtr::from_raw(0x1000).unwrap();
        assert_eq!(ptr.as_u64(), 0x1000);
        assert_eq!(ptr.to_string(), "0x1000");
    }

    #[test]
    fn test_value_undefined() {
        assert!(Value::Undefined.is_undefined());
        assert!(!Value::Null.is_undefined());
    }
}
