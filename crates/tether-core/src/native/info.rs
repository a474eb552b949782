//! Introspection metadata
//!
//! Read-only descriptions of native classes and interfaces, as provided by
//! the native system's type repository. The prototype resolver only reads
//! these; it never mutates them.

use super::NativeType;
use bitflags::bitflags;
use std::sync::Arc;

bitflags! {
    /// Property flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ParamFlags: u32 {
        /// Property can be read
        const READABLE = 1 << 0;
        /// Property can be written
        const WRITABLE = 1 << 1;
        /// Property can only be set at construction
        const CONSTRUCT_ONLY = 1 << 2;
        /// Property is implemented by the managed side
        const CUSTOM = 1 << 8;
    }
}

bitflags! {
    /// Field flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FieldFlags: u32 {
        /// Field can be read
        const READABLE = 1 << 0;
        /// Field can be written
        const WRITABLE = 1 << 1;
    }
}

bitflags! {
    /// Function flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct FunctionFlags: u32 {
        /// Takes an instance as first argument (non-static)
        const IS_METHOD = 1 << 0;
        /// Constructor function
        const IS_CONSTRUCTOR = 1 << 1;
    }
}

/// Storage type of a field or property
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    /// No value
    Void,
    /// Boolean
    Boolean,
    /// Signed 32-bit integer
    Int32,
    /// Unsigned 32-bit integer
    Uint32,
    /// Signed 64-bit integer
    Int64,
    /// Unsigned 64-bit integer
    Uint64,
    /// Double precision float
    Double,
    /// UTF-8 string
    Utf8,
    /// Untyped pointer
    Pointer,
    /// C array
    Array,
    /// Struct, object or callback
    Interface,
    /// Doubly linked list
    List,
    /// Singly linked list
    SList,
    /// Hash table
    Hash,
    /// Error record
    Error,
}

impl TypeTag {
    /// Composite and collection tags cannot be accessed as plain fields
    pub fn is_composite(self) -> bool {
        matches!(
            self,
            TypeTag::Array
                | TypeTag::Interface
                | TypeTag::List
                | TypeTag::SList
                | TypeTag::Hash
                | TypeTag::Error
        )
    }
}

/// A property declared by a class or interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyInfo {
    /// Canonical (hyphenated) name
    pub name: String,
    /// Access flags
    pub flags: ParamFlags,
    /// Value type
    pub value_type: TypeTag,
}

impl PropertyInfo {
    /// Create a property description
    pub fn new(name: impl Into<String>, flags: ParamFlags, value_type: TypeTag) -> Self {
        Self {
            name: name.into(),
            flags,
            value_type,
        }
    }

    /// Readable property
    pub fn is_readable(&self) -> bool {
        self.flags.contains(ParamFlags::READABLE)
    }

    /// Writable property
    pub fn is_writable(&self) -> bool {
        self.flags.contains(ParamFlags::WRITABLE)
    }

    /// Property overridden by the managed side
    pub fn is_custom(&self) -> bool {
        self.flags.contains(ParamFlags::CUSTOM)
    }
}

/// An instance field of a class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    /// Field name
    pub name: String,
    /// Access flags
    pub flags: FieldFlags,
    /// Storage type
    pub type_tag: TypeTag,
    /// Byte offset in the instance struct
    pub offset: usize,
}

impl FieldInfo {
    /// Create a field description
    pub fn new(name: impl Into<String>, flags: FieldFlags, type_tag: TypeTag, offset: usize) -> Self {
        Self {
            name: name.into(),
            flags,
            type_tag,
            offset,
        }
    }

    /// Readable field
    pub fn is_readable(&self) -> bool {
        self.flags.contains(FieldFlags::READABLE)
    }

    /// Writable field
    pub fn is_writable(&self) -> bool {
        self.flags.contains(FieldFlags::WRITABLE)
    }
}

/// A function or method
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    /// Function name
    pub name: String,
    /// Flags
    pub flags: FunctionFlags,
    /// Declared argument count (excluding the instance)
    pub n_args: usize,
}

impl FunctionInfo {
    /// Create a function description
    pub fn new(name: impl Into<String>, flags: FunctionFlags, n_args: usize) -> Self {
        Self {
            name: name.into(),
            flags,
            n_args,
        }
    }

    /// Instance method (as opposed to a static function)
    pub fn is_method(&self) -> bool {
        self.flags.contains(FunctionFlags::IS_METHOD)
    }
}

/// A virtual function slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VFuncInfo {
    /// Slot name (without any prefix)
    pub name: String,
    /// Class or interface that declares the slot
    pub container: NativeType,
    /// Declared argument count
    pub n_args: usize,
}

impl VFuncInfo {
    /// Create a virtual function description
    pub fn new(name: impl Into<String>, container: NativeType, n_args: usize) -> Self {
        Self {
            name: name.into(),
            container,
            n_args,
        }
    }

    /// View the slot as a callable function
    pub fn as_function(&self) -> FunctionInfo {
        FunctionInfo::new(self.name.clone(), FunctionFlags::IS_METHOD, self.n_args)
    }
}

/// A parsed signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalInfo {
    /// Signal id
    pub id: u32,
    /// Signal name
    pub name: String,
    /// Detail part of `name::detail`, if any
    pub detail: Option<String>,
    /// Parameter count (excluding the instance)
    pub n_params: usize,
    /// Whether the signal returns a value
    pub has_return: bool,
}

/// Introspection data of a class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Namespace
    pub namespace: String,
    /// Class name within the namespace
    pub name: String,
    /// Runtime type
    pub gtype: NativeType,
    /// Interfaces declared by this class
    pub interfaces: Vec<NativeType>,
    /// Declared properties
    pub properties: Vec<Arc<PropertyInfo>>,
    /// Instance fields
    pub fields: Vec<Arc<FieldInfo>>,
    /// Methods and static functions
    pub methods: Vec<Arc<FunctionInfo>>,
    /// Virtual function slots declared by this class
    pub vfuncs: Vec<Arc<VFuncInfo>>,
}

impl ObjectInfo {
    /// Create empty class metadata
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, gtype: NativeType) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            gtype,
            interfaces: Vec::new(),
            properties: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            vfuncs: Vec::new(),
        }
    }

    /// Declare an implemented interface
    pub fn with_interface(mut self, iface: NativeType) -> Self {
        self.interfaces.push(iface);
        self
    }

    /// Declare a property
    pub fn with_property(mut self, prop: PropertyInfo) -> Self {
        self.properties.push(Arc::new(prop));
        self
    }

    /// Declare a field
    pub fn with_field(mut self, field: FieldInfo) -> Self {
        self.fields.push(Arc::new(field));
        self
    }

    /// Declare a method or function
    pub fn with_method(mut self, method: FunctionInfo) -> Self {
        self.methods.push(Arc::new(method));
        self
    }

    /// Declare a virtual function slot
    pub fn with_vfunc(mut self, vfunc: VFuncInfo) -> Self {
        self.vfuncs.push(Arc::new(vfunc));
        self
    }

    /// Find a declared property by canonical name
    pub fn find_property(&self, canonical: &str) -> Option<&Arc<PropertyInfo>> {
        self.properties.iter().find(|p| p.name == canonical)
    }

    /// Find a field by exact name
    pub fn find_field(&self, name: &str) -> Option<&Arc<FieldInfo>> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Find a method by exact name (own methods only)
    pub fn find_method(&self, name: &str) -> Option<&Arc<FunctionInfo>> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Find a virtual function slot declared by this class
    pub fn find_vfunc(&self, name: &str) -> Option<&Arc<VFuncInfo>> {
        self.vfuncs.iter().find(|v| v.name == name)
    }
}

/// Introspection data of an interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceInfo {
    /// Namespace
    pub namespace: String,
    /// Interface name within the namespace
    pub name: String,
    /// Runtime type
    pub gtype: NativeType,
    /// Declared properties
    pub properties: Vec<Arc<PropertyInfo>>,
    /// Methods and static functions
    pub methods: Vec<Arc<FunctionInfo>>,
    /// Virtual function slots
    pub vfuncs: Vec<Arc<VFuncInfo>>,
}

impl InterfaceInfo {
    /// Create empty interface metadata
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, gtype: NativeType) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            gtype,
            properties: Vec::new(),
            methods: Vec::new(),
            vfuncs: Vec::new(),
        }
    }

    /// Declare a property
    pub fn with_property(mut self, prop: PropertyInfo) -> Self {
        self.properties.push(Arc::new(prop));
        self
    }

    /// Declare a method or function
    pub fn with_method(mut self, method: FunctionInfo) -> Self {
        self.methods.push(Arc::new(method));
        self
    }

    /// Declare a virtual function slot
    pub fn with_vfunc(mut self, vfunc: VFuncInfo) -> Self {
        self.vfuncs.push(Arc::new(vfunc));
        self
    }

    /// Find a declared property by canonical name
    pub fn find_property(&self, canonical: &str) -> Option<&Arc<PropertyInfo>> {
        self.properties.iter().find(|p| p.name == canonical)
    }

    /// Find a method by exact name
    pub fn find_method(&self, name: &str) -> Option<&Arc<FunctionInfo>> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Find a virtual function slot
    pub fn find_vfunc(&self, name: &str) -> Option<&Arc<VFuncInfo>> {
        self.vfuncs.iter().find(|v| v.name == name)
    }
}
