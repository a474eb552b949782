//! Prototype resolution and cache
//!
//! One [`TypeBinding`] exists per native type the bridge has seen, shared by
//! every wrapped instance of that type. Members are materialized lazily: the
//! first lookup of a name on a binding scans the type metadata in a fixed
//! priority order and memoizes the outcome (including "absent"), so the scan
//! never repeats for that (binding, name) pair.
//!
//! Priority per binding:
//! 1. virtual function override (`vfunc_` prefix), declined when the slot is
//!    inherited unchanged from the parent
//! 2. property of the type or one of its declared interfaces
//! 3. readable instance field with a simple type
//! 4. method of the type or one of its declared interfaces
//! 5. method or property of a runtime-implemented interface
//!
//! Anything else is absent on this binding and falls through to the parent
//! binding, mirroring the managed runtime's prototype chain.

pub mod canonical;

mod atom;
mod enumerate;
mod resolve;

pub use atom::{Atom, Interner};

use crate::error::{BridgeError, BridgeResult};
use crate::native::{FieldInfo, FunctionInfo, NativeSystem, NativeType, ObjectInfo, PropertyInfo, VFuncInfo};
use crate::tag::TagStore;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

/// Index of a [`TypeBinding`] in its registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingId(u32);

impl BindingId {
    /// Position in the registry
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Encode for a native type tag slot (never zero)
    pub fn encode(self) -> u64 {
        u64::from(self.0) + 1
    }

    /// Decode a native type tag slot value
    pub fn decode(bits: u64) -> Option<Self> {
        bits.checked_sub(1)
            .and_then(|raw| u32::try_from(raw).ok())
            .map(BindingId)
    }
}

/// A resolved member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Accessor {
    /// Virtual function override
    VFunc(Arc<VFuncInfo>),
    /// Dynamic property accessor
    Property(Arc<PropertyInfo>),
    /// Instance field accessor
    Field(Arc<FieldInfo>),
    /// Instance method
    Method(Arc<FunctionInfo>),
}

impl Accessor {
    /// Short kind name for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Accessor::VFunc(_) => "vfunc",
            Accessor::Property(_) => "property",
            Accessor::Field(_) => "field",
            Accessor::Method(_) => "method",
        }
    }

    /// Native name of the member
    pub fn name(&self) -> &str {
        match self {
            Accessor::VFunc(v) => &v.name,
            Accessor::Property(p) => &p.name,
            Accessor::Field(f) => &f.name,
            Accessor::Method(m) => &m.name,
        }
    }
}

/// Memoized outcome of resolving a name on one binding
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The binding defines the member
    Defined(Accessor),
    /// Not defined here; defer to the parent binding
    Absent,
}

impl Resolution {
    /// The accessor, if defined
    pub fn accessor(&self) -> Option<&Accessor> {
        match self {
            Resolution::Defined(accessor) => Some(accessor),
            Resolution::Absent => None,
        }
    }

    /// Whether the binding defines the member
    pub fn is_defined(&self) -> bool {
        matches!(self, Resolution::Defined(_))
    }

    fn kind(&self) -> &'static str {
        self.accessor().map_or("absent", Accessor::kind)
    }
}

/// Prototype-level state for one native type
pub struct TypeBinding {
    id: BindingId,
    native_type: NativeType,
    type_name: String,
    info: Option<Arc<ObjectInfo>>,
    parent: Option<BindingId>,

    /// Memoized resolutions, in first-lookup order
    members: IndexMap<Atom, Resolution>,

    /// Property specs by managed-side name
    properties: FxHashMap<Atom, Arc<PropertyInfo>>,

    /// Field infos by name
    fields: FxHashMap<Atom, Arc<FieldInfo>>,

    /// Metadata scans performed (cache misses)
    scans: u64,
}

impl TypeBinding {
    fn new(
        id: BindingId,
        native_type: NativeType,
        type_name: String,
        info: Option<Arc<ObjectInfo>>,
        parent: Option<BindingId>,
    ) -> Self {
        Self {
            id,
            native_type,
            type_name,
            info,
            parent,
            members: IndexMap::new(),
            properties: FxHashMap::default(),
            fields: FxHashMap::default(),
            scans: 0,
        }
    }

    /// Binding id
    pub fn id(&self) -> BindingId {
        self.id
    }

    /// Native type
    pub fn native_type(&self) -> NativeType {
        self.native_type
    }

    /// Registered type name
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Introspection data, `None` for managed-side subclasses
    pub fn info(&self) -> Option<&Arc<ObjectInfo>> {
        self.info.as_ref()
    }

    /// Parent binding
    pub fn parent(&self) -> Option<BindingId> {
        self.parent
    }

    /// No introspection data: a managed-side subclass
    pub fn is_custom(&self) -> bool {
        self.info.is_none()
    }

    /// Number of metadata scans performed so far
    pub fn scan_count(&self) -> u64 {
        self.scans
    }

    /// Number of memoized names (defined or absent)
    pub fn cached_len(&self) -> usize {
        self.members.len()
    }
}

impl fmt::Debug for TypeBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeBinding")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("parent", &self.parent)
            .field("cached", &self.members.len())
            .field("scans", &self.scans)
            .finish()
    }
}

/// All type bindings plus the shared member-name interner
#[derive(Debug, Default)]
pub struct BindingRegistry {
    bindings: Vec<TypeBinding>,
    interner: Interner,
}

impl BindingRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Binding for `ty`, creating it (and its ancestors) on first use.
    ///
    /// The type descriptor's tag slot maps the type back to its binding; a
    /// tag that does not point at a binding for the same type is ignored.
    pub fn ensure(&mut self, native: &dyn NativeSystem, tags: &TagStore, ty: NativeType) -> BridgeResult<BindingId> {
        if let Some(id) = tags.lookup_type(ty) {
            if self.get(id).is_some_and(|b| b.native_type == ty) {
                return Ok(id);
            }
        }

        let parent = match native.type_parent(ty) {
            Some(parent) => Some(self.ensure(native, tags, parent)?),
            None => None,
        };

        let raw = u32::try_from(self.bindings.len()).map_err(|_| BridgeError::OutOfMemory("type binding"))?;
        self.bindings
            .try_reserve(1)
            .map_err(|_| BridgeError::OutOfMemory("type binding"))?;

        let id = BindingId(raw);
        let type_name = native.type_name(ty);
        let info = native.object_info(ty);
        tracing::debug!(
            target: "tether::member",
            type_name = %type_name,
            introspected = info.is_some(),
            parent = ?parent,
            "type binding created"
        );
        self.bindings.push(TypeBinding::new(id, ty, type_name, info, parent));
        tags.attach_type(ty, id);
        Ok(id)
    }

    /// Look up a binding
    pub fn get(&self, id: BindingId) -> Option<&TypeBinding> {
        self.bindings.get(id.index())
    }

    /// Number of bindings
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if no binding exists
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Clear the tag slot of every bound type descriptor
    pub fn detach_types(&self, tags: &TagStore) {
        for binding in &self.bindings {
            if tags.lookup_type(binding.native_type) == Some(binding.id) {
                tags.detach_type(binding.native_type);
            }
        }
    }

    fn binding(&self, id: BindingId) -> &TypeBinding {
        &self.bindings[id.index()]
    }

    fn binding_mut(&mut self, id: BindingId) -> &mut TypeBinding {
        &mut self.bindings[id.index()]
    }

    fn intern(&mut self, name: &str) -> BridgeResult<Atom> {
        self.interner
            .intern(name)
            .ok_or(BridgeError::OutOfMemory("member name"))
    }
}
