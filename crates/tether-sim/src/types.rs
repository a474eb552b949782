//! Type registration for the simulated object system

use crate::native::SimNative;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tether_core::native::{InterfaceInfo, ObjectInfo};
use tether_core::{NativeType, Value};

/// Namespace every simulated type is registered under
pub const NAMESPACE: &str = "Sim";

pub(crate) struct SignalDecl {
    pub(crate) id: u32,
    pub(crate) name: String,
    pub(crate) n_params: usize,
    pub(crate) has_return: bool,
}

pub(crate) struct TypeRecord {
    pub(crate) name: String,
    pub(crate) parent: Option<NativeType>,
    pub(crate) interfaces: Vec<NativeType>,
    pub(crate) is_abstract: bool,
    pub(crate) initially_unowned: bool,
    pub(crate) singleton: bool,
    pub(crate) object_info: Option<Arc<ObjectInfo>>,
    pub(crate) interface_info: Option<Arc<InterfaceInfo>>,
    pub(crate) vfunc_addresses: FxHashMap<String, usize>,
    pub(crate) signals: Vec<SignalDecl>,
    pub(crate) field_values: FxHashMap<String, Value>,
    pub(crate) tag: Option<u64>,
}

impl TypeRecord {
    pub(crate) fn placeholder(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parent: None,
            interfaces: Vec::new(),
            is_abstract: false,
            initially_unowned: false,
            singleton: false,
            object_info: None,
            interface_info: None,
            vfunc_addresses: FxHashMap::default(),
            signals: Vec::new(),
            field_values: FxHashMap::default(),
            tag: None,
        }
    }
}

/// Builder for a class registered with [`SimNative::class`]
///
/// The type id is allocated up front so introspection data can refer to it.
pub struct ClassBuilder<'a> {
    native: &'a SimNative,
    ty: NativeType,
    record: TypeRecord,
    signals: Vec<(String, usize, bool)>,
}

impl<'a> ClassBuilder<'a> {
    pub(crate) fn new(native: &'a SimNative, ty: NativeType, name: &str) -> Self {
        Self {
            native,
            ty,
            record: TypeRecord::placeholder(name),
            signals: Vec::new(),
        }
    }

    /// Type id this builder registers
    pub fn id(&self) -> NativeType {
        self.ty
    }

    /// Derive from `parent`
    pub fn parent(mut self, parent: NativeType) -> Self {
        self.record.parent = Some(parent);
        self
    }

    /// Implement `iface` at runtime, whether or not the metadata says so
    pub fn implements(mut self, iface: NativeType) -> Self {
        self.record.interfaces.push(iface);
        self
    }

    /// Attach introspection data built from an empty [`ObjectInfo`]
    pub fn info(mut self, build: impl FnOnce(ObjectInfo) -> ObjectInfo) -> Self {
        let info = build(ObjectInfo::new(NAMESPACE, self.record.name.clone(), self.ty));
        for iface in &info.interfaces {
            if !self.record.interfaces.contains(iface) {
                self.record.interfaces.push(*iface);
            }
        }
        self.record.object_info = Some(Arc::new(info));
        self
    }

    /// Mark the type abstract
    pub fn abstract_type(mut self) -> Self {
        self.record.is_abstract = true;
        self
    }

    /// New instances start with a floating reference
    pub fn initially_unowned(mut self) -> Self {
        self.record.initially_unowned = true;
        self
    }

    /// The constructor hands back the same live instance every time
    pub fn singleton(mut self) -> Self {
        self.record.singleton = true;
        self
    }

    /// Address the type installs for a virtual function slot
    pub fn vfunc_address(mut self, slot: &str, address: usize) -> Self {
        self.record.vfunc_addresses.insert(slot.to_string(), address);
        self
    }

    /// Declare a signal
    pub fn signal(mut self, name: &str, n_params: usize, has_return: bool) -> Self {
        self.signals.push((name.to_string(), n_params, has_return));
        self
    }

    /// Value every instance reports for a field
    pub fn field_value(mut self, name: &str, value: Value) -> Self {
        self.record.field_values.insert(name.to_string(), value);
        self
    }

    /// Register the type
    pub fn build(self) -> NativeType {
        let Self {
            native,
            ty,
            mut record,
            signals,
        } = self;
        record.signals = signals
            .into_iter()
            .map(|(name, n_params, has_return)| SignalDecl {
                id: native.next_signal_id(),
                name,
                n_params,
                has_return,
            })
            .collect();
        native.install_type(ty, record);
        ty
    }
}

/// Builder for an interface registered with [`SimNative::interface`]
pub struct InterfaceBuilder<'a> {
    native: &'a SimNative,
    ty: NativeType,
    record: TypeRecord,
}

impl<'a> InterfaceBuilder<'a> {
    pub(crate) fn new(native: &'a SimNative, ty: NativeType, name: &str) -> Self {
        Self {
            native,
            ty,
            record: TypeRecord::placeholder(name),
        }
    }

    /// Type id this builder registers
    pub fn id(&self) -> NativeType {
        self.ty
    }

    /// Attach introspection data built from an empty [`InterfaceInfo`]
    pub fn info(mut self, build: impl FnOnce(InterfaceInfo) -> InterfaceInfo) -> Self {
        let info = build(InterfaceInfo::new(NAMESPACE, self.record.name.clone(), self.ty));
        self.record.interface_info = Some(Arc::new(info));
        self
    }

    /// Register the interface
    pub fn build(self) -> NativeType {
        self.native.install_type(self.ty, self.record);
        self.ty
    }
}
