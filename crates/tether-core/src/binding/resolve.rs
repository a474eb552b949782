//! Member resolution
//!
//! Lookups hold the registry mutably and call into the native system's
//! introspection queries, which never re-enter the bridge.

use super::canonical::{canonical_property_name, validate_member_name};
use super::{Accessor, BindingId, BindingRegistry, Resolution};
use crate::error::{BridgeError, BridgeResult};
use crate::native::{FieldInfo, FunctionInfo, NativeSystem, NativeType, ObjectInfo, PropertyInfo, VFuncInfo};
use std::sync::Arc;

impl BindingRegistry {
    /// Resolve `name` on one binding, without consulting its parents.
    ///
    /// The first call scans the metadata; later calls return the memoized
    /// outcome, including [`Resolution::Absent`].
    pub fn resolve(
        &mut self,
        native: &dyn NativeSystem,
        id: BindingId,
        name: &str,
        vfunc_prefix: &str,
    ) -> BridgeResult<Resolution> {
        validate_member_name(name)?;
        let atom = self.intern(name)?;

        let binding = self.binding_mut(id);
        if let Some(cached) = binding.members.get(&atom) {
            return Ok(cached.clone());
        }
        binding.scans += 1;

        let ty = binding.native_type;
        let resolution = match binding.info.clone() {
            Some(info) => resolve_with_info(native, ty, &info, name, vfunc_prefix),
            None => resolve_no_info(native, ty, name, true),
        };

        let binding = self.binding_mut(id);
        binding
            .members
            .try_reserve(1)
            .map_err(|_| BridgeError::OutOfMemory("member resolution"))?;
        match &resolution {
            Resolution::Defined(Accessor::Property(prop)) => {
                binding
                    .properties
                    .try_reserve(1)
                    .map_err(|_| BridgeError::OutOfMemory("property spec"))?;
                binding.properties.insert(atom, Arc::clone(prop));
            }
            Resolution::Defined(Accessor::Field(field)) => {
                binding
                    .fields
                    .try_reserve(1)
                    .map_err(|_| BridgeError::OutOfMemory("field info"))?;
                binding.fields.insert(atom, Arc::clone(field));
            }
            _ => {}
        }
        binding.members.insert(atom, resolution.clone());

        tracing::debug!(
            target: "tether::member",
            type_name = %binding.type_name,
            member = name,
            resolution = resolution.kind(),
            "member resolved"
        );
        Ok(resolution)
    }

    /// Resolve `name` on a binding and then its ancestors, returning the
    /// first binding that defines it.
    pub fn lookup(
        &mut self,
        native: &dyn NativeSystem,
        id: BindingId,
        name: &str,
        vfunc_prefix: &str,
    ) -> BridgeResult<Option<(BindingId, Accessor)>> {
        let mut current = Some(id);
        while let Some(binding) = current {
            if let Resolution::Defined(accessor) = self.resolve(native, binding, name, vfunc_prefix)? {
                return Ok(Some((binding, accessor)));
            }
            current = self.binding(binding).parent;
        }
        Ok(None)
    }

    /// Property spec for a managed-side property name, cached per binding
    pub fn find_param_spec(
        &mut self,
        native: &dyn NativeSystem,
        id: BindingId,
        name: &str,
    ) -> BridgeResult<Arc<PropertyInfo>> {
        validate_member_name(name)?;
        let atom = self.intern(name)?;

        let binding = self.binding_mut(id);
        if let Some(spec) = binding.properties.get(&atom) {
            return Ok(Arc::clone(spec));
        }

        let canonical = canonical_property_name(name);
        let spec = native
            .find_property(binding.native_type, &canonical)
            .ok_or_else(|| BridgeError::NonexistentMember {
                type_name: binding.type_name.clone(),
                member: name.to_string(),
            })?;

        binding
            .properties
            .try_reserve(1)
            .map_err(|_| BridgeError::OutOfMemory("property spec"))?;
        binding.properties.insert(atom, Arc::clone(&spec));
        Ok(spec)
    }

    /// Field info cached on a binding or one of its ancestors
    pub fn cached_field(&self, id: BindingId, name: &str) -> Option<Arc<FieldInfo>> {
        let atom = self.interner.get(name)?;
        let mut current = Some(id);
        while let Some(binding) = current {
            let binding = self.binding(binding);
            if let Some(field) = binding.fields.get(&atom) {
                return Some(Arc::clone(field));
            }
            current = binding.parent;
        }
        None
    }

    /// Declared field of any type on a binding or its ancestors, even one
    /// the resolver refuses to expose
    pub fn declared_field(&self, id: BindingId, name: &str) -> Option<Arc<FieldInfo>> {
        let mut current = Some(id);
        while let Some(binding) = current {
            let binding = self.binding(binding);
            if let Some(field) = binding.info.as_ref().and_then(|info| info.find_field(name)) {
                return Some(Arc::clone(field));
            }
            current = binding.parent;
        }
        None
    }
}

fn resolve_with_info(
    native: &dyn NativeSystem,
    ty: NativeType,
    info: &ObjectInfo,
    name: &str,
    vfunc_prefix: &str,
) -> Resolution {
    if let Some(slot) = name.strip_prefix(vfunc_prefix).filter(|_| !vfunc_prefix.is_empty()) {
        if let Some((vfunc, defined_by_parent)) = find_vfunc_on_parents(native, info, slot) {
            // Unchanged overrides are left to the parent binding
            if defined_by_parent && is_vfunc_unchanged(native, ty, &vfunc) {
                return Resolution::Absent;
            }
            return Resolution::Defined(Accessor::VFunc(vfunc));
        }
    }

    if let Some(prop) = find_object_property(native, info, name) {
        return Resolution::Defined(Accessor::Property(prop));
    }

    if let Some(field) = info
        .find_field(name)
        .filter(|f| f.is_readable() && !f.type_tag.is_composite())
    {
        return Resolution::Defined(Accessor::Field(Arc::clone(field)));
    }

    match find_method_using_interfaces(native, info, name) {
        Some(method) if method.is_method() => Resolution::Defined(Accessor::Method(method)),
        Some(_) => Resolution::Absent,
        None => resolve_no_info(native, ty, name, false),
    }
}

/// Resolution through the interfaces a type implements at runtime
fn resolve_no_info(native: &dyn NativeSystem, ty: NativeType, name: &str, consider_properties: bool) -> Resolution {
    let canonical = consider_properties.then(|| canonical_property_name(name));

    for iface in native.type_interfaces(ty) {
        let Some(iface_info) = native.interface_info(iface) else {
            continue;
        };

        if let Some(method) = iface_info.find_method(name).filter(|m| m.is_method()) {
            return Resolution::Defined(Accessor::Method(Arc::clone(method)));
        }

        if let Some(prop) = canonical.as_deref().and_then(|c| iface_info.find_property(c)) {
            return Resolution::Defined(Accessor::Property(Arc::clone(prop)));
        }
    }
    Resolution::Absent
}

/// A virtual function slot visible from `info`, and whether it was found
/// on an ancestor rather than on the type or its declared interfaces
fn find_vfunc_on_parents(
    native: &dyn NativeSystem,
    info: &ObjectInfo,
    name: &str,
) -> Option<(Arc<VFuncInfo>, bool)> {
    if let Some(vfunc) = info.find_vfunc(name) {
        return Some((Arc::clone(vfunc), false));
    }
    for iface in &info.interfaces {
        if let Some(vfunc) = native
            .interface_info(*iface)
            .and_then(|i| i.find_vfunc(name).cloned())
        {
            return Some((vfunc, false));
        }
    }

    let mut parent = native.type_parent(info.gtype);
    while let Some(ty) = parent {
        if let Some(vfunc) = native.object_info(ty).and_then(|i| i.find_vfunc(name).cloned()) {
            return Some((vfunc, true));
        }
        parent = native.type_parent(ty);
    }
    None
}

fn is_vfunc_unchanged(native: &dyn NativeSystem, ty: NativeType, vfunc: &VFuncInfo) -> bool {
    let Some(parent) = native.type_parent(ty) else {
        return false;
    };
    match (native.vfunc_address(vfunc, ty), native.vfunc_address(vfunc, parent)) {
        (Some(own), Some(inherited)) => own == inherited,
        _ => false,
    }
}

fn find_object_property(native: &dyn NativeSystem, info: &ObjectInfo, name: &str) -> Option<Arc<PropertyInfo>> {
    let canonical = canonical_property_name(name);
    if let Some(prop) = info.find_property(&canonical) {
        return Some(Arc::clone(prop));
    }
    info.interfaces.iter().find_map(|iface| {
        native
            .interface_info(*iface)
            .and_then(|i| i.find_property(&canonical).cloned())
    })
}

fn find_method_using_interfaces(
    native: &dyn NativeSystem,
    info: &ObjectInfo,
    name: &str,
) -> Option<Arc<FunctionInfo>> {
    if let Some(method) = info.find_method(name) {
        return Some(Arc::clone(method));
    }
    info.interfaces.iter().find_map(|iface| {
        native
            .interface_info(*iface)
            .and_then(|i| i.find_method(name).cloned())
    })
}
