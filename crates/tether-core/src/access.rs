//! Member access through a wrapper
//!
//! Every operation first checks that the native object is still usable;
//! access after disposal reports [`BridgeError::ObjectDisposed`] and leaves
//! the pairing alone.

use crate::binding::{Accessor, BindingId};
use crate::closure::ClosureBridge;
use crate::context::Context;
use crate::directory::Handle;
use crate::error::{BridgeError, BridgeResult};
use crate::managed::ManagedObject;
use crate::native::{FieldInfo, NativePtr, NativeType, PropertyInfo, SignalInfo, Value};
use std::sync::Arc;

/// A live pairing resolved for one access
struct Target {
    handle: Handle,
    binding: BindingId,
    ptr: NativePtr,
    ty: NativeType,
    type_name: String,
}

impl Context {
    fn target(&self, wrapper: ManagedObject, action: &'static str) -> BridgeResult<Target> {
        let handle = self.handle_for(wrapper)?;
        let state = self.inner.state.borrow();
        let inst = state
            .instances
            .get(handle)
            .ok_or(BridgeError::NotAWrapper(wrapper.as_u64()))?;
        Ok(Target {
            handle,
            binding: inst.binding(),
            ptr: inst.checked_ptr(action)?,
            ty: inst.native_type(),
            type_name: inst.type_name().to_string(),
        })
    }

    /// Resolve a member on a wrapper, walking the binding's ancestors
    pub fn lookup(&self, wrapper: ManagedObject, name: &str) -> BridgeResult<Option<Accessor>> {
        let handle = self.handle_for(wrapper)?;
        let mut state = self.inner.state.borrow_mut();
        let binding = state
            .instances
            .get(handle)
            .map(|inst| inst.binding())
            .ok_or(BridgeError::NotAWrapper(wrapper.as_u64()))?;
        let found = state
            .bindings
            .lookup(&*self.inner.native, binding, name, &self.inner.options.vfunc_prefix)?;
        Ok(found.map(|(_, accessor)| accessor))
    }

    // ===== Properties =====

    /// Read a property.
    ///
    /// Properties implemented by the managed side and unreadable properties
    /// read as [`Value::Undefined`].
    pub fn get_property(&self, wrapper: ManagedObject, name: &str) -> BridgeResult<Value> {
        let target = self.target(wrapper, "get any property from")?;
        let spec = self.param_spec(&target, name)?;
        if spec.is_custom() || !spec.is_readable() {
            return Ok(Value::Undefined);
        }

        tracing::trace!(target: "tether::member", type_name = %target.type_name, property = %spec.name, "reading native property");
        Ok(self.inner.native.get_property(target.ptr, &spec.name)?)
    }

    /// Write a property
    pub fn set_property(&self, wrapper: ManagedObject, name: &str, value: Value) -> BridgeResult<()> {
        let target = self.target(wrapper, "set any property on")?;
        let spec = self.param_spec(&target, name)?;
        if spec.is_custom() {
            return Ok(());
        }
        if !spec.is_writable() {
            return Err(BridgeError::ReadOnlyMember {
                type_name: target.type_name,
                member: spec.name.clone(),
            });
        }

        tracing::trace!(target: "tether::member", type_name = %target.type_name, property = %spec.name, "writing native property");
        Ok(self.inner.native.set_property(target.ptr, &spec.name, value)?)
    }

    fn param_spec(&self, target: &Target, name: &str) -> BridgeResult<Arc<PropertyInfo>> {
        let mut state = self.inner.state.borrow_mut();
        state.bindings.find_param_spec(&*self.inner.native, target.binding, name)
    }

    // ===== Fields =====

    /// Read an instance field with a simple type
    pub fn get_field(&self, wrapper: ManagedObject, name: &str) -> BridgeResult<Value> {
        let target = self.target(wrapper, "get any property from")?;
        let field = self.field_info(&target, name)?;
        Ok(self.inner.native.get_field(target.ptr, &field)?)
    }

    /// Write an instance field.
    ///
    /// Field writes are not supported: writable fields report
    /// [`BridgeError::Unimplemented`], the rest are read-only.
    pub fn set_field(&self, wrapper: ManagedObject, name: &str, _value: Value) -> BridgeResult<()> {
        let target = self.target(wrapper, "set any property on")?;
        let field = self.field_info(&target, name)?;
        if field.is_writable() {
            tracing::warn!(
                target: "tether::member",
                type_name = %target.type_name,
                field = %field.name,
                "field is writable, but setting it is not implemented"
            );
            return Err(BridgeError::Unimplemented {
                type_name: target.type_name,
                member: field.name.clone(),
            });
        }
        Err(BridgeError::ReadOnlyMember {
            type_name: target.type_name,
            member: field.name.clone(),
        })
    }

    fn field_info(&self, target: &Target, name: &str) -> BridgeResult<Arc<FieldInfo>> {
        let mut state = self.inner.state.borrow_mut();
        if let Some(field) = state.bindings.cached_field(target.binding, name) {
            return Ok(field);
        }

        let found = state
            .bindings
            .lookup(&*self.inner.native, target.binding, name, &self.inner.options.vfunc_prefix)?;
        if let Some((_, Accessor::Field(field))) = found {
            return Ok(field);
        }

        match state.bindings.declared_field(target.binding, name) {
            Some(field) if field.type_tag.is_composite() => Err(BridgeError::UnsupportedFieldType {
                member: field.name.clone(),
                tag: field.type_tag,
            }),
            _ => Err(BridgeError::NonexistentMember {
                type_name: target.type_name.clone(),
                member: name.to_string(),
            }),
        }
    }

    // ===== Methods =====

    /// Call a method or virtual function by member name
    pub fn call_method(&self, wrapper: ManagedObject, name: &str, args: &[Value]) -> BridgeResult<Value> {
        let target = self.target(wrapper, "call any method on")?;
        let found = {
            let mut state = self.inner.state.borrow_mut();
            state
                .bindings
                .lookup(&*self.inner.native, target.binding, name, &self.inner.options.vfunc_prefix)?
        };

        let native = &self.inner.native;
        match found.map(|(_, accessor)| accessor) {
            Some(Accessor::Method(method)) => Ok(native.invoke(target.ptr, &method, args)?),
            Some(Accessor::VFunc(vfunc)) => Ok(native.invoke(target.ptr, &vfunc.as_function(), args)?),
            _ => Err(BridgeError::NonexistentMember {
                type_name: target.type_name,
                member: name.to_string(),
            }),
        }
    }

    // ===== Signals =====

    /// Connect a managed callback to a signal, returning the handler id
    pub fn connect(&self, wrapper: ManagedObject, signal: &str, callback: ManagedObject) -> BridgeResult<u64> {
        self.connect_impl(wrapper, signal, callback, false)
    }

    /// Connect a managed callback that runs after the default handler
    pub fn connect_after(&self, wrapper: ManagedObject, signal: &str, callback: ManagedObject) -> BridgeResult<u64> {
        self.connect_impl(wrapper, signal, callback, true)
    }

    fn connect_impl(&self, wrapper: ManagedObject, signal: &str, callback: ManagedObject, after: bool) -> BridgeResult<u64> {
        let target = self.target(wrapper, "connect to any signal on")?;
        let info = self.signal_info(&target, signal)?;

        let bridge = ClosureBridge::new(callback, Some(info.id));
        self.associate_closure_handle(target.handle, Arc::clone(&bridge))?;

        let id = match self.inner.native.connect(target.ptr, &info, Arc::clone(&bridge), after) {
            Ok(id) => id,
            Err(err) => {
                bridge.invalidate();
                return Err(err.into());
            }
        };
        tracing::debug!(target: "tether::member", type_name = %target.type_name, signal, handler = id, after, "signal connected");
        Ok(id)
    }

    /// Emit a signal with already marshaled arguments
    pub fn emit(&self, wrapper: ManagedObject, signal: &str, args: &[Value]) -> BridgeResult<Value> {
        let target = self.target(wrapper, "emit any signal on")?;
        let info = self.signal_info(&target, signal)?;
        if args.len() != info.n_params {
            return Err(BridgeError::SignalArity {
                signal: signal.to_string(),
                type_name: target.type_name,
                expected: info.n_params,
                got: args.len(),
            });
        }
        Ok(self.inner.native.emit(target.ptr, &info, args)?)
    }

    fn signal_info(&self, target: &Target, signal: &str) -> BridgeResult<SignalInfo> {
        self.inner
            .native
            .lookup_signal(target.ty, signal)
            .ok_or_else(|| BridgeError::NoSuchSignal {
                signal: signal.to_string(),
                type_name: target.type_name.clone(),
            })
    }

    // ===== Diagnostics =====

    /// Human readable description of a wrapper
    pub fn describe(&self, wrapper: ManagedObject) -> BridgeResult<String> {
        let handle = self.handle_for(wrapper)?;
        let state = self.inner.state.borrow();
        let inst = state
            .instances
            .get(handle)
            .ok_or(BridgeError::NotAWrapper(wrapper.as_u64()))?;
        let kind = if inst.lifecycle().native_disposed() {
            "object (FINALIZED)"
        } else {
            "object"
        };
        Ok(format!("[{kind} instance wrapper {} native@{}]", inst.type_name(), inst.address()))
    }

    /// The native object behind a wrapper, `None` once disposed or released
    pub fn native_ptr(&self, wrapper: ManagedObject) -> BridgeResult<Option<NativePtr>> {
        let handle = self.handle_for(wrapper)?;
        let state = self.inner.state.borrow();
        let inst = state
            .instances
            .get(handle)
            .ok_or(BridgeError::NotAWrapper(wrapper.as_u64()))?;
        Ok(inst.checked_ptr("access").ok())
    }
}
