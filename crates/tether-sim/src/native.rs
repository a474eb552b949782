//! In-process reference-counted object system
//!
//! Models the parts of a native object runtime the bridge depends on:
//! refcounts with floating references, a single toggle reference per
//! object, disposal watches, per-object and per-type tag slots, signals and
//! introspection. Notifications are always delivered with the registry lock
//! released, so a notified bridge may call straight back in.

use crate::types::{ClassBuilder, InterfaceBuilder, TypeRecord};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tether_core::native::{FieldInfo, FunctionInfo, InterfaceInfo, ObjectInfo, PropertyInfo, SignalInfo, VFuncInfo};
use tether_core::{ClosureBridge, NativeError, NativeEvents, NativePtr, NativeSystem, NativeType, Value};

/// First address handed out for objects
const FIRST_OBJECT_ADDRESS: u64 = 0x1000;

/// Distance between consecutive object addresses
const OBJECT_STRIDE: u64 = 0x40;

/// A recorded method or virtual function call
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Receiver
    pub ptr: NativePtr,
    /// Function name
    pub name: String,
    /// Arguments as passed
    pub args: Vec<Value>,
}

/// A recorded signal emission
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    /// Emitter
    pub ptr: NativePtr,
    /// Signal name
    pub signal: String,
    /// Detail, if emitted as `name::detail`
    pub detail: Option<String>,
    /// Arguments as passed
    pub args: Vec<Value>,
    /// Handlers connected at emission time
    pub handlers: usize,
}

struct Handler {
    id: u64,
    signal_id: u32,
    closure: Arc<ClosureBridge>,
}

struct ObjectRecord {
    ty: NativeType,
    ref_count: u32,
    floating: bool,
    disposed: bool,
    freed: bool,
    toggle: Option<Arc<dyn NativeEvents>>,
    dispose_watch: Option<Arc<dyn NativeEvents>>,
    tag: Option<u64>,
    properties: FxHashMap<String, Value>,
    handlers: Vec<Handler>,
}

impl ObjectRecord {
    fn is_live(&self) -> bool {
        !self.freed
    }
}

#[derive(Default)]
struct Registry {
    types: Vec<TypeRecord>,
    objects: FxHashMap<NativePtr, ObjectRecord>,
    singletons: FxHashMap<NativeType, NativePtr>,
    next_address: u64,
    next_handler: u64,
    invocations: Vec<Invocation>,
    emissions: Vec<Emission>,
}

impl Registry {
    fn ty(&self, ty: NativeType) -> Option<&TypeRecord> {
        usize::try_from(ty.as_u64() - 1).ok().and_then(|i| self.types.get(i))
    }

    fn ty_mut(&mut self, ty: NativeType) -> Option<&mut TypeRecord> {
        usize::try_from(ty.as_u64() - 1).ok().and_then(move |i| self.types.get_mut(i))
    }

    fn live_mut(&mut self, ptr: NativePtr) -> Option<&mut ObjectRecord> {
        self.objects.get_mut(&ptr).filter(|obj| obj.is_live())
    }

    /// `ty` followed by its ancestors
    fn lineage(&self, ty: NativeType) -> Vec<NativeType> {
        let mut chain = Vec::new();
        let mut current = Some(ty);
        while let Some(t) = current {
            chain.push(t);
            current = self.ty(t).and_then(|r| r.parent);
        }
        chain
    }

    fn interfaces_of(&self, ty: NativeType) -> Vec<NativeType> {
        let mut out = Vec::new();
        for t in self.lineage(ty) {
            if let Some(record) = self.ty(t) {
                for iface in &record.interfaces {
                    if !out.contains(iface) {
                        out.push(*iface);
                    }
                }
            }
        }
        out
    }
}

/// What to deliver once the registry lock is released
enum Followup {
    Nothing,
    Toggle(Arc<dyn NativeEvents>, bool),
    Dispose(Option<Arc<dyn NativeEvents>>, Vec<Arc<ClosureBridge>>),
}

/// Simulated reference-counted object system
pub struct SimNative {
    registry: Mutex<Registry>,
    next_signal: AtomicU32,
}

impl SimNative {
    /// Create an empty object system
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                next_address: FIRST_OBJECT_ADDRESS,
                next_handler: 1,
                ..Registry::default()
            }),
            next_signal: AtomicU32::new(1),
        }
    }

    // ===== Type registration =====

    /// Start registering a class
    pub fn class(&self, name: &str) -> ClassBuilder<'_> {
        let ty = self.reserve_type(name);
        ClassBuilder::new(self, ty, name)
    }

    /// Start registering an interface
    pub fn interface(&self, name: &str) -> InterfaceBuilder<'_> {
        let ty = self.reserve_type(name);
        InterfaceBuilder::new(self, ty, name)
    }

    fn reserve_type(&self, name: &str) -> NativeType {
        let mut registry = self.registry.lock();
        registry.types.push(TypeRecord::placeholder(name));
        let raw = registry.types.len() as u64;
        NativeType::from_raw(raw).unwrap_or_else(|| unreachable!("type ids start at one"))
    }

    pub(crate) fn install_type(&self, ty: NativeType, mut record: TypeRecord) {
        let mut registry = self.registry.lock();
        if let Some(slot) = registry.ty_mut(ty) {
            record.tag = slot.tag.take();
            *slot = record;
        }
    }

    pub(crate) fn next_signal_id(&self) -> u32 {
        self.next_signal.fetch_add(1, Ordering::Relaxed)
    }

    // ===== Object helpers =====

    /// Create an instance the way native code would, owning one reference
    pub fn instantiate(&self, ty: NativeType) -> NativePtr {
        let mut registry = self.registry.lock();
        Self::allocate(&mut registry, ty)
    }

    fn allocate(registry: &mut Registry, ty: NativeType) -> NativePtr {
        let floating = registry.ty(ty).is_some_and(|r| r.initially_unowned);
        let raw = registry.next_address;
        registry.next_address += OBJECT_STRIDE;
        let ptr = NativePtr::from_raw(raw).unwrap_or_else(|| unreachable!("addresses start above zero"));
        registry.objects.insert(
            ptr,
            ObjectRecord {
                ty,
                ref_count: 1,
                floating,
                disposed: false,
                freed: false,
                toggle: None,
                dispose_watch: None,
                tag: None,
                properties: FxHashMap::default(),
                handlers: Vec::new(),
            },
        );
        ptr
    }

    /// Run disposal without dropping a reference, like `run_dispose()`
    pub fn run_dispose(&self, ptr: NativePtr) {
        let (watch, closures) = {
            let mut registry = self.registry.lock();
            let Some(obj) = registry.live_mut(ptr) else {
                return;
            };
            if obj.disposed {
                return;
            }
            obj.disposed = true;
            let closures = obj.handlers.drain(..).map(|h| h.closure).collect::<Vec<_>>();
            (obj.dispose_watch.take(), closures)
        };
        Self::deliver(ptr, Followup::Dispose(watch, closures));
    }

    /// Free an object regardless of its refcount, as buggy native code might
    pub fn destroy_unchecked(&self, ptr: NativePtr) {
        let mut registry = self.registry.lock();
        if let Some(obj) = registry.objects.get_mut(&ptr) {
            obj.ref_count = 0;
            obj.disposed = true;
            obj.freed = true;
            obj.toggle = None;
            obj.dispose_watch = None;
        }
    }

    /// Disconnect a signal handler, invalidating its closure
    pub fn disconnect(&self, ptr: NativePtr, handler_id: u64) -> bool {
        let closure = {
            let mut registry = self.registry.lock();
            let Some(obj) = registry.live_mut(ptr) else {
                return false;
            };
            let Some(pos) = obj.handlers.iter().position(|h| h.id == handler_id) else {
                return false;
            };
            obj.handlers.remove(pos).closure
        };
        closure.invalidate();
        true
    }

    /// Whether the object has been disposed
    pub fn is_disposed(&self, ptr: NativePtr) -> bool {
        self.registry.lock().objects.get(&ptr).is_some_and(|o| o.disposed)
    }

    /// Whether the object has been freed
    pub fn is_freed(&self, ptr: NativePtr) -> bool {
        self.registry.lock().objects.get(&ptr).is_none_or(|o| o.freed)
    }

    /// Whether a toggle reference is installed
    pub fn has_toggle_ref(&self, ptr: NativePtr) -> bool {
        self.registry.lock().objects.get(&ptr).is_some_and(|o| o.toggle.is_some())
    }

    /// Whether a disposal watch is installed
    pub fn is_watched(&self, ptr: NativePtr) -> bool {
        self.registry.lock().objects.get(&ptr).is_some_and(|o| o.dispose_watch.is_some())
    }

    /// Connected signal handlers
    pub fn handler_count(&self, ptr: NativePtr) -> usize {
        self.registry.lock().objects.get(&ptr).map_or(0, |o| o.handlers.len())
    }

    /// Objects not yet freed
    pub fn live_objects(&self) -> usize {
        self.registry.lock().objects.values().filter(|o| o.is_live()).count()
    }

    /// Calls recorded so far
    pub fn invocations(&self) -> Vec<Invocation> {
        self.registry.lock().invocations.clone()
    }

    /// Emissions recorded so far
    pub fn emissions(&self) -> Vec<Emission> {
        self.registry.lock().emissions.clone()
    }

    // ===== Refcount core =====

    fn release(&self, ptr: NativePtr, drop_toggle: bool) {
        let followup = {
            let mut registry = self.registry.lock();
            let Some(obj) = registry.live_mut(ptr) else {
                tracing::error!(target: "tether_sim", %ptr, "release of a freed object");
                return;
            };
            if drop_toggle {
                obj.toggle = None;
            }
            if obj.ref_count == 0 {
                tracing::error!(target: "tether_sim", %ptr, "refcount underflow");
                return;
            }
            obj.ref_count -= 1;
            match (obj.ref_count, obj.toggle.clone()) {
                (1, Some(toggle)) => Followup::Toggle(toggle, true),
                (0, _) => {
                    let watch = if obj.disposed { None } else { obj.dispose_watch.take() };
                    obj.disposed = true;
                    obj.freed = true;
                    obj.tag = None;
                    obj.toggle = None;
                    obj.dispose_watch = None;
                    let closures = obj.handlers.drain(..).map(|h| h.closure).collect();
                    Followup::Dispose(watch, closures)
                }
                _ => Followup::Nothing,
            }
        };
        Self::deliver(ptr, followup);
    }

    fn deliver(ptr: NativePtr, followup: Followup) {
        match followup {
            Followup::Nothing => {}
            Followup::Toggle(events, is_last_ref) => events.toggle_notify(ptr, is_last_ref),
            Followup::Dispose(watch, closures) => {
                if let Some(watch) = watch {
                    watch.dispose_notify(ptr);
                }
                for closure in closures {
                    closure.invalidate();
                }
            }
        }
    }
}

impl Default for SimNative {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeSystem for SimNative {
    fn ref_object(&self, ptr: NativePtr) {
        let followup = {
            let mut registry = self.registry.lock();
            let Some(obj) = registry.live_mut(ptr) else {
                tracing::error!(target: "tether_sim", %ptr, "ref of a freed object");
                return;
            };
            obj.ref_count += 1;
            match (obj.ref_count, obj.toggle.clone()) {
                (2, Some(toggle)) => Followup::Toggle(toggle, false),
                _ => Followup::Nothing,
            }
        };
        Self::deliver(ptr, followup);
    }

    fn unref_object(&self, ptr: NativePtr) {
        self.release(ptr, false);
    }

    fn ref_sink(&self, ptr: NativePtr) {
        let sunk = {
            let mut registry = self.registry.lock();
            match registry.live_mut(ptr) {
                Some(obj) if obj.floating => {
                    obj.floating = false;
                    true
                }
                _ => false,
            }
        };
        if !sunk {
            self.ref_object(ptr);
        }
    }

    fn is_floating(&self, ptr: NativePtr) -> bool {
        self.registry.lock().objects.get(&ptr).is_some_and(|o| o.floating)
    }

    fn ref_count(&self, ptr: NativePtr) -> u32 {
        self.registry.lock().objects.get(&ptr).map_or(0, |o| o.ref_count)
    }

    fn add_toggle_ref(&self, ptr: NativePtr, events: Arc<dyn NativeEvents>) {
        let mut registry = self.registry.lock();
        if let Some(obj) = registry.live_mut(ptr) {
            if obj.toggle.is_some() {
                tracing::warn!(target: "tether_sim", %ptr, "second toggle reference replaces the first");
            }
            obj.ref_count += 1;
            obj.toggle = Some(events);
        }
    }

    fn remove_toggle_ref(&self, ptr: NativePtr) {
        self.release(ptr, true);
    }

    fn watch_dispose(&self, ptr: NativePtr, events: Arc<dyn NativeEvents>) {
        if let Some(obj) = self.registry.lock().live_mut(ptr) {
            obj.dispose_watch = Some(events);
        }
    }

    fn unwatch_dispose(&self, ptr: NativePtr) {
        if let Some(obj) = self.registry.lock().live_mut(ptr) {
            obj.dispose_watch = None;
        }
    }

    fn object_tag(&self, ptr: NativePtr) -> Option<u64> {
        self.registry.lock().objects.get(&ptr).and_then(|o| o.tag)
    }

    fn set_object_tag(&self, ptr: NativePtr, tag: Option<u64>) {
        if let Some(obj) = self.registry.lock().objects.get_mut(&ptr) {
            obj.tag = tag;
        }
    }

    fn type_tag(&self, ty: NativeType) -> Option<u64> {
        self.registry.lock().ty(ty).and_then(|r| r.tag)
    }

    fn set_type_tag(&self, ty: NativeType, tag: Option<u64>) {
        if let Some(record) = self.registry.lock().ty_mut(ty) {
            record.tag = tag;
        }
    }

    fn type_of(&self, ptr: NativePtr) -> NativeType {
        let registry = self.registry.lock();
        match registry.objects.get(&ptr) {
            Some(obj) => obj.ty,
            None => panic!("type_of: {ptr} was never allocated by this object system"),
        }
    }

    fn type_name(&self, ty: NativeType) -> String {
        self.registry
            .lock()
            .ty(ty)
            .map_or_else(|| "<invalid>".to_string(), |r| r.name.clone())
    }

    fn type_parent(&self, ty: NativeType) -> Option<NativeType> {
        self.registry.lock().ty(ty).and_then(|r| r.parent)
    }

    fn type_interfaces(&self, ty: NativeType) -> Vec<NativeType> {
        self.registry.lock().interfaces_of(ty)
    }

    fn is_abstract(&self, ty: NativeType) -> bool {
        self.registry.lock().ty(ty).is_some_and(|r| r.is_abstract)
    }

    fn object_info(&self, ty: NativeType) -> Option<Arc<ObjectInfo>> {
        self.registry.lock().ty(ty).and_then(|r| r.object_info.clone())
    }

    fn interface_info(&self, ty: NativeType) -> Option<Arc<InterfaceInfo>> {
        self.registry.lock().ty(ty).and_then(|r| r.interface_info.clone())
    }

    fn vfunc_address(&self, vfunc: &VFuncInfo, ty: NativeType) -> Option<usize> {
        let registry = self.registry.lock();
        registry
            .lineage(ty)
            .into_iter()
            .find_map(|t| registry.ty(t).and_then(|r| r.vfunc_addresses.get(&vfunc.name).copied()))
    }

    fn find_property(&self, ty: NativeType, canonical_name: &str) -> Option<Arc<PropertyInfo>> {
        let registry = self.registry.lock();
        for t in registry.lineage(ty) {
            let found = registry
                .ty(t)
                .and_then(|r| r.object_info.as_ref())
                .and_then(|info| info.find_property(canonical_name).cloned());
            if found.is_some() {
                return found;
            }
        }
        registry.interfaces_of(ty).into_iter().find_map(|iface| {
            registry
                .ty(iface)
                .and_then(|r| r.interface_info.as_ref())
                .and_then(|info| info.find_property(canonical_name).cloned())
        })
    }

    fn lookup_signal(&self, ty: NativeType, name: &str) -> Option<SignalInfo> {
        let (signal, detail) = match name.split_once("::") {
            Some((signal, detail)) => (signal, Some(detail.to_string())),
            None => (name, None),
        };
        let signal = signal.replace('_', "-");
        let registry = self.registry.lock();
        registry.lineage(ty).into_iter().find_map(|t| {
            registry.ty(t).and_then(|r| {
                r.signals.iter().find(|s| s.name == signal).map(|s| SignalInfo {
                    id: s.id,
                    name: s.name.clone(),
                    detail: detail.clone(),
                    n_params: s.n_params,
                    has_return: s.has_return,
                })
            })
        })
    }

    fn new_object(&self, ty: NativeType, props: &[(String, Value)]) -> Result<NativePtr, NativeError> {
        let existing = {
            let mut registry = self.registry.lock();
            let Some(record) = registry.ty(ty) else {
                return Err(NativeError::new(format!("invalid type id {}", ty.as_u64())));
            };
            if record.is_abstract {
                return Err(NativeError::new(format!("cannot create instance of abstract type {}", record.name)));
            }
            let singleton = record.singleton;

            let live = registry
                .singletons
                .get(&ty)
                .copied()
                .filter(|ptr| registry.objects.get(ptr).is_some_and(ObjectRecord::is_live));
            match live {
                Some(ptr) if singleton => Some(ptr),
                _ => {
                    let ptr = Self::allocate(&mut registry, ty);
                    if let Some(obj) = registry.objects.get_mut(&ptr) {
                        obj.properties.extend(props.iter().cloned());
                    }
                    if singleton {
                        registry.singletons.insert(ty, ptr);
                    }
                    return Ok(ptr);
                }
            }
        };

        // Singleton constructors return a new reference to the live instance
        let ptr = existing.ok_or_else(|| NativeError::new("singleton vanished"))?;
        self.ref_object(ptr);
        Ok(ptr)
    }

    fn get_property(&self, ptr: NativePtr, name: &str) -> Result<Value, NativeError> {
        let registry = self.registry.lock();
        let obj = registry
            .objects
            .get(&ptr)
            .filter(|o| o.is_live())
            .ok_or_else(|| NativeError::new(format!("get_property on freed object {ptr}")))?;
        Ok(obj.properties.get(name).cloned().unwrap_or(Value::Null))
    }

    fn set_property(&self, ptr: NativePtr, name: &str, value: Value) -> Result<(), NativeError> {
        let mut registry = self.registry.lock();
        let obj = registry
            .live_mut(ptr)
            .ok_or_else(|| NativeError::new(format!("set_property on freed object {ptr}")))?;
        obj.properties.insert(name.to_string(), value);
        Ok(())
    }

    fn get_field(&self, ptr: NativePtr, field: &FieldInfo) -> Result<Value, NativeError> {
        let registry = self.registry.lock();
        let obj = registry
            .objects
            .get(&ptr)
            .filter(|o| o.is_live())
            .ok_or_else(|| NativeError::new(format!("get_field on freed object {ptr}")))?;
        let value = registry
            .lineage(obj.ty)
            .into_iter()
            .find_map(|t| registry.ty(t).and_then(|r| r.field_values.get(&field.name).cloned()))
            .unwrap_or(Value::Int(0));
        Ok(value)
    }

    fn invoke(&self, ptr: NativePtr, function: &FunctionInfo, args: &[Value]) -> Result<Value, NativeError> {
        let mut registry = self.registry.lock();
        if registry.live_mut(ptr).is_none() {
            return Err(NativeError::new(format!("call of {} on freed object {ptr}", function.name)));
        }
        registry.invocations.push(Invocation {
            ptr,
            name: function.name.clone(),
            args: args.to_vec(),
        });
        Ok(Value::Undefined)
    }

    fn connect(
        &self,
        ptr: NativePtr,
        signal: &SignalInfo,
        closure: Arc<ClosureBridge>,
        _after: bool,
    ) -> Result<u64, NativeError> {
        let mut registry = self.registry.lock();
        let id = registry.next_handler;
        let obj = registry
            .live_mut(ptr)
            .ok_or_else(|| NativeError::new(format!("connect on freed object {ptr}")))?;
        obj.handlers.push(Handler {
            id,
            signal_id: signal.id,
            closure,
        });
        registry.next_handler += 1;
        Ok(id)
    }

    fn emit(&self, ptr: NativePtr, signal: &SignalInfo, args: &[Value]) -> Result<Value, NativeError> {
        let mut registry = self.registry.lock();
        let handlers = registry
            .live_mut(ptr)
            .ok_or_else(|| NativeError::new(format!("emit on freed object {ptr}")))?
            .handlers
            .iter()
            .filter(|h| h.signal_id == signal.id && !h.closure.is_invalidated())
            .count();
        registry.emissions.push(Emission {
            ptr,
            signal: signal.name.clone(),
            detail: signal.detail.clone(),
            args: args.to_vec(),
            handlers,
        });
        Ok(if signal.has_return { Value::Null } else { Value::Undefined })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    #[derive(Default)]
    struct Recorder {
        toggles: PlMutex<Vec<(NativePtr, bool)>>,
        disposed: PlMutex<Vec<NativePtr>>,
    }

    impl NativeEvents for Recorder {
        fn toggle_notify(&self, ptr: NativePtr, is_last_ref: bool) {
            self.toggles.lock().push((ptr, is_last_ref));
        }

        fn dispose_notify(&self, ptr: NativePtr) {
            self.disposed.lock().push(ptr);
        }
    }

    #[test]
    fn test_toggle_notifications() {
        let native = SimNative::new();
        let ty = native.class("Thing").build();
        let ptr = native.instantiate(ty);
        let recorder = Arc::new(Recorder::default());

        native.add_toggle_ref(ptr, recorder.clone());
        assert_eq!(native.ref_count(ptr), 2);
        assert!(recorder.toggles.lock().is_empty());

        native.unref_object(ptr);
        native.ref_object(ptr);
        native.ref_object(ptr);
        assert_eq!(*recorder.toggles.lock(), vec![(ptr, true), (ptr, false)]);
    }

    #[test]
    fn test_last_unref_disposes_and_frees() {
        let native = SimNative::new();
        let ty = native.class("Thing").build();
        let ptr = native.instantiate(ty);
        let recorder = Arc::new(Recorder::default());

        native.watch_dispose(ptr, recorder.clone());
        native.unref_object(ptr);
        assert_eq!(*recorder.disposed.lock(), vec![ptr]);
        assert!(native.is_freed(ptr));
        assert_eq!(native.ref_count(ptr), 0);
        assert_eq!(native.live_objects(), 0);
    }

    #[test]
    fn test_floating_ref_sink() {
        let native = SimNative::new();
        let ty = native.class("Widget").initially_unowned().build();
        let ptr = native.instantiate(ty);
        assert!(native.is_floating(ptr));

        native.ref_sink(ptr);
        assert!(!native.is_floating(ptr));
        assert_eq!(native.ref_count(ptr), 1);

        native.ref_sink(ptr);
        assert_eq!(native.ref_count(ptr), 2);
    }

    #[test]
    fn test_singleton_constructor() {
        let native = SimNative::new();
        let ty = native.class("Bus").singleton().build();
        let first = native.new_object(ty, &[]).unwrap();
        let second = native.new_object(ty, &[]).unwrap();
        assert_eq!(first, second);
        assert_eq!(native.ref_count(first), 2);
    }

    #[test]
    fn test_signal_lookup_with_detail() {
        let native = SimNative::new();
        let base = native.class("Base").signal("notify", 1, false).build();
        let derived = native.class("Derived").parent(base).build();

        let info = native.lookup_signal(derived, "notify::label").unwrap();
        assert_eq!(info.name, "notify");
        assert_eq!(info.detail.as_deref(), Some("label"));
        assert_eq!(info.n_params, 1);
        assert!(native.lookup_signal(derived, "clicked").is_none());
    }

    #[test]
    fn test_vfunc_address_inherited() {
        let native = SimNative::new();
        let base = native.class("Base").vfunc_address("draw", 0x10).build();
        let same = native.class("Same").parent(base).build();
        let over = native.class("Over").parent(base).vfunc_address("draw", 0x20).build();
        let slot = VFuncInfo::new("draw", base, 0);

        assert_eq!(native.vfunc_address(&slot, same), Some(0x10));
        assert_eq!(native.vfunc_address(&slot, over), Some(0x20));
    }
}
