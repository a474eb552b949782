//! Bridge context
//!
//! A [`Context`] owns every piece of bridge state for one managed runtime:
//! the instance directory, the wrapper map, the binding registry and the
//! toggle queue. It lives on the runtime's owning thread and is registered
//! as that thread's current context so native notifications can find it.
//!
//! State sits behind a `RefCell`. No borrow is ever held across a call into
//! the native system's refcounting or into the managed runtime: dropping a
//! native reference can synchronously deliver a toggle notification that
//! lands back in this context.

use crate::binding::{BindingId, BindingRegistry, Resolution};
use crate::closure::ClosureBridge;
use crate::directory::{Directory, Handle};
use crate::error::{fatal, BridgeError, BridgeResult, ConsistencyViolation};
use crate::events::EventRouter;
use crate::instance::WrappedInstance;
use crate::lifecycle::{Lifecycle, Severance};
use crate::managed::{ManagedObject, ManagedRuntime};
use crate::native::{NativeEvents, NativePtr, NativeSystem, NativeType, Value};
use crate::options::BridgeOptions;
use crate::tag::{InstanceTag, TagStore};
use crate::toggle::{Direction, ToggleEvent, ToggleQueue};
use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT: RefCell<Option<Weak<ContextInner>>> = const { RefCell::new(None) };
}

pub(crate) struct BridgeState {
    pub(crate) instances: Directory<WrappedInstance>,
    pub(crate) wrappers: FxHashMap<ManagedObject, Handle>,
    pub(crate) bindings: BindingRegistry,
}

pub(crate) struct ContextInner {
    pub(crate) id: u64,
    pub(crate) native: Arc<dyn NativeSystem>,
    pub(crate) runtime: Rc<dyn ManagedRuntime>,
    pub(crate) options: BridgeOptions,
    pub(crate) queue: Arc<ToggleQueue>,
    pub(crate) router: Arc<EventRouter>,
    pub(crate) tags: TagStore,
    pub(crate) state: RefCell<BridgeState>,
    pub(crate) shut_down: Cell<bool>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if !self.shut_down.get() {
            tracing::warn!(
                target: "tether::lifecycle",
                live = self.state.get_mut().instances.linked_len(),
                "bridge context dropped without shutdown; native references are leaked"
            );
        }
        self.router.set_destroying();
        self.queue.shutdown();

        let this: *const ContextInner = self;
        let _ = CURRENT.try_with(|current| {
            let mut current = current.borrow_mut();
            if current.as_ref().is_some_and(|w| std::ptr::eq(w.as_ptr(), this)) {
                *current = None;
            }
        });
    }
}

/// Owner-thread handle to the bridge
///
/// Cloning is cheap; all clones share the same state.
#[derive(Clone)]
pub struct Context {
    pub(crate) inner: Rc<ContextInner>,
}

impl Context {
    /// Create a context and make it current on this thread
    ///
    /// Fails with [`BridgeError::ContextActive`] if the thread already has
    /// a live context.
    pub fn new(
        native: Arc<dyn NativeSystem>,
        runtime: Rc<dyn ManagedRuntime>,
        options: BridgeOptions,
    ) -> BridgeResult<Self> {
        if Self::current().is_some() {
            return Err(BridgeError::ContextActive);
        }

        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(ToggleQueue::new());
        let router = Arc::new(EventRouter::new(id, Arc::clone(&queue)));
        let inner = Rc::new(ContextInner {
            id,
            tags: TagStore::new(Arc::clone(&native)),
            native,
            runtime,
            options,
            queue,
            router,
            state: RefCell::new(BridgeState {
                instances: Directory::new(),
                wrappers: FxHashMap::default(),
                bindings: BindingRegistry::new(),
            }),
            shut_down: Cell::new(false),
        });

        CURRENT.with(|current| *current.borrow_mut() = Some(Rc::downgrade(&inner)));
        tracing::debug!(target: "tether::lifecycle", context = id, "bridge context created");
        Ok(Self { inner })
    }

    /// The context registered on this thread, if any
    pub fn current() -> Option<Context> {
        CURRENT
            .try_with(|current| current.borrow().as_ref().and_then(Weak::upgrade))
            .ok()
            .flatten()
            .map(|inner| Context { inner })
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// Options the context was created with
    pub fn options(&self) -> &BridgeOptions {
        &self.inner.options
    }

    /// The native object system
    pub fn native(&self) -> &Arc<dyn NativeSystem> {
        &self.inner.native
    }

    /// The cross-thread toggle queue
    pub fn toggle_queue(&self) -> &Arc<ToggleQueue> {
        &self.inner.queue
    }

    /// Whether [`Context::shutdown`] has run
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.get()
    }

    fn is_destroying(&self) -> bool {
        self.inner.router.is_destroying()
    }

    fn events(&self) -> Arc<dyn NativeEvents> {
        Arc::clone(&self.inner.router) as Arc<dyn NativeEvents>
    }

    // ===== Wrapping =====

    /// The managed wrapper for a native object, creating one on first sight.
    ///
    /// A new pairing takes its own reference on the native object (sinking
    /// a floating one) and starts out weak.
    pub fn wrapper_for(&self, ptr: NativePtr) -> BridgeResult<ManagedObject> {
        if let Some(handle) = self.instance_for_ptr(ptr) {
            let existing = self.inner.state.borrow().instances.get(handle).and_then(WrappedInstance::wrapper);
            if let Some(wrapper) = existing {
                return Ok(wrapper);
            }
        }

        let native = &self.inner.native;
        let ty = native.type_of(ptr);
        let binding = self.ensure_binding(ty)?;
        let wrapper = self.inner.runtime.new_wrapper(ty, &native.type_name(ty))?;

        native.ref_sink(ptr);
        if let Err(err) = self.associate(ptr, wrapper, binding) {
            native.unref_object(ptr);
            return Err(err);
        }
        Ok(wrapper)
    }

    /// Construct a native object of type `ty` and wrap it.
    ///
    /// Property names are resolved against the type before anything is
    /// created; an undefined value or a read-only property fails the whole
    /// construction.
    pub fn create_native(&self, ty: NativeType, props: &[(&str, Value)]) -> BridgeResult<ManagedObject> {
        let native = &self.inner.native;
        let binding = self.ensure_binding(ty)?;
        let params = self.props_to_parameters(binding, props)?;

        let type_name = native.type_name(ty);
        if native.is_abstract(ty) {
            return Err(BridgeError::AbstractType(type_name));
        }

        let wrapper = self.inner.runtime.new_wrapper(ty, &type_name)?;
        let ptr = native.new_object(ty, &params)?;

        if let Some(handle) = self.instance_for_ptr(ptr) {
            let existing = self.inner.state.borrow().instances.get(handle).and_then(WrappedInstance::wrapper);
            if let Some(existing) = existing {
                // Singleton: the constructor handed back an object that is
                // already wrapped. The fresh wrapper is left for the collector.
                tracing::debug!(target: "tether::lifecycle", %ptr, type_name = %type_name, "constructor returned an already wrapped object");
                self.ensure_tracked_handle(handle);
                native.unref_object(ptr);
                return Ok(existing);
            }
        }

        if native.is_floating(ptr) {
            native.ref_sink(ptr);
        }

        let binding = self.ensure_binding(native.type_of(ptr))?;
        if let Err(err) = self.associate(ptr, wrapper, binding) {
            native.unref_object(ptr);
            return Err(err);
        }
        tracing::debug!(target: "tether::lifecycle", %ptr, %wrapper, type_name = %type_name, "wrapper created");
        Ok(wrapper)
    }

    /// Pair a wrapper created by the managed side for a subclass instance
    /// the native constructor is still initializing.
    ///
    /// The bridge takes over the constructor's reference. Managed-side
    /// subclasses can hold state the native side cannot see, so the pairing
    /// is toggle tracked immediately.
    pub fn adopt_custom(&self, wrapper: ManagedObject, ptr: NativePtr) -> BridgeResult<()> {
        if self.instance_for_ptr(ptr).is_some() {
            fatal(ConsistencyViolation::IllegalTransition("adopt a native object that is already wrapped"));
        }

        let native = &self.inner.native;
        let binding = self.ensure_binding(native.type_of(ptr))?;
        if native.is_floating(ptr) {
            native.ref_sink(ptr);
        }
        let handle = self.associate(ptr, wrapper, binding)?;
        self.ensure_tracked_handle(handle);
        Ok(())
    }

    /// The managed side stored custom state on a wrapper.
    ///
    /// Such state would be lost if the wrapper were collected and recreated,
    /// so the pairing is upgraded to toggle tracking.
    pub fn on_expando_added(&self, wrapper: ManagedObject) -> BridgeResult<()> {
        let handle = self.handle_for(wrapper)?;
        let skip = {
            let state = self.inner.state.borrow();
            state
                .instances
                .get(handle)
                .is_none_or(|inst| inst.is_custom() || inst.lifecycle().native_disposed())
        };
        if !skip {
            self.ensure_tracked_handle(handle);
        }
        Ok(())
    }

    /// Upgrade a pairing to toggle tracking. Idempotent.
    pub fn ensure_tracked(&self, wrapper: ManagedObject) -> BridgeResult<()> {
        let handle = self.handle_for(wrapper)?;
        self.ensure_tracked_handle(handle);
        Ok(())
    }

    /// Tie a closure bridge to a wrapper's instance.
    ///
    /// The pairing is upgraded to toggle tracking first, so the closure's
    /// callback stays reachable while the native side may still invoke it.
    pub fn associate_closure(&self, wrapper: ManagedObject, bridge: Arc<ClosureBridge>) -> BridgeResult<()> {
        let handle = self.handle_for(wrapper)?;
        self.associate_closure_handle(handle, bridge)
    }

    pub(crate) fn associate_closure_handle(&self, handle: Handle, bridge: Arc<ClosureBridge>) -> BridgeResult<()> {
        self.ensure_tracked_handle(handle);
        let closures = {
            let state = self.inner.state.borrow();
            match state.instances.get(handle) {
                Some(inst) => inst.closures.clone(),
                None => return Ok(()),
            }
        };
        closures.associate(bridge)
    }

    // ===== Native notifications =====

    /// Entry point for a refcount toggle on the owning thread.
    ///
    /// Normally reached through the router the native side holds; exposed
    /// for embedders that deliver toggles themselves.
    pub fn toggle_notify(&self, ptr: NativePtr, is_last_ref: bool) {
        self.inner.router.toggle_notify(ptr, is_last_ref);
    }

    pub(crate) fn handle_owner_toggle(&self, ptr: NativePtr, direction: Direction) {
        let pending = self.inner.queue.is_queued(ptr);
        match direction {
            Direction::Down => {
                if !pending.is_empty() {
                    fatal(ConsistencyViolation::ContradictoryToggle {
                        ptr,
                        type_name: self.type_name_of(ptr),
                        direction: direction.as_str(),
                        queued: pending.describe(),
                    });
                }
                self.toggle_down(ptr);
            }
            Direction::Up => {
                if pending.down {
                    // Keep the ordering with the DOWN that is already queued
                    self.inner.queue.enqueue(ptr, direction);
                } else if pending.up {
                    fatal(ConsistencyViolation::ContradictoryToggle {
                        ptr,
                        type_name: self.type_name_of(ptr),
                        direction: direction.as_str(),
                        queued: pending.describe(),
                    });
                } else {
                    self.toggle_up(ptr);
                }
            }
        }
    }

    /// A watched native object was disposed.
    ///
    /// The record stays paired but is removed from the directory; member
    /// access through the wrapper fails from now on.
    pub fn dispose_notify(&self, ptr: NativePtr) {
        let Some(handle) = self.instance_for_ptr(ptr) else {
            tracing::trace!(target: "tether::lifecycle", %ptr, "dispose notification for an unwrapped object");
            return;
        };
        let mut state = self.inner.state.borrow_mut();
        if let Some(inst) = state.instances.get_mut(handle) {
            inst.lifecycle.mark_disposed();
            tracing::debug!(
                target: "tether::lifecycle",
                %ptr,
                type_name = %inst.type_name(),
                rooted = inst.lifecycle().is_rooted(),
                "wrapped object disposed"
            );
        }
        state.instances.unlink(handle);
    }

    fn toggle_down(&self, ptr: NativePtr) {
        let Some(handle) = self.instance_for_ptr(ptr) else {
            tracing::debug!(target: "tether::toggle", %ptr, "toggle down for an object without a wrapper");
            return;
        };
        let unrooted = {
            let mut state = self.inner.state.borrow_mut();
            match state.instances.get_mut(handle) {
                Some(inst) if inst.lifecycle.is_rooted() => {
                    inst.lifecycle.unroot();
                    inst.wrapper()
                }
                _ => None,
            }
        };

        let Some(wrapper) = unrooted else {
            return;
        };
        self.inner.runtime.unroot(wrapper);
        tracing::debug!(target: "tether::toggle", %ptr, %wrapper, "wrapper unrooted, only the toggle reference remains");

        if !self.is_destroying() && self.inner.options.gc_on_toggle_down {
            self.inner.runtime.schedule_gc();
        }
    }

    fn toggle_up(&self, ptr: NativePtr) {
        let Some(handle) = self.instance_for_ptr(ptr) else {
            tracing::debug!(target: "tether::toggle", %ptr, "toggle up for an object without a wrapper");
            return;
        };
        let rooted = {
            let mut state = self.inner.state.borrow_mut();
            match state.instances.get_mut(handle) {
                Some(inst) if inst.lifecycle.is_associated() && !inst.lifecycle.is_rooted() => {
                    let wrapper = inst.wrapper();
                    if wrapper.is_some() {
                        inst.lifecycle.root();
                    }
                    wrapper
                }
                _ => None,
            }
        };

        if let Some(wrapper) = rooted {
            self.inner.runtime.root(wrapper);
            tracing::debug!(target: "tether::toggle", %ptr, %wrapper, "wrapper rooted, native code holds references");
        }
    }

    fn apply_toggle(&self, event: ToggleEvent) {
        match event.direction {
            Direction::Down => self.toggle_down(event.ptr),
            Direction::Up => self.toggle_up(event.ptr),
        }
    }

    /// Replay every queued toggle and disposal on the owning thread
    pub fn dispatch_toggles(&self) -> usize {
        let mut handled = 0;
        loop {
            let toggles = self.inner.queue.drain(|event| self.apply_toggle(event));
            let disposals = self.inner.queue.drain_disposals(|ptr| self.dispose_notify(ptr));
            if toggles + disposals == 0 {
                break;
            }
            handled += toggles + disposals;
        }
        if handled > 0 {
            tracing::debug!(target: "tether::toggle", handled, "queued toggles dispatched");
        }
        handled
    }

    /// Number of toggles waiting in the queue
    pub fn pending_toggles(&self) -> usize {
        self.inner.queue.len()
    }

    /// Number of off-thread disposals waiting to be applied
    pub fn pending_disposals(&self) -> usize {
        self.inner.queue.pending_disposals()
    }

    // ===== Collector hooks =====

    /// A collection is starting.
    ///
    /// Queued toggles are applied first so the root set the collector sees
    /// reflects the native refcounts.
    pub fn on_gc_begin(&self) -> usize {
        if self.inner.options.drain_before_gc {
            self.dispatch_toggles()
        } else {
            0
        }
    }

    /// Sweep weak pairings whose wrappers the collector is about to finalize.
    ///
    /// Runs after marking. Each dying pairing is unlinked and then releases
    /// its native reference. Returns how many were swept.
    pub fn update_weak_pointers(&self) -> usize {
        let candidates: Vec<ManagedObject> = {
            let state = self.inner.state.borrow();
            state
                .instances
                .snapshot()
                .into_iter()
                .filter_map(|handle| state.instances.get(handle))
                .filter(|inst| !inst.lifecycle().is_rooted())
                .filter_map(WrappedInstance::wrapper)
                .collect()
        };

        let runtime = &self.inner.runtime;
        let dying: FxHashSet<ManagedObject> = candidates
            .into_iter()
            .filter(|wrapper| runtime.is_about_to_be_finalized(*wrapper))
            .collect();
        if dying.is_empty() {
            return 0;
        }

        let doomed = self
            .inner
            .state
            .borrow_mut()
            .instances
            .unlink_where(|inst| inst.wrapper().is_some_and(|w| dying.contains(&w)));
        for handle in &doomed {
            self.disassociate(*handle, Severance::Finalized);
        }
        tracing::debug!(target: "tether::lifecycle", swept = doomed.len(), "weak pairings swept");
        doomed.len()
    }

    /// The collector is finalizing a wrapper.
    ///
    /// Closures are invalidated and any native reference still held is
    /// released; the record is then discarded.
    pub fn finalize_wrapper(&self, wrapper: ManagedObject) {
        let Some(handle) = self.inner.state.borrow_mut().wrappers.remove(&wrapper) else {
            tracing::trace!(target: "tether::lifecycle", %wrapper, "finalizing a wrapper that was never paired");
            return;
        };

        let (ptr, closures, type_name, disposed, rooted) = {
            let state = self.inner.state.borrow();
            let Some(inst) = state.instances.get(handle) else {
                return;
            };
            (
                inst.ptr(),
                inst.closures.clone(),
                inst.type_name().to_string(),
                inst.lifecycle().native_disposed(),
                inst.lifecycle().is_rooted(),
            )
        };

        closures.invalidate_all();

        if let Some(ptr) = ptr {
            let native = &self.inner.native;
            if native.ref_count(ptr) == 0 {
                fatal(ConsistencyViolation::FinalizedFreedObject(type_name));
            }

            let pending = self.inner.queue.cancel(ptr);
            if pending.down && !pending.up {
                fatal(ConsistencyViolation::FinalizedWhileUnrootPending(type_name));
            }

            let disposed = self.inner.queue.cancel_dispose(ptr) || disposed;
            if !disposed {
                native.unwatch_dispose(ptr);
            }
            if self.inner.tags.lookup(ptr) == Some(InstanceTag::new(handle)) {
                self.inner.tags.detach(ptr);
            }
            if rooted {
                tracing::debug!(target: "tether::lifecycle", %ptr, %wrapper, "wrapper finalized despite being kept alive");
            }
            self.release_native(handle);
        }

        let mut state = self.inner.state.borrow_mut();
        if let Some(inst) = state.instances.get_mut(handle) {
            inst.lifecycle.mark_finalized();
        }
        state.instances.unlink(handle);
        state.instances.remove(handle);
        tracing::debug!(target: "tether::lifecycle", %wrapper, type_name = %type_name, "wrapper finalized");
    }

    /// Managed objects a wrapper keeps alive: the callbacks of its closures
    pub fn trace_wrapper(&self, wrapper: ManagedObject) -> Vec<ManagedObject> {
        let state = self.inner.state.borrow();
        state
            .wrappers
            .get(&wrapper)
            .and_then(|handle| state.instances.get(*handle))
            .map(|inst| inst.closures.callbacks())
            .unwrap_or_default()
    }

    /// Tear down every pairing.
    ///
    /// Pending toggles are applied, then every linked instance releases its
    /// native reference and type tags are cleared. Toggles arriving
    /// afterwards are dropped.
    pub fn shutdown(&self) {
        if self.inner.shut_down.replace(true) {
            return;
        }
        tracing::debug!(target: "tether::lifecycle", context = self.inner.id, "bridge context shutting down");

        self.inner.router.set_destroying();
        let drained = self.dispatch_toggles();

        let doomed = self.inner.state.borrow_mut().instances.unlink_where(|_| true);
        for handle in &doomed {
            self.disassociate(*handle, Severance::Disposed);
        }

        let bindings = {
            let state = self.inner.state.borrow();
            state.bindings.detach_types(&self.inner.tags);
            state.bindings.len()
        };

        self.inner.queue.shutdown();
        tracing::debug!(
            target: "tether::lifecycle",
            drained,
            bindings,
            released = doomed.len(),
            "bridge context shut down"
        );
    }

    // ===== Introspection of bridge state =====

    /// Binding for a native type, created on first use
    pub fn ensure_binding(&self, ty: NativeType) -> BridgeResult<BindingId> {
        let mut state = self.inner.state.borrow_mut();
        state.bindings.ensure(&*self.inner.native, &self.inner.tags, ty)
    }

    /// Resolve a member name on the binding of `ty` alone
    pub fn resolve(&self, ty: NativeType, name: &str) -> BridgeResult<Resolution> {
        let binding = self.ensure_binding(ty)?;
        let mut state = self.inner.state.borrow_mut();
        state
            .bindings
            .resolve(&*self.inner.native, binding, name, &self.inner.options.vfunc_prefix)
    }

    /// Member names of `ty` for managed-side enumeration
    pub fn enumerate(&self, ty: NativeType) -> BridgeResult<Vec<String>> {
        let binding = self.ensure_binding(ty)?;
        let state = self.inner.state.borrow();
        Ok(state.bindings.enumerate(&*self.inner.native, binding))
    }

    /// Metadata scans performed so far for the binding of `ty`
    pub fn resolution_scans(&self, ty: NativeType) -> BridgeResult<u64> {
        let binding = self.ensure_binding(ty)?;
        let state = self.inner.state.borrow();
        Ok(state.bindings.get(binding).map_or(0, |b| b.scan_count()))
    }

    /// Names memoized so far (defined or absent) on the binding of `ty`
    pub fn cached_resolutions(&self, ty: NativeType) -> BridgeResult<usize> {
        let binding = self.ensure_binding(ty)?;
        let state = self.inner.state.borrow();
        Ok(state.bindings.get(binding).map_or(0, |b| b.cached_len()))
    }

    /// Lifecycle state of a wrapper's instance
    pub fn lifecycle(&self, wrapper: ManagedObject) -> BridgeResult<Lifecycle> {
        let handle = self.handle_for(wrapper)?;
        let state = self.inner.state.borrow();
        state
            .instances
            .get(handle)
            .map(|inst| *inst.lifecycle())
            .ok_or(BridgeError::NotAWrapper(wrapper.as_u64()))
    }

    /// Whether a wrapper is currently a GC root
    pub fn is_rooted(&self, wrapper: ManagedObject) -> BridgeResult<bool> {
        self.lifecycle(wrapper).map(|l| l.is_rooted())
    }

    /// Closures currently owned by a wrapper's instance
    pub fn closure_count(&self, wrapper: ManagedObject) -> BridgeResult<usize> {
        let handle = self.handle_for(wrapper)?;
        let state = self.inner.state.borrow();
        Ok(state.instances.get(handle).map_or(0, |inst| inst.closures.len()))
    }

    /// Instances still linked in the directory
    pub fn live_instances(&self) -> usize {
        self.inner.state.borrow().instances.linked_len()
    }

    // ===== Internals =====

    pub(crate) fn handle_for(&self, wrapper: ManagedObject) -> BridgeResult<Handle> {
        self.inner
            .state
            .borrow()
            .wrappers
            .get(&wrapper)
            .copied()
            .ok_or(BridgeError::NotAWrapper(wrapper.as_u64()))
    }

    /// Instance record a native object's tag points at.
    ///
    /// A tag that no longer matches a live pairing means the object outlived
    /// a finalized wrapper; the tag is cleared and the object treated as
    /// unwrapped so a fresh pairing is created.
    fn instance_for_ptr(&self, ptr: NativePtr) -> Option<Handle> {
        let handle = self.inner.tags.lookup(ptr)?.handle();
        let stale = {
            let state = self.inner.state.borrow();
            // Finalization releases the pointer before the slot goes away, so a
            // finalized pairing never matches here
            !state.instances.get(handle).is_some_and(|inst| inst.ptr() == Some(ptr))
        };
        if stale {
            tracing::error!(
                target: "tether::lifecycle",
                %ptr,
                type_name = %self.type_name_of(ptr),
                "object resurfaced after its wrapper was finalized; any state stored on the old wrapper is lost"
            );
            self.inner.tags.detach(ptr);
            return None;
        }
        Some(handle)
    }

    fn type_name_of(&self, ptr: NativePtr) -> String {
        let native = &self.inner.native;
        native.type_name(native.type_of(ptr))
    }

    fn associate(&self, ptr: NativePtr, wrapper: ManagedObject, binding: BindingId) -> BridgeResult<Handle> {
        let native = &self.inner.native;
        let ty = native.type_of(ptr);
        let type_name = native.type_name(ty);

        let handle = {
            let mut state = self.inner.state.borrow_mut();
            state
                .wrappers
                .try_reserve(1)
                .map_err(|_| BridgeError::OutOfMemory("wrapper map"))?;
            let custom = state.bindings.get(binding).is_some_and(|b| b.is_custom());

            let mut inst = WrappedInstance::new(ptr, ty, type_name, binding, wrapper, custom);
            inst.lifecycle.associate();
            let handle = state.instances.insert(inst);
            state.instances.link(handle);
            state.wrappers.insert(wrapper, handle);
            handle
        };

        self.inner.tags.attach(ptr, InstanceTag::new(handle));
        native.watch_dispose(ptr, self.events());
        tracing::trace!(target: "tether::lifecycle", %ptr, %wrapper, "wrapper associated");
        Ok(handle)
    }

    fn ensure_tracked_handle(&self, handle: Handle) {
        let (ptr, wrapper) = {
            let mut state = self.inner.state.borrow_mut();
            let Some(inst) = state.instances.get_mut(handle) else {
                return;
            };
            let (Some(ptr), Some(wrapper)) = (inst.ptr(), inst.wrapper()) else {
                return;
            };
            if inst.lifecycle.native_disposed() || !inst.lifecycle.is_associated() {
                tracing::debug!(target: "tether::lifecycle", %ptr, "not tracking a disposed object");
                return;
            }
            if !inst.lifecycle.begin_tracking() {
                return;
            }
            inst.lifecycle.root();
            (ptr, wrapper)
        };

        self.inner.runtime.root(wrapper);
        let native = &self.inner.native;
        native.add_toggle_ref(ptr, self.events());
        // Trade the plain reference for the toggle reference; this may
        // deliver a DOWN right away
        native.unref_object(ptr);
        tracing::debug!(target: "tether::lifecycle", %ptr, %wrapper, "pairing upgraded to a toggle reference");
    }

    fn disassociate(&self, handle: Handle, severance: Severance) {
        let (ptr, disposed, closures, type_name) = {
            let state = self.inner.state.borrow();
            let Some(inst) = state.instances.get(handle) else {
                return;
            };
            let Some(ptr) = inst.ptr() else {
                return;
            };
            (
                ptr,
                inst.lifecycle().native_disposed(),
                inst.closures.clone(),
                inst.type_name().to_string(),
            )
        };

        // A disposal still queued from another thread means the watch already fired
        let disposed = self.inner.queue.cancel_dispose(ptr) || disposed;
        if !disposed {
            self.inner.native.unwatch_dispose(ptr);
        }

        let pending = self.inner.queue.cancel(ptr);
        if !pending.is_balanced() {
            fatal(ConsistencyViolation::StrandedToggle { ptr, type_name });
        }

        self.inner.tags.detach(ptr);
        closures.invalidate_all();
        self.release_native(handle);

        if let Some(inst) = self.inner.state.borrow_mut().instances.get_mut(handle) {
            inst.lifecycle.disassociate(severance);
        }
        tracing::debug!(target: "tether::lifecycle", %ptr, ?severance, "pairing severed");
    }

    /// Drop the wrapper (unrooting it) and the bridge's native reference
    fn release_native(&self, handle: Handle) {
        let (ptr, tracked, unroot) = {
            let mut state = self.inner.state.borrow_mut();
            let Some(inst) = state.instances.get_mut(handle) else {
                return;
            };
            let unroot = if inst.lifecycle.is_rooted() {
                inst.lifecycle.unroot();
                inst.wrapper()
            } else {
                None
            };
            inst.take_wrapper();
            (inst.take_ptr(), inst.lifecycle().uses_toggle_ref(), unroot)
        };

        if let Some(wrapper) = unroot {
            self.inner.runtime.unroot(wrapper);
        }
        let Some(ptr) = ptr else {
            return;
        };
        if tracked {
            self.inner.native.remove_toggle_ref(ptr);
        } else {
            self.inner.native.unref_object(ptr);
        }
    }

    fn props_to_parameters(&self, binding: BindingId, props: &[(&str, Value)]) -> BridgeResult<Vec<(String, Value)>> {
        let mut params = Vec::new();
        params
            .try_reserve(props.len())
            .map_err(|_| BridgeError::OutOfMemory("construction parameters"))?;

        let mut state = self.inner.state.borrow_mut();
        for (name, value) in props {
            let spec = state.bindings.find_param_spec(&*self.inner.native, binding, name)?;
            if value.is_undefined() {
                return Err(BridgeError::InvalidInitializer(spec.name.clone()));
            }
            if !spec.is_writable() {
                let type_name = state.bindings.get(binding).map(|b| b.type_name().to_string()).unwrap_or_default();
                return Err(BridgeError::ReadOnlyMember {
                    type_name,
                    member: spec.name.clone(),
                });
            }
            params.push((spec.name.clone(), value.clone()));
        }
        Ok(params)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("shut_down", &self.inner.shut_down.get())
            .field("pending_toggles", &self.inner.queue.len())
            .finish_non_exhaustive()
    }
}
