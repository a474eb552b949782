//! Simulated garbage-collected heap
//!
//! A small mark-sweep collector over opaque handles. Wrappers and callback
//! objects are allocated here; the bridge roots and unroots wrappers through
//! [`ManagedRuntime`], tests hold objects as if they sat on a stack.
//!
//! [`SimHeap::collect`] drives the bridge hooks in the order a real engine
//! would: begin, mark (tracing wrappers through the bridge), weak-pointer
//! update, then finalization of everything left unmarked.

use rustc_hash::{FxHashMap, FxHashSet};
use std::cell::RefCell;
use std::time::{Duration, Instant};
use tether_core::{BridgeResult, Context, ManagedObject, ManagedRuntime, NativeType};

/// What a heap object is
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeapObjectKind {
    /// Wrapper for a native object of the named type
    Wrapper {
        /// Native type the wrapper's prototype corresponds to
        ty: NativeType,
        /// Type name at creation time
        type_name: String,
    },
    /// A callback function
    Callback,
}

/// Collector statistics
#[derive(Debug, Clone, Default)]
pub struct GcStats {
    /// Total number of collections
    pub collections: usize,

    /// Total objects freed
    pub objects_freed: usize,

    /// Objects marked in last collection
    pub last_marked_count: usize,

    /// Objects freed in last collection
    pub last_freed_count: usize,

    /// Weak pairings the bridge swept in last collection
    pub last_swept_pairings: usize,

    /// Live objects after last collection
    pub live_objects: usize,

    /// Total pause time across all collections
    pub total_pause_time: Duration,

    /// Last collection duration
    pub last_pause_time: Duration,
}

impl GcStats {
    fn update(&mut self, pause_time: Duration, marked: usize, freed: usize, swept: usize, live_objects: usize) {
        self.collections += 1;
        self.objects_freed += freed;
        self.total_pause_time += pause_time;
        self.last_pause_time = pause_time;
        self.last_marked_count = marked;
        self.last_freed_count = freed;
        self.last_swept_pairings = swept;
        self.live_objects = live_objects;
    }
}

/// Root set of the simulated heap
///
/// Bridge roots come from [`ManagedRuntime::root`]; held roots stand in for
/// values on the managed stack.
#[derive(Debug, Default)]
pub struct RootSet {
    bridge_roots: FxHashSet<ManagedObject>,
    held: FxHashMap<ManagedObject, usize>,
}

impl RootSet {
    /// Iterate over all roots
    pub fn iter(&self) -> impl Iterator<Item = ManagedObject> + '_ {
        self.bridge_roots.iter().chain(self.held.keys()).copied()
    }

    /// Get total number of distinct roots
    pub fn len(&self) -> usize {
        self.bridge_roots.len() + self.held.keys().filter(|k| !self.bridge_roots.contains(k)).count()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct HeapState {
    next_handle: u64,
    objects: FxHashMap<ManagedObject, HeapObjectKind>,
    roots: RootSet,
    dying: FxHashSet<ManagedObject>,
    gc_requests: usize,
    stats: GcStats,
}

/// Simulated managed heap
pub struct SimHeap {
    state: RefCell<HeapState>,
}

impl SimHeap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self {
            state: RefCell::new(HeapState {
                next_handle: 1,
                objects: FxHashMap::default(),
                roots: RootSet::default(),
                dying: FxHashSet::default(),
                gc_requests: 0,
                stats: GcStats::default(),
            }),
        }
    }

    fn allocate(&self, kind: HeapObjectKind) -> ManagedObject {
        let mut state = self.state.borrow_mut();
        let raw = state.next_handle;
        state.next_handle += 1;
        let obj = ManagedObject::from_raw(raw).unwrap_or_else(|| unreachable!("handles start at one"));
        state.objects.insert(obj, kind);
        obj
    }

    /// Allocate a callback function object
    pub fn new_callback(&self) -> ManagedObject {
        self.allocate(HeapObjectKind::Callback)
    }

    /// Keep an object alive as if referenced from the stack
    pub fn hold(&self, obj: ManagedObject) {
        *self.state.borrow_mut().roots.held.entry(obj).or_insert(0) += 1;
    }

    /// Drop one hold on an object
    pub fn release(&self, obj: ManagedObject) {
        let mut state = self.state.borrow_mut();
        if let Some(count) = state.roots.held.get_mut(&obj) {
            *count -= 1;
            if *count == 0 {
                state.roots.held.remove(&obj);
            }
        }
    }

    /// Whether the object has not been collected
    pub fn is_alive(&self, obj: ManagedObject) -> bool {
        self.state.borrow().objects.contains_key(&obj)
    }

    /// Whether the bridge currently roots the object
    pub fn is_rooted(&self, obj: ManagedObject) -> bool {
        self.state.borrow().roots.bridge_roots.contains(&obj)
    }

    /// Kind of a live object
    pub fn kind(&self, obj: ManagedObject) -> Option<HeapObjectKind> {
        self.state.borrow().objects.get(&obj).cloned()
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.state.borrow().objects.len()
    }

    /// Check if the heap is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of distinct roots
    pub fn root_count(&self) -> usize {
        self.state.borrow().roots.len()
    }

    /// Collections requested through [`ManagedRuntime::schedule_gc`]
    pub fn gc_requests(&self) -> usize {
        self.state.borrow().gc_requests
    }

    /// Collector statistics
    pub fn stats(&self) -> GcStats {
        self.state.borrow().stats.clone()
    }

    /// Run a full collection, driving the bridge hooks of `ctx`
    pub fn collect(&self, ctx: &Context) -> GcStats {
        let start = Instant::now();

        ctx.on_gc_begin();
        let marked = self.mark(ctx);

        {
            let mut state = self.state.borrow_mut();
            let dying: FxHashSet<ManagedObject> = state
                .objects
                .keys()
                .filter(|obj| !marked.contains(obj))
                .copied()
                .collect();
            state.dying = dying;
        }

        let swept = ctx.update_weak_pointers();

        let dying: Vec<ManagedObject> = self.state.borrow().dying.iter().copied().collect();
        for obj in &dying {
            if matches!(self.kind(*obj), Some(HeapObjectKind::Wrapper { .. })) {
                ctx.finalize_wrapper(*obj);
            }
        }

        let mut state = self.state.borrow_mut();
        for obj in &dying {
            state.objects.remove(obj);
            state.roots.bridge_roots.remove(obj);
        }
        state.dying.clear();

        let live = state.objects.len();
        state.stats.update(start.elapsed(), marked.len(), dying.len(), swept, live);
        tracing::debug!(
            target: "tether_sim",
            marked = marked.len(),
            freed = dying.len(),
            swept,
            live,
            "collection finished"
        );
        state.stats.clone()
    }

    /// Mark phase: everything reachable from the roots
    fn mark(&self, ctx: &Context) -> FxHashSet<ManagedObject> {
        // Collect roots first; tracing calls back into the bridge
        let mut stack: Vec<ManagedObject> = self.state.borrow().roots.iter().collect();
        let mut marked = FxHashSet::default();

        while let Some(obj) = stack.pop() {
            if !self.is_alive(obj) || !marked.insert(obj) {
                continue;
            }
            if matches!(self.kind(obj), Some(HeapObjectKind::Wrapper { .. })) {
                stack.extend(ctx.trace_wrapper(obj));
            }
        }
        marked
    }
}

impl Default for SimHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagedRuntime for SimHeap {
    fn new_wrapper(&self, ty: NativeType, type_name: &str) -> BridgeResult<ManagedObject> {
        Ok(self.allocate(HeapObjectKind::Wrapper {
            ty,
            type_name: type_name.to_string(),
        }))
    }

    fn root(&self, obj: ManagedObject) {
        if !self.state.borrow_mut().roots.bridge_roots.insert(obj) {
            tracing::error!(target: "tether_sim", %obj, "object rooted twice");
        }
    }

    fn unroot(&self, obj: ManagedObject) {
        if !self.state.borrow_mut().roots.bridge_roots.remove(&obj) {
            tracing::error!(target: "tether_sim", %obj, "unrooting an object that is not rooted");
        }
    }

    fn schedule_gc(&self) {
        self.state.borrow_mut().gc_requests += 1;
    }

    fn is_about_to_be_finalized(&self, obj: ManagedObject) -> bool {
        self.state.borrow().dying.contains(&obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_set_len_counts_distinct() {
        let heap = SimHeap::new();
        let a = heap.new_callback();
        let b = heap.new_callback();

        heap.hold(a);
        heap.hold(a);
        heap.root(a);
        heap.hold(b);
        assert_eq!(heap.root_count(), 2);

        heap.release(a);
        heap.release(a);
        heap.release(b);
        assert_eq!(heap.root_count(), 1);
        heap.unroot(a);
        assert_eq!(heap.root_count(), 0);
    }

    #[test]
    fn test_schedule_gc_counts_requests() {
        let heap = SimHeap::new();
        heap.schedule_gc();
        heap.schedule_gc();
        assert_eq!(heap.gc_requests(), 2);
    }

    #[test]
    fn test_wrapper_kind() {
        let heap = SimHeap::new();
        let ty = NativeType::from_raw(3).unwrap();
        let wrapper = heap.new_wrapper(ty, "Widget").unwrap();
        assert_eq!(
            heap.kind(wrapper),
            Some(HeapObjectKind::Wrapper {
                ty,
                type_name: "Widget".to_string()
            })
        );
        assert!(heap.is_alive(wrapper));
        assert_eq!(heap.len(), 1);
    }
}
