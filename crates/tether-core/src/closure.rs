//! Closure bridges and the per-instance closure registry
//!
//! A [`ClosureBridge`] adapts a managed callback for the native signal
//! machinery. The native side keeps it alive for as long as the handler is
//! connected; the wrapped instance only keeps a [`ClosureSet`] of the bridges
//! it owns so that they can be traced during marking and invalidated when the
//! pairing is torn down.
//!
//! Invalidation can be initiated from either end. Each bridge carries a list
//! of invalidate notifiers, and the set registers one that removes the bridge
//! from itself.

use crate::error::{BridgeError, BridgeResult};
use crate::managed::ManagedObject;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_CLOSURE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique closure bridge id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClosureId(u64);

impl ClosureId {
    fn next() -> Self {
        Self(NEXT_CLOSURE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

type InvalidateNotifier = Box<dyn FnOnce(&ClosureBridge) + Send>;

/// A managed callback adapted for the native signal machinery
pub struct ClosureBridge {
    id: ClosureId,
    callback: ManagedObject,
    signal_id: Option<u32>,
    invalidated: AtomicBool,
    notifiers: Mutex<Vec<InvalidateNotifier>>,
}

impl ClosureBridge {
    /// Create a bridge for `callback`, optionally bound to a signal
    pub fn new(callback: ManagedObject, signal_id: Option<u32>) -> Arc<Self> {
        Arc::new(Self {
            id: ClosureId::next(),
            callback,
            signal_id,
            invalidated: AtomicBool::new(false),
            notifiers: Mutex::new(Vec::new()),
        })
    }

    /// Bridge id
    pub fn id(&self) -> ClosureId {
        self.id
    }

    /// The managed callback
    pub fn callback(&self) -> ManagedObject {
        self.callback
    }

    /// Signal the bridge was created for
    pub fn signal_id(&self) -> Option<u32> {
        self.signal_id
    }

    /// Whether [`ClosureBridge::invalidate`] has run
    pub fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    /// Run `notifier` once the bridge is invalidated (immediately if it already is)
    pub fn add_invalidate_notifier(&self, notifier: impl FnOnce(&ClosureBridge) + Send + 'static) {
        let mut notifiers = self.notifiers.lock();
        if self.is_invalidated() {
            drop(notifiers);
            notifier(self);
            return;
        }
        notifiers.push(Box::new(notifier));
    }

    /// Invalidate the bridge. Idempotent; notifiers run outside the lock.
    pub fn invalidate(&self) {
        let notifiers = {
            let mut notifiers = self.notifiers.lock();
            if self.invalidated.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *notifiers)
        };
        tracing::trace!(target: "tether::lifecycle", closure = self.id.0, "closure invalidated");
        for notifier in notifiers {
            notifier(self);
        }
    }
}

impl fmt::Debug for ClosureBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureBridge")
            .field("id", &self.id)
            .field("callback", &self.callback)
            .field("signal_id", &self.signal_id)
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

type BridgeList = Mutex<Vec<Arc<ClosureBridge>>>;

/// The closure bridges owned by one wrapped instance
#[derive(Clone, Default)]
pub struct ClosureSet {
    bridges: Arc<BridgeList>,
}

impl ClosureSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bridge; it is removed again when invalidated
    pub fn associate(&self, bridge: Arc<ClosureBridge>) -> BridgeResult<()> {
        {
            let mut bridges = self.bridges.lock();
            if bridges.iter().any(|b| b.id == bridge.id) {
                return Err(BridgeError::DuplicateClosure(bridge.id.0));
            }
            bridges.insert(0, Arc::clone(&bridge));
        }

        let set: Weak<BridgeList> = Arc::downgrade(&self.bridges);
        bridge.add_invalidate_notifier(move |invalidated| {
            if let Some(set) = set.upgrade() {
                set.lock().retain(|b| b.id != invalidated.id);
            }
        });
        Ok(())
    }

    /// Remove a bridge without invalidating it
    pub fn remove(&self, id: ClosureId) -> bool {
        let mut bridges = self.bridges.lock();
        let before = bridges.len();
        bridges.retain(|b| b.id != id);
        bridges.len() != before
    }

    /// Whether the set holds a bridge
    pub fn contains(&self, id: ClosureId) -> bool {
        self.bridges.lock().iter().any(|b| b.id == id)
    }

    /// Invalidate and drop every bridge, returning how many were dropped.
    ///
    /// Invalidation may remove other bridges through their notifiers, so the
    /// set is re-read after every step instead of iterated.
    pub fn invalidate_all(&self) -> usize {
        let mut count = 0;
        loop {
            let first = self.bridges.lock().first().cloned();
            let Some(bridge) = first else {
                break;
            };
            bridge.invalidate();
            self.remove(bridge.id);
            count += 1;
        }
        count
    }

    /// Managed callbacks to mark on behalf of the owning wrapper
    pub fn callbacks(&self) -> Vec<ManagedObject> {
        self.bridges.lock().iter().map(|b| b.callback).collect()
    }

    /// Number of live bridges
    pub fn len(&self) -> usize {
        self.bridges.lock().len()
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ClosureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClosureSet").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn callback(raw: u64) -> ManagedObject {
        ManagedObject::from_raw(raw).unwrap()
    }

    #[test]
    fn test_associate_rejects_duplicates() {
        let set = ClosureSet::new();
        let bridge = ClosureBridge::new(callback(1), None);

        set.associate(Arc::clone(&bridge)).unwrap();
        let err = set.associate(Arc::clone(&bridge)).unwrap_err();
        assert_eq!(err, BridgeError::DuplicateClosure(bridge.id().as_u64()));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_external_invalidation_removes_bridge() {
        let set = ClosureSet::new();
        let bridge = ClosureBridge::new(callback(1), Some(4));
        set.associate(Arc::clone(&bridge)).unwrap();

        bridge.invalidate();
        assert!(bridge.is_invalidated());
        assert!(set.is_empty());
    }

    #[test]
    fn test_invalidate_is_idempotent() {
        let bridge = ClosureBridge::new(callback(1), None);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        bridge.add_invalidate_notifier(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bridge.invalidate();
        bridge.invalidate();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalidate_all_tolerates_cascading_removal() {
        let set = ClosureSet::new();
        let a = ClosureBridge::new(callback(1), None);
        let b = ClosureBridge::new(callback(2), None);
        let c = ClosureBridge::new(callback(3), None);
        set.associate(Arc::clone(&a)).unwrap();
        set.associate(Arc::clone(&b)).unwrap();
        set.associate(Arc::clone(&c)).unwrap();

        // Invalidating c also invalidates a, which removes a from the set
        let chained = Arc::clone(&a);
        c.add_invalidate_notifier(move |_| chained.invalidate());

        let dropped = set.invalidate_all();
        assert_eq!(dropped, 2);
        assert!(set.is_empty());
        assert!(a.is_invalidated() && b.is_invalidated() && c.is_invalidated());
    }

    #[test]
    fn test_callbacks_for_tracing() {
        let set = ClosureSet::new();
        set.associate(ClosureBridge::new(callback(10), None)).unwrap();
        set.associate(ClosureBridge::new(callback(11), None)).unwrap();

        let mut traced = set.callbacks();
        traced.sort();
        assert_eq!(traced, vec![callback(10), callback(11)]);
    }

    #[test]
    fn test_notifier_after_invalidation_runs_immediately() {
        let bridge = ClosureBridge::new(callback(1), None);
        bridge.invalidate();

        let set = ClosureSet::new();
        set.associate(Arc::clone(&bridge)).unwrap();
        assert!(set.is_empty());
    }
}
