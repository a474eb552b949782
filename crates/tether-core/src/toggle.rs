//! Toggle reference queue
//!
//! Native refcount transitions can be observed on any thread, but rooting and
//! unrooting a wrapper is only legal on the runtime's owning thread. Producers
//! append [`ToggleEvent`]s here; the owning thread replays them in enqueue
//! order with [`ToggleQueue::drain`]. Disposals observed off the owning
//! thread wait in a separate lane drained by [`ToggleQueue::drain_disposals`].
//!
//! The mutex guards the event list only. Handlers always run with the lock
//! released, because a handler may itself cause further toggles.

use crate::defaults::TOGGLE_QUEUE_CAPACITY;
use crate::error::{fatal, ConsistencyViolation};
use crate::native::NativePtr;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;

/// Which way the refcount crossed the 1↔2 boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// 1 → 2: something besides the wrapper now references the object
    Up,
    /// 2 → 1: only the wrapper's toggle reference remains
    Down,
}

impl Direction {
    /// Lowercase name for diagnostics
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A deferred toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleEvent {
    /// Object whose refcount changed
    pub ptr: NativePtr,
    /// Direction of the change
    pub direction: Direction,
}

/// Pending directions for one pointer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pending {
    /// A DOWN event is queued
    pub down: bool,
    /// An UP event is queued
    pub up: bool,
}

impl Pending {
    /// Nothing pending
    pub fn is_empty(self) -> bool {
        !self.down && !self.up
    }

    /// Either both or neither direction pending
    pub fn is_balanced(self) -> bool {
        self.down == self.up
    }

    /// Whether `direction` is pending
    pub fn has(self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
        }
    }

    /// Human readable summary for diagnostics
    pub fn describe(self) -> &'static str {
        match (self.up, self.down) {
            (true, true) => "up and down",
            (true, false) => "up",
            (false, true) => "down",
            (false, false) => "nothing",
        }
    }
}

struct QueueState {
    events: VecDeque<ToggleEvent>,
    disposals: VecDeque<NativePtr>,
    shutdown: bool,
}

/// Thread-safe multi-producer, single-consumer toggle queue
pub struct ToggleQueue {
    state: Mutex<QueueState>,
}

impl ToggleQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                events: VecDeque::with_capacity(TOGGLE_QUEUE_CAPACITY),
                disposals: VecDeque::new(),
                shutdown: false,
            }),
        }
    }

    /// Append an event. Safe from any thread.
    ///
    /// Enqueuing a direction that is already pending for the same pointer is a
    /// double toggle and terminates the process. Events arriving after
    /// [`ToggleQueue::shutdown`] are dropped with a diagnostic.
    pub fn enqueue(&self, ptr: NativePtr, direction: Direction) {
        let mut state = self.state.lock();
        if state.shutdown {
            drop(state);
            tracing::error!(
                target: "tether::toggle",
                %ptr,
                %direction,
                thread = ?std::thread::current().id(),
                "enqueuing toggle after queue shutdown, probably from another thread"
            );
            return;
        }

        let duplicate = state
            .events
            .iter()
            .any(|e| e.ptr == ptr && e.direction == direction);
        if duplicate {
            drop(state);
            fatal(ConsistencyViolation::DoubleToggle(ptr, direction.as_str()));
        }

        state.events.push_back(ToggleEvent { ptr, direction });
        tracing::trace!(target: "tether::toggle", %ptr, %direction, pending = state.events.len(), "toggle queued");
    }

    /// Report which directions are pending for `ptr`
    pub fn is_queued(&self, ptr: NativePtr) -> Pending {
        let state = self.state.lock();
        Self::pending_locked(&state.events, ptr)
    }

    /// Remove every pending event for `ptr`, reporting what was removed
    pub fn cancel(&self, ptr: NativePtr) -> Pending {
        let mut state = self.state.lock();
        let pending = Self::pending_locked(&state.events, ptr);
        if !pending.is_empty() {
            state.events.retain(|e| e.ptr != ptr);
            tracing::debug!(target: "tether::toggle", %ptr, cancelled = pending.describe(), "pending toggles cancelled");
        }
        pending
    }

    /// Pop the oldest event and run `handler` on it outside the lock.
    ///
    /// Returns false if the queue was empty.
    pub fn handle_toggle(&self, handler: impl FnOnce(ToggleEvent)) -> bool {
        let event = self.state.lock().events.pop_front();
        match event {
            Some(event) => {
                handler(event);
                true
            }
            None => false,
        }
    }

    /// Handle events until the queue is empty, returning how many ran.
    ///
    /// Events enqueued by the handler itself are handled in the same drain.
    pub fn drain(&self, mut handler: impl FnMut(ToggleEvent)) -> usize {
        let mut handled = 0;
        while self.handle_toggle(&mut handler) {
            handled += 1;
        }
        handled
    }

    /// Record a disposal seen off the owning thread. Safe from any thread.
    ///
    /// A pointer is queued at most once; disposals after
    /// [`ToggleQueue::shutdown`] are dropped with a diagnostic.
    pub fn enqueue_dispose(&self, ptr: NativePtr) {
        let mut state = self.state.lock();
        if state.shutdown {
            drop(state);
            tracing::error!(
                target: "tether::toggle",
                %ptr,
                thread = ?std::thread::current().id(),
                "disposal reported after queue shutdown"
            );
            return;
        }
        if state.disposals.contains(&ptr) {
            return;
        }
        state.disposals.push_back(ptr);
        tracing::trace!(target: "tether::toggle", %ptr, pending = state.disposals.len(), "disposal queued");
    }

    /// Whether a disposal is waiting for `ptr`
    pub fn is_dispose_queued(&self, ptr: NativePtr) -> bool {
        self.state.lock().disposals.contains(&ptr)
    }

    /// Drop a waiting disposal for `ptr`, reporting whether there was one
    pub fn cancel_dispose(&self, ptr: NativePtr) -> bool {
        let mut state = self.state.lock();
        let before = state.disposals.len();
        state.disposals.retain(|p| *p != ptr);
        before != state.disposals.len()
    }

    /// Hand every queued disposal to `handler` in arrival order, outside the
    /// lock. Returns how many ran.
    pub fn drain_disposals(&self, mut handler: impl FnMut(NativePtr)) -> usize {
        let mut handled = 0;
        loop {
            let next = self.state.lock().disposals.pop_front();
            let Some(ptr) = next else {
                return handled;
            };
            handler(ptr);
            handled += 1;
        }
    }

    /// Number of queued disposals
    pub fn pending_disposals(&self) -> usize {
        self.state.lock().disposals.len()
    }

    /// Refuse further events
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        state.shutdown = true;
        if !state.events.is_empty() || !state.disposals.is_empty() {
            tracing::warn!(
                target: "tether::toggle",
                pending = state.events.len(),
                disposals = state.disposals.len(),
                "toggle queue shut down with events still pending"
            );
        }
    }

    /// Whether [`ToggleQueue::shutdown`] has been called
    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Number of pending events
    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    /// Check if no events are pending
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn pending_locked(events: &VecDeque<ToggleEvent>, ptr: NativePtr) -> Pending {
        let mut pending = Pending::default();
        for event in events.iter().filter(|e| e.ptr == ptr) {
            match event.direction {
                Direction::Up => pending.up = true,
                Direction::Down => pending.down = true,
            }
        }
        pending
    }
}

impl Default for ToggleQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ToggleQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ToggleQueue")
            .field("pending", &state.events.len())
            .field("disposals", &state.disposals.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn ptr(raw: u64) -> NativePtr {
        NativePtr::from_raw(raw).unwrap()
    }

    #[test]
    fn test_enqueue_and_is_queued() {
        let queue = ToggleQueue::new();
        queue.enqueue(ptr(1), Direction::Down);

        assert_eq!(queue.is_queued(ptr(1)), Pending { down: true, up: false });
        assert!(queue.is_queued(ptr(2)).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_preserves_order() {
        let queue = ToggleQueue::new();
        queue.enqueue(ptr(1), Direction::Down);
        queue.enqueue(ptr(2), Direction::Up);
        queue.enqueue(ptr(1), Direction::Up);

        let mut seen = Vec::new();
        let handled = queue.drain(|event| seen.push((event.ptr.as_u64(), event.direction)));

        assert_eq!(handled, 3);
        assert_eq!(
            seen,
            vec![(1, Direction::Down), (2, Direction::Up), (1, Direction::Up)]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_down_then_up_coexist() {
        let queue = ToggleQueue::new();
        queue.enqueue(ptr(5), Direction::Down);
        queue.enqueue(ptr(5), Direction::Up);

        let pending = queue.is_queued(ptr(5));
        assert!(pending.down && pending.up);
        assert!(pending.is_balanced());
        assert_eq!(pending.describe(), "up and down");
    }

    #[test]
    #[should_panic(expected = "already queued to toggle down")]
    fn test_double_toggle_is_fatal() {
        let queue = ToggleQueue::new();
        queue.enqueue(ptr(3), Direction::Down);
        queue.enqueue(ptr(3), Direction::Down);
    }

    #[test]
    fn test_cancel_reports_and_removes() {
        let queue = ToggleQueue::new();
        queue.enqueue(ptr(9), Direction::Down);
        queue.enqueue(ptr(4), Direction::Up);

        let cancelled = queue.cancel(ptr(9));
        assert_eq!(cancelled, Pending { down: true, up: false });
        assert!(!cancelled.is_balanced());

        let mut fired = Vec::new();
        queue.drain(|event| fired.push(event.ptr));
        assert_eq!(fired, vec![ptr(4)]);
    }

    #[test]
    fn test_handler_runs_outside_lock() {
        let queue = Arc::new(ToggleQueue::new());
        queue.enqueue(ptr(1), Direction::Up);

        let inner = Arc::clone(&queue);
        let mut requeued = false;
        let handled = queue.drain(|event| {
            // Inspecting or re-enqueuing from a handler must not deadlock
            assert!(inner.is_queued(event.ptr).is_empty());
            if !requeued {
                requeued = true;
                inner.enqueue(event.ptr, Direction::Down);
            }
        });
        assert_eq!(handled, 2);
    }

    #[test]
    fn test_enqueue_after_shutdown_is_dropped() {
        let queue = ToggleQueue::new();
        queue.shutdown();
        queue.enqueue(ptr(1), Direction::Up);
        assert!(queue.is_shutdown());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_disposals_queue_once_and_drain_in_order() {
        let queue = ToggleQueue::new();
        queue.enqueue_dispose(ptr(2));
        queue.enqueue_dispose(ptr(1));
        queue.enqueue_dispose(ptr(2));
        queue.enqueue(ptr(2), Direction::Down);

        assert_eq!(queue.pending_disposals(), 2);
        assert!(queue.is_dispose_queued(ptr(1)));
        // Toggles and disposals are tracked apart
        assert_eq!(queue.len(), 1);

        let mut seen = Vec::new();
        assert_eq!(queue.drain_disposals(|p| seen.push(p)), 2);
        assert_eq!(seen, vec![ptr(2), ptr(1)]);
        assert_eq!(queue.pending_disposals(), 0);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_cancel_dispose() {
        let queue = ToggleQueue::new();
        queue.enqueue_dispose(ptr(7));

        assert!(queue.cancel_dispose(ptr(7)));
        assert!(!queue.cancel_dispose(ptr(7)));
        assert!(!queue.is_dispose_queued(ptr(7)));

        queue.shutdown();
        queue.enqueue_dispose(ptr(8));
        assert_eq!(queue.pending_disposals(), 0);
    }

    #[test]
    fn test_concurrent_producers() {
        let queue = ToggleQueue::new();

        crossbeam::scope(|s| {
            for t in 0..4u64 {
                let queue = &queue;
                s.spawn(move |_| {
                    for i in 0..64u64 {
                        queue.enqueue(ptr(1 + t * 1000 + i), Direction::Down);
                    }
                });
            }
        })
        .unwrap();

        assert_eq!(queue.len(), 256);
        assert_eq!(queue.drain(|_| {}), 256);
    }
}
