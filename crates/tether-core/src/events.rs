//! Routing of native notifications
//!
//! The native side holds an [`EventRouter`] for every object the bridge
//! watches. Notifications may arrive on any thread; only those on the
//! context's owning thread touch the context; toggles and disposals from
//! other threads go through the toggle queue.

use crate::context::Context;
use crate::native::{NativeEvents, NativePtr};
use crate::toggle::{Direction, ToggleQueue};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

pub(crate) struct EventRouter {
    context_id: u64,
    owner: ThreadId,
    queue: Arc<ToggleQueue>,
    destroying: AtomicBool,
}

impl EventRouter {
    pub(crate) fn new(context_id: u64, queue: Arc<ToggleQueue>) -> Self {
        Self {
            context_id,
            owner: thread::current().id(),
            queue,
            destroying: AtomicBool::new(false),
        }
    }

    pub(crate) fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    pub(crate) fn set_destroying(&self) {
        self.destroying.store(true, Ordering::Release);
    }

    pub(crate) fn is_destroying(&self) -> bool {
        self.destroying.load(Ordering::Acquire)
    }

    fn owner_context(&self) -> Option<Context> {
        Context::current().filter(|ctx| ctx.id() == self.context_id)
    }
}

impl NativeEvents for EventRouter {
    fn toggle_notify(&self, ptr: NativePtr, is_last_ref: bool) {
        // The pairings are being torn down; nothing left to root or unroot
        if self.is_destroying() {
            tracing::trace!(target: "tether::toggle", %ptr, is_last_ref, "toggle ignored during shutdown");
            return;
        }

        let direction = if is_last_ref { Direction::Down } else { Direction::Up };
        if !self.is_owner_thread() {
            self.queue.enqueue(ptr, direction);
            return;
        }

        match self.owner_context() {
            Some(ctx) => ctx.handle_owner_toggle(ptr, direction),
            None => tracing::warn!(
                target: "tether::toggle",
                %ptr,
                %direction,
                "toggle notification for a bridge context that no longer exists"
            ),
        }
    }

    fn dispose_notify(&self, ptr: NativePtr) {
        if !self.is_owner_thread() {
            tracing::debug!(
                target: "tether::lifecycle",
                %ptr,
                thread = ?thread::current().id(),
                "wrapped object disposed off the owning thread; deferring"
            );
            self.queue.enqueue_dispose(ptr);
            return;
        }
        if let Some(ctx) = self.owner_context() {
            ctx.dispose_notify(ptr);
        }
    }
}
