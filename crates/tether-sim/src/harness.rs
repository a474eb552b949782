//! One object system, one heap and one bridge context

use crate::heap::{GcStats, SimHeap};
use crate::native::SimNative;
use std::rc::Rc;
use std::sync::Arc;
use tether_core::{BridgeOptions, BridgeResult, Context, ManagedRuntime, NativeSystem};

/// A bridge context wired to a fresh [`SimNative`] and [`SimHeap`]
///
/// The context becomes current on the creating thread; dropping the harness
/// shuts it down.
pub struct Harness {
    /// The object system
    pub native: Arc<SimNative>,
    /// The managed heap
    pub heap: Rc<SimHeap>,
    /// The bridge
    pub ctx: Context,
}

impl Harness {
    /// Harness with default options
    pub fn new() -> BridgeResult<Self> {
        Self::with_options(BridgeOptions::default())
    }

    /// Harness with explicit options
    pub fn with_options(options: BridgeOptions) -> BridgeResult<Self> {
        let native = Arc::new(SimNative::new());
        let heap = Rc::new(SimHeap::new());
        let ctx = Context::new(
            Arc::clone(&native) as Arc<dyn NativeSystem>,
            Rc::clone(&heap) as Rc<dyn ManagedRuntime>,
            options,
        )?;
        Ok(Self { native, heap, ctx })
    }

    /// Run a full collection
    pub fn collect(&self) -> GcStats {
        self.heap.collect(&self.ctx)
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        // A failed assertion may have left inconsistent state behind
        if std::thread::panicking() {
            return;
        }
        self.ctx.shutdown();
    }
}
