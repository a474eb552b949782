//! Integration tests for cross-thread toggle handling

mod common;

use common::Fixture;
use std::sync::Arc;
use tether_core::{BridgeOptions, Direction, NativeSystem, Pending};
use tether_sim::SimNative;

fn off_thread(native: &Arc<SimNative>, work: impl FnOnce(&SimNative) + Send) {
    let native = Arc::clone(native);
    std::thread::scope(|s| {
        s.spawn(move || work(&native));
    });
}

#[test]
fn test_off_thread_down_then_up_drains_to_rooted() {
    let f = Fixture::new();
    let (ptr, wrapper) = f.wrap_tracked(f.button);
    assert!(f.h.ctx.is_rooted(wrapper).unwrap());

    off_thread(&f.h.native, move |native| {
        native.unref_object(ptr);
        native.ref_object(ptr);
    });

    // Nothing happens until the owning thread drains
    assert_eq!(f.h.ctx.pending_toggles(), 2);
    assert_eq!(
        f.h.ctx.toggle_queue().is_queued(ptr),
        Pending { down: true, up: true }
    );
    assert!(f.h.ctx.is_rooted(wrapper).unwrap());

    let requested = f.h.heap.gc_requests();
    assert_eq!(f.h.ctx.dispatch_toggles(), 2);
    assert!(f.h.ctx.is_rooted(wrapper).unwrap());
    assert!(f.h.heap.is_rooted(wrapper));
    assert_eq!(f.h.heap.gc_requests(), requested + 1);

    // Every event ran exactly once
    assert_eq!(f.h.ctx.pending_toggles(), 0);
    assert_eq!(f.h.ctx.dispatch_toggles(), 0);
}

#[test]
fn test_queued_toggles_applied_before_collection() {
    let f = Fixture::new();
    let (ptr, wrapper) = f.wrap_tracked(f.button);

    off_thread(&f.h.native, move |native| native.unref_object(ptr));
    assert_eq!(f.h.ctx.pending_toggles(), 1);

    let stats = f.h.collect();
    assert_eq!(f.h.ctx.pending_toggles(), 0);
    assert_eq!(stats.last_swept_pairings, 1);
    assert!(!f.h.heap.is_alive(wrapper));
    assert!(f.h.native.is_freed(ptr));
}

#[test]
fn test_on_gc_begin_respects_options() {
    let f = Fixture::with_options(BridgeOptions::default().with_drain_before_gc(false));
    let (ptr, wrapper) = f.wrap_tracked(f.button);

    off_thread(&f.h.native, move |native| native.unref_object(ptr));
    assert_eq!(f.h.ctx.on_gc_begin(), 0);
    assert_eq!(f.h.ctx.pending_toggles(), 1);
    assert!(f.h.ctx.is_rooted(wrapper).unwrap());

    assert_eq!(f.h.ctx.dispatch_toggles(), 1);
    assert!(!f.h.ctx.is_rooted(wrapper).unwrap());
}

#[test]
fn test_sweep_cancels_balanced_pending_toggles() {
    let f = Fixture::with_options(BridgeOptions::default().with_drain_before_gc(false));
    let (ptr, wrapper) = f.wrap_tracked(f.button);

    // Native code drops its reference on the owning thread: weak now
    f.h.native.unref_object(ptr);
    assert!(!f.h.ctx.is_rooted(wrapper).unwrap());

    off_thread(&f.h.native, move |native| {
        native.ref_object(ptr);
        native.unref_object(ptr);
    });
    assert_eq!(
        f.h.ctx.toggle_queue().is_queued(ptr),
        Pending { down: true, up: true }
    );

    f.h.collect();
    assert_eq!(f.h.ctx.pending_toggles(), 0);
    assert!(!f.h.heap.is_alive(wrapper));
    assert!(f.h.native.is_freed(ptr));
    assert_eq!(f.h.ctx.dispatch_toggles(), 0);
}

#[test]
fn test_cancel_reports_pending_down() {
    let f = Fixture::new();
    let (ptr, wrapper) = f.wrap_tracked(f.button);
    let queue = f.h.ctx.toggle_queue();

    queue.enqueue(ptr, Direction::Down);
    assert_eq!(queue.cancel(ptr), Pending { down: true, up: false });

    // The cancelled DOWN never unroots the wrapper
    assert_eq!(f.h.ctx.dispatch_toggles(), 0);
    assert!(f.h.ctx.is_rooted(wrapper).unwrap());
}

#[test]
fn test_owner_up_behind_queued_down_is_deferred() {
    let f = Fixture::new();
    let (ptr, wrapper) = f.wrap_tracked(f.button);

    off_thread(&f.h.native, move |native| native.unref_object(ptr));
    f.h.native.ref_object(ptr);
    assert_eq!(f.h.ctx.pending_toggles(), 2);

    f.h.ctx.dispatch_toggles();
    assert!(f.h.ctx.is_rooted(wrapper).unwrap());
}

#[test]
#[should_panic(expected = "already queued to toggle up and down")]
fn test_contradictory_owner_toggle_is_fatal() {
    let f = Fixture::new();
    let (ptr, _wrapper) = f.wrap_tracked(f.button);

    off_thread(&f.h.native, move |native| native.unref_object(ptr));
    f.h.native.ref_object(ptr);
    f.h.native.unref_object(ptr);
}

#[test]
#[should_panic(expected = "toggle references are still pending")]
fn test_stranded_toggle_is_fatal_on_sweep() {
    let f = Fixture::with_options(BridgeOptions::default().with_drain_before_gc(false));
    let (ptr, wrapper) = f.wrap_tracked(f.button);
    f.h.native.unref_object(ptr);
    assert!(!f.h.ctx.is_rooted(wrapper).unwrap());

    off_thread(&f.h.native, move |native| native.ref_object(ptr));
    f.h.collect();
}

#[test]
fn test_toggles_after_shutdown_are_dropped() {
    let f = Fixture::new();
    let (ptr, _wrapper) = f.wrap_tracked(f.button);

    f.h.ctx.shutdown();
    assert!(f.h.ctx.toggle_queue().is_shutdown());

    f.h.ctx.toggle_queue().enqueue(ptr, Direction::Up);
    assert_eq!(f.h.ctx.pending_toggles(), 0);

    // Delivered straight to the context, ignored while destroyed
    f.h.ctx.toggle_notify(ptr, false);
    assert_eq!(f.h.ctx.pending_toggles(), 0);
}

#[test]
fn test_concurrent_producers_on_distinct_objects() {
    let f = Fixture::new();
    let pairs: Vec<_> = (0..4).map(|_| f.wrap_tracked(f.button)).collect();
    let ptrs: Vec<_> = pairs.iter().map(|(ptr, _)| *ptr).collect();

    let native = Arc::clone(&f.h.native);
    crossbeam::scope(|s| {
        for ptr in &ptrs {
            let native = &native;
            s.spawn(move |_| {
                native.unref_object(*ptr);
                native.ref_object(*ptr);
            });
        }
    })
    .unwrap();

    assert_eq!(f.h.ctx.pending_toggles(), 8);
    assert_eq!(f.h.ctx.dispatch_toggles(), 8);
    for (ptr, wrapper) in &pairs {
        assert!(f.h.ctx.is_rooted(*wrapper).unwrap());
        assert_eq!(f.h.native.ref_count(*ptr), 2);
    }
}
