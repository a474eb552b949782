//! Integration tests for member access through wrappers
//!
//! Tests cover:
//! - construction from managed code and initializer validation
//! - property and field access rules
//! - method and virtual function calls
//! - signal connection, emission and closure ownership

mod common;

use common::Fixture;
use tether_core::native::TypeTag;
use tether_core::{BridgeError, ClosureBridge, NativeSystem, Value};

// ===== Construction =====

#[test]
fn test_create_native_with_properties() {
    let f = Fixture::new();
    let wrapper = f
        .h
        .ctx
        .create_native(f.widget, &[("label_text", Value::String("Hi".into()))])
        .unwrap();

    assert_eq!(
        f.h.ctx.get_property(wrapper, "labelText").unwrap(),
        Value::String("Hi".into())
    );
    let ptr = f.h.ctx.native_ptr(wrapper).unwrap().unwrap();
    assert_eq!(f.h.ctx.wrapper_for(ptr).unwrap(), wrapper);
    // Floating reference sunk and owned by the bridge
    assert_eq!(f.h.native.ref_count(ptr), 1);
}

#[test]
fn test_create_native_rejects_bad_initializers() {
    let f = Fixture::new();
    let ctx = &f.h.ctx;
    let before = f.h.native.live_objects();

    assert_eq!(
        ctx.create_native(f.widget, &[("bogus", Value::Int(1))]).unwrap_err(),
        BridgeError::NonexistentMember {
            type_name: "Widget".into(),
            member: "bogus".into(),
        }
    );
    assert_eq!(
        ctx.create_native(f.widget, &[("label_text", Value::Undefined)]).unwrap_err(),
        BridgeError::InvalidInitializer("label-text".into())
    );
    assert_eq!(
        ctx.create_native(f.widget, &[("name", Value::String("x".into()))]).unwrap_err(),
        BridgeError::ReadOnlyMember {
            type_name: "Widget".into(),
            member: "name".into(),
        }
    );

    // No native object was created for any of them
    assert_eq!(f.h.native.live_objects(), before);
}

#[test]
fn test_create_native_abstract_type() {
    let f = Fixture::new();
    assert_eq!(
        f.h.ctx.create_native(f.shape, &[]).unwrap_err(),
        BridgeError::AbstractType("Shape".into())
    );
}

#[test]
fn test_singleton_constructor_returns_existing_wrapper() {
    let f = Fixture::new();
    let first = f.h.ctx.create_native(f.bus, &[]).unwrap();
    let second = f.h.ctx.create_native(f.bus, &[]).unwrap();
    assert_eq!(first, second);

    let ptr = f.h.ctx.native_ptr(first).unwrap().unwrap();
    assert!(f.h.native.has_toggle_ref(ptr));
    assert!(!f.h.ctx.is_rooted(first).unwrap());
    assert_eq!(f.h.native.ref_count(ptr), 1);
    assert_eq!(f.h.ctx.live_instances(), 1);
}

// ===== Properties =====

#[test]
fn test_property_round_trip_through_native() {
    let f = Fixture::new();
    let (_ptr, wrapper) = f.wrap(f.widget);

    assert_eq!(f.h.ctx.get_property(wrapper, "label_text").unwrap(), Value::Null);
    f.h.ctx
        .set_property(wrapper, "label_text", Value::String("OK".into()))
        .unwrap();
    assert_eq!(
        f.h.ctx.get_property(wrapper, "label-text").unwrap(),
        Value::String("OK".into())
    );
}

#[test]
fn test_interface_property_through_subclass() {
    let f = Fixture::new();
    let (_ptr, wrapper) = f.wrap(f.button);
    f.h.ctx
        .set_property(wrapper, "mnemonic", Value::String("_Ok".into()))
        .unwrap();
    assert_eq!(
        f.h.ctx.get_property(wrapper, "mnemonic").unwrap(),
        Value::String("_Ok".into())
    );
}

#[test]
fn test_custom_and_unreadable_properties_read_undefined() {
    let f = Fixture::new();
    let (_ptr, wrapper) = f.wrap(f.widget);

    assert_eq!(f.h.ctx.get_property(wrapper, "custom_prop").unwrap(), Value::Undefined);
    assert_eq!(f.h.ctx.get_property(wrapper, "secret").unwrap(), Value::Undefined);

    // Writes to a managed-side property never reach the native object
    f.h.ctx.set_property(wrapper, "custom_prop", Value::Int(3)).unwrap();
    f.h.ctx
        .set_property(wrapper, "secret", Value::String("s".into()))
        .unwrap();
}

#[test]
fn test_read_only_property_write() {
    let f = Fixture::new();
    let (_ptr, wrapper) = f.wrap(f.widget);
    assert_eq!(
        f.h.ctx.set_property(wrapper, "name", Value::String("x".into())).unwrap_err(),
        BridgeError::ReadOnlyMember {
            type_name: "Widget".into(),
            member: "name".into(),
        }
    );
}

// ===== Fields =====

#[test]
fn test_field_access_rules() {
    let f = Fixture::new();
    let (_ptr, wrapper) = f.wrap(f.button);
    let ctx = &f.h.ctx;

    assert_eq!(ctx.get_field(wrapper, "flags").unwrap(), Value::Int(7));
    assert_eq!(
        ctx.get_field(wrapper, "children").unwrap_err(),
        BridgeError::UnsupportedFieldType {
            member: "children".into(),
            tag: TypeTag::List,
        }
    );
    assert_eq!(
        ctx.set_field(wrapper, "priv_count", Value::Int(1)).unwrap_err(),
        BridgeError::Unimplemented {
            type_name: "Button".into(),
            member: "priv_count".into(),
        }
    );
    assert_eq!(
        ctx.set_field(wrapper, "flags", Value::Int(1)).unwrap_err(),
        BridgeError::ReadOnlyMember {
            type_name: "Button".into(),
            member: "flags".into(),
        }
    );
    assert!(matches!(
        ctx.get_field(wrapper, "missing").unwrap_err(),
        BridgeError::NonexistentMember { .. }
    ));
}

// ===== Methods =====

#[test]
fn test_method_and_vfunc_calls() {
    let f = Fixture::new();
    let (ptr, wrapper) = f.wrap(f.fancy_button);
    let ctx = &f.h.ctx;

    ctx.call_method(wrapper, "show", &[]).unwrap();
    ctx.call_method(wrapper, "vfunc_draw", &[Value::Int(1)]).unwrap();
    ctx.call_method(wrapper, "get_label", &[]).unwrap();

    let calls: Vec<_> = f
        .h
        .native
        .invocations()
        .into_iter()
        .filter(|i| i.ptr == ptr)
        .map(|i| i.name)
        .collect();
    assert_eq!(calls, vec!["show", "draw", "get_label"]);

    assert!(matches!(
        ctx.call_method(wrapper, "explode", &[]).unwrap_err(),
        BridgeError::NonexistentMember { .. }
    ));
    // A property is not callable
    assert!(matches!(
        ctx.call_method(wrapper, "label_text", &[]).unwrap_err(),
        BridgeError::NonexistentMember { .. }
    ));
}

#[test]
fn test_access_after_disposal() {
    let f = Fixture::new();
    let (ptr, wrapper) = f.wrap_tracked(f.button);
    f.h.native.run_dispose(ptr);

    assert!(matches!(
        f.h.ctx.call_method(wrapper, "show", &[]).unwrap_err(),
        BridgeError::ObjectDisposed { action: "call any method on", .. }
    ));
    assert!(matches!(
        f.h.ctx.get_property(wrapper, "label_text").unwrap_err(),
        BridgeError::ObjectDisposed { .. }
    ));
    assert!(f.h.native.invocations().is_empty());
}

// ===== Signals =====

#[test]
fn test_connect_and_emit() {
    let f = Fixture::new();
    let (ptr, wrapper) = f.wrap(f.widget);
    let ctx = &f.h.ctx;

    let first = ctx.connect(wrapper, "clicked", f.h.heap.new_callback()).unwrap();
    let second = ctx.connect_after(wrapper, "clicked", f.h.heap.new_callback()).unwrap();
    assert_ne!(first, second);
    assert_eq!(f.h.native.handler_count(ptr), 2);
    assert_eq!(ctx.closure_count(wrapper).unwrap(), 2);

    // Owning closures upgrades the pairing to toggle tracking
    assert!(f.h.native.has_toggle_ref(ptr));

    assert_eq!(ctx.emit(wrapper, "clicked", &[]).unwrap(), Value::Undefined);
    let emission = f.h.native.emissions().pop().unwrap();
    assert_eq!(emission.signal, "clicked");
    assert_eq!(emission.handlers, 2);
}

#[test]
fn test_detailed_signal_on_parent_type() {
    let f = Fixture::new();
    let (_ptr, wrapper) = f.wrap(f.widget);

    f.h.ctx
        .connect(wrapper, "notify::label-text", f.h.heap.new_callback())
        .unwrap();
    f.h.ctx
        .emit(wrapper, "notify::label-text", &[Value::Null])
        .unwrap();

    let emission = f.h.native.emissions().pop().unwrap();
    assert_eq!(emission.signal, "notify");
    assert_eq!(emission.detail.as_deref(), Some("label-text"));
    assert_eq!(emission.handlers, 1);
}

#[test]
fn test_signal_errors() {
    let f = Fixture::new();
    let (_ptr, wrapper) = f.wrap(f.widget);
    let ctx = &f.h.ctx;

    assert_eq!(
        ctx.emit(wrapper, "clicked", &[Value::Int(1)]).unwrap_err(),
        BridgeError::SignalArity {
            signal: "clicked".into(),
            type_name: "Widget".into(),
            expected: 0,
            got: 1,
        }
    );
    assert_eq!(
        ctx.connect(wrapper, "exploded", f.h.heap.new_callback()).unwrap_err(),
        BridgeError::NoSuchSignal {
            signal: "exploded".into(),
            type_name: "Widget".into(),
        }
    );
    assert_eq!(ctx.closure_count(wrapper).unwrap(), 0);
}

#[test]
fn test_duplicate_closure_association() {
    let f = Fixture::new();
    let (_ptr, wrapper) = f.wrap(f.widget);
    let bridge = ClosureBridge::new(f.h.heap.new_callback(), None);

    f.h.ctx.associate_closure(wrapper, bridge.clone()).unwrap();
    assert_eq!(
        f.h.ctx.associate_closure(wrapper, bridge.clone()).unwrap_err(),
        BridgeError::DuplicateClosure(bridge.id().as_u64())
    );
    assert_eq!(f.h.ctx.closure_count(wrapper).unwrap(), 1);
}

#[test]
fn test_closures_keep_callbacks_alive_until_disconnected() {
    let f = Fixture::new();
    let (ptr, wrapper) = f.wrap(f.widget);
    let callback = f.h.heap.new_callback();
    let handler = f.h.ctx.connect(wrapper, "clicked", callback).unwrap();

    // Keep the wrapper itself reachable
    f.h.heap.hold(wrapper);

    f.h.collect();
    assert!(f.h.heap.is_alive(callback));

    assert!(f.h.native.disconnect(ptr, handler));
    assert_eq!(f.h.ctx.closure_count(wrapper).unwrap(), 0);

    f.h.collect();
    assert!(!f.h.heap.is_alive(callback));
    assert!(f.h.heap.is_alive(wrapper));
}

#[test]
fn test_closures_invalidated_when_pairing_is_swept() {
    let f = Fixture::new();
    let (ptr, wrapper) = f.wrap(f.widget);
    let bridge = ClosureBridge::new(f.h.heap.new_callback(), None);
    f.h.ctx.associate_closure(wrapper, bridge.clone()).unwrap();

    // Only the toggle reference is left, so nothing keeps the wrapper
    assert!(!f.h.ctx.is_rooted(wrapper).unwrap());
    f.h.collect();

    assert!(bridge.is_invalidated());
    assert!(f.h.native.is_freed(ptr));
}
