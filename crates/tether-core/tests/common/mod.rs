//! Shared fixtures for the integration tests

#![allow(dead_code)]

use tether_core::native::{
    FieldFlags, FieldInfo, FunctionFlags, FunctionInfo, ParamFlags, PropertyInfo, TypeTag, VFuncInfo,
};
use tether_core::{BridgeOptions, ManagedObject, NativePtr, NativeType};
use tether_sim::Harness;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// A small widget hierarchy registered in a fresh harness
///
/// ```text
/// Object ── Widget (implements Labelled) ── Button
///                                      └─── FancyButton (overrides draw)
/// Shape (abstract)   Bus (singleton)
/// ```
pub struct Fixture {
    pub h: Harness,
    pub labelled: NativeType,
    pub object: NativeType,
    pub widget: NativeType,
    pub button: NativeType,
    pub fancy_button: NativeType,
    pub shape: NativeType,
    pub bus: NativeType,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_options(BridgeOptions::default())
    }

    pub fn with_options(options: BridgeOptions) -> Self {
        init_tracing();
        let h = Harness::with_options(options).unwrap();
        let native = &h.native;

        let labelled = native
            .interface("Labelled")
            .info(|info| {
                info.with_property(PropertyInfo::new(
                    "mnemonic",
                    ParamFlags::READABLE | ParamFlags::WRITABLE,
                    TypeTag::Utf8,
                ))
                .with_method(FunctionInfo::new("get_label", FunctionFlags::IS_METHOD, 0))
            })
            .build();

        let object = native
            .class("Object")
            .signal("notify", 1, false)
            .info(|info| info)
            .build();

        let widget_builder = native.class("Widget");
        let widget_id = widget_builder.id();
        let widget = widget_builder
            .parent(object)
            .initially_unowned()
            .vfunc_address("draw", 0x10)
            .signal("clicked", 0, false)
            .field_value("flags", tether_core::Value::Int(7))
            .info(|info| {
                info.with_interface(labelled)
                    .with_property(PropertyInfo::new(
                        "label-text",
                        ParamFlags::READABLE | ParamFlags::WRITABLE,
                        TypeTag::Utf8,
                    ))
                    .with_property(PropertyInfo::new("name", ParamFlags::READABLE, TypeTag::Utf8))
                    .with_property(PropertyInfo::new(
                        "custom-prop",
                        ParamFlags::READABLE | ParamFlags::WRITABLE | ParamFlags::CUSTOM,
                        TypeTag::Int32,
                    ))
                    .with_property(PropertyInfo::new("secret", ParamFlags::WRITABLE, TypeTag::Utf8))
                    .with_field(FieldInfo::new("flags", FieldFlags::READABLE, TypeTag::Uint32, 16))
                    .with_field(FieldInfo::new("children", FieldFlags::READABLE, TypeTag::List, 24))
                    .with_field(FieldInfo::new(
                        "priv_count",
                        FieldFlags::READABLE | FieldFlags::WRITABLE,
                        TypeTag::Int32,
                        32,
                    ))
                    .with_method(FunctionInfo::new("show", FunctionFlags::IS_METHOD, 0))
                    .with_method(FunctionInfo::new("children", FunctionFlags::IS_METHOD, 0))
                    .with_method(FunctionInfo::new("flags", FunctionFlags::IS_METHOD, 0))
                    .with_method(FunctionInfo::new("new_default", FunctionFlags::empty(), 0))
                    .with_vfunc(VFuncInfo::new("draw", widget_id, 0))
            })
            .build();

        let button = native.class("Button").parent(widget).info(|info| info).build();
        let fancy_button = native
            .class("FancyButton")
            .parent(widget)
            .vfunc_address("draw", 0x20)
            .info(|info| info)
            .build();

        let shape = native.class("Shape").parent(object).abstract_type().info(|info| info).build();
        let bus = native.class("Bus").parent(object).singleton().info(|info| info).build();

        Self {
            h,
            labelled,
            object,
            widget,
            button,
            fancy_button,
            shape,
            bus,
        }
    }

    /// A native object created by native code, owning one reference
    pub fn instantiate(&self, ty: NativeType) -> NativePtr {
        self.h.native.instantiate(ty)
    }

    /// Wrap a fresh native object and return both halves
    pub fn wrap(&self, ty: NativeType) -> (NativePtr, ManagedObject) {
        let ptr = self.instantiate(ty);
        let wrapper = self.h.ctx.wrapper_for(ptr).unwrap();
        (ptr, wrapper)
    }

    /// Wrap a fresh native object and upgrade it to toggle tracking.
    ///
    /// For types that do not start floating, native code keeps its own
    /// reference and the wrapper ends up rooted.
    pub fn wrap_tracked(&self, ty: NativeType) -> (NativePtr, ManagedObject) {
        let (ptr, wrapper) = self.wrap(ty);
        self.h.ctx.ensure_tracked(wrapper).unwrap();
        (ptr, wrapper)
    }
}
