//! Tether: ownership bridge between a reference-counted object system and a
//! garbage-collected runtime
//!
//! A managed wrapper has to behave as if it *were* the native object it
//! stands for, while the two halves answer to different lifetime authorities.
//! This crate provides the adapter between them:
//! - Associative tag store (native object / type → bridge record)
//! - Toggle reference queue (cross-thread refcount transitions)
//! - Instance lifecycle state machine (rooted vs. weak, teardown)
//! - Prototype resolution cache (lazy members from type metadata)
//! - Closure registry (signal callbacks owned by an instance)
//! - Instance directory (global sweeps at GC and shutdown time)
//!
//! The native object system and the managed runtime are consumed through the
//! [`NativeSystem`] and [`ManagedRuntime`] traits; [`Context`] is the single
//! owner-thread entry point that ties everything together.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod binding;
pub mod closure;
pub mod context;
pub mod defaults;
pub mod directory;
pub mod error;
pub mod instance;
pub mod lifecycle;
pub mod managed;
pub mod native;
pub mod options;
pub mod tag;
pub mod toggle;

mod access;
mod events;

pub use binding::{Accessor, Atom, BindingId, BindingRegistry, Interner, Resolution, TypeBinding};
pub use closure::{ClosureBridge, ClosureId, ClosureSet};
pub use context::Context;
pub use directory::{Directory, Handle};
pub use error::{fatal, BridgeError, BridgeResult, ConsistencyViolation, NativeError};
pub use instance::WrappedInstance;
pub use lifecycle::{Lifecycle, Phase, Severance};
pub use managed::{ManagedObject, ManagedRuntime};
pub use native::{NativeEvents, NativePtr, NativeSystem, NativeType, Value};
pub use options::BridgeOptions;
pub use tag::{InstanceTag, TagStore};
pub use toggle::{Direction, Pending, ToggleEvent, ToggleQueue};
