//! Reference implementations of the tether seams
//!
//! [`SimNative`] is an in-process reference-counted object system and
//! [`SimHeap`] a small mark-sweep heap. Together with [`Harness`] they let
//! the bridge be exercised end to end without a real object system or
//! engine behind it.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod harness;
pub mod heap;
pub mod native;
pub mod types;

pub use harness::Harness;
pub use heap::{GcStats, HeapObjectKind, RootSet, SimHeap};
pub use native::{Emission, Invocation, SimNative};
pub use types::{ClassBuilder, InterfaceBuilder, NAMESPACE};
