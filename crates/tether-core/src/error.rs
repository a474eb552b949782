//! Error types
//!
//! Two families of failure cross the bridge:
//! - [`BridgeError`]: recoverable, local to the requesting call. The pairing
//!   involved is left intact.
//! - [`ConsistencyViolation`]: the two lifetime authorities disagree about an
//!   object. Continuing would risk a dangling dereference across the boundary,
//!   so these go through [`fatal`] and never return.

use crate::native::{NativePtr, TypeTag};
use thiserror::Error;

/// Failure reported by the native object system
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct NativeError(pub String);

impl NativeError {
    /// Create a native error from any message
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Recoverable bridge errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// The native object behind a wrapper has already been disposed
    #[error("Object {type_name} ({ptr}) has already been deallocated, impossible to {action} it")]
    ObjectDisposed {
        /// Native type name
        type_name: String,
        /// Native pointer
        ptr: NativePtr,
        /// What the caller tried to do
        action: &'static str,
    },

    /// Write to a member that is not writable
    #[error("Property {member} of {type_name} is not writable")]
    ReadOnlyMember {
        /// Native type name
        type_name: String,
        /// Member name
        member: String,
    },

    /// Member name not known to the type
    #[error("No property {member} on {type_name}")]
    NonexistentMember {
        /// Native type name
        type_name: String,
        /// Member name
        member: String,
    },

    /// Member name that can never resolve
    #[error("Invalid member name: {0:?}")]
    InvalidMemberName(String),

    /// Field whose type cannot be accessed directly
    #[error("Can't get field {member}; only fields with simple types are supported, not {tag:?}")]
    UnsupportedFieldType {
        /// Field name
        member: String,
        /// Offending type tag
        tag: TypeTag,
    },

    /// Writable instance field (setting those is not supported)
    #[error("Field {member} of {type_name} is writable, but setting it is not implemented")]
    Unimplemented {
        /// Native type name
        type_name: String,
        /// Field name
        member: String,
    },

    /// Attempt to instantiate an abstract type
    #[error("Cannot instantiate abstract type {0}")]
    AbstractType(String),

    /// Bad value in a construction initializer
    #[error("Invalid value 'undefined' for property {0} in object initializer")]
    InvalidInitializer(String),

    /// Signal name not known to the type
    #[error("No signal '{signal}' on object '{type_name}'")]
    NoSuchSignal {
        /// Signal name as given
        signal: String,
        /// Native type name
        type_name: String,
    },

    /// Wrong argument count for a signal emission
    #[error("Signal '{signal}' on {type_name} requires {expected} args got {got}")]
    SignalArity {
        /// Signal name
        signal: String,
        /// Native type name
        type_name: String,
        /// Declared parameter count
        expected: usize,
        /// Supplied argument count
        got: usize,
    },

    /// The same closure bridge was associated twice
    #[error("Closure {0} was already associated with this object")]
    DuplicateClosure(u64),

    /// A managed object that is not a wrapper known to this context
    #[error("Managed object {0} isn't wrapping a native object")]
    NotAWrapper(u64),

    /// Allocation failure while growing a cache
    #[error("Out of memory while caching {0}")]
    OutOfMemory(&'static str),

    /// Another context already owns the current thread
    #[error("A bridge context is already active on this thread")]
    ContextActive,

    /// Failure inside the native object system
    #[error("Native error: {0}")]
    Native(#[from] NativeError),
}

/// Bridge operation result
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Unrecoverable disagreement between the native and managed lifetimes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyViolation {
    /// A toggle was requested while the opposite (or same) direction is queued
    #[error("toggling {direction} object {type_name} ({ptr}) that's already queued to toggle {queued}")]
    ContradictoryToggle {
        /// Native pointer
        ptr: NativePtr,
        /// Native type name
        type_name: String,
        /// Incoming direction
        direction: &'static str,
        /// What was already pending
        queued: &'static str,
    },

    /// The same direction was enqueued twice for one pointer
    #[error("object {0} is already queued to toggle {1}")]
    DoubleToggle(NativePtr, &'static str),

    /// Disassociation found unmatched pending toggles
    #[error("wrapper for native object {ptr} ({type_name}) is being released while toggle references are still pending")]
    StrandedToggle {
        /// Native pointer
        ptr: NativePtr,
        /// Native type name
        type_name: String,
    },

    /// Wrapper finalized while an unroot is still queued
    #[error("finalizing wrapper for an object that's scheduled to be unrooted: {0}")]
    FinalizedWhileUnrootPending(String),

    /// Wrapper finalized after the native object was already freed
    #[error("finalizing wrapper for an already freed object of type: {0}")]
    FinalizedFreedObject(String),

    /// A state transition that the lifecycle never allows
    #[error("illegal lifecycle transition: {0}")]
    IllegalTransition(&'static str),
}

/// Report a consistency violation and terminate.
///
/// The release profile aborts on panic, so this ends the process there; the
/// test profile unwinds so violations can be asserted with `#[should_panic]`.
#[cold]
#[track_caller]
pub fn fatal(violation: ConsistencyViolation) -> ! {
    tracing::error!(target: "tether::lifecycle", %violation, "consistency violation");
    panic!("tether consistency violation: {violation}")
}
