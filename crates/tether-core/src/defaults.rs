//! Default constants for bridge configuration.

/// Member-name prefix that marks a virtual-function override lookup.
pub const DEFAULT_VFUNC_PREFIX: &str = "vfunc_";

/// Whether a toggle-down schedules a collection by default.
pub const DEFAULT_GC_ON_TOGGLE_DOWN: bool = true;

/// Whether the toggle queue is drained when a collection begins.
pub const DEFAULT_DRAIN_BEFORE_GC: bool = true;

/// Initial capacity of the toggle queue.
pub const TOGGLE_QUEUE_CAPACITY: usize = 16;

/// Environment variable overriding the virtual-function prefix.
pub const ENV_VFUNC_PREFIX: &str = "TETHER_VFUNC_PREFIX";

/// Environment variable disabling the collection scheduled on toggle-down.
pub const ENV_NO_GC_ON_TOGGLE_DOWN: &str = "TETHER_NO_GC_ON_TOGGLE_DOWN";
