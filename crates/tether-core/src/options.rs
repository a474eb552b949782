//! Bridge configuration

use crate::defaults::{
    DEFAULT_DRAIN_BEFORE_GC, DEFAULT_GC_ON_TOGGLE_DOWN, DEFAULT_VFUNC_PREFIX,
    ENV_NO_GC_ON_TOGGLE_DOWN, ENV_VFUNC_PREFIX,
};

/// Options for a bridge [`Context`](crate::Context)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeOptions {
    /// Prefix that routes a member lookup to virtual-function resolution
    pub vfunc_prefix: String,

    /// Schedule a collection whenever a wrapper is unrooted by a toggle-down
    pub gc_on_toggle_down: bool,

    /// Drain the toggle queue from [`Context::on_gc_begin`](crate::Context::on_gc_begin)
    pub drain_before_gc: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            vfunc_prefix: DEFAULT_VFUNC_PREFIX.to_string(),
            gc_on_toggle_down: DEFAULT_GC_ON_TOGGLE_DOWN,
            drain_before_gc: DEFAULT_DRAIN_BEFORE_GC,
        }
    }
}

impl BridgeOptions {
    /// Defaults overlaid with `TETHER_*` environment variables
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(prefix) = std::env::var(ENV_VFUNC_PREFIX) {
            if !prefix.is_empty() {
                options.vfunc_prefix = prefix;
            }
        }
        if std::env::var_os(ENV_NO_GC_ON_TOGGLE_DOWN).is_some() {
            options.gc_on_toggle_down = false;
        }
        options
    }

    /// Use a different virtual-function prefix
    pub fn with_vfunc_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.vfunc_prefix = prefix.into();
        self
    }

    /// Enable or disable scheduling a collection on toggle-down
    pub fn with_gc_on_toggle_down(mut self, enabled: bool) -> Self {
        self.gc_on_toggle_down = enabled;
        self
    }

    /// Enable or disable draining the toggle queue when a collection begins
    pub fn with_drain_before_gc(mut self, enabled: bool) -> Self {
        self.drain_before_gc = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = BridgeOptions::default();
        assert_eq!(options.vfunc_prefix, "vfunc_");
        assert!(options.gc_on_toggle_down);
        assert!(options.drain_before_gc);
    }

    #[test]
    fn test_builder() {
        let options = BridgeOptions::default()
            .with_vfunc_prefix("do_")
            .with_gc_on_toggle_down(false);
        assert_eq!(options.vfunc_prefix, "do_");
        assert!(!options.gc_on_toggle_down);
        assert!(options.drain_before_gc);
    }
}
