//! Instance lifetime state machine
//!
//! ```text
//!                associate            root
//! Unassociated ───────────► WeakAssociated ⇄ RootedAssociated
//!                                 │  unroot          │
//!                                 └───────┬──────────┘
//!                                         ▼ disassociate
//!                          Disassociated(Disposed | Finalized)
//! ```
//!
//! Alongside the phase, three flags record facts that outlive a single
//! phase: whether the pairing was upgraded to toggle tracking, whether the
//! native object has been disposed, and whether the managed wrapper is known
//! to be finalized. Every change goes through a named transition; an illegal
//! transition is a consistency violation.

use crate::error::{fatal, ConsistencyViolation};

/// Why a pairing was severed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severance {
    /// The bridge released the native side (context shutdown)
    Disposed,
    /// The managed wrapper was collected
    Finalized,
}

/// Coarse lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not yet paired with a native object
    Unassociated,
    /// Paired; the wrapper may be collected
    WeakAssociated,
    /// Paired; the wrapper is a GC root
    RootedAssociated,
    /// Pairing torn down
    Disassociated(Severance),
}

/// Per-instance lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    phase: Phase,
    toggle_tracked: bool,
    native_disposed: bool,
    wrapper_finalized: bool,
}

impl Lifecycle {
    /// Fresh, unassociated state
    pub fn new() -> Self {
        Self {
            phase: Phase::Unassociated,
            toggle_tracked: false,
            native_disposed: false,
            wrapper_finalized: false,
        }
    }

    /// Current phase
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Paired with a native object (rooted or weak)
    pub fn is_associated(&self) -> bool {
        matches!(self.phase, Phase::WeakAssociated | Phase::RootedAssociated)
    }

    /// The wrapper is currently a GC root
    pub fn is_rooted(&self) -> bool {
        self.phase == Phase::RootedAssociated
    }

    /// Upgraded to toggle tracking
    pub fn uses_toggle_ref(&self) -> bool {
        self.toggle_tracked
    }

    /// The native object has been disposed
    pub fn native_disposed(&self) -> bool {
        self.native_disposed
    }

    /// The managed wrapper has been finalized
    pub fn wrapper_finalized(&self) -> bool {
        self.wrapper_finalized
    }

    /// Unassociated → WeakAssociated
    pub fn associate(&mut self) {
        if self.phase != Phase::Unassociated {
            fatal(ConsistencyViolation::IllegalTransition("associate an already paired instance"));
        }
        self.phase = Phase::WeakAssociated;
        self.toggle_tracked = false;
    }

    /// Mark the pairing as toggle tracked.
    ///
    /// Returns false if it already was. The wrapper must not be rooted yet.
    pub fn begin_tracking(&mut self) -> bool {
        if self.toggle_tracked {
            return false;
        }
        if self.phase != Phase::WeakAssociated {
            fatal(ConsistencyViolation::IllegalTransition("begin toggle tracking outside the weak phase"));
        }
        self.toggle_tracked = true;
        true
    }

    /// WeakAssociated → RootedAssociated
    pub fn root(&mut self) {
        if self.phase != Phase::WeakAssociated {
            fatal(ConsistencyViolation::IllegalTransition("root a wrapper that is not weakly associated"));
        }
        self.phase = Phase::RootedAssociated;
    }

    /// RootedAssociated → WeakAssociated
    pub fn unroot(&mut self) {
        if self.phase != Phase::RootedAssociated {
            fatal(ConsistencyViolation::IllegalTransition("unroot a wrapper that is not rooted"));
        }
        self.phase = Phase::WeakAssociated;
    }

    /// Record native disposal; the phase is unchanged
    pub fn mark_disposed(&mut self) {
        self.native_disposed = true;
    }

    /// Associated → Disassociated
    pub fn disassociate(&mut self, severance: Severance) {
        if !self.is_associated() {
            fatal(ConsistencyViolation::IllegalTransition("disassociate an instance that is not paired"));
        }
        self.phase = Phase::Disassociated(severance);
        if severance == Severance::Finalized {
            self.wrapper_finalized = true;
        }
    }

    /// Record that the wrapper was finalized without a prior disassociation
    pub fn mark_finalized(&mut self) {
        self.wrapper_finalized = true;
    }
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}
