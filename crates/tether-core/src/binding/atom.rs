//! Member name interning
//!
//! Member caches are keyed by [`Atom`]s instead of owned strings, so a cache
//! probe is a 4-byte hash and equality check.

use rustc_hash::FxHashMap;
use std::num::NonZeroU32;

/// An interned member name (32-bit index).
///
/// Atoms are only meaningful for the [`Interner`] that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Atom(NonZeroU32);

impl Atom {
    #[inline]
    fn from_index(index: usize) -> Option<Self> {
        u32::try_from(index + 1).ok().and_then(NonZeroU32::new).map(Atom)
    }

    #[inline]
    fn index(self) -> usize {
        (self.0.get() - 1) as usize
    }
}

/// Member name interner
#[derive(Debug, Clone, Default)]
pub struct Interner {
    /// Map from name to atom
    map: FxHashMap<String, Atom>,

    /// Interned names, indexed by atom
    strings: Vec<String>,
}

impl Interner {
    /// Create a new empty interner
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a name, returning its atom.
    ///
    /// Returns `None` only if the atom space (u32) is exhausted.
    pub fn intern(&mut self, name: &str) -> Option<Atom> {
        if let Some(&atom) = self.map.get(name) {
            return Some(atom);
        }

        let atom = Atom::from_index(self.strings.len())?;
        self.strings.push(name.to_string());
        self.map.insert(name.to_string(), atom);
        Some(atom)
    }

    /// Look up a name without interning it
    pub fn get(&self, name: &str) -> Option<Atom> {
        self.map.get(name).copied()
    }

    /// Resolve an atom back to its name
    pub fn resolve(&self, atom: Atom) -> Option<&str> {
        self.strings.get(atom.index()).map(String::as_str)
    }

    /// Number of interned names
    pub fn len(&self) -> usize {
        self.strings.len()
    }

    /// Check if nothing has been interned
    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }
}
