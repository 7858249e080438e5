//! Deterministic hash-based native type identity.
//!
//! This module provides [`TypeHash`], a 64-bit hash identifying a native type
//! known to the bridge. Hashes are computed from names rather than handed out
//! sequentially, which gives:
//!
//! - Forward references (conversions can target a type before it registers)
//! - No registration order dependencies
//! - Same native type = same hash in every module scope
//!
//! # Hash Computation
//!
//! Uses XXHash64 with domain-specific mixing constants so that a native type
//! name and a host attribute key never collide even if their text matches.
//!
//! # Examples
//!
//! ```
//! use tether_core::TypeHash;
//!
//! let a = TypeHash::of::<f64>();
//! let b = TypeHash::of::<f64>();
//! assert_eq!(a, b);
//! assert_ne!(a, TypeHash::of::<i64>());
//! ```

use std::fmt;
use xxhash_rust::xxh64::xxh64;

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Domain marker for hashes built from a free-form name
    pub const TYPE: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for hashes built from a Rust type path
    pub const NATIVE: u64 = 0x6b1d9e0c47f35a21;

    /// Domain marker for module-scoped keys
    pub const MODULE: u64 = 0x9a7f3d5e2b8c4601;
}

/// A deterministic 64-bit hash identifying a native type.
///
/// Two registrations of the same Rust type always agree on the hash, which is
/// what lets a module-local descriptor find its process-wide counterpart and
/// lets a foreign module's loader check that it handles the same native type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Create a hash from a free-form type name.
    ///
    /// ```
    /// use tether_core::TypeHash;
    ///
    /// assert_eq!(TypeHash::from_name("Pet"), TypeHash::from_name("Pet"));
    /// assert_ne!(TypeHash::from_name("Pet"), TypeHash::from_name("Dog"));
    /// ```
    #[inline]
    pub fn from_name(name: &str) -> Self {
        TypeHash(hash_constants::TYPE ^ xxh64(name.as_bytes(), 0))
    }

    /// Create the identity of a Rust type.
    ///
    /// Built from [`std::any::type_name`], so it compares types by their full
    /// path the way native type identities are compared across modules.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeHash(hash_constants::NATIVE ^ xxh64(std::any::type_name::<T>().as_bytes(), 0))
    }

    /// Create a key scoped to a module name.
    pub fn from_module_key(module: &str, key: &str) -> Self {
        let module_hash = xxh64(module.as_bytes(), 0);
        TypeHash(hash_constants::MODULE ^ xxh64(key.as_bytes(), module_hash))
    }

    /// Check if this is an empty/invalid hash.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Get the underlying u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Local;

    #[test]
    fn native_hash_determinism() {
        assert_eq!(TypeHash::of::<Local>(), TypeHash::of::<Local>());
        assert_eq!(TypeHash::of::<String>(), TypeHash::of::<String>());
    }

    #[test]
    fn native_hash_uniqueness() {
        assert_ne!(TypeHash::of::<i32>(), TypeHash::of::<i64>());
        assert_ne!(TypeHash::of::<Local>(), TypeHash::of::<String>());
        assert_ne!(TypeHash::of::<Option<i32>>(), TypeHash::of::<i32>());
    }

    #[test]
    fn name_and_native_domains_differ() {
        let name = std::any::type_name::<Local>();
        assert_ne!(TypeHash::from_name(name), TypeHash::of::<Local>());
    }

    #[test]
    fn module_keys_are_scoped() {
        let a = TypeHash::from_module_key("alpha", "Pet");
        let b = TypeHash::from_module_key("beta", "Pet");
        assert_ne!(a, b);
        assert_eq!(a, TypeHash::from_module_key("alpha", "Pet"));
    }

    #[test]
    fn empty_hash() {
        assert!(TypeHash::EMPTY.is_empty());
        assert!(!TypeHash::of::<u8>().is_empty());
    }

    #[test]
    fn debug_and_display() {
        let hash = TypeHash(0x10);
        assert_eq!(format!("{hash}"), "0x0000000000000010");
        assert_eq!(format!("{hash:?}"), "TypeHash(0x0000000000000010)");
    }
}
