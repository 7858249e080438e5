//! Identifier types for host types, wrapper descriptors and module scopes.

use std::fmt;

/// Identifies a host-runtime type in the host type table.
///
/// The first few ids are reserved for the built-in host types.
///
/// ```
/// use tether_core::HostTypeId;
///
/// assert_eq!(HostTypeId::OBJECT.index(), 0);
/// assert!(HostTypeId::INT.is_builtin());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostTypeId(u32);

impl HostTypeId {
    /// Root of every host type.
    pub const OBJECT: HostTypeId = HostTypeId(0);
    /// The type of `None`.
    pub const NONE: HostTypeId = HostTypeId(1);
    /// Booleans, a subtype of `INT`.
    pub const BOOL: HostTypeId = HostTypeId(2);
    /// Integers.
    pub const INT: HostTypeId = HostTypeId(3);
    /// Floats.
    pub const FLOAT: HostTypeId = HostTypeId(4);
    /// Strings.
    pub const STR: HostTypeId = HostTypeId(5);
    /// Immutable sequences.
    pub const TUPLE: HostTypeId = HostTypeId(6);
    /// Mutable sequences.
    pub const LIST: HostTypeId = HostTypeId(7);
    /// Opaque native payloads.
    pub const CAPSULE: HostTypeId = HostTypeId(8);

    /// Number of reserved built-in ids.
    pub const BUILTIN_COUNT: u32 = 9;

    /// Create a host type id with the given index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the underlying index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Whether this id names one of the built-in host types.
    #[inline]
    pub const fn is_builtin(self) -> bool {
        self.0 < Self::BUILTIN_COUNT
    }
}

impl fmt::Display for HostTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "host_type_{}", self.0)
    }
}

/// Identifies a wrapper type descriptor in the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeInfoId(u32);

impl TypeInfoId {
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TypeInfoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "type_info_{}", self.0)
    }
}

/// Identifies an embedding module, the scope of module-local registrations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    #[inline]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module_{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_ids() {
        assert!(HostTypeId::CAPSULE.is_builtin());
        assert!(!HostTypeId::new(HostTypeId::BUILTIN_COUNT).is_builtin());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", HostTypeId::new(12)), "host_type_12");
        assert_eq!(format!("{}", TypeInfoId::new(3)), "type_info_3");
        assert_eq!(format!("{}", ModuleId::new(1)), "module_1");
    }
}
