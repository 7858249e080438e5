//! Return value policies.

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// How a native value crossing into the host runtime is owned.
///
/// The two automatic policies are placeholders resolved against the value's
/// [`ValueShape`] before a cast runs.
///
/// ```
/// use tether_core::{ReturnPolicy, ValueShape};
///
/// assert_eq!(ReturnPolicy::Automatic.resolve(ValueShape::Pointer), ReturnPolicy::TakeOwnership);
/// assert_eq!(ReturnPolicy::AutomaticReference.resolve(ValueShape::Pointer), ReturnPolicy::Reference);
/// assert_eq!(ReturnPolicy::Reference.resolve(ValueShape::Value), ReturnPolicy::Move);
/// ```
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ReturnPolicy {
    /// Take ownership of pointers, copy references, move values.
    #[default]
    Automatic = 0,
    /// Like `Automatic`, but pointers are referenced instead of adopted.
    AutomaticReference = 1,
    /// The bridge owns the value and destroys it with the instance.
    TakeOwnership = 2,
    /// The instance owns a fresh copy.
    Copy = 3,
    /// The instance owns the value moved out of the source.
    Move = 4,
    /// The instance references the value without owning or tracking it.
    Reference = 5,
    /// The instance references the value and keeps its parent alive.
    ReferenceInternal = 6,
}

/// The shape a native value has at the point it is cast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueShape {
    /// A value returned by value.
    Value,
    /// A borrowed reference without bridge-managed storage.
    Reference,
    /// A pointer into bridge-managed storage, or an owning box.
    Pointer,
    /// A shared-ownership holder.
    Holder,
}

impl ValueShape {
    /// Human-readable description used in error messages.
    pub fn describe(self) -> &'static str {
        match self {
            ValueShape::Value => "a value",
            ValueShape::Reference => "a reference",
            ValueShape::Pointer => "a pointer",
            ValueShape::Holder => "a holder",
        }
    }
}

impl ReturnPolicy {
    /// Resolve the automatic policies for a value shape.
    ///
    /// By-value results are always moved whatever the requested policy, and
    /// holders always share ownership.
    pub fn resolve(self, shape: ValueShape) -> ReturnPolicy {
        match shape {
            ValueShape::Value => ReturnPolicy::Move,
            ValueShape::Holder => ReturnPolicy::TakeOwnership,
            ValueShape::Pointer => match self {
                ReturnPolicy::Automatic => ReturnPolicy::TakeOwnership,
                ReturnPolicy::AutomaticReference => ReturnPolicy::Reference,
                other => other,
            },
            ValueShape::Reference => match self {
                ReturnPolicy::Automatic | ReturnPolicy::AutomaticReference => ReturnPolicy::Copy,
                other => other,
            },
        }
    }

    /// Whether the resolved policy leaves ownership with the native side.
    pub fn is_reference(self) -> bool {
        matches!(self, ReturnPolicy::Reference | ReturnPolicy::ReferenceInternal)
    }
}

impl fmt::Display for ReturnPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReturnPolicy::Automatic => "automatic",
            ReturnPolicy::AutomaticReference => "automatic_reference",
            ReturnPolicy::TakeOwnership => "take_ownership",
            ReturnPolicy::Copy => "copy",
            ReturnPolicy::Move => "move",
            ReturnPolicy::Reference => "reference",
            ReturnPolicy::ReferenceInternal => "reference_internal",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_shape_always_moves() {
        for policy in [
            ReturnPolicy::Automatic,
            ReturnPolicy::Copy,
            ReturnPolicy::Reference,
            ReturnPolicy::ReferenceInternal,
        ] {
            assert_eq!(policy.resolve(ValueShape::Value), ReturnPolicy::Move);
        }
    }

    #[test]
    fn reference_shape_copies_by_default() {
        assert_eq!(ReturnPolicy::Automatic.resolve(ValueShape::Reference), ReturnPolicy::Copy);
        assert_eq!(
            ReturnPolicy::AutomaticReference.resolve(ValueShape::Reference),
            ReturnPolicy::Copy
        );
        assert_eq!(
            ReturnPolicy::ReferenceInternal.resolve(ValueShape::Reference),
            ReturnPolicy::ReferenceInternal
        );
    }

    #[test]
    fn explicit_pointer_policies_are_kept() {
        assert_eq!(ReturnPolicy::Copy.resolve(ValueShape::Pointer), ReturnPolicy::Copy);
        assert_eq!(
            ReturnPolicy::ReferenceInternal.resolve(ValueShape::Pointer),
            ReturnPolicy::ReferenceInternal
        );
    }

    #[test]
    fn primitive_round_trip() {
        let raw: u8 = ReturnPolicy::ReferenceInternal.into();
        assert_eq!(raw, 6);
        assert_eq!(ReturnPolicy::try_from(3u8).unwrap(), ReturnPolicy::Copy);
        assert!(ReturnPolicy::try_from(42u8).is_err());
    }

    #[test]
    fn display_names() {
        assert_eq!(ReturnPolicy::TakeOwnership.to_string(), "take_ownership");
        assert_eq!(ReturnPolicy::default(), ReturnPolicy::Automatic);
    }
}
