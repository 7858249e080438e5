//! Unified error types for the bridge.
//!
//! ## Error Hierarchy
//!
//! ```text
//! TetherError (top-level wrapper)
//! ├── RegistrationError  - Type registration and conversion declaration errors
//! ├── CastError          - Hard failures while loading or casting values
//! ├── AccessError        - Borrowing native storage through a view
//! ├── ConstructionError  - Factory constructor failures
//! └── CallError          - Overload dispatch and native call failures
//! ```
//!
//! A load that simply does not match is *not* an error: casters report it as
//! `Ok(None)` and leave the decision to the caller. Invariant violations that
//! indicate a bridge bug (a missing instance registry entry at deallocation,
//! popping an empty life-support stack) panic instead of returning.

use thiserror::Error;

use crate::ids::ModuleId;
use crate::policy::ReturnPolicy;

// ============================================================================
// Registration Errors
// ============================================================================

/// Errors raised while registering types or declaring conversions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    /// The native type already has a descriptor in this scope.
    #[error("type {name} is already registered")]
    DuplicateType {
        /// Name of the native type.
        name: String,
    },

    /// A type named in a declaration has not been registered.
    #[error("unregistered type: {0}")]
    UnknownType(String),

    /// No native path exists for a declared implicit conversion.
    #[error("no native conversion path from {from} to {to}")]
    NoNativeConversion {
        /// Source native type.
        from: String,
        /// Target native type.
        to: String,
    },

    /// The declared cast would make a type its own ancestor.
    #[error("implicit cast from {derived} to {base} would create a cycle")]
    CyclicCast {
        /// The derived type.
        derived: String,
        /// The base type.
        base: String,
    },

    /// The module scope does not exist.
    #[error("unknown module {0}")]
    UnknownModule(ModuleId),
}

// ============================================================================
// Access Errors
// ============================================================================

/// Errors raised when borrowing native storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AccessError {
    /// A shared borrow was requested while a mutable borrow is live.
    #[error("native value is already mutably borrowed")]
    AlreadyMutablyBorrowed,

    /// A mutable borrow was requested while another borrow is live.
    #[error("native value is already borrowed")]
    AlreadyBorrowed,

    /// The storage does not hold the requested type.
    #[error("native value is not a {expected}")]
    TypeMismatch {
        /// The requested native type.
        expected: &'static str,
    },

    /// The storage behind a non-owning view has been dropped.
    #[error("native value no longer exists")]
    Dangling,
}

// ============================================================================
// Cast Errors
// ============================================================================

/// Hard failures of a load or cast.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CastError {
    /// The native type has no wrapper descriptor in scope.
    #[error("unregistered type: {type_name}")]
    Unregistered {
        /// Name of the native type.
        type_name: String,
    },

    /// An explicit one-shot cast did not match.
    #[error("unable to cast host instance of type {from} to native type '{to}'")]
    LoadFailed {
        /// Host type name of the value.
        from: String,
        /// Native target type name.
        to: String,
    },

    /// An explicit one-shot cast did not match (names withheld).
    #[error("unable to cast host instance to native type (enable detailed errors for details)")]
    LoadFailedOpaque,

    /// A copy was requested for a type without copy support.
    #[error("{type_name} is not copyable")]
    NotCopyable {
        /// Name of the native type.
        type_name: String,
    },

    /// A move was requested for storage that can neither move nor copy.
    #[error("{type_name} is neither movable nor copyable")]
    NotMovable {
        /// Name of the native type.
        type_name: String,
    },

    /// The return value policy does not apply to the value's shape.
    #[error("return value policy '{policy}' cannot be applied to {shape}")]
    InvalidPolicy {
        /// The requested policy.
        policy: ReturnPolicy,
        /// The value shape it was applied to.
        shape: &'static str,
    },

    /// A temporary needed keeping alive but no bridged call is active.
    #[error("conversions creating temporary values can only run inside a bridged call")]
    NoLifeSupport,

    /// A holder was requested from an instance that has none.
    #[error("unable to cast from non-held to held instance ({type_name} to holder)")]
    NonHeldToHeld {
        /// Name of the native type.
        type_name: String,
    },

    /// A shared holder was requested from a uniquely held instance.
    #[error("unable to load a shared holder from a default-holder instance of {type_name}")]
    HolderMismatch {
        /// Name of the native type.
        type_name: String,
    },

    /// A non-owning instance outlived the native value it referenced.
    #[error("referenced native {type_name} no longer exists")]
    DanglingReference {
        /// Name of the native type.
        type_name: String,
    },

    /// The instance slot for the type has not been constructed.
    #[error("instance of {type_name} has not been initialized")]
    Uninitialized {
        /// Name of the native type.
        type_name: String,
    },

    /// Converting one element of a sequence failed.
    #[error("failed to convert element {index}: {source}")]
    Element {
        /// Position of the element.
        index: usize,
        /// The element's error.
        #[source]
        source: Box<CastError>,
    },

    /// A keep-alive edge could not be created.
    #[error("could not keep object alive: {reason}")]
    KeepAlive {
        /// Why the edge was refused.
        reason: String,
    },

    /// A stale handle was used (object was freed).
    #[error("stale handle: object at index {index} has been freed")]
    StaleHandle {
        /// The index of the freed object.
        index: u32,
    },

    /// Borrowing the native storage failed.
    #[error(transparent)]
    Access(#[from] AccessError),
}

impl CastError {
    /// Wrap this error as the failure of a sequence element.
    pub fn in_element(self, index: usize) -> Self {
        CastError::Element {
            index,
            source: Box::new(self),
        }
    }
}

// ============================================================================
// Construction Errors
// ============================================================================

/// Errors raised by factory constructors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstructionError {
    /// A pointer-returning factory returned null.
    #[error("factory function returned a null pointer")]
    NullPointer,

    /// A base pointer did not point at the constructed type.
    #[error("factory failed: could not cast base class pointer")]
    BaseDowncast,

    /// A shared base pointer did not point at the constructed type.
    #[error("factory failed: could not cast shared base class pointer")]
    SharedBaseDowncast,

    /// A holder was returned for an alias construction but holds no alias.
    #[error("construction failed: returned holder-wrapped instance is not an alias instance")]
    HolderNotAlias,

    /// An alias is required but the returned value cannot become one.
    #[error("factory failed: cannot construct required alias class from factory return value")]
    AliasRequired,

    /// A returned host object is referenced from elsewhere.
    #[error("factory function returned an object with multiple references")]
    MultipleReferences,

    /// A returned host object does not own its native value.
    #[error("factory function returned an unowned reference")]
    Unowned,

    /// A returned host object has the wrong host type.
    #[error("factory function returned an object of incompatible type '{actual}'")]
    IncompatibleObject {
        /// Host type name of the returned object.
        actual: String,
    },

    /// The object being initialized is not an instance of the type.
    #[error("construction target is not a {type_name} instance")]
    NotAnInstance {
        /// Name of the native type.
        type_name: String,
    },
}

// ============================================================================
// Call Errors
// ============================================================================

fn numbered(signatures: &[String]) -> String {
    signatures
        .iter()
        .enumerate()
        .map(|(i, sig)| format!("    {}. {sig}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors raised while dispatching a bridged call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CallError {
    /// No overload accepted the arguments in either pass.
    #[error(
        "{name}(): incompatible function arguments. The following argument types are supported:\n{}\nInvoked with: {}",
        numbered(.signatures),
        .invoked.join(", ")
    )]
    NoMatchingOverload {
        /// Name of the overload set.
        name: String,
        /// Every signature that was tried.
        signatures: Vec<String>,
        /// Host type names of the arguments.
        invoked: Vec<String>,
    },

    /// A keep-alive or argument index is outside the call.
    #[error("argument index {index} out of bounds ({count} arguments)")]
    ArgumentIndexOutOfBounds {
        /// The requested index.
        index: usize,
        /// The number of arguments.
        count: usize,
    },

    /// The native function reported a failure.
    #[error("native function failed: {message}")]
    Native {
        /// The failure message.
        message: String,
    },
}

// ============================================================================
// Unified Error Type
// ============================================================================

/// Top-level error type for bridge operations.
///
/// ```
/// use tether_core::{CastError, TetherError};
///
/// fn bind() -> Result<(), TetherError> {
///     Err::<(), _>(CastError::NoLifeSupport)?;
///     Ok(())
/// }
///
/// assert!(bind().unwrap_err().is_cast());
/// ```
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TetherError {
    /// A registration error.
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    /// A cast error.
    #[error(transparent)]
    Cast(#[from] CastError),

    /// A native storage access error.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// A construction error.
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    /// A call dispatch error.
    #[error(transparent)]
    Call(#[from] CallError),
}

impl TetherError {
    /// Build a native failure from a message.
    pub fn native(message: impl Into<String>) -> Self {
        TetherError::Call(CallError::Native {
            message: message.into(),
        })
    }

    /// Check if this is a registration error.
    pub fn is_registration(&self) -> bool {
        matches!(self, TetherError::Registration(_))
    }

    /// Check if this is a cast error.
    pub fn is_cast(&self) -> bool {
        matches!(self, TetherError::Cast(_))
    }

    /// Check if this is an access error.
    pub fn is_access(&self) -> bool {
        matches!(self, TetherError::Access(_))
    }

    /// Check if this is a construction error.
    pub fn is_construction(&self) -> bool {
        matches!(self, TetherError::Construction(_))
    }

    /// Check if this is a call error.
    pub fn is_call(&self) -> bool {
        matches!(self, TetherError::Call(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_error_display() {
        let err = RegistrationError::NoNativeConversion {
            from: "A".to_string(),
            to: "E".to_string(),
        };
        assert_eq!(format!("{err}"), "no native conversion path from A to E");
    }

    #[test]
    fn cast_error_display() {
        let err = CastError::LoadFailed {
            from: "str".to_string(),
            to: "f64".to_string(),
        };
        assert_eq!(
            format!("{err}"),
            "unable to cast host instance of type str to native type 'f64'"
        );
    }

    #[test]
    fn element_error_keeps_source() {
        let err = CastError::NotCopyable {
            type_name: "Pet".to_string(),
        }
        .in_element(2);
        assert_eq!(format!("{err}"), "failed to convert element 2: Pet is not copyable");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn construction_error_display() {
        assert_eq!(
            format!("{}", ConstructionError::NullPointer),
            "factory function returned a null pointer"
        );
        assert_eq!(
            format!("{}", ConstructionError::MultipleReferences),
            "factory function returned an object with multiple references"
        );
    }

    #[test]
    fn no_matching_overload_lists_signatures() {
        let err = CallError::NoMatchingOverload {
            name: "print_double".to_string(),
            signatures: vec!["(f64) -> None".to_string(), "(i64) -> None".to_string()],
            invoked: vec!["str".to_string()],
        };
        let text = format!("{err}");
        assert!(text.starts_with("print_double(): incompatible function arguments."));
        assert!(text.contains("    1. (f64) -> None\n    2. (i64) -> None"));
        assert!(text.ends_with("Invoked with: str"));
    }

    #[test]
    fn tether_error_from_parts() {
        let err: TetherError = RegistrationError::UnknownType("Foo".to_string()).into();
        assert!(err.is_registration());
        assert!(!err.is_cast());

        let err: TetherError = ConstructionError::Unowned.into();
        assert!(err.is_construction());

        let err: TetherError = AccessError::Dangling.into();
        assert!(err.is_access());

        assert!(TetherError::native("boom").is_call());
    }
}
