//! Host runtime values.

use std::fmt;

use super::ObjectHandle;

/// A value belonging to the host runtime.
///
/// Primitive values are stored inline. Everything else lives on the
/// [`ObjectHeap`](super::ObjectHeap) and is referred to by handle.
///
/// Cloning a `Dynamic` copies the handle, not the object, and does not touch
/// the reference count. Whether a particular `Dynamic` owns a reference is a
/// matter of the API that produced it: functions documented as returning a
/// *new reference* hand one over; arguments are borrowed.
#[derive(Clone, PartialEq)]
pub enum Dynamic {
    /// The host `None` singleton.
    None,
    /// A boolean.
    Bool(bool),
    /// An integer, held at the wide intermediate width.
    Int(i128),
    /// A double-precision float.
    Float(f64),
    /// A string.
    Str(String),
    /// A heap object: an instance, tuple, list or capsule.
    Object(ObjectHandle),
}

impl Dynamic {
    /// Name of the built-in kind of this value.
    ///
    /// Heap objects report `"object"`; their host type name is looked up
    /// through the runtime.
    pub fn type_name(&self) -> &'static str {
        match self {
            Dynamic::None => "NoneType",
            Dynamic::Bool(_) => "bool",
            Dynamic::Int(_) => "int",
            Dynamic::Float(_) => "float",
            Dynamic::Str(_) => "str",
            Dynamic::Object(_) => "object",
        }
    }

    /// Check if this is `None`.
    pub fn is_none(&self) -> bool {
        matches!(self, Dynamic::None)
    }

    /// The heap handle, if this is a heap object.
    pub fn as_handle(&self) -> Option<ObjectHandle> {
        match self {
            Dynamic::Object(handle) => Some(*handle),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i128> {
        match self {
            Dynamic::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Dynamic::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Dynamic::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Debug for Dynamic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dynamic::None => write!(f, "None"),
            Dynamic::Bool(v) => write!(f, "Bool({})", v),
            Dynamic::Int(v) => write!(f, "Int({})", v),
            Dynamic::Float(v) => write!(f, "Float({})", v),
            Dynamic::Str(s) => write!(f, "Str({:?})", s),
            Dynamic::Object(h) => write!(f, "Object({}:{})", h.index, h.generation),
        }
    }
}

impl From<bool> for Dynamic {
    fn from(value: bool) -> Self {
        Dynamic::Bool(value)
    }
}

impl From<i64> for Dynamic {
    fn from(value: i64) -> Self {
        Dynamic::Int(value as i128)
    }
}

impl From<i32> for Dynamic {
    fn from(value: i32) -> Self {
        Dynamic::Int(value as i128)
    }
}

impl From<f64> for Dynamic {
    fn from(value: f64) -> Self {
        Dynamic::Float(value)
    }
}

impl From<&str> for Dynamic {
    fn from(value: &str) -> Self {
        Dynamic::Str(value.to_string())
    }
}

impl From<String> for Dynamic {
    fn from(value: String) -> Self {
        Dynamic::Str(value)
    }
}

impl From<ObjectHandle> for Dynamic {
    fn from(handle: ObjectHandle) -> Self {
        Dynamic::Object(handle)
    }
}
