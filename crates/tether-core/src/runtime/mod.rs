//! Minimal host runtime object model.
//!
//! ## Key Types
//!
//! - [`Dynamic`]: A host value (primitives inline, everything else by handle)
//! - [`ObjectHeap`]: Generational arena for reference-counted host objects
//! - [`HostTypes`]: Host type table with resolution orders and attributes

mod dynamic;
mod host_type;
mod object_heap;

pub use dynamic::Dynamic;
pub use host_type::{FloatHook, HostType, HostTypes, IntHook, NumberProtocol, TruthHook};
pub use object_heap::{Capsule, HeapObject, ObjectBody, ObjectHandle, ObjectHeap};
