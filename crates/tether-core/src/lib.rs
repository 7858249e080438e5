//! Core value model for the tether bridge.
//!
//! This crate holds the leaf types shared by the conversion machinery:
//!
//! - [`TypeHash`]: deterministic native type identity
//! - [`Dynamic`], [`ObjectHeap`], [`HostTypes`]: the host runtime object model
//! - [`NativeView`], [`NativePtr`], [`Shared`]: access to native storage
//! - [`Instance`] and [`Holder`]: wrapper instance layout and ownership
//! - [`ReturnPolicy`]: how values crossing into the host are owned
//! - The error enums

pub mod error;
pub mod ids;
pub mod instance;
pub mod native;
pub mod policy;
pub mod runtime;
pub mod type_hash;

pub use error::{AccessError, CallError, CastError, ConstructionError, RegistrationError, TetherError};
pub use ids::{HostTypeId, ModuleId, TypeInfoId};
pub use instance::{Holder, HolderKind, Instance, InstanceFlags, ValueSlot};
pub use native::{NativeCell, NativePtr, NativeView, Projection, Shared, new_cell};
pub use policy::{ReturnPolicy, ValueShape};
pub use runtime::{
    Capsule, Dynamic, FloatHook, HeapObject, HostType, HostTypes, IntHook, NumberProtocol, ObjectBody,
    ObjectHandle, ObjectHeap, TruthHook,
};
pub use type_hash::TypeHash;
