//! Tether
//!
//! A bridge between native Rust values and a dynamic, reference-counted host
//! runtime.
//!
//! ## Architecture
//!
//! - **Registration**: native types are registered as wrapper types, each
//!   backed by a host type, and implicit casts and conversions are declared
//!   between native types
//! - **Loading**: host values are loaded as native values by casters, falling
//!   back to implicit conversions when an overload pass allows them
//! - **Casting**: native values become host instances under a return value
//!   policy that decides who owns the storage
//!
//! ## Modules
//!
//! - [`caster`]: host to native and native to host value converters
//! - [`config`]: runtime configuration
//! - [`factory`]: constructing instances from factory return values
//! - [`life_support`]: temporaries kept alive for the duration of a call
//! - [`loader`]: call argument loading and overload dispatch
//! - [`registry`]: wrapper descriptors and conversion tables
//! - [`runtime`]: the context tying the host runtime and the registry together

pub mod caster;
pub mod config;
pub mod factory;
mod implicit;
pub mod life_support;
pub mod loader;
pub mod registry;
pub mod runtime;

pub use caster::{
    FromDynamic, IntoDynamic, LoadResult, LoadedValue, NativeValue, Opaque, Union2, Union3, Union4, load_arg,
    load_type,
};
pub use config::RuntimeConfig;
pub use factory::{FactoryReturn, construct_from};
pub use life_support::LifeSupport;
pub use loader::{FunctionCall, LoadArgs, Overload, OverloadSet};
pub use registry::{TypeFlags, TypeInfo, TypeRegistry, TypeSpec};
pub use runtime::Runtime;

// Re-export the value model from core for convenience
pub use tether_core::{
    AccessError, CallError, Capsule, CastError, ConstructionError, Dynamic, Holder, HolderKind, HostTypeId,
    ModuleId, NativeCell, NativePtr, NativeView, Projection, RegistrationError, ReturnPolicy, Shared, TetherError,
    TypeHash, TypeInfoId, ValueShape, new_cell,
};
