//! Object casters: host passthrough, opaque pointers and registered types.

use std::any::{Any, type_name};
use std::borrow::Cow;

use tether_core::{
    Capsule, CastError, Dynamic, HolderKind, NativePtr, NativeView, ReturnPolicy, Shared, TypeHash, ValueShape,
    new_cell,
};

use super::generic::{CastSource, cast_native, load_native};
use super::{FromDynamic, IntoDynamic, LoadResult};
use crate::registry::short_name;
use crate::runtime::Runtime;

/// A host value handed through untouched.
///
/// A loaded `Dynamic` borrows the caller's reference; casting one back
/// produces a new reference.
impl FromDynamic for Dynamic {
    const CONVERSION_FALLBACK: bool = false;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("object")
    }

    fn load(_rt: &mut Runtime, src: &Dynamic, _convert: bool) -> LoadResult<Self> {
        Ok(Some(src.clone()))
    }
}

impl IntoDynamic for Dynamic {
    fn into_dynamic(self, rt: &mut Runtime, _policy: ReturnPolicy, _parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        rt.inc_ref(&self);
        Ok(self)
    }
}

/// An untyped pointer to native storage. `None` is the null pointer.
#[derive(Debug, Clone, Default)]
pub struct Opaque(pub Option<NativeView>);

impl Opaque {
    pub fn null() -> Self {
        Self(None)
    }

    pub fn is_null(&self) -> bool {
        self.0.is_none()
    }
}

impl FromDynamic for Opaque {
    const CONVERSION_FALLBACK: bool = false;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("capsule")
    }

    fn load(rt: &mut Runtime, src: &Dynamic, _convert: bool) -> LoadResult<Self> {
        if src.is_none() {
            return Ok(Some(Opaque::null()));
        }
        if let Some(capsule) = rt.capsule(src) {
            return Ok(Some(Opaque(capsule.view())));
        }
        match rt.instance(src).map(|instance| instance.slots.as_slice()) {
            Some([slot]) => Ok(slot.view().map(|view| Opaque(Some(view)))),
            _ => Ok(None),
        }
    }
}

impl IntoDynamic for Opaque {
    fn into_dynamic(self, rt: &mut Runtime, _policy: ReturnPolicy, _parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        Ok(match self.0 {
            Some(view) => rt.new_capsule(Capsule::from_view(view)),
            None => Dynamic::None,
        })
    }
}

/// A registered type taken or returned by pointer.
impl<T: Any> FromDynamic for NativePtr<T> {
    const CONVERSION_FALLBACK: bool = false;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed(short_name(type_name::<T>()))
    }

    fn native_hash() -> TypeHash {
        TypeHash::of::<T>()
    }

    fn load(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self> {
        let Some(loaded) = load_native(rt, TypeHash::of::<T>(), src, convert)? else {
            return Ok(None);
        };
        Ok(NativePtr::from_view(&loaded.view))
    }
}

impl<T: Any> IntoDynamic for NativePtr<T> {
    fn into_dynamic(self, rt: &mut Runtime, policy: ReturnPolicy, parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        cast_native(
            rt,
            TypeHash::of::<T>(),
            CastSource::View(self.into_view()),
            policy.resolve(ValueShape::Pointer),
            parent,
        )
    }
}

/// A registered type held by a shared holder.
impl<T: Any> FromDynamic for Shared<T> {
    const CONVERSION_FALLBACK: bool = false;

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed(short_name(type_name::<T>()))
    }

    fn native_hash() -> TypeHash {
        TypeHash::of::<T>()
    }

    fn load(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self> {
        let Some(loaded) = load_native(rt, TypeHash::of::<T>(), src, convert)? else {
            return Ok(None);
        };
        let type_name = || short_name(type_name::<T>()).to_string();
        match loaded.holder {
            HolderKind::Shared => Ok(Shared::from_view(&loaded.view)),
            HolderKind::Unique => Err(CastError::HolderMismatch { type_name: type_name() }),
            HolderKind::Linked | HolderKind::Borrowed => Err(CastError::NonHeldToHeld { type_name: type_name() }),
        }
    }
}

impl<T: Any> IntoDynamic for Shared<T> {
    fn into_dynamic(self, rt: &mut Runtime, policy: ReturnPolicy, parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        cast_native(
            rt,
            TypeHash::of::<T>(),
            CastSource::Holder(self.into_view()),
            policy.resolve(ValueShape::Holder),
            parent,
        )
    }
}

/// A boxed registered value is always adopted.
impl<T: Any> IntoDynamic for Box<T> {
    fn into_dynamic(self, rt: &mut Runtime, _policy: ReturnPolicy, parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        cast_native(
            rt,
            TypeHash::of::<T>(),
            CastSource::Fresh(new_cell(*self)),
            ReturnPolicy::TakeOwnership,
            parent,
        )
    }
}

/// A registered value returned from native code, tagged with its shape.
#[derive(Debug)]
pub enum NativeValue<T> {
    /// Returned by value.
    Owned(T),
    /// Returned by reference.
    Ref(NativePtr<T>),
    /// Returned by pointer.
    Pointer(NativePtr<T>),
    /// Returned in a box.
    Boxed(Box<T>),
    /// Returned in a shared holder.
    Held(Shared<T>),
}

impl<T: Any> NativeValue<T> {
    pub fn shape(&self) -> ValueShape {
        match self {
            NativeValue::Owned(_) => ValueShape::Value,
            NativeValue::Ref(_) => ValueShape::Reference,
            NativeValue::Pointer(_) => ValueShape::Pointer,
            NativeValue::Boxed(_) | NativeValue::Held(_) => ValueShape::Holder,
        }
    }
}

impl<T: Any> IntoDynamic for NativeValue<T> {
    fn into_dynamic(self, rt: &mut Runtime, policy: ReturnPolicy, parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        let policy = policy.resolve(self.shape());
        let native = TypeHash::of::<T>();
        match self {
            NativeValue::Owned(value) => cast_native(rt, native, CastSource::Fresh(new_cell(value)), policy, parent),
            NativeValue::Ref(ptr) | NativeValue::Pointer(ptr) => {
                cast_native(rt, native, CastSource::View(ptr.into_view()), policy, parent)
            }
            NativeValue::Boxed(boxed) => boxed.into_dynamic(rt, policy, parent),
            NativeValue::Held(shared) => shared.into_dynamic(rt, policy, parent),
        }
    }
}
