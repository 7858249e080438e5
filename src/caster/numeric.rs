//! Integer, floating-point and boolean casters.
//!
//! Integers load at the wide `i128` intermediate and are range-checked into
//! the target width. Without conversion only genuine integers (and bools,
//! which are integers on the host side) are accepted; with conversion,
//! finite floats are truncated and objects may offer an integer hook.

use std::any::Any;
use std::borrow::Cow;

use tether_core::{CastError, Dynamic, ReturnPolicy};

use super::{FromDynamic, IntoDynamic, LoadResult};
use crate::runtime::Runtime;

fn load_int<T: TryFrom<i128>>(rt: &Runtime, src: &Dynamic, convert: bool) -> Option<T> {
    match src {
        Dynamic::Int(v) => T::try_from(*v).ok(),
        Dynamic::Bool(b) => T::try_from(i128::from(*b)).ok(),
        Dynamic::Float(f) if convert => T::try_from(truncate(*f)?).ok(),
        Dynamic::Object(handle) if convert => {
            let object = rt.heap.get(*handle)?;
            let hook = rt.host_types.int_hook(object.ty)?;
            T::try_from(hook(object)?).ok()
        }
        _ => None,
    }
}

/// Truncate toward zero, rejecting values outside the `i128` range.
fn truncate(f: f64) -> Option<i128> {
    const LIMIT: f64 = -(i128::MIN as f64);
    let t = f.trunc();
    (t >= -LIMIT && t < LIMIT).then_some(t as i128)
}

fn load_float(rt: &Runtime, src: &Dynamic, convert: bool) -> Option<f64> {
    match src {
        Dynamic::Float(f) => Some(*f),
        Dynamic::Int(v) if convert => Some(*v as f64),
        Dynamic::Bool(b) if convert => Some(if *b { 1.0 } else { 0.0 }),
        Dynamic::Object(handle) if convert => {
            let object = rt.heap.get(*handle)?;
            if let Some(hook) = rt.host_types.float_hook(object.ty) {
                return hook(object);
            }
            let hook = rt.host_types.int_hook(object.ty)?;
            hook(object).map(|v| v as f64)
        }
        _ => None,
    }
}

fn load_bool(rt: &Runtime, src: &Dynamic, convert: bool) -> Option<bool> {
    match src {
        Dynamic::Bool(b) => Some(*b),
        _ if !convert => None,
        Dynamic::None => Some(false),
        Dynamic::Int(v) => Some(*v != 0),
        Dynamic::Float(f) => Some(*f != 0.0),
        Dynamic::Object(handle) => {
            let object = rt.heap.get(*handle)?;
            let hook = rt.host_types.truth_hook(object.ty)?;
            hook(object)
        }
        Dynamic::Str(_) => None,
    }
}

macro_rules! int_caster {
    ($($ty:ty),* $(,)?) => {$(
        impl FromDynamic for $ty {
            fn type_name() -> Cow<'static, str> {
                Cow::Borrowed("int")
            }

            fn load(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self> {
                Ok(load_int(rt, src, convert))
            }

            fn from_converted(value: &dyn Any) -> Option<Self> {
                value.downcast_ref::<Self>().copied()
            }
        }

        impl IntoDynamic for $ty {
            fn into_dynamic(
                self,
                _rt: &mut Runtime,
                _policy: ReturnPolicy,
                _parent: Option<&Dynamic>,
            ) -> Result<Dynamic, CastError> {
                Ok(Dynamic::Int(self as i128))
            }
        }
    )*};
}

int_caster!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, usize);

impl FromDynamic for f64 {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("float")
    }

    fn load(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self> {
        Ok(load_float(rt, src, convert))
    }

    fn from_converted(value: &dyn Any) -> Option<Self> {
        value.downcast_ref::<Self>().copied()
    }
}

impl FromDynamic for f32 {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("float")
    }

    fn load(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self> {
        Ok(load_float(rt, src, convert).map(|v| v as f32))
    }

    fn from_converted(value: &dyn Any) -> Option<Self> {
        value.downcast_ref::<Self>().copied()
    }
}

impl IntoDynamic for f64 {
    fn into_dynamic(self, _rt: &mut Runtime, _policy: ReturnPolicy, _parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        Ok(Dynamic::Float(self))
    }
}

impl IntoDynamic for f32 {
    fn into_dynamic(self, _rt: &mut Runtime, _policy: ReturnPolicy, _parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        Ok(Dynamic::Float(f64::from(self)))
    }
}

impl FromDynamic for bool {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("bool")
    }

    fn load(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self> {
        Ok(load_bool(rt, src, convert))
    }

    fn from_converted(value: &dyn Any) -> Option<Self> {
        value.downcast_ref::<Self>().copied()
    }
}

impl IntoDynamic for bool {
    fn into_dynamic(self, _rt: &mut Runtime, _policy: ReturnPolicy, _parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        Ok(Dynamic::Bool(self))
    }
}
