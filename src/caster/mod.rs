//! Value converters between host values and native values.
//!
//! Every native type that crosses the bridge implements [`FromDynamic`]
//! (host to native) and/or [`IntoDynamic`] (native to host). A load reports a
//! plain mismatch as `Ok(None)` so overload resolution can move on; `Err` is
//! reserved for hard failures.
//!
//! ## Provided casters
//!
//! - [`numeric`]: integers, floats and `bool`
//! - [`string`]: `String`, `char`, `&str` and `()`
//! - [`sequence`]: `Vec<T>` and tuples up to arity 6
//! - [`optional`]: `Option<T>`
//! - [`variant`]: `Union2` to `Union4`
//! - [`object`]: `Dynamic`, `Opaque` and registered wrapper types

mod generic;
pub mod numeric;
pub mod object;
pub mod optional;
pub mod sequence;
pub mod string;
pub mod variant;

use std::any::{Any, type_name};
use std::borrow::Cow;

use log::trace;
use tether_core::{CastError, Dynamic, ReturnPolicy, TypeHash};

use crate::registry::{TypeRegistry, short_name};
use crate::runtime::Runtime;

pub(crate) use generic::{LOCAL_LOADER_KEY, LocalLoader, load_converted};
pub use generic::LoadedValue;
pub use object::{NativeValue, Opaque};
pub use variant::{Union2, Union3, Union4};

/// Outcome of a load: `Ok(None)` when the value simply does not match.
pub type LoadResult<T> = Result<Option<T>, CastError>;

/// Loads a native value from a host value.
pub trait FromDynamic: Sized + 'static {
    /// Whether the argument loader may fall back to implicit conversions
    /// targeting [`native_hash`](Self::native_hash) when `load` fails.
    const CONVERSION_FALLBACK: bool = true;

    /// Name shown in signatures and cast errors.
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed(short_name(type_name::<Self>()))
    }

    /// Try to load `src`. `convert` allows implicit conversions.
    fn load(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self>;

    /// Identity used to find implicit conversions into this type.
    fn native_hash() -> TypeHash {
        TypeHash::of::<Self>()
    }

    /// Take the result of an implicit conversion.
    fn from_converted(_value: &dyn Any) -> Option<Self> {
        None
    }
}

/// Casts a native value into a host value.
pub trait IntoDynamic {
    /// Produce a new reference to a host value.
    ///
    /// `parent` is the object a `reference_internal` result keeps alive.
    fn into_dynamic(
        self,
        rt: &mut Runtime,
        policy: ReturnPolicy,
        parent: Option<&Dynamic>,
    ) -> Result<Dynamic, CastError>;
}

/// Load one call argument.
///
/// After the type's own caster fails in convert mode, implicit conversions
/// declared into a non-wrapper target are tried.
pub fn load_arg<T: FromDynamic>(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<T> {
    if let Some(value) = T::load(rt, src, convert)? {
        return Ok(Some(value));
    }
    if !convert || !T::CONVERSION_FALLBACK {
        return Ok(None);
    }
    let Some(view) = load_converted(rt, T::native_hash(), src)? else {
        return Ok(None);
    };
    trace!("loaded {} through an implicit conversion", T::type_name());
    Ok(view.with_value(T::from_converted)?)
}

/// Explicit one-shot cast: a mismatch becomes an error.
pub fn load_type<T: FromDynamic>(rt: &mut Runtime, src: &Dynamic) -> Result<T, CastError> {
    if let Some(value) = load_arg::<T>(rt, src, true)? {
        return Ok(value);
    }
    if rt.config.detailed_errors {
        Err(CastError::LoadFailed {
            from: rt.type_name(src),
            to: T::type_name().into_owned(),
        })
    } else {
        Err(CastError::LoadFailedOpaque)
    }
}

impl Runtime {
    /// [`load_type`] as a method.
    ///
    /// ```
    /// use tether::{Dynamic, Runtime};
    ///
    /// let mut rt = Runtime::new();
    /// assert_eq!(rt.load::<i32>(&Dynamic::Int(7)), Ok(7));
    /// assert_eq!(rt.load::<f64>(&Dynamic::Int(2)), Ok(2.0));
    /// assert!(rt.load::<i32>(&Dynamic::from("7")).is_err());
    /// ```
    pub fn load<T: FromDynamic>(&mut self, src: &Dynamic) -> Result<T, CastError> {
        load_type(self, src)
    }

    /// Cast a native value into a new host reference.
    pub fn cast<T: IntoDynamic>(
        &mut self,
        value: T,
        policy: ReturnPolicy,
        parent: Option<&Dynamic>,
    ) -> Result<Dynamic, CastError> {
        value.into_dynamic(self, policy, parent)
    }

    /// Load values of `T` as the source of implicit conversions.
    pub fn register_source_loader<T: FromDynamic>(&mut self) {
        let native = TypeHash::of::<T>();
        self.registry.remember_name(native, type_name::<T>());
        self.registry.set_source_loader(native, load_boxed::<T>);
    }
}

fn load_boxed<T: FromDynamic>(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Box<dyn Any>> {
    Ok(T::load(rt, src, convert)?.map(|value| Box::new(value) as Box<dyn Any>))
}

macro_rules! source_loaders {
    ($registry:expr; $($ty:ty),* $(,)?) => {$(
        $registry.remember_name(TypeHash::of::<$ty>(), type_name::<$ty>());
        $registry.set_source_loader(TypeHash::of::<$ty>(), load_boxed::<$ty>);
    )*};
}

/// Source loaders for the built-in casters.
pub(crate) fn install_source_loaders(registry: &mut TypeRegistry) {
    source_loaders!(registry;
        i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, usize,
        f32, f64, bool, char, String,
    );
}
