//! `Option<T>`: `None` on the host side is `None` here, without consulting `T`.

use std::borrow::Cow;

use tether_core::{CastError, Dynamic, ReturnPolicy};

use super::{FromDynamic, IntoDynamic, LoadResult};
use crate::runtime::Runtime;

impl<T: FromDynamic> FromDynamic for Option<T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("Optional[{}]", T::type_name()))
    }

    fn load(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self> {
        if src.is_none() {
            return Ok(Some(None));
        }
        Ok(T::load(rt, src, convert)?.map(Some))
    }
}

impl<T: IntoDynamic> IntoDynamic for Option<T> {
    fn into_dynamic(self, rt: &mut Runtime, policy: ReturnPolicy, parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        match self {
            Some(value) => value.into_dynamic(rt, policy, parent),
            None => Ok(Dynamic::None),
        }
    }
}
