//! String, character and unit casters.

use std::any::Any;
use std::borrow::Cow;

use tether_core::{CastError, Dynamic, ReturnPolicy};

use super::{FromDynamic, IntoDynamic, LoadResult};
use crate::runtime::Runtime;

impl FromDynamic for String {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("str")
    }

    fn load(_rt: &mut Runtime, src: &Dynamic, _convert: bool) -> LoadResult<Self> {
        Ok(src.as_str().map(str::to_string))
    }

    fn from_converted(value: &dyn Any) -> Option<Self> {
        value.downcast_ref::<String>().cloned()
    }
}

impl IntoDynamic for String {
    fn into_dynamic(self, _rt: &mut Runtime, _policy: ReturnPolicy, _parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        Ok(Dynamic::Str(self))
    }
}

impl IntoDynamic for &str {
    fn into_dynamic(self, _rt: &mut Runtime, _policy: ReturnPolicy, _parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        Ok(Dynamic::Str(self.to_string()))
    }
}

/// A single-character string.
impl FromDynamic for char {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("str")
    }

    fn load(_rt: &mut Runtime, src: &Dynamic, _convert: bool) -> LoadResult<Self> {
        let Some(text) = src.as_str() else {
            return Ok(None);
        };
        let mut chars = text.chars();
        Ok(match (chars.next(), chars.next()) {
            (Some(c), None) => Some(c),
            _ => None,
        })
    }

    fn from_converted(value: &dyn Any) -> Option<Self> {
        value.downcast_ref::<char>().copied()
    }
}

impl IntoDynamic for char {
    fn into_dynamic(self, _rt: &mut Runtime, _policy: ReturnPolicy, _parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        Ok(Dynamic::Str(self.to_string()))
    }
}

impl FromDynamic for () {
    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("None")
    }

    fn load(_rt: &mut Runtime, src: &Dynamic, _convert: bool) -> LoadResult<Self> {
        Ok(src.is_none().then_some(()))
    }
}

impl IntoDynamic for () {
    fn into_dynamic(self, _rt: &mut Runtime, _policy: ReturnPolicy, _parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        Ok(Dynamic::None)
    }
}
