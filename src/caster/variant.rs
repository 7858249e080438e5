//! Sum-type casters.
//!
//! A load with conversion allowed first tries every alternative without
//! conversion, then tries them again with it. An exact match in a later
//! alternative therefore beats a converting match in an earlier one.

use std::borrow::Cow;

use tether_core::{CastError, Dynamic, ReturnPolicy};

use super::{FromDynamic, IntoDynamic, LoadResult};
use crate::runtime::Runtime;

macro_rules! union_caster {
    ($(#[$meta:meta])* $union:ident { $($variant:ident($param:ident)),+ }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq)]
        pub enum $union<$($param),+> {
            $($variant($param)),+
        }

        impl<$($param: FromDynamic),+> $union<$($param),+> {
            fn load_alternatives(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self> {
                $(
                    if let Some(value) = $param::load(rt, src, convert)? {
                        return Ok(Some($union::$variant(value)));
                    }
                )+
                Ok(None)
            }
        }

        impl<$($param: FromDynamic),+> FromDynamic for $union<$($param),+> {
            fn type_name() -> Cow<'static, str> {
                Cow::Owned(format!("Union[{}]", [$($param::type_name()),+].join(", ")))
            }

            fn load(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self> {
                if convert && let Some(value) = Self::load_alternatives(rt, src, false)? {
                    return Ok(Some(value));
                }
                Self::load_alternatives(rt, src, convert)
            }
        }

        impl<$($param: IntoDynamic),+> IntoDynamic for $union<$($param),+> {
            fn into_dynamic(self, rt: &mut Runtime, policy: ReturnPolicy, parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
                match self {
                    $($union::$variant(value) => value.into_dynamic(rt, policy, parent)),+
                }
            }
        }
    };
}

union_caster!(
    /// One of two alternatives.
    Union2 { First(A), Second(B) }
);
union_caster!(
    /// One of three alternatives.
    Union3 { First(A), Second(B), Third(C) }
);
union_caster!(
    /// One of four alternatives.
    Union4 { First(A), Second(B), Third(C), Fourth(D) }
);
