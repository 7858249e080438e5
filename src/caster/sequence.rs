//! Sequence casters: `Vec<T>` and tuples.
//!
//! Both load from either a tuple or a list. Elements load with the caller's
//! conversion flag, and any element failure fails the whole load.

use std::borrow::Cow;

use tether_core::{CastError, Dynamic, ReturnPolicy};

use super::{FromDynamic, IntoDynamic, LoadResult};
use crate::runtime::Runtime;

/// Release the references held by `items`, for error paths of a cast.
fn discard(rt: &mut Runtime, items: &[Dynamic]) {
    for item in items {
        rt.dec_ref(item);
    }
}

impl<T: FromDynamic> FromDynamic for Vec<T> {
    fn type_name() -> Cow<'static, str> {
        Cow::Owned(format!("List[{}]", T::type_name()))
    }

    fn load(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self> {
        let Some(items) = rt.sequence_items(src) else {
            return Ok(None);
        };
        let mut values = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match T::load(rt, item, convert).map_err(|err| err.in_element(index))? {
                Some(value) => values.push(value),
                None => return Ok(None),
            }
        }
        Ok(Some(values))
    }
}

impl<T: IntoDynamic> IntoDynamic for Vec<T> {
    fn into_dynamic(self, rt: &mut Runtime, policy: ReturnPolicy, parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
        let mut items = Vec::with_capacity(self.len());
        for (index, value) in self.into_iter().enumerate() {
            match value.into_dynamic(rt, policy, parent) {
                Ok(item) => items.push(item),
                Err(err) => {
                    discard(rt, &items);
                    return Err(err.in_element(index));
                }
            }
        }
        Ok(rt.new_list(items))
    }
}

macro_rules! tuple_caster {
    ($len:expr; $($name:ident : $idx:tt),+) => {
        impl<$($name: FromDynamic),+> FromDynamic for ($($name,)+) {
            fn type_name() -> Cow<'static, str> {
                Cow::Owned(format!("Tuple[{}]", [$($name::type_name()),+].join(", ")))
            }

            fn load(rt: &mut Runtime, src: &Dynamic, convert: bool) -> LoadResult<Self> {
                let Some(items) = rt.sequence_items(src) else {
                    return Ok(None);
                };
                if items.len() != $len {
                    return Ok(None);
                }
                Ok(Some(($(
                    match $name::load(rt, &items[$idx], convert).map_err(|err| err.in_element($idx))? {
                        Some(value) => value,
                        None => return Ok(None),
                    },
                )+)))
            }
        }

        impl<$($name: IntoDynamic),+> IntoDynamic for ($($name,)+) {
            fn into_dynamic(self, rt: &mut Runtime, policy: ReturnPolicy, parent: Option<&Dynamic>) -> Result<Dynamic, CastError> {
                let mut items = Vec::with_capacity($len);
                $(
                    match self.$idx.into_dynamic(rt, policy, parent) {
                        Ok(item) => items.push(item),
                        Err(err) => {
                            discard(rt, &items);
                            return Err(err.in_element($idx));
                        }
                    }
                )+
                Ok(rt.new_tuple(items))
            }
        }
    };
}

tuple_caster!(1; A: 0);
tuple_caster!(2; A: 0, B: 1);
tuple_caster!(3; A: 0, B: 1, C: 2);
tuple_caster!(4; A: 0, B: 1, C: 2, D: 3);
tuple_caster!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_caster!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caster::{load_arg, load_type};

    #[test]
    fn vectors_load_from_lists_and_tuples() {
        let mut rt = Runtime::new();
        let list = rt.new_list(vec![Dynamic::Int(1), Dynamic::Int(2)]);
        let tuple = rt.new_tuple(vec![Dynamic::Int(3)]);

        assert_eq!(load_arg::<Vec<i32>>(&mut rt, &list, false), Ok(Some(vec![1, 2])));
        assert_eq!(load_arg::<Vec<i32>>(&mut rt, &tuple, false), Ok(Some(vec![3])));
        assert_eq!(load_arg::<Vec<i32>>(&mut rt, &Dynamic::from("12"), false), Ok(None));
    }

    #[test]
    fn one_bad_element_fails_the_load() {
        let mut rt = Runtime::new();
        let list = rt.new_list(vec![Dynamic::Int(1), Dynamic::from("two")]);
        assert_eq!(load_arg::<Vec<i32>>(&mut rt, &list, true), Ok(None));

        let mixed = rt.new_list(vec![Dynamic::Int(1), Dynamic::Float(2.5)]);
        assert_eq!(load_arg::<Vec<f64>>(&mut rt, &mixed, false), Ok(None));
        assert_eq!(load_arg::<Vec<f64>>(&mut rt, &mixed, true), Ok(Some(vec![1.0, 2.5])));
    }

    #[test]
    fn tuples_need_exact_arity() {
        let mut rt = Runtime::new();
        let pair = rt.new_tuple(vec![Dynamic::Int(1), Dynamic::from("a")]);
        assert_eq!(
            load_arg::<(i32, String)>(&mut rt, &pair, false),
            Ok(Some((1, "a".to_string())))
        );
        assert_eq!(load_arg::<(i32,)>(&mut rt, &pair, false), Ok(None));
        assert_eq!(load_arg::<(i32, String, bool)>(&mut rt, &pair, false), Ok(None));
    }

    #[test]
    fn casts_build_sequences() {
        let mut rt = Runtime::new();
        let list = rt.cast(vec![1u8, 2, 3], ReturnPolicy::Automatic, None).unwrap();
        assert_eq!(rt.type_name(&list), "list");
        assert_eq!(rt.sequence_items(&list).unwrap().len(), 3);

        let tuple = rt.cast((1i32, "x", 2.5f64), ReturnPolicy::Automatic, None).unwrap();
        assert_eq!(rt.type_name(&tuple), "tuple");
        assert_eq!(load_type::<(i64, String, f64)>(&mut rt, &tuple), Ok((1, "x".to_string(), 2.5)));
    }

    #[test]
    fn signature_names() {
        assert_eq!(<Vec<i32>>::type_name(), "List[int]");
        assert_eq!(<(f64, String)>::type_name(), "Tuple[float, str]");
    }
}
