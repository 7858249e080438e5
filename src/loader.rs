//! Call argument loading and overload dispatch.
//!
//! An [`OverloadSet`] is what the host side calls. Each call runs inside its
//! own life-support frame and tries the overloads twice: first with implicit
//! conversions disabled, then with them enabled. The first overload whose
//! arguments all load wins.

use std::any::{Any, type_name};
use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;

use log::{debug, trace};
use tether_core::{CallError, ConstructionError, Dynamic, HostTypeId, ReturnPolicy, TetherError};

use crate::caster::{FromDynamic, IntoDynamic, LoadResult, load_arg};
use crate::factory::{FactoryReturn, construct_from};
use crate::registry::short_name;
use crate::runtime::Runtime;

/// One attempt to call an overload.
#[derive(Debug, Clone)]
pub struct FunctionCall<'a> {
    pub args: &'a [Dynamic],
    /// Whether each argument may use implicit conversions in this attempt.
    pub args_convert: Vec<bool>,
    /// The object a `reference_internal` result keeps alive.
    pub parent: Option<Dynamic>,
    /// The instance a constructor initializes.
    pub init_self: Option<Dynamic>,
}

/// A tuple of arguments loadable from a call.
pub trait LoadArgs: Sized {
    const ARITY: usize;

    /// Argument type names, for signatures.
    fn signature() -> Vec<Cow<'static, str>>;

    /// Load every argument. The call must carry exactly [`ARITY`](Self::ARITY)
    /// arguments.
    fn load_args(rt: &mut Runtime, call: &FunctionCall<'_>) -> LoadResult<Self>;
}

macro_rules! load_args {
    ($len:expr; $($name:ident : $idx:tt),*) => {
        impl<$($name: FromDynamic),*> LoadArgs for ($($name,)*) {
            const ARITY: usize = $len;

            fn signature() -> Vec<Cow<'static, str>> {
                vec![$($name::type_name()),*]
            }

            #[allow(unused_variables)]
            fn load_args(rt: &mut Runtime, call: &FunctionCall<'_>) -> LoadResult<Self> {
                Ok(Some(($(
                    match load_arg::<$name>(rt, &call.args[$idx], call.args_convert[$idx])? {
                        Some(value) => value,
                        None => return Ok(None),
                    },
                )*)))
            }
        }
    };
}

load_args!(0;);
load_args!(1; A: 0);
load_args!(2; A: 0, B: 1);
load_args!(3; A: 0, B: 1, C: 2);
load_args!(4; A: 0, B: 1, C: 2, D: 3);
load_args!(5; A: 0, B: 1, C: 2, D: 3, E: 4);
load_args!(6; A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);

/// `Ok(None)` when the arguments did not load.
type CallResult = Result<Option<Dynamic>, TetherError>;
type Body = Rc<dyn Fn(&mut Runtime, &FunctionCall<'_>, ReturnPolicy) -> CallResult>;

fn boxed_body(body: impl Fn(&mut Runtime, &FunctionCall<'_>, ReturnPolicy) -> CallResult + 'static) -> Body {
    Rc::new(body)
}

/// One native function callable from the host.
#[derive(Clone)]
pub struct Overload {
    signature: String,
    arity: usize,
    policy: ReturnPolicy,
    keep_alive: Vec<(usize, usize)>,
    no_convert: Vec<usize>,
    body: Body,
}

fn describe(args: &[Cow<'static, str>], ret: &str) -> String {
    let params = args
        .iter()
        .enumerate()
        .map(|(i, arg)| format!("arg{i}: {arg}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("({params}) -> {ret}")
}

impl Overload {
    fn from_body<Args: LoadArgs>(ret: &str, body: Body) -> Self {
        Self {
            signature: describe(&Args::signature(), ret),
            arity: Args::ARITY,
            policy: ReturnPolicy::Automatic,
            keep_alive: Vec::new(),
            no_convert: Vec::new(),
            body,
        }
    }

    /// Wrap an infallible native function.
    pub fn new<Args, R, F>(f: F) -> Self
    where
        Args: LoadArgs,
        R: IntoDynamic + 'static,
        F: Fn(Args) -> R + 'static,
    {
        let body = boxed_body(move |rt, call, policy| {
            let Some(args) = Args::load_args(rt, call)? else {
                return Ok(None);
            };
            let result = f(args);
            Ok(Some(rt.cast(result, policy, call.parent.as_ref())?))
        });
        Self::from_body::<Args>(short_name(type_name::<R>()), body)
    }

    /// Wrap a native function that needs the runtime or can fail.
    pub fn with_runtime<Args, R, F>(f: F) -> Self
    where
        Args: LoadArgs,
        R: IntoDynamic + 'static,
        F: Fn(&mut Runtime, Args) -> Result<R, TetherError> + 'static,
    {
        let body = boxed_body(move |rt, call, policy| {
            let Some(args) = Args::load_args(rt, call)? else {
                return Ok(None);
            };
            let result = f(rt, args)?;
            Ok(Some(rt.cast(result, policy, call.parent.as_ref())?))
        });
        Self::from_body::<Args>(short_name(type_name::<R>()), body)
    }

    /// Wrap a factory initializing the `T` part of the constructed instance.
    pub fn constructor<T, Args, F>(f: F) -> Self
    where
        T: Any,
        Args: LoadArgs,
        F: Fn(Args) -> FactoryReturn<T> + 'static,
    {
        let body = boxed_body(move |rt, call, _policy| {
            let Some(target) = call.init_self.clone() else {
                return Err(ConstructionError::NotAnInstance {
                    type_name: short_name(type_name::<T>()).to_string(),
                }
                .into());
            };
            let Some(args) = Args::load_args(rt, call)? else {
                return Ok(None);
            };
            construct_from(rt, &target, f(args))?;
            Ok(Some(Dynamic::None))
        });
        Self::from_body::<Args>("None", body)
    }

    pub fn policy(mut self, policy: ReturnPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Keep argument `patient` alive while argument `nurse` is. Index 0 is
    /// the return value, arguments count from 1.
    pub fn keep_alive(mut self, nurse: usize, patient: usize) -> Self {
        self.keep_alive.push((nurse, patient));
        self
    }

    /// Never convert argument `index` (counted from 0).
    pub fn no_convert(mut self, index: usize) -> Self {
        self.no_convert.push(index);
        self
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    fn attempt(&self, rt: &mut Runtime, args: &[Dynamic], convert: bool, init_self: Option<&Dynamic>) -> CallResult {
        let call = FunctionCall {
            args,
            args_convert: (0..args.len())
                .map(|index| convert && !self.no_convert.contains(&index))
                .collect(),
            parent: args.first().cloned(),
            init_self: init_self.cloned(),
        };
        (self.body)(rt, &call, self.policy)
    }

    fn apply_keep_alive(&self, rt: &mut Runtime, args: &[Dynamic], result: &Dynamic) -> Result<(), TetherError> {
        let pick = |index: usize| -> Result<Dynamic, CallError> {
            if index == 0 {
                return Ok(result.clone());
            }
            args.get(index - 1)
                .cloned()
                .ok_or(CallError::ArgumentIndexOutOfBounds {
                    index,
                    count: args.len(),
                })
        };
        for &(nurse, patient) in &self.keep_alive {
            rt.keep_alive(&pick(nurse)?, &pick(patient)?)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Overload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Overload")
            .field("signature", &self.signature)
            .field("policy", &self.policy)
            .field("keep_alive", &self.keep_alive)
            .finish()
    }
}

/// A named set of overloads.
///
/// ```
/// use tether::{Dynamic, Overload, OverloadSet, Runtime};
///
/// let mut rt = Runtime::new();
/// let set = OverloadSet::new("twice")
///     .overload(Overload::new(|(x,): (i64,)| x * 2))
///     .overload(Overload::new(|(s,): (String,)| s.repeat(2)));
///
/// assert_eq!(set.call(&mut rt, &[Dynamic::Int(4)]), Ok(Dynamic::Int(8)));
/// assert_eq!(set.call(&mut rt, &[Dynamic::from("ab")]), Ok(Dynamic::from("abab")));
/// assert!(set.call(&mut rt, &[Dynamic::None]).is_err());
/// ```
#[derive(Debug, Clone)]
pub struct OverloadSet {
    name: String,
    overloads: Vec<Overload>,
}

impl OverloadSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overloads: Vec::new(),
        }
    }

    pub fn overload(mut self, overload: Overload) -> Self {
        self.overloads.push(overload);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn overloads(&self) -> &[Overload] {
        &self.overloads
    }

    /// Call the first overload accepting `args`.
    pub fn call(&self, rt: &mut Runtime, args: &[Dynamic]) -> Result<Dynamic, TetherError> {
        rt.with_life_support(|rt| self.dispatch(rt, args, None))
    }

    /// Create an instance of `ty` and initialize it with the first
    /// constructor accepting `args`.
    pub fn construct(&self, rt: &mut Runtime, ty: HostTypeId, args: &[Dynamic]) -> Result<Dynamic, TetherError> {
        let instance = rt.instantiate(ty)?;
        match rt.with_life_support(|rt| self.dispatch(rt, args, Some(&instance))) {
            Ok(_) => {
                debug!("constructed {} through {}", rt.type_name(&instance), self.name);
                Ok(instance)
            }
            Err(err) => {
                rt.dec_ref(&instance);
                Err(err)
            }
        }
    }

    fn dispatch(&self, rt: &mut Runtime, args: &[Dynamic], init_self: Option<&Dynamic>) -> Result<Dynamic, TetherError> {
        for convert in [false, true] {
            for overload in self.overloads.iter().filter(|o| o.arity == args.len()) {
                let Some(result) = overload.attempt(rt, args, convert, init_self)? else {
                    continue;
                };
                trace!("{} matched {} (convert: {convert})", self.name, overload.signature);
                if let Err(err) = overload.apply_keep_alive(rt, args, &result) {
                    rt.dec_ref(&result);
                    return Err(err);
                }
                return Ok(result);
            }
        }
        Err(CallError::NoMatchingOverload {
            name: self.name.clone(),
            signatures: self.overloads.iter().map(|o| o.signature.clone()).collect(),
            invoked: args.iter().map(|arg| rt.type_name(arg)).collect(),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use tether_core::{CastError, NativePtr};

    use super::*;
    use crate::registry::TypeSpec;

    #[derive(Debug, Clone, PartialEq)]
    struct Counter {
        count: i64,
    }

    #[test]
    fn exact_overloads_win_over_earlier_conversions() {
        let mut rt = Runtime::new();
        let set = OverloadSet::new("pick")
            .overload(Overload::new(|(_,): (f64,)| "float"))
            .overload(Overload::new(|(_,): (i32,)| "int"));

        assert_eq!(set.call(&mut rt, &[Dynamic::Int(1)]), Ok(Dynamic::from("int")));
        assert_eq!(set.call(&mut rt, &[Dynamic::Float(1.0)]), Ok(Dynamic::from("float")));
    }

    #[test]
    fn no_convert_arguments_stay_strict() {
        let mut rt = Runtime::new();
        let set = OverloadSet::new("half").overload(Overload::new(|(x,): (f64,)| x / 2.0).no_convert(0));
        assert!(set.call(&mut rt, &[Dynamic::Int(3)]).is_err());
        assert_eq!(set.call(&mut rt, &[Dynamic::Float(3.0)]), Ok(Dynamic::Float(1.5)));
    }

    #[test]
    fn mismatches_list_every_signature() {
        let mut rt = Runtime::new();
        let set = OverloadSet::new("f")
            .overload(Overload::new(|(a, b): (i32, String)| format!("{a}{b}")))
            .overload(Overload::new(|(): ()| ()));

        let err = set.call(&mut rt, &[Dynamic::from("x"), Dynamic::Int(1)]).unwrap_err();
        let TetherError::Call(CallError::NoMatchingOverload { signatures, invoked, .. }) = &err else {
            panic!("unexpected error {err:?}");
        };
        assert_eq!(signatures, &["(arg0: int, arg1: str) -> String", "() -> ()"]);
        assert_eq!(invoked, &["str", "int"]);
        assert!(err.to_string().starts_with("f(): incompatible function arguments."));
    }

    #[test]
    fn native_errors_propagate() {
        let mut rt = Runtime::new();
        let set = OverloadSet::new("fail").overload(Overload::with_runtime(|_, (): ()| {
            Err::<(), _>(TetherError::native("boom"))
        }));
        assert_eq!(set.call(&mut rt, &[]), Err(TetherError::native("boom")));
    }

    #[test]
    fn keep_alive_links_arguments() {
        let mut rt = Runtime::new();
        let list = rt.new_list(vec![]);
        let item = rt.new_tuple(vec![]);
        let set = OverloadSet::new("append")
            .overload(Overload::new(|(_, _): (Dynamic, Dynamic)| ()).keep_alive(1, 2));

        set.call(&mut rt, &[list.clone(), item.clone()]).unwrap();
        rt.dec_ref(&item);
        assert!(rt.is_alive(&item));
        rt.dec_ref(&list);
        assert!(!rt.is_alive(&item));

        let bad = OverloadSet::new("bad").overload(Overload::new(|(): ()| ()).keep_alive(0, 3));
        assert_eq!(
            bad.call(&mut rt, &[]),
            Err(TetherError::Call(CallError::ArgumentIndexOutOfBounds { index: 3, count: 0 }))
        );
    }

    #[test]
    fn constructors_initialize_and_clean_up() {
        let mut rt = Runtime::new();
        let info = rt.register_type(TypeSpec::<Counter>::new("Counter")).unwrap();
        let ty = rt.type_info(info).host_type;
        let init = OverloadSet::new("__init__")
            .overload(Overload::constructor(|(count,): (i64,)| FactoryReturn::Value(Counter { count })))
            .overload(Overload::constructor(|(): ()| FactoryReturn::<Counter>::Pointer(None)));

        let counter = init.construct(&mut rt, ty, &[Dynamic::Int(5)]).unwrap();
        let ptr = rt.load::<NativePtr<Counter>>(&counter).unwrap();
        assert_eq!(ptr.borrow().unwrap().count, 5);

        let live = rt.heap().live_count();
        assert!(init.construct(&mut rt, ty, &[]).is_err());
        assert_eq!(rt.heap().live_count(), live);
    }

    #[test]
    fn temporaries_live_for_the_call() {
        let mut rt = Runtime::new();
        rt.register_type(TypeSpec::<Counter>::new("Counter")).unwrap();
        rt.define_native_conversion(|count: &i64| Counter { count: *count });
        rt.implicitly_convertible::<i64, Counter>().unwrap();

        let set = OverloadSet::new("read").overload(Overload::new(|(c,): (NativePtr<Counter>,)| {
            c.borrow().map(|c| c.count).unwrap_or(-1)
        }));
        let live = rt.heap().live_count();
        assert_eq!(set.call(&mut rt, &[Dynamic::Int(12)]), Ok(Dynamic::Int(12)));
        assert_eq!(rt.heap().live_count(), live);
        assert_eq!(rt.life_support().depth(), 0);

        assert!(matches!(
            rt.load::<NativePtr<Counter>>(&Dynamic::Int(1)),
            Err(CastError::NoLifeSupport)
        ));
    }
}
