//! Integration tests for implicit casts and implicit conversions.
//!
//! These tests drive loads the way a bridged call does: through an
//! [`OverloadSet`], so every conversion runs inside a life-support frame.

use std::any::Any;
use std::borrow::Cow;

use tether::{
    CastError, Dynamic, FromDynamic, LoadResult, NativePtr, Overload, OverloadSet, RegistrationError, ReturnPolicy,
    Runtime, TypeSpec, Union2,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// =============================================================================
// Conversions to and from a plain number
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Amount(f64);

fn amount_runtime() -> Runtime {
    init_logging();
    let mut rt = Runtime::new();
    rt.register_type(TypeSpec::<Amount>::new("Amount").copyable()).unwrap();
    rt.define_native_conversion(|value: &f64| Amount(*value));
    rt.define_native_conversion(|amount: &Amount| amount.0);
    rt.implicitly_convertible::<f64, Amount>().unwrap();
    rt.implicitly_convertible::<Amount, f64>().unwrap();
    rt
}

#[test]
fn test_wrapper_converts_to_plain_number() {
    let mut rt = amount_runtime();
    let amount = rt.cast(Box::new(Amount(3.5)), ReturnPolicy::Automatic, None).unwrap();
    let identity = OverloadSet::new("identity").overload(Overload::new(|(x,): (f64,)| x));

    assert_eq!(identity.call(&mut rt, &[amount]), Ok(Dynamic::Float(3.5)));
}

#[test]
fn test_plain_number_converts_to_wrapper() {
    let mut rt = amount_runtime();
    let read = OverloadSet::new("read").overload(Overload::new(|(a,): (NativePtr<Amount>,)| {
        a.cloned().map(|a| a.0).unwrap_or(f64::NAN)
    }));

    assert_eq!(read.call(&mut rt, &[Dynamic::Float(2.25)]), Ok(Dynamic::Float(2.25)));
    // Conversion sources load strictly.
    assert!(read.call(&mut rt, &[Dynamic::Int(2)]).is_err());
    assert_eq!(rt.life_support().depth(), 0);
}

#[test]
fn test_unrelated_values_do_not_convert() {
    let mut rt = amount_runtime();
    let read = OverloadSet::new("read").overload(Overload::new(|(_,): (NativePtr<Amount>,)| ()));

    assert!(read.call(&mut rt, &[Dynamic::from("3.5")]).is_err());
    let tuple = rt.new_tuple(vec![Dynamic::Float(1.0)]);
    assert!(read.call(&mut rt, &[tuple]).is_err());
}

#[test]
fn test_declaration_without_native_path_fails_eagerly() {
    let mut rt = amount_runtime();
    let err = rt.implicitly_convertible::<String, Amount>().unwrap_err();
    assert!(matches!(err, RegistrationError::NoNativeConversion { .. }));
    assert!(err.to_string().contains("String"));
}

#[test]
fn test_conversion_needs_an_active_call() {
    let mut rt = amount_runtime();
    assert_eq!(
        rt.load::<NativePtr<Amount>>(&Dynamic::Float(1.0)).map(|_| ()),
        Err(CastError::NoLifeSupport)
    );
}

// =============================================================================
// Own conversions beat inherited ones
// =============================================================================

#[derive(Debug)]
struct Shape {
    id: i64,
}

#[derive(Debug)]
struct Square {
    shape: Shape,
}

#[derive(Debug)]
struct Circle {
    shape: Shape,
}

#[derive(Debug)]
struct Dot {
    shape: Shape,
}

macro_rules! shape_base {
    ($ty:ident, $get:ident, $get_mut:ident) => {
        fn $get(value: &$ty) -> &Shape {
            &value.shape
        }

        fn $get_mut(value: &mut $ty) -> &mut Shape {
            &mut value.shape
        }
    };
}

shape_base!(Square, square_shape, square_shape_mut);
shape_base!(Circle, circle_shape, circle_shape_mut);
shape_base!(Dot, dot_shape, dot_shape_mut);

fn shapes_runtime(own_first: bool) -> Runtime {
    init_logging();
    let mut rt = Runtime::new();
    rt.register_type(TypeSpec::<Shape>::new("Shape")).unwrap();
    rt.register_type(TypeSpec::<Square>::new("Square").base::<Shape>(square_shape, square_shape_mut))
        .unwrap();
    rt.register_type(TypeSpec::<Circle>::new("Circle").base::<Shape>(circle_shape, circle_shape_mut))
        .unwrap();
    rt.register_type(TypeSpec::<Dot>::new("Dot").base::<Shape>(dot_shape, dot_shape_mut))
        .unwrap();

    rt.define_native_conversion(|_: &Shape| 111i64);
    rt.define_native_conversion(|_: &Square| 222i64);
    rt.define_native_conversion(|_: &Circle| 444i64);

    if own_first {
        rt.implicitly_convertible::<Square, i64>().unwrap();
        rt.implicitly_convertible::<Circle, i64>().unwrap();
        rt.implicitly_convertible::<Shape, i64>().unwrap();
    } else {
        rt.implicitly_convertible::<Shape, i64>().unwrap();
        rt.implicitly_convertible::<Circle, i64>().unwrap();
        rt.implicitly_convertible::<Square, i64>().unwrap();
    }
    rt
}

fn as_long(rt: &mut Runtime, value: Dynamic) -> Dynamic {
    let set = OverloadSet::new("as_long").overload(Overload::new(|(x,): (i64,)| x));
    set.call(rt, &[value]).unwrap()
}

#[test]
fn test_own_conversion_wins_in_any_declaration_order() {
    for own_first in [true, false] {
        let mut rt = shapes_runtime(own_first);
        let square = rt
            .cast(Box::new(Square { shape: Shape { id: 1 } }), ReturnPolicy::Automatic, None)
            .unwrap();
        let circle = rt
            .cast(Box::new(Circle { shape: Shape { id: 2 } }), ReturnPolicy::Automatic, None)
            .unwrap();

        assert_eq!(as_long(&mut rt, square), Dynamic::Int(222), "own_first: {own_first}");
        assert_eq!(as_long(&mut rt, circle), Dynamic::Int(444), "own_first: {own_first}");
    }
}

#[test]
fn test_inherited_conversion_applies_without_own() {
    let mut rt = shapes_runtime(true);
    let dot = rt
        .cast(Box::new(Dot { shape: Shape { id: 3 } }), ReturnPolicy::Automatic, None)
        .unwrap();
    assert_eq!(as_long(&mut rt, dot), Dynamic::Int(111));
}

// =============================================================================
// Implicit casts across independent bases
// =============================================================================

#[derive(Debug, Default)]
struct H1 {
    value: i32,
}

#[derive(Debug, Default)]
struct H2 {
    h1: H1,
    tag: i32,
}

#[derive(Debug, Default)]
struct H3 {
    value: i32,
}

#[derive(Debug, Default)]
struct H4 {
    h3: H3,
    h2: H2,
}

fn h4_h3(h: &H4) -> &H3 {
    &h.h3
}

fn h4_h3_mut(h: &mut H4) -> &mut H3 {
    &mut h.h3
}

fn h4_h2(h: &H4) -> &H2 {
    &h.h2
}

fn h4_h2_mut(h: &mut H4) -> &mut H2 {
    &mut h.h2
}

fn h2_h1(h: &H2) -> &H1 {
    &h.h1
}

fn h2_h1_mut(h: &mut H2) -> &mut H1 {
    &mut h.h1
}

fn hierarchy_runtime(order: [usize; 3]) -> Runtime {
    init_logging();
    let mut rt = Runtime::new();
    rt.register_type(TypeSpec::<H1>::new("H1")).unwrap();
    rt.register_type(TypeSpec::<H2>::new("H2")).unwrap();
    rt.register_type(TypeSpec::<H3>::new("H3")).unwrap();
    rt.register_type(TypeSpec::<H4>::new("H4")).unwrap();
    for step in order {
        match step {
            0 => rt.declare_implicit_cast::<H4, H3>(h4_h3, h4_h3_mut).unwrap(),
            1 => rt.declare_implicit_cast::<H4, H2>(h4_h2, h4_h2_mut).unwrap(),
            _ => rt.declare_implicit_cast::<H2, H1>(h2_h1, h2_h1_mut).unwrap(),
        }
    }
    rt
}

#[test]
fn test_implicit_casts_in_any_order() {
    for order in [[0, 1, 2], [2, 1, 0], [1, 2, 0]] {
        let mut rt = hierarchy_runtime(order);
        let h4 = NativePtr::new(H4::default());
        let obj = rt.cast(h4.clone(), ReturnPolicy::Reference, None).unwrap();

        let h1 = rt.load::<NativePtr<H1>>(&obj).unwrap();
        let h2 = rt.load::<NativePtr<H2>>(&obj).unwrap();
        let h3 = rt.load::<NativePtr<H3>>(&obj).unwrap();

        h1.borrow_mut().unwrap().value = 1;
        h2.borrow_mut().unwrap().tag = 2;
        h3.borrow_mut().unwrap().value = 3;

        let h4 = h4.borrow().unwrap();
        assert_eq!((h4.h2.h1.value, h4.h2.tag, h4.h3.value), (1, 2, 3), "order: {order:?}");
    }
}

#[test]
fn test_implicit_casts_share_addresses() {
    let mut rt = hierarchy_runtime([0, 1, 2]);
    let h4 = NativePtr::new(H4::default());
    let obj = rt.cast(h4.clone(), ReturnPolicy::Reference, None).unwrap();

    let h2 = rt.load::<NativePtr<H2>>(&obj).unwrap();
    assert!(h2.ptr_eq(&h4.project(h4_h2, h4_h2_mut)));
    assert!(rt.load::<NativePtr<H4>>(&obj).unwrap().ptr_eq(&h4));
}

#[test]
fn test_implicit_casts_reject_cycles() {
    let mut rt = hierarchy_runtime([0, 1, 2]);
    fn h1_h4(_: &H1) -> &H4 {
        unreachable!()
    }
    fn h1_h4_mut(_: &mut H1) -> &mut H4 {
        unreachable!()
    }
    assert!(matches!(
        rt.declare_implicit_cast::<H1, H4>(h1_h4, h1_h4_mut),
        Err(RegistrationError::CyclicCast { .. })
    ));
}

// =============================================================================
// Casts through unregistered intermediates
// =============================================================================

#[derive(Debug, Default)]
struct Inner {
    value: i32,
}

#[derive(Debug, Default)]
struct Middle {
    inner: Inner,
}

#[derive(Debug, Default)]
struct Outer {
    middle: Middle,
}

fn outer_middle(o: &Outer) -> &Middle {
    &o.middle
}

fn outer_middle_mut(o: &mut Outer) -> &mut Middle {
    &mut o.middle
}

fn middle_inner(m: &Middle) -> &Inner {
    &m.inner
}

fn middle_inner_mut(m: &mut Middle) -> &mut Inner {
    &mut m.inner
}

#[test]
fn test_casts_chain_through_unregistered_types() {
    let mut rt = Runtime::new();
    rt.register_type(TypeSpec::<Outer>::new("Outer")).unwrap();
    rt.register_type(TypeSpec::<Inner>::new("Inner")).unwrap();
    rt.declare_implicit_cast::<Middle, Inner>(middle_inner, middle_inner_mut)
        .unwrap();
    rt.declare_implicit_cast::<Outer, Middle>(outer_middle, outer_middle_mut)
        .unwrap();

    let outer = rt
        .cast(Box::new(Outer::default()), ReturnPolicy::Automatic, None)
        .unwrap();
    let inner = rt.load::<NativePtr<Inner>>(&outer).unwrap();
    inner.borrow_mut().unwrap().value = 7;
    assert_eq!(rt.with_native(&outer, |o: &Outer| o.middle.inner.value), Some(7));
}

// =============================================================================
// Conversions into unregistered targets
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
struct Label(String);

impl FromDynamic for Label {
    fn load(_rt: &mut Runtime, _src: &Dynamic, _convert: bool) -> LoadResult<Self> {
        Ok(None)
    }

    fn type_name() -> Cow<'static, str> {
        Cow::Borrowed("Label")
    }

    fn from_converted(value: &dyn Any) -> Option<Self> {
        value.downcast_ref::<Label>().cloned()
    }
}

#[test]
fn test_unregistered_target_receives_converted_value() {
    let mut rt = Runtime::new();
    rt.define_native_conversion(|n: &i64| Label(format!("#{n}")));
    rt.implicitly_convertible::<i64, Label>().unwrap();

    let show = OverloadSet::new("show").overload(Overload::new(|(label,): (Label,)| label.0));
    assert_eq!(show.call(&mut rt, &[Dynamic::Int(7)]), Ok(Dynamic::from("#7")));
    assert!(show.call(&mut rt, &[Dynamic::from("7")]).is_err());
    assert_eq!(rt.heap().live_count(), 0);
}

// =============================================================================
// Sum types
// =============================================================================

#[test]
fn test_variant_prefers_exact_alternative() {
    let mut rt = Runtime::new();
    let which = OverloadSet::new("which").overload(Overload::new(|(v,): (Union2<f64, i32>,)| match v {
        Union2::First(_) => "double",
        Union2::Second(_) => "int",
    }));

    assert_eq!(which.call(&mut rt, &[Dynamic::Int(1)]), Ok(Dynamic::from("int")));
    assert_eq!(which.call(&mut rt, &[Dynamic::Float(1.0)]), Ok(Dynamic::from("double")));
}
