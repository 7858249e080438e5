//! Declaring implicit casts and conversions.
//!
//! A conversion is declared in two halves. [`Runtime::define_native_conversion`]
//! teaches the bridge how native code converts one type into another, and
//! [`Runtime::declare_implicit_conversion`] lets the loader apply it to host
//! values. The second half fails eagerly when no native path exists.

use std::any::{Any, type_name};
use std::rc::Rc;

use log::debug;
use tether_core::{Dynamic, NativeView, Projection, RegistrationError, TypeHash, new_cell};

use crate::runtime::Runtime;

impl Runtime {
    /// Define how native code converts an `A` into a `B`.
    pub fn define_native_conversion<A: Any, B: Any>(&mut self, convert: impl Fn(&A) -> B + 'static) {
        let (from, to) = (TypeHash::of::<A>(), TypeHash::of::<B>());
        self.registry.remember_name(from, type_name::<A>());
        self.registry.remember_name(to, type_name::<B>());
        self.registry.add_native_conversion(
            from,
            to,
            Rc::new(move |value: &dyn Any| value.downcast_ref::<A>().map(|a| new_cell(convert(a)))),
        );
        debug!(
            "native conversion {} -> {}",
            self.registry.native_name(from),
            self.registry.native_name(to)
        );
    }

    /// Let host values loadable as `source` load as `target` when conversion
    /// is allowed.
    pub fn declare_implicit_conversion(&mut self, source: TypeHash, target: TypeHash) -> Result<(), RegistrationError> {
        self.registry.add_implicit_conversion(source, target)?;
        debug!(
            "implicit conversion {} -> {}",
            self.registry.native_name(source),
            self.registry.native_name(target)
        );
        Ok(())
    }

    /// Typed [`declare_implicit_conversion`](Self::declare_implicit_conversion).
    ///
    /// ```
    /// use tether::Runtime;
    ///
    /// struct Meters(f64);
    ///
    /// let mut rt = Runtime::new();
    /// assert!(rt.implicitly_convertible::<f64, Meters>().is_err());
    ///
    /// rt.define_native_conversion(|m: &f64| Meters(*m));
    /// assert!(rt.implicitly_convertible::<f64, Meters>().is_ok());
    /// ```
    pub fn implicitly_convertible<A: Any, B: Any>(&mut self) -> Result<(), RegistrationError> {
        self.registry.remember_name(TypeHash::of::<A>(), type_name::<A>());
        self.registry.remember_name(TypeHash::of::<B>(), type_name::<B>());
        self.declare_implicit_conversion(TypeHash::of::<A>(), TypeHash::of::<B>())
    }

    /// Let values of `D` load wherever a `B` is expected, through the part of
    /// `D` that is a `B`.
    pub fn declare_implicit_cast<D: Any, B: Any>(
        &mut self,
        get: fn(&D) -> &B,
        get_mut: fn(&mut D) -> &mut B,
    ) -> Result<(), RegistrationError> {
        let (derived, base) = (TypeHash::of::<D>(), TypeHash::of::<B>());
        self.registry.remember_name(derived, type_name::<D>());
        self.registry.remember_name(base, type_name::<B>());
        self.registry.add_upcast(derived, base, Projection::new(get, get_mut))?;
        debug!(
            "implicit cast {} -> {}",
            self.registry.native_name(derived),
            self.registry.native_name(base)
        );
        Ok(())
    }

    /// Load host values as `T` through `hook`, tried after implicit
    /// conversions.
    pub fn declare_direct_conversion<T: Any>(&mut self, hook: impl Fn(&Runtime, &Dynamic) -> Option<T> + 'static) {
        let target = TypeHash::of::<T>();
        self.registry.remember_name(target, type_name::<T>());
        self.registry.add_direct_conversion(
            target,
            Rc::new(move |rt: &Runtime, src: &Dynamic| hook(rt, src).map(NativeView::from_value)),
        );
        debug!("direct conversion into {}", self.registry.native_name(target));
    }
}

#[cfg(test)]
mod tests {
    use tether_core::{CastError, ReturnPolicy};

    use super::*;
    use crate::registry::TypeSpec;

    #[derive(Debug, Clone, PartialEq)]
    struct Celsius(f64);

    #[derive(Debug, Clone, PartialEq)]
    struct Reading {
        value: Celsius,
    }

    fn reading_value(r: &Reading) -> &Celsius {
        &r.value
    }

    fn reading_value_mut(r: &mut Reading) -> &mut Celsius {
        &mut r.value
    }

    #[test]
    fn conversions_need_a_native_path() {
        let mut rt = Runtime::new();
        let err = rt.implicitly_convertible::<f64, Celsius>().unwrap_err();
        assert!(matches!(err, RegistrationError::NoNativeConversion { .. }));

        rt.define_native_conversion(|c: &f64| Celsius(*c));
        rt.implicitly_convertible::<f64, Celsius>().unwrap();
        assert_eq!(rt.registry().implicit_conversions(TypeHash::of::<Celsius>()).len(), 1);
    }

    #[test]
    fn conversions_apply_only_with_convert() {
        let mut rt = Runtime::new();
        rt.register_type(TypeSpec::<Celsius>::new("Celsius")).unwrap();
        rt.define_native_conversion(|c: &f64| Celsius(*c));
        rt.implicitly_convertible::<f64, Celsius>().unwrap();

        let loaded = rt.with_life_support(|rt| {
            let ptr = rt.load::<tether_core::NativePtr<Celsius>>(&Dynamic::Float(21.5))?;
            ptr.cloned().map_err(CastError::from)
        });
        assert_eq!(loaded, Ok(Celsius(21.5)));
    }

    #[test]
    fn implicit_casts_reject_cycles() {
        let mut rt = Runtime::new();
        rt.declare_implicit_cast::<Reading, Celsius>(reading_value, reading_value_mut)
            .unwrap();
        assert_eq!(rt.registry().implicit_casts(TypeHash::of::<Celsius>()).len(), 1);

        fn back(_: &Celsius) -> &Reading {
            unreachable!()
        }
        fn back_mut(_: &mut Celsius) -> &mut Reading {
            unreachable!()
        }
        let err = rt.declare_implicit_cast::<Celsius, Reading>(back, back_mut).unwrap_err();
        assert!(matches!(err, RegistrationError::CyclicCast { .. }));
    }

    #[test]
    fn implicit_casts_project_into_the_wrapper() {
        let mut rt = Runtime::new();
        rt.register_type(TypeSpec::<Reading>::new("Reading")).unwrap();
        rt.register_type(TypeSpec::<Celsius>::new("Celsius")).unwrap();
        rt.declare_implicit_cast::<Reading, Celsius>(reading_value, reading_value_mut)
            .unwrap();

        let reading = rt
            .cast(
                Box::new(Reading { value: Celsius(3.0) }),
                ReturnPolicy::Automatic,
                None,
            )
            .unwrap();
        let celsius = rt.load::<tether_core::NativePtr<Celsius>>(&reading).unwrap();
        celsius.borrow_mut().unwrap().0 = 4.0;
        assert_eq!(rt.with_native(&reading, |r: &Reading| r.value.0), Some(4.0));
    }

    #[test]
    fn direct_conversions_come_last() {
        let mut rt = Runtime::new();
        rt.register_type(TypeSpec::<Celsius>::new("Celsius")).unwrap();
        rt.declare_direct_conversion(|_, src| src.as_str().and_then(|s| s.parse().ok()).map(Celsius));

        let ptr = rt.load::<tether_core::NativePtr<Celsius>>(&Dynamic::from("12.5")).unwrap();
        assert_eq!(ptr.cloned(), Ok(Celsius(12.5)));
        assert!(rt.load::<tether_core::NativePtr<Celsius>>(&Dynamic::from("warm")).is_err());
    }
}
