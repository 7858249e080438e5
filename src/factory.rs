//! Constructing instances from factory return values.
//!
//! A factory is a native function whose result initializes the instance being
//! constructed. What the result may be, and how it is adopted, depends on its
//! shape; see [`FactoryReturn`].
//!
//! When the instance's host type is a dynamic-side subclass of the wrapper
//! type, and the type registered an alias, the stored value must be an alias
//! value so overridable behaviour dispatches back to the host.

use std::any::{Any, TypeId};

use log::{debug, trace};
use tether_core::{
    CastError, ConstructionError, Dynamic, Holder, HolderKind, NativeCell, NativeView, ObjectHandle, Shared,
    TetherError, TypeInfoId, new_cell,
};

use crate::registry::TypeInfo;
use crate::runtime::Runtime;

/// The value a factory function hands back.
pub enum FactoryReturn<T> {
    /// A boxed value of exactly the constructed type. `None` is a null pointer.
    Pointer(Option<Box<T>>),
    /// A boxed value of the constructed type, its alias, or a registered
    /// descendant.
    BasePointer(Option<Box<dyn Any>>),
    /// A shared holder, adopted as is.
    Holder(Option<Shared<T>>),
    /// Shared storage of the constructed type, its alias, or a registered
    /// descendant.
    SharedBase(Option<NativeCell>),
    /// An existing instance whose value is moved into the new one.
    Object(Dynamic),
    /// A plain value.
    Value(T),
    /// A value of the alias type.
    AliasValue(Box<dyn Any>),
}

impl<T> FactoryReturn<T> {
    fn shape(&self) -> &'static str {
        match self {
            FactoryReturn::Pointer(_) => "pointer",
            FactoryReturn::BasePointer(_) => "base pointer",
            FactoryReturn::Holder(_) => "holder",
            FactoryReturn::SharedBase(_) => "shared base",
            FactoryReturn::Object(_) => "object",
            FactoryReturn::Value(_) => "value",
            FactoryReturn::AliasValue(_) => "alias value",
        }
    }
}

fn owned(info: &TypeInfo, view: NativeView) -> Holder {
    match info.default_holder() {
        HolderKind::Shared => Holder::Shared(view),
        _ => Holder::Unique(view),
    }
}

fn is_alias(info: &TypeInfo, view: &NativeView) -> bool {
    info.alias
        .as_ref()
        .is_some_and(|alias| view.anchor_type() == Some(alias.type_id))
}

/// Move an owned value into storage, building the alias when one is needed.
fn adopt_value<T: Any>(info: &TypeInfo, value: T, need_alias: bool) -> Result<Holder, ConstructionError> {
    if !need_alias {
        return Ok(owned(info, NativeView::new(new_cell(value))));
    }
    info.alias
        .as_ref()
        .and_then(|alias| alias.from_value(Box::new(value)))
        .map(|view| owned(info, view))
        .ok_or(ConstructionError::AliasRequired)
}

/// Storage of the constructed type, its alias or a registered descendant,
/// viewed as the constructed type.
fn view_of(rt: &Runtime, info: &TypeInfo, cell: NativeCell) -> Option<NativeView> {
    let view = NativeView::new(cell);
    let anchor = view.anchor_type()?;
    if anchor == info.type_id {
        return Some(view);
    }
    if let Some(alias) = &info.alias
        && anchor == alias.type_id
    {
        return Some(view.project(&alias.upcast));
    }
    let descendant = rt.registry.hash_of_type_id(anchor)?;
    let path = rt.registry.upcast_path(descendant, info.native)?;
    Some(view.project_all(&path))
}

/// Move a boxed value of unknown type into storage.
fn make_cell(rt: &Runtime, info: &TypeInfo, value: Box<dyn Any>) -> Option<NativeCell> {
    let type_id = Any::type_id(&*value);
    let make = if type_id == info.type_id {
        info.make_cell
    } else if let Some(alias) = info.alias.as_ref().filter(|alias| alias.type_id == type_id) {
        alias.make_cell
    } else {
        let descendant = rt.registry.hash_of_type_id(type_id)?;
        let id = rt.registry.lookup(descendant, rt.active_module)?;
        rt.registry.info(id).make_cell
    };
    make(value).ok()
}

/// Steal the value of a freshly made instance of the same type.
fn steal(rt: &mut Runtime, info: &TypeInfo, donor: &Dynamic) -> Result<Holder, TetherError> {
    let donor_ty = rt.type_of(donor);
    let handle = match donor.as_handle() {
        Some(handle) if donor_ty == Some(info.host_type) => handle,
        _ => {
            return Err(ConstructionError::IncompatibleObject {
                actual: rt.type_name(donor),
            }
            .into());
        }
    };
    if rt.ref_count(donor) != Some(1) {
        return Err(ConstructionError::MultipleReferences.into());
    }
    if !rt.instance(donor).is_some_and(|instance| instance.is_owned()) {
        return Err(ConstructionError::Unowned.into());
    }
    let holder = rt.take_slot(handle, info.id).ok_or_else(|| CastError::Uninitialized {
        type_name: info.name.clone(),
    })?;
    Ok(holder)
}

fn resolve_holder<T: Any>(
    rt: &mut Runtime,
    info: &TypeInfo,
    ret: FactoryReturn<T>,
    need_alias: bool,
) -> Result<Holder, TetherError> {
    let holder = match ret {
        FactoryReturn::Pointer(ptr) => {
            let value = ptr.ok_or(ConstructionError::NullPointer)?;
            adopt_value(info, *value, need_alias)?
        }
        FactoryReturn::BasePointer(ptr) => {
            let value = ptr.ok_or(ConstructionError::NullPointer)?;
            let value = match value.downcast::<T>() {
                Ok(value) => return Ok(adopt_value(info, *value, need_alias)?),
                Err(value) => value,
            };
            let cell = make_cell(rt, info, value).ok_or(ConstructionError::BaseDowncast)?;
            let view = view_of(rt, info, cell).ok_or(ConstructionError::BaseDowncast)?;
            if need_alias && !is_alias(info, &view) {
                // The descendant is sliced: its `T` part is copied into the alias.
                let value = info.copy_value(&view).ok_or(ConstructionError::AliasRequired)?;
                let alias = info.alias.as_ref().and_then(|alias| alias.from_value(value));
                return Ok(owned(info, alias.ok_or(ConstructionError::AliasRequired)?));
            }
            owned(info, view)
        }
        FactoryReturn::Holder(shared) => {
            let shared = shared.ok_or(ConstructionError::NullPointer)?;
            let view = shared.into_view();
            if need_alias && !is_alias(info, &view) {
                return Err(ConstructionError::HolderNotAlias.into());
            }
            Holder::Shared(view)
        }
        FactoryReturn::SharedBase(cell) => {
            let cell = cell.ok_or(ConstructionError::NullPointer)?;
            let view = view_of(rt, info, cell).ok_or(ConstructionError::SharedBaseDowncast)?;
            if need_alias && !is_alias(info, &view) {
                return Err(ConstructionError::HolderNotAlias.into());
            }
            Holder::Shared(view)
        }
        FactoryReturn::Object(donor) => {
            let stolen = steal(rt, info, &donor);
            rt.dec_ref(&donor);
            stolen?
        }
        FactoryReturn::Value(value) => adopt_value(info, value, need_alias)?,
        FactoryReturn::AliasValue(value) => {
            let alias = info.alias.as_ref().ok_or(ConstructionError::AliasRequired)?;
            let cell = (alias.make_cell)(value).map_err(|_| ConstructionError::AliasRequired)?;
            owned(info, alias.view(cell))
        }
    };
    Ok(holder)
}

fn target_slot(rt: &Runtime, target: &Dynamic, info: TypeInfoId) -> Option<ObjectHandle> {
    let handle = target.as_handle()?;
    rt.instance(target)?.slot(info)?;
    Some(handle)
}

/// Initialize the `T` part of `target` from a factory result.
///
/// Any value already in the slot is released first. On failure the factory
/// result is dropped and the slot is left unconstructed.
pub fn construct_from<T: Any>(rt: &mut Runtime, target: &Dynamic, ret: FactoryReturn<T>) -> Result<(), TetherError> {
    let Some(info_id) = rt.lookup::<T>() else {
        return Err(CastError::Unregistered {
            type_name: rt.registry.native_name(tether_core::TypeHash::of::<T>()),
        }
        .into());
    };
    let info = rt.type_info(info_id).clone();
    let Some(handle) = target_slot(rt, target, info_id) else {
        if let FactoryReturn::Object(donor) = &ret {
            rt.dec_ref(donor);
        }
        return Err(ConstructionError::NotAnInstance { type_name: info.name }.into());
    };

    let need_alias = info.alias.is_some() && rt.type_of(target) != Some(info.host_type);
    trace!("constructing {} from a {}, alias needed: {need_alias}", info.name, ret.shape());

    drop(rt.take_slot(handle, info_id));
    let holder = resolve_holder(rt, &info, ret, need_alias)?;
    rt.install_holder(handle, info_id, holder)?;
    debug!("constructed {} instance {target:?}", info.name);
    Ok(())
}

/// Whether the `info` slot of `target` holds alias storage.
pub fn holds_alias(rt: &Runtime, target: &Dynamic, info: TypeInfoId) -> bool {
    let Some(view) = rt
        .instance(target)
        .and_then(|instance| instance.slot(info))
        .and_then(|slot| slot.view())
    else {
        return false;
    };
    rt.registry
        .info(info)
        .alias
        .as_ref()
        .is_some_and(|alias| view.anchor_type() == Some(alias.type_id))
}

/// Concrete type of the storage behind the `info` slot of `target`.
pub fn stored_type(rt: &Runtime, target: &Dynamic, info: TypeInfoId) -> Option<TypeId> {
    rt.instance(target)?.slot(info)?.view()?.anchor_type()
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use tether_core::ReturnPolicy;

    use super::*;
    use crate::registry::TypeSpec;

    #[derive(Debug, Clone, PartialEq)]
    struct Base {
        value: i32,
    }

    #[derive(Debug)]
    struct BaseAlias {
        base: Base,
    }

    #[derive(Debug)]
    struct Derived {
        base: Base,
        extra: i32,
    }

    fn alias_base(a: &BaseAlias) -> &Base {
        &a.base
    }

    fn alias_base_mut(a: &mut BaseAlias) -> &mut Base {
        &mut a.base
    }

    fn derived_base(d: &Derived) -> &Base {
        &d.base
    }

    fn derived_base_mut(d: &mut Derived) -> &mut Base {
        &mut d.base
    }

    fn runtime() -> (Runtime, TypeInfoId) {
        let mut rt = Runtime::new();
        let info = rt
            .register_type(TypeSpec::<Base>::new("Base").copyable().alias_from_class::<BaseAlias>(
                alias_base,
                alias_base_mut,
                |base| BaseAlias { base },
            ))
            .unwrap();
        rt.register_type(TypeSpec::<Derived>::new("Derived").base::<Base>(derived_base, derived_base_mut))
            .unwrap();
        (rt, info)
    }

    fn derived(value: i32) -> Box<dyn Any> {
        Box::new(Derived {
            base: Base { value },
            extra: 0,
        })
    }

    fn fresh(rt: &mut Runtime, info: TypeInfoId) -> Dynamic {
        let ty = rt.type_info(info).host_type;
        rt.instantiate(ty).unwrap()
    }

    #[test]
    fn values_and_pointers() {
        let (mut rt, info) = runtime();
        let obj = fresh(&mut rt, info);
        construct_from(&mut rt, &obj, FactoryReturn::Value(Base { value: 1 })).unwrap();
        assert_eq!(rt.with_native(&obj, |b: &Base| b.value), Some(1));

        construct_from(&mut rt, &obj, FactoryReturn::Pointer(Some(Box::new(Base { value: 2 })))).unwrap();
        assert_eq!(rt.with_native(&obj, |b: &Base| b.value), Some(2));
        assert_eq!(stored_type(&rt, &obj, info), Some(TypeId::of::<Base>()));

        let err = construct_from::<Base>(&mut rt, &obj, FactoryReturn::Pointer(None)).unwrap_err();
        assert_eq!(err, TetherError::Construction(ConstructionError::NullPointer));
        assert!(!rt.instance(&obj).unwrap().is_fully_constructed());
    }

    #[test]
    fn base_pointers_accept_descendants() {
        let (mut rt, info) = runtime();
        let obj = fresh(&mut rt, info);
        let derived: Box<dyn Any> = Box::new(Derived {
            base: Base { value: 3 },
            extra: 4,
        });
        construct_from::<Base>(&mut rt, &obj, FactoryReturn::BasePointer(Some(derived))).unwrap();
        assert_eq!(stored_type(&rt, &obj, info), Some(TypeId::of::<Derived>()));
        let ptr = rt.load::<tether_core::NativePtr<Base>>(&obj).unwrap();
        assert_eq!(ptr.borrow().unwrap().value, 3);

        let err = construct_from::<Base>(&mut rt, &obj, FactoryReturn::BasePointer(Some(Box::new(5u8)))).unwrap_err();
        assert_eq!(err, TetherError::Construction(ConstructionError::BaseDowncast));
    }

    #[test]
    fn subclasses_get_alias_storage() {
        let (mut rt, info) = runtime();
        let base_ty = rt.type_info(info).host_type;
        let sub = rt.create_subclass("PyBase", &[base_ty]).unwrap();
        let obj = rt.instantiate(sub).unwrap();

        construct_from(&mut rt, &obj, FactoryReturn::Value(Base { value: 6 })).unwrap();
        assert!(holds_alias(&rt, &obj, info));

        let plain = Shared::new(Base { value: 7 });
        let err = construct_from(&mut rt, &obj, FactoryReturn::Holder(Some(plain))).unwrap_err();
        assert_eq!(err, TetherError::Construction(ConstructionError::HolderNotAlias));

        let alias = Rc::new(RefCell::new(BaseAlias { base: Base { value: 8 } }));
        let shared = Shared::from(alias).project(alias_base, alias_base_mut);
        construct_from(&mut rt, &obj, FactoryReturn::Holder(Some(shared))).unwrap();
        assert!(holds_alias(&rt, &obj, info));
        assert_eq!(rt.with_native(&obj, |b: &Base| b.value), Some(8));
    }

    #[test]
    fn descendants_are_sliced_into_the_alias() {
        let (mut rt, info) = runtime();
        let base_ty = rt.type_info(info).host_type;
        let sub = rt.create_subclass("PyBase", &[base_ty]).unwrap();
        let obj = rt.instantiate(sub).unwrap();

        construct_from::<Base>(&mut rt, &obj, FactoryReturn::BasePointer(Some(derived(10)))).unwrap();
        assert!(holds_alias(&rt, &obj, info));
        assert_eq!(stored_type(&rt, &obj, info), Some(TypeId::of::<BaseAlias>()));
        assert_eq!(rt.with_native(&obj, |b: &Base| b.value), Some(10));
    }

    #[test]
    fn slicing_needs_a_copyable_type() {
        let mut rt = Runtime::new();
        let info = rt
            .register_type(TypeSpec::<Base>::new("Base").alias_from_class::<BaseAlias>(
                alias_base,
                alias_base_mut,
                |base| BaseAlias { base },
            ))
            .unwrap();
        rt.register_type(TypeSpec::<Derived>::new("Derived").base::<Base>(derived_base, derived_base_mut))
            .unwrap();
        let base_ty = rt.type_info(info).host_type;
        let sub = rt.create_subclass("PyBase", &[base_ty]).unwrap();
        let obj = rt.instantiate(sub).unwrap();

        let err = construct_from::<Base>(&mut rt, &obj, FactoryReturn::BasePointer(Some(derived(1)))).unwrap_err();
        assert_eq!(err, TetherError::Construction(ConstructionError::AliasRequired));
    }

    #[test]
    fn objects_are_stolen() {
        let (mut rt, info) = runtime();
        let obj = fresh(&mut rt, info);
        let donor = rt.cast(Box::new(Base { value: 9 }), ReturnPolicy::Automatic, None).unwrap();
        construct_from::<Base>(&mut rt, &obj, FactoryReturn::Object(donor.clone())).unwrap();
        assert_eq!(rt.with_native(&obj, |b: &Base| b.value), Some(9));
        assert!(!rt.is_alive(&donor));
    }

    #[test]
    fn shared_donors_are_refused() {
        let (mut rt, info) = runtime();
        let obj = fresh(&mut rt, info);
        let donor = rt.cast(Box::new(Base { value: 1 }), ReturnPolicy::Automatic, None).unwrap();
        rt.inc_ref(&donor);
        let err = construct_from::<Base>(&mut rt, &obj, FactoryReturn::Object(donor.clone())).unwrap_err();
        assert_eq!(err, TetherError::Construction(ConstructionError::MultipleReferences));
        assert_eq!(rt.ref_count(&donor), Some(1));

        let err = construct_from::<Base>(&mut rt, &obj, FactoryReturn::Object(Dynamic::Int(1))).unwrap_err();
        assert_eq!(
            err,
            TetherError::Construction(ConstructionError::IncompatibleObject { actual: "int".to_string() })
        );
    }
}
