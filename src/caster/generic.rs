//! Loading and casting registered native types.
//!
//! A load of a registered type walks, in order:
//!
//! 1. the exact host type;
//! 2. host subtypes, through declared native base projections;
//! 3. implicit casts from other wrapper types;
//! 4. with conversion allowed, implicit and direct conversions;
//! 5. the process-wide descriptor, when the type is module-local;
//! 6. a foreign module's loader found on the value's type.
//!
//! Unregistered targets still see implicit casts and conversions, since both
//! tables are keyed by the target's native identity.

use log::{trace, warn};
use tether_core::{
    Capsule, CastError, Dynamic, HeapObject, Holder, HolderKind, ModuleId, NativeCell, NativeView,
    Projection, ReturnPolicy, TypeHash, TypeInfoId, ValueShape,
};

use super::LoadResult;
use crate::registry::{ImplicitConversion, TypeInfo};
use crate::runtime::Runtime;

/// Type attribute naming a module-local type's loader.
pub(crate) const LOCAL_LOADER_KEY: &str = "__tether_module_local_v1__";

/// Payload of the [`LOCAL_LOADER_KEY`] capsule.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LocalLoader {
    pub module: ModuleId,
    pub info: TypeInfoId,
    pub native: TypeHash,
}

/// A successfully loaded native value and the holder it was found in.
#[derive(Debug, Clone)]
pub struct LoadedValue {
    pub view: NativeView,
    pub holder: HolderKind,
}

fn nested<R>(rt: &mut Runtime, f: impl FnOnce(&mut Runtime) -> LoadResult<R>) -> LoadResult<R> {
    if !rt.enter_conversion() {
        return Ok(None);
    }
    let result = f(rt);
    rt.leave_conversion();
    result
}

// ============================================================================
// Loading
// ============================================================================

/// Load the native value identified by `native` from `src`.
#[cfg_attr(feature = "profiling", profiling::function)]
pub(crate) fn load_native(rt: &mut Runtime, native: TypeHash, src: &Dynamic, convert: bool) -> LoadResult<LoadedValue> {
    if let Some(info) = rt.registry.lookup(native, rt.active_module) {
        return load_registered(rt, info, src, convert);
    }
    if let Some(found) = try_implicit_casts(rt, native, src, convert)? {
        return Ok(Some(found));
    }
    if convert && let Some(view) = load_converted(rt, native, src)? {
        return Ok(Some(LoadedValue {
            view,
            holder: HolderKind::Borrowed,
        }));
    }
    try_foreign_loader(rt, native, src)
}

#[cfg_attr(feature = "profiling", profiling::function)]
pub(crate) fn load_registered(rt: &mut Runtime, info: TypeInfoId, src: &Dynamic, convert: bool) -> LoadResult<LoadedValue> {
    let (native, target_ty) = {
        let info = rt.registry.info(info);
        (info.native, info.host_type)
    };

    if let Dynamic::Object(handle) = src
        && let Some(src_ty) = rt.type_of(src)
    {
        if src_ty == target_ty {
            trace!("exact load of {}", rt.registry.info(info).name);
            return slot_value(rt, *handle, info, &[]);
        }
        if rt.host_types.is_subtype(src_ty, target_ty) {
            if rt.registry.info(info).is_simple()
                && let [slot_info] = *rt.host_types.type_infos(src_ty)
                && let Some(path) = rt.registry.simple_base_path(slot_info, native)
            {
                return slot_value(rt, *handle, slot_info, &path);
            }
            for slot_info in rt.host_types.type_infos(src_ty).to_vec() {
                let path = if slot_info == info {
                    Some(Vec::new())
                } else {
                    rt.registry.base_path(slot_info, native)
                };
                if let Some(path) = path {
                    return slot_value(rt, *handle, slot_info, &path);
                }
            }
        }
        if let Some(found) = try_implicit_casts(rt, native, src, convert)? {
            return Ok(Some(found));
        }
    }

    if convert {
        if let Some(found) = try_implicit_conversions(rt, info, src)? {
            return Ok(Some(found));
        }
        if let Some(found) = try_direct_conversions(rt, native, src) {
            return Ok(Some(found));
        }
    }

    if rt.registry.info(info).is_module_local()
        && let Some(global) = rt.registry.lookup_global(native)
        && let Some(found) = load_registered(rt, global, src, false)?
    {
        return Ok(Some(found));
    }

    try_foreign_loader(rt, native, src)
}

/// The value in one instance slot, projected along `path`.
fn slot_value(rt: &Runtime, handle: tether_core::ObjectHandle, info: TypeInfoId, path: &[Projection]) -> LoadResult<LoadedValue> {
    let Some(slot) = rt
        .heap
        .get(handle)
        .and_then(HeapObject::as_instance)
        .and_then(|instance| instance.slot(info))
    else {
        return Ok(None);
    };
    let type_name = || rt.registry.info(info).name.clone();
    let Some(holder) = &slot.holder else {
        return Err(CastError::Uninitialized { type_name: type_name() });
    };
    let Some(view) = holder.access() else {
        return Err(CastError::DanglingReference { type_name: type_name() });
    };
    Ok(Some(LoadedValue {
        view: view.project_all(path),
        holder: holder.kind(),
    }))
}

/// Implicit casts from wrapper types embedding the target.
fn try_implicit_casts(rt: &mut Runtime, native: TypeHash, src: &Dynamic, convert: bool) -> LoadResult<LoadedValue> {
    if src.as_handle().is_none() {
        return Ok(None);
    }
    let casts = rt.registry.implicit_casts(native).to_vec();
    if casts.is_empty() {
        return Ok(None);
    }
    nested(rt, |rt| {
        for cast in &casts {
            if let Some(found) = load_native(rt, cast.derived, src, convert)? {
                trace!("implicit cast from {}", rt.registry.native_name(cast.derived));
                return Ok(Some(LoadedValue {
                    view: found.view.project(&cast.upcast),
                    holder: found.holder,
                }));
            }
        }
        Ok(None)
    })
}

/// Conversions into `target`, ordered by how close their source is to the
/// value's host type. Ties keep declaration order.
fn ranked_conversions(rt: &Runtime, target: TypeHash, src: &Dynamic) -> Vec<ImplicitConversion> {
    let mro = rt
        .type_of(src)
        .map(|ty| rt.host_types.mro(ty).to_vec())
        .unwrap_or_default();
    let mut ranked: Vec<(usize, ImplicitConversion)> = rt
        .registry
        .implicit_conversions(target)
        .iter()
        .map(|conversion| {
            let rank = rt
                .registry
                .lookup(conversion.source, rt.active_module)
                .map(|info| rt.registry.info(info).host_type)
                .and_then(|ty| mro.iter().position(|candidate| *candidate == ty))
                .unwrap_or(mro.len());
            (rank, conversion.clone())
        })
        .collect();
    ranked.sort_by_key(|(rank, _)| *rank);
    ranked.into_iter().map(|(_, conversion)| conversion).collect()
}

/// Load the source of a conversion and run it.
fn run_conversion(rt: &mut Runtime, conversion: &ImplicitConversion, src: &Dynamic) -> LoadResult<NativeCell> {
    if let Some(loader) = rt.registry.source_loader(conversion.source) {
        let Some(value) = loader(rt, src, false)? else {
            return Ok(None);
        };
        return Ok((conversion.convert)(value.as_ref()));
    }
    let Some(found) = load_native(rt, conversion.source, src, false)? else {
        return Ok(None);
    };
    let view = found.view.project_all(&conversion.steps);
    Ok(view.with_value(|value| (conversion.convert)(value))?)
}

/// Conversions into a registered target: the result becomes a temporary
/// instance kept alive by the current call.
fn try_implicit_conversions(rt: &mut Runtime, info: TypeInfoId, src: &Dynamic) -> LoadResult<LoadedValue> {
    let (native, host_type, holder) = {
        let info = rt.registry.info(info);
        (info.native, info.host_type, info.default_holder())
    };
    let conversions = ranked_conversions(rt, native, src);
    if conversions.is_empty() {
        return Ok(None);
    }
    nested(rt, |rt| {
        for conversion in &conversions {
            let Some(cell) = run_conversion(rt, conversion, src)? else {
                continue;
            };
            let temp = rt.instantiate(host_type)?;
            let view = NativeView::new(cell);
            let holder = match holder {
                HolderKind::Shared => Holder::Shared(view),
                _ => Holder::Unique(view),
            };
            let installed = temp
                .as_handle()
                .ok_or(CastError::LoadFailedOpaque)
                .and_then(|handle| rt.install_holder(handle, info, holder));
            let loaded = installed.and_then(|()| load_registered(rt, info, &temp, false));
            match loaded {
                Ok(Some(found)) => {
                    let kept = rt.add_patient(&temp);
                    rt.dec_ref(&temp);
                    kept?;
                    trace!(
                        "converted {} to {}",
                        rt.registry.native_name(conversion.source),
                        rt.registry.info(info).name
                    );
                    return Ok(Some(found));
                }
                Ok(None) => rt.dec_ref(&temp),
                Err(err) => {
                    rt.dec_ref(&temp);
                    return Err(err);
                }
            }
        }
        Ok(None)
    })
}

/// Conversions into a target without a wrapper: the result is kept alive in
/// a capsule patient of the current call.
pub(crate) fn load_converted(rt: &mut Runtime, target: TypeHash, src: &Dynamic) -> LoadResult<NativeView> {
    let conversions = ranked_conversions(rt, target, src);
    if conversions.is_empty() {
        return Ok(None);
    }
    nested(rt, |rt| {
        for conversion in &conversions {
            let Some(cell) = run_conversion(rt, conversion, src)? else {
                continue;
            };
            let view = NativeView::new(cell);
            let capsule = rt.new_capsule(Capsule::from_view(view.clone()));
            let kept = rt.add_patient(&capsule);
            rt.dec_ref(&capsule);
            kept?;
            return Ok(Some(view));
        }
        Ok(None)
    })
}

fn try_direct_conversions(rt: &Runtime, native: TypeHash, src: &Dynamic) -> Option<LoadedValue> {
    rt.registry
        .direct_conversions(native)
        .iter()
        .find_map(|hook| hook(rt, src))
        .map(|view| LoadedValue {
            view,
            holder: HolderKind::Unique,
        })
}

/// Hand the value to the loader of the module that owns its type.
fn try_foreign_loader(rt: &mut Runtime, native: TypeHash, src: &Dynamic) -> LoadResult<LoadedValue> {
    let Some(ty) = rt.type_of(src) else {
        return Ok(None);
    };
    let Some(loader) = rt
        .host_types
        .attr(ty, LOCAL_LOADER_KEY)
        .and_then(|attr| rt.capsule(attr))
        .and_then(Capsule::view)
        .and_then(|view| view.with_value(|v| v.downcast_ref::<LocalLoader>().copied()).ok())
        .flatten()
    else {
        return Ok(None);
    };
    if Some(loader.module) == rt.active_module || loader.native != native {
        return Ok(None);
    }
    trace!("loading through the loader of {}", loader.module);
    let previous = rt.set_active_module(Some(loader.module));
    let result = load_registered(rt, loader.info, src, false);
    rt.set_active_module(previous);
    result
}

// ============================================================================
// Casting
// ============================================================================

/// Native value being cast into the host runtime.
pub(crate) enum CastSource {
    /// A value with no other owner.
    Fresh(NativeCell),
    /// A view of storage owned elsewhere.
    View(NativeView),
    /// A shared holder.
    Holder(NativeView),
}

fn find_existing(rt: &Runtime, info: TypeInfoId, view: &NativeView) -> Option<Dynamic> {
    let address = view.address()?;
    let handle = rt.instances.find(address, info)?;
    let slot = rt.heap.get(handle)?.as_instance()?.slot(info)?;
    slot.view()?;
    Some(Dynamic::Object(handle))
}

fn owned_holder(info: &TypeInfo, view: NativeView) -> Holder {
    match info.default_holder() {
        HolderKind::Shared => Holder::Shared(view),
        _ => Holder::Unique(view),
    }
}

/// Cast native storage of the type identified by `native` into an instance.
#[cfg_attr(feature = "profiling", profiling::function)]
pub(crate) fn cast_native(
    rt: &mut Runtime,
    native: TypeHash,
    source: CastSource,
    policy: ReturnPolicy,
    parent: Option<&Dynamic>,
) -> Result<Dynamic, CastError> {
    let Some(info_id) = rt.registry.lookup(native, rt.active_module) else {
        return Err(CastError::Unregistered {
            type_name: rt.registry.native_name(native),
        });
    };

    if let CastSource::View(view) | CastSource::Holder(view) = &source
        && let Some(existing) = find_existing(rt, info_id, view)
    {
        trace!("cast reuses existing instance {existing:?}");
        rt.inc_ref(&existing);
        return Ok(existing);
    }

    let info = rt.registry.info(info_id).clone();
    let not_copyable = || CastError::NotCopyable {
        type_name: info.name.clone(),
    };
    let (holder, keep_parent) = match source {
        CastSource::Fresh(cell) => match policy {
            ReturnPolicy::Reference | ReturnPolicy::ReferenceInternal => {
                return Err(CastError::InvalidPolicy {
                    policy,
                    shape: ValueShape::Value.describe(),
                });
            }
            _ => (owned_holder(&info, NativeView::new(cell)), None),
        },
        CastSource::Holder(view) => (Holder::Shared(view), None),
        CastSource::View(view) => match policy.resolve(ValueShape::Pointer) {
            ReturnPolicy::TakeOwnership => {
                let view = view.upgrade().ok_or_else(|| CastError::DanglingReference {
                    type_name: info.name.clone(),
                })?;
                (owned_holder(&info, view), None)
            }
            ReturnPolicy::Copy => {
                let cell = info.copy_view(&view).ok_or_else(not_copyable)?;
                (owned_holder(&info, NativeView::new(cell)), None)
            }
            ReturnPolicy::Move => {
                let cell = info.copy_view(&view).ok_or_else(|| CastError::NotMovable {
                    type_name: info.name.clone(),
                })?;
                (owned_holder(&info, NativeView::new(cell)), None)
            }
            ReturnPolicy::ReferenceInternal => match parent.and_then(Dynamic::as_handle) {
                Some(parent_handle) => (
                    Holder::Linked {
                        view: view.downgrade(),
                        parent: parent_handle,
                    },
                    parent.cloned(),
                ),
                None => {
                    warn!("reference_internal cast of {} without a parent", info.name);
                    (Holder::Borrowed(view.downgrade()), None)
                }
            },
            _ => (Holder::Borrowed(view.downgrade()), None),
        },
    };

    let instance = rt.instantiate(info.host_type)?;
    let installed = match instance.as_handle() {
        Some(handle) => rt.install_holder(handle, info_id, holder),
        None => Err(CastError::LoadFailedOpaque),
    };
    let linked = installed.and_then(|()| match &keep_parent {
        Some(parent) => rt.keep_alive(&instance, parent),
        None => Ok(()),
    });
    if let Err(err) = linked {
        rt.dec_ref(&instance);
        return Err(err);
    }
    trace!("cast {} with policy {policy}", info.name);
    Ok(instance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeSpec;

    #[derive(Debug, Clone, PartialEq)]
    struct Pet {
        name: String,
    }

    fn pet_name(pet: &Pet) -> &String {
        &pet.name
    }

    fn pet_name_mut(pet: &mut Pet) -> &mut String {
        &mut pet.name
    }

    fn registered() -> (Runtime, TypeInfoId) {
        let mut rt = Runtime::new();
        let info = rt.register_type(TypeSpec::<Pet>::new("Pet").copyable()).unwrap();
        (rt, info)
    }

    fn pet(name: &str) -> NativeView {
        NativeView::from_value(Pet { name: name.to_string() })
    }

    #[test]
    fn fresh_values_are_owned() {
        let (mut rt, _) = registered();
        let cell = tether_core::new_cell(Pet { name: "rex".into() });
        let obj = cast_native(&mut rt, TypeHash::of::<Pet>(), CastSource::Fresh(cell), ReturnPolicy::Move, None).unwrap();
        assert!(rt.instance(&obj).unwrap().is_owned());

        let loaded = load_native(&mut rt, TypeHash::of::<Pet>(), &obj, false).unwrap().unwrap();
        assert_eq!(loaded.holder, HolderKind::Unique);
        assert!(loaded.view.is::<Pet>());
    }

    #[test]
    fn fresh_values_cannot_be_referenced() {
        let (mut rt, _) = registered();
        let cell = tether_core::new_cell(Pet { name: "rex".into() });
        let err = cast_native(&mut rt, TypeHash::of::<Pet>(), CastSource::Fresh(cell), ReturnPolicy::Reference, None)
            .unwrap_err();
        assert!(matches!(err, CastError::InvalidPolicy { .. }));
    }

    #[test]
    fn views_are_found_again() {
        let (mut rt, _) = registered();
        let view = pet("tom");
        let first = cast_native(&mut rt, TypeHash::of::<Pet>(), CastSource::View(view.clone()), ReturnPolicy::Reference, None).unwrap();
        let second = cast_native(&mut rt, TypeHash::of::<Pet>(), CastSource::View(view.clone()), ReturnPolicy::Reference, None).unwrap();
        assert_eq!(first, second);
        assert_eq!(rt.ref_count(&first), Some(2));
    }

    #[test]
    fn copies_are_independent() {
        let (mut rt, _) = registered();
        let view = pet("tom");
        let obj = cast_native(&mut rt, TypeHash::of::<Pet>(), CastSource::View(view.clone()), ReturnPolicy::Copy, None).unwrap();
        let loaded = load_native(&mut rt, TypeHash::of::<Pet>(), &obj, false).unwrap().unwrap();
        assert!(!loaded.view.same_storage(&view));
    }

    #[test]
    fn references_dangle_safely() {
        let (mut rt, _) = registered();
        let view = pet("tom");
        let obj = cast_native(&mut rt, TypeHash::of::<Pet>(), CastSource::View(view.clone()), ReturnPolicy::Reference, None).unwrap();
        drop(view);
        assert!(matches!(
            load_native(&mut rt, TypeHash::of::<Pet>(), &obj, false),
            Err(CastError::DanglingReference { .. })
        ));
    }

    #[test]
    fn unregistered_casts_fail() {
        let mut rt = Runtime::new();
        let err = cast_native(&mut rt, TypeHash::of::<Pet>(), CastSource::View(pet("x")), ReturnPolicy::Copy, None).unwrap_err();
        assert!(matches!(err, CastError::Unregistered { .. }));
    }

    #[test]
    fn unconstructed_instances_are_an_error() {
        let (mut rt, info) = registered();
        let obj = rt.instantiate(rt.type_info(info).host_type).unwrap();
        assert!(matches!(
            load_native(&mut rt, TypeHash::of::<Pet>(), &obj, false),
            Err(CastError::Uninitialized { .. })
        ));
    }

    #[test]
    fn depth_limit_stops_nested_conversions() {
        let mut rt = Runtime::with_config(crate::RuntimeConfig::new().max_conversion_depth(0));
        rt.declare_implicit_cast::<Pet, String>(pet_name, pet_name_mut).unwrap();
        let info = rt.register_type(TypeSpec::<Pet>::new("Pet")).unwrap();
        let ty = rt.type_info(info).host_type;
        let obj = rt.instantiate(ty).unwrap();
        rt.install_holder(obj.as_handle().unwrap(), info, Holder::Unique(pet("n"))).unwrap();

        assert!(load_native(&mut rt, TypeHash::of::<String>(), &obj, false).unwrap().is_none());
    }
}
