//! Conversion registry.
//!
//! Maps native type identities to wrapper descriptors and holds the tables
//! the implicit conversion engine consults at load time.
//!
//! ## Key Types
//!
//! - [`TypeRegistry`]: descriptors, module scopes and conversion tables
//! - [`TypeInfo`] / [`TypeSpec`]: a wrapper descriptor and its builder
//! - [`InstanceRegistry`]: live instances by native address
//! - [`ConversionGraph`]: upcast and conversion edges between native types
//!
//! Conversion tables are keyed by the *target* identity, so a conversion may
//! be declared before or after its target registers.

mod graph;
mod instances;
mod type_info;

use std::any::{Any, TypeId};
use std::fmt;
use std::rc::Rc;

use log::debug;
use rustc_hash::FxHashMap;
use tether_core::{Dynamic, ModuleId, NativeCell, NativeView, Projection, RegistrationError, TypeHash, TypeInfoId};

use crate::caster::LoadResult;
use crate::runtime::Runtime;

pub use graph::{ConversionEdge, ConversionGraph};
pub use instances::InstanceRegistry;
pub use type_info::{AliasFromFn, AliasInfo, CopyFn, MakeCellFn, NativeBase, TypeFlags, TypeInfo, TypeSpec};

/// A native conversion from a source value to fresh target storage.
pub type ConvertFn = Rc<dyn Fn(&dyn Any) -> Option<NativeCell>>;
/// A direct conversion hook: produces a target view from any host value.
pub type DirectConversionFn = Rc<dyn Fn(&Runtime, &Dynamic) -> Option<NativeView>>;
/// Loads a host value as a boxed native value of one fixed type.
pub type SourceLoader = fn(&mut Runtime, &Dynamic, bool) -> LoadResult<Box<dyn Any>>;

/// A declared implicit cast from `derived` into the table's target.
#[derive(Debug, Clone)]
pub struct ImplicitCast {
    pub derived: TypeHash,
    pub upcast: Projection,
}

/// A declared implicit conversion from `source` into the table's target.
#[derive(Clone)]
pub struct ImplicitConversion {
    pub source: TypeHash,
    /// Upcasts applied to the source value before converting.
    pub steps: Vec<Projection>,
    pub convert: ConvertFn,
}

impl fmt::Debug for ImplicitConversion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImplicitConversion")
            .field("source", &self.source)
            .field("steps", &self.steps)
            .finish()
    }
}

#[derive(Debug)]
struct ModuleScope {
    name: String,
    types: FxHashMap<TypeHash, TypeInfoId>,
}

/// All wrapper descriptors and conversion tables of a runtime.
#[derive(Default)]
pub struct TypeRegistry {
    infos: Vec<TypeInfo>,
    global: FxHashMap<TypeHash, TypeInfoId>,
    modules: Vec<ModuleScope>,
    type_ids: FxHashMap<TypeId, TypeHash>,
    names: FxHashMap<TypeHash, &'static str>,
    upcasts: FxHashMap<(TypeHash, TypeHash), Projection>,
    implicit_casts: FxHashMap<TypeHash, Vec<ImplicitCast>>,
    implicit_conversions: FxHashMap<TypeHash, Vec<ImplicitConversion>>,
    direct_conversions: FxHashMap<TypeHash, Vec<DirectConversionFn>>,
    native_conversions: FxHashMap<(TypeHash, TypeHash), ConvertFn>,
    source_loaders: FxHashMap<TypeHash, SourceLoader>,
    graph: ConversionGraph,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Module scopes
    // ========================================================================

    pub fn create_module(&mut self, name: impl Into<String>) -> ModuleId {
        let id = ModuleId::new(self.modules.len() as u32);
        let name = name.into();
        debug!("created module scope {name} ({id})");
        self.modules.push(ModuleScope {
            name,
            types: FxHashMap::default(),
        });
        id
    }

    pub fn module_name(&self, module: ModuleId) -> Option<&str> {
        self.modules
            .get(module.index() as usize)
            .map(|scope| scope.name.as_str())
    }

    // ========================================================================
    // Descriptors
    // ========================================================================

    /// Id the next inserted descriptor will receive.
    pub(crate) fn next_id(&self) -> TypeInfoId {
        TypeInfoId::new(self.infos.len() as u32)
    }

    /// Whether `native` already has a descriptor in the given scope.
    pub fn is_registered_in(&self, native: TypeHash, module: Option<ModuleId>) -> Result<bool, RegistrationError> {
        match module {
            None => Ok(self.global.contains_key(&native)),
            Some(module) => self
                .modules
                .get(module.index() as usize)
                .map(|scope| scope.types.contains_key(&native))
                .ok_or(RegistrationError::UnknownModule(module)),
        }
    }

    pub(crate) fn insert(&mut self, info: TypeInfo) -> TypeInfoId {
        let id = info.id;
        self.type_ids.insert(info.type_id, info.native);
        self.names.insert(info.native, info.native_name);
        match info.module.and_then(|m| self.modules.get_mut(m.index() as usize)) {
            Some(scope) => {
                scope.types.insert(info.native, id);
            }
            None => {
                self.global.insert(info.native, id);
            }
        }
        self.infos.push(info);
        id
    }

    /// Descriptor for `native`: the active module's local table first, then the global one.
    pub fn lookup(&self, native: TypeHash, active: Option<ModuleId>) -> Option<TypeInfoId> {
        active
            .and_then(|module| self.lookup_local(module, native))
            .or_else(|| self.lookup_global(native))
    }

    pub fn lookup_global(&self, native: TypeHash) -> Option<TypeInfoId> {
        self.global.get(&native).copied()
    }

    pub fn lookup_local(&self, module: ModuleId, native: TypeHash) -> Option<TypeInfoId> {
        self.modules
            .get(module.index() as usize)?
            .types
            .get(&native)
            .copied()
    }

    /// # Panics
    ///
    /// Panics if `id` did not come from this registry.
    pub fn info(&self, id: TypeInfoId) -> &TypeInfo {
        &self.infos[id.index() as usize]
    }

    pub(crate) fn info_mut(&mut self, id: TypeInfoId) -> &mut TypeInfo {
        &mut self.infos[id.index() as usize]
    }

    pub fn get(&self, id: TypeInfoId) -> Option<&TypeInfo> {
        self.infos.get(id.index() as usize)
    }

    pub fn hash_of_type_id(&self, type_id: TypeId) -> Option<TypeHash> {
        self.type_ids.get(&type_id).copied()
    }

    pub(crate) fn remember_name(&mut self, native: TypeHash, name: &'static str) {
        self.names.entry(native).or_insert(name);
    }

    /// Best known name of a native type.
    pub fn native_name(&self, native: TypeHash) -> String {
        match self.names.get(&native) {
            Some(name) => short_name(name).to_string(),
            None => native.to_string(),
        }
    }

    pub fn len(&self) -> usize {
        self.infos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.infos.is_empty()
    }

    // ========================================================================
    // Upcasts
    // ========================================================================

    /// Record an upcast edge and an implicit cast into `base`.
    /// Fails when an upcast from `derived` to `base` would close a cycle.
    pub(crate) fn check_upcast(&self, derived: TypeHash, base: TypeHash) -> Result<(), RegistrationError> {
        if self.graph.upcasts_to(base, derived) {
            return Err(RegistrationError::CyclicCast {
                derived: self.native_name(derived),
                base: self.native_name(base),
            });
        }
        Ok(())
    }

    pub(crate) fn add_upcast(
        &mut self,
        derived: TypeHash,
        base: TypeHash,
        upcast: Projection,
    ) -> Result<(), RegistrationError> {
        self.check_upcast(derived, base)?;
        self.graph.add_upcast(derived, base);
        self.upcasts.insert((derived, base), upcast.clone());
        let casts = self.implicit_casts.entry(base).or_default();
        if !casts.iter().any(|cast| cast.derived == derived) {
            casts.push(ImplicitCast { derived, upcast });
        }
        Ok(())
    }

    /// Projections along the shortest upcast chain from `from` to `to`.
    pub fn upcast_path(&self, from: TypeHash, to: TypeHash) -> Option<Vec<Projection>> {
        let chain = self.graph.upcast_path(from, to)?;
        self.projections(&chain)
    }

    fn projections(&self, chain: &[TypeHash]) -> Option<Vec<Projection>> {
        chain
            .windows(2)
            .map(|pair| self.upcasts.get(&(pair[0], pair[1])).cloned())
            .collect()
    }

    /// Projections from a descriptor to `target` along declared native bases.
    pub fn base_path(&self, from: TypeInfoId, target: TypeHash) -> Option<Vec<Projection>> {
        let info = self.get(from)?;
        if info.native == target {
            return Some(Vec::new());
        }
        info.bases.iter().find_map(|base| {
            let rest = match self.lookup(base.native, info.module) {
                Some(base_info) => self.base_path(base_info, target)?,
                None if base.native == target => Vec::new(),
                None => return None,
            };
            let mut path = vec![base.upcast.clone()];
            path.extend(rest);
            Some(path)
        })
    }

    /// Projections from a descriptor to `target` following first bases only.
    ///
    /// Valid when `target` is simple: every registered descendant of a simple
    /// type reaches it through a single-base chain.
    pub fn simple_base_path(&self, from: TypeInfoId, target: TypeHash) -> Option<Vec<Projection>> {
        let mut path = Vec::new();
        let mut info = self.get(from)?;
        while info.native != target {
            let base = info.bases.first()?;
            path.push(base.upcast.clone());
            info = self.get(self.lookup(base.native, info.module)?)?;
        }
        Some(path)
    }

    /// Clear the simple flag on `info` and all of its registered ancestors.
    pub(crate) fn mark_nonsimple(&mut self, info: TypeInfoId) {
        let mut pending = vec![info];
        while let Some(id) = pending.pop() {
            let descriptor = self.info_mut(id);
            descriptor.flags.remove(TypeFlags::SIMPLE_TYPE);
            let module = descriptor.module;
            let bases: Vec<TypeHash> = descriptor.bases.iter().map(|base| base.native).collect();
            pending.extend(bases.into_iter().filter_map(|base| self.lookup(base, module)));
        }
    }

    pub fn implicit_casts(&self, target: TypeHash) -> &[ImplicitCast] {
        self.implicit_casts.get(&target).map_or(&[], Vec::as_slice)
    }

    // ========================================================================
    // Conversions
    // ========================================================================

    pub(crate) fn add_native_conversion(&mut self, from: TypeHash, to: TypeHash, convert: ConvertFn) {
        self.graph.add_convert(from, to);
        self.native_conversions.insert((from, to), convert);
    }

    /// Validate and record an implicit conversion.
    ///
    /// The source must reach the target through upcasts followed by exactly
    /// one native conversion.
    pub(crate) fn add_implicit_conversion(
        &mut self,
        source: TypeHash,
        target: TypeHash,
    ) -> Result<(), RegistrationError> {
        let no_path = || RegistrationError::NoNativeConversion {
            from: self.native_name(source),
            to: self.native_name(target),
        };
        let chain = self.graph.conversion_path(source, target).ok_or_else(no_path)?;
        let last = *chain.last().ok_or_else(no_path)?;
        let steps = self.projections(&chain).ok_or_else(no_path)?;
        let convert = self
            .native_conversions
            .get(&(last, target))
            .cloned()
            .ok_or_else(no_path)?;

        self.implicit_conversions
            .entry(target)
            .or_default()
            .push(ImplicitConversion {
                source,
                steps,
                convert,
            });
        Ok(())
    }

    pub fn implicit_conversions(&self, target: TypeHash) -> &[ImplicitConversion] {
        self.implicit_conversions.get(&target).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn add_direct_conversion(&mut self, target: TypeHash, hook: DirectConversionFn) {
        self.direct_conversions.entry(target).or_default().push(hook);
    }

    pub fn direct_conversions(&self, target: TypeHash) -> &[DirectConversionFn] {
        self.direct_conversions.get(&target).map_or(&[], Vec::as_slice)
    }

    pub(crate) fn set_source_loader(&mut self, native: TypeHash, loader: SourceLoader) {
        self.source_loaders.insert(native, loader);
    }

    pub fn source_loader(&self, native: TypeHash) -> Option<SourceLoader> {
        self.source_loaders.get(&native).copied()
    }

    pub fn graph(&self) -> &ConversionGraph {
        &self.graph
    }
}

impl fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeRegistry")
            .field("types", &self.infos.len())
            .field("modules", &self.modules.len())
            .field("implicit_casts", &self.implicit_casts.len())
            .field("implicit_conversions", &self.implicit_conversions.len())
            .field("graph", &self.graph)
            .finish()
    }
}

/// Last path segment of a type name, unless it is generic.
pub(crate) fn short_name(name: &str) -> &str {
    if name.contains('<') {
        return name;
    }
    name.rsplit_once("::").map_or(name, |(_, tail)| tail)
}
