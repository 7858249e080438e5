//! The runtime context tying the host object model to the conversion registry.
//!
//! A [`Runtime`] owns everything a bridge needs: the host heap and type
//! table, the registry of wrapper descriptors, the live instance table and the
//! life-support stack. It is single-threaded; every operation takes it by
//! reference.

use std::any::Any;

use log::{debug, trace};
use tether_core::{
    Capsule, CastError, Dynamic, HeapObject, Holder, HostTypeId, HostTypes, Instance, InstanceFlags,
    ModuleId, NumberProtocol, ObjectBody, ObjectHandle, ObjectHeap, RegistrationError, TypeHash,
    TypeInfoId, ValueSlot,
};

use crate::caster::{self, LOCAL_LOADER_KEY, LocalLoader};
use crate::config::RuntimeConfig;
use crate::life_support::LifeSupport;
use crate::registry::{InstanceRegistry, TypeFlags, TypeInfo, TypeRegistry, TypeSpec};

/// Bridge state for one host runtime.
pub struct Runtime {
    pub(crate) heap: ObjectHeap,
    pub(crate) host_types: HostTypes,
    pub(crate) registry: TypeRegistry,
    pub(crate) instances: InstanceRegistry,
    pub(crate) life_support: LifeSupport,
    pub(crate) active_module: Option<ModuleId>,
    pub(crate) config: RuntimeConfig,
    pub(crate) conversion_depth: usize,
}

impl Runtime {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let mut registry = TypeRegistry::new();
        caster::install_source_loaders(&mut registry);
        Self {
            heap: ObjectHeap::new(),
            host_types: HostTypes::new(),
            registry,
            instances: InstanceRegistry::new(),
            life_support: LifeSupport::new(config.life_support_shrink_threshold),
            active_module: None,
            config,
            conversion_depth: 0,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn heap(&self) -> &ObjectHeap {
        &self.heap
    }

    pub fn host_types(&self) -> &HostTypes {
        &self.host_types
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn instances(&self) -> &InstanceRegistry {
        &self.instances
    }

    pub fn life_support(&self) -> &LifeSupport {
        &self.life_support
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    /// Add a reference to a heap value. Inline values are unaffected.
    pub fn inc_ref(&mut self, value: &Dynamic) {
        if let Some(handle) = value.as_handle() {
            self.heap.add_ref(handle);
        }
    }

    /// Drop a reference, deallocating everything that becomes unreachable.
    pub fn dec_ref(&mut self, value: &Dynamic) {
        let Some(handle) = value.as_handle() else {
            return;
        };
        let mut pending = vec![handle];
        while let Some(handle) = pending.pop() {
            if let Some(object) = self.heap.release(handle) {
                self.deallocate(handle, object, &mut pending);
            }
        }
    }

    fn deallocate(&mut self, handle: ObjectHandle, object: HeapObject, pending: &mut Vec<ObjectHandle>) {
        let HeapObject { ty, body, patients } = object;
        match body {
            ObjectBody::Instance(instance) => {
                for slot in instance.slots {
                    self.release_slot(handle, slot);
                }
                debug!("deallocated {} instance", self.host_types.name(ty));
            }
            ObjectBody::Tuple(items) | ObjectBody::List(items) => {
                pending.extend(items.iter().filter_map(Dynamic::as_handle));
            }
            ObjectBody::Capsule(_) => {}
        }
        pending.extend(patients.iter().filter_map(Dynamic::as_handle));
    }

    /// Deregister a slot and drop its holder.
    ///
    /// # Panics
    ///
    /// Panics if the slot claims a registry entry that does not exist.
    fn release_slot(&mut self, handle: ObjectHandle, slot: ValueSlot) {
        if let Some(address) = slot.address
            && !self.instances.deregister(address, slot.info, handle)
        {
            panic!("Tried to deallocate unregistered instance!");
        }
        drop(slot.holder);
    }

    pub fn ref_count(&self, value: &Dynamic) -> Option<u32> {
        self.heap.ref_count(value.as_handle()?)
    }

    pub fn is_alive(&self, value: &Dynamic) -> bool {
        value
            .as_handle()
            .is_some_and(|handle| self.heap.is_alive(handle))
    }

    // ========================================================================
    // Host values
    // ========================================================================

    /// A new tuple. Takes over one reference to each item.
    pub fn new_tuple(&mut self, items: Vec<Dynamic>) -> Dynamic {
        let handle = self
            .heap
            .allocate(HeapObject::new(HostTypeId::TUPLE, ObjectBody::Tuple(items)));
        Dynamic::Object(handle)
    }

    /// A new list. Takes over one reference to each item.
    pub fn new_list(&mut self, items: Vec<Dynamic>) -> Dynamic {
        let handle = self
            .heap
            .allocate(HeapObject::new(HostTypeId::LIST, ObjectBody::List(items)));
        Dynamic::Object(handle)
    }

    pub fn new_capsule(&mut self, capsule: Capsule) -> Dynamic {
        let handle = self
            .heap
            .allocate(HeapObject::new(HostTypeId::CAPSULE, ObjectBody::Capsule(capsule)));
        Dynamic::Object(handle)
    }

    /// Host type of any value. `None` for a stale handle.
    pub fn type_of(&self, value: &Dynamic) -> Option<HostTypeId> {
        match value {
            Dynamic::None => Some(HostTypeId::NONE),
            Dynamic::Bool(_) => Some(HostTypeId::BOOL),
            Dynamic::Int(_) => Some(HostTypeId::INT),
            Dynamic::Float(_) => Some(HostTypeId::FLOAT),
            Dynamic::Str(_) => Some(HostTypeId::STR),
            Dynamic::Object(handle) => self.heap.get(*handle).map(|object| object.ty),
        }
    }

    pub fn type_name(&self, value: &Dynamic) -> String {
        match self.type_of(value) {
            Some(ty) => self.host_types.name(ty).to_string(),
            None => "<freed>".to_string(),
        }
    }

    pub fn isinstance(&self, value: &Dynamic, ty: HostTypeId) -> bool {
        self.type_of(value)
            .is_some_and(|actual| self.host_types.is_subtype(actual, ty))
    }

    /// Elements of a tuple or list, borrowed.
    pub fn sequence_items(&self, value: &Dynamic) -> Option<Vec<Dynamic>> {
        let handle = value.as_handle()?;
        self.heap.get(handle)?.items().map(<[Dynamic]>::to_vec)
    }

    pub fn capsule(&self, value: &Dynamic) -> Option<&Capsule> {
        self.heap.get(value.as_handle()?)?.as_capsule()
    }

    pub fn instance(&self, value: &Dynamic) -> Option<&Instance> {
        self.heap.get(value.as_handle()?)?.as_instance()
    }

    /// Run `f` on the first native `T` held by an instance.
    pub fn with_native<T: Any, R>(&self, value: &Dynamic, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.instance(value)?.with_native(f)
    }

    // ========================================================================
    // Host types
    // ========================================================================

    /// A dynamic-side subclass of existing host types.
    pub fn create_subclass(
        &mut self,
        name: impl Into<String>,
        bases: &[HostTypeId],
    ) -> Result<HostTypeId, RegistrationError> {
        let name = name.into();
        let ty = self
            .host_types
            .create(name.as_str(), bases, None, NumberProtocol::default())?;
        debug!("created host subclass {name} ({ty})");
        Ok(ty)
    }

    /// Set a type attribute. Takes over the value's reference and releases
    /// the one held by any previous value.
    pub fn set_type_attr(&mut self, ty: HostTypeId, key: &str, value: Dynamic) {
        if let Some(previous) = self.host_types.set_attr(ty, key, value) {
            self.dec_ref(&previous);
        }
    }

    pub fn type_attr(&self, ty: HostTypeId, key: &str) -> Option<&Dynamic> {
        self.host_types.attr(ty, key)
    }

    /// Allocate an unconstructed instance of a wrapper host type.
    pub fn instantiate(&mut self, ty: HostTypeId) -> Result<Dynamic, CastError> {
        let infos = self.host_types.type_infos(ty).to_vec();
        if infos.is_empty() {
            return Err(CastError::Unregistered {
                type_name: self.host_types.name(ty).to_string(),
            });
        }
        let handle = self
            .heap
            .allocate(HeapObject::new(ty, ObjectBody::Instance(Instance::new(&infos))));
        trace!("instantiated {}", self.host_types.name(ty));
        Ok(Dynamic::Object(handle))
    }

    // ========================================================================
    // Instance slots
    // ========================================================================

    /// Install a holder in an instance slot and register its address.
    pub(crate) fn install_holder(
        &mut self,
        handle: ObjectHandle,
        info: TypeInfoId,
        holder: Holder,
    ) -> Result<(), CastError> {
        let address = holder.view().address();
        let owning = holder.is_owning();
        let instance = self
            .heap
            .get_mut(handle)
            .and_then(HeapObject::as_instance_mut)
            .ok_or(CastError::StaleHandle { index: handle.index })?;
        let slot = instance.slot_mut(info).ok_or_else(|| CastError::Unregistered {
            type_name: info.to_string(),
        })?;
        slot.holder = Some(holder);
        slot.address = address;
        if owning {
            instance.flags |= InstanceFlags::OWNED;
        }
        if let Some(address) = address {
            self.instances.register(address, info, handle);
        }
        Ok(())
    }

    /// Remove a slot's holder, leaving it unconstructed.
    pub(crate) fn take_slot(&mut self, handle: ObjectHandle, info: TypeInfoId) -> Option<Holder> {
        let instance = self.heap.get_mut(handle)?.as_instance_mut()?;
        let (holder, address) = instance.take_holder(info);
        if let Some(address) = address {
            self.instances.deregister(address, info, handle);
        }
        holder
    }

    // ========================================================================
    // Lifetimes
    // ========================================================================

    /// Keep `patient` alive at least as long as `nurse`.
    pub fn keep_alive(&mut self, nurse: &Dynamic, patient: &Dynamic) -> Result<(), CastError> {
        if nurse.is_none() || patient.is_none() {
            return Ok(());
        }
        let Some(nurse_handle) = nurse.as_handle() else {
            return Err(CastError::KeepAlive {
                reason: format!("{} values cannot hold references", nurse.type_name()),
            });
        };
        let Some(patient_handle) = patient.as_handle() else {
            return Ok(());
        };
        if !self.heap.is_alive(patient_handle) {
            return Err(CastError::StaleHandle {
                index: patient_handle.index,
            });
        }
        let object = self.heap.get_mut(nurse_handle).ok_or(CastError::StaleHandle {
            index: nurse_handle.index,
        })?;
        object.patients.push(patient.clone());
        self.heap.add_ref(patient_handle);
        trace!("{nurse:?} keeps {patient:?} alive");
        Ok(())
    }

    pub fn push_life_support(&mut self) {
        self.life_support.push_frame();
    }

    /// Pop the innermost frame and release its patients.
    ///
    /// # Panics
    ///
    /// Panics if no frame is active.
    pub fn pop_life_support(&mut self) {
        for patient in self.life_support.pop_frame() {
            self.dec_ref(&patient);
        }
    }

    /// Keep `patient` alive until the innermost frame pops.
    pub fn add_patient(&mut self, patient: &Dynamic) -> Result<(), CastError> {
        if patient.as_handle().is_none() {
            return Ok(());
        }
        if self.life_support.add_patient(patient.clone())? {
            self.inc_ref(patient);
        }
        Ok(())
    }

    /// Run `f` inside its own life-support frame.
    pub fn with_life_support<R>(&mut self, f: impl FnOnce(&mut Runtime) -> R) -> R {
        self.push_life_support();
        let result = f(self);
        self.pop_life_support();
        result
    }

    // ========================================================================
    // Modules
    // ========================================================================

    pub fn create_module(&mut self, name: impl Into<String>) -> ModuleId {
        self.registry.create_module(name)
    }

    pub fn active_module(&self) -> Option<ModuleId> {
        self.active_module
    }

    /// Switch the module whose local types are visible, returning the previous one.
    pub fn set_active_module(&mut self, module: Option<ModuleId>) -> Option<ModuleId> {
        std::mem::replace(&mut self.active_module, module)
    }

    /// Run `f` with `module` active.
    pub fn with_module<R>(&mut self, module: ModuleId, f: impl FnOnce(&mut Runtime) -> R) -> R {
        let previous = self.set_active_module(Some(module));
        let result = f(self);
        self.set_active_module(previous);
        result
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a native type, creating its descriptor and host type.
    pub fn register_type<T: Any>(&mut self, spec: TypeSpec<T>) -> Result<TypeInfoId, RegistrationError> {
        let native = TypeHash::of::<T>();
        if self.registry.is_registered_in(native, spec.module)? {
            return Err(RegistrationError::DuplicateType { name: spec.name });
        }

        let mut base_infos = Vec::with_capacity(spec.bases.len());
        for base in &spec.bases {
            let info = self
                .registry
                .lookup(base.native, spec.module)
                .ok_or_else(|| RegistrationError::UnknownType(base.name.to_string()))?;
            self.registry.check_upcast(native, base.native)?;
            base_infos.push(info);
        }

        let id = self.registry.next_id();
        let host_bases: Vec<HostTypeId> = if base_infos.is_empty() {
            vec![HostTypeId::OBJECT]
        } else {
            base_infos
                .iter()
                .map(|info| self.registry.info(*info).host_type)
                .collect()
        };
        let host_type = self
            .host_types
            .create(spec.name.as_str(), &host_bases, Some(id), spec.number.clone())?;

        let mut flags = spec.flags;
        match base_infos.as_slice() {
            [] => flags |= TypeFlags::SIMPLE_TYPE,
            [base] if self.registry.info(*base).is_simple() => flags |= TypeFlags::SIMPLE_TYPE,
            [_] => {}
            bases => {
                for base in bases {
                    self.registry.mark_nonsimple(*base);
                }
            }
        }

        for base in &spec.bases {
            self.registry.add_upcast(native, base.native, base.upcast.clone())?;
        }
        if let Some(alias) = &spec.alias {
            self.registry.remember_name(alias.native, alias.name);
        }

        let info = TypeInfo {
            id,
            native,
            type_id: std::any::TypeId::of::<T>(),
            native_name: std::any::type_name::<T>(),
            name: spec.name,
            host_type,
            size: TypeSpec::<T>::size(),
            flags,
            module: spec.module,
            bases: spec.bases,
            copy: spec.copy,
            make_cell: TypeSpec::<T>::make_cell(),
            alias: spec.alias,
        };
        debug!(
            "registered {} as {} ({id}, {} bases)",
            info.native_name,
            info.name,
            info.bases.len()
        );
        let module = info.module;
        self.registry.insert(info);

        if let Some(module) = module {
            let loader = self.new_capsule(
                Capsule::new(LocalLoader { module, info: id, native }).named(LOCAL_LOADER_KEY),
            );
            self.set_type_attr(host_type, LOCAL_LOADER_KEY, loader);
        }
        Ok(id)
    }

    /// Descriptor of `T` as seen from the active module.
    pub fn lookup<T: Any>(&self) -> Option<TypeInfoId> {
        self.registry.lookup(TypeHash::of::<T>(), self.active_module)
    }

    /// Host type wrapping `T` as seen from the active module.
    pub fn host_type_of<T: Any>(&self) -> Option<HostTypeId> {
        self.lookup::<T>()
            .map(|info| self.registry.info(info).host_type)
    }

    pub fn type_info(&self, id: TypeInfoId) -> &TypeInfo {
        self.registry.info(id)
    }

    /// Wrapper descriptors backing `ty`, nearest first along each base chain.
    pub fn all_type_info(&self, ty: HostTypeId) -> &[TypeInfoId] {
        self.host_types.type_infos(ty)
    }

    pub(crate) fn enter_conversion(&mut self) -> bool {
        if self.conversion_depth >= self.config.max_conversion_depth {
            trace!("conversion depth limit {} reached", self.config.max_conversion_depth);
            return false;
        }
        self.conversion_depth += 1;
        true
    }

    pub(crate) fn leave_conversion(&mut self) {
        self.conversion_depth = self.conversion_depth.saturating_sub(1);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}
