//! Wrapper type descriptors and the builder used to register them.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::marker::PhantomData;
use std::mem::size_of;
use std::rc::Rc;

use bitflags::bitflags;
use tether_core::{
    HeapObject, HolderKind, HostTypeId, ModuleId, NativeCell, NativeView, NumberProtocol,
    Projection, TypeHash, TypeInfoId, new_cell,
};

bitflags! {
    /// Descriptor properties fixed at registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TypeFlags: u8 {
        /// At most one native base, itself simple. Loads may take the single-slot fast path.
        const SIMPLE_TYPE = 1 << 0;
        /// Registered in a module scope rather than globally.
        const MODULE_LOCAL = 1 << 1;
        /// Has a copy function.
        const COPYABLE = 1 << 2;
        /// Has an alias type for dynamic-side subclasses.
        const HAS_ALIAS = 1 << 3;
        /// Instances default to a shared holder.
        const SHARED_HOLDER = 1 << 4;
    }
}

/// Copies the native value behind a reference.
pub type CopyFn = fn(&dyn Any) -> Option<Box<dyn Any>>;
/// Moves a boxed value of the right type into fresh storage.
pub type MakeCellFn = fn(Box<dyn Any>) -> Result<NativeCell, Box<dyn Any>>;
/// Builds an alias value from a boxed native value.
pub type AliasFromFn = Rc<dyn Fn(Box<dyn Any>) -> Option<NativeCell>>;

fn make_cell<T: Any>(value: Box<dyn Any>) -> Result<NativeCell, Box<dyn Any>> {
    value.downcast::<T>().map(|value| new_cell(*value))
}

fn copy_value<T: Any + Clone>(value: &dyn Any) -> Option<Box<dyn Any>> {
    value
        .downcast_ref::<T>()
        .map(|value| Box::new(value.clone()) as Box<dyn Any>)
}

/// A declared native base of a wrapper type.
#[derive(Debug, Clone)]
pub struct NativeBase {
    pub native: TypeHash,
    pub name: &'static str,
    pub upcast: Projection,
}

/// The dynamic-side subclass representation of a native type.
#[derive(Clone)]
pub struct AliasInfo {
    pub native: TypeHash,
    pub type_id: TypeId,
    pub name: &'static str,
    /// Projection from the alias to the native type it stands in for.
    pub upcast: Projection,
    pub make_cell: MakeCellFn,
    /// Alias-from-class construction, when the alias supports it.
    pub from_class: Option<AliasFromFn>,
}

impl AliasInfo {
    /// A view of the native type inside alias storage.
    pub fn view(&self, cell: NativeCell) -> NativeView {
        NativeView::new(cell).project(&self.upcast)
    }

    /// Build alias storage from a native value.
    pub fn from_value(&self, value: Box<dyn Any>) -> Option<NativeView> {
        let from_class = self.from_class.as_ref()?;
        from_class(value).map(|cell| self.view(cell))
    }
}

impl fmt::Debug for AliasInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AliasInfo")
            .field("name", &self.name)
            .field("from_class", &self.from_class.is_some())
            .finish()
    }
}

/// Descriptor of a wrapper type: a native type exposed as a host type.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub id: TypeInfoId,
    pub native: TypeHash,
    pub type_id: TypeId,
    pub native_name: &'static str,
    pub name: String,
    pub host_type: HostTypeId,
    pub size: usize,
    pub flags: TypeFlags,
    pub module: Option<ModuleId>,
    pub bases: Vec<NativeBase>,
    pub copy: Option<CopyFn>,
    pub make_cell: MakeCellFn,
    pub alias: Option<AliasInfo>,
}

impl TypeInfo {
    pub fn is_simple(&self) -> bool {
        self.flags.contains(TypeFlags::SIMPLE_TYPE)
    }

    pub fn is_module_local(&self) -> bool {
        self.flags.contains(TypeFlags::MODULE_LOCAL)
    }

    pub fn is_copyable(&self) -> bool {
        self.flags.contains(TypeFlags::COPYABLE)
    }

    /// Holder kind given to instances that own their value.
    pub fn default_holder(&self) -> HolderKind {
        if self.flags.contains(TypeFlags::SHARED_HOLDER) {
            HolderKind::Shared
        } else {
            HolderKind::Unique
        }
    }

    /// Copy the value behind `view`.
    pub fn copy_value(&self, view: &NativeView) -> Option<Box<dyn Any>> {
        let copy = self.copy?;
        view.with_value(copy).ok().flatten()
    }

    /// Copy the value behind `view` into fresh storage.
    pub fn copy_view(&self, view: &NativeView) -> Option<NativeCell> {
        (self.make_cell)(self.copy_value(view)?).ok()
    }
}

/// Everything needed to register a native type.
///
/// ```
/// use tether::{Runtime, TypeSpec};
///
/// #[derive(Clone)]
/// struct Pet { name: String }
///
/// let mut rt = Runtime::new();
/// let info = rt
///     .register_type(TypeSpec::<Pet>::new("Pet").copyable())
///     .unwrap();
/// assert_eq!(rt.type_info(info).name, "Pet");
/// ```
pub struct TypeSpec<T> {
    pub(crate) name: String,
    pub(crate) bases: Vec<NativeBase>,
    pub(crate) copy: Option<CopyFn>,
    pub(crate) flags: TypeFlags,
    pub(crate) alias: Option<AliasInfo>,
    pub(crate) number: NumberProtocol,
    pub(crate) module: Option<ModuleId>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any> TypeSpec<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bases: Vec::new(),
            copy: None,
            flags: TypeFlags::empty(),
            alias: None,
            number: NumberProtocol::default(),
            module: None,
            _marker: PhantomData,
        }
    }

    /// Declare a registered native base embedded in `T`.
    pub fn base<B: Any>(mut self, get: fn(&T) -> &B, get_mut: fn(&mut T) -> &mut B) -> Self {
        self.bases.push(NativeBase {
            native: TypeHash::of::<B>(),
            name: type_name::<B>(),
            upcast: Projection::new(get, get_mut),
        });
        self
    }

    pub fn copyable(mut self) -> Self
    where
        T: Clone,
    {
        self.copy = Some(copy_value::<T>);
        self.flags |= TypeFlags::COPYABLE;
        self
    }

    /// Own instances through [`Shared`](tether_core::Shared) holders.
    pub fn shared_holder(mut self) -> Self {
        self.flags |= TypeFlags::SHARED_HOLDER;
        self
    }

    /// Use `A` for instances of dynamic-side subclasses.
    pub fn alias<A: Any>(mut self, get: fn(&A) -> &T, get_mut: fn(&mut A) -> &mut T) -> Self {
        self.alias = Some(AliasInfo {
            native: TypeHash::of::<A>(),
            type_id: TypeId::of::<A>(),
            name: type_name::<A>(),
            upcast: Projection::new(get, get_mut),
            make_cell: make_cell::<A>,
            from_class: None,
        });
        self.flags |= TypeFlags::HAS_ALIAS;
        self
    }

    /// Like [`alias`](Self::alias), with a conversion building the alias from `T`.
    pub fn alias_from_class<A: Any>(
        self,
        get: fn(&A) -> &T,
        get_mut: fn(&mut A) -> &mut T,
        from: fn(T) -> A,
    ) -> Self {
        let mut spec = self.alias(get, get_mut);
        if let Some(alias) = spec.alias.as_mut() {
            alias.from_class = Some(Rc::new(move |value: Box<dyn Any>| {
                value.downcast::<T>().ok().map(|value| new_cell(from(*value)))
            }));
        }
        spec
    }

    pub fn int_protocol(mut self, f: fn(&T) -> i128) -> Self {
        self.number.int = Some(Rc::new(move |object: &HeapObject| {
            object.as_instance()?.with_native(f)
        }));
        self
    }

    pub fn float_protocol(mut self, f: fn(&T) -> f64) -> Self {
        self.number.float = Some(Rc::new(move |object: &HeapObject| {
            object.as_instance()?.with_native(f)
        }));
        self
    }

    pub fn truth_protocol(mut self, f: fn(&T) -> bool) -> Self {
        self.number.truth = Some(Rc::new(move |object: &HeapObject| {
            object.as_instance()?.with_native(f)
        }));
        self
    }

    /// Register in `module`'s scope only.
    pub fn module_local(mut self, module: ModuleId) -> Self {
        self.module = Some(module);
        self.flags |= TypeFlags::MODULE_LOCAL;
        self
    }

    pub(crate) fn size() -> usize {
        size_of::<T>()
    }

    pub(crate) fn make_cell() -> MakeCellFn {
        make_cell::<T>
    }
}
