//! Native storage shared between instances and native code.
//!
//! Native values live in reference-counted cells. Instances and native code
//! reach them through [`NativeView`]s: an anchor on a cell plus a path of
//! [`Projection`]s that step from the stored type into an embedded base. A
//! projection plays the role of a pointer adjustment, so a view of the `H2`
//! part of an `H4` aliases the `H4` storage rather than copying it.
//!
//! ```
//! use tether_core::{NativePtr, Projection};
//!
//! struct Inner { value: i32 }
//! struct Outer { inner: Inner }
//!
//! let outer = NativePtr::new(Outer { inner: Inner { value: 1 } });
//! let inner = outer.project(|o: &Outer| &o.inner, |o: &mut Outer| &mut o.inner);
//! inner.borrow_mut().unwrap().value = 5;
//! assert_eq!(outer.borrow().unwrap().inner.value, 5);
//! ```

use std::any::{Any, TypeId, type_name};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::marker::PhantomData;
use std::rc::{Rc, Weak};

use crate::error::AccessError;

/// Type-erased storage for one native value.
pub type NativeCell = Rc<RefCell<dyn Any>>;

/// Allocate a fresh cell holding `value`.
pub fn new_cell<T: Any>(value: T) -> NativeCell {
    Rc::new(RefCell::new(value))
}

type ProjectFn = dyn Fn(&dyn Any) -> Option<&dyn Any>;
type ProjectMutFn = dyn Fn(&mut dyn Any) -> Option<&mut dyn Any>;

fn projector<F>(f: F) -> F
where
    F: Fn(&dyn Any) -> Option<&dyn Any>,
{
    f
}

fn projector_mut<F>(f: F) -> F
where
    F: Fn(&mut dyn Any) -> Option<&mut dyn Any>,
{
    f
}

// ============================================================================
// Projection
// ============================================================================

/// A typed step from a native type into one of its embedded bases.
#[derive(Clone)]
pub struct Projection {
    from: TypeId,
    to: TypeId,
    from_name: &'static str,
    to_name: &'static str,
    get: Rc<ProjectFn>,
    get_mut: Rc<ProjectMutFn>,
}

impl Projection {
    /// Build a projection from a pair of field accessors.
    pub fn new<S: Any, B: Any>(get: fn(&S) -> &B, get_mut: fn(&mut S) -> &mut B) -> Self {
        Self {
            from: TypeId::of::<S>(),
            to: TypeId::of::<B>(),
            from_name: type_name::<S>(),
            to_name: type_name::<B>(),
            get: Rc::new(projector(move |value| {
                value.downcast_ref::<S>().map(|s| get(s) as &dyn Any)
            })),
            get_mut: Rc::new(projector_mut(move |value| {
                value.downcast_mut::<S>().map(|s| get_mut(s) as &mut dyn Any)
            })),
        }
    }

    /// The type this projection starts from.
    pub fn source_type(&self) -> TypeId {
        self.from
    }

    /// The type this projection lands on.
    pub fn target_type(&self) -> TypeId {
        self.to
    }
}

impl fmt::Debug for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Projection({} -> {})", self.from_name, self.to_name)
    }
}

fn project_ref<'a>(mut value: &'a dyn Any, path: &[Projection]) -> Result<&'a dyn Any, AccessError> {
    for step in path {
        value = (step.get)(value).ok_or(AccessError::TypeMismatch {
            expected: step.from_name,
        })?;
    }
    Ok(value)
}

fn project_mut<'a>(
    mut value: &'a mut dyn Any,
    path: &[Projection],
) -> Result<&'a mut dyn Any, AccessError> {
    for step in path {
        let next = (step.get_mut)(value).ok_or(AccessError::TypeMismatch {
            expected: step.from_name,
        })?;
        value = next;
    }
    Ok(value)
}

// ============================================================================
// NativeView
// ============================================================================

#[derive(Clone)]
enum Anchor {
    Strong(NativeCell),
    Weak(Weak<RefCell<dyn Any>>),
}

/// An anchor on native storage plus a projection path into it.
///
/// Strong views keep the storage alive; weak views observe it and report
/// [`AccessError::Dangling`] once it is gone.
#[derive(Clone)]
pub struct NativeView {
    anchor: Anchor,
    path: Vec<Projection>,
}

impl NativeView {
    /// A strong view of a whole cell.
    pub fn new(cell: NativeCell) -> Self {
        Self {
            anchor: Anchor::Strong(cell),
            path: Vec::new(),
        }
    }

    /// A strong view of a freshly allocated value.
    pub fn from_value<T: Any>(value: T) -> Self {
        Self::new(new_cell(value))
    }

    /// Whether this view keeps its storage alive.
    pub fn is_strong(&self) -> bool {
        matches!(self.anchor, Anchor::Strong(_))
    }

    /// Whether the storage still exists.
    pub fn is_alive(&self) -> bool {
        match &self.anchor {
            Anchor::Strong(_) => true,
            Anchor::Weak(weak) => weak.strong_count() > 0,
        }
    }

    /// A non-owning view of the same storage and path.
    pub fn downgrade(&self) -> NativeView {
        let anchor = match &self.anchor {
            Anchor::Strong(cell) => Anchor::Weak(Rc::downgrade(cell)),
            Anchor::Weak(weak) => Anchor::Weak(weak.clone()),
        };
        Self {
            anchor,
            path: self.path.clone(),
        }
    }

    /// An owning view of the same storage, if it still exists.
    pub fn upgrade(&self) -> Option<NativeView> {
        self.cell().map(|cell| Self {
            anchor: Anchor::Strong(cell),
            path: self.path.clone(),
        })
    }

    /// Extend the path by one projection.
    pub fn project(&self, step: &Projection) -> NativeView {
        let mut path = self.path.clone();
        path.push(step.clone());
        Self {
            anchor: self.anchor.clone(),
            path,
        }
    }

    /// Extend the path by several projections.
    pub fn project_all(&self, steps: &[Projection]) -> NativeView {
        let mut path = self.path.clone();
        path.extend_from_slice(steps);
        Self {
            anchor: self.anchor.clone(),
            path,
        }
    }

    /// The projection path from the anchored value.
    pub fn path(&self) -> &[Projection] {
        &self.path
    }

    /// The anchored cell, when this view is strong.
    pub fn strong_cell(&self) -> Option<&NativeCell> {
        match &self.anchor {
            Anchor::Strong(cell) => Some(cell),
            Anchor::Weak(_) => None,
        }
    }

    /// The anchored cell, upgrading a weak anchor.
    pub fn cell(&self) -> Option<NativeCell> {
        match &self.anchor {
            Anchor::Strong(cell) => Some(cell.clone()),
            Anchor::Weak(weak) => weak.upgrade(),
        }
    }

    /// Number of owners of the anchored storage.
    pub fn owner_count(&self) -> usize {
        match &self.anchor {
            Anchor::Strong(cell) => Rc::strong_count(cell),
            Anchor::Weak(weak) => weak.strong_count(),
        }
    }

    /// Whether two views share one anchor.
    pub fn same_storage(&self, other: &NativeView) -> bool {
        match (self.cell(), other.cell()) {
            (Some(a), Some(b)) => Rc::ptr_eq(&a, &b),
            _ => false,
        }
    }

    /// Run `f` on the projected value.
    pub fn with_value<R>(&self, f: impl FnOnce(&dyn Any) -> R) -> Result<R, AccessError> {
        let cell = self.cell().ok_or(AccessError::Dangling)?;
        let guard = cell
            .try_borrow()
            .map_err(|_| AccessError::AlreadyMutablyBorrowed)?;
        let value = project_ref(&*guard, &self.path)?;
        Ok(f(value))
    }

    /// Run `f` on the projected value mutably.
    pub fn with_value_mut<R>(&self, f: impl FnOnce(&mut dyn Any) -> R) -> Result<R, AccessError> {
        let cell = self.cell().ok_or(AccessError::Dangling)?;
        let mut guard = cell
            .try_borrow_mut()
            .map_err(|_| AccessError::AlreadyBorrowed)?;
        let value = project_mut(&mut *guard, &self.path)?;
        Ok(f(value))
    }

    /// Concrete type of the anchored value, ignoring the path.
    pub fn anchor_type(&self) -> Option<TypeId> {
        let cell = self.cell()?;
        let guard = cell.try_borrow().ok()?;
        Some(Any::type_id(&*guard))
    }

    /// Concrete type of the projected value.
    pub fn target_type(&self) -> Option<TypeId> {
        self.with_value(|value| value.type_id()).ok()
    }

    /// Whether the projected value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.with_value(|value| value.is::<T>()).unwrap_or(false)
    }

    /// Address of the projected value, the identity used by the instance registry.
    pub fn address(&self) -> Option<usize> {
        self.with_value(|value| value as *const dyn Any as *const () as usize)
            .ok()
    }
}

impl fmt::Debug for NativeView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeView")
            .field("strong", &self.is_strong())
            .field("alive", &self.is_alive())
            .field("path", &self.path)
            .finish()
    }
}

fn borrow_typed<T: Any>(view: &NativeView) -> Result<Ref<'_, T>, AccessError> {
    let cell = view.strong_cell().ok_or(AccessError::Dangling)?;
    let guard = cell
        .try_borrow()
        .map_err(|_| AccessError::AlreadyMutablyBorrowed)?;
    Ref::filter_map(guard, |value| {
        project_ref(value, &view.path)
            .ok()
            .and_then(|v| v.downcast_ref::<T>())
    })
    .map_err(|_| AccessError::TypeMismatch {
        expected: type_name::<T>(),
    })
}

fn borrow_typed_mut<T: Any>(view: &NativeView) -> Result<RefMut<'_, T>, AccessError> {
    let cell = view.strong_cell().ok_or(AccessError::Dangling)?;
    let guard = cell
        .try_borrow_mut()
        .map_err(|_| AccessError::AlreadyBorrowed)?;
    RefMut::filter_map(guard, |value| {
        project_mut(value, &view.path)
            .ok()
            .and_then(|v| v.downcast_mut::<T>())
    })
    .map_err(|_| AccessError::TypeMismatch {
        expected: type_name::<T>(),
    })
}

// ============================================================================
// NativePtr
// ============================================================================

/// Typed pointer-like access to native storage.
///
/// This is what a native function receives for a registered type taken by
/// reference, and what it returns to hand the bridge a pointer.
pub struct NativePtr<T> {
    view: NativeView,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any> NativePtr<T> {
    /// Allocate `value` in fresh storage.
    pub fn new(value: T) -> Self {
        Self {
            view: NativeView::from_value(value),
            _marker: PhantomData,
        }
    }

    /// Type a view, upgrading it to a strong anchor.
    ///
    /// Returns `None` when the storage is gone or holds something else.
    pub fn from_view(view: &NativeView) -> Option<Self> {
        let view = view.upgrade()?;
        if !view.is::<T>() {
            return None;
        }
        Some(Self {
            view,
            _marker: PhantomData,
        })
    }

    pub fn view(&self) -> &NativeView {
        &self.view
    }

    pub fn into_view(self) -> NativeView {
        self.view
    }

    pub fn borrow(&self) -> Result<Ref<'_, T>, AccessError> {
        borrow_typed(&self.view)
    }

    pub fn borrow_mut(&self) -> Result<RefMut<'_, T>, AccessError> {
        borrow_typed_mut(&self.view)
    }

    /// A pointer to a field, sharing this pointer's storage.
    pub fn project<U: Any>(&self, get: fn(&T) -> &U, get_mut: fn(&mut T) -> &mut U) -> NativePtr<U> {
        NativePtr {
            view: self.view.project(&Projection::new(get, get_mut)),
            _marker: PhantomData,
        }
    }

    /// Whether both pointers address the same value.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self.view.address(), other.view.address()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Copy the pointed-to value out.
    pub fn cloned(&self) -> Result<T, AccessError>
    where
        T: Clone,
    {
        Ok(self.borrow()?.clone())
    }
}

impl<T> Clone for NativePtr<T> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for NativePtr<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NativePtr<{}>({:?})", type_name::<T>(), self.view)
    }
}

// ============================================================================
// Shared
// ============================================================================

/// Shared-ownership holder for a native value.
///
/// Like a reference-counted pointer with an aliasing constructor: the holder
/// may own an outer value while pointing at one of its bases.
pub struct Shared<T> {
    view: NativeView,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Any> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            view: NativeView::from_value(value),
            _marker: PhantomData,
        }
    }

    /// Type a view as a holder, upgrading it to a strong anchor.
    pub fn from_view(view: &NativeView) -> Option<Self> {
        NativePtr::<T>::from_view(view).map(|ptr| Self {
            view: ptr.into_view(),
            _marker: PhantomData,
        })
    }

    pub fn view(&self) -> &NativeView {
        &self.view
    }

    pub fn into_view(self) -> NativeView {
        self.view
    }

    pub fn borrow(&self) -> Result<Ref<'_, T>, AccessError> {
        borrow_typed(&self.view)
    }

    pub fn borrow_mut(&self) -> Result<RefMut<'_, T>, AccessError> {
        borrow_typed_mut(&self.view)
    }

    /// A holder for a field that shares ownership of the whole value.
    pub fn project<U: Any>(&self, get: fn(&T) -> &U, get_mut: fn(&mut T) -> &mut U) -> Shared<U> {
        Shared {
            view: self.view.project(&Projection::new(get, get_mut)),
            _marker: PhantomData,
        }
    }

    /// A typed pointer to the held value.
    pub fn as_ptr(&self) -> NativePtr<T> {
        NativePtr {
            view: self.view.clone(),
            _marker: PhantomData,
        }
    }

    /// Number of owners of the held storage.
    pub fn use_count(&self) -> usize {
        self.view.owner_count()
    }
}

impl<T: Any> From<Rc<RefCell<T>>> for Shared<T> {
    fn from(rc: Rc<RefCell<T>>) -> Self {
        let cell: NativeCell = rc;
        Self {
            view: NativeView::new(cell),
            _marker: PhantomData,
        }
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared<{}>({:?})", type_name::<T>(), self.view)
    }
}
