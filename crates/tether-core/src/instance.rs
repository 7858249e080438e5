//! Wrapper instance layout.
//!
//! An [`Instance`] carries one [`ValueSlot`] per wrapper descriptor backing
//! its host type. Each slot records the native storage it exposes and how
//! that storage is owned, as a [`Holder`].

use std::any::Any;

use bitflags::bitflags;

use crate::ids::TypeInfoId;
use crate::native::NativeView;
use crate::runtime::ObjectHandle;

/// How an instance slot owns its native value.
#[derive(Debug, Clone)]
pub enum Holder {
    /// Exclusively owned. The value is dropped with the instance.
    Unique(NativeView),
    /// Owned together with native code through a [`Shared`](crate::Shared) holder.
    Shared(NativeView),
    /// Borrowed from storage that `parent` keeps alive.
    Linked {
        /// Weak view of the borrowed value.
        view: NativeView,
        /// The object whose lifetime covers the value.
        parent: ObjectHandle,
    },
    /// Borrowed without any lifetime link.
    Borrowed(NativeView),
}

/// The variant of a [`Holder`], without its payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HolderKind {
    Unique,
    Shared,
    Linked,
    Borrowed,
}

impl Holder {
    pub fn kind(&self) -> HolderKind {
        match self {
            Holder::Unique(_) => HolderKind::Unique,
            Holder::Shared(_) => HolderKind::Shared,
            Holder::Linked { .. } => HolderKind::Linked,
            Holder::Borrowed(_) => HolderKind::Borrowed,
        }
    }

    /// The stored view, strong or weak.
    pub fn view(&self) -> &NativeView {
        match self {
            Holder::Unique(view) | Holder::Shared(view) | Holder::Borrowed(view) => view,
            Holder::Linked { view, .. } => view,
        }
    }

    /// Whether the instance owns the value through this holder.
    pub fn is_owning(&self) -> bool {
        matches!(self, Holder::Unique(_) | Holder::Shared(_))
    }

    /// A strong view of the value, if it still exists.
    pub fn access(&self) -> Option<NativeView> {
        self.view().upgrade()
    }
}

/// Native storage for one wrapper descriptor within an instance.
#[derive(Debug, Clone)]
pub struct ValueSlot {
    /// The descriptor this slot belongs to.
    pub info: TypeInfoId,
    /// The constructed holder, if any.
    pub holder: Option<Holder>,
    /// The address this slot is registered under in the instance registry.
    pub address: Option<usize>,
}

impl ValueSlot {
    pub fn new(info: TypeInfoId) -> Self {
        Self {
            info,
            holder: None,
            address: None,
        }
    }

    pub fn is_constructed(&self) -> bool {
        self.holder.is_some()
    }

    /// A strong view of the slot's value.
    pub fn view(&self) -> Option<NativeView> {
        self.holder.as_ref().and_then(Holder::access)
    }
}

bitflags! {
    /// Instance-wide state.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InstanceFlags: u8 {
        /// The instance owns (and will destroy) its native values.
        const OWNED = 1 << 0;
        /// A single slot; the host type is backed by exactly one descriptor.
        const SIMPLE_LAYOUT = 1 << 1;
    }
}

/// The run-time object holding native data.
#[derive(Debug, Clone)]
pub struct Instance {
    pub slots: Vec<ValueSlot>,
    pub flags: InstanceFlags,
}

impl Instance {
    /// An unconstructed instance with one slot per descriptor.
    pub fn new(infos: &[TypeInfoId]) -> Self {
        let mut flags = InstanceFlags::empty();
        if infos.len() == 1 {
            flags |= InstanceFlags::SIMPLE_LAYOUT;
        }
        Self {
            slots: infos.iter().copied().map(ValueSlot::new).collect(),
            flags,
        }
    }

    pub fn slot(&self, info: TypeInfoId) -> Option<&ValueSlot> {
        self.slots.iter().find(|slot| slot.info == info)
    }

    pub fn slot_mut(&mut self, info: TypeInfoId) -> Option<&mut ValueSlot> {
        self.slots.iter_mut().find(|slot| slot.info == info)
    }

    pub fn is_owned(&self) -> bool {
        self.flags.contains(InstanceFlags::OWNED)
    }

    /// Empty the `info` slot, returning its holder and registered address.
    ///
    /// The instance stays owned only while another slot still owns its value.
    pub fn take_holder(&mut self, info: TypeInfoId) -> (Option<Holder>, Option<usize>) {
        let Some(slot) = self.slot_mut(info) else {
            return (None, None);
        };
        let taken = (slot.holder.take(), slot.address.take());
        let owning = self
            .slots
            .iter()
            .filter_map(|slot| slot.holder.as_ref())
            .any(Holder::is_owning);
        self.flags.set(InstanceFlags::OWNED, owning);
        taken
    }

    pub fn has_simple_layout(&self) -> bool {
        self.flags.contains(InstanceFlags::SIMPLE_LAYOUT)
    }

    /// Whether every slot has a constructed holder.
    pub fn is_fully_constructed(&self) -> bool {
        self.slots.iter().all(ValueSlot::is_constructed)
    }

    /// Run `f` on the first slot value of type `T`.
    pub fn with_native<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let view = self
            .slots
            .iter()
            .filter_map(ValueSlot::view)
            .find(|view| view.is::<T>())?;
        view.with_value(|value| value.downcast_ref::<T>().map(f))
            .ok()
            .flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_flags() {
        let single = Instance::new(&[TypeInfoId::new(0)]);
        assert!(single.has_simple_layout());
        assert!(!single.is_owned());

        let multi = Instance::new(&[TypeInfoId::new(0), TypeInfoId::new(1)]);
        assert!(!multi.has_simple_layout());
        assert_eq!(multi.slots.len(), 2);
    }

    #[test]
    fn construction_state() {
        let mut instance = Instance::new(&[TypeInfoId::new(3), TypeInfoId::new(4)]);
        assert!(!instance.is_fully_constructed());

        let view = NativeView::from_value(7u32);
        instance.slot_mut(TypeInfoId::new(3)).unwrap().holder = Some(Holder::Unique(view));
        assert!(instance.slot(TypeInfoId::new(3)).unwrap().is_constructed());
        assert!(!instance.is_fully_constructed());
        assert_eq!(instance.with_native(|v: &u32| *v + 1), Some(8));
        assert_eq!(instance.with_native(|v: &i64| *v), None);
    }

    #[test]
    fn taking_the_last_owning_holder_clears_ownership() {
        let (first, second) = (TypeInfoId::new(0), TypeInfoId::new(1));
        let mut instance = Instance::new(&[first, second]);
        instance.slot_mut(first).unwrap().holder = Some(Holder::Unique(NativeView::from_value(1u8)));
        instance.slot_mut(second).unwrap().holder = Some(Holder::Shared(NativeView::from_value(2u8)));
        instance.slot_mut(second).unwrap().address = Some(0x10);
        instance.flags |= InstanceFlags::OWNED;

        let (holder, address) = instance.take_holder(second);
        assert_eq!(holder.map(|h| h.kind()), Some(HolderKind::Shared));
        assert_eq!(address, Some(0x10));
        assert!(instance.is_owned());

        instance.take_holder(first);
        assert!(!instance.is_owned());
        assert_eq!(instance.take_holder(first).0.map(|h| h.kind()), None);
    }

    #[test]
    fn borrowed_holder_observes_storage() {
        let strong = NativeView::from_value(String::from("kept"));
        let holder = Holder::Borrowed(strong.downgrade());
        assert_eq!(holder.kind(), HolderKind::Borrowed);
        assert!(!holder.is_owning());
        assert!(holder.access().is_some());

        drop(strong);
        assert!(holder.access().is_none());
    }
}
