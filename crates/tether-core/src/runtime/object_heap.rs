//! Generational arena for reference-counted host objects.

use std::any::Any;
use std::fmt;

use crate::ids::HostTypeId;
use crate::instance::Instance;
use crate::native::{NativeCell, NativeView};

use super::Dynamic;

/// Handle to a heap-allocated host object.
///
/// This is a safe, copyable reference to an object in the `ObjectHeap`.
/// The generational index prevents use-after-free bugs and doubles as the
/// host runtime's weak reference: a handle to a freed object never resolves.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObjectHandle {
    /// Index into ObjectHeap.slots
    pub index: u32,
    /// Generation for use-after-free detection
    pub generation: u32,
}

impl ObjectHandle {
    /// Create a new object handle.
    pub fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }
}

/// An opaque native payload carried as a host value.
#[derive(Clone, Default)]
pub struct Capsule {
    view: Option<NativeView>,
    name: Option<String>,
}

impl Capsule {
    /// Wrap `value` in a fresh capsule.
    pub fn new<T: Any>(value: T) -> Self {
        Self::from_view(NativeView::from_value(value))
    }

    /// Wrap existing native storage.
    pub fn from_cell(cell: NativeCell) -> Self {
        Self::from_view(NativeView::new(cell))
    }

    /// Wrap a view, keeping its projection path.
    pub fn from_view(view: NativeView) -> Self {
        Self {
            view: Some(view),
            name: None,
        }
    }

    /// A capsule carrying a null payload.
    pub fn null() -> Self {
        Self::default()
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_null(&self) -> bool {
        self.view.is_none()
    }

    /// A view of the payload.
    pub fn view(&self) -> Option<NativeView> {
        self.view.clone()
    }
}

impl fmt::Debug for Capsule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capsule")
            .field("name", &self.name)
            .field("null", &self.is_null())
            .finish()
    }
}

/// What a heap object holds.
#[derive(Debug)]
pub enum ObjectBody {
    /// A wrapper instance backed by native storage.
    Instance(Instance),
    /// An immutable sequence. Owns a reference to each element.
    Tuple(Vec<Dynamic>),
    /// A mutable sequence. Owns a reference to each element.
    List(Vec<Dynamic>),
    /// An opaque native payload.
    Capsule(Capsule),
}

/// A host object stored on the heap.
#[derive(Debug)]
pub struct HeapObject {
    /// The object's host type.
    pub ty: HostTypeId,
    /// The object's contents.
    pub body: ObjectBody,
    /// Objects kept alive for as long as this one lives. Each entry owns a reference.
    pub patients: Vec<Dynamic>,
}

impl HeapObject {
    pub fn new(ty: HostTypeId, body: ObjectBody) -> Self {
        Self {
            ty,
            body,
            patients: Vec::new(),
        }
    }

    pub fn as_instance(&self) -> Option<&Instance> {
        match &self.body {
            ObjectBody::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    pub fn as_instance_mut(&mut self) -> Option<&mut Instance> {
        match &mut self.body {
            ObjectBody::Instance(instance) => Some(instance),
            _ => None,
        }
    }

    /// Elements of a tuple or list.
    pub fn items(&self) -> Option<&[Dynamic]> {
        match &self.body {
            ObjectBody::Tuple(items) | ObjectBody::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_capsule(&self) -> Option<&Capsule> {
        match &self.body {
            ObjectBody::Capsule(capsule) => Some(capsule),
            _ => None,
        }
    }
}

/// Heap storage for host objects with generational indices.
///
/// Objects are stored in a Vec with generation tracking. When an object
/// is freed, its slot is reused but the generation is incremented. This
/// allows detecting stale handles at runtime.
///
/// The heap only counts references. Releasing the references a freed object
/// owns (its elements and patients) is left to the caller, which receives
/// the object back from [`release`](Self::release).
pub struct ObjectHeap {
    slots: Vec<HeapSlot>,
    free_list: Vec<u32>,
}

struct HeapSlot {
    generation: u32,
    value: Option<HeapObject>,
    ref_count: u32,
}

impl ObjectHeap {
    /// Create a new empty object heap.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_list: Vec::new(),
        }
    }

    /// Allocate a new object with a reference count of one.
    pub fn allocate(&mut self, object: HeapObject) -> ObjectHandle {
        if let Some(index) = self.free_list.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(object);
            slot.ref_count = 1;
            ObjectHandle::new(index, slot.generation)
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(HeapSlot {
                generation: 0,
                value: Some(object),
                ref_count: 1,
            });
            ObjectHandle::new(index, 0)
        }
    }

    /// Get immutable reference to an object.
    ///
    /// Returns None if the handle is stale.
    pub fn get(&self, handle: ObjectHandle) -> Option<&HeapObject> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    /// Get mutable reference to an object.
    ///
    /// Returns None if the handle is stale.
    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut HeapObject> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Increment reference count.
    pub fn add_ref(&mut self, handle: ObjectHandle) -> bool {
        if let Some(slot) = self.slots.get_mut(handle.index as usize)
            && slot.generation == handle.generation
            && slot.value.is_some()
        {
            slot.ref_count = slot.ref_count.saturating_add(1);
            return true;
        }
        false
    }

    /// Decrement reference count, free if zero.
    ///
    /// Returns the object if this release freed it.
    pub fn release(&mut self, handle: ObjectHandle) -> Option<HeapObject> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation || slot.value.is_none() {
            return None;
        }
        slot.ref_count = slot.ref_count.saturating_sub(1);
        if slot.ref_count > 0 {
            return None;
        }
        let object = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free_list.push(handle.index);
        object
    }

    /// Get the reference count for an object.
    pub fn ref_count(&self, handle: ObjectHandle) -> Option<u32> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation == handle.generation && slot.value.is_some() {
            Some(slot.ref_count)
        } else {
            None
        }
    }

    /// Whether the handle still refers to a live object.
    pub fn is_alive(&self, handle: ObjectHandle) -> bool {
        self.ref_count(handle).is_some()
    }

    /// Number of live objects.
    pub fn live_count(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }
}

impl Default for ObjectHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ObjectHeap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHeap")
            .field("slot_count", &self.slots.len())
            .field("free_count", &self.free_list.len())
            .finish()
    }
}
