//! Live instances keyed by the address of the native value they expose.

use rustc_hash::FxHashMap;
use tether_core::{ObjectHandle, TypeInfoId};

/// Maps native addresses to the instances wrapping them.
///
/// One address may be wrapped by several instances: a value and its first
/// embedded base share an address but belong to different descriptors.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    entries: FxHashMap<usize, Vec<(TypeInfoId, ObjectHandle)>>,
}

impl InstanceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, address: usize, info: TypeInfoId, handle: ObjectHandle) {
        self.entries.entry(address).or_default().push((info, handle));
    }

    /// Remove one entry. Returns `false` if it was not registered.
    pub fn deregister(&mut self, address: usize, info: TypeInfoId, handle: ObjectHandle) -> bool {
        let Some(entries) = self.entries.get_mut(&address) else {
            return false;
        };
        let Some(pos) = entries.iter().position(|entry| *entry == (info, handle)) else {
            return false;
        };
        entries.swap_remove(pos);
        if entries.is_empty() {
            self.entries.remove(&address);
        }
        true
    }

    /// The instance wrapping `address` as `info`, if any.
    pub fn find(&self, address: usize, info: TypeInfoId) -> Option<ObjectHandle> {
        self.entries
            .get(&address)?
            .iter()
            .find(|(entry_info, _)| *entry_info == info)
            .map(|(_, handle)| *handle)
    }

    pub fn at(&self, address: usize) -> &[(TypeInfoId, ObjectHandle)] {
        self.entries.get(&address).map_or(&[], Vec::as_slice)
    }

    /// Total number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_find_deregister() {
        let mut registry = InstanceRegistry::new();
        let info = TypeInfoId::new(0);
        let handle = ObjectHandle::new(4, 1);

        registry.register(0x1000, info, handle);
        assert_eq!(registry.find(0x1000, info), Some(handle));
        assert_eq!(registry.find(0x1000, TypeInfoId::new(1)), None);

        assert!(registry.deregister(0x1000, info, handle));
        assert!(!registry.deregister(0x1000, info, handle));
        assert!(registry.is_empty());
    }

    #[test]
    fn shared_addresses() {
        let mut registry = InstanceRegistry::new();
        registry.register(0x20, TypeInfoId::new(0), ObjectHandle::new(0, 0));
        registry.register(0x20, TypeInfoId::new(1), ObjectHandle::new(1, 0));

        assert_eq!(registry.at(0x20).len(), 2);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.find(0x20, TypeInfoId::new(1)), Some(ObjectHandle::new(1, 0)));
    }
}
