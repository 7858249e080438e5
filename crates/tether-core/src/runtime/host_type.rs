//! Host type table.

use std::fmt;
use std::ops::Index;
use std::rc::Rc;

use rustc_hash::FxHashMap;

use crate::error::RegistrationError;
use crate::ids::{HostTypeId, TypeInfoId};

use super::{Dynamic, HeapObject};

/// Integer coercion hook.
pub type IntHook = Rc<dyn Fn(&HeapObject) -> Option<i128>>;
/// Float coercion hook.
pub type FloatHook = Rc<dyn Fn(&HeapObject) -> Option<f64>>;
/// Truthiness hook.
pub type TruthHook = Rc<dyn Fn(&HeapObject) -> Option<bool>>;

/// Numeric protocol hooks a host type may provide.
#[derive(Clone, Default)]
pub struct NumberProtocol {
    pub int: Option<IntHook>,
    pub float: Option<FloatHook>,
    pub truth: Option<TruthHook>,
}

impl fmt::Debug for NumberProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NumberProtocol")
            .field("int", &self.int.is_some())
            .field("float", &self.float.is_some())
            .field("truth", &self.truth.is_some())
            .finish()
    }
}

/// A host runtime type.
#[derive(Debug, Clone)]
pub struct HostType {
    pub id: HostTypeId,
    pub name: String,
    /// Direct bases in declaration order.
    pub bases: Vec<HostTypeId>,
    /// Resolution order, starting with the type itself.
    pub mro: Vec<HostTypeId>,
    /// The wrapper descriptor this type was created for, if any.
    pub native: Option<TypeInfoId>,
    /// Wrapper descriptors backing instances of this type.
    pub type_infos: Vec<TypeInfoId>,
    pub attrs: FxHashMap<String, Dynamic>,
    pub number: NumberProtocol,
}

/// All host types known to a runtime.
///
/// Built-in types occupy the reserved [`HostTypeId`] constants.
#[derive(Debug)]
pub struct HostTypes {
    types: Vec<HostType>,
}

impl HostTypes {
    pub fn new() -> Self {
        const BUILTINS: [(HostTypeId, &str, Option<HostTypeId>); HostTypeId::BUILTIN_COUNT as usize] = [
            (HostTypeId::OBJECT, "object", None),
            (HostTypeId::NONE, "NoneType", Some(HostTypeId::OBJECT)),
            (HostTypeId::BOOL, "bool", Some(HostTypeId::INT)),
            (HostTypeId::INT, "int", Some(HostTypeId::OBJECT)),
            (HostTypeId::FLOAT, "float", Some(HostTypeId::OBJECT)),
            (HostTypeId::STR, "str", Some(HostTypeId::OBJECT)),
            (HostTypeId::TUPLE, "tuple", Some(HostTypeId::OBJECT)),
            (HostTypeId::LIST, "list", Some(HostTypeId::OBJECT)),
            (HostTypeId::CAPSULE, "capsule", Some(HostTypeId::OBJECT)),
        ];

        let mut table = Self {
            types: BUILTINS
                .iter()
                .map(|(id, name, base)| HostType {
                    id: *id,
                    name: (*name).to_string(),
                    bases: base.iter().copied().collect(),
                    mro: Vec::new(),
                    native: None,
                    type_infos: Vec::new(),
                    attrs: FxHashMap::default(),
                    number: NumberProtocol::default(),
                })
                .collect(),
        };

        // Reserved ids are not in dependency order: `bool` precedes `int`.
        let mut pending: Vec<HostTypeId> = BUILTINS.iter().map(|(id, ..)| *id).collect();
        while !pending.is_empty() {
            pending.retain(|id| {
                let bases = table[*id].bases.clone();
                if bases.iter().any(|base| table[*base].mro.is_empty()) {
                    return true;
                }
                let mro = table.linearize(*id, &bases);
                table.types[id.index() as usize].mro = mro;
                false
            });
        }
        table
    }

    /// Create a host type.
    ///
    /// The resolution order is computed here: a left-to-right depth-first
    /// walk over the bases, keeping only the last occurrence of each type.
    /// Every base must already exist.
    pub fn create(
        &mut self,
        name: impl Into<String>,
        bases: &[HostTypeId],
        native: Option<TypeInfoId>,
        number: NumberProtocol,
    ) -> Result<HostTypeId, RegistrationError> {
        if let Some(unknown) = bases.iter().find(|base| self.get(**base).is_none()) {
            return Err(RegistrationError::UnknownType(unknown.to_string()));
        }

        let id = HostTypeId::new(self.types.len() as u32);
        let mro = self.linearize(id, bases);

        let type_infos = match native {
            Some(info) => vec![info],
            None => {
                let mut infos = Vec::new();
                for base in bases {
                    for info in &self[*base].type_infos {
                        if !infos.contains(info) {
                            infos.push(*info);
                        }
                    }
                }
                infos
            }
        };

        self.types.push(HostType {
            id,
            name: name.into(),
            bases: bases.to_vec(),
            mro,
            native,
            type_infos,
            attrs: FxHashMap::default(),
            number,
        });
        Ok(id)
    }

    fn linearize(&self, id: HostTypeId, bases: &[HostTypeId]) -> Vec<HostTypeId> {
        let mut walk = vec![id];
        for base in bases {
            walk.extend_from_slice(&self[*base].mro);
        }
        walk.iter()
            .enumerate()
            .filter(|(i, ty)| !walk[i + 1..].contains(*ty))
            .map(|(_, ty)| *ty)
            .collect()
    }

    pub fn get(&self, id: HostTypeId) -> Option<&HostType> {
        self.types.get(id.index() as usize)
    }

    pub fn get_mut(&mut self, id: HostTypeId) -> Option<&mut HostType> {
        self.types.get_mut(id.index() as usize)
    }

    pub fn name(&self, id: HostTypeId) -> &str {
        self.get(id).map_or("<unknown>", |ty| ty.name.as_str())
    }

    pub fn mro(&self, id: HostTypeId) -> &[HostTypeId] {
        self.get(id).map_or(&[], |ty| ty.mro.as_slice())
    }

    /// Whether `sub` is `sup` or inherits from it.
    pub fn is_subtype(&self, sub: HostTypeId, sup: HostTypeId) -> bool {
        self.mro(sub).contains(&sup)
    }

    /// Wrapper descriptors backing instances of `id`.
    pub fn type_infos(&self, id: HostTypeId) -> &[TypeInfoId] {
        self.get(id).map_or(&[], |ty| ty.type_infos.as_slice())
    }

    /// Look up an attribute along the resolution order.
    pub fn attr(&self, id: HostTypeId, key: &str) -> Option<&Dynamic> {
        self.mro(id)
            .iter()
            .filter_map(|ty| self.get(*ty))
            .find_map(|ty| ty.attrs.get(key))
    }

    /// Set an attribute on the type itself, returning the previous value.
    pub fn set_attr(&mut self, id: HostTypeId, key: impl Into<String>, value: Dynamic) -> Option<Dynamic> {
        self.get_mut(id)?.attrs.insert(key.into(), value)
    }

    pub fn int_hook(&self, id: HostTypeId) -> Option<IntHook> {
        self.mro(id)
            .iter()
            .filter_map(|ty| self.get(*ty))
            .find_map(|ty| ty.number.int.clone())
    }

    pub fn float_hook(&self, id: HostTypeId) -> Option<FloatHook> {
        self.mro(id)
            .iter()
            .filter_map(|ty| self.get(*ty))
            .find_map(|ty| ty.number.float.clone())
    }

    pub fn truth_hook(&self, id: HostTypeId) -> Option<TruthHook> {
        self.mro(id)
            .iter()
            .filter_map(|ty| self.get(*ty))
            .find_map(|ty| ty.number.truth.clone())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

impl Default for HostTypes {
    fn default() -> Self {
        Self::new()
    }
}

impl Index<HostTypeId> for HostTypes {
    type Output = HostType;

    fn index(&self, id: HostTypeId) -> &HostType {
        &self.types[id.index() as usize]
    }
}
