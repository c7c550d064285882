//! The tagged stack-item model and its container arena.
//!
//! Primitives are inline values; arrays, structs and maps live in an arena
//! owned by the engine and are referenced by 32-bit handles. Identity
//! semantics (`Array`, `Map`) compare handles; value semantics (`Struct`,
//! primitives) compare contents with a visited set to break cycles.

use crate::error::{VmError, VmResult};
use crate::interop::InteropHandle;
use num_bigint::BigInt;
use num_traits::{Signed, ToPrimitive, Zero};

/// A 32-bit index into the engine's container arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ItemHandle(pub u32);

/// One VM value.
#[derive(Debug, Clone, PartialEq)]
pub enum StackItem {
    ByteArray(Vec<u8>),
    Boolean(bool),
    Integer(BigInt),
    /// Opaque host-owned value; only the host can interpret the handle.
    Interop(InteropHandle),
    Array(ItemHandle),
    Struct(ItemHandle),
    Map(ItemHandle),
}

impl StackItem {
    /// Builds an integer item from a machine integer.
    pub fn int(value: i64) -> StackItem {
        StackItem::Integer(BigInt::from(value))
    }

    /// Whether this is a container variant.
    pub fn is_container(&self) -> bool {
        matches!(
            self,
            StackItem::Array(_) | StackItem::Struct(_) | StackItem::Map(_)
        )
    }

    /// Whether this may serve as a map key.
    pub fn is_valid_map_key(&self) -> bool {
        matches!(
            self,
            StackItem::ByteArray(_) | StackItem::Boolean(_) | StackItem::Integer(_)
        )
    }
}

/// Encodes an integer as minimal little-endian two's complement; zero is
/// the empty string.
pub fn int_to_bytes(value: &BigInt) -> Vec<u8> {
    if value.is_zero() {
        return Vec::new();
    }
    value.to_signed_bytes_le()
}

/// Decodes a little-endian two's complement integer; empty means zero.
pub fn bytes_to_int(data: &[u8]) -> BigInt {
    if data.is_empty() {
        return BigInt::zero();
    }
    BigInt::from_signed_bytes_le(data)
}

/// Contents of one arena slot.
#[derive(Debug, Clone)]
pub enum ContainerData {
    /// Backing store for both `Array` and `Struct`.
    List(Vec<StackItem>),
    /// Insertion-ordered key/value pairs.
    Map(Vec<(StackItem, StackItem)>),
}

/// The container arena. Slots are never freed during one execution; the
/// whole arena drops with the engine.
#[derive(Debug, Default)]
pub struct ItemArena {
    slots: Vec<ContainerData>,
}

impl ItemArena {
    /// Creates an empty arena.
    pub fn new() -> Self {
        ItemArena::default()
    }

    fn alloc(&mut self, data: ContainerData) -> ItemHandle {
        let handle = ItemHandle(self.slots.len() as u32);
        self.slots.push(data);
        handle
    }

    /// Allocates a list slot for an array or struct.
    pub fn alloc_list(&mut self, items: Vec<StackItem>) -> ItemHandle {
        self.alloc(ContainerData::List(items))
    }

    /// Allocates an empty map slot.
    pub fn alloc_map(&mut self) -> ItemHandle {
        self.alloc(ContainerData::Map(Vec::new()))
    }

    /// The list behind an array/struct handle.
    pub fn list(&self, handle: ItemHandle) -> VmResult<&Vec<StackItem>> {
        match self.slots.get(handle.0 as usize) {
            Some(ContainerData::List(items)) => Ok(items),
            _ => Err(VmError::TypeMismatch { expected: "array" }),
        }
    }

    /// Mutable access to the list behind an array/struct handle.
    pub fn list_mut(&mut self, handle: ItemHandle) -> VmResult<&mut Vec<StackItem>> {
        match self.slots.get_mut(handle.0 as usize) {
            Some(ContainerData::List(items)) => Ok(items),
            _ => Err(VmError::TypeMismatch { expected: "array" }),
        }
    }

    /// The pairs behind a map handle.
    pub fn map(&self, handle: ItemHandle) -> VmResult<&Vec<(StackItem, StackItem)>> {
        match self.slots.get(handle.0 as usize) {
            Some(ContainerData::Map(pairs)) => Ok(pairs),
            _ => Err(VmError::TypeMismatch { expected: "map" }),
        }
    }

    /// Mutable access to the pairs behind a map handle.
    pub fn map_mut(&mut self, handle: ItemHandle) -> VmResult<&mut Vec<(StackItem, StackItem)>> {
        match self.slots.get_mut(handle.0 as usize) {
            Some(ContainerData::Map(pairs)) => Ok(pairs),
            _ => Err(VmError::TypeMismatch { expected: "map" }),
        }
    }

    /// Looks up a map entry by key (compared as encoded bytes).
    pub fn map_get(&self, handle: ItemHandle, key: &StackItem) -> VmResult<Option<StackItem>> {
        let key_bytes = self.key_bytes(key)?;
        for (k, v) in self.map(handle)? {
            if self.key_bytes(k)? == key_bytes {
                return Ok(Some(v.clone()));
            }
        }
        Ok(None)
    }

    /// Inserts or replaces a map entry, preserving insertion order.
    pub fn map_set(&mut self, handle: ItemHandle, key: StackItem, value: StackItem) -> VmResult<()> {
        let key_bytes = self.key_bytes(&key)?;
        let pairs = self.map(handle)?;
        let existing = pairs
            .iter()
            .position(|(k, _)| self.key_bytes(k).map(|b| b == key_bytes).unwrap_or(false));
        let pairs = self.map_mut(handle)?;
        match existing {
            Some(at) => pairs[at].1 = value,
            None => pairs.push((key, value)),
        }
        Ok(())
    }

    /// Removes a map entry; returns whether it existed.
    pub fn map_remove(&mut self, handle: ItemHandle, key: &StackItem) -> VmResult<bool> {
        let key_bytes = self.key_bytes(key)?;
        let pairs = self.map(handle)?;
        let existing = pairs
            .iter()
            .position(|(k, _)| self.key_bytes(k).map(|b| b == key_bytes).unwrap_or(false));
        let pairs = self.map_mut(handle)?;
        match existing {
            Some(at) => {
                pairs.remove(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Canonical byte form of a map key.
    pub fn key_bytes(&self, key: &StackItem) -> VmResult<Vec<u8>> {
        if !key.is_valid_map_key() {
            return Err(VmError::InvalidMapKey);
        }
        self.to_bytes(key)
    }

    /// Truthiness of any item. Containers are always truthy.
    pub fn to_bool(&self, item: &StackItem) -> bool {
        match item {
            StackItem::Boolean(b) => *b,
            StackItem::Integer(n) => !n.is_zero(),
            StackItem::ByteArray(bytes) => bytes.iter().any(|b| *b != 0),
            StackItem::Interop(_) | StackItem::Array(_) | StackItem::Struct(_) | StackItem::Map(_) => {
                true
            }
        }
    }

    /// Numeric view of an item; containers and interop handles fault.
    pub fn to_int(&self, item: &StackItem) -> VmResult<BigInt> {
        match item {
            StackItem::Integer(n) => Ok(n.clone()),
            StackItem::Boolean(b) => Ok(BigInt::from(u8::from(*b))),
            StackItem::ByteArray(bytes) => Ok(bytes_to_int(bytes)),
            _ => Err(VmError::TypeMismatch { expected: "integer" }),
        }
    }

    /// Numeric view narrowed to i64.
    pub fn to_i64(&self, item: &StackItem) -> VmResult<i64> {
        self.to_int(item)?
            .to_i64()
            .ok_or(VmError::IntegerTooLarge)
    }

    /// Byte view of a primitive; containers and interop handles fault.
    pub fn to_bytes(&self, item: &StackItem) -> VmResult<Vec<u8>> {
        match item {
            StackItem::ByteArray(bytes) => Ok(bytes.clone()),
            StackItem::Integer(n) => Ok(int_to_bytes(n)),
            StackItem::Boolean(b) => Ok(if *b { vec![1] } else { vec![0] }),
            _ => Err(VmError::TypeMismatch { expected: "bytes" }),
        }
    }

    /// Byte size of an item for the item-size limit. Containers are sized
    /// by their serialized form when checked.
    pub fn byte_len(&self, item: &StackItem) -> usize {
        match item {
            StackItem::ByteArray(bytes) => bytes.len(),
            StackItem::Integer(n) => int_to_bytes(n).len(),
            StackItem::Boolean(_) => 1,
            _ => 0,
        }
    }

    /// Equality per the chain rules: primitives by encoded value, arrays and
    /// maps by identity, structs structurally (cycles broken by a visited
    /// set over handle pairs).
    pub fn equals(&self, a: &StackItem, b: &StackItem) -> VmResult<bool> {
        let mut visited = Vec::new();
        self.equals_inner(a, b, &mut visited)
    }

    fn equals_inner(
        &self,
        a: &StackItem,
        b: &StackItem,
        visited: &mut Vec<(ItemHandle, ItemHandle)>,
    ) -> VmResult<bool> {
        match (a, b) {
            (StackItem::Array(x), StackItem::Array(y)) => Ok(x == y),
            (StackItem::Map(x), StackItem::Map(y)) => Ok(x == y),
            (StackItem::Interop(x), StackItem::Interop(y)) => Ok(x == y),
            (StackItem::Struct(x), StackItem::Struct(y)) => {
                if x == y {
                    return Ok(true);
                }
                if visited.contains(&(*x, *y)) {
                    // Cycle; the pair is already being compared above us.
                    return Ok(true);
                }
                visited.push((*x, *y));
                let left = self.list(*x)?;
                let right = self.list(*y)?;
                if left.len() != right.len() {
                    return Ok(false);
                }
                for (l, r) in left.iter().zip(right.iter()) {
                    if !self.equals_inner(l, r, visited)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (x, y) if !x.is_container() && !y.is_container() => {
                match (x, y) {
                    (StackItem::Interop(_), _) | (_, StackItem::Interop(_)) => Ok(false),
                    _ => Ok(self.to_bytes(x)? == self.to_bytes(y)?),
                }
            }
            _ => Ok(false),
        }
    }

    /// Deep copy with fresh handles; used for struct value semantics.
    /// Nesting deeper than the copy limit (including cycles) faults.
    pub fn deep_copy(&mut self, item: &StackItem) -> VmResult<StackItem> {
        self.deep_copy_inner(item, 0)
    }

    fn deep_copy_inner(&mut self, item: &StackItem, depth: usize) -> VmResult<StackItem> {
        const MAX_COPY_DEPTH: usize = 128;
        if depth > MAX_COPY_DEPTH {
            return Err(VmError::RecursiveReference);
        }
        match item {
            StackItem::Array(h) => {
                let copied = self.copy_list(*h, depth)?;
                Ok(StackItem::Array(self.alloc_list(copied)))
            }
            StackItem::Struct(h) => {
                let copied = self.copy_list(*h, depth)?;
                Ok(StackItem::Struct(self.alloc_list(copied)))
            }
            StackItem::Map(h) => {
                let pairs = self.map(*h)?.clone();
                let mut copied = Vec::with_capacity(pairs.len());
                for (k, v) in pairs {
                    copied.push((k.clone(), self.deep_copy_inner(&v, depth + 1)?));
                }
                let handle = self.alloc(ContainerData::Map(copied));
                Ok(StackItem::Map(handle))
            }
            other => Ok(other.clone()),
        }
    }

    fn copy_list(&mut self, handle: ItemHandle, depth: usize) -> VmResult<Vec<StackItem>> {
        let items = self.list(handle)?.clone();
        let mut copied = Vec::with_capacity(items.len());
        for item in items {
            copied.push(self.deep_copy_inner(&item, depth + 1)?);
        }
        Ok(copied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_bytes_minimal_encoding() {
        assert!(int_to_bytes(&BigInt::from(0)).is_empty());
        assert_eq!(int_to_bytes(&BigInt::from(1)), vec![0x01]);
        assert_eq!(int_to_bytes(&BigInt::from(-1)), vec![0xff]);
        assert_eq!(int_to_bytes(&BigInt::from(255)), vec![0xff, 0x00]);
        assert_eq!(bytes_to_int(&[0xff, 0x00]), BigInt::from(255));
        assert_eq!(bytes_to_int(&[]), BigInt::from(0));
    }

    #[test]
    fn primitive_equality_crosses_types() {
        let arena = ItemArena::new();
        assert!(arena
            .equals(&StackItem::int(1), &StackItem::Boolean(true))
            .unwrap());
        assert!(arena
            .equals(&StackItem::int(256), &StackItem::ByteArray(vec![0x00, 0x01]))
            .unwrap());
        assert!(!arena
            .equals(&StackItem::int(1), &StackItem::int(2))
            .unwrap());
    }

    #[test]
    fn arrays_compare_by_identity() {
        let mut arena = ItemArena::new();
        let a = arena.alloc_list(vec![StackItem::int(1)]);
        let b = arena.alloc_list(vec![StackItem::int(1)]);
        assert!(!arena
            .equals(&StackItem::Array(a), &StackItem::Array(b))
            .unwrap());
        assert!(arena
            .equals(&StackItem::Array(a), &StackItem::Array(a))
            .unwrap());
    }

    #[test]
    fn structs_compare_by_value() {
        let mut arena = ItemArena::new();
        let a = arena.alloc_list(vec![StackItem::int(1), StackItem::int(2)]);
        let b = arena.alloc_list(vec![StackItem::int(1), StackItem::int(2)]);
        assert!(arena
            .equals(&StackItem::Struct(a), &StackItem::Struct(b))
            .unwrap());
    }

    #[test]
    fn cyclic_struct_equality_terminates() {
        let mut arena = ItemArena::new();
        let a = arena.alloc_list(vec![]);
        let b = arena.alloc_list(vec![]);
        arena.list_mut(a).unwrap().push(StackItem::Struct(a));
        arena.list_mut(b).unwrap().push(StackItem::Struct(b));
        assert!(arena
            .equals(&StackItem::Struct(a), &StackItem::Struct(b))
            .unwrap());
    }

    #[test]
    fn map_insertion_order_preserved() {
        let mut arena = ItemArena::new();
        let m = arena.alloc_map();
        arena
            .map_set(m, StackItem::int(2), StackItem::int(20))
            .unwrap();
        arena
            .map_set(m, StackItem::int(1), StackItem::int(10))
            .unwrap();
        let keys: Vec<_> = arena.map(m).unwrap().iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(keys, vec![StackItem::int(2), StackItem::int(1)]);

        // Overwrite keeps position.
        arena
            .map_set(m, StackItem::int(2), StackItem::int(99))
            .unwrap();
        assert_eq!(
            arena.map_get(m, &StackItem::int(2)).unwrap(),
            Some(StackItem::int(99))
        );
        assert_eq!(arena.map(m).unwrap().len(), 2);
    }

    #[test]
    fn container_map_keys_rejected() {
        let mut arena = ItemArena::new();
        let m = arena.alloc_map();
        let inner = arena.alloc_list(vec![]);
        assert!(matches!(
            arena.map_set(m, StackItem::Array(inner), StackItem::int(0)),
            Err(VmError::InvalidMapKey)
        ));
    }

    #[test]
    fn deep_copy_detaches_structs() {
        let mut arena = ItemArena::new();
        let original = arena.alloc_list(vec![StackItem::int(1)]);
        let copy = arena.deep_copy(&StackItem::Struct(original)).unwrap();
        let StackItem::Struct(copy_handle) = copy else {
            panic!("expected struct");
        };
        arena.list_mut(copy_handle).unwrap().push(StackItem::int(2));
        assert_eq!(arena.list(original).unwrap().len(), 1);
    }
}
