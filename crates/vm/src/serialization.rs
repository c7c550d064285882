//! Binary encoding of stack items.
//!
//! Used by the `Runtime.Serialize`/`Deserialize` syscalls and by contract
//! storage. Cycles are detected with a visited set and rejected; interop
//! handles are host-scoped and never serializable.

use crate::error::{VmError, VmResult};
use crate::stack_item::{bytes_to_int, int_to_bytes, ItemArena, ItemHandle, StackItem};
use neo2_io::{BinaryWriter, MemoryReader};

const BYTE_ARRAY_T: u8 = 0x00;
const BOOLEAN_T: u8 = 0x01;
const INTEGER_T: u8 = 0x02;
const ARRAY_T: u8 = 0x80;
const STRUCT_T: u8 = 0x81;
const MAP_T: u8 = 0x82;

const MAX_DESERIALIZED_ELEMENTS: u64 = 1024;

/// Serializes an item to bytes. Fails on cycles and interop handles.
pub fn serialize_item(arena: &ItemArena, item: &StackItem) -> VmResult<Vec<u8>> {
    let mut writer = BinaryWriter::new();
    let mut visited = Vec::new();
    serialize_into(arena, item, &mut writer, &mut visited)?;
    Ok(writer.into_bytes())
}

fn serialize_into(
    arena: &ItemArena,
    item: &StackItem,
    writer: &mut BinaryWriter,
    visited: &mut Vec<ItemHandle>,
) -> VmResult<()> {
    match item {
        StackItem::ByteArray(bytes) => {
            writer.write_u8(BYTE_ARRAY_T);
            writer.write_var_bytes(bytes);
        }
        StackItem::Boolean(b) => {
            writer.write_u8(BOOLEAN_T);
            writer.write_bool(*b);
        }
        StackItem::Integer(n) => {
            writer.write_u8(INTEGER_T);
            writer.write_var_bytes(&int_to_bytes(n));
        }
        StackItem::Interop(_) => return Err(VmError::UnserializableItem),
        StackItem::Array(handle) | StackItem::Struct(handle) => {
            enter(visited, *handle)?;
            writer.write_u8(if matches!(item, StackItem::Array(_)) {
                ARRAY_T
            } else {
                STRUCT_T
            });
            let items = arena.list(*handle)?;
            writer.write_var_uint(items.len() as u64);
            for element in items {
                serialize_into(arena, element, writer, visited)?;
            }
            visited.pop();
        }
        StackItem::Map(handle) => {
            enter(visited, *handle)?;
            writer.write_u8(MAP_T);
            let pairs = arena.map(*handle)?;
            writer.write_var_uint(pairs.len() as u64);
            for (key, value) in pairs {
                serialize_into(arena, key, writer, visited)?;
                serialize_into(arena, value, writer, visited)?;
            }
            visited.pop();
        }
    }
    Ok(())
}

fn enter(visited: &mut Vec<ItemHandle>, handle: ItemHandle) -> VmResult<()> {
    if visited.contains(&handle) {
        return Err(VmError::RecursiveReference);
    }
    visited.push(handle);
    Ok(())
}

/// Parses a serialized item, allocating containers in the given arena.
pub fn deserialize_item(arena: &mut ItemArena, data: &[u8]) -> VmResult<StackItem> {
    let mut reader = MemoryReader::new(data);
    let item = deserialize_from(arena, &mut reader)?;
    Ok(item)
}

fn deserialize_from(arena: &mut ItemArena, reader: &mut MemoryReader) -> VmResult<StackItem> {
    let io_err = |e: neo2_io::Error| VmError::BadScript(e.to_string());
    let tag = reader.read_u8().map_err(io_err)?;
    Ok(match tag {
        BYTE_ARRAY_T => StackItem::ByteArray(reader.read_var_bytes(usize::MAX).map_err(io_err)?),
        BOOLEAN_T => StackItem::Boolean(reader.read_bool().map_err(io_err)?),
        INTEGER_T => {
            let bytes = reader.read_var_bytes(32).map_err(io_err)?;
            StackItem::Integer(bytes_to_int(&bytes))
        }
        ARRAY_T | STRUCT_T => {
            let count = reader
                .read_var_uint(MAX_DESERIALIZED_ELEMENTS)
                .map_err(io_err)? as usize;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                items.push(deserialize_from(arena, reader)?);
            }
            let handle = arena.alloc_list(items);
            if tag == ARRAY_T {
                StackItem::Array(handle)
            } else {
                StackItem::Struct(handle)
            }
        }
        MAP_T => {
            let count = reader
                .read_var_uint(MAX_DESERIALIZED_ELEMENTS)
                .map_err(io_err)? as usize;
            let handle = arena.alloc_map();
            for _ in 0..count {
                let key = deserialize_from(arena, reader)?;
                let value = deserialize_from(arena, reader)?;
                arena.map_set(handle, key, value)?;
            }
            StackItem::Map(handle)
        }
        other => return Err(VmError::BadScript(format!("unknown item tag {other:#04x}"))),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_round_trip() {
        let mut arena = ItemArena::new();
        for item in [
            StackItem::ByteArray(vec![1, 2, 3]),
            StackItem::Boolean(true),
            StackItem::int(-777),
        ] {
            let bytes = serialize_item(&arena, &item).unwrap();
            let back = deserialize_item(&mut arena, &bytes).unwrap();
            assert!(arena.equals(&item, &back).unwrap());
        }
    }

    #[test]
    fn nested_containers_round_trip() {
        let mut arena = ItemArena::new();
        let inner = arena.alloc_list(vec![StackItem::int(1), StackItem::int(2)]);
        let map = arena.alloc_map();
        arena
            .map_set(map, StackItem::ByteArray(b"k".to_vec()), StackItem::Struct(inner))
            .unwrap();
        let bytes = serialize_item(&arena, &StackItem::Map(map)).unwrap();

        let back = deserialize_item(&mut arena, &bytes).unwrap();
        let StackItem::Map(back_handle) = back else {
            panic!("expected map");
        };
        let value = arena
            .map_get(back_handle, &StackItem::ByteArray(b"k".to_vec()))
            .unwrap()
            .unwrap();
        assert!(matches!(value, StackItem::Struct(_)));
    }

    #[test]
    fn cycles_rejected() {
        let mut arena = ItemArena::new();
        let handle = arena.alloc_list(vec![]);
        arena.list_mut(handle).unwrap().push(StackItem::Array(handle));
        assert!(matches!(
            serialize_item(&arena, &StackItem::Array(handle)),
            Err(VmError::RecursiveReference)
        ));
    }

    #[test]
    fn interop_rejected() {
        let arena = ItemArena::new();
        assert!(matches!(
            serialize_item(&arena, &StackItem::Interop(crate::InteropHandle(1))),
            Err(VmError::UnserializableItem)
        ));
    }

    #[test]
    fn sibling_reuse_is_not_a_cycle() {
        let mut arena = ItemArena::new();
        let shared = arena.alloc_list(vec![StackItem::int(9)]);
        let outer = arena.alloc_list(vec![StackItem::Struct(shared), StackItem::Struct(shared)]);
        assert!(serialize_item(&arena, &StackItem::Array(outer)).is_ok());
    }
}
