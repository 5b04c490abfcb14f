//! Data packing (C6): substitute placeholders with in-memory values inside
//! structured arguments, so `compute-task` payloads can reference
//! dependency keys without the scheduler needing to inline their values.

use crate::key::Key;
use bytes::Bytes;
use std::collections::HashMap;

/// A structured argument tree. Mirrors the nesting a real task's `args`/
/// `kwargs` can have (lists and maps of placeholders and scalars), kept
/// intentionally small since the core never inspects scalar contents.
#[derive(Debug, Clone, PartialEq)]
pub enum Packed {
    Placeholder(Key),
    Scalar(Bytes),
    List(Vec<Packed>),
    Map(Vec<(String, Packed)>),
}

/// Replaces every `Placeholder(key)` reachable in `x` with the value stored
/// under that key in `data`. Placeholders referencing a key absent from
/// `data` are left untouched (the caller is expected to have resolved all
/// dependencies first).
pub fn pack_data(x: &Packed, data: &HashMap<Key, Bytes>) -> Packed {
    match x {
        Packed::Placeholder(key) => match data.get(key) {
            Some(value) => Packed::Scalar(value.clone()),
            None => Packed::Placeholder(key.clone()),
        },
        Packed::Scalar(value) => Packed::Scalar(value.clone()),
        Packed::List(items) => Packed::List(items.iter().map(|i| pack_data(i, data)).collect()),
        Packed::Map(entries) => Packed::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), pack_data(v, data)))
                .collect(),
        ),
    }
}

/// Inverse of `pack_data`: replaces every scalar in `x` that is
/// byte-identical to some `data[key]` with `Placeholder(key)`. Assuming
/// `data`'s values are distinct (true of any real keyed store, since two
/// equal results would just share a key), this undoes `pack_data` exactly.
pub fn unpack_data(x: &Packed, data: &HashMap<Key, Bytes>) -> Packed {
    let reverse: HashMap<&Bytes, &Key> = data.iter().map(|(k, v)| (v, k)).collect();
    unpack_with_reverse(x, &reverse)
}

fn unpack_with_reverse(x: &Packed, reverse: &HashMap<&Bytes, &Key>) -> Packed {
    match x {
        Packed::Scalar(value) => match reverse.get(value) {
            Some(key) => Packed::Placeholder((*key).clone()),
            None => Packed::Scalar(value.clone()),
        },
        Packed::Placeholder(key) => Packed::Placeholder(key.clone()),
        Packed::List(items) => {
            Packed::List(items.iter().map(|i| unpack_with_reverse(i, reverse)).collect())
        }
        Packed::Map(entries) => Packed::Map(
            entries
                .iter()
                .map(|(k, v)| (k.clone(), unpack_with_reverse(v, reverse)))
                .collect(),
        ),
    }
}

/// Collects every key referenced by a placeholder anywhere in `x`; this is
/// how a task's dependency set is derived from its raw `args`/`kwargs`.
pub fn referenced_keys(x: &Packed) -> Vec<Key> {
    let mut keys = Vec::new();
    collect_keys(x, &mut keys);
    keys
}

fn collect_keys(x: &Packed, out: &mut Vec<Key>) {
    match x {
        Packed::Placeholder(key) => out.push(key.clone()),
        Packed::Scalar(_) => {}
        Packed::List(items) => items.iter().for_each(|i| collect_keys(i, out)),
        Packed::Map(entries) => entries.iter().for_each(|(_, v)| collect_keys(v, out)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_data() -> HashMap<Key, Bytes> {
        let mut data = HashMap::new();
        data.insert("a".to_string(), Bytes::from_static(b"value-a"));
        data.insert("b".to_string(), Bytes::from_static(b"value-b"));
        data
    }

    #[test]
    fn pack_substitutes_placeholders() {
        let data = sample_data();
        let x = Packed::List(vec![
            Packed::Placeholder("a".to_string()),
            Packed::Scalar(Bytes::from_static(b"literal")),
        ]);
        let packed = pack_data(&x, &data);
        assert_eq!(
            packed,
            Packed::List(vec![
                Packed::Scalar(Bytes::from_static(b"value-a")),
                Packed::Scalar(Bytes::from_static(b"literal")),
            ])
        );
    }

    #[test]
    fn pack_then_unpack_round_trips() {
        let data = sample_data();
        let x = Packed::Map(vec![
            ("x".to_string(), Packed::Placeholder("a".to_string())),
            ("y".to_string(), Packed::Placeholder("b".to_string())),
        ]);
        let packed = pack_data(&x, &data);
        let unpacked = unpack_data(&packed, &data);
        assert_eq!(unpacked, x);
    }

    #[test]
    fn referenced_keys_finds_nested_placeholders() {
        let x = Packed::List(vec![
            Packed::Placeholder("a".to_string()),
            Packed::Map(vec![("k".to_string(), Packed::Placeholder("b".to_string()))]),
        ]);
        let mut keys = referenced_keys(&x);
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }
}
