//! Property-based tests for the address index map
//!
//! Random sequences of inserts, removals and resizes are applied to the map
//! and to a `HashMap` model side by side; after every step both must agree
//! and the map's internal chains must pass the integrity walk.

use proptest::prelude::*;
use std::collections::HashMap;

use heapcrawl::address_map::AddressIndexMap;
use heapcrawl::index::ObjectIndex;

#[derive(Debug, Clone)]
enum Op {
    Add(u64, u32),
    Remove(u64),
    Resize(usize),
}

/// Addresses drawn from a narrow pool so removals and duplicates hit.
fn arb_address() -> impl Strategy<Value = u64> {
    (1u64..256).prop_map(|slot| 0x1000_0000 + slot * 16)
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (arb_address(), 0u32..1_000_000).prop_map(|(key, value)| Op::Add(key, value)),
        3 => arb_address().prop_map(Op::Remove),
        1 => (0usize..600).prop_map(Op::Resize),
    ]
}

fn apply(map: &mut AddressIndexMap, model: &mut HashMap<u64, u32>, op: &Op) {
    match *op {
        Op::Add(key, value) => {
            let added = map.try_add(key, ObjectIndex(value));
            if model.contains_key(&key) {
                assert!(added.is_none(), "duplicate {key:#x} accepted");
            } else {
                assert!(added.is_some(), "fresh {key:#x} refused");
                model.insert(key, value);
            }
        }
        Op::Remove(key) => {
            let removed = map.try_remove(key);
            match model.remove(&key) {
                Some(_) => assert_eq!(removed, Some(model.len())),
                None => assert_eq!(removed, None),
            }
        }
        Op::Resize(capacity) => {
            let resized = map.resize(capacity);
            assert_eq!(resized.is_ok(), capacity >= model.len());
        }
    }
}

proptest! {
    #[test]
    fn map_agrees_with_model(ops in prop::collection::vec(arb_op(), 1..300)) {
        let mut map = AddressIndexMap::new();
        let mut model = HashMap::new();

        for op in &ops {
            apply(&mut map, &mut model, op);
            prop_assert!(map.check_integrity().is_ok(), "integrity failed after {:?}", op);
            prop_assert_eq!(map.len(), model.len());
        }

        for (&key, &value) in &model {
            prop_assert_eq!(map.find(key), Some(ObjectIndex(value)));
        }
        let mut iterated: Vec<_> = map.iter().map(|(key, index)| (key, index.0)).collect();
        let mut expected: Vec<_> = model.iter().map(|(&key, &value)| (key, value)).collect();
        iterated.sort_unstable();
        expected.sort_unstable();
        prop_assert_eq!(iterated, expected);
    }

    #[test]
    fn absent_keys_are_never_found(
        keys in prop::collection::hash_set(arb_address(), 0..100),
        lookup in arb_address(),
    ) {
        let mut map = AddressIndexMap::with_capacity(8);
        for (position, &key) in keys.iter().enumerate() {
            prop_assert!(map.try_add(key, ObjectIndex(position as u32)).is_some());
        }
        prop_assert_eq!(map.contains(lookup), keys.contains(&lookup));
        prop_assert!(map.capacity() >= map.len());
    }

    #[test]
    fn removed_slots_are_reused(count in 1usize..64) {
        let mut map = AddressIndexMap::with_capacity(count);
        for i in 0..count {
            map.try_add(0x2000 + i as u64 * 8, ObjectIndex(i as u32));
        }
        let capacity = map.capacity();

        for i in 0..count {
            prop_assert!(map.try_remove(0x2000 + i as u64 * 8).is_some());
        }
        for i in 0..count {
            map.try_add(0x9000 + i as u64 * 8, ObjectIndex(i as u32));
        }
        // Refilling freed slots must not grow the allocation.
        prop_assert_eq!(map.capacity(), capacity);
        prop_assert!(map.check_integrity().is_ok());
    }
}
