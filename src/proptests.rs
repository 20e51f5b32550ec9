use crate::key::{hash_bytes, hash_inline};
use crate::{
    Finalizer, InlineKey, Inserted, KeyRef, SsoTable, TableConfig, TableError, INLINE_CAPACITY,
    MAX_CAPACITY,
};
use crate::slot::Slot;

use proptest::prelude::*;
use proptest_derive::Arbitrary;
use std::collections::BTreeMap;

fn validate_table<V, F: Finalizer<V>>(t: &SsoTable<V, F>) {
    let capacity = t.capacity();
    assert!(capacity.is_power_of_two(), "capacity {capacity} is not a power of two");
    assert!(capacity <= MAX_CAPACITY);
    assert!(t.len() <= capacity, "more entries than slots");

    let slots = &t.raw.slots;
    let occupied = slots.iter().filter(|s| s.is_occupied()).count();
    let vacated = slots.iter().filter(|s| s.is_vacated()).count();
    assert_eq!(occupied, t.len(), "occupied slots must match len");
    assert_eq!(vacated, t.raw.vacated, "vacated counter out of sync");

    for slot in slots.iter() {
        match slot {
            Slot::Inline { key, .. } => {
                assert_eq!(slot.hash(), Some(hash_inline(*key)));
            }
            Slot::Heap { key, .. } => {
                assert!(key.len() > INLINE_CAPACITY, "short key stored on the heap");
                assert_eq!(slot.hash(), Some(hash_bytes(key)));
            }
            Slot::Empty | Slot::Vacated => continue,
        }
        let (key, _) = slot.entry().unwrap();
        let bytes = key.to_vec();
        assert!(t.contains_key(&bytes), "stored key {key:?} is unreachable");
    }

    assert_eq!(t.iter().count(), t.len());
}

fn key_strategy() -> impl Strategy<Value = Vec<u8>> {
    // A small alphabet so operations collide on the same keys, with lengths on
    // both sides of the inline boundary. Empty keys exercise the error path.
    prop::collection::vec(b'a'..=b'd', 0..=12)
}

#[derive(Clone, Debug, Arbitrary)]
enum Op {
    #[proptest(weight = 8)]
    Insert(#[proptest(strategy = "key_strategy()")] Vec<u8>, u32),
    #[proptest(weight = 4)]
    Delete(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    #[proptest(weight = 4)]
    Lookup(#[proptest(strategy = "key_strategy()")] Vec<u8>),
    Resize(#[proptest(strategy = "0u32..=10")] u32),
    Squash,
    Clear,
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        max_shrink_iters: 50_000,
        .. ProptestConfig::default()
    })]

    #[test]
    fn prop_equivalence(
        initial_exp in 0u32..=6,
        ops in prop::collection::vec(any::<Op>(), 0..=500),
    ) {
        let mut t: SsoTable<u32> = SsoTable::new(1 << initial_exp).unwrap();
        let mut m: BTreeMap<Vec<u8>, u32> = BTreeMap::new();

        for op in ops {
            match op {
                Op::Insert(key, value) => {
                    let capacity = t.capacity();
                    let full = t.len() == capacity;
                    let got = t.insert(&key, value);
                    if key.is_empty() {
                        prop_assert_eq!(got.err(), Some(TableError::EmptyKey));
                        continue;
                    }
                    // Squash and exact-fit resizes can leave every slot taken.
                    if full {
                        prop_assert_eq!(got.err(), Some(TableError::TableFull(capacity)));
                        continue;
                    }
                    match got.unwrap() {
                        Inserted::New(stored) => {
                            prop_assert_eq!(*stored, value);
                            prop_assert!(m.insert(key, value).is_none());
                        }
                        Inserted::Duplicate { existing, rejected } => {
                            prop_assert_eq!(rejected, value);
                            prop_assert_eq!(Some(&*existing), m.get(&key));
                        }
                    }
                }
                Op::Delete(key) => {
                    let expected = match m.remove(&key) {
                        _ if key.is_empty() => Err(TableError::EmptyKey),
                        Some(_) => Ok(()),
                        None => Err(TableError::KeyNotFound),
                    };
                    prop_assert_eq!(t.delete(&key), expected);
                }
                Op::Lookup(key) => {
                    let got = t.lookup(&key).ok().copied();
                    prop_assert_eq!(got, m.get(&key).copied());
                }
                Op::Resize(exp) => {
                    let new_capacity = 1usize << exp;
                    match t.resize(new_capacity) {
                        Ok(capacity) => prop_assert_eq!(capacity, new_capacity),
                        Err(err) => {
                            prop_assert!(new_capacity < m.len());
                            prop_assert_eq!(
                                err,
                                TableError::CapacityTooSmall { requested: new_capacity, size: m.len() }
                            );
                        }
                    }
                }
                Op::Squash => {
                    let capacity = t.squash();
                    prop_assert_eq!(capacity, m.len().max(1).next_power_of_two());
                }
                Op::Clear => {
                    prop_assert_eq!(t.clear(), m.len());
                    m.clear();
                }
            }

            prop_assert_eq!(t.len(), m.len());
        }

        validate_table(&t);
        let mut got: Vec<(Vec<u8>, u32)> = t.iter().map(|(k, v)| (k.to_vec(), *v)).collect();
        got.sort();
        let expected: Vec<(Vec<u8>, u32)> = m.into_iter().collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn prop_hash_identity(key in prop::collection::vec(any::<u8>(), 1..=INLINE_CAPACITY)) {
        let inline = InlineKey::new(&key).unwrap();
        prop_assert_eq!(hash_inline(inline), hash_bytes(&key));
        prop_assert_eq!(KeyRef::new(&key).unwrap().hash(), hash_bytes(&key));
    }

    #[test]
    fn prop_merge_is_union_preferring_dest(
        dest_keys in prop::collection::vec(key_strategy(), 0..=40),
        src_keys in prop::collection::vec(key_strategy(), 0..=40),
    ) {
        let mut dest: SsoTable<u32> = SsoTable::new(4).unwrap();
        let mut src: SsoTable<u32> = SsoTable::new(2).unwrap();
        let mut m: BTreeMap<Vec<u8>, u32> = BTreeMap::new();

        for key in dest_keys.iter().filter(|k| !k.is_empty()) {
            if dest.insert(key, 1).unwrap().is_new() {
                m.insert(key.clone(), 1);
            }
        }
        let mut conflict = false;
        for key in src_keys.iter().filter(|k| !k.is_empty()) {
            if src.insert(key, 2).unwrap().is_new() {
                conflict |= m.contains_key(key);
                m.entry(key.clone()).or_insert(2);
            }
        }

        prop_assert_eq!(dest.merge(&src), Ok(conflict));
        prop_assert_eq!(dest.len(), m.len());
        for (key, value) in &m {
            prop_assert_eq!(dest.lookup(key), Ok(value));
        }
        validate_table(&dest);
        validate_table(&src);
    }
}

fn for_each_permutation<T: Clone>(items: &[T], mut f: impl FnMut(Vec<T>)) {
    fn rec<T: Clone>(items: &[T], used: &mut [bool], out: &mut Vec<T>, f: &mut impl FnMut(Vec<T>)) {
        if out.len() == items.len() {
            f(out.clone());
            return;
        }
        for i in 0..items.len() {
            if used[i] {
                continue;
            }
            used[i] = true;
            out.push(items[i].clone());
            rec(items, used, out, f);
            out.pop();
            used[i] = false;
        }
    }

    let mut used = vec![false; items.len()];
    let mut out = Vec::with_capacity(items.len());
    rec(items, &mut used, &mut out, &mut f);
}

fn small_keys() -> Vec<Vec<u8>> {
    vec![
        b"a".to_vec(),
        b"b".to_vec(),
        b"key1".to_vec(),
        b"key2".to_vec(),
        b"ninebytes".to_vec(),
        b"a-much-longer-key".to_vec(),
    ]
}

#[test]
fn exhaustive_delete_order_full_table() {
    let keys = small_keys();

    // A full table without growth: every probe chain is as long as it gets.
    let config = TableConfig::default().with_auto_resize(false);
    let mut base: SsoTable<u64> = SsoTable::with_config(8, config).unwrap();
    for (i, k) in keys.iter().enumerate() {
        base.insert(k, i as u64).unwrap();
    }
    base.insert(b"c", 6).unwrap();
    base.insert(b"d", 7).unwrap();
    assert_eq!(base.len(), base.capacity());

    for_each_permutation(&keys, |perm| {
        let mut t = base.copy();
        let mut remaining: BTreeMap<Vec<u8>, u64> =
            keys.iter().cloned().zip(0..).collect();

        for k in perm {
            assert_eq!(t.delete(&k), Ok(()));
            remaining.remove(&k);
            for (key, value) in &remaining {
                assert_eq!(t.lookup(key), Ok(value));
            }
            validate_table(&t);
        }
        assert_eq!(t.len(), 2);
        assert_eq!(t.lookup(b"d"), Ok(&7));
    });
}

#[test]
fn exhaustive_insert_order_small_set() {
    let keys = small_keys();

    for_each_permutation(&keys, |perm| {
        let mut t: SsoTable<u64> = SsoTable::new(1).unwrap();
        let mut m: BTreeMap<Vec<u8>, u64> = BTreeMap::new();

        for (i, k) in perm.into_iter().enumerate() {
            let v = i as u64;
            assert!(t.insert(&k, v).unwrap().is_new());
            m.insert(k, v);
        }

        validate_table(&t);
        for (key, value) in &m {
            assert_eq!(t.lookup(key), Ok(value));
        }
    });
}
