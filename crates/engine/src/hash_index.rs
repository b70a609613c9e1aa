//! Open-addressed, multi-map hash index over row ids (§4.10 "Hash
//! index"): linear probing, resize-by-doubling at load factor 0.75,
//! duplicate keys collected into a row-id set. String keys are
//! normalized through the column's collation before hashing so
//! case-insensitive/RTrim/locale columns probe consistently.

use std::hash::{Hash, Hasher};

use rustc_hash::FxHasher;
use sharpcore_core::{Collation, IndexKey, RowId, Value};

const LOAD_FACTOR_NUM: usize = 3;
const LOAD_FACTOR_DEN: usize = 4;

#[derive(Clone)]
enum Slot {
    Empty,
    Tombstone,
    Occupied(IndexKey, Vec<RowId>),
}

/// A resizable open-addressed hash table mapping normalized column
/// values to the set of row ids currently holding that value.
pub struct HashIndex {
    collation: Collation,
    buckets: Vec<Slot>,
    len: usize,
}

impl HashIndex {
    pub fn new(collation: Collation) -> Self {
        HashIndex {
            collation,
            buckets: vec![Slot::Empty; 16],
            len: 0,
        }
    }

    fn hash_of(key: &IndexKey) -> u64 {
        let mut hasher = FxHasher::default();
        key.hash(&mut hasher);
        hasher.finish()
    }

    fn probe(&self, key: &IndexKey) -> usize {
        let mut index = (Self::hash_of(key) as usize) % self.buckets.len();
        loop {
            match &self.buckets[index] {
                Slot::Occupied(k, _) if k == key => return index,
                Slot::Empty => return index,
                _ => index = (index + 1) % self.buckets.len(),
            }
        }
    }

    fn should_grow(&self) -> bool {
        self.len * LOAD_FACTOR_DEN >= self.buckets.len() * LOAD_FACTOR_NUM
    }

    fn grow(&mut self) {
        let new_len = self.buckets.len() * 2;
        let old = std::mem::replace(&mut self.buckets, vec![Slot::Empty; new_len]);
        self.len = 0;
        for slot in old {
            if let Slot::Occupied(key, rids) = slot {
                for rid in rids {
                    self.insert_key(key.clone(), rid);
                }
            }
        }
    }

    fn insert_key(&mut self, key: IndexKey, rid: RowId) {
        let index = self.probe(&key);
        match &mut self.buckets[index] {
            Slot::Occupied(_, rids) => {
                if !rids.contains(&rid) {
                    rids.push(rid);
                }
            }
            slot @ (Slot::Empty | Slot::Tombstone) => {
                *slot = Slot::Occupied(key, vec![rid]);
                self.len += 1;
            }
        }
    }

    /// Index one row's value under this column.
    pub fn insert(&mut self, value: &Value, rid: RowId) {
        if self.should_grow() {
            self.grow();
        }
        let key = value.index_key(&self.collation);
        self.insert_key(key, rid);
    }

    /// Remove a single row id from a value's entry; drops the entry
    /// entirely once its row-id set is empty.
    pub fn remove(&mut self, value: &Value, rid: RowId) {
        let key = value.index_key(&self.collation);
        let index = self.probe(&key);
        if let Slot::Occupied(_, rids) = &mut self.buckets[index] {
            rids.retain(|r| *r != rid);
            if rids.is_empty() {
                self.buckets[index] = Slot::Tombstone;
                self.len -= 1;
            }
        }
    }

    /// Look up every row id currently holding `value`.
    pub fn lookup(&self, value: &Value) -> &[RowId] {
        let key = value.index_key(&self.collation);
        let index = self.probe(&key);
        match &self.buckets[index] {
            Slot::Occupied(_, rids) => rids,
            _ => &[],
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_lookup_round_trips() {
        let mut idx = HashIndex::new(Collation::Binary);
        idx.insert(&Value::Integer(7), 1);
        assert_eq!(idx.lookup(&Value::Integer(7)), &[1]);
    }

    #[test]
    fn duplicate_keys_accumulate_as_a_multimap() {
        let mut idx = HashIndex::new(Collation::Binary);
        idx.insert(&Value::Text("a".into()), 1);
        idx.insert(&Value::Text("a".into()), 2);
        let mut rids = idx.lookup(&Value::Text("a".into())).to_vec();
        rids.sort();
        assert_eq!(rids, vec![1, 2]);
    }

    #[test]
    fn remove_drops_entry_once_empty() {
        let mut idx = HashIndex::new(Collation::Binary);
        idx.insert(&Value::Integer(1), 10);
        idx.remove(&Value::Integer(1), 10);
        assert!(idx.lookup(&Value::Integer(1)).is_empty());
        assert!(idx.is_empty());
    }

    #[test]
    fn grows_past_load_factor_without_losing_entries() {
        let mut idx = HashIndex::new(Collation::Binary);
        for i in 0..100 {
            idx.insert(&Value::Integer(i), i as RowId);
        }
        for i in 0..100 {
            assert_eq!(idx.lookup(&Value::Integer(i)), &[i as RowId]);
        }
    }

    #[test]
    fn case_insensitive_collation_merges_keys() {
        let mut idx = HashIndex::new(Collation::NoCase);
        idx.insert(&Value::Text("Alice".into()), 1);
        idx.insert(&Value::Text("ALICE".into()), 2);
        let mut rids = idx.lookup(&Value::Text("alice".into())).to_vec();
        rids.sort();
        assert_eq!(rids, vec![1, 2]);
    }
}
