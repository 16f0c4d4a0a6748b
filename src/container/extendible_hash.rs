use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::Mutex;

/// A bucket holds up to `bucket_size` records whose hashes agree on the low
/// `depth` bits.
#[derive(Debug)]
struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K: Eq, V> Bucket<K, V> {
    fn new(depth: usize) -> Self {
        Self {
            depth,
            items: Vec::new(),
        }
    }

    fn position_of(&self, key: &K) -> Option<usize> {
        self.items.iter().position(|(k, _)| k == key)
    }
}

#[derive(Debug)]
struct Directory<K, V> {
    global_depth: usize,
    bucket_size: usize,
    /// `dir[i]` is an index into `buckets`; several slots may share a bucket.
    dir: Vec<usize>,
    buckets: Vec<Bucket<K, V>>,
}

/// Hash table that grows by doubling its directory and splitting only the
/// overflowing bucket. Buckets are never merged.
///
/// All operations are serialized by a single directory latch, so the table can
/// be shared between threads as-is.
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<Directory<K, V>>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size > 0, "bucket size must be positive");
        Self {
            inner: Mutex::new(Directory {
                global_depth: 0,
                bucket_size,
                dir: vec![0],
                buckets: vec![Bucket::new(0)],
            }),
        }
    }

    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let bucket = &inner.buckets[inner.dir[inner.index_of(key)]];
        bucket
            .position_of(key)
            .map(|pos| bucket.items[pos].1.clone())
    }

    /// Insert a record, replacing the value if the key is already present.
    /// A single insert may double the directory and split buckets several
    /// times before the record fits.
    pub fn insert(&self, key: K, value: V) {
        let inner = &mut *self.inner.lock();
        loop {
            let bucket_index = inner.dir[inner.index_of(&key)];
            let bucket = &mut inner.buckets[bucket_index];

            if let Some(pos) = bucket.position_of(&key) {
                bucket.items[pos].1 = value;
                return;
            }
            if bucket.items.len() < inner.bucket_size {
                bucket.items.push((key, value));
                return;
            }

            // Bucket is full: grow the directory if the bucket already uses
            // every directory bit, then split it and retry the insert.
            if inner.buckets[bucket_index].depth == inner.global_depth {
                inner.dir.extend_from_within(..);
                inner.global_depth += 1;
            }
            inner.split_bucket(bucket_index);
        }
    }

    pub fn remove(&self, key: &K) -> bool {
        let mut inner = self.inner.lock();
        let bucket_index = inner.dir[inner.index_of(key)];
        let bucket = &mut inner.buckets[bucket_index];
        match bucket.position_of(key) {
            Some(pos) => {
                bucket.items.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        inner.buckets[inner.dir[dir_index]].depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().buckets.len()
    }
}

impl<K, V> Directory<K, V>
where
    K: Hash + Eq,
{
    fn index_of(&self, key: &K) -> usize {
        let mask = (1usize << self.global_depth) - 1;
        hash_of(key) & mask
    }

    /// Split `bucket_index` into itself and a fresh sibling one bit deeper.
    /// Directory slots and records whose split bit is set move to the sibling.
    fn split_bucket(&mut self, bucket_index: usize) {
        let split_bit = self.buckets[bucket_index].depth;
        self.buckets[bucket_index].depth += 1;

        let sibling_index = self.buckets.len();
        self.buckets.push(Bucket::new(split_bit + 1));

        for (slot, target) in self.dir.iter_mut().enumerate() {
            if *target == bucket_index && (slot >> split_bit) & 1 == 1 {
                *target = sibling_index;
            }
        }

        let items = std::mem::take(&mut self.buckets[bucket_index].items);
        for (key, value) in items {
            let target = if (hash_of(&key) >> split_bit) & 1 == 1 {
                sibling_index
            } else {
                bucket_index
            };
            self.buckets[target].items.push((key, value));
        }
    }
}

fn hash_of<K: Hash>(key: &K) -> usize {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as usize
}
