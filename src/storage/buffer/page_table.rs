use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use parking_lot::Mutex;

/// Extendible hash table.
///
/// The buffer pool uses it as the `page_id -> frame_id` directory, but the
/// container is generic. The directory holds `2^global_depth` entries;
/// entries whose indices agree on the low `local_depth` bits share one
/// bucket (shared ownership through `Arc`). The whole table sits behind a
/// single coarse mutex, directory doubling included.
pub struct ExtendibleHashTable<K, V> {
    inner: Mutex<TableInner<K, V>>,
    bucket_size: usize,
}

struct TableInner<K, V> {
    global_depth: usize,
    num_buckets: usize,
    dir: Vec<Arc<Mutex<Bucket<K, V>>>>,
}

struct Bucket<K, V> {
    depth: usize,
    items: Vec<(K, V)>,
}

impl<K, V> ExtendibleHashTable<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new(bucket_size: usize) -> Self {
        assert!(bucket_size >= 1, "bucket capacity must be positive");
        let first = Arc::new(Mutex::new(Bucket {
            depth: 0,
            items: Vec::with_capacity(bucket_size),
        }));
        Self {
            inner: Mutex::new(TableInner {
                global_depth: 0,
                num_buckets: 1,
                dir: vec![first],
            }),
            bucket_size,
        }
    }

    fn hash_of(key: &K) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        hasher.finish() as usize
    }

    fn index_of(key: &K, global_depth: usize) -> usize {
        Self::hash_of(key) & ((1 << global_depth) - 1)
    }

    /// Look up the value stored under `key`
    pub fn find(&self, key: &K) -> Option<V> {
        let inner = self.inner.lock();
        let idx = Self::index_of(key, inner.global_depth);
        let bucket = inner.dir[idx].lock();
        bucket
            .items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Insert `key -> value`, overwriting any previous value for the key.
    ///
    /// An overflowing bucket is split: its local depth grows by one, the
    /// directory doubles first if the bucket was at global depth, and every
    /// directory entry that pointed at it is repointed by the new
    /// discriminating bit. The insert then retries.
    pub fn insert(&self, key: K, value: V) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        loop {
            let idx = Self::index_of(&key, inner.global_depth);
            let bucket_arc = inner.dir[idx].clone();
            let mut bucket = bucket_arc.lock();

            if let Some(slot) = bucket.items.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
                return;
            }
            if bucket.items.len() < self.bucket_size {
                bucket.items.push((key, value));
                return;
            }

            // Split the overflowing bucket.
            let local_depth = bucket.depth;
            if local_depth == inner.global_depth {
                let len = inner.dir.len();
                for i in 0..len {
                    let shared = inner.dir[i].clone();
                    inner.dir.push(shared);
                }
                inner.global_depth += 1;
            }

            let bit = 1usize << local_depth;
            let zero_bucket = Arc::new(Mutex::new(Bucket {
                depth: local_depth + 1,
                items: Vec::with_capacity(self.bucket_size),
            }));
            let one_bucket = Arc::new(Mutex::new(Bucket {
                depth: local_depth + 1,
                items: Vec::with_capacity(self.bucket_size),
            }));

            {
                let mut zero = zero_bucket.lock();
                let mut one = one_bucket.lock();
                for (k, v) in bucket.items.drain(..) {
                    if Self::hash_of(&k) & bit != 0 {
                        one.items.push((k, v));
                    } else {
                        zero.items.push((k, v));
                    }
                }
            }
            drop(bucket);
            inner.num_buckets += 1;

            for (i, entry) in inner.dir.iter_mut().enumerate() {
                if Arc::ptr_eq(entry, &bucket_arc) {
                    *entry = if i & bit != 0 {
                        one_bucket.clone()
                    } else {
                        zero_bucket.clone()
                    };
                }
            }
        }
    }

    /// Remove the entry for `key`; returns whether it was present
    pub fn remove(&self, key: &K) -> bool {
        let inner = self.inner.lock();
        let idx = Self::index_of(key, inner.global_depth);
        let mut bucket = inner.dir[idx].lock();
        if let Some(pos) = bucket.items.iter().position(|(k, _)| k == key) {
            bucket.items.remove(pos);
            true
        } else {
            false
        }
    }

    pub fn global_depth(&self) -> usize {
        self.inner.lock().global_depth
    }

    pub fn local_depth(&self, dir_index: usize) -> usize {
        let inner = self.inner.lock();
        let depth = inner.dir[dir_index].lock().depth;
        depth
    }

    pub fn num_buckets(&self) -> usize {
        self.inner.lock().num_buckets
    }
}
