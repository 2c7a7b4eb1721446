//! Class handle cache
//!
//! Open-chaining hash map from fully-qualified class name to a resolved
//! class handle. Bucket placement uses the djb2 hash of the raw name bytes,
//! masked by the (power-of-two) bucket count. The map grows by doubling
//! once the entry count exceeds three quarters of the bucket count; stored
//! hashes are reused when rehashing.
//!
//! The registry itself is not synchronized; [`Bridge`](crate::Bridge) keeps
//! it behind a read/write lock.

/// Initial number of buckets
pub const INITIAL_BUCKETS: usize = 16;

/// Resize threshold (entries per bucket)
pub const LOAD_FACTOR: f32 = 0.75;

/// djb2: `h = h * 33 + byte`, seeded with 5381, wrapping at 32 bits
#[inline]
pub fn hash_name(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(5381u32, |h, &b| h.wrapping_mul(33).wrapping_add(b as u32))
}

struct Node<V> {
    key: Box<[u8]>,
    hash: u32,
    value: V,
    next: Option<Box<Node<V>>>,
}

/// Name -> handle map with chained buckets
pub struct ClassRegistry<V> {
    buckets: Vec<Option<Box<Node<V>>>>,
    count: usize,
}

impl<V: Copy> ClassRegistry<V> {
    pub fn new() -> Self {
        ClassRegistry {
            buckets: empty_buckets(INITIAL_BUCKETS),
            count: 0,
        }
    }

    /// Number of cached names
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Current bucket count (always a power of two)
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Insert or replace the handle cached under `name`.
    ///
    /// Returns the handle previously stored under that name, which the
    /// caller now owns.
    pub fn put(&mut self, name: &str, value: V) -> Option<V> {
        if self.count as f32 > self.buckets.len() as f32 * LOAD_FACTOR {
            self.resize();
        }

        let key = name.as_bytes();
        let hash = hash_name(key);
        let index = self.index_of(hash);

        let mut current = self.buckets[index].as_deref_mut();
        while let Some(node) = current {
            if node.key.len() == key.len() && *node.key == *key {
                return Some(std::mem::replace(&mut node.value, value));
            }
            current = node.next.as_deref_mut();
        }

        let next = self.buckets[index].take();
        self.buckets[index] = Some(Box::new(Node {
            key: key.into(),
            hash,
            value,
            next,
        }));
        self.count += 1;
        None
    }

    /// Handle cached under `name`, if registered
    pub fn get(&self, name: &str) -> Option<V> {
        let key = name.as_bytes();
        let hash = hash_name(key);
        let mut current = self.buckets[self.index_of(hash)].as_deref();
        while let Some(node) = current {
            if node.hash == hash && node.key.len() == key.len() && *node.key == *key {
                return Some(node.value);
            }
            current = node.next.as_deref();
        }
        None
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Remove every entry, returning the stored handles for release.
    ///
    /// The registry is left empty with its initial bucket count.
    pub fn drain(&mut self) -> Vec<V> {
        let buckets = std::mem::replace(&mut self.buckets, empty_buckets(INITIAL_BUCKETS));
        let mut values = Vec::with_capacity(self.count);
        self.count = 0;
        for mut bucket in buckets {
            while let Some(mut node) = bucket {
                bucket = node.next.take();
                values.push(node.value);
            }
        }
        values
    }

    #[inline]
    fn index_of(&self, hash: u32) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn resize(&mut self) {
        let new_size = self.buckets.len() << 1;
        let old = std::mem::replace(&mut self.buckets, empty_buckets(new_size));
        for mut bucket in old {
            while let Some(mut node) = bucket {
                bucket = node.next.take();
                let index = (node.hash as usize) & (new_size - 1);
                node.next = self.buckets[index].take();
                self.buckets[index] = Some(node);
            }
        }
        tracing::trace!(target: "hostcall", "class registry resized to {} buckets", new_size);
    }
}

impl<V: Copy> Default for ClassRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Drop for ClassRegistry<V> {
    fn drop(&mut self) {
        // Unlink chains iteratively
        for bucket in self.buckets.iter_mut() {
            let mut current = bucket.take();
            while let Some(mut node) = current {
                current = node.next.take();
            }
        }
    }
}

fn empty_buckets<V>(size: usize) -> Vec<Option<Box<Node<V>>>> {
    let mut buckets = Vec::with_capacity(size);
    buckets.resize_with(size, || None);
    buckets
}
