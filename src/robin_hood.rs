//! RobinHoodMap: open-addressing table with Robin Hood displacement,
//! backward-shift deletion and prime-sized incremental resizing.
//!
//! Layout
//! - One slot vector from the map's allocator `A`, empty (and unallocated)
//!   until the first insert.
//! - Each occupied slot carries the key, the value, the key's full hash and
//!   the probe distance from its home slot (`hash % capacity`).
//! - Capacities come from `PRIMES`; `prime_level` indexes into it.
//!
//! Invariants
//! - `len <= capacity`, and after every public operation the load stays in
//!   `LOAD_LOW..=LOAD_HIGH` percent unless the table sits on the first or
//!   last prime level, or a probe-limit rebuild pushed it up a level.
//! - No slot's distance exceeds `probe_limit`. An insert that would need a
//!   longer probe rebuilds the table at the next prime instead.
//! - Every stored distance equals `(pos - home) mod capacity`. An entry
//!   carried across a forced rebuild restarts from distance 0.
//! - Along any probe sequence, a slot never holds an entry that is closer
//!   to home than the entry before it would have been at that position.
//!   Lookups rely on this to stop at the first empty slot or at the first
//!   slot whose distance is smaller than the current probe length.

use crate::hashers::DefaultHashBuilder;
use crate::reentrancy::ReentrancyCheck;
use allocator_api2::alloc::{Allocator, Global};
use allocator_api2::vec::Vec as AllocVec;
use core::borrow::Borrow;
use core::fmt;
use core::hash::{BuildHasher, Hash};
use core::mem;

/// Prime capacities the table moves between.
pub const PRIMES: [usize; 27] = [
    11, 53, 97, 193, 389, 769, 1543, 3079, 6151, 12289, 24593, 49157, 98317, 196613, 393241,
    786433, 1572869, 3145739, 6291469, 12582917, 25165843, 50331653, 100663319, 201326611,
    402653189, 805306457, 1610612741,
];

/// Grow when the load (percent of occupied slots) rises above this.
pub const LOAD_HIGH: usize = 80;

/// Shrink when the load falls below this.
pub const LOAD_LOW: usize = 10;

/// Distance cap used unless `with_probe_limit` says otherwise.
pub const DEFAULT_PROBE_LIMIT: u16 = u16::MAX;

#[derive(Debug)]
struct Bucket<K, V> {
    key: K,
    value: V,
    hash: u64,
    dist: u16,
}

#[inline]
fn home(hash: u64, capacity: usize) -> usize {
    (hash % capacity as u64) as usize
}

#[inline]
fn next(pos: usize, capacity: usize) -> usize {
    if pos + 1 == capacity {
        0
    } else {
        pos + 1
    }
}

type Slots<K, V, A> = AllocVec<Option<Bucket<K, V>>, A>;

fn empty_slots<K, V, A: Allocator>(capacity: usize, alloc: A) -> Slots<K, V, A> {
    let mut slots = AllocVec::with_capacity_in(capacity, alloc);
    for _ in 0..capacity {
        slots.push(None);
    }
    slots
}

/// Slot storage. Works purely on stored hashes; the only user code it runs
/// is the match predicate handed to `find`.
struct Table<K, V, A: Allocator + Clone> {
    slots: Slots<K, V, A>,
    alloc: A,
    len: usize,
    prime: usize,
    probe_limit: u16,
}

impl<K, V, A: Allocator + Clone> Table<K, V, A> {
    fn new(probe_limit: u16, alloc: A) -> Self {
        Self {
            // Zero capacity: no allocator call until the first insert.
            slots: AllocVec::new_in(alloc.clone()),
            alloc,
            len: 0,
            prime: 0,
            probe_limit,
        }
    }

    fn ensure_allocated(&mut self) {
        if self.slots.is_empty() {
            debug_assert_eq!(self.len, 0);
            self.prime = 0;
            self.slots = empty_slots(PRIMES[0], self.alloc.clone());
        }
    }

    fn find(&self, hash: u64, mut is_match: impl FnMut(&K) -> bool) -> Option<usize> {
        let capacity = self.slots.len();
        if capacity == 0 {
            return None;
        }
        let mut pos = home(hash, capacity);
        for dist in 0..=usize::from(self.probe_limit) {
            match &self.slots[pos] {
                None => return None,
                Some(b) if usize::from(b.dist) < dist => return None,
                Some(b) if b.hash == hash && is_match(&b.key) => return Some(pos),
                Some(_) => {}
            }
            pos = next(pos, capacity);
        }
        None
    }

    /// Place a bucket that is known not to be present, growing as often as
    /// the probe limit demands.
    fn place(&mut self, bucket: Bucket<K, V>) {
        let mut carried = bucket;
        while let Err(back) = self.try_place(carried) {
            carried = back;
            let grown = self.prime + 1;
            assert!(grown < PRIMES.len(), "RobinHoodMap capacity overflow");
            self.rebuild(grown);
            carried.dist = 0;
        }
    }

    /// Robin Hood insertion. On success every entry is stored; on failure
    /// the entry still in hand is returned and all others are stored.
    fn try_place(&mut self, mut incoming: Bucket<K, V>) -> Result<(), Bucket<K, V>> {
        let capacity = self.slots.len();
        let limit = self.probe_limit;
        let mut pos = home(incoming.hash, capacity);
        loop {
            let slot = &mut self.slots[pos];
            if let Some(resident) = slot {
                if resident.dist < incoming.dist {
                    mem::swap(resident, &mut incoming);
                }
            } else {
                *slot = Some(incoming);
                return Ok(());
            }
            if incoming.dist >= limit {
                return Err(incoming);
            }
            incoming.dist += 1;
            pos = next(pos, capacity);
        }
    }

    fn rebuild(&mut self, prime: usize) {
        let fresh = empty_slots(PRIMES[prime], self.alloc.clone());
        let old = mem::replace(&mut self.slots, fresh);
        self.prime = prime;
        for mut bucket in old.into_iter().flatten() {
            bucket.dist = 0;
            self.place(bucket);
        }
    }

    fn resize_to_load(&mut self) {
        let capacity = self.slots.len();
        if capacity == 0 {
            return;
        }
        let load = self.len * 100 / capacity;
        if load > LOAD_HIGH && self.prime + 1 < PRIMES.len() {
            self.rebuild(self.prime + 1);
        } else if load < LOAD_LOW && self.prime > 0 {
            self.rebuild(self.prime - 1);
        }
    }

    /// Empty `pos` and close the gap by shifting the following run back.
    fn remove_at(&mut self, pos: usize) -> Option<Bucket<K, V>> {
        let removed = self.slots[pos].take()?;
        let capacity = self.slots.len();
        let mut hole = pos;
        loop {
            let after = next(hole, capacity);
            if !matches!(&self.slots[after], Some(b) if b.dist > 0) {
                break;
            }
            let mut moved = self.slots[after].take();
            if let Some(b) = moved.as_mut() {
                b.dist -= 1;
            }
            self.slots[hole] = moved;
            hole = after;
        }
        self.len -= 1;
        Some(removed)
    }
}

/// Hash map with Robin Hood open addressing.
///
/// Strategies are expressed through the type: hashing through `S`, key
/// comparison through `K: Eq`, slot storage through the allocator `A`, and
/// releasing keys and values through `Drop`. Replaced values and removed
/// pairs are handed back to the caller instead of being dropped inside the
/// table.
pub struct RobinHoodMap<K, V, S = DefaultHashBuilder, A: Allocator + Clone = Global> {
    hasher: S,
    table: Table<K, V, A>,
    reentrancy: ReentrancyCheck,
}

impl<K, V> RobinHoodMap<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(DefaultHashBuilder::default())
    }
}

impl<K, V> Default for RobinHoodMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, A: Allocator + Clone> RobinHoodMap<K, V, DefaultHashBuilder, A> {
    /// Empty map whose slot storage comes from `alloc`.
    pub fn new_in(alloc: A) -> Self {
        Self::with_hasher_in(DefaultHashBuilder::default(), alloc)
    }
}

impl<K, V, S> RobinHoodMap<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_hasher_in(hasher, Global)
    }
}

impl<K, V, S, A: Allocator + Clone> RobinHoodMap<K, V, S, A> {
    pub fn with_hasher_in(hasher: S, alloc: A) -> Self {
        Self {
            hasher,
            table: Table::new(DEFAULT_PROBE_LIMIT, alloc),
            reentrancy: ReentrancyCheck::new(),
        }
    }

    pub fn allocator(&self) -> &A {
        &self.table.alloc
    }

    /// Cap probe distances at `limit` (at least 1). Takes effect for
    /// entries placed from now on; call it on a fresh map.
    pub fn with_probe_limit(mut self, limit: u16) -> Self {
        self.table.probe_limit = limit.max(1);
        self
    }

    pub fn len(&self) -> usize {
        self.table.len
    }

    pub fn is_empty(&self) -> bool {
        self.table.len == 0
    }

    /// Number of slots; zero until the first insert.
    pub fn capacity(&self) -> usize {
        self.table.slots.len()
    }

    /// Index into `PRIMES` of the current capacity.
    pub fn prime_level(&self) -> usize {
        self.table.prime
    }

    pub fn probe_limit(&self) -> u16 {
        self.table.probe_limit
    }

    /// Largest probe distance among occupied slots.
    pub fn max_probe_distance(&self) -> Option<u16> {
        self.table.slots.iter().flatten().map(|b| b.dist).max()
    }

    /// Drop every entry and release the slot storage.
    pub fn clear(&mut self) {
        let _g = self.reentrancy.enter("clear");
        let limit = self.table.probe_limit;
        let alloc = self.table.alloc.clone();
        self.table = Table::new(limit, alloc);
    }

    /// Scan in physical slot order. Restart by calling `iter` again.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            slots: self.table.slots.iter(),
            remaining: self.table.len,
        }
    }

    /// Scan with in-place value access. Keys and structure stay fixed.
    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            remaining: self.table.len,
            slots: self.table.slots.iter_mut(),
        }
    }

    /// First occupied slot whose stored distance disagrees with its
    /// position, as `(pos, stored distance)`.
    #[cfg(test)]
    pub(crate) fn misplaced_slot(&self) -> Option<(usize, u16)> {
        let capacity = self.table.slots.len();
        self.table.slots.iter().enumerate().find_map(|(pos, slot)| {
            let b = slot.as_ref()?;
            let expected = (pos + capacity - home(b.hash, capacity)) % capacity;
            (usize::from(b.dist) != expected).then_some((pos, b.dist))
        })
    }
}

impl<K, V, S, A> RobinHoodMap<K, V, S, A>
where
    K: Eq + Hash,
    S: BuildHasher,
    A: Allocator + Clone,
{
    /// Insert or replace. Returns the previous value for an existing key.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let _g = self.reentrancy.enter("insert");
        let hash = self.hasher.hash_one(&key);
        if let Some(b) = self
            .table
            .find(hash, |k| *k == key)
            .and_then(|pos| self.table.slots[pos].as_mut())
        {
            return Some(mem::replace(&mut b.value, value));
        }

        self.table.ensure_allocated();
        self.table.place(Bucket {
            key,
            value,
            hash,
            dist: 0,
        });
        self.table.len += 1;
        self.table.resize_to_load();
        None
    }

    pub fn get<Q>(&self, q: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        self.get_key_value(q).map(|(_, v)| v)
    }

    pub fn get_key_value<Q>(&self, q: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter("get");
        let hash = self.hasher.hash_one(q);
        let pos = self.table.find(hash, |k| k.borrow() == q)?;
        self.table.slots[pos].as_ref().map(|b| (&b.key, &b.value))
    }

    pub fn get_mut<Q>(&mut self, q: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter("get_mut");
        let hash = self.hasher.hash_one(q);
        let pos = self.table.find(hash, |k| k.borrow() == q)?;
        self.table.slots[pos].as_mut().map(|b| &mut b.value)
    }

    pub fn contains_key<Q>(&self, q: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter("contains_key");
        let hash = self.hasher.hash_one(q);
        self.table.find(hash, |k| k.borrow() == q).is_some()
    }

    /// Remove and return the pair for `q`, or `None` if it is absent.
    pub fn remove<Q>(&mut self, q: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let _g = self.reentrancy.enter("remove");
        let hash = self.hasher.hash_one(q);
        let pos = self.table.find(hash, |k| k.borrow() == q)?;
        let removed = self.table.remove_at(pos)?;
        self.table.resize_to_load();
        Some((removed.key, removed.value))
    }
}

impl<K: fmt::Debug, V: fmt::Debug, S, A: Allocator + Clone> fmt::Debug
    for RobinHoodMap<K, V, S, A>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Occupied slots in physical order.
pub struct Iter<'a, K, V> {
    slots: core::slice::Iter<'a, Option<Bucket<K, V>>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let b = self.slots.by_ref().flatten().next()?;
        self.remaining -= 1;
        Some((&b.key, &b.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

/// Occupied slots in physical order, values mutable.
pub struct IterMut<'a, K, V> {
    slots: core::slice::IterMut<'a, Option<Bucket<K, V>>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    fn next(&mut self) -> Option<Self::Item> {
        let b = self.slots.by_ref().flatten().next()?;
        self.remaining -= 1;
        Some((&b.key, &mut b.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}

impl<'a, K, V, S, A: Allocator + Clone> IntoIterator for &'a RobinHoodMap<K, V, S, A> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
