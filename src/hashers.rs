//! Hashing strategies for `RobinHoodMap`.

use core::hash::{BuildHasherDefault, Hasher};

/// General-purpose default, shared with `hashbrown`.
pub use hashbrown::hash_map::DefaultHashBuilder;

/// Identity hasher for address-like keys.
///
/// Integers hash to themselves, so a pointer-sized key lands at
/// `address % capacity`. Prime capacities keep aligned addresses from
/// clustering on a few home slots. Arbitrary byte input is folded in so
/// the hasher stays usable for other key types.
#[derive(Clone, Copy, Debug, Default)]
pub struct AddressHasher(u64);

impl Hasher for AddressHasher {
    #[inline]
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = self.0.rotate_left(8) ^ u64::from(b);
        }
    }

    #[inline]
    fn write_u64(&mut self, n: u64) {
        self.0 = n;
    }

    #[inline]
    fn write_usize(&mut self, n: usize) {
        self.0 = n as u64;
    }
}

pub type BuildAddressHasher = BuildHasherDefault<AddressHasher>;
