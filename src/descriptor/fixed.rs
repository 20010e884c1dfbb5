use std::cmp::Ordering;

use super::FIXED_SIZED_KEYS;

/// Keys that all occupy `key_length` bytes.
#[derive(Clone, Debug)]
pub struct FixedSizeKeys {
    key_length: usize,
    flags: u32,
}

impl FixedSizeKeys {
    pub fn new(key_length: usize) -> Self {
        Self {
            key_length,
            flags: 1 << FIXED_SIZED_KEYS,
        }
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    pub(super) fn flags(&self) -> u32 {
        self.flags
    }

    #[inline]
    pub fn get_length_of_key(&self, _key: &[u8]) -> usize {
        self.key_length
    }

    pub fn compare_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        let a = &a[..self.key_length.min(a.len())];
        let b = &b[..self.key_length.min(b.len())];
        a.cmp(b)
    }
}
