//! Key descriptors: how long a key is, how two keys compare, and for
//! variable-size keys how a source row is packed into one.

mod fixed;
mod variable;

use std::cmp::Ordering;

pub use fixed::FixedSizeKeys;
pub use variable::{SIZE_OF_LENGTH_FIELD, SortField, SortKeys, VariableSizeKeys, read_packed_length};

use crate::error::Result;
use crate::record::{AggregateArg, FieldDef, SourceRecord};

// Bit positions inside a descriptor's `flags`.
pub(crate) const FIXED_SIZED_KEYS: u32 = 0;
pub(crate) const VARIABLE_SIZED_KEYS_WITH_ORIGINAL_VALUES: u32 = 1;

/// The two key layouts the engine understands.
#[derive(Clone, Debug)]
pub enum Descriptor {
    Fixed(FixedSizeKeys),
    Variable(VariableSizeKeys),
}

impl Descriptor {
    pub fn fixed(key_length: usize) -> Self {
        Descriptor::Fixed(FixedSizeKeys::new(key_length))
    }

    pub fn variable(key_length: usize) -> Self {
        Descriptor::Variable(VariableSizeKeys::new(key_length))
    }

    /// Nominal key length. For variable keys this is the largest packed key
    /// once `setup` has run.
    pub fn key_length(&self) -> usize {
        match self {
            Descriptor::Fixed(d) => d.key_length(),
            Descriptor::Variable(d) => d.key_length(),
        }
    }

    fn flags(&self) -> u32 {
        match self {
            Descriptor::Fixed(d) => d.flags(),
            Descriptor::Variable(d) => d.flags(),
        }
    }

    pub fn is_variable_sized(&self) -> bool {
        self.flags() & (1 << VARIABLE_SIZED_KEYS_WITH_ORIGINAL_VALUES) != 0
    }

    /// Bytes the key starting at `key` occupies, length prefix included.
    #[inline]
    pub fn get_length_of_key(&self, key: &[u8]) -> usize {
        match self {
            Descriptor::Fixed(d) => d.get_length_of_key(key),
            Descriptor::Variable(d) => d.get_length_of_key(key),
        }
    }

    pub fn compare_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Descriptor::Fixed(d) => d.compare_keys(a, b),
            Descriptor::Variable(d) => d.compare_keys(a, b),
        }
    }

    pub fn compare_keys_for_single_arg(&self, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            Descriptor::Fixed(d) => d.compare_keys(a, b),
            Descriptor::Variable(d) => d.compare_keys_for_single_arg(a, b),
        }
    }

    /// Binds the non-constant arguments of an aggregate. A no-op for fixed keys.
    pub fn setup_for_aggregate(
        &mut self,
        args: &[AggregateArg],
        non_const_args: usize,
        arg_count: usize,
    ) -> Result<()> {
        match self {
            Descriptor::Fixed(_) => Ok(()),
            Descriptor::Variable(d) => d.setup_for_aggregate(args, non_const_args, arg_count),
        }
    }

    /// Binds a single source field. A no-op for fixed keys.
    pub fn setup_for_field(&mut self, field: &FieldDef) -> Result<()> {
        match self {
            Descriptor::Fixed(_) => Ok(()),
            Descriptor::Variable(d) => d.setup_for_field(field),
        }
    }

    /// Packs `record` into the scratch buffer and returns the packed length,
    /// or 0 when nothing was packed (fixed keys, or a rejected NULL).
    pub fn make_packed_record<R>(&mut self, record: &R, exclude_nulls: bool) -> Result<usize>
    where
        R: SourceRecord + ?Sized,
    {
        match self {
            Descriptor::Fixed(_) => Ok(0),
            Descriptor::Variable(d) => d.make_packed_record(record, exclude_nulls),
        }
    }

    pub fn packed_record(&self) -> Option<&[u8]> {
        match self {
            Descriptor::Fixed(_) => None,
            Descriptor::Variable(d) => Some(d.packed_record()),
        }
    }

    /// Field values of `key`. A fixed key is a single field.
    pub fn unpack_key<'a>(&self, key: &'a [u8]) -> Vec<Option<&'a [u8]>> {
        match self {
            Descriptor::Fixed(d) => vec![Some(&key[..d.key_length().min(key.len())])],
            Descriptor::Variable(d) => d.unpack_key(key),
        }
    }

    pub fn sort_keys(&self) -> Option<&SortKeys> {
        match self {
            Descriptor::Fixed(_) => None,
            Descriptor::Variable(d) => d.sort_keys(),
        }
    }

    pub fn sortorder(&self) -> Option<&[SortField]> {
        self.sort_keys().map(SortKeys::fields)
    }
}

/// Ordering used by the key store and the merge. Any fixed argument the
/// ordering needs is captured by a `Custom` closure.
pub enum KeyComparator {
    /// Plain byte order over the whole key.
    Bytes,
    /// `Descriptor::compare_keys`.
    Descriptor,
    /// `Descriptor::compare_keys_for_single_arg`.
    DescriptorSingleArg,
    Custom(Box<dyn Fn(&[u8], &[u8]) -> Ordering>),
}

impl KeyComparator {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&[u8], &[u8]) -> Ordering + 'static,
    {
        KeyComparator::Custom(Box::new(f))
    }

    #[inline]
    pub fn compare(&self, descriptor: &Descriptor, a: &[u8], b: &[u8]) -> Ordering {
        match self {
            KeyComparator::Bytes => a.cmp(b),
            KeyComparator::Descriptor => descriptor.compare_keys(a, b),
            KeyComparator::DescriptorSingleArg => descriptor.compare_keys_for_single_arg(a, b),
            KeyComparator::Custom(f) => f(a, b),
        }
    }
}

impl std::fmt::Debug for KeyComparator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeyComparator::Bytes => write!(f, "Bytes"),
            KeyComparator::Descriptor => write!(f, "Descriptor"),
            KeyComparator::DescriptorSingleArg => write!(f, "DescriptorSingleArg"),
            KeyComparator::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}
