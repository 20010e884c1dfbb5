//! Boundary types shared with the surrounding executor: the source row a
//! variable-size key is packed from, and the sink materialized results go to.

use std::io;

/// Occurrence counter attached to every distinct key.
pub type ElementCount = u64;

/// How a source field lays out its value bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Every non-NULL value is exactly this many bytes.
    Fixed(usize),
    /// Values carry their own length; anything past `max_len` is cut off.
    Variable { max_len: usize },
}

/// A column of the source row that may take part in a key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub index: usize,
    pub kind: FieldKind,
    pub nullable: bool,
}

impl FieldDef {
    pub fn fixed(index: usize, len: usize) -> Self {
        Self {
            index,
            kind: FieldKind::Fixed(len),
            nullable: false,
        }
    }

    pub fn variable(index: usize, max_len: usize) -> Self {
        Self {
            index,
            kind: FieldKind::Variable { max_len },
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// One argument of an aggregate such as `COUNT(DISTINCT a, 'x', b)`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AggregateArg {
    Column(FieldDef),
    Constant,
}

/// A row the descriptor can read field bytes from. `None` is SQL NULL.
pub trait SourceRecord {
    fn field(&self, index: usize) -> Option<&[u8]>;
}

impl SourceRecord for [Option<Vec<u8>>] {
    fn field(&self, index: usize) -> Option<&[u8]> {
        self.get(index).and_then(|value| value.as_deref())
    }
}

impl SourceRecord for Vec<Option<Vec<u8>>> {
    fn field(&self, index: usize) -> Option<&[u8]> {
        self.as_slice().field(index)
    }
}

/// Receives the deduplicated keys of `get`, one row at a time, in key order.
pub trait RecordSink {
    fn write_record(&mut self, key: &[u8], count: ElementCount) -> io::Result<()>;
}

impl RecordSink for Vec<Vec<u8>> {
    fn write_record(&mut self, key: &[u8], _count: ElementCount) -> io::Result<()> {
        self.push(key.to_vec());
        Ok(())
    }
}

impl RecordSink for Vec<(Vec<u8>, ElementCount)> {
    fn write_record(&mut self, key: &[u8], count: ElementCount) -> io::Result<()> {
        self.push((key.to_vec(), count));
        Ok(())
    }
}
