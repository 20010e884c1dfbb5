use std::cmp::Ordering;

use super::VARIABLE_SIZED_KEYS_WITH_ORIGINAL_VALUES;
use crate::error::{Result, UniqueError};
use crate::record::{AggregateArg, FieldDef, FieldKind, SourceRecord};

/// Width of the little-endian payload length that starts every packed key.
pub const SIZE_OF_LENGTH_FIELD: usize = 4;

// Null indicator written ahead of every nullable field.
const NULL_MARKER: u8 = 0;
const VALUE_MARKER: u8 = 1;

/// Total length of the packed key at `p`, prefix included, or `None` when
/// `p` is too short to hold the prefix.
#[inline]
pub fn read_packed_length(p: &[u8]) -> Option<usize> {
    let raw: [u8; SIZE_OF_LENGTH_FIELD] = p.get(..SIZE_OF_LENGTH_FIELD)?.try_into().ok()?;
    Some(SIZE_OF_LENGTH_FIELD + u32::from_le_bytes(raw) as usize)
}

#[inline]
fn store_packed_length(p: &mut [u8], total: usize) {
    let payload = (total - SIZE_OF_LENGTH_FIELD) as u32;
    p[..SIZE_OF_LENGTH_FIELD].copy_from_slice(&payload.to_le_bytes());
}

/// One key part: the source field and the most bytes it can pack into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SortField {
    pub field: FieldDef,
    pub length: usize,
}

impl SortField {
    fn new(field: FieldDef) -> Self {
        let value_len = match field.kind {
            FieldKind::Fixed(len) => len,
            FieldKind::Variable { max_len } => SIZE_OF_LENGTH_FIELD + max_len,
        };
        Self {
            field,
            length: value_len + usize::from(field.nullable),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SetupMode {
    AggregateArgs { arg_count: usize },
    SingleField,
}

/// The ordered key parts bound by `setup`.
#[derive(Clone, Debug)]
pub struct SortKeys {
    fields: Vec<SortField>,
    mode: SetupMode,
}

impl SortKeys {
    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    pub fn is_single_arg(&self) -> bool {
        self.fields.len() == 1
    }

    pub fn is_aggregate(&self) -> bool {
        matches!(self.mode, SetupMode::AggregateArgs { .. })
    }

    /// Number of aggregate arguments, constants included.
    pub fn arg_count(&self) -> usize {
        match self.mode {
            SetupMode::AggregateArgs { arg_count } => arg_count,
            SetupMode::SingleField => 1,
        }
    }

    fn max_packed_length(&self) -> usize {
        SIZE_OF_LENGTH_FIELD + self.fields.iter().map(|f| f.length).sum::<usize>()
    }
}

/// Keys packed from a source row: `[payload len: u32 LE][field parts...]`.
///
/// Owns one scratch buffer that every `make_packed_record` call overwrites,
/// so only one packed key is alive per descriptor at a time.
#[derive(Clone, Debug)]
pub struct VariableSizeKeys {
    key_length: usize,
    flags: u32,
    packed_rec: Vec<u8>,
    sort_keys: Option<SortKeys>,
}

impl VariableSizeKeys {
    pub fn new(key_length: usize) -> Self {
        Self {
            key_length,
            flags: 1 << VARIABLE_SIZED_KEYS_WITH_ORIGINAL_VALUES,
            packed_rec: Vec::new(),
            sort_keys: None,
        }
    }

    pub fn key_length(&self) -> usize {
        self.key_length
    }

    pub(super) fn flags(&self) -> u32 {
        self.flags
    }

    pub fn sort_keys(&self) -> Option<&SortKeys> {
        self.sort_keys.as_ref()
    }

    /// The most recently packed key, empty before the first pack.
    pub fn packed_record(&self) -> &[u8] {
        &self.packed_rec
    }

    #[inline]
    pub fn get_length_of_key(&self, key: &[u8]) -> usize {
        read_packed_length(key).unwrap_or(SIZE_OF_LENGTH_FIELD)
    }

    pub fn setup_for_aggregate(
        &mut self,
        args: &[AggregateArg],
        non_const_args: usize,
        arg_count: usize,
    ) -> Result<()> {
        if args.len() != arg_count {
            return Err(UniqueError::Setup(format!(
                "aggregate declares {arg_count} arguments but {} were given",
                args.len()
            )));
        }
        let fields: Vec<SortField> = args
            .iter()
            .filter_map(|arg| match arg {
                AggregateArg::Column(field) => Some(SortField::new(*field)),
                AggregateArg::Constant => None,
            })
            .collect();
        if fields.len() != non_const_args {
            return Err(UniqueError::Setup(format!(
                "aggregate declares {non_const_args} non-constant arguments but has {}",
                fields.len()
            )));
        }
        self.bind(SortKeys {
            fields,
            mode: SetupMode::AggregateArgs { arg_count },
        })
    }

    pub fn setup_for_field(&mut self, field: &FieldDef) -> Result<()> {
        self.bind(SortKeys {
            fields: vec![SortField::new(*field)],
            mode: SetupMode::SingleField,
        })
    }

    fn bind(&mut self, sort_keys: SortKeys) -> Result<()> {
        if self.sort_keys.is_some() {
            return Err(UniqueError::Setup("descriptor is already set up".to_string()));
        }
        if sort_keys.fields.is_empty() {
            return Err(UniqueError::Setup("no source field takes part in the key".to_string()));
        }
        let max_len = sort_keys.max_packed_length();
        self.packed_rec.try_reserve_exact(max_len)?;
        self.key_length = max_len;
        self.sort_keys = Some(sort_keys);
        Ok(())
    }

    /// Packs the bound fields of `record`. Returns the packed length including
    /// the prefix, or 0 when `exclude_nulls` is set and a field is NULL.
    pub fn make_packed_record<R>(&mut self, record: &R, exclude_nulls: bool) -> Result<usize>
    where
        R: SourceRecord + ?Sized,
    {
        let sort_keys = self
            .sort_keys
            .as_ref()
            .ok_or_else(|| UniqueError::Setup("make_packed_record called before setup".to_string()))?;

        let to = &mut self.packed_rec;
        to.clear();
        to.extend_from_slice(&[0u8; SIZE_OF_LENGTH_FIELD]);

        for sort_field in &sort_keys.fields {
            let field = sort_field.field;
            let value = record.field(field.index);
            if field.nullable {
                match value {
                    None if exclude_nulls => {
                        to.clear();
                        return Ok(0);
                    }
                    None => {
                        to.push(NULL_MARKER);
                        continue;
                    }
                    Some(_) => to.push(VALUE_MARKER),
                }
            }
            let value = value.ok_or_else(|| {
                UniqueError::Setup(format!("NULL in non-nullable field {}", field.index))
            })?;
            match field.kind {
                FieldKind::Fixed(len) => {
                    if value.len() != len {
                        return Err(UniqueError::Setup(format!(
                            "field {} holds {} bytes, declared {len}",
                            field.index,
                            value.len()
                        )));
                    }
                    to.extend_from_slice(value);
                }
                FieldKind::Variable { max_len } => {
                    let value = &value[..value.len().min(max_len)];
                    to.extend_from_slice(&(value.len() as u32).to_le_bytes());
                    to.extend_from_slice(value);
                }
            }
        }

        let total = to.len();
        store_packed_length(to, total);
        Ok(total)
    }

    pub fn compare_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        let (pa, pb) = (payload(a), payload(b));
        let Some(sort_keys) = &self.sort_keys else {
            return pa.cmp(pb);
        };

        let (mut ia, mut ib) = (0, 0);
        for sort_field in &sort_keys.fields {
            let (va, next_a) = decode_field(pa, ia, &sort_field.field);
            let (vb, next_b) = decode_field(pb, ib, &sort_field.field);
            match compare_values(va, vb) {
                Ordering::Equal => {}
                other => return other,
            }
            ia = next_a;
            ib = next_b;
        }
        Ordering::Equal
    }

    /// Field values of a packed key in setup order; `None` is NULL.
    pub fn unpack_key<'a>(&self, key: &'a [u8]) -> Vec<Option<&'a [u8]>> {
        let Some(sort_keys) = &self.sort_keys else {
            return Vec::new();
        };
        let buf = payload(key);
        let mut pos = 0;
        let mut values = Vec::with_capacity(sort_keys.fields.len());
        for sort_field in &sort_keys.fields {
            let (value, next) = decode_field(buf, pos, &sort_field.field);
            values.push(value);
            pos = next;
        }
        values
    }

    /// Comparison for keys made of exactly one source field.
    pub fn compare_keys_for_single_arg(&self, a: &[u8], b: &[u8]) -> Ordering {
        match &self.sort_keys {
            Some(sort_keys) if sort_keys.is_single_arg() => {
                let field = &sort_keys.fields[0].field;
                compare_values(
                    decode_field(payload(a), 0, field).0,
                    decode_field(payload(b), 0, field).0,
                )
            }
            _ => self.compare_keys(a, b),
        }
    }
}

fn payload(key: &[u8]) -> &[u8] {
    let end = read_packed_length(key).unwrap_or(SIZE_OF_LENGTH_FIELD).min(key.len());
    key.get(SIZE_OF_LENGTH_FIELD..end).unwrap_or(&[])
}

/// Decodes the field starting at `pos`; `None` is NULL. Returns the position
/// right after the field. Truncated input decodes as whatever bytes remain.
fn decode_field<'a>(buf: &'a [u8], mut pos: usize, field: &FieldDef) -> (Option<&'a [u8]>, usize) {
    if field.nullable {
        let marker = buf.get(pos).copied().unwrap_or(NULL_MARKER);
        pos += 1;
        if marker == NULL_MARKER {
            return (None, pos);
        }
    }
    let (start, len) = match field.kind {
        FieldKind::Fixed(len) => (pos, len),
        FieldKind::Variable { .. } => {
            let len = buf
                .get(pos..pos + SIZE_OF_LENGTH_FIELD)
                .and_then(|raw| raw.try_into().ok())
                .map(|raw: [u8; SIZE_OF_LENGTH_FIELD]| u32::from_le_bytes(raw) as usize)
                .unwrap_or(0);
            (pos + SIZE_OF_LENGTH_FIELD, len)
        }
    };
    let start = start.min(buf.len());
    let end = (start + len).min(buf.len());
    (Some(&buf[start..end]), start + len)
}

fn compare_values(a: Option<&[u8]>, b: Option<&[u8]>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => a.cmp(b),
    }
}
