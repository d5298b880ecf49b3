//! DAP2 XDR payload decoder.
//!
//! The decoder walks a [`Layout`] derived from the variable tree and reads
//! from any [`ByteSource`], so the same code serves buffered `.dods` bodies,
//! files, and streamed sequences.

use tracing::debug;

use dap_common::{ArrayData, ByteOrder, DType, DapError, DapResult, Record, Value, Values};

use crate::decode::stream::{ByteSource, BytesReader};
use crate::model::{BaseVar, Dataset, Variable};

/// Marker preceding every record of a sequence. Any other 4 bytes end it.
pub const START_OF_SEQUENCE: [u8; 4] = [0x5a, 0x00, 0x00, 0x00];

/// Marker servers send after the last record of a sequence.
pub const END_OF_SEQUENCE: [u8; 4] = [0xa5, 0x00, 0x00, 0x00];

/// Wire layout of a variable, detached from the data model.
#[derive(Debug, Clone, PartialEq)]
pub enum Layout {
    Base {
        id: String,
        dtype: DType,
        shape: Vec<usize>,
    },
    Structure(Vec<Layout>),
    Sequence(Vec<Layout>),
}

impl Layout {
    pub fn of(var: &Variable) -> Layout {
        match var {
            Variable::Base(b) => Layout::of_base(b),
            Variable::Structure(s) => Layout::Structure(s.children.iter().map(Layout::of).collect()),
            Variable::Sequence(s) => Layout::Sequence(s.children.iter().map(Layout::of).collect()),
            Variable::Grid(g) => Layout::Structure(
                std::iter::once(&g.array)
                    .chain(&g.maps)
                    .map(Layout::of_base)
                    .collect(),
            ),
        }
    }

    pub fn of_base(var: &BaseVar) -> Layout {
        Layout::Base {
            id: var.id.clone(),
            dtype: var.dtype,
            shape: var.shape.clone(),
        }
    }

    /// Wire size of a record made only of fixed-width scalars, `None` when
    /// any column is an array, a string, or a constructor.
    fn fixed_scalar_size(columns: &[Layout]) -> Option<usize> {
        columns.iter().try_fold(0usize, |acc, col| match col {
            Layout::Base { dtype, shape, .. } if shape.is_empty() => {
                dtype.dap2_wire_size().map(|size| acc + size.max(4))
            }
            _ => None,
        })
    }
}

/// Decode the payload of a `.dods` response: one value per top-level
/// variable.
pub fn unpack_dap2_data<S: ByteSource>(src: &mut S, dataset: &Dataset) -> DapResult<Vec<Value>> {
    let columns: Vec<Layout> = dataset.variables.iter().map(Layout::of).collect();
    let values = unpack_children(src, &columns)?;
    debug!(variables = values.len(), "Decoded DAP2 payload");
    Ok(values)
}

/// Decode one value per column.
pub fn unpack_children<S: ByteSource>(src: &mut S, columns: &[Layout]) -> DapResult<Vec<Value>> {
    let mut out = Vec::with_capacity(columns.len());
    for col in columns {
        let value = match col {
            Layout::Sequence(children) => {
                // Nested sequences read through a trait object so the decoder
                // does not instantiate itself for ever deeper `&mut` layers.
                let inner: &mut dyn ByteSource = &mut *src;
                let records = SequenceRecords::new(inner, children.clone(), true)
                    .collect::<DapResult<Vec<Record>>>()?;
                Value::Sequence(records)
            }
            Layout::Structure(children) => Value::Structure(unpack_children(&mut *src, children)?),
            Layout::Base { id, dtype, shape } => {
                Value::Array(unpack_array(&mut *src, id, *dtype, shape)?)
            }
        };
        out.push(value);
    }
    Ok(out)
}

/// Decode one base variable.
pub fn unpack_array<S: ByteSource>(
    src: &mut S,
    id: &str,
    dtype: DType,
    shape: &[usize],
) -> DapResult<ArrayData> {
    let expected = shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| DapError::decode(format!("shape of {} overflows", id)))?;

    if shape.is_empty() {
        let values = if dtype.is_string() {
            Values::Str(vec![read_string(src, id)?])
        } else {
            read_fixed(src, id, dtype, 1)?
        };
        return ArrayData::scalar(values);
    }

    let n = src.read_u32(id)? as usize;
    if n != expected {
        return Err(DapError::truncated(id, expected, n));
    }

    let values = if dtype.is_string() {
        let strings = (0..n)
            .map(|_| read_string(src, id))
            .collect::<DapResult<Vec<String>>>()?;
        Values::Str(strings)
    } else {
        // Fixed-width arrays repeat the element count.
        src.read_exact(4, id)?;
        read_fixed(src, id, dtype, n)?
    };
    ArrayData::new(values, shape.to_vec())
}

/// Read `n` fixed-width elements in their wire type and narrow them.
fn read_fixed<S: ByteSource>(src: &mut S, id: &str, dtype: DType, n: usize) -> DapResult<Values> {
    let wire = dtype.dap2_wire_type();
    let size = wire
        .item_size()
        .ok_or_else(|| DapError::decode(format!("{} has no fixed width", dtype)))?;
    let bytes = src.read(size * n)?;
    if bytes.len() < size * n {
        return Err(DapError::truncated(id, n, bytes.len() / size));
    }
    if wire == DType::UInt8 {
        src.skip(pad4(n))?;
    }
    Values::from_bytes(wire, &bytes, ByteOrder::Big)?.cast(dtype)
}

/// Read one XDR string: length, bytes, zero padding.
fn read_string<S: ByteSource>(src: &mut S, id: &str) -> DapResult<String> {
    let k = src.read_u32(id)? as usize;
    let bytes = src.read_exact(k, id)?;
    src.skip(pad4(k))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn pad4(n: usize) -> usize {
    (4 - n % 4) % 4
}

/// Lazily decoded records of a sequence.
///
/// With `is_sequence` unset the columns describe a single sequence member,
/// and each record holds just that member's value.
pub struct SequenceRecords<S> {
    src: S,
    columns: Vec<Layout>,
    record_size: Option<usize>,
    done: bool,
}

impl<S: ByteSource> SequenceRecords<S> {
    pub fn new(src: S, columns: Vec<Layout>, is_sequence: bool) -> Self {
        let columns = if is_sequence {
            columns
        } else {
            // A member read on its own decodes exactly like a sequence of one
            // column.
            columns.into_iter().take(1).collect()
        };
        let record_size = Layout::fixed_scalar_size(&columns);
        Self {
            src,
            columns,
            record_size,
            done: false,
        }
    }

    fn next_record(&mut self) -> DapResult<Option<Record>> {
        let marker = self.src.read(4)?;
        if marker[..] != START_OF_SEQUENCE[..] {
            return Ok(None);
        }
        let record = match self.record_size {
            // All columns are fixed-width scalars: one read per record.
            Some(size) => {
                let bytes = self.src.read_exact(size, "sequence record")?;
                let mut reader = BytesReader::new(bytes);
                unpack_children(&mut reader, &self.columns)?
            }
            None => unpack_children(&mut self.src, &self.columns)?,
        };
        Ok(Some(record))
    }
}

impl<S: ByteSource> Iterator for SequenceRecords<S> {
    type Item = DapResult<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Decode the columns of a sequence from a source positioned just after the
/// `Data:` marker.
pub fn unpack_sequence<S: ByteSource>(
    src: S,
    columns: Vec<Layout>,
    is_sequence: bool,
) -> SequenceRecords<S> {
    SequenceRecords::new(src, columns, is_sequence)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(id: &str, dtype: DType, shape: Vec<usize>) -> Layout {
        Layout::Base {
            id: id.to_string(),
            dtype,
            shape,
        }
    }

    #[test]
    fn test_int32_float64_record() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&42i32.to_be_bytes());
        bytes.extend_from_slice(&2.5f64.to_be_bytes());

        let columns = vec![Layout::Structure(vec![
            base("s.a", DType::Int32, vec![]),
            base("s.b", DType::Float64, vec![]),
        ])];
        let out = unpack_children(&mut BytesReader::new(bytes), &columns).unwrap();
        let Value::Structure(members) = &out[0] else {
            panic!("expected structure")
        };
        assert_eq!(members[0].as_array().unwrap().values, Values::Int32(vec![42]));
        assert_eq!(members[1].as_array().unwrap().values, Values::Float64(vec![2.5]));
    }

    #[test]
    fn test_scalar_byte_is_padded() {
        let bytes = vec![0x07, 0, 0, 0, 0, 0, 0, 9];
        let columns = vec![base("b", DType::UInt8, vec![]), base("i", DType::Int32, vec![])];
        let mut reader = BytesReader::new(bytes);
        let out = unpack_children(&mut reader, &columns).unwrap();
        assert_eq!(out[0].as_array().unwrap().values, Values::UInt8(vec![7]));
        assert_eq!(out[1].as_array().unwrap().values, Values::Int32(vec![9]));
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_int16_travels_as_int32() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&(-3i32).to_be_bytes());
        bytes.extend_from_slice(&7i32.to_be_bytes());
        let data = unpack_array(&mut BytesReader::new(bytes), "x", DType::Int16, &[2]).unwrap();
        assert_eq!(data.values, Values::Int16(vec![-3, 7]));
    }

    #[test]
    fn test_byte_array_padding() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(&3u32.to_be_bytes());
        bytes.extend_from_slice(&[1, 2, 3, 0]);
        bytes.extend_from_slice(&5i32.to_be_bytes());
        let columns = vec![base("b", DType::UInt8, vec![3]), base("n", DType::Int32, vec![])];
        let out = unpack_children(&mut BytesReader::new(bytes), &columns).unwrap();
        assert_eq!(out[0].as_array().unwrap().values, Values::UInt8(vec![1, 2, 3]));
        assert_eq!(out[1].as_array().unwrap().values, Values::Int32(vec![5]));
    }

    #[test]
    fn test_string_array_has_single_count() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&1u32.to_be_bytes());
        bytes.extend_from_slice(b"a\0\0\0");
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(b"abcd");
        let data = unpack_array(&mut BytesReader::new(bytes), "s", DType::String, &[2]).unwrap();
        assert_eq!(data.values, Values::Str(vec!["a".into(), "abcd".into()]));
    }

    #[test]
    fn test_count_mismatch_is_truncation() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        let err = unpack_array(&mut BytesReader::new(bytes), "SST.SST", DType::Float32, &[4]).unwrap_err();
        assert!(err.to_string().contains("output_grid"));
    }

    #[test]
    fn test_short_payload_is_truncation() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&[0u8; 8]);
        let err = unpack_array(&mut BytesReader::new(bytes), "v", DType::Float32, &[4]).unwrap_err();
        assert!(matches!(err, DapError::Decode(_)));
    }

    #[test]
    fn test_sequence_records() {
        let mut bytes = Vec::new();
        for (i, f) in [(1i32, 0.5f64), (2, 1.5)] {
            bytes.extend_from_slice(&START_OF_SEQUENCE);
            bytes.extend_from_slice(&i.to_be_bytes());
            bytes.extend_from_slice(&f.to_be_bytes());
        }
        bytes.extend_from_slice(&END_OF_SEQUENCE);

        let columns = vec![base("seq.a", DType::Int32, vec![]), base("seq.b", DType::Float64, vec![])];
        let records: Vec<Record> = unpack_sequence(BytesReader::new(bytes), columns, true)
            .collect::<DapResult<_>>()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1][0].as_array().unwrap().values, Values::Int32(vec![2]));
        assert_eq!(records[1][1].as_array().unwrap().values, Values::Float64(vec![1.5]));
    }

    #[test]
    fn test_sequence_with_strings_decodes_column_by_column() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&START_OF_SEQUENCE);
        bytes.extend_from_slice(&2u32.to_be_bytes());
        bytes.extend_from_slice(b"ab\0\0");
        bytes.extend_from_slice(&9i32.to_be_bytes());
        bytes.extend_from_slice(&END_OF_SEQUENCE);

        let columns = vec![base("s.name", DType::String, vec![]), base("s.n", DType::Int32, vec![])];
        let records: Vec<Record> = unpack_sequence(BytesReader::new(bytes), columns, true)
            .collect::<DapResult<_>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0][0].as_array().unwrap().values, Values::Str(vec!["ab".into()]));
    }

    #[test]
    fn test_nested_sequence() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&START_OF_SEQUENCE);
        bytes.extend_from_slice(&1i32.to_be_bytes());
        bytes.extend_from_slice(&START_OF_SEQUENCE);
        bytes.extend_from_slice(&10i32.to_be_bytes());
        bytes.extend_from_slice(&END_OF_SEQUENCE);
        bytes.extend_from_slice(&END_OF_SEQUENCE);

        let inner = Layout::Sequence(vec![base("o.i.v", DType::Int32, vec![])]);
        let columns = vec![base("o.id", DType::Int32, vec![]), inner];
        let records: Vec<Record> = unpack_sequence(BytesReader::new(bytes), columns, true)
            .collect::<DapResult<_>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        let nested = records[0][1].as_records().unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(nested[0][0].as_array().unwrap().values, Values::Int32(vec![10]));
    }

    #[test]
    fn test_fixed_scalar_size() {
        let cols = vec![base("a", DType::UInt8, vec![]), base("b", DType::Int16, vec![])];
        assert_eq!(Layout::fixed_scalar_size(&cols), Some(8));
        let cols = vec![base("a", DType::String, vec![])];
        assert_eq!(Layout::fixed_scalar_size(&cols), None);
        let cols = vec![base("a", DType::Int32, vec![2])];
        assert_eq!(Layout::fixed_scalar_size(&cols), None);
    }
}
