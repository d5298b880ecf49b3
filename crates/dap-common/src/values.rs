//! Typed value buffers for decoded variables.

use serde::Serialize;

use crate::dtype::{ByteOrder, DType};
use crate::error::{DapError, DapResult};
use crate::slice::Selector;

/// A flat, typed vector of elements.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Values {
    Int8(Vec<i8>),
    UInt8(Vec<u8>),
    Int16(Vec<i16>),
    UInt16(Vec<u16>),
    Int32(Vec<i32>),
    UInt32(Vec<u32>),
    Int64(Vec<i64>),
    UInt64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Str(Vec<String>),
}

/// Apply `$body` to the inner vector of every variant, rebuilding the same
/// variant from the result.
macro_rules! map_values {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            Values::Int8($v) => Values::Int8($body),
            Values::UInt8($v) => Values::UInt8($body),
            Values::Int16($v) => Values::Int16($body),
            Values::UInt16($v) => Values::UInt16($body),
            Values::Int32($v) => Values::Int32($body),
            Values::UInt32($v) => Values::UInt32($body),
            Values::Int64($v) => Values::Int64($body),
            Values::UInt64($v) => Values::UInt64($body),
            Values::Float32($v) => Values::Float32($body),
            Values::Float64($v) => Values::Float64($body),
            Values::Str($v) => Values::Str($body),
        }
    };
}

/// Apply `$body` to the inner vector of every variant.
macro_rules! with_values {
    ($values:expr, $v:ident => $body:expr) => {
        match $values {
            Values::Int8($v) => $body,
            Values::UInt8($v) => $body,
            Values::Int16($v) => $body,
            Values::UInt16($v) => $body,
            Values::Int32($v) => $body,
            Values::UInt32($v) => $body,
            Values::Int64($v) => $body,
            Values::UInt64($v) => $body,
            Values::Float32($v) => $body,
            Values::Float64($v) => $body,
            Values::Str($v) => $body,
        }
    };
}

macro_rules! decode_fixed {
    ($bytes:expr, $order:expr, $t:ty) => {{
        const N: usize = std::mem::size_of::<$t>();
        $bytes
            .chunks_exact(N)
            .map(|chunk| {
                let mut raw = [0u8; N];
                raw.copy_from_slice(chunk);
                match $order {
                    ByteOrder::Big => <$t>::from_be_bytes(raw),
                    ByteOrder::Little => <$t>::from_le_bytes(raw),
                }
            })
            .collect::<Vec<$t>>()
    }};
}

macro_rules! cast_numeric {
    ($values:expr, $t:ty) => {
        match $values {
            Values::Int8(v) => v.iter().map(|&x| x as $t).collect::<Vec<$t>>(),
            Values::UInt8(v) => v.iter().map(|&x| x as $t).collect(),
            Values::Int16(v) => v.iter().map(|&x| x as $t).collect(),
            Values::UInt16(v) => v.iter().map(|&x| x as $t).collect(),
            Values::Int32(v) => v.iter().map(|&x| x as $t).collect(),
            Values::UInt32(v) => v.iter().map(|&x| x as $t).collect(),
            Values::Int64(v) => v.iter().map(|&x| x as $t).collect(),
            Values::UInt64(v) => v.iter().map(|&x| x as $t).collect(),
            Values::Float32(v) => v.iter().map(|&x| x as $t).collect(),
            Values::Float64(v) => v.iter().map(|&x| x as $t).collect(),
            Values::Str(_) => unreachable!("string values are rejected before casting"),
        }
    };
}

impl Values {
    /// An empty buffer of the given type.
    pub fn empty(dtype: DType) -> Self {
        match dtype {
            DType::Int8 => Values::Int8(Vec::new()),
            DType::UInt8 => Values::UInt8(Vec::new()),
            DType::Int16 => Values::Int16(Vec::new()),
            DType::UInt16 => Values::UInt16(Vec::new()),
            DType::Int32 => Values::Int32(Vec::new()),
            DType::UInt32 => Values::UInt32(Vec::new()),
            DType::Int64 => Values::Int64(Vec::new()),
            DType::UInt64 => Values::UInt64(Vec::new()),
            DType::Float32 => Values::Float32(Vec::new()),
            DType::Float64 => Values::Float64(Vec::new()),
            DType::String => Values::Str(Vec::new()),
        }
    }

    /// Decode a packed buffer of fixed-width elements.
    pub fn from_bytes(dtype: DType, bytes: &[u8], order: ByteOrder) -> DapResult<Self> {
        let size = dtype
            .item_size()
            .ok_or_else(|| DapError::decode("strings have no fixed-width encoding"))?;
        if bytes.len() % size != 0 {
            return Err(DapError::decode(format!(
                "{} bytes is not a whole number of {} elements",
                bytes.len(),
                dtype
            )));
        }
        let values = match dtype {
            DType::Int8 => Values::Int8(bytes.iter().map(|&b| b as i8).collect()),
            DType::UInt8 => Values::UInt8(bytes.to_vec()),
            DType::Int16 => Values::Int16(decode_fixed!(bytes, order, i16)),
            DType::UInt16 => Values::UInt16(decode_fixed!(bytes, order, u16)),
            DType::Int32 => Values::Int32(decode_fixed!(bytes, order, i32)),
            DType::UInt32 => Values::UInt32(decode_fixed!(bytes, order, u32)),
            DType::Int64 => Values::Int64(decode_fixed!(bytes, order, i64)),
            DType::UInt64 => Values::UInt64(decode_fixed!(bytes, order, u64)),
            DType::Float32 => Values::Float32(decode_fixed!(bytes, order, f32)),
            DType::Float64 => Values::Float64(decode_fixed!(bytes, order, f64)),
            DType::String => unreachable!("item_size is None for strings"),
        };
        Ok(values)
    }

    pub fn dtype(&self) -> DType {
        match self {
            Values::Int8(_) => DType::Int8,
            Values::UInt8(_) => DType::UInt8,
            Values::Int16(_) => DType::Int16,
            Values::UInt16(_) => DType::UInt16,
            Values::Int32(_) => DType::Int32,
            Values::UInt32(_) => DType::UInt32,
            Values::Int64(_) => DType::Int64,
            Values::UInt64(_) => DType::UInt64,
            Values::Float32(_) => DType::Float32,
            Values::Float64(_) => DType::Float64,
            Values::Str(_) => DType::String,
        }
    }

    pub fn len(&self) -> usize {
        with_values!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element `i` as a float, `None` for strings or out of range.
    pub fn get_f64(&self, i: usize) -> Option<f64> {
        match self {
            Values::Int8(v) => v.get(i).map(|&x| x as f64),
            Values::UInt8(v) => v.get(i).map(|&x| x as f64),
            Values::Int16(v) => v.get(i).map(|&x| x as f64),
            Values::UInt16(v) => v.get(i).map(|&x| x as f64),
            Values::Int32(v) => v.get(i).map(|&x| x as f64),
            Values::UInt32(v) => v.get(i).map(|&x| x as f64),
            Values::Int64(v) => v.get(i).map(|&x| x as f64),
            Values::UInt64(v) => v.get(i).map(|&x| x as f64),
            Values::Float32(v) => v.get(i).map(|&x| x as f64),
            Values::Float64(v) => v.get(i).copied(),
            Values::Str(_) => None,
        }
    }

    pub fn get_str(&self, i: usize) -> Option<&str> {
        match self {
            Values::Str(v) => v.get(i).map(String::as_str),
            _ => None,
        }
    }

    /// Gather the elements at `indices` into a new buffer.
    pub fn take(&self, indices: &[usize]) -> DapResult<Self> {
        let len = self.len();
        if let Some(&bad) = indices.iter().find(|&&i| i >= len) {
            return Err(DapError::index(format!(
                "index {} is out of bounds for {} elements",
                bad, len
            )));
        }
        Ok(map_values!(self, v => indices.iter().map(|&i| v[i].clone()).collect()))
    }

    /// Append `other`, which must hold the same element type.
    pub fn extend(&mut self, other: Values) -> DapResult<()> {
        match (self, other) {
            (Values::Int8(a), Values::Int8(b)) => a.extend(b),
            (Values::UInt8(a), Values::UInt8(b)) => a.extend(b),
            (Values::Int16(a), Values::Int16(b)) => a.extend(b),
            (Values::UInt16(a), Values::UInt16(b)) => a.extend(b),
            (Values::Int32(a), Values::Int32(b)) => a.extend(b),
            (Values::UInt32(a), Values::UInt32(b)) => a.extend(b),
            (Values::Int64(a), Values::Int64(b)) => a.extend(b),
            (Values::UInt64(a), Values::UInt64(b)) => a.extend(b),
            (Values::Float32(a), Values::Float32(b)) => a.extend(b),
            (Values::Float64(a), Values::Float64(b)) => a.extend(b),
            (Values::Str(a), Values::Str(b)) => a.extend(b),
            (a, b) => {
                return Err(DapError::decode(format!(
                    "cannot append {} values to {} values",
                    b.dtype(),
                    a.dtype()
                )))
            }
        }
        Ok(())
    }

    /// Convert numeric values to another numeric type with `as` semantics.
    /// Used to narrow the widened integers of the DAP2 wire.
    pub fn cast(self, dtype: DType) -> DapResult<Self> {
        if self.dtype() == dtype {
            return Ok(self);
        }
        if self.dtype().is_string() || dtype.is_string() {
            return Err(DapError::decode(format!(
                "cannot convert {} values to {}",
                self.dtype(),
                dtype
            )));
        }
        let values = match dtype {
            DType::Int8 => Values::Int8(cast_numeric!(&self, i8)),
            DType::UInt8 => Values::UInt8(cast_numeric!(&self, u8)),
            DType::Int16 => Values::Int16(cast_numeric!(&self, i16)),
            DType::UInt16 => Values::UInt16(cast_numeric!(&self, u16)),
            DType::Int32 => Values::Int32(cast_numeric!(&self, i32)),
            DType::UInt32 => Values::UInt32(cast_numeric!(&self, u32)),
            DType::Int64 => Values::Int64(cast_numeric!(&self, i64)),
            DType::UInt64 => Values::UInt64(cast_numeric!(&self, u64)),
            DType::Float32 => Values::Float32(cast_numeric!(&self, f32)),
            DType::Float64 => Values::Float64(cast_numeric!(&self, f64)),
            DType::String => unreachable!("string targets are rejected above"),
        };
        Ok(values)
    }
}

/// A typed n-dimensional array in row-major order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArrayData {
    pub values: Values,
    pub shape: Vec<usize>,
}

impl ArrayData {
    pub fn new(values: Values, shape: Vec<usize>) -> DapResult<Self> {
        let expected: usize = shape.iter().product();
        if values.len() != expected {
            return Err(DapError::decode(format!(
                "{} values do not fill shape {:?}",
                values.len(),
                shape
            )));
        }
        Ok(Self { values, shape })
    }

    /// A zero-dimensional array holding one value.
    pub fn scalar(values: Values) -> DapResult<Self> {
        Self::new(values, Vec::new())
    }

    /// A one-dimensional array over all of `values`.
    pub fn vector(values: Values) -> Self {
        let shape = vec![values.len()];
        Self { values, shape }
    }

    pub fn dtype(&self) -> DType {
        self.values.dtype()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    pub fn get_f64(&self, flat: usize) -> Option<f64> {
        self.values.get_f64(flat)
    }

    /// Element at a multi-dimensional position as a float.
    pub fn at_f64(&self, position: &[usize]) -> Option<f64> {
        if position.len() != self.shape.len() {
            return None;
        }
        let mut flat = 0;
        for (&p, &dim) in position.iter().zip(&self.shape) {
            if p >= dim {
                return None;
            }
            flat = flat * dim + p;
        }
        self.values.get_f64(flat)
    }

    /// Apply normalized selectors locally. Axes selected with a point are
    /// dropped from the result, matching how remote reads are reduced.
    pub fn select(&self, selectors: &[Selector]) -> DapResult<ArrayData> {
        if selectors.len() != self.shape.len() {
            return Err(DapError::index(format!(
                "{} selectors given for an array of {} dimension(s)",
                selectors.len(),
                self.shape.len()
            )));
        }

        let per_axis: Vec<Vec<usize>> = selectors
            .iter()
            .zip(&self.shape)
            .map(|(sel, &dim)| sel.as_span().indices(dim).collect())
            .collect();

        let mut strides = vec![1usize; self.shape.len()];
        for axis in (0..self.shape.len().saturating_sub(1)).rev() {
            strides[axis] = strides[axis + 1] * self.shape[axis + 1];
        }

        let mut flat = vec![0usize];
        for (axis, positions) in per_axis.iter().enumerate() {
            let stride = strides[axis];
            flat = flat
                .iter()
                .flat_map(|&base| positions.iter().map(move |&p| base + p * stride))
                .collect();
        }
        if per_axis.iter().any(Vec::is_empty) {
            flat.clear();
        }

        let values = self.values.take(&flat)?;
        let shape = per_axis
            .iter()
            .zip(selectors)
            .filter(|(_, sel)| !sel.is_point())
            .map(|(positions, _)| positions.len())
            .collect();
        Ok(ArrayData { values, shape })
    }

    /// Remove the given axes, each of which must have length 1.
    pub fn squeeze_axes(mut self, axes: &[usize]) -> DapResult<ArrayData> {
        for &axis in axes {
            match self.shape.get(axis) {
                Some(1) => {}
                Some(&n) => {
                    return Err(DapError::index(format!(
                        "cannot squeeze axis {} of length {}",
                        axis, n
                    )))
                }
                None => return Err(DapError::index(format!("no axis {}", axis))),
            }
        }
        self.shape = self
            .shape
            .iter()
            .enumerate()
            .filter(|(axis, _)| !axes.contains(axis))
            .map(|(_, &n)| n)
            .collect();
        Ok(self)
    }
}

/// One decoded record of a structure or sequence.
pub type Record = Vec<Value>;

/// A decoded DAP2 payload, mirroring the variable tree it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Array(ArrayData),
    Structure(Vec<Value>),
    Sequence(Vec<Record>),
}

impl Value {
    pub fn as_array(&self) -> Option<&ArrayData> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn into_array(self) -> Option<ArrayData> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_records(&self) -> Option<&[Record]> {
        match self {
            Value::Sequence(r) => Some(r),
            _ => None,
        }
    }
}
