//! DAP4 chunked payload decoder.

use bytes::{Bytes, BytesMut};
use tracing::debug;

use dap_common::{ArrayData, ByteOrder, DapError, DapResult, Values};

use crate::decode::stream::{find, ByteSource};
use crate::model::{BaseData, BaseVar, Dataset, Variable};

/// Flag bits in the high byte of a chunk header.
pub const CHUNK_LAST: u8 = 0x01;
pub const CHUNK_ERROR: u8 = 0x02;
pub const CHUNK_LITTLE_ENDIAN: u8 = 0x04;

const CHUNK_SIZE_MASK: u32 = 0x00FF_FFFF;
const DATASET_CLOSE: &[u8] = b"</Dataset>";

/// A parsed chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub flags: u8,
    pub size: usize,
}

impl ChunkHeader {
    pub fn parse(raw: [u8; 4]) -> Self {
        let h = u32::from_be_bytes(raw);
        Self {
            flags: (h >> 24) as u8,
            size: (h & CHUNK_SIZE_MASK) as usize,
        }
    }

    pub fn is_last(&self) -> bool {
        self.flags & CHUNK_LAST != 0
    }

    pub fn is_error(&self) -> bool {
        self.flags & CHUNK_ERROR != 0
    }

    pub fn byte_order(&self) -> ByteOrder {
        if self.flags & CHUNK_LITTLE_ENDIAN != 0 {
            ByteOrder::Little
        } else {
            ByteOrder::Big
        }
    }
}

/// Payload of every chunk concatenated, with the byte order of the first.
#[derive(Debug, Clone, PartialEq)]
pub struct Reassembled {
    pub data: Bytes,
    pub order: ByteOrder,
}

/// Concatenate chunk payloads until the last-chunk flag is seen. An error
/// chunk is surfaced as [`DapError::Remote`].
pub fn reassemble_chunks<S: ByteSource>(src: &mut S) -> DapResult<Reassembled> {
    let mut data = BytesMut::new();
    let mut order = None;
    let mut chunks = 0usize;

    loop {
        let raw = src.read(4)?;
        if raw.len() < 4 {
            return Err(DapError::decode(
                "DAP4 stream ended before the last chunk",
            ));
        }
        let header = ChunkHeader::parse([raw[0], raw[1], raw[2], raw[3]]);
        let payload = src.read_exact(header.size, "DAP4 chunk")?;
        chunks += 1;

        if header.is_error() {
            return Err(DapError::Remote(
                String::from_utf8_lossy(&payload).trim().to_string(),
            ));
        }
        order.get_or_insert(header.byte_order());
        data.extend_from_slice(&payload);

        if header.is_last() {
            break;
        }
    }

    debug!(chunks, bytes = data.len(), "Reassembled DAP4 chunks");
    Ok(Reassembled {
        data: data.freeze(),
        order: order.unwrap_or_default(),
    })
}

/// Split a `.dap` body (or file) into DMR text and the chunked payload.
///
/// The DMR is either framed by its own chunk header or, when the body starts
/// with the XML itself, terminated by `</Dataset>` and line breaks.
pub fn split_dmr(raw: &[u8]) -> DapResult<(&[u8], &[u8])> {
    if raw.first() == Some(&b'<') {
        let pos = find(raw, DATASET_CLOSE)
            .ok_or_else(|| DapError::MalformedResponse("no </Dataset> in DAP4 response".into()))?;
        let end = pos + DATASET_CLOSE.len();
        let data_start = end
            + raw[end..]
                .iter()
                .take_while(|&&b| b == b'\r' || b == b'\n')
                .count();
        return Ok((&raw[..end], &raw[data_start..]));
    }

    if raw.len() < 4 {
        return Err(DapError::MalformedResponse("DAP4 response too short".into()));
    }
    let header = ChunkHeader::parse([raw[0], raw[1], raw[2], raw[3]]);
    let end = 4 + header.size;
    if raw.len() < end {
        return Err(DapError::MalformedResponse(format!(
            "DMR chunk declares {} bytes but only {} are present",
            header.size,
            raw.len() - 4
        )));
    }
    Ok((&raw[4..end], &raw[end..]))
}

/// Decode a reassembled payload into the dataset's top-level variables, in
/// declaration order.
///
/// Each variable's payload is followed by a 4-byte checksum that is stored on
/// the variable and, with `verify_checksums`, compared with a CRC-32 of the
/// payload.
pub fn unpack_dap4_data(
    payload: &Reassembled,
    dataset: &mut Dataset,
    verify_checksums: bool,
) -> DapResult<()> {
    let buf = &payload.data[..];
    let order = payload.order;
    let mut cursor = 0usize;

    for var in &mut dataset.variables {
        let target = match var {
            Variable::Base(b) if b.synthesized => continue,
            Variable::Base(b) => b,
            Variable::Grid(g) => &mut g.array,
            other => {
                return Err(DapError::decode(format!(
                    "DAP4 decoding of {} variables is not supported ({})",
                    other.kind(),
                    other.id()
                )))
            }
        };
        cursor = decode_variable(buf, cursor, target, order, verify_checksums)?;
    }

    // Grid maps are top-level variables in a DMR; copy their values over.
    let decoded: Vec<(String, ArrayData)> = dataset
        .variables
        .iter()
        .filter_map(|v| match v {
            Variable::Base(b) => b.values().map(|d| (b.name.clone(), d.clone())),
            _ => None,
        })
        .collect();
    for var in &mut dataset.variables {
        if let Variable::Grid(g) = var {
            for map in &mut g.maps {
                if let Some((_, data)) = decoded.iter().find(|(name, _)| *name == map.name) {
                    map.data = BaseData::Values(data.clone());
                }
            }
        }
    }

    debug!(bytes = cursor, "Decoded DAP4 payload");
    Ok(())
}

/// Decode one variable starting at `start`, returning the offset after its
/// checksum.
fn decode_variable(
    buf: &[u8],
    start: usize,
    var: &mut BaseVar,
    order: ByteOrder,
    verify_checksums: bool,
) -> DapResult<usize> {
    let count = var
        .shape
        .iter()
        .try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
        .ok_or_else(|| DapError::decode(format!("shape of {} overflows", var.id)))?;

    let (values, stop) = match var.dtype.item_size() {
        Some(size) => {
            let stop = count
                .checked_mul(size)
                .and_then(|len| start.checked_add(len))
                .filter(|&stop| stop <= buf.len());
            let Some(stop) = stop else {
                let available = buf.len().saturating_sub(start) / size;
                return Err(DapError::truncated(&var.id, count, available));
            };
            (Values::from_bytes(var.dtype, &buf[start..stop], order)?, stop)
        }
        None => decode_strings(buf, start, count, order, &var.id)?,
    };

    let checksum_bytes = stop
        .checked_add(4)
        .and_then(|end| buf.get(stop..end))
        .ok_or_else(|| DapError::decode(format!("missing checksum after {}", var.id)))?;
    let raw = [
        checksum_bytes[0],
        checksum_bytes[1],
        checksum_bytes[2],
        checksum_bytes[3],
    ];
    let checksum = match order {
        ByteOrder::Big => u32::from_be_bytes(raw),
        ByteOrder::Little => u32::from_le_bytes(raw),
    };

    if verify_checksums {
        let computed = crc32fast::hash(&buf[start..stop]);
        if computed != checksum {
            return Err(DapError::decode(format!(
                "checksum mismatch for {}: expected {:08x}, computed {:08x}",
                var.id, checksum, computed
            )));
        }
    }

    var.data = BaseData::Values(ArrayData::new(values, var.shape.clone())?);
    var.checksum = Some(checksum);
    Ok(stop + 4)
}

/// DAP4 strings: an 8-byte length followed by the bytes, no padding.
fn decode_strings(
    buf: &[u8],
    start: usize,
    count: usize,
    order: ByteOrder,
    id: &str,
) -> DapResult<(Values, usize)> {
    let mut cursor = start;
    let mut out = Vec::with_capacity(count.min(buf.len().saturating_sub(start) / 8));
    for _ in 0..count {
        let len_bytes = cursor
            .checked_add(8)
            .and_then(|end| buf.get(cursor..end))
            .ok_or_else(|| DapError::truncated(id, count, out.len()))?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(len_bytes);
        let len = match order {
            ByteOrder::Big => u64::from_be_bytes(raw),
            ByteOrder::Little => u64::from_le_bytes(raw),
        };
        cursor += 8;
        // A length past the end of the buffer, or past usize, is truncation.
        let text = usize::try_from(len)
            .ok()
            .and_then(|len| cursor.checked_add(len))
            .and_then(|end| buf.get(cursor..end))
            .ok_or_else(|| DapError::truncated(id, count, out.len()))?;
        let len = text.len();
        out.push(String::from_utf8_lossy(text).into_owned());
        cursor += len;
    }
    Ok((Values::Str(out), cursor))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::stream::BytesReader;
    use dap_common::DType;

    fn chunk(flags: u8, payload: &[u8]) -> Vec<u8> {
        let header = ((flags as u32) << 24) | payload.len() as u32;
        let mut out = header.to_be_bytes().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn test_two_chunks_concatenate() {
        let mut raw = chunk(0, &[1, 2, 3, 4]);
        raw.extend(chunk(CHUNK_LAST, &[5, 6]));
        let out = reassemble_chunks(&mut BytesReader::new(raw)).unwrap();
        assert_eq!(&out.data[..], &[1, 2, 3, 4, 5, 6]);
        assert_eq!(out.order, ByteOrder::Big);
    }

    #[test]
    fn test_byte_order_from_first_chunk() {
        let mut raw = chunk(CHUNK_LITTLE_ENDIAN, &[1]);
        raw.extend(chunk(CHUNK_LAST, &[2]));
        let out = reassemble_chunks(&mut BytesReader::new(raw)).unwrap();
        assert_eq!(out.order, ByteOrder::Little);
    }

    #[test]
    fn test_error_chunk_is_remote_error() {
        let raw = chunk(CHUNK_ERROR | CHUNK_LAST, b"constraint failed");
        let err = reassemble_chunks(&mut BytesReader::new(raw)).unwrap_err();
        assert!(matches!(err, DapError::Remote(msg) if msg == "constraint failed"));
    }

    #[test]
    fn test_missing_last_chunk() {
        let raw = chunk(0, &[1, 2]);
        assert!(reassemble_chunks(&mut BytesReader::new(raw)).is_err());
    }

    #[test]
    fn test_split_dmr_with_chunk_header() {
        let dmr = b"<Dataset name=\"x\"/>\r\n";
        let mut raw = chunk(CHUNK_LITTLE_ENDIAN, dmr);
        raw.extend_from_slice(&[9, 9]);
        let (text, data) = split_dmr(&raw).unwrap();
        assert_eq!(text, dmr);
        assert_eq!(data, &[9, 9]);
    }

    #[test]
    fn test_split_dmr_by_closing_tag() {
        let raw = b"<Dataset name=\"x\">\n</Dataset>\r\n\x01\x02";
        let (text, data) = split_dmr(raw).unwrap();
        assert!(text.ends_with(b"</Dataset>"));
        assert_eq!(data, b"\x01\x02");
    }

    #[test]
    fn test_decode_with_checksum() {
        let mut ds = Dataset::new("x");
        ds.variables
            .push(Variable::Base(BaseVar::new("a", DType::Int16, vec![2])));
        ds.variables
            .push(Variable::Base(BaseVar::new("b", DType::Float32, vec![])));

        let a = [1u8, 0, 2, 0];
        let b = 1.5f32.to_le_bytes();
        let mut payload = a.to_vec();
        payload.extend_from_slice(&crc32fast::hash(&a).to_le_bytes());
        payload.extend_from_slice(&b);
        payload.extend_from_slice(&crc32fast::hash(&b).to_le_bytes());

        let reassembled = Reassembled {
            data: Bytes::from(payload),
            order: ByteOrder::Little,
        };
        unpack_dap4_data(&reassembled, &mut ds, true).unwrap();

        let a = ds.base("a").unwrap();
        assert_eq!(a.values().unwrap().values, Values::Int16(vec![1, 2]));
        assert!(a.checksum.is_some());
        assert_eq!(ds.base("b").unwrap().values().unwrap().get_f64(0), Some(1.5));
    }

    #[test]
    fn test_checksum_mismatch_when_verifying() {
        let mut ds = Dataset::new("x");
        ds.variables
            .push(Variable::Base(BaseVar::new("a", DType::UInt8, vec![2])));
        let reassembled = Reassembled {
            data: Bytes::from_static(&[1, 2, 0, 0, 0, 0]),
            order: ByteOrder::Big,
        };
        let mut copy = ds.clone();
        assert!(unpack_dap4_data(&reassembled, &mut ds, true).is_err());
        assert!(unpack_dap4_data(&reassembled, &mut copy, false).is_ok());
        assert_eq!(copy.base("a").unwrap().checksum, Some(0));
    }

    #[test]
    fn test_truncated_payload() {
        let mut ds = Dataset::new("x");
        ds.variables
            .push(Variable::Base(BaseVar::new("a", DType::Float64, vec![4])));
        let reassembled = Reassembled {
            data: Bytes::from_static(&[0; 12]),
            order: ByteOrder::Big,
        };
        let err = unpack_dap4_data(&reassembled, &mut ds, false).unwrap_err();
        assert!(err.to_string().contains("output_grid"));
    }

    #[test]
    fn test_oversized_string_length_is_truncation() {
        let mut ds = Dataset::new("x");
        ds.variables
            .push(Variable::Base(BaseVar::new("s", DType::String, vec![])));
        let mut payload = u64::MAX.to_le_bytes().to_vec();
        payload.extend_from_slice(b"abcd");
        let reassembled = Reassembled {
            data: Bytes::from(payload),
            order: ByteOrder::Little,
        };
        let err = unpack_dap4_data(&reassembled, &mut ds, false).unwrap_err();
        assert!(matches!(err, DapError::Decode(_)));
        assert!(err.to_string().contains("output_grid"));
    }

    #[test]
    fn test_oversized_element_count_is_truncation() {
        let mut ds = Dataset::new("x");
        ds.variables.push(Variable::Base(BaseVar::new(
            "a",
            DType::Float64,
            vec![usize::MAX / 2, 4],
        )));
        let reassembled = Reassembled {
            data: Bytes::from_static(&[0; 16]),
            order: ByteOrder::Big,
        };
        assert!(matches!(
            unpack_dap4_data(&reassembled, &mut ds, false),
            Err(DapError::Decode(_))
        ));
    }

    #[test]
    fn test_strings() {
        let mut ds = Dataset::new("x");
        ds.variables
            .push(Variable::Base(BaseVar::new("s", DType::String, vec![])));
        let mut payload = 2u64.to_be_bytes().to_vec();
        payload.extend_from_slice(b"hi");
        payload.extend_from_slice(&[0, 0, 0, 0]);
        let reassembled = Reassembled {
            data: Bytes::from(payload),
            order: ByteOrder::Big,
        };
        unpack_dap4_data(&reassembled, &mut ds, false).unwrap();
        assert_eq!(
            ds.base("s").unwrap().values().unwrap().values,
            Values::Str(vec!["hi".into()])
        );
    }
}
