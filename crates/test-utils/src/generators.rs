//! Byte generators for DAP2 and DAP4 payloads.
//!
//! These build response bodies by hand, independently of the client's
//! decoders, so decode tests check against the wire format rather than
//! against themselves.

use bytes::Bytes;

/// Marker preceding each record of a DAP2 sequence.
pub const START_OF_SEQUENCE: [u8; 4] = [0x5a, 0x00, 0x00, 0x00];

/// Marker ending a DAP2 sequence.
pub const END_OF_SEQUENCE: [u8; 4] = [0xa5, 0x00, 0x00, 0x00];

/// DAP4 chunk flag: last chunk of the response.
pub const CHUNK_LAST: u8 = 0x01;

/// DAP4 chunk flag: the payload is an error message.
pub const CHUNK_ERROR: u8 = 0x02;

/// DAP4 chunk flag: data is little-endian.
pub const CHUNK_LITTLE_ENDIAN: u8 = 0x04;

/// Creates `n` predictable values `0.0, 1.0, 2.0, ...`.
///
/// # Example
///
/// ```
/// use test_utils::sequential_values;
///
/// let values = sequential_values(4);
/// assert_eq!(values, vec![0.0, 1.0, 2.0, 3.0]);
/// ```
pub fn sequential_values(n: usize) -> Vec<f64> {
    (0..n).map(|i| i as f64).collect()
}

// ============================================================================
// DAP2 XDR
// ============================================================================

/// XDR encoding of an unsigned 32-bit integer.
pub fn xdr_u32(value: u32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// XDR encoding of a signed 32-bit integer. Int16, UInt16 and Int8 values
/// travel in this form too.
pub fn xdr_i32(value: i32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn xdr_f32(value: f32) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

pub fn xdr_f64(value: f64) -> Vec<u8> {
    value.to_be_bytes().to_vec()
}

/// XDR string: length, bytes, zero padding to a multiple of 4.
pub fn xdr_string(value: &str) -> Vec<u8> {
    let mut out = xdr_u32(value.len() as u32);
    out.extend_from_slice(value.as_bytes());
    pad_to_4(&mut out);
    out
}

fn pad_to_4(buf: &mut Vec<u8>) {
    while buf.len() % 4 != 0 {
        buf.push(0);
    }
}

/// The doubled element count that precedes a non-string DAP2 array.
fn array_header(len: usize) -> Vec<u8> {
    let mut out = xdr_u32(len as u32);
    out.extend(xdr_u32(len as u32));
    out
}

/// A Float32 array as sent in a `.dods` body.
pub fn xdr_f32_array(values: &[f32]) -> Vec<u8> {
    let mut out = array_header(values.len());
    for v in values {
        out.extend(xdr_f32(*v));
    }
    out
}

/// A Float64 array as sent in a `.dods` body.
pub fn xdr_f64_array(values: &[f64]) -> Vec<u8> {
    let mut out = array_header(values.len());
    for v in values {
        out.extend(xdr_f64(*v));
    }
    out
}

/// An Int32 array as sent in a `.dods` body.
pub fn xdr_i32_array(values: &[i32]) -> Vec<u8> {
    let mut out = array_header(values.len());
    for v in values {
        out.extend(xdr_i32(*v));
    }
    out
}

/// A Byte array: doubled count, raw bytes, padding.
pub fn xdr_u8_array(values: &[u8]) -> Vec<u8> {
    let mut out = array_header(values.len());
    out.extend_from_slice(values);
    pad_to_4(&mut out);
    out
}

/// A String array: single count, then one XDR string per element.
pub fn xdr_string_array(values: &[&str]) -> Vec<u8> {
    let mut out = xdr_u32(values.len() as u32);
    for v in values {
        out.extend(xdr_string(v));
    }
    out
}

/// Frame a sequence: each record is preceded by the start marker and the
/// whole stream is closed by the end marker.
pub fn xdr_sequence(records: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for record in records {
        out.extend_from_slice(&START_OF_SEQUENCE);
        out.extend_from_slice(record);
    }
    out.extend_from_slice(&END_OF_SEQUENCE);
    out
}

/// A complete `.dods` body: DDS, separator, payload.
pub fn dods_response(dds: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = dds.as_bytes().to_vec();
    out.extend_from_slice(b"\nData:\n");
    out.extend_from_slice(payload);
    out
}

/// Split `data` into chunks of at most `size` bytes, as a network body
/// might be delivered.
pub fn split_into_chunks(data: &[u8], size: usize) -> Vec<Bytes> {
    data.chunks(size.max(1)).map(Bytes::copy_from_slice).collect()
}

// ============================================================================
// DAP4
// ============================================================================

/// One DAP4 chunk: big-endian header with the flags in the top byte and
/// the payload length in the low 24 bits.
pub fn dap4_chunk(payload: &[u8], flags: u8) -> Vec<u8> {
    let header = (u32::from(flags) << 24) | (payload.len() as u32 & 0x00FF_FFFF);
    let mut out = header.to_be_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

/// A variable's DAP4 payload followed by its CRC-32 checksum, written in the
/// data byte order.
pub fn dap4_variable(payload: &[u8], little_endian: bool) -> Vec<u8> {
    let crc = crc32fast::hash(payload);
    let mut out = payload.to_vec();
    if little_endian {
        out.extend_from_slice(&crc.to_le_bytes());
    } else {
        out.extend_from_slice(&crc.to_be_bytes());
    }
    out
}

/// Little-endian bytes of a Float64 array.
pub fn le_f64(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Little-endian bytes of a Float32 array.
pub fn le_f32(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// A complete `.dap` body: the DMR in its own chunk, then `data` split into
/// chunks of `chunk_size` bytes, the last one flagged. Data is little-endian.
pub fn dap_response(dmr: &str, data: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut out = dap4_chunk(dmr.as_bytes(), CHUNK_LITTLE_ENDIAN);
    let pieces: Vec<&[u8]> = if data.is_empty() {
        vec![data]
    } else {
        data.chunks(chunk_size.max(1)).collect()
    };
    let last = pieces.len() - 1;
    for (i, piece) in pieces.iter().enumerate() {
        let mut flags = CHUNK_LITTLE_ENDIAN;
        if i == last {
            flags |= CHUNK_LAST;
        }
        out.extend(dap4_chunk(piece, flags));
    }
    out
}
