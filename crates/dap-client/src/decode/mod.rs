//! Binary decoders for DAP2 and DAP4 data responses.

pub mod dap2;
pub mod dap4;
pub mod stream;

pub use dap2::{unpack_dap2_data, unpack_sequence, Layout, SequenceRecords};
pub use dap4::{reassemble_chunks, split_dmr, unpack_dap4_data, Reassembled};
pub use stream::{
    find_marker, split_dods, ByteSource, BytesReader, MarkerSearch, StreamReader, DATA_MARKER,
};
