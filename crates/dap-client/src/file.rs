//! Opening saved DAP responses from disk.

use std::fs;
use std::path::Path;

use bytes::Bytes;
use tracing::debug;

use dap_common::{DapError, DapResult};

use crate::decode::{
    reassemble_chunks, split_dmr, split_dods, unpack_dap2_data, unpack_dap4_data, BytesReader,
};
use crate::model::Dataset;
use crate::net::decode_text;
use crate::parsers::{add_attributes, parse_das, parse_dds, parse_dmr};

/// Charset assumed for metadata stored in files.
const FILE_CHARSET: &str = "utf-8";

/// Open a `.dods`, `.dap`, `.dmr` or `.dds` file, dispatching on the
/// extension. `das_path` attaches attributes to DAP2 files.
pub fn open_file(path: impl AsRef<Path>, das_path: Option<&Path>) -> DapResult<Dataset> {
    let path = path.as_ref();
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    let dataset = match extension.as_str() {
        "dods" => open_dods_file(path, das_path)?,
        "dap" => open_dap_file(path, false)?,
        "dmr" => open_dmr_file(path)?,
        "dds" => open_dds_file(path, das_path)?,
        _ => return Err(DapError::UnsupportedExtension(path.display().to_string())),
    };
    debug!(path = %path.display(), variables = dataset.variables.len(), "Opened file");
    Ok(dataset)
}

/// A saved DAP2 data response: DDS, `Data:` separator, XDR payload.
pub fn open_dods_file(path: &Path, das_path: Option<&Path>) -> DapResult<Dataset> {
    let raw = Bytes::from(fs::read(path)?);
    let (dds, xdr) = split_dods(&raw)?;
    let mut dataset = parse_dds(&decode_text(dds, FILE_CHARSET))?;
    let values = unpack_dap2_data(&mut BytesReader::new(raw.slice_ref(xdr)), &dataset)?;
    dataset.set_values(values)?;
    attach_das(&mut dataset, das_path)?;
    Ok(dataset)
}

/// A saved DAP4 data response: DMR followed by the chunked payload.
pub fn open_dap_file(path: &Path, verify_checksums: bool) -> DapResult<Dataset> {
    let raw = Bytes::from(fs::read(path)?);
    let (dmr, chunks) = split_dmr(&raw)?;
    let mut dataset = parse_dmr(&decode_text(dmr, FILE_CHARSET))?;
    let payload = reassemble_chunks(&mut BytesReader::new(raw.slice_ref(chunks)))?;
    unpack_dap4_data(&payload, &mut dataset, verify_checksums)?;
    Ok(dataset)
}

/// A DMR document, bare or length-prefixed. Variables carry no data.
pub fn open_dmr_file(path: &Path) -> DapResult<Dataset> {
    let raw = fs::read(path)?;
    let (dmr, _) = split_dmr(&raw)?;
    parse_dmr(&decode_text(dmr, FILE_CHARSET))
}

/// A DDS document. Variables carry no data.
pub fn open_dds_file(path: &Path, das_path: Option<&Path>) -> DapResult<Dataset> {
    let mut dataset = parse_dds(&fs::read_to_string(path)?)?;
    attach_das(&mut dataset, das_path)?;
    Ok(dataset)
}

fn attach_das(dataset: &mut Dataset, das_path: Option<&Path>) -> DapResult<()> {
    if let Some(das_path) = das_path {
        let das = fs::read_to_string(das_path)?;
        add_attributes(dataset, parse_das(&das)?);
    }
    Ok(())
}
