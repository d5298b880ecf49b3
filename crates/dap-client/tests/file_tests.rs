//! Opening saved responses from disk.

use dap_client::parsers::{parse_dds, to_dds};
use dap_client::{open_file, DapError, VarRef};
use test_utils::{
    assert_all_approx_eq, coads, dap4_variable, dap_response, dods_response, le_f32, le_f64,
    write_temp_file, xdr_f32_array, xdr_f64_array, COADS_DAS, COADS_DDS, COADS_DMR,
};

fn lon() -> Vec<f64> {
    vec![1.0, 3.0, 5.0, 7.0]
}

fn lat() -> Vec<f64> {
    vec![-10.0, 0.0, 10.0]
}

fn time() -> Vec<f64> {
    vec![366.0, 1096.0]
}

fn sst() -> Vec<f32> {
    (0..coads::SST_SIZE).map(|i| 20.0 + i as f32 / 4.0).collect()
}

fn coads_dods() -> Vec<u8> {
    let mut payload = xdr_f64_array(&lon());
    payload.extend(xdr_f64_array(&lat()));
    payload.extend(xdr_f64_array(&time()));
    payload.extend(xdr_f32_array(&sst()));
    payload.extend(xdr_f64_array(&time()));
    payload.extend(xdr_f64_array(&lat()));
    payload.extend(xdr_f64_array(&lon()));
    dods_response(COADS_DDS, &payload)
}

fn coads_dap() -> Vec<u8> {
    let mut data = dap4_variable(&le_f64(&lon()), true);
    data.extend(dap4_variable(&le_f64(&lat()), true));
    data.extend(dap4_variable(&le_f64(&time()), true));
    data.extend(dap4_variable(&le_f32(&sst()), true));
    dap_response(COADS_DMR, &data, 64)
}

// ============================================================================
// DAP2 files
// ============================================================================

#[test]
fn test_open_dods_file_binds_values() {
    let (_dir, path) = write_temp_file("coads.dods", &coads_dods());
    let ds = open_file(&path, None).unwrap();

    let x = ds.base("COADSX").unwrap().values().unwrap();
    assert_eq!(x.shape, vec![coads::COADSX]);
    assert_eq!(x.get_f64(3), Some(7.0));

    let sst = ds.base("SST").unwrap().read().unwrap();
    assert_eq!(sst.shape, vec![coads::TIME, coads::COADSY, coads::COADSX]);
    assert_eq!(sst.at_f64(&[1, 0, 0]), Some(23.0));

    let Some(VarRef::Grid(grid)) = ds.get("SST") else {
        panic!("SST should be a grid");
    };
    let time = grid.map("TIME").unwrap().values().unwrap();
    assert_eq!(time.get_f64(1), Some(1096.0));
    assert!(ds.functions.is_none());
}

#[test]
fn test_open_dods_file_with_das() {
    let (_dir, path) = write_temp_file("coads.dods", &coads_dods());
    let (_das_dir, das_path) = write_temp_file("coads.das", COADS_DAS.as_bytes());
    let ds = open_file(&path, Some(das_path.as_path())).unwrap();
    assert_eq!(
        ds.get("SST").unwrap().attributes()["units"].as_str(),
        Some("Deg C")
    );
}

#[test]
fn test_truncated_dods_file() {
    let mut body = coads_dods();
    body.truncate(body.len() - 10);
    let (_dir, path) = write_temp_file("coads.dods", &body);
    assert!(matches!(open_file(&path, None), Err(DapError::Decode(_))));
}

#[test]
fn test_open_dds_file_has_no_data() {
    let (_dir, path) = write_temp_file("coads.dds", COADS_DDS.as_bytes());
    let ds = open_file(&path, None).unwrap();
    let sst = ds.base("SST").unwrap();
    assert!(sst.values().is_none());
    assert!(matches!(sst.read(), Err(DapError::NoData(_))));
}

#[test]
fn test_dds_renders_back_to_same_tree() {
    let (_dir, path) = write_temp_file("coads.dds", COADS_DDS.as_bytes());
    let ds = open_file(&path, None).unwrap();
    let again = parse_dds(&to_dds(&ds)).unwrap();
    assert_eq!(again.keys(), ds.keys());
    assert_eq!(again.base("SST").unwrap().shape, vec![2, 3, 4]);
}

// ============================================================================
// DAP4 files
// ============================================================================

#[test]
fn test_open_dap_file() {
    let (_dir, path) = write_temp_file("coads.dap", &coads_dap());
    let ds = open_file(&path, None).unwrap();

    let y = ds.base("COADSY").unwrap().values().unwrap();
    assert_all_approx_eq!(
        (0..y.len()).map(|i| y.get_f64(i).unwrap()).collect::<Vec<_>>(),
        lat(),
        1e-12
    );

    let sst = ds.base("SST").unwrap().values().unwrap();
    assert_eq!(sst.len(), coads::SST_SIZE);
    assert_eq!(sst.get_f64(4), Some(21.0));

    // Grid maps share the values of their top-level variables.
    let Some(VarRef::Grid(grid)) = ds.get("SST") else {
        panic!("SST should be a grid");
    };
    let x = grid.map("COADSX").unwrap().values().unwrap();
    assert_eq!(x.get_f64(0), Some(1.0));
    assert_eq!(
        ds.base("COADSX").unwrap().checksum,
        Some(crc32fast::hash(&le_f64(&lon())))
    );
}

#[test]
fn test_open_dmr_file() {
    let (_dir, path) = write_temp_file("coads.dmr", COADS_DMR.as_bytes());
    let ds = open_file(&path, None).unwrap();
    assert_eq!(ds.keys(), vec!["COADSX", "COADSY", "TIME", "SST"]);
    assert!(ds.base("TIME").unwrap().values().is_none());
    assert_eq!(ds.base("TIME").unwrap().shape, vec![coads::TIME]);
}

#[test]
fn test_unknown_extension_is_rejected() {
    let (_dir, path) = write_temp_file("coads.nc", b"CDF\x01");
    assert!(matches!(
        open_file(&path, None),
        Err(DapError::UnsupportedExtension(_))
    ));
}
