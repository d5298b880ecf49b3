//! Streaming sequence reads against a scripted transport.

mod common;

use common::MockTransport;
use dap_client::{
    open_url_with, ClientConfig, DapError, Dataset, Index, SequenceProxy, Slice, Value, VarRef,
};
use test_utils::{
    dods_response, split_into_chunks, xdr_f32, xdr_f64, xdr_i32, xdr_sequence, CTD_DAS, CTD_DDS,
    CTD_URL,
};

fn url(suffix: &str) -> String {
    format!("{}{}", CTD_URL, suffix)
}

/// (station, lat, lon, depth)
const CASTS: [(i32, f32, f32, f64); 4] = [
    (1, 10.5, -40.0, 5.0),
    (2, 11.0, -41.5, 120.0),
    (3, 11.5, -42.0, 250.0),
    (4, 12.0, -42.5, 30.0),
];

fn full_record(cast: &(i32, f32, f32, f64)) -> Vec<u8> {
    let mut out = xdr_i32(cast.0);
    out.extend(xdr_f32(cast.1));
    out.extend(xdr_f32(cast.2));
    out.extend(xdr_f64(cast.3));
    out
}

fn cast_response(casts: &[(i32, f32, f32, f64)]) -> Vec<u8> {
    let records: Vec<Vec<u8>> = casts.iter().map(full_record).collect();
    dods_response(CTD_DDS, &xdr_sequence(&records))
}

fn open(transport: MockTransport) -> (Dataset, std::sync::Arc<MockTransport>) {
    let transport = transport
        .with_body(&url(".dds"), CTD_DDS)
        .with_body(&url(".das"), CTD_DAS)
        .shared();
    let ds = open_url_with(CTD_URL, &ClientConfig::default(), transport.clone()).unwrap();
    (ds, transport)
}

fn cast_proxy(ds: &Dataset) -> &SequenceProxy {
    match ds.get("cast") {
        Some(VarRef::Sequence(seq)) => seq.proxy().expect("remote sequence"),
        _ => panic!("cast should be a sequence"),
    }
}

fn scalar(value: &Value) -> f64 {
    value.as_array().and_then(|a| a.get_f64(0)).expect("scalar value")
}

// ============================================================================
// Whole records
// ============================================================================

#[test]
fn test_stream_all_records() {
    let body = cast_response(&CASTS);
    let (ds, transport) = open(
        MockTransport::new().with_chunks(&url(".dods?cast"), split_into_chunks(&body, 7)),
    );

    let Some(VarRef::Sequence(seq)) = ds.get("cast") else {
        panic!("cast should be a sequence");
    };
    let records: Vec<_> = seq.records().unwrap().collect::<Result<_, _>>().unwrap();

    assert_eq!(records.len(), 4);
    assert_eq!(records[0].len(), 4);
    assert_eq!(scalar(&records[1][0]), 2.0);
    assert_eq!(scalar(&records[2][3]), 250.0);
    assert_eq!(scalar(&records[3][1]), 12.0);
    assert_eq!(transport.requests().last().unwrap(), &url(".dods?cast"));
}

#[test]
fn test_attributes_reach_members() {
    let (ds, transport) = open(MockTransport::new());
    let depth = ds.get("cast.depth").unwrap();
    assert_eq!(depth.attributes()["units"].as_str(), Some("m"));
    assert_eq!(transport.request_count(), 2);
}

#[test]
fn test_records_are_decoded_lazily() {
    // The second record is cut short; the first is still delivered.
    let mut body = cast_response(&CASTS[..1]);
    body.truncate(body.len() - 4);
    body.extend_from_slice(&[0x5a, 0, 0, 0, 0, 0]);
    let (ds, _) = open(
        MockTransport::new().with_chunks(&url(".dods?cast"), split_into_chunks(&body, 5)),
    );

    let mut records = cast_proxy(&ds).iter().unwrap();
    let first = records.next().unwrap().unwrap();
    assert_eq!(scalar(&first[0]), 1.0);
    assert!(matches!(records.next(), Some(Err(DapError::Decode(_)))));
    assert!(records.next().is_none());
}

#[test]
fn test_empty_sequence() {
    let body = cast_response(&[]);
    let (ds, _) = open(MockTransport::new().with_body(&url(".dods?cast"), body));
    assert_eq!(cast_proxy(&ds).iter().unwrap().count(), 0);
}

#[test]
fn test_missing_data_marker_is_malformed() {
    let (ds, _) = open(MockTransport::new().with_chunks(
        &url(".dods?cast"),
        split_into_chunks(CTD_DDS.as_bytes(), 16),
    ));
    assert!(matches!(
        cast_proxy(&ds).iter(),
        Err(DapError::MalformedResponse(_))
    ));
}

// ============================================================================
// Filters, columns and rows
// ============================================================================

#[test]
fn test_filter_is_sent_to_server() {
    let deep = [CASTS[1], CASTS[2]];
    let (ds, transport) = open(
        MockTransport::new().with_body(&url(".dods?cast&cast.depth>100"), cast_response(&deep)),
    );

    let cast = cast_proxy(&ds);
    let filtered = cast.filter(cast.column("depth").unwrap().greater_than(100i64));
    let depths: Vec<f64> = filtered
        .iter()
        .unwrap()
        .map(|r| scalar(&r.unwrap()[3]))
        .collect();

    assert_eq!(depths, vec![120.0, 250.0]);
    assert_eq!(
        transport.requests().last().unwrap(),
        &url(".dods?cast&cast.depth>100")
    );
}

#[test]
fn test_single_column_yields_bare_values() {
    let records: Vec<Vec<u8>> = CASTS.iter().map(|c| xdr_f64(c.3)).collect();
    let dds = "Dataset {\n    Sequence {\n        Float64 depth;\n    } cast;\n} ctd;";
    let (ds, _) = open(MockTransport::new().with_body(
        &url(".dods?cast.depth"),
        dods_response(dds, &xdr_sequence(&records)),
    ));

    let depth = cast_proxy(&ds).column("depth").unwrap();
    let values: Vec<f64> = depth.iter().unwrap().map(|r| scalar(&r.unwrap()[0])).collect();
    assert_eq!(values, vec![5.0, 120.0, 250.0, 30.0]);
}

#[test]
fn test_column_subset_keeps_requested_order() {
    let records: Vec<Vec<u8>> = CASTS
        .iter()
        .map(|c| {
            let mut r = xdr_f32(c.2);
            r.extend(xdr_f32(c.1));
            r
        })
        .collect();
    let dds = "Dataset {\n    Sequence {\n        Float32 lon;\n        Float32 lat;\n    } cast;\n} ctd;";
    let (ds, _) = open(MockTransport::new().with_body(
        &url(".dods?cast.lon,cast.lat"),
        dods_response(dds, &xdr_sequence(&records)),
    ));

    let subset = cast_proxy(&ds).columns(&["lon", "lat"]).unwrap();
    let first = subset.iter().unwrap().next().unwrap().unwrap();
    assert_eq!(first.len(), 2);
    assert_eq!(scalar(&first[0]), -40.0);
    assert_eq!(scalar(&first[1]), 10.5);
}

#[test]
fn test_rows_are_requested_as_hyperslab() {
    let (ds, transport) = open(
        MockTransport::new().with_body(&url(".dods?cast[1:1:2]"), cast_response(&CASTS[1..3])),
    );
    let rows = cast_proxy(&ds).rows(Index::Slice(Slice::range(1, 3))).unwrap();
    assert_eq!(rows.iter().unwrap().count(), 2);
    assert_eq!(transport.requests().last().unwrap(), &url(".dods?cast[1:1:2]"));
}

#[test]
fn test_selection_in_url_applies_to_records() {
    let query = "?cast&cast.station=3";
    let transport = MockTransport::new()
        .with_body(&url(&format!(".dds{}", query)), CTD_DDS)
        .with_body(&url(&format!(".das{}", query)), CTD_DAS)
        .with_body(&url(".dods?cast&cast.station=3"), cast_response(&CASTS[2..3]))
        .shared();
    let ds = open_url_with(&url(query), &ClientConfig::default(), transport).unwrap();

    let records: Vec<_> = cast_proxy(&ds).iter().unwrap().collect();
    assert_eq!(records.len(), 1);
    assert_eq!(scalar(&records[0].as_ref().unwrap()[0]), 3.0);
}
