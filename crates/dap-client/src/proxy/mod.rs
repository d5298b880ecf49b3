//! Lazy remote data.
//!
//! Proxies hold only what is needed to build a request: the dataset's base
//! URL, the variable id, its declared type and shape, and the accumulated
//! slice or selection. Indexing returns a new proxy; reading performs one
//! GET and decodes the response.

mod array;
mod sequence;

pub use array::ArrayProxy;
pub use sequence::{Comparison, RecordStream, SequenceProxy};

use url::Url;

use dap_common::{DapError, DapResult, TransportError};

/// Append `.extension` to the path of `base_url` and prepend `ce` to its
/// query. A trailing `&` is dropped.
///
/// The constraint is appended verbatim: operators such as `>` and quotes are
/// sent as written rather than percent-encoded.
pub(crate) fn build_url(base_url: &str, extension: &str, ce: &str) -> DapResult<String> {
    let (rest, fragment) = match base_url.split_once('#') {
        Some((rest, fragment)) => (rest, Some(fragment)),
        None => (base_url, None),
    };
    let (head, existing) = rest.split_once('?').unwrap_or((rest, ""));
    Url::parse(head).map_err(|e| {
        DapError::Transport(TransportError::Request(format!(
            "invalid URL {}: {}",
            base_url, e
        )))
    })?;

    let query = if existing.is_empty() {
        ce.to_string()
    } else {
        format!("{}&{}", ce, existing)
    };
    let query = query.trim_end_matches('&');

    let mut out = format!("{}.{}", head, extension);
    if !query.is_empty() {
        out.push('?');
        out.push_str(query);
    }
    if let Some(fragment) = fragment {
        out.push('#');
        out.push_str(fragment);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url() {
        assert_eq!(
            build_url("http://example.com/coads.nc", "dods", "SST[0:1:0]").unwrap(),
            "http://example.com/coads.nc.dods?SST[0:1:0]"
        );
        assert_eq!(
            build_url("http://example.com/coads.nc?TIME>1", "dods", "SST").unwrap(),
            "http://example.com/coads.nc.dods?SST&TIME>1"
        );
        assert_eq!(
            build_url("http://example.com/coads.nc", "dods", "").unwrap(),
            "http://example.com/coads.nc.dods"
        );
        assert_eq!(
            build_url("http://example.com/ctd", "dods", "cast&cast.depth>10").unwrap(),
            "http://example.com/ctd.dods?cast&cast.depth>10"
        );
        assert!(build_url("not a url", "dods", "").is_err());
    }
}
