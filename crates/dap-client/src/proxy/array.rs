use tracing::debug;

use dap_common::quote::{quote, quote_id};
use dap_common::slice::{compose, normalize, to_wire, view_shape};
use dap_common::{ArrayData, DType, DapError, DapResult, Index, Selector, Span, Values};

use crate::config::Protocol;
use crate::decode::{
    reassemble_chunks, split_dmr, split_dods, unpack_dap2_data, unpack_dap4_data, BytesReader,
};
use crate::model::{BaseVar, Dataset};
use crate::net::{decode_text, Connection};
use crate::parsers::{parse_dds, parse_dmr};
use crate::proxy::build_url;

/// A remote array that fetches only the hyperslab it is asked for.
#[derive(Debug, Clone)]
pub struct ArrayProxy {
    /// Dataset URL without extension, carrying any selection in its query.
    pub base_url: String,
    /// Dotted DAP2 id, or the DMR name for DAP4.
    pub id: String,
    pub dtype: DType,
    /// Declared shape of the whole variable.
    pub shape: Vec<usize>,
    /// Accumulated selection, one span per axis of `shape`.
    pub slice: Vec<Span>,
    pub protocol: Protocol,
    conn: Connection,
}

impl ArrayProxy {
    pub fn new(
        base_url: impl Into<String>,
        id: impl Into<String>,
        dtype: DType,
        shape: Vec<usize>,
        protocol: Protocol,
        conn: Connection,
    ) -> Self {
        let slice = vec![Span::FULL; shape.len()];
        Self {
            base_url: base_url.into(),
            id: id.into(),
            dtype,
            shape,
            slice,
            protocol,
            conn,
        }
    }

    /// A proxy for `var`, addressed by id or by name depending on the
    /// protocol.
    pub fn for_var(base_url: &str, var: &BaseVar, protocol: Protocol, conn: Connection) -> Self {
        let id = match protocol {
            Protocol::Dap2 => var.id.clone(),
            Protocol::Dap4 => var.name.clone(),
        };
        Self::new(base_url, id, var.dtype, var.shape.clone(), protocol, conn)
    }

    /// Shape of the current view.
    pub fn view_shape(&self) -> Vec<usize> {
        view_shape(&self.slice, &self.shape)
    }

    fn outer(&self) -> Vec<Selector> {
        self.slice.iter().copied().map(Selector::Span).collect()
    }

    /// A narrower proxy. Point indices keep their axis as a length-1 span.
    pub fn index(&self, index: &[Index]) -> DapResult<ArrayProxy> {
        let inner = normalize(index, &self.view_shape())?;
        let mut proxy = self.clone();
        proxy.slice = compose(&self.outer(), &inner);
        Ok(proxy)
    }

    /// URL requesting the whole current view.
    pub fn url(&self) -> DapResult<String> {
        self.url_for(&self.slice)
    }

    fn url_for(&self, spans: &[Span]) -> DapResult<String> {
        let hyperslab = to_wire(spans, &self.shape);
        match self.protocol {
            Protocol::Dap2 => {
                let ce = format!("{}{}", quote_id(self.id.split('.')), hyperslab);
                build_url(&self.base_url, "dods", &ce)
            }
            Protocol::Dap4 => {
                let ce = format!("dap4.ce={}{}", quote(&self.id), hyperslab);
                build_url(&self.base_url, "dap", &ce)
            }
        }
    }

    /// Fetch `index` applied to the current view. Point indices drop their
    /// axis from the result.
    pub fn get(&self, index: &[Index]) -> DapResult<ArrayData> {
        let inner = normalize(index, &self.view_shape())?;
        let spans = compose(&self.outer(), &inner);
        let data = self.fetch(&spans)?;

        let points: Vec<usize> = inner
            .iter()
            .enumerate()
            .filter(|(_, sel)| sel.is_point())
            .map(|(axis, _)| axis)
            .collect();
        if points.is_empty() {
            Ok(data)
        } else {
            data.squeeze_axes(&points)
        }
    }

    /// Fetch the whole current view.
    pub fn read(&self) -> DapResult<ArrayData> {
        self.fetch(&self.slice)
    }

    fn fetch(&self, spans: &[Span]) -> DapResult<ArrayData> {
        let expected = view_shape(spans, &self.shape);
        if expected.contains(&0) {
            // An empty hyperslab has no wire form; nothing to request.
            return ArrayData::new(Values::empty(self.dtype), expected);
        }

        let url = self.url_for(spans)?;
        let response = self.conn.get(&url)?;
        let charset = response
            .charset
            .clone()
            .unwrap_or_else(|| self.conn.user_charset.clone());
        let raw = response.bytes()?;

        let data = match self.protocol {
            Protocol::Dap2 => {
                let (dds, xdr) = split_dods(&raw)?;
                let mut dataset = parse_dds(&decode_text(dds, &charset))?;
                let values = unpack_dap2_data(&mut BytesReader::new(raw.slice_ref(xdr)), &dataset)?;
                dataset.set_values(values)?;
                self.lookup(&dataset)?
            }
            Protocol::Dap4 => {
                let (dmr, chunks) = split_dmr(&raw)?;
                let mut dataset = parse_dmr(&decode_text(dmr, &charset))?;
                let payload = reassemble_chunks(&mut BytesReader::new(raw.slice_ref(chunks)))?;
                unpack_dap4_data(&payload, &mut dataset, self.conn.verify_checksums)?;
                self.lookup(&dataset)?
            }
        };

        if data.shape.iter().product::<usize>() != expected.iter().product::<usize>() {
            return Err(DapError::truncated(
                &self.id,
                expected.iter().product(),
                data.len(),
            ));
        }
        debug!(id = %self.id, shape = ?data.shape, "Fetched remote array");
        Ok(data)
    }

    /// Find this variable in a response dataset. Servers may flatten a
    /// requested grid member to a top-level array.
    fn lookup(&self, dataset: &Dataset) -> DapResult<ArrayData> {
        let name = self.id.rsplit(['.', '/']).next().unwrap_or(&self.id);
        let base = dataset
            .base(&self.id)
            .or_else(|_| dataset.base(self.id.trim_start_matches('/')))
            .or_else(|_| dataset.base(name))?;
        base.values()
            .cloned()
            .ok_or_else(|| DapError::NoData(self.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::ClientConfig;
    use crate::net::{RequestOptions, Response, Transport};
    use dap_common::TransportError;

    #[derive(Debug)]
    struct Unreachable;

    impl Transport for Unreachable {
        fn get(&self, url: &str, _: &RequestOptions) -> Result<Response, TransportError> {
            Err(TransportError::Request(format!("no route to {}", url)))
        }
    }

    fn proxy(protocol: Protocol) -> ArrayProxy {
        let conn = Connection::new(Arc::new(Unreachable), &ClientConfig::default());
        ArrayProxy::new(
            "http://example.com/coads.nc",
            "SST.SST",
            DType::Float32,
            vec![12, 90, 180],
            protocol,
            conn,
        )
    }

    #[test]
    fn test_full_view_url_has_no_hyperslab() {
        assert_eq!(
            proxy(Protocol::Dap2).url().unwrap(),
            "http://example.com/coads.nc.dods?SST.SST"
        );
    }

    #[test]
    fn test_index_composes_slices() {
        let p = proxy(Protocol::Dap2);
        let narrowed = p
            .index(&[Index::At(0), Index::range(10, 14)])
            .unwrap()
            .index(&[Index::full(), Index::range(1, 3)])
            .unwrap();
        assert_eq!(narrowed.view_shape(), vec![1, 2, 180]);
        assert_eq!(
            narrowed.url().unwrap(),
            "http://example.com/coads.nc.dods?SST.SST[0:1:0][11:1:12]"
        );
        // The original proxy is untouched.
        assert_eq!(p.view_shape(), vec![12, 90, 180]);
    }

    #[test]
    fn test_dap4_url() {
        let mut p = proxy(Protocol::Dap4);
        p.id = "SST".into();
        let p = p.index(&[Index::At(2)]).unwrap();
        assert_eq!(
            p.url().unwrap(),
            "http://example.com/coads.nc.dap?dap4.ce=SST[2:1:2]"
        );
    }

    #[test]
    fn test_empty_selection_is_not_requested() {
        let p = proxy(Protocol::Dap2);
        let out = p.get(&[Index::range(2, 1)]).unwrap();
        assert_eq!(out.shape, vec![0, 90, 180]);
        assert!(out.is_empty());

        let empty = p.index(&[Index::full(), Index::range(0, 0)]).unwrap();
        assert_eq!(empty.view_shape(), vec![12, 0, 180]);
        assert_eq!(empty.read().unwrap().dtype(), DType::Float32);
    }

    #[test]
    fn test_index_errors_do_not_fetch() {
        let p = proxy(Protocol::Dap2);
        assert!(matches!(
            p.index(&[Index::At(12)]),
            Err(DapError::Index(_))
        ));
        assert!(matches!(p.get(&[Index::At(0)]), Err(DapError::Transport(_))));
    }
}
