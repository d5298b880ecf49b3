//! Opening datasets from URLs.
//!
//! [`open_url`] fetches the metadata of a remote dataset and returns a tree
//! whose variables are bound to lazy proxies. A constraint expression in the
//! URL query sets the initial slice of the projected variables; its
//! selection terms are kept on every later request.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use dap_common::slice::Slice;
use dap_common::{DapError, DapResult, Index, TransportError};

use crate::config::{ClientConfig, Protocol};
use crate::decode::{split_dods, unpack_dap2_data, BytesReader};
use crate::functions::Functions;
use crate::model::{BaseData, BaseVar, Dataset, GridVar, SequenceData, Variable};
use crate::net::{decode_text, Connection, HttpTransport, Transport};
use crate::parsers::{
    add_attributes, fix_shorthand, parse_ce, parse_das, parse_dds, parse_dmr, Constraint,
    PathComponent, ProjectionTerm,
};
use crate::proxy::{ArrayProxy, SequenceProxy};

/// Extensions stripped from a dataset URL before requests are built.
const KNOWN_EXTENSIONS: [&str; 5] = [".dmr", ".dap", ".dds", ".dods", ".das"];

/// Open a remote dataset over HTTP.
pub fn open_url(url: &str, config: &ClientConfig) -> DapResult<Dataset> {
    let transport = HttpTransport::new(&config.user_agent)?;
    open_url_with(url, config, Arc::new(transport))
}

/// Open a remote dataset through `transport`.
#[instrument(skip(config, transport))]
pub fn open_url_with(
    url: &str,
    config: &ClientConfig,
    transport: Arc<dyn Transport>,
) -> DapResult<Dataset> {
    let handler = DapHandler::new(url, config, transport)?;
    let dataset = handler.dataset()?;
    info!(
        dataset = %dataset.name,
        protocol = %handler.protocol,
        variables = dataset.variables.len(),
        "Opened dataset"
    );
    Ok(dataset)
}

/// Fetch a `.dods` response and decode it into a dataset with values bound.
/// With `metadata` set the matching `.das` is fetched and attached.
#[instrument(skip(config, transport))]
pub fn open_dods_url(
    url: &str,
    metadata: bool,
    config: &ClientConfig,
    transport: Arc<dyn Transport>,
) -> DapResult<Dataset> {
    let conn = Connection::new(transport, config);
    fetch_dods(url, metadata, &conn)
}

pub(crate) fn fetch_dods(url: &str, metadata: bool, conn: &Connection) -> DapResult<Dataset> {
    let response = conn.get(url)?;
    let charset = response
        .charset
        .clone()
        .unwrap_or_else(|| conn.user_charset.clone());
    let raw = response.bytes()?;

    let (dds, xdr) = split_dods(&raw)?;
    let mut dataset = parse_dds(&decode_text(dds, &charset))?;
    let values = unpack_dap2_data(&mut BytesReader::new(raw.slice_ref(xdr)), &dataset)?;
    dataset.set_values(values)?;

    if metadata {
        let das = conn.get_text(&das_url(url))?;
        add_attributes(&mut dataset, parse_das(&das)?);
    }
    Ok(dataset)
}

/// The `.das` URL matching a `.dods` URL, query preserved.
fn das_url(dods_url: &str) -> String {
    let (head, query) = match dods_url.split_once('?') {
        Some((head, query)) => (head, Some(query)),
        None => (dods_url, None),
    };
    let head = head.strip_suffix(".dods").unwrap_or(head);
    match query {
        Some(query) => format!("{}.das?{}", head, query),
        None => format!("{}.das", head),
    }
}

/// Choose the protocol for `url`: an explicit choice wins, then a `dap4://`
/// or `dap2://` scheme, then the extension. DAP2 is the default.
pub fn detect_protocol(url: &str, explicit: Option<Protocol>) -> Protocol {
    if let Some(protocol) = explicit {
        return protocol;
    }
    if let Some((scheme, _)) = url.split_once("://") {
        match scheme.to_ascii_lowercase().as_str() {
            "dap4" => return Protocol::Dap4,
            "dap2" => return Protocol::Dap2,
            _ => {}
        }
    }
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let last = path.rsplit('/').next().unwrap_or(path);
    match last.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "dmr" || ext == "dap" => Protocol::Dap4,
        _ => Protocol::Dap2,
    }
}

/// Resolves a dataset URL into metadata requests and proxy bindings.
#[derive(Debug)]
pub struct DapHandler {
    pub protocol: Protocol,
    /// Dataset URL without extension or query.
    pub location: String,
    /// The query as given, sent with metadata requests.
    pub query: String,
    pub constraint: Constraint,
    /// `location` plus the selection terms; the base of every data request.
    pub base_url: String,
    output_grid: bool,
    conn: Connection,
}

impl DapHandler {
    pub fn new(url: &str, config: &ClientConfig, transport: Arc<dyn Transport>) -> DapResult<Self> {
        let protocol = detect_protocol(url, config.protocol);
        let url = match url.split_once("://") {
            Some((scheme, rest))
                if scheme.eq_ignore_ascii_case("dap4") || scheme.eq_ignore_ascii_case("dap2") =>
            {
                format!("http://{}", rest)
            }
            _ => url.to_string(),
        };

        let without_fragment = url.split('#').next().unwrap_or(&url);
        let (head, query) = without_fragment
            .split_once('?')
            .unwrap_or((without_fragment, ""));
        url::Url::parse(head).map_err(|e| {
            DapError::Transport(TransportError::Request(format!("invalid URL {}: {}", url, e)))
        })?;

        let location = KNOWN_EXTENSIONS
            .iter()
            .find_map(|ext| head.strip_suffix(ext))
            .unwrap_or(head)
            .to_string();
        let constraint = parse_ce(query)?;
        let base_url = if constraint.selection.is_empty() {
            location.clone()
        } else {
            format!("{}?{}", location, constraint.selection.join("&"))
        };

        Ok(Self {
            protocol,
            location,
            query: query.to_string(),
            constraint,
            base_url,
            output_grid: config.output_grid,
            conn: Connection::new(transport, config),
        })
    }

    fn metadata_url(&self, extension: &str) -> String {
        if self.query.is_empty() {
            format!("{}.{}", self.location, extension)
        } else {
            format!("{}.{}?{}", self.location, extension, self.query)
        }
    }

    /// Fetch metadata and build the proxied dataset.
    pub fn dataset(&self) -> DapResult<Dataset> {
        let mut dataset = match self.protocol {
            Protocol::Dap4 => parse_dmr(&self.conn.get_text(&self.metadata_url("dmr"))?)?,
            Protocol::Dap2 => parse_dds(&self.conn.get_text(&self.metadata_url("dds"))?)?,
        };

        let das = self
            .conn
            .get_text(&self.metadata_url("das"))
            .and_then(|text| parse_das(&text));
        match (das, self.protocol) {
            (Ok(attributes), _) => add_attributes(&mut dataset, attributes),
            (Err(e), Protocol::Dap2) => return Err(e),
            (Err(e), Protocol::Dap4) => {
                warn!(error = %e, "No usable DAS for DAP4 dataset, keeping DMR attributes only")
            }
        }

        self.attach_proxies(&mut dataset);

        if self.protocol == Protocol::Dap2 {
            let projection = fix_shorthand(self.constraint.projection.clone(), &dataset)?;
            for term in &projection {
                if let ProjectionTerm::Path(path) = term {
                    apply_projection(&mut dataset.variables, path)?;
                }
            }
            debug!(terms = projection.len(), "Applied projection");
        }

        dataset.set_output_grid(self.output_grid);
        dataset.functions = Some(Functions::new(self.location.clone(), self.conn.clone()));
        Ok(dataset)
    }

    fn attach_proxies(&self, dataset: &mut Dataset) {
        for var in dataset.bases_mut() {
            if var.synthesized {
                continue;
            }
            let proxy = ArrayProxy::for_var(&self.base_url, var, self.protocol, self.conn.clone());
            var.data = BaseData::Remote(proxy);
        }
        for seq in dataset.sequences_mut() {
            let template = Variable::Sequence(seq.clone());
            seq.data = SequenceData::Remote(SequenceProxy::new(
                self.base_url.clone(),
                template,
                self.conn.clone(),
            ));
        }
    }
}

/// Narrow the proxies named by one projection path.
fn apply_projection(vars: &mut [Variable], path: &[PathComponent]) -> DapResult<()> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(());
    };
    let var = vars
        .iter_mut()
        .find(|v| v.name() == first.name)
        .ok_or_else(|| DapError::VariableNotFound(first.name.clone()))?;

    match var {
        Variable::Base(b) => restrict(b, &first.hyperslab),
        Variable::Structure(s) => apply_projection(&mut s.children, rest),
        Variable::Sequence(s) => {
            if let (SequenceData::Remote(proxy), Some(rows)) = (&mut s.data, first.hyperslab.first()) {
                *proxy = proxy.rows(Index::Slice(*rows))?;
            }
            Ok(())
        }
        Variable::Grid(g) => match rest.first() {
            None => restrict_grid(g, &first.hyperslab),
            Some(member) if member.name == g.array.name => restrict_grid(g, &member.hyperslab),
            Some(member) => {
                let map = g
                    .maps
                    .iter_mut()
                    .find(|m| m.name == member.name)
                    .ok_or_else(|| {
                        DapError::VariableNotFound(format!("{}.{}", first.name, member.name))
                    })?;
                restrict(map, &member.hyperslab)
            }
        },
    }
}

fn restrict(var: &mut BaseVar, hyperslab: &[Slice]) -> DapResult<()> {
    if hyperslab.is_empty() {
        return Ok(());
    }
    let index: Vec<Index> = hyperslab.iter().copied().map(Index::Slice).collect();
    if let BaseData::Remote(proxy) = &mut var.data {
        *proxy = proxy.index(&index)?;
    }
    Ok(())
}

/// Apply a hyperslab to a grid's array and each map's axis.
fn restrict_grid(grid: &mut GridVar, hyperslab: &[Slice]) -> DapResult<()> {
    restrict(&mut grid.array, hyperslab)?;
    for (map, axis) in grid.maps.iter_mut().zip(hyperslab) {
        restrict(map, std::slice::from_ref(axis))?;
    }
    Ok(())
}
