//! Lazy client for DAP2 and DAP4 data servers.
//!
//! Opening a dataset fetches only its metadata. Variables are bound to
//! proxies that translate index operations into constrained requests, so
//! reading `sst.get(&[Index::At(0), Index::range(10, 14)])` transfers just that
//! hyperslab.

pub mod config;
pub mod decode;
pub mod file;
pub mod functions;
pub mod handler;
pub mod model;
pub mod net;
pub mod parsers;
pub mod proxy;

pub use config::{ClientConfig, Protocol};
pub use file::open_file;
pub use functions::{FunctionArg, Functions, ServerFunctionResult};
pub use handler::{detect_protocol, open_dods_url, open_url, open_url_with, DapHandler};
pub use model::{
    BaseData, BaseVar, Dataset, GridData, GridVar, SequenceData, SequenceVar, StructureVar, VarRef,
    Variable,
};
pub use net::{Connection, HttpTransport, RequestOptions, Response, Transport};
pub use proxy::{ArrayProxy, Comparison, SequenceProxy};

pub use dap_common::slice::parse_index_expr;
pub use dap_common::{
    ArrayData, AttrValue, Attributes, DType, DapError, DapResult, Index, Slice, TransportError,
    Value, Values,
};
