//! Server-side function calls.
//!
//! `functions.call("geogrid", &[...])` builds the call expression
//! `geogrid(SST,10,20)` and returns a lazy result; the request is sent when
//! [`ServerFunctionResult::fetch`] is called. A result can itself be passed
//! as an argument to another call.

use std::fmt;

use dap_common::quote::quote_id;
use dap_common::DapResult;

use crate::handler::fetch_dods;
use crate::model::{BaseVar, Dataset, VarRef, Variable};
use crate::net::Connection;
use crate::parsers::Literal;
use crate::proxy::build_url;

/// An argument of a server-side function.
#[derive(Debug, Clone, PartialEq)]
pub enum FunctionArg {
    /// A dataset variable, rendered as its id.
    Variable(String),
    /// The result of another call, rendered as that call.
    Call(String),
    Literal(Literal),
}

impl fmt::Display for FunctionArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FunctionArg::Variable(id) => f.write_str(&quote_id(id.split('.'))),
            FunctionArg::Call(call) => f.write_str(call),
            FunctionArg::Literal(lit) => write!(f, "{}", lit),
        }
    }
}

impl From<&BaseVar> for FunctionArg {
    fn from(var: &BaseVar) -> Self {
        FunctionArg::Variable(var.id.clone())
    }
}

impl From<&Variable> for FunctionArg {
    fn from(var: &Variable) -> Self {
        FunctionArg::Variable(var.id().to_string())
    }
}

impl From<VarRef<'_>> for FunctionArg {
    fn from(var: VarRef<'_>) -> Self {
        FunctionArg::Variable(var.id().to_string())
    }
}

impl From<&ServerFunctionResult> for FunctionArg {
    fn from(result: &ServerFunctionResult) -> Self {
        FunctionArg::Call(result.call.clone())
    }
}

impl From<f64> for FunctionArg {
    fn from(x: f64) -> Self {
        FunctionArg::Literal(Literal::Float(x))
    }
}

impl From<i64> for FunctionArg {
    fn from(i: i64) -> Self {
        FunctionArg::Literal(Literal::Int(i))
    }
}

impl From<&str> for FunctionArg {
    fn from(s: &str) -> Self {
        FunctionArg::Literal(Literal::Str(s.to_string()))
    }
}

/// Entry point for the server functions of one dataset.
#[derive(Debug, Clone)]
pub struct Functions {
    /// Dataset URL without extension or query.
    base_url: String,
    conn: Connection,
}

impl Functions {
    pub fn new(base_url: impl Into<String>, conn: Connection) -> Self {
        Self {
            base_url: base_url.into(),
            conn,
        }
    }

    pub fn call(&self, name: &str, args: &[FunctionArg]) -> ServerFunctionResult {
        let params: Vec<String> = args.iter().map(FunctionArg::to_string).collect();
        ServerFunctionResult {
            call: format!("{}({})", name, params.join(",")),
            base_url: self.base_url.clone(),
            conn: self.conn.clone(),
        }
    }
}

/// A function call not yet sent to the server.
#[derive(Debug, Clone)]
pub struct ServerFunctionResult {
    /// The call expression, e.g. `mean(SST,0)`.
    pub call: String,
    base_url: String,
    conn: Connection,
}

impl ServerFunctionResult {
    pub fn url(&self) -> DapResult<String> {
        build_url(&self.base_url, "dods", &self.call)
    }

    /// Evaluate the call and decode the returned dataset, attributes
    /// included.
    pub fn fetch(&self) -> DapResult<Dataset> {
        fetch_dods(&self.url()?, true, &self.conn)
    }
}
