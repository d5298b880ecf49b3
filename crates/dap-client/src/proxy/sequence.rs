use std::fmt;

use bytes::Bytes;

use dap_common::quote::quote_id;
use dap_common::slice::{compose, to_wire};
use dap_common::{DapError, DapResult, Index, Selector, Span};

use crate::decode::{find_marker, Layout, SequenceRecords, StreamReader, DATA_MARKER};
use crate::model::{SequenceVar, Variable};
use crate::net::Connection;
use crate::parsers::{Literal, Operator};
use crate::proxy::build_url;

/// Records streamed from a remote sequence.
pub type RecordStream =
    SequenceRecords<StreamReader<Box<dyn Iterator<Item = DapResult<Bytes>> + Send>>>;

/// A remote sequence, or one of its columns, with the selections and row
/// range accumulated so far.
///
/// Every refinement returns a new proxy. Nothing is requested until
/// [`SequenceProxy::iter`] is called.
#[derive(Debug, Clone)]
pub struct SequenceProxy {
    pub base_url: String,
    /// The sequence itself, or the member being read.
    pub template: Box<Variable>,
    /// Server-side filters, each already in constraint-expression form.
    pub selection: Vec<String>,
    /// Row range.
    pub slice: Span,
    /// Set when `template` is a sequence restricted to some of its columns.
    pub sub_columns: bool,
    conn: Connection,
}

impl SequenceProxy {
    pub fn new(base_url: impl Into<String>, template: Variable, conn: Connection) -> Self {
        Self {
            base_url: base_url.into(),
            template: Box::new(template),
            selection: Vec::new(),
            slice: Span::FULL,
            sub_columns: false,
            conn,
        }
    }

    fn sequence(&self) -> DapResult<&SequenceVar> {
        self.template.as_sequence().ok_or_else(|| {
            DapError::VariableNotFound(format!("{} has no members", self.template.id()))
        })
    }

    /// Proxy for a single member.
    pub fn column(&self, name: &str) -> DapResult<SequenceProxy> {
        let child = self
            .sequence()?
            .get(name)
            .ok_or_else(|| DapError::VariableNotFound(format!("{}.{}", self.template.id(), name)))?;
        let mut proxy = self.clone();
        proxy.template = Box::new(child.clone());
        proxy.sub_columns = false;
        Ok(proxy)
    }

    /// Proxy for the sequence restricted to `names`, in that order.
    pub fn columns(&self, names: &[&str]) -> DapResult<SequenceProxy> {
        let seq = self.sequence()?;
        let children = names
            .iter()
            .map(|name| {
                seq.get(name).cloned().ok_or_else(|| {
                    DapError::VariableNotFound(format!("{}.{}", seq.id, name))
                })
            })
            .collect::<DapResult<Vec<_>>>()?;

        let mut restricted = seq.clone();
        restricted.children = children;
        let mut proxy = self.clone();
        proxy.template = Box::new(Variable::Sequence(restricted));
        proxy.sub_columns = true;
        Ok(proxy)
    }

    /// Add server-side conditions. A condition with several `&`-joined
    /// clauses adds each clause.
    pub fn filter(&self, condition: impl fmt::Display) -> SequenceProxy {
        let mut proxy = self.clone();
        proxy.selection.extend(
            condition
                .to_string()
                .split('&')
                .filter(|clause| !clause.is_empty())
                .map(str::to_string),
        );
        proxy
    }

    /// Restrict the rows read. Sequence length is unknown, so negative
    /// bounds are rejected.
    pub fn rows(&self, index: Index) -> DapResult<SequenceProxy> {
        let non_negative = |value: isize| -> DapResult<usize> {
            usize::try_from(value).map_err(|_| {
                DapError::index(format!(
                    "sequence rows cannot be counted from the end, got {}",
                    value
                ))
            })
        };
        let span = match index {
            Index::Ellipsis => return Ok(self.clone()),
            Index::At(i) => {
                let i = non_negative(i)?;
                Span::new(i, Some(i + 1), 1)
            }
            Index::Slice(slice) => {
                let step = slice.step.unwrap_or(1);
                if step <= 0 {
                    return Err(DapError::index(format!(
                        "slice step must be positive, got {}",
                        step
                    )));
                }
                let start = slice.start.map(non_negative).transpose()?.unwrap_or(0);
                let stop = slice.stop.map(non_negative).transpose()?;
                Span::new(start, stop, step as usize)
            }
        };

        let mut proxy = self.clone();
        proxy.slice = compose(&[Selector::Span(self.slice)], &[Selector::Span(span)])[0];
        Ok(proxy)
    }

    /// Constraint-expression id of what is being read.
    pub fn id(&self) -> String {
        match &*self.template {
            Variable::Sequence(seq) if self.sub_columns => seq
                .children
                .iter()
                .map(|c| quote_id(c.id().split('.')))
                .collect::<Vec<_>>()
                .join(","),
            other => quote_id(other.id().split('.')),
        }
    }

    pub fn url(&self) -> DapResult<String> {
        let mut ce = format!("{}{}", self.id(), to_wire(&[self.slice], &[]));
        for clause in &self.selection {
            ce.push('&');
            ce.push_str(clause);
        }
        build_url(&self.base_url, "dods", &ce)
    }

    /// Stream the records. The request is sent now; records are decoded as
    /// the body arrives.
    pub fn iter(&self) -> DapResult<RecordStream> {
        let url = self.url()?;
        let mut chunks = self.conn.get(&url)?.chunks()?;
        let rest = find_marker(DATA_MARKER, &mut chunks)?.ok_or_else(|| {
            DapError::MalformedResponse(format!("no data section in response from {}", url))
        })?;

        let body: Box<dyn Iterator<Item = DapResult<Bytes>> + Send> =
            Box::new(std::iter::once(Ok(rest)).chain(chunks));
        let (columns, is_sequence) = match &*self.template {
            Variable::Sequence(seq) => (seq.children.iter().map(Layout::of).collect(), true),
            other => (vec![Layout::of(other)], false),
        };
        Ok(SequenceRecords::new(StreamReader::new(body), columns, is_sequence))
    }

    fn compare(&self, op: Operator, rhs: impl Into<Literal>) -> Comparison {
        Comparison {
            lhs: self.id(),
            op,
            rhs: rhs.into(),
        }
    }

    pub fn equals(&self, rhs: impl Into<Literal>) -> Comparison {
        self.compare(Operator::Eq, rhs)
    }

    pub fn not_equals(&self, rhs: impl Into<Literal>) -> Comparison {
        self.compare(Operator::Ne, rhs)
    }

    pub fn greater_than(&self, rhs: impl Into<Literal>) -> Comparison {
        self.compare(Operator::Gt, rhs)
    }

    pub fn at_least(&self, rhs: impl Into<Literal>) -> Comparison {
        self.compare(Operator::Ge, rhs)
    }

    pub fn less_than(&self, rhs: impl Into<Literal>) -> Comparison {
        self.compare(Operator::Lt, rhs)
    }

    pub fn at_most(&self, rhs: impl Into<Literal>) -> Comparison {
        self.compare(Operator::Le, rhs)
    }

    /// Regular-expression match, `=~`.
    pub fn matches(&self, pattern: &str) -> Comparison {
        self.compare(Operator::Match, pattern)
    }
}

/// A column compared with a literal, rendered as `id<op>literal`.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub lhs: String,
    pub op: Operator,
    pub rhs: Literal,
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.lhs, self.op, self.rhs)
    }
}
