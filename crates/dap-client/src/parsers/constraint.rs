//! Constraint expression parsing.
//!
//! A query string is a projection followed by `&`-separated selection
//! terms, e.g. `a,b[0:2:9],c&a>1&b<2`. Function calls such as
//! `mean(mean(g.a,1),0)` are kept as opaque strings.

use std::fmt;

use dap_common::quote::{encode_number, encode_str};
use dap_common::{unquote, DapError, DapResult, Slice};

use crate::model::{Dataset, VarRef};

/// Comparison operators, in the order they are tried when splitting a
/// selection term.
const OPERATORS: [Operator; 7] = [
    Operator::Le,
    Operator::Ge,
    Operator::Ne,
    Operator::Match,
    Operator::Gt,
    Operator::Lt,
    Operator::Eq,
];

/// One dotted component of a projected path, with its hyperslab.
#[derive(Debug, Clone, PartialEq)]
pub struct PathComponent {
    pub name: String,
    /// Exclusive-stop slices, one per bracket.
    pub hyperslab: Vec<Slice>,
}

impl PathComponent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hyperslab: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProjectionTerm {
    Path(Vec<PathComponent>),
    /// A server-side function call, kept verbatim.
    Function(String),
}

impl ProjectionTerm {
    /// Dotted id of a path term.
    pub fn id(&self) -> Option<String> {
        match self {
            ProjectionTerm::Path(components) => Some(
                components
                    .iter()
                    .map(|c| c.name.as_str())
                    .collect::<Vec<_>>()
                    .join("."),
            ),
            ProjectionTerm::Function(_) => None,
        }
    }
}

/// A parsed query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraint {
    pub projection: Vec<ProjectionTerm>,
    pub selection: Vec<String>,
}

/// Split a query string into projection and selection.
pub fn parse_ce(query: &str) -> DapResult<Constraint> {
    let query = unquote(query);
    let tokens: Vec<&str> = query.split('&').filter(|t| !t.is_empty()).collect();

    let Some((first, rest)) = tokens.split_first() else {
        return Ok(Constraint::default());
    };

    if OPERATORS.iter().any(|op| first.contains(op.as_str())) {
        return Ok(Constraint {
            projection: Vec::new(),
            selection: tokens.iter().map(|t| t.to_string()).collect(),
        });
    }

    Ok(Constraint {
        projection: parse_projection(first)?,
        selection: rest.iter().map(|t| t.to_string()).collect(),
    })
}

/// Split a projection on top-level commas and parse each term.
pub fn parse_projection(input: &str) -> DapResult<Vec<ProjectionTerm>> {
    let mut terms = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (pos, ch) in input.char_indices() {
        match ch {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                terms.push(&input[start..pos]);
                start = pos + 1;
            }
            _ => {}
        }
    }
    terms.push(&input[start..]);

    terms.into_iter().map(parse_term).collect()
}

fn parse_term(token: &str) -> DapResult<ProjectionTerm> {
    if token.contains('(') {
        return Ok(ProjectionTerm::Function(token.to_string()));
    }
    let components = token
        .split('.')
        .map(|part| {
            let (name, slab) = match part.find('[') {
                Some(pos) => part.split_at(pos),
                None => (part, ""),
            };
            Ok(PathComponent {
                name: name.to_string(),
                hyperslab: parse_hyperslab(slab)?,
            })
        })
        .collect::<DapResult<Vec<_>>>()?;
    Ok(ProjectionTerm::Path(components))
}

/// Parse `[start]`, `[start:stop]` or `[start:step:stop]` brackets into
/// slices. Wire stops are inclusive; the returned stops are exclusive.
pub fn parse_hyperslab(text: &str) -> DapResult<Vec<Slice>> {
    if text.is_empty() {
        return Ok(Vec::new());
    }
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| DapError::constraint(format!("Invalid hyperslab {}", text)))?;

    inner
        .split("][")
        .filter(|expr| !expr.is_empty())
        .map(|expr| {
            let fields = expr
                .split(':')
                .map(|f| f.trim().parse::<isize>())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|_| DapError::constraint(format!("Invalid hyperslab {}", text)))?;
            match fields[..] {
                [start] => Ok(Slice::stepped(start, start + 1, 1)),
                [start, stop] => Ok(Slice::stepped(start, stop + 1, 1)),
                [start, step, stop] => Ok(Slice::stepped(start, stop + 1, step)),
                _ => Err(DapError::constraint(format!("Invalid hyperslab {}", text))),
            }
        })
        .collect()
}

// ============================================================================
// Selection
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Le,
    Ge,
    Ne,
    /// `=~`, regular expression match.
    Match,
    Gt,
    Lt,
    Eq,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::Ne => "!=",
            Operator::Match => "=~",
            Operator::Gt => ">",
            Operator::Lt => "<",
            Operator::Eq => "=",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A literal operand.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
}

impl Literal {
    /// Parse a literal token: integers, floats, quoted strings and
    /// `True`/`False`.
    pub fn parse(token: &str) -> Option<Literal> {
        let token = token.trim();
        if token.len() >= 2 {
            let quoted = |q: char| token.starts_with(q) && token.ends_with(q);
            if quoted('"') || quoted('\'') {
                return Some(Literal::Str(token[1..token.len() - 1].to_string()));
            }
        }
        match token {
            "True" => return Some(Literal::Bool(true)),
            "False" => return Some(Literal::Bool(false)),
            _ => {}
        }
        if let Ok(i) = token.parse::<i64>() {
            return Some(Literal::Int(i));
        }
        let numeric = !token.is_empty()
            && token
                .chars()
                .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E'))
            && token.chars().any(|c| c.is_ascii_digit());
        if numeric {
            if let Ok(f) = token.parse::<f64>() {
                return Some(Literal::Float(f));
            }
        }
        None
    }
}

impl fmt::Display for Literal {
    /// The constraint-expression encoding of the literal.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(i) => write!(f, "{}", encode_number(*i as f64)),
            Literal::Float(x) => f.write_str(&encode_number(*x)),
            Literal::Str(s) => f.write_str(&encode_str(s)),
            Literal::Bool(b) => write!(f, "{}", u8::from(*b)),
        }
    }
}

impl From<i64> for Literal {
    fn from(i: i64) -> Self {
        Literal::Int(i)
    }
}

impl From<f64> for Literal {
    fn from(x: f64) -> Self {
        Literal::Float(x)
    }
}

impl From<&str> for Literal {
    fn from(s: &str) -> Self {
        Literal::Str(s.to_string())
    }
}

impl From<bool> for Literal {
    fn from(b: bool) -> Self {
        Literal::Bool(b)
    }
}

/// One side of a comparison: a variable of the dataset or a literal.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Variable(String),
    Literal(Literal),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Variable(id) => f.write_str(id),
            Operand::Literal(lit) => lit.fmt(f),
        }
    }
}

/// A parsed selection term.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub lhs: Operand,
    pub op: Operator,
    pub rhs: Operand,
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.lhs, self.op, self.rhs)
    }
}

/// Parse `lhs op rhs`. Each side is looked up as a dotted id in `dataset`
/// first and parsed as a literal otherwise.
pub fn parse_selection(expr: &str, dataset: &Dataset) -> DapResult<Selection> {
    let (pos, op) = OPERATORS
        .iter()
        .filter_map(|op| expr.find(op.as_str()).map(|pos| (pos, *op)))
        // Leftmost match wins; at equal positions the two-character operator
        // comes first in OPERATORS.
        .min_by_key(|(pos, _)| *pos)
        .ok_or_else(|| DapError::constraint(format!("no operator in selection {}", expr)))?;

    let lhs = &expr[..pos];
    let rhs = &expr[pos + op.as_str().len()..];
    Ok(Selection {
        lhs: resolve_operand(lhs, dataset)?,
        op,
        rhs: resolve_operand(rhs, dataset)?,
    })
}

fn resolve_operand(token: &str, dataset: &Dataset) -> DapResult<Operand> {
    let token = token.trim();
    if let Some(var) = dataset.get(token) {
        return Ok(Operand::Variable(var.id().to_string()));
    }
    Literal::parse(token)
        .map(Operand::Literal)
        .ok_or_else(|| {
            DapError::constraint(format!(
                "{} is neither a variable nor a literal",
                token
            ))
        })
}

// ============================================================================
// Shorthand
// ============================================================================

/// Rewrite bare names into full dotted paths.
///
/// A single-component path that is not a top-level base variable is looked
/// up among the nested base variables; a unique match is replaced by its
/// dotted id, the hyperslab moving to the last component. More than one
/// match is an [`DapError::AmbiguousShorthand`].
pub fn fix_shorthand(
    projection: Vec<ProjectionTerm>,
    dataset: &Dataset,
) -> DapResult<Vec<ProjectionTerm>> {
    projection
        .into_iter()
        .map(|term| match term {
            ProjectionTerm::Path(components) if components.len() == 1 => {
                resolve_shorthand(components, dataset).map(ProjectionTerm::Path)
            }
            other => Ok(other),
        })
        .collect()
}

fn resolve_shorthand(
    mut components: Vec<PathComponent>,
    dataset: &Dataset,
) -> DapResult<Vec<PathComponent>> {
    let token = components[0].name.clone();
    let top_level_base = dataset
        .variables
        .iter()
        .any(|v| v.name() == token && v.as_base().is_some());
    if top_level_base {
        return Ok(components);
    }

    let mut matches = dataset
        .walk()
        .into_iter()
        .filter(|v| matches!(v, VarRef::Base(_)) && v.name() == token && v.id().contains('.'));
    let Some(found) = matches.next() else {
        return Ok(components);
    };
    if matches.next().is_some() {
        return Err(DapError::AmbiguousShorthand(token));
    }

    let hyperslab = std::mem::take(&mut components[0].hyperslab);
    let mut path: Vec<PathComponent> = found
        .id()
        .split('.')
        .map(PathComponent::new)
        .collect();
    if let Some(last) = path.last_mut() {
        last.hyperslab = hyperslab;
    }
    Ok(path)
}
