//! DAS parsing and attribute attachment.
//!
//! [`parse_das`] turns a DAS document into nested [`Attributes`];
//! [`add_attributes`] distributes them over the variables of a dataset.

use tracing::{debug, warn};

use dap_common::attributes::merge;
use dap_common::{unquote, AttrValue, Attributes, DapError, DapResult};

use crate::model::Dataset;
use crate::parsers::constraint::Literal;

/// Containers always copied onto the dataset itself.
const GLOBAL_CONTAINERS: [&str; 2] = ["NC_GLOBAL", "DODS_EXTRA"];

/// Parse a DAS into nested attribute mappings.
pub fn parse_das(text: &str) -> DapResult<Attributes> {
    let mut parser = DasParser {
        buf: text.trim_start(),
    };
    parser.keyword("attributes")?;
    let attributes = parser.container()?;
    debug!(containers = attributes.len(), "Parsed DAS");
    Ok(attributes)
}

struct DasParser<'a> {
    buf: &'a str,
}

impl<'a> DasParser<'a> {
    fn error(&self, expected: &str) -> DapError {
        let context: String = self.buf.chars().take(20).collect();
        DapError::parse("DAS", format!("expected {} at {:?}", expected, context))
    }

    fn advance(&mut self, n: usize) -> &'a str {
        let (token, rest) = self.buf.split_at(n);
        self.buf = rest.trim_start();
        token
    }

    fn char(&mut self, c: char) -> DapResult<()> {
        if !self.buf.starts_with(c) {
            return Err(self.error(&format!("'{}'", c)));
        }
        self.advance(c.len_utf8());
        Ok(())
    }

    fn keyword(&mut self, keyword: &str) -> DapResult<()> {
        let token = self.peek_token();
        if !token.eq_ignore_ascii_case(keyword) {
            return Err(self.error(keyword));
        }
        self.advance(token.len());
        Ok(())
    }

    /// The next run of non-whitespace characters.
    fn peek_token(&self) -> &'a str {
        let end = self
            .buf
            .find(char::is_whitespace)
            .unwrap_or(self.buf.len());
        &self.buf[..end]
    }

    fn token(&mut self) -> DapResult<&'a str> {
        let token = self.peek_token();
        if token.is_empty() {
            return Err(self.error("a token"));
        }
        Ok(self.advance(token.len()))
    }

    /// Whether the next tokens are `name {`, opening a nested container.
    fn at_container(&self) -> bool {
        let token = self.peek_token();
        !token.is_empty() && self.buf[token.len()..].trim_start().starts_with('{')
    }

    fn container(&mut self) -> DapResult<Attributes> {
        self.char('{')?;
        let mut out = Attributes::new();
        while !self.buf.starts_with('}') {
            if self.buf.is_empty() {
                return Err(self.error("'}'"));
            }
            if self.at_container() {
                let name = unquote(self.token()?);
                let nested = self.container()?;
                out.insert(name, AttrValue::Map(nested));
            } else {
                let (name, value) = self.attribute()?;
                out.insert(name, value);
            }
        }
        self.char('}')?;
        Ok(out)
    }

    fn attribute(&mut self) -> DapResult<(String, AttrValue)> {
        let ltype = self.token()?.to_ascii_lowercase();
        let name = self.token()?.to_string();
        let is_text = ltype == "string" || ltype == "url";

        let mut values = Vec::new();
        while !self.buf.starts_with(';') {
            if self.buf.is_empty() {
                return Err(self.error("';'"));
            }
            let raw = self.value()?;
            values.push(if is_text {
                AttrValue::Str(raw.trim_matches('"').to_string())
            } else {
                literal_value(&name, raw.trim())
            });
            if self.buf.starts_with(',') {
                self.advance(1);
            }
        }
        self.char(';')?;
        Ok((name, AttrValue::collapse(values)))
    }

    /// One raw value: `""`, a quoted string up to an unescaped quote, or
    /// everything up to the next `;` or `,`.
    fn value(&mut self) -> DapResult<&'a str> {
        if self.buf.starts_with("\"\"") {
            return Ok(self.advance(2));
        }
        if self.buf.starts_with('"') {
            let bytes = self.buf.as_bytes();
            let end = (2..bytes.len())
                .find(|&i| bytes[i] == b'"' && bytes[i - 1] != b'\\')
                .ok_or_else(|| self.error("a closing quote"))?;
            return Ok(self.advance(end + 1));
        }
        let end = self.buf.find([';', ',']).unwrap_or(self.buf.len());
        if end == 0 {
            return Err(self.error("a value"));
        }
        Ok(self.advance(end))
    }
}

/// Evaluate a non-string attribute value.
fn literal_value(name: &str, raw: &str) -> AttrValue {
    match raw.to_ascii_lowercase().as_str() {
        "nan" | "nan." | "-nan" => return AttrValue::Float(f64::NAN),
        "inf" | "inf." => return AttrValue::Float(f64::INFINITY),
        "-inf" | "-inf." => return AttrValue::Float(f64::NEG_INFINITY),
        _ => {}
    }
    match Literal::parse(raw) {
        Some(Literal::Int(i)) => AttrValue::Int(i),
        Some(Literal::Float(f)) => AttrValue::Float(f),
        Some(Literal::Bool(b)) => AttrValue::Bool(b),
        Some(Literal::Str(s)) => AttrValue::Str(s),
        None => {
            warn!(attribute = %name, value = %raw, "Unparseable DAS value, keeping it as a string");
            AttrValue::Str(raw.to_string())
        }
    }
}

/// Attach parsed DAS attributes to the variables of `dataset`.
///
/// Variables are visited leaves first. A variable picks up a container keyed
/// by its full dotted id (`"foo.bar"`) or nested under its ancestors'
/// containers (`foo { bar { ... } }`). Whatever is left over, including
/// `NC_GLOBAL` and `DODS_EXTRA`, lands on the dataset.
pub fn add_attributes(dataset: &mut Dataset, mut attributes: Attributes) {
    for key in GLOBAL_CONTAINERS {
        let value = attributes
            .get(key)
            .cloned()
            .unwrap_or_else(|| AttrValue::Map(Attributes::new()));
        dataset.attributes.insert(key.to_string(), value);
    }

    let ids: Vec<String> = dataset.walk().iter().map(|v| v.id().to_string()).collect();
    for id in ids.iter().rev() {
        let path: Vec<&str> = id.split('.').collect();
        let flat = take_container(&mut attributes, &[id.as_str()]);
        let nested = if path.len() > 1 {
            take_container(&mut attributes, &path)
        } else {
            None
        };
        if flat.is_none() && nested.is_none() {
            continue;
        }
        if let Some(target) = dataset.attributes_mut(id) {
            for found in flat.into_iter().chain(nested) {
                merge(target, found);
            }
        }
    }

    for (key, value) in attributes {
        dataset.attributes.insert(key, value);
    }
}

/// Remove and return the container at `path`. Non-container values are left
/// in place for the parent to pick up.
fn take_container(attributes: &mut Attributes, path: &[&str]) -> Option<Attributes> {
    let (last, parents) = path.split_last()?;
    let mut node = attributes;
    for parent in parents {
        node = match node.get_mut(*parent) {
            Some(AttrValue::Map(inner)) => inner,
            _ => return None,
        };
    }
    if !matches!(node.get(*last), Some(AttrValue::Map(_))) {
        return None;
    }
    match node.remove(*last) {
        Some(AttrValue::Map(found)) => Some(found),
        _ => None,
    }
}
