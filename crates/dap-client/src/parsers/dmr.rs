//! DMR parsing.
//!
//! The DMR is read into a small element tree (namespaces stripped), then
//! flattened: every atomic variable becomes a top-level [`BaseVar`] keyed by
//! its group path, named dimensions without a variable are synthesized, and
//! variables declaring `Map`s are promoted to grids.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, warn};

use dap_common::{ArrayData, AttrValue, Attributes, DType, DapError, DapResult, Values};

use crate::model::{BaseData, BaseVar, Dataset, GridVar, Variable};
use crate::parsers::constraint::Literal;

#[derive(Debug, Default)]
struct Element {
    tag: String,
    attrs: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    fn get(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    fn find_all<'a>(&'a self, tag: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |c| c.tag == tag)
    }
}

fn xml_error(err: impl std::fmt::Display) -> DapError {
    DapError::parse("DMR", err.to_string())
}

fn element_from(start: &BytesStart<'_>) -> DapResult<Element> {
    let tag = String::from_utf8_lossy(start.local_name().as_ref()).into_owned();
    let mut attrs = Vec::new();
    for attr in start.attributes() {
        let attr = attr.map_err(xml_error)?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
        let value = attr.unescape_value().map_err(xml_error)?.into_owned();
        attrs.push((key, value));
    }
    Ok(Element {
        tag,
        attrs,
        ..Default::default()
    })
}

fn parse_tree(text: &str) -> DapResult<Element> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Element> = Vec::new();
    let mut root = None;

    let attach = |element: Element, stack: &mut Vec<Element>, root: &mut Option<Element>| {
        match stack.last_mut() {
            Some(parent) => parent.children.push(element),
            None => *root = Some(element),
        }
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => stack.push(element_from(&e)?),
            Ok(Event::Empty(e)) => {
                let element = element_from(&e)?;
                attach(element, &mut stack, &mut root);
            }
            Ok(Event::Text(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&t.unescape().map_err(xml_error)?);
                }
            }
            Ok(Event::CData(t)) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&t));
                }
            }
            Ok(Event::End(_)) => {
                let element = stack
                    .pop()
                    .ok_or_else(|| DapError::parse("DMR", "unbalanced closing tag"))?;
                attach(element, &mut stack, &mut root);
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(DapError::parse(
                    "DMR",
                    format!("XML error at position {}: {}", reader.buffer_position(), e),
                ))
            }
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(DapError::parse("DMR", "document ended inside an element"));
    }
    root.ok_or_else(|| DapError::parse("DMR", "empty document"))
}

/// Strip the leading `/` of a root-level dimension or map reference.
fn reference_name(name: &str) -> String {
    match name.strip_prefix('/') {
        Some(rest) if !rest.contains('/') => rest.to_string(),
        _ => name.to_string(),
    }
}

/// Every descendant matching `select`, keyed by its group-prefixed path.
fn collect<'a>(
    node: &'a Element,
    prefix: &str,
    select: &dyn Fn(&Element) -> bool,
    out: &mut Vec<(String, &'a Element)>,
) {
    let Some(group) = node.get("name") else {
        return;
    };
    let prefix = if node.tag == "Dataset" {
        prefix.to_string()
    } else {
        format!("{}/{}", prefix, group)
    };
    for child in &node.children {
        if select(child) {
            if let Some(name) = child.get("name") {
                let path = if prefix.is_empty() {
                    name.to_string()
                } else {
                    format!("{}/{}", prefix, name)
                };
                out.push((path, child));
            }
        }
        collect(child, &prefix, select, out);
    }
}

fn attribute_value(element: &Element) -> AttrValue {
    let ltype = element.get("type").unwrap_or("String");
    if ltype.eq_ignore_ascii_case("container") || element.find_all("Attribute").next().is_some() {
        return AttrValue::Map(attributes_of(element));
    }

    let values: Vec<AttrValue> = element
        .find_all("Value")
        .map(|v| v.get("value").map(str::to_string).unwrap_or_else(|| v.text.clone()))
        .map(|raw| typed_value(ltype, &raw))
        .collect();
    if values.is_empty() {
        return AttrValue::Str(String::new());
    }
    AttrValue::collapse(values)
}

fn typed_value(ltype: &str, raw: &str) -> AttrValue {
    let numeric = DType::from_dap4(ltype).ok().filter(|t| !t.is_string());
    match numeric {
        Some(t) if t.is_float() => match raw.trim().to_ascii_lowercase().as_str() {
            "nan" | "-nan" => AttrValue::Float(f64::NAN),
            "inf" | "infinity" => AttrValue::Float(f64::INFINITY),
            "-inf" | "-infinity" => AttrValue::Float(f64::NEG_INFINITY),
            trimmed => trimmed
                .parse::<f64>()
                .map(AttrValue::Float)
                .unwrap_or_else(|_| AttrValue::Str(raw.to_string())),
        },
        Some(_) => match Literal::parse(raw) {
            Some(Literal::Int(i)) => AttrValue::Int(i),
            _ => AttrValue::Str(raw.to_string()),
        },
        None => AttrValue::Str(raw.to_string()),
    }
}

fn attributes_of(element: &Element) -> Attributes {
    element
        .find_all("Attribute")
        .filter_map(|a| a.get("name").map(|name| (name.to_string(), attribute_value(a))))
        .collect()
}

/// Parse a DMR into a dataset whose variables carry no data, except for
/// synthesized dimension variables which hold their own indices.
pub fn parse_dmr(text: &str) -> DapResult<Dataset> {
    let root = parse_tree(text)?;
    if root.tag != "Dataset" {
        return Err(DapError::parse(
            "DMR",
            format!("root element is {}, expected Dataset", root.tag),
        ));
    }
    let name = root
        .get("name")
        .ok_or_else(|| DapError::parse("DMR", "Dataset has no name"))?;

    let mut declared = Vec::new();
    collect(&root, "", &|e: &Element| DType::is_dap4_atomic(&e.tag), &mut declared);
    let mut dimension_elements = Vec::new();
    collect(&root, "", &|e: &Element| e.tag == "Dimension", &mut dimension_elements);

    let mut dimensions: Vec<(String, usize)> = Vec::new();
    for (path, element) in &dimension_elements {
        let size = element
            .get("size")
            .and_then(|s| s.trim().parse::<usize>().ok())
            .ok_or_else(|| DapError::parse("DMR", format!("dimension {} has no valid size", path)))?;
        dimensions.push((path.clone(), size));
    }
    let dimension_size = |dim: &str| {
        dimensions
            .iter()
            .find(|(name, _)| name == dim)
            .map(|(_, size)| *size)
            .ok_or_else(|| DapError::parse("DMR", format!("undeclared dimension {}", dim)))
    };

    let mut bases = Vec::with_capacity(declared.len());
    let mut maps_of = Vec::with_capacity(declared.len());
    for (path, element) in &declared {
        let dtype = DType::from_dap4(&element.tag)?;
        let mut shape = Vec::new();
        let mut names = Vec::new();
        let mut all_named = true;
        for dim in element.find_all("Dim") {
            match (dim.get("name"), dim.get("size")) {
                (Some(name), _) => {
                    let name = reference_name(name);
                    shape.push(dimension_size(&name)?);
                    names.push(name);
                }
                (None, Some(size)) => {
                    all_named = false;
                    shape.push(size.trim().parse::<usize>().map_err(|_| {
                        DapError::parse("DMR", format!("invalid size {} on {}", size, path))
                    })?);
                }
                (None, None) => {
                    return Err(DapError::parse(
                        "DMR",
                        format!("Dim without name or size on {}", path),
                    ))
                }
            }
        }

        let mut var = BaseVar::new(path.clone(), dtype, shape);
        if all_named {
            var.dimensions = names;
        }
        var.attributes = attributes_of(element);
        bases.push(var);

        let maps: Vec<String> = element
            .find_all("Map")
            .filter_map(|m| m.get("name").map(reference_name))
            .collect();
        maps_of.push(maps);
    }

    // Named dimensions no variable is declared for.
    let mut synthesized = Vec::new();
    for (dim, size) in &dimensions {
        if bases.iter().any(|b| &b.name == dim) {
            continue;
        }
        let values = Values::Int32((0..*size as i32).collect());
        let mut var = BaseVar::new(dim.clone(), DType::Int32, vec![*size])
            .with_dimensions(vec![dim.clone()]);
        var.data = BaseData::Values(ArrayData::vector(values));
        var.synthesized = true;
        synthesized.push(var);
    }

    let lookup: Vec<BaseVar> = bases.iter().chain(&synthesized).cloned().collect();
    let mut dataset = Dataset::new(name);
    for (var, maps) in bases.into_iter().zip(maps_of) {
        if maps.is_empty() {
            dataset.variables.push(Variable::Base(var));
            continue;
        }
        let mut map_vars = Vec::with_capacity(maps.len());
        for map in &maps {
            match lookup.iter().find(|b| &b.name == map) {
                Some(found) => map_vars.push(found.clone()),
                None => warn!(variable = %var.name, map = %map, "Map refers to an unknown variable"),
            }
        }
        let mut array = var;
        let attributes = std::mem::take(&mut array.attributes);
        let mut grid = GridVar::new(array.name.clone(), array, map_vars);
        grid.attributes = attributes;
        dataset.variables.push(Variable::Grid(grid));
    }
    dataset
        .variables
        .extend(synthesized.into_iter().map(Variable::Base));
    dataset.assign_ids();

    debug!(
        dataset = %dataset.name,
        variables = dataset.variables.len(),
        dimensions = dimensions.len(),
        "Parsed DMR"
    );
    Ok(dataset)
}
