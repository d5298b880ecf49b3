//! The dataset variable tree.
//!
//! A [`Dataset`] owns an ordered list of [`Variable`]s. Leaves are
//! [`BaseVar`]s whose data is either declared only, bound to decoded values,
//! or bound to a lazy [`ArrayProxy`]. Sequences carry a streaming
//! [`SequenceProxy`] instead of an array.

use serde::Serialize;

use dap_common::slice::normalize;
use dap_common::{ArrayData, Attributes, DType, DapError, DapResult, Index, Record, Value};

use crate::functions::Functions;
use crate::proxy::{ArrayProxy, SequenceProxy};

// ============================================================================
// Base variables
// ============================================================================

/// Data bound to a base variable.
#[derive(Debug, Clone, Default)]
pub enum BaseData {
    /// Only type and shape are known.
    #[default]
    Declared,
    /// Values decoded from a response or a file.
    Values(ArrayData),
    /// Values fetched on demand from a server.
    Remote(ArrayProxy),
}

/// A scalar or rectangular array of one element type.
#[derive(Debug, Clone)]
pub struct BaseVar {
    pub name: String,
    /// Ancestor names joined with `.`.
    pub id: String,
    pub dtype: DType,
    pub shape: Vec<usize>,
    /// Named dimensions, parallel to `shape` when present.
    pub dimensions: Vec<String>,
    pub attributes: Attributes,
    pub data: BaseData,
    /// DAP4 checksum read after the variable's payload.
    pub checksum: Option<u32>,
    /// Declared only as a DMR dimension, never sent on the wire.
    pub synthesized: bool,
}

impl BaseVar {
    pub fn new(name: impl Into<String>, dtype: DType, shape: Vec<usize>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            dtype,
            shape,
            dimensions: Vec::new(),
            attributes: Attributes::new(),
            data: BaseData::Declared,
            checksum: None,
            synthesized: false,
        }
    }

    pub fn with_dimensions(mut self, dimensions: Vec<String>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Number of elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn proxy(&self) -> Option<&ArrayProxy> {
        match &self.data {
            BaseData::Remote(proxy) => Some(proxy),
            _ => None,
        }
    }

    pub fn values(&self) -> Option<&ArrayData> {
        match &self.data {
            BaseData::Values(values) => Some(values),
            _ => None,
        }
    }

    /// Read a subset of the variable. Remote data triggers one request.
    pub fn get(&self, index: &[Index]) -> DapResult<ArrayData> {
        match &self.data {
            BaseData::Values(values) => {
                let selectors = normalize(index, &values.shape)?;
                values.select(&selectors)
            }
            BaseData::Remote(proxy) => proxy.get(index),
            BaseData::Declared => Err(DapError::NoData(self.id.clone())),
        }
    }

    /// Read the whole variable.
    pub fn read(&self) -> DapResult<ArrayData> {
        self.get(&[Index::Ellipsis])
    }

    /// Narrow the remote view without fetching anything.
    pub fn index(&self, index: &[Index]) -> DapResult<ArrayProxy> {
        match &self.data {
            BaseData::Remote(proxy) => proxy.index(index),
            _ => Err(DapError::NoData(format!("{} has no remote data", self.id))),
        }
    }
}

// ============================================================================
// Containers
// ============================================================================

/// A record of named children.
#[derive(Debug, Clone)]
pub struct StructureVar {
    pub name: String,
    pub id: String,
    pub attributes: Attributes,
    pub children: Vec<Variable>,
}

impl StructureVar {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            attributes: Attributes::new(),
            children: Vec::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.children.iter().find(|c| c.name() == name)
    }
}

/// Records bound to a sequence.
#[derive(Debug, Clone, Default)]
pub enum SequenceData {
    #[default]
    Declared,
    Records(Vec<Record>),
    Remote(SequenceProxy),
}

/// An unbounded stream of records.
#[derive(Debug, Clone)]
pub struct SequenceVar {
    pub name: String,
    pub id: String,
    pub attributes: Attributes,
    pub children: Vec<Variable>,
    pub data: SequenceData,
}

impl SequenceVar {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            attributes: Attributes::new(),
            children: Vec::new(),
            data: SequenceData::Declared,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.children.iter().find(|c| c.name() == name)
    }

    pub fn proxy(&self) -> Option<&SequenceProxy> {
        match &self.data {
            SequenceData::Remote(proxy) => Some(proxy),
            _ => None,
        }
    }

    /// Iterate over the records, streaming them from the server when the
    /// sequence is remote.
    pub fn records(&self) -> DapResult<Box<dyn Iterator<Item = DapResult<Record>> + '_>> {
        match &self.data {
            SequenceData::Records(records) => Ok(Box::new(records.iter().cloned().map(Ok))),
            SequenceData::Remote(proxy) => Ok(Box::new(proxy.iter()?)),
            SequenceData::Declared => Err(DapError::NoData(self.id.clone())),
        }
    }
}

/// Result of reading a grid.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GridData {
    /// Only the main array, when `output_grid` is off.
    Array(ArrayData),
    /// The array together with its coordinate maps.
    Bundle {
        array: ArrayData,
        maps: Vec<(String, ArrayData)>,
    },
}

impl GridData {
    pub fn array(&self) -> &ArrayData {
        match self {
            GridData::Array(array) | GridData::Bundle { array, .. } => array,
        }
    }
}

/// An array bundled with its coordinate axes.
#[derive(Debug, Clone)]
pub struct GridVar {
    pub name: String,
    pub id: String,
    pub attributes: Attributes,
    pub array: BaseVar,
    pub maps: Vec<BaseVar>,
    pub output_grid: bool,
}

impl GridVar {
    pub fn new(name: impl Into<String>, array: BaseVar, maps: Vec<BaseVar>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            attributes: Attributes::new(),
            array,
            maps,
            output_grid: true,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.array.shape
    }

    pub fn dtype(&self) -> DType {
        self.array.dtype
    }

    /// Names of the map variables, one per axis.
    pub fn dimensions(&self) -> Vec<&str> {
        self.maps.iter().map(|m| m.name.as_str()).collect()
    }

    pub fn map(&self, name: &str) -> Option<&BaseVar> {
        self.maps.iter().find(|m| m.name == name)
    }

    /// Read a subset of the grid. With `output_grid` on, each map is read
    /// with the index term of its axis.
    pub fn get(&self, index: &[Index]) -> DapResult<GridData> {
        let array = self.array.get(index)?;
        if !self.output_grid {
            return Ok(GridData::Array(array));
        }

        let selectors = normalize(index, &self.array.shape)?;
        let maps = self
            .maps
            .iter()
            .zip(selectors)
            .map(|(map, sel)| Ok((map.name.clone(), map.get(&[Index::from(sel)])?)))
            .collect::<DapResult<Vec<_>>>()?;
        Ok(GridData::Bundle { array, maps })
    }
}

// ============================================================================
// Variable
// ============================================================================

/// Closed set of DAP variable kinds.
#[derive(Debug, Clone)]
pub enum Variable {
    Base(BaseVar),
    Structure(StructureVar),
    Sequence(SequenceVar),
    Grid(GridVar),
}

impl Variable {
    pub fn name(&self) -> &str {
        VarRef::from(self).name()
    }

    pub fn id(&self) -> &str {
        VarRef::from(self).id()
    }

    pub fn attributes(&self) -> &Attributes {
        VarRef::from(self).attributes()
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        match self {
            Variable::Base(v) => &mut v.attributes,
            Variable::Structure(v) => &mut v.attributes,
            Variable::Sequence(v) => &mut v.attributes,
            Variable::Grid(v) => &mut v.attributes,
        }
    }

    /// DDS keyword of the variable kind, or the element type for base
    /// variables.
    pub fn kind(&self) -> &'static str {
        match self {
            Variable::Base(v) => v.dtype.dap2_name(),
            Variable::Structure(_) => "Structure",
            Variable::Sequence(_) => "Sequence",
            Variable::Grid(_) => "Grid",
        }
    }

    pub fn as_base(&self) -> Option<&BaseVar> {
        match self {
            Variable::Base(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_grid(&self) -> Option<&GridVar> {
        match self {
            Variable::Grid(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&SequenceVar> {
        match self {
            Variable::Sequence(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_structure(&self) -> Option<&StructureVar> {
        match self {
            Variable::Structure(v) => Some(v),
            _ => None,
        }
    }

    /// Recompute ids below `parent`.
    pub fn assign_ids(&mut self, parent: Option<&str>) {
        let make = |name: &str| match parent {
            Some(p) => format!("{}.{}", p, name),
            None => name.to_string(),
        };
        match self {
            Variable::Base(v) => v.id = make(&v.name),
            Variable::Structure(v) => {
                v.id = make(&v.name);
                for child in &mut v.children {
                    child.assign_ids(Some(&v.id));
                }
            }
            Variable::Sequence(v) => {
                v.id = make(&v.name);
                for child in &mut v.children {
                    child.assign_ids(Some(&v.id));
                }
            }
            Variable::Grid(v) => {
                v.id = make(&v.name);
                v.array.id = format!("{}.{}", v.id, v.array.name);
                for map in &mut v.maps {
                    map.id = format!("{}.{}", v.id, map.name);
                }
            }
        }
    }

    /// Bind decoded values, which must mirror the variable's layout.
    pub fn set_value(&mut self, value: Value) -> DapResult<()> {
        match (self, value) {
            (Variable::Base(b), Value::Array(data)) => b.data = BaseData::Values(data),
            (Variable::Structure(s), Value::Structure(values)) => {
                bind_children(&s.id, &mut s.children, values)?;
            }
            (Variable::Sequence(s), Value::Sequence(records)) => {
                s.data = SequenceData::Records(records);
            }
            (Variable::Grid(g), Value::Structure(values)) => {
                if values.len() != g.maps.len() + 1 {
                    return Err(DapError::decode(format!(
                        "grid {} expects {} members, got {}",
                        g.id,
                        g.maps.len() + 1,
                        values.len()
                    )));
                }
                let mut values = values.into_iter();
                let members = std::iter::once(&mut g.array).chain(g.maps.iter_mut());
                for (member, value) in members.zip(&mut values) {
                    match value {
                        Value::Array(data) => member.data = BaseData::Values(data),
                        _ => {
                            return Err(DapError::decode(format!(
                                "grid member {} must be an array",
                                member.id
                            )))
                        }
                    }
                }
            }
            (var, _) => {
                return Err(DapError::decode(format!(
                    "decoded value does not match the layout of {}",
                    var.id()
                )))
            }
        }
        Ok(())
    }
}

fn bind_children(id: &str, children: &mut [Variable], values: Vec<Value>) -> DapResult<()> {
    if values.len() != children.len() {
        return Err(DapError::decode(format!(
            "{} expects {} members, got {}",
            id,
            children.len(),
            values.len()
        )));
    }
    for (child, value) in children.iter_mut().zip(values) {
        child.set_value(value)?;
    }
    Ok(())
}

/// Borrowed view of any node below a dataset, including grid members.
#[derive(Debug, Clone, Copy)]
pub enum VarRef<'a> {
    Base(&'a BaseVar),
    Structure(&'a StructureVar),
    Sequence(&'a SequenceVar),
    Grid(&'a GridVar),
}

impl<'a> From<&'a Variable> for VarRef<'a> {
    fn from(var: &'a Variable) -> Self {
        match var {
            Variable::Base(v) => VarRef::Base(v),
            Variable::Structure(v) => VarRef::Structure(v),
            Variable::Sequence(v) => VarRef::Sequence(v),
            Variable::Grid(v) => VarRef::Grid(v),
        }
    }
}

impl<'a> VarRef<'a> {
    pub fn name(&self) -> &'a str {
        match self {
            VarRef::Base(v) => &v.name,
            VarRef::Structure(v) => &v.name,
            VarRef::Sequence(v) => &v.name,
            VarRef::Grid(v) => &v.name,
        }
    }

    pub fn id(&self) -> &'a str {
        match self {
            VarRef::Base(v) => &v.id,
            VarRef::Structure(v) => &v.id,
            VarRef::Sequence(v) => &v.id,
            VarRef::Grid(v) => &v.id,
        }
    }

    pub fn attributes(&self) -> &'a Attributes {
        match self {
            VarRef::Base(v) => &v.attributes,
            VarRef::Structure(v) => &v.attributes,
            VarRef::Sequence(v) => &v.attributes,
            VarRef::Grid(v) => &v.attributes,
        }
    }

    pub fn children(&self) -> Vec<VarRef<'a>> {
        match self {
            VarRef::Base(_) => Vec::new(),
            VarRef::Structure(v) => v.children.iter().map(VarRef::from).collect(),
            VarRef::Sequence(v) => v.children.iter().map(VarRef::from).collect(),
            VarRef::Grid(v) => std::iter::once(&v.array)
                .chain(&v.maps)
                .map(VarRef::Base)
                .collect(),
        }
    }

    pub fn child(&self, name: &str) -> Option<VarRef<'a>> {
        self.children().into_iter().find(|c| c.name() == name)
    }

    /// The base variable holding this node's array data. Grids resolve to
    /// their main array.
    pub fn array(&self) -> Option<&'a BaseVar> {
        match self {
            VarRef::Base(v) => Some(v),
            VarRef::Grid(v) => Some(&v.array),
            _ => None,
        }
    }
}

// ============================================================================
// Dataset
// ============================================================================

/// Root of a variable tree.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub name: String,
    pub attributes: Attributes,
    pub variables: Vec<Variable>,
    /// Server-side functions, available on datasets opened from a URL.
    pub functions: Option<Functions>,
}

impl Dataset {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Attributes::new(),
            variables: Vec::new(),
            functions: None,
        }
    }

    /// Names of the top-level variables in declaration order.
    pub fn keys(&self) -> Vec<&str> {
        self.variables.iter().map(Variable::name).collect()
    }

    /// Look up a node by its dotted id.
    pub fn get(&self, id: &str) -> Option<VarRef<'_>> {
        let mut components = id.split('.');
        let first = components.next()?;
        let mut node = self
            .variables
            .iter()
            .find(|v| v.name() == first)
            .map(VarRef::from)?;
        for component in components {
            node = node.child(component)?;
        }
        Some(node)
    }

    /// Look up a node by id, failing with `VariableNotFound`.
    pub fn var(&self, id: &str) -> DapResult<VarRef<'_>> {
        self.get(id)
            .ok_or_else(|| DapError::VariableNotFound(id.to_string()))
    }

    /// The base variable at `id`; grids resolve to their main array.
    pub fn base(&self, id: &str) -> DapResult<&BaseVar> {
        self.var(id)?
            .array()
            .ok_or_else(|| DapError::VariableNotFound(format!("{} is not an array", id)))
    }

    /// Every node in pre-order, not including the dataset itself.
    pub fn walk(&self) -> Vec<VarRef<'_>> {
        fn visit<'a>(node: VarRef<'a>, out: &mut Vec<VarRef<'a>>) {
            out.push(node);
            for child in node.children() {
                visit(child, out);
            }
        }
        let mut out = Vec::new();
        for var in &self.variables {
            visit(VarRef::from(var), &mut out);
        }
        out
    }

    /// Recompute every id from the names in the tree.
    pub fn assign_ids(&mut self) {
        for var in &mut self.variables {
            var.assign_ids(None);
        }
    }

    /// Mutable attribute mapping of the node at `id`.
    pub fn attributes_mut(&mut self, id: &str) -> Option<&mut Attributes> {
        let components: Vec<&str> = id.split('.').collect();
        let (first, rest) = components.split_first()?;
        let var = self.variables.iter_mut().find(|v| v.name() == *first)?;
        attributes_below(var, rest)
    }

    /// Every base variable outside sequences, including grid members.
    pub fn bases_mut(&mut self) -> Vec<&mut BaseVar> {
        fn visit<'a>(var: &'a mut Variable, out: &mut Vec<&'a mut BaseVar>) {
            match var {
                Variable::Base(b) => out.push(b),
                Variable::Structure(s) => {
                    for child in &mut s.children {
                        visit(child, out);
                    }
                }
                Variable::Sequence(_) => {}
                Variable::Grid(g) => {
                    out.push(&mut g.array);
                    out.extend(g.maps.iter_mut());
                }
            }
        }
        let mut out = Vec::new();
        for var in &mut self.variables {
            visit(var, &mut out);
        }
        out
    }

    /// Every sequence, including nested ones.
    pub fn sequences_mut(&mut self) -> Vec<&mut SequenceVar> {
        fn visit<'a>(var: &'a mut Variable, out: &mut Vec<&'a mut SequenceVar>) {
            match var {
                Variable::Structure(s) => {
                    for child in &mut s.children {
                        visit(child, out);
                    }
                }
                Variable::Sequence(s) => out.push(s),
                Variable::Base(_) | Variable::Grid(_) => {}
            }
        }
        let mut out = Vec::new();
        for var in &mut self.variables {
            visit(var, &mut out);
        }
        out
    }

    /// Every grid, including those nested in structures.
    pub fn grids_mut(&mut self) -> Vec<&mut GridVar> {
        fn visit<'a>(var: &'a mut Variable, out: &mut Vec<&'a mut GridVar>) {
            match var {
                Variable::Structure(s) => {
                    for child in &mut s.children {
                        visit(child, out);
                    }
                }
                Variable::Sequence(s) => {
                    for child in &mut s.children {
                        visit(child, out);
                    }
                }
                Variable::Grid(g) => out.push(g),
                Variable::Base(_) => {}
            }
        }
        let mut out = Vec::new();
        for var in &mut self.variables {
            visit(var, &mut out);
        }
        out
    }

    /// Switch every grid between array-only and array-with-maps reads.
    pub fn set_output_grid(&mut self, output_grid: bool) {
        for grid in self.grids_mut() {
            grid.output_grid = output_grid;
        }
    }

    /// Bind one decoded value per top-level variable.
    pub fn set_values(&mut self, values: Vec<Value>) -> DapResult<()> {
        bind_children(&self.name, &mut self.variables, values)
    }
}

fn attributes_below<'a>(var: &'a mut Variable, rest: &[&str]) -> Option<&'a mut Attributes> {
    let Some((next, rest)) = rest.split_first() else {
        return Some(var.attributes_mut());
    };
    match var {
        Variable::Base(_) => None,
        Variable::Structure(s) => {
            let child = s.children.iter_mut().find(|c| c.name() == *next)?;
            attributes_below(child, rest)
        }
        Variable::Sequence(s) => {
            let child = s.children.iter_mut().find(|c| c.name() == *next)?;
            attributes_below(child, rest)
        }
        Variable::Grid(g) => {
            if !rest.is_empty() {
                return None;
            }
            if g.array.name == *next {
                return Some(&mut g.array.attributes);
            }
            g.maps
                .iter_mut()
                .find(|m| m.name == *next)
                .map(|m| &mut m.attributes)
        }
    }
}
