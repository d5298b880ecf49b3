//! DDS parsing and rendering.

use std::fmt::Write;

use tracing::debug;

use dap_common::{quote, unquote, DType, DapError, DapResult};

use crate::model::{BaseVar, Dataset, GridVar, SequenceVar, StructureVar, Variable};

const INDENT: &str = "    ";

/// Characters allowed in a dimension name.
fn is_dim_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | '%' | '!' | '~' | '"' | '\'' | '*' | '-')
}

/// Parse a DDS into a dataset whose variables carry no data.
pub fn parse_dds(text: &str) -> DapResult<Dataset> {
    let mut parser = DdsParser::new(text);
    let dataset = parser.dataset()?;
    debug!(
        dataset = %dataset.name,
        variables = dataset.variables.len(),
        "Parsed DDS"
    );
    Ok(dataset)
}

/// Recursive-descent parser. Every token consumes the whitespace after it.
struct DdsParser<'a> {
    buf: &'a str,
}

impl<'a> DdsParser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            buf: text.trim_start(),
        }
    }

    fn error(&self, expected: &str) -> DapError {
        let context: String = self.buf.chars().take(20).collect();
        DapError::parse("DDS", format!("expected {} at {:?}", expected, context))
    }

    fn advance(&mut self, n: usize) -> &'a str {
        let (token, rest) = self.buf.split_at(n);
        self.buf = rest.trim_start();
        token
    }

    fn peek_char(&self, c: char) -> bool {
        self.buf.starts_with(c)
    }

    fn peek_word(&self) -> &'a str {
        let end = self
            .buf
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(self.buf.len());
        &self.buf[..end]
    }

    fn char(&mut self, c: char) -> DapResult<()> {
        if !self.peek_char(c) {
            return Err(self.error(&format!("'{}'", c)));
        }
        self.advance(c.len_utf8());
        Ok(())
    }

    fn keyword(&mut self, keyword: &str) -> DapResult<()> {
        let word = self.peek_word();
        if !word.eq_ignore_ascii_case(keyword) {
            return Err(self.error(keyword));
        }
        self.advance(word.len());
        Ok(())
    }

    fn word(&mut self) -> DapResult<&'a str> {
        let word = self.peek_word();
        if word.is_empty() {
            return Err(self.error("a word"));
        }
        Ok(self.advance(word.len()))
    }

    /// Everything up to one of `stops`, trimmed and unquoted.
    fn name(&mut self, stops: &[char]) -> DapResult<String> {
        let end = self.buf.find(stops).unwrap_or(self.buf.len());
        let raw = self.advance(end).trim();
        if raw.is_empty() {
            return Err(self.error("a name"));
        }
        Ok(unquote(raw))
    }

    fn dim_token(&mut self) -> DapResult<&'a str> {
        let end = self
            .buf
            .find(|c: char| !is_dim_name_char(c))
            .unwrap_or(self.buf.len());
        if end == 0 {
            return Err(self.error("a dimension"));
        }
        Ok(self.advance(end))
    }

    fn dataset(&mut self) -> DapResult<Dataset> {
        self.keyword("dataset")?;
        let (children, name) = self.block()?;
        self.char(';')?;

        let mut dataset = Dataset::new(name);
        dataset.variables = children;
        dataset.assign_ids();
        Ok(dataset)
    }

    /// `{ decl* } name`
    fn block(&mut self) -> DapResult<(Vec<Variable>, String)> {
        self.char('{')?;
        let mut children = Vec::new();
        while !self.peek_char('}') {
            if self.buf.is_empty() {
                return Err(self.error("'}'"));
            }
            children.push(self.declaration()?);
        }
        self.char('}')?;
        let name = self.name(&[';'])?;
        Ok((children, name))
    }

    fn declaration(&mut self) -> DapResult<Variable> {
        match self.peek_word().to_ascii_lowercase().as_str() {
            "grid" => self.grid().map(Variable::Grid),
            "sequence" => {
                self.keyword("sequence")?;
                let (children, name) = self.block()?;
                self.char(';')?;
                let mut seq = SequenceVar::new(name);
                seq.children = children;
                Ok(Variable::Sequence(seq))
            }
            "structure" => {
                self.keyword("structure")?;
                let (children, name) = self.block()?;
                self.char(';')?;
                let mut st = StructureVar::new(name);
                st.children = children;
                Ok(Variable::Structure(st))
            }
            _ => self.base().map(Variable::Base),
        }
    }

    fn base(&mut self) -> DapResult<BaseVar> {
        let type_name = self.word()?;
        let dtype = DType::from_dap2(type_name)?;
        let name = self.name(&[';', '['])?;
        let (shape, dimensions) = self.dimensions()?;
        self.char(';')?;
        Ok(BaseVar::new(name, dtype, shape).with_dimensions(dimensions))
    }

    /// `[n]` or `[name = n]` repeated. Names are collected only when given.
    fn dimensions(&mut self) -> DapResult<(Vec<usize>, Vec<String>)> {
        let mut shape = Vec::new();
        let mut names = Vec::new();
        while !self.peek_char(';') {
            self.char('[')?;
            let mut token = self.dim_token()?;
            if self.peek_char('=') {
                names.push(unquote(token));
                self.char('=')?;
                token = self.dim_token()?;
            }
            let size = token
                .parse::<usize>()
                .map_err(|_| DapError::parse("DDS", format!("invalid dimension size {}", token)))?;
            shape.push(size);
            self.char(']')?;
        }
        Ok((shape, names))
    }

    fn grid(&mut self) -> DapResult<GridVar> {
        self.keyword("grid")?;
        self.char('{')?;
        self.keyword("array")?;
        self.char(':')?;
        let array = self.base()?;

        self.keyword("maps")?;
        self.char(':')?;
        let mut maps = Vec::new();
        while !self.peek_char('}') {
            if self.buf.is_empty() {
                return Err(self.error("'}'"));
            }
            maps.push(self.base()?);
        }
        self.char('}')?;
        let name = self.name(&[';'])?;
        self.char(';')?;
        Ok(GridVar::new(name, array, maps))
    }
}

// ============================================================================
// Rendering
// ============================================================================

/// Render a dataset as DDS text.
pub fn to_dds(dataset: &Dataset) -> String {
    let mut out = String::from("Dataset {\n");
    for var in &dataset.variables {
        render(&mut out, var, 1);
    }
    let _ = writeln!(out, "}} {};", quote(&dataset.name));
    out
}

fn render(out: &mut String, var: &Variable, level: usize) {
    let indent = INDENT.repeat(level);
    match var {
        Variable::Base(b) => render_base(out, b, level),
        Variable::Structure(s) => {
            let _ = writeln!(out, "{}Structure {{", indent);
            for child in &s.children {
                render(out, child, level + 1);
            }
            let _ = writeln!(out, "{}}} {};", indent, quote(&s.name));
        }
        Variable::Sequence(s) => {
            let _ = writeln!(out, "{}Sequence {{", indent);
            for child in &s.children {
                render(out, child, level + 1);
            }
            let _ = writeln!(out, "{}}} {};", indent, quote(&s.name));
        }
        Variable::Grid(g) => {
            let inner = INDENT.repeat(level + 1);
            let _ = writeln!(out, "{}Grid {{", indent);
            let _ = writeln!(out, "{}Array:", inner);
            render_base(out, &g.array, level + 2);
            let _ = writeln!(out, "{}Maps:", inner);
            for map in &g.maps {
                render_base(out, map, level + 2);
            }
            let _ = writeln!(out, "{}}} {};", indent, quote(&g.name));
        }
    }
}

fn render_base(out: &mut String, var: &BaseVar, level: usize) {
    let dims: String = if !var.dimensions.is_empty() {
        var.dimensions
            .iter()
            .zip(&var.shape)
            .map(|(name, n)| format!("[{} = {}]", quote(name), n))
            .collect()
    } else if var.shape.len() == 1 {
        format!("[{} = {}]", quote(&var.name), var.shape[0])
    } else {
        var.shape.iter().map(|n| format!("[{}]", n)).collect()
    };
    let _ = writeln!(
        out,
        "{}{} {}{};",
        INDENT.repeat(level),
        var.dtype.dap2_name(),
        quote(&var.name),
        dims
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::VarRef;

    const COADS: &str = "Dataset {
    Float64 COADSX[COADSX = 180];
    Float64 COADSY[COADSY = 90];
    Float64 TIME[TIME = 12];
    Grid {
     ARRAY:
        Float32 SST[TIME = 12][COADSY = 90][COADSX = 180];
     MAPS:
        Float64 TIME[TIME = 12];
        Float64 COADSY[COADSY = 90];
        Float64 COADSX[COADSX = 180];
    } SST;
} coads_climatology.nc;
";

    #[test]
    fn test_parse_grid() {
        let ds = parse_dds(COADS).unwrap();
        assert_eq!(ds.name, "coads_climatology.nc");
        assert_eq!(ds.keys(), vec!["COADSX", "COADSY", "TIME", "SST"]);

        let sst = ds.get("SST").unwrap();
        let VarRef::Grid(grid) = sst else {
            panic!("SST should be a grid")
        };
        assert_eq!(grid.shape(), &[12, 90, 180]);
        assert_eq!(grid.dtype(), DType::Float32);
        assert_eq!(grid.dimensions(), vec!["TIME", "COADSY", "COADSX"]);
        assert_eq!(grid.array.dimensions, vec!["TIME", "COADSY", "COADSX"]);
        assert_eq!(ds.base("SST.COADSY").unwrap().id, "SST.COADSY");
    }

    #[test]
    fn test_parse_sequence_and_structure() {
        let text = "Dataset {
    Sequence {
        Int32 id;
        String name;
        Structure {
            Float32 lat;
            Float32 lon;
        } position;
    } cast;
    byte flags[4];
} seq;";
        let ds = parse_dds(text).unwrap();
        let seq = ds.get("cast").unwrap();
        assert!(matches!(seq, VarRef::Sequence(_)));
        assert_eq!(ds.base("cast.position.lon").unwrap().dtype, DType::Float32);
        assert_eq!(ds.base("cast.name").unwrap().dtype, DType::String);
        let flags = ds.base("flags").unwrap();
        assert_eq!(flags.dtype, DType::UInt8);
        assert_eq!(flags.shape, vec![4]);
        assert!(flags.dimensions.is_empty());
    }

    #[test]
    fn test_names_are_unquoted() {
        let ds = parse_dds("Dataset { Int32 White%20space[2]; } x%2Ey;").unwrap();
        assert_eq!(ds.name, "x.y");
        assert_eq!(ds.keys(), vec!["White space"]);
    }

    #[test]
    fn test_errors() {
        assert!(matches!(
            parse_dds("Dataset { Int32 a[2] } x;"),
            Err(DapError::Parse { kind: "DDS", .. })
        ));
        assert!(matches!(
            parse_dds("Dataset { Complex a; } x;"),
            Err(DapError::UnknownType(_))
        ));
        assert!(parse_dds("Dataset { Int32 a[n = x]; } x;").is_err());
        assert!(parse_dds("Dataset { Int32 a;").is_err());
    }

    #[test]
    fn test_round_trip() {
        let ds = parse_dds(COADS).unwrap();
        let rendered = to_dds(&ds);
        assert!(rendered.contains("    Grid {\n        Array:\n"));
        assert!(rendered.contains("            Float32 SST[TIME = 12][COADSY = 90][COADSX = 180];\n"));

        let again = parse_dds(&rendered).unwrap();
        let before: Vec<_> = ds
            .walk()
            .iter()
            .map(|v| (v.id().to_string(), v.array().map(|b| (b.dtype, b.shape.clone()))))
            .collect();
        let after: Vec<_> = again
            .walk()
            .iter()
            .map(|v| (v.id().to_string(), v.array().map(|b| (b.dtype, b.shape.clone()))))
            .collect();
        assert_eq!(before, after);
        assert_eq!(again.name, ds.name);
    }

    #[test]
    fn test_render_unnamed_dimensions() {
        let mut ds = Dataset::new("x");
        ds.variables
            .push(Variable::Base(BaseVar::new("v", DType::Int8, vec![2, 3])));
        ds.variables
            .push(Variable::Base(BaseVar::new("w", DType::UInt8, vec![5])));
        let text = to_dds(&ds);
        assert_eq!(
            text,
            "Dataset {\n    Int16 v[2][3];\n    Byte w[w = 5];\n} x;\n"
        );
    }
}
