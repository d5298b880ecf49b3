//! Metadata and constraint-expression parsers.

pub mod constraint;
pub mod das;
pub mod dds;
pub mod dmr;

pub use constraint::{
    fix_shorthand, parse_ce, parse_hyperslab, parse_projection, parse_selection, Constraint,
    Literal, Operand, Operator, PathComponent, ProjectionTerm, Selection,
};
pub use das::{add_attributes, parse_das};
pub use dds::{parse_dds, to_dds};
pub use dmr::parse_dmr;
