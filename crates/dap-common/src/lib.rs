//! Common types and utilities for the DAP client.

pub mod attributes;
pub mod dtype;
pub mod error;
pub mod quote;
pub mod slice;
pub mod values;

pub use attributes::{AttrValue, Attributes};
pub use dtype::{ByteOrder, DType};
pub use error::{DapError, DapResult, TransportError};
pub use quote::{quote, unquote};
pub use slice::{Index, Selector, Slice, Span};
pub use values::{ArrayData, Record, Value, Values};
