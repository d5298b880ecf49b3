//! Element types carried by DAP variables.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DapError, DapResult};

/// Byte order of a binary payload. DAP2 is always big-endian; DAP4 declares
/// it in the first chunk header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

/// Logical element type of a base variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    Float64,
    Float32,
    Int64,
    UInt64,
    Int32,
    UInt32,
    Int16,
    UInt16,
    Int8,
    UInt8,
    String,
}

impl DType {
    /// Parse a DAP2 type name (case-insensitive), as found in a DDS or DAS.
    pub fn from_dap2(name: &str) -> DapResult<Self> {
        let dtype = match name.to_ascii_lowercase().as_str() {
            "float64" => DType::Float64,
            "float32" => DType::Float32,
            "int16" => DType::Int16,
            "uint16" => DType::UInt16,
            "int32" | "int" => DType::Int32,
            "uint32" | "uint" => DType::UInt32,
            "uint8" | "byte" => DType::UInt8,
            "string" | "url" => DType::String,
            _ => return Err(DapError::UnknownType(name.to_string())),
        };
        Ok(dtype)
    }

    /// Parse a DAP4 type name, as used for DMR element names.
    pub fn from_dap4(name: &str) -> DapResult<Self> {
        let dtype = match name {
            "Float64" => DType::Float64,
            "Float32" => DType::Float32,
            "Int64" => DType::Int64,
            "UInt64" => DType::UInt64,
            "Int32" => DType::Int32,
            "UInt32" => DType::UInt32,
            "Int16" => DType::Int16,
            "UInt16" => DType::UInt16,
            "Int8" => DType::Int8,
            "UInt8" | "Byte" | "Char" => DType::UInt8,
            "String" | "Url" | "URL" => DType::String,
            _ => return Err(DapError::UnknownType(name.to_string())),
        };
        Ok(dtype)
    }

    /// Whether `name` is a DAP4 atomic type element.
    pub fn is_dap4_atomic(name: &str) -> bool {
        Self::from_dap4(name).is_ok()
    }

    /// Name used when rendering a DDS. DAP2 has no signed byte and no 64-bit
    /// integers, so those widen or narrow to the nearest DAP2 type.
    pub fn dap2_name(&self) -> &'static str {
        match self {
            DType::Float64 => "Float64",
            DType::Float32 => "Float32",
            DType::Int64 | DType::Int32 => "Int32",
            DType::UInt64 | DType::UInt32 => "UInt32",
            DType::Int16 | DType::Int8 => "Int16",
            DType::UInt16 => "UInt16",
            DType::UInt8 => "Byte",
            DType::String => "String",
        }
    }

    pub fn dap4_name(&self) -> &'static str {
        match self {
            DType::Float64 => "Float64",
            DType::Float32 => "Float32",
            DType::Int64 => "Int64",
            DType::UInt64 => "UInt64",
            DType::Int32 => "Int32",
            DType::UInt32 => "UInt32",
            DType::Int16 => "Int16",
            DType::UInt16 => "UInt16",
            DType::Int8 => "Int8",
            DType::UInt8 => "UInt8",
            DType::String => "String",
        }
    }

    /// Size in bytes of one element in memory, `None` for strings.
    pub fn item_size(&self) -> Option<usize> {
        match self {
            DType::Float64 | DType::Int64 | DType::UInt64 => Some(8),
            DType::Float32 | DType::Int32 | DType::UInt32 => Some(4),
            DType::Int16 | DType::UInt16 => Some(2),
            DType::Int8 | DType::UInt8 => Some(1),
            DType::String => None,
        }
    }

    /// Type actually transmitted in a DAP2 data response. 16-bit integers
    /// travel as 32-bit integers, and the signed byte travels as a 16-bit
    /// integer (itself sent as 32 bits).
    pub fn dap2_wire_type(&self) -> DType {
        match self {
            DType::Int16 | DType::Int8 => DType::Int32,
            DType::UInt16 => DType::UInt32,
            other => *other,
        }
    }

    /// Size in bytes of one element on the DAP2 wire, `None` for strings.
    pub fn dap2_wire_size(&self) -> Option<usize> {
        self.dap2_wire_type().item_size()
    }

    pub fn is_string(&self) -> bool {
        matches!(self, DType::String)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, DType::Float64 | DType::Float32)
    }

    pub fn is_signed(&self) -> bool {
        matches!(
            self,
            DType::Float64
                | DType::Float32
                | DType::Int64
                | DType::Int32
                | DType::Int16
                | DType::Int8
        )
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dap4_name())
    }
}
