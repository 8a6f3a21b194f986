//! # Row Encoding
//!
//! The tagged byte format shared between the storage core and the query
//! layer. A row is the concatenation of its column encodings, each a
//! one-byte type tag followed by the value:
//!
//! ```text
//! Tag  Type    Payload
//! ---  ------  ------------------------------------
//! 0    NULL    (nothing)
//! 1    INT     8 bytes, little-endian i64
//! 2    FLOAT   8 bytes, IEEE-754 double, little-endian
//! 3    STRING  u16 length, then the bytes, no terminator
//! 4    BOOL    one byte, 0 or 1
//! ```
//!
//! Decoding stops at the schema's column count; trailing bytes are
//! rejected only implicitly (a malformed stream usually trips a length
//! check first).

use crate::error::{Error, Result};
use crate::schema::ColumnType;

/// One column value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Bool(bool),
}

/// A row in schema column order.
pub type Row = Vec<Value>;

impl Value {
    pub fn type_tag(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Int(_) => 1,
            Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Bool(_) => 4,
        }
    }

    /// NULL matches every column type; everything else must match.
    pub fn matches_type(&self, column_type: ColumnType) -> bool {
        matches!(
            (self, column_type),
            (Value::Null, _)
                | (Value::Int(_), ColumnType::Int)
                | (Value::Float(_), ColumnType::Float)
                | (Value::Text(_), ColumnType::Varchar)
                | (Value::Bool(_), ColumnType::Bool)
        )
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", if *v { "TRUE" } else { "FALSE" }),
        }
    }
}

/// Serialize a row: per-column tag + value, concatenated.
pub fn encode_row(row: &[Value]) -> Vec<u8> {
    let mut out = Vec::with_capacity(row.len() * 9);
    for value in row {
        out.push(value.type_tag());
        match value {
            Value::Null => {}
            Value::Int(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Float(v) => out.extend_from_slice(&v.to_le_bytes()),
            Value::Text(v) => {
                out.extend_from_slice(&(v.len() as u16).to_le_bytes());
                out.extend_from_slice(v.as_bytes());
            }
            Value::Bool(v) => out.push(u8::from(*v)),
        }
    }
    out
}

/// Decode `column_count` values from `bytes`.
pub fn decode_row(bytes: &[u8], column_count: usize) -> Result<Row> {
    let mut row = Vec::with_capacity(column_count);
    let mut offset = 0usize;

    for column in 0..column_count {
        let Some(&tag) = bytes.get(offset) else {
            return Err(Error::InvalidRow(format!(
                "row truncated at column {}",
                column
            )));
        };
        offset += 1;

        let value = match tag {
            0 => Value::Null,
            1 => {
                let raw = read_array::<8>(bytes, offset, column)?;
                offset += 8;
                Value::Int(i64::from_le_bytes(raw))
            }
            2 => {
                let raw = read_array::<8>(bytes, offset, column)?;
                offset += 8;
                Value::Float(f64::from_le_bytes(raw))
            }
            3 => {
                let raw = read_array::<2>(bytes, offset, column)?;
                offset += 2;
                let len = u16::from_le_bytes(raw) as usize;
                let Some(text) = bytes.get(offset..offset + len) else {
                    return Err(Error::InvalidRow(format!(
                        "string column {} truncated",
                        column
                    )));
                };
                offset += len;
                Value::Text(String::from_utf8_lossy(text).into_owned())
            }
            4 => {
                let raw = read_array::<1>(bytes, offset, column)?;
                offset += 1;
                Value::Bool(raw[0] != 0)
            }
            other => {
                return Err(Error::InvalidRow(format!(
                    "unknown type tag {} at column {}",
                    other, column
                )));
            }
        };
        row.push(value);
    }

    Ok(row)
}

fn read_array<const N: usize>(bytes: &[u8], offset: usize, column: usize) -> Result<[u8; N]> {
    bytes
        .get(offset..offset + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| Error::InvalidRow(format!("column {} truncated", column)))
}
