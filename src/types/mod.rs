//! Typed values, schemas and record layout
//!
//! Three fixed-width data types are supported: 32-bit integers, 64-bit
//! integers and fixed-capacity byte strings. [`Value`] is the closed tagged
//! union used both as a B+Tree key and as a record attribute.

mod record;
mod schema;

pub use record::{decode_record, encode_record};
pub use schema::{Attribute, ForeignRef, TableSchema, PRIMARY_KEY};

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Declared type of an attribute (and therefore its on-disk width)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 4-byte signed integer
    Int,
    /// 8-byte signed integer
    BigInt,
    /// Fixed-capacity string of at most `n` bytes, zero padded on disk
    Str(usize),
}

impl DataType {
    /// On-disk width in bytes
    pub fn width(&self) -> usize {
        match self {
            DataType::Int => 4,
            DataType::BigInt => 8,
            DataType::Str(n) => *n,
        }
    }

    /// Value written into vacated key slots
    pub fn sentinel(&self) -> Value {
        match self {
            DataType::Int => Value::Int(i32::MIN),
            DataType::BigInt => Value::BigInt(i64::MIN),
            DataType::Str(_) => Value::Str(String::new()),
        }
    }

    pub fn name(&self) -> String {
        match self {
            DataType::Int => "INT".to_string(),
            DataType::BigInt => "BIGINT".to_string(),
            DataType::Str(n) => format!("CHAR({})", n),
        }
    }
}

/// Typed value: a key or an attribute of a record
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Int(i32),
    BigInt(i64),
    Str(String),
}

/// B+Tree keys are plain values of the key attribute's type.
pub type Key = Value;

/// A record: one value per attribute, in schema order
pub type Row = Vec<Value>;

impl Value {
    fn rank(&self) -> u8 {
        match self {
            Value::Int(_) => 0,
            Value::BigInt(_) => 1,
            Value::Str(_) => 2,
        }
    }

    /// Whether this value can be stored in an attribute of type `data_type`
    pub fn fits(&self, data_type: DataType) -> bool {
        match (self, data_type) {
            (Value::Int(_), DataType::Int) => true,
            (Value::BigInt(_), DataType::BigInt) => true,
            (Value::Str(s), DataType::Str(n)) => s.len() <= n && !s.as_bytes().contains(&0),
            _ => false,
        }
    }

    pub fn data_type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "INT",
            Value::BigInt(_) => "BIGINT",
            Value::Str(_) => "CHAR",
        }
    }

    /// Parse a textual literal as `data_type`.
    ///
    /// String literals may be wrapped in single or double quotes.
    pub fn parse(text: &str, data_type: DataType) -> Result<Value> {
        let text = text.trim();
        let value = match data_type {
            DataType::Int => Value::Int(text.parse().map_err(|_| {
                StorageError::TypeMismatch(format!("'{}' is not an INT", text))
            })?),
            DataType::BigInt => Value::BigInt(text.parse().map_err(|_| {
                StorageError::TypeMismatch(format!("'{}' is not a BIGINT", text))
            })?),
            DataType::Str(_) => {
                let unquoted = ['\'', '"']
                    .iter()
                    .find_map(|q| {
                        text.strip_prefix(*q)
                            .and_then(|rest| rest.strip_suffix(*q))
                    })
                    .unwrap_or(text);
                Value::Str(unquoted.to_string())
            }
        };
        if !value.fits(data_type) {
            return Err(StorageError::TypeMismatch(format!(
                "'{}' does not fit {}",
                text,
                data_type.name()
            )));
        }
        Ok(value)
    }

    /// Write the fixed-width encoding of this value into `out`
    /// (`out.len()` must equal `data_type.width()`).
    pub fn encode_into(&self, data_type: DataType, out: &mut [u8]) -> Result<()> {
        if out.len() != data_type.width() {
            return Err(StorageError::InvalidArgument(format!(
                "slot of {} bytes for {}",
                out.len(),
                data_type.name()
            )));
        }
        match (self, data_type) {
            (Value::Int(v), DataType::Int) => out.copy_from_slice(&v.to_le_bytes()),
            (Value::BigInt(v), DataType::BigInt) => out.copy_from_slice(&v.to_le_bytes()),
            (Value::Str(s), DataType::Str(n)) if s.len() <= n => {
                out.fill(0);
                out[..s.len()].copy_from_slice(s.as_bytes());
            }
            _ => {
                return Err(StorageError::TypeMismatch(format!(
                    "cannot store {} as {}",
                    self,
                    data_type.name()
                )))
            }
        }
        Ok(())
    }

    /// Decode a fixed-width slot written by [`Value::encode_into`]
    pub fn decode(data_type: DataType, slot: &[u8]) -> Result<Value> {
        if slot.len() != data_type.width() {
            return Err(StorageError::Corruption(format!(
                "slot of {} bytes for {}",
                slot.len(),
                data_type.name()
            )));
        }
        Ok(match data_type {
            DataType::Int => Value::Int(i32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]])),
            DataType::BigInt => {
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(slot);
                Value::BigInt(i64::from_le_bytes(bytes))
            }
            DataType::Str(_) => {
                let end = slot.iter().position(|b| *b == 0).unwrap_or(slot.len());
                let s = std::str::from_utf8(&slot[..end])
                    .map_err(|e| StorageError::Corruption(format!("invalid string bytes: {}", e)))?;
                Value::Str(s.to_string())
            }
        })
    }
}

/// Total order: values of the same type compare naturally (strings bytewise),
/// values of different types order by type tag.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.cmp(b),
            (Value::BigInt(a), Value::BigInt(b)) => a.cmp(b),
            (Value::Str(a), Value::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{}", v),
            Value::BigInt(v) => write!(f, "{}", v),
            Value::Str(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::BigInt(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}
