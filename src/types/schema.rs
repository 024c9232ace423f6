//! Table schemas
//!
//! A schema is an ordered list of attributes. Exactly one attribute carries
//! the `PRIMARY KEY` constraint and becomes the B+Tree key; `REF(table(col))`
//! constraints describe foreign references for the query layer.

use super::{DataType, Value};
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};

/// Constraint string marking the key attribute
pub const PRIMARY_KEY: &str = "PRIMARY KEY";

/// Longest attribute name accepted
const MAX_NAME_LEN: usize = 64;

/// One column of a table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub data_type: DataType,
    /// Free-form constraint: "", "PRIMARY KEY" or "REF(table(col))"
    pub constraint: String,
}

impl Attribute {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraint: String::new(),
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.constraint = PRIMARY_KEY.to_string();
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = constraint.into();
        self
    }

    pub fn is_primary_key(&self) -> bool {
        self.constraint.trim().eq_ignore_ascii_case(PRIMARY_KEY)
    }

    /// Parsed foreign reference, if the constraint is `REF(table(col))`
    /// (the bare form `ref table(col)` is accepted too).
    pub fn foreign_ref(&self) -> Option<ForeignRef> {
        ForeignRef::parse(&self.constraint)
    }
}

/// Foreign reference declared on an attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignRef {
    pub table: String,
    pub column: String,
}

impl ForeignRef {
    fn parse(constraint: &str) -> Option<Self> {
        let text = constraint.trim();
        if !text.get(..3)?.eq_ignore_ascii_case("ref") {
            return None;
        }
        let mut body = text[3..].trim();
        // REF(t(c)) → t(c)
        if body.starts_with('(') && body.ends_with(')') && body[1..].contains('(') {
            body = body[1..body.len() - 1].trim();
        }
        let open = body.find('(')?;
        let close = body.rfind(')')?;
        if close <= open {
            return None;
        }
        let table = body[..open].trim();
        let column = body[open + 1..close].trim();
        if table.is_empty() || column.is_empty() {
            return None;
        }
        Some(Self {
            table: table.to_string(),
            column: column.to_string(),
        })
    }
}

/// Ordered attribute list with a designated key attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    attributes: Vec<Attribute>,
    key_index: usize,
}

impl TableSchema {
    pub fn new(attributes: Vec<Attribute>) -> Result<Self> {
        if attributes.is_empty() {
            return Err(StorageError::InvalidArgument("schema has no attributes".into()));
        }
        for (i, attr) in attributes.iter().enumerate() {
            if attr.name.is_empty() || attr.name.len() > MAX_NAME_LEN {
                return Err(StorageError::InvalidArgument(format!(
                    "attribute name '{}' must be 1..={} bytes",
                    attr.name, MAX_NAME_LEN
                )));
            }
            if attr.data_type.width() == 0 {
                return Err(StorageError::InvalidArgument(format!(
                    "attribute '{}' has zero width",
                    attr.name
                )));
            }
            if attributes[..i].iter().any(|a| a.name.eq_ignore_ascii_case(&attr.name)) {
                return Err(StorageError::InvalidArgument(format!(
                    "duplicate attribute '{}'",
                    attr.name
                )));
            }
        }

        let mut keys = attributes.iter().enumerate().filter(|(_, a)| a.is_primary_key());
        let key_index = match (keys.next(), keys.next()) {
            (Some((i, _)), None) => i,
            (None, _) => {
                return Err(StorageError::InvalidArgument(
                    "schema needs exactly one PRIMARY KEY attribute".into(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(StorageError::InvalidArgument(
                    "only one PRIMARY KEY attribute is allowed".into(),
                ))
            }
        };

        Ok(Self { attributes, key_index })
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    pub fn key_index(&self) -> usize {
        self.key_index
    }

    pub fn key_attribute(&self) -> &Attribute {
        &self.attributes[self.key_index]
    }

    pub fn key_type(&self) -> DataType {
        self.key_attribute().data_type
    }

    /// Position of the attribute called `name` (case-insensitive)
    pub fn position(&self, name: &str) -> Result<usize> {
        self.attributes
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| StorageError::ColumnNotFound(name.to_string()))
    }

    pub fn attribute(&self, name: &str) -> Result<&Attribute> {
        Ok(&self.attributes[self.position(name)?])
    }

    /// Width of an encoded record
    pub fn record_width(&self) -> usize {
        self.attributes.iter().map(|a| a.data_type.width()).sum()
    }

    /// All `(attribute, reference)` pairs declared by REF constraints
    pub fn foreign_references(&self) -> Vec<(&Attribute, ForeignRef)> {
        self.attributes
            .iter()
            .filter_map(|a| a.foreign_ref().map(|r| (a, r)))
            .collect()
    }

    /// Check arity and types of a row against this schema
    pub fn check_row(&self, row: &[Value]) -> Result<()> {
        if row.len() != self.attributes.len() {
            return Err(StorageError::InvalidArgument(format!(
                "expected {} values, got {}",
                self.attributes.len(),
                row.len()
            )));
        }
        for (value, attr) in row.iter().zip(&self.attributes) {
            if !value.fits(attr.data_type) {
                return Err(StorageError::TypeMismatch(format!(
                    "{} does not fit attribute '{}' of type {}",
                    value,
                    attr.name,
                    attr.data_type.name()
                )));
            }
        }
        Ok(())
    }
}
