//! WHERE-style predicates and SET-style assignments
//!
//! A condition list is a flat sequence `p0 L0 p1 L1 p2 ...` without
//! parentheses, folded left to right:
//! - `AND` folds the next result into the running flag
//! - `OR` succeeds at once when either the running flag or the next result
//!   holds, and otherwise resets the flag to false and keeps going

use crate::types::{Row, TableSchema, Value};
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Comparison operator of a predicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    pub fn parse(symbol: &str) -> Result<Self> {
        match symbol.trim() {
            "=" | "==" => Ok(CompareOp::Eq),
            "<" => Ok(CompareOp::Lt),
            "<=" => Ok(CompareOp::Le),
            ">" => Ok(CompareOp::Gt),
            ">=" => Ok(CompareOp::Ge),
            other => Err(StorageError::InvalidArgument(format!(
                "unknown comparison operator '{}'",
                other
            ))),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            CompareOp::Eq => "=",
            CompareOp::Lt => "<",
            CompareOp::Le => "<=",
            CompareOp::Gt => ">",
            CompareOp::Ge => ">=",
        }
    }

    /// Whether `stored.cmp(literal)` satisfies this operator
    pub fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Connector between two predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Logic {
    And,
    Or,
}

impl Logic {
    pub fn parse(word: &str) -> Result<Self> {
        if word.trim().eq_ignore_ascii_case("and") {
            Ok(Logic::And)
        } else if word.trim().eq_ignore_ascii_case("or") {
            Ok(Logic::Or)
        } else {
            Err(StorageError::InvalidArgument(format!("unknown connector '{}'", word)))
        }
    }
}

/// `attribute op literal`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub attribute: String,
    pub op: CompareOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(attribute: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn equals(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new(attribute, CompareOp::Eq, value)
    }

    /// Build from textual parts, parsing the literal as the attribute's type
    pub fn from_text(schema: &TableSchema, attribute: &str, op: &str, literal: &str) -> Result<Self> {
        let attr = schema.attribute(attribute)?;
        Ok(Self {
            attribute: attr.name.clone(),
            op: CompareOp::parse(op)?,
            value: Value::parse(literal, attr.data_type)?,
        })
    }

    /// Evaluate against one row of `schema`
    pub fn evaluate(&self, schema: &TableSchema, row: &[Value]) -> Result<bool> {
        let idx = schema.position(&self.attribute)?;
        let stored = row.get(idx).ok_or_else(|| {
            StorageError::InvalidArgument(format!(
                "row has {} values, schema has {}",
                row.len(),
                schema.len()
            ))
        })?;
        if stored.data_type_name() != self.value.data_type_name() {
            return Err(StorageError::TypeMismatch(format!(
                "{} is {}, compared with {} literal {}",
                self.attribute,
                stored.data_type_name(),
                self.value.data_type_name(),
                self.value
            )));
        }
        Ok(self.op.matches(stored.cmp(&self.value)))
    }

    /// Whether this predicate pins the key attribute to one value
    pub fn is_key_lookup(&self, schema: &TableSchema) -> bool {
        self.op == CompareOp::Eq
            && schema
                .key_attribute()
                .name
                .eq_ignore_ascii_case(&self.attribute)
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.attribute, self.op.symbol(), self.value)
    }
}

/// `attribute = literal` in an update
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub attribute: String,
    pub value: Value,
}

impl Assignment {
    pub fn new(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn from_text(schema: &TableSchema, attribute: &str, literal: &str) -> Result<Self> {
        let attr = schema.attribute(attribute)?;
        Ok(Self {
            attribute: attr.name.clone(),
            value: Value::parse(literal, attr.data_type)?,
        })
    }

    /// Apply to `row` in place
    pub fn apply(&self, schema: &TableSchema, row: &mut Row) -> Result<()> {
        let idx = schema.position(&self.attribute)?;
        let attr = &schema.attributes()[idx];
        if !self.value.fits(attr.data_type) {
            return Err(StorageError::TypeMismatch(format!(
                "{} does not fit {} {}",
                self.value,
                attr.name,
                attr.data_type.name()
            )));
        }
        row[idx] = self.value.clone();
        Ok(())
    }
}

/// Evaluate a flat condition list against a row. An empty list matches
/// everything; `logic` must hold exactly one connector per adjacent pair.
pub fn evaluate(schema: &TableSchema, row: &[Value], predicates: &[Predicate], logic: &[Logic]) -> Result<bool> {
    check_connectors(predicates, logic)?;
    let Some((first, rest)) = predicates.split_first() else {
        return Ok(true);
    };
    let mut flag = first.evaluate(schema, row)?;
    for (predicate, connector) in rest.iter().zip(logic) {
        let next = predicate.evaluate(schema, row)?;
        match connector {
            Logic::And => flag = flag && next,
            Logic::Or => {
                if flag || next {
                    return Ok(true);
                }
                flag = false;
            }
        }
    }
    Ok(flag)
}

pub fn check_connectors(predicates: &[Predicate], logic: &[Logic]) -> Result<()> {
    if logic.len() != predicates.len().saturating_sub(1) {
        return Err(StorageError::InvalidArgument(format!(
            "{} predicates need {} connectors, got {}",
            predicates.len(),
            predicates.len().saturating_sub(1),
            logic.len()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attribute, DataType};

    fn schema() -> TableSchema {
        TableSchema::new(vec![
            Attribute::new("id", DataType::Int).primary_key(),
            Attribute::new("name", DataType::Str(8)),
            Attribute::new("score", DataType::BigInt),
        ])
        .unwrap()
    }

    fn row(id: i32, name: &str, score: i64) -> Row {
        vec![Value::Int(id), Value::from(name), Value::BigInt(score)]
    }

    #[test]
    fn test_compare_ops() {
        let s = schema();
        let r = row(5, "bob", 70);
        let check = |op, v: i32| Predicate::new("id", op, v).evaluate(&s, &r).unwrap();
        assert!(check(CompareOp::Eq, 5));
        assert!(!check(CompareOp::Eq, 6));
        assert!(check(CompareOp::Lt, 6));
        assert!(!check(CompareOp::Lt, 5));
        assert!(check(CompareOp::Le, 5));
        assert!(check(CompareOp::Gt, 4));
        assert!(!check(CompareOp::Gt, 5));
        assert!(check(CompareOp::Ge, 5));

        let p = Predicate::new("NAME", CompareOp::Lt, "carl");
        assert!(p.evaluate(&s, &r).unwrap());
    }

    #[test]
    fn test_type_mismatch_and_unknown_column() {
        let s = schema();
        let r = row(5, "bob", 70);
        assert!(matches!(
            Predicate::equals("score", 70).evaluate(&s, &r),
            Err(StorageError::TypeMismatch(_))
        ));
        assert!(matches!(
            Predicate::equals("age", 1).evaluate(&s, &r),
            Err(StorageError::ColumnNotFound(_))
        ));
    }

    #[test]
    fn test_from_text() {
        let s = schema();
        let p = Predicate::from_text(&s, "Score", ">=", "100").unwrap();
        assert_eq!(p, Predicate::new("score", CompareOp::Ge, Value::BigInt(100)));
        assert_eq!(p.to_string(), "score >= 100");
        assert!(Predicate::from_text(&s, "id", "!=", "1").is_err());
        assert!(Predicate::from_text(&s, "id", "=", "abc").is_err());

        let a = Assignment::from_text(&s, "name", "'zed'").unwrap();
        assert_eq!(a.value, Value::from("zed"));
    }

    #[test]
    fn test_left_to_right_folding() {
        let s = schema();
        let r = row(5, "bob", 70);
        let yes = Predicate::equals("id", 5);
        let no = Predicate::equals("id", 6);

        assert!(evaluate(&s, &r, &[], &[]).unwrap());
        assert!(evaluate(&s, &r, &[yes.clone(), yes.clone()], &[Logic::And]).unwrap());
        assert!(!evaluate(&s, &r, &[yes.clone(), no.clone()], &[Logic::And]).unwrap());
        assert!(evaluate(&s, &r, &[no.clone(), yes.clone()], &[Logic::Or]).unwrap());
        // no OR no resets the flag, then AND yes stays false
        assert!(!evaluate(
            &s,
            &r,
            &[no.clone(), no.clone(), yes.clone()],
            &[Logic::Or, Logic::And]
        )
        .unwrap());
        // yes OR ... returns before later terms are looked at
        assert!(evaluate(&s, &r, &[yes.clone(), no.clone(), no.clone()], &[Logic::Or, Logic::And]).unwrap());

        assert!(evaluate(&s, &r, &[yes, no], &[]).is_err());
    }

    #[test]
    fn test_assignment_apply() {
        let s = schema();
        let mut r = row(5, "bob", 70);
        Assignment::new("score", Value::BigInt(99)).apply(&s, &mut r).unwrap();
        assert_eq!(r[2], Value::BigInt(99));
        assert!(Assignment::new("name", "far too long").apply(&s, &mut r).is_err());
        assert!(Assignment::new("score", 1).apply(&s, &mut r).is_err());
    }

    #[test]
    fn test_key_lookup_detection() {
        let s = schema();
        assert!(Predicate::equals("ID", 1).is_key_lookup(&s));
        assert!(!Predicate::new("id", CompareOp::Lt, 1).is_key_lookup(&s));
        assert!(!Predicate::equals("score", Value::BigInt(1)).is_key_lookup(&s));
    }
}
