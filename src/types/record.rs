//! Record block layout: attributes packed contiguously in schema order,
//! each at its fixed declared width. Bytes past the record are zero.

use super::{Row, TableSchema, Value};
use crate::{Result, StorageError};

/// Encode `row` into a full block image of `block_size` bytes
pub fn encode_record(schema: &TableSchema, row: &[Value], block_size: usize) -> Result<Vec<u8>> {
    schema.check_row(row)?;
    if schema.record_width() > block_size {
        return Err(StorageError::InvalidArgument(format!(
            "record of {} bytes does not fit a {}-byte block",
            schema.record_width(),
            block_size
        )));
    }
    let mut block = vec![0u8; block_size];
    let mut offset = 0;
    for (value, attr) in row.iter().zip(schema.attributes()) {
        let width = attr.data_type.width();
        value.encode_into(attr.data_type, &mut block[offset..offset + width])?;
        offset += width;
    }
    Ok(block)
}

/// Decode a record from a block image
pub fn decode_record(schema: &TableSchema, block: &[u8]) -> Result<Row> {
    if block.len() < schema.record_width() {
        return Err(StorageError::Corruption(format!(
            "record block of {} bytes, schema needs {}",
            block.len(),
            schema.record_width()
        )));
    }
    let mut row = Vec::with_capacity(schema.len());
    let mut offset = 0;
    for attr in schema.attributes() {
        let width = attr.data_type.width();
        row.push(Value::decode(attr.data_type, &block[offset..offset + width])?);
        offset += width;
    }
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attribute, DataType};

    #[test]
    fn test_record_layout() {
        let schema = TableSchema::new(vec![
            Attribute::new("id", DataType::BigInt).primary_key(),
            Attribute::new("tag", DataType::Str(4)),
            Attribute::new("qty", DataType::Int),
        ])
        .unwrap();
        let row = vec![Value::BigInt(7), Value::from("ab"), Value::Int(-1)];
        let block = encode_record(&schema, &row, 64).unwrap();

        assert_eq!(block.len(), 64);
        assert_eq!(&block[0..8], &7i64.to_le_bytes());
        assert_eq!(&block[8..12], b"ab\0\0");
        assert_eq!(&block[12..16], &(-1i32).to_le_bytes());
        assert!(block[16..].iter().all(|b| *b == 0));
        assert_eq!(decode_record(&schema, &block).unwrap(), row);
    }

    #[test]
    fn test_record_too_wide() {
        let schema = TableSchema::new(vec![
            Attribute::new("id", DataType::Int).primary_key(),
            Attribute::new("blob", DataType::Str(100)),
        ])
        .unwrap();
        let row = vec![Value::Int(1), Value::from("x")];
        assert!(encode_record(&schema, &row, 64).is_err());
        assert!(decode_record(&schema, &[0u8; 10]).is_err());
    }
}
