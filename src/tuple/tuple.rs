use std::sync::Arc;

use bytes::{Buf, BufMut};

use super::{Schema, Value};
use crate::common::{DbError, RecordId, Result};

/// Represents a single row of a table.
///
/// A tuple holds one value per schema column and, once it has been placed in
/// a page, the [`RecordId`] of its slot.
///
/// ## Tuple Binary Format
///
/// Fields are written back to back in schema order, each using exactly the
/// width of its column type, so every tuple of a schema has the same size:
///
/// ```text
/// +-----------+-----------+-----+-----------+
/// | field 0   | field 1   | ... | field n-1 |
/// +-----------+-----------+-----+-----------+
/// ```
#[derive(Debug, Clone)]
pub struct Tuple {
    schema: Arc<Schema>,
    values: Vec<Value>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// Creates a new tuple, checking every value against its column type.
    pub fn new(schema: Arc<Schema>, values: Vec<Value>) -> Result<Self> {
        if values.len() != schema.column_count() {
            return Err(DbError::InvalidTuple(format!(
                "expected {} values, got {}",
                schema.column_count(),
                values.len()
            )));
        }
        for (value, col) in values.iter().zip(schema.columns()) {
            if !value.fits(col.data_type()) {
                return Err(DbError::InvalidTuple(format!(
                    "value {} does not fit column {} {}",
                    value,
                    col.name(),
                    col.data_type()
                )));
            }
        }

        Ok(Self {
            schema,
            values,
            record_id: None,
        })
    }

    /// Decodes a tuple from exactly `schema.tuple_size()` bytes.
    pub fn from_bytes(schema: Arc<Schema>, data: &[u8]) -> Result<Self> {
        if data.len() != schema.tuple_size() {
            return Err(DbError::InvalidTuple(format!(
                "expected {} bytes, got {}",
                schema.tuple_size(),
                data.len()
            )));
        }

        let mut buf = data;
        let values = schema
            .columns()
            .map(|col| Value::deserialize(&mut buf, col.data_type()))
            .collect::<Result<Vec<_>>>()?;
        debug_assert!(!buf.has_remaining());

        Ok(Self {
            schema,
            values,
            record_id: None,
        })
    }

    /// Appends the tuple's fields to `buf`.
    pub fn serialize_into<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        for (value, col) in self.values.iter().zip(self.schema.columns()) {
            value.serialize(col.data_type(), buf)?;
        }
        Ok(())
    }

    /// Serializes the tuple to a fresh buffer.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.schema.tuple_size());
        self.serialize_into(&mut bytes)?;
        Ok(bytes)
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        self.schema
            .column_index(name)
            .and_then(|i| self.values.get(i))
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Returns where this tuple is stored, or None if it was never placed in a page.
    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    pub fn set_record_id(&mut self, record_id: Option<RecordId>) {
        self.record_id = record_id;
    }
}

/// Two tuples are equal when they have the same schema and values,
/// regardless of where they are stored.
impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        (Arc::ptr_eq(&self.schema, &other.schema) || self.schema == other.schema)
            && self.values == other.values
    }
}

impl Eq for Tuple {}

/// Builder for constructing tuples fluently.
pub struct TupleBuilder {
    schema: Arc<Schema>,
    values: Vec<Value>,
}

impl TupleBuilder {
    pub fn new(schema: Arc<Schema>) -> Self {
        let capacity = schema.column_count();
        Self {
            schema,
            values: Vec::with_capacity(capacity),
        }
    }

    pub fn value(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }

    pub fn build(self) -> Result<Tuple> {
        Tuple::new(self.schema, self.values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{PageId, SlotId, TableId};
    use crate::tuple::DataType;

    fn schema() -> Arc<Schema> {
        Schema::builder()
            .column("id", DataType::Integer)
            .column("name", DataType::Char(8))
            .build_arc()
    }

    #[test]
    fn test_tuple_bytes_roundtrip() {
        let schema = schema();
        let tuple = TupleBuilder::new(Arc::clone(&schema))
            .value(7)
            .value("seven")
            .build()
            .unwrap();

        let bytes = tuple.to_bytes().unwrap();
        assert_eq!(bytes.len(), schema.tuple_size());

        let decoded = Tuple::from_bytes(schema, &bytes).unwrap();
        assert_eq!(decoded, tuple);
        assert_eq!(decoded.value_by_name("name"), Some(&Value::from("seven")));
    }

    #[test]
    fn test_rejects_wrong_arity_and_type() {
        assert!(Tuple::new(schema(), vec![Value::Integer(1)]).is_err());
        assert!(Tuple::new(schema(), vec![Value::BigInt(1), Value::from("x")]).is_err());
    }

    #[test]
    fn test_equality_ignores_record_id() {
        let schema = schema();
        let a = TupleBuilder::new(Arc::clone(&schema))
            .value(1)
            .value("a")
            .build()
            .unwrap();
        let mut b = a.clone();
        b.set_record_id(Some(RecordId::new(
            PageId::new(TableId::new(1), 0),
            SlotId::new(3),
        )));

        assert_eq!(a, b);
        assert!(a.record_id().is_none());
    }
}
