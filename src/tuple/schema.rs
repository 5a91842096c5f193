use std::collections::HashMap;
use std::sync::Arc;

use super::DataType;

/// Represents a single column in a table schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: String,
    data_type: DataType,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(&self) -> &DataType {
        &self.data_type
    }
}

/// Ordered list of fixed-width columns. Every tuple of a schema serializes
/// to exactly `tuple_size()` bytes.
#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<Column>,

    /// Map from column name to column index for fast lookup
    name_to_index: HashMap<String, usize>,

    tuple_size: usize,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        let name_to_index = columns
            .iter()
            .enumerate()
            .map(|(i, col)| (col.name.clone(), i))
            .collect();
        let tuple_size = columns.iter().map(|c| c.data_type.size()).sum();

        Self {
            columns,
            name_to_index,
            tuple_size,
        }
    }

    /// Creates a schema builder for fluent construction.
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::new()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn column(&self, index: usize) -> Option<&Column> {
        self.columns.get(index)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.name_to_index.get(name).copied()
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter()
    }

    /// Returns the serialized size of one tuple in bytes.
    pub fn tuple_size(&self) -> usize {
        self.tuple_size
    }
}

impl PartialEq for Schema {
    fn eq(&self, other: &Self) -> bool {
        self.columns == other.columns
    }
}

impl Eq for Schema {}

/// Builder for constructing schemas fluently.
pub struct SchemaBuilder {
    columns: Vec<Column>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self {
            columns: Vec::new(),
        }
    }

    pub fn column(mut self, name: impl Into<String>, data_type: DataType) -> Self {
        self.columns.push(Column::new(name, data_type));
        self
    }

    pub fn build(self) -> Schema {
        Schema::new(self.columns)
    }

    /// Builds the schema wrapped in an Arc for shared ownership.
    pub fn build_arc(self) -> Arc<Schema> {
        Arc::new(self.build())
    }
}

impl Default for SchemaBuilder {
    fn default() -> Self {
        Self::new()
    }
}
