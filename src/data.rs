use crate::error::Error;
use crate::warehouse::FieldSchema;
use bytes::Bytes;
use datafusion::arrow::array::RecordBatch;
use datafusion::arrow::csv::reader::Format;
use datafusion::arrow::csv::{ReaderBuilder, WriterBuilder};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::datasource::MemTable;
use datafusion::prelude::{DataFrame, SessionConfig, SessionContext};
use std::collections::HashSet;
use std::io::Cursor;
use std::sync::Arc;

/// Canonical warehouse column name for a report header: trimmed, lower-cased,
/// spaces replaced by `_`, parentheses and periods removed.
///
/// `" Average CPC (USD). "` becomes `average_cpc_usd`.
pub fn normalize_column_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .replace(' ', "_")
        .replace(['(', ')'], "")
        .replace('.', "")
}

/// Renames every field of `schema` with [`normalize_column_name`]. Columns that
/// inferred no type at all (empty in every row) become strings.
pub fn normalize_schema(schema: &Schema) -> Result<Schema, Error> {
    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(schema.fields().len());

    for field in schema.fields() {
        let name = normalize_column_name(field.name());
        if !seen.insert(name.clone()) {
            return Err(Error::DuplicateColumn { name });
        }

        let data_type = match field.data_type() {
            DataType::Null => DataType::Utf8,
            other => other.clone(),
        };
        fields.push(Field::new(name, data_type, true));
    }

    Ok(Schema::new(fields))
}

/// Warehouse column type for an inferred Arrow type.
fn warehouse_type(data_type: &DataType) -> &'static str {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => "INTEGER",
        DataType::Float16 | DataType::Float32 | DataType::Float64 => "FLOAT",
        DataType::Boolean => "BOOLEAN",
        DataType::Date32 | DataType::Date64 => "DATE",
        DataType::Timestamp(_, _) => "TIMESTAMP",
        _ => "STRING",
    }
}

/// A staged report parsed into memory, with normalized column names.
pub struct TabularDataset {
    df: DataFrame,
    schema: SchemaRef,
    num_rows: usize,
}

impl TabularDataset {
    /// Parses CSV with a header row. Column types come from inference over
    /// the whole file.
    pub fn from_csv(csv: &[u8]) -> Result<Self, Error> {
        let (inferred, _) = Format::default()
            .with_header(true)
            .infer_schema(Cursor::new(csv), None)?;

        if inferred.fields().is_empty() {
            return Err(Error::NoData {
                message: "CSV has no header row".to_string(),
            });
        }

        let schema = Arc::new(normalize_schema(&inferred)?);
        let batches = ReaderBuilder::new(schema.clone())
            .with_header(true)
            .build(Cursor::new(csv))?
            .collect::<Result<Vec<_>, _>>()?;
        let num_rows = batches.iter().map(RecordBatch::num_rows).sum();

        // One partition keeps `limit` slices in file order.
        let ctx = SessionContext::new_with_config(SessionConfig::new().with_target_partitions(1));
        let table = MemTable::try_new(schema.clone(), vec![batches])?;
        let df = ctx.read_table(Arc::new(table))?;

        Ok(TabularDataset {
            df,
            schema,
            num_rows,
        })
    }

    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.schema
            .fields()
            .iter()
            .map(|field| field.name().as_str())
            .collect()
    }

    pub fn warehouse_schema(&self) -> Vec<FieldSchema> {
        self.schema
            .fields()
            .iter()
            .map(|field| FieldSchema::nullable(field.name(), warehouse_type(field.data_type())))
            .collect()
    }

    /// Rows `[offset, offset + len)` encoded as CSV with a header line.
    pub async fn csv_chunk(&self, offset: usize, len: usize) -> Result<Bytes, Error> {
        let batches = self.df.clone().limit(offset, Some(len))?.collect().await?;

        let mut writer = WriterBuilder::new().with_header(true).build(Vec::new());
        for batch in &batches {
            writer.write(batch)?;
        }

        Ok(Bytes::from(writer.into_inner()))
    }
}
