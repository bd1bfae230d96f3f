//! Purpose: In-memory table model handed to the encoder and returned by queries.
//! Exports: `Dtype`, `ColumnData`, `Column`, `Table`, `DEFAULT_TABLE_METADATA`.
//! Role: Boundary type for table providers (including the JSON loader used by the CLI).
//! Invariants: `Dtype` wire tags are fixed: Int64 = 0, Float64 = 1, Text = 2.
//! Invariants: Provider columns of other dtypes are carried as `Unsupported` and rejected at encode.

use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::core::error::{Error, ErrorKind};

pub const DEFAULT_TABLE_METADATA: &str = "DataFrame Metadata";

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Dtype {
    Int64 = 0,
    Float64 = 1,
    Text = 2,
}

impl Dtype {
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Dtype::Int64),
            1 => Some(Dtype::Float64),
            2 => Some(Dtype::Text),
            _ => None,
        }
    }

    /// Accepts pandas-style dtype names.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "int64" | "Int64" | "int" => Some(Dtype::Int64),
            "float64" | "Float64" | "float" => Some(Dtype::Float64),
            "object" | "str" | "string" | "text" => Some(Dtype::Text),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Dtype::Int64 => "int64",
            Dtype::Float64 => "float64",
            Dtype::Text => "object",
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, Dtype::Int64 | Dtype::Float64)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Int64(Vec<i64>),
    Float64(Vec<f64>),
    Text(Vec<String>),
    /// A provider column whose dtype has no wire representation.
    Unsupported { dtype: String, len: usize },
}

impl ColumnData {
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int64(values) => values.len(),
            ColumnData::Float64(values) => values.len(),
            ColumnData::Text(values) => values.len(),
            ColumnData::Unsupported { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> Option<Dtype> {
        match self {
            ColumnData::Int64(_) => Some(Dtype::Int64),
            ColumnData::Float64(_) => Some(Dtype::Float64),
            ColumnData::Text(_) => Some(Dtype::Text),
            ColumnData::Unsupported { .. } => None,
        }
    }

    pub fn dtype_name(&self) -> &str {
        match self {
            ColumnData::Unsupported { dtype, .. } => dtype,
            other => other.dtype().map(Dtype::name).unwrap_or("unknown"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub name: String,
    pub data: ColumnData,
}

impl Column {
    pub fn new(name: impl Into<String>, data: ColumnData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn int64(name: impl Into<String>, values: Vec<i64>) -> Self {
        Self::new(name, ColumnData::Int64(values))
    }

    pub fn float64(name: impl Into<String>, values: Vec<f64>) -> Self {
        Self::new(name, ColumnData::Float64(values))
    }

    pub fn text<S: Into<String>>(name: impl Into<String>, values: impl IntoIterator<Item = S>) -> Self {
        Self::new(
            name,
            ColumnData::Text(values.into_iter().map(Into::into).collect()),
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    pub metadata: String,
    pub columns: Vec<Column>,
}

impl Table {
    pub fn new(columns: Vec<Column>) -> Self {
        Self {
            metadata: DEFAULT_TABLE_METADATA.to_string(),
            columns,
        }
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = metadata.into();
        self
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|column| column.name == name)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|column| column.name.as_str()).collect()
    }

    /// Shared row count, or `None` when columns disagree.
    pub fn row_count(&self) -> Option<usize> {
        let mut lens = self.columns.iter().map(|column| column.data.len());
        let first = lens.next().unwrap_or(0);
        lens.all(|len| len == first).then_some(first)
    }

    pub fn from_json(text: &str) -> Result<Self, Error> {
        let parsed: TableJson = serde_json::from_str(text).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message("invalid table JSON")
                .with_hint(r#"Expected {"columns": [{"name": ..., "dtype": ..., "values": [...]}]}."#)
                .with_source(err)
        })?;
        let columns = parsed
            .columns
            .into_iter()
            .map(ColumnJson::into_column)
            .collect::<Result<Vec<_>, _>>()?;
        let table = Table::new(columns);
        Ok(match parsed.metadata {
            Some(metadata) => table.with_metadata(metadata),
            None => table,
        })
    }

    pub fn to_json(&self) -> Value {
        let columns = self
            .columns
            .iter()
            .map(|column| {
                json!({
                    "name": column.name,
                    "dtype": column.data.dtype_name(),
                    "values": values_json(&column.data),
                })
            })
            .collect::<Vec<_>>();
        let mut out = Map::new();
        out.insert("metadata".to_string(), json!(self.metadata));
        out.insert("columns".to_string(), Value::Array(columns));
        Value::Object(out)
    }
}

fn values_json(data: &ColumnData) -> Value {
    match data {
        ColumnData::Int64(values) => json!(values),
        ColumnData::Float64(values) => Value::Array(values.iter().map(|v| float_json(*v)).collect()),
        ColumnData::Text(values) => json!(values),
        ColumnData::Unsupported { .. } => Value::Null,
    }
}

fn float_json(value: f64) -> Value {
    if value.is_nan() {
        json!("NaN")
    } else if value == f64::INFINITY {
        json!("Infinity")
    } else if value == f64::NEG_INFINITY {
        json!("-Infinity")
    } else {
        json!(value)
    }
}

#[derive(Deserialize)]
struct TableJson {
    #[serde(default)]
    metadata: Option<String>,
    columns: Vec<ColumnJson>,
}

#[derive(Deserialize)]
struct ColumnJson {
    name: String,
    dtype: String,
    values: Vec<Value>,
}

impl ColumnJson {
    fn into_column(self) -> Result<Column, Error> {
        let Some(dtype) = Dtype::from_name(&self.dtype) else {
            return Ok(Column::new(
                self.name,
                ColumnData::Unsupported {
                    dtype: self.dtype,
                    len: self.values.len(),
                },
            ));
        };
        let name = self.name;
        let data = match dtype {
            Dtype::Int64 => ColumnData::Int64(
                self.values
                    .iter()
                    .map(|value| value.as_i64().ok_or_else(|| bad_value(&name, value)))
                    .collect::<Result<_, _>>()?,
            ),
            Dtype::Float64 => ColumnData::Float64(
                self.values
                    .iter()
                    .map(|value| parse_float(value).ok_or_else(|| bad_value(&name, value)))
                    .collect::<Result<_, _>>()?,
            ),
            Dtype::Text => ColumnData::Text(
                self.values
                    .into_iter()
                    .map(|value| match value {
                        Value::String(text) => text,
                        other => other.to_string(),
                    })
                    .collect(),
            ),
        };
        Ok(Column::new(name, data))
    }
}

fn parse_float(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => match text.as_str() {
            "NaN" | "nan" => Some(f64::NAN),
            "Infinity" | "inf" => Some(f64::INFINITY),
            "-Infinity" | "-inf" => Some(f64::NEG_INFINITY),
            _ => None,
        },
        _ => None,
    }
}

fn bad_value(column: &str, value: &Value) -> Error {
    Error::new(ErrorKind::Usage)
        .with_message(format!("value {value} does not fit the column dtype"))
        .with_column(column)
}
