//! Purpose: Encode a `Table` into a self-describing columnar blob.
//! Exports: `encode`, `encoded_len`.
//! Role: Write path entry point; `Catalog::add` frames its output into a segment.
//! Invariants: Columns appear in input order, each as metadata followed by its value array.
//! Invariants: Numeric values are written as raw 8-byte little-endian words, never as text.
//! Invariants: Any rejected column aborts the encode before a single byte is produced.

use std::collections::HashSet;

use crate::core::error::{Error, ErrorKind};
use crate::core::format::{BLOB_MAGIC, NUMERIC_WIDTH};
use crate::core::table::{ColumnData, Dtype, Table};

pub fn encode(table: &Table) -> Result<Vec<u8>, Error> {
    check_encodable(table)?;
    let mut writer = BlobWriter::with_capacity(&table.metadata, table.columns.len(), encoded_len(table))?;
    for column in &table.columns {
        writer.push_column(&column.name, &column.data)?;
    }
    Ok(writer.finish())
}

/// Exact byte length `encode` produces for an encodable table.
pub fn encoded_len(table: &Table) -> usize {
    let header = BLOB_MAGIC.len() + 4 + table.metadata.len() + 4;
    let columns: usize = table
        .columns
        .iter()
        .map(|column| COLUMN_META_FIXED + column.name.len() + array_len(&column.data))
        .sum();
    header + columns
}

// name prefix + dtype tag + count + array_len
const COLUMN_META_FIXED: usize = 4 + 1 + 8 + 8;

fn array_len(data: &ColumnData) -> usize {
    match data {
        ColumnData::Int64(values) => values.len() * NUMERIC_WIDTH,
        ColumnData::Float64(values) => values.len() * NUMERIC_WIDTH,
        ColumnData::Text(values) => values.iter().map(|value| 4 + value.len()).sum(),
        ColumnData::Unsupported { .. } => 0,
    }
}

fn check_encodable(table: &Table) -> Result<(), Error> {
    let mut seen = HashSet::with_capacity(table.columns.len());
    for column in &table.columns {
        if let ColumnData::Unsupported { dtype, .. } = &column.data {
            return Err(Error::new(ErrorKind::UnsupportedColumnType)
                .with_message(format!("dtype {dtype} cannot be encoded"))
                .with_column(&column.name)
                .with_hint("Convert the column to int64, float64, or text first."));
        }
        if !seen.insert(column.name.as_str()) {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("duplicate column name")
                .with_column(&column.name));
        }
    }
    if table.row_count().is_none() {
        return Err(Error::new(ErrorKind::Usage).with_message("columns have different lengths"));
    }
    Ok(())
}

/// Low-level blob writer; performs no table-level validation.
pub(crate) struct BlobWriter {
    buf: Vec<u8>,
}

impl BlobWriter {
    pub(crate) fn with_capacity(metadata: &str, column_count: usize, capacity: usize) -> Result<Self, Error> {
        let mut writer = Self {
            buf: Vec::with_capacity(capacity),
        };
        writer.buf.extend_from_slice(&BLOB_MAGIC);
        writer.put_str(metadata)?;
        writer.put_u32(len_u32(column_count, "column count")?);
        Ok(writer)
    }

    pub(crate) fn push_column(&mut self, name: &str, data: &ColumnData) -> Result<(), Error> {
        let dtype = data.dtype().ok_or_else(|| {
            Error::new(ErrorKind::UnsupportedColumnType)
                .with_message(format!("dtype {} cannot be encoded", data.dtype_name()))
                .with_column(name)
        })?;
        self.put_str(name)?;
        self.buf.push(dtype.tag());
        self.buf.extend_from_slice(&(data.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(&(array_len(data) as u64).to_le_bytes());
        match data {
            ColumnData::Int64(values) => {
                for value in values {
                    self.buf.extend_from_slice(&value.to_le_bytes());
                }
            }
            ColumnData::Float64(values) => {
                for value in values {
                    self.buf.extend_from_slice(&value.to_le_bytes());
                }
            }
            ColumnData::Text(values) => {
                for value in values {
                    self.put_str(value).map_err(|err| err.with_column(name))?;
                }
            }
            ColumnData::Unsupported { .. } => unreachable!("dtype checked above"),
        }
        debug_assert!(dtype == Dtype::Text || array_len(data) == data.len() * NUMERIC_WIDTH);
        Ok(())
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_str(&mut self, value: &str) -> Result<(), Error> {
        self.put_u32(len_u32(value.len(), "string length")?);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }
}

fn len_u32(len: usize, what: &str) -> Result<u32, Error> {
    u32::try_from(len)
        .map_err(|_| Error::new(ErrorKind::Usage).with_message(format!("{what} exceeds u32::MAX")))
}
