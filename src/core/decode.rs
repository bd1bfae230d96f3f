//! Purpose: Zero-copy access to an encoded blob through a metadata-only offsets table.
//! Exports: `BlobView`, `ColumnLayout`, `TextIter`.
//! Role: Read path for queries, the in-place editor, and segment validation.
//! Invariants: `parse` touches only column metadata; value arrays are skipped by declared length.
//! Invariants: Element addresses come from each column's recorded base, never from array contents.
//! Invariants: Every access is bounds-checked against the column's own array and the buffer.

use crate::core::error::{Error, ErrorKind};
use crate::core::format::{BLOB_MAGIC, ByteReader, NUMERIC_WIDTH, read_array};
use crate::core::table::Dtype;

// name prefix + dtype tag + count + array_len
const MIN_COLUMN_META: usize = 4 + 1 + 8 + 8;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ColumnLayout<'a> {
    pub name: &'a str,
    pub dtype: Dtype,
    /// Offset of the first value-array byte within the blob.
    pub base: usize,
    pub count: usize,
    pub array_len: usize,
}

impl ColumnLayout<'_> {
    pub fn array_end(&self) -> usize {
        self.base + self.array_len
    }
}

#[derive(Debug)]
pub struct BlobView<'a> {
    buf: &'a [u8],
    metadata: &'a str,
    columns: Vec<ColumnLayout<'a>>,
}

impl<'a> BlobView<'a> {
    pub fn parse(buf: &'a [u8]) -> Result<Self, Error> {
        let magic = read_array::<4>(buf, 0)?;
        if magic != BLOB_MAGIC {
            return Err(Error::corrupt("bad blob magic"));
        }
        let mut reader = ByteReader::at(buf, BLOB_MAGIC.len());
        let metadata = reader.read_str()?;
        let column_count = reader.read_u32()? as usize;
        let remaining = buf.len() - reader.position();
        if column_count > remaining / MIN_COLUMN_META {
            return Err(Error::corrupt(format!(
                "column count {column_count} cannot fit in {remaining} bytes"
            )));
        }

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            let meta_offset = reader.position();
            let name = reader.read_str()?;
            let tag = reader.read_u8()?;
            let dtype = Dtype::from_tag(tag).ok_or_else(|| {
                Error::corrupt(format!("unknown dtype tag {tag}"))
                    .with_column(name)
                    .with_offset(meta_offset as u64)
            })?;
            let count = to_usize(reader.read_u64()?, name)?;
            let array_len = to_usize(reader.read_u64()?, name)?;
            let base = reader.position();
            check_array_len(dtype, count, array_len).map_err(|err| {
                err.with_column(name).with_offset(meta_offset as u64)
            })?;
            reader
                .skip(array_len)
                .map_err(|err| err.with_column(name))?;
            columns.push(ColumnLayout {
                name,
                dtype,
                base,
                count,
                array_len,
            });
        }
        if reader.position() != buf.len() {
            return Err(Error::corrupt("trailing bytes after last column")
                .with_offset(reader.position() as u64));
        }

        Ok(Self {
            buf,
            metadata,
            columns,
        })
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.buf
    }

    pub fn metadata(&self) -> &'a str {
        self.metadata
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn columns(&self) -> &[ColumnLayout<'a>] {
        &self.columns
    }

    pub fn column(&self, index: usize) -> Result<&ColumnLayout<'a>, Error> {
        self.columns.get(index).ok_or_else(|| {
            Error::new(ErrorKind::IndexOutOfRange).with_message(format!(
                "column index {index} out of range ({} columns)",
                self.columns.len()
            ))
        })
    }

    pub fn column_meta(&self, index: usize) -> Result<(&'a str, Dtype), Error> {
        let column = self.column(index)?;
        Ok((column.name, column.dtype))
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }

    pub fn require_column(&self, name: &str) -> Result<usize, Error> {
        self.column_index(name).ok_or_else(|| {
            Error::new(ErrorKind::ColumnNotFound)
                .with_message("column not found")
                .with_column(name)
        })
    }

    pub fn int_at(&self, column: usize, row: usize) -> Result<i64, Error> {
        let offset = self.numeric_offset(column, row, Dtype::Int64)?;
        Ok(i64::from_le_bytes(read_array::<8>(self.buf, offset)?))
    }

    pub fn float_at(&self, column: usize, row: usize) -> Result<f64, Error> {
        let offset = self.numeric_offset(column, row, Dtype::Float64)?;
        Ok(f64::from_le_bytes(read_array::<8>(self.buf, offset)?))
    }

    pub fn text_at(&self, column: usize, row: usize) -> Result<&'a str, Error> {
        let layout = self.typed_column(column, Dtype::Text)?;
        check_row(layout, row)?;
        let mut iter = self.texts(column)?;
        for _ in 0..row {
            iter.next_str()?;
        }
        iter.next_str()
    }

    pub fn ints(&self, column: usize) -> Result<impl Iterator<Item = i64> + 'a, Error> {
        let values = self.numeric_array(column, Dtype::Int64)?;
        Ok(values
            .chunks_exact(NUMERIC_WIDTH)
            .map(|chunk| i64::from_le_bytes(chunk.try_into().unwrap_or([0; 8]))))
    }

    pub fn floats(&self, column: usize) -> Result<impl Iterator<Item = f64> + 'a, Error> {
        let values = self.numeric_array(column, Dtype::Float64)?;
        Ok(values
            .chunks_exact(NUMERIC_WIDTH)
            .map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap_or([0; 8]))))
    }

    pub fn texts(&self, column: usize) -> Result<TextIter<'a>, Error> {
        let layout = self.typed_column(column, Dtype::Text)?;
        Ok(TextIter {
            reader: ByteReader::new(&self.buf[layout.base..layout.array_end()]),
            remaining: layout.count,
            base: layout.base,
        })
    }

    fn typed_column(&self, column: usize, dtype: Dtype) -> Result<&ColumnLayout<'a>, Error> {
        let layout = self.column(column)?;
        if layout.dtype != dtype {
            return Err(Error::new(ErrorKind::TypeMismatch)
                .with_message(format!(
                    "column is {}, not {}",
                    layout.dtype.name(),
                    dtype.name()
                ))
                .with_column(layout.name));
        }
        Ok(layout)
    }

    fn numeric_offset(&self, column: usize, row: usize, dtype: Dtype) -> Result<usize, Error> {
        let layout = self.typed_column(column, dtype)?;
        check_row(layout, row)?;
        Ok(layout.base + row * NUMERIC_WIDTH)
    }

    fn numeric_array(&self, column: usize, dtype: Dtype) -> Result<&'a [u8], Error> {
        let layout = self.typed_column(column, dtype)?;
        Ok(&self.buf[layout.base..layout.array_end()])
    }
}

/// Sequential reader over one text column's length-prefixed strings.
#[derive(Debug)]
pub struct TextIter<'a> {
    reader: ByteReader<'a>,
    remaining: usize,
    base: usize,
}

impl<'a> TextIter<'a> {
    fn next_str(&mut self) -> Result<&'a str, Error> {
        let at = self.base + self.reader.position();
        self.remaining = self.remaining.saturating_sub(1);
        self.reader.read_str().map_err(|err| err.with_offset(at as u64))
    }
}

impl<'a> Iterator for TextIter<'a> {
    type Item = Result<&'a str, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        Some(self.next_str())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

fn check_row(layout: &ColumnLayout<'_>, row: usize) -> Result<(), Error> {
    if row >= layout.count {
        return Err(Error::new(ErrorKind::IndexOutOfRange)
            .with_message(format!("row {row} out of range ({} rows)", layout.count))
            .with_column(layout.name));
    }
    Ok(())
}

fn check_array_len(dtype: Dtype, count: usize, array_len: usize) -> Result<(), Error> {
    match dtype {
        Dtype::Int64 | Dtype::Float64 => {
            if count.checked_mul(NUMERIC_WIDTH) != Some(array_len) {
                return Err(Error::corrupt(format!(
                    "numeric array of {count} elements declares {array_len} bytes"
                )));
            }
        }
        Dtype::Text => {
            if count.checked_mul(4).is_none_or(|min| min > array_len) {
                return Err(Error::corrupt(format!(
                    "text array of {count} elements cannot fit in {array_len} bytes"
                )));
            }
        }
    }
    Ok(())
}

fn to_usize(value: u64, column: &str) -> Result<usize, Error> {
    usize::try_from(value)
        .map_err(|_| Error::corrupt("length does not fit in usize").with_column(column))
}

#[cfg(test)]
mod tests {
    use super::BlobView;
    use crate::core::encode::{BlobWriter, encode};
    use crate::core::error::ErrorKind;
    use crate::core::table::{Column, ColumnData, Dtype, Table};

    struct XorShift64 {
        state: u64,
    }

    impl XorShift64 {
        fn new(seed: u64) -> Self {
            Self { state: seed }
        }

        fn next_u64(&mut self) -> u64 {
            let mut x = self.state;
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            self.state = x;
            x
        }
    }

    fn sample() -> Vec<u8> {
        let table = Table::new(vec![
            Column::int64("id", vec![i64::MIN, 0, i64::MAX]),
            Column::text("name", ["a", "", "héllo"]),
            Column::float64("score", vec![-0.0, f64::NAN, 1e300]),
        ])
        .with_metadata("sample");
        encode(&table).expect("encode")
    }

    #[test]
    fn parse_records_layout_per_column() {
        let blob = sample();
        let view = BlobView::parse(&blob).expect("parse");
        assert_eq!(view.metadata(), "sample");
        assert_eq!(view.column_count(), 3);
        assert_eq!(view.column_meta(0).unwrap(), ("id", Dtype::Int64));
        assert_eq!(view.column_meta(1).unwrap(), ("name", Dtype::Text));
        assert_eq!(view.column_meta(2).unwrap(), ("score", Dtype::Float64));
        assert_eq!(view.column_index("score"), Some(2));
        assert_eq!(view.column_index("missing"), None);
        let score = view.column(2).unwrap();
        assert_eq!(score.count, 3);
        assert_eq!(score.array_end(), blob.len());
    }

    #[test]
    fn accessors_return_exact_values() {
        let blob = sample();
        let view = BlobView::parse(&blob).expect("parse");
        assert_eq!(view.int_at(0, 0).unwrap(), i64::MIN);
        assert_eq!(view.int_at(0, 2).unwrap(), i64::MAX);
        assert_eq!(view.text_at(1, 1).unwrap(), "");
        assert_eq!(view.text_at(1, 2).unwrap(), "héllo");
        assert_eq!(view.float_at(2, 0).unwrap().to_bits(), (-0.0f64).to_bits());
        assert_eq!(view.float_at(2, 1).unwrap().to_bits(), f64::NAN.to_bits());
        let texts = view
            .texts(1)
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(texts, vec!["a", "", "héllo"]);
    }

    #[test]
    fn accessors_reject_bad_indexes_and_types() {
        let blob = sample();
        let view = BlobView::parse(&blob).expect("parse");
        assert_eq!(view.int_at(0, 3).unwrap_err().kind(), ErrorKind::IndexOutOfRange);
        assert_eq!(view.text_at(1, 9).unwrap_err().kind(), ErrorKind::IndexOutOfRange);
        assert_eq!(view.column_meta(3).unwrap_err().kind(), ErrorKind::IndexOutOfRange);
        assert_eq!(view.float_at(0, 0).unwrap_err().kind(), ErrorKind::TypeMismatch);
        assert_eq!(view.ints(1).err().map(|err| err.kind()), Some(ErrorKind::TypeMismatch));
        assert_eq!(
            view.require_column("nope").unwrap_err().kind(),
            ErrorKind::ColumnNotFound
        );
    }

    #[test]
    fn every_truncation_is_rejected_without_panicking() {
        let blob = sample();
        for len in 0..blob.len() {
            let err = BlobView::parse(&blob[..len]).expect_err("truncated blob");
            assert_eq!(err.kind(), ErrorKind::Corrupt, "len {len}");
        }
    }

    #[test]
    fn random_corruption_never_panics() {
        let blob = sample();
        let mut rng = XorShift64::new(42);
        for _ in 0..2000 {
            let mut damaged = blob.clone();
            let at = (rng.next_u64() % damaged.len() as u64) as usize;
            damaged[at] = rng.next_u64() as u8;
            if let Ok(view) = BlobView::parse(&damaged) {
                for column in 0..view.column_count() {
                    let layout = view.column(column).unwrap().clone();
                    for row in 0..layout.count.min(4) {
                        let _ = match layout.dtype {
                            Dtype::Int64 => view.int_at(column, row).map(|_| ()),
                            Dtype::Float64 => view.float_at(column, row).map(|_| ()),
                            Dtype::Text => view.text_at(column, row).map(|_| ()),
                        };
                    }
                }
            }
        }
    }

    #[test]
    fn bad_dtype_tag_and_numeric_length_are_corrupt() {
        let mut blob = encode(&Table::new(vec![Column::int64("x", vec![1])])).unwrap();
        let tag_at = 4 + 4 + "DataFrame Metadata".len() + 4 + 4 + 1;
        blob[tag_at] = 9;
        assert_eq!(BlobView::parse(&blob).unwrap_err().kind(), ErrorKind::Corrupt);

        let mut blob = encode(&Table::new(vec![Column::int64("x", vec![1])])).unwrap();
        let count_at = tag_at + 1;
        blob[count_at] = 2;
        assert_eq!(BlobView::parse(&blob).unwrap_err().kind(), ErrorKind::Corrupt);
    }

    #[test]
    fn ragged_blob_reports_each_column_length() {
        let mut writer = BlobWriter::with_capacity("ragged", 2, 0).unwrap();
        writer.push_column("a", &ColumnData::Int64(vec![1, 2, 3])).unwrap();
        writer.push_column("b", &ColumnData::Text(vec!["x".into()])).unwrap();
        let blob = writer.finish();
        let view = BlobView::parse(&blob).expect("parse");
        assert_eq!(view.column(0).unwrap().count, 3);
        assert_eq!(view.column(1).unwrap().count, 1);
    }

    #[test]
    fn round_trip_preserves_random_tables() {
        let mut rng = XorShift64::new(7);
        for _ in 0..50 {
            let rows = (rng.next_u64() % 40) as usize;
            let ints = (0..rows).map(|_| rng.next_u64() as i64).collect::<Vec<_>>();
            let floats = (0..rows)
                .map(|_| f64::from_bits(rng.next_u64()))
                .collect::<Vec<_>>();
            let texts = (0..rows)
                .map(|_| "x".repeat((rng.next_u64() % 5) as usize))
                .collect::<Vec<_>>();
            let table = Table::new(vec![
                Column::float64("f", floats.clone()),
                Column::text("t", texts.clone()),
                Column::int64("i", ints.clone()),
            ]);
            let blob = encode(&table).expect("encode");
            let view = BlobView::parse(&blob).expect("parse");
            let names = view.columns().iter().map(|c| c.name).collect::<Vec<_>>();
            assert_eq!(names, vec!["f", "t", "i"]);
            let got_floats = view.floats(0).unwrap().map(f64::to_bits).collect::<Vec<_>>();
            let want_floats = floats.iter().map(|v| v.to_bits()).collect::<Vec<_>>();
            assert_eq!(got_floats, want_floats);
            let got_texts = view.texts(1).unwrap().collect::<Result<Vec<_>, _>>().unwrap();
            assert_eq!(got_texts, texts);
            assert_eq!(view.ints(2).unwrap().collect::<Vec<_>>(), ints);
        }
    }
}
