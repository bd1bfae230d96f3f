//! Purpose: Read-only queries evaluated directly over a parsed blob.
//! Exports: `head`, `group_by_sum`, `GroupSums`.
//! Role: Query layer between `BlobView` and API callers.
//! Invariants: `head` treats every column independently, so irregular blobs still preview.
//! Invariants: `group_by_sum` output is keyed ascending with each key exactly once.

use std::collections::BTreeMap;

use crate::core::decode::BlobView;
use crate::core::error::{Error, ErrorKind};
use crate::core::table::{Column, ColumnData, Dtype, Table};

/// First `rows` values of every column, preserving names and order.
pub fn head(view: &BlobView<'_>, rows: usize) -> Result<Table, Error> {
    let mut columns = Vec::with_capacity(view.column_count());
    for (index, layout) in view.columns().iter().enumerate() {
        let take = rows.min(layout.count);
        let data = match layout.dtype {
            Dtype::Int64 => ColumnData::Int64(view.ints(index)?.take(take).collect()),
            Dtype::Float64 => ColumnData::Float64(view.floats(index)?.take(take).collect()),
            Dtype::Text => ColumnData::Text(
                view.texts(index)?
                    .take(take)
                    .map(|value| value.map(str::to_string))
                    .collect::<Result<_, _>>()?,
            ),
        };
        columns.push(Column::new(layout.name, data));
    }
    Ok(Table::new(columns).with_metadata(view.metadata()))
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GroupSums {
    pub group_col: String,
    pub sum_col: String,
    /// `(key, sum)` pairs, ascending by key.
    pub rows: Vec<(i64, i64)>,
}

impl GroupSums {
    pub fn into_table(self) -> Table {
        let (keys, sums) = self.rows.into_iter().unzip();
        Table::new(vec![
            Column::int64(self.group_col, keys),
            Column::int64(self.sum_col, sums),
        ])
    }
}

/// Sums `sum_col` per distinct value of `group_col`; both must be Int64.
pub fn group_by_sum(view: &BlobView<'_>, group_col: &str, sum_col: &str) -> Result<GroupSums, Error> {
    let group_index = view.require_column(group_col)?;
    let sum_index = view.require_column(sum_col)?;
    for index in [group_index, sum_index] {
        let (name, dtype) = view.column_meta(index)?;
        if dtype != Dtype::Int64 {
            return Err(Error::new(ErrorKind::TypeMismatch)
                .with_message(format!("group-by-sum needs int64, found {}", dtype.name()))
                .with_column(name));
        }
    }

    let mut sums: BTreeMap<i64, i64> = BTreeMap::new();
    for (key, value) in view.ints(group_index)?.zip(view.ints(sum_index)?) {
        let slot = sums.entry(key).or_insert(0);
        *slot = slot.wrapping_add(value);
    }

    Ok(GroupSums {
        group_col: group_col.to_string(),
        sum_col: sum_col.to_string(),
        rows: sums.into_iter().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::{group_by_sum, head};
    use crate::core::decode::BlobView;
    use crate::core::encode::{BlobWriter, encode};
    use crate::core::error::ErrorKind;
    use crate::core::table::{Column, ColumnData, Table};

    fn blob(columns: Vec<Column>) -> Vec<u8> {
        encode(&Table::new(columns)).expect("encode")
    }

    #[test]
    fn head_limits_each_column() {
        let bytes = blob(vec![
            Column::int64("a", vec![1, 2, 3]),
            Column::text("b", ["x", "y", "z"]),
            Column::float64("c", vec![0.5, 1.5, 2.5]),
        ]);
        let view = BlobView::parse(&bytes).unwrap();

        let two = head(&view, 2).unwrap();
        assert_eq!(two.column_names(), vec!["a", "b", "c"]);
        assert_eq!(two.columns[0].data, ColumnData::Int64(vec![1, 2]));
        assert_eq!(
            two.columns[1].data,
            ColumnData::Text(vec!["x".to_string(), "y".to_string()])
        );
        assert_eq!(two.columns[2].data, ColumnData::Float64(vec![0.5, 1.5]));

        let none = head(&view, 0).unwrap();
        assert_eq!(none.column_names(), vec!["a", "b", "c"]);
        assert!(none.columns.iter().all(|column| column.data.is_empty()));

        let all = head(&view, 100).unwrap();
        assert_eq!(all.columns[0].data, ColumnData::Int64(vec![1, 2, 3]));
        assert_eq!(all.row_count(), Some(3));
    }

    #[test]
    fn head_is_permissive_on_irregular_blobs() {
        let mut writer = BlobWriter::with_capacity("m", 2, 0).unwrap();
        writer.push_column("long", &ColumnData::Int64(vec![1, 2, 3, 4])).unwrap();
        writer.push_column("short", &ColumnData::Text(vec!["only".into()])).unwrap();
        let bytes = writer.finish();
        let view = BlobView::parse(&bytes).unwrap();
        let preview = head(&view, 3).unwrap();
        assert_eq!(preview.columns[0].data.len(), 3);
        assert_eq!(preview.columns[1].data.len(), 1);
    }

    #[test]
    fn group_by_sum_matches_worked_example() {
        let bytes = blob(vec![
            Column::int64("g", vec![1, 1, 2]),
            Column::int64("s", vec![10, 20, 5]),
        ]);
        let view = BlobView::parse(&bytes).unwrap();
        let sums = group_by_sum(&view, "g", "s").unwrap();
        assert_eq!(sums.rows, vec![(1, 30), (2, 5)]);

        let table = sums.into_table();
        assert_eq!(table.column_names(), vec!["g", "s"]);
        assert_eq!(table.columns[0].data, ColumnData::Int64(vec![1, 2]));
    }

    #[test]
    fn group_by_sum_is_sorted_and_order_independent() {
        let groups = vec![5, -3, 5, 0, -3, 9, 0, 5];
        let values = vec![1, 2, 3, 4, 5, 6, 7, 8];
        let bytes = blob(vec![
            Column::int64("g", groups.clone()),
            Column::int64("s", values.clone()),
        ]);
        let forward = group_by_sum(&BlobView::parse(&bytes).unwrap(), "g", "s").unwrap();

        let keys = forward.rows.iter().map(|(key, _)| *key).collect::<Vec<_>>();
        assert!(keys.windows(2).all(|pair| pair[0] < pair[1]));
        let total: i64 = forward.rows.iter().map(|(_, sum)| sum).sum();
        assert_eq!(total, values.iter().sum::<i64>());

        let reversed = blob(vec![
            Column::int64("g", groups.into_iter().rev().collect()),
            Column::int64("s", values.into_iter().rev().collect()),
        ]);
        let backward = group_by_sum(&BlobView::parse(&reversed).unwrap(), "g", "s").unwrap();
        assert_eq!(forward, backward);
    }

    #[test]
    fn group_by_sum_validates_columns() {
        let bytes = blob(vec![
            Column::int64("g", vec![1]),
            Column::float64("f", vec![1.0]),
            Column::text("t", ["a"]),
        ]);
        let view = BlobView::parse(&bytes).unwrap();
        let err = group_by_sum(&view, "missing", "g").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ColumnNotFound);
        assert_eq!(err.column(), Some("missing"));
        assert_eq!(
            group_by_sum(&view, "g", "missing").unwrap_err().kind(),
            ErrorKind::ColumnNotFound
        );
        assert_eq!(group_by_sum(&view, "g", "f").unwrap_err().kind(), ErrorKind::TypeMismatch);
        assert_eq!(group_by_sum(&view, "t", "g").unwrap_err().kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn group_by_sum_wraps_like_int64() {
        let bytes = blob(vec![
            Column::int64("g", vec![0, 0]),
            Column::int64("s", vec![i64::MAX, 1]),
        ]);
        let sums = group_by_sum(&BlobView::parse(&bytes).unwrap(), "g", "s").unwrap();
        assert_eq!(sums.rows, vec![(0, i64::MIN)]);
    }
}
