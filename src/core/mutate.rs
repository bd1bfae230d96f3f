//! Purpose: Rewrite fixed-width numeric elements of an encoded blob in place.
//! Exports: `map_numeric_column`, `NumericMap`, `MapOutcome`, `Identity`, `Negate`, `Affine`.
//! Role: The only write path into an already-framed blob.
//! Invariants: Element `j` lives at `base + j * 8`, with `base` taken from the column's metadata.
//! Invariants: Writes stay within `[base, base + count * 8)`; blob length never changes.
//! Invariants: Missing and text columns are a no-op, not an error.

use std::slice::ChunksExactMut;

use crate::core::decode::BlobView;
use crate::core::error::Error;
use crate::core::format::{NUMERIC_WIDTH, read_array};
use crate::core::table::Dtype;

/// Per-dtype element function; implementations must be total and dtype-preserving.
pub trait NumericMap {
    fn map_i64(&mut self, value: i64) -> i64;
    fn map_f64(&mut self, value: f64) -> f64;
}

impl<F, G> NumericMap for (F, G)
where
    F: FnMut(i64) -> i64,
    G: FnMut(f64) -> f64,
{
    fn map_i64(&mut self, value: i64) -> i64 {
        (self.0)(value)
    }

    fn map_f64(&mut self, value: f64) -> f64 {
        (self.1)(value)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl NumericMap for Identity {
    fn map_i64(&mut self, value: i64) -> i64 {
        value
    }

    fn map_f64(&mut self, value: f64) -> f64 {
        value
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Negate;

impl NumericMap for Negate {
    fn map_i64(&mut self, value: i64) -> i64 {
        value.wrapping_neg()
    }

    fn map_f64(&mut self, value: f64) -> f64 {
        -value
    }
}

/// `x * scale + offset`; integer arithmetic wraps.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Affine {
    pub scale: i64,
    pub offset: i64,
}

impl Affine {
    pub fn scale_by(scale: i64) -> Self {
        Self { scale, offset: 0 }
    }

    pub fn offset_by(offset: i64) -> Self {
        Self { scale: 1, offset }
    }
}

impl NumericMap for Affine {
    fn map_i64(&mut self, value: i64) -> i64 {
        value.wrapping_mul(self.scale).wrapping_add(self.offset)
    }

    fn map_f64(&mut self, value: f64) -> f64 {
        value * self.scale as f64 + self.offset as f64
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MapOutcome {
    Mapped { dtype: Dtype, elements: usize },
    MissingColumn,
    TextColumn,
}

/// Applies `f` to every element of the numeric column `name` inside `buf`.
pub fn map_numeric_column<M: NumericMap>(
    buf: &mut [u8],
    name: &str,
    f: &mut M,
) -> Result<MapOutcome, Error> {
    let (dtype, base, count) = {
        let view = BlobView::parse(buf)?;
        let Some(index) = view.column_index(name) else {
            return Ok(MapOutcome::MissingColumn);
        };
        let layout = view.column(index)?;
        (layout.dtype, layout.base, layout.count)
    };

    match dtype {
        Dtype::Text => return Ok(MapOutcome::TextColumn),
        Dtype::Int64 => {
            for slot in numeric_slots(buf, base, count) {
                let value = i64::from_le_bytes(read_array::<8>(slot, 0)?);
                slot.copy_from_slice(&f.map_i64(value).to_le_bytes());
            }
        }
        Dtype::Float64 => {
            for slot in numeric_slots(buf, base, count) {
                let value = f64::from_le_bytes(read_array::<8>(slot, 0)?);
                slot.copy_from_slice(&f.map_f64(value).to_le_bytes());
            }
        }
    }
    Ok(MapOutcome::Mapped {
        dtype,
        elements: count,
    })
}

fn numeric_slots(buf: &mut [u8], base: usize, count: usize) -> ChunksExactMut<'_, u8> {
    buf[base..base + count * NUMERIC_WIDTH].chunks_exact_mut(NUMERIC_WIDTH)
}
