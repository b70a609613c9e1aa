//! Column codec (§4.11): segment encodings used when an append-only
//! table is promoted to columnar storage. Each segment records a
//! min/max pair for predicate pushdown.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use sharpcore_core::{Error, Result, Value};

use super::varint::{read_varint, write_varint};

/// One column's min/max bounds, used to skip a segment entirely when a
/// predicate can't match anything inside it.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentBounds {
    pub min: Value,
    pub max: Value,
}

/// A single encoded column segment plus its bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSegment {
    pub bounds: SegmentBounds,
    pub encoding: ColumnEncoding,
}

/// Which packing scheme a segment uses.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnEncoding {
    /// Low-cardinality strings: a dictionary of distinct values plus a
    /// varint index per row.
    Dictionary { dictionary: Vec<String>, indices: Vec<u32> },
    /// Monotonically increasing integers: a varint-encoded base plus
    /// per-row varint deltas.
    DeltaVarint { base: i64, deltas: Vec<i64> },
    /// Repeating values: `(value, run_length)` pairs.
    RunLength { runs: Vec<(Value, u32)> },
    /// No applicable compression; values stored as-is via the row
    /// codec's payload encoding, one after another.
    Plain { values: Vec<Value> },
}

/// Choose and apply the best-fitting encoding for a column of text or
/// integer values: run-length when most rows repeat, dictionary when
/// strings are low-cardinality, delta-varint for monotonic integers,
/// and plain otherwise.
pub fn encode_column(values: &[Value]) -> Result<ColumnSegment> {
    if values.is_empty() {
        return Err(Error::InvalidArgument("cannot encode an empty column segment".into()));
    }
    let bounds = compute_bounds(values)?;

    if let Some(runs) = try_run_length(values) {
        return Ok(ColumnSegment {
            bounds,
            encoding: ColumnEncoding::RunLength { runs },
        });
    }

    if let Some(encoding) = try_dictionary(values) {
        return Ok(ColumnSegment { bounds, encoding });
    }

    if let Some(encoding) = try_delta_varint(values) {
        return Ok(ColumnSegment { bounds, encoding });
    }

    Ok(ColumnSegment {
        bounds,
        encoding: ColumnEncoding::Plain {
            values: values.to_vec(),
        },
    })
}

/// Expand a segment back into its row-major values.
pub fn decode_column(segment: &ColumnSegment) -> Vec<Value> {
    match &segment.encoding {
        ColumnEncoding::Dictionary { dictionary, indices } => indices
            .iter()
            .map(|&i| Value::Text(dictionary[i as usize].clone()))
            .collect(),
        ColumnEncoding::DeltaVarint { base, deltas } => {
            let mut running = *base;
            let mut out = Vec::with_capacity(deltas.len());
            for (i, delta) in deltas.iter().enumerate() {
                if i == 0 {
                    out.push(Value::Integer(running));
                } else {
                    running += delta;
                    out.push(Value::Integer(running));
                }
            }
            out
        }
        ColumnEncoding::RunLength { runs } => runs
            .iter()
            .flat_map(|(value, len)| std::iter::repeat(value.clone()).take(*len as usize))
            .collect(),
        ColumnEncoding::Plain { values } => values.clone(),
    }
}

fn compute_bounds(values: &[Value]) -> Result<SegmentBounds> {
    let collation = sharpcore_core::Collation::Binary;
    let mut min = &values[0];
    let mut max = &values[0];
    for v in values.iter().skip(1) {
        if v.compare(min, &collation) == std::cmp::Ordering::Less {
            min = v;
        }
        if v.compare(max, &collation) == std::cmp::Ordering::Greater {
            max = v;
        }
    }
    Ok(SegmentBounds {
        min: min.clone(),
        max: max.clone(),
    })
}

fn try_run_length(values: &[Value]) -> Option<Vec<(Value, u32)>> {
    let mut runs: Vec<(Value, u32)> = Vec::new();
    for v in values {
        match runs.last_mut() {
            Some((last, count)) if last == v => *count += 1,
            _ => runs.push((v.clone(), 1)),
        }
    }
    // Only worth it if it actually compresses meaningfully: average run
    // length of at least two.
    if runs.len() * 2 <= values.len() {
        Some(runs)
    } else {
        None
    }
}

fn try_dictionary(values: &[Value]) -> Option<ColumnEncoding> {
    let mut dictionary: Vec<String> = Vec::new();
    let mut indices = Vec::with_capacity(values.len());
    for v in values {
        let Value::Text(s) = v else { return None };
        let idx = match dictionary.iter().position(|d| d == s) {
            Some(i) => i,
            None => {
                dictionary.push(s.clone());
                dictionary.len() - 1
            }
        };
        indices.push(idx as u32);
    }
    // Low-cardinality threshold: distinct values under a quarter of rows.
    if dictionary.len() * 4 < values.len().max(1) {
        Some(ColumnEncoding::Dictionary { dictionary, indices })
    } else {
        None
    }
}

fn try_delta_varint(values: &[Value]) -> Option<ColumnEncoding> {
    let mut ints = Vec::with_capacity(values.len());
    for v in values {
        let Value::Integer(i) = v else { return None };
        ints.push(*i);
    }
    let monotonic = ints.windows(2).all(|w| w[1] >= w[0]);
    if !monotonic {
        return None;
    }
    let base = ints[0];
    let mut deltas = Vec::with_capacity(ints.len());
    let mut prev = base;
    for (i, &v) in ints.iter().enumerate() {
        if i == 0 {
            deltas.push(0);
        } else {
            deltas.push(v - prev);
        }
        prev = v;
    }
    Some(ColumnEncoding::DeltaVarint { base, deltas })
}

/// Serialize a segment's integer-delta payload for on-disk storage
/// (used by the delta-varint encoding; other encodings piggy-back on
/// the row codec's per-value payload format for their literal values).
pub fn encode_deltas(base: i64, deltas: &[i64]) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.write_i64::<LittleEndian>(base).unwrap();
    write_varint(&mut buf, deltas.len() as u64);
    for d in deltas {
        // zigzag-encode so negative deltas (shouldn't occur for
        // monotonic columns, but kept defensive) still fit a varint.
        let zigzag = ((d << 1) ^ (d >> 63)) as u64;
        write_varint(&mut buf, zigzag);
    }
    buf
}

pub fn decode_deltas(bytes: &[u8]) -> Result<(i64, Vec<i64>)> {
    if bytes.len() < 8 {
        return Err(Error::Corrupt("truncated delta segment".into()));
    }
    let base = (&bytes[0..8]).read_i64::<LittleEndian>().unwrap();
    let (count, mut pos) = read_varint(bytes, 8)?;
    pos += 8;
    let mut deltas = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (zigzag, consumed) = read_varint(bytes, pos)?;
        pos += consumed;
        let delta = ((zigzag >> 1) as i64) ^ -((zigzag & 1) as i64);
        deltas.push(delta);
    }
    Ok((base, deltas))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_length_round_trips() {
        let values = vec![
            Value::Integer(1),
            Value::Integer(1),
            Value::Integer(1),
            Value::Integer(2),
        ];
        let segment = encode_column(&values).unwrap();
        assert!(matches!(segment.encoding, ColumnEncoding::RunLength { .. }));
        assert_eq!(decode_column(&segment), values);
    }

    #[test]
    fn dictionary_round_trips_low_cardinality_text() {
        let letters = ["a", "b", "c"];
        let values: Vec<Value> = (0..21)
            .map(|i| Value::Text(letters[i % 3].to_string()))
            .collect();
        let segment = encode_column(&values).unwrap();
        assert!(matches!(segment.encoding, ColumnEncoding::Dictionary { .. }));
        assert_eq!(decode_column(&segment), values);
    }

    #[test]
    fn delta_varint_round_trips_monotonic_integers() {
        let values = vec![
            Value::Integer(100),
            Value::Integer(105),
            Value::Integer(111),
            Value::Integer(111),
        ];
        let segment = encode_column(&values).unwrap();
        match &segment.encoding {
            ColumnEncoding::DeltaVarint { .. } => {}
            ColumnEncoding::RunLength { .. } => panic!("expected delta-varint, got run-length"),
            other => panic!("unexpected encoding {other:?}"),
        }
        assert_eq!(decode_column(&segment), values);
    }

    #[test]
    fn encode_deltas_round_trips_with_negative_values() {
        let bytes = encode_deltas(10, &[0, 5, -3, 2]);
        let (base, deltas) = decode_deltas(&bytes).unwrap();
        assert_eq!(base, 10);
        assert_eq!(deltas, vec![0, 5, -3, 2]);
    }

    #[test]
    fn bounds_track_min_and_max() {
        let values = vec![Value::Integer(5), Value::Integer(1), Value::Integer(9)];
        let segment = encode_column(&values).unwrap();
        assert_eq!(segment.bounds.min, Value::Integer(1));
        assert_eq!(segment.bounds.max, Value::Integer(9));
    }
}
