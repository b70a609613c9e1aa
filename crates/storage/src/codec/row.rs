//! Row codec (§4.11).
//!
//! `[cell_count:u16][cell0]...[cellN]`, each cell
//! `[type_tag:u8][null_flag:u8][payload]`. The type tag comes from the
//! owning column's declared type (not the value's own, since `Null`
//! carries no type of its own) so decoding doesn't need the original
//! schema beyond knowing each column's type in order.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use sharpcore_core::{ColumnType, Error, Result, Value};

use super::varint::{read_varint, write_varint};

/// Encode a row given the declared type of each column, in column
/// order. `values.len()` must equal `column_types.len()`.
pub fn encode_row(column_types: &[ColumnType], values: &[Value]) -> Result<Vec<u8>> {
    if column_types.len() != values.len() {
        return Err(Error::InvalidArgument(
            "row cell count does not match column count".into(),
        ));
    }

    let mut buf = Vec::new();
    buf.write_u16::<LittleEndian>(values.len() as u16).unwrap();

    for (ty, value) in column_types.iter().zip(values) {
        buf.write_u8(ty.tag()).unwrap();
        buf.write_u8(value.is_null() as u8).unwrap();
        if value.is_null() {
            continue;
        }
        encode_payload(&mut buf, *ty, value)?;
    }
    Ok(buf)
}

fn encode_payload(buf: &mut Vec<u8>, ty: ColumnType, value: &Value) -> Result<()> {
    match (ty, value) {
        (ColumnType::Integer, Value::Integer(v)) => {
            buf.write_i64::<LittleEndian>(*v).unwrap();
        }
        (ColumnType::Float, Value::Float(v)) => {
            buf.write_f64::<LittleEndian>(*v).unwrap();
        }
        (ColumnType::Decimal, Value::Decimal(v)) => {
            buf.extend_from_slice(v);
        }
        (ColumnType::Text, Value::Text(s)) => {
            let bytes = s.as_bytes();
            write_varint(buf, bytes.len() as u64);
            buf.extend_from_slice(bytes);
        }
        (ColumnType::Boolean, Value::Boolean(v)) => {
            buf.write_u8(*v as u8).unwrap();
        }
        (ColumnType::DateTime, Value::DateTime(v)) => {
            buf.write_i64::<LittleEndian>(*v).unwrap();
        }
        (ColumnType::Blob, Value::Blob(b)) => {
            write_varint(buf, b.len() as u64);
            buf.extend_from_slice(b);
        }
        (ColumnType::Ulid, Value::Ulid(v)) => {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        (ColumnType::Guid, Value::Guid(v)) => {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        (ColumnType::Vector, Value::Vector(vec)) => {
            buf.write_u32::<LittleEndian>(vec.len() as u32).unwrap();
            for f in vec {
                buf.write_f32::<LittleEndian>(*f).unwrap();
            }
        }
        _ => {
            return Err(Error::InvalidArgument(format!(
                "value does not match declared column type {ty:?}"
            )))
        }
    }
    Ok(())
}

/// Decode a row, given the declared type of each column in order.
pub fn decode_row(column_types: &[ColumnType], bytes: &[u8]) -> Result<Vec<Value>> {
    if bytes.len() < 2 {
        return Err(Error::Corrupt("row buffer too short for cell count".into()));
    }
    let cell_count = (&bytes[0..2]).read_u16::<LittleEndian>().unwrap() as usize;
    if cell_count != column_types.len() {
        return Err(Error::Corrupt(
            "row cell count does not match schema column count".into(),
        ));
    }

    let mut pos = 2usize;
    let mut values = Vec::with_capacity(cell_count);
    for ty in column_types {
        let tag = *bytes
            .get(pos)
            .ok_or_else(|| Error::Corrupt("truncated row: missing type tag".into()))?;
        let declared = ColumnType::from_tag(tag)
            .ok_or_else(|| Error::Corrupt(format!("unknown column type tag {tag}")))?;
        if declared.tag() != ty.tag() {
            return Err(Error::Corrupt("row cell type tag mismatch with schema".into()));
        }
        pos += 1;
        let null_flag = *bytes
            .get(pos)
            .ok_or_else(|| Error::Corrupt("truncated row: missing null flag".into()))?;
        pos += 1;
        if null_flag != 0 {
            values.push(Value::Null);
            continue;
        }
        let (value, consumed) = decode_payload(*ty, bytes, pos)?;
        pos += consumed;
        values.push(value);
    }
    Ok(values)
}

fn decode_payload(ty: ColumnType, bytes: &[u8], pos: usize) -> Result<(Value, usize)> {
    let truncated = || Error::Corrupt("truncated row payload".into());
    match ty {
        ColumnType::Integer => {
            let slice = bytes.get(pos..pos + 8).ok_or_else(truncated)?;
            Ok((
                Value::Integer((&slice[..]).read_i64::<LittleEndian>().unwrap()),
                8,
            ))
        }
        ColumnType::Float => {
            let slice = bytes.get(pos..pos + 8).ok_or_else(truncated)?;
            Ok((
                Value::Float((&slice[..]).read_f64::<LittleEndian>().unwrap()),
                8,
            ))
        }
        ColumnType::Decimal => {
            let slice = bytes.get(pos..pos + 16).ok_or_else(truncated)?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(slice);
            Ok((Value::Decimal(arr), 16))
        }
        ColumnType::Text => {
            let (len, len_size) = read_varint(bytes, pos)?;
            let start = pos + len_size;
            let slice = bytes.get(start..start + len as usize).ok_or_else(truncated)?;
            let s = std::str::from_utf8(slice)
                .map_err(|_| Error::Corrupt("row text payload is not valid UTF-8".into()))?;
            Ok((Value::Text(s.to_string()), len_size + len as usize))
        }
        ColumnType::Boolean => {
            let b = *bytes.get(pos).ok_or_else(truncated)?;
            Ok((Value::Boolean(b != 0), 1))
        }
        ColumnType::DateTime => {
            let slice = bytes.get(pos..pos + 8).ok_or_else(truncated)?;
            Ok((
                Value::DateTime((&slice[..]).read_i64::<LittleEndian>().unwrap()),
                8,
            ))
        }
        ColumnType::Blob => {
            let (len, len_size) = read_varint(bytes, pos)?;
            let start = pos + len_size;
            let slice = bytes.get(start..start + len as usize).ok_or_else(truncated)?;
            Ok((Value::Blob(slice.to_vec()), len_size + len as usize))
        }
        ColumnType::Ulid => {
            let slice = bytes.get(pos..pos + 16).ok_or_else(truncated)?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(slice);
            Ok((Value::Ulid(u128::from_le_bytes(arr)), 16))
        }
        ColumnType::Guid => {
            let slice = bytes.get(pos..pos + 16).ok_or_else(truncated)?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(slice);
            Ok((Value::Guid(u128::from_le_bytes(arr)), 16))
        }
        ColumnType::Vector => {
            let slice = bytes.get(pos..pos + 4).ok_or_else(truncated)?;
            let dim = (&slice[..]).read_u32::<LittleEndian>().unwrap() as usize;
            let mut consumed = 4;
            let mut out = Vec::with_capacity(dim);
            for _ in 0..dim {
                let f_slice = bytes
                    .get(pos + consumed..pos + consumed + 4)
                    .ok_or_else(truncated)?;
                out.push((&f_slice[..]).read_f32::<LittleEndian>().unwrap());
                consumed += 4;
            }
            Ok((Value::Vector(out), consumed))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_mixed_row() {
        let types = [
            ColumnType::Integer,
            ColumnType::Text,
            ColumnType::Boolean,
            ColumnType::Vector,
        ];
        let values = vec![
            Value::Integer(42),
            Value::Text("hello".into()),
            Value::Null,
            Value::Vector(vec![1.0, 2.0, 3.0]),
        ];
        let encoded = encode_row(&types, &values).unwrap();
        let decoded = decode_row(&types, &encoded).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn mismatched_arity_is_rejected() {
        let types = [ColumnType::Integer];
        let values = vec![Value::Integer(1), Value::Integer(2)];
        assert!(encode_row(&types, &values).is_err());
    }

    #[test]
    fn decode_rejects_truncated_buffer() {
        let types = [ColumnType::Text];
        assert!(decode_row(&types, &[0, 1]).is_err());
    }

    #[test]
    fn null_round_trips_for_any_column_type() {
        let types = [ColumnType::Blob];
        let values = vec![Value::Null];
        let encoded = encode_row(&types, &values).unwrap();
        assert_eq!(decode_row(&types, &encoded).unwrap(), values);
    }
}
