//! Row and column wire codecs (§4.11).

mod column;
mod row;
mod varint;

pub use column::{decode_column, decode_deltas, encode_column, encode_deltas, ColumnEncoding, ColumnSegment, SegmentBounds};
pub use row::{decode_row, encode_row};
pub use varint::{read_varint, write_varint};
