//! Binary persistence for fragments.
//!
//! Every record is a table of optional fields (see [`table`] for the byte
//! layout). A record type describes its fields once in [`Record::SCHEMA`] and
//! converts itself to and from a list of [`FieldValue`]s; [`encode`] and
//! [`decode`] do the rest.
//!
//! Key records:
//! - [`FragmentsGroup`]: a whole model, its fragments and metadata
//! - [`FragmentRecord`]: one fragment's geometry, materials and instances
//! - [`StreamedGeometry`]: raw geometry addressed outside a group

pub mod group;
pub mod streamed;
pub mod table;

pub use group::{Alignment, CsrIndex, FragmentRecord, FragmentsGroup};
pub use streamed::{StreamedGeometries, StreamedGeometry};
pub use table::{FieldDef, FieldKind, FieldValue, TableReader, decode_fields, encode_fields};

use crate::error::{FragmentError, Result};

pub trait Record: Sized {
    const SCHEMA: &'static [FieldDef];

    /// Field values in schema order.
    fn to_fields(&self) -> Vec<FieldValue>;

    /// Rebuild from decoded values in schema order, validating as needed.
    fn from_fields(fields: Vec<FieldValue>) -> Result<Self>;
}

pub fn encode<R: Record>(record: &R) -> Vec<u8> {
    encode_fields(R::SCHEMA, &record.to_fields())
}

pub fn decode<R: Record>(buf: &[u8]) -> Result<R> {
    R::from_fields(decode_fields(R::SCHEMA, buf)?)
}

/// Encode with a leading `u32` byte length so records can be concatenated.
pub fn encode_size_prefixed<R: Record>(record: &R) -> Vec<u8> {
    let body = encode(record);
    let mut buf = Vec::with_capacity(body.len() + 4);
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&body);
    buf
}

/// Decode one size-prefixed record, returning it with the bytes that follow.
pub fn decode_size_prefixed<R: Record>(buf: &[u8]) -> Result<(R, &[u8])> {
    let len = buf
        .get(..4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or(FragmentError::MalformedBuffer {
            offset: 0,
            reason: "missing size prefix",
        })? as usize;
    let end = len.checked_add(4).filter(|&end| end <= buf.len()).ok_or(
        FragmentError::MalformedBuffer {
            offset: 0,
            reason: "size prefix past the end of the buffer",
        },
    )?;
    let (body, rest) = buf[4..].split_at(end - 4);
    Ok((decode(body)?, rest))
}
