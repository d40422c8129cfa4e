//! Self-describing table layout shared by every persisted record.
//!
//! ```text
//! [0..4]      u32  absolute offset of the root table
//! table       u32  slot count N, then N u32 slots (0 = absent, else payload offset)
//! u32         4 bytes
//! vector      u32  element count, then the elements (f32 / u32 / i32)
//! string      u32  byte length, then UTF-8 bytes
//! tables      u32  count, then one absolute table offset per entry
//! ```
//!
//! Everything is little-endian and every payload starts 4-byte aligned, so
//! vectors can be viewed in place when the buffer itself is aligned.

use std::borrow::Cow;

use crate::error::{FragmentError, Result};

/// How a field is stored and what its absent value decodes to.
#[derive(Clone, Copy, Debug)]
pub enum FieldKind {
    /// Absent decodes to `0`.
    U32,
    F32s,
    U32s,
    I32s,
    /// Absent decodes to `None`.
    Str,
    /// A vector of nested tables with the given layout.
    Tables(&'static [FieldDef]),
}

#[derive(Clone, Copy, Debug)]
pub struct FieldDef {
    pub name: &'static str,
    pub kind: FieldKind,
}

impl FieldDef {
    pub const fn new(name: &'static str, kind: FieldKind) -> Self {
        Self { name, kind }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    Absent,
    U32(u32),
    F32s(Vec<f32>),
    U32s(Vec<u32>),
    I32s(Vec<i32>),
    Str(String),
    Tables(Vec<Vec<FieldValue>>),
}

impl FieldValue {
    /// Empty vectors are not worth a payload.
    pub fn f32s(values: &[f32]) -> Self {
        if values.is_empty() {
            FieldValue::Absent
        } else {
            FieldValue::F32s(values.to_vec())
        }
    }

    pub fn u32s(values: &[u32]) -> Self {
        if values.is_empty() {
            FieldValue::Absent
        } else {
            FieldValue::U32s(values.to_vec())
        }
    }

    pub fn i32s(values: &[i32]) -> Self {
        if values.is_empty() {
            FieldValue::Absent
        } else {
            FieldValue::I32s(values.to_vec())
        }
    }

    pub fn string(value: Option<&str>) -> Self {
        value.map_or(FieldValue::Absent, |s| FieldValue::Str(s.to_string()))
    }

    pub fn tables(rows: Vec<Vec<FieldValue>>) -> Self {
        if rows.is_empty() {
            FieldValue::Absent
        } else {
            FieldValue::Tables(rows)
        }
    }

    fn matches(&self, kind: &FieldKind) -> bool {
        matches!(
            (self, kind),
            (FieldValue::Absent, _)
                | (FieldValue::U32(_), FieldKind::U32)
                | (FieldValue::F32s(_), FieldKind::F32s)
                | (FieldValue::U32s(_), FieldKind::U32s)
                | (FieldValue::I32s(_), FieldKind::I32s)
                | (FieldValue::Str(_), FieldKind::Str)
                | (FieldValue::Tables(_), FieldKind::Tables(_))
        )
    }
}

/// Consumes decoded values in schema order, substituting defaults for
/// absent fields.
pub struct FieldCursor(std::vec::IntoIter<FieldValue>);

impl FieldCursor {
    pub fn new(values: Vec<FieldValue>) -> Self {
        Self(values.into_iter())
    }

    fn next_value(&mut self) -> FieldValue {
        self.0.next().unwrap_or(FieldValue::Absent)
    }

    pub fn u32(&mut self) -> u32 {
        match self.next_value() {
            FieldValue::U32(v) => v,
            _ => 0,
        }
    }

    pub fn f32s(&mut self) -> Vec<f32> {
        match self.next_value() {
            FieldValue::F32s(v) => v,
            _ => Vec::new(),
        }
    }

    pub fn u32s(&mut self) -> Vec<u32> {
        match self.next_value() {
            FieldValue::U32s(v) => v,
            _ => Vec::new(),
        }
    }

    pub fn i32s(&mut self) -> Vec<i32> {
        match self.next_value() {
            FieldValue::I32s(v) => v,
            _ => Vec::new(),
        }
    }

    pub fn string(&mut self) -> Option<String> {
        match self.next_value() {
            FieldValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn tables(&mut self) -> Vec<Vec<FieldValue>> {
        match self.next_value() {
            FieldValue::Tables(rows) => rows,
            _ => Vec::new(),
        }
    }
}

/// 4-byte little-endian vector elements.
pub trait Element: bytemuck::Pod {
    fn from_le(bytes: [u8; 4]) -> Self;
    fn to_le(self) -> [u8; 4];
}

impl Element for f32 {
    fn from_le(bytes: [u8; 4]) -> Self {
        f32::from_le_bytes(bytes)
    }
    fn to_le(self) -> [u8; 4] {
        self.to_le_bytes()
    }
}

impl Element for u32 {
    fn from_le(bytes: [u8; 4]) -> Self {
        u32::from_le_bytes(bytes)
    }
    fn to_le(self) -> [u8; 4] {
        self.to_le_bytes()
    }
}

impl Element for i32 {
    fn from_le(bytes: [u8; 4]) -> Self {
        i32::from_le_bytes(bytes)
    }
    fn to_le(self) -> [u8; 4] {
        self.to_le_bytes()
    }
}

struct Builder {
    buf: Vec<u8>,
}

impl Builder {
    fn new() -> Self {
        // root offset, patched in `finish`
        Self { buf: vec![0; 4] }
    }

    fn align(&mut self) {
        while self.buf.len() % 4 != 0 {
            self.buf.push(0);
        }
    }

    fn pos(&self) -> u32 {
        self.buf.len() as u32
    }

    fn put_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    fn put_vector<T: Element>(&mut self, values: &[T]) -> u32 {
        self.align();
        let offset = self.pos();
        self.put_u32(values.len() as u32);
        for &v in values {
            self.buf.extend_from_slice(&v.to_le());
        }
        offset
    }

    fn put_value(&mut self, value: &FieldValue, kind: &FieldKind) -> u32 {
        match (value, kind) {
            (FieldValue::Absent, _) => 0,
            (FieldValue::U32(v), _) => {
                self.align();
                let offset = self.pos();
                self.put_u32(*v);
                offset
            }
            (FieldValue::F32s(v), _) => self.put_vector(v),
            (FieldValue::U32s(v), _) => self.put_vector(v),
            (FieldValue::I32s(v), _) => self.put_vector(v),
            (FieldValue::Str(s), _) => {
                self.align();
                let offset = self.pos();
                self.put_u32(s.len() as u32);
                self.buf.extend_from_slice(s.as_bytes());
                offset
            }
            (FieldValue::Tables(rows), FieldKind::Tables(schema)) => {
                let tables: Vec<u32> = rows
                    .iter()
                    .map(|row| self.put_table(schema, row))
                    .collect();
                self.put_vector(&tables)
            }
            (FieldValue::Tables(_), _) => 0,
        }
    }

    fn put_table(&mut self, schema: &[FieldDef], values: &[FieldValue]) -> u32 {
        let slots: Vec<u32> = schema
            .iter()
            .enumerate()
            .map(|(id, def)| match values.get(id) {
                Some(value) => {
                    debug_assert!(value.matches(&def.kind), "field '{}' has the wrong kind", def.name);
                    self.put_value(value, &def.kind)
                }
                None => 0,
            })
            .collect();
        self.align();
        let offset = self.pos();
        self.put_u32(slots.len() as u32);
        for slot in slots {
            self.put_u32(slot);
        }
        offset
    }

    fn finish(mut self, root: u32) -> Vec<u8> {
        self.buf[..4].copy_from_slice(&root.to_le_bytes());
        self.buf
    }
}

/// Write `values` as a root table laid out by `schema`.
///
/// Missing trailing values are written as absent.
pub fn encode_fields(schema: &[FieldDef], values: &[FieldValue]) -> Vec<u8> {
    let mut builder = Builder::new();
    let root = builder.put_table(schema, values);
    builder.finish(root)
}

/// Read the root table of `buf` laid out by `schema`.
///
/// Slots the buffer does not have, or marks absent, come back as
/// [`FieldValue::Absent`]. Offsets outside the buffer are errors.
pub fn decode_fields(schema: &[FieldDef], buf: &[u8]) -> Result<Vec<FieldValue>> {
    let root = TableReader::root(buf)?;
    root.read_fields(schema)
}

fn malformed(offset: usize, reason: &'static str) -> FragmentError {
    FragmentError::MalformedBuffer { offset, reason }
}

fn read_u32(buf: &[u8], pos: usize) -> Result<u32> {
    pos.checked_add(4)
        .and_then(|end| buf.get(pos..end))
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes)
        .ok_or_else(|| malformed(pos, "u32 past the end of the buffer"))
}

/// Read access to one table inside a buffer.
#[derive(Clone, Copy, Debug)]
pub struct TableReader<'a> {
    buf: &'a [u8],
    pos: usize,
    slots: usize,
}

impl<'a> TableReader<'a> {
    pub fn root(buf: &'a [u8]) -> Result<Self> {
        let root = read_u32(buf, 0)?;
        Self::at(buf, root as usize)
    }

    fn at(buf: &'a [u8], pos: usize) -> Result<Self> {
        if pos < 4 {
            return Err(malformed(pos, "table overlaps the root offset"));
        }
        let slots = read_u32(buf, pos)? as usize;
        let end = slots
            .checked_mul(4)
            .and_then(|len| len.checked_add(pos + 4))
            .ok_or_else(|| malformed(pos, "slot table too large"))?;
        if end > buf.len() {
            return Err(malformed(pos, "slot table past the end of the buffer"));
        }
        Ok(Self { buf, pos, slots })
    }

    pub fn slot_count(&self) -> usize {
        self.slots
    }

    /// Payload offset of field `id`, `None` when absent.
    pub fn field_offset(&self, id: usize) -> Result<Option<usize>> {
        if id >= self.slots {
            return Ok(None);
        }
        let offset = read_u32(self.buf, self.pos + 4 + id * 4)? as usize;
        match offset {
            0 => Ok(None),
            o if o >= self.buf.len() => Err(malformed(o, "field offset past the end of the buffer")),
            o => Ok(Some(o)),
        }
    }

    pub fn u32(&self, id: usize) -> Result<Option<u32>> {
        self.field_offset(id)?
            .map(|offset| read_u32(self.buf, offset))
            .transpose()
    }

    /// Raw bytes of a length-prefixed payload whose elements are `elem_size` wide.
    /// Bytes of a length-prefixed payload and their absolute offset.
    fn payload(&self, id: usize, elem_size: usize) -> Result<Option<(usize, &'a [u8])>> {
        let Some(offset) = self.field_offset(id)? else {
            return Ok(None);
        };
        let len = read_u32(self.buf, offset)? as usize;
        let start = offset + 4;
        let bytes = len
            .checked_mul(elem_size)
            .and_then(|size| start.checked_add(size))
            .and_then(|end| self.buf.get(start..end))
            .ok_or_else(|| malformed(offset, "payload past the end of the buffer"))?;
        Ok(Some((start, bytes)))
    }

    /// Typed view of a vector field. Borrowed straight from the buffer when
    /// the bytes are suitably aligned on a little-endian host, copied otherwise.
    pub fn vector<T: Element>(&self, id: usize) -> Result<Option<Cow<'a, [T]>>> {
        let Some((_, bytes)) = self.payload(id, 4)? else {
            return Ok(None);
        };
        if cfg!(target_endian = "little") {
            if let Ok(view) = bytemuck::try_cast_slice::<u8, T>(bytes) {
                return Ok(Some(Cow::Borrowed(view)));
            }
        }
        let owned = bytes
            .chunks_exact(4)
            .map(|c| T::from_le([c[0], c[1], c[2], c[3]]))
            .collect();
        Ok(Some(Cow::Owned(owned)))
    }

    pub fn string(&self, id: usize) -> Result<Option<&'a str>> {
        let Some((start, bytes)) = self.payload(id, 1)? else {
            return Ok(None);
        };
        std::str::from_utf8(bytes)
            .map(Some)
            .map_err(|e| malformed(start + e.valid_up_to(), "string is not valid UTF-8"))
    }

    pub fn tables(&self, id: usize) -> Result<Vec<TableReader<'a>>> {
        let Some(offsets) = self.vector::<u32>(id)? else {
            return Ok(Vec::new());
        };
        offsets
            .iter()
            .map(|&offset| TableReader::at(self.buf, offset as usize))
            .collect()
    }

    pub fn read_fields(&self, schema: &[FieldDef]) -> Result<Vec<FieldValue>> {
        schema
            .iter()
            .enumerate()
            .map(|(id, def)| -> Result<FieldValue> {
                let value = match def.kind {
                    FieldKind::U32 => self.u32(id)?.map(FieldValue::U32),
                    FieldKind::F32s => self.vector::<f32>(id)?.map(|v| FieldValue::F32s(v.into_owned())),
                    FieldKind::U32s => self.vector::<u32>(id)?.map(|v| FieldValue::U32s(v.into_owned())),
                    FieldKind::I32s => self.vector::<i32>(id)?.map(|v| FieldValue::I32s(v.into_owned())),
                    FieldKind::Str => self.string(id)?.map(|s| FieldValue::Str(s.to_string())),
                    FieldKind::Tables(nested) => {
                        if self.field_offset(id)?.is_none() {
                            None
                        } else {
                            let rows = self
                                .tables(id)?
                                .iter()
                                .map(|table| table.read_fields(nested))
                                .collect::<Result<Vec<_>>>()?;
                            Some(FieldValue::Tables(rows))
                        }
                    }
                };
                Ok(value.unwrap_or(FieldValue::Absent))
            })
            .collect()
    }
}
