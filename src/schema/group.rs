//! Persisted model: fragments plus relational, spatial and descriptive metadata.

use std::collections::BTreeSet;

use cgmath::Matrix4;

use crate::{
    data_structures::{
        fragment::Fragment,
        geometry::{Aabb, BlockIds, Group, Material, MergedGeometry},
        instance::{InstanceData, InstanceTable},
    },
    error::{FragmentError, Result},
    schema::{
        Record,
        table::{FieldCursor, FieldDef, FieldKind, FieldValue},
    },
};

const MATERIAL_STRIDE: usize = 6;
const MATRIX_STRIDE: usize = 16;

/// Flat values plus one start offset per row and a closing offset.
///
/// `indices` is either empty (no rows) or holds `rows + 1` non-decreasing
/// offsets with the last one equal to `values.len()`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CsrIndex {
    pub values: Vec<u32>,
    pub indices: Vec<u32>,
}

impl CsrIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows<'a, I: IntoIterator<Item = &'a [u32]>>(rows: I) -> Self {
        let mut csr = Self::new();
        for row in rows {
            csr.push_row(row);
        }
        csr
    }

    pub fn push_row(&mut self, row: &[u32]) {
        if self.indices.is_empty() {
            self.indices.push(0);
        }
        self.values.extend_from_slice(row);
        self.indices.push(self.values.len() as u32);
    }

    pub fn rows(&self) -> usize {
        self.indices.len().saturating_sub(1)
    }

    pub fn row(&self, item: usize) -> Option<&[u32]> {
        let start = *self.indices.get(item)? as usize;
        let end = *self.indices.get(item + 1)? as usize;
        self.values.get(start..end)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u32]> + '_ {
        (0..self.rows()).filter_map(|item| self.row(item))
    }

    /// `field` names the offsets field in the error.
    pub fn validate(&self, field: &'static str) -> Result<()> {
        let Some(&last) = self.indices.last() else {
            return if self.values.is_empty() {
                Ok(())
            } else {
                Err(FragmentError::InvalidIndex { field })
            };
        };
        let ordered = self.indices.windows(2).all(|w| w[0] <= w[1]);
        if !ordered || self.indices[0] != 0 || last as usize != self.values.len() {
            return Err(FragmentError::InvalidIndex { field });
        }
        Ok(())
    }
}

/// Civil alignment data, carried through without interpretation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Alignment {
    pub absolute: Vec<f32>,
    pub horizontal: Vec<f32>,
    pub vertical: Vec<f32>,
}

const ALIGNMENT_FIELDS: &[FieldDef] = &[
    FieldDef::new("absolute", FieldKind::F32s),
    FieldDef::new("horizontal", FieldKind::F32s),
    FieldDef::new("vertical", FieldKind::F32s),
];

impl Record for Alignment {
    const SCHEMA: &'static [FieldDef] = ALIGNMENT_FIELDS;

    fn to_fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::f32s(&self.absolute),
            FieldValue::f32s(&self.horizontal),
            FieldValue::f32s(&self.vertical),
        ]
    }

    fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
        let mut f = FieldCursor::new(fields);
        Ok(Self {
            absolute: f.f32s(),
            horizontal: f.f32s(),
            vertical: f.f32s(),
        })
    }
}

/**
 * Flattened form of a [`Fragment`].
 *
 * Vertex attributes are stored as flat `f32` streams, block ids widened to
 * `u32`, groups as `(start, count, material)` triples and materials as
 * `(r, g, b, opacity, transparent, depth_test)`. Every slot of the instance
 * table gets a matrix and an identifier row; `active` lists the occupied ones.
 */
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FragmentRecord {
    pub position: Vec<f32>,
    pub normal: Vec<f32>,
    pub index: Vec<u32>,
    pub block_id: Vec<u32>,
    pub groups: Vec<u32>,
    pub materials: Vec<f32>,
    pub matrices: Vec<f32>,
    pub ids: CsrIndex,
    pub active: Vec<u32>,
    pub count: u32,
    pub id: Option<String>,
    pub capacity: u32,
}

const FRAGMENT_FIELDS: &[FieldDef] = &[
    FieldDef::new("position", FieldKind::F32s),
    FieldDef::new("normal", FieldKind::F32s),
    FieldDef::new("index", FieldKind::U32s),
    FieldDef::new("block_id", FieldKind::U32s),
    FieldDef::new("groups", FieldKind::U32s),
    FieldDef::new("materials", FieldKind::F32s),
    FieldDef::new("matrices", FieldKind::F32s),
    FieldDef::new("ids", FieldKind::U32s),
    FieldDef::new("ids_indices", FieldKind::U32s),
    FieldDef::new("active", FieldKind::U32s),
    FieldDef::new("count", FieldKind::U32),
    FieldDef::new("id", FieldKind::Str),
    FieldDef::new("capacity", FieldKind::U32),
];

fn invalid(reason: String) -> FragmentError {
    FragmentError::InvalidRecord(reason)
}

fn flag(value: bool) -> f32 {
    if value { 1.0 } else { 0.0 }
}

fn triples(values: &[f32]) -> Vec<[f32; 3]> {
    values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()
}

fn matrix_from_slice(m: &[f32]) -> Matrix4<f32> {
    Matrix4::new(
        m[0], m[1], m[2], m[3], m[4], m[5], m[6], m[7], m[8], m[9], m[10], m[11], m[12], m[13],
        m[14], m[15],
    )
}

impl FragmentRecord {
    /// Check that the flat arrays describe a consistent fragment.
    pub fn validate(&self) -> Result<()> {
        let capacity = self.capacity as usize;
        if self.position.len() % 3 != 0 || self.normal.len() != self.position.len() {
            return Err(invalid(format!(
                "{} position and {} normal components",
                self.position.len(),
                self.normal.len()
            )));
        }
        if self.block_id.len() != self.position.len() / 3 {
            return Err(invalid(format!(
                "{} block ids for {} vertices",
                self.block_id.len(),
                self.position.len() / 3
            )));
        }
        if self.groups.len() % 3 != 0 || self.materials.len() % MATERIAL_STRIDE != 0 {
            return Err(invalid(String::from("truncated group or material entry")));
        }
        let past_indices = |g: &&[u32]| {
            g[0].checked_add(g[1])
                .is_none_or(|end| end as usize > self.index.len())
        };
        if let Some(group) = self.groups.chunks_exact(3).find(past_indices) {
            return Err(invalid(format!(
                "group {}..+{} exceeds {} indices",
                group[0],
                group[1],
                self.index.len()
            )));
        }
        if self.matrices.len() != capacity * MATRIX_STRIDE {
            return Err(invalid(format!(
                "{} matrix values for capacity {}",
                self.matrices.len(),
                capacity
            )));
        }
        self.ids.validate("ids_indices")?;
        if self.ids.rows() != capacity && !(self.ids.rows() == 0 && self.active.is_empty()) {
            return Err(invalid(format!(
                "{} identifier rows for capacity {}",
                self.ids.rows(),
                capacity
            )));
        }
        if let Some(slot) = self.active.iter().find(|&&slot| slot as usize >= capacity) {
            return Err(invalid(format!("active slot {} beyond capacity {}", slot, capacity)));
        }
        if self.count as usize > capacity {
            return Err(invalid(format!("count {} beyond capacity {}", self.count, capacity)));
        }
        Ok(())
    }

    pub fn to_fragment(&self) -> Result<Fragment> {
        self.validate()?;
        let group_count = self.groups.len() / 3;
        if let Some(block) = self.block_id.iter().find(|&&b| b as usize >= group_count) {
            return Err(invalid(format!("block id {} without a group", block)));
        }
        let groups = self
            .groups
            .chunks_exact(3)
            .map(|g| Group {
                start: g[0],
                count: g[1],
                material_index: g[2],
            })
            .collect();
        let geometry = MergedGeometry::from_parts(
            triples(&self.position),
            triples(&self.normal),
            self.index.clone(),
            BlockIds::from_u32(group_count, &self.block_id),
            groups,
        )?;
        let materials = self
            .materials
            .chunks_exact(MATERIAL_STRIDE)
            .map(|m| Material {
                color: [m[0], m[1], m[2]],
                opacity: m[3],
                transparent: m[4] != 0.0,
                depth_test: m[5] != 0.0,
            })
            .collect();
        let slots = self.active.iter().map(|&slot| {
            let slot = slot as usize;
            let start = slot * MATRIX_STRIDE;
            let transform = matrix_from_slice(&self.matrices[start..start + MATRIX_STRIDE]);
            let ids = self.ids.row(slot).unwrap_or_default().to_vec();
            (slot, InstanceData::new(ids, transform))
        });
        let instances = InstanceTable::restore(self.capacity as usize, slots, self.count as usize)?;
        Fragment::with_instances(
            self.id.as_deref().unwrap_or_default(),
            geometry,
            materials,
            instances,
        )
    }
}

impl From<&Fragment> for FragmentRecord {
    fn from(fragment: &Fragment) -> Self {
        let geometry = fragment.geometry();
        let instances = fragment.instances();
        let capacity = instances.capacity();

        let mut matrices = Vec::with_capacity(capacity * MATRIX_STRIDE);
        let mut ids = CsrIndex::new();
        let mut active = Vec::new();
        for slot in 0..capacity {
            match instances.get_instance(slot) {
                Ok(transform) => {
                    let columns: [[f32; 4]; 4] = transform.into();
                    matrices.extend(columns.iter().flatten());
                    ids.push_row(instances.ids(slot).unwrap_or_default());
                    active.push(slot as u32);
                }
                Err(_) => {
                    matrices.extend([0.0; MATRIX_STRIDE]);
                    ids.push_row(&[]);
                }
            }
        }

        Self {
            position: geometry.positions().iter().flatten().copied().collect(),
            normal: geometry.normals().iter().flatten().copied().collect(),
            index: geometry.indices().to_vec(),
            block_id: geometry.block_ids().to_u32_vec(),
            groups: geometry
                .groups()
                .iter()
                .flat_map(|g| [g.start, g.count, g.material_index])
                .collect(),
            materials: fragment
                .materials()
                .iter()
                .flat_map(|m| {
                    let [r, g, b] = m.color;
                    [r, g, b, m.opacity, flag(m.transparent), flag(m.depth_test)]
                })
                .collect(),
            matrices,
            ids,
            active,
            count: instances.count() as u32,
            id: (!fragment.id.is_empty()).then(|| fragment.id.clone()),
            capacity: capacity as u32,
        }
    }
}

impl Record for FragmentRecord {
    const SCHEMA: &'static [FieldDef] = FRAGMENT_FIELDS;

    fn to_fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::f32s(&self.position),
            FieldValue::f32s(&self.normal),
            FieldValue::u32s(&self.index),
            FieldValue::u32s(&self.block_id),
            FieldValue::u32s(&self.groups),
            FieldValue::f32s(&self.materials),
            FieldValue::f32s(&self.matrices),
            FieldValue::u32s(&self.ids.values),
            FieldValue::u32s(&self.ids.indices),
            FieldValue::u32s(&self.active),
            FieldValue::U32(self.count),
            FieldValue::string(self.id.as_deref()),
            FieldValue::U32(self.capacity),
        ]
    }

    fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
        let mut f = FieldCursor::new(fields);
        let record = Self {
            position: f.f32s(),
            normal: f.f32s(),
            index: f.u32s(),
            block_id: f.u32s(),
            groups: f.u32s(),
            materials: f.f32s(),
            matrices: f.f32s(),
            ids: CsrIndex {
                values: f.u32s(),
                indices: f.u32s(),
            },
            active: f.u32s(),
            count: f.u32(),
            id: f.string(),
            capacity: f.u32(),
        };
        record.validate()?;
        Ok(record)
    }
}

impl Fragment {
    pub fn to_record(&self) -> FragmentRecord {
        FragmentRecord::from(self)
    }

    pub fn from_record(record: &FragmentRecord) -> Result<Self> {
        record.to_fragment()
    }
}

/**
 * A whole model as persisted: its fragments plus the metadata tying them to
 * the external data model.
 *
 * `keys` and `rels` map item indices to external keys and relationships.
 * `opaque_geometries_ids` and `transparent_geometries_ids` partition the item
 * indices by render pass and never overlap.
 */
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FragmentsGroup {
    pub items: Vec<FragmentRecord>,
    pub civil: Vec<Alignment>,
    pub coordination_matrix: Vec<f32>,
    pub ids: Vec<u32>,
    pub keys: CsrIndex,
    pub rels: CsrIndex,
    pub fragment_keys: Option<String>,
    pub id: Option<String>,
    pub name: Option<String>,
    pub ifc_name: Option<String>,
    pub ifc_description: Option<String>,
    pub ifc_schema: Option<String>,
    pub max_express_id: u32,
    pub bounding_box: Vec<f32>,
    pub opaque_geometries_ids: Vec<i32>,
    pub transparent_geometries_ids: Vec<i32>,
}

const GROUP_FIELDS: &[FieldDef] = &[
    FieldDef::new("items", FieldKind::Tables(FRAGMENT_FIELDS)),
    FieldDef::new("civil", FieldKind::Tables(ALIGNMENT_FIELDS)),
    FieldDef::new("coordination_matrix", FieldKind::F32s),
    FieldDef::new("ids", FieldKind::U32s),
    FieldDef::new("items_keys", FieldKind::U32s),
    FieldDef::new("items_keys_indices", FieldKind::U32s),
    FieldDef::new("items_rels", FieldKind::U32s),
    FieldDef::new("items_rels_indices", FieldKind::U32s),
    FieldDef::new("fragment_keys", FieldKind::Str),
    FieldDef::new("id", FieldKind::Str),
    FieldDef::new("name", FieldKind::Str),
    FieldDef::new("ifc_name", FieldKind::Str),
    FieldDef::new("ifc_description", FieldKind::Str),
    FieldDef::new("ifc_schema", FieldKind::Str),
    FieldDef::new("max_express_id", FieldKind::U32),
    FieldDef::new("bounding_box", FieldKind::F32s),
    FieldDef::new("opaque_geometries_ids", FieldKind::I32s),
    FieldDef::new("transparent_geometries_ids", FieldKind::I32s),
];

impl FragmentsGroup {
    /// Describe `fragments` as a group.
    ///
    /// Items without an occupied slot belong to neither render pass.
    pub fn from_fragments(fragments: &[Fragment]) -> Self {
        let mut group = Self::default();
        let mut all_ids = BTreeSet::new();
        let mut bounds: Option<Aabb> = None;

        for (item, fragment) in fragments.iter().enumerate() {
            let item_ids: BTreeSet<u32> = fragment
                .instances()
                .iter_active()
                .flat_map(|(_, _, ids)| ids.iter().copied())
                .collect();
            let row: Vec<u32> = item_ids.iter().copied().collect();
            group.keys.push_row(&row);
            group.rels.push_row(&[]);
            all_ids.extend(item_ids);

            if let Some(item_bounds) = fragment.bounding_box() {
                bounds = Some(match bounds {
                    Some(b) => b.union(item_bounds),
                    None => item_bounds,
                });
            }

            if fragment.instances().active_count() == 0 {
                continue;
            }
            if fragment.has_transparency() {
                group.transparent_geometries_ids.push(item as i32);
            } else {
                group.opaque_geometries_ids.push(item as i32);
            }
        }

        group.items = fragments.iter().map(FragmentRecord::from).collect();
        group.max_express_id = all_ids.last().copied().unwrap_or(0);
        group.ids = all_ids.into_iter().collect();
        group.bounding_box = bounds.map(|b| b.to_array().to_vec()).unwrap_or_default();
        group
    }

    /// Rebuild every item as a live fragment.
    pub fn to_fragments(&self) -> Result<Vec<Fragment>> {
        self.items.iter().map(FragmentRecord::to_fragment).collect()
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_slice(&self.bounding_box)
    }

    /// Item indices drawn by the opaque pass followed by the transparent pass.
    ///
    /// Ids outside `0..items.len()` are skipped; [`FragmentsGroup::validate`]
    /// rejects them on decode.
    pub fn render_order(&self) -> impl Iterator<Item = usize> + '_ {
        self.opaque_geometries_ids
            .iter()
            .chain(&self.transparent_geometries_ids)
            .filter_map(|&item| usize::try_from(item).ok())
            .filter(|&item| item < self.items.len())
    }

    pub fn validate(&self) -> Result<()> {
        self.keys.validate("items_keys_indices")?;
        self.rels.validate("items_rels_indices")?;
        let items = self.items.len();
        if let Some(&item) = self
            .opaque_geometries_ids
            .iter()
            .chain(&self.transparent_geometries_ids)
            .find(|&&item| !usize::try_from(item).is_ok_and(|i| i < items))
        {
            return Err(FragmentError::InvalidRecord(format!(
                "render pass names item {} of {}",
                item, items
            )));
        }
        let opaque: BTreeSet<i32> = self.opaque_geometries_ids.iter().copied().collect();
        if let Some(&item) = self
            .transparent_geometries_ids
            .iter()
            .find(|item| opaque.contains(item))
        {
            return Err(FragmentError::OverlappingPartition { item });
        }
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        super::encode(self)
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        super::decode(buf)
    }
}

impl Record for FragmentsGroup {
    const SCHEMA: &'static [FieldDef] = GROUP_FIELDS;

    fn to_fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::tables(self.items.iter().map(FragmentRecord::to_fields).collect()),
            FieldValue::tables(self.civil.iter().map(Alignment::to_fields).collect()),
            FieldValue::f32s(&self.coordination_matrix),
            FieldValue::u32s(&self.ids),
            FieldValue::u32s(&self.keys.values),
            FieldValue::u32s(&self.keys.indices),
            FieldValue::u32s(&self.rels.values),
            FieldValue::u32s(&self.rels.indices),
            FieldValue::string(self.fragment_keys.as_deref()),
            FieldValue::string(self.id.as_deref()),
            FieldValue::string(self.name.as_deref()),
            FieldValue::string(self.ifc_name.as_deref()),
            FieldValue::string(self.ifc_description.as_deref()),
            FieldValue::string(self.ifc_schema.as_deref()),
            FieldValue::U32(self.max_express_id),
            FieldValue::f32s(&self.bounding_box),
            FieldValue::i32s(&self.opaque_geometries_ids),
            FieldValue::i32s(&self.transparent_geometries_ids),
        ]
    }

    fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
        let mut f = FieldCursor::new(fields);
        let items = f
            .tables()
            .into_iter()
            .map(FragmentRecord::from_fields)
            .collect::<Result<Vec<_>>>()?;
        let civil = f
            .tables()
            .into_iter()
            .map(Alignment::from_fields)
            .collect::<Result<Vec<_>>>()?;
        let group = Self {
            items,
            civil,
            coordination_matrix: f.f32s(),
            ids: f.u32s(),
            keys: CsrIndex {
                values: f.u32s(),
                indices: f.u32s(),
            },
            rels: CsrIndex {
                values: f.u32s(),
                indices: f.u32s(),
            },
            fragment_keys: f.string(),
            id: f.string(),
            name: f.string(),
            ifc_name: f.string(),
            ifc_description: f.string(),
            ifc_schema: f.string(),
            max_express_id: f.u32(),
            bounding_box: f.f32s(),
            opaque_geometries_ids: f.i32s(),
            transparent_geometries_ids: f.i32s(),
        };
        group.validate()?;
        Ok(group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csr_rows() {
        let csr = CsrIndex::from_rows([&[1, 2][..], &[][..], &[3][..]]);
        assert_eq!(csr.indices, vec![0, 2, 2, 3]);
        assert_eq!(csr.rows(), 3);
        assert_eq!(csr.row(1), Some(&[][..]));
        assert_eq!(csr.row(2), Some(&[3][..]));
        assert_eq!(csr.row(3), None);
        assert!(csr.validate("test").is_ok());
    }

    #[test]
    fn csr_rejects_decreasing_offsets() {
        let csr = CsrIndex {
            values: vec![1, 2, 3],
            indices: vec![0, 2, 1, 3],
        };
        assert_eq!(
            csr.validate("test"),
            Err(FragmentError::InvalidIndex { field: "test" })
        );
    }

    #[test]
    fn csr_rejects_wrong_closing_offset() {
        let csr = CsrIndex {
            values: vec![1, 2, 3],
            indices: vec![0, 2],
        };
        assert!(csr.validate("test").is_err());
        let dangling = CsrIndex {
            values: vec![1],
            indices: Vec::new(),
        };
        assert!(dangling.validate("test").is_err());
    }
}
