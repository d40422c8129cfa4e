//! Raw geometry records fetched independently of their group.

use crate::{
    data_structures::geometry::{self, MergedGeometry, SourceMesh},
    error::{FragmentError, Result},
    schema::{
        Record,
        table::{FieldCursor, FieldDef, FieldKind, FieldValue},
    },
};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamedGeometry {
    pub id: Option<String>,
    pub position: Vec<f32>,
    pub normal: Vec<f32>,
    pub index: Vec<u32>,
}

const STREAMED_FIELDS: &[FieldDef] = &[
    FieldDef::new("id", FieldKind::Str),
    FieldDef::new("position", FieldKind::F32s),
    FieldDef::new("normal", FieldKind::F32s),
    FieldDef::new("index", FieldKind::U32s),
];

impl StreamedGeometry {
    /// Flatten `geometry` for streaming. Block ids and groups are not kept.
    pub fn from_geometry(id: &str, geometry: &MergedGeometry) -> Self {
        Self {
            id: Some(id.to_string()),
            position: geometry.positions().iter().flatten().copied().collect(),
            normal: geometry.normals().iter().flatten().copied().collect(),
            index: geometry.indices().to_vec(),
        }
    }

    /// A single part ready for [`geometry::merge`]. Missing normals are
    /// computed while merging.
    pub fn to_source_mesh(&self) -> Result<SourceMesh> {
        if self.position.len() % 3 != 0 || self.normal.len() % 3 != 0 {
            return Err(FragmentError::InvalidRecord(format!(
                "streamed geometry {:?} has {} position and {} normal components",
                self.id,
                self.position.len(),
                self.normal.len()
            )));
        }
        let triples = |values: &[f32]| -> Vec<[f32; 3]> {
            values.chunks_exact(3).map(|c| [c[0], c[1], c[2]]).collect()
        };
        let name = self.id.as_deref().unwrap_or("streamed");
        Ok(SourceMesh::new(name, triples(&self.position), self.index.clone())
            .with_normals(triples(&self.normal)))
    }
}

impl MergedGeometry {
    /// Geometry with one group covering every index, drawn with material 0.
    pub fn from_streamed(streamed: &StreamedGeometry) -> Result<Self> {
        let (geometry, _) = geometry::merge(vec![streamed.to_source_mesh()?])?;
        Ok(geometry)
    }
}

impl Record for StreamedGeometry {
    const SCHEMA: &'static [FieldDef] = STREAMED_FIELDS;

    fn to_fields(&self) -> Vec<FieldValue> {
        vec![
            FieldValue::string(self.id.as_deref()),
            FieldValue::f32s(&self.position),
            FieldValue::f32s(&self.normal),
            FieldValue::u32s(&self.index),
        ]
    }

    fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
        let mut f = FieldCursor::new(fields);
        Ok(Self {
            id: f.string(),
            position: f.f32s(),
            normal: f.f32s(),
            index: f.u32s(),
        })
    }
}

/// A batch of streamed geometries in one buffer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StreamedGeometries {
    pub geometries: Vec<StreamedGeometry>,
}

impl StreamedGeometries {
    pub fn find(&self, id: &str) -> Option<&StreamedGeometry> {
        self.geometries.iter().find(|g| g.id.as_deref() == Some(id))
    }
}

const STREAMED_BATCH_FIELDS: &[FieldDef] =
    &[FieldDef::new("geometries", FieldKind::Tables(STREAMED_FIELDS))];

impl Record for StreamedGeometries {
    const SCHEMA: &'static [FieldDef] = STREAMED_BATCH_FIELDS;

    fn to_fields(&self) -> Vec<FieldValue> {
        vec![FieldValue::tables(
            self.geometries.iter().map(StreamedGeometry::to_fields).collect(),
        )]
    }

    fn from_fields(fields: Vec<FieldValue>) -> Result<Self> {
        let mut f = FieldCursor::new(fields);
        let geometries = f
            .tables()
            .into_iter()
            .map(StreamedGeometry::from_fields)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { geometries })
    }
}
