//! Source meshes and the merged geometry built from them.
//!
//! A model is authored as many independent parts. [`merge`] folds them into a
//! single vertex/index buffer so that a whole fragment renders with one
//! instanced draw per material group. Every vertex keeps the index of the part
//! it came from (its block id), which is what picking reads back later.

use std::ops::Range;

use cgmath::{InnerSpace, Matrix4, Point3, Transform, Vector3};
use instant::Instant;

use crate::error::{FragmentError, Result};

/// Material as delivered by the loader, before it gets reduced for instancing.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceMaterial {
    pub name: String,
    pub base_color: [f32; 4],
    pub transparent: bool,
}

impl Default for SourceMaterial {
    fn default() -> Self {
        Self {
            name: String::from("default"),
            base_color: [1.0, 1.0, 1.0, 1.0],
            transparent: false,
        }
    }
}

/// Lighting-only material used by fragments.
///
/// Textures and PBR parameters are dropped on purpose: every instance of a
/// fragment shares one material per group, so only the flat colour survives.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Material {
    pub color: [f32; 3],
    pub transparent: bool,
    pub opacity: f32,
    pub depth_test: bool,
}

impl Material {
    pub fn new(color: [f32; 3], transparent: bool, opacity: f32) -> Self {
        Self {
            color,
            transparent,
            opacity,
            depth_test: true,
        }
    }

    /// Default selection overlay: plain red drawn on top of everything.
    pub fn highlight() -> Self {
        Self {
            color: [1.0, 0.0, 0.0],
            transparent: false,
            opacity: 1.0,
            depth_test: false,
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::new([1.0, 1.0, 1.0], false, 1.0)
    }
}

impl From<&SourceMaterial> for Material {
    fn from(source: &SourceMaterial) -> Self {
        let [r, g, b, a] = source.base_color;
        Material::new([r, g, b], source.transparent, a)
    }
}

/// One part's triangulated geometry.
///
/// `normals` may be empty, in which case smooth normals are computed while
/// merging. `indices` is optional only because loaders can hand out
/// non-indexed geometry; merging rejects such meshes.
#[derive(Clone, Debug, Default)]
pub struct SourceMesh {
    pub name: String,
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub indices: Option<Vec<u32>>,
    pub material: SourceMaterial,
}

impl SourceMesh {
    pub fn new(name: &str, positions: Vec<[f32; 3]>, indices: Vec<u32>) -> Self {
        Self {
            name: name.to_string(),
            positions,
            normals: Vec::new(),
            indices: Some(indices),
            material: SourceMaterial::default(),
        }
    }

    pub fn with_normals(mut self, normals: Vec<[f32; 3]>) -> Self {
        self.normals = normals;
        self
    }

    pub fn with_material(mut self, material: SourceMaterial) -> Self {
        self.material = material;
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    fn validate(&self, index: usize) -> Result<()> {
        let indices = self
            .indices
            .as_ref()
            .ok_or_else(|| FragmentError::MissingIndexBuffer {
                index,
                name: self.name.clone(),
            })?;
        if let Some(&vertex) = indices
            .iter()
            .find(|&&v| v as usize >= self.positions.len())
        {
            return Err(FragmentError::InvalidSourceIndex {
                index,
                name: self.name.clone(),
                vertex,
                vertex_count: self.positions.len(),
            });
        }
        Ok(())
    }
}

/// A contiguous index range drawn with a single material.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Group {
    pub start: u32,
    pub count: u32,
    pub material_index: u32,
}

impl Group {
    pub fn range(&self) -> Range<u32> {
        self.start..self.start.saturating_add(self.count)
    }

    /// One past the last index, or `None` if it does not fit in a `u32`.
    pub fn end(&self) -> Option<u32> {
        self.start.checked_add(self.count)
    }
}

/// Per-vertex block ids, stored as narrow as the part count allows.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BlockIds {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl BlockIds {
    /// Empty storage wide enough to tag `part_count` parts.
    pub fn for_parts(part_count: usize, vertex_capacity: usize) -> Self {
        if part_count <= u8::MAX as usize {
            BlockIds::U8(Vec::with_capacity(vertex_capacity))
        } else if part_count <= u16::MAX as usize {
            BlockIds::U16(Vec::with_capacity(vertex_capacity))
        } else {
            BlockIds::U32(Vec::with_capacity(vertex_capacity))
        }
    }

    /// Rebuild from widened ids, narrowing again according to `part_count`.
    pub fn from_u32(part_count: usize, ids: &[u32]) -> Self {
        let mut block_ids = Self::for_parts(part_count, ids.len());
        for &id in ids {
            block_ids.push_run(id, 1);
        }
        block_ids
    }

    fn push_run(&mut self, id: u32, vertices: usize) {
        match self {
            BlockIds::U8(ids) => ids.extend(std::iter::repeat_n(id as u8, vertices)),
            BlockIds::U16(ids) => ids.extend(std::iter::repeat_n(id as u16, vertices)),
            BlockIds::U32(ids) => ids.extend(std::iter::repeat_n(id, vertices)),
        }
    }

    pub fn get(&self, vertex: usize) -> Option<u32> {
        match self {
            BlockIds::U8(ids) => ids.get(vertex).map(|&id| u32::from(id)),
            BlockIds::U16(ids) => ids.get(vertex).map(|&id| u32::from(id)),
            BlockIds::U32(ids) => ids.get(vertex).copied(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            BlockIds::U8(ids) => ids.len(),
            BlockIds::U16(ids) => ids.len(),
            BlockIds::U32(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_per_vertex(&self) -> usize {
        match self {
            BlockIds::U8(_) => 1,
            BlockIds::U16(_) => 2,
            BlockIds::U32(_) => 4,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.len()).filter_map(|vertex| self.get(vertex))
    }

    pub fn to_u32_vec(&self) -> Vec<u32> {
        self.iter().collect()
    }
}

/// Axis aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    pub min: Point3<f32>,
    pub max: Point3<f32>,
}

impl Aabb {
    pub fn from_points<I: IntoIterator<Item = Point3<f32>>>(points: I) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        Some(points.fold(
            Aabb {
                min: first,
                max: first,
            },
            |aabb, p| aabb.including(p),
        ))
    }

    fn including(self, p: Point3<f32>) -> Self {
        Aabb {
            min: Point3::new(self.min.x.min(p.x), self.min.y.min(p.y), self.min.z.min(p.z)),
            max: Point3::new(self.max.x.max(p.x), self.max.y.max(p.y), self.max.z.max(p.z)),
        }
    }

    pub fn union(self, other: Aabb) -> Self {
        self.including(other.min).including(other.max)
    }

    pub fn corners(&self) -> [Point3<f32>; 8] {
        let (a, b) = (self.min, self.max);
        [
            Point3::new(a.x, a.y, a.z),
            Point3::new(b.x, a.y, a.z),
            Point3::new(a.x, b.y, a.z),
            Point3::new(b.x, b.y, a.z),
            Point3::new(a.x, a.y, b.z),
            Point3::new(b.x, a.y, b.z),
            Point3::new(a.x, b.y, b.z),
            Point3::new(b.x, b.y, b.z),
        ]
    }

    /// Box enclosing this box after `transform`.
    pub fn transformed(&self, transform: &Matrix4<f32>) -> Self {
        let corners = self.corners().map(|c| transform.transform_point(c));
        // eight corners, never empty
        Aabb::from_points(corners).unwrap_or(*self)
    }

    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && self.min.y <= other.min.y
            && self.min.z <= other.min.z
            && self.max.x >= other.max.x
            && self.max.y >= other.max.y
            && self.max.z >= other.max.z
    }

    /// `[min_x, min_y, min_z, max_x, max_y, max_z]`
    pub fn to_array(&self) -> [f32; 6] {
        [
            self.min.x, self.min.y, self.min.z, self.max.x, self.max.y, self.max.z,
        ]
    }

    pub fn from_slice(values: &[f32]) -> Option<Self> {
        match values {
            [min_x, min_y, min_z, max_x, max_y, max_z] => Some(Aabb {
                min: Point3::new(*min_x, *min_y, *min_z),
                max: Point3::new(*max_x, *max_y, *max_z),
            }),
            _ => None,
        }
    }
}

/// The merged, immutable geometry of a fragment.
#[derive(Clone, Debug, PartialEq)]
pub struct MergedGeometry {
    positions: Vec<[f32; 3]>,
    normals: Vec<[f32; 3]>,
    indices: Vec<u32>,
    block_ids: BlockIds,
    groups: Vec<Group>,
}

impl MergedGeometry {
    /// Assemble geometry from already merged buffers, e.g. a decoded record.
    pub fn from_parts(
        positions: Vec<[f32; 3]>,
        normals: Vec<[f32; 3]>,
        indices: Vec<u32>,
        block_ids: BlockIds,
        groups: Vec<Group>,
    ) -> Result<Self> {
        let vertices = positions.len();
        if normals.len() != vertices || block_ids.len() != vertices {
            return Err(FragmentError::InvalidRecord(format!(
                "{} positions, {} normals and {} block ids do not line up",
                vertices,
                normals.len(),
                block_ids.len()
            )));
        }
        if indices.iter().any(|&i| i as usize >= vertices) {
            return Err(FragmentError::InvalidRecord(String::from(
                "index buffer points past the vertex buffer",
            )));
        }
        if let Some(group) = groups
            .iter()
            .find(|g| g.end().is_none_or(|end| end as usize > indices.len()))
        {
            return Err(FragmentError::InvalidRecord(format!(
                "group {:?} exceeds {} indices",
                group,
                indices.len()
            )));
        }
        if block_ids.iter().any(|id| id as usize >= groups.len()) {
            return Err(FragmentError::InvalidRecord(String::from(
                "block id without a matching group",
            )));
        }
        Ok(Self {
            positions,
            normals,
            indices,
            block_ids,
            groups,
        })
    }

    pub fn positions(&self) -> &[[f32; 3]] {
        &self.positions
    }

    pub fn normals(&self) -> &[[f32; 3]] {
        &self.normals
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn block_ids(&self) -> &BlockIds {
        &self.block_ids
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn triangle(&self, triangle: usize) -> Option<[u32; 3]> {
        let start = triangle.checked_mul(3)?;
        match self.indices.get(start..start + 3) {
            Some(&[a, b, c]) => Some([a, b, c]),
            _ => None,
        }
    }

    /// Block id of a triangle, read from its first vertex.
    ///
    /// All three vertices of a triangle come from the same part, so one lookup
    /// suffices.
    pub fn triangle_block_id(&self, triangle: usize) -> Option<u32> {
        let [first, _, _] = self.triangle(triangle)?;
        self.block_ids.get(first as usize)
    }

    pub fn bounds(&self) -> Option<Aabb> {
        Aabb::from_points(self.positions.iter().map(|&p| Point3::from(p)))
    }
}

/// Merge part geometries into one buffer and reduce their materials.
///
/// The meshes are consumed: each one is dropped as soon as it has been copied
/// so peak memory stays close to the size of the merged result.
pub fn merge(meshes: Vec<SourceMesh>) -> Result<(MergedGeometry, Vec<Material>)> {
    if meshes.is_empty() {
        return Err(FragmentError::EmptyMergeInput);
    }
    for (index, mesh) in meshes.iter().enumerate() {
        mesh.validate(index)?;
    }

    let timer = Instant::now();
    let part_count = meshes.len();
    let vertex_total: usize = meshes.iter().map(SourceMesh::vertex_count).sum();
    let index_total: usize = meshes
        .iter()
        .map(|m| m.indices.as_ref().map_or(0, Vec::len))
        .sum();

    let mut positions = Vec::with_capacity(vertex_total);
    let mut normals = Vec::with_capacity(vertex_total);
    let mut indices = Vec::with_capacity(index_total);
    let mut block_ids = BlockIds::for_parts(part_count, vertex_total);
    let mut groups = Vec::with_capacity(part_count);
    let mut materials = Vec::with_capacity(part_count);

    for (block, mesh) in meshes.into_iter().enumerate() {
        let SourceMesh {
            name,
            positions: part_positions,
            normals: part_normals,
            indices: part_indices,
            material,
        } = mesh;
        // validated above
        let part_indices = part_indices.unwrap_or_default();
        let base_vertex = positions.len() as u32;
        let start = indices.len() as u32;

        let part_normals = if part_normals.len() == part_positions.len() {
            part_normals
        } else {
            log::warn!(
                "Source mesh '{}' has {} normals for {} vertices; computing smooth normals instead.",
                name,
                part_normals.len(),
                part_positions.len()
            );
            compute_normals(&part_positions, &part_indices)
        };

        block_ids.push_run(block as u32, part_positions.len());
        positions.extend_from_slice(&part_positions);
        normals.extend_from_slice(&part_normals);
        indices.extend(part_indices.iter().map(|i| i + base_vertex));
        groups.push(Group {
            start,
            count: part_indices.len() as u32,
            material_index: block as u32,
        });
        materials.push(Material::from(&material));
    }

    log::debug!(
        "Merged {} parts into {} vertices and {} indices ({} byte block ids) in {:?}",
        part_count,
        positions.len(),
        indices.len(),
        block_ids.bytes_per_vertex(),
        timer.elapsed()
    );

    let geometry = MergedGeometry {
        positions,
        normals,
        indices,
        block_ids,
        groups,
    };
    Ok((geometry, materials))
}

/// Smooth vertex normals: face normals accumulated per vertex, then averaged.
pub fn compute_normals(positions: &[[f32; 3]], indices: &[u32]) -> Vec<[f32; 3]> {
    let mut sums = vec![Vector3::new(0.0f32, 0.0, 0.0); positions.len()];
    for c in indices.chunks_exact(3) {
        let corner = |i: u32| positions.get(i as usize).copied().map(Point3::from);
        let (Some(p0), Some(p1), Some(p2)) = (corner(c[0]), corner(c[1]), corner(c[2])) else {
            continue;
        };
        // Unnormalized so larger faces weigh more
        let face = (p1 - p0).cross(p2 - p0);
        sums[c[0] as usize] += face;
        sums[c[1] as usize] += face;
        sums[c[2] as usize] += face;
    }
    sums.into_iter()
        .map(|n| {
            if n.magnitude2() > 0.0 {
                n.normalize().into()
            } else {
                [0.0, 0.0, 0.0]
            }
        })
        .collect()
}
