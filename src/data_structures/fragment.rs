//! Fragments: merged geometry drawn through a fixed-capacity instance table.

use cgmath::Matrix4;

use crate::{
    data_structures::{
        geometry::{self, Aabb, Material, MergedGeometry, SourceMesh},
        instance::{InstanceData, InstanceTable},
        selection::Selection,
    },
    error::{FragmentError, Result},
    pick::Hit,
};

/**
 * A `Fragment` renders many placements of a set of merged parts with one
 * instanced draw per material group.
 *
 * The capacity of the instance table is chosen at construction and never
 * grows. The selection overlay is created on the first pick event and dropped
 * together with the fragment.
 */
#[derive(Clone, Debug)]
pub struct Fragment {
    pub id: String,
    geometry: MergedGeometry,
    materials: Vec<Material>,
    instances: InstanceTable,
    selection: Option<Selection>,
    selection_material: Material,
}

impl Fragment {
    /// Merge `meshes` and wrap the result with room for `capacity` instances.
    pub fn new(id: &str, meshes: Vec<SourceMesh>, capacity: usize) -> Result<Self> {
        let (geometry, materials) = geometry::merge(meshes)?;
        Self::from_merged(id, geometry, materials, capacity)
    }

    pub fn from_merged(
        id: &str,
        geometry: MergedGeometry,
        materials: Vec<Material>,
        capacity: usize,
    ) -> Result<Self> {
        Self::with_instances(id, geometry, materials, InstanceTable::new(capacity))
    }

    pub(crate) fn with_instances(
        id: &str,
        geometry: MergedGeometry,
        materials: Vec<Material>,
        instances: InstanceTable,
    ) -> Result<Self> {
        if let Some(group) = geometry
            .groups()
            .iter()
            .find(|g| g.material_index as usize >= materials.len())
        {
            return Err(FragmentError::InvalidRecord(format!(
                "group {:?} refers to a missing material ({} available)",
                group,
                materials.len()
            )));
        }
        Ok(Self {
            id: id.to_string(),
            geometry,
            materials,
            instances,
            selection: None,
            selection_material: Material::highlight(),
        })
    }

    pub fn with_selection_material(mut self, material: Material) -> Self {
        self.selection_material = material;
        if let Some(selection) = self.selection.as_mut() {
            selection.set_material(material);
        }
        self
    }

    pub fn geometry(&self) -> &MergedGeometry {
        &self.geometry
    }

    pub fn materials(&self) -> &[Material] {
        &self.materials
    }

    pub fn instances(&self) -> &InstanceTable {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut InstanceTable {
        &mut self.instances
    }

    pub fn capacity(&self) -> usize {
        self.instances.capacity()
    }

    pub fn set_instance(&mut self, slot: usize, data: InstanceData) -> Result<()> {
        self.instances.set_instance(slot, data)
    }

    pub fn get_instance(&self, slot: usize) -> Result<Matrix4<f32>> {
        self.instances.get_instance(slot)
    }

    pub fn add_instances(&mut self, instances: &[(u32, Matrix4<f32>)]) -> Result<Vec<usize>> {
        self.instances.add_instances(instances)
    }

    pub fn remove_instances(&mut self, ids: &[u32]) -> Result<Vec<usize>> {
        self.instances.remove_instances(ids)
    }

    /// Block id of the part a hit landed on.
    ///
    /// `None` if the triangle does not exist or its block has no group.
    pub fn block_id(&self, hit: &Hit) -> Option<u32> {
        self.geometry
            .triangle_block_id(hit.triangle_index)
            .filter(|&block| (block as usize) < self.geometry.groups().len())
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// The selection overlay if a pick already created it.
    pub fn existing_selection_mut(&mut self) -> Option<&mut Selection> {
        self.selection.as_mut()
    }

    /// The selection overlay, created on first use.
    pub fn selection_mut(&mut self) -> &mut Selection {
        let material = self.selection_material;
        self.selection
            .get_or_insert_with(|| Selection::new(material))
    }

    /// React to a pick event.
    ///
    /// A hit mirrors the hit instance in the overlay and selects its block
    /// exclusively. A miss only hides the overlay.
    pub fn on_pick(&mut self, hit: Option<&Hit>) -> Result<Option<u32>> {
        let Some(hit) = hit else {
            self.selection_mut().hide();
            return Ok(None);
        };
        let transform = self.instances.get_instance(hit.instance_index)?;
        let block = self.block_id(hit);
        self.selection_mut().show(transform)?;
        if let Some(block) = block {
            self.selection_mut().add_blocks(&[block], true);
            log::info!(
                "Selected block {} of instance {} in fragment '{}'",
                block,
                hit.instance_index,
                self.id
            );
        }
        Ok(block)
    }

    /// Clear the selected blocks and hide the overlay.
    pub fn reset_selection(&mut self) {
        if let Some(selection) = self.selection.as_mut() {
            selection.reset();
        }
    }

    /// Extent of the geometry over every occupied slot.
    pub fn bounding_box(&self) -> Option<Aabb> {
        let local = self.geometry.bounds()?;
        self.instances
            .iter_active()
            .map(|(_, transform, _)| local.transformed(transform))
            .reduce(Aabb::union)
    }

    pub fn has_transparency(&self) -> bool {
        self.materials.iter().any(|m| m.transparent)
    }
}
