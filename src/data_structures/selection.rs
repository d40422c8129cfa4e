//! Highlight overlay for picked instances.

use std::collections::BTreeSet;
use std::ops::Range;

use cgmath::Matrix4;

use crate::{
    data_structures::{
        geometry::{Material, MergedGeometry},
        instance::{InstanceData, InstanceTable},
    },
    error::Result,
};

/// Set of selected block ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BlockSet {
    ids: BTreeSet<u32>,
}

impl BlockSet {
    /// `exclusive` replaces the current selection, otherwise `ids` are added to it.
    pub fn add(&mut self, ids: &[u32], exclusive: bool) {
        if exclusive {
            self.ids.clear();
        }
        self.ids.extend(ids.iter().copied());
    }

    pub fn reset(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }
}

/**
 * A `Selection` is the overlay a fragment draws on top of a picked instance.
 *
 * It renders the parent's geometry a second time with a single instance slot
 * and a highlight material. It never points back at its fragment: the parent
 * hands in the transform to mirror whenever a pick happens.
 */
#[derive(Clone, Debug)]
pub struct Selection {
    instances: InstanceTable,
    blocks: BlockSet,
    material: Material,
}

impl Selection {
    pub fn new(material: Material) -> Self {
        Self {
            instances: InstanceTable::new(1),
            blocks: BlockSet::default(),
            material,
        }
    }

    /// Mirror `transform` in the overlay slot and make the overlay visible.
    pub fn show(&mut self, transform: Matrix4<f32>) -> Result<()> {
        self.instances
            .set_instance(0, InstanceData::new(Vec::new(), transform))?;
        self.instances.set_count(1);
        Ok(())
    }

    /// Hide the overlay but keep the mirrored transform and the block set.
    pub fn hide(&mut self) {
        self.instances.set_count(0);
    }

    pub fn is_visible(&self) -> bool {
        self.instances.count() > 0
    }

    pub fn add_blocks(&mut self, ids: &[u32], exclusive: bool) {
        self.blocks.add(ids, exclusive);
    }

    /// Clear the selected blocks and hide the overlay.
    pub fn reset(&mut self) {
        self.blocks.reset();
        self.hide();
    }

    pub fn blocks(&self) -> &BlockSet {
        &self.blocks
    }

    pub fn instances(&self) -> &InstanceTable {
        &self.instances
    }

    pub fn instances_mut(&mut self) -> &mut InstanceTable {
        &mut self.instances
    }

    pub fn material(&self) -> &Material {
        &self.material
    }

    pub fn set_material(&mut self, material: Material) {
        self.material = material;
    }

    /// Index ranges of the groups whose block is selected.
    pub fn highlight_ranges(&self, geometry: &MergedGeometry) -> Vec<Range<u32>> {
        self.blocks
            .iter()
            .filter_map(|block| geometry.groups().get(block as usize))
            .map(|group| group.range())
            .collect()
    }
}

impl Default for Selection {
    fn default() -> Self {
        Self::new(Material::highlight())
    }
}
