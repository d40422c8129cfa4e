//! Instance placement data for GPU rendering.
//!
//! A fragment draws the same merged geometry many times. Every copy lives in a
//! slot of a fixed-capacity [`InstanceTable`] that stores its transform and the
//! external identifiers of the building element it represents. The table is
//! packed into an instance buffer (see [`InstanceRaw`]) and re-uploaded when it
//! has been marked dirty.

use std::collections::{BTreeSet, HashMap};
use std::ops::Mul;

use cgmath::{Matrix, Matrix3, Matrix4, One, SquareMatrix, Zero};

use crate::error::{FragmentError, Result};

/// Position, rotation (as quaternion) and scale of one placement.
///
/// Convenience for building instance transforms; the table itself stores
/// plain matrices since persisted transforms can contain shear.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    pub position: cgmath::Vector3<f32>,
    pub rotation: cgmath::Quaternion<f32>,
    pub scale: cgmath::Vector3<f32>,
}

impl Placement {
    /// Identity placement (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: cgmath::Vector3::new(0.0, 0.0, 0.0),
            rotation: cgmath::Quaternion::one(),
            scale: cgmath::Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

impl<'a, 'b> Mul<&'b Placement> for &'a Placement {
    type Output = Placement;

    fn mul(self, rhs: &'b Placement) -> Self::Output {
        let scaled_rhs_pos = cgmath::Vector3::new(
            self.scale.x * rhs.position.x,
            self.scale.y * rhs.position.y,
            self.scale.z * rhs.position.z,
        );
        Placement {
            position: self.position + (self.rotation * scaled_rhs_pos),
            rotation: self.rotation * rhs.rotation,
            scale: cgmath::Vector3::new(
                self.scale.x * rhs.scale.x,
                self.scale.y * rhs.scale.y,
                self.scale.z * rhs.scale.z,
            ),
        }
    }
}

impl From<cgmath::Vector3<f32>> for Placement {
    fn from(position: cgmath::Vector3<f32>) -> Self {
        Placement {
            position,
            ..Default::default()
        }
    }
}

impl From<&Placement> for Matrix4<f32> {
    fn from(placement: &Placement) -> Self {
        placement.to_matrix()
    }
}

impl Default for Placement {
    fn default() -> Self {
        Self::new()
    }
}

/**
 * The raw instance is the actual data stored on the GPU: the model matrix and
 * the matrix used to bring normals into world space.
 */
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceRaw {
    pub model: [[f32; 4]; 4],
    pub normal: [[f32; 3]; 3],
}

impl InstanceRaw {
    /// A zero model matrix collapses every vertex to the origin, so unused
    /// slots inside the drawn range produce no fragments.
    pub fn hidden() -> Self {
        bytemuck::Zeroable::zeroed()
    }

    pub fn from_matrix(transform: &Matrix4<f32>) -> Self {
        InstanceRaw {
            model: (*transform).into(),
            normal: normal_matrix(transform).into(),
        }
    }
}

/// Matrix that carries normals through `transform`.
///
/// Inverse transpose of the linear part, so normals stay perpendicular under
/// non-uniform scale. Singular transforms fall back to the linear part.
pub fn normal_matrix(transform: &Matrix4<f32>) -> Matrix3<f32> {
    let linear = Matrix3::from_cols(
        transform.x.truncate(),
        transform.y.truncate(),
        transform.z.truncate(),
    );
    linear
        .invert()
        .map(|inverse| inverse.transpose())
        .unwrap_or(linear)
}

/// What gets written into one slot: a transform and the external identifiers
/// of the element placed there.
#[derive(Clone, Debug, PartialEq)]
pub struct InstanceData {
    pub ids: Vec<u32>,
    pub transform: Matrix4<f32>,
}

impl InstanceData {
    pub fn new(ids: Vec<u32>, transform: Matrix4<f32>) -> Self {
        Self { ids, transform }
    }
}

/// Fixed-capacity table of instance slots.
///
/// Slots keep their index for their whole life: freeing one never shifts the
/// others, so slot numbers held by the renderer or by selections stay valid.
/// `count` is the number of leading slots the renderer draws, which is not the
/// same thing as the number of occupied slots.
#[derive(Clone, Debug)]
pub struct InstanceTable {
    transforms: Vec<Matrix4<f32>>,
    ids: Vec<Vec<u32>>,
    active: Vec<bool>,
    slots_by_id: HashMap<u32, BTreeSet<usize>>,
    count: usize,
    dirty: bool,
}

impl InstanceTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            transforms: vec![Matrix4::zero(); capacity],
            ids: vec![Vec::new(); capacity],
            active: vec![false; capacity],
            slots_by_id: HashMap::new(),
            count: 0,
            dirty: true,
        }
    }

    pub fn capacity(&self) -> usize {
        self.active.len()
    }

    /// Number of occupied slots.
    pub fn active_count(&self) -> usize {
        self.active.iter().filter(|&&active| active).count()
    }

    pub fn is_active(&self, slot: usize) -> bool {
        self.active.get(slot).copied().unwrap_or(false)
    }

    /// Number of leading slots the renderer draws.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Override the drawn range, e.g. to hide everything without losing state.
    pub fn set_count(&mut self, count: usize) {
        let count = count.min(self.capacity());
        if count != self.count {
            self.count = count;
            self.dirty = true;
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Consume the dirty flag. The render side calls this once per frame.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    pub fn set_instance(&mut self, slot: usize, data: InstanceData) -> Result<()> {
        if slot >= self.capacity() {
            return Err(FragmentError::CapacityExceeded {
                requested: slot,
                capacity: self.capacity(),
            });
        }
        self.release_ids(slot);
        self.occupy(slot, data);
        self.refresh_count();
        Ok(())
    }

    pub fn get_instance(&self, slot: usize) -> Result<Matrix4<f32>> {
        if !self.is_active(slot) {
            return Err(FragmentError::InstanceNotFound { slot });
        }
        Ok(self.transforms[slot])
    }

    /// Identifiers stored in an active slot.
    pub fn ids(&self, slot: usize) -> Option<&[u32]> {
        if self.is_active(slot) {
            Some(&self.ids[slot])
        } else {
            None
        }
    }

    /// Slots currently tagged with `id`, in ascending order.
    pub fn slots_of(&self, id: u32) -> impl Iterator<Item = usize> + '_ {
        self.slots_by_id.get(&id).into_iter().flatten().copied()
    }

    /// Place one instance per `(id, transform)` pair in the lowest free slots.
    ///
    /// Fails without touching the table when there are fewer free slots than
    /// entries.
    pub fn add_instances(&mut self, instances: &[(u32, Matrix4<f32>)]) -> Result<Vec<usize>> {
        let free: Vec<usize> = self
            .active
            .iter()
            .enumerate()
            .filter(|(_, active)| !**active)
            .map(|(slot, _)| slot)
            .take(instances.len())
            .collect();
        if free.len() < instances.len() {
            return Err(FragmentError::CapacityExceeded {
                requested: self.active_count() + instances.len(),
                capacity: self.capacity(),
            });
        }
        for (&slot, (id, transform)) in free.iter().zip(instances) {
            self.occupy(slot, InstanceData::new(vec![*id], *transform));
        }
        self.refresh_count();
        Ok(free)
    }

    /// Free every slot tagged with one of `ids`.
    ///
    /// Fails without touching the table if any identifier is unknown.
    pub fn remove_instances(&mut self, ids: &[u32]) -> Result<Vec<usize>> {
        if let Some(&id) = ids.iter().find(|id| !self.slots_by_id.contains_key(id)) {
            return Err(FragmentError::UnknownIdentifier { id });
        }
        let slots: BTreeSet<usize> = ids.iter().flat_map(|&id| self.slots_of(id)).collect();
        for &slot in &slots {
            self.release_ids(slot);
            self.ids[slot].clear();
            self.transforms[slot] = Matrix4::zero();
            self.active[slot] = false;
        }
        self.dirty = true;
        self.refresh_count();
        Ok(slots.into_iter().collect())
    }

    /// Iterate `(slot, transform, ids)` over the occupied slots.
    pub fn iter_active(&self) -> impl Iterator<Item = (usize, &Matrix4<f32>, &[u32])> + '_ {
        self.active
            .iter()
            .enumerate()
            .filter(|(_, active)| **active)
            .map(|(slot, _)| (slot, &self.transforms[slot], self.ids[slot].as_slice()))
    }

    /// GPU layout of the drawn range `0..count`. Free slots are hidden.
    pub fn raw_instances(&self) -> Vec<InstanceRaw> {
        (0..self.count)
            .map(|slot| {
                if self.active[slot] {
                    InstanceRaw::from_matrix(&self.transforms[slot])
                } else {
                    InstanceRaw::hidden()
                }
            })
            .collect()
    }

    fn occupy(&mut self, slot: usize, data: InstanceData) {
        let InstanceData { mut ids, transform } = data;
        // identifier set, insertion order kept
        let mut seen = BTreeSet::new();
        ids.retain(|id| seen.insert(*id));
        for &id in &ids {
            self.slots_by_id.entry(id).or_default().insert(slot);
        }
        self.ids[slot] = ids;
        self.transforms[slot] = transform;
        self.active[slot] = true;
        self.dirty = true;
    }

    fn release_ids(&mut self, slot: usize) {
        for id in &self.ids[slot] {
            if let Some(slots) = self.slots_by_id.get_mut(id) {
                slots.remove(&slot);
                if slots.is_empty() {
                    self.slots_by_id.remove(id);
                }
            }
        }
    }

    fn refresh_count(&mut self) {
        self.count = self
            .active
            .iter()
            .rposition(|&active| active)
            .map_or(0, |slot| slot + 1);
    }

    /// Restore a table exactly, including a `count` that differs from the
    /// highest active slot. Used when loading persisted fragments.
    pub(crate) fn restore(
        capacity: usize,
        slots: impl IntoIterator<Item = (usize, InstanceData)>,
        count: usize,
    ) -> Result<Self> {
        let mut table = Self::new(capacity);
        for (slot, data) in slots {
            table.set_instance(slot, data)?;
        }
        table.count = count.min(capacity);
        table.dirty = true;
        Ok(table)
    }
}
