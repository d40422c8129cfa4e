//! GPU side of a fragment.
//!
//! [`FragmentBuffers`] owns the vertex, index and instance buffers of one
//! [`Fragment`] plus the one-slot instance buffer of its selection overlay.
//! Pipelines, bind groups and shaders belong to the application; this module
//! only describes the vertex layouts it expects (see [`Vertex`]).
//!
//! Per frame:
//! 1. [`FragmentBuffers::write_to_buffers`] re-uploads instances that changed
//! 2. [`FragmentBuffers::draw`] issues one indexed, instanced draw per group
//! 3. [`FragmentBuffers::draw_selection`] redraws the selected groups on top

use std::mem;

use wgpu::util::DeviceExt;

use crate::data_structures::{
    fragment::Fragment,
    geometry::{Material, MergedGeometry},
    instance::{InstanceRaw, InstanceTable},
};

pub trait Vertex {
    fn desc() -> wgpu::VertexBufferLayout<'static>;
}

/// Vertex as uploaded. Block ids are widened to `u32` regardless of how
/// narrow the CPU copy is.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FragmentVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub block_id: u32,
}

impl FragmentVertex {
    pub fn from_geometry(geometry: &MergedGeometry) -> Vec<FragmentVertex> {
        geometry
            .positions()
            .iter()
            .zip(geometry.normals())
            .zip(geometry.block_ids().iter())
            .map(|((&position, &normal), block_id)| FragmentVertex {
                position,
                normal,
                block_id,
            })
            .collect()
    }
}

impl Vertex for FragmentVertex {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<FragmentVertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 0,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    shader_location: 1,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 6]>() as wgpu::BufferAddress,
                    shader_location: 2,
                    format: wgpu::VertexFormat::Uint32,
                },
            ],
        }
    }
}

impl Vertex for InstanceRaw {
    fn desc() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: mem::size_of::<InstanceRaw>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                // model matrix, one vec4 per column
                wgpu::VertexAttribute {
                    offset: 0,
                    shader_location: 5,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 4]>() as wgpu::BufferAddress,
                    shader_location: 6,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 8]>() as wgpu::BufferAddress,
                    shader_location: 7,
                    format: wgpu::VertexFormat::Float32x4,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 12]>() as wgpu::BufferAddress,
                    shader_location: 8,
                    format: wgpu::VertexFormat::Float32x4,
                },
                // normal matrix
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 16]>() as wgpu::BufferAddress,
                    shader_location: 9,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 19]>() as wgpu::BufferAddress,
                    shader_location: 10,
                    format: wgpu::VertexFormat::Float32x3,
                },
                wgpu::VertexAttribute {
                    offset: mem::size_of::<[f32; 22]>() as wgpu::BufferAddress,
                    shader_location: 11,
                    format: wgpu::VertexFormat::Float32x3,
                },
            ],
        }
    }
}

/// Material as a uniform: rgba colour plus a depth test flag.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct MaterialRaw {
    pub color: [f32; 4],
    pub depth_test: u32,
    _padding: [u32; 3],
}

impl From<&Material> for MaterialRaw {
    fn from(material: &Material) -> Self {
        let [r, g, b] = material.color;
        Self {
            color: [r, g, b, material.opacity],
            depth_test: u32::from(material.depth_test),
            _padding: [0; 3],
        }
    }
}

fn instance_buffer(device: &wgpu::Device, label: &str, slots: usize) -> wgpu::Buffer {
    // wgpu rejects binding empty buffers, keep room for at least one slot
    let hidden = vec![InstanceRaw::hidden(); slots.max(1)];
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::cast_slice(&hidden),
        usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
    })
}

fn write_instances(queue: &wgpu::Queue, buffer: &wgpu::Buffer, table: &mut InstanceTable) {
    if !table.take_dirty() {
        return;
    }
    let raw_instances = table.raw_instances();
    if !raw_instances.is_empty() {
        queue.write_buffer(buffer, 0, bytemuck::cast_slice(&raw_instances));
    }
}

/**
 * GPU buffers of one fragment.
 *
 * Vertex and index buffers are immutable after creation. The instance buffer
 * is sized for the full capacity of the table, which never changes.
 */
pub struct FragmentBuffers {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub instance_buffer: wgpu::Buffer,
    pub selection_buffer: wgpu::Buffer,
    pub index_count: u32,
}

impl FragmentBuffers {
    pub fn new(device: &wgpu::Device, fragment: &Fragment) -> Self {
        let geometry = fragment.geometry();
        let vertices = FragmentVertex::from_geometry(geometry);
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Vertex Buffer", fragment.id)),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(&format!("{:?} Index Buffer", fragment.id)),
            contents: bytemuck::cast_slice(geometry.indices()),
            usage: wgpu::BufferUsages::INDEX,
        });
        Self {
            vertex_buffer,
            index_buffer,
            instance_buffer: instance_buffer(device, "Instance Buffer", fragment.capacity()),
            selection_buffer: instance_buffer(device, "Selection Instance Buffer", 1),
            index_count: geometry.indices().len() as u32,
        }
    }

    /// Upload the instance table and the selection overlay if they changed
    /// since the last call. `fragment` must be the one these buffers were
    /// created for.
    pub fn write_to_buffers(&self, queue: &wgpu::Queue, fragment: &mut Fragment) {
        debug_assert!(
            self.instance_buffer.size()
                >= (fragment.capacity().max(1) * mem::size_of::<InstanceRaw>()) as wgpu::BufferAddress,
            "instance buffer is smaller than fragment '{}'",
            fragment.id
        );
        write_instances(queue, &self.instance_buffer, fragment.instances_mut());
        if let Some(selection) = fragment.existing_selection_mut() {
            write_instances(queue, &self.selection_buffer, selection.instances_mut());
        }
    }

    /// One draw per group over the visible instances, calling `set_material`
    /// before each so the caller can bind the group's material.
    pub fn draw_with<F>(&self, render_pass: &mut wgpu::RenderPass<'_>, fragment: &Fragment, mut set_material: F)
    where
        F: FnMut(&mut wgpu::RenderPass<'_>, &Material),
    {
        let count = fragment.instances().count() as u32;
        if count == 0 || self.index_count == 0 {
            return;
        }
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.set_vertex_buffer(1, self.instance_buffer.slice(..));
        render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        for group in fragment.geometry().groups() {
            if group.count == 0 {
                continue;
            }
            if let Some(material) = fragment.materials().get(group.material_index as usize) {
                set_material(render_pass, material);
            }
            render_pass.draw_indexed(group.range(), 0, 0..count);
        }
    }

    pub fn draw(&self, render_pass: &mut wgpu::RenderPass<'_>, fragment: &Fragment) {
        self.draw_with(render_pass, fragment, |_, _| {});
    }

    /// Draw the selected groups of the mirrored instance.
    ///
    /// Nothing is drawn while the overlay is hidden or no block is selected.
    pub fn draw_selection(&self, render_pass: &mut wgpu::RenderPass<'_>, fragment: &Fragment) {
        let Some(selection) = fragment.selection() else {
            return;
        };
        if !selection.is_visible() {
            return;
        }
        let ranges = selection.highlight_ranges(fragment.geometry());
        if ranges.is_empty() {
            return;
        }
        render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        render_pass.set_vertex_buffer(1, self.selection_buffer.slice(..));
        render_pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        for range in ranges.into_iter().filter(|r| !r.is_empty()) {
            render_pass.draw_indexed(range, 0, 0..1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_struct() {
        assert_eq!(mem::size_of::<FragmentVertex>(), 28);
        let layout = FragmentVertex::desc();
        assert_eq!(layout.array_stride, 28);
        assert_eq!(layout.attributes.len(), 3);
        assert_eq!(layout.attributes[2].offset, 24);
    }

    #[test]
    fn instance_layout_covers_both_matrices() {
        let layout = InstanceRaw::desc();
        assert_eq!(layout.array_stride as usize, mem::size_of::<[f32; 25]>());
        assert_eq!(layout.step_mode, wgpu::VertexStepMode::Instance);
        let last = layout.attributes.last().map(|a| a.shader_location);
        assert_eq!(last, Some(11));
    }

    #[test]
    fn material_uniform_is_16_byte_aligned() {
        assert_eq!(mem::size_of::<MaterialRaw>() % 16, 0);
        let raw = MaterialRaw::from(&Material::highlight());
        assert_eq!(raw.color, [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(raw.depth_test, 0);
    }
}
