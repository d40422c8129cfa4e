#![allow(dead_code)]

use flow_fragments::{
    Matrix4, Vector3,
    context::Context,
    data_structures::{
        fragment::Fragment,
        geometry::{SourceMaterial, SourceMesh},
    },
};

/// Panel facing +z at depth `z`, spanning `x0..x1` horizontally and
/// `-0.4..0.4` vertically. Two triangles.
pub fn panel(name: &str, x0: f32, x1: f32, z: f32) -> SourceMesh {
    SourceMesh::new(
        name,
        vec![[x0, -0.4, z], [x1, -0.4, z], [x1, 0.4, z], [x0, 0.4, z]],
        vec![0, 1, 2, 0, 2, 3],
    )
}

pub fn glass() -> SourceMaterial {
    SourceMaterial {
        name: String::from("glass"),
        base_color: [0.2, 0.4, 0.8, 0.5],
        transparent: true,
        ..Default::default()
    }
}

/// An opaque panel on the left and a glass panel on the right, both at z = 0.5.
pub fn two_panels() -> Vec<SourceMesh> {
    vec![
        panel("left", -0.9, -0.1, 0.5),
        panel("right", 0.1, 0.9, 0.5).with_material(glass()),
    ]
}

pub fn two_panel_fragment(capacity: usize) -> Fragment {
    Fragment::new("panels", two_panels(), capacity).unwrap()
}

pub fn translation(x: f32, y: f32, z: f32) -> Matrix4<f32> {
    Matrix4::from_translation(Vector3::new(x, y, z))
}

/// 100 x 100 viewport with an identity camera: the pointer ray runs along +z
/// from z = 0. Pixel (20, 50) looks at the left panel, (80, 50) at the right one.
pub fn pointer_at(x: f64, y: f64) -> Context {
    let mut ctx = Context::new(100, 100);
    ctx.set_mouse(x, y);
    ctx
}
