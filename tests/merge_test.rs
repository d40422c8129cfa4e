mod common;

use common::test_utils::{glass, panel, two_panels};
use flow_fragments::{
    FragmentError,
    data_structures::geometry::{BlockIds, Group, SourceMesh, compute_normals, merge},
};

#[test]
fn merged_buffers_concatenate_parts_in_order() {
    let (geometry, materials) = merge(two_panels()).unwrap();

    assert_eq!(geometry.vertex_count(), 8);
    assert_eq!(geometry.block_ids().len(), 8);
    assert_eq!(geometry.block_ids().to_u32_vec(), vec![0, 0, 0, 0, 1, 1, 1, 1]);
    assert_eq!(&geometry.indices()[6..], &[4, 5, 6, 4, 6, 7]);
    assert_eq!(
        geometry.groups(),
        &[
            Group { start: 0, count: 6, material_index: 0 },
            Group { start: 6, count: 6, material_index: 1 },
        ]
    );
    assert_eq!(materials.len(), 2);
    assert_eq!(geometry.triangle_count(), 4);
    assert_eq!(geometry.triangle_block_id(3), Some(1));
}

#[test]
fn block_ids_are_as_narrow_as_the_part_count_allows() {
    let (few, _) = merge(two_panels()).unwrap();
    assert!(matches!(few.block_ids(), BlockIds::U8(_)));
    assert_eq!(few.block_ids().bytes_per_vertex(), 1);

    let many: Vec<SourceMesh> = (0..300)
        .map(|i| SourceMesh::new(&format!("part{}", i), vec![[0.0; 3], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]], vec![0, 1, 2]))
        .collect();
    let (geometry, _) = merge(many).unwrap();
    assert_eq!(geometry.block_ids().bytes_per_vertex(), 2);
    assert_eq!(geometry.block_ids().get(3 * 299), Some(299));
    assert_eq!(geometry.groups().len(), 300);
}

#[test]
fn materials_keep_colour_and_transparency_only() {
    let (_, materials) = merge(two_panels()).unwrap();
    assert!(!materials[0].transparent);
    assert_eq!(materials[0].opacity, 1.0);
    assert!(materials[1].transparent);
    assert_eq!(materials[1].color, [0.2, 0.4, 0.8]);
    assert_eq!(materials[1].opacity, 0.5);
    assert!(materials[1].depth_test);
}

#[test]
fn empty_input_is_rejected() {
    assert_eq!(merge(Vec::new()).unwrap_err(), FragmentError::EmptyMergeInput);
}

#[test]
fn parts_without_index_buffer_are_rejected() {
    let unindexed = SourceMesh {
        indices: None,
        ..panel("loose", 0.0, 1.0, 0.0)
    };
    let err = merge(vec![panel("ok", 0.0, 1.0, 0.0), unindexed]).unwrap_err();
    assert_eq!(
        err,
        FragmentError::MissingIndexBuffer {
            index: 1,
            name: String::from("loose"),
        }
    );
}

#[test]
fn out_of_range_indices_are_rejected() {
    let broken = SourceMesh::new("broken", vec![[0.0; 3]; 3], vec![0, 1, 7]);
    let err = merge(vec![broken]).unwrap_err();
    assert!(matches!(
        err,
        FragmentError::InvalidSourceIndex { index: 0, vertex: 7, vertex_count: 3, .. }
    ));
}

#[test]
fn missing_normals_are_computed_and_given_ones_kept() {
    let computed = panel("computed", 0.0, 1.0, 0.0);
    let given = panel("given", 0.0, 1.0, 0.0).with_normals(vec![[0.0, 1.0, 0.0]; 4]);
    let (geometry, _) = merge(vec![computed, given.with_material(glass())]).unwrap();

    for normal in &geometry.normals()[..4] {
        assert!((normal[2] - 1.0).abs() < 1e-6, "{:?}", normal);
    }
    assert_eq!(&geometry.normals()[4..], &[[0.0, 1.0, 0.0]; 4]);
}

#[test]
fn compute_normals_ignores_broken_triangles() {
    let positions = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let normals = compute_normals(&positions, &[0, 1, 2, 0, 1, 9]);
    assert_eq!(normals.len(), 3);
    assert!((normals[0][2] - 1.0).abs() < 1e-6);
}

#[test]
fn bounds_cover_every_vertex() {
    let (geometry, _) = merge(two_panels()).unwrap();
    let bounds = geometry.bounds().unwrap();
    assert_eq!(bounds.to_array(), [-0.9, -0.4, 0.5, 0.9, 0.4, 0.5]);
}
