mod common;

use common::test_utils::{pointer_at, translation, two_panel_fragment};
use flow_fragments::{
    Matrix4, Point3, SquareMatrix, Vector3, Zero,
    data_structures::{
        geometry::Material,
        instance::InstanceData,
        selection::{BlockSet, Selection},
    },
    pick::{Hit, Ray, pick_fragment, raycast, triangle_center},
};

#[test]
fn picking_resolves_the_part_under_the_pointer() {
    let mut fragment = two_panel_fragment(4);
    fragment.add_instances(&[(100, Matrix4::identity())]).unwrap();

    let picked = pick_fragment(&pointer_at(20.0, 50.0), &mut fragment).unwrap();
    assert_eq!(picked, Some(0));

    let selection = fragment.selection().unwrap();
    assert!(selection.is_visible());
    assert_eq!(selection.instances().count(), 1);
    assert!(selection.blocks().contains(0));

    let picked = pick_fragment(&pointer_at(80.0, 50.0), &mut fragment).unwrap();
    assert_eq!(picked, Some(1));
    let blocks: Vec<u32> = fragment.selection().unwrap().blocks().iter().collect();
    assert_eq!(blocks, vec![1]);
}

#[test]
fn a_miss_hides_the_overlay_but_keeps_its_state() {
    let mut fragment = two_panel_fragment(2);
    fragment.add_instances(&[(1, Matrix4::identity())]).unwrap();
    pick_fragment(&pointer_at(20.0, 50.0), &mut fragment).unwrap();

    let picked = pick_fragment(&pointer_at(50.0, 5.0), &mut fragment).unwrap();
    assert_eq!(picked, None);
    let selection = fragment.selection().unwrap();
    assert_eq!(selection.instances().count(), 0);
    assert!(!selection.is_visible());
    assert!(selection.blocks().contains(0));
}

#[test]
fn the_nearest_instance_wins() {
    let mut fragment = two_panel_fragment(3);
    let near = translation(0.0, 0.0, -0.3);
    fragment
        .add_instances(&[(1, Matrix4::identity()), (2, near)])
        .unwrap();

    let ray = Ray::from_screen(&pointer_at(20.0, 50.0)).unwrap();
    let hits = raycast(&fragment, &ray);
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].instance_index, 1);
    assert!((hits[0].distance - 0.2).abs() < 1e-5);
    assert!(hits[0].distance <= hits[1].distance);

    pick_fragment(&pointer_at(20.0, 50.0), &mut fragment).unwrap();
    let mirrored = fragment.selection().unwrap().instances().get_instance(0).unwrap();
    assert_eq!(mirrored, near);
}

#[test]
fn hidden_and_singular_instances_are_not_hit() {
    let mut fragment = two_panel_fragment(3);
    fragment
        .set_instance(0, InstanceData::new(vec![1], Matrix4::zero()))
        .unwrap();
    fragment
        .set_instance(1, InstanceData::new(vec![2], Matrix4::identity()))
        .unwrap();
    let ray = Ray::new(Point3::new(-0.6, 0.0, 0.0), Vector3::new(0.0, 0.0, 2.0));

    let hits = raycast(&fragment, &ray);
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].instance_index, 1);

    fragment.instances_mut().set_count(1);
    assert!(raycast(&fragment, &ray).is_empty());
}

#[test]
fn block_lookup_rejects_unknown_triangles() {
    let fragment = two_panel_fragment(1);
    let hit = |triangle_index| Hit {
        triangle_index,
        instance_index: 0,
        distance: 1.0,
        point: Point3::new(0.0, 0.0, 0.0),
    };
    assert_eq!(fragment.block_id(&hit(1)), Some(0));
    assert_eq!(fragment.block_id(&hit(2)), Some(1));
    assert_eq!(fragment.block_id(&hit(99)), None);
}

#[test]
fn picking_a_free_slot_is_an_error() {
    let mut fragment = two_panel_fragment(2);
    let hit = Hit {
        triangle_index: 0,
        instance_index: 1,
        distance: 1.0,
        point: Point3::new(0.0, 0.0, 0.0),
    };
    assert!(fragment.on_pick(Some(&hit)).is_err());
}

#[test]
fn rays_aimed_at_a_triangle_centre_hit_it() {
    let mut fragment = two_panel_fragment(1);
    fragment.add_instances(&[(7, translation(5.0, 0.0, 0.0))]).unwrap();
    let target = triangle_center(&fragment, 0, 2).unwrap();
    let origin = Point3::new(target.x, target.y, -1.0);

    let hits = raycast(&fragment, &Ray::new(origin, Vector3::new(0.0, 0.0, 1.0)));
    assert_eq!(hits.first().map(|h| h.triangle_index), Some(2));
    assert_eq!(fragment.block_id(&hits[0]), Some(1));
}

#[test]
fn block_sets_replace_or_union() {
    let mut blocks = BlockSet::default();
    blocks.add(&[1, 2], false);
    blocks.add(&[3], false);
    assert_eq!(blocks.iter().collect::<Vec<_>>(), vec![1, 2, 3]);

    blocks.add(&[5], true);
    assert_eq!(blocks.iter().collect::<Vec<_>>(), vec![5]);

    blocks.reset();
    assert!(blocks.is_empty());
}

#[test]
fn reset_empties_and_hides() {
    let mut selection = Selection::default();
    selection.show(Matrix4::identity()).unwrap();
    selection.add_blocks(&[4], true);

    selection.reset();
    assert!(selection.blocks().is_empty());
    assert!(!selection.is_visible());
    assert_eq!(*selection.material(), Material::highlight());
}

#[test]
fn highlight_covers_the_selected_groups() {
    let mut fragment = two_panel_fragment(1)
        .with_selection_material(Material::new([0.0, 1.0, 0.0], false, 1.0));
    fragment.selection_mut().add_blocks(&[1, 9], true);

    let selection = fragment.selection().unwrap();
    assert_eq!(selection.highlight_ranges(fragment.geometry()), vec![6..12]);
    assert_eq!(selection.material().color, [0.0, 1.0, 0.0]);

    fragment.reset_selection();
    assert!(fragment.selection().unwrap().blocks().is_empty());
}
