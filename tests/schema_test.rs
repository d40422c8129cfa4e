mod common;

use common::test_utils::{panel, translation, two_panel_fragment};
use flow_fragments::{
    FragmentError, Matrix4, SquareMatrix,
    data_structures::{fragment::Fragment, geometry::MergedGeometry, instance::InstanceData},
    schema::{
        self, Alignment, CsrIndex, FragmentRecord, FragmentsGroup, decode_size_prefixed,
        encode_size_prefixed,
    },
};

fn placed_fragments() -> Vec<Fragment> {
    let mut panels = two_panel_fragment(4);
    panels
        .set_instance(0, InstanceData::new(vec![30, 10], Matrix4::identity()))
        .unwrap();
    panels
        .set_instance(2, InstanceData::new(vec![20], translation(0.0, 2.0, 0.0)))
        .unwrap();

    let mut solid = Fragment::new("solid", vec![panel("wall", 0.0, 1.0, 0.0)], 2).unwrap();
    solid.add_instances(&[(40, translation(3.0, 0.0, 0.0))]).unwrap();

    let unused = Fragment::new("unused", vec![panel("spare", 0.0, 1.0, 0.0)], 1).unwrap();
    vec![panels, solid, unused]
}

fn full_group() -> FragmentsGroup {
    let mut group = FragmentsGroup::from_fragments(&placed_fragments());
    group.civil = vec![Alignment {
        absolute: vec![0.0, 1.5, 3.0],
        horizontal: vec![2.0],
        vertical: Vec::new(),
    }];
    group.coordination_matrix = (0..16).map(|i| i as f32).collect();
    group.rels = CsrIndex::from_rows([&[1][..], &[0, 2][..], &[][..]]);
    group.fragment_keys = Some(String::from("k1 k2"));
    group.id = Some(String::from("0f1e"));
    group.name = Some(String::from("Model"));
    group.ifc_name = Some(String::from("Project"));
    group.ifc_description = Some(String::from("Bürogebäude"));
    group.ifc_schema = Some(String::from("IFC4"));
    group
}

#[test]
fn group_with_every_field_survives_a_round_trip() {
    let group = full_group();
    let decoded = FragmentsGroup::decode(&group.encode()).unwrap();
    assert_eq!(decoded, group);
}

#[test]
fn group_without_fields_survives_a_round_trip() {
    let group = FragmentsGroup::default();
    let decoded = FragmentsGroup::decode(&group.encode()).unwrap();
    assert_eq!(decoded, group);
    assert_eq!(decoded.max_express_id, 0);
    assert!(decoded.name.is_none());
    assert!(decoded.items.is_empty());
}

#[test]
fn a_table_without_slots_decodes_to_defaults() {
    // root offset 4, then a table with zero fields
    let buf = [4u8, 0, 0, 0, 0, 0, 0, 0];
    assert_eq!(FragmentsGroup::decode(&buf).unwrap(), FragmentsGroup::default());
}

#[test]
fn group_summarises_its_fragments() {
    let group = FragmentsGroup::from_fragments(&placed_fragments());

    assert_eq!(group.items.len(), 3);
    assert_eq!(group.ids, vec![10, 20, 30, 40]);
    assert_eq!(group.max_express_id, 40);
    assert_eq!(group.keys.row(0), Some(&[10, 20, 30][..]));
    assert_eq!(group.keys.row(1), Some(&[40][..]));
    assert_eq!(group.keys.row(2), Some(&[][..]));
    assert_eq!(group.rels.rows(), 3);
    // the glass panel makes the first fragment transparent, the last has no instance
    assert_eq!(group.transparent_geometries_ids, vec![0]);
    assert_eq!(group.opaque_geometries_ids, vec![1]);
    assert_eq!(group.render_order().collect::<Vec<_>>(), vec![1, 0]);

    let bounds = group.bounds().unwrap().to_array();
    let expected = [-0.9, -0.4, 0.0, 4.0, 2.4, 0.5];
    for (got, want) in bounds.iter().zip(expected) {
        assert!((got - want).abs() < 1e-5, "{:?} != {:?}", bounds, expected);
    }
}

#[test]
fn decoded_csr_offsets_are_monotonic_and_closed() {
    let decoded = FragmentsGroup::decode(&full_group().encode()).unwrap();
    for csr in [&decoded.keys, &decoded.rels] {
        assert!(csr.indices.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(csr.indices.last().copied(), Some(csr.values.len() as u32));
    }
    for item in &decoded.items {
        assert!(item.ids.indices.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn broken_csr_offsets_are_rejected() {
    let mut group = full_group();
    group.keys.indices = vec![0, 9, 2, 4];
    assert_eq!(
        FragmentsGroup::decode(&group.encode()).unwrap_err(),
        FragmentError::InvalidIndex { field: "items_keys_indices" }
    );
}

#[test]
fn overlapping_partitions_are_rejected() {
    let mut group = full_group();
    group.opaque_geometries_ids = vec![1, 2];
    group.transparent_geometries_ids = vec![0, 2];
    assert_eq!(
        FragmentsGroup::decode(&group.encode()).unwrap_err(),
        FragmentError::OverlappingPartition { item: 2 }
    );
}

#[test]
fn decoded_partitions_never_overlap() {
    let decoded = FragmentsGroup::decode(&full_group().encode()).unwrap();
    for item in &decoded.opaque_geometries_ids {
        assert!(!decoded.transparent_geometries_ids.contains(item));
    }
}

#[test]
fn corrupted_offsets_are_malformed() {
    let encoded = full_group().encode();

    let mut bad_root = encoded.clone();
    bad_root[..4].copy_from_slice(&u32::MAX.to_le_bytes());
    assert!(matches!(
        FragmentsGroup::decode(&bad_root),
        Err(FragmentError::MalformedBuffer { .. })
    ));

    // the root table is written last, so cutting the tail loses it
    let truncated = &encoded[..encoded.len() / 2];
    assert!(matches!(
        FragmentsGroup::decode(truncated),
        Err(FragmentError::MalformedBuffer { .. })
    ));

    assert!(matches!(
        FragmentsGroup::decode(&[1, 2]),
        Err(FragmentError::MalformedBuffer { .. })
    ));
}

#[test]
fn fragments_survive_the_record_boundary() {
    let fragments = placed_fragments();
    let original = &fragments[0];
    let mut expected = original.clone();
    expected.instances_mut().set_count(4);
    expected.instances_mut().take_dirty();

    for fragment in [original, &expected] {
        let restored = Fragment::from_record(&fragment.to_record()).unwrap();
        assert_eq!(restored.id, fragment.id);
        assert_eq!(restored.geometry(), fragment.geometry());
        assert_eq!(restored.materials(), fragment.materials());
        assert_eq!(restored.capacity(), fragment.capacity());
        assert_eq!(restored.instances().count(), fragment.instances().count());
        for slot in 0..fragment.capacity() {
            assert_eq!(restored.instances().ids(slot), fragment.instances().ids(slot));
            assert_eq!(
                restored.get_instance(slot).ok(),
                fragment.get_instance(slot).ok()
            );
        }
    }
}

#[test]
fn decoded_groups_rebuild_live_fragments() {
    let fragments = placed_fragments();
    let decoded = FragmentsGroup::decode(&FragmentsGroup::from_fragments(&fragments).encode()).unwrap();
    let restored = decoded.to_fragments().unwrap();

    assert_eq!(restored.len(), 3);
    assert_eq!(restored[1].id, "solid");
    assert_eq!(restored[1].instances().slots_of(40).collect::<Vec<_>>(), vec![0]);
    assert_eq!(restored[0].geometry().block_ids(), fragments[0].geometry().block_ids());
}

#[test]
fn records_with_dangling_block_ids_are_rejected() {
    let mut record = two_panel_fragment(1).to_record();
    record.block_id[0] = 7;
    assert!(matches!(
        Fragment::from_record(&record),
        Err(FragmentError::InvalidRecord(_))
    ));
}

#[test]
fn groups_running_past_the_index_range_are_rejected() {
    let mut record = two_panel_fragment(1).to_record();
    // second group starts where a u32 ends
    record.groups[3] = u32::MAX;
    assert!(matches!(
        Fragment::from_record(&record),
        Err(FragmentError::InvalidRecord(_))
    ));

    let mut group = FragmentsGroup::default();
    group.items.push(record);
    assert!(matches!(
        FragmentsGroup::decode(&group.encode()),
        Err(FragmentError::InvalidRecord(_))
    ));
}

#[test]
fn geometry_rejects_groups_whose_end_overflows() {
    let geometry = two_panel_fragment(1).geometry().clone();
    let mut groups = geometry.groups().to_vec();
    groups[1].start = u32::MAX;
    assert!(groups[1].end().is_none());
    assert_eq!(groups[1].range(), u32::MAX..u32::MAX);
    let rebuilt = MergedGeometry::from_parts(
        geometry.positions().to_vec(),
        geometry.normals().to_vec(),
        geometry.indices().to_vec(),
        geometry.block_ids().clone(),
        groups,
    );
    assert!(matches!(rebuilt, Err(FragmentError::InvalidRecord(_))));
}

#[test]
fn render_passes_naming_missing_items_are_rejected() {
    for ids in [vec![3], vec![-1]] {
        let mut group = full_group();
        group.opaque_geometries_ids = ids;
        assert!(matches!(
            FragmentsGroup::decode(&group.encode()),
            Err(FragmentError::InvalidRecord(_))
        ));
        assert_eq!(group.render_order().collect::<Vec<_>>(), vec![0]);
    }
}

#[test]
fn records_with_inconsistent_arrays_fail_to_decode() {
    let mut record = two_panel_fragment(2).to_record();
    record.matrices.truncate(16);
    let mut group = FragmentsGroup::default();
    group.items.push(record);
    assert!(matches!(
        FragmentsGroup::decode(&group.encode()),
        Err(FragmentError::InvalidRecord(_))
    ));
}

#[test]
fn size_prefixed_records_can_be_concatenated() {
    let first = full_group();
    let second = FragmentsGroup {
        name: Some(String::from("second")),
        ..FragmentsGroup::default()
    };
    let mut stream = encode_size_prefixed(&first);
    stream.extend(encode_size_prefixed(&second));

    let (a, rest) = decode_size_prefixed::<FragmentsGroup>(&stream).unwrap();
    let (b, rest) = decode_size_prefixed::<FragmentsGroup>(rest).unwrap();
    assert_eq!(a, first);
    assert_eq!(b, second);
    assert!(rest.is_empty());

    assert!(decode_size_prefixed::<FragmentsGroup>(&stream[..10]).is_err());
}

#[test]
fn single_records_round_trip_through_the_generic_codec() {
    let record: FragmentRecord = two_panel_fragment(3).to_record();
    let decoded: FragmentRecord = schema::decode(&schema::encode(&record)).unwrap();
    assert_eq!(decoded, record);
}
