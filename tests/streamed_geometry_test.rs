mod common;

use common::test_utils::two_panels;
use flow_fragments::{
    FragmentError,
    data_structures::geometry::{MergedGeometry, merge},
    schema::{self, StreamedGeometries, StreamedGeometry},
};

#[test]
fn streamed_geometry_round_trips() {
    let (geometry, _) = merge(two_panels()).unwrap();
    let streamed = StreamedGeometry::from_geometry("panels", &geometry);
    assert_eq!(streamed.position.len(), 24);
    assert_eq!(streamed.index, geometry.indices());

    let decoded: StreamedGeometry = schema::decode(&schema::encode(&streamed)).unwrap();
    assert_eq!(decoded, streamed);
}

#[test]
fn streamed_geometry_becomes_a_single_group() {
    let (geometry, _) = merge(two_panels()).unwrap();
    let streamed = StreamedGeometry::from_geometry("panels", &geometry);

    let rebuilt = MergedGeometry::from_streamed(&streamed).unwrap();
    assert_eq!(rebuilt.groups().len(), 1);
    assert_eq!(rebuilt.groups()[0].range(), 0..12);
    assert!(rebuilt.block_ids().iter().all(|id| id == 0));
    assert_eq!(rebuilt.positions(), geometry.positions());
    assert_eq!(rebuilt.normals(), geometry.normals());
}

#[test]
fn geometry_without_normals_gets_them_computed() {
    let streamed = StreamedGeometry {
        id: None,
        position: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        normal: Vec::new(),
        index: vec![0, 1, 2],
    };
    let rebuilt = MergedGeometry::from_streamed(&streamed).unwrap();
    assert_eq!(rebuilt.normals(), &[[0.0, 0.0, 1.0]; 3]);
}

#[test]
fn truncated_vertex_streams_are_rejected() {
    let streamed = StreamedGeometry {
        id: Some(String::from("broken")),
        position: vec![0.0, 1.0],
        normal: Vec::new(),
        index: Vec::new(),
    };
    assert!(matches!(
        MergedGeometry::from_streamed(&streamed),
        Err(FragmentError::InvalidRecord(_))
    ));
}

#[test]
fn batches_keep_every_geometry_addressable() {
    let (geometry, _) = merge(two_panels()).unwrap();
    let batch = StreamedGeometries {
        geometries: vec![
            StreamedGeometry::from_geometry("a", &geometry),
            StreamedGeometry {
                id: Some(String::from("b")),
                ..StreamedGeometry::default()
            },
        ],
    };
    let decoded: StreamedGeometries = schema::decode(&schema::encode(&batch)).unwrap();
    assert_eq!(decoded, batch);
    assert!(decoded.find("b").unwrap().position.is_empty());
    assert!(decoded.find("c").is_none());
}
