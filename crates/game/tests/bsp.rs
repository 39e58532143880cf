mod common;

use glam::{Vec3, Vec4};
use pvsnet::bsp::{BspTree, Contents, LoadError, LoadOptions};

use common::{OUTSIDE, ROOM_A, ROOM_B, ROOM_C};

fn load() -> BspTree {
    BspTree::load(&common::three_rooms(), &LoadOptions::default()).unwrap()
}

#[test]
fn points_resolve_to_their_room() {
    let tree = load();

    assert_eq!(tree.find_leaf(Vec3::new(-32.0, 0.0, 32.0)), ROOM_A);
    assert_eq!(tree.find_leaf(Vec3::new(32.0, 0.0, 32.0)), ROOM_B);
    assert_eq!(tree.find_leaf(Vec3::new(96.0, 0.0, 32.0)), ROOM_C);
    assert_eq!(tree.find_leaf(Vec3::new(150.0, 0.0, 32.0)), OUTSIDE);
    // Points on a plane belong to its front side.
    assert_eq!(tree.find_leaf(Vec3::new(64.0, 0.0, 32.0)), ROOM_C);

    assert_eq!(tree.find_node(Vec3::new(-32.0, 0.0, 0.0)), 0);
    assert_eq!(tree.find_node(Vec3::new(96.0, 0.0, 0.0)), 2);
    assert_eq!(tree.point_contents(Vec3::new(150.0, 0.0, 0.0)), Contents::SOLID);
    assert_eq!(tree.point_contents(Vec3::new(10.0, 0.0, 0.0)), Contents::EMPTY);
}

#[test]
fn visibility_follows_the_rows() {
    let tree = load();
    assert!(tree.has_pvs_data());
    assert_eq!(tree.visleafs(), 4);
    assert_eq!(tree.pvs().row_bytes(), 1);

    assert!(tree.is_visible(ROOM_A, ROOM_B));
    assert!(tree.is_visible(ROOM_B, ROOM_C));
    assert!(!tree.is_visible(ROOM_A, ROOM_C));
    assert!(!tree.is_visible(ROOM_C, ROOM_A));

    // Self and the outside leaf are special cased.
    assert!(tree.is_visible(ROOM_C, ROOM_C));
    assert!(tree.is_visible(0, ROOM_C));
    assert!(!tree.is_visible(ROOM_A, 0));
    assert!(!tree.is_visible(OUTSIDE, ROOM_A));
}

#[test]
fn missing_vis_hides_everything_else() {
    let tree = BspTree::load(&common::three_rooms_without_vis(), &LoadOptions::default()).unwrap();
    assert!(!tree.has_pvs_data());
    assert!(!tree.is_visible(ROOM_A, ROOM_B));
    assert!(tree.is_visible(ROOM_A, ROOM_A));
    assert!(tree.is_visible(0, ROOM_B));
}

#[test]
fn line_traces_stop_at_solid_leaves() {
    let tree = load();
    let a = Vec3::new(-32.0, 0.0, 32.0);

    assert!(tree.trace_line(a, Vec3::new(32.0, 0.0, 32.0)));
    assert!(tree.trace_line(a, Vec3::new(120.0, 10.0, 32.0)));
    assert!(!tree.trace_line(a, Vec3::new(150.0, 0.0, 32.0)));
    assert!(!tree.trace_line(Vec3::new(150.0, 0.0, 32.0), a));
    assert!(tree.trace_line_mask(a, Vec3::new(150.0, 0.0, 32.0), Contents::LIQUID));
}

#[test]
fn leaf_bounds_are_nudged_then_scaled() {
    let tree = load();
    let room_b = tree.leaf_bounds(ROOM_B).unwrap();
    assert_eq!(room_b.min, Vec3::new(-1.0, -65.0, -1.0));
    assert_eq!(room_b.max, Vec3::new(65.0, 65.0, 65.0));
    assert!(tree.leaf_bounds(9).is_none());

    let options = LoadOptions {
        world_scale: 2.0,
        leaf_nudge: 0.0,
    };
    let scaled = BspTree::load(&common::three_rooms(), &options).unwrap();
    assert_eq!(scaled.find_leaf(Vec3::new(100.0, 0.0, 0.0)), ROOM_B);
    assert_eq!(scaled.find_leaf(Vec3::new(200.0, 0.0, 0.0)), ROOM_C);
    let room_c = scaled.leaf_bounds(ROOM_C).unwrap();
    assert_eq!(room_c.min, Vec3::new(128.0, -128.0, 0.0));
    assert_eq!(room_c.max, Vec3::new(256.0, 128.0, 128.0));
    assert_eq!(scaled.static_props()[0].origin, Vec3::new(64.0, 0.0, 0.0));
}

#[test]
fn entity_lump_is_parsed() {
    let tree = load();
    let entities = tree.entities();
    assert_eq!(entities.len(), 3);
    assert_eq!(entities[0].classname(), "worldspawn");
    assert_eq!(entities[0].get("message"), "three rooms");

    let start = &entities[1];
    assert_eq!(start.get_vector("origin"), Vec3::new(-32.0, 0.0, 0.0));
    assert_eq!(start.get_int("angle"), 90);
    assert_eq!(start.get("missing"), "");

    let light = &entities[2];
    let color = light.get_color("_light", false);
    assert_eq!(color, Vec4::new(1.0, 128.0 / 255.0, 0.0, 1.0));
    let scaled = light.get_color("_light", true);
    assert!((scaled.x - 200.0 / 255.0).abs() < 1e-6);
    assert_eq!(scaled.w, 1.0);
}

#[test]
fn faces_become_polygons() {
    let tree = load();
    assert_eq!(tree.faces().len(), 3);
    assert_eq!(tree.leaf_faces(ROOM_B), &[1]);
    assert!(tree.leaf_faces(OUTSIDE).is_empty());

    let floor = tree.face_polygon(0).unwrap();
    assert_eq!(floor.normal, Vec3::Z);
    assert_eq!(
        floor.vertices,
        vec![
            Vec3::new(-64.0, -64.0, 0.0),
            Vec3::new(0.0, -64.0, 0.0),
            Vec3::new(0.0, 64.0, 0.0),
            Vec3::new(-64.0, 64.0, 0.0),
        ]
    );
    assert_eq!(floor.triangles().count(), 2);
    assert_eq!(tree.model_polygons(0).len(), 3);
    assert!(tree.model_polygons(1).is_empty());

    let texinfo = tree.texinfo(floor.texinfo).unwrap();
    assert_eq!(texinfo.s, Vec4::new(1.0, 0.0, 0.0, 0.0));
}

#[test]
fn static_props_are_read() {
    let tree = load();
    let props = tree.static_props();
    assert_eq!(props.len(), 1);
    assert_eq!(props[0].model, "models/crate.mdl");
    assert_eq!(props[0].angles, Vec3::new(0.0, 90.0, 0.0));
    assert_eq!(props[0].scale, Vec3::ONE);
}

#[test]
fn bad_files_are_rejected() {
    let mut data = common::three_rooms();
    data[0] = 29;
    assert!(matches!(
        BspTree::load(&data, &LoadOptions::default()),
        Err(LoadError::UnsupportedVersion(29))
    ));

    let data = common::three_rooms();
    assert!(matches!(
        BspTree::load(&data[..data.len() / 2], &LoadOptions::default()),
        Err(LoadError::MalformedFile(_))
    ));
    assert!(matches!(
        BspTree::load(&data[..10], &LoadOptions::default()),
        Err(LoadError::MalformedFile(_))
    ));

    assert!(matches!(
        BspTree::from_file("/nonexistent/three_rooms.bsp", &LoadOptions::default()),
        Err(LoadError::Io { .. })
    ));
}
