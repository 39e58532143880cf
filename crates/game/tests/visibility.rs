mod common;

use std::sync::Arc;
use std::thread;

use glam::{Mat4, Vec3};
use pvsnet::bsp::{Aabb, BspTree, Contents, LoadOptions};
use pvsnet::level::{HeadlessScene, LevelLoader, NoPhysics, SceneGraph, SceneNode};
use pvsnet::visibility::LeafTracker;

use common::{ROOM_A, ROOM_B, ROOM_C};

fn tracker() -> LeafTracker {
    let tree = BspTree::load(&common::three_rooms(), &LoadOptions::default()).unwrap();
    LeafTracker::new(Arc::new(tree))
}

fn crate_at(x: f32) -> Aabb {
    Aabb::from_center(Vec3::new(x, 0.0, 16.0), Vec3::splat(8.0))
}

#[test]
fn visible_set_starts_with_the_current_leaf() {
    let tracker = tracker();
    assert_eq!(tracker.current_leaf(), None);
    assert!(tracker.visible_leaves().is_empty());

    assert!(tracker.update(Vec3::new(-32.0, 0.0, 16.0)));
    assert_eq!(tracker.current_leaf(), Some(ROOM_A));
    assert_eq!(tracker.visible_leaves(), vec![ROOM_A, ROOM_B]);
    assert_eq!(tracker.visible_leaf_bounds().len(), 2);

    assert!(tracker.update(Vec3::new(96.0, 0.0, 16.0)));
    assert_eq!(tracker.visible_leaves(), vec![ROOM_C, ROOM_B]);
    assert!(tracker.is_leaf_visible(ROOM_B));
    assert!(!tracker.is_leaf_visible(ROOM_A));
}

#[test]
fn moving_within_a_leaf_keeps_the_set() {
    let tracker = tracker();
    assert!(tracker.update(Vec3::new(10.0, 0.0, 16.0)));
    let before = tracker.visible_leaves();

    assert!(!tracker.update(Vec3::new(50.0, 20.0, 30.0)));
    assert_eq!(tracker.visible_leaves(), before);
    assert_eq!(before, vec![ROOM_B, ROOM_A, ROOM_C]);

    tracker.reset();
    assert_eq!(tracker.current_leaf(), None);
    assert!(tracker.update(Vec3::new(50.0, 20.0, 30.0)));
}

#[test]
fn bounds_test_uses_visible_leaves() {
    let tracker = tracker();
    assert!(!tracker.pvs_bounds_test(&crate_at(-32.0)));

    tracker.update(Vec3::new(-32.0, 0.0, 16.0));
    assert!(tracker.pvs_bounds_test(&crate_at(-32.0)));
    assert!(tracker.pvs_bounds_test(&crate_at(32.0)));
    assert!(!tracker.pvs_bounds_test(&crate_at(100.0)));

    // Boxes straddling into a visible leaf count.
    let long = Aabb::new(Vec3::new(60.0, -4.0, 0.0), Vec3::new(110.0, 4.0, 8.0));
    assert!(tracker.pvs_bounds_test(&long));
}

#[test]
fn bounds_test_filters_leaves_by_contents() {
    let tree = BspTree::load(&common::flooded_rooms(), &LoadOptions::default()).unwrap();
    let tracker = LeafTracker::new(Arc::new(tree));
    tracker.update(Vec3::new(32.0, 0.0, 16.0));
    assert_eq!(tracker.visible_leaves(), vec![ROOM_B, ROOM_A, ROOM_C]);

    let in_water = crate_at(100.0);
    assert!(tracker.pvs_bounds_test(&in_water));
    assert!(tracker.pvs_bounds_test_with(&in_water, Contents::empty()));
    assert!(tracker.pvs_bounds_test_with(&in_water, Contents::LIQUID));
    assert!(!tracker.pvs_bounds_test_with(&in_water, Contents::EMPTY));

    let dry = crate_at(-32.0);
    assert!(tracker.pvs_bounds_test_with(&dry, Contents::EMPTY));
    assert!(!tracker.pvs_bounds_test_with(&dry, Contents::WATER));
}

#[test]
fn readers_share_the_tracker() {
    let tracker = Arc::new(tracker());
    tracker.update(Vec3::new(96.0, 0.0, 16.0));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            thread::spawn(move || tracker.pvs_bounds_test(&crate_at(32.0)))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }
}

/// Scene whose every node sits `offset` along x.
struct ShiftedScene {
    offset: f32,
}

impl SceneGraph for ShiftedScene {
    fn attach_geometry(&mut self, _leaf: usize, _drawable: pvsnet::level::LeafGeometry) {}

    fn clear_geometry(&mut self) {}

    fn get_net_transform(&self, _node: SceneNode) -> Mat4 {
        Mat4::from_translation(Vec3::X * self.offset)
    }
}

#[test]
fn level_culls_in_world_space() {
    let mut loader = LevelLoader::new(HeadlessScene, NoPhysics, "maps", LoadOptions::default());
    let level = loader.load_bytes("three_rooms", &common::three_rooms()).unwrap();
    level.tracker().update(Vec3::new(-32.0, 0.0, 16.0));

    let local = crate_at(0.0);
    assert!(level.is_potentially_visible(&HeadlessScene, 1, &local));
    assert!(!level.is_potentially_visible(&ShiftedScene { offset: 100.0 }, 1, &local));
    assert!(level.is_potentially_visible(&ShiftedScene { offset: -40.0 }, 1, &local));
}
