use glam::Mat4;

use crate::bsp::{Aabb, FacePolygon};

/// Handle of a node in the host's scene graph.
pub type SceneNode = u32;

/// Node holding the world model.
pub const WORLD_NODE: SceneNode = 0;

/// Render geometry of one leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct LeafGeometry {
    pub leaf: usize,
    pub bounds: Aabb,
    pub polygons: Vec<FacePolygon>,
}

/// Triangle soup handed to the physics engine.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollisionMesh {
    pub triangles: Vec<[glam::Vec3; 3]>,
}

impl CollisionMesh {
    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }
}

/// Rendering side of a level.
pub trait SceneGraph {
    fn attach_geometry(&mut self, leaf: usize, drawable: LeafGeometry);

    /// Drops every drawable attached for the current level.
    fn clear_geometry(&mut self);

    fn get_net_transform(&self, node: SceneNode) -> Mat4;
}

/// Collision side of a level.
pub trait PhysicsBackend {
    fn attach_collision_shape(&mut self, node: SceneNode, mesh: CollisionMesh);

    fn remove_collision_shape(&mut self, node: SceneNode);

    /// Advances the collision world by one tick.
    fn step(&mut self, _dt: f32) {}
}

/// Scene for hosts that never draw. Every node sits at the origin.
#[derive(Debug, Default)]
pub struct HeadlessScene;

impl SceneGraph for HeadlessScene {
    fn attach_geometry(&mut self, _leaf: usize, _drawable: LeafGeometry) {}

    fn clear_geometry(&mut self) {}

    fn get_net_transform(&self, _node: SceneNode) -> Mat4 {
        Mat4::IDENTITY
    }
}

/// Physics for hosts without a collision world.
#[derive(Debug, Default)]
pub struct NoPhysics;

impl PhysicsBackend for NoPhysics {
    fn attach_collision_shape(&mut self, _node: SceneNode, _mesh: CollisionMesh) {}

    fn remove_collision_shape(&mut self, _node: SceneNode) {}
}
