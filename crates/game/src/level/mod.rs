//! Active map management and the collaborators it feeds.

mod loader;
mod scene;

pub use loader::{Level, LevelLoader, map_path};
pub use scene::{
    CollisionMesh, HeadlessScene, LeafGeometry, NoPhysics, PhysicsBackend, SceneGraph, SceneNode,
    WORLD_NODE,
};
