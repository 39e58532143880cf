use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::bsp::{Aabb, BspTree, LoadError, LoadOptions};
use crate::visibility::{LeafTracker, make_net_bounds};

use super::scene::{CollisionMesh, LeafGeometry, PhysicsBackend, SceneGraph, SceneNode, WORLD_NODE};

/// The active map and the observer tracker running on it.
#[derive(Debug)]
pub struct Level {
    name: String,
    tree: Arc<BspTree>,
    tracker: LeafTracker,
}

impl Level {
    pub fn new(name: impl Into<String>, tree: BspTree) -> Self {
        let tree = Arc::new(tree);
        Self {
            name: name.into(),
            tracker: LeafTracker::new(Arc::clone(&tree)),
            tree,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tree(&self) -> &Arc<BspTree> {
        &self.tree
    }

    pub fn tracker(&self) -> &LeafTracker {
        &self.tracker
    }

    /// Culls `local_bounds` of `node` against the observer's visible leaves.
    pub fn is_potentially_visible(
        &self,
        scene: &dyn SceneGraph,
        node: SceneNode,
        local_bounds: &Aabb,
    ) -> bool {
        let bounds = make_net_bounds(&scene.get_net_transform(node), local_bounds);
        self.tracker.pvs_bounds_test(&bounds)
    }
}

/// Loads maps from a directory and wires them into the scene and physics.
pub struct LevelLoader<S, P> {
    scene: S,
    physics: P,
    maps_dir: PathBuf,
    options: LoadOptions,
    level: Option<Level>,
}

impl<S: SceneGraph, P: PhysicsBackend> LevelLoader<S, P> {
    pub fn new(scene: S, physics: P, maps_dir: impl Into<PathBuf>, options: LoadOptions) -> Self {
        Self {
            scene,
            physics,
            maps_dir: maps_dir.into(),
            options,
            level: None,
        }
    }

    pub fn map_path(&self, name: &str) -> PathBuf {
        map_path(&self.maps_dir, name)
    }

    /// Tears down the current level, then loads `name` from the maps
    /// directory. On failure no level is active.
    pub fn load(&mut self, name: &str) -> Result<&Level, LoadError> {
        self.unload();
        let tree = BspTree::from_file(self.map_path(name), &self.options)?;
        Ok(self.install(name, tree))
    }

    /// Same as [`load`](Self::load) for a map already in memory.
    pub fn load_bytes(&mut self, name: &str, data: &[u8]) -> Result<&Level, LoadError> {
        self.unload();
        let tree = BspTree::load(data, &self.options)?;
        Ok(self.install(name, tree))
    }

    fn install(&mut self, name: &str, tree: BspTree) -> &Level {
        for leaf in 0..tree.leaves().len() {
            let polygons: Vec<_> = tree
                .leaf_faces(leaf)
                .iter()
                .filter_map(|&face| tree.face_polygon(face))
                .collect();
            if polygons.is_empty() {
                continue;
            }
            let bounds = tree.leaves()[leaf].bounds;
            self.scene.attach_geometry(
                leaf,
                LeafGeometry {
                    leaf,
                    bounds,
                    polygons,
                },
            );
        }

        let mesh = CollisionMesh {
            triangles: tree
                .model_polygons(0)
                .iter()
                .flat_map(|polygon| polygon.triangles())
                .collect(),
        };
        if !mesh.is_empty() {
            log::debug!("World collision mesh: {} triangles", mesh.len());
            self.physics.attach_collision_shape(WORLD_NODE, mesh);
        }

        log::info!("Level {name} is active");
        self.level.insert(Level::new(name, tree))
    }

    pub fn unload(&mut self) {
        if let Some(level) = self.level.take() {
            log::info!("Unloading level {}", level.name());
            self.physics.remove_collision_shape(WORLD_NODE);
            self.scene.clear_geometry();
        }
    }

    pub fn level(&self) -> Option<&Level> {
        self.level.as_ref()
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn physics(&self) -> &P {
        &self.physics
    }

    pub fn physics_mut(&mut self) -> &mut P {
        &mut self.physics
    }
}

pub fn map_path(maps_dir: &Path, name: &str) -> PathBuf {
    maps_dir.join(format!("{name}.bsp"))
}
