use std::path::Path;

use glam::{Vec3, Vec4};
use serde::{Deserialize, Serialize};

use super::bounds::Aabb;
use super::contents::Contents;
use super::entities::{MapEntity, parse_entities};
use super::error::LoadError;
use super::format::{
    BspFile, DEdge, DFace, DLeaf, DModel, DNode, DPlane, DStaticProp, DTexInfo, DVertex,
    LUMP_EDGES, LUMP_ENTITIES, LUMP_FACES, LUMP_LEAVES, LUMP_MARKSURFACES, LUMP_MODELS,
    LUMP_NODES, LUMP_PLANES, LUMP_STATIC_PROPS, LUMP_SURFEDGES, LUMP_TEXINFO, LUMP_VERTICES,
    LUMP_VISIBILITY,
};
use super::vis::Pvs;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOptions {
    /// Multiplier from file units to world units.
    pub world_scale: f32,
    /// Leaf boxes grow by this many file units on every side.
    pub leaf_nudge: f32,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            world_scale: 1.0,
            leaf_nudge: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Plane {
    pub normal: Vec3,
    pub dist: f32,
}

impl Plane {
    pub fn distance(&self, point: Vec3) -> f32 {
        self.normal.dot(point) - self.dist
    }

    /// Child slot a point falls into: 0 in front (or on) the plane, 1 behind.
    pub fn side(&self, point: Vec3) -> usize {
        if self.distance(point) >= 0.0 { 0 } else { 1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub plane: usize,
    /// `>= 0` is a node index, `< 0` is `!leaf`.
    pub children: [i32; 2],
    pub first_face: usize,
    pub num_faces: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Leaf {
    pub contents: Contents,
    pub bounds: Aabb,
    pub has_vis: bool,
    pub first_mark_surface: usize,
    pub num_mark_surfaces: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub bounds: Aabb,
    pub origin: Vec3,
    pub head_node: i32,
    pub visleafs: usize,
    pub first_face: usize,
    pub num_faces: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Face {
    pub plane: usize,
    pub back_side: bool,
    pub first_edge: usize,
    pub num_edges: usize,
    pub texinfo: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TexInfo {
    pub s: Vec4,
    pub t: Vec4,
    pub miptex: i32,
    pub flags: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StaticProp {
    pub model: String,
    pub origin: Vec3,
    pub angles: Vec3,
    pub scale: Vec3,
    pub flags: u32,
}

/// World space outline of one face, wound as stored.
#[derive(Debug, Clone, PartialEq)]
pub struct FacePolygon {
    pub face: usize,
    pub normal: Vec3,
    pub texinfo: usize,
    pub vertices: Vec<Vec3>,
}

impl FacePolygon {
    /// Triangle fan over the outline.
    pub fn triangles(&self) -> impl Iterator<Item = [Vec3; 3]> + '_ {
        (1..self.vertices.len().saturating_sub(1))
            .map(|i| [self.vertices[0], self.vertices[i], self.vertices[i + 1]])
    }
}

/// A loaded map: the partition tree, its leaves and their visibility.
#[derive(Debug, Clone)]
pub struct BspTree {
    planes: Vec<Plane>,
    nodes: Vec<Node>,
    leaves: Vec<Leaf>,
    models: Vec<Model>,
    faces: Vec<Face>,
    texinfo: Vec<TexInfo>,
    vertices: Vec<Vec3>,
    edges: Vec<[usize; 2]>,
    surfedges: Vec<i32>,
    mark_surfaces: Vec<usize>,
    entities: Vec<MapEntity>,
    static_props: Vec<StaticProp>,
    pvs: Pvs,
    visleafs: usize,
    root: i32,
}

impl BspTree {
    pub fn from_file(path: impl AsRef<Path>, options: &LoadOptions) -> Result<Self, LoadError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!("Loading map {}", path.display());
        Self::load(&data, options)
    }

    pub fn load(data: &[u8], options: &LoadOptions) -> Result<Self, LoadError> {
        let file = BspFile::parse(data)?;
        let scale = options.world_scale;

        let planes: Vec<Plane> = file
            .records::<DPlane>(LUMP_PLANES)?
            .into_iter()
            .map(|p| Plane {
                normal: Vec3::from_array(p.normal),
                dist: p.dist * scale,
            })
            .collect();

        let vertices: Vec<Vec3> = file
            .records::<DVertex>(LUMP_VERTICES)?
            .into_iter()
            .map(|v| Vec3::from_array(v.point) * scale)
            .collect();

        let edges: Vec<[usize; 2]> = file
            .records::<DEdge>(LUMP_EDGES)?
            .into_iter()
            .map(|e| e.vertices.map(usize::from))
            .collect();

        let surfedges: Vec<i32> = file.records::<i32>(LUMP_SURFEDGES)?;

        let texinfo: Vec<TexInfo> = file
            .records::<DTexInfo>(LUMP_TEXINFO)?
            .into_iter()
            .map(|t| TexInfo {
                s: Vec4::from_array(t.vecs[0]),
                t: Vec4::from_array(t.vecs[1]),
                miptex: t.miptex,
                flags: t.flags,
            })
            .collect();

        let faces: Vec<Face> = file
            .records::<DFace>(LUMP_FACES)?
            .into_iter()
            .map(|f| Face {
                plane: f.plane.into(),
                back_side: f.side != 0,
                first_edge: f.first_edge.max(0) as usize,
                num_edges: f.num_edges.into(),
                texinfo: f.texinfo.into(),
            })
            .collect();

        let mark_surfaces: Vec<usize> = file
            .records::<u16>(LUMP_MARKSURFACES)?
            .into_iter()
            .map(usize::from)
            .collect();

        let nodes: Vec<Node> = file
            .records::<DNode>(LUMP_NODES)?
            .into_iter()
            .map(|n| Node {
                plane: n.plane as usize,
                children: n.children.map(i32::from),
                first_face: n.first_face.into(),
                num_faces: n.num_faces.into(),
            })
            .collect();

        let raw_leaves: Vec<DLeaf> = file.records(LUMP_LEAVES)?;
        let leaves: Vec<Leaf> = raw_leaves
            .iter()
            .map(|l| {
                let mins = Vec3::from_array(l.mins.map(f32::from));
                let maxs = Vec3::from_array(l.maxs.map(f32::from));
                Leaf {
                    contents: Contents::from_raw(l.contents),
                    bounds: Aabb::new(mins, maxs)
                        .expand(options.leaf_nudge)
                        .scale(scale),
                    has_vis: l.visofs >= 0,
                    first_mark_surface: l.first_mark_surface.into(),
                    num_mark_surfaces: l.num_mark_surfaces.into(),
                }
            })
            .collect();

        let raw_models: Vec<DModel> = file.records(LUMP_MODELS)?;
        let models: Vec<Model> = raw_models
            .iter()
            .map(|m| Model {
                bounds: Aabb::new(Vec3::from_array(m.mins), Vec3::from_array(m.maxs)).scale(scale),
                origin: Vec3::from_array(m.origin) * scale,
                head_node: m.head_nodes[0],
                visleafs: m.visleafs.max(0) as usize,
                first_face: m.first_face.max(0) as usize,
                num_faces: m.num_faces.max(0) as usize,
            })
            .collect();

        let static_props: Vec<StaticProp> = file
            .records::<DStaticProp>(LUMP_STATIC_PROPS)?
            .into_iter()
            .map(|p| {
                let len = p.name.iter().position(|&b| b == 0).unwrap_or(p.name.len());
                StaticProp {
                    model: String::from_utf8_lossy(&p.name[..len]).into_owned(),
                    origin: Vec3::from_array(p.origin) * scale,
                    angles: Vec3::from_array(p.angles),
                    scale: Vec3::from_array(p.scale),
                    flags: p.flags,
                }
            })
            .collect();

        let entity_text = String::from_utf8_lossy(file.lump_bytes(LUMP_ENTITIES));
        let entities = parse_entities(&entity_text)?;

        if nodes.is_empty() || leaves.is_empty() {
            return Err(LoadError::malformed(format!(
                "map needs at least one node and leaf, has {} and {}",
                nodes.len(),
                leaves.len()
            )));
        }

        let visleafs = models
            .first()
            .map(|world| world.visleafs)
            .unwrap_or(leaves.len() - 1);
        if visleafs >= leaves.len() {
            return Err(LoadError::malformed(format!(
                "world model claims {visleafs} visible leaves, map has {}",
                leaves.len()
            )));
        }
        let root = models.first().map(|world| world.head_node).unwrap_or(0);

        let visofs: Vec<i32> = raw_leaves[..=visleafs].iter().map(|l| l.visofs).collect();
        let pvs = Pvs::decompress(file.lump_bytes(LUMP_VISIBILITY), &visofs, visleafs)?;

        let tree = Self {
            planes,
            nodes,
            leaves,
            models,
            faces,
            texinfo,
            vertices,
            edges,
            surfedges,
            mark_surfaces,
            entities,
            static_props,
            pvs,
            visleafs,
            root,
        };
        tree.validate()?;

        log::info!(
            "Map loaded: {} nodes, {} leaves ({} visible), {} faces, {} entities, pvs {}",
            tree.nodes.len(),
            tree.leaves.len(),
            tree.visleafs,
            tree.faces.len(),
            tree.entities.len(),
            if tree.pvs.has_data() { "present" } else { "absent" },
        );
        Ok(tree)
    }

    /// Cross-checks every index between lumps so queries never go out of
    /// bounds.
    fn validate(&self) -> Result<(), LoadError> {
        let child_ok = |child: i32| {
            if child >= 0 {
                (child as usize) < self.nodes.len()
            } else {
                ((!child) as usize) < self.leaves.len()
            }
        };

        if !child_ok(self.root) {
            return Err(LoadError::malformed(format!(
                "world head node {} is out of range",
                self.root
            )));
        }

        for (index, node) in self.nodes.iter().enumerate() {
            if node.plane >= self.planes.len() {
                return Err(LoadError::malformed(format!(
                    "node {index} uses plane {} of {}",
                    node.plane,
                    self.planes.len()
                )));
            }
            if let Some(child) = node.children.iter().find(|&&c| !child_ok(c)) {
                return Err(LoadError::malformed(format!(
                    "node {index} has child {child} out of range"
                )));
            }
        }

        for (index, leaf) in self.leaves.iter().enumerate() {
            if leaf.first_mark_surface + leaf.num_mark_surfaces > self.mark_surfaces.len() {
                return Err(LoadError::malformed(format!(
                    "leaf {index} mark surfaces exceed the lump"
                )));
            }
        }

        if let Some(face) = self.mark_surfaces.iter().find(|&&f| f >= self.faces.len()) {
            return Err(LoadError::malformed(format!(
                "mark surface references face {face} of {}",
                self.faces.len()
            )));
        }

        for (index, face) in self.faces.iter().enumerate() {
            let edges_ok = face.first_edge + face.num_edges <= self.surfedges.len();
            let texinfo_ok = self.texinfo.is_empty() || face.texinfo < self.texinfo.len();
            if face.plane >= self.planes.len() || !edges_ok || !texinfo_ok {
                return Err(LoadError::malformed(format!(
                    "face {index} references data out of range"
                )));
            }
        }

        for &surfedge in &self.surfedges {
            let edge = surfedge.unsigned_abs() as usize;
            let ok = self
                .edges
                .get(edge)
                .is_some_and(|e| e.iter().all(|&v| v < self.vertices.len()));
            if !ok {
                return Err(LoadError::malformed(format!(
                    "surfedge {surfedge} references a missing edge or vertex"
                )));
            }
        }

        for (index, model) in self.models.iter().enumerate() {
            if model.first_face + model.num_faces > self.faces.len() {
                return Err(LoadError::malformed(format!(
                    "model {index} faces exceed the lump"
                )));
            }
        }

        Ok(())
    }

    /// Leaf containing `point`.
    pub fn find_leaf(&self, point: Vec3) -> usize {
        let mut index = self.root;
        for _ in 0..=self.nodes.len() {
            if index < 0 {
                return (!index) as usize;
            }
            let node = &self.nodes[index as usize];
            index = node.children[self.planes[node.plane].side(point)];
        }
        log::warn!("Leaf search did not terminate, tree has a cycle");
        0
    }

    /// Last node on the path to `point`'s leaf.
    pub fn find_node(&self, point: Vec3) -> usize {
        let mut index = self.root.max(0) as usize;
        for _ in 0..=self.nodes.len() {
            let node = &self.nodes[index];
            let child = node.children[self.planes[node.plane].side(point)];
            if child < 0 {
                return index;
            }
            index = child as usize;
        }
        log::warn!("Node search did not terminate, tree has a cycle");
        index
    }

    pub fn is_visible(&self, from_leaf: usize, to_leaf: usize) -> bool {
        self.pvs.is_visible(from_leaf, to_leaf)
    }

    pub fn has_pvs_data(&self) -> bool {
        self.pvs.has_data()
    }

    pub fn pvs(&self) -> &Pvs {
        &self.pvs
    }

    /// Number of leaves covered by visibility data, leaf 0 excluded.
    pub fn visleafs(&self) -> usize {
        self.visleafs
    }

    pub fn root(&self) -> i32 {
        self.root
    }

    pub fn planes(&self) -> &[Plane] {
        &self.planes
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn leaves(&self) -> &[Leaf] {
        &self.leaves
    }

    pub fn leaf(&self, index: usize) -> Option<&Leaf> {
        self.leaves.get(index)
    }

    pub fn leaf_bounds(&self, index: usize) -> Option<Aabb> {
        self.leaves.get(index).map(|leaf| leaf.bounds)
    }

    pub fn models(&self) -> &[Model] {
        &self.models
    }

    pub fn model_bounds(&self, model: usize) -> Option<Aabb> {
        self.models.get(model).map(|m| m.bounds)
    }

    pub fn faces(&self) -> &[Face] {
        &self.faces
    }

    pub fn texinfo(&self, index: usize) -> Option<&TexInfo> {
        self.texinfo.get(index)
    }

    pub fn entities(&self) -> &[MapEntity] {
        &self.entities
    }

    pub fn static_props(&self) -> &[StaticProp] {
        &self.static_props
    }

    /// Faces drawn from `leaf`, through the mark surface lump.
    pub fn leaf_faces(&self, leaf: usize) -> &[usize] {
        self.leaves
            .get(leaf)
            .map(|l| &self.mark_surfaces[l.first_mark_surface..l.first_mark_surface + l.num_mark_surfaces])
            .unwrap_or(&[])
    }

    pub fn face_polygon(&self, face: usize) -> Option<FacePolygon> {
        let f = self.faces.get(face)?;
        let vertices = self.surfedges[f.first_edge..f.first_edge + f.num_edges]
            .iter()
            .map(|&surfedge| {
                let edge = self.edges[surfedge.unsigned_abs() as usize];
                self.vertices[if surfedge >= 0 { edge[0] } else { edge[1] }]
            })
            .collect();
        let normal = self.planes[f.plane].normal;

        Some(FacePolygon {
            face,
            normal: if f.back_side { -normal } else { normal },
            texinfo: f.texinfo,
            vertices,
        })
    }

    /// Every face polygon of a brush model.
    pub fn model_polygons(&self, model: usize) -> Vec<FacePolygon> {
        self.models
            .get(model)
            .map(|m| {
                (m.first_face..m.first_face + m.num_faces)
                    .filter_map(|face| self.face_polygon(face))
                    .collect()
            })
            .unwrap_or_default()
    }
}
