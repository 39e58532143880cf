#![allow(dead_code)]

use pvsnet::bsp::{BspWriter, Contents};
use pvsnet::bsp::format::{
    DEdge, DFace, DLeaf, DModel, DNode, DPlane, DStaticProp, DTexInfo, DVertex, LUMP_EDGES,
    LUMP_FACES, LUMP_LEAVES, LUMP_MARKSURFACES, LUMP_MODELS, LUMP_NODES, LUMP_PLANES,
    LUMP_STATIC_PROPS, LUMP_SURFEDGES, LUMP_TEXINFO, LUMP_VERTICES, LUMP_VISIBILITY,
    static_prop_name,
};

/// Room A spans x in -64..0, room B 0..64, room C 64..128; beyond 128 is
/// solid. A and C cannot see each other.
pub const ROOM_A: usize = 1;
pub const ROOM_B: usize = 2;
pub const ROOM_C: usize = 3;
pub const OUTSIDE: usize = 4;

pub const ENTITIES: &str = r#"
{
"classname" "worldspawn"
"message" "three rooms"
}
{
"classname" "info_player_start"
"origin" "-32 0 0"
"angle" "90"
}
{
"classname" "light"
"origin" "96 0 48"
"_light" "255 128 0 200"
}
"#;

fn plane(normal: [f32; 3], dist: f32, kind: i32) -> DPlane {
    DPlane { normal, dist, kind }
}

fn node(plane: u32, children: [i16; 2], mins: [i16; 3], maxs: [i16; 3]) -> DNode {
    DNode {
        plane,
        children,
        mins,
        maxs,
        first_face: 0,
        num_faces: 0,
    }
}

fn leaf(contents: i32, visofs: i32, x: [i16; 2], mark: [u16; 2]) -> DLeaf {
    DLeaf {
        contents,
        visofs,
        mins: [x[0], -64, 0],
        maxs: [x[1], 64, 64],
        first_mark_surface: mark[0],
        num_mark_surfaces: mark[1],
        ambient_level: [0; 4],
    }
}

/// The three room map as file bytes.
pub fn three_rooms() -> Vec<u8> {
    build(Contents::CONTENTS_EMPTY)
}

/// Same map with room C filled with water.
pub fn flooded_rooms() -> Vec<u8> {
    build(Contents::CONTENTS_WATER)
}

fn build(room_c: i32) -> Vec<u8> {
    let planes = [
        plane([1.0, 0.0, 0.0], 0.0, 0),
        plane([1.0, 0.0, 0.0], 64.0, 0),
        plane([1.0, 0.0, 0.0], 128.0, 0),
        plane([0.0, 0.0, 1.0], 0.0, 2),
    ];

    // Front children come first; negative children are `!leaf`.
    let nodes = [
        node(0, [1, -2], [-64, -64, 0], [192, 64, 64]),
        node(1, [2, -3], [0, -64, 0], [192, 64, 64]),
        node(2, [-5, -4], [64, -64, 0], [192, 64, 64]),
    ];

    let leaves = [
        leaf(Contents::CONTENTS_SOLID, -1, [0, 0], [0, 0]),
        leaf(Contents::CONTENTS_EMPTY, 0, [-64, 0], [0, 1]),
        leaf(Contents::CONTENTS_EMPTY, 1, [0, 64], [1, 1]),
        leaf(room_c, 2, [64, 128], [2, 1]),
        leaf(Contents::CONTENTS_SOLID, -1, [128, 192], [0, 0]),
    ];

    // One literal byte per row: A sees A B, B sees A B C, C sees B C.
    let visibility = [0x03u8, 0x07, 0x06];

    // A floor quad per room.
    let mut vertices = Vec::new();
    let mut edges = vec![DEdge { vertices: [0, 0] }];
    let mut surfedges = Vec::new();
    let mut faces = Vec::new();
    for room in 0..3u16 {
        let x0 = -64.0 + 64.0 * f32::from(room);
        let x1 = x0 + 64.0;
        let first_vertex = vertices.len() as u16;
        for point in [[x0, -64.0, 0.0], [x1, -64.0, 0.0], [x1, 64.0, 0.0], [x0, 64.0, 0.0]] {
            vertices.push(DVertex { point });
        }
        faces.push(DFace {
            plane: 3,
            side: 0,
            first_edge: surfedges.len() as i32,
            num_edges: 4,
            texinfo: 0,
            styles: [0; 4],
            lightofs: -1,
        });
        for corner in 0..4 {
            surfedges.push(edges.len() as i32);
            edges.push(DEdge {
                vertices: [first_vertex + corner, first_vertex + (corner + 1) % 4],
            });
        }
    }
    let mark_surfaces = [0u16, 1, 2];

    let texinfo = [DTexInfo {
        vecs: [[1.0, 0.0, 0.0, 0.0], [0.0, 1.0, 0.0, 0.0]],
        miptex: 0,
        flags: 0,
    }];

    let models = [DModel {
        mins: [-64.0, -64.0, 0.0],
        maxs: [192.0, 64.0, 64.0],
        origin: [0.0; 3],
        head_nodes: [0; 4],
        visleafs: 4,
        first_face: 0,
        num_faces: 3,
    }];

    let props = [DStaticProp {
        name: static_prop_name("models/crate.mdl"),
        origin: [32.0, 0.0, 0.0],
        angles: [0.0, 90.0, 0.0],
        scale: [1.0; 3],
        flags: 0,
    }];

    BspWriter::new()
        .entities(ENTITIES)
        .lump(LUMP_PLANES, &planes)
        .lump(LUMP_NODES, &nodes)
        .lump(LUMP_LEAVES, &leaves)
        .raw(LUMP_VISIBILITY, &visibility)
        .lump(LUMP_VERTICES, &vertices)
        .lump(LUMP_EDGES, &edges)
        .lump(LUMP_SURFEDGES, &surfedges)
        .lump(LUMP_FACES, &faces)
        .lump(LUMP_MARKSURFACES, &mark_surfaces)
        .lump(LUMP_TEXINFO, &texinfo)
        .lump(LUMP_MODELS, &models)
        .lump(LUMP_STATIC_PROPS, &props)
        .finish()
}

/// Same map with the visibility lump dropped.
pub fn three_rooms_without_vis() -> Vec<u8> {
    let data = three_rooms();
    let file = pvsnet::bsp::format::BspFile::parse(&data).unwrap();

    let mut writer = BspWriter::new();
    for lump in 0..pvsnet::bsp::format::HEADER_LUMPS {
        if lump != LUMP_VISIBILITY {
            writer = writer.raw(lump, file.lump_bytes(lump));
        }
    }
    writer.finish()
}
