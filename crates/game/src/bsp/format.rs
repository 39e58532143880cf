//! On-disk records of the map format.
//!
//! Version 30 brush maps with one extra lump holding static props. Every
//! record is little-endian and read without alignment requirements.

use bytemuck::{Pod, Zeroable};

use super::error::LoadError;

pub const BSP_VERSION: i32 = 30;

pub const LUMP_ENTITIES: usize = 0;
pub const LUMP_PLANES: usize = 1;
pub const LUMP_TEXTURES: usize = 2;
pub const LUMP_VERTICES: usize = 3;
pub const LUMP_VISIBILITY: usize = 4;
pub const LUMP_NODES: usize = 5;
pub const LUMP_TEXINFO: usize = 6;
pub const LUMP_FACES: usize = 7;
pub const LUMP_LIGHTING: usize = 8;
pub const LUMP_CLIPNODES: usize = 9;
pub const LUMP_LEAVES: usize = 10;
pub const LUMP_MARKSURFACES: usize = 11;
pub const LUMP_EDGES: usize = 12;
pub const LUMP_SURFEDGES: usize = 13;
pub const LUMP_MODELS: usize = 14;
pub const LUMP_STATIC_PROPS: usize = 15;
pub const HEADER_LUMPS: usize = 16;

pub const LUMP_NAMES: [&str; HEADER_LUMPS] = [
    "entities",
    "planes",
    "textures",
    "vertices",
    "visibility",
    "nodes",
    "texinfo",
    "faces",
    "lighting",
    "clipnodes",
    "leaves",
    "marksurfaces",
    "edges",
    "surfedges",
    "models",
    "static props",
];

pub const MAX_MAP_HULLS: usize = 4;
pub const STATIC_PROP_NAME_LEN: usize = 64;

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DLump {
    pub offset: i32,
    pub length: i32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct DHeader {
    pub version: i32,
    pub lumps: [DLump; HEADER_LUMPS],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct DPlane {
    pub normal: [f32; 3],
    pub dist: f32,
    pub kind: i32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct DVertex {
    pub point: [f32; 3],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct DNode {
    pub plane: u32,
    /// Negative children are leaves, stored as `!leaf`.
    pub children: [i16; 2],
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub first_face: u16,
    pub num_faces: u16,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct DLeaf {
    pub contents: i32,
    /// Byte offset into the visibility lump, `-1` when the leaf has no row.
    pub visofs: i32,
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub first_mark_surface: u16,
    pub num_mark_surfaces: u16,
    pub ambient_level: [u8; 4],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct DFace {
    pub plane: u16,
    pub side: u16,
    pub first_edge: i32,
    pub num_edges: u16,
    pub texinfo: u16,
    pub styles: [u8; 4],
    pub lightofs: i32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct DEdge {
    pub vertices: [u16; 2],
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct DTexInfo {
    pub vecs: [[f32; 4]; 2],
    pub miptex: i32,
    pub flags: i32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct DModel {
    pub mins: [f32; 3],
    pub maxs: [f32; 3],
    pub origin: [f32; 3],
    pub head_nodes: [i32; MAX_MAP_HULLS],
    pub visleafs: i32,
    pub first_face: i32,
    pub num_faces: i32,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Pod, Zeroable)]
pub struct DStaticProp {
    pub name: [u8; STATIC_PROP_NAME_LEN],
    pub origin: [f32; 3],
    pub angles: [f32; 3],
    pub scale: [f32; 3],
    pub flags: u32,
}

/// Raw map file with a validated header.
pub struct BspFile<'a> {
    data: &'a [u8],
    header: DHeader,
}

impl<'a> BspFile<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, LoadError> {
        let header_len = size_of::<DHeader>();
        if data.len() < header_len {
            return Err(LoadError::malformed(format!(
                "file is {} bytes, header needs {header_len}",
                data.len()
            )));
        }
        let header: DHeader = bytemuck::pod_read_unaligned(&data[..header_len]);
        if header.version != BSP_VERSION {
            return Err(LoadError::UnsupportedVersion(header.version));
        }

        for (index, lump) in header.lumps.iter().enumerate() {
            let in_bounds = lump.offset >= 0
                && lump.length >= 0
                && (lump.offset as usize)
                    .checked_add(lump.length as usize)
                    .is_some_and(|end| end <= data.len());
            if !in_bounds {
                return Err(LoadError::malformed(format!(
                    "{} lump ({}, {}) lies outside the {} byte file",
                    LUMP_NAMES[index],
                    lump.offset,
                    lump.length,
                    data.len()
                )));
            }
        }

        Ok(Self { data, header })
    }

    pub fn header(&self) -> &DHeader {
        &self.header
    }

    pub fn lump_bytes(&self, lump: usize) -> &'a [u8] {
        let entry = self.header.lumps[lump];
        let start = entry.offset as usize;
        &self.data[start..start + entry.length as usize]
    }

    /// Reads a lump as an array of `T` records.
    pub fn records<T: Pod>(&self, lump: usize) -> Result<Vec<T>, LoadError> {
        let bytes = self.lump_bytes(lump);
        let record = size_of::<T>();
        if bytes.len() % record != 0 {
            return Err(LoadError::malformed(format!(
                "{} lump is {} bytes, not a multiple of {record}",
                LUMP_NAMES[lump],
                bytes.len()
            )));
        }
        Ok(bytes
            .chunks_exact(record)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }
}

/// Assembles a map file from lump contents.
///
/// Used by tooling and tests that need small maps without a compiler.
#[derive(Debug, Clone, Default)]
pub struct BspWriter {
    lumps: [Vec<u8>; HEADER_LUMPS],
}

impl BspWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lump<T: Pod>(mut self, lump: usize, records: &[T]) -> Self {
        self.lumps[lump] = bytemuck::cast_slice(records).to_vec();
        self
    }

    pub fn raw(mut self, lump: usize, bytes: &[u8]) -> Self {
        self.lumps[lump] = bytes.to_vec();
        self
    }

    pub fn entities(self, text: &str) -> Self {
        let mut bytes = text.as_bytes().to_vec();
        bytes.push(0);
        self.raw(LUMP_ENTITIES, &bytes)
    }

    pub fn finish(self) -> Vec<u8> {
        let mut header = DHeader {
            version: BSP_VERSION,
            lumps: [DLump::default(); HEADER_LUMPS],
        };
        let mut body = Vec::new();
        let mut offset = size_of::<DHeader>();
        for (index, bytes) in self.lumps.iter().enumerate() {
            header.lumps[index] = DLump {
                offset: offset as i32,
                length: bytes.len() as i32,
            };
            body.extend_from_slice(bytes);
            // Keep every lump 4-byte aligned.
            while body.len() % 4 != 0 {
                body.push(0);
            }
            offset = size_of::<DHeader>() + body.len();
        }

        let mut out = bytemuck::bytes_of(&header).to_vec();
        out.extend_from_slice(&body);
        out
    }
}

pub fn static_prop_name(name: &str) -> [u8; STATIC_PROP_NAME_LEN] {
    let mut out = [0u8; STATIC_PROP_NAME_LEN];
    let mut take = name.len().min(STATIC_PROP_NAME_LEN - 1);
    while !name.is_char_boundary(take) {
        take -= 1;
    }
    out[..take].copy_from_slice(&name.as_bytes()[..take]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_sizes_match_the_file_format() {
        assert_eq!(size_of::<DHeader>(), 4 + 8 * HEADER_LUMPS);
        assert_eq!(size_of::<DPlane>(), 20);
        assert_eq!(size_of::<DNode>(), 24);
        assert_eq!(size_of::<DLeaf>(), 28);
        assert_eq!(size_of::<DFace>(), 20);
        assert_eq!(size_of::<DTexInfo>(), 40);
        assert_eq!(size_of::<DModel>(), 64);
    }

    #[test]
    fn writer_output_parses() {
        let planes = [DPlane {
            normal: [0.0, 0.0, 1.0],
            dist: 8.0,
            kind: 2,
        }];
        let data = BspWriter::new()
            .lump(LUMP_PLANES, &planes)
            .entities("{\n\"classname\" \"worldspawn\"\n}\n")
            .finish();

        let file = BspFile::parse(&data).unwrap();
        let read: Vec<DPlane> = file.records(LUMP_PLANES).unwrap();
        assert_eq!(read.len(), 1);
        assert_eq!(read[0].dist, 8.0);
        assert!(file.lump_bytes(LUMP_ENTITIES).ends_with(&[0]));
        assert!(file.records::<DNode>(LUMP_NODES).unwrap().is_empty());
    }

    #[test]
    fn rejects_bad_headers() {
        assert!(matches!(
            BspFile::parse(&[0u8; 8]),
            Err(LoadError::MalformedFile(_))
        ));

        let mut data = BspWriter::new().finish();
        data[0] = 29;
        assert!(matches!(
            BspFile::parse(&data),
            Err(LoadError::UnsupportedVersion(29))
        ));

        let mut data = BspWriter::new().finish();
        // Planes lump length.
        let at = 4 + 8 * LUMP_PLANES + 4;
        data[at..at + 4].copy_from_slice(&1000i32.to_le_bytes());
        assert!(matches!(
            BspFile::parse(&data),
            Err(LoadError::MalformedFile(_))
        ));
    }

    #[test]
    fn ragged_lump_is_malformed() {
        let data = BspWriter::new().raw(LUMP_PLANES, &[0u8; 21]).finish();
        let file = BspFile::parse(&data).unwrap();
        assert!(file.records::<DPlane>(LUMP_PLANES).is_err());
    }

    #[test]
    fn prop_names_are_truncated() {
        let name = static_prop_name(&"x".repeat(100));
        assert_eq!(name[62], b'x');
        assert_eq!(name[63], 0);
    }
}
