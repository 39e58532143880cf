//! Binary space partition maps: loading, point location, visibility and
//! line traces.

mod bounds;
mod contents;
mod entities;
mod error;
pub mod format;
mod trace;
mod tree;
mod vis;

pub use bounds::Aabb;
pub use contents::Contents;
pub use entities::{MapEntity, parse_entities};
pub use error::LoadError;
pub use format::BspWriter;
pub use tree::{
    BspTree, Face, FacePolygon, Leaf, LoadOptions, Model, Node, Plane, StaticProp, TexInfo,
};
pub use vis::Pvs;
