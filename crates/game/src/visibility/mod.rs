//! Observer-centric culling on top of the map's visibility data.

mod tracker;

pub use tracker::{LeafTracker, make_net_bounds};
