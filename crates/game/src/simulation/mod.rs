mod pipeline;
mod tick;

pub use pipeline::{Simulation, TickPipeline};
pub use tick::{FixedTimestep, TickClock, TickInfo, MAX_FRAME_DELTA};
