use super::tick::{FixedTimestep, TickClock, TickInfo};

type StageFn<C> = Box<dyn FnMut(&mut C, &TickInfo)>;

struct Stage<C> {
    name: &'static str,
    run: StageFn<C>,
}

/// Named stages run in declaration order once per tick.
pub struct TickPipeline<C> {
    stages: Vec<Stage<C>>,
}

impl<C> Default for TickPipeline<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> TickPipeline<C> {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn stage<F>(mut self, name: &'static str, run: F) -> Self
    where
        F: FnMut(&mut C, &TickInfo) + 'static,
    {
        self.stages.push(Stage {
            name,
            run: Box::new(run),
        });
        self
    }

    pub fn stage_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.stages.iter().map(|stage| stage.name)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn run(&mut self, ctx: &mut C, tick: &TickInfo) {
        for stage in &mut self.stages {
            log::trace!("tick {}: {}", tick.tick, stage.name);
            (stage.run)(ctx, tick);
        }
    }
}

/// Fixed-timestep driver for a `TickPipeline`.
pub struct Simulation<C> {
    timestep: FixedTimestep,
    clock: TickClock,
    pipeline: TickPipeline<C>,
}

impl<C> Simulation<C> {
    pub fn new(tick_rate: u32, pipeline: TickPipeline<C>) -> Self {
        Self {
            timestep: FixedTimestep::new(tick_rate),
            clock: TickClock::new(tick_rate),
            pipeline,
        }
    }

    pub fn timestep(&self) -> &FixedTimestep {
        &self.timestep
    }

    pub fn clock(&self) -> &TickClock {
        &self.clock
    }

    /// Feeds real elapsed time and runs every tick that became due.
    /// Returns the number of ticks run.
    pub fn update(&mut self, ctx: &mut C, delta: f32) -> u32 {
        self.timestep.accumulate(delta);

        let mut ticks_run = 0;
        while self.timestep.consume_tick() {
            let info = self.clock.info();
            self.pipeline.run(ctx, &info);
            self.clock.advance();
            ticks_run += 1;
        }
        ticks_run
    }

    /// Runs exactly one tick regardless of elapsed time.
    pub fn step(&mut self, ctx: &mut C) {
        let info = self.clock.info();
        self.pipeline.run(ctx, &info);
        self.clock.advance();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Trace {
        calls: Vec<(i32, &'static str)>,
    }

    fn pipeline() -> TickPipeline<Trace> {
        TickPipeline::new()
            .stage("network", |t: &mut Trace, info| t.calls.push((info.tick, "network")))
            .stage("entities", |t: &mut Trace, info| t.calls.push((info.tick, "entities")))
            .stage("snapshot", |t: &mut Trace, info| t.calls.push((info.tick, "snapshot")))
    }

    #[test]
    fn stages_run_in_declared_order() {
        let mut trace = Trace::default();
        let mut sim = Simulation::new(60, pipeline());

        sim.step(&mut trace);
        sim.step(&mut trace);

        assert_eq!(
            trace.calls,
            vec![
                (0, "network"),
                (0, "entities"),
                (0, "snapshot"),
                (1, "network"),
                (1, "entities"),
                (1, "snapshot"),
            ]
        );
        assert_eq!(sim.clock().tick(), 2);
    }

    #[test]
    fn update_catches_up_or_idles() {
        let mut trace = Trace::default();
        let mut sim = Simulation::new(60, pipeline());

        assert_eq!(sim.update(&mut trace, 0.001), 0);
        assert_eq!(sim.update(&mut trace, 3.5 / 60.0), 3);
        assert_eq!(trace.calls.len(), 9);
        assert_eq!(
            pipeline().stage_names().collect::<Vec<_>>(),
            ["network", "entities", "snapshot"]
        );
    }
}
