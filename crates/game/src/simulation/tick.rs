/// Longest frame delta fed into the accumulator.
pub const MAX_FRAME_DELTA: f32 = 0.25;

/// Fixed-rate tick accumulator.
#[derive(Debug, Clone)]
pub struct FixedTimestep {
    tick_rate: u32,
    dt: f32,
    accumulator: f32,
}

impl FixedTimestep {
    pub fn new(tick_rate: u32) -> Self {
        let tick_rate = tick_rate.max(1);
        Self {
            tick_rate,
            dt: 1.0 / tick_rate as f32,
            accumulator: 0.0,
        }
    }

    pub fn tick_rate(&self) -> u32 {
        self.tick_rate
    }

    pub fn dt(&self) -> f32 {
        self.dt
    }

    /// Adds real elapsed time; a long stall is clamped instead of replayed.
    pub fn accumulate(&mut self, delta: f32) {
        self.accumulator += delta.clamp(0.0, MAX_FRAME_DELTA);
    }

    pub fn should_tick(&self) -> bool {
        self.accumulator >= self.dt
    }

    pub fn consume_tick(&mut self) -> bool {
        if self.accumulator >= self.dt {
            self.accumulator -= self.dt;
            true
        } else {
            false
        }
    }

    /// Time until the next tick is due.
    pub fn remaining(&self) -> f32 {
        (self.dt - self.accumulator).max(0.0)
    }

    pub fn alpha(&self) -> f32 {
        self.accumulator / self.dt
    }

    pub fn reset(&mut self) {
        self.accumulator = 0.0;
    }
}

/// Timing of the tick being simulated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickInfo {
    pub tick: i32,
    pub interval: f32,
    /// Simulated seconds since the clock started.
    pub time: f64,
}

/// Tick counter and simulated time.
#[derive(Debug, Clone)]
pub struct TickClock {
    tick: i32,
    interval: f32,
    time: f64,
}

impl TickClock {
    pub fn new(tick_rate: u32) -> Self {
        Self {
            tick: 0,
            interval: 1.0 / tick_rate.max(1) as f32,
            time: 0.0,
        }
    }

    pub fn info(&self) -> TickInfo {
        TickInfo {
            tick: self.tick,
            interval: self.interval,
            time: self.time,
        }
    }

    pub fn tick(&self) -> i32 {
        self.tick
    }

    pub fn interval(&self) -> f32 {
        self.interval
    }

    pub fn advance(&mut self) {
        self.tick = self.tick.wrapping_add(1);
        self.time += self.interval as f64;
    }

    /// Adopts the server's clock.
    pub fn sync(&mut self, tick: i32, interval: f32) {
        self.tick = tick;
        self.interval = interval;
        self.time = tick as f64 * interval as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_timestep_accumulation() {
        let mut ts = FixedTimestep::new(60);

        ts.accumulate(2.5 / 60.0);
        assert!(ts.should_tick());
        assert!(ts.consume_tick());
        assert!(ts.consume_tick());
        assert!(!ts.consume_tick());
        assert!(ts.alpha() > 0.4 && ts.alpha() < 0.6);
    }

    #[test]
    fn stalls_are_clamped() {
        let mut ts = FixedTimestep::new(10);
        ts.accumulate(5.0);
        let mut ticks = 0;
        while ts.consume_tick() {
            ticks += 1;
        }
        assert_eq!(ticks, 2);

        ts.accumulate(-1.0);
        assert!(!ts.should_tick());
    }

    #[test]
    fn clock_advances_and_syncs() {
        let mut clock = TickClock::new(20);
        clock.advance();
        clock.advance();
        assert_eq!(clock.tick(), 2);
        assert!((clock.info().time - 0.1).abs() < 1e-6);

        clock.sync(600, 1.0 / 60.0);
        assert_eq!(clock.info().tick, 600);
        assert!((clock.info().time - 10.0).abs() < 1e-4);
    }
}
