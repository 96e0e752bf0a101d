//! The client's three clocks.
//!
//! `server_time` estimates the server clock: seeded from the connect
//! accept, advanced by dt, and snapped back whenever a snapshot
//! disagrees by more than 100 ms (so it sits roughly half the RTT
//! behind the real thing). `render_time` trails it by `current_delay`
//! so there are always two snapshots to interpolate between, and
//! `current_delay` eases toward `target_delay`, which adapts to how
//! much snapshot future is buffered.

pub const MIN_DELAY: f32 = 0.02;
pub const MAX_DELAY: f32 = 0.15;

const INITIAL_DELAY: f32 = 0.1;
const DELAY_STEP: f32 = 0.01;
const DELAY_TRANSITION_SPEED: f32 = 2.0;

const TIME_SYNC_LARGE_CORRECTION: f32 = 0.1;
const RENDER_SNAP_THRESHOLD: f32 = 1.0;
const RENDER_NUDGE_DEADBAND: f32 = 0.001;
const TIME_CORRECTION_LARGE: f32 = 4.0;
const TIME_CORRECTION_MEDIUM: f32 = 1.0;

#[derive(Debug)]
pub struct RenderClock {
    pub server_time: f32,
    pub render_time: f32,
    target_delay: f32,
    current_delay: f32,
}

impl Default for RenderClock {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderClock {
    pub fn new() -> Self {
        Self {
            server_time: 0.0,
            render_time: -INITIAL_DELAY,
            target_delay: INITIAL_DELAY,
            current_delay: INITIAL_DELAY,
        }
    }

    /// Seeds the server clock from the connect accept.
    pub fn start(&mut self, server_time: f32) {
        self.server_time = server_time;
        self.render_time = server_time - self.current_delay;
    }

    /// Per-frame advance: eases the delay, then steers `render_time`
    /// toward `server_time - current_delay` with an error-proportional
    /// correction (snapping when hopelessly far off).
    pub fn advance(&mut self, dt: f32) {
        self.render_time += dt;

        let delay_diff = self.target_delay - self.current_delay;
        self.current_delay += delay_diff * DELAY_TRANSITION_SPEED * dt;

        let target_render_time = self.server_time - self.current_delay;
        let error = target_render_time - self.render_time;

        if error.abs() > RENDER_SNAP_THRESHOLD {
            self.render_time = target_render_time;
        } else if error.abs() > RENDER_NUDGE_DEADBAND {
            let speed = if error.abs() > 0.1 {
                TIME_CORRECTION_LARGE
            } else {
                TIME_CORRECTION_MEDIUM
            };
            self.render_time += error * speed * dt;
        }

        self.server_time += dt;
    }

    /// Resyncs against an authoritative snapshot stamp; small drift is
    /// tolerated, anything past 100 ms snaps.
    pub fn observe_snapshot_time(&mut self, snapshot_time: f32) {
        if (snapshot_time - self.server_time).abs() > TIME_SYNC_LARGE_CORRECTION {
            self.server_time = snapshot_time;
        }
    }

    /// The future buffer is how far the newest snapshot runs ahead of
    /// the render point; lots of future means the network is healthy
    /// and we can render closer to the present.
    pub fn adapt_delay(&mut self, newest_snapshot_time: f32) {
        let future_buffer = newest_snapshot_time - self.render_time;

        if future_buffer < MIN_DELAY {
            self.target_delay += DELAY_STEP;
        } else if future_buffer > MAX_DELAY {
            self.target_delay -= DELAY_STEP;
        }

        self.target_delay = self.target_delay.clamp(MIN_DELAY, MAX_DELAY);
    }

    pub fn current_delay(&self) -> f32 {
        self.current_delay
    }

    pub fn target_delay(&self) -> f32 {
        self.target_delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn far_off_render_time_snaps() {
        let mut clock = RenderClock::new();
        clock.start(100.0);
        clock.render_time = 50.0;

        clock.advance(1.0 / 60.0);

        assert!((clock.render_time - (clock.server_time - clock.current_delay())).abs() < 0.1);
    }

    #[test]
    fn small_error_nudges_toward_target() {
        let mut clock = RenderClock::new();
        clock.start(10.0);
        clock.render_time -= 0.05; // behind by 50 ms

        let dt = 1.0 / 60.0;
        let before_gap = (clock.server_time - clock.current_delay()) - clock.render_time;
        clock.advance(dt);
        let after_gap = (clock.server_time - clock.current_delay()) - clock.render_time;

        assert!(after_gap.abs() < before_gap.abs());
        assert!(after_gap.abs() > 0.0, "small errors are eased, not snapped");
    }

    #[test]
    fn snapshot_resync_only_past_threshold() {
        let mut clock = RenderClock::new();
        clock.start(10.0);

        clock.observe_snapshot_time(10.05);
        assert_eq!(clock.server_time, 10.0);

        clock.observe_snapshot_time(10.2);
        assert_eq!(clock.server_time, 10.2);
    }

    #[test]
    fn delay_adapts_and_clamps() {
        let mut clock = RenderClock::new();
        clock.start(10.0);

        // Starving: the newest snapshot barely leads the render point.
        for _ in 0..20 {
            clock.adapt_delay(clock.render_time + 0.01);
        }
        assert_eq!(clock.target_delay(), MAX_DELAY);

        // Flush with future: pull the delay back in.
        for _ in 0..40 {
            clock.adapt_delay(clock.render_time + 0.5);
        }
        assert_eq!(clock.target_delay(), MIN_DELAY);
    }
}
