use std::{
    hint::spin_loop,
    thread::sleep,
    time::{Duration, Instant},
};

/// Sleep until this close to a deadline, then spin.
const SPIN_MARGIN: Duration = Duration::from_millis(2);

/// Fixed-rate tick source for a bounded session.
///
/// Deadline `k` is `start + k / rate`, so a late tick never shifts the ones
/// after it.
#[derive(Debug)]
pub struct Pacer {
    start: Instant,
    rate: f64,
    duration: Duration,
    tick: u32,
}

impl Pacer {
    pub fn new(rate: f64, duration: Duration) -> Self {
        Self::starting_at(Instant::now(), rate, duration)
    }

    pub fn starting_at(start: Instant, rate: f64, duration: Duration) -> Self {
        Self {
            start,
            rate,
            duration,
            tick: 0,
        }
    }

    pub fn start(&self) -> Instant {
        self.start
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Time since start, capped at the session duration.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed().min(self.duration)
    }

    fn deadline(&self, tick: u32) -> Duration {
        Duration::from_secs_f64(tick as f64 / self.rate)
    }

    /// Blocks until the next tick is due and returns its index, or `None`
    /// once the session is over.
    pub fn wait_next(&mut self) -> Option<u32> {
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return None;
        }
        let due = self.deadline(self.tick);
        if due >= self.duration {
            return None;
        }
        let target = self.start + due;
        let now = Instant::now();
        if target > now + SPIN_MARGIN {
            sleep(target - now - SPIN_MARGIN);
        }
        while Instant::now() < target {
            spin_loop();
        }
        if self.start.elapsed() >= self.duration {
            return None;
        }
        let tick = self.tick;
        self.tick += 1;
        Some(tick)
    }

    /// Ticks the session will run when nothing falls behind.
    pub fn expected_ticks(&self) -> u32 {
        (self.duration.as_secs_f64() * self.rate).ceil() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tick_count_matches_rate_and_duration() {
        let mut pacer = Pacer::new(50.0, Duration::from_millis(400));
        assert_eq!(pacer.expected_ticks(), 20);
        let mut ticks = vec![];
        while let Some(t) = pacer.wait_next() {
            ticks.push((t, pacer.start().elapsed()));
        }
        assert!((19..=20).contains(&ticks.len()), "{} ticks", ticks.len());
        for (t, at) in &ticks {
            let due = Duration::from_millis(20) * *t;
            assert!(*at >= due, "tick {t} fired early at {at:?}");
        }
        assert!(pacer.start().elapsed() >= Duration::from_millis(380));
    }

    #[test]
    fn late_tick_does_not_shift_schedule() {
        let mut pacer = Pacer::new(20.0, Duration::from_millis(500));
        assert_eq!(pacer.wait_next(), Some(0));
        // miss two periods
        sleep(Duration::from_millis(120));
        assert_eq!(pacer.wait_next(), Some(1));
        assert_eq!(pacer.wait_next(), Some(2));
        let t3 = pacer.wait_next();
        let at = pacer.start().elapsed();
        assert_eq!(t3, Some(3));
        assert!(at >= Duration::from_millis(150));
        assert!(at < Duration::from_millis(250), "drifted to {at:?}");
    }

    #[test]
    fn elapsed_is_capped() {
        let pacer = Pacer::starting_at(
            Instant::now() - Duration::from_secs(2),
            10.0,
            Duration::from_secs(1),
        );
        assert_eq!(pacer.elapsed(), Duration::from_secs(1));
    }

    #[test]
    fn unusable_rate_yields_no_ticks() {
        assert_eq!(Pacer::new(0.0, Duration::from_millis(10)).wait_next(), None);
        assert_eq!(Pacer::new(f64::NAN, Duration::from_millis(10)).wait_next(), None);
    }
}
