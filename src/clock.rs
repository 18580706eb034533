use chrono::Utc;

/// Absolute point in time, seconds since the Unix epoch plus a microsecond
/// remainder, mirroring the `struct timeval` algebra the engine's timers are
/// specified against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Timeval {
    pub sec: u64,
    pub usec: u32,
}

const MICROS_PER_SEC: u32 = 1_000_000;

impl Timeval {
    pub fn new(sec: u64, usec: u32) -> Self {
        let mut tv = Timeval { sec, usec };
        tv.normalize();
        tv
    }

    fn normalize(&mut self) {
        self.sec += (self.usec / MICROS_PER_SEC) as u64;
        self.usec %= MICROS_PER_SEC;
        debug_assert!(self.usec < MICROS_PER_SEC);
    }

    pub fn from_secs(sec: u64) -> Self {
        Timeval { sec, usec: 0 }
    }

    /// `self - other`, in microseconds. Negative results saturate to 0,
    /// matching the engine's use of this only to measure elapsed/remaining
    /// time, never signed deltas.
    pub fn diff_micros(&self, other: &Timeval) -> i64 {
        let a = self.sec as i64 * MICROS_PER_SEC as i64 + self.usec as i64;
        let b = other.sec as i64 * MICROS_PER_SEC as i64 + other.usec as i64;
        a - b
    }

    pub fn add_secs(&self, secs: u64) -> Timeval {
        Timeval::new(self.sec + secs, self.usec)
    }

    pub fn add_micros(&self, micros: u64) -> Timeval {
        let total = self.usec as u64 + micros;
        Timeval::new(self.sec + total / MICROS_PER_SEC as u64, (total % MICROS_PER_SEC as u64) as u32)
    }

    /// `self - secs`, saturating at the epoch rather than underflowing.
    pub fn sub_secs(&self, secs: u64) -> Timeval {
        Timeval::new(self.sec.saturating_sub(secs), self.usec)
    }

    pub fn is_zero(&self) -> bool {
        self.sec == 0 && self.usec == 0
    }
}

/// Source of the current time. Pulled behind a trait so tests can drive the
/// engine's timers deterministically instead of sleeping.
pub trait Clock {
    fn now(&self) -> Timeval;
}

/// The clock a real host uses: wall-clock time via `chrono`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timeval {
        let now = Utc::now();
        Timeval::new(now.timestamp() as u64, now.timestamp_subsec_micros())
    }
}

/// A clock a test can advance by hand.
#[derive(Debug, Clone, Copy)]
pub struct ManualClock(pub Timeval);

impl Clock for ManualClock {
    fn now(&self) -> Timeval {
        self.0
    }
}

impl ManualClock {
    pub fn advance_secs(&mut self, secs: u64) {
        self.0 = self.0.add_secs(secs);
    }

    pub fn advance_micros(&mut self, micros: u64) {
        self.0 = self.0.add_micros(micros);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_overflowing_micros() {
        let tv = Timeval::new(10, 1_500_000);
        assert_eq!(tv.sec, 11);
        assert_eq!(tv.usec, 500_000);
    }

    #[test]
    fn diff_is_in_micros() {
        let a = Timeval::new(10, 500_000);
        let b = Timeval::new(10, 0);
        assert_eq!(a.diff_micros(&b), 500_000);
    }

    #[test]
    fn manual_clock_advances() {
        let mut clock = ManualClock(Timeval::from_secs(0));
        clock.advance_secs(5);
        clock.advance_micros(250_000);
        assert_eq!(clock.now(), Timeval::new(5, 250_000));
    }
}
