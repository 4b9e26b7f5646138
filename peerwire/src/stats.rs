use std::time::{Duration, Instant};

// Throughput of one peer in both directions.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputStats {

    // Bytes we sent to the peer.
    pub up: Counter,

    // Bytes we received from the peer.
    pub down: Counter,

}

impl ThroughputStats {

    pub fn new(now: Instant) -> Self {
        Self {
            up: Counter::new(now),
            down: Counter::new(now),
        }
    }

    pub fn refresh(&mut self, now: Instant) {
        self.up.refresh(now);
        self.down.refresh(now);
    }
}

// Byte counter with a rate measured between refreshes.
#[derive(Debug, Clone, Copy)]
pub struct Counter {
    total: u64,
    // Total at the last refresh.
    snapshot: u64,
    last_refresh: Instant,
    // Bytes per second.
    rate: f64,
    peak: f64,
}

impl Counter {

    pub fn new(now: Instant) -> Self {
        Self {
            total: 0,
            snapshot: 0,
            last_refresh: now,
            rate: 0.0,
            peak: 0.0,
        }
    }

    pub fn add(&mut self, n: u64) {
        self.total += n;
    }

    // Recomputes the rate from the bytes counted since the last refresh.
    pub fn refresh(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refresh);
        if elapsed == Duration::ZERO {
            return;
        }
        self.rate = (self.total - self.snapshot) as f64 / elapsed.as_secs_f64();
        if self.rate > self.peak {
            self.peak = self.rate;
        }
        self.snapshot = self.total;
        self.last_refresh = now;
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn peak(&self) -> f64 {
        self.peak
    }

    pub fn total(&self) -> u64 {
        self.total
    }

}

impl std::ops::AddAssign<u64> for Counter {
    fn add_assign(&mut self, n: u64) {
        self.add(n);
    }
}
