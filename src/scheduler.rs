//! Cooperative timer set driving the agent loop.
//!
//! Time comes from `tokio::time::Instant`, which is monotonic and can be
//! paused and advanced deterministically in tests.

use std::time::Duration;

use tokio::time::{sleep_until, Instant};

/// A repeating deadline.
///
/// Missed periods are skipped rather than replayed, so a long stall (deep
/// sleep, a slow connect) produces one firing and not a burst.
#[derive(Debug, Clone)]
pub struct PeriodicTimer {
    period: Duration,
    next: Instant,
}

impl PeriodicTimer {
    /// First firing at `first`, then every `period`.
    pub fn new(period: Duration, first: Instant) -> Self {
        Self { period, next: first }
    }

    pub fn is_due(&self, now: Instant) -> bool {
        now >= self.next
    }

    pub fn deadline(&self) -> Instant {
        self.next
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Advance to the first deadline strictly after `now`.
    pub fn reschedule(&mut self, now: Instant) {
        while self.next <= now {
            self.next += self.period;
        }
    }
}

/// Timers that fired together.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Due {
    pub sample: bool,
    pub send: bool,
}

impl Due {
    pub fn any(&self) -> bool {
        self.sample || self.send
    }
}

/// Sampling and send-interval timers plus the boot instant.
#[derive(Debug, Clone)]
pub struct Scheduler {
    boot: Instant,
    sample: PeriodicTimer,
    send: PeriodicTimer,
}

impl Scheduler {
    /// Sampling starts immediately; the first send fires one send interval after boot.
    pub fn new(sample_interval: Duration, send_interval: Duration) -> Self {
        let boot = Instant::now();
        Self {
            boot,
            sample: PeriodicTimer::new(sample_interval, boot),
            send: PeriodicTimer::new(send_interval, boot + send_interval),
        }
    }

    /// Milliseconds elapsed since boot.
    pub fn uptime_ms(&self) -> u64 {
        self.boot.elapsed().as_millis() as u64
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Instant {
        self.sample.deadline().min(self.send.deadline())
    }

    pub fn send_due(&self, now: Instant) -> bool {
        self.send.is_due(now)
    }

    /// Collect and reschedule whatever is due at `now`, without waiting.
    pub fn poll(&mut self, now: Instant) -> Due {
        let due = Due {
            sample: self.sample.is_due(now),
            send: self.send.is_due(now),
        };
        if due.sample {
            self.sample.reschedule(now);
        }
        if due.send {
            self.send.reschedule(now);
        }
        due
    }

    /// Sleep until the next deadline and return the timers that fired.
    pub async fn wait(&mut self) -> Due {
        loop {
            sleep_until(self.next_deadline()).await;
            let due = self.poll(Instant::now());
            if due.any() {
                return due;
            }
        }
    }
}
