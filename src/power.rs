//! Deep-sleep decisions.

use std::time::Duration;

use tracing::{debug, info};

use crate::config::PowerConfig;
use crate::connectivity::{ConnectivityManager, Radio};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerDecision {
    /// Keep the normal scheduler cadence
    Stay,

    /// Sleep was wanted but a delivery is still in flight
    Deferred,

    /// Power the radio down and suspend for the given duration
    DeepSleep(Duration),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PowerStats {
    pub sleeps: u64,
    pub deferrals: u64,
    pub slept: Duration,
}

pub struct PowerManager {
    deep_sleep: bool,
    duration: Duration,
    stats: PowerStats,
}

impl PowerManager {
    pub fn new(config: &PowerConfig) -> Self {
        Self {
            deep_sleep: config.deep_sleep,
            duration: config.deep_sleep_duration,
            stats: PowerStats::default(),
        }
    }

    /// Decide what to do at the end of a cycle.
    ///
    /// Sleep is only chosen when it is enabled, the delivery pipeline is idle,
    /// and no send interval is already due. The agent calls this after
    /// `run_tick` has returned, so from there `delivery_idle` is always true.
    pub fn decide(&mut self, delivery_idle: bool, send_due: bool) -> PowerDecision {
        if !self.deep_sleep {
            return PowerDecision::Stay;
        }
        if !delivery_idle {
            self.stats.deferrals += 1;
            debug!("Deep sleep deferred until delivery completes");
            return PowerDecision::Deferred;
        }
        if send_due {
            return PowerDecision::Stay;
        }
        PowerDecision::DeepSleep(self.duration)
    }

    /// Disconnect the radio, then suspend for `duration`.
    pub async fn enter_sleep<R: Radio>(
        &mut self,
        link: &mut ConnectivityManager<R>,
        duration: Duration,
    ) {
        link.disconnect().await;
        info!(duration_ms = duration.as_millis() as u64, "Entering deep sleep");
        tokio::time::sleep(duration).await;
        self.stats.sleeps += 1;
        self.stats.slept += duration;
        debug!("Woke from deep sleep");
    }

    pub fn stats(&self) -> &PowerStats {
        &self.stats
    }
}
