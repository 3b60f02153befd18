//! Spike override table.
//!
//! The only state shared between the tick loop and the outside world. Every
//! read and write takes the lock; nothing else happens while it is held.

use crate::domain::errors::ConfigError;
use crate::domain::ports::MultiplierSource;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;

#[derive(Debug, Clone, Copy)]
struct Spike {
    multiplier: f64,
    expires_at: Option<Instant>,
}

impl Spike {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// One active override, as reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActiveSpike {
    pub metric: String,
    pub multiplier: f64,
    pub remaining_s: Option<f64>,
}

/// Cloneable handle; clones share the table.
#[derive(Debug, Clone, Default)]
pub struct SpikeTable {
    inner: Arc<Mutex<HashMap<String, Spike>>>,
}

impl SpikeTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Spike>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers or replaces the override for `metric`. `None` means it stays
    /// until cleared.
    pub fn set(
        &self,
        metric: &str,
        multiplier: f64,
        duration: Option<Duration>,
    ) -> Result<(), ConfigError> {
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(ConfigError::InvalidParameter {
                metric: metric.to_string(),
                param: "multiplier",
                reason: "must be finite and >= 0".to_string(),
            });
        }
        let spike = Spike {
            multiplier,
            expires_at: duration.map(|d| Instant::now() + d),
        };
        self.lock().insert(metric.to_string(), spike);
        match duration {
            Some(d) => info!(
                "SpikeTable: spike registered on {} (x{} for {}s)",
                metric,
                multiplier,
                d.as_secs_f64()
            ),
            None => info!("SpikeTable: spike registered on {} (x{})", metric, multiplier),
        }
        Ok(())
    }

    /// Returns whether an override was present.
    pub fn clear(&self, metric: &str) -> bool {
        let removed = self.lock().remove(metric).is_some();
        if removed {
            info!("SpikeTable: spike cleared on {}", metric);
        }
        removed
    }

    pub fn clear_all(&self) {
        self.lock().clear();
    }

    /// Unexpired overrides, sorted by metric name.
    pub fn active(&self) -> Vec<ActiveSpike> {
        let now = Instant::now();
        let mut active: Vec<ActiveSpike> = self
            .lock()
            .iter()
            .filter(|(_, spike)| !spike.is_expired(now))
            .map(|(metric, spike)| ActiveSpike {
                metric: metric.clone(),
                multiplier: spike.multiplier,
                remaining_s: spike
                    .expires_at
                    .map(|at| at.saturating_duration_since(now).as_secs_f64()),
            })
            .collect();
        active.sort_by(|a, b| a.metric.cmp(&b.metric));
        active
    }
}

impl MultiplierSource for SpikeTable {
    fn current_multiplier(&self, metric: &str) -> f64 {
        let now = Instant::now();
        let mut table = self.lock();
        match table.get(metric).copied() {
            Some(spike) if spike.is_expired(now) => {
                table.remove(metric);
                drop(table);
                info!("SpikeTable: spike expired on {}", metric);
                1.0
            }
            Some(spike) => spike.multiplier,
            None => 1.0,
        }
    }
}
