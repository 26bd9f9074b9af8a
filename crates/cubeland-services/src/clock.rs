//! World clock.
//!
//! A single scalar `current_time` measured in in-world days, advanced by
//! `tick_factor × elapsed_seconds` while at least one player is
//! authenticated and frozen otherwise. Persisted to world-info under
//! [`crate::world::WORLD_TIME_KEY`].

use crate::world::{WorldError, WorldSource, WORLD_TIME_KEY};
use cubeland_core::codec::{decode_payload, encode_payload};
use cubeland_core::proto::time::TimeData;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
struct ClockInner {
    current_time: f64,
    /// Wall-clock instant of the previous step; `None` while paused.
    last_step: Option<Instant>,
}

#[derive(Debug)]
pub struct WorldClock {
    /// In-world days per real second.
    tick_factor: f64,
    inner: Mutex<ClockInner>,
}

impl WorldClock {
    pub fn new(tick_factor: f64) -> Self {
        Self {
            tick_factor,
            inner: Mutex::new(ClockInner {
                current_time: 0.0,
                last_step: None,
            }),
        }
    }

    pub fn tick_factor(&self) -> f64 {
        self.tick_factor
    }

    /// Current world time. Safe to read from any task.
    pub fn now(&self) -> f64 {
        self.lock().current_time
    }

    pub fn set_time(&self, time: f64) {
        self.lock().current_time = time;
    }

    pub fn is_running(&self) -> bool {
        self.lock().last_step.is_some()
    }

    /// Start advancing. Idempotent.
    pub fn resume(&self) {
        let mut inner = self.lock();
        if inner.last_step.is_none() {
            inner.last_step = Some(Instant::now());
        }
    }

    /// Stop advancing, folding in the time elapsed since the last step.
    /// Idempotent.
    pub fn pause(&self) {
        let mut inner = self.lock();
        Self::advance(&mut inner, self.tick_factor);
        inner.last_step = None;
    }

    /// Fold elapsed wall-clock time into `current_time`. No-op while paused.
    pub fn step(&self) {
        let mut inner = self.lock();
        if Self::advance(&mut inner, self.tick_factor) {
            inner.last_step = Some(Instant::now());
        }
    }

    fn advance(inner: &mut ClockInner, tick_factor: f64) -> bool {
        let Some(last) = inner.last_step else {
            return false;
        };
        inner.current_time += tick_factor * last.elapsed().as_secs_f64();
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ClockInner> {
        self.inner.lock().expect("clock lock poisoned")
    }

    /// Load the persisted time, if any was ever saved.
    pub async fn load(&self, world: &dyn WorldSource) -> Result<(), WorldError> {
        let Some(bytes) = world.get_world_info(WORLD_TIME_KEY).await? else {
            return Ok(());
        };
        match decode_payload::<TimeData>(&bytes) {
            Ok(data) => self.set_time(data.time),
            Err(e) => {
                tracing::warn!(error = %e, "persisted world time is corrupt, starting at zero")
            }
        }
        Ok(())
    }

    /// Persist the current time.
    pub async fn save(&self, world: &dyn WorldSource) -> Result<(), WorldError> {
        let data = TimeData { time: self.now() };
        world
            .set_world_info(WORLD_TIME_KEY, encode_payload(&data))
            .await
    }
}
