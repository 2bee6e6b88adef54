//! Minimum-duration pacing for orchestrator stages
//!
//! Viewer pages animate between stages, so each stage broadcast is held
//! back until a floor duration has elapsed since the stage started. Built
//! on `tokio::time` so paused-clock tests control it.

use std::time::Duration;

use tokio::time::Instant;

use crate::config::PacingConfig;

/// Per-stage minimum durations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageFloors {
    pub description: Duration,
    pub generation: Duration,
}

impl StageFloors {
    /// No holds at all
    pub const fn none() -> Self {
        Self {
            description: Duration::ZERO,
            generation: Duration::ZERO,
        }
    }
}

impl From<&PacingConfig> for StageFloors {
    fn from(config: &PacingConfig) -> Self {
        Self {
            description: Duration::from_millis(config.description_floor_ms),
            generation: Duration::from_millis(config.generation_floor_ms),
        }
    }
}

/// Started at the beginning of a stage
#[derive(Debug, Clone, Copy)]
pub struct StageTimer {
    started: Instant,
}

impl StageTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Sleep until `floor` has elapsed since `start()`.
    ///
    /// Returns how long it actually held (zero when the stage already ran
    /// past the floor).
    pub async fn hold_until(&self, floor: Duration) -> Duration {
        let remaining = floor.saturating_sub(self.elapsed());
        if !remaining.is_zero() {
            tokio::time::sleep_until(self.started + floor).await;
        }
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_hold_covers_remaining_floor() {
        let timer = StageTimer::start();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let held = timer.hold_until(Duration::from_millis(10_000)).await;
        assert_eq!(held, Duration::from_millis(9_990));
        assert!(timer.elapsed() >= Duration::from_millis(10_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_hold_past_floor() {
        let timer = StageTimer::start();
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(timer.hold_until(Duration::from_secs(5)).await, Duration::ZERO);
    }

    #[test]
    fn test_floors_from_config() {
        let floors = StageFloors::from(&PacingConfig {
            description_floor_ms: 10_000,
            generation_floor_ms: 5_000,
        });
        assert_eq!(floors.description, Duration::from_secs(10));
        assert_eq!(floors.generation, Duration::from_secs(5));
        assert_eq!(StageFloors::none(), StageFloors::default());
    }
}
