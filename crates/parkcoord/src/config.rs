//! Facility configuration.
//!
//! Durations are given in simulated minutes (or hours) and scaled to real
//! time by the [`SimClock`](crate::clock::SimClock).

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Real milliseconds per simulated minute.
    pub minute_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self { minute_ms: 10 }
    }
}

impl ClockConfig {
    pub fn with_minute_ms(mut self, minute_ms: u64) -> Self {
        self.minute_ms = minute_ms;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.minute_ms == 0 {
            return Err(ConfigError::Zero { field: "minute_ms" });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    pub individual_rafts: usize,
    pub shared_rafts: usize,
    pub train_capacity: usize,
    pub train_minutes: u64,
    pub bike_minutes: u64,
    pub race_minutes: u64,
    pub shuttle_minutes: u64,
    /// How long the start waits for a full field before a partial launch.
    pub start_timeout_hours: u64,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            individual_rafts: 1,
            shared_rafts: 1,
            train_capacity: 15,
            train_minutes: 3,
            bike_minutes: 5,
            race_minutes: 4,
            shuttle_minutes: 2,
            start_timeout_hours: 2,
        }
    }
}

impl RaceConfig {
    pub fn with_rafts(mut self, individual: usize, shared: usize) -> Self {
        self.individual_rafts = individual;
        self.shared_rafts = shared;
        self
    }

    pub fn with_train_capacity(mut self, capacity: usize) -> Self {
        self.train_capacity = capacity;
        self
    }

    /// Minutes to the start by train and by bike.
    pub fn with_travel_minutes(mut self, train: u64, bike: u64) -> Self {
        self.train_minutes = train;
        self.bike_minutes = bike;
        self
    }

    pub fn with_race_minutes(mut self, minutes: u64) -> Self {
        self.race_minutes = minutes;
        self
    }

    pub fn with_shuttle_minutes(mut self, minutes: u64) -> Self {
        self.shuttle_minutes = minutes;
        self
    }

    pub fn with_start_timeout_hours(mut self, hours: u64) -> Self {
        self.start_timeout_hours = hours;
        self
    }

    /// Seats across every raft: one per individual raft, two per shared raft.
    pub fn total_competitors(&self) -> usize {
        self.individual_rafts + 2 * self.shared_rafts
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.individual_rafts + self.shared_rafts == 0 {
            return Err(ConfigError::NoRafts);
        }
        if self.train_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "train_capacity",
            });
        }
        if self.start_timeout_hours == 0 {
            return Err(ConfigError::Zero {
                field: "start_timeout_hours",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TowerConfig {
    pub stair_capacity: usize,
    pub platform_capacity: usize,
    pub climb_minutes: u64,
    pub view_minutes: u64,
    pub slide_minutes: u64,
}

impl Default for TowerConfig {
    fn default() -> Self {
        Self {
            stair_capacity: 5,
            platform_capacity: 3,
            climb_minutes: 10,
            view_minutes: 15,
            slide_minutes: 3,
        }
    }
}

impl TowerConfig {
    pub fn with_stair_capacity(mut self, capacity: usize) -> Self {
        self.stair_capacity = capacity;
        self
    }

    pub fn with_platform_capacity(mut self, capacity: usize) -> Self {
        self.platform_capacity = capacity;
        self
    }

    pub fn with_slide_minutes(mut self, minutes: u64) -> Self {
        self.slide_minutes = minutes;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.stair_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "stair_capacity",
            });
        }
        if self.platform_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "platform_capacity",
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParkConfig {
    pub clock: ClockConfig,
    pub race: RaceConfig,
    pub tower: TowerConfig,
}

impl ParkConfig {
    pub fn with_clock(mut self, clock: ClockConfig) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_race(mut self, race: RaceConfig) -> Self {
        self.race = race;
        self
    }

    pub fn with_tower(mut self, tower: TowerConfig) -> Self {
        self.tower = tower;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.clock.validate()?;
        self.race.validate()?;
        self.tower.validate()
    }
}
