//! Park: both facilities plus their coordinator tasks, under one shutdown.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admin::spawn_slide_admin;
use crate::clock::SimClock;
use crate::config::ParkConfig;
use crate::error::ConfigError;
use crate::race::{HeatResult, RaceEvent, RaceSnapshot, RaftRace};
use crate::shuttle::spawn_shuttle;
use crate::tower::{LookoutTower, TowerEvent, TowerSnapshot};
use crate::visitor::Visitor;

/// Optional event sinks handed to the facilities at start.
#[derive(Debug, Default)]
pub struct ParkEvents {
    pub race: Option<mpsc::UnboundedSender<RaceEvent>>,
    pub tower: Option<mpsc::UnboundedSender<TowerEvent>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParkSummary {
    pub race: RaceSnapshot,
    pub heats: Vec<HeatResult>,
    pub tower: TowerSnapshot,
}

pub struct Park {
    config: ParkConfig,
    race: Arc<RaftRace>,
    tower: Arc<LookoutTower>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Park {
    /// Build both facilities and spawn the shuttle and the slide
    /// administrator. Must be called from within a tokio runtime.
    pub fn start(config: ParkConfig, events: ParkEvents) -> Result<Self, ConfigError> {
        config.validate()?;
        let clock = SimClock::new(config.clock);

        let mut race = RaftRace::new(config.race.clone(), clock)?;
        if let Some(tx) = events.race {
            race = race.with_events(tx);
        }
        let mut tower = LookoutTower::new(config.tower.clone(), clock)?;
        if let Some(tx) = events.tower {
            tower = tower.with_events(tx);
        }
        let race = Arc::new(race);
        let tower = Arc::new(tower);

        let shutdown = CancellationToken::new();
        let tasks = vec![
            spawn_shuttle(Arc::clone(&race), shutdown.child_token()),
            spawn_slide_admin(Arc::clone(&tower), shutdown.child_token()),
        ];
        tracing::info!(
            competitors = race.total_competitors(),
            stair = config.tower.stair_capacity,
            platform = config.tower.platform_capacity,
            "Park started"
        );

        Ok(Self {
            config,
            race,
            tower,
            shutdown,
            tasks,
        })
    }

    pub fn config(&self) -> &ParkConfig {
        &self.config
    }

    pub fn race(&self) -> Arc<RaftRace> {
        Arc::clone(&self.race)
    }

    pub fn tower(&self) -> Arc<LookoutTower> {
        Arc::clone(&self.tower)
    }

    /// A visitor whose waits are abandoned when the park shuts down.
    pub fn visitor(&self, name: impl Into<String>) -> Visitor {
        Visitor::with_parent(name, &self.shutdown)
    }

    pub fn open(&self) {
        self.race.open();
        self.tower.open();
    }

    pub fn close(&self) {
        self.race.close();
        self.tower.close();
    }

    pub fn summary(&self) -> ParkSummary {
        ParkSummary {
            race: self.race.snapshot(),
            heats: self.race.results(),
            tower: self.tower.snapshot(),
        }
    }

    /// Close both facilities, abandon every pending visitor wait and join
    /// the coordinator tasks.
    pub async fn shutdown(mut self) -> ParkSummary {
        self.close();
        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Coordinator task failed");
            }
        }
        let summary = self.summary();
        tracing::info!(heats = summary.heats.len(), "Park shut down");
        summary
    }
}
