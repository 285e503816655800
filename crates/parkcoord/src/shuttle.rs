//! Bag shuttle: a dedicated task carrying bags between start and finish.
//!
//! Cycle: wait at start until the heat leaves → drive → unload at finish →
//! wait until every bag is collected → drive back → ready at start.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::race::RaftRace;

/// Spawn the shuttle for `race`. It runs until `shutdown` fires.
pub fn spawn_shuttle(race: Arc<RaftRace>, shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        run(&race, &shutdown).await;
        tracing::debug!("Shuttle task exiting");
    })
}

async fn run(race: &RaftRace, shutdown: &CancellationToken) {
    let clock = race.clock();
    let travel = race.shuttle_minutes();
    loop {
        if race.await_departure(shutdown).await.is_err() {
            return;
        }

        tracing::debug!("Shuttle carrying bags to the finish");
        tokio::select! {
            _ = clock.sleep_minutes(travel) => {}
            _ = shutdown.cancelled() => return,
        }
        race.arrive_at_finish();

        if race.await_collection(shutdown).await.is_err() {
            return;
        }

        tracing::debug!("Shuttle returning to the start");
        tokio::select! {
            _ = clock.sleep_minutes(travel) => {}
            _ = shutdown.cancelled() => return,
        }
        race.arrive_at_start();
    }
}
