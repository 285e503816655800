//! Raft race: mass start at a rendezvous barrier, bag shuttle hand-off and
//! winner bookkeeping.
//!
//! Competitor flow: enter → go to start → deposit bag → board raft →
//! compete → finish → retrieve bag. The shuttle task (see [`crate::shuttle`])
//! drives the bag through the four [`BagPhase`]s in strict order.

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::barrier::{BarrierWaitResult, Release, RendezvousBarrier};
use crate::clock::SimClock;
use crate::config::RaceConfig;
use crate::error::{ConfigError, ParkError, Result};
use crate::raft::{RaftHandle, RaftId, RaftPool};
use crate::sync::Monitor;
use crate::train::Train;
use crate::visitor::Visitor;

/// Where the bag shuttle is, and so what competitors may do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BagPhase {
    /// Shuttle at the start taking bags; boarding allowed.
    #[default]
    AtStart,
    /// Heat launched, shuttle driving bags to the finish.
    InTransit,
    /// Bags waiting at the finish for their owners.
    AtFinish,
    /// All bags collected, shuttle driving back.
    Returning,
}

impl BagPhase {
    pub fn next(&self) -> BagPhase {
        match self {
            BagPhase::AtStart => BagPhase::InTransit,
            BagPhase::InTransit => BagPhase::AtFinish,
            BagPhase::AtFinish => BagPhase::Returning,
            BagPhase::Returning => BagPhase::AtStart,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BagPhase::AtStart => "at_start",
            BagPhase::InTransit => "in_transit",
            BagPhase::AtFinish => "at_finish",
            BagPhase::Returning => "returning",
        }
    }
}

/// How a competitor's finish ranked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// First finisher of the heat.
    Winner,
    /// Teammate on the winning shared raft.
    WinningCrew,
    Finished,
}

/// A competitor who made it off the start line.
#[derive(Debug)]
pub struct RaceEntry {
    seat: RaftHandle,
    heat: u64,
    launch: BarrierWaitResult,
}

impl RaceEntry {
    pub fn raft(&self) -> RaftId {
        self.seat.id()
    }

    pub fn heat(&self) -> u64 {
        self.heat
    }

    pub fn launch(&self) -> BarrierWaitResult {
        self.launch
    }
}

/// Outcome of one heat.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HeatResult {
    pub heat: u64,
    /// Competitors that left the start in this heat.
    pub launched: usize,
    /// Launched by a start timeout rather than a full field.
    pub partial: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winning_raft: Option<RaftId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<String>,
    pub finishers: usize,
    /// When the heat left the start (ISO 8601 format).
    pub started_at: String,
    /// When the last competitor finished (ISO 8601 format).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
}

impl HeatResult {
    fn starting(heat: u64) -> Self {
        Self {
            heat,
            launched: 0,
            partial: false,
            winning_raft: None,
            winner: None,
            finishers: 0,
            started_at: chrono::Utc::now().to_rfc3339(),
            finished_at: None,
        }
    }
}

/// State changes, emitted under the race lock in the order they happen.
#[derive(Debug, Clone, PartialEq)]
pub enum RaceEvent {
    PhaseChanged { from: BagPhase, to: BagPhase },
    HeatStarted { heat: u64 },
    Finished {
        heat: u64,
        visitor: String,
        raft: RaftId,
        placement: Placement,
    },
    HeatCompleted(HeatResult),
}

/// Snapshot of race coordination state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RaceSnapshot {
    pub open: bool,
    pub bag_phase: BagPhase,
    pub competitors_joined: usize,
    pub total_competitors: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<RaftId>,
    pub heats: u64,
    pub bags_to_collect: usize,
    pub seats_available: usize,
}

#[derive(Debug, Default)]
struct RaceState {
    open: bool,
    competitors_joined: usize,
    /// Bags that left the start and have not been picked up.
    bags_to_collect: usize,
    winner: Option<RaftId>,
    bag_phase: BagPhase,
    heat: u64,
    current: Option<HeatResult>,
    results: Vec<HeatResult>,
}

pub struct RaftRace {
    config: RaceConfig,
    clock: SimClock,
    train: Train,
    rafts: RaftPool,
    start: RendezvousBarrier,
    state: Monitor<RaceState>,
    /// Bag phase changed or a seat was freed.
    changed: Notify,
    events: Option<mpsc::UnboundedSender<RaceEvent>>,
}

impl RaftRace {
    pub fn new(config: RaceConfig, clock: SimClock) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let total = config.total_competitors();
        Ok(Self {
            train: Train::new(config.train_capacity, config.train_minutes, clock),
            rafts: RaftPool::new(config.individual_rafts, config.shared_rafts),
            start: RendezvousBarrier::new(total),
            state: Monitor::new(RaceState::default()),
            changed: Notify::new(),
            events: None,
            config,
            clock,
        })
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<RaceEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn total_competitors(&self) -> usize {
        self.start.parties()
    }

    pub fn clock(&self) -> SimClock {
        self.clock
    }

    pub(crate) fn shuttle_minutes(&self) -> u64 {
        self.config.shuttle_minutes
    }

    pub fn open(&self) {
        self.train.open();
        self.state.lock().open = true;
        tracing::info!("Raft race open");
    }

    pub fn close(&self) {
        self.train.close();
        self.state.lock().open = false;
        tracing::info!("Raft race closed");
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Admission is a pure open check; the race has no queue of its own.
    pub fn enter(&self, visitor: &Visitor) -> bool {
        let open = self.is_open();
        tracing::debug!(%visitor, open, "Entering raft race");
        open
    }

    /// Ride the train to the start, or cycle there if it is full.
    pub async fn go_to_start(&self, visitor: &Visitor) {
        match self.train.try_board() {
            Some(seat) => {
                tracing::debug!(%visitor, "Riding the train to the start");
                seat.disembark().await;
            }
            None => {
                tracing::debug!(%visitor, "Cycling to the start");
                self.clock.sleep_minutes(self.config.bike_minutes).await;
            }
        }
    }

    /// Checkpoint: wait until the shuttle is at the start to take the bag.
    pub async fn deposit_bag(&self, visitor: &Visitor) -> Result<()> {
        self.state
            .wait_until(&self.changed, visitor.cancel_token(), |s| {
                (s.bag_phase == BagPhase::AtStart).then_some(())
            })
            .await?;
        tracing::debug!(%visitor, "Bag deposited");
        Ok(())
    }

    /// Wait for a free seat on any raft while the shuttle is at the start.
    ///
    /// Late entrants wait here for the next heat instead of boarding a race
    /// that already left.
    pub async fn board_any_raft(&self, visitor: &Visitor) -> Result<RaftHandle> {
        let seat = self
            .state
            .wait_until(&self.changed, visitor.cancel_token(), |s| {
                if s.bag_phase == BagPhase::AtStart {
                    self.rafts.try_board_any()
                } else {
                    None
                }
            })
            .await?;
        tracing::debug!(%visitor, raft = %seat.id(), kind = ?seat.kind(), "Boarded raft");
        Ok(seat)
    }

    /// Board without waiting.
    pub fn try_board_any_raft(&self, visitor: &Visitor) -> Result<RaftHandle> {
        let state = self.state.lock();
        if state.bag_phase != BagPhase::AtStart {
            return Err(ParkError::RaceUnderway);
        }
        let seat = self.rafts.try_board_any().ok_or(ParkError::Full)?;
        tracing::debug!(%visitor, raft = %seat.id(), "Boarded raft");
        Ok(seat)
    }

    /// Wait at the start line, then race.
    ///
    /// The whole launched group is counted in by whoever releases it, before
    /// any member can race, so a heat's roster is fixed at the start. If the
    /// visitor abandons at the line, the seat is handed back.
    pub async fn compete(&self, visitor: &Visitor, seat: RaftHandle) -> Result<RaceEntry> {
        tracing::debug!(%visitor, raft = %seat.id(), "Waiting at the start line");
        let timeout = self.clock.hours(self.config.start_timeout_hours);
        let launch = match self
            .start
            .wait_with(timeout, visitor.cancel_token(), |release| {
                self.launch_group(release)
            })
            .await
        {
            Ok(launch) => launch,
            Err(e) => {
                tracing::info!(%visitor, "Left the start line before launch");
                drop(seat);
                self.changed.notify_waiters();
                return Err(e);
            }
        };

        // No later heat can open until this competitor finishes.
        let heat = self.state.lock().heat;

        tracing::info!(%visitor, raft = %seat.id(), heat, ?launch, "Racing");
        self.clock.sleep_minutes(self.config.race_minutes).await;

        Ok(RaceEntry { seat, heat, launch })
    }

    /// Count a released group in as one unit. Runs under the barrier lock.
    ///
    /// The group that leaves while the shuttle waits at the start sends it
    /// away with the bags. A group that finds a heat still running joins it.
    fn launch_group(&self, release: Release) {
        let mut state = self.state.lock();
        state.competitors_joined += release.group;
        state.bags_to_collect += release.group;
        debug_assert!(state.competitors_joined <= self.total_competitors());
        if state.bag_phase == BagPhase::AtStart {
            self.advance(&mut state, BagPhase::AtStart);
        }
        if state.current.is_none() {
            state.heat += 1;
            state.current = Some(HeatResult::starting(state.heat));
            self.emit(RaceEvent::HeatStarted { heat: state.heat });
        }
        if let Some(current) = state.current.as_mut() {
            current.launched += release.group;
            current.partial |= release.partial;
        }
        tracing::debug!(
            group = release.group,
            partial = release.partial,
            heat = state.heat,
            "Group launched"
        );
        self.changed.notify_waiters();
    }

    /// Cross the finish line and leave the raft.
    ///
    /// The first call of a heat to find no winner claims it. The last
    /// finisher clears the winner for the next heat.
    pub fn finish_race(&self, visitor: &Visitor, entry: RaceEntry) -> Placement {
        let raft = entry.raft();
        let mut state = self.state.lock();

        let placement = match state.winner {
            None => {
                state.winner = Some(raft);
                if let Some(current) = state.current.as_mut() {
                    current.winning_raft = Some(raft);
                    current.winner = Some(visitor.name().to_string());
                }
                Placement::Winner
            }
            Some(winner) if winner == raft => Placement::WinningCrew,
            Some(_) => Placement::Finished,
        };
        match placement {
            Placement::Winner => tracing::info!(%visitor, %raft, heat = entry.heat, "Won the heat"),
            _ => tracing::info!(%visitor, %raft, heat = entry.heat, ?placement, "Finished"),
        }
        self.emit(RaceEvent::Finished {
            heat: entry.heat,
            visitor: visitor.name().to_string(),
            raft,
            placement,
        });

        drop(entry);
        if let Some(current) = state.current.as_mut() {
            current.finishers += 1;
        }
        state.competitors_joined = match state.competitors_joined.checked_sub(1) {
            Some(n) => n,
            None => {
                debug_assert!(false, "finish with no competitors racing");
                tracing::error!(%visitor, "Bug: finish with no competitors racing");
                0
            }
        };
        if state.competitors_joined == 0 {
            state.winner = None;
            if let Some(mut result) = state.current.take() {
                result.finished_at = Some(chrono::Utc::now().to_rfc3339());
                self.emit(RaceEvent::HeatCompleted(result.clone()));
                state.results.push(result);
            }
        }
        self.changed.notify_waiters();
        placement
    }

    /// Wait for the bags at the finish and pick this visitor's up. The last
    /// pickup sends the shuttle back to the start.
    pub async fn retrieve_bag(&self, visitor: &Visitor) -> Result<()> {
        let result = self
            .state
            .wait_until(&self.changed, visitor.cancel_token(), |s| {
                (s.bag_phase == BagPhase::AtFinish).then(|| self.collect_bag(s))
            })
            .await;

        if let Err(ParkError::Abandoned) = result {
            // The bag is left behind; stop counting it so the shuttle can go.
            let mut state = self.state.lock();
            state.bags_to_collect = state.bags_to_collect.saturating_sub(1);
            self.release_shuttle_if_collected(&mut state);
            tracing::info!(%visitor, "Left without collecting bag");
            return result;
        }
        tracing::debug!(%visitor, "Bag collected");
        result
    }

    fn collect_bag(&self, state: &mut RaceState) {
        state.bags_to_collect = state.bags_to_collect.saturating_sub(1);
        self.release_shuttle_if_collected(state);
    }

    fn release_shuttle_if_collected(&self, state: &mut RaceState) {
        if state.bag_phase == BagPhase::AtFinish
            && state.competitors_joined == 0
            && state.bags_to_collect == 0
        {
            self.advance(state, BagPhase::AtFinish);
            self.changed.notify_waiters();
        }
    }

    pub fn exit(&self, visitor: &Visitor) {
        tracing::info!(%visitor, "Left the raft race");
    }

    /// Shuttle side: wait at the start until the heat leaves.
    pub(crate) async fn await_departure(&self, cancel: &CancellationToken) -> Result<()> {
        tracing::debug!("Shuttle at the start");
        self.state
            .wait_until(&self.changed, cancel, |s| {
                (s.bag_phase != BagPhase::AtStart).then_some(())
            })
            .await
    }

    /// Shuttle side: bags unloaded at the finish.
    pub(crate) fn arrive_at_finish(&self) {
        let mut state = self.state.lock();
        self.advance(&mut state, BagPhase::InTransit);
        self.changed.notify_waiters();
        // Every owner may already have given up on their bag.
        self.release_shuttle_if_collected(&mut state);
    }

    /// Shuttle side: wait at the finish until every bag is collected.
    pub(crate) async fn await_collection(&self, cancel: &CancellationToken) -> Result<()> {
        self.state
            .wait_until(&self.changed, cancel, |s| {
                (s.bag_phase != BagPhase::AtFinish).then_some(())
            })
            .await
    }

    /// Shuttle side: back at the start, ready for the next heat's bags.
    pub(crate) fn arrive_at_start(&self) {
        let mut state = self.state.lock();
        self.advance(&mut state, BagPhase::Returning);
        self.changed.notify_waiters();
    }

    /// Move the bag phase one step forward from `from`.
    fn advance(&self, state: &mut RaceState, from: BagPhase) -> bool {
        if state.bag_phase != from {
            debug_assert!(false, "bag phase {:?} expected {:?}", state.bag_phase, from);
            tracing::error!(
                phase = state.bag_phase.as_str(),
                expected = from.as_str(),
                "Bug: out-of-order bag phase transition"
            );
            return false;
        }
        let to = from.next();
        state.bag_phase = to;
        tracing::info!(from = from.as_str(), to = to.as_str(), heat = state.heat, "Bag phase");
        self.emit(RaceEvent::PhaseChanged { from, to });
        true
    }

    fn emit(&self, event: RaceEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub fn snapshot(&self) -> RaceSnapshot {
        let state = self.state.lock();
        RaceSnapshot {
            open: state.open,
            bag_phase: state.bag_phase,
            competitors_joined: state.competitors_joined,
            total_competitors: self.total_competitors(),
            winner: state.winner,
            heats: state.heat,
            bags_to_collect: state.bags_to_collect,
            seats_available: self.rafts.available(),
        }
    }

    /// Completed heats, oldest first.
    pub fn results(&self) -> Vec<HeatResult> {
        self.state.lock().results.clone()
    }

    /// Full competitor visit. `Ok(None)` if the race is closed.
    pub async fn visit(&self, visitor: &Visitor) -> Result<Option<Placement>> {
        if !self.enter(visitor) {
            return Ok(None);
        }
        self.go_to_start(visitor).await;
        self.deposit_bag(visitor).await?;
        let seat = self.board_any_raft(visitor).await?;
        let entry = self.compete(visitor, seat).await?;
        let placement = self.finish_race(visitor, entry);
        self.retrieve_bag(visitor).await?;
        self.exit(visitor);
        Ok(Some(placement))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;
    use tokio::task::JoinHandle;
    use tokio::time::Instant;

    use super::*;
    use crate::config::ClockConfig;
    use crate::shuttle::spawn_shuttle;

    const GUARD: Duration = Duration::from_secs(7 * 24 * 3600);

    fn clock() -> SimClock {
        SimClock::new(ClockConfig::default().with_minute_ms(1000))
    }

    fn open_race(
        config: RaceConfig,
    ) -> (Arc<RaftRace>, mpsc::UnboundedReceiver<RaceEvent>, CancellationToken) {
        let (tx, rx) = mpsc::unbounded_channel();
        let race = Arc::new(RaftRace::new(config, clock()).unwrap().with_events(tx));
        race.open();
        let shutdown = CancellationToken::new();
        spawn_shuttle(Arc::clone(&race), shutdown.clone());
        (race, rx, shutdown)
    }

    fn spawn_visitors(
        race: &Arc<RaftRace>,
        names: std::ops::Range<usize>,
    ) -> Vec<JoinHandle<Result<Option<Placement>>>> {
        names
            .map(|i| {
                let race = Arc::clone(race);
                tokio::spawn(async move { race.visit(&Visitor::new(format!("V{i}"))).await })
            })
            .collect()
    }

    async fn placements(handles: Vec<JoinHandle<Result<Option<Placement>>>>) -> Vec<Placement> {
        tokio::time::timeout(GUARD, join_all(handles))
            .await
            .expect("visitors never finished")
            .into_iter()
            .map(|r| r.unwrap().unwrap().expect("race was closed"))
            .collect()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RaceEvent>) -> Vec<RaceEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn bag_phase_cycles_in_order() {
        let mut phase = BagPhase::default();
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(phase);
            phase = phase.next();
        }
        assert_eq!(phase, BagPhase::AtStart);
        insta::assert_json_snapshot!(seen, @r###"
        [
          "AT_START",
          "IN_TRANSIT",
          "AT_FINISH",
          "RETURNING"
        ]
        "###);
    }

    #[tokio::test(start_paused = true)]
    async fn three_competitors_start_together_with_one_winner() {
        let (race, mut rx, shutdown) = open_race(RaceConfig::default());
        assert_eq!(race.total_competitors(), 3);

        let placements = placements(spawn_visitors(&race, 0..3)).await;
        let winners = placements
            .iter()
            .filter(|p| **p == Placement::Winner)
            .count();
        assert_eq!(winners, 1);

        let snapshot = race.snapshot();
        assert_eq!(snapshot.winner, None);
        assert_eq!(snapshot.competitors_joined, 0);
        assert_eq!(snapshot.seats_available, 3);

        let results = race.results();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].launched, 3);
        assert_eq!(results[0].finishers, 3);
        assert!(!results[0].partial);
        assert!(results[0].winner.is_some());

        let started = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, RaceEvent::HeatStarted { .. }))
            .count();
        assert_eq!(started, 1);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn short_field_launches_after_start_timeout() {
        let config = RaceConfig::default()
            .with_rafts(1, 2)
            .with_start_timeout_hours(2);
        let (race, _rx, shutdown) = open_race(config);
        assert_eq!(race.total_competitors(), 5);

        let begin = Instant::now();
        let placements = placements(spawn_visitors(&race, 0..3)).await;
        assert!(begin.elapsed() >= clock().hours(2));
        assert_eq!(placements.len(), 3);

        let results = race.results();
        assert_eq!(results.len(), 1);
        assert!(results[0].partial);
        assert_eq!(results[0].launched, 3);
        assert_eq!(race.snapshot().competitors_joined, 0);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn shuttle_cycles_every_phase_each_heat() {
        let (race, mut rx, shutdown) = open_race(RaceConfig::default());

        let placements = placements(spawn_visitors(&race, 0..6)).await;
        assert_eq!(placements.len(), 6);
        // Let the shuttle drive back after the second heat.
        tokio::time::sleep(clock().minutes(race.shuttle_minutes() + 1)).await;
        assert_eq!(race.snapshot().bag_phase, BagPhase::AtStart);

        let events = drain(&mut rx);
        let transitions: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                RaceEvent::PhaseChanged { from, to } => Some((*from, *to)),
                _ => None,
            })
            .collect();
        assert_eq!(transitions.len(), 8);
        assert_eq!(transitions[0].0, BagPhase::AtStart);
        for (i, (from, to)) in transitions.iter().enumerate() {
            assert_eq!(*to, from.next());
            if let Some((next_from, _)) = transitions.get(i + 1) {
                assert_eq!(next_from, to);
            }
        }

        let winners = events
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    RaceEvent::Finished {
                        placement: Placement::Winner,
                        ..
                    }
                )
            })
            .count();
        assert_eq!(winners, 2);

        let results = race.results();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.launched == 3 && !r.partial));
        assert_eq!(results[1].heat, 2);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn instant_heats_keep_one_winner_each() {
        // Nothing takes simulated time, so finishers race their group-mates
        // to the lock.
        let config = RaceConfig::default()
            .with_train_capacity(1)
            .with_travel_minutes(0, 0)
            .with_race_minutes(0)
            .with_shuttle_minutes(0);
        let (race, mut rx, shutdown) = open_race(config);

        let placements = placements(spawn_visitors(&race, 0..6)).await;
        assert_eq!(placements.len(), 6);
        let winners = placements
            .iter()
            .filter(|p| **p == Placement::Winner)
            .count();
        assert_eq!(winners, 2);

        let results = race.results();
        assert_eq!(results.len(), 2);
        for result in &results {
            assert_eq!(result.launched, 3);
            assert_eq!(result.finishers, 3);
            assert!(!result.partial);
            assert!(result.winner.is_some());
        }

        let mut winners_per_heat = std::collections::BTreeMap::new();
        for event in drain(&mut rx) {
            if let RaceEvent::Finished {
                heat,
                placement: Placement::Winner,
                ..
            } = event
            {
                *winners_per_heat.entry(heat).or_insert(0) += 1;
            }
        }
        assert_eq!(
            winners_per_heat.into_iter().collect::<Vec<_>>(),
            vec![(1, 1), (2, 1)]
        );

        let snapshot = race.snapshot();
        assert_eq!(snapshot.competitors_joined, 0);
        assert_eq!(snapshot.bags_to_collect, 0);
        assert_eq!(snapshot.winner, None);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn late_entrant_waits_for_the_next_heat() {
        let race = Arc::new(RaftRace::new(RaceConfig::default().with_rafts(1, 0), clock()).unwrap());
        race.open();
        let first = Visitor::new("first");
        let late = Visitor::new("late");

        let seat = race.board_any_raft(&first).await.unwrap();
        let entry = race.compete(&first, seat).await.unwrap();
        assert_eq!(entry.heat(), 1);
        assert_eq!(race.snapshot().bag_phase, BagPhase::InTransit);

        let boarding = {
            let race = Arc::clone(&race);
            let late = late.clone();
            tokio::spawn(async move { race.board_any_raft(&late).await })
        };
        tokio::task::yield_now().await;
        assert!(!boarding.is_finished());

        // The seat is free again but the heat is still out.
        assert_eq!(race.finish_race(&first, entry), Placement::Winner);
        assert_eq!(race.snapshot().seats_available, 1);
        race.arrive_at_finish();
        tokio::task::yield_now().await;
        assert!(!boarding.is_finished());

        race.retrieve_bag(&first).await.unwrap();
        assert_eq!(race.snapshot().bag_phase, BagPhase::Returning);
        tokio::task::yield_now().await;
        assert!(!boarding.is_finished());

        race.arrive_at_start();
        let seat = tokio::time::timeout(Duration::from_secs(1), boarding)
            .await
            .expect("late entrant never boarded")
            .unwrap()
            .unwrap();
        let entry = race.compete(&late, seat).await.unwrap();
        assert_eq!(entry.heat(), 2);
        assert_eq!(race.finish_race(&late, entry), Placement::Winner);
        assert_eq!(race.results().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn boarding_is_refused_once_the_heat_has_left() {
        let race = RaftRace::new(RaceConfig::default().with_rafts(1, 0), clock()).unwrap();
        race.open();
        let first = Visitor::new("first");
        let late = Visitor::new("late");

        let seat = race.try_board_any_raft(&first).unwrap();
        assert_eq!(race.try_board_any_raft(&late).unwrap_err(), ParkError::Full);

        let entry = race.compete(&first, seat).await.unwrap();
        assert_eq!(entry.launch(), BarrierWaitResult::Tripped { leader: true });
        assert_eq!(race.snapshot().bag_phase, BagPhase::InTransit);
        assert_eq!(
            race.try_board_any_raft(&late).unwrap_err(),
            ParkError::RaceUnderway
        );

        assert_eq!(race.finish_race(&first, entry), Placement::Winner);
        assert_eq!(
            race.try_board_any_raft(&late).unwrap_err(),
            ParkError::RaceUnderway
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shared_raft_crew_shares_the_win() {
        let race = Arc::new(RaftRace::new(RaceConfig::default().with_rafts(0, 1), clock()).unwrap());
        race.open();
        let a = Visitor::new("a");
        let b = Visitor::new("b");

        let seat_a = race.board_any_raft(&a).await.unwrap();
        let seat_b = race.board_any_raft(&b).await.unwrap();
        assert_eq!(seat_a.id(), seat_b.id());

        let (entry_a, entry_b) = tokio::join!(race.compete(&a, seat_a), race.compete(&b, seat_b));
        assert_eq!(race.finish_race(&a, entry_a.unwrap()), Placement::Winner);
        assert_eq!(race.snapshot().winner.map(|r| r.index()), Some(0));
        assert_eq!(race.finish_race(&b, entry_b.unwrap()), Placement::WinningCrew);
        assert_eq!(race.snapshot().winner, None);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoning_the_start_line_returns_the_seat() {
        let race = Arc::new(RaftRace::new(RaceConfig::default().with_rafts(0, 1), clock()).unwrap());
        race.open();
        let visitor = Visitor::new("quitter");

        let seat = race.board_any_raft(&visitor).await.unwrap();
        assert_eq!(race.snapshot().seats_available, 1);

        let waiter = {
            let race = Arc::clone(&race);
            let visitor = visitor.clone();
            tokio::spawn(async move { race.compete(&visitor, seat).await.map(|_| ()) })
        };
        tokio::task::yield_now().await;
        visitor.abandon();

        assert_eq!(waiter.await.unwrap(), Err(ParkError::Abandoned));
        let snapshot = race.snapshot();
        assert_eq!(snapshot.seats_available, 2);
        assert_eq!(snapshot.competitors_joined, 0);
        assert_eq!(snapshot.bag_phase, BagPhase::AtStart);
    }

    #[tokio::test]
    async fn closed_race_turns_visitors_away() {
        let race = RaftRace::new(RaceConfig::default(), clock()).unwrap();
        assert_eq!(race.visit(&Visitor::new("early")).await, Ok(None));
    }

    #[test]
    fn fresh_race_snapshot() {
        let race = RaftRace::new(RaceConfig::default(), clock()).unwrap();
        race.open();
        insta::assert_json_snapshot!(race.snapshot(), @r###"
        {
          "open": true,
          "bag_phase": "AT_START",
          "competitors_joined": 0,
          "total_competitors": 3,
          "heats": 0,
          "bags_to_collect": 0,
          "seats_available": 3
        }
        "###);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let result = RaftRace::new(RaceConfig::default().with_rafts(0, 0), clock());
        assert!(matches!(result, Err(ConfigError::NoRafts)));
    }
}
