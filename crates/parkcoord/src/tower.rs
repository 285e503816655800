//! Lookout tower: staircase and viewing platform gates, then one of two
//! single-rider slides assigned by the slide administrator.
//!
//! Assignment (which slide a rider takes) is separate from occupancy (whether
//! the slide is empty). The administrator holds at most one unconsumed
//! assignment; a rider clears it in the same critical section that claims
//! the slide, so the next assignment is never written over it.

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, mpsc};
use tokio_util::sync::CancellationToken;

use crate::clock::SimClock;
use crate::config::TowerConfig;
use crate::error::{ConfigError, Result};
use crate::gate::CapacityGate;
use crate::sync::Monitor;
use crate::visitor::Visitor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slide {
    A,
    B,
}

impl Slide {
    pub const ALL: [Slide; 2] = [Slide::A, Slide::B];

    fn index(&self) -> usize {
        match self {
            Slide::A => 0,
            Slide::B => 1,
        }
    }
}

impl std::fmt::Display for Slide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slide::A => f.write_str("A"),
            Slide::B => f.write_str("B"),
        }
    }
}

/// State changes, emitted under the tower lock in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TowerEvent {
    StairEntered { visitor: String, on_stair: usize },
    TurnedAway { visitor: String },
    PlatformEntered { visitor: String, on_platform: usize },
    SlideAssigned { slide: Slide },
    DescentStarted { visitor: String, slide: Slide },
    DescentFinished { visitor: String, slide: Slide },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TowerSnapshot {
    pub open: bool,
    pub stair: CapacityGate,
    pub platform: CapacityGate,
    pub waiting_to_descend: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_slide: Option<Slide>,
    pub slide_a_free: bool,
    pub slide_b_free: bool,
    pub assignments: u64,
    pub descents: [u64; 2],
}

#[derive(Debug)]
struct TowerState {
    open: bool,
    stair: CapacityGate,
    platform: CapacityGate,
    /// Riders on the platform asking for a slide, assignment not yet taken.
    waiting_to_descend: usize,
    assigned: Option<Slide>,
    slide_free: [bool; 2],
    assignments: u64,
    descents: [u64; 2],
}

impl TowerState {
    fn try_claim(&mut self, slide: Slide) -> bool {
        let free = &mut self.slide_free[slide.index()];
        std::mem::replace(free, false)
    }

    /// Slide A whenever it is free, otherwise B.
    fn free_slide(&self) -> Option<Slide> {
        Slide::ALL.into_iter().find(|s| self.slide_free[s.index()])
    }
}

pub struct LookoutTower {
    config: TowerConfig,
    clock: SimClock,
    state: Monitor<TowerState>,
    stair_space: Notify,
    platform_space: Notify,
    /// An assignment is ready to be taken.
    assignment: Notify,
    /// Wakes the slide administrator.
    admin: Notify,
    slide_freed: [Notify; 2],
    events: Option<mpsc::UnboundedSender<TowerEvent>>,
}

impl LookoutTower {
    pub fn new(config: TowerConfig, clock: SimClock) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            state: Monitor::new(TowerState {
                open: false,
                stair: CapacityGate::new(config.stair_capacity),
                platform: CapacityGate::new(config.platform_capacity),
                waiting_to_descend: 0,
                assigned: None,
                slide_free: [true, true],
                assignments: 0,
                descents: [0, 0],
            }),
            stair_space: Notify::new(),
            platform_space: Notify::new(),
            assignment: Notify::new(),
            admin: Notify::new(),
            slide_freed: [Notify::new(), Notify::new()],
            events: None,
            config,
            clock,
        })
    }

    pub fn with_events(mut self, tx: mpsc::UnboundedSender<TowerEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn open(&self) {
        self.state.lock().open = true;
        self.stair_space.notify_one();
        tracing::info!("Lookout tower open");
    }

    /// Close the tower. Everyone queued at the stair is turned away; riders
    /// already inside finish their visit.
    pub fn close(&self) {
        self.state.lock().open = false;
        self.stair_space.notify_waiters();
        tracing::info!("Lookout tower closed");
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().open
    }

    /// Queue for the stair and climb it. `Ok(false)` if the tower closed
    /// before there was room.
    pub async fn enter(&self, visitor: &Visitor) -> Result<bool> {
        let admitted = self
            .state
            .wait_until(&self.stair_space, visitor.cancel_token(), |s| {
                let open = s.open;
                let admitted = s.stair.poll_enter(open)?;
                if admitted {
                    self.emit(TowerEvent::StairEntered {
                        visitor: visitor.name().to_string(),
                        on_stair: s.stair.occupancy(),
                    });
                } else {
                    self.emit(TowerEvent::TurnedAway {
                        visitor: visitor.name().to_string(),
                    });
                }
                Some(admitted)
            })
            .await?;

        if !admitted {
            tracing::warn!(%visitor, "Tower closed - turned away from the stair");
            return Ok(false);
        }
        tracing::debug!(%visitor, "Climbing the stair");
        self.clock.sleep_minutes(self.config.climb_minutes).await;
        Ok(true)
    }

    /// Step from the stair onto the platform and enjoy the view.
    ///
    /// A visitor who abandons while the platform is full goes back down,
    /// freeing their stair place.
    pub async fn admire_view(&self, visitor: &Visitor) -> Result<()> {
        let result = self
            .state
            .wait_until(&self.platform_space, visitor.cancel_token(), |s| {
                if !s.platform.try_enter() {
                    return None;
                }
                s.stair.leave();
                self.emit(TowerEvent::PlatformEntered {
                    visitor: visitor.name().to_string(),
                    on_platform: s.platform.occupancy(),
                });
                Some(())
            })
            .await;

        if let Err(e) = result {
            self.state.lock().stair.leave();
            self.stair_space.notify_one();
            tracing::info!(%visitor, "Went back down the stair");
            return Err(e);
        }
        self.stair_space.notify_one();

        tracing::debug!(%visitor, "Admiring the view");
        self.clock.sleep_minutes(self.config.view_minutes).await;
        Ok(())
    }

    /// Ask for a slide, wait for the administrator's assignment and ride it.
    pub async fn descend(&self, visitor: &Visitor) -> Result<Slide> {
        {
            let mut state = self.state.lock();
            state.waiting_to_descend += 1;
        }
        self.admin.notify_one();
        tracing::debug!(%visitor, "Waiting for a slide");

        let taken = self
            .state
            .wait_until(&self.assignment, visitor.cancel_token(), |s| {
                let slide = s.assigned.take()?;
                s.waiting_to_descend -= 1;
                s.platform.leave();
                let claimed = s.try_claim(slide);
                if claimed {
                    self.emit(TowerEvent::DescentStarted {
                        visitor: visitor.name().to_string(),
                        slide,
                    });
                }
                Some((slide, claimed))
            })
            .await;

        let (slide, claimed) = match taken {
            Ok(taken) => taken,
            Err(e) => {
                let mut state = self.state.lock();
                state.waiting_to_descend -= 1;
                state.platform.leave();
                if state.assigned.is_some() {
                    self.assignment.notify_one();
                }
                drop(state);
                self.platform_space.notify_one();
                tracing::info!(%visitor, "Left the platform without sliding");
                return Err(e);
            }
        };
        self.platform_space.notify_one();
        self.admin.notify_one();

        if !claimed {
            // The previous rider is still on this slide.
            self.state
                .wait_until(
                    &self.slide_freed[slide.index()],
                    visitor.cancel_token(),
                    |s| {
                        if !s.try_claim(slide) {
                            return None;
                        }
                        self.emit(TowerEvent::DescentStarted {
                            visitor: visitor.name().to_string(),
                            slide,
                        });
                        Some(())
                    },
                )
                .await?;
        }

        tracing::info!(%visitor, %slide, "Sliding down");
        self.clock.sleep_minutes(self.config.slide_minutes).await;

        {
            let mut state = self.state.lock();
            state.slide_free[slide.index()] = true;
            state.descents[slide.index()] += 1;
            self.emit(TowerEvent::DescentFinished {
                visitor: visitor.name().to_string(),
                slide,
            });
        }
        self.slide_freed[slide.index()].notify_one();
        self.admin.notify_one();
        tracing::debug!(%visitor, %slide, "Reached the pool");
        Ok(slide)
    }

    pub fn exit(&self, visitor: &Visitor) {
        tracing::info!(%visitor, "Left the lookout tower");
    }

    /// Administrator side: wait for a rider, a free slide and no pending
    /// assignment, then hand out the next assignment.
    pub(crate) async fn assign_next_slide(&self, cancel: &CancellationToken) -> Result<Slide> {
        let slide = self
            .state
            .wait_until(&self.admin, cancel, |s| {
                if s.waiting_to_descend == 0 || s.assigned.is_some() {
                    return None;
                }
                let slide = s.free_slide()?;
                s.assigned = Some(slide);
                s.assignments += 1;
                self.emit(TowerEvent::SlideAssigned { slide });
                Some(slide)
            })
            .await?;
        tracing::debug!(%slide, "Slide assigned");
        self.assignment.notify_one();
        Ok(slide)
    }

    fn emit(&self, event: TowerEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    pub fn snapshot(&self) -> TowerSnapshot {
        let state = self.state.lock();
        TowerSnapshot {
            open: state.open,
            stair: state.stair,
            platform: state.platform,
            waiting_to_descend: state.waiting_to_descend,
            assigned_slide: state.assigned,
            slide_a_free: state.slide_free[Slide::A.index()],
            slide_b_free: state.slide_free[Slide::B.index()],
            assignments: state.assignments,
            descents: state.descents,
        }
    }

    /// Full tower visit. `Ok(None)` if turned away at the stair.
    pub async fn visit(&self, visitor: &Visitor) -> Result<Option<Slide>> {
        if !self.enter(visitor).await? {
            return Ok(None);
        }
        self.admire_view(visitor).await?;
        let slide = self.descend(visitor).await?;
        self.exit(visitor);
        Ok(Some(slide))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use futures::future::join_all;
    use tokio::task::JoinHandle;

    use super::*;
    use crate::admin::spawn_slide_admin;
    use crate::config::ClockConfig;
    use crate::error::ParkError;

    const GUARD: Duration = Duration::from_secs(7 * 24 * 3600);

    fn clock() -> SimClock {
        SimClock::new(ClockConfig::default().with_minute_ms(1000))
    }

    fn open_tower(
        config: TowerConfig,
    ) -> (Arc<LookoutTower>, mpsc::UnboundedReceiver<TowerEvent>, CancellationToken) {
        let (tx, rx) = mpsc::unbounded_channel();
        let tower = Arc::new(LookoutTower::new(config, clock()).unwrap().with_events(tx));
        tower.open();
        let shutdown = CancellationToken::new();
        spawn_slide_admin(Arc::clone(&tower), shutdown.clone());
        (tower, rx, shutdown)
    }

    fn spawn_riders(tower: &Arc<LookoutTower>, n: usize) -> Vec<JoinHandle<Result<Option<Slide>>>> {
        (0..n)
            .map(|i| {
                let tower = Arc::clone(tower);
                tokio::spawn(async move { tower.visit(&Visitor::new(format!("R{i}"))).await })
            })
            .collect()
    }

    async fn slides(handles: Vec<JoinHandle<Result<Option<Slide>>>>) -> Vec<Slide> {
        tokio::time::timeout(GUARD, join_all(handles))
            .await
            .expect("riders never finished")
            .into_iter()
            .map(|r| r.unwrap().unwrap().expect("turned away"))
            .collect()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<TowerEvent>) -> Vec<TowerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test(start_paused = true)]
    async fn stair_never_holds_more_than_capacity() {
        let (tower, mut rx, shutdown) = open_tower(TowerConfig::default().with_stair_capacity(2));

        let slides = slides(spawn_riders(&tower, 5)).await;
        assert_eq!(slides.len(), 5);

        let snapshot = tower.snapshot();
        assert_eq!(snapshot.stair.peak(), 2);
        assert!(snapshot.platform.peak() <= snapshot.platform.capacity());
        assert_eq!(snapshot.stair.occupancy(), 0);
        assert_eq!(snapshot.platform.occupancy(), 0);
        assert_eq!(snapshot.waiting_to_descend, 0);
        assert_eq!(snapshot.descents.iter().sum::<u64>(), 5);

        for event in drain(&mut rx) {
            match event {
                TowerEvent::StairEntered { on_stair, .. } => assert!(on_stair <= 2),
                TowerEvent::PlatformEntered { on_platform, .. } => assert!(on_platform <= 3),
                _ => {}
            }
        }
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn each_slide_carries_one_rider_at_a_time() {
        let config = TowerConfig::default()
            .with_stair_capacity(6)
            .with_platform_capacity(6)
            .with_slide_minutes(5);
        let (tower, mut rx, shutdown) = open_tower(config);

        slides(spawn_riders(&tower, 8)).await;

        let mut on_slide = [0usize; 2];
        let mut starts = 0;
        for event in drain(&mut rx) {
            match event {
                TowerEvent::DescentStarted { slide, .. } => {
                    on_slide[slide.index()] += 1;
                    starts += 1;
                    assert_eq!(on_slide[slide.index()], 1, "two riders on slide {slide}");
                }
                TowerEvent::DescentFinished { slide, .. } => on_slide[slide.index()] -= 1,
                _ => {}
            }
        }
        assert_eq!(starts, 8);
        assert_eq!(on_slide, [0, 0]);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn simultaneous_riders_get_slide_a_then_b() {
        let (tower, mut rx, shutdown) = open_tower(TowerConfig::default());

        let mut slides = slides(spawn_riders(&tower, 2)).await;
        slides.sort_by_key(|s| s.index());
        assert_eq!(slides, vec![Slide::A, Slide::B]);

        let assigned: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                TowerEvent::SlideAssigned { slide } => Some(slide),
                _ => None,
            })
            .collect();
        assert_eq!(assigned, vec![Slide::A, Slide::B]);
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn closing_turns_away_the_stair_queue() {
        let (tower, mut rx, shutdown) = open_tower(TowerConfig::default().with_stair_capacity(1));

        let first = Visitor::new("first");
        let climbing = {
            let tower = Arc::clone(&tower);
            let first = first.clone();
            tokio::spawn(async move { tower.enter(&first).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(tower.snapshot().stair.occupancy(), 1);

        let queued: Vec<_> = (0..2)
            .map(|i| {
                let tower = Arc::clone(&tower);
                tokio::spawn(async move { tower.enter(&Visitor::new(format!("Q{i}"))).await })
            })
            .collect();
        tokio::task::yield_now().await;
        tower.close();

        for waiter in queued {
            assert_eq!(waiter.await.unwrap(), Ok(false));
        }
        assert_eq!(climbing.await.unwrap(), Ok(true));
        assert_eq!(tower.snapshot().stair.occupancy(), 1);

        let turned_away = drain(&mut rx)
            .into_iter()
            .filter(|e| matches!(e, TowerEvent::TurnedAway { .. }))
            .count();
        assert_eq!(turned_away, 2);
        assert_eq!(tower.visit(&Visitor::new("late")).await, Ok(None));
        shutdown.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn abandoning_the_slide_queue_frees_the_platform() {
        // No administrator: the rider can never be assigned a slide.
        let tower = Arc::new(LookoutTower::new(TowerConfig::default(), clock()).unwrap());
        tower.open();
        let visitor = Visitor::new("impatient");

        assert_eq!(tower.enter(&visitor).await, Ok(true));
        tower.admire_view(&visitor).await.unwrap();
        assert_eq!(tower.snapshot().platform.occupancy(), 1);

        let waiter = {
            let tower = Arc::clone(&tower);
            let visitor = visitor.clone();
            tokio::spawn(async move { tower.descend(&visitor).await })
        };
        tokio::task::yield_now().await;
        assert_eq!(tower.snapshot().waiting_to_descend, 1);

        visitor.abandon();
        assert_eq!(waiter.await.unwrap(), Err(ParkError::Abandoned));
        let snapshot = tower.snapshot();
        assert_eq!(snapshot.waiting_to_descend, 0);
        assert_eq!(snapshot.platform.occupancy(), 0);
        assert!(snapshot.slide_a_free && snapshot.slide_b_free);
    }

    #[tokio::test(start_paused = true)]
    async fn abandoning_a_full_platform_frees_the_stair() {
        let tower = LookoutTower::new(TowerConfig::default().with_platform_capacity(1), clock())
            .unwrap();
        tower.open();
        let up_top = Visitor::new("up-top");
        let behind = Visitor::new("behind");

        assert_eq!(tower.enter(&up_top).await, Ok(true));
        tower.admire_view(&up_top).await.unwrap();
        assert_eq!(tower.enter(&behind).await, Ok(true));

        behind.abandon();
        assert_eq!(tower.admire_view(&behind).await, Err(ParkError::Abandoned));
        let snapshot = tower.snapshot();
        assert_eq!(snapshot.stair.occupancy(), 0);
        assert_eq!(snapshot.platform.occupancy(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn descending_without_a_platform_place_keeps_counts() {
        let (tower, _rx, shutdown) = open_tower(TowerConfig::default());
        let visitor = Visitor::new("shortcut");

        let slide = tokio::time::timeout(GUARD, tower.descend(&visitor))
            .await
            .expect("never descended")
            .unwrap();
        assert_eq!(slide, Slide::A);

        let snapshot = tower.snapshot();
        assert_eq!(snapshot.platform.occupancy(), 0);
        assert_eq!(snapshot.waiting_to_descend, 0);
        assert_eq!(snapshot.descents, [1, 0]);
        shutdown.cancel();
    }

    #[test]
    fn slide_serializes_as_letter() {
        insta::assert_json_snapshot!(Slide::ALL, @r###"
        [
          "A",
          "B"
        ]
        "###);
    }

    #[test]
    fn fresh_tower_snapshot() {
        let tower = LookoutTower::new(TowerConfig::default(), clock()).unwrap();
        insta::assert_json_snapshot!(tower.snapshot(), @r###"
        {
          "open": false,
          "stair": {
            "capacity": 5,
            "occupancy": 0,
            "peak": 0
          },
          "platform": {
            "capacity": 3,
            "occupancy": 0,
            "peak": 0
          },
          "waiting_to_descend": 0,
          "slide_a_free": true,
          "slide_b_free": true,
          "assignments": 0,
          "descents": [
            0,
            0
          ]
        }
        "###);
    }
}
