//! Rendezvous barrier with timeout-triggered reset.
//!
//! Arrivals are counted per generation. When the count reaches `parties` the
//! generation advances and every waiter is released together. A waiter whose
//! deadline passes first advances the generation itself, releasing whoever
//! is already waiting as one partial group instead of blocking forever.
//!
//! Whoever releases a generation runs the caller's release hook while still
//! holding the barrier lock, so the group is accounted for before any of its
//! members can observe the release.

use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ParkError;
use crate::sync::Monitor;

/// How a waiter left the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierWaitResult {
    /// All parties arrived. `leader` is the arrival that completed the trip.
    Tripped { leader: bool },
    /// This waiter's deadline passed and it reset the barrier.
    TimedOut { released: usize },
    /// Another waiter timed out and reset the barrier.
    Reset,
}

impl BarrierWaitResult {
    pub fn is_partial(&self) -> bool {
        !matches!(self, BarrierWaitResult::Tripped { .. })
    }
}

/// A generation leaving the barrier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Release {
    /// Waiters released together, the releasing one included.
    pub group: usize,
    /// Released by a timeout reset rather than a full trip.
    pub partial: bool,
}

#[derive(Debug, Default)]
struct BarrierState {
    arrived: usize,
    generation: u64,
    trips: u64,
    /// Last generation that ended by reset rather than by a full trip.
    last_reset: Option<u64>,
}

impl BarrierState {
    fn advance(&mut self) {
        self.arrived = 0;
        self.generation += 1;
    }

    fn released_from(&self, generation: u64) -> Option<BarrierWaitResult> {
        if self.generation == generation {
            return None;
        }
        if self.last_reset == Some(generation) {
            Some(BarrierWaitResult::Reset)
        } else {
            Some(BarrierWaitResult::Tripped { leader: false })
        }
    }
}

pub struct RendezvousBarrier {
    parties: usize,
    state: Monitor<BarrierState>,
    released: Notify,
}

impl RendezvousBarrier {
    pub fn new(parties: usize) -> Self {
        debug_assert!(parties > 0, "barrier needs at least one party");
        Self {
            parties: parties.max(1),
            state: Monitor::new(BarrierState::default()),
            released: Notify::new(),
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Completed rendezvous, partial launches excluded.
    pub fn trips(&self) -> u64 {
        self.state.lock().trips
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().arrived
    }

    /// Arrive and wait for the rest of the group, at most `timeout`.
    ///
    /// Returns `Abandoned` only if `cancel` fires before this waiter's
    /// generation is released; its arrival is withdrawn.
    pub async fn wait(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BarrierWaitResult, ParkError> {
        self.wait_with(timeout, cancel, |_| {}).await
    }

    /// Like [`wait`](Self::wait), but if this waiter is the one that
    /// releases its generation, `on_release` runs under the barrier lock
    /// before anyone else is let go. Lock order is barrier, then whatever
    /// `on_release` takes.
    pub async fn wait_with(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
        on_release: impl FnOnce(Release),
    ) -> Result<BarrierWaitResult, ParkError> {
        let deadline = Instant::now() + timeout;
        let mut on_release = Some(on_release);

        let generation = {
            let mut state = self.state.lock();
            state.arrived += 1;
            if state.arrived == self.parties {
                let release = Release {
                    group: state.arrived,
                    partial: false,
                };
                Self::run_hook(&mut on_release, release);
                state.advance();
                state.trips += 1;
                tracing::debug!(trips = state.trips, parties = self.parties, "Barrier tripped");
                self.released.notify_waiters();
                return Ok(BarrierWaitResult::Tripped { leader: true });
            }
            state.generation
        };

        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let released = self.state.lock().released_from(generation);
            if let Some(result) = released {
                return Ok(result);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Ok(self.reset(generation, &mut on_release));
                }
                _ = cancel.cancelled() => {
                    return self.withdraw(generation);
                }
            }
        }
    }

    fn run_hook(on_release: &mut Option<impl FnOnce(Release)>, release: Release) {
        if let Some(hook) = on_release.take() {
            hook(release);
        }
    }

    fn reset(
        &self,
        generation: u64,
        on_release: &mut Option<impl FnOnce(Release)>,
    ) -> BarrierWaitResult {
        let mut state = self.state.lock();
        if let Some(result) = state.released_from(generation) {
            return result;
        }
        let released = state.arrived;
        Self::run_hook(
            on_release,
            Release {
                group: released,
                partial: true,
            },
        );
        state.last_reset = Some(generation);
        state.advance();
        tracing::warn!(
            released,
            parties = self.parties,
            "Barrier timed out - releasing partial group"
        );
        self.released.notify_waiters();
        BarrierWaitResult::TimedOut { released }
    }

    fn withdraw(&self, generation: u64) -> Result<BarrierWaitResult, ParkError> {
        let mut state = self.state.lock();
        if let Some(result) = state.released_from(generation) {
            return Ok(result);
        }
        state.arrived -= 1;
        Err(ParkError::Abandoned)
    }
}
