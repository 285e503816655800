//! Train conveyor from the park entrance to the race start.

use crate::clock::SimClock;
use crate::gate::Gate;

pub struct Train {
    gate: Gate,
    clock: SimClock,
    travel_minutes: u64,
}

impl Train {
    pub fn new(capacity: usize, travel_minutes: u64, clock: SimClock) -> Self {
        Self {
            gate: Gate::new("train", capacity),
            clock,
            travel_minutes,
        }
    }

    pub fn open(&self) {
        self.gate.open();
    }

    pub fn close(&self) {
        self.gate.close();
    }

    /// Take a seat if the train is running and not full.
    pub fn try_board(&self) -> Option<TrainSeat<'_>> {
        match self.gate.try_enter() {
            Ok(()) => Some(TrainSeat { train: self }),
            Err(e) => {
                tracing::debug!(reason = %e, "Train boarding refused");
                None
            }
        }
    }

    pub fn riders(&self) -> usize {
        self.gate.snapshot().occupancy()
    }
}

/// A seat on the train, freed when dropped.
#[must_use = "a seat is only freed by disembarking or dropping it"]
pub struct TrainSeat<'a> {
    train: &'a Train,
}

impl TrainSeat<'_> {
    /// Ride to the race start, then get off.
    pub async fn disembark(self) {
        self.train.clock.sleep_minutes(self.train.travel_minutes).await;
    }
}

impl Drop for TrainSeat<'_> {
    fn drop(&mut self) {
        self.train.gate.leave();
    }
}
