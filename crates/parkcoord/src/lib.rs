//! parkcoord: coordination engines for a simulated park.
//!
//! Two facilities share one concurrency model: a mutex-guarded state per
//! facility with one `Notify` per wait predicate, and a cancellation token
//! per visitor.
//! - [`RaftRace`]: mass-start raft race with a start barrier, a bag shuttle
//!   and per-heat winner bookkeeping.
//! - [`LookoutTower`]: stair and platform capacity gates feeding two
//!   single-rider slides handed out by the slide administrator.

mod admin;
mod barrier;
mod clock;
mod shuttle;
mod sync;
mod train;

pub mod config;
pub mod error;
pub mod gate;
pub mod park;
pub mod race;
pub mod raft;
pub mod tower;
pub mod visitor;

pub use admin::spawn_slide_admin;
pub use barrier::{BarrierWaitResult, Release, RendezvousBarrier};
pub use clock::SimClock;
pub use config::{ClockConfig, ParkConfig, RaceConfig, TowerConfig};
pub use error::{ConfigError, ParkError, Result};
pub use gate::{CapacityGate, Gate};
pub use park::{Park, ParkEvents, ParkSummary};
pub use race::{BagPhase, HeatResult, Placement, RaceEntry, RaceEvent, RaceSnapshot, RaftRace};
pub use raft::{RaftHandle, RaftId, RaftKind, RaftPool};
pub use shuttle::spawn_shuttle;
pub use tower::{LookoutTower, Slide, TowerEvent, TowerSnapshot};
pub use train::{Train, TrainSeat};
pub use visitor::Visitor;
