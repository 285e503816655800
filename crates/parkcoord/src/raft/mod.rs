//! Raft pool for the race: interchangeable capacity-1 and capacity-2 rafts.
//!
//! Seats are only handed out as [`RaftHandle`]s from a successful boarding:
//! - `RaftPool::try_board_any` → `RaftHandle` (seat taken)
//! - `RaftHandle` dropped → seat returned to its raft
//! - releasing a seat that was never taken: NOT POSSIBLE (no handle exists)

mod pool;

pub use pool::{RaftHandle, RaftId, RaftKind, RaftPool};
