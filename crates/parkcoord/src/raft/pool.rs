//! Raft pool implementation with per-raft atomic occupancy.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::Serialize;

/// Position of a raft in its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RaftId(usize);

impl RaftId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for RaftId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "raft-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RaftKind {
    Individual,
    Shared,
}

impl RaftKind {
    pub fn capacity(&self) -> usize {
        match self {
            RaftKind::Individual => 1,
            RaftKind::Shared => 2,
        }
    }
}

struct Raft {
    id: RaftId,
    kind: RaftKind,
    occupancy: AtomicUsize,
}

impl Raft {
    fn try_board(&self) -> bool {
        let capacity = self.kind.capacity();
        self.occupancy
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < capacity).then_some(n + 1)
            })
            .is_ok()
    }

    fn leave(&self) {
        let previous = self.occupancy.fetch_sub(1, Ordering::AcqRel);
        if previous == 0 {
            // Only reachable if a handle was forged; restore the count.
            debug_assert!(false, "raft left while empty");
            tracing::error!(raft = %self.id, "Bug: seat released on an empty raft");
            self.occupancy.store(0, Ordering::Release);
        }
    }
}

/// A seat on a raft. The seat is given back when the handle drops.
pub struct RaftHandle {
    raft: Arc<Raft>,
}

impl RaftHandle {
    pub fn id(&self) -> RaftId {
        self.raft.id
    }

    pub fn kind(&self) -> RaftKind {
        self.raft.kind
    }
}

impl fmt::Debug for RaftHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RaftHandle")
            .field("id", &self.raft.id)
            .field("kind", &self.raft.kind)
            .finish()
    }
}

impl Drop for RaftHandle {
    fn drop(&mut self) {
        self.raft.leave();
        tracing::trace!(raft = %self.raft.id, "Seat released");
    }
}

/// Fixed pool of rafts: individual rafts first, then shared ones.
pub struct RaftPool {
    rafts: Vec<Arc<Raft>>,
}

impl RaftPool {
    pub fn new(individual: usize, shared: usize) -> Self {
        let kinds = std::iter::repeat_n(RaftKind::Individual, individual)
            .chain(std::iter::repeat_n(RaftKind::Shared, shared));
        let rafts = kinds
            .enumerate()
            .map(|(i, kind)| {
                Arc::new(Raft {
                    id: RaftId(i),
                    kind,
                    occupancy: AtomicUsize::new(0),
                })
            })
            .collect();
        Self { rafts }
    }

    /// Board the first raft (in pool order) with a free seat.
    pub fn try_board_any(&self) -> Option<RaftHandle> {
        self.rafts
            .iter()
            .find(|raft| raft.try_board())
            .map(|raft| RaftHandle {
                raft: Arc::clone(raft),
            })
    }

    pub fn num_rafts(&self) -> usize {
        self.rafts.len()
    }

    /// Total seats across all rafts.
    pub fn seats(&self) -> usize {
        self.rafts.iter().map(|r| r.kind.capacity()).sum()
    }

    pub fn occupied(&self) -> usize {
        self.rafts
            .iter()
            .map(|r| r.occupancy.load(Ordering::Acquire))
            .sum()
    }

    pub fn available(&self) -> usize {
        self.seats() - self.occupied()
    }
}
