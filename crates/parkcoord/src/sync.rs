//! Monitor: one mutex-guarded state plus guarded waits on `Notify` conditions.
//!
//! A facility owns a single `Monitor` (its mutual-exclusion domain) and one
//! `Notify` per wait predicate. Waiters register with the `Notify` before
//! checking the predicate, so a signal sent between the check and the
//! suspension is never lost. The std mutex is never held across an await.

use std::sync::{Mutex, MutexGuard};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::error::ParkError;

pub struct Monitor<S> {
    state: Mutex<S>,
}

impl<S> Monitor<S> {
    pub fn new(state: S) -> Self {
        Self {
            state: Mutex::new(state),
        }
    }

    /// Lock the state. A poisoned lock is recovered: counters stay usable
    /// and the panic that poisoned it has already been reported.
    pub fn lock(&self) -> MutexGuard<'_, S> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("Facility mutex poisoned - recovering state");
                poisoned.into_inner()
            }
        }
    }

    /// Suspend until `ready` yields a value.
    ///
    /// `ready` runs under the lock on every wake and may mutate the state
    /// when it succeeds. Returns `Abandoned` if `cancel` fires first; the
    /// caller undoes anything it counted before waiting.
    pub async fn wait_until<T>(
        &self,
        condition: &Notify,
        cancel: &CancellationToken,
        mut ready: impl FnMut(&mut S) -> Option<T>,
    ) -> Result<T, ParkError> {
        loop {
            let notified = condition.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let outcome = {
                let mut state = self.lock();
                ready(&mut state)
            };
            if let Some(value) = outcome {
                return Ok(value);
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = cancel.cancelled() => return Err(ParkError::Abandoned),
            }
        }
    }
}
