//! Purpose: Pool of session handles shared by concurrent callers.
//! Exports: `SessionPool`, `Lease`, `PoolStats`, `ShutdownReport`.
//! Role: Amortizes session creation; one lease serves one caller for one batch.
//! Invariants: Free list, slot table and counters change only under the pool lock.
//! Invariants: The lock is never held while a session is created or destroyed.
//! Invariants: A failed session initialization leaves counters and free list untouched.
//! Invariants: A lease returns its handle exactly once (on drop or discard); after shutdown the handle is destroyed.
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::core::client::Cluster;
use crate::core::error::{ERR_POOL_CLOSED, ERR_SESSION_INIT, Error, ErrorKind};

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize)]
pub struct PoolStats {
    /// Handles created since the pool was opened.
    pub created: u64,
    /// Handles destroyed since the pool was opened.
    pub deleted: u64,
    /// Handles idle in the free list.
    pub available: u64,
    /// Live handles, idle or leased.
    pub total: u64,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ShutdownReport {
    /// Idle handles destroyed by the shutdown itself.
    pub destroyed: usize,
    /// Leases still out; their handles are destroyed when they come back.
    pub outstanding: usize,
}

enum Slot<S> {
    Idle(S),
    Leased,
    Vacant,
}

struct PoolState<S> {
    slots: Vec<Slot<S>>,
    idle: Vec<usize>,
    vacant: Vec<usize>,
    stats: PoolStats,
    closed: bool,
}

impl<S> PoolState<S> {
    fn claim_slot(&mut self) -> usize {
        match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Slot::Leased;
                slot
            }
            None => {
                self.slots.push(Slot::Leased);
                self.slots.len() - 1
            }
        }
    }
}

pub struct SessionPool<C: Cluster> {
    cluster: C,
    state: Mutex<PoolState<C::Session>>,
}

impl<C: Cluster> SessionPool<C> {
    pub fn new(cluster: C) -> Self {
        Self {
            cluster,
            state: Mutex::new(PoolState {
                slots: Vec::new(),
                idle: Vec::new(),
                vacant: Vec::new(),
                stats: PoolStats::default(),
                closed: false,
            }),
        }
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    /// Hands out an idle session, creating one when the free list is empty.
    pub fn lease(&self) -> Result<Lease<'_, C>, Error> {
        {
            let mut state = self.state.lock();
            if state.closed {
                return Err(closed());
            }
            if let Some(slot) = state.idle.pop() {
                let Slot::Idle(session) = std::mem::replace(&mut state.slots[slot], Slot::Leased)
                else {
                    return Err(Error::new(ErrorKind::Server)
                        .with_message(format!("session slot {slot} on the free list is not idle")));
                };
                state.stats.available -= 1;
                return Ok(Lease::new(self, slot, session));
            }
        }

        let session = self
            .cluster
            .new_session()
            .map_err(|err| Error::native(ERR_SESSION_INIT, err))?;

        let mut state = self.state.lock();
        if state.closed {
            drop(state);
            drop(session);
            return Err(closed());
        }
        let slot = state.claim_slot();
        state.stats.created += 1;
        state.stats.total += 1;
        debug!(slot, total = state.stats.total, "created session handle");
        Ok(Lease::new(self, slot, session))
    }

    /// Point-in-time copy of the counters.
    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats
    }

    /// Destroys every idle handle, zeroes the counters and refuses further leases.
    pub fn shutdown(&self) -> ShutdownReport {
        let (idle, outstanding) = {
            let mut state = self.state.lock();
            state.closed = true;
            let slots: Vec<usize> = state.idle.drain(..).collect();
            let mut idle = Vec::with_capacity(slots.len());
            for slot in slots {
                if let Slot::Idle(session) = std::mem::replace(&mut state.slots[slot], Slot::Vacant) {
                    idle.push(session);
                }
                state.vacant.push(slot);
            }
            let outstanding = state
                .slots
                .iter()
                .filter(|slot| matches!(slot, Slot::Leased))
                .count();
            state.stats = PoolStats::default();
            (idle, outstanding)
        };
        let report = ShutdownReport {
            destroyed: idle.len(),
            outstanding,
        };
        drop(idle);
        info!(
            destroyed = report.destroyed,
            outstanding = report.outstanding,
            "session pool shut down"
        );
        report
    }

    fn destroy(&self, slot: usize, session: C::Session) {
        {
            let mut state = self.state.lock();
            state.slots[slot] = Slot::Vacant;
            state.vacant.push(slot);
            if !state.closed {
                state.stats.deleted += 1;
                state.stats.total -= 1;
            }
        }
        debug!(slot, "destroyed session handle");
        drop(session);
    }

    fn give_back(&self, slot: usize, session: C::Session) {
        let mut state = self.state.lock();
        if state.closed {
            state.slots[slot] = Slot::Vacant;
            state.vacant.push(slot);
            drop(state);
            warn!(slot, "session returned after shutdown; destroying it");
            drop(session);
            return;
        }
        state.slots[slot] = Slot::Idle(session);
        state.idle.push(slot);
        state.stats.available += 1;
    }
}

fn closed() -> Error {
    Error::new(ErrorKind::Server).with_message(ERR_POOL_CLOSED)
}

/// Exclusive use of one pooled session; returned to the pool on drop.
pub struct Lease<'p, C: Cluster> {
    pool: &'p SessionPool<C>,
    slot: usize,
    // Valid until `drop` or `discard` moves it out.
    session: ManuallyDrop<C::Session>,
}

impl<'p, C: Cluster> Lease<'p, C> {
    fn new(pool: &'p SessionPool<C>, slot: usize, session: C::Session) -> Self {
        Lease {
            pool,
            slot,
            session: ManuallyDrop::new(session),
        }
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Destroys the handle instead of returning it, e.g. after its node went away.
    pub fn discard(self) {
        let mut lease = ManuallyDrop::new(self);
        // SAFETY: `Drop` is suppressed for `lease`, so the session is moved out exactly once.
        let session = unsafe { ManuallyDrop::take(&mut lease.session) };
        lease.pool.destroy(lease.slot, session);
    }
}

impl<C: Cluster> Deref for Lease<'_, C> {
    type Target = C::Session;

    fn deref(&self) -> &C::Session {
        &self.session
    }
}

impl<C: Cluster> DerefMut for Lease<'_, C> {
    fn deref_mut(&mut self) -> &mut C::Session {
        &mut self.session
    }
}

impl<C: Cluster> Drop for Lease<'_, C> {
    fn drop(&mut self) {
        // SAFETY: drop runs once and the field is not touched afterwards.
        let session = unsafe { ManuallyDrop::take(&mut self.session) };
        self.pool.give_back(self.slot, session);
    }
}
