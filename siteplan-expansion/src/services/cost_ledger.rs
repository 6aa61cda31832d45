//! Per-job AI cost ledger
//!
//! Every AI call reserves its worst-case price before dispatch and settles
//! the actual price on completion (released on failure). Reservations and
//! settlements are serialized under one lock, so `settled + reserved` never
//! exceeds the cap no matter how completions interleave.
//!
//! A reservation that does not fit while other calls are in flight waits for
//! them to settle; their actual prices are usually below the reservation.
//! Only when nothing is in flight and the settled spend leaves too little
//! room is the reservation refused. That refusal marks the ledger exhausted
//! and no further reservations succeed for the rest of the run.

use std::sync::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{PipelineError, PipelineResult};

/// Float slack when comparing sums of prices against the cap
const CAP_EPSILON: f64 = 1e-9;

#[derive(Debug, Default)]
struct LedgerState {
    settled: f64,
    reserved: f64,
    in_flight: usize,
    exhausted: bool,
}

/// Budget held for one in-flight call
#[derive(Debug)]
#[must_use = "a reservation must be settled or released"]
pub struct Reservation {
    amount: f64,
}

impl Reservation {
    pub fn amount(&self) -> f64 {
        self.amount
    }
}

enum Attempt {
    Granted(Reservation),
    Wait,
    Refused(PipelineError),
}

#[derive(Debug)]
pub struct CostLedger {
    cap: f64,
    state: Mutex<LedgerState>,
    changed: Notify,
}

impl CostLedger {
    pub fn new(cap: f64) -> Self {
        Self::with_spent(cap, 0.0)
    }

    /// Ledger resuming a job that already spent `spent`
    pub fn with_spent(cap: f64, spent: f64) -> Self {
        Self {
            cap,
            state: Mutex::new(LedgerState {
                settled: spent.max(0.0),
                exhausted: spent >= cap,
                ..Default::default()
            }),
            changed: Notify::new(),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    /// Settled cost so far
    pub fn accumulated(&self) -> f64 {
        self.lock().settled
    }

    pub fn is_exhausted(&self) -> bool {
        self.lock().exhausted
    }

    /// Calls holding a reservation
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    fn attempt(&self, amount: f64, take: bool) -> Attempt {
        let mut state = self.lock();
        let committed = state.settled + state.reserved;
        if !state.exhausted && committed + amount <= self.cap + CAP_EPSILON {
            if take {
                state.reserved += amount;
                state.in_flight += 1;
            }
            return Attempt::Granted(Reservation { amount });
        }
        if !state.exhausted && state.in_flight > 0 {
            return Attempt::Wait;
        }
        state.exhausted = true;
        Attempt::Refused(PipelineError::CostCapExceeded {
            accumulated: committed,
            requested: amount,
            cap: self.cap,
        })
    }

    /// Reserve `amount`, waiting for in-flight calls to settle if needed
    pub async fn reserve(&self, amount: f64) -> PipelineResult<Reservation> {
        loop {
            let changed = self.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            match self.attempt(amount, true) {
                Attempt::Granted(reservation) => return Ok(reservation),
                Attempt::Refused(err) => return Err(err),
                Attempt::Wait => {
                    debug!(amount, "Budget held by in-flight calls, waiting for settlement");
                    changed.await;
                }
            }
        }
    }

    /// Whether one more call of `amount` fits without waiting
    ///
    /// With nothing in flight, a call that cannot fit exhausts the ledger.
    pub fn can_afford(&self, amount: f64) -> bool {
        !matches!(self.attempt(amount, false), Attempt::Refused(_))
    }

    /// Charge the actual cost (at most the reserved amount); returns the charge
    pub fn settle(&self, reservation: Reservation, actual: f64) -> f64 {
        if actual > reservation.amount {
            warn!(
                actual,
                reserved = reservation.amount,
                "AI call cost exceeded its reservation, charging the reserved amount"
            );
        }
        let charged = actual.clamp(0.0, reservation.amount);
        {
            let mut state = self.lock();
            Self::drop_reservation(&mut state, &reservation);
            state.settled += charged;
        }
        self.changed.notify_waiters();
        charged
    }

    /// Return a reservation unused
    pub fn release(&self, reservation: Reservation) {
        {
            let mut state = self.lock();
            Self::drop_reservation(&mut state, &reservation);
        }
        self.changed.notify_waiters();
    }

    fn drop_reservation(state: &mut LedgerState, reservation: &Reservation) {
        state.in_flight = state.in_flight.saturating_sub(1);
        state.reserved = if state.in_flight == 0 {
            0.0
        } else {
            (state.reserved - reservation.amount).max(0.0)
        };
    }
}
