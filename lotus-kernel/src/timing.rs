//! Deferred-event timeline shared by wake-after-delay timeouts and timer
//! objects.
//!
//! The embedder advances guest time explicitly; due events are collected and
//! dispatched by the system under the kernel lock. Event order for equal
//! deadlines is insertion order.

use std::collections::BTreeMap;
use std::sync::Weak;

use crate::objects::Timer;
use crate::thread::Thread;

/// Base clock of the emulated cores, used to convert the nanosecond timeline
/// into timer ticks.
pub const BASE_CLOCK_RATE: u64 = 268_111_856;

/// Convert a span of guest nanoseconds to core-timer ticks.
pub fn ns_to_ticks(ns: u64) -> u64 {
    ((ns as u128 * BASE_CLOCK_RATE as u128) / 1_000_000_000) as u64
}

/// What to do when a scheduled deadline arrives.
pub enum TimingEventKind {
    /// Wake a parked thread with a timeout.
    ThreadWake(Weak<Thread>),
    /// Fire a timer object (signal and re-arm its interval).
    TimerFire(Weak<Timer>),
}

/// Token identifying a scheduled event, for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingEventHandle((u64, u64));

pub struct Timing {
    now_ns: u64,
    next_seq: u64,
    events: BTreeMap<(u64, u64), TimingEventKind>,
}

impl Timing {
    pub fn new() -> Self {
        Timing {
            now_ns: 0,
            next_seq: 0,
            events: BTreeMap::new(),
        }
    }

    pub fn now_ns(&self) -> u64 {
        self.now_ns
    }

    /// Schedule `kind` to fire `delay_ns` from now.
    pub fn schedule(&mut self, delay_ns: u64, kind: TimingEventKind) -> TimingEventHandle {
        let key = (self.now_ns + delay_ns, self.next_seq);
        self.next_seq += 1;
        self.events.insert(key, kind);
        TimingEventHandle(key)
    }

    /// Cancel a scheduled event. Cancelling one that already fired is a no-op.
    pub fn cancel(&mut self, handle: TimingEventHandle) {
        self.events.remove(&handle.0);
    }

    /// Advance the timeline by `ns` and drain every event now due.
    pub(crate) fn advance(&mut self, ns: u64) -> Vec<TimingEventKind> {
        self.now_ns += ns;
        let mut due = Vec::new();
        while let Some((&key, _)) = self.events.iter().next() {
            if key.0 > self.now_ns {
                break;
            }
            let (_, kind) = self.events.remove_entry(&key).unwrap();
            due.push(kind);
        }
        due
    }

    #[cfg(test)]
    pub(crate) fn pending_events(&self) -> usize {
        self.events.len()
    }
}

impl Default for Timing {
    fn default() -> Self {
        Timing::new()
    }
}
