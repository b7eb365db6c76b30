//! Timer objects driven by the deferred-event timeline.

use std::sync::Arc;

use spinning_top::Spinlock;

use lotus_abi::ResetType;

use crate::object::{Object, WaiterList, WaitObject};
use crate::system::System;
use crate::thread::Thread;
use crate::timing::{TimingEventHandle, TimingEventKind};
use crate::wake;

struct TimerState {
    signaled: bool,
    interval_ns: u64,
    event: Option<TimingEventHandle>,
}

pub struct Timer {
    pub name: String,
    pub reset_type: ResetType,
    state: Spinlock<TimerState>,
    waiters: WaiterList,
}

impl Timer {
    pub fn new(reset_type: ResetType, name: String) -> Self {
        Timer {
            name,
            reset_type,
            state: Spinlock::new(TimerState {
                signaled: false,
                interval_ns: 0,
                event: None,
            }),
            waiters: WaiterList::new(),
        }
    }

    pub fn is_signaled(&self) -> bool {
        self.state.lock().signaled
    }

    /// Arm the timer: first fire after `initial_ns`, then every
    /// `interval_ns` if non-zero. A zero initial delay fires immediately.
    pub fn set(this: &Arc<Timer>, system: &mut System, initial_ns: u64, interval_ns: u64) {
        Timer::cancel(this, system);
        this.state.lock().interval_ns = interval_ns;
        if initial_ns == 0 {
            Timer::fire(this, system);
        } else {
            let handle = system
                .kernel
                .timing
                .schedule(initial_ns, TimingEventKind::TimerFire(Arc::downgrade(this)));
            this.state.lock().event = Some(handle);
        }
    }

    /// Disarm without clearing the signaled state.
    pub fn cancel(this: &Arc<Timer>, system: &mut System) {
        if let Some(handle) = this.state.lock().event.take() {
            system.kernel.timing.cancel(handle);
        }
    }

    pub fn clear(&self) {
        self.state.lock().signaled = false;
    }

    /// Deadline arrival: signal, wake waiters, and re-arm the interval.
    pub(crate) fn fire(this: &Arc<Timer>, system: &mut System) {
        {
            let mut state = this.state.lock();
            state.signaled = true;
            state.event = None;
        }
        wake::resume_ready_waiters(system, &Object::Timer(this.clone()));
        let interval = this.state.lock().interval_ns;
        if interval > 0 {
            let handle = system
                .kernel
                .timing
                .schedule(interval, TimingEventKind::TimerFire(Arc::downgrade(this)));
            this.state.lock().event = Some(handle);
        }
        if this.reset_type == ResetType::Pulse {
            this.state.lock().signaled = false;
        }
    }
}

impl WaitObject for Timer {
    fn should_wait(&self, _thread: &Arc<Thread>) -> bool {
        !self.is_signaled()
    }

    fn acquire(&self, _thread: &Arc<Thread>, _as_object: &Object) {
        if self.reset_type == ResetType::OneShot {
            self.state.lock().signaled = false;
        }
    }

    fn waiters(&self) -> &WaiterList {
        &self.waiters
    }
}
