//! Events.

use std::sync::Arc;

use spinning_top::Spinlock;

use lotus_abi::ResetType;

use crate::object::{Object, WaiterList, WaitObject};
use crate::system::System;
use crate::thread::Thread;
use crate::wake;

pub struct Event {
    pub name: String,
    pub reset_type: ResetType,
    signaled: Spinlock<bool>,
    waiters: WaiterList,
}

impl Event {
    pub fn new(reset_type: ResetType, name: String) -> Self {
        Event {
            name,
            reset_type,
            signaled: Spinlock::new(false),
            waiters: WaiterList::new(),
        }
    }

    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }

    /// Signal the event and wake every waiter that can now acquire it.
    pub fn signal(this: &Arc<Event>, system: &mut System) {
        *this.signaled.lock() = true;
        wake::resume_ready_waiters(system, &Object::Event(this.clone()));
        if this.reset_type == ResetType::Pulse {
            *this.signaled.lock() = false;
        }
    }

    pub fn clear(&self) {
        *self.signaled.lock() = false;
    }
}

impl WaitObject for Event {
    fn should_wait(&self, _thread: &Arc<Thread>) -> bool {
        !self.is_signaled()
    }

    fn acquire(&self, _thread: &Arc<Thread>, _as_object: &Object) {
        if self.reset_type == ResetType::OneShot {
            *self.signaled.lock() = false;
        }
    }

    fn waiters(&self) -> &WaiterList {
        &self.waiters
    }
}
