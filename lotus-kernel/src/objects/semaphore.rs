//! Counting semaphores.

use std::sync::Arc;

use spinning_top::Spinlock;

use lotus_abi::result::{ERR_INVALID_COMBINATION_KERNEL, ERR_OUT_OF_RANGE_KERNEL};

use crate::object::{Object, WaiterList, WaitObject};
use crate::system::System;
use crate::thread::Thread;
use crate::wake;
use crate::SvcResult;

pub struct Semaphore {
    pub name: String,
    pub max_count: i32,
    available: Spinlock<i32>,
    waiters: WaiterList,
}

impl Semaphore {
    pub fn new(initial_count: i32, max_count: i32, name: String) -> SvcResult<Self> {
        if initial_count < 0 || max_count <= 0 || initial_count > max_count {
            return Err(ERR_INVALID_COMBINATION_KERNEL);
        }
        Ok(Semaphore {
            name,
            max_count,
            available: Spinlock::new(initial_count),
            waiters: WaiterList::new(),
        })
    }

    pub fn available_count(&self) -> i32 {
        *self.available.lock()
    }

    /// Free `release_count` slots, waking waiters. Returns the count before
    /// the release.
    pub fn release(
        this: &Arc<Semaphore>,
        system: &mut System,
        release_count: i32,
    ) -> SvcResult<i32> {
        let previous = {
            let mut available = this.available.lock();
            if release_count < 0 || this.max_count - *available < release_count {
                return Err(ERR_OUT_OF_RANGE_KERNEL);
            }
            let previous = *available;
            *available += release_count;
            previous
        };
        wake::resume_ready_waiters(system, &Object::Semaphore(this.clone()));
        Ok(previous)
    }
}

impl WaitObject for Semaphore {
    fn should_wait(&self, _thread: &Arc<Thread>) -> bool {
        *self.available.lock() <= 0
    }

    fn acquire(&self, _thread: &Arc<Thread>, _as_object: &Object) {
        *self.available.lock() -= 1;
    }

    fn waiters(&self) -> &WaiterList {
        &self.waiters
    }
}
