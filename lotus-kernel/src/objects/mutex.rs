//! Mutexes with priority inheritance.

use std::sync::Arc;

use spinning_top::Spinlock;

use lotus_abi::result::ERR_WRONG_LOCKING_THREAD;
use lotus_abi::THREAD_PRIO_LOWEST;

use crate::object::{Object, WaiterList, WaitObject};
use crate::system::System;
use crate::thread::Thread;
use crate::wake;
use crate::SvcResult;

struct MutexState {
    lock_count: u32,
    /// Best (numerically lowest) priority among current waiters; only
    /// meaningful while the waiter list is non-empty.
    priority: u32,
    holder: Option<Arc<Thread>>,
}

pub struct Mutex {
    pub name: String,
    state: Spinlock<MutexState>,
    waiters: WaiterList,
}

impl Mutex {
    pub fn new(name: String) -> Self {
        Mutex {
            name,
            state: Spinlock::new(MutexState {
                lock_count: 0,
                priority: THREAD_PRIO_LOWEST,
                holder: None,
            }),
            waiters: WaiterList::new(),
        }
    }

    pub fn holder(&self) -> Option<Arc<Thread>> {
        self.state.lock().holder.clone()
    }

    /// The priority boost this mutex contributes to its holder, if contended.
    pub fn boost_priority(&self) -> Option<u32> {
        if self.waiters.is_empty() {
            None
        } else {
            Some(self.state.lock().priority)
        }
    }

    /// Recompute the contended priority from the waiter list and propagate
    /// the change to the holding thread.
    pub fn update_priority(&self) {
        let best = self
            .waiters
            .snapshot()
            .iter()
            .map(|t| t.current_priority())
            .min()
            .unwrap_or(THREAD_PRIO_LOWEST);
        let holder = {
            let mut state = self.state.lock();
            state.priority = best;
            state.holder.clone()
        };
        if let Some(holder) = holder {
            holder.update_priority();
        }
    }

    /// Take (or re-enter) the mutex on behalf of `thread`.
    pub(crate) fn acquire_by(this: &Arc<Mutex>, thread: &Arc<Thread>) {
        let newly_held = {
            let mut state = this.state.lock();
            match &state.holder {
                None => {
                    state.holder = Some(thread.clone());
                    state.lock_count = 1;
                    true
                }
                Some(holder) if Arc::ptr_eq(holder, thread) => {
                    state.lock_count += 1;
                    false
                }
                // Acquire of a mutex held elsewhere never happens; the
                // waiter is only resumed once should_wait clears.
                Some(_) => false,
            }
        };
        if newly_held {
            thread.add_held_mutex(this.clone());
            thread.update_priority();
        }
    }

    /// Release one recursion level; fully releasing wakes the next waiter.
    pub fn release(this: &Arc<Mutex>, system: &mut System, thread: &Arc<Thread>) -> SvcResult<()> {
        {
            let mut state = this.state.lock();
            match &state.holder {
                Some(holder) if Arc::ptr_eq(holder, thread) => {
                    state.lock_count -= 1;
                    if state.lock_count > 0 {
                        return Ok(());
                    }
                    state.holder = None;
                }
                _ => return Err(ERR_WRONG_LOCKING_THREAD),
            }
        }
        thread.remove_held_mutex(this.as_ref());
        thread.update_priority();
        wake::resume_ready_waiters(system, &Object::Mutex(this.clone()));
        Ok(())
    }

    /// Forcibly drop the mutex when its holder exits.
    pub fn release_for_exit(this: &Arc<Mutex>, system: &mut System, thread: &Arc<Thread>) {
        {
            let mut state = this.state.lock();
            match &state.holder {
                Some(holder) if Arc::ptr_eq(holder, thread) => {
                    state.holder = None;
                    state.lock_count = 0;
                }
                _ => return,
            }
        }
        thread.remove_held_mutex(this.as_ref());
        wake::resume_ready_waiters(system, &Object::Mutex(this.clone()));
    }
}

impl WaitObject for Mutex {
    fn should_wait(&self, thread: &Arc<Thread>) -> bool {
        match &self.state.lock().holder {
            Some(holder) => !Arc::ptr_eq(holder, thread),
            None => false,
        }
    }

    fn acquire(&self, thread: &Arc<Thread>, as_object: &Object) {
        let this = as_object
            .as_mutex()
            .expect("mutex acquire dispatched with a non-mutex object");
        Mutex::acquire_by(this, thread);
    }

    fn add_waiting_thread(&self, thread: Arc<Thread>, as_object: &Object) {
        let this = as_object
            .as_mutex()
            .expect("mutex wait registered with a non-mutex object");
        self.waiters().add(thread.clone());
        thread.add_pending_mutex(this.clone());
        self.update_priority();
    }

    fn remove_waiting_thread(&self, thread: &Arc<Thread>) {
        self.waiters().remove(thread);
        thread.remove_pending_mutex(self);
        self.update_priority();
    }

    fn waiters(&self) -> &WaiterList {
        &self.waiters
    }
}
