//! Threads and the per-core thread manager.
//!
//! Scheduling is cooperative from the host's point of view: SVC handlers
//! park and wake threads, set the reschedule flag, and the CPU core performs
//! the actual context switch at its next safe point.

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use spinning_top::Spinlock;

use lotus_abi::result::ResultCode;

use crate::cpu::{ArmCore, CpuContext};
use crate::object::{Object, WaiterList, WaitObject};
use crate::objects::Mutex;
use crate::process::Process;
use crate::timing::TimingEventHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Ready,
    Running,
    WaitSleep,
    WaitIpc,
    WaitSynchAny,
    WaitSynchAll,
    WaitArb,
    Stopped,
}

impl ThreadStatus {
    /// Whether a wake-after-delay timeout may legitimately fire in this state.
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            ThreadStatus::WaitSleep
                | ThreadStatus::WaitIpc
                | ThreadStatus::WaitSynchAny
                | ThreadStatus::WaitSynchAll
                | ThreadStatus::WaitArb
        )
    }
}

/// Continuation run when a parked thread is resumed; consumed on resume.
#[derive(Debug, Clone, Copy)]
pub enum WakeupCallback {
    /// Wait-synchronization completion. `do_output` selects whether the
    /// signaled object's index is written back.
    Sync { do_output: bool },
    /// IPC-receive completion for `ReplyAndReceive`.
    Ipc,
}

struct ThreadState {
    status: ThreadStatus,
    context: CpuContext,
    nominal_priority: u32,
    current_priority: u32,
    tls_address: u32,
    can_schedule: bool,
    wait_objects: Vec<Object>,
    wakeup_callback: Option<WakeupCallback>,
    wake_event: Option<TimingEventHandle>,
    pending_mutexes: Vec<Arc<Mutex>>,
    held_mutexes: Vec<Arc<Mutex>>,
    arb_wait_address: u32,
}

pub struct Thread {
    pub thread_id: u32,
    pub core_id: usize,
    pub name: String,
    /// Non-owning back reference; process teardown must not be blocked by
    /// its own threads.
    pub owner_process: Weak<Process>,
    state: Spinlock<ThreadState>,
    waiters: WaiterList,
}

impl Thread {
    pub fn new(
        thread_id: u32,
        core_id: usize,
        name: String,
        owner_process: Weak<Process>,
        priority: u32,
        tls_address: u32,
        context: CpuContext,
    ) -> Self {
        Thread {
            thread_id,
            core_id,
            name,
            owner_process,
            state: Spinlock::new(ThreadState {
                status: ThreadStatus::Ready,
                context,
                nominal_priority: priority,
                current_priority: priority,
                tls_address,
                can_schedule: true,
                wait_objects: Vec::new(),
                wakeup_callback: None,
                wake_event: None,
                pending_mutexes: Vec::new(),
                held_mutexes: Vec::new(),
                arb_wait_address: 0,
            }),
            waiters: WaiterList::new(),
        }
    }

    pub fn status(&self) -> ThreadStatus {
        self.state.lock().status
    }

    pub fn set_status(&self, status: ThreadStatus) {
        self.state.lock().status = status;
    }

    /// Effective priority after inheritance.
    pub fn current_priority(&self) -> u32 {
        self.state.lock().current_priority
    }

    pub fn nominal_priority(&self) -> u32 {
        self.state.lock().nominal_priority
    }

    pub fn set_nominal_priority(&self, priority: u32) {
        self.state.lock().nominal_priority = priority;
    }

    /// Recompute the effective priority from the nominal one and the boost
    /// contributed by contended mutexes this thread holds.
    pub fn update_priority(&self) {
        let held = self.held_mutexes();
        let mut best = self.nominal_priority();
        for mutex in held {
            if let Some(boost) = mutex.boost_priority() {
                best = best.min(boost);
            }
        }
        self.state.lock().current_priority = best;
    }

    pub fn can_schedule(&self) -> bool {
        self.state.lock().can_schedule
    }

    pub fn set_can_schedule(&self, value: bool) {
        self.state.lock().can_schedule = value;
    }

    pub fn tls_address(&self) -> u32 {
        self.state.lock().tls_address
    }

    /// The IPC command buffer sits at the start of the TLS page.
    pub fn command_buffer_address(&self) -> u32 {
        self.tls_address()
    }

    pub fn set_fpscr(&self, value: u32) {
        self.state.lock().context.set_fpscr(value);
    }

    /// Result a resumed wait reports to the guest, in r0 of the saved context.
    pub fn set_wait_synchronization_result(&self, result: ResultCode) {
        self.state.lock().context.regs[0] = result.raw();
    }

    /// Index output of a resumed wait, in r1 of the saved context.
    pub fn set_wait_synchronization_output(&self, index: i32) {
        self.state.lock().context.regs[1] = index as u32;
    }

    pub fn set_wait_objects(&self, objects: Vec<Object>) {
        self.state.lock().wait_objects = objects;
    }

    pub fn take_wait_objects(&self) -> Vec<Object> {
        std::mem::take(&mut self.state.lock().wait_objects)
    }

    pub fn wait_objects(&self) -> Vec<Object> {
        self.state.lock().wait_objects.clone()
    }

    /// Position of `object` in the thread's wait set.
    pub fn wait_object_index(&self, object: &Object) -> Option<i32> {
        self.state
            .lock()
            .wait_objects
            .iter()
            .position(|o| o.ptr_eq(object))
            .map(|i| i as i32)
    }

    pub fn set_wakeup_callback(&self, callback: WakeupCallback) {
        let mut state = self.state.lock();
        debug_assert!(
            state.wakeup_callback.is_none(),
            "thread already has a wakeup callback installed"
        );
        state.wakeup_callback = Some(callback);
    }

    pub fn take_wakeup_callback(&self) -> Option<WakeupCallback> {
        self.state.lock().wakeup_callback.take()
    }

    pub fn set_wake_event(&self, handle: TimingEventHandle) {
        self.state.lock().wake_event = Some(handle);
    }

    pub fn take_wake_event(&self) -> Option<TimingEventHandle> {
        self.state.lock().wake_event.take()
    }

    pub fn arb_wait_address(&self) -> u32 {
        self.state.lock().arb_wait_address
    }

    pub fn set_arb_wait_address(&self, address: u32) {
        self.state.lock().arb_wait_address = address;
    }

    pub fn add_pending_mutex(&self, mutex: Arc<Mutex>) {
        let mut state = self.state.lock();
        if !state.pending_mutexes.iter().any(|m| Arc::ptr_eq(m, &mutex)) {
            state.pending_mutexes.push(mutex);
        }
    }

    pub fn remove_pending_mutex(&self, mutex: &Mutex) {
        self.state
            .lock()
            .pending_mutexes
            .retain(|m| !std::ptr::eq(m.as_ref(), mutex));
    }

    pub fn pending_mutexes(&self) -> Vec<Arc<Mutex>> {
        self.state.lock().pending_mutexes.clone()
    }

    pub fn add_held_mutex(&self, mutex: Arc<Mutex>) {
        let mut state = self.state.lock();
        if !state.held_mutexes.iter().any(|m| Arc::ptr_eq(m, &mutex)) {
            state.held_mutexes.push(mutex);
        }
    }

    pub fn remove_held_mutex(&self, mutex: &Mutex) {
        self.state
            .lock()
            .held_mutexes
            .retain(|m| !std::ptr::eq(m.as_ref(), mutex));
    }

    pub fn held_mutexes(&self) -> Vec<Arc<Mutex>> {
        self.state.lock().held_mutexes.clone()
    }

    /// Checkpoint the core's live registers into this thread.
    pub fn save_context(&self, core: &ArmCore) {
        core.save_context(&mut self.state.lock().context);
    }

    /// Restore this thread's registers onto the core.
    pub fn load_context(&self, core: &mut ArmCore) {
        core.load_context(&self.state.lock().context);
    }

    /// Saved register, for introspection and tests.
    pub fn context_reg(&self, n: usize) -> u32 {
        self.state.lock().context.regs[n]
    }
}

impl WaitObject for Thread {
    fn should_wait(&self, _thread: &Arc<Thread>) -> bool {
        self.status() != ThreadStatus::Stopped
    }

    fn acquire(&self, _thread: &Arc<Thread>, _as_object: &Object) {}

    fn waiters(&self) -> &WaiterList {
        &self.waiters
    }
}

/// Per-core scheduler state. Each CPU core owns exactly one.
pub struct ThreadManager {
    pub core_id: usize,
    threads: Vec<Arc<Thread>>,
    ready: VecDeque<Arc<Thread>>,
    current: Option<Arc<Thread>>,
}

impl ThreadManager {
    pub fn new(core_id: usize) -> Self {
        ThreadManager {
            core_id,
            threads: Vec::new(),
            ready: VecDeque::new(),
            current: None,
        }
    }

    pub fn register(&mut self, thread: Arc<Thread>) {
        self.threads.push(thread);
    }

    /// Every thread ever created on this core, stopped ones included.
    pub fn thread_list(&self) -> &[Arc<Thread>] {
        &self.threads
    }

    pub fn current(&self) -> Option<&Arc<Thread>> {
        self.current.as_ref()
    }

    pub(crate) fn set_current(&mut self, thread: Option<Arc<Thread>>) {
        self.current = thread;
    }

    /// Queue a thread for execution. Duplicates are ignored.
    pub fn enqueue_ready(&mut self, thread: Arc<Thread>) {
        if self.ready.iter().any(|t| Arc::ptr_eq(t, &thread)) {
            return;
        }
        self.ready.push_back(thread);
    }

    /// Whether any queued thread is actually runnable.
    pub fn have_ready_threads(&self) -> bool {
        self.ready
            .iter()
            .any(|t| t.status() == ThreadStatus::Ready && t.can_schedule())
    }

    /// Best queued priority, for the preemption decision.
    pub(crate) fn peek_ready_priority(&self) -> Option<u32> {
        self.ready
            .iter()
            .filter(|t| t.status() == ThreadStatus::Ready && t.can_schedule())
            .map(|t| t.current_priority())
            .min()
    }

    /// Pop the highest-priority runnable thread; FIFO within a priority.
    /// Entries whose thread was stopped or re-parked since queueing are
    /// discarded along the way.
    pub(crate) fn pop_next_ready(&mut self) -> Option<Arc<Thread>> {
        self.ready.retain(|t| t.status() == ThreadStatus::Ready);
        let mut best: Option<(usize, u32)> = None;
        for (i, t) in self.ready.iter().enumerate() {
            if !t.can_schedule() {
                continue;
            }
            let priority = t.current_priority();
            if best.map_or(true, |(_, bp)| priority < bp) {
                best = Some((i, priority));
            }
        }
        best.and_then(|(i, _)| self.ready.remove(i))
    }
}
