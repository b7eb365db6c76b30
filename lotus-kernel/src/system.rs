//! The system container: kernel, guest memory, and the CPU cores.
//!
//! A multi-core embedder wraps the system in the global kernel lock
//! (`SharedSystem`) and routes every software interrupt through
//! [`call_svc`]; handler bodies then observe a consistent kernel state for
//! their whole duration.

use std::sync::Arc;

use log::warn;
use spinning_top::Spinlock;

use crate::config::Config;
use crate::cpu::ArmCore;
use crate::kernel::Kernel;
use crate::memory::MemorySystem;
use crate::objects::Timer;
use crate::process::Process;
use crate::svc;
use crate::thread::{Thread, ThreadStatus};
use crate::timing::{ns_to_ticks, TimingEventKind};
use crate::wake;

/// Gross system condition, driven by `Break` and `KernelSetState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmuStatus {
    Running,
    /// The guest aborted through the `Break` SVC.
    Broken,
    ShutdownRequested,
}

pub struct System {
    pub config: Config,
    pub kernel: Kernel,
    pub memory: MemorySystem,
    cores: Vec<ArmCore>,
    running_core: usize,
    reschedule_pending: Vec<bool>,
    status: EmuStatus,
    hio_handler: Option<Box<dyn FnMut(u32) + Send>>,
}

/// The global kernel lock: one writer across all kernel state.
pub type SharedSystem = Arc<Spinlock<System>>;

impl System {
    pub fn new(config: Config) -> Self {
        let cores = (0..config.core_count).map(ArmCore::new).collect();
        System {
            kernel: Kernel::new(config.core_count),
            memory: MemorySystem::new(config.fcram_size),
            cores,
            running_core: 0,
            reschedule_pending: vec![false; config.core_count],
            status: EmuStatus::Running,
            hio_handler: None,
            config,
        }
    }

    pub fn into_shared(self) -> SharedSystem {
        Arc::new(Spinlock::new(self))
    }

    pub fn core_count(&self) -> usize {
        self.cores.len()
    }

    pub fn core(&self, core: usize) -> &ArmCore {
        &self.cores[core]
    }

    pub fn core_mut(&mut self, core: usize) -> &mut ArmCore {
        &mut self.cores[core]
    }

    pub fn running_core(&self) -> usize {
        self.running_core
    }

    pub fn set_running_core(&mut self, core: usize) {
        assert!(core < self.cores.len());
        self.running_core = core;
    }

    pub fn current_core(&self) -> &ArmCore {
        &self.cores[self.running_core]
    }

    pub fn current_core_mut(&mut self) -> &mut ArmCore {
        let core = self.running_core;
        &mut self.cores[core]
    }

    /// The thread executing on the running core.
    pub fn current_thread(&self) -> Option<Arc<Thread>> {
        self.kernel.current_thread(self.running_core)
    }

    /// The process owning the running core's current thread.
    pub fn current_process(&self) -> Option<Arc<Process>> {
        self.current_thread()?.owner_process.upgrade()
    }

    pub fn status(&self) -> EmuStatus {
        self.status
    }

    pub fn set_status(&mut self, status: EmuStatus) {
        self.status = status;
    }

    pub fn request_shutdown(&mut self) {
        self.status = EmuStatus::ShutdownRequested;
    }

    /// Install the debug-I/O request hook (`OutputDebugString` with len 0).
    pub fn set_hio_handler(&mut self, handler: Box<dyn FnMut(u32) + Send>) {
        self.hio_handler = Some(handler);
    }

    pub(crate) fn hio_request(&mut self, address: u32) {
        match &mut self.hio_handler {
            Some(handler) => handler(address),
            None => warn!("debug I/O request at {address:#010X} with no transport attached"),
        }
    }

    // --- reschedule flag ---------------------------------------------------

    /// Ask the running core to invoke the scheduler at its next safe point.
    pub fn prepare_reschedule(&mut self) {
        let core = self.running_core;
        self.prepare_reschedule_core(core);
    }

    pub(crate) fn prepare_reschedule_core(&mut self, core: usize) {
        self.reschedule_pending[core] = true;
    }

    pub fn needs_reschedule(&self, core: usize) -> bool {
        self.reschedule_pending[core]
    }

    /// Run the scheduler on every core; the CPU loop calls this at safe
    /// points when the pending flag is set.
    pub fn reschedule(&mut self) {
        for core in 0..self.cores.len() {
            self.reschedule_core(core);
            self.reschedule_pending[core] = false;
        }
    }

    fn reschedule_core(&mut self, core: usize) {
        let current = self.kernel.thread_managers[core].current().cloned();
        let current_running = current
            .as_ref()
            .map_or(false, |t| t.status() == ThreadStatus::Running);

        if current_running {
            let current_priority = current.as_ref().unwrap().current_priority();
            let preempt = self.kernel.thread_managers[core]
                .peek_ready_priority()
                .map_or(false, |p| p < current_priority);
            if !preempt {
                return;
            }
        }

        if let Some(ref thread) = current {
            if thread.status() == ThreadStatus::Running {
                thread.save_context(&self.cores[core]);
                thread.set_status(ThreadStatus::Ready);
                self.kernel.thread_managers[core].enqueue_ready(thread.clone());
            }
        }

        let next = self.kernel.thread_managers[core].pop_next_ready();
        if let Some(ref thread) = next {
            thread.set_status(ThreadStatus::Running);
            thread.load_context(&mut self.cores[core]);
        }
        self.kernel.thread_managers[core].set_current(next);
    }

    // --- time --------------------------------------------------------------

    /// Advance guest time, firing due wake-after-delay deadlines and timer
    /// objects. The caller still owns the follow-up `reschedule`.
    pub fn advance_time(&mut self, ns: u64) {
        let before = self.kernel.timing.now_ns();
        let due = self.kernel.timing.advance(ns);
        let tick_delta = ns_to_ticks(before + ns) - ns_to_ticks(before);
        for core in &mut self.cores {
            core.timer_mut().add_ticks(tick_delta);
        }
        for event in due {
            match event {
                TimingEventKind::ThreadWake(thread) => {
                    if let Some(thread) = thread.upgrade() {
                        wake::thread_timeout(self, &thread);
                    }
                }
                TimingEventKind::TimerFire(timer) => {
                    if let Some(timer) = timer.upgrade() {
                        Timer::fire(&timer, self);
                    }
                }
            }
        }
    }

    /// Dispatch a software interrupt on the running core.
    pub fn call_svc(&mut self, immediate: u32) {
        svc::call_svc(self, immediate);
    }
}

/// SVC entry for a multi-core embedder: takes the global kernel lock for
/// the whole call, making the handler atomic with respect to other SVCs.
pub fn call_svc(shared: &SharedSystem, core: usize, immediate: u32) {
    let mut system = shared.lock();
    system.set_running_core(core);
    system.call_svc(immediate);
}
