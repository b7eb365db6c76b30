//! Shared test harness: a booted system with one application process and a
//! thread pinned to each core, driven through the same register convention
//! the dispatcher uses.

use std::sync::Arc;

use lotus_abi::layout::HEAP_VADDR;
use lotus_abi::mem::MemoryPermission;
use lotus_abi::result::{ResultCode, RESULT_SUCCESS};
use lotus_kernel::process::{CodeSet, Process, ProcessFlags};
use lotus_kernel::thread::Thread;
use lotus_kernel::{Config, System};

/// Guest scratch area committed by `boot`; tests use it for handle lists,
/// strings, and arbitration words.
pub const SCRATCH: u32 = HEAP_VADDR;
pub const SCRATCH_SIZE: u32 = 0x4000;

pub struct TestSystem {
    pub system: System,
    pub process: Arc<Process>,
    pub threads: Vec<Arc<Thread>>,
}

/// Boot a system with `thread_count` threads of one process, thread `i`
/// running on core `i`.
pub fn boot(thread_count: usize) -> TestSystem {
    let mut system = System::new(Config::default());
    assert!(thread_count <= system.core_count());

    let process = system
        .kernel
        .create_process(CodeSet::new("app", 0x0004_0000_0000_0000), ProcessFlags::default());
    process
        .heap_allocate(
            &mut system.memory,
            SCRATCH,
            SCRATCH_SIZE,
            MemoryPermission::READ_WRITE,
        )
        .expect("scratch commit failed");

    let mut threads = Vec::new();
    for i in 0..thread_count {
        let thread = system
            .kernel
            .create_thread(
                &mut system.memory,
                &process,
                format!("main-{i}"),
                0x0010_0000 + i as u32 * 0x1000,
                0,
                48,
                i,
                SCRATCH + SCRATCH_SIZE,
            )
            .expect("thread creation failed");
        threads.push(thread);
    }
    system.reschedule();

    TestSystem {
        system,
        process,
        threads,
    }
}

impl TestSystem {
    /// Invoke an SVC on `core` with the given input registers, then let the
    /// core honor any pending reschedule.
    pub fn svc_on(&mut self, core: usize, number: u32, regs: &[(usize, u32)]) {
        self.system.set_running_core(core);
        for &(n, value) in regs {
            self.system.core_mut(core).set_reg(n, value);
        }
        self.system.call_svc(number);
        self.system.reschedule();
    }

    pub fn reg(&self, core: usize, n: usize) -> u32 {
        self.system.core(core).reg(n)
    }

    /// The `ResultCode` left in r0 of `core`.
    pub fn result(&self, core: usize) -> ResultCode {
        ResultCode(self.reg(core, 0))
    }

    pub fn assert_success(&self, core: usize) {
        assert_eq!(self.result(core), RESULT_SUCCESS, "SVC failed on core {core}");
    }

    pub fn write_guest_u32(&mut self, addr: u32, value: u32) {
        self.system
            .memory
            .write_u32(&self.process, addr, value)
            .expect("guest write failed");
    }

    pub fn read_guest_u32(&self, addr: u32) -> u32 {
        self.system
            .memory
            .read_u32(&self.process, addr)
            .expect("guest read failed")
    }

    // -- SVC shorthands -----------------------------------------------------

    pub fn create_event(&mut self, core: usize, reset_type: u32) -> u32 {
        self.svc_on(core, lotus_abi::svc::CREATE_EVENT, &[(0, reset_type)]);
        self.assert_success(core);
        self.reg(core, 1)
    }

    pub fn signal_event(&mut self, core: usize, handle: u32) {
        self.svc_on(core, lotus_abi::svc::SIGNAL_EVENT, &[(0, handle)]);
        self.assert_success(core);
    }

    /// `WaitSynchronization1`, returning the raw result.
    pub fn wait1(&mut self, core: usize, handle: u32, nanos: i64) -> ResultCode {
        let nanos = nanos as u64;
        self.svc_on(
            core,
            lotus_abi::svc::WAIT_SYNCHRONIZATION_1,
            &[(0, handle), (1, nanos as u32), (2, (nanos >> 32) as u32)],
        );
        self.result(core)
    }

    /// `WaitSynchronizationN` over handles staged at `SCRATCH`.
    pub fn wait_n(
        &mut self,
        core: usize,
        handles: &[u32],
        wait_all: bool,
        nanos: i64,
    ) -> ResultCode {
        for (i, &handle) in handles.iter().enumerate() {
            self.write_guest_u32(SCRATCH + i as u32 * 4, handle);
        }
        let nanos = nanos as u64;
        self.svc_on(
            core,
            lotus_abi::svc::WAIT_SYNCHRONIZATION_N,
            &[
                (0, SCRATCH),
                (1, handles.len() as u32),
                (2, wait_all as u32),
                (3, nanos as u32),
                (4, (nanos >> 32) as u32),
            ],
        );
        self.result(core)
    }
}
