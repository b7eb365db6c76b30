//! Thread/process lifecycle, handles, and the introspection queries.

mod common;

use common::{boot, SCRATCH};

use lotus_abi::result::{
    ERR_INVALID_ENUM_VALUE, ERR_INVALID_HANDLE, ERR_NOT_AUTHORIZED, ERR_NOT_IMPLEMENTED,
    ERR_OUT_OF_RANGE, RESULT_SUCCESS, RESULT_TIMEOUT,
};
use lotus_abi::svc;
use lotus_abi::{ResourceLimitType, CURRENT_PROCESS, CURRENT_THREAD, PROCESSOR_ID_DEFAULT};
use lotus_kernel::process::ProcessStatus;
use lotus_kernel::thread::ThreadStatus;
use lotus_kernel::EmuStatus;

#[test]
fn system_tick_is_monotonic_and_advances() {
    let mut ts = boot(1);

    ts.svc_on(0, svc::GET_SYSTEM_TICK, &[]);
    let first = ts.reg(0, 0) as u64 | ((ts.reg(0, 1) as u64) << 32);
    ts.svc_on(0, svc::GET_SYSTEM_TICK, &[]);
    let second = ts.reg(0, 0) as u64 | ((ts.reg(0, 1) as u64) << 32);

    assert!(second >= first + 150, "tick must advance by the busy-wait step");
}

#[test]
fn create_thread_through_the_svc() {
    let mut ts = boot(1);

    ts.svc_on(
        0,
        svc::CREATE_THREAD,
        &[
            (0, 0x0010_2000),
            (1, 0x1234),
            (2, SCRATCH + 0x1000),
            (3, 48),
            (4, PROCESSOR_ID_DEFAULT as u32),
        ],
    );
    ts.assert_success(0);
    let thread_handle = ts.reg(0, 1);

    ts.svc_on(0, svc::GET_THREAD_ID, &[(0, thread_handle)]);
    ts.assert_success(0);
    let thread_id = ts.reg(0, 1);
    assert!(ts.system.kernel.find_thread_by_id(thread_id).is_some());

    ts.svc_on(0, svc::GET_PROCESS_ID_OF_THREAD, &[(0, thread_handle)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), ts.process.process_id);

    ts.svc_on(0, svc::GET_THREAD_PRIORITY, &[(0, thread_handle)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), 48);
}

#[test]
fn create_thread_priority_restrictions() {
    let mut ts = boot(1);

    // Past the lowest priority entirely.
    ts.svc_on(
        0,
        svc::CREATE_THREAD,
        &[(0, 0x0010_2000), (1, 0), (2, SCRATCH), (3, 64), (4, 0)],
    );
    assert_eq!(ts.result(0), ERR_OUT_OF_RANGE);

    // Better than the resource limit allows.
    ts.svc_on(
        0,
        svc::CREATE_THREAD,
        &[(0, 0x0010_2000), (1, 0), (2, SCRATCH), (3, 10), (4, 0)],
    );
    assert_eq!(ts.result(0), ERR_NOT_AUTHORIZED);

    // Lifting the restrictions makes the same request valid.
    ts.svc_on(
        0,
        svc::CONTROL_PROCESS,
        &[(0, CURRENT_PROCESS), (1, 7), (2, 1), (3, 0)],
    );
    ts.assert_success(0);
    ts.svc_on(
        0,
        svc::CREATE_THREAD,
        &[(0, 0x0010_2000), (1, 0), (2, SCRATCH), (3, 10), (4, 0)],
    );
    ts.assert_success(0);
}

#[test]
fn unknown_processor_id_is_out_of_range() {
    let mut ts = boot(1);
    ts.svc_on(
        0,
        svc::CREATE_THREAD,
        &[(0, 0x0010_2000), (1, 0), (2, SCRATCH), (3, 48), (4, 9)],
    );
    assert_eq!(ts.result(0), ERR_OUT_OF_RANGE);
}

#[test]
fn exit_thread_stops_and_signals_joiners() {
    let mut ts = boot(2);
    let worker = ts.threads[1].clone();

    // A joins on B through a duplicated thread handle.
    let handle = ts
        .process
        .create_handle(lotus_kernel::object::Object::Thread(worker.clone()))
        .unwrap();
    assert_eq!(ts.wait1(0, handle, 0), RESULT_TIMEOUT);
    assert_eq!(ts.wait1(0, handle, -1), RESULT_TIMEOUT);
    assert_eq!(ts.threads[0].status(), ThreadStatus::WaitSynchAny);

    ts.svc_on(1, svc::EXIT_THREAD, &[]);
    assert_eq!(worker.status(), ThreadStatus::Stopped);

    // The joiner observed the exit.
    assert_eq!(ts.threads[0].status(), ThreadStatus::Running);
    assert_eq!(ts.result(0), RESULT_SUCCESS);
}

#[test]
fn exit_process_stops_waiting_threads_and_unregisters() {
    let mut ts = boot(2);
    let waiter = ts.threads[1].clone();

    // B parks on an event forever.
    let event = ts.create_event(0, 0);
    assert_eq!(ts.wait1(1, event, -1), RESULT_TIMEOUT);
    assert_eq!(waiter.status(), ThreadStatus::WaitSynchAny);

    ts.svc_on(0, svc::EXIT_PROCESS, &[]);

    assert_eq!(ts.process.status(), ProcessStatus::Exited);
    assert_eq!(waiter.status(), ThreadStatus::Stopped);
    assert_eq!(ts.threads[0].status(), ThreadStatus::Stopped);
    assert!(ts.system.kernel.processes().is_empty());
    assert_eq!(ts.process.handle_count(), 0);
}

#[test]
fn process_list_and_open_process() {
    let mut ts = boot(1);

    ts.svc_on(0, svc::GET_PROCESS_LIST, &[(0, SCRATCH), (1, 8)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), 1);
    assert_eq!(ts.read_guest_u32(SCRATCH), ts.process.process_id);

    ts.svc_on(0, svc::OPEN_PROCESS, &[(0, ts.process.process_id)]);
    ts.assert_success(0);
    let handle = ts.reg(0, 1);
    ts.svc_on(0, svc::GET_PROCESS_ID, &[(0, handle)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), ts.process.process_id);

    ts.svc_on(0, svc::OPEN_PROCESS, &[(0, 0xFFFF)]);
    assert!(ts.result(0).is_error());
}

#[test]
fn close_and_duplicate_handles() {
    let mut ts = boot(1);

    let event = ts.create_event(0, 0);
    ts.svc_on(0, svc::DUPLICATE_HANDLE, &[(0, event)]);
    ts.assert_success(0);
    let duplicate = ts.reg(0, 1);
    assert_ne!(duplicate, event);

    ts.svc_on(0, svc::CLOSE_HANDLE, &[(0, event)]);
    ts.assert_success(0);

    // The duplicate still reaches the object; the original is dead.
    ts.signal_event(0, duplicate);
    ts.svc_on(0, svc::SIGNAL_EVENT, &[(0, event)]);
    assert_eq!(ts.result(0), ERR_INVALID_HANDLE);
    ts.svc_on(0, svc::CLOSE_HANDLE, &[(0, event)]);
    assert_eq!(ts.result(0), ERR_INVALID_HANDLE);
}

#[test]
fn handle_info_reports_reference_counts() {
    let mut ts = boot(1);

    let event = ts.create_event(0, 0);

    // type 1: reference count, excluding the lookup's own reference.
    ts.svc_on(0, svc::GET_HANDLE_INFO, &[(0, event), (1, 1)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), 1);

    ts.svc_on(0, svc::DUPLICATE_HANDLE, &[(0, event)]);
    ts.svc_on(0, svc::GET_HANDLE_INFO, &[(0, event), (1, 1)]);
    assert_eq!(ts.reg(0, 1), 2);

    // Stubbed types read as zero; unknown types fail.
    ts.svc_on(0, svc::GET_HANDLE_INFO, &[(0, event), (1, 2)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), 0);
    ts.svc_on(0, svc::GET_HANDLE_INFO, &[(0, event), (1, 99)]);
    assert_eq!(ts.result(0), ERR_INVALID_ENUM_VALUE);

    // type 0 on a process handle: creation ticks (zero at boot).
    ts.svc_on(0, svc::GET_HANDLE_INFO, &[(0, CURRENT_PROCESS), (1, 0)]);
    ts.assert_success(0);
}

#[test]
fn system_info_queries() {
    let mut ts = boot(1);

    // Kernel-spawned PID count is fixed.
    ts.svc_on(0, svc::GET_SYSTEM_INFO, &[(0, 26), (1, 0)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), 5);

    // Region usage reflects the boot commits.
    ts.svc_on(0, svc::GET_SYSTEM_INFO, &[(0, 0), (1, 1)]);
    ts.assert_success(0);
    assert!(ts.reg(0, 1) >= common::SCRATCH_SIZE);

    // The console-model probe succeeds on four cores (the default).
    ts.svc_on(0, svc::GET_SYSTEM_INFO, &[(0, 0x10001), (1, 0)]);
    ts.assert_success(0);

    // Emulator detection flag.
    ts.svc_on(0, svc::GET_SYSTEM_INFO, &[(0, 0x20000), (1, 0)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), 1);

    // Build-name chunk round-trips through the 7-byte packing.
    ts.svc_on(0, svc::GET_SYSTEM_INFO, &[(0, 0x20000), (1, 10)]);
    ts.assert_success(0);
    let packed = ts.reg(0, 1).to_le_bytes();
    assert_eq!(&packed[..4], b"lotu");
}

#[test]
fn console_model_probe_fails_off_four_cores() {
    let mut config = lotus_kernel::Config::default();
    config.core_count = 2;
    let mut system = lotus_kernel::System::new(config);
    let process = system.kernel.create_process(
        lotus_kernel::process::CodeSet::new("app", 1),
        lotus_kernel::process::ProcessFlags::default(),
    );
    process
        .heap_allocate(
            &mut system.memory,
            SCRATCH,
            0x1000,
            lotus_abi::mem::MemoryPermission::READ_WRITE,
        )
        .unwrap();
    system
        .kernel
        .create_thread(
            &mut system.memory,
            &process,
            "main".into(),
            0x0010_0000,
            0,
            48,
            0,
            SCRATCH + 0x1000,
        )
        .unwrap();
    system.reschedule();

    system.set_running_core(0);
    system.core_mut(0).set_reg(0, 0x10001);
    system.core_mut(0).set_reg(1, 0);
    system.call_svc(svc::GET_SYSTEM_INFO);
    assert_eq!(system.core(0).reg(0), ERR_INVALID_ENUM_VALUE.raw());
}

#[test]
fn process_info_queries() {
    let mut ts = boot(1);

    // Types 0 and 2: memory in use (page aligned at boot).
    ts.svc_on(0, svc::GET_PROCESS_INFO, &[(0, CURRENT_PROCESS), (1, 0)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), ts.process.memory_used());

    // Type 20: linear VA->PA conversion offset.
    ts.svc_on(0, svc::GET_PROCESS_INFO, &[(0, CURRENT_PROCESS), (1, 20)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), 0x0C00_0000);

    // The reserved block queries use a distinct error.
    ts.svc_on(0, svc::GET_PROCESS_INFO, &[(0, CURRENT_PROCESS), (1, 21)]);
    assert_eq!(ts.result(0), ERR_NOT_IMPLEMENTED);

    ts.svc_on(0, svc::GET_PROCESS_INFO, &[(0, CURRENT_PROCESS), (1, 1234)]);
    assert_eq!(ts.result(0), ERR_INVALID_ENUM_VALUE);

    // The custom name query packs the codeset name.
    ts.svc_on(0, svc::GET_PROCESS_INFO, &[(0, CURRENT_PROCESS), (1, 0x10000)]);
    ts.assert_success(0);
    assert_eq!(&ts.reg(0, 1).to_le_bytes()[..3], b"app");
}

#[test]
fn thread_info_reports_tls() {
    let mut ts = boot(1);

    ts.svc_on(0, svc::GET_THREAD_INFO, &[(0, CURRENT_THREAD), (1, 0x10000)]);
    ts.assert_success(0);
    assert_eq!(ts.reg(0, 1), ts.threads[0].tls_address());

    ts.svc_on(0, svc::GET_THREAD_INFO, &[(0, CURRENT_THREAD), (1, 1)]);
    assert_eq!(ts.result(0), ERR_INVALID_ENUM_VALUE);
}

#[test]
fn resource_limit_values_round_trip() {
    let mut ts = boot(1);

    ts.svc_on(0, svc::GET_RESOURCE_LIMIT, &[(0, CURRENT_PROCESS)]);
    ts.assert_success(0);
    let limit = ts.reg(0, 1);

    // One name: the priority cap.
    let names = SCRATCH;
    let values = SCRATCH + 0x100;
    ts.write_guest_u32(names, ResourceLimitType::Priority as u32);
    ts.svc_on(
        0,
        svc::GET_RESOURCE_LIMIT_LIMIT_VALUES,
        &[(0, values), (1, limit), (2, names), (3, 1)],
    );
    ts.assert_success(0);
    assert_eq!(ts.read_guest_u32(values), 24);
    assert_eq!(ts.read_guest_u32(values + 4), 0);

    ts.svc_on(
        0,
        svc::GET_RESOURCE_LIMIT_CURRENT_VALUES,
        &[(0, values), (1, limit), (2, names), (3, 1)],
    );
    ts.assert_success(0);
    assert_eq!(ts.read_guest_u32(values), 0);
}

#[test]
fn break_marks_the_system_broken() {
    let mut ts = boot(1);
    ts.svc_on(0, svc::BREAK, &[(0, 1)]);
    assert_eq!(ts.system.status(), EmuStatus::Broken);
}

#[test]
fn kernel_set_state_reboot_requests_shutdown() {
    let mut ts = boot(1);

    // Unknown states still succeed.
    ts.svc_on(0, svc::KERNEL_SET_STATE, &[(0, 3), (1, 0), (2, 0)]);
    ts.assert_success(0);
    assert_eq!(ts.system.status(), EmuStatus::Running);

    ts.svc_on(0, svc::KERNEL_SET_STATE, &[(0, 7), (1, 0), (2, 0)]);
    ts.assert_success(0);
    assert_eq!(ts.system.status(), EmuStatus::ShutdownRequested);
}

#[test]
fn output_debug_string_routes_hio_requests() {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    let mut ts = boot(1);

    let seen = Arc::new(AtomicU32::new(0));
    let seen_hook = seen.clone();
    ts.system.set_hio_handler(Box::new(move |addr| {
        seen_hook.store(addr, Ordering::SeqCst);
    }));

    // Plain text logs without touching the hook.
    ts.system
        .memory
        .write_block(&ts.process.clone(), SCRATCH, b"hello")
        .unwrap();
    ts.svc_on(0, svc::OUTPUT_DEBUG_STRING, &[(0, SCRATCH), (1, 5)]);
    assert_eq!(seen.load(Ordering::SeqCst), 0);

    // Zero length is the debug-I/O escape.
    ts.svc_on(0, svc::OUTPUT_DEBUG_STRING, &[(0, SCRATCH), (1, 0)]);
    assert_eq!(seen.load(Ordering::SeqCst), SCRATCH);

    // Negative lengths are ignored.
    ts.svc_on(0, svc::OUTPUT_DEBUG_STRING, &[(0, SCRATCH), (1, u32::MAX)]);
    assert_eq!(seen.load(Ordering::SeqCst), SCRATCH);
}

#[test]
fn control_process_gates_scheduling_by_tls_magic() {
    let mut ts = boot(3);
    let gated = ts.threads[1].clone();
    let exempt = ts.threads[2].clone();

    // Mark thread 2's TLS with the magic the lock skips.
    ts.write_guest_u32(exempt.tls_address(), 0x54534C21);

    ts.svc_on(
        0,
        svc::CONTROL_PROCESS,
        &[(0, CURRENT_PROCESS), (1, 6), (2, 1), (3, 0x54534C21)],
    );
    ts.assert_success(0);

    assert!(!gated.can_schedule());
    assert!(exempt.can_schedule());
    assert!(ts.threads[0].can_schedule()); // the caller is skipped

    // Unlock.
    ts.svc_on(
        0,
        svc::CONTROL_PROCESS,
        &[(0, CURRENT_PROCESS), (1, 6), (2, 0), (3, 0x54534C21)],
    );
    ts.assert_success(0);
    assert!(gated.can_schedule());
}

#[test]
fn control_process_memory_change_event_and_unknown_ops() {
    let mut ts = boot(1);

    // The memory-change event handle is written through the guest pointer.
    ts.svc_on(
        0,
        svc::CONTROL_PROCESS,
        &[(0, CURRENT_PROCESS), (1, 2), (2, SCRATCH + 0x40), (3, 0)],
    );
    ts.assert_success(0);
    let event_handle = ts.read_guest_u32(SCRATCH + 0x40);
    assert!(ts
        .process
        .get_object(event_handle)
        .and_then(|o| o.as_event().cloned())
        .is_some());

    // Documented-but-unimplemented sub-ops are reported as such.
    ts.svc_on(
        0,
        svc::CONTROL_PROCESS,
        &[(0, CURRENT_PROCESS), (1, 0), (2, 0), (3, 0)],
    );
    assert_eq!(ts.result(0), ERR_NOT_IMPLEMENTED);
}
