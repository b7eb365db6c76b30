//! Parking and waking of guest threads.
//!
//! Handlers never block the host: a "suspended" thread is a state flip plus
//! an optional wake-after-delay deadline and a wakeup callback. The
//! functions here are the only paths that resume a parked thread.

use std::sync::Arc;

use lotus_abi::result::{RESULT_SUCCESS, RESULT_TIMEOUT};

use crate::ipc;
use crate::object::Object;
use crate::system::System;
use crate::thread::{Thread, ThreadStatus, WakeupCallback};
use crate::timing::TimingEventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Signal,
    Timeout,
}

/// Arm the wake-after-delay deadline. Negative delays mean "wait forever".
pub(crate) fn wake_after_delay(system: &mut System, thread: &Arc<Thread>, nanoseconds: i64) {
    if nanoseconds < 0 {
        return;
    }
    let handle = system.kernel.timing.schedule(
        nanoseconds as u64,
        TimingEventKind::ThreadWake(Arc::downgrade(thread)),
    );
    thread.set_wake_event(handle);
}

/// Wake every waiter of `object` that can now acquire it, FIFO. Each wake
/// performs exactly one acquire (all listed objects for a wait-all).
pub(crate) fn resume_ready_waiters(system: &mut System, object: &Object) {
    let Some(wait_object) = object.wait_object() else {
        return;
    };
    loop {
        let candidate = wait_object.waiters().snapshot().into_iter().find(|thread| {
            match thread.status() {
                ThreadStatus::WaitSynchAny => !wait_object.should_wait(thread),
                ThreadStatus::WaitSynchAll => {
                    !wait_object.should_wait(thread)
                        && thread
                            .wait_objects()
                            .iter()
                            .all(|o| !o.should_wait(thread))
                }
                // Stale entry: the thread left the wait by other means.
                _ => false,
            }
        });
        let Some(thread) = candidate else {
            break;
        };

        if thread.status() == ThreadStatus::WaitSynchAll {
            for waited in thread.wait_objects() {
                waited.acquire(&thread);
            }
        } else {
            object.acquire(&thread);
        }

        resume_from_wait(system, &thread, WakeReason::Signal, Some(object));
    }
}

/// Resume a parked thread: run its wakeup callback, detach it from its wait
/// set and pending deadline, and hand it back to its core's ready queue.
pub(crate) fn resume_from_wait(
    system: &mut System,
    thread: &Arc<Thread>,
    reason: WakeReason,
    object: Option<&Object>,
) {
    match thread.take_wakeup_callback() {
        Some(WakeupCallback::Sync { do_output }) => match reason {
            WakeReason::Timeout => {
                thread.set_wait_synchronization_result(RESULT_TIMEOUT);
            }
            WakeReason::Signal => {
                thread.set_wait_synchronization_result(RESULT_SUCCESS);
                if do_output {
                    let object = object.expect("sync wake without a signaling object");
                    if let Some(index) = thread.wait_object_index(object) {
                        thread.set_wait_synchronization_output(index);
                    }
                }
            }
        },
        Some(WakeupCallback::Ipc) => {
            assert_eq!(reason, WakeReason::Signal, "IPC wakeup without a signal");
            assert_eq!(thread.status(), ThreadStatus::WaitSynchAny);
            let object = object.expect("IPC wake without a signaling object");
            let result = match object.as_server_session() {
                Some(session) => ipc::receive_ipc_request(system, session, thread),
                None => RESULT_SUCCESS,
            };
            thread.set_wait_synchronization_result(result);
            if let Some(index) = thread.wait_object_index(object) {
                thread.set_wait_synchronization_output(index);
            }
        }
        None => {
            // Plain resumes (sleep, IPC reply, arbiter) carry no callback;
            // an arbiter timeout still has to surface as such.
            if reason == WakeReason::Timeout && thread.status() == ThreadStatus::WaitArb {
                thread.set_wait_synchronization_result(RESULT_TIMEOUT);
            }
        }
    }

    if let Some(handle) = thread.take_wake_event() {
        system.kernel.timing.cancel(handle);
    }
    for waited in thread.take_wait_objects() {
        waited.remove_waiting_thread(thread);
    }
    thread.set_arb_wait_address(0);
    thread.set_status(ThreadStatus::Ready);
    system.kernel.thread_managers[thread.core_id].enqueue_ready(thread.clone());
    system.prepare_reschedule_core(thread.core_id);
}

/// Wake-after-delay deadline arrived while the thread was still parked.
pub(crate) fn thread_timeout(system: &mut System, thread: &Arc<Thread>) {
    if thread.status().is_waiting() {
        resume_from_wait(system, thread, WakeReason::Timeout, None);
    }
}

/// Terminate a thread: detach it from every wait, drop its held mutexes,
/// and signal joiners.
pub(crate) fn stop_thread(system: &mut System, thread: &Arc<Thread>) {
    if thread.status() == ThreadStatus::Stopped {
        return;
    }
    if let Some(handle) = thread.take_wake_event() {
        system.kernel.timing.cancel(handle);
    }
    for waited in thread.take_wait_objects() {
        waited.remove_waiting_thread(thread);
    }
    thread.set_status(ThreadStatus::Stopped);
    for mutex in thread.held_mutexes() {
        crate::objects::Mutex::release_for_exit(&mutex, system, thread);
    }
    resume_ready_waiters(system, &Object::Thread(thread.clone()));
    system.prepare_reschedule_core(thread.core_id);
}
