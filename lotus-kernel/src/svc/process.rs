//! Process lifecycle and control SVC handlers.

use std::sync::Arc;

use log::{error, info, trace};

use lotus_abi::result::{
    ERR_INVALID_POINTER, ERR_NOT_IMPLEMENTED, ERR_PROCESS_NOT_FOUND,
};
use lotus_abi::Handle;

use crate::object::Object;
use crate::process::ProcessStatus;
use crate::thread::ThreadStatus;
use crate::wake;
use crate::SvcResult;

use super::{finish, SvcContext};

/// Operation selector for `ControlProcess`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlProcessOp {
    GetAllHandles,
    SetMmuToRwx,
    GetOnMemoryChangeEvent,
    SignalOnExit,
    GetPaFromVa,
    ScheduleThreads,
    ScheduleThreadsWithoutTlsMagic,
    DisableCreateThreadRestrictions,
}

impl ControlProcessOp {
    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::GetAllHandles),
            1 => Some(Self::SetMmuToRwx),
            2 => Some(Self::GetOnMemoryChangeEvent),
            3 => Some(Self::SignalOnExit),
            4 => Some(Self::GetPaFromVa),
            5 => Some(Self::ScheduleThreads),
            6 => Some(Self::ScheduleThreadsWithoutTlsMagic),
            7 => Some(Self::DisableCreateThreadRestrictions),
            _ => None,
        }
    }
}

pub(super) fn exit_process(ctx: &mut SvcContext) {
    let current_process = ctx.current_process();
    info!("Process {} exiting", current_process.process_id);

    assert!(
        current_process.status() == ProcessStatus::Running,
        "Process has already exited"
    );

    current_process.set_status(ProcessStatus::Exited);

    let current_thread = ctx.current_thread();

    // Stop every process thread currently waiting for objects.
    for thread in ctx.system.kernel.all_threads() {
        let owned = thread
            .owner_process
            .upgrade()
            .map_or(false, |owner| Arc::ptr_eq(&owner, &current_process));
        if !owned || Arc::ptr_eq(&thread, &current_thread) {
            continue;
        }
        let status = thread.status();
        if status == ThreadStatus::Stopped {
            continue;
        }
        assert!(
            matches!(status, ThreadStatus::WaitSynchAny | ThreadStatus::WaitSynchAll),
            "exiting processes with non-waiting threads is currently unimplemented"
        );
        wake::stop_thread(ctx.system, &thread);
    }

    let system = &mut *ctx.system;
    current_process.tear_down(&mut system.memory);

    // Kill the current thread and signal anything joined on the process.
    wake::stop_thread(ctx.system, &current_thread);
    wake::resume_ready_waiters(ctx.system, &Object::Process(current_process.clone()));

    // Drop the kernel reference so the process can be cleaned up.
    ctx.system.kernel.remove_process(&current_process);

    ctx.system.prepare_reschedule();
}

pub(super) fn open_process(ctx: &mut SvcContext) {
    let process_id = ctx.reg(0);
    let result = ctx.open_process(process_id);
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn get_process_id(ctx: &mut SvcContext) {
    let process_handle = ctx.reg(0);
    trace!("called process={process_handle:#010X}");
    let result = ctx.get_process(process_handle).map(|p| p.process_id);
    finish(ctx, result, |ctx, id| ctx.set_reg(1, id));
}

pub(super) fn get_process_list(ctx: &mut SvcContext) {
    let out_process_array = ctx.reg(0);
    let out_process_array_count = ctx.reg(1) as i32;
    let result = ctx.get_process_list(out_process_array, out_process_array_count);
    finish(ctx, result, |ctx, count| ctx.set_reg(1, count as u32));
}

pub(super) fn control_process(ctx: &mut SvcContext) {
    let process_handle = ctx.reg(0);
    let process_op = ctx.reg(1);
    let varg2 = ctx.reg(2);
    let varg3 = ctx.reg(3);
    let result = ctx.control_process(process_handle, process_op, varg2, varg3);
    finish(ctx, result, |_, ()| ());
}

impl SvcContext<'_> {
    fn open_process(&mut self, process_id: u32) -> SvcResult<Handle> {
        let process = self
            .system
            .kernel
            .get_process_by_id(process_id)
            .ok_or(ERR_PROCESS_NOT_FOUND)?;
        self.current_process().create_handle(Object::Process(process))
    }

    fn get_process_list(
        &mut self,
        out_process_array: u32,
        out_process_array_count: i32,
    ) -> SvcResult<i32> {
        let current_process = self.current_process();
        if !self
            .system
            .memory
            .is_valid_virtual_address(&current_process, out_process_array)
        {
            return Err(ERR_INVALID_POINTER);
        }

        let process_ids: Vec<u32> = self
            .system
            .kernel
            .processes()
            .iter()
            .map(|p| p.process_id)
            .collect();

        let mut written = 0i32;
        for process_id in process_ids {
            if written >= out_process_array_count {
                break;
            }
            self.system.memory.write_u32(
                &current_process,
                out_process_array + written as u32 * 4,
                process_id,
            )?;
            written += 1;
        }
        Ok(written)
    }

    fn control_process(
        &mut self,
        process_handle: Handle,
        process_op: u32,
        varg2: u32,
        varg3: u32,
    ) -> SvcResult<()> {
        let process = self.get_process(process_handle)?;

        match ControlProcessOp::from_u32(process_op) {
            Some(ControlProcessOp::SetMmuToRwx) => {
                process.set_all_rwx();
                Ok(())
            }
            Some(ControlProcessOp::GetOnMemoryChangeEvent) => {
                let event = self.system.kernel.memory_change_event();
                let current_process = self.current_process();
                let handle = current_process.create_handle(Object::Event(event))?;
                self.system
                    .memory
                    .write_u32(&current_process, varg2, handle)?;
                Ok(())
            }
            Some(ControlProcessOp::ScheduleThreadsWithoutTlsMagic) => {
                let current_thread = self.current_thread();
                for thread in self.system.kernel.all_threads() {
                    let owned = thread
                        .owner_process
                        .upgrade()
                        .map_or(false, |owner| Arc::ptr_eq(&owner, &process));
                    if !owned {
                        continue;
                    }
                    let tls_magic = self
                        .system
                        .memory
                        .read_u32(&process, thread.tls_address())
                        .unwrap_or(0);
                    if tls_magic == varg3 {
                        continue;
                    }
                    if thread.thread_id == current_thread.thread_id {
                        continue;
                    }
                    thread.set_can_schedule(varg2 == 0);
                }
                Ok(())
            }
            Some(ControlProcessOp::DisableCreateThreadRestrictions) => {
                process.set_no_thread_restrictions(varg2 == 1);
                Ok(())
            }
            Some(
                ControlProcessOp::GetAllHandles
                | ControlProcessOp::SignalOnExit
                | ControlProcessOp::GetPaFromVa
                | ControlProcessOp::ScheduleThreads,
            )
            | None => {
                error!("unknown ControlProcess op={process_op}");
                Err(ERR_NOT_IMPLEMENTED)
            }
        }
    }
}
