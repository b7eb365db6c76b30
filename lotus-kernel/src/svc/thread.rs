//! Thread lifecycle and priority SVC handlers.

use log::{info, trace};

use lotus_abi::result::{
    ERR_NOT_AUTHORIZED, ERR_OUT_OF_RANGE, ERR_THREAD_NOT_FOUND,
};
use lotus_abi::{
    Handle, ResourceLimitType, PROCESSOR_ID_ALL, PROCESSOR_ID_DEFAULT, THREAD_PRIO_LOWEST,
};

use crate::cpu::{FPSCR_DEFAULT_NAN, FPSCR_FLUSH_TO_ZERO, FPSCR_ROUND_TOZERO};
use crate::object::Object;
use crate::thread::ThreadStatus;
use crate::wake;
use crate::SvcResult;

use super::{finish, SvcContext};

pub(super) fn create_thread(ctx: &mut SvcContext) {
    let entry_point = ctx.reg(0);
    let arg = ctx.reg(1);
    let stack_top = ctx.reg(2);
    let priority = ctx.reg(3);
    let processor_id = ctx.reg(4) as i32;
    let result = ctx.create_thread(entry_point, arg, stack_top, priority, processor_id);
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn exit_thread(ctx: &mut SvcContext) {
    trace!("called, pc={:#010X}", ctx.system.current_core().pc());

    let thread = ctx.current_thread();
    wake::stop_thread(ctx.system, &thread);
    ctx.system.prepare_reschedule();
}

pub(super) fn sleep_thread(ctx: &mut SvcContext) {
    let nano_seconds = ctx.arg_i64(0);
    trace!("called nanoseconds={nano_seconds}");

    let core = ctx.system.running_core();

    // A zero-length sleep with nothing else to run would be a useless trip
    // through the scheduler; skip the yield entirely.
    if nano_seconds == 0 && !ctx.system.kernel.thread_managers[core].have_ready_threads() {
        return;
    }

    let thread = ctx.current_thread();
    thread.set_status(ThreadStatus::WaitSleep);
    wake::wake_after_delay(ctx.system, &thread, nano_seconds);
    ctx.system.prepare_reschedule();
}

pub(super) fn get_thread_priority(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let result = ctx.get_thread(handle).map(|t| t.current_priority());
    finish(ctx, result, |ctx, priority| ctx.set_reg(1, priority));
}

pub(super) fn set_thread_priority(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let priority = ctx.reg(1);
    let result = ctx.set_thread_priority(handle, priority);
    finish(ctx, result, |_, ()| ());
}

pub(super) fn open_thread(ctx: &mut SvcContext) {
    let process_handle = ctx.reg(0);
    let thread_id = ctx.reg(1);
    let result = ctx.open_thread(process_handle, thread_id);
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn get_thread_id(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    trace!("called thread={handle:#010X}");
    let result = ctx.get_thread(handle).map(|t| t.thread_id);
    finish(ctx, result, |ctx, id| ctx.set_reg(1, id));
}

pub(super) fn get_process_id_of_thread(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    trace!("called thread={handle:#010X}");
    let result = ctx.get_thread(handle).map(|thread| {
        let process = thread
            .owner_process
            .upgrade()
            .unwrap_or_else(|| panic!("invalid parent process for thread={handle:#010X}"));
        process.process_id
    });
    finish(ctx, result, |ctx, id| ctx.set_reg(1, id));
}

impl SvcContext<'_> {
    fn create_thread(
        &mut self,
        entry_point: u32,
        arg: u32,
        stack_top: u32,
        priority: u32,
        processor_id: i32,
    ) -> SvcResult<Handle> {
        let name = format!("thread-{entry_point:08X}");

        if priority > THREAD_PRIO_LOWEST {
            return Err(ERR_OUT_OF_RANGE);
        }

        let process = self.current_process();
        let flags = process.flags();
        if process
            .resource_limit
            .max_value(ResourceLimitType::Priority as u32)
            > priority as i64
            && !flags.no_thread_restrictions
        {
            return Err(ERR_NOT_AUTHORIZED);
        }

        let mut processor_id = processor_id;
        if processor_id == PROCESSOR_ID_DEFAULT {
            // Fall back to the core the process's extended header asks for.
            processor_id = flags.ideal_processor as i32;
        }
        if processor_id == PROCESSOR_ID_ALL {
            info!("newly created thread is allowed to run on any core, using core 0");
            processor_id = 0;
        }
        if processor_id < 0 || processor_id as usize >= self.system.kernel.core_count() {
            return Err(ERR_OUT_OF_RANGE);
        }

        let system = &mut *self.system;
        let thread = system.kernel.create_thread(
            &mut system.memory,
            &process,
            name.clone(),
            entry_point,
            arg,
            priority,
            processor_id as usize,
            stack_top,
        )?;

        thread.set_fpscr(FPSCR_DEFAULT_NAN | FPSCR_FLUSH_TO_ZERO | FPSCR_ROUND_TOZERO);

        let handle = process.create_handle(Object::Thread(thread))?;

        self.system.prepare_reschedule();

        trace!(
            "called entrypoint={entry_point:#010X} ({name}), arg={arg:#010X}, \
             stacktop={stack_top:#010X}, threadpriority={priority:#010X}, \
             processorid={processor_id:#010X} : created handle={handle:#010X}"
        );

        Ok(handle)
    }

    fn set_thread_priority(&mut self, handle: Handle, priority: u32) -> SvcResult<()> {
        if priority > THREAD_PRIO_LOWEST {
            return Err(ERR_OUT_OF_RANGE);
        }

        let thread = self.get_thread(handle)?;

        // The check uses the current process's resource limit, not the one
        // of the thread's owner.
        let process = self.current_process();
        if process
            .resource_limit
            .max_value(ResourceLimitType::Priority as u32)
            > priority as i64
        {
            return Err(ERR_NOT_AUTHORIZED);
        }

        thread.set_nominal_priority(priority);
        thread.update_priority();

        // Propagate through the mutexes this thread is waiting for.
        for mutex in thread.pending_mutexes() {
            mutex.update_priority();
        }

        self.system.prepare_reschedule();
        Ok(())
    }

    fn open_thread(&mut self, process_handle: Handle, thread_id: u32) -> SvcResult<Handle> {
        if process_handle == 0 {
            log::error!("unimplemented OpenThread with process_handle=0");
            return Err(ERR_THREAD_NOT_FOUND);
        }

        let process = self.get_process(process_handle)?;
        let current_process = self.current_process();

        for thread in self.system.kernel.all_threads() {
            let owned = thread
                .owner_process
                .upgrade()
                .map_or(false, |owner| std::sync::Arc::ptr_eq(&owner, &process));
            if owned && thread.thread_id == thread_id {
                return current_process.create_handle(Object::Thread(thread));
            }
        }

        Err(ERR_THREAD_NOT_FOUND)
    }
}
