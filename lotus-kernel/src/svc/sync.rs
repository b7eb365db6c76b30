//! Wait synchronization and the synchronization-object SVCs.

use log::trace;

use lotus_abi::result::{
    ResultCode, ERR_INVALID_ENUM_VALUE, ERR_INVALID_HANDLE, ERR_INVALID_POINTER,
    ERR_OUT_OF_RANGE, ERR_OUT_OF_RANGE_KERNEL, RESULT_SUCCESS, RESULT_TIMEOUT,
};
use lotus_abi::{Handle, ResetType};

use crate::object::Object;
use crate::objects::{AddressArbiter, Event, Mutex, Semaphore, Timer};
use crate::thread::{ThreadStatus, WakeupCallback};
use crate::wake;
use crate::SvcResult;

use super::{finish, SvcContext};

pub(super) fn wait_synchronization1(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let nano_seconds = ctx.arg_i64(1);
    let result = ctx.wait_synchronization1(handle, nano_seconds);
    ctx.set_result(result);
}

pub(super) fn wait_synchronization_n(ctx: &mut SvcContext) {
    let handles_address = ctx.reg(0);
    let handle_count = ctx.reg(1) as i32;
    let wait_all = ctx.reg(2) != 0;
    let nano_seconds = ctx.arg_i64(3);
    let (result, out) =
        ctx.wait_synchronization_n(handles_address, handle_count, wait_all, nano_seconds);
    ctx.set_result(result);
    if let Some(index) = out {
        ctx.set_reg(1, index as u32);
    }
}

pub(super) fn create_mutex(ctx: &mut SvcContext) {
    let initial_locked = ctx.reg(0) != 0;
    let result = ctx.create_mutex(initial_locked);
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn release_mutex(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let result = ctx.release_mutex(handle);
    finish(ctx, result, |_, ()| ());
}

pub(super) fn create_semaphore(ctx: &mut SvcContext) {
    let initial_count = ctx.reg(0) as i32;
    let max_count = ctx.reg(1) as i32;
    let result = ctx.create_semaphore(initial_count, max_count);
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn release_semaphore(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let release_count = ctx.reg(1) as i32;
    let result = ctx.release_semaphore(handle, release_count);
    finish(ctx, result, |ctx, count| ctx.set_reg(1, count as u32));
}

pub(super) fn create_event(ctx: &mut SvcContext) {
    let reset_type = ctx.reg(0);
    let result = ctx.create_event(reset_type);
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn signal_event(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    trace!("called event={handle:#010X}");
    let result = ctx.get_event(handle).map(|event| {
        Event::signal(&event, ctx.system);
    });
    finish(ctx, result, |_, ()| ());
}

pub(super) fn clear_event(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    trace!("called event={handle:#010X}");
    let result = ctx.get_event(handle).map(|event| event.clear());
    finish(ctx, result, |_, ()| ());
}

pub(super) fn create_timer(ctx: &mut SvcContext) {
    let reset_type = ctx.reg(0);
    let result = ctx.create_timer(reset_type);
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn set_timer(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let initial = ctx.arg_i64(2);
    let interval = ctx.arg_i64(4);
    let result = ctx.set_timer(handle, initial, interval);
    finish(ctx, result, |_, ()| ());
}

pub(super) fn cancel_timer(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    trace!("called timer={handle:#010X}");
    let result = ctx
        .get_timer(handle)
        .map(|timer| Timer::cancel(&timer, ctx.system));
    finish(ctx, result, |_, ()| ());
}

pub(super) fn clear_timer(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    trace!("called timer={handle:#010X}");
    let result = ctx.get_timer(handle).map(|timer| timer.clear());
    finish(ctx, result, |_, ()| ());
}

pub(super) fn create_address_arbiter(ctx: &mut SvcContext) {
    let result = ctx.create_address_arbiter();
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn arbitrate_address(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let address = ctx.reg(1);
    let arbitration_type = ctx.reg(2);
    let value = ctx.reg(3) as i32;
    let nano_seconds = ctx.arg_i64(4);
    let result = ctx.arbitrate_address(handle, address, arbitration_type, value, nano_seconds);
    finish(ctx, result, |_, ()| ());
}

impl SvcContext<'_> {
    /// Wait for one handle to synchronize, with a nanosecond timeout.
    fn wait_synchronization1(&mut self, handle: Handle, nano_seconds: i64) -> ResultCode {
        let object = match self.get_wait_object(handle) {
            Ok(object) => object,
            Err(code) => return code,
        };
        let thread = self.current_thread();

        trace!("called handle={handle:#010X}, nanoseconds={nano_seconds}");

        if object.should_wait(&thread) {
            if nano_seconds == 0 {
                return RESULT_TIMEOUT;
            }

            thread.set_wait_objects(vec![object.clone()]);
            object.add_waiting_thread(thread.clone());
            thread.set_status(ThreadStatus::WaitSynchAny);

            wake::wake_after_delay(self.system, &thread, nano_seconds);
            thread.set_wakeup_callback(WakeupCallback::Sync { do_output: false });

            self.system.prepare_reschedule();

            // Overwritten to success if a signal resumes the thread; the
            // timeout value stays in place otherwise.
            return RESULT_TIMEOUT;
        }

        object.acquire(&thread);
        RESULT_SUCCESS
    }

    /// Wait for any or all of a handle list. The second value is the index
    /// output, left untouched when `None`.
    fn wait_synchronization_n(
        &mut self,
        handles_address: u32,
        handle_count: i32,
        wait_all: bool,
        nano_seconds: i64,
    ) -> (ResultCode, Option<i32>) {
        let thread = self.current_thread();
        let process = self.current_process();

        if !self
            .system
            .memory
            .is_valid_virtual_address(&process, handles_address)
        {
            return (ERR_INVALID_POINTER, None);
        }
        if handle_count < 0 {
            return (ERR_OUT_OF_RANGE, None);
        }

        let mut objects = Vec::with_capacity(handle_count as usize);
        for i in 0..handle_count as u32 {
            let handle = match self
                .system
                .memory
                .read_u32(&process, handles_address + i * 4)
            {
                Ok(handle) => handle,
                Err(code) => return (code, None),
            };
            match self.get_wait_object(handle) {
                Ok(object) => objects.push(object),
                Err(_) => return (ERR_INVALID_HANDLE, None),
            }
        }

        if wait_all {
            let all_available = objects.iter().all(|o| !o.should_wait(&thread));
            if all_available {
                // Acquire everything at once; the index output is not set.
                for object in &objects {
                    object.acquire(&thread);
                }
                return (RESULT_SUCCESS, None);
            }

            if nano_seconds == 0 {
                return (RESULT_TIMEOUT, None);
            }

            thread.set_status(ThreadStatus::WaitSynchAll);
            for object in &objects {
                object.add_waiting_thread(thread.clone());
            }
            thread.set_wait_objects(objects);

            wake::wake_after_delay(self.system, &thread, nano_seconds);
            thread.set_wakeup_callback(WakeupCallback::Sync { do_output: false });

            self.system.prepare_reschedule();

            (RESULT_TIMEOUT, Some(-1))
        } else {
            // The earliest ready index wins.
            if let Some((index, object)) = objects
                .iter()
                .enumerate()
                .find(|(_, o)| !o.should_wait(&thread))
            {
                object.acquire(&thread);
                return (RESULT_SUCCESS, Some(index as i32));
            }

            if nano_seconds == 0 {
                return (RESULT_TIMEOUT, None);
            }

            thread.set_status(ThreadStatus::WaitSynchAny);
            for object in &objects {
                object.add_waiting_thread(thread.clone());
            }
            thread.set_wait_objects(objects);

            // With no handles and no timeout the thread deadlocks here,
            // matching hardware.
            wake::wake_after_delay(self.system, &thread, nano_seconds);
            thread.set_wakeup_callback(WakeupCallback::Sync { do_output: true });

            self.system.prepare_reschedule();

            (RESULT_TIMEOUT, Some(-1))
        }
    }

    fn create_mutex(&mut self, initial_locked: bool) -> SvcResult<Handle> {
        let name = format!("mutex-{:08x}", self.system.current_core().lr());
        let mutex = self.system.kernel.create_mutex(name);
        if initial_locked {
            Mutex::acquire_by(&mutex, &self.current_thread());
        }
        let handle = self.current_process().create_handle(Object::Mutex(mutex))?;
        trace!("called initial_locked={initial_locked} : created handle={handle:#010X}");
        Ok(handle)
    }

    fn release_mutex(&mut self, handle: Handle) -> SvcResult<()> {
        trace!("called handle={handle:#010X}");
        let mutex = self.get_mutex(handle)?;
        let thread = self.current_thread();
        Mutex::release(&mutex, self.system, &thread)
    }

    fn create_semaphore(&mut self, initial_count: i32, max_count: i32) -> SvcResult<Handle> {
        let name = format!("semaphore-{:08x}", self.system.current_core().lr());
        let semaphore = self
            .system
            .kernel
            .create_semaphore(initial_count, max_count, name)?;
        let handle = self
            .current_process()
            .create_handle(Object::Semaphore(semaphore))?;
        trace!(
            "called initial_count={initial_count}, max_count={max_count}, \
             created handle={handle:#010X}"
        );
        Ok(handle)
    }

    fn release_semaphore(&mut self, handle: Handle, release_count: i32) -> SvcResult<i32> {
        trace!("called release_count={release_count}, handle={handle:#010X}");
        let semaphore = self.get_semaphore(handle)?;
        Semaphore::release(&semaphore, self.system, release_count)
    }

    fn create_event(&mut self, reset_type: u32) -> SvcResult<Handle> {
        let reset_type = ResetType::from_u32(reset_type).ok_or(ERR_INVALID_ENUM_VALUE)?;
        let name = format!("event-{:08x}", self.system.current_core().lr());
        let event = self.system.kernel.create_event(reset_type, name);
        let handle = self.current_process().create_handle(Object::Event(event))?;
        trace!("called reset_type={reset_type:?} : created handle={handle:#010X}");
        Ok(handle)
    }

    fn create_timer(&mut self, reset_type: u32) -> SvcResult<Handle> {
        let reset_type = ResetType::from_u32(reset_type).ok_or(ERR_INVALID_ENUM_VALUE)?;
        let name = format!("timer-{:08x}", self.system.current_core().lr());
        let timer = self.system.kernel.create_timer(reset_type, name);
        let handle = self.current_process().create_handle(Object::Timer(timer))?;
        trace!("called reset_type={reset_type:?} : created handle={handle:#010X}");
        Ok(handle)
    }

    fn set_timer(&mut self, handle: Handle, initial: i64, interval: i64) -> SvcResult<()> {
        trace!("called timer={handle:#010X}");
        if initial < 0 || interval < 0 {
            return Err(ERR_OUT_OF_RANGE_KERNEL);
        }
        let timer = self.get_timer(handle)?;
        Timer::set(&timer, self.system, initial as u64, interval as u64);
        Ok(())
    }

    fn create_address_arbiter(&mut self) -> SvcResult<Handle> {
        let name = format!("arbiter-{:08x}", self.system.current_core().lr());
        let arbiter = self.system.kernel.create_address_arbiter(name);
        let handle = self
            .current_process()
            .create_handle(Object::AddressArbiter(arbiter))?;
        trace!("returned handle={handle:#010X}");
        Ok(handle)
    }

    fn arbitrate_address(
        &mut self,
        handle: Handle,
        address: u32,
        arbitration_type: u32,
        value: i32,
        nano_seconds: i64,
    ) -> SvcResult<()> {
        trace!(
            "called handle={handle:#010X}, address={address:#010X}, type={arbitration_type:#010X}, \
             value={value:#010X}"
        );
        let arbiter = self.get_address_arbiter(handle)?;
        let thread = self.current_thread();
        let result = AddressArbiter::arbitrate(
            &arbiter,
            self.system,
            &thread,
            arbitration_type,
            address,
            value,
            nano_seconds,
        );
        // Arbitration always requests a reschedule, successful or not.
        self.system.prepare_reschedule();
        result
    }
}
