//! SVC dispatch and argument marshaling.
//!
//! Arguments are taken from `r0..` in declaration order, with 64-bit values
//! in consecutive registers low word first; arguments past `r3` arrive in
//! `r4..`, which the guest-side shims populate from the stack. The
//! `ResultCode` travels back in `r0` and out-parameters follow in `r1..`.
//!
//! Unknown numbers and reserved table slots log and return without touching
//! the registers.

mod handle;
mod info;
mod ipc;
mod memory;
mod misc;
mod process;
mod sync;
mod thread;

use std::sync::Arc;

use log::{error, trace};

use lotus_abi::result::{ResultCode, ERR_INVALID_HANDLE, RESULT_SUCCESS};
use lotus_abi::{Handle, CURRENT_PROCESS, CURRENT_THREAD};

use crate::object::Object;
use crate::process::{Process, ProcessStatus};
use crate::system::System;
use crate::thread::{Thread, ThreadStatus};
use crate::SvcResult;

/// Handler context for one SVC invocation; the global kernel lock is held
/// for its whole lifetime.
pub(crate) struct SvcContext<'a> {
    pub system: &'a mut System,
}

impl SvcContext<'_> {
    fn reg(&self, n: usize) -> u32 {
        self.system.current_core().reg(n)
    }

    fn set_reg(&mut self, n: usize, value: u32) {
        self.system.current_core_mut().set_reg(n, value);
    }

    /// Signed 64-bit argument from the register pair `lo`, `lo + 1`.
    fn arg_i64(&self, lo: usize) -> i64 {
        (self.reg(lo) as u64 | ((self.reg(lo + 1) as u64) << 32)) as i64
    }

    fn set_reg_u64(&mut self, lo: usize, value: u64) {
        self.set_reg(lo, value as u32);
        self.set_reg(lo + 1, (value >> 32) as u32);
    }

    fn set_result(&mut self, result: ResultCode) {
        self.set_reg(0, result.raw());
    }

    /// The calling thread. SVCs only arrive from a thread the core is
    /// actually running.
    fn current_thread(&self) -> Arc<Thread> {
        self.system
            .current_thread()
            .expect("SVC invoked with no current thread")
    }

    fn current_process(&self) -> Arc<Process> {
        self.system
            .current_process()
            .expect("SVC invoked with no current process")
    }

    /// Resolve a handle against the caller's table, honoring the reserved
    /// self-references.
    fn object_from_handle(&self, handle: Handle) -> SvcResult<Object> {
        match handle {
            CURRENT_PROCESS => Ok(Object::Process(self.current_process())),
            CURRENT_THREAD => Ok(Object::Thread(self.current_thread())),
            _ => self
                .current_process()
                .get_object(handle)
                .ok_or(ERR_INVALID_HANDLE),
        }
    }

    /// Resolve a handle to an object a thread can park on.
    fn get_wait_object(&self, handle: Handle) -> SvcResult<Object> {
        let object = self.object_from_handle(handle)?;
        if object.wait_object().is_none() {
            return Err(ERR_INVALID_HANDLE);
        }
        Ok(object)
    }

    fn get_process(&self, handle: Handle) -> SvcResult<Arc<Process>> {
        self.object_from_handle(handle)?
            .as_process()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_thread(&self, handle: Handle) -> SvcResult<Arc<Thread>> {
        self.object_from_handle(handle)?
            .as_thread()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_event(&self, handle: Handle) -> SvcResult<Arc<crate::objects::Event>> {
        self.object_from_handle(handle)?
            .as_event()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_mutex(&self, handle: Handle) -> SvcResult<Arc<crate::objects::Mutex>> {
        self.object_from_handle(handle)?
            .as_mutex()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_semaphore(&self, handle: Handle) -> SvcResult<Arc<crate::objects::Semaphore>> {
        self.object_from_handle(handle)?
            .as_semaphore()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_timer(&self, handle: Handle) -> SvcResult<Arc<crate::objects::Timer>> {
        self.object_from_handle(handle)?
            .as_timer()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_address_arbiter(
        &self,
        handle: Handle,
    ) -> SvcResult<Arc<crate::objects::AddressArbiter>> {
        self.object_from_handle(handle)?
            .as_address_arbiter()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_shared_memory(&self, handle: Handle) -> SvcResult<Arc<crate::objects::SharedMemory>> {
        self.object_from_handle(handle)?
            .as_shared_memory()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_server_session(
        &self,
        handle: Handle,
    ) -> SvcResult<Arc<crate::objects::ServerSession>> {
        self.object_from_handle(handle)?
            .as_server_session()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_client_session(
        &self,
        handle: Handle,
    ) -> SvcResult<Arc<crate::objects::ClientSession>> {
        self.object_from_handle(handle)?
            .as_client_session()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_server_port(&self, handle: Handle) -> SvcResult<Arc<crate::objects::ServerPort>> {
        self.object_from_handle(handle)?
            .as_server_port()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_client_port(&self, handle: Handle) -> SvcResult<Arc<crate::objects::ClientPort>> {
        self.object_from_handle(handle)?
            .as_client_port()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }

    fn get_resource_limit(
        &self,
        handle: Handle,
    ) -> SvcResult<Arc<crate::resource_limit::ResourceLimit>> {
        self.object_from_handle(handle)?
            .as_resource_limit()
            .cloned()
            .ok_or(ERR_INVALID_HANDLE)
    }
}

/// One row of the dispatch table.
struct FunctionDef {
    name: &'static str,
    func: Option<fn(&mut SvcContext)>,
}

const fn def(name: &'static str, func: Option<fn(&mut SvcContext)>) -> FunctionDef {
    FunctionDef { name, func }
}

/// Dispatch a software interrupt. Reserved and out-of-range numbers log and
/// leave the registers untouched.
pub(crate) fn call_svc(system: &mut System, immediate: u32) {
    let Some(entry) = SVC_TABLE.get(immediate as usize) else {
        error!("unknown svc={immediate:#04X}");
        return;
    };

    let Some(func) = entry.func else {
        error!("unimplemented SVC function {}(..)", entry.name);
        return;
    };

    trace!("calling {}", entry.name);
    if let Some(process) = system.current_process() {
        debug_assert!(
            process.status() == ProcessStatus::Running,
            "running threads from exiting processes is unimplemented"
        );
    }

    func(&mut SvcContext {
        system: &mut *system,
    });

    // If the handler parked or stopped the calling thread, checkpoint the
    // live registers (return values included) into its context now, so a
    // later wake can overwrite the result before the core reloads it.
    let core = system.running_core();
    if let Some(current) = system.kernel.current_thread(core) {
        if current.status() != ThreadStatus::Running {
            current.save_context(system.core(core));
        }
    }
}

/// Write `Ok` as success with `out` produced by `write_outputs`, or the
/// error code with the outputs untouched.
fn finish<T>(
    ctx: &mut SvcContext,
    result: SvcResult<T>,
    write_outputs: impl FnOnce(&mut SvcContext, T),
) {
    match result {
        Ok(value) => {
            ctx.set_result(RESULT_SUCCESS);
            write_outputs(ctx, value);
        }
        Err(code) => ctx.set_result(code),
    }
}

#[rustfmt::skip]
static SVC_TABLE: [FunctionDef; 180] = [
    def("Unknown", None),
    def("ControlMemory", Some(memory::control_memory)),
    def("QueryMemory", Some(memory::query_memory)),
    def("ExitProcess", Some(process::exit_process)),
    def("GetProcessAffinityMask", None),
    def("SetProcessAffinityMask", None),
    def("GetProcessIdealProcessor", None),
    def("SetProcessIdealProcessor", None),
    def("CreateThread", Some(thread::create_thread)),
    def("ExitThread", Some(thread::exit_thread)),
    def("SleepThread", Some(thread::sleep_thread)),
    def("GetThreadPriority", Some(thread::get_thread_priority)),
    def("SetThreadPriority", Some(thread::set_thread_priority)),
    def("GetThreadAffinityMask", None),
    def("SetThreadAffinityMask", None),
    def("GetThreadIdealProcessor", None),
    def("SetThreadIdealProcessor", None),
    def("GetCurrentProcessorNumber", None),
    def("Run", None),
    def("CreateMutex", Some(sync::create_mutex)),
    def("ReleaseMutex", Some(sync::release_mutex)),
    def("CreateSemaphore", Some(sync::create_semaphore)),
    def("ReleaseSemaphore", Some(sync::release_semaphore)),
    def("CreateEvent", Some(sync::create_event)),
    def("SignalEvent", Some(sync::signal_event)),
    def("ClearEvent", Some(sync::clear_event)),
    def("CreateTimer", Some(sync::create_timer)),
    def("SetTimer", Some(sync::set_timer)),
    def("CancelTimer", Some(sync::cancel_timer)),
    def("ClearTimer", Some(sync::clear_timer)),
    def("CreateMemoryBlock", Some(memory::create_memory_block)),
    def("MapMemoryBlock", Some(memory::map_memory_block)),
    def("UnmapMemoryBlock", Some(memory::unmap_memory_block)),
    def("CreateAddressArbiter", Some(sync::create_address_arbiter)),
    def("ArbitrateAddress", Some(sync::arbitrate_address)),
    def("CloseHandle", Some(handle::close_handle)),
    def("WaitSynchronization1", Some(sync::wait_synchronization1)),
    def("WaitSynchronizationN", Some(sync::wait_synchronization_n)),
    def("SignalAndWait", None),
    def("DuplicateHandle", Some(handle::duplicate_handle)),
    def("GetSystemTick", Some(info::get_system_tick)),
    def("GetHandleInfo", Some(info::get_handle_info)),
    def("GetSystemInfo", Some(info::get_system_info)),
    def("GetProcessInfo", Some(info::get_process_info)),
    def("GetThreadInfo", Some(info::get_thread_info)),
    def("ConnectToPort", Some(ipc::connect_to_port)),
    def("SendSyncRequest1", None),
    def("SendSyncRequest2", None),
    def("SendSyncRequest3", None),
    def("SendSyncRequest4", None),
    def("SendSyncRequest", Some(ipc::send_sync_request)),
    def("OpenProcess", Some(process::open_process)),
    def("OpenThread", Some(thread::open_thread)),
    def("GetProcessId", Some(process::get_process_id)),
    def("GetProcessIdOfThread", Some(thread::get_process_id_of_thread)),
    def("GetThreadId", Some(thread::get_thread_id)),
    def("GetResourceLimit", Some(info::get_resource_limit)),
    def("GetResourceLimitLimitValues", Some(info::get_resource_limit_limit_values)),
    def("GetResourceLimitCurrentValues", Some(info::get_resource_limit_current_values)),
    def("GetThreadContext", None),
    def("Break", Some(misc::break_execution)),
    def("OutputDebugString", Some(misc::output_debug_string)),
    def("ControlPerformanceCounter", None),
    def("Unknown", None),
    def("Unknown", None),
    def("Unknown", None),
    def("Unknown", None),
    def("Unknown", None),
    def("Unknown", None),
    def("Unknown", None),
    def("Unknown", None),
    def("CreatePort", Some(ipc::create_port)),
    def("CreateSessionToPort", Some(ipc::create_session_to_port)),
    def("CreateSession", Some(ipc::create_session)),
    def("AcceptSession", Some(ipc::accept_session)),
    def("ReplyAndReceive1", None),
    def("ReplyAndReceive2", None),
    def("ReplyAndReceive3", None),
    def("ReplyAndReceive4", None),
    def("ReplyAndReceive", Some(ipc::reply_and_receive)),
    def("BindInterrupt", None),
    def("UnbindInterrupt", None),
    def("InvalidateProcessDataCache", None),
    def("StoreProcessDataCache", None),
    def("FlushProcessDataCache", None),
    def("StartInterProcessDma", None),
    def("StopDma", None),
    def("GetDmaState", None),
    def("RestartDma", None),
    def("SetGpuProt", None),
    def("SetWifiEnabled", None),
    def("Unknown", None),
    def("Unknown", None),
    def("Unknown", None),
    def("Unknown", None),
    def("Unknown", None),
    def("DebugActiveProcess", None),
    def("BreakDebugProcess", None),
    def("TerminateDebugProcess", None),
    def("GetProcessDebugEvent", None),
    def("ContinueDebugEvent", None),
    def("GetProcessList", Some(process::get_process_list)),
    def("GetThreadList", None),
    def("GetDebugThreadContext", None),
    def("SetDebugThreadContext", None),
    def("QueryDebugProcessMemory", None),
    def("ReadProcessMemory", None),
    def("WriteProcessMemory", None),
    def("SetHardwareBreakPoint", None),
    def("GetDebugThreadParam", None),
    def("Unknown", None),
    def("Unknown", None),
    def("ControlProcessMemory", None),
    def("MapProcessMemory", None),
    def("UnmapProcessMemory", None),
    def("CreateCodeSet", None),
    def("RandomStub", None),
    def("CreateProcess", None),
    def("TerminateProcess", None),
    def("SetProcessResourceLimits", None),
    def("CreateResourceLimit", None),
    def("SetResourceLimitValues", None),
    def("AddCodeSegment", None),
    def("Backdoor", None),
    def("KernelSetState", Some(misc::kernel_set_state)),
    def("QueryProcessMemory", Some(memory::query_process_memory)),
    def("Unused", None),
    def("Unused", None),
    def("CustomBackdoor", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("ConvertVaToPa", Some(memory::convert_va_to_pa)),
    def("FlushDataCacheRange", None),
    def("FlushEntireDataCache", None),
    def("InvalidateInstructionCacheRange", Some(memory::invalidate_instruction_cache_range)),
    def("InvalidateEntireInstructionCache", Some(memory::invalidate_entire_instruction_cache)),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("MapProcessMemoryEx", Some(memory::map_process_memory_ex)),
    def("UnmapProcessMemoryEx", Some(memory::unmap_process_memory_ex)),
    def("ControlMemoryEx", None),
    def("ControlMemoryUnsafe", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("Unused", None),
    def("ControlService", None),
    def("CopyHandle", None),
    def("TranslateHandle", None),
    def("ControlProcess", Some(process::control_process)),
];
