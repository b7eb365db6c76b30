//! The kernel state shared by every SVC handler: process registry, per-core
//! thread managers, named ports, and the object factories.

use std::collections::BTreeMap;
use std::sync::Arc;

use lotus_abi::ResetType;

use crate::cpu::CpuContext;
use crate::ipc::IpcRecorder;
use crate::memory::MemorySystem;
use crate::objects::{
    AddressArbiter, ClientPort, ClientSession, Event, Mutex, Semaphore, ServerPort,
    ServerSession, Session, Timer,
};
use crate::process::{CodeSet, Process, ProcessFlags};
use crate::resource_limit::ResourceLimit;
use crate::thread::{Thread, ThreadManager};
use crate::timing::{ns_to_ticks, Timing};
use crate::SvcResult;

pub struct Kernel {
    pub timing: Timing,
    pub thread_managers: Vec<ThreadManager>,
    pub named_ports: BTreeMap<String, Arc<ClientPort>>,
    pub ipc_recorder: IpcRecorder,
    processes: Vec<Arc<Process>>,
    next_process_id: u32,
    next_thread_id: u32,
    memory_change_event: Option<Arc<Event>>,
}

impl Kernel {
    pub fn new(core_count: usize) -> Self {
        Kernel {
            timing: Timing::new(),
            thread_managers: (0..core_count).map(ThreadManager::new).collect(),
            named_ports: BTreeMap::new(),
            ipc_recorder: IpcRecorder::new(),
            processes: Vec::new(),
            next_process_id: 1,
            next_thread_id: 1,
            memory_change_event: None,
        }
    }

    pub fn core_count(&self) -> usize {
        self.thread_managers.len()
    }

    // --- processes ---------------------------------------------------------

    /// Create and register a process under the default application limits.
    pub fn create_process(&mut self, codeset: CodeSet, flags: ProcessFlags) -> Arc<Process> {
        let process_id = self.next_process_id;
        self.next_process_id += 1;
        let process = Arc::new(Process::new(
            process_id,
            codeset,
            Arc::new(ResourceLimit::application_defaults()),
            flags,
            ns_to_ticks(self.timing.now_ns()),
        ));
        self.processes.push(process.clone());
        process
    }

    pub fn processes(&self) -> &[Arc<Process>] {
        &self.processes
    }

    pub fn get_process_by_id(&self, process_id: u32) -> Option<Arc<Process>> {
        self.processes
            .iter()
            .find(|p| p.process_id == process_id)
            .cloned()
    }

    /// Drop the kernel's reference so the process can be cleaned up.
    pub fn remove_process(&mut self, process: &Arc<Process>) {
        self.processes.retain(|p| !Arc::ptr_eq(p, process));
    }

    // --- threads -----------------------------------------------------------

    /// Create a thread on `processor_id`, ready to run. The TLS page is
    /// carved from the Base region.
    pub fn create_thread(
        &mut self,
        memory: &mut MemorySystem,
        process: &Arc<Process>,
        name: String,
        entry_point: u32,
        arg: u32,
        priority: u32,
        processor_id: usize,
        stack_top: u32,
    ) -> SvcResult<Arc<Thread>> {
        assert!(
            processor_id < self.thread_managers.len(),
            "processor id {processor_id} out of range"
        );
        let tls_address = process.allocate_tls(memory)?;
        let thread_id = self.next_thread_id;
        self.next_thread_id += 1;
        let thread = Arc::new(Thread::new(
            thread_id,
            processor_id,
            name,
            Arc::downgrade(process),
            priority,
            tls_address,
            CpuContext::new(entry_point, arg, stack_top),
        ));
        let manager = &mut self.thread_managers[processor_id];
        manager.register(thread.clone());
        manager.enqueue_ready(thread.clone());
        Ok(thread)
    }

    pub fn current_thread(&self, core: usize) -> Option<Arc<Thread>> {
        self.thread_managers[core].current().cloned()
    }

    /// Every thread on every core, in core order.
    pub fn all_threads(&self) -> Vec<Arc<Thread>> {
        self.thread_managers
            .iter()
            .flat_map(|m| m.thread_list().iter().cloned())
            .collect()
    }

    pub fn find_thread_by_id(&self, thread_id: u32) -> Option<Arc<Thread>> {
        self.all_threads()
            .into_iter()
            .find(|t| t.thread_id == thread_id)
    }

    // --- object factories --------------------------------------------------

    pub fn create_event(&self, reset_type: ResetType, name: String) -> Arc<Event> {
        Arc::new(Event::new(reset_type, name))
    }

    pub fn create_mutex(&self, name: String) -> Arc<Mutex> {
        Arc::new(Mutex::new(name))
    }

    pub fn create_semaphore(
        &self,
        initial_count: i32,
        max_count: i32,
        name: String,
    ) -> SvcResult<Arc<Semaphore>> {
        Ok(Arc::new(Semaphore::new(initial_count, max_count, name)?))
    }

    pub fn create_timer(&self, reset_type: ResetType, name: String) -> Arc<Timer> {
        Arc::new(Timer::new(reset_type, name))
    }

    pub fn create_address_arbiter(&self, name: String) -> Arc<AddressArbiter> {
        Arc::new(AddressArbiter::new(name))
    }

    pub fn create_session_pair(
        &self,
        name: &str,
    ) -> (Arc<ServerSession>, Arc<ClientSession>) {
        Session::new_pair(name, None)
    }

    pub fn create_port_pair(
        &self,
        name: &str,
        max_sessions: u32,
    ) -> (Arc<ServerPort>, Arc<ClientPort>) {
        ClientPort::new_pair(name, max_sessions)
    }

    /// Register a client port under a global name resolvable by
    /// `ConnectToPort`. Names longer than 11 bytes are the caller's bug.
    pub fn add_named_port(&mut self, name: impl Into<String>, port: Arc<ClientPort>) {
        let name = name.into();
        debug_assert!(name.len() <= 11, "port name too long: {name}");
        self.named_ports.insert(name, port);
    }

    /// The plugin loader's memory-layout-change event, created on demand.
    pub fn memory_change_event(&mut self) -> Arc<Event> {
        self.memory_change_event
            .get_or_insert_with(|| {
                Arc::new(Event::new(ResetType::OneShot, "mem-change".into()))
            })
            .clone()
    }
}
