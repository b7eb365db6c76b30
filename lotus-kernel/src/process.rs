//! Processes: identity, flags, virtual memory, and the handle table.

use std::sync::Arc;

use log::warn;
use spinning_top::Spinlock;

use lotus_abi::layout::{
    HEAP_VADDR, HEAP_VADDR_END, LINEAR_HEAP_VADDR, LINEAR_HEAP_VADDR_END, PAGE_SIZE,
    TLS_AREA_VADDR,
};
use lotus_abi::mem::{MemoryInfo, MemoryPermission, MemoryRegionName, MemoryState};
use lotus_abi::result::{
    ERR_INVALID_ADDRESS, ERR_INVALID_ADDRESS_STATE, ERR_OUT_OF_MEMORY,
};
use lotus_abi::Handle;

use crate::handle::HandleTable;
use crate::memory::vmm::{Backing, VmManager};
use crate::memory::MemorySystem;
use crate::object::{Object, WaiterList, WaitObject};
use crate::thread::Thread;
use crate::resource_limit::ResourceLimit;
use crate::SvcResult;

/// One loadable segment of the process image.
#[derive(Debug, Clone, Copy, Default)]
pub struct Segment {
    pub addr: u32,
    pub size: u32,
}

/// Code-segment metadata supplied by the loader.
#[derive(Debug, Clone)]
pub struct CodeSet {
    pub name: String,
    pub program_id: u64,
    pub text: Segment,
    pub rodata: Segment,
    pub data: Segment,
}

impl CodeSet {
    pub fn new(name: impl Into<String>, program_id: u64) -> Self {
        CodeSet {
            name: name.into(),
            program_id,
            text: Segment::default(),
            rodata: Segment::default(),
            data: Segment::default(),
        }
    }
}

/// Kernel flags from the process's extended header.
#[derive(Debug, Clone, Copy)]
pub struct ProcessFlags {
    pub ideal_processor: usize,
    pub memory_region: MemoryRegionName,
    /// Allocate zero-address shared memory from the caller's region
    /// instead of Base.
    pub shared_device_mem: bool,
    /// Lifted thread-creation restrictions (priority and core checks).
    pub no_thread_restrictions: bool,
}

impl Default for ProcessFlags {
    fn default() -> Self {
        ProcessFlags {
            ideal_processor: 0,
            memory_region: MemoryRegionName::Application,
            shared_device_mem: false,
            no_thread_restrictions: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Running,
    Exited,
}

struct ProcessState {
    status: ProcessStatus,
    handle_table: HandleTable,
    vm: VmManager,
    flags: ProcessFlags,
    memory_used: u32,
    linear_base: u32,
    next_tls_slot: u32,
}

pub struct Process {
    pub process_id: u32,
    pub codeset: CodeSet,
    pub resource_limit: Arc<ResourceLimit>,
    pub creation_time_ticks: u64,
    state: Spinlock<ProcessState>,
    waiters: WaiterList,
}

impl Process {
    pub fn new(
        process_id: u32,
        codeset: CodeSet,
        resource_limit: Arc<ResourceLimit>,
        flags: ProcessFlags,
        creation_time_ticks: u64,
    ) -> Self {
        Process {
            process_id,
            codeset,
            resource_limit,
            creation_time_ticks,
            state: Spinlock::new(ProcessState {
                status: ProcessStatus::Running,
                handle_table: HandleTable::new(),
                vm: VmManager::new(),
                flags,
                memory_used: 0,
                linear_base: LINEAR_HEAP_VADDR,
                next_tls_slot: 0,
            }),
            waiters: WaiterList::new(),
        }
    }

    pub fn status(&self) -> ProcessStatus {
        self.state.lock().status
    }

    pub fn set_status(&self, status: ProcessStatus) {
        self.state.lock().status = status;
    }

    pub fn flags(&self) -> ProcessFlags {
        self.state.lock().flags
    }

    pub fn set_no_thread_restrictions(&self, value: bool) {
        self.state.lock().flags.no_thread_restrictions = value;
    }

    pub fn memory_used(&self) -> u32 {
        self.state.lock().memory_used
    }

    // --- handle table ------------------------------------------------------

    pub fn create_handle(&self, object: Object) -> SvcResult<Handle> {
        self.state.lock().handle_table.create(object)
    }

    pub fn get_object(&self, handle: Handle) -> Option<Object> {
        self.state.lock().handle_table.get(handle)
    }

    pub fn close_handle(&self, handle: Handle) -> SvcResult<Object> {
        self.state.lock().handle_table.close(handle)
    }

    pub fn handle_count(&self) -> usize {
        self.state.lock().handle_table.len()
    }

    pub fn clear_handle_table(&self) {
        self.state.lock().handle_table.clear();
    }

    // --- virtual memory ----------------------------------------------------

    pub fn linear_heap_base(&self) -> u32 {
        self.state.lock().linear_base
    }

    pub fn linear_heap_limit(&self) -> u32 {
        LINEAR_HEAP_VADDR_END
    }

    /// Base of the linear window, for VA→PA offset queries.
    pub fn linear_heap_area_address(&self) -> u32 {
        self.linear_heap_base()
    }

    /// Translate a virtual address to an FCRAM offset with the length of the
    /// contiguous run sharing the translation.
    pub fn translate_run(&self, addr: u32) -> Option<(u32, u32)> {
        self.state.lock().vm.translate(addr)
    }

    /// The containing VMA's `(state, backing, base, size)`, if mapped.
    pub fn vma_info(&self, addr: u32) -> Option<(MemoryState, Backing, u32, u32)> {
        let state = self.state.lock();
        let vma = state.vm.find_vma(addr)?;
        Some((vma.state, vma.backing, vma.base, vma.size))
    }

    pub fn query_memory(&self, addr: u32) -> Option<MemoryInfo> {
        self.state.lock().vm.query(addr)
    }

    /// Commit pages in the regular heap. A zero `addr0` picks the first fit.
    pub fn heap_allocate(
        &self,
        memory: &mut MemorySystem,
        addr0: u32,
        size: u32,
        permissions: MemoryPermission,
    ) -> SvcResult<u32> {
        let mut state = self.state.lock();
        let target = if addr0 == 0 {
            state
                .vm
                .find_free_area(HEAP_VADDR, HEAP_VADDR_END, size)
                .ok_or(ERR_OUT_OF_MEMORY)?
        } else {
            addr0
        };
        if target < HEAP_VADDR || target.saturating_add(size) > HEAP_VADDR_END {
            return Err(ERR_INVALID_ADDRESS);
        }
        let region = state.flags.memory_region;
        let fcram_offset = memory.allocate(region, size)?;
        if let Err(e) = state.vm.map_backing_memory(
            target,
            fcram_offset,
            size,
            MemoryState::Continuous,
            permissions,
        ) {
            memory.free(fcram_offset, size);
            return Err(e);
        }
        state.memory_used += size;
        Ok(target)
    }

    /// Release heap pages committed by `heap_allocate`.
    pub fn heap_free(&self, memory: &mut MemorySystem, addr: u32, size: u32) -> SvcResult<()> {
        if addr < HEAP_VADDR || addr.saturating_add(size) > HEAP_VADDR_END {
            return Err(ERR_INVALID_ADDRESS);
        }
        let mut state = self.state.lock();
        if !state.vm.range_has_state(addr, size, MemoryState::Continuous) {
            return Err(ERR_INVALID_ADDRESS_STATE);
        }
        let runs = collect_backing_runs(&state.vm, addr, size)?;
        state.vm.unmap_range(addr, size)?;
        for (offset, len) in runs {
            memory.free(offset, len);
        }
        state.memory_used = state.memory_used.saturating_sub(size);
        Ok(())
    }

    /// Commit physically-contiguous pages visible through the linear window.
    pub fn linear_allocate(
        &self,
        memory: &mut MemorySystem,
        addr0: u32,
        size: u32,
        permissions: MemoryPermission,
    ) -> SvcResult<u32> {
        let mut state = self.state.lock();
        let region = state.flags.memory_region;
        let linear_base = state.linear_base;
        let fcram_offset = if addr0 == 0 {
            memory.allocate(region, size)?
        } else {
            if addr0 < linear_base || addr0.saturating_add(size) > LINEAR_HEAP_VADDR_END {
                return Err(ERR_INVALID_ADDRESS);
            }
            memory.allocate_at(region, addr0 - linear_base, size)?
        };
        let target = linear_base + fcram_offset;
        if let Err(e) = state.vm.map_backing_memory(
            target,
            fcram_offset,
            size,
            MemoryState::Continuous,
            permissions,
        ) {
            memory.free(fcram_offset, size);
            return Err(e);
        }
        state.memory_used += size;
        Ok(target)
    }

    /// Release pages committed by `linear_allocate`.
    pub fn linear_free(&self, memory: &mut MemorySystem, addr: u32, size: u32) -> SvcResult<()> {
        let mut state = self.state.lock();
        if addr < state.linear_base || addr.saturating_add(size) > LINEAR_HEAP_VADDR_END {
            return Err(ERR_INVALID_ADDRESS);
        }
        if !state.vm.range_has_state(addr, size, MemoryState::Continuous) {
            return Err(ERR_INVALID_ADDRESS_STATE);
        }
        let runs = collect_backing_runs(&state.vm, addr, size)?;
        state.vm.unmap_range(addr, size)?;
        for (offset, len) in runs {
            memory.free(offset, len);
        }
        state.memory_used = state.memory_used.saturating_sub(size);
        Ok(())
    }

    /// Mirror `[addr1, addr1+size)` at `addr0` as an alias mapping.
    pub fn map(
        &self,
        addr0: u32,
        addr1: u32,
        size: u32,
        permissions: MemoryPermission,
    ) -> SvcResult<()> {
        let mut state = self.state.lock();
        if !state.vm.range_has_state(addr1, size, MemoryState::Continuous) {
            return Err(ERR_INVALID_ADDRESS_STATE);
        }
        let runs = collect_backing_runs(&state.vm, addr1, size)?;
        let mut mapped = 0;
        for (offset, len) in runs {
            state.vm.map_backing_memory(
                addr0 + mapped,
                offset,
                len,
                MemoryState::Alias,
                permissions,
            )?;
            mapped += len;
        }
        state.vm.set_state_range(addr1, size, MemoryState::Aliased)?;
        Ok(())
    }

    /// Tear down an alias created by `map`.
    pub fn unmap(
        &self,
        addr0: u32,
        addr1: u32,
        size: u32,
        _permissions: MemoryPermission,
    ) -> SvcResult<()> {
        let mut state = self.state.lock();
        if !state.vm.range_has_state(addr0, size, MemoryState::Alias) {
            return Err(ERR_INVALID_ADDRESS_STATE);
        }
        state.vm.unmap_range(addr0, size)?;
        if state.vm.range_has_state(addr1, size, MemoryState::Aliased) {
            state.vm.set_state_range(addr1, size, MemoryState::Continuous)?;
        }
        Ok(())
    }

    pub fn reprotect(&self, addr: u32, size: u32, permissions: MemoryPermission) -> SvcResult<()> {
        self.state.lock().vm.reprotect_range(addr, size, permissions)
    }

    /// Reprotect every mapped VMA to read-write-execute.
    pub fn set_all_rwx(&self) {
        let mut state = self.state.lock();
        let ranges: Vec<(u32, u32)> = state
            .vm
            .iter()
            .filter(|vma| vma.state != MemoryState::Free)
            .map(|vma| (vma.base, vma.size))
            .collect();
        for (base, size) in ranges {
            if let Err(e) =
                state
                    .vm
                    .reprotect_range(base, size, MemoryPermission::READ_WRITE_EXECUTE)
            {
                warn!(
                    "set_all_rwx: reprotect of {base:#010X}+{size:#X} failed: {e:?}"
                );
            }
        }
    }

    /// Map backing memory at an explicit address on behalf of another
    /// process (`MapProcessMemoryEx`).
    pub fn map_backing_at(
        &self,
        addr: u32,
        fcram_offset: u32,
        size: u32,
        state_kind: MemoryState,
        permissions: MemoryPermission,
    ) -> SvcResult<()> {
        self.state
            .lock()
            .vm
            .map_backing_memory(addr, fcram_offset, size, state_kind, permissions)
    }

    pub fn unmap_range(&self, addr: u32, size: u32) -> SvcResult<()> {
        self.state.lock().vm.unmap_range(addr, size)
    }

    /// Carve a fresh TLS page for a new thread and return its address.
    pub fn allocate_tls(&self, memory: &mut MemorySystem) -> SvcResult<u32> {
        let mut state = self.state.lock();
        let slot = state.next_tls_slot;
        state.next_tls_slot += 1;
        let tls = TLS_AREA_VADDR + slot * PAGE_SIZE;
        let fcram_offset = memory.allocate(MemoryRegionName::Base, PAGE_SIZE)?;
        state.vm.map_backing_memory(
            tls,
            fcram_offset,
            PAGE_SIZE,
            MemoryState::Locked,
            MemoryPermission::READ_WRITE,
        )?;
        Ok(tls)
    }

    /// Drop every mapping and handle; called from `ExitProcess` teardown.
    pub fn tear_down(&self, memory: &mut MemorySystem) {
        let mut state = self.state.lock();
        // Alias mappings borrow heap backing and shared mappings borrow the
        // block object's backing; neither is owned by this process.
        let runs: Vec<(u32, u32)> = state
            .vm
            .iter()
            .filter(|vma| {
                !matches!(
                    vma.state,
                    MemoryState::Free | MemoryState::Alias | MemoryState::Shared
                )
            })
            .filter_map(|vma| match vma.backing {
                Backing::Memory { fcram_offset } => Some((fcram_offset, vma.size)),
                Backing::None => None,
            })
            .collect();
        for (offset, len) in runs {
            memory.free(offset, len);
        }
        state.vm = VmManager::new();
        state.memory_used = 0;
        state.handle_table.clear();
    }
}

impl WaitObject for Process {
    fn should_wait(&self, _thread: &Arc<Thread>) -> bool {
        self.status() == ProcessStatus::Running
    }

    fn acquire(&self, _thread: &Arc<Thread>, _as_object: &Object) {}

    fn waiters(&self) -> &WaiterList {
        &self.waiters
    }
}

/// Backing runs covering `[addr, addr+size)`, or an error if a hole exists.
fn collect_backing_runs(vm: &VmManager, addr: u32, size: u32) -> SvcResult<Vec<(u32, u32)>> {
    let mut runs = Vec::new();
    let mut cursor = addr;
    let end = addr.checked_add(size).ok_or(ERR_INVALID_ADDRESS)?;
    while cursor < end {
        let (offset, run) = vm.translate(cursor).ok_or(ERR_INVALID_ADDRESS)?;
        let len = run.min(end - cursor);
        runs.push((offset, len));
        cursor += len;
    }
    Ok(runs)
}
