//! Memory-control SVC handlers.

use std::sync::Arc;

use log::{debug, error, trace, warn};

use lotus_abi::layout::{
    is_page_aligned, page_round_up, FCRAM_PADDR, HEAP_VADDR, HEAP_VADDR_END,
    PROCESS_IMAGE_VADDR, SHARED_MEMORY_VADDR_END,
};
use lotus_abi::mem::{
    MemoryInfo, MemoryOperation, MemoryPermission, MemoryRegionName, MemoryState, PageInfo,
};
use lotus_abi::result::{
    ERR_INVALID_ADDRESS, ERR_INVALID_ADDRESS_STATE, ERR_INVALID_COMBINATION,
    ERR_MISALIGNED_ADDRESS, ERR_MISALIGNED_SIZE,
};
use lotus_abi::{Handle, CURRENT_PROCESS};

use crate::memory::vmm::Backing;
use crate::object::Object;
use crate::objects::SharedMemory;
use crate::SvcResult;

use super::{finish, SvcContext};

pub(super) fn control_memory(ctx: &mut SvcContext) {
    let addr0 = ctx.reg(0);
    let addr1 = ctx.reg(1);
    let size = ctx.reg(2);
    let operation = ctx.reg(3);
    let permissions = ctx.reg(4);
    let result = ctx.control_memory(addr0, addr1, size, operation, permissions);
    finish(ctx, result, |ctx, out_addr| ctx.set_reg(1, out_addr));
}

pub(super) fn query_memory(ctx: &mut SvcContext) {
    let addr = ctx.reg(0);
    let result = ctx.query_process_memory(CURRENT_PROCESS, addr);
    finish(ctx, result, write_memory_info);
}

pub(super) fn query_process_memory(ctx: &mut SvcContext) {
    let process_handle = ctx.reg(0);
    let addr = ctx.reg(1);
    let result = ctx.query_process_memory(process_handle, addr);
    finish(ctx, result, write_memory_info);
}

fn write_memory_info(ctx: &mut SvcContext, (info, page_info): (MemoryInfo, PageInfo)) {
    ctx.set_reg(1, info.base_address);
    ctx.set_reg(2, info.size);
    ctx.set_reg(3, info.permission);
    ctx.set_reg(4, info.state);
    ctx.set_reg(5, page_info.flags);
}

pub(super) fn create_memory_block(ctx: &mut SvcContext) {
    let addr = ctx.reg(0);
    let size = ctx.reg(1);
    let my_permission = ctx.reg(2);
    let other_permission = ctx.reg(3);
    let result = ctx.create_memory_block(addr, size, my_permission, other_permission);
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn map_memory_block(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let addr = ctx.reg(1);
    let permissions = ctx.reg(2);
    let other_permissions = ctx.reg(3);
    let result = ctx.map_memory_block(handle, addr, permissions, other_permissions);
    finish(ctx, result, |_, ()| ());
}

pub(super) fn unmap_memory_block(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let addr = ctx.reg(1);
    let result = ctx.unmap_memory_block(handle, addr);
    finish(ctx, result, |_, ()| ());
}

pub(super) fn convert_va_to_pa(ctx: &mut SvcContext) {
    let addr = ctx.reg(0);
    let pa = ctx.convert_va_to_pa(addr);
    ctx.set_reg(0, pa);
}

pub(super) fn map_process_memory_ex(ctx: &mut SvcContext) {
    let dst_process_handle = ctx.reg(0);
    let dst_address = ctx.reg(1);
    let src_process_handle = ctx.reg(2);
    let src_address = ctx.reg(3);
    let size = ctx.reg(4);
    let result = ctx.map_process_memory_ex(
        dst_process_handle,
        dst_address,
        src_process_handle,
        src_address,
        size,
    );
    finish(ctx, result, |_, ()| ());
}

pub(super) fn unmap_process_memory_ex(ctx: &mut SvcContext) {
    let process_handle = ctx.reg(0);
    let dst_address = ctx.reg(1);
    let size = ctx.reg(2);
    let result = ctx.unmap_process_memory_ex(process_handle, dst_address, size);
    finish(ctx, result, |_, ()| ());
}

pub(super) fn invalidate_instruction_cache_range(ctx: &mut SvcContext) {
    let addr = ctx.reg(0);
    let size = ctx.reg(1);
    ctx.system
        .current_core_mut()
        .invalidate_cache_range(addr, size);
    finish(ctx, Ok(()), |_, ()| ());
}

pub(super) fn invalidate_entire_instruction_cache(ctx: &mut SvcContext) {
    ctx.system.current_core_mut().clear_instruction_cache();
    finish(ctx, Ok(()), |_, ()| ());
}

impl SvcContext<'_> {
    /// Map, commit, free, or reprotect application memory.
    fn control_memory(
        &mut self,
        addr0: u32,
        addr1: u32,
        size: u32,
        operation: u32,
        permissions: u32,
    ) -> SvcResult<u32> {
        debug!(
            "called operation={operation:#010X}, addr0={addr0:#010X}, addr1={addr1:#010X}, \
             size={size:#X}, permissions={permissions:#010X}"
        );

        if !is_page_aligned(addr0) || !is_page_aligned(addr1) {
            return Err(ERR_MISALIGNED_ADDRESS);
        }
        if !is_page_aligned(size) {
            return Err(ERR_MISALIGNED_SIZE);
        }

        let operation = MemoryOperation(operation);
        if operation.region() != 0 {
            warn!(
                "ControlMemory with specified region not supported, region={:X}",
                operation.region()
            );
        }

        if permissions & !MemoryPermission::READ_WRITE.bits() != 0 {
            return Err(ERR_INVALID_COMBINATION);
        }
        let vma_permissions = MemoryPermission::from_bits_truncate(permissions);

        let process = self.current_process();
        let memory = &mut self.system.memory;

        let out_addr = match operation.operation() {
            MemoryOperation::FREE => {
                if (HEAP_VADDR..HEAP_VADDR_END).contains(&addr0) {
                    process.heap_free(memory, addr0, size)?;
                } else if addr0 >= process.linear_heap_base()
                    && addr0 < process.linear_heap_limit()
                {
                    process.linear_free(memory, addr0, size)?;
                } else {
                    return Err(ERR_INVALID_ADDRESS);
                }
                addr0
            }
            MemoryOperation::COMMIT => {
                if operation.is_linear() {
                    process.linear_allocate(memory, addr0, size, vma_permissions)?
                } else {
                    process.heap_allocate(memory, addr0, size, vma_permissions)?
                }
            }
            MemoryOperation::MAP => {
                process.map(addr0, addr1, size, vma_permissions)?;
                0
            }
            MemoryOperation::UNMAP => {
                process.unmap(addr0, addr1, size, vma_permissions)?;
                0
            }
            MemoryOperation::PROTECT => {
                process.reprotect(addr0, size, vma_permissions)?;
                0
            }
            unknown => {
                error!("unknown operation={unknown:#010X}");
                return Err(ERR_INVALID_COMBINATION);
            }
        };

        Ok(out_addr)
    }

    /// Locate and report the coalesced region containing `addr`.
    fn query_process_memory(
        &mut self,
        process_handle: Handle,
        addr: u32,
    ) -> SvcResult<(MemoryInfo, PageInfo)> {
        let process = self.get_process(process_handle)?;
        let info = process.query_memory(addr).ok_or(ERR_INVALID_ADDRESS)?;
        trace!("called process={process_handle:#010X} addr={addr:#010X}");
        Ok((info, PageInfo::default()))
    }

    fn create_memory_block(
        &mut self,
        addr: u32,
        size: u32,
        my_permission: u32,
        other_permission: u32,
    ) -> SvcResult<Handle> {
        if !is_page_aligned(size) {
            return Err(ERR_MISALIGNED_SIZE);
        }

        // Shared-memory blocks can not be created with execute permissions.
        let verify = |permission: u32| {
            let permission = MemoryPermission::from_bits_retain(permission);
            [
                MemoryPermission::NONE,
                MemoryPermission::READ,
                MemoryPermission::WRITE,
                MemoryPermission::READ_WRITE,
                MemoryPermission::DONT_CARE,
            ]
            .contains(&permission)
        };
        if !verify(my_permission) || !verify(other_permission) {
            return Err(ERR_INVALID_COMBINATION);
        }

        if addr != 0
            && (addr < PROCESS_IMAGE_VADDR
                || addr.saturating_add(size) > SHARED_MEMORY_VADDR_END)
        {
            return Err(ERR_INVALID_ADDRESS);
        }

        let process = self.current_process();
        let my_permission = MemoryPermission::from_bits_retain(my_permission);
        let other_permission = MemoryPermission::from_bits_retain(other_permission);
        let name = format!("shmem-{:08x}", self.system.current_core().lr());

        // Zero-address blocks come from Base unless the process carries the
        // shared-device-memory flag, which redirects to its own region.
        let shared_memory = if addr == 0 {
            let region = if process.flags().shared_device_mem {
                process.flags().memory_region
            } else {
                MemoryRegionName::Base
            };
            SharedMemory::allocate(
                &mut self.system.memory,
                &process,
                size,
                my_permission,
                other_permission,
                region,
                name,
            )?
        } else {
            SharedMemory::from_owner_range(
                &process,
                addr,
                size,
                my_permission,
                other_permission,
                name,
            )?
        };

        let handle = process.create_handle(Object::SharedMemory(Arc::new(shared_memory)))?;
        warn!("called addr={addr:#010X}");
        Ok(handle)
    }

    fn map_memory_block(
        &mut self,
        handle: Handle,
        addr: u32,
        permissions: u32,
        other_permissions: u32,
    ) -> SvcResult<()> {
        trace!(
            "called memblock={handle:#010X}, addr={addr:#010X}, mypermissions={permissions:#010X}, \
             otherpermission={other_permissions}"
        );

        let shared_memory = self.get_shared_memory(handle)?;
        let permissions = MemoryPermission::from_bits_retain(permissions);
        let accepted = [
            MemoryPermission::READ,
            MemoryPermission::WRITE,
            MemoryPermission::READ_WRITE,
            MemoryPermission::EXECUTE,
            MemoryPermission::READ_EXECUTE,
            MemoryPermission::WRITE.union(MemoryPermission::EXECUTE),
            MemoryPermission::READ_WRITE_EXECUTE,
            MemoryPermission::DONT_CARE,
        ];
        if !accepted.contains(&permissions) {
            error!("unknown permissions={:#010X}", permissions.bits());
            return Err(ERR_INVALID_COMBINATION);
        }
        let process = self.current_process();
        shared_memory.map(&process, addr, permissions)
    }

    fn unmap_memory_block(&mut self, handle: Handle, addr: u32) -> SvcResult<()> {
        trace!("called memblock={handle:#010X}, addr={addr:#010X}");
        let shared_memory = self.get_shared_memory(handle)?;
        let process = self.current_process();
        shared_memory.unmap(&process, addr)
    }

    /// Physical address behind `addr`, or zero for anything unmapped.
    fn convert_va_to_pa(&mut self, addr: u32) -> u32 {
        let process = self.current_process();
        match process.vma_info(addr) {
            Some((_, Backing::Memory { fcram_offset }, base, _)) => {
                FCRAM_PADDR + fcram_offset + (addr - base)
            }
            _ => 0,
        }
    }

    fn map_process_memory_ex(
        &mut self,
        dst_process_handle: Handle,
        dst_address: u32,
        src_process_handle: Handle,
        src_address: u32,
        size: u32,
    ) -> SvcResult<()> {
        let dst_process = self.get_process(dst_process_handle)?;
        let src_process = self.get_process(src_process_handle)?;

        let size = page_round_up(size);

        // Only linear memory supported.
        let (state, backing, base, vma_size) =
            src_process.vma_info(src_address).ok_or(ERR_INVALID_ADDRESS)?;
        let Backing::Memory { fcram_offset } = backing else {
            return Err(ERR_INVALID_ADDRESS);
        };
        if state != MemoryState::Continuous {
            return Err(ERR_INVALID_ADDRESS);
        }
        let offset = src_address - base;
        if offset + size > vma_size {
            return Err(ERR_INVALID_ADDRESS);
        }

        dst_process
            .map_backing_at(
                dst_address,
                fcram_offset + offset,
                size,
                MemoryState::Continuous,
                MemoryPermission::READ_WRITE_EXECUTE,
            )
            .map_err(|_| ERR_INVALID_ADDRESS_STATE)
    }

    fn unmap_process_memory_ex(
        &mut self,
        process_handle: Handle,
        dst_address: u32,
        size: u32,
    ) -> SvcResult<()> {
        let dst_process = self.get_process(process_handle)?;

        let size = page_round_up(size);

        // Only linear memory supported.
        let (state, backing, _, _) =
            dst_process.vma_info(dst_address).ok_or(ERR_INVALID_ADDRESS)?;
        if !matches!(backing, Backing::Memory { .. }) || state != MemoryState::Continuous {
            return Err(ERR_INVALID_ADDRESS);
        }

        dst_process.unmap_range(dst_address, size)
    }
}
