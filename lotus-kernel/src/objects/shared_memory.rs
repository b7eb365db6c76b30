//! Shared-memory blocks.

use std::sync::{Arc, Weak};

use lotus_abi::layout::is_page_aligned;
use lotus_abi::mem::{MemoryPermission, MemoryRegionName, MemoryState};
use lotus_abi::result::{ERR_INVALID_ADDRESS, ERR_MISALIGNED_ADDRESS, ERR_WRONG_PERMISSION};

use crate::memory::vmm::Backing;
use crate::memory::MemorySystem;
use crate::process::Process;
use crate::SvcResult;

pub struct SharedMemory {
    pub name: String,
    pub size: u32,
    /// Permissions granted to the owner process.
    permissions: MemoryPermission,
    /// Permissions granted to every other process.
    other_permissions: MemoryPermission,
    owner: Weak<Process>,
    backing_offset: u32,
}

impl SharedMemory {
    /// Create a block backed by a fresh allocation from `region`.
    pub fn allocate(
        memory: &mut MemorySystem,
        owner: &Arc<Process>,
        size: u32,
        permissions: MemoryPermission,
        other_permissions: MemoryPermission,
        region: MemoryRegionName,
        name: String,
    ) -> SvcResult<Self> {
        let backing_offset = memory.allocate(region, size)?;
        Ok(SharedMemory {
            name,
            size,
            permissions,
            other_permissions,
            owner: Arc::downgrade(owner),
            backing_offset,
        })
    }

    /// Create a block re-using memory the owner already committed at `addr`.
    pub fn from_owner_range(
        owner: &Arc<Process>,
        addr: u32,
        size: u32,
        permissions: MemoryPermission,
        other_permissions: MemoryPermission,
        name: String,
    ) -> SvcResult<Self> {
        let (state, backing, base, vma_size) =
            owner.vma_info(addr).ok_or(ERR_INVALID_ADDRESS)?;
        let Backing::Memory { fcram_offset } = backing else {
            return Err(ERR_INVALID_ADDRESS);
        };
        if state != MemoryState::Continuous || addr + size > base + vma_size {
            return Err(ERR_INVALID_ADDRESS);
        }
        Ok(SharedMemory {
            name,
            size,
            permissions,
            other_permissions,
            owner: Arc::downgrade(owner),
            backing_offset: fcram_offset + (addr - base),
        })
    }

    fn allowed_permissions(&self, process: &Arc<Process>) -> MemoryPermission {
        let is_owner = self
            .owner
            .upgrade()
            .map_or(false, |owner| Arc::ptr_eq(&owner, process));
        if is_owner {
            self.permissions
        } else {
            self.other_permissions
        }
    }

    /// Map the block into `process` at `addr`.
    pub fn map(
        &self,
        process: &Arc<Process>,
        addr: u32,
        permissions: MemoryPermission,
    ) -> SvcResult<()> {
        if addr == 0 || !is_page_aligned(addr) {
            return Err(ERR_MISALIGNED_ADDRESS);
        }
        let allowed = self.allowed_permissions(process);
        let effective = if permissions.contains(MemoryPermission::DONT_CARE) {
            MemoryPermission::READ_WRITE
        } else {
            permissions
        };
        if !allowed.contains(MemoryPermission::DONT_CARE) && !allowed.contains(effective) {
            return Err(ERR_WRONG_PERMISSION);
        }
        process.map_backing_at(
            addr,
            self.backing_offset,
            self.size,
            MemoryState::Shared,
            effective,
        )
    }

    /// Remove the block's mapping at `addr`.
    pub fn unmap(&self, process: &Arc<Process>, addr: u32) -> SvcResult<()> {
        let (state, backing, base, _) = process.vma_info(addr).ok_or(ERR_INVALID_ADDRESS)?;
        let Backing::Memory { fcram_offset } = backing else {
            return Err(ERR_INVALID_ADDRESS);
        };
        if state != MemoryState::Shared || base != addr || fcram_offset != self.backing_offset {
            return Err(ERR_INVALID_ADDRESS);
        }
        process.unmap_range(addr, self.size)
    }
}
