//! Guest physical memory (FCRAM) and accessors translated through a
//! process's virtual address space.

pub mod vmm;

use log::warn;

use lotus_abi::layout::{REGION_APPLICATION_SIZE, REGION_SYSTEM_SIZE};
use lotus_abi::mem::MemoryRegionName;
use lotus_abi::result::{ERR_INVALID_ADDRESS, ERR_INVALID_POINTER, ERR_OUT_OF_MEMORY};

use crate::process::Process;
use crate::SvcResult;

use std::collections::BTreeMap;

/// One physical region of FCRAM with a first-fit block allocator.
pub struct MemoryRegion {
    pub name: MemoryRegionName,
    /// FCRAM byte offset this region starts at.
    pub base: u32,
    pub size: u32,
    pub used: u32,
    /// Free blocks: start offset -> length. Adjacent blocks are merged on free.
    free_blocks: BTreeMap<u32, u32>,
}

impl MemoryRegion {
    fn new(name: MemoryRegionName, base: u32, size: u32) -> Self {
        let mut free_blocks = BTreeMap::new();
        free_blocks.insert(base, size);
        MemoryRegion {
            name,
            base,
            size,
            used: 0,
            free_blocks,
        }
    }

    /// Allocate a physically contiguous block, first fit.
    fn allocate(&mut self, size: u32) -> Option<u32> {
        let (&start, &len) = self.free_blocks.iter().find(|&(_, &len)| len >= size)?;
        self.free_blocks.remove(&start);
        if len > size {
            self.free_blocks.insert(start + size, len - size);
        }
        self.used += size;
        Some(start)
    }

    /// Return a block to the free list, merging with both neighbours.
    fn free(&mut self, offset: u32, size: u32) {
        self.used = self.used.saturating_sub(size);

        let prev = self
            .free_blocks
            .range(..offset)
            .next_back()
            .map(|(&start, &len)| (start, len))
            .filter(|&(start, len)| start + len == offset);
        let next = self
            .free_blocks
            .range(offset..)
            .next()
            .map(|(&start, &len)| (start, len))
            .filter(|&(start, _)| start == offset + size);

        match (prev, next) {
            (Some((p, pl)), Some((n, nl))) => {
                self.free_blocks.remove(&p);
                self.free_blocks.remove(&n);
                self.free_blocks.insert(p, pl + size + nl);
            }
            (Some((p, pl)), None) => {
                self.free_blocks.remove(&p);
                self.free_blocks.insert(p, pl + size);
            }
            (None, Some((n, nl))) => {
                self.free_blocks.remove(&n);
                self.free_blocks.insert(offset, size + nl);
            }
            (None, None) => {
                self.free_blocks.insert(offset, size);
            }
        }
    }

    /// Allocate the exact block `[offset, offset+size)` if it is free.
    fn allocate_at(&mut self, offset: u32, size: u32) -> Option<u32> {
        let (&start, &len) = self
            .free_blocks
            .range(..=offset)
            .next_back()
            .filter(|&(&start, &len)| offset + size <= start + len)?;
        self.free_blocks.remove(&start);
        if offset > start {
            self.free_blocks.insert(start, offset - start);
        }
        let tail = (start + len) - (offset + size);
        if tail > 0 {
            self.free_blocks.insert(offset + size, tail);
        }
        self.used += size;
        Some(offset)
    }

    fn contains(&self, offset: u32) -> bool {
        offset >= self.base && offset < self.base + self.size
    }
}

pub struct MemorySystem {
    fcram: Vec<u8>,
    regions: [MemoryRegion; 3],
}

impl MemorySystem {
    pub fn new(fcram_size: u32) -> Self {
        let app_size = REGION_APPLICATION_SIZE.min(fcram_size);
        let system_size = REGION_SYSTEM_SIZE.min(fcram_size - app_size);
        let base_size = fcram_size - app_size - system_size;
        MemorySystem {
            fcram: vec![0; fcram_size as usize],
            regions: [
                MemoryRegion::new(MemoryRegionName::Application, 0, app_size),
                MemoryRegion::new(MemoryRegionName::System, app_size, system_size),
                MemoryRegion::new(MemoryRegionName::Base, app_size + system_size, base_size),
            ],
        }
    }

    pub fn region(&self, name: MemoryRegionName) -> &MemoryRegion {
        self.regions.iter().find(|r| r.name == name).unwrap()
    }

    fn region_mut(&mut self, name: MemoryRegionName) -> &mut MemoryRegion {
        self.regions.iter_mut().find(|r| r.name == name).unwrap()
    }

    /// Allocate `size` contiguous bytes of FCRAM from `region`.
    pub fn allocate(&mut self, region: MemoryRegionName, size: u32) -> SvcResult<u32> {
        self.region_mut(region).allocate(size).ok_or_else(|| {
            warn!("out of memory allocating {size:#X} bytes from {region:?}");
            ERR_OUT_OF_MEMORY
        })
    }

    /// Allocate the exact FCRAM block `[offset, offset+size)` from `region`.
    pub fn allocate_at(
        &mut self,
        region: MemoryRegionName,
        offset: u32,
        size: u32,
    ) -> SvcResult<u32> {
        self.region_mut(region)
            .allocate_at(offset, size)
            .ok_or(ERR_OUT_OF_MEMORY)
    }

    /// Free a block previously handed out by `allocate`.
    pub fn free(&mut self, offset: u32, size: u32) {
        let region = self
            .regions
            .iter_mut()
            .find(|r| r.contains(offset))
            .expect("freed block belongs to no region");
        region.free(offset, size);
    }

    /// Total bytes in use across every region.
    pub fn total_used(&self) -> u64 {
        self.regions.iter().map(|r| r.used as u64).sum()
    }

    pub fn is_valid_virtual_address(&self, process: &Process, addr: u32) -> bool {
        process.translate_run(addr).is_some()
    }

    pub fn read_u32(&self, process: &Process, addr: u32) -> SvcResult<u32> {
        let mut bytes = [0u8; 4];
        self.read_block(process, addr, &mut bytes)
            .map_err(|_| ERR_INVALID_POINTER)?;
        Ok(u32::from_le_bytes(bytes))
    }

    pub fn write_u32(&mut self, process: &Process, addr: u32, value: u32) -> SvcResult<()> {
        self.write_block(process, addr, &value.to_le_bytes())
            .map_err(|_| ERR_INVALID_POINTER)
    }

    pub fn write_u64(&mut self, process: &Process, addr: u32, value: u64) -> SvcResult<()> {
        self.write_block(process, addr, &value.to_le_bytes())
            .map_err(|_| ERR_INVALID_POINTER)
    }

    /// Copy guest memory into `buffer`, crossing VMA boundaries as needed.
    pub fn read_block(&self, process: &Process, addr: u32, buffer: &mut [u8]) -> SvcResult<()> {
        let mut addr = addr;
        let mut copied = 0usize;
        while copied < buffer.len() {
            let (offset, run) = process.translate_run(addr).ok_or(ERR_INVALID_ADDRESS)?;
            let chunk = (buffer.len() - copied).min(run as usize);
            let src = &self.fcram[offset as usize..offset as usize + chunk];
            buffer[copied..copied + chunk].copy_from_slice(src);
            copied += chunk;
            addr += chunk as u32;
        }
        Ok(())
    }

    /// Copy `data` into guest memory, crossing VMA boundaries as needed.
    pub fn write_block(&mut self, process: &Process, addr: u32, data: &[u8]) -> SvcResult<()> {
        let mut addr = addr;
        let mut copied = 0usize;
        while copied < data.len() {
            let (offset, run) = process.translate_run(addr).ok_or(ERR_INVALID_ADDRESS)?;
            let chunk = (data.len() - copied).min(run as usize);
            let dst = &mut self.fcram[offset as usize..offset as usize + chunk];
            dst.copy_from_slice(&data[copied..copied + chunk]);
            copied += chunk;
            addr += chunk as u32;
        }
        Ok(())
    }

    /// Read a NUL-terminated string of at most `max_len` bytes.
    pub fn read_cstring(
        &self,
        process: &Process,
        addr: u32,
        max_len: usize,
    ) -> SvcResult<String> {
        let mut out = Vec::new();
        for i in 0..max_len {
            let mut byte = [0u8; 1];
            self.read_block(process, addr + i as u32, &mut byte)?;
            if byte[0] == 0 {
                break;
            }
            out.push(byte[0]);
        }
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lotus_abi::layout::PAGE_SIZE;

    #[test]
    fn regions_partition_fcram() {
        let mem = MemorySystem::new(lotus_abi::layout::FCRAM_SIZE);
        let app = mem.region(MemoryRegionName::Application);
        let sys = mem.region(MemoryRegionName::System);
        let base = mem.region(MemoryRegionName::Base);
        assert_eq!(app.base, 0);
        assert_eq!(sys.base, app.size);
        assert_eq!(base.base + base.size, lotus_abi::layout::FCRAM_SIZE);
    }

    #[test]
    fn allocate_free_reuses_space() {
        let mut mem = MemorySystem::new(lotus_abi::layout::FCRAM_SIZE);
        let a = mem.allocate(MemoryRegionName::Application, PAGE_SIZE).unwrap();
        let b = mem.allocate(MemoryRegionName::Application, PAGE_SIZE).unwrap();
        assert_ne!(a, b);
        assert_eq!(mem.region(MemoryRegionName::Application).used, 2 * PAGE_SIZE);

        mem.free(a, PAGE_SIZE);
        mem.free(b, PAGE_SIZE);
        assert_eq!(mem.region(MemoryRegionName::Application).used, 0);

        // After merging, the original block is handed out again.
        let c = mem.allocate(MemoryRegionName::Application, 2 * PAGE_SIZE).unwrap();
        assert_eq!(c, a);
    }
}
