//! Introspection SVC handlers: ticks, handle/process/thread/system queries,
//! and resource limits.

use log::{error, trace};

use lotus_abi::layout::{FCRAM_PADDR, PAGE_SIZE};
use lotus_abi::mem::MemoryRegionName;
use lotus_abi::result::{
    ERR_INVALID_ENUM_VALUE, ERR_MISALIGNED_SIZE, ERR_NOT_IMPLEMENTED, RESULT_SUCCESS,
};
use lotus_abi::Handle;

use crate::object::Object;
use crate::SvcResult;

use super::{finish, SvcContext};

/// Handle-info queries.
const HANDLE_INFO_ELAPSED_TICKS: u32 = 0;
const HANDLE_INFO_REFERENCE_COUNT: u32 = 1;
const HANDLE_INFO_STUBBED_1: u32 = 2;
const HANDLE_INFO_STUBBED_2: u32 = 0x32107;

/// System-info types.
const SYSTEM_INFO_REGION_MEMORY_USAGE: u32 = 0;
const SYSTEM_INFO_KERNEL_ALLOCATED_PAGES: u32 = 2;
const SYSTEM_INFO_KERNEL_SPAWNED_PIDS: u32 = 26;
const SYSTEM_INFO_NEW_CONSOLE_INFO: u32 = 0x10001;
const SYSTEM_INFO_EMULATOR_INFORMATION: u32 = 0x20000;

/// Emulator-information parameters: build identity split into 7-byte parts.
const EMU_INFO_IS_EMULATOR: i32 = 0;
const EMU_INFO_BUILD_NAME: i32 = 10;
const EMU_INFO_BUILD_VERSION: i32 = 11;
const EMU_INFO_BUILD_DATE_PART1: i32 = 20;
const EMU_INFO_BUILD_DATE_PART4: i32 = 23;
const EMU_INFO_BUILD_GIT_BRANCH_PART1: i32 = 30;
const EMU_INFO_BUILD_GIT_BRANCH_PART2: i32 = 31;
const EMU_INFO_BUILD_GIT_DESCRIPTION_PART1: i32 = 40;
const EMU_INFO_BUILD_GIT_DESCRIPTION_PART2: i32 = 41;

/// Process-info types.
const PROCESS_INFO_PRIVATE_AND_SHARED_USED_MEMORY: u32 = 0;
const PROCESS_INFO_SUPERVISOR_AND_HANDLE_USED_MEMORY: u32 = 1;
const PROCESS_INFO_PRIVATE_SHARED_SUPERVISOR_HANDLE_USED_MEMORY: u32 = 2;
const PROCESS_INFO_SUPERVISOR_AND_HANDLE_USED_MEMORY2: u32 = 3;
const PROCESS_INFO_USED_HANDLE_COUNT: u32 = 4;
const PROCESS_INFO_HIGHEST_HANDLE_COUNT: u32 = 5;
const PROCESS_INFO_KPROCESS_0X234: u32 = 6;
const PROCESS_INFO_THREAD_COUNT: u32 = 7;
const PROCESS_INFO_MAX_THREAD_AMOUNT: u32 = 8;
const PROCESS_INFO_MEMORY_REGION_FLAGS: u32 = 19;
const PROCESS_INFO_LINEAR_BASE_ADDR_OFFSET: u32 = 20;
const PROCESS_INFO_QTM_MEMORY_BLOCK_CONVERSION_OFFSET: u32 = 21;
const PROCESS_INFO_QTM_MEMORY_ADDRESS: u32 = 22;
const PROCESS_INFO_QTM_MEMORY_SIZE: u32 = 23;
// Custom values used by plugin loaders.
const PROCESS_INFO_CUSTOM_PROCESS_NAME: u32 = 0x10000;
const PROCESS_INFO_CUSTOM_PROCESS_TITLE_ID: u32 = 0x10001;
const PROCESS_INFO_CUSTOM_TEXT_SIZE: u32 = 0x10002;
const PROCESS_INFO_CUSTOM_RODATA_SIZE: u32 = 0x10003;
const PROCESS_INFO_CUSTOM_DATA_SIZE: u32 = 0x10004;
const PROCESS_INFO_CUSTOM_TEXT_ADDR: u32 = 0x10005;
const PROCESS_INFO_CUSTOM_RODATA_ADDR: u32 = 0x10006;
const PROCESS_INFO_CUSTOM_DATA_ADDR: u32 = 0x10007;

/// Thread-info types.
const THREAD_INFO_TLS_ADDRESS: u32 = 0x10000;

pub(super) fn get_system_tick(ctx: &mut SvcContext) {
    let ticks = ctx.system.current_core().timer().ticks();
    // Advance time to defeat guest busy-wait loops that poll the counter
    // until the frame ends.
    let advance = ctx.system.config.tick_advance;
    ctx.system.current_core_mut().timer_mut().add_ticks(advance);
    ctx.set_reg_u64(0, ticks);
}

pub(super) fn get_handle_info(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let info_type = ctx.reg(1);
    let result = ctx.get_handle_info(handle, info_type);
    finish(ctx, result, |ctx, value| ctx.set_reg_u64(1, value as u64));
}

pub(super) fn get_system_info(ctx: &mut SvcContext) {
    let info_type = ctx.reg(0);
    let param = ctx.reg(1) as i32;
    let (result, value) = ctx.get_system_info(info_type, param);
    ctx.set_result(result);
    ctx.set_reg_u64(1, value as u64);
}

pub(super) fn get_process_info(ctx: &mut SvcContext) {
    let process_handle = ctx.reg(0);
    let info_type = ctx.reg(1);
    let result = ctx.get_process_info(process_handle, info_type);
    finish(ctx, result, |ctx, value| ctx.set_reg_u64(1, value as u64));
}

pub(super) fn get_thread_info(ctx: &mut SvcContext) {
    let thread_handle = ctx.reg(0);
    let info_type = ctx.reg(1);
    let result = ctx.get_thread_info(thread_handle, info_type);
    finish(ctx, result, |ctx, value| ctx.set_reg_u64(1, value as u64));
}

pub(super) fn get_resource_limit(ctx: &mut SvcContext) {
    let process_handle = ctx.reg(0);
    trace!("called process={process_handle:#010X}");
    let result = ctx.get_process(process_handle).and_then(|process| {
        ctx.current_process()
            .create_handle(Object::ResourceLimit(process.resource_limit.clone()))
    });
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn get_resource_limit_limit_values(ctx: &mut SvcContext) {
    let values = ctx.reg(0);
    let resource_limit_handle = ctx.reg(1);
    let names = ctx.reg(2);
    let name_count = ctx.reg(3);
    let result =
        ctx.read_resource_limit_values(values, resource_limit_handle, names, name_count, true);
    finish(ctx, result, |_, ()| ());
}

pub(super) fn get_resource_limit_current_values(ctx: &mut SvcContext) {
    let values = ctx.reg(0);
    let resource_limit_handle = ctx.reg(1);
    let names = ctx.reg(2);
    let name_count = ctx.reg(3);
    let result =
        ctx.read_resource_limit_values(values, resource_limit_handle, names, name_count, false);
    finish(ctx, result, |_, ()| ());
}

/// Pack a 7-byte chunk of `s` (NUL padded) into an `i64`.
fn string_part(s: &str, part: usize) -> i64 {
    let bytes = s.as_bytes();
    let offset = part * 7;
    let mut out = [0u8; 8];
    if offset < bytes.len() {
        let chunk = &bytes[offset..bytes.len().min(offset + 7)];
        out[..chunk.len()].copy_from_slice(chunk);
    }
    i64::from_le_bytes(out)
}

impl SvcContext<'_> {
    fn get_handle_info(&mut self, handle: Handle, info_type: u32) -> SvcResult<i64> {
        let object = self.object_from_handle(handle)?;

        // Not initialized in the real kernel, but zero avoids leaking host
        // memory contents.
        let value = match info_type {
            HANDLE_INFO_ELAPSED_TICKS => object
                .as_process()
                .map(|p| p.creation_time_ticks as i64)
                .unwrap_or(0),
            // The table's own reference is excluded.
            HANDLE_INFO_REFERENCE_COUNT => object.strong_count() as i64 - 1,
            // Stubbed in the real kernel; they do nothing.
            HANDLE_INFO_STUBBED_1 | HANDLE_INFO_STUBBED_2 => 0,
            _ => return Err(ERR_INVALID_ENUM_VALUE),
        };
        Ok(value)
    }

    fn get_system_info(&mut self, info_type: u32, param: i32) -> (lotus_abi::result::ResultCode, i64) {
        trace!("called type={info_type} param={param}");

        let value = match info_type {
            SYSTEM_INFO_REGION_MEMORY_USAGE => match param {
                0 => self.system.memory.total_used() as i64,
                1 => self.system.memory.region(MemoryRegionName::Application).used as i64,
                2 => self.system.memory.region(MemoryRegionName::System).used as i64,
                3 => self.system.memory.region(MemoryRegionName::Base).used as i64,
                _ => {
                    error!("unknown GetSystemInfo type=0 region: param={param}");
                    0
                }
            },
            SYSTEM_INFO_KERNEL_ALLOCATED_PAGES => {
                error!("unimplemented GetSystemInfo type=2 param={param}");
                0
            }
            SYSTEM_INFO_KERNEL_SPAWNED_PIDS => 5,
            SYSTEM_INFO_NEW_CONSOLE_INFO => {
                // Homebrew only checks whether this succeeds to detect the
                // newer console model.
                error!("unimplemented GetSystemInfo type=65537 param={param}");
                let result = if self.system.core_count() == 4 {
                    RESULT_SUCCESS
                } else {
                    ERR_INVALID_ENUM_VALUE
                };
                return (result, 0);
            }
            SYSTEM_INFO_EMULATOR_INFORMATION => {
                let config = &self.system.config;
                match param {
                    EMU_INFO_IS_EMULATOR => 1,
                    EMU_INFO_BUILD_NAME => string_part(&config.build_name, 0),
                    EMU_INFO_BUILD_VERSION => string_part(&config.build_version, 0),
                    p @ EMU_INFO_BUILD_DATE_PART1..=EMU_INFO_BUILD_DATE_PART4 => {
                        string_part(&config.build_date, (p - EMU_INFO_BUILD_DATE_PART1) as usize)
                    }
                    p @ EMU_INFO_BUILD_GIT_BRANCH_PART1..=EMU_INFO_BUILD_GIT_BRANCH_PART2 => {
                        string_part(
                            &config.scm_branch,
                            (p - EMU_INFO_BUILD_GIT_BRANCH_PART1) as usize,
                        )
                    }
                    p @ EMU_INFO_BUILD_GIT_DESCRIPTION_PART1
                        ..=EMU_INFO_BUILD_GIT_DESCRIPTION_PART2 => string_part(
                        &config.scm_desc,
                        (p - EMU_INFO_BUILD_GIT_DESCRIPTION_PART1) as usize,
                    ),
                    _ => {
                        error!("unknown GetSystemInfo emulator info param={param}");
                        0
                    }
                }
            }
            _ => {
                error!("unknown GetSystemInfo type={info_type} param={param}");
                0
            }
        };

        // Aside from the console-model check, this query never fails, even
        // for invalid parameters.
        (RESULT_SUCCESS, value)
    }

    fn get_process_info(&mut self, process_handle: Handle, info_type: u32) -> SvcResult<i64> {
        trace!("called process={process_handle:#010X} type={info_type}");
        let process = self.get_process(process_handle)?;

        let value = match info_type {
            PROCESS_INFO_PRIVATE_AND_SHARED_USED_MEMORY
            | PROCESS_INFO_PRIVATE_SHARED_SUPERVISOR_HANDLE_USED_MEMORY => {
                let used = process.memory_used() as i64;
                if used % PAGE_SIZE as i64 != 0 {
                    error!("called, memory size not page-aligned");
                    return Err(ERR_MISALIGNED_SIZE);
                }
                used
            }
            PROCESS_INFO_SUPERVISOR_AND_HANDLE_USED_MEMORY
            | PROCESS_INFO_SUPERVISOR_AND_HANDLE_USED_MEMORY2
            | PROCESS_INFO_USED_HANDLE_COUNT
            | PROCESS_INFO_HIGHEST_HANDLE_COUNT
            | PROCESS_INFO_KPROCESS_0X234
            | PROCESS_INFO_THREAD_COUNT
            | PROCESS_INFO_MAX_THREAD_AMOUNT => {
                // Valid, but not implemented.
                error!("unimplemented GetProcessInfo type={info_type}");
                0
            }
            PROCESS_INFO_MEMORY_REGION_FLAGS => ((process.flags().memory_region as u32) << 8) as i64,
            PROCESS_INFO_LINEAR_BASE_ADDR_OFFSET => {
                (FCRAM_PADDR - process.linear_heap_area_address()) as i64
            }
            PROCESS_INFO_QTM_MEMORY_BLOCK_CONVERSION_OFFSET
            | PROCESS_INFO_QTM_MEMORY_ADDRESS
            | PROCESS_INFO_QTM_MEMORY_SIZE => {
                // These return a different error than higher invalid values.
                error!("unknown GetProcessInfo type={info_type}");
                return Err(ERR_NOT_IMPLEMENTED);
            }
            PROCESS_INFO_CUSTOM_PROCESS_NAME => {
                let mut out = [0u8; 8];
                let name = process.codeset.name.as_bytes();
                let len = name.len().min(8);
                out[..len].copy_from_slice(&name[..len]);
                i64::from_le_bytes(out)
            }
            PROCESS_INFO_CUSTOM_PROCESS_TITLE_ID => process.codeset.program_id as i64,
            PROCESS_INFO_CUSTOM_TEXT_SIZE => process.codeset.text.size as i64,
            PROCESS_INFO_CUSTOM_RODATA_SIZE => process.codeset.rodata.size as i64,
            PROCESS_INFO_CUSTOM_DATA_SIZE => process.codeset.data.size as i64,
            PROCESS_INFO_CUSTOM_TEXT_ADDR => process.codeset.text.addr as i64,
            PROCESS_INFO_CUSTOM_RODATA_ADDR => process.codeset.rodata.addr as i64,
            PROCESS_INFO_CUSTOM_DATA_ADDR => process.codeset.data.addr as i64,
            _ => {
                error!("unknown GetProcessInfo type={info_type}");
                return Err(ERR_INVALID_ENUM_VALUE);
            }
        };
        Ok(value)
    }

    fn get_thread_info(&mut self, thread_handle: Handle, info_type: u32) -> SvcResult<i64> {
        trace!("called thread={thread_handle:#010X} type={info_type}");
        let thread = self.get_thread(thread_handle)?;

        match info_type {
            THREAD_INFO_TLS_ADDRESS => Ok(thread.tls_address() as i64),
            _ => {
                error!("unknown GetThreadInfo type={info_type}");
                Err(ERR_INVALID_ENUM_VALUE)
            }
        }
    }

    fn read_resource_limit_values(
        &mut self,
        values: u32,
        resource_limit_handle: Handle,
        names: u32,
        name_count: u32,
        limits: bool,
    ) -> SvcResult<()> {
        trace!(
            "called resource_limit={resource_limit_handle:#010X}, names={names:#010X}, \
             name_count={name_count}"
        );

        let resource_limit = self.get_resource_limit(resource_limit_handle)?;
        let process = self.current_process();

        for i in 0..name_count {
            let name = self.system.memory.read_u32(&process, names + i * 4)?;
            let value = if limits {
                resource_limit.max_value(name)
            } else {
                resource_limit.current_value(name)
            };
            self.system
                .memory
                .write_u64(&process, values + i * 8, value as u64)?;
        }
        Ok(())
    }
}
