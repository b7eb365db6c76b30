//! Break, debug output, and kernel-state SVC handlers.

use log::{debug, error, warn};

use crate::system::EmuStatus;
use crate::SvcResult;

use super::{finish, SvcContext};

/// Reboots the console; the only kernel state with a known purpose.
const KERNEL_STATE_REBOOT: u32 = 7;

pub(super) fn break_execution(ctx: &mut SvcContext) {
    let break_reason = ctx.reg(0);
    error!("Emulated program broke execution!");
    let reason = match break_reason {
        0 => "PANIC",
        1 => "ASSERT",
        2 => "USER",
        _ => "UNKNOWN",
    };
    error!("Break reason: {reason}");
    ctx.system.set_status(EmuStatus::Broken);
}

pub(super) fn output_debug_string(ctx: &mut SvcContext) {
    let address = ctx.reg(0);
    let len = ctx.reg(1) as i32;

    let process = ctx.current_process();
    if !ctx.system.memory.is_valid_virtual_address(&process, address) {
        warn!("OutputDebugString called with invalid address {address:#X}");
        return;
    }

    if len == 0 {
        // Zero-length output is the debug-I/O escape; route the request
        // block to whatever transport is attached.
        ctx.system.hio_request(address);
        return;
    }
    if len < 0 {
        return;
    }

    let mut buffer = vec![0u8; len as usize];
    if ctx
        .system
        .memory
        .read_block(&process, address, &mut buffer)
        .is_ok()
    {
        debug!("{}", String::from_utf8_lossy(&buffer));
    }
}

pub(super) fn kernel_set_state(ctx: &mut SvcContext) {
    let kernel_state = ctx.reg(0);
    let varg1 = ctx.reg(1);
    let varg2 = ctx.reg(2);

    let result: SvcResult<()> = match kernel_state {
        // A hardware reboot makes no sense under emulation; shut down.
        KERNEL_STATE_REBOOT => {
            ctx.system.request_shutdown();
            Ok(())
        }
        _ => {
            error!("Unknown KernelSetState state={kernel_state} varg1={varg1} varg2={varg2}");
            Ok(())
        }
    };
    finish(ctx, result, |_, ()| ());
}
