//! Handle-table SVC handlers.

use std::sync::Arc;

use log::trace;

use lotus_abi::Handle;

use crate::object::Object;
use crate::objects::{ClientSession, ServerSession};
use crate::SvcResult;

use super::{finish, SvcContext};

pub(super) fn close_handle(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let result = ctx.close_handle(handle);
    finish(ctx, result, |_, ()| ());
}

pub(super) fn duplicate_handle(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let result = ctx.duplicate_handle(handle);
    finish(ctx, result, |ctx, out| ctx.set_reg(1, out));
}

impl SvcContext<'_> {
    fn close_handle(&mut self, handle: Handle) -> SvcResult<()> {
        trace!("Closing handle {handle:#010X}");
        let object = self.current_process().close_handle(handle)?;

        // Dropping the last reference to a session half ends the
        // connection; the peer must observe the closure.
        match &object {
            Object::ClientSession(session) if Arc::strong_count(session) == 1 => {
                ClientSession::on_all_handles_closed(session, self.system);
            }
            Object::ServerSession(session) if Arc::strong_count(session) == 1 => {
                ServerSession::on_server_closed(session, self.system);
            }
            _ => {}
        }
        Ok(())
    }

    fn duplicate_handle(&mut self, handle: Handle) -> SvcResult<Handle> {
        let object = self.object_from_handle(handle)?;
        let out = self.current_process().create_handle(object)?;
        trace!("duplicated {handle:#010X} to {out:#010X}");
        Ok(out)
    }
}
