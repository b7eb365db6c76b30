//! IPC SVC handlers: ports, sessions, and the reply/receive pump.

use log::{trace, warn};

use lotus_abi::ipc::{Header, COMMAND_ID_NO_REPLY};
use lotus_abi::result::{
    ResultCode, ERR_INVALID_HANDLE, ERR_INVALID_POINTER, ERR_IPC_NO_OPERATION, ERR_NOT_FOUND,
    ERR_OUT_OF_RANGE, ERR_PORT_NAME_TOO_LONG, ERR_SESSION_CLOSED_BY_REMOTE, RESULT_SUCCESS,
};
use lotus_abi::Handle;

use crate::ipc::{receive_ipc_request, translate_command_buffer};
use crate::object::Object;
use crate::objects::{ClientPort, ClientSession};
use crate::thread::{ThreadStatus, WakeupCallback};
use crate::wake;
use crate::SvcResult;

use super::{finish, SvcContext};

const PORT_NAME_MAX_LENGTH: usize = 11;

pub(super) fn connect_to_port(ctx: &mut SvcContext) {
    let port_name_address = ctx.reg(0);
    let result = ctx.connect_to_port(port_name_address);
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn send_sync_request(ctx: &mut SvcContext) {
    let handle = ctx.reg(0);
    let result = ctx.send_sync_request(handle);
    finish(ctx, result, |_, ()| ());
}

pub(super) fn create_port(ctx: &mut SvcContext) {
    let name_address = ctx.reg(0);
    let max_sessions = ctx.reg(1);
    let result = ctx.create_port(name_address, max_sessions);
    finish(ctx, result, |ctx, (server, client)| {
        ctx.set_reg(1, server);
        ctx.set_reg(2, client);
    });
}

pub(super) fn create_session_to_port(ctx: &mut SvcContext) {
    let client_port_handle = ctx.reg(0);
    let result = ctx.create_session_to_port(client_port_handle);
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn create_session(ctx: &mut SvcContext) {
    let result = ctx.create_session();
    finish(ctx, result, |ctx, (server, client)| {
        ctx.set_reg(1, server);
        ctx.set_reg(2, client);
    });
}

pub(super) fn accept_session(ctx: &mut SvcContext) {
    let server_port_handle = ctx.reg(0);
    let result = ctx.accept_session(server_port_handle);
    finish(ctx, result, |ctx, handle| ctx.set_reg(1, handle));
}

pub(super) fn reply_and_receive(ctx: &mut SvcContext) {
    let handles_address = ctx.reg(0);
    let handle_count = ctx.reg(1) as i32;
    let reply_target = ctx.reg(2);
    let (result, index) = ctx.reply_and_receive(handles_address, handle_count, reply_target);
    ctx.set_result(result);
    if let Some(index) = index {
        ctx.set_reg(1, index as u32);
    }
}

impl SvcContext<'_> {
    /// Connect to a registered service port by name.
    fn connect_to_port(&mut self, port_name_address: u32) -> SvcResult<Handle> {
        let process = self.current_process();
        if !self
            .system
            .memory
            .is_valid_virtual_address(&process, port_name_address)
        {
            return Err(ERR_NOT_FOUND);
        }

        // Read one byte past the limit to detect names that are too long.
        let port_name = self.system.memory.read_cstring(
            &process,
            port_name_address,
            PORT_NAME_MAX_LENGTH + 1,
        )?;
        if port_name.len() > PORT_NAME_MAX_LENGTH {
            return Err(ERR_PORT_NAME_TOO_LONG);
        }

        trace!("called port_name={port_name}");

        let Some(client_port) = self.system.kernel.named_ports.get(&port_name).cloned() else {
            warn!("tried to connect to unknown port: {port_name}");
            return Err(ERR_NOT_FOUND);
        };

        let client_session = ClientPort::connect(&client_port, self.system)?;
        let handle = process.create_handle(Object::ClientSession(client_session))?;
        Ok(handle)
    }

    /// Blocking IPC call: parks the calling thread until the reply.
    fn send_sync_request(&mut self, handle: Handle) -> SvcResult<()> {
        let session = self.get_client_session(handle)?;

        trace!("called handle={handle:#010X}({})", session.name);

        self.system.prepare_reschedule();

        let thread = self.current_thread();

        if self.system.kernel.ipc_recorder.is_enabled() {
            let name = session.name.clone();
            self.system
                .kernel
                .ipc_recorder
                .register_request(&name, thread.thread_id);
        }

        ClientSession::send_sync_request(&session, self.system, &thread)
    }

    fn create_port(&mut self, name_address: u32, max_sessions: u32) -> SvcResult<(Handle, Handle)> {
        assert_eq!(name_address, 0, "named port creation is unimplemented");

        let process = self.current_process();
        let name = format!("port-{:08x}", self.system.current_core().lr());
        let (server, client) = self.system.kernel.create_port_pair(&name, max_sessions);
        // The client handle is created first and leaks if the server handle
        // fails, matching the original kernel.
        let client_handle = process.create_handle(Object::ClientPort(client))?;
        let server_handle = process.create_handle(Object::ServerPort(server))?;

        trace!("called max_sessions={max_sessions}");
        Ok((server_handle, client_handle))
    }

    fn create_session_to_port(&mut self, client_port_handle: Handle) -> SvcResult<Handle> {
        let client_port = self.get_client_port(client_port_handle)?;
        let session = ClientPort::connect(&client_port, self.system)?;
        self.current_process()
            .create_handle(Object::ClientSession(session))
    }

    fn create_session(&mut self) -> SvcResult<(Handle, Handle)> {
        let name = format!("session-{:08x}", self.system.current_core().lr());
        let (server, client) = self.system.kernel.create_session_pair(&name);
        let process = self.current_process();
        let server_handle = process.create_handle(Object::ServerSession(server))?;
        let client_handle = process.create_handle(Object::ClientSession(client))?;
        trace!("called");
        Ok((server_handle, client_handle))
    }

    fn accept_session(&mut self, server_port_handle: Handle) -> SvcResult<Handle> {
        let server_port = self.get_server_port(server_port_handle)?;
        let session = server_port.accept()?;
        self.current_process()
            .create_handle(Object::ServerSession(session))
    }

    /// Send a reply to `reply_target` (unless suppressed) and wait for the
    /// next request on the handle list.
    fn reply_and_receive(
        &mut self,
        handles_address: u32,
        handle_count: i32,
        reply_target: Handle,
    ) -> (ResultCode, Option<i32>) {
        let process = self.current_process();
        let thread = self.current_thread();

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

        // A command id of 0xFFFF in the outgoing buffer suppresses the reply.
        let header = match self
            .system
            .memory
            .read_u32(&process, thread.command_buffer_address())
        {
            Ok(word) => Header(word),
            Err(code) => return (code, None),
        };

        if reply_target != 0 && header.command_id() != COMMAND_ID_NO_REPLY {
            let session = match self.get_server_session(reply_target) {
                Ok(session) => session,
                Err(code) => return (code, None),
            };

            // Mark the request as handled.
            let request_thread = session.take_currently_handling();

            let Some(request_thread) = request_thread else {
                return (ERR_SESSION_CLOSED_BY_REMOTE, Some(-1));
            };
            if !session.parent.client_alive() {
                return (ERR_SESSION_CLOSED_BY_REMOTE, Some(-1));
            }

            let translation =
                translate_command_buffer(self.system, &thread, &request_thread, true);
            // Reply-direction translation failure means kernel-side
            // corruption; the real kernel always panics here.
            assert!(
                translation.is_ok(),
                "IPC reply translation failed: {:?}",
                translation.unwrap_err()
            );

            // Note: the scheduler is not invoked here.
            wake::resume_from_wait(self.system, &request_thread, wake::WakeReason::Signal, None);
        }

        if handle_count == 0 {
            // The kernel uses this placeholder when given no handles and no
            // reply was performed.
            let code = if reply_target == 0 || header.command_id() == COMMAND_ID_NO_REPLY {
                ERR_IPC_NO_OPERATION
            } else {
                RESULT_SUCCESS
            };
            return (code, Some(0));
        }

        // First ready object wins, lowest index first.
        let ready = objects
            .iter()
            .enumerate()
            .find(|(_, o)| !o.should_wait(&thread))
            .map(|(i, o)| (i, o.clone()));
        if let Some((index, object)) = ready {
            object.acquire(&thread);
            if let Some(session) = object.as_server_session() {
                let code = receive_ipc_request(self.system, session, &thread);
                return (code, Some(index as i32));
            }
            return (RESULT_SUCCESS, Some(index as i32));
        }

        // Nothing ready: park until a signal, completing the receive in the
        // wake callback.
        thread.set_status(ThreadStatus::WaitSynchAny);
        for object in &objects {
            object.add_waiting_thread(thread.clone());
        }
        thread.set_wait_objects(objects);
        thread.set_wakeup_callback(WakeupCallback::Ipc);

        self.system.prepare_reschedule();

        (RESULT_SUCCESS, Some(-1))
    }
}
