//! IPC command-buffer translation between thread pairs.
//!
//! The command buffer lives at the start of each thread's TLS page. A
//! translation pass copies the header and normal parameters verbatim and
//! rewrites the translate section: handles are re-created in the target
//! process (moves close the source handle) and the calling-PID placeholder
//! is filled in. Static and mapped buffers are not carried by this layer;
//! they fail the translation with a descriptor error.

use std::sync::Arc;

use log::error;

use lotus_abi::ipc::{Descriptor, Header};
use lotus_abi::result::{
    ERR_INVALID_HANDLE, ERR_IPC_DESCRIPTOR, ERR_SESSION_CLOSED_BY_REMOTE, ResultCode,
    RESULT_SUCCESS,
};

use crate::objects::ServerSession;
use crate::system::System;
use crate::thread::Thread;
use crate::wake;
use crate::SvcResult;

/// Copy and translate `src_thread`'s command buffer into `dst_thread`'s.
/// `reply` selects the server→client direction.
pub fn translate_command_buffer(
    system: &mut System,
    src_thread: &Arc<Thread>,
    dst_thread: &Arc<Thread>,
    reply: bool,
) -> SvcResult<()> {
    let src_process = src_thread
        .owner_process
        .upgrade()
        .ok_or(ERR_INVALID_HANDLE)?;
    let dst_process = dst_thread
        .owner_process
        .upgrade()
        .ok_or(ERR_INVALID_HANDLE)?;

    let src_base = src_thread.command_buffer_address();
    let dst_base = dst_thread.command_buffer_address();

    let header = Header(system.memory.read_u32(&src_process, src_base)?);
    system.memory.write_u32(&dst_process, dst_base, header.0)?;

    for i in 1..=header.normal_params() {
        let word = system.memory.read_u32(&src_process, src_base + i * 4)?;
        system.memory.write_u32(&dst_process, dst_base + i * 4, word)?;
    }

    let mut index = 1 + header.normal_params();
    let end = index + header.translate_params();
    while index < end {
        let descriptor_word = system.memory.read_u32(&src_process, src_base + index * 4)?;
        let descriptor = Descriptor::decode(descriptor_word).ok_or_else(|| {
            error!("unrecognized IPC descriptor {descriptor_word:#010X}");
            ERR_IPC_DESCRIPTOR
        })?;
        system
            .memory
            .write_u32(&dst_process, dst_base + index * 4, descriptor_word)?;
        index += 1;
        if index + descriptor.payload_words() > end {
            error!("IPC descriptor payload overruns the translate section");
            return Err(ERR_IPC_DESCRIPTOR);
        }

        match descriptor {
            Descriptor::CallingPid => {
                system.memory.write_u32(
                    &dst_process,
                    dst_base + index * 4,
                    src_process.process_id,
                )?;
                index += 1;
            }
            Descriptor::Handles {
                count,
                close_source,
            } => {
                for _ in 0..count {
                    let handle = system.memory.read_u32(&src_process, src_base + index * 4)?;
                    let translated = if handle == 0 {
                        0
                    } else {
                        let object =
                            src_process.get_object(handle).ok_or(ERR_INVALID_HANDLE)?;
                        let new_handle = dst_process.create_handle(object)?;
                        if close_source {
                            let _ = src_process.close_handle(handle);
                        }
                        new_handle
                    };
                    system
                        .memory
                        .write_u32(&dst_process, dst_base + index * 4, translated)?;
                    index += 1;
                }
            }
            Descriptor::StaticBuffer | Descriptor::MappedBuffer => {
                error!(
                    "buffer descriptors are not translated by this layer (reply={reply})"
                );
                return Err(ERR_IPC_DESCRIPTOR);
            }
        }
    }

    Ok(())
}

/// Run the receive-direction translation for the request `server_session`
/// is about to hand to `thread`.
pub fn receive_ipc_request(
    system: &mut System,
    server_session: &Arc<ServerSession>,
    thread: &Arc<Thread>,
) -> ResultCode {
    if !server_session.parent.client_alive() {
        return ERR_SESSION_CLOSED_BY_REMOTE;
    }

    let client_thread = server_session
        .currently_handling()
        .expect("receive without a pending request");

    if let Err(code) = translate_command_buffer(system, &client_thread, thread, false) {
        // Surface the failure to the requester and resume it immediately.
        client_thread.set_wait_synchronization_result(code);
        wake::resume_from_wait(system, &client_thread, wake::WakeReason::Signal, None);
        server_session.take_currently_handling();
        // The original kernel retries the wait here; that path has never
        // been taken in practice and is left unimplemented.
        panic!("IPC receive translation failed ({code:?}); re-waiting is unimplemented");
    }

    RESULT_SUCCESS
}

/// Minimal IPC request log consumed by external tooling.
#[derive(Default)]
pub struct IpcRecorder {
    enabled: bool,
    requests: Vec<IpcRequest>,
}

#[derive(Debug, Clone)]
pub struct IpcRequest {
    pub session: String,
    pub client_thread_id: u32,
}

impl IpcRecorder {
    pub fn new() -> Self {
        IpcRecorder::default()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn register_request(&mut self, session: &str, client_thread_id: u32) {
        self.requests.push(IpcRequest {
            session: session.into(),
            client_thread_id,
        });
    }

    pub fn requests(&self) -> &[IpcRequest] {
        &self.requests
    }
}
