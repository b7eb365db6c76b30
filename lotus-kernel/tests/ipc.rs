//! IPC end-to-end behavior: session pairs, the reply/receive pump, ports,
//! and handle translation across processes.

mod common;

use common::{boot, SCRATCH};

use lotus_abi::ipc::{Descriptor, Header};
use lotus_abi::result::{
    ERR_IPC_NO_OPERATION, ERR_PORT_NAME_TOO_LONG, ERR_SESSION_CLOSED_BY_REMOTE, RESULT_SUCCESS,
    RESULT_TIMEOUT,
};
use lotus_abi::svc;
use lotus_kernel::object::Object;
use lotus_kernel::thread::ThreadStatus;

/// Stage `handles` in guest scratch memory for `ReplyAndReceive`.
fn stage_handles(ts: &mut common::TestSystem, handles: &[u32]) -> u32 {
    for (i, &handle) in handles.iter().enumerate() {
        ts.write_guest_u32(SCRATCH + i as u32 * 4, handle);
    }
    SCRATCH
}

#[test]
fn send_sync_request_parks_client_until_reply() {
    let mut ts = boot(2);
    let client_thread = ts.threads[0].clone();
    let server_thread = ts.threads[1].clone();

    // The server half builds the session pair; both handles land in the
    // shared process table.
    ts.svc_on(1, svc::CREATE_SESSION, &[]);
    ts.assert_success(1);
    let server_session = ts.reg(1, 1);
    let client_session = ts.reg(1, 2);

    // Client writes its request and sends.
    let request = Header::new(0x0001, 1, 0);
    let client_cmd = client_thread.command_buffer_address();
    ts.write_guest_u32(client_cmd, request.0);
    ts.write_guest_u32(client_cmd + 4, 0xDEAD_BEEF);

    ts.svc_on(0, svc::SEND_SYNC_REQUEST, &[(0, client_session)]);
    ts.assert_success(0);
    assert_eq!(client_thread.status(), ThreadStatus::WaitIpc);

    // Server receives without replying: out index selects the session.
    let handles = stage_handles(&mut ts, &[server_session]);
    ts.svc_on(1, svc::REPLY_AND_RECEIVE, &[(0, handles), (1, 1), (2, 0)]);
    assert_eq!(ts.result(1), RESULT_SUCCESS);
    assert_eq!(ts.reg(1, 1), 0);

    // The request was translated into the server thread's buffer.
    let server_cmd = server_thread.command_buffer_address();
    assert_eq!(ts.read_guest_u32(server_cmd), request.0);
    assert_eq!(ts.read_guest_u32(server_cmd + 4), 0xDEAD_BEEF);
    assert_eq!(client_thread.status(), ThreadStatus::WaitIpc);

    // Server writes the reply and pumps again, replying to the session and
    // parking for the next request.
    let reply = Header::new(0x0001, 1, 0);
    ts.write_guest_u32(server_cmd, reply.0);
    ts.write_guest_u32(server_cmd + 4, 0xCAFE_F00D);

    let handles = stage_handles(&mut ts, &[server_session]);
    ts.svc_on(
        1,
        svc::REPLY_AND_RECEIVE,
        &[(0, handles), (1, 1), (2, server_session)],
    );

    // Client resumed with the translated reply.
    assert_eq!(client_thread.status(), ThreadStatus::Running);
    assert_eq!(ts.result(0), RESULT_SUCCESS);
    assert_eq!(ts.read_guest_u32(client_cmd + 4), 0xCAFE_F00D);

    // Server parked for the next request with index -1 reported.
    assert_eq!(server_thread.status(), ThreadStatus::WaitSynchAny);
    assert_eq!(ts.reg(1, 0), RESULT_SUCCESS.raw());
    assert_eq!(ts.reg(1, 1) as i32, -1);
}

#[test]
fn parked_server_wakes_on_incoming_request() {
    let mut ts = boot(2);
    let server_thread = ts.threads[1].clone();

    ts.svc_on(1, svc::CREATE_SESSION, &[]);
    let server_session = ts.reg(1, 1);
    let client_session = ts.reg(1, 2);

    // Server waits first.
    let handles = stage_handles(&mut ts, &[server_session]);
    ts.svc_on(1, svc::REPLY_AND_RECEIVE, &[(0, handles), (1, 1), (2, 0)]);
    assert_eq!(server_thread.status(), ThreadStatus::WaitSynchAny);

    // Client request arrives: the IPC wake callback runs the receive
    // translation and reports index 0.
    let client_cmd = ts.threads[0].command_buffer_address();
    ts.write_guest_u32(client_cmd, Header::new(0x0042, 0, 0).0);
    ts.svc_on(0, svc::SEND_SYNC_REQUEST, &[(0, client_session)]);
    ts.assert_success(0);

    assert_eq!(server_thread.status(), ThreadStatus::Running);
    assert_eq!(ts.reg(1, 0), RESULT_SUCCESS.raw());
    assert_eq!(ts.reg(1, 1), 0);
    let server_cmd = server_thread.command_buffer_address();
    assert_eq!(ts.read_guest_u32(server_cmd), Header::new(0x0042, 0, 0).0);
}

#[test]
fn reply_and_receive_with_no_work_returns_sentinel() {
    let mut ts = boot(1);

    let handles = stage_handles(&mut ts, &[]);
    ts.svc_on(0, svc::REPLY_AND_RECEIVE, &[(0, handles), (1, 0), (2, 0)]);
    assert_eq!(ts.result(0), ERR_IPC_NO_OPERATION);
    assert_eq!(ts.reg(0, 1), 0);
}

#[test]
fn reply_and_receive_mixed_object_list() {
    let mut ts = boot(1);

    ts.svc_on(0, svc::CREATE_SESSION, &[]);
    let server_session = ts.reg(0, 1);
    let event = ts.create_event(0, 0);
    ts.signal_event(0, event);

    // The signaled event (index 1) is ready; the idle session is not.
    let handles = stage_handles(&mut ts, &[server_session, event]);
    ts.svc_on(0, svc::REPLY_AND_RECEIVE, &[(0, handles), (1, 2), (2, 0)]);
    assert_eq!(ts.result(0), RESULT_SUCCESS);
    assert_eq!(ts.reg(0, 1), 1);
}

#[test]
fn closing_the_client_fails_pending_receives() {
    let mut ts = boot(2);
    let server_thread = ts.threads[1].clone();

    ts.svc_on(1, svc::CREATE_SESSION, &[]);
    let server_session = ts.reg(1, 1);
    let client_session = ts.reg(1, 2);

    let handles = stage_handles(&mut ts, &[server_session]);
    ts.svc_on(1, svc::REPLY_AND_RECEIVE, &[(0, handles), (1, 1), (2, 0)]);
    assert_eq!(server_thread.status(), ThreadStatus::WaitSynchAny);

    // Dropping the only client handle ends the connection.
    ts.svc_on(0, svc::CLOSE_HANDLE, &[(0, client_session)]);
    ts.assert_success(0);

    assert_eq!(server_thread.status(), ThreadStatus::Running);
    assert_eq!(ts.reg(1, 0), ERR_SESSION_CLOSED_BY_REMOTE.raw());
}

#[test]
fn handle_translation_across_processes() {
    use lotus_abi::mem::MemoryPermission;
    use lotus_kernel::process::{CodeSet, ProcessFlags};

    let mut ts = boot(1);

    // A second process with its own thread on core 1.
    let server_process = ts
        .system
        .kernel
        .create_process(CodeSet::new("srv", 2), ProcessFlags::default());
    server_process
        .heap_allocate(
            &mut ts.system.memory,
            SCRATCH,
            0x1000,
            MemoryPermission::READ_WRITE,
        )
        .unwrap();
    let server_thread = ts
        .system
        .kernel
        .create_thread(
            &mut ts.system.memory,
            &server_process,
            "srv-main".into(),
            0x0010_0000,
            0,
            48,
            1,
            SCRATCH + 0x1000,
        )
        .unwrap();
    ts.system.reschedule();

    // Session pair: client half to the app process, server half to the
    // server process.
    let (server_session, client_session) = ts.system.kernel.create_session_pair("xfer");
    let client_handle = ts
        .process
        .create_handle(Object::ClientSession(client_session))
        .unwrap();
    let server_handle = server_process
        .create_handle(Object::ServerSession(server_session))
        .unwrap();

    // The client sends one moved event handle.
    let event = ts.create_event(0, 0);
    let client_cmd = ts.threads[0].command_buffer_address();
    ts.write_guest_u32(client_cmd, Header::new(0x0001, 0, 2).0);
    ts.write_guest_u32(client_cmd + 4, Descriptor::move_handles(1));
    ts.write_guest_u32(client_cmd + 8, event);

    ts.svc_on(0, svc::SEND_SYNC_REQUEST, &[(0, client_handle)]);
    ts.assert_success(0);

    // Server receives on core 1.
    ts.system
        .memory
        .write_u32(&server_process, SCRATCH, server_handle)
        .unwrap();
    ts.svc_on(1, svc::REPLY_AND_RECEIVE, &[(0, SCRATCH), (1, 1), (2, 0)]);
    assert_eq!(ts.result(1), RESULT_SUCCESS);

    let server_cmd = server_thread.command_buffer_address();
    let translated = ts
        .system
        .memory
        .read_u32(&server_process, server_cmd + 8)
        .unwrap();
    assert_ne!(translated, 0);

    // The move closed the source handle and re-created it server-side.
    assert!(ts.process.get_object(event).is_none());
    let received = server_process.get_object(translated).expect("translated handle");
    assert!(received.as_event().is_some());
}

#[test]
fn named_ports_resolve_and_reject_long_names() {
    let mut ts = boot(2);

    // Host side registers the port, server side holds the server-port
    // handle.
    let (server_port, client_port) = ts.system.kernel.create_port_pair("app:test", 4);
    ts.system.kernel.add_named_port("app:test", client_port);
    let server_port_handle = ts
        .process
        .create_handle(Object::ServerPort(server_port.clone()))
        .unwrap();

    // Guest connects by name.
    let name_addr = SCRATCH + 0x800;
    ts.system
        .memory
        .write_block(&ts.process.clone(), name_addr, b"app:test\0")
        .unwrap();
    ts.svc_on(0, svc::CONNECT_TO_PORT, &[(0, name_addr)]);
    ts.assert_success(0);
    let session_handle = ts.reg(0, 1);
    assert!(ts.process.get_object(session_handle).is_some());
    assert_eq!(server_port.pending_session_count(), 1);

    // Accepting yields the server half of the new session.
    ts.svc_on(1, svc::ACCEPT_SESSION, &[(0, server_port_handle)]);
    ts.assert_success(1);
    assert!(ts
        .process
        .get_object(ts.reg(1, 1))
        .and_then(|o| o.as_server_session().cloned())
        .is_some());
    assert_eq!(server_port.pending_session_count(), 0);

    // Over-long names are rejected before the lookup.
    let long_addr = SCRATCH + 0x900;
    ts.system
        .memory
        .write_block(&ts.process.clone(), long_addr, b"far-too-long\0")
        .unwrap();
    ts.svc_on(0, svc::CONNECT_TO_PORT, &[(0, long_addr)]);
    assert_eq!(ts.result(0), ERR_PORT_NAME_TOO_LONG);
}

#[test]
fn waiting_on_a_server_port_wakes_on_connect() {
    let mut ts = boot(2);
    let waiter = ts.threads[1].clone();

    let (server_port, client_port) = ts.system.kernel.create_port_pair("app:wake", 4);
    let server_port_handle = ts
        .process
        .create_handle(Object::ServerPort(server_port))
        .unwrap();
    let client_port_handle = ts
        .process
        .create_handle(Object::ClientPort(client_port))
        .unwrap();

    assert_eq!(ts.wait1(1, server_port_handle, 0), RESULT_TIMEOUT);
    assert_eq!(ts.wait1(1, server_port_handle, -1), RESULT_TIMEOUT);
    assert_eq!(waiter.status(), ThreadStatus::WaitSynchAny);

    // A new connection signals the port.
    ts.svc_on(0, svc::CREATE_SESSION_TO_PORT, &[(0, client_port_handle)]);
    ts.assert_success(0);
    assert_eq!(waiter.status(), ThreadStatus::Running);
    assert_eq!(ts.reg(1, 0), RESULT_SUCCESS.raw());
}

#[test]
fn ipc_recorder_captures_requests_when_enabled() {
    let mut ts = boot(2);

    ts.svc_on(1, svc::CREATE_SESSION, &[]);
    let server_session = ts.reg(1, 1);
    let client_session = ts.reg(1, 2);

    ts.system.kernel.ipc_recorder.set_enabled(true);

    let client_cmd = ts.threads[0].command_buffer_address();
    ts.write_guest_u32(client_cmd, Header::new(0x0001, 0, 0).0);
    ts.svc_on(0, svc::SEND_SYNC_REQUEST, &[(0, client_session)]);

    let requests = ts.system.kernel.ipc_recorder.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].client_thread_id, ts.threads[0].thread_id);

    // Drain the request so the harness teardown stays quiet.
    let handles = SCRATCH;
    ts.write_guest_u32(handles, server_session);
    ts.svc_on(1, svc::REPLY_AND_RECEIVE, &[(0, handles), (1, 1), (2, 0)]);
    assert_eq!(ts.result(1), RESULT_SUCCESS);
}
