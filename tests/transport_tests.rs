//! Transport and session tests over loopback sockets
//!
//! Runs scripted host threads on 127.0.0.1 so the correlation protocol,
//! the discard semantics, the closed-state latch, the end-of-session
//! behavior, and the sign-on handshake are exercised over real sockets.

use std::io::Write;
use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use hostlink400::auth::{build_security_check_reply, CP_USRID, CODE_SECURITY_CHECK};
use hostlink400::config::ConnectOptions;
use hostlink400::error::{AuthError, HostlinkError, TransportError};
use hostlink400::frame::{reply_code, Frame, CODE_END_OF_SESSION, CODE_HEARTBEAT};
use hostlink400::service::HostService;
use hostlink400::session::{Credential, HostConnectionFactory, HostSession, SessionFactory};
use hostlink400::transport::{HostTransport, Transport};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Start a one-connection host thread running the given script
fn spawn_host<F>(script: F) -> (u16, thread::JoinHandle<()>)
where
    F: FnOnce(TcpStream) + Send + 'static,
{
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback");
    let port = listener.local_addr().expect("local addr").port();
    let handle = thread::spawn(move || {
        if let Ok((stream, _)) = listener.accept() {
            script(stream);
        }
    });
    (port, handle)
}

fn connect_transport(port: u16, service: HostService) -> HostTransport {
    let tcp = TcpStream::connect(("127.0.0.1", port)).expect("connect to host thread");
    tcp.set_read_timeout(Some(Duration::from_secs(5)))
        .expect("read timeout");
    HostTransport::new(service, Box::new(tcp))
}

fn echo_reply(request: &Frame) -> Frame {
    let mut reply = Frame::new(
        request.service,
        reply_code(request.code),
        request.payload.clone(),
    );
    reply.correlation = request.correlation;
    reply
}

/// Answers every request with an echo until end of session
fn echo_host(mut stream: TcpStream) {
    loop {
        let request = match Frame::read_from(&mut stream) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        if request.code == CODE_END_OF_SESSION {
            return;
        }
        if stream.write_all(&echo_reply(&request).to_bytes()).is_err() {
            return;
        }
    }
}

#[test]
fn test_replies_arriving_out_of_order_reach_their_callers() {
    // Host reads both requests, then answers the second one first
    let (port, host) = spawn_host(|mut stream| {
        let first = Frame::read_from(&mut stream).expect("first request");
        let second = Frame::read_from(&mut stream).expect("second request");
        for request in [&second, &first] {
            stream
                .write_all(&echo_reply(request).to_bytes())
                .expect("write reply");
        }
        while let Ok(frame) = Frame::read_from(&mut stream) {
            if frame.code == CODE_END_OF_SESSION {
                break;
            }
        }
    });

    let transport = Arc::new(connect_transport(port, HostService::Database));
    let request_x = Frame::new(HostService::Database.id(), 0x1001, vec![0x58]);
    let request_y = Frame::new(HostService::Database.id(), 0x1001, vec![0x59]);
    let id_x = transport.send(&request_x).expect("send x");
    let id_y = transport.send(&request_y).expect("send y");
    assert_eq!((id_x, id_y), (1, 2));

    let t_x = {
        let transport = transport.clone();
        thread::spawn(move || transport.receive(id_x).expect("reply for x"))
    };
    let t_y = {
        let transport = transport.clone();
        thread::spawn(move || transport.receive(id_y).expect("reply for y"))
    };

    let reply_x = t_x.join().expect("x panicked");
    let reply_y = t_y.join().expect("y panicked");
    assert_eq!(reply_x.correlation, id_x);
    assert_eq!(reply_x.payload, vec![0x58], "caller X must get X's reply");
    assert_eq!(reply_y.correlation, id_y);
    assert_eq!(reply_y.payload, vec![0x59], "caller Y must get Y's reply");

    transport.disconnect();
    host.join().expect("host panicked");
}

#[test]
fn test_concurrent_callers_never_receive_foreign_frames() {
    let (port, host) = spawn_host(echo_host);
    let transport = Arc::new(connect_transport(port, HostService::RemoteCommand));

    let mut workers = Vec::new();
    for worker in 0u8..4 {
        let transport = transport.clone();
        workers.push(thread::spawn(move || {
            for sequence in 0u8..25 {
                let payload = vec![worker, sequence];
                let request =
                    Frame::new(HostService::RemoteCommand.id(), 0x2001, payload.clone());
                // Alternate between the combined exchange and a split
                // send/receive so buffered claims are exercised too
                let reply = if sequence % 2 == 0 {
                    transport.send_and_receive(&request).expect("exchange")
                } else {
                    let id = transport.send(&request).expect("send");
                    transport.receive(id).expect("receive")
                };
                assert_eq!(reply.code, reply_code(0x2001));
                assert_eq!(
                    reply.payload, payload,
                    "caller got a frame stamped for someone else"
                );
            }
        }));
    }
    for worker in workers {
        worker.join().expect("worker panicked");
    }

    transport.disconnect();
    host.join().expect("host panicked");
}

#[test]
fn test_discarded_reply_never_surfaces() {
    // Host answers both requests in order; the first reply is marked for
    // discard and must be dropped on arrival
    let (port, host) = spawn_host(echo_host);
    let transport = connect_transport(port, HostService::DataQueue);

    let fire_and_forget = Frame::new(HostService::DataQueue.id(), 0x3001, vec![0xFF]);
    let id_discard = transport
        .send_and_discard(&fire_and_forget)
        .expect("send and discard");

    let request = Frame::new(HostService::DataQueue.id(), 0x3002, vec![0x01]);
    let id = transport.send(&request).expect("send");
    assert_ne!(id, id_discard);

    let reply = transport.receive(id).expect("receive");
    assert_eq!(reply.correlation, id, "the discarded reply must be skipped");
    assert_eq!(reply.payload, vec![0x01]);

    // The transport is still in sync after dropping the discarded frame
    let followup = Frame::new(HostService::DataQueue.id(), 0x3003, vec![0x02]);
    let reply = transport.send_and_receive(&followup).expect("follow-up");
    assert_eq!(reply.payload, vec![0x02]);

    transport.disconnect();
    host.join().expect("host panicked");
}

#[test]
fn test_peer_close_latches_transport() {
    // Host reads one request and closes without answering
    let (port, host) = spawn_host(|mut stream| {
        let _ = Frame::read_from(&mut stream);
    });
    let transport = connect_transport(port, HostService::Central);

    let request = Frame::new(HostService::Central.id(), 0x4001, Vec::new());
    let id = transport.send(&request).expect("send");
    assert!(
        transport.receive(id).is_err(),
        "read against a closed peer must fail"
    );
    assert!(transport.is_closed(), "transport must latch closed");

    // Later callers fail fast instead of touching the dead socket
    match transport.send(&request) {
        Err(TransportError::Closed) => {}
        other => panic!("expected Closed, got {other:?}"),
    }
    match transport.receive(id) {
        Err(TransportError::Closed) => {}
        other => panic!("expected Closed, got {other:?}"),
    }
    host.join().expect("host panicked");
}

#[test]
fn test_double_disconnect_sends_one_end_of_session() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let record = seen.clone();
    let (port, host) = spawn_host(move |mut stream| {
        while let Ok(frame) = Frame::read_from(&mut stream) {
            record.lock().unwrap().push(frame.code);
        }
    });

    let transport = connect_transport(port, HostService::File);
    transport.disconnect();
    transport.disconnect();
    assert!(transport.is_closed());

    host.join().expect("host panicked");
    let codes = seen.lock().unwrap();
    assert_eq!(
        codes.as_slice(),
        &[CODE_END_OF_SESSION],
        "exactly one end-of-session frame may cross the wire"
    );
}

/// Sign-on host answering the security check, then heartbeats
fn signon_host(accept: bool, requests: Arc<Mutex<Vec<Vec<u8>>>>) -> impl FnOnce(TcpStream) {
    move |mut stream: TcpStream| loop {
        let request = match Frame::read_from(&mut stream) {
            Ok(frame) => frame,
            Err(_) => return,
        };
        match request.code {
            CODE_SECURITY_CHECK => {
                requests.lock().unwrap().push(request.payload.clone());
                let status = if accept { 0 } else { 0x16 };
                let mut reply = Frame::new(
                    request.service,
                    reply_code(CODE_SECURITY_CHECK),
                    build_security_check_reply(status),
                );
                reply.correlation = request.correlation;
                if stream.write_all(&reply.to_bytes()).is_err() {
                    return;
                }
            }
            CODE_HEARTBEAT => {
                if stream.write_all(&echo_reply(&request).to_bytes()).is_err() {
                    return;
                }
            }
            CODE_END_OF_SESSION => return,
            _ => return,
        }
    }
}

fn loopback_options(port: u16) -> ConnectOptions {
    ConnectOptions {
        connect_timeout_secs: 5,
        read_timeout_secs: 5,
        write_timeout_secs: 5,
        use_tls: false,
        tls_ca_bundle_path: None,
        port_override: Some(port),
    }
}

#[test]
fn test_session_authenticates_and_answers_probes() {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let (port, host) = spawn_host(signon_host(true, requests.clone()));

    let factory = HostConnectionFactory::new(
        "127.0.0.1",
        Credential::Password {
            user: "jdoe".to_string(),
            secret: vec![0xA5; 8],
        },
        loopback_options(port),
    );
    let session = factory.create(false, None, None).expect("session create");
    assert!(session.is_connected(HostService::SignOn));
    assert!(session.probe_alive(), "heartbeat probe should succeed");

    session.disconnect();
    host.join().expect("host panicked");

    // The security check the host saw carries the EBCDIC user field
    let seen = requests.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let payload = &seen[0];
    assert_eq!(
        u16::from_be_bytes([payload[6], payload[7]]),
        CP_USRID,
        "password scheme must lead with the user ID block"
    );
    assert_eq!(payload[8], 0xD1, "user field must be EBCDIC, J is 0xD1");
}

#[test]
fn test_rejected_security_check_fails_creation() {
    let requests = Arc::new(Mutex::new(Vec::new()));
    let (port, host) = spawn_host(signon_host(false, requests));

    let factory = HostConnectionFactory::new(
        "127.0.0.1",
        Credential::Password {
            user: "jdoe".to_string(),
            secret: vec![0xA5; 8],
        },
        loopback_options(port),
    );
    match factory.create(false, None, None) {
        Err(HostlinkError::Auth(AuthError::Rejected { code })) => {
            assert_eq!(code, 0x16);
        }
        other => panic!("expected Rejected, got {other:?}"),
    }
    drop(host); // host thread exits on its own when the socket drops
}
